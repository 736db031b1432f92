//! The string matcher (spec.md §4.2): given a position in a block,
//! tests every candidate atom pulled from the relevant hash buckets and
//! records a match on the atom when it matches.

use crate::atom::{Atom, AtomFlags, Match};
use crate::hash_index::HashIndex;

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn ascii_fold(b: u8) -> u8 {
    b.to_ascii_lowercase()
}

/// Tests whether `atom` matches `data` at `pos`, honoring NOCASE and
/// FULLWORD. Returns the match length on success.
///
/// `data` is the whole block (needed so FULLWORD can look at the byte
/// before `pos`); `pos` is the candidate start offset within it.
fn full_match_at_ascii(atom: &Atom, data: &[u8], pos: usize) -> Option<usize> {
    let pattern = &atom.pattern;
    let len = pattern.len();
    if pos + len > data.len() {
        return None;
    }
    let window = &data[pos..pos + len];
    let nocase = atom.flags.contains(AtomFlags::NOCASE);

    for (k, &p) in pattern.iter().enumerate() {
        let mask = atom.mask.as_ref().map(|m| m[k]).unwrap_or(0xFF);
        let mut d = window[k];
        let mut expected = p;
        if nocase {
            d = ascii_fold(d);
            expected = ascii_fold(expected);
        }
        if d & mask != expected & mask {
            return None;
        }
    }

    if atom.flags.contains(AtomFlags::FULLWORD) {
        let before_ok = pos == 0 || !is_word_byte(data[pos - 1]);
        let after_ok = pos + len >= data.len() || !is_word_byte(data[pos + len]);
        if !(before_ok && after_ok) {
            return None;
        }
    }

    Some(len)
}

/// WIDE comparison: `data[pos + 2k]` must match `pattern[k]` and
/// `data[pos + 2k + 1]` must be zero (spec.md §4.2). The open question
/// in spec.md §9 about FULLWORD + WIDE interplay is resolved here as:
/// word-boundary bytes are read from the low byte of each 16-bit unit,
/// with the interleaved zero byte treated as non-word (so it never
/// masks a real boundary).
fn full_match_at_wide(atom: &Atom, data: &[u8], pos: usize) -> Option<usize> {
    let pattern = &atom.pattern;
    let char_len = pattern.len();
    let byte_len = char_len * 2;
    if pos + byte_len > data.len() {
        return None;
    }
    let nocase = atom.flags.contains(AtomFlags::NOCASE);

    for (k, &p) in pattern.iter().enumerate() {
        let lo = data[pos + 2 * k];
        let hi = data[pos + 2 * k + 1];
        if hi != 0 {
            return None;
        }
        let mask = atom.mask.as_ref().map(|m| m[k]).unwrap_or(0xFF);
        let (mut d, mut expected) = (lo, p);
        if nocase {
            d = ascii_fold(d);
            expected = ascii_fold(expected);
        }
        if d & mask != expected & mask {
            return None;
        }
    }

    if atom.flags.contains(AtomFlags::FULLWORD) {
        let before_ok = pos < 2 || data[pos - 1] != 0 || !is_word_byte(data[pos - 2]);
        let after = pos + byte_len;
        let after_ok = after + 1 >= data.len() || data[after + 1] != 0 || !is_word_byte(data[after]);
        if !(before_ok && after_ok) {
            return None;
        }
    }

    Some(byte_len)
}

/// Tests one atom against `data` at `pos` and records a match on
/// success. `ascii_flags_only` selects whether ASCII/HEX or WIDE
/// comparison is used, matching the two `find_matches` invocations per
/// position in `original_source/libyara.c`'s `threaded_scan`.
fn try_match(atom: &Atom, data: &[u8], pos: usize, base: u64, wide: bool) -> bool {
    if atom.flags.contains(AtomFlags::REGEXP) {
        return try_match_regex(atom, data, pos, base);
    }
    let matched = if wide {
        full_match_at_wide(atom, data, pos)
    } else {
        full_match_at_ascii(atom, data, pos)
    };
    if let Some(length) = matched {
        atom.record_match(Match {
            offset: base + pos as u64,
            length,
            data: data[pos..pos + length].to_vec(),
        });
        true
    } else {
        false
    }
}

fn try_match_regex(atom: &Atom, data: &[u8], pos: usize, base: u64) -> bool {
    let Some(regex) = atom.regex.as_ref() else { return false };
    let window = &data[pos..];
    let length = regex.match_at(window);
    if length > 0 {
        atom.record_match(Match {
            offset: base + pos as u64,
            length,
            data: data[pos..pos + length].to_vec(),
        });
        true
    } else {
        false
    }
}

/// Runs the matcher at byte offset `i` of `data`, the single-position
/// body of the stripe loop (spec.md §4.2 / §4.3).
///
/// `base` is the block's absolute base address, used to compute
/// absolute match offsets.
fn ascii_bucket_candidates<'a>(
    index: &'a HashIndex,
    b0: u8,
    b1: u8,
) -> impl Iterator<Item = &'a std::sync::Arc<Atom>> {
    let (f0, f1) = (ascii_fold(b0), ascii_fold(b1));
    let raw = index.bucket_2b(b0, b1);
    let folded: &[std::sync::Arc<Atom>] =
        if (f0, f1) == (b0, b1) { &[] } else { index.bucket_2b(f0, f1) };
    raw.iter().chain(folded.iter())
}

fn one_byte_bucket_candidates<'a>(
    index: &'a HashIndex,
    b0: u8,
) -> impl Iterator<Item = &'a std::sync::Arc<Atom>> {
    let f0 = ascii_fold(b0);
    let raw = index.bucket_1b(b0);
    let folded: &[std::sync::Arc<Atom>] = if f0 == b0 { &[] } else { index.bucket_1b(f0) };
    raw.iter().chain(folded.iter())
}

/// Runs the matcher at byte offset `i` of `data`, the single-position
/// body of the stripe loop (spec.md §4.2 / §4.3).
///
/// `base` is the block's absolute base address, used to compute
/// absolute match offsets.
pub fn match_at_position(index: &HashIndex, data: &[u8], base: u64, i: usize) {
    let size = data.len();
    let b0 = data[i];
    let b1 = data[i + 1];

    for atom in ascii_bucket_candidates(index, b0, b1) {
        if atom.flags.intersects(AtomFlags::ASCII | AtomFlags::HEXADECIMAL) {
            try_match(atom, data, i, base, false);
        }
    }
    for atom in one_byte_bucket_candidates(index, b0) {
        if atom.flags.intersects(AtomFlags::ASCII | AtomFlags::HEXADECIMAL) {
            try_match(atom, data, i, base, false);
        }
    }
    for atom in index.residual() {
        try_match_regex(atom, data, i, base);
    }

    // Wide strings: an ASCII-interleaved indicator is `data[i+1] == 0`
    // with a further zero two bytes ahead (spec.md §4.2).
    if data[i + 1] == 0 && i + 3 < size && data[i + 3] == 0 {
        let bw = data[i + 2];
        for atom in ascii_bucket_candidates(index, b0, bw) {
            if atom.flags.contains(AtomFlags::WIDE) {
                try_match(atom, data, i, base, true);
            }
        }
        for atom in one_byte_bucket_candidates(index, b0) {
            if atom.flags.contains(AtomFlags::WIDE) {
                try_match(atom, data, i, base, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use std::sync::Arc;

    fn index_for(atoms: Vec<Arc<Atom>>) -> HashIndex {
        let mut index = HashIndex::new();
        index.populate(atoms.iter()).unwrap();
        index
    }

    #[test]
    fn ascii_literal_matches_at_offset() {
        let atom = Arc::new(Atom::literal("a", b"hello".to_vec(), AtomFlags::ASCII));
        let index = index_for(vec![atom.clone()]);
        let data = b"say hello world";
        for i in 0..data.len().saturating_sub(1) {
            match_at_position(&index, data, 0, i);
        }
        assert_eq!(atom.match_count(), 1);
        let m = atom.nth_match(1).unwrap();
        assert_eq!(m.offset, 4);
        assert_eq!(m.length, 5);
    }

    #[test]
    fn wide_literal_matches_utf16le_bytes() {
        let atom = Arc::new(Atom::literal("w", b"AB".to_vec(), AtomFlags::WIDE));
        let index = index_for(vec![atom.clone()]);
        let data = [0x41, 0x00, 0x42, 0x00, 0x43];
        for i in 0..data.len().saturating_sub(1) {
            match_at_position(&index, &data, 0, i);
        }
        assert_eq!(atom.match_count(), 1);
        let m = atom.nth_match(1).unwrap();
        assert_eq!(m.offset, 0);
        assert_eq!(m.length, 4);
    }

    #[test]
    fn hex_pattern_with_wildcard_matches() {
        let atom = Arc::new(Atom::hex(
            "h",
            vec![0xDE, 0xAD, 0x00, 0xBE, 0xEF],
            vec![0xFF, 0xFF, 0x00, 0xFF, 0xFF],
            AtomFlags::HEXADECIMAL,
        ));
        let index = index_for(vec![atom.clone()]);
        let data = [0xDE, 0xAD, 0xCA, 0xBE, 0xEF];
        for i in 0..data.len().saturating_sub(1) {
            match_at_position(&index, &data, 0, i);
        }
        assert_eq!(atom.match_count(), 1);
        let m = atom.nth_match(1).unwrap();
        assert_eq!(m.offset, 0);
        assert_eq!(m.length, 5);
    }

    #[test]
    fn fullword_rejects_matches_inside_a_word() {
        let atom = Arc::new(Atom::literal("a", b"cat".to_vec(), AtomFlags::ASCII | AtomFlags::FULLWORD));
        let index = index_for(vec![atom.clone()]);
        let data = b"concatenate cat";
        for i in 0..data.len().saturating_sub(1) {
            match_at_position(&index, data, 0, i);
        }
        assert_eq!(atom.match_count(), 1);
        assert_eq!(atom.nth_match(1).unwrap().offset, 12);
    }

    #[test]
    fn nocase_matches_regardless_of_case() {
        let atom = Arc::new(Atom::literal("a", b"HELLO".to_vec(), AtomFlags::ASCII | AtomFlags::NOCASE));
        let index = index_for(vec![atom.clone()]);
        let data = b"say hello world";
        for i in 0..data.len().saturating_sub(1) {
            match_at_position(&index, data, 0, i);
        }
        assert_eq!(atom.match_count(), 1);
    }
}
