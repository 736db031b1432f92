//! Compiled string atoms and the matches recorded against them.
//!
//! An [`Atom`] is what the rule compiler (out of scope for this crate)
//! produces for every string declared in a rule: an ASCII/wide literal, a
//! hex pattern with an optional wildcard mask, or a regular expression
//! backed by an opaque [`crate::regex_engine::RegexMatcher`]. The matcher
//! and stripe scanner only ever see this flattened representation —
//! alternation and `[n-m]` jump expansion already happened upstream.

use std::sync::{Arc, Mutex};

use bitflags::bitflags;

bitflags! {
    /// Flags describing how an atom's pattern should be matched.
    ///
    /// Mirrors the `STRING_FLAGS_*` bit set from the original C
    /// implementation (see `original_source/libyara.c`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AtomFlags: u16 {
        const HEXADECIMAL  = 0b0000_0001;
        const ASCII        = 0b0000_0010;
        const WIDE         = 0b0000_0100;
        const REGEXP       = 0b0000_1000;
        const NOCASE       = 0b0001_0000;
        const FULLWORD     = 0b0010_0000;
        const ANONYMOUS    = 0b0100_0000;
        const SINGLE_MATCH = 0b1000_0000;
    }
}

/// A single recorded occurrence of an atom in the scanned data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Absolute offset: `block.base + i` at the time of the match.
    pub offset: u64,
    /// Length of the match in bytes (`2 * pattern.len()` for wide atoms).
    pub length: usize,
    /// Copy of the matched bytes, captured at match time.
    pub data: Vec<u8>,
}

/// A compiled string atom.
///
/// Atoms are owned by their [`crate::rule::Rule`]; the prefilter hash
/// index and stripe scanner only borrow them. Match lists are
/// append-only during a scan and are cleared at the start of the next
/// one (spec.md invariant I5).
#[derive(Debug)]
pub struct Atom {
    pub id: String,
    pub pattern: Vec<u8>,
    /// Present only for `HEXADECIMAL` atoms with a wildcard mask; when
    /// `None`, every byte of `pattern` must match exactly (subject to
    /// `NOCASE` folding). Invariant I1: when present, has the same
    /// length as `pattern`.
    pub mask: Option<Vec<u8>>,
    pub flags: AtomFlags,
    /// Opaque regex handle, present only for `REGEXP` atoms.
    pub regex: Option<Arc<dyn crate::regex_engine::RegexMatcher>>,
    matches: Mutex<Vec<Match>>,
}

impl Atom {
    pub fn literal(id: impl Into<String>, pattern: impl Into<Vec<u8>>, flags: AtomFlags) -> Self {
        Atom {
            id: id.into(),
            pattern: pattern.into(),
            mask: None,
            flags,
            regex: None,
            matches: Mutex::new(Vec::new()),
        }
    }

    pub fn hex(
        id: impl Into<String>,
        pattern: impl Into<Vec<u8>>,
        mask: impl Into<Vec<u8>>,
        flags: AtomFlags,
    ) -> Self {
        let pattern = pattern.into();
        let mask = mask.into();
        debug_assert_eq!(pattern.len(), mask.len(), "atom mask must match pattern length (I1)");
        Atom {
            id: id.into(),
            pattern,
            mask: Some(mask),
            flags: flags | AtomFlags::HEXADECIMAL,
            regex: None,
            matches: Mutex::new(Vec::new()),
        }
    }

    pub fn regex(
        id: impl Into<String>,
        regex: Arc<dyn crate::regex_engine::RegexMatcher>,
        flags: AtomFlags,
    ) -> Self {
        Atom {
            id: id.into(),
            pattern: Vec::new(),
            mask: None,
            flags: flags | AtomFlags::REGEXP,
            regex: Some(regex),
            matches: Mutex::new(Vec::new()),
        }
    }

    /// The first concrete (non-wildcarded) byte of the pattern, if any.
    /// Used by the prefilter index to decide which bucket this atom
    /// belongs in (spec.md §4.1).
    pub fn first_concrete_byte(&self) -> Option<u8> {
        match &self.mask {
            Some(mask) => {
                if mask.first().copied().unwrap_or(0) == 0xFF {
                    self.pattern.first().copied()
                } else {
                    None
                }
            }
            None => self.pattern.first().copied(),
        }
    }

    /// The second concrete byte, assuming the first one is concrete.
    pub fn second_concrete_byte(&self) -> Option<u8> {
        match &self.mask {
            Some(mask) => {
                if mask.get(1).copied().unwrap_or(0) == 0xFF {
                    self.pattern.get(1).copied()
                } else {
                    None
                }
            }
            None => self.pattern.get(1).copied(),
        }
    }

    pub fn is_single_match(&self) -> bool {
        self.flags.contains(AtomFlags::SINGLE_MATCH)
    }

    /// Appends a match under the atom-local lock (§5: coarse-grained in
    /// spec, but per-atom locks are the "preferred" alternative the
    /// design notes call out — we use a per-atom `Mutex` here).
    pub fn record_match(&self, m: Match) {
        let mut guard = self.matches.lock().unwrap();
        if self.is_single_match() && !guard.is_empty() {
            return;
        }
        guard.push(m);
    }

    pub fn match_count(&self) -> usize {
        self.matches.lock().unwrap().len()
    }

    pub fn has_match(&self) -> bool {
        self.match_count() > 0
    }

    /// The k-th match (1-based), sorted by ascending absolute offset, as
    /// required before any `@s[k]` evaluation (§5 ordering guarantees).
    pub fn nth_match(&self, k: usize) -> Option<Match> {
        if k == 0 {
            return None;
        }
        let guard = self.matches.lock().unwrap();
        let mut sorted: Vec<&Match> = guard.iter().collect();
        sorted.sort_by_key(|m| m.offset);
        sorted.get(k - 1).map(|m| (*m).clone())
    }

    pub fn matches_sorted(&self) -> Vec<Match> {
        let guard = self.matches.lock().unwrap();
        let mut sorted: Vec<Match> = guard.clone();
        sorted.sort_by_key(|m| m.offset);
        sorted
    }

    /// Clears the match list. Called once per scan (invariant I5).
    pub fn clear_matches(&self) {
        self.matches.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_match_atoms_cap_at_one() {
        let atom = Atom::literal("a", b"hello".to_vec(), AtomFlags::ASCII | AtomFlags::SINGLE_MATCH);
        atom.record_match(Match { offset: 0, length: 5, data: b"hello".to_vec() });
        atom.record_match(Match { offset: 10, length: 5, data: b"hello".to_vec() });
        assert_eq!(atom.match_count(), 1);
    }

    #[test]
    fn nth_match_is_sorted_by_offset() {
        let atom = Atom::literal("a", b"x".to_vec(), AtomFlags::ASCII);
        atom.record_match(Match { offset: 50, length: 1, data: b"x".to_vec() });
        atom.record_match(Match { offset: 5, length: 1, data: b"x".to_vec() });
        atom.record_match(Match { offset: 20, length: 1, data: b"x".to_vec() });
        assert_eq!(atom.nth_match(1).unwrap().offset, 5);
        assert_eq!(atom.nth_match(2).unwrap().offset, 20);
        assert_eq!(atom.nth_match(3).unwrap().offset, 50);
        assert!(atom.nth_match(4).is_none());
    }

    #[test]
    fn first_and_second_concrete_bytes_respect_mask() {
        let atom = Atom::hex("h", vec![0xDE, 0xAD], vec![0xFF, 0x00], AtomFlags::empty());
        assert_eq!(atom.first_concrete_byte(), Some(0xDE));
        assert_eq!(atom.second_concrete_byte(), None);
    }

    #[test]
    fn clear_matches_empties_the_list() {
        let atom = Atom::literal("a", b"x".to_vec(), AtomFlags::ASCII);
        atom.record_match(Match { offset: 0, length: 1, data: b"x".to_vec() });
        atom.clear_matches();
        assert_eq!(atom.match_count(), 0);
    }
}
