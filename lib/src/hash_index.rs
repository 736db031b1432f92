//! The prefilter hash index (spec.md §4.1): a cheap first-byte /
//! first-two-byte classification of atoms that lets the stripe scanner
//! avoid testing every atom at every position.

use std::sync::Arc;

use crate::atom::{Atom, AtomFlags};
use crate::errors::Error;

/// NOCASE atoms are bucketed under their ASCII-lowercase key so that a
/// single lookup keyed by the (also-folded) scanned bytes finds them,
/// regardless of which case actually occurs in the data. Case-sensitive
/// atoms are bucketed under their literal bytes.
#[inline]
fn bucket_key(atom: &Atom, byte: u8) -> u8 {
    if atom.flags.contains(AtomFlags::NOCASE) {
        byte.to_ascii_lowercase()
    } else {
        byte
    }
}

/// Two hash tables keyed by the first one/two concrete bytes of each
/// atom's pattern, plus a residual bucket for atoms that can't be
/// hashed (regexes, or patterns with a wildcarded first byte).
///
/// Built lazily on first scan (`populated` flag) and left untouched for
/// the lifetime of the rule set — the core treats rule-set mutation as
/// an invariant held by callers (spec.md §4.1).
pub struct HashIndex {
    /// Flat `256 * 256` table, indexed as `b0 as usize * 256 + b1 as usize`.
    buckets_2b: Vec<Vec<Arc<Atom>>>,
    buckets_1b: Vec<Vec<Arc<Atom>>>,
    residual: Vec<Arc<Atom>>,
    populated: bool,
}

impl HashIndex {
    pub fn new() -> Self {
        HashIndex {
            buckets_2b: (0..256 * 256).map(|_| Vec::new()).collect(),
            buckets_1b: (0..256).map(|_| Vec::new()).collect(),
            residual: Vec::new(),
            populated: false,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Places every atom from `atoms` into the right bucket. Idempotent:
    /// calling this again after `clear` rebuilds from scratch.
    ///
    /// Ordering between atoms within a bucket is not observable (spec.md
    /// §4.1); insertion order is preserved only incidentally.
    pub fn populate<'a>(
        &mut self,
        atoms: impl IntoIterator<Item = &'a Arc<Atom>>,
    ) -> Result<(), Error> {
        for atom in atoms {
            match (atom.first_concrete_byte(), atom.second_concrete_byte()) {
                (Some(b0), Some(b1)) => {
                    let (k0, k1) = (bucket_key(atom, b0), bucket_key(atom, b1));
                    self.bucket_2b_mut(k0, k1).push(atom.clone());
                }
                (Some(b0), None) => {
                    let k0 = bucket_key(atom, b0);
                    self.buckets_1b[k0 as usize].push(atom.clone());
                }
                _ => {
                    self.residual.push(atom.clone());
                }
            }
        }
        self.populated = true;
        Ok(())
    }

    pub fn clear(&mut self) {
        for bucket in self.buckets_2b.iter_mut() {
            bucket.clear();
        }
        for bucket in self.buckets_1b.iter_mut() {
            bucket.clear();
        }
        self.residual.clear();
        self.populated = false;
    }

    #[inline]
    fn index_2b(b0: u8, b1: u8) -> usize {
        b0 as usize * 256 + b1 as usize
    }

    #[inline]
    fn bucket_2b_mut(&mut self, b0: u8, b1: u8) -> &mut Vec<Arc<Atom>> {
        &mut self.buckets_2b[Self::index_2b(b0, b1)]
    }

    pub fn bucket_2b(&self, b0: u8, b1: u8) -> &[Arc<Atom>] {
        &self.buckets_2b[Self::index_2b(b0, b1)]
    }

    pub fn bucket_1b(&self, b0: u8) -> &[Arc<Atom>] {
        &self.buckets_1b[b0 as usize]
    }

    pub fn residual(&self) -> &[Arc<Atom>] {
        &self.residual
    }

    /// A weighted estimate of scan cost over this rule set, modeled
    /// after `yr_calculate_rules_weight` / `string_weight` in
    /// `original_source/libyara.c`: 2-byte bucket entries are weighted
    /// by 1 (plus one per non-empty bucket), 1-byte bucket entries by 2,
    /// and residual (regex / unhashed) entries by 4, since those are
    /// tested unconditionally at every stripe position.
    pub fn estimated_weight(&self) -> u64 {
        let mut weight = 0u64;
        for bucket in &self.buckets_2b {
            if !bucket.is_empty() {
                weight += bucket.len() as u64 + 1;
            }
        }
        for bucket in &self.buckets_1b {
            weight += bucket.len() as u64 * 2;
        }
        weight += self.residual.len() as u64 * 4;
        weight
    }
}

impl Default for HashIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomFlags;

    #[test]
    fn fully_concrete_atom_lands_in_2b_bucket() {
        let mut index = HashIndex::new();
        let atom = Arc::new(Atom::literal("a", b"hello".to_vec(), AtomFlags::ASCII));
        index.populate([&atom]).unwrap();
        assert_eq!(index.bucket_2b(b'h', b'e').len(), 1);
        assert!(index.bucket_1b(b'h').is_empty());
        assert!(index.residual().is_empty());
    }

    #[test]
    fn single_concrete_byte_lands_in_1b_bucket() {
        let mut index = HashIndex::new();
        let atom = Arc::new(Atom::hex("h", vec![0xDE, 0xAD], vec![0xFF, 0x00], AtomFlags::empty()));
        index.populate([&atom]).unwrap();
        assert_eq!(index.bucket_1b(0xDE).len(), 1);
        assert!(index.bucket_2b(0xDE, 0xAD).is_empty());
    }

    #[test]
    fn wildcarded_first_byte_lands_in_residual() {
        let mut index = HashIndex::new();
        let atom = Arc::new(Atom::hex("h", vec![0xDE, 0xAD], vec![0x00, 0xFF], AtomFlags::empty()));
        index.populate([&atom]).unwrap();
        assert_eq!(index.residual().len(), 1);
    }

    #[test]
    fn nocase_atom_is_bucketed_under_its_lowercase_key() {
        let mut index = HashIndex::new();
        let atom = Arc::new(Atom::literal("a", b"HELLO".to_vec(), AtomFlags::ASCII | AtomFlags::NOCASE));
        index.populate([&atom]).unwrap();
        assert_eq!(index.bucket_2b(b'h', b'e').len(), 1);
        assert!(index.bucket_2b(b'H', b'E').is_empty());
    }

    #[test]
    fn clear_empties_every_bucket() {
        let mut index = HashIndex::new();
        let atom = Arc::new(Atom::literal("a", b"ab".to_vec(), AtomFlags::ASCII));
        index.populate([&atom]).unwrap();
        index.clear();
        assert!(!index.is_populated());
        assert!(index.bucket_2b(b'a', b'b').is_empty());
    }
}
