//! The regular expression engine is an external collaborator (spec.md
//! §1, §6): the core only needs an opaque primitive that, given a
//! window of bytes, returns the length of the leftmost match anchored
//! at offset 0, or 0 for no match. This module defines that trait and
//! a concrete implementation backed by the `regex` crate, which is the
//! regex engine already present in the teacher's dependency stack.

use std::fmt;

/// Opaque regex primitive consumed by the string matcher (spec.md §4.2,
/// §6). Implementors must be re-entrant: the stripe scanner invokes
/// this from multiple worker threads concurrently with no external
/// synchronization (§5).
pub trait RegexMatcher: Send + Sync + fmt::Debug {
    /// Returns the length of the leftmost match anchored at offset 0 of
    /// `data`, or `0` if there is no match.
    fn match_at(&self, data: &[u8]) -> usize;
}

/// Default [`RegexMatcher`] backed by `regex::bytes::Regex`.
///
/// Patterns are wrapped so that matching is always anchored to the
/// start of the provided window (`^` behavior), matching the contract
/// in spec.md §6 ("anchored at offset 0 of the window").
pub struct CompiledRegex {
    inner: regex::bytes::Regex,
}

impl fmt::Debug for CompiledRegex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRegex").field("pattern", &self.inner.as_str()).finish()
    }
}

impl CompiledRegex {
    /// Compiles `pattern`, anchoring it to the start of the match
    /// window. `pattern` should not itself include a leading `^` — one
    /// is added automatically.
    pub fn new(pattern: &str) -> Result<Self, crate::errors::Error> {
        let anchored = format!("^(?:{})", pattern);
        let inner = regex::bytes::RegexBuilder::new(&anchored)
            .unicode(false)
            .build()
            .map_err(|err| crate::errors::Error::InvalidRegularExpression {
                extra_info: Some(err.to_string()),
            })?;
        Ok(CompiledRegex { inner })
    }
}

impl RegexMatcher for CompiledRegex {
    fn match_at(&self, data: &[u8]) -> usize {
        match self.inner.find(data) {
            Some(m) if m.start() == 0 => m.end(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchored_match_returns_length() {
        let re = CompiledRegex::new("ab+c").unwrap();
        assert_eq!(re.match_at(b"abbbcdef"), 5);
    }

    #[test]
    fn non_anchored_occurrence_does_not_match() {
        let re = CompiledRegex::new("bc").unwrap();
        assert_eq!(re.match_at(b"abc"), 0);
    }

    #[test]
    fn no_match_returns_zero() {
        let re = CompiledRegex::new("xyz").unwrap();
        assert_eq!(re.match_at(b"abc"), 0);
    }
}
