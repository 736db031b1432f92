//! Compiled rules and namespaces (spec.md §3, §4.5).
//!
//! A [`Rule`] is the unit the three-pass scheduler walks: it owns the
//! atoms its condition references, carries the flags that gate which
//! pass it's evaluated in, and records its own outcome for the
//! duration of a scan.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::atom::Atom;
use crate::condition::Expr;

bitflags! {
    /// Per-rule flags, mirroring `RULE_FLAGS_*` in
    /// `original_source/libyara.c`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RuleFlags: u16 {
        /// Evaluated in the global-rule pass (spec.md §4.5 pass 2);
        /// failing it blocks every ordinary rule in its namespace.
        const GLOBAL = 0b0000_0001;
        /// Excluded from scan results but still evaluable as part of
        /// another rule's condition.
        const PRIVATE = 0b0000_0010;
        /// Only evaluated when the scanned memory is an executable
        /// (spec.md §4.6).
        const REQUIRE_EXECUTABLE = 0b0000_0100;
        /// Only evaluated when the scan target is a file (as opposed to
        /// a raw in-memory buffer or a live process).
        const REQUIRE_FILE = 0b0000_1000;
        /// Set once the rule's condition evaluates true during a scan.
        const MATCH = 0b0001_0000;
        /// Set when a precondition pruned the rule before its condition
        /// was ever evaluated (spec.md §4.5 pass 1).
        const FAILED_PRECONDITION = 0b0010_0000;
    }
}

/// A rule's declared metadata key/value pair (`meta:` block). The value
/// shape mirrors the string/integer/boolean trio the variables module
/// also uses.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Integer(i64),
    Boolean(bool),
    String(String),
}

/// A namespace groups rules and tracks whether every `global` rule
/// declared in it has been satisfied (spec.md §4.5 pass 2): an
/// ordinary rule in a namespace whose global rules haven't all passed
/// is skipped outright, the way `yr_scanner_scan_mem_blocks` gates on
/// `namespace->flags & NAMESPACE_FLAGS_UNSATISFIED_GLOBAL`.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub global_rules_satisfied: bool,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Namespace { name: name.into(), global_rules_satisfied: true }
    }
}

/// The outcome of evaluating a rule, recorded so later passes (and the
/// callback) can see it without re-evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    NotEvaluated,
    Matched,
    NotMatched,
    FailedPrecondition,
}

impl From<u8> for RuleOutcome {
    fn from(v: u8) -> Self {
        match v {
            1 => RuleOutcome::Matched,
            2 => RuleOutcome::NotMatched,
            3 => RuleOutcome::FailedPrecondition,
            _ => RuleOutcome::NotEvaluated,
        }
    }
}

impl From<RuleOutcome> for u8 {
    fn from(v: RuleOutcome) -> Self {
        match v {
            RuleOutcome::NotEvaluated => 0,
            RuleOutcome::Matched => 1,
            RuleOutcome::NotMatched => 2,
            RuleOutcome::FailedPrecondition => 3,
        }
    }
}

/// A compiled rule.
///
/// `outcome` is an `AtomicU8` rather than a plain field so the scanner
/// can record a rule's result without needing `&mut Rule` — rules are
/// shared (`Arc<Rule>`) across the stripe workers' scan pass and the
/// single-threaded evaluation passes that follow it.
#[derive(Debug)]
pub struct Rule {
    pub identifier: String,
    pub namespace: String,
    pub flags: RuleFlags,
    pub atoms: Vec<Arc<Atom>>,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, MetaValue)>,
    pub condition: Expr,
    /// Precondition tree (spec.md §3), distinct from the
    /// `REQUIRE_EXECUTABLE`/`REQUIRE_FILE` flags: evaluated once per
    /// scan from atom counts alone, before any block is stripe-scanned
    /// (spec.md §4.5 pass 1; `original_source/libyara.c:545-555`).
    /// `None` means the rule has no precondition and is never pruned
    /// in pass 1.
    pub precondition: Option<Expr>,
    outcome: AtomicU8,
}

impl Rule {
    pub fn new(
        identifier: impl Into<String>,
        namespace: impl Into<String>,
        flags: RuleFlags,
        atoms: Vec<Arc<Atom>>,
        tags: Vec<String>,
        metadata: Vec<(String, MetaValue)>,
        condition: Expr,
    ) -> Self {
        Rule {
            identifier: identifier.into(),
            namespace: namespace.into(),
            flags,
            atoms,
            tags,
            metadata,
            condition,
            precondition: None,
            outcome: AtomicU8::new(RuleOutcome::NotEvaluated.into()),
        }
    }

    /// Attaches a precondition tree to the rule (spec.md §3). Chains
    /// onto [`Rule::new`]; rules built without calling this have no
    /// precondition and are never pruned in pass 1.
    pub fn with_precondition(mut self, precondition: Expr) -> Self {
        self.precondition = Some(precondition);
        self
    }

    pub fn find_atom(&self, id: &str) -> Option<&Arc<Atom>> {
        self.atoms.iter().find(|a| a.id == id)
    }

    pub fn outcome(&self) -> RuleOutcome {
        self.outcome.load(Ordering::Relaxed).into()
    }

    pub fn set_outcome(&self, outcome: RuleOutcome) {
        self.outcome.store(outcome.into(), Ordering::Relaxed);
    }

    pub fn is_global(&self) -> bool {
        self.flags.contains(RuleFlags::GLOBAL)
    }

    pub fn is_private(&self) -> bool {
        self.flags.contains(RuleFlags::PRIVATE)
    }

    /// Resets per-scan state: outcome and every atom's match list
    /// (spec.md invariant I5, "a rule set can be reused across scans").
    pub fn reset(&self) {
        self.set_outcome(RuleOutcome::NotEvaluated);
        for atom in &self.atoms {
            atom.clear_matches();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomFlags;

    fn rule(flags: RuleFlags) -> Rule {
        Rule::new("r", "default", flags, vec![], vec![], vec![], Expr::BoolLiteral(true))
    }

    #[test]
    fn new_rule_starts_unevaluated() {
        let r = rule(RuleFlags::empty());
        assert_eq!(r.outcome(), RuleOutcome::NotEvaluated);
    }

    #[test]
    fn flags_roundtrip_through_accessors() {
        let r = rule(RuleFlags::GLOBAL | RuleFlags::PRIVATE);
        assert!(r.is_global());
        assert!(r.is_private());
        assert!(!r.flags.contains(RuleFlags::REQUIRE_EXECUTABLE));
    }

    #[test]
    fn find_atom_looks_up_by_id() {
        let atom = Arc::new(Atom::literal("a", b"x".to_vec(), AtomFlags::ASCII));
        let r = Rule::new(
            "r",
            "default",
            RuleFlags::empty(),
            vec![atom],
            vec![],
            vec![],
            Expr::BoolLiteral(true),
        );
        assert!(r.find_atom("a").is_some());
        assert!(r.find_atom("b").is_none());
    }

    #[test]
    fn with_precondition_is_none_until_attached() {
        let r = rule(RuleFlags::empty());
        assert!(r.precondition.is_none());
        let r = Rule::new("r", "default", RuleFlags::empty(), vec![], vec![], vec![], Expr::BoolLiteral(true))
            .with_precondition(Expr::BoolLiteral(false));
        assert!(matches!(r.precondition, Some(Expr::BoolLiteral(false))));
    }

    #[test]
    fn reset_clears_outcome_and_matches() {
        let atom = Arc::new(Atom::literal("a", b"x".to_vec(), AtomFlags::ASCII));
        atom.record_match(crate::atom::Match { offset: 0, length: 1, data: b"x".to_vec() });
        let r = Rule::new(
            "r",
            "default",
            RuleFlags::empty(),
            vec![atom],
            vec![],
            vec![],
            Expr::BoolLiteral(true),
        );
        r.set_outcome(RuleOutcome::Matched);
        r.reset();
        assert_eq!(r.outcome(), RuleOutcome::NotEvaluated);
        assert_eq!(r.find_atom("a").unwrap().match_count(), 0);
    }
}
