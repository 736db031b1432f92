//! `warden` is a byte-pattern rule scanning engine: given a set of
//! rules (string atoms plus a boolean condition over them) and some
//! bytes to scan — an in-memory buffer, a file, or a sequence of
//! process-memory blocks — it reports which rules match.
//!
//! The pipeline, roughly in the order a scan walks it:
//!
//! 1. [`atom`] — compiled string atoms and their recorded matches.
//! 2. [`hash_index`] — a first-byte/first-two-byte prefilter over the
//!    atom set, built once per rule set.
//! 3. [`matcher`] and [`stripe`] — the position-level matcher and the
//!    multi-threaded stripe scanner that drives it over a block.
//! 4. [`condition`] — the expression evaluator for rule conditions.
//! 5. [`rule`] and [`context`] — rules, namespaces, and the scan
//!    context that owns them.
//! 6. [`scanner`] — the three-pass scheduler that ties everything
//!    together: precondition pruning, the scan pass, global-rule
//!    evaluation, then ordinary-rule evaluation.
//!
//! Building a rule's condition tree from source text is out of scope:
//! this crate consumes an already-built [`condition::Expr`], the way a
//! compiler front end would hand it off.

pub mod atom;
pub mod condition;
pub mod context;
pub mod errors;
pub mod exe;
pub mod hash_index;
pub mod matcher;
pub mod memory;
pub mod regex_engine;
pub mod rule;
pub mod scanner;
pub mod stripe;
pub mod variables;

pub use atom::{Atom, AtomFlags, Match};
pub use condition::{EvalResult, EvaluationContext, Expr, Value};
pub use context::Context;
pub use errors::{Error, ScanError};
pub use memory::{MemoryBlock, MemoryBlockList};
pub use rule::{Namespace, Rule, RuleFlags, RuleOutcome};
pub use scanner::{CallbackAction, ScanCallback};
