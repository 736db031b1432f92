//! The three-pass scanner (spec.md §4.5): runs the stripe scanner over
//! every memory block, then evaluates rule conditions in the order the
//! spec requires — preconditions first, then `global` rules (which gate
//! their namespace), then ordinary rules.
//!
//! This replaces the WASM-bytecode execution model entirely: there is
//! no compiled module, no exported globals, no host-call trampoline.
//! Conditions are plain [`crate::condition::Expr`] trees walked
//! directly by [`crate::condition::eval`].

use crate::condition;
use crate::condition::EvaluationContext;
use crate::context::Context;
use crate::errors::ScanError;
use crate::memory::MemoryBlockList;
use crate::rule::{Rule, RuleFlags, RuleOutcome};
use crate::stripe;

/// What a [`ScanCallback`] asks the scanner to do after a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// Stop scanning immediately; already-recorded matches stand, no
    /// error is raised. Equivalent to `CALLBACK_ABORT` in
    /// `original_source/libyara.c`.
    Abort,
    /// Stop scanning and surface [`ScanError::CallbackError`].
    Error,
}

/// Receives one notification per non-private rule, in the order rules
/// are evaluated — global rules before ordinary ones — regardless of
/// whether the rule's condition actually matched (spec.md §4.5, §6: "in
/// insertion order after all scanning completes"). The rule's `MATCH`
/// flag (via [`Rule::outcome`]) tells the recipient which case it is.
pub trait ScanCallback {
    fn on_rule_match(&mut self, rule: &Rule) -> CallbackAction;
}

/// Records every non-private rule the scan notified about, splitting
/// them by whether the rule actually matched — the callback fires for
/// every such rule regardless of outcome (spec.md §4.5), so it's up to
/// the recipient to inspect `rule.outcome()` the way this one does.
#[derive(Debug, Default)]
pub struct CollectingCallback {
    pub matched: Vec<String>,
    pub notified: Vec<String>,
}

impl ScanCallback for CollectingCallback {
    fn on_rule_match(&mut self, rule: &Rule) -> CallbackAction {
        self.notified.push(rule.identifier.clone());
        if rule.outcome() == RuleOutcome::Matched {
            self.matched.push(rule.identifier.clone());
        }
        CallbackAction::Continue
    }
}

/// Runs the full three-pass protocol over `blocks` and reports matches
/// through `callback`.
///
/// `entry_point` and `is_executable`/`is_file` are resolved by the
/// caller (spec.md §4.6: these come from the scan target, not from the
/// scanner itself, which only ever deals in [`MemoryBlockList`]s).
pub fn scan(
    ctx: &mut Context,
    blocks: &MemoryBlockList,
    entry_point: Option<u64>,
    is_executable: bool,
    is_file: bool,
    thread_count: usize,
    callback: &mut dyn ScanCallback,
) -> Result<(), ScanError> {
    log::debug!(
        "scan starting: {} rules, {} blocks, {} threads",
        ctx.rules.len(),
        blocks.iter().count(),
        thread_count
    );

    // The prefilter index is built lazily from whatever rules are
    // currently registered (spec.md §4.1); this is a no-op once it's
    // already populated and the rule set hasn't changed since.
    if ctx.ensure_index().is_err() {
        return Err(ScanError::InsufficientMemory);
    }

    // Pass 1: precondition pruning. A rule's `precondition` tree (if it
    // has one) is evaluated once here, from atom counts alone — no
    // block has been stripe-scanned yet, so `entry_point` is pinned to
    // 0 (spec.md §4.5 pass 1; `original_source/libyara.c:545-555`).
    // This is unrelated to REQUIRE_EXECUTABLE/REQUIRE_FILE, which gate
    // ordinary-rule evaluation in pass 4 instead.
    let mut needs_scan = false;
    for rule in &ctx.rules {
        match rule.precondition.as_ref() {
            None => needs_scan = true,
            Some(precondition) => {
                let eval_ctx = EvaluationContext { blocks, rule, variables: &ctx.variables, entry_point: Some(0) };
                if condition::is_true(precondition, &eval_ctx) {
                    needs_scan = true;
                } else {
                    rule.set_outcome(RuleOutcome::FailedPrecondition);
                }
            }
        }
    }
    if !needs_scan {
        log::debug!("every rule's precondition failed; skipping the scan pass");
        return Ok(());
    }

    // Pass 2: scan pass. Stripe-scan every block so every atom's match
    // list is populated before any condition is evaluated.
    for block in blocks.iter() {
        stripe::scan_block(&ctx.index, block, thread_count)?;
    }

    // Pass 3: global-rule evaluation. A failing global rule marks its
    // namespace unsatisfied, which gates every ordinary rule in that
    // namespace in pass 4 (spec.md §4.5). The callback fires for every
    // non-private global rule regardless of outcome.
    for rule in &ctx.rules {
        if !rule.is_global() || rule.outcome() == RuleOutcome::FailedPrecondition {
            continue;
        }
        let matched = evaluate(rule, blocks, ctx, entry_point);
        rule.set_outcome(if matched { RuleOutcome::Matched } else { RuleOutcome::NotMatched });
        if !matched {
            if let Some(ns) = ctx.namespaces.get_mut(&rule.namespace) {
                ns.global_rules_satisfied = false;
            }
        }

        if !rule.is_private() {
            log::debug!("global rule \"{}\" evaluated to {}", rule.identifier, matched);
            match callback.on_rule_match(rule) {
                CallbackAction::Continue => {}
                CallbackAction::Abort => {
                    log::debug!("scan aborted by callback");
                    return Ok(());
                }
                CallbackAction::Error => return Err(ScanError::CallbackError),
            }
        }
    }

    // Pass 4: ordinary rule evaluation, gated by namespace. A rule whose
    // namespace has an unsatisfied global, or whose REQUIRE_EXECUTABLE /
    // REQUIRE_FILE flag isn't met by the scan target, is never evaluated
    // — but the callback still fires for it (spec.md §4.5 scenario 4:
    // "R is suppressed (no MATCH). Callback for R still fires with
    // MATCH cleared"). This is a pass-4 gate, not pass 1's precondition
    // check (`original_source/libyara.c:673-674`).
    for rule in &ctx.rules {
        if rule.is_global() || rule.outcome() == RuleOutcome::FailedPrecondition {
            continue;
        }
        let namespace_ok =
            ctx.namespaces.get(&rule.namespace).map(|ns| ns.global_rules_satisfied).unwrap_or(true);
        let require_executable_ok = !rule.flags.contains(RuleFlags::REQUIRE_EXECUTABLE) || is_executable;
        let require_file_ok = !rule.flags.contains(RuleFlags::REQUIRE_FILE) || is_file;

        let matched = if namespace_ok && require_executable_ok && require_file_ok {
            evaluate(rule, blocks, ctx, entry_point)
        } else {
            false
        };
        rule.set_outcome(if matched { RuleOutcome::Matched } else { RuleOutcome::NotMatched });

        if !rule.is_private() {
            log::debug!("rule \"{}\" evaluated to {}", rule.identifier, matched);
            match callback.on_rule_match(rule) {
                CallbackAction::Continue => {}
                CallbackAction::Abort => {
                    log::debug!("scan aborted by callback");
                    return Ok(());
                }
                CallbackAction::Error => return Err(ScanError::CallbackError),
            }
        }
    }

    Ok(())
}

fn evaluate(rule: &Rule, blocks: &MemoryBlockList, ctx: &Context, entry_point: Option<u64>) -> bool {
    let eval_ctx = EvaluationContext { blocks, rule, variables: &ctx.variables, entry_point };
    condition::is_true(&rule.condition, &eval_ctx)
}
