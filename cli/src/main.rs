use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use warden::context::Context;
use warden::rule::{Rule, RuleOutcome};
use warden::scanner::{CallbackAction, ScanCallback};

mod config;
mod ruledef;

use config::Config;

#[derive(Parser)]
#[command(name = "wscan", version, about = "Scan files against byte-pattern rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a file against a TOML rule description.
    Scan {
        /// Path to the TOML rule description.
        rules: PathBuf,
        /// File to scan.
        target: PathBuf,
        /// Optional config file (see `Config`).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides the configured thread count.
        #[arg(long)]
        threads: Option<usize>,
        /// Scan the target one line at a time (spec supplement: no
        /// match state carries across lines).
        #[arg(long)]
        line_mode: bool,
    },
}

/// Prints each match to stdout as it's found, the way the reference
/// CLI streams results rather than buffering them all to the end.
///
/// The scanner notifies this callback for every non-private rule, not
/// just matching ones (spec.md §4.5), so it inspects `rule.outcome()`
/// itself rather than treating "called" as "matched".
struct PrintingCallback {
    verbose: bool,
    any_matched: bool,
}

impl ScanCallback for PrintingCallback {
    fn on_rule_match(&mut self, rule: &Rule) -> CallbackAction {
        if rule.outcome() != RuleOutcome::Matched {
            return CallbackAction::Continue;
        }
        self.any_matched = true;
        if self.verbose && !rule.tags.is_empty() {
            println!("{} [{}]", rule.identifier, rule.tags.join(","));
        } else {
            println!("{}", rule.identifier);
        }
        CallbackAction::Continue
    }
}

fn main() -> ExitCode {
    #[cfg(feature = "logging")]
    env_logger::init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(matched) => {
            if matched {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let Command::Scan { rules, target, config, threads, line_mode } = cli.command;

    let config = Config::load(config.as_deref())?;
    let thread_count = threads.unwrap_or(config.threads);

    let source = std::fs::read_to_string(&rules)?;
    let compiled = ruledef::load_rules(&source)?;

    let mut ctx = Context::new();
    for rule in compiled {
        ctx.add_rule(rule);
    }

    let mut callback = PrintingCallback { verbose: config.verbose, any_matched: false };

    if line_mode {
        ctx.scan_file_by_line(&target, thread_count, |_line_no, _cb| {}, &mut callback)?;
    } else {
        ctx.scan_file(&target, thread_count, &mut callback)?;
    }

    Ok(callback.any_matched)
}
