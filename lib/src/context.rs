//! Scan context lifecycle (spec.md §3 "Context"; spec.md §4.6 predefined
//! variables; the include-file stack below is this crate's stand-in for
//! `yr_compiler_push_file_name`/`_pop_file_name` in
//! `original_source/libyara.c`, kept here because a rule's originating
//! file is a property of the context that registered it, not of
//! scanning itself).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::Error;
use crate::exe;
use crate::hash_index::HashIndex;
use crate::rule::{Namespace, Rule};
use crate::scanner::{self, CallbackAction, ScanCallback};
use crate::variables::{Variables, PREDEFINED_VAR_FILE_PATH, PREDEFINED_VAR_IS_EXECUTABLE};

pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum nesting depth for `include` directives, mirroring
/// `MAX_INCLUDE_DEPTH` in `original_source/libyara.c`.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Everything a scan needs that isn't the data being scanned: the rule
/// set, namespaces, external variables, the prefilter index, and the
/// bookkeeping the compiler side needs while rules are being loaded.
pub struct Context {
    pub rules: Vec<Arc<Rule>>,
    pub namespaces: HashMap<String, Namespace>,
    pub variables: Variables,
    pub index: HashIndex,
    last_error: Option<Error>,
    last_error_line: u32,
    include_stack: Vec<PathBuf>,
}

impl Context {
    pub fn new() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert(DEFAULT_NAMESPACE.to_string(), Namespace::new(DEFAULT_NAMESPACE));
        Context {
            rules: Vec::new(),
            namespaces,
            variables: Variables::new(),
            index: HashIndex::new(),
            last_error: None,
            last_error_line: 0,
            include_stack: Vec::new(),
        }
    }

    /// Registers a rule, creating its namespace on first use.
    pub fn add_rule(&mut self, rule: Arc<Rule>) {
        self.namespaces
            .entry(rule.namespace.clone())
            .or_insert_with(|| Namespace::new(rule.namespace.clone()));
        self.index.clear();
        self.rules.push(rule);
    }

    /// Builds the prefilter index from every registered rule's atoms, if
    /// it hasn't been built yet (spec.md §4.1: built lazily on first
    /// scan).
    pub fn ensure_index(&mut self) -> Result<(), Error> {
        if self.index.is_populated() {
            return Ok(());
        }
        let atoms: Vec<&Arc<crate::atom::Atom>> = self.rules.iter().flat_map(|r| r.atoms.iter()).collect();
        self.index.populate(atoms.into_iter())
    }

    /// Resets every rule's outcome and match list (invariant I5): called
    /// before each independent scan so a reused context starts clean.
    pub fn reset_rules(&mut self) {
        for rule in &self.rules {
            rule.reset();
        }
        for ns in self.namespaces.values_mut() {
            ns.global_rules_satisfied = true;
        }
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn last_error_line(&self) -> u32 {
        self.last_error_line
    }

    pub fn set_last_error(&mut self, error: Error, line: u32) {
        self.last_error = Some(error);
        self.last_error_line = line;
    }

    /// Pushes a newly-opened include file onto the stack, failing if it
    /// already appears there (a cycle) or if the stack is already at
    /// [`MAX_INCLUDE_DEPTH`].
    pub fn push_include_file(&mut self, path: impl Into<PathBuf>) -> Result<(), Error> {
        let path = path.into();
        if self.include_stack.iter().any(|p| p == &path) {
            return Err(Error::IncludesCircularReference);
        }
        if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeDepthExceeded);
        }
        self.include_stack.push(path);
        Ok(())
    }

    pub fn pop_include_file(&mut self) -> Option<PathBuf> {
        self.include_stack.pop()
    }

    pub fn include_depth(&self) -> usize {
        self.include_stack.len()
    }

    /// Scans a file end to end: reads it, resolves `FILE_PATH` /
    /// `IS_EXECUTABLE` / `entrypoint`, and runs the three-pass scanner
    /// over a single memory block covering the whole file (spec.md
    /// §4.5, §4.6).
    pub fn scan_file(
        &mut self,
        path: &Path,
        thread_count: usize,
        callback: &mut dyn ScanCallback,
    ) -> Result<(), Error> {
        let data = std::fs::read(path).map_err(|_| Error::CallbackError)?;
        self.scan_bytes(&data, Some(path), thread_count, callback)
    }

    fn scan_bytes(
        &mut self,
        data: &[u8],
        path: Option<&Path>,
        thread_count: usize,
        callback: &mut dyn ScanCallback,
    ) -> Result<(), Error> {
        self.ensure_index()?;
        self.reset_rules();

        let is_executable = exe::is_pe(data) || exe::is_elf(data);
        self.variables.define_string(
            PREDEFINED_VAR_FILE_PATH,
            path.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
        );
        self.variables.define_boolean(PREDEFINED_VAR_IS_EXECUTABLE, is_executable);

        let entry_point = exe::get_entry_point_offset(data);
        let blocks = crate::memory::MemoryBlockList::single(0, data);

        scanner::scan(self, &blocks, entry_point, is_executable, path.is_some(), thread_count, callback)
            .map_err(Error::from)
    }

    /// Splits `data` on `\n`, stripping a trailing `\r` from each line
    /// (spec.md supplement: line-delimited scan mode). The final line is
    /// included even without a trailing newline.
    pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
        if data.is_empty() {
            return Vec::new();
        }
        data.split(|&b| b == b'\n')
            .map(|line| if line.last() == Some(&b'\r') { &line[..line.len() - 1] } else { line })
            .collect()
    }

    /// Scans `path` one line at a time, resetting all rule state between
    /// lines so a match in line N never leaks into line N+1 (this is
    /// the whole point of this mode — it does not exist in
    /// `original_source/libyara.c`'s block-oriented scanner, which has
    /// no notion of "line" at all).
    ///
    /// `callback` receives matches for every line; `line_callback` is
    /// invoked once per line with its 1-based line number so the caller
    /// can attribute matches without the scanner needing to know about
    /// line numbers itself.
    pub fn scan_file_by_line(
        &mut self,
        path: &Path,
        thread_count: usize,
        mut on_line: impl FnMut(u64, &mut dyn ScanCallback),
        callback: &mut dyn ScanCallback,
    ) -> Result<(), Error> {
        let data = std::fs::read(path).map_err(|_| Error::CallbackError)?;
        let lines = Self::split_lines(&data);
        for (idx, line) in lines.into_iter().enumerate() {
            let line_no = idx as u64 + 1;
            match self.scan_bytes(line, Some(path), thread_count, callback) {
                Ok(()) => on_line(line_no, callback),
                Err(Error::CallbackError) => return Err(Error::CallbackError),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_default_namespace() {
        let ctx = Context::new();
        assert!(ctx.namespaces.contains_key(DEFAULT_NAMESPACE));
    }

    #[test]
    fn include_stack_detects_cycles() {
        let mut ctx = Context::new();
        ctx.push_include_file("a.yar").unwrap();
        ctx.push_include_file("b.yar").unwrap();
        assert!(matches!(ctx.push_include_file("a.yar"), Err(Error::IncludesCircularReference)));
    }

    #[test]
    fn include_stack_enforces_max_depth() {
        let mut ctx = Context::new();
        for i in 0..MAX_INCLUDE_DEPTH {
            ctx.push_include_file(format!("f{i}.yar")).unwrap();
        }
        assert!(matches!(ctx.push_include_file("one_too_many.yar"), Err(Error::IncludeDepthExceeded)));
    }

    #[test]
    fn pop_include_file_unwinds_the_stack() {
        let mut ctx = Context::new();
        ctx.push_include_file("a.yar").unwrap();
        assert_eq!(ctx.pop_include_file(), Some(PathBuf::from("a.yar")));
        assert_eq!(ctx.include_depth(), 0);
    }

    #[test]
    fn split_lines_strips_trailing_cr_and_keeps_last_partial_line() {
        let data = b"foo\r\nbar\nbaz";
        let lines = Context::split_lines(data);
        assert_eq!(lines, vec![b"foo".as_slice(), b"bar".as_slice(), b"baz".as_slice()]);
    }

    #[test]
    fn set_last_error_records_error_and_line() {
        let mut ctx = Context::new();
        ctx.set_last_error(Error::IncludesCircularReference, 7);
        assert_eq!(ctx.last_error(), Some(&Error::IncludesCircularReference));
        assert_eq!(ctx.last_error_line(), 7);
    }
}
