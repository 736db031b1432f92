//! Error kinds surfaced through [`crate::context::Context::last_error`]
//! and returned directly from fallible operations.
//!
//! The set is exactly the one enumerated in spec.md §6. Most of these
//! originate in the rule parser/compiler, which is out of scope for
//! this crate (spec.md §1) — they're defined here because the context
//! lifecycle (creation, include stack, rule registration) still needs
//! somewhere to report them, and `Error::render` is the equivalent of
//! `yr_get_error_message` in `original_source/libyara.c`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("not enough memory")]
    InsufficientMemory,

    #[error("duplicate rule identifier \"{}\"", extra_info.as_deref().unwrap_or(""))]
    DuplicateRuleIdentifier { extra_info: Option<String> },

    #[error("duplicate string identifier \"{}\"", extra_info.as_deref().unwrap_or(""))]
    DuplicateStringIdentifier { extra_info: Option<String> },

    #[error("duplicate tag identifier \"{}\"", extra_info.as_deref().unwrap_or(""))]
    DuplicateTagIdentifier { extra_info: Option<String> },

    #[error("duplicate metadata identifier \"{}\"", extra_info.as_deref().unwrap_or(""))]
    DuplicateMetaIdentifier { extra_info: Option<String> },

    #[error("invalid char in hex string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    InvalidCharInHexString { extra_info: Option<String> },

    #[error("mismatched bracket in string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    MismatchedBracket { extra_info: Option<String> },

    #[error("skip at the end of string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    SkipAtEnd { extra_info: Option<String> },

    #[error("invalid skip in string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    InvalidSkipValue { extra_info: Option<String> },

    #[error("unpaired nibble in string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    UnpairedNibble { extra_info: Option<String> },

    #[error("two consecutive skips in string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    ConsecutiveSkips { extra_info: Option<String> },

    #[error(
        "misplaced wildcard or skip at string \"{}\", wildcards and skips are only allowed after the first byte of the string",
        extra_info.as_deref().unwrap_or("")
    )]
    MisplacedWildcardOrSkip { extra_info: Option<String> },

    #[error("misplaced OR (|) operator at string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    MisplacedOrOperator { extra_info: Option<String> },

    #[error("nested OR (|) operator at string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    NestedOrOperation { extra_info: Option<String> },

    #[error("invalid syntax at hex string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    InvalidOrOperationSyntax { extra_info: Option<String> },

    #[error("skip inside an OR (|) operation at string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    SkipInsideOrOperation { extra_info: Option<String> },

    #[error("undefined string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    UndefinedString { extra_info: Option<String> },

    #[error("undefined identifier \"{}\"", extra_info.as_deref().unwrap_or(""))]
    UndefinedIdentifier { extra_info: Option<String> },

    #[error("unreferenced string \"{}\"", extra_info.as_deref().unwrap_or(""))]
    UnreferencedString { extra_info: Option<String> },

    #[error("external variable \"{}\" has an incorrect type for this operation", extra_info.as_deref().unwrap_or(""))]
    IncorrectVariableType { extra_info: Option<String> },

    #[error("wrong use of anonymous string")]
    MisplacedAnonymousString,

    #[error("{}", extra_info.as_deref().unwrap_or("invalid regular expression"))]
    InvalidRegularExpression { extra_info: Option<String> },

    #[error("{}", extra_info.as_deref().unwrap_or("syntax error"))]
    SyntaxError { extra_info: Option<String> },

    #[error("include circular reference")]
    IncludesCircularReference,

    #[error("too many levels of included rules")]
    IncludeDepthExceeded,

    #[error("callback error")]
    CallbackError,
}

impl Error {
    /// Renders the error the way `yr_get_error_message` renders
    /// `last_error` in `original_source/libyara.c`: this is just
    /// `Display`, kept as a named method so call sites read the same
    /// as the source's `yr_get_error_message(context, buffer, size)`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// Errors specific to an in-progress scan (spec.md §6, §7). Distinct
/// from [`Error`] because these can only happen once scanning has
/// started, never during context setup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScanError {
    #[error("not enough memory")]
    InsufficientMemory,

    #[error("callback error")]
    CallbackError,
}

impl From<ScanError> for Error {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::InsufficientMemory => Error::InsufficientMemory,
            ScanError::CallbackError => Error::CallbackError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_extra_info() {
        let err = Error::DuplicateRuleIdentifier { extra_info: Some("foo".into()) };
        assert_eq!(err.render(), "duplicate rule identifier \"foo\"");
    }

    #[test]
    fn render_without_extra_info_is_still_readable() {
        let err = Error::IncludesCircularReference;
        assert_eq!(err.render(), "include circular reference");
    }
}
