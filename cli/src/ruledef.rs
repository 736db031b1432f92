//! A TOML rule description, deserialized with `serde` and compiled
//! into `warden` [`Rule`]s.
//!
//! The core crate deliberately has no rule parser (spec.md §1: the
//! textual rule language is out of scope for it). This module is the
//! CLI's stand-in for that missing front end — a deserializable rule
//! shape simple enough for `serde`/`toml` to handle directly, with no
//! lexer or grammar of its own. It covers a useful subset of the
//! condition language, not the whole thing.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use warden::atom::{Atom, AtomFlags};
use warden::condition::{ArithOp, CmpOp, Expr, Quantifier, StringSet};
use warden::rule::{MetaValue, Rule, RuleFlags};

#[derive(Debug, Error)]
pub enum RuleDefError {
    #[error("rule \"{0}\": unknown comparison operator \"{1}\"")]
    UnknownCmpOp(String, String),
    #[error("rule \"{0}\": unknown arithmetic operator \"{1}\"")]
    UnknownArithOp(String, String),
    #[error("rule \"{0}\": unknown quantifier \"{1}\" (expected \"any\" or \"all\")")]
    UnknownQuantifier(String, String),
    #[error("rule \"{0}\": hex string \"{1}\" has a mask whose length doesn't match its bytes")]
    HexMaskLengthMismatch(String, String),
    #[error("rule \"{0}\": hex string \"{1}\" has odd-length hex digits")]
    OddLengthHex(String, String),
    #[error("rule \"{0}\": hex string \"{1}\" contains a non-hex-digit character")]
    InvalidHexDigit(String, String),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
pub struct RuleSetDef {
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDef>,
}

#[derive(Debug, Deserialize)]
pub struct RuleDef {
    pub identifier: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub require_executable: bool,
    #[serde(default)]
    pub require_file: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: Vec<MetaDef>,
    #[serde(default)]
    pub strings: Vec<StringDef>,
    /// Optional precondition tree, evaluated once in pass 1 from atom
    /// counts alone, before REQUIRE_EXECUTABLE/REQUIRE_FILE gating or
    /// the condition itself are ever considered.
    pub precondition: Option<CondDef>,
    pub condition: CondDef,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
pub struct MetaDef {
    pub key: String,
    pub value: MetaValueDef,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MetaValueDef {
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl From<MetaValueDef> for MetaValue {
    fn from(v: MetaValueDef) -> Self {
        match v {
            MetaValueDef::Integer(n) => MetaValue::Integer(n),
            MetaValueDef::Boolean(b) => MetaValue::Boolean(b),
            MetaValueDef::String(s) => MetaValue::String(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StringDef {
    Ascii {
        id: String,
        value: String,
        #[serde(default)]
        nocase: bool,
        #[serde(default)]
        fullword: bool,
        #[serde(default)]
        wide: bool,
    },
    Hex {
        id: String,
        /// Hex digit pairs, `?` allowed in place of a nibble to build a
        /// wildcard mask, e.g. `"DEAD??BEEF"`.
        bytes: String,
    },
}

impl StringDef {
    fn compile(self, rule_id: &str) -> Result<Arc<Atom>, RuleDefError> {
        match self {
            StringDef::Ascii { id, value, nocase, fullword, wide } => {
                let mut flags = if wide { AtomFlags::WIDE } else { AtomFlags::ASCII };
                if nocase {
                    flags |= AtomFlags::NOCASE;
                }
                if fullword {
                    flags |= AtomFlags::FULLWORD;
                }
                Ok(Arc::new(Atom::literal(id, value.into_bytes(), flags)))
            }
            StringDef::Hex { id, bytes } => {
                let digits: Vec<char> = bytes.chars().filter(|c| !c.is_whitespace()).collect();
                if digits.len() % 2 != 0 {
                    return Err(RuleDefError::OddLengthHex(rule_id.to_string(), id));
                }
                let mut pattern = Vec::with_capacity(digits.len() / 2);
                let mut mask = Vec::with_capacity(digits.len() / 2);
                for pair in digits.chunks(2) {
                    if pair[0] == '?' && pair[1] == '?' {
                        pattern.push(0);
                        mask.push(0x00);
                    } else {
                        let hi = pair[0]
                            .to_digit(16)
                            .ok_or_else(|| RuleDefError::InvalidHexDigit(rule_id.to_string(), id.clone()))?;
                        let lo = pair[1]
                            .to_digit(16)
                            .ok_or_else(|| RuleDefError::InvalidHexDigit(rule_id.to_string(), id.clone()))?;
                        pattern.push(((hi << 4) | lo) as u8);
                        mask.push(0xFF);
                    }
                }
                if pattern.len() != mask.len() {
                    return Err(RuleDefError::HexMaskLengthMismatch(rule_id.to_string(), id));
                }
                Ok(Arc::new(Atom::hex(id, pattern, mask, AtomFlags::empty())))
            }
        }
    }
}

/// A deserializable mirror of the subset of [`Expr`] the TOML rule
/// format can express. `into_expr` is the only place this module
/// builds real condition-tree nodes.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CondDef {
    True,
    False,
    Int {
        value: i64,
    },
    Filesize,
    Entrypoint,
    Variable {
        name: String,
    },
    StringRef {
        id: String,
    },
    StringCount {
        id: String,
    },
    Not {
        expr: Box<CondDef>,
    },
    And {
        lhs: Box<CondDef>,
        rhs: Box<CondDef>,
    },
    Or {
        lhs: Box<CondDef>,
        rhs: Box<CondDef>,
    },
    Cmp {
        cmp_op: String,
        lhs: Box<CondDef>,
        rhs: Box<CondDef>,
    },
    Arith {
        arith_op: String,
        lhs: Box<CondDef>,
        rhs: Box<CondDef>,
    },
    /// `quantifier` is `"any"`, `"all"`, or an integer string like
    /// `"2"` for "2 of (...)"; `strings` lists the atom ids, or is
    /// empty to mean every string declared in the rule.
    Of {
        quantifier: String,
        #[serde(default)]
        strings: Vec<String>,
    },
}

impl CondDef {
    fn into_expr(self, rule_id: &str) -> Result<Expr, RuleDefError> {
        Ok(match self {
            CondDef::True => Expr::BoolLiteral(true),
            CondDef::False => Expr::BoolLiteral(false),
            CondDef::Int { value } => Expr::IntLiteral(value),
            CondDef::Filesize => Expr::FileSize,
            CondDef::Entrypoint => Expr::EntryPoint,
            CondDef::Variable { name } => Expr::Variable(name),
            CondDef::StringRef { id } => Expr::StringRef(id),
            CondDef::StringCount { id } => Expr::StringCount(id),
            CondDef::Not { expr } => Expr::Not(Box::new(expr.into_expr(rule_id)?)),
            CondDef::And { lhs, rhs } => {
                Expr::And(Box::new(lhs.into_expr(rule_id)?), Box::new(rhs.into_expr(rule_id)?))
            }
            CondDef::Or { lhs, rhs } => {
                Expr::Or(Box::new(lhs.into_expr(rule_id)?), Box::new(rhs.into_expr(rule_id)?))
            }
            CondDef::Cmp { cmp_op, lhs, rhs } => {
                let op = match cmp_op.as_str() {
                    "eq" => CmpOp::Eq,
                    "ne" => CmpOp::Ne,
                    "lt" => CmpOp::Lt,
                    "le" => CmpOp::Le,
                    "gt" => CmpOp::Gt,
                    "ge" => CmpOp::Ge,
                    other => return Err(RuleDefError::UnknownCmpOp(rule_id.to_string(), other.to_string())),
                };
                Expr::Cmp(op, Box::new(lhs.into_expr(rule_id)?), Box::new(rhs.into_expr(rule_id)?))
            }
            CondDef::Arith { arith_op, lhs, rhs } => {
                let op = match arith_op.as_str() {
                    "add" => ArithOp::Add,
                    "sub" => ArithOp::Sub,
                    "mul" => ArithOp::Mul,
                    "div" => ArithOp::Div,
                    "mod" => ArithOp::Mod,
                    "shl" => ArithOp::Shl,
                    "shr" => ArithOp::Shr,
                    "bitand" => ArithOp::BitAnd,
                    "bitor" => ArithOp::BitOr,
                    "bitxor" => ArithOp::BitXor,
                    other => return Err(RuleDefError::UnknownArithOp(rule_id.to_string(), other.to_string())),
                };
                Expr::Arith(op, Box::new(lhs.into_expr(rule_id)?), Box::new(rhs.into_expr(rule_id)?))
            }
            CondDef::Of { quantifier, strings } => {
                let set = if strings.is_empty() { StringSet::All } else { StringSet::Explicit(strings) };
                let q = match quantifier.as_str() {
                    "any" => Quantifier::Any,
                    "all" => Quantifier::All,
                    n => match n.parse::<i64>() {
                        Ok(n) => Quantifier::Exactly(Box::new(Expr::IntLiteral(n))),
                        Err(_) => {
                            return Err(RuleDefError::UnknownQuantifier(rule_id.to_string(), n.to_string()))
                        }
                    },
                };
                Expr::Of(q, set)
            }
        })
    }
}

impl RuleDef {
    pub fn compile(self) -> Result<Arc<Rule>, RuleDefError> {
        let mut flags = RuleFlags::empty();
        if self.global {
            flags |= RuleFlags::GLOBAL;
        }
        if self.private {
            flags |= RuleFlags::PRIVATE;
        }
        if self.require_executable {
            flags |= RuleFlags::REQUIRE_EXECUTABLE;
        }
        if self.require_file {
            flags |= RuleFlags::REQUIRE_FILE;
        }

        let atoms = self
            .strings
            .into_iter()
            .map(|s| s.compile(&self.identifier))
            .collect::<Result<Vec<_>, _>>()?;
        let metadata = self.meta.into_iter().map(|m| (m.key, m.value.into())).collect();
        let condition = self.condition.into_expr(&self.identifier)?;
        let precondition =
            self.precondition.map(|p| p.into_expr(&self.identifier)).transpose()?;

        let mut rule = Rule::new(self.identifier, self.namespace, flags, atoms, self.tags, metadata, condition);
        if let Some(precondition) = precondition {
            rule = rule.with_precondition(precondition);
        }
        Ok(Arc::new(rule))
    }
}

/// Parses and compiles every rule in a TOML rule description.
pub fn load_rules(toml_source: &str) -> Result<Vec<Arc<Rule>>, RuleDefError> {
    let rule_set: RuleSetDef = toml::from_str(toml_source)?;
    rule_set.rules.into_iter().map(RuleDef::compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_simple_ascii_rule() {
        let src = r#"
            [[rule]]
            identifier = "hello"

            [[rule.strings]]
            type = "ascii"
            id = "a"
            value = "hello"

            [rule.condition]
            op = "of"
            quantifier = "any"
        "#;
        let rules = load_rules(src).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].identifier, "hello");
        assert_eq!(rules[0].atoms.len(), 1);
    }

    #[test]
    fn compiles_a_hex_string_with_wildcard() {
        let src = r#"
            [[rule]]
            identifier = "hex_rule"

            [[rule.strings]]
            type = "hex"
            id = "h"
            bytes = "DEAD??BEEF"

            [rule.condition]
            op = "string_ref"
            id = "h"
        "#;
        let rules = load_rules(src).unwrap();
        let atom = rules[0].find_atom("h").unwrap();
        assert_eq!(atom.pattern, vec![0xDE, 0xAD, 0x00, 0xBE, 0xEF]);
        assert_eq!(atom.mask.as_ref().unwrap(), &vec![0xFF, 0xFF, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn unknown_quantifier_is_reported() {
        let src = r#"
            [[rule]]
            identifier = "bad"

            [rule.condition]
            op = "of"
            quantifier = "most"
        "#;
        assert!(load_rules(src).is_err());
    }

    #[test]
    fn precondition_is_optional_and_compiles_when_present() {
        let src = r#"
            [[rule]]
            identifier = "no_precondition"

            [rule.condition]
            op = "true"
        "#;
        let rules = load_rules(src).unwrap();
        assert!(rules[0].precondition.is_none());

        let src = r#"
            [[rule]]
            identifier = "gated"

            [rule.precondition]
            op = "filesize"

            [rule.condition]
            op = "true"
        "#;
        let rules = load_rules(src).unwrap();
        assert!(rules[0].precondition.is_some());
    }

    #[test]
    fn global_and_private_flags_roundtrip() {
        let src = r#"
            [[rule]]
            identifier = "g"
            global = true
            private = true

            [rule.condition]
            op = "true"
        "#;
        let rules = load_rules(src).unwrap();
        assert!(rules[0].is_global());
        assert!(rules[0].is_private());
    }
}
