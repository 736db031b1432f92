//! User-supplied external variables (spec.md §3, "Variable"). Defined,
//! overwritten, or undefined by the host application; read by the
//! condition evaluator (spec.md §4.4).

use std::collections::HashMap;

use crate::errors::Error;

/// The three variants an external variable can hold, mirroring
/// `VARIABLE_TYPE_*` in `original_source/libyara.c`.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl VariableValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableValue::Integer(_) => "integer",
            VariableValue::Boolean(_) => "boolean",
            VariableValue::String(_) => "string",
        }
    }
}

/// The two predefined variables every context starts with (spec.md
/// §4.6): `FILE_PATH` and `IS_EXECUTABLE`.
pub const PREDEFINED_VAR_FILE_PATH: &str = "FILE_PATH";
pub const PREDEFINED_VAR_IS_EXECUTABLE: &str = "IS_EXECUTABLE";

/// A flat map of external variables. Unlike the source's singly-linked
/// list (`VARIABLE* next`), this is an owned `HashMap` — identity here
/// is just the key, there's no need for intrusive links (spec.md §9).
#[derive(Debug, Default)]
pub struct Variables {
    values: HashMap<String, VariableValue>,
}

impl Variables {
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert(PREDEFINED_VAR_FILE_PATH.to_string(), VariableValue::String(String::new()));
        values.insert(PREDEFINED_VAR_IS_EXECUTABLE.to_string(), VariableValue::Boolean(false));
        Variables { values }
    }

    pub fn define_integer(&mut self, identifier: &str, value: i64) {
        self.values.insert(identifier.to_string(), VariableValue::Integer(value));
    }

    pub fn define_boolean(&mut self, identifier: &str, value: bool) {
        self.values.insert(identifier.to_string(), VariableValue::Boolean(value));
    }

    pub fn define_string(&mut self, identifier: &str, value: impl Into<String>) {
        self.values.insert(identifier.to_string(), VariableValue::String(value.into()));
    }

    pub fn undefine(&mut self, identifier: &str) -> Result<(), Error> {
        if self.values.remove(identifier).is_some() {
            Ok(())
        } else {
            Err(Error::UndefinedIdentifier { extra_info: Some(identifier.to_string()) })
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&VariableValue> {
        self.values.get(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_variables_exist_at_creation() {
        let vars = Variables::new();
        assert_eq!(vars.get(PREDEFINED_VAR_FILE_PATH), Some(&VariableValue::String(String::new())));
        assert_eq!(vars.get(PREDEFINED_VAR_IS_EXECUTABLE), Some(&VariableValue::Boolean(false)));
    }

    #[test]
    fn define_overwrites_existing_value() {
        let mut vars = Variables::new();
        vars.define_integer("x", 1);
        vars.define_integer("x", 2);
        assert_eq!(vars.get("x"), Some(&VariableValue::Integer(2)));
    }

    #[test]
    fn undefine_unknown_identifier_errors() {
        let mut vars = Variables::new();
        assert!(vars.undefine("nope").is_err());
    }
}
