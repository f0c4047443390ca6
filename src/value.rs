use core::fmt;
use std::{io::Write, rc::Rc};

use serde::Serialize;

use crate::{environment::Environment, error::SkiffError, parser::NodeId};

pub(crate) type EvaluationResult = Result<Value, SkiffError>;

pub(crate) type BuiltinFn = fn(Vec<Value>, &mut dyn Write) -> EvaluationResult;

/// Floats always print with a fractional part so they read back as floats.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpecialForm {
    If,
    Lambda,
    Define,
    Set,
    Quote,
    And,
    Or,
}

impl SpecialForm {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::If => "if",
            Self::Lambda => "lambda",
            Self::Define => "define",
            Self::Set => "set!",
            Self::Quote => "quote",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Builtin {
    pub(crate) name: &'static str,
    pub(crate) function: BuiltinFn,
}

/// A user-defined closure. The body is the detached run of expressions that
/// followed the parameter list.
pub(crate) struct Procedure {
    pub(crate) name: Option<Rc<str>>,
    pub(crate) parameters: Vec<Rc<str>>,
    pub(crate) body: Rc<[NodeId]>,
    pub(crate) environment: Rc<Environment>,
}

impl Procedure {
    pub(crate) fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("#<procedure {}>", name),
            None => "#<procedure>".to_owned(),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("body", &self.body)
            .finish()
    }
}

// Value type that can be produced by expressions. Anything handed to the
// outside world is converted to [SkiffValue]
#[derive(Clone)]
pub(crate) enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(Rc<str>),
    Unspecified,
    Symbol(Rc<str>),
    Procedure(Rc<Procedure>),
    Builtin(Builtin),
    Special(SpecialForm),
}

impl Value {
    /// Only `#f` is false.
    pub(crate) fn is_truthy(&self) -> bool {
        !matches!(self, Self::Boolean(false))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Unspecified => "unspecified",
            Self::Symbol(_) => "symbol",
            Self::Procedure(_) | Self::Builtin(_) => "procedure",
            Self::Special(_) => "special form",
        }
    }

    pub(crate) fn ext_repr(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", format_float(*value)),
            Self::Boolean(true) => write!(f, "#t"),
            Self::Boolean(false) => write!(f, "#f"),
            Self::String(value) => write!(f, "{}", value),
            Self::Unspecified => write!(f, "#<unspecified>"),
            Self::Symbol(name) => write!(f, "{}", name),
            Self::Procedure(procedure) => write!(f, "{}", procedure.display_name()),
            Self::Builtin(builtin) => write!(f, "#<builtin {}>", builtin.name),
            Self::Special(form) => write!(f, "#<special-form {}>", form.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

/// A value returned to the caller of the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SkiffValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Symbol(String),
    Unspecified,
    /// Procedures, builtins and special forms, by their representation.
    Procedure(String),
}

impl fmt::Display for SkiffValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", format_float(*value)),
            Self::Boolean(true) => write!(f, "#t"),
            Self::Boolean(false) => write!(f, "#f"),
            Self::String(value) | Self::Symbol(value) | Self::Procedure(value) => write!(f, "{}", value),
            Self::Unspecified => write!(f, "#<unspecified>"),
        }
    }
}

impl From<Value> for SkiffValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Integer(value) => Self::Integer(value),
            Value::Float(value) => Self::Float(value),
            Value::Boolean(value) => Self::Boolean(value),
            Value::String(value) => Self::String(value.to_string()),
            Value::Symbol(name) => Self::Symbol(name.to_string()),
            Value::Unspecified => Self::Unspecified,
            callable @ (Value::Procedure(_) | Value::Builtin(_) | Value::Special(_)) => Self::Procedure(callable.ext_repr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_only_rejects_false() {
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::Float(0.0).is_truthy());
        assert!(Value::String("".into()).is_truthy());
        assert!(Value::Unspecified.is_truthy());
    }

    #[test]
    fn external_representation() {
        assert_eq!(Value::Integer(-42).ext_repr(), "-42");
        assert_eq!(Value::Float(3.0).ext_repr(), "3.0");
        assert_eq!(Value::Float(0.1).ext_repr(), "0.1");
        assert_eq!(Value::Boolean(true).ext_repr(), "#t");
        assert_eq!(Value::String("raw text".into()).ext_repr(), "raw text");
        assert_eq!(Value::Special(SpecialForm::Set).ext_repr(), "#<special-form set!>");
    }

    #[test]
    fn public_values_serialize_tagged() -> anyhow::Result<()> {
        let json = serde_json::to_string(&SkiffValue::from(Value::Integer(7)))?;
        assert_eq!(json, r#"{"type":"integer","value":7}"#);
        let json = serde_json::to_string(&SkiffValue::Unspecified)?;
        assert_eq!(json, r#"{"type":"unspecified"}"#);
        Ok(())
    }
}
