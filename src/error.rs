use thiserror::Error;


#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkiffError {
    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("unbound identifier: {0}")]
    UnboundIdentifier(String),

    #[error("wrong number of arguments to {callee}: expected {expected}, got {received}")]
    ArityMismatch {
        callee: String,
        expected: String,
        received: usize,
    },

    #[error("malformed special form: {0}")]
    MalformedSpecialForm(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("integer overflow in {0}")]
    NumericOverflow(String),

    #[error("evaluation exceeded the maximum depth of {0}")]
    StackOverflow(usize),

    #[error("output error: {0}")]
    Output(String),
}

impl SkiffError {
    /// Stable name of the error kind, independent of the message payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyntaxError(_) => "SyntaxError",
            Self::UnboundIdentifier(_) => "UnboundIdentifier",
            Self::ArityMismatch { .. } => "ArityMismatch",
            Self::MalformedSpecialForm(_) => "MalformedSpecialForm",
            Self::DivisionByZero => "DivisionByZero",
            Self::TypeMismatch(_) => "TypeMismatch",
            Self::NumericOverflow(_) => "NumericOverflow",
            Self::StackOverflow(_) => "StackOverflow",
            Self::Output(_) => "Output",
        }
    }

    pub(crate) fn arity(callee: impl Into<String>, expected: impl Into<String>, received: usize) -> Self {
        Self::ArityMismatch { callee: callee.into(), expected: expected.into(), received }
    }
}

impl From<std::io::Error> for SkiffError {
    fn from(error: std::io::Error) -> Self {
        Self::Output(error.to_string())
    }
}
