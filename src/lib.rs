mod builtin;
mod config;
mod context;
mod environment;
mod error;
mod interpreter;
mod parser;
mod special;
mod value;

#[cfg(test)]
mod test_utils;

pub use config::EvaluatorConfig;
pub use context::EvaluationContext;
pub use error::SkiffError;
pub use interpreter::EvalStats;
pub use parser::{parse, Ast, Atom, NodeId, NodeKind, Reader};
pub use value::SkiffValue;
