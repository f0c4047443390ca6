#![no_main]

use core::fmt;

use itertools::Itertools;
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};
use skiff::{EvaluationContext, EvaluatorConfig};

// Builtins, literals and loads from variables
#[derive(Arbitrary, Debug)]
enum SkiffAtom {
    Add, Sub, Mul, Div,
    True, False,
    Greater, GreaterEq,
    Less, LessEq, Eq,

    Not, Abs, Quotient, Remainder, Modulo,
    IsNumber, IsProcedure,

    Identifier(String),
    Integer(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for SkiffAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            SkiffAtom::Add => "+",
            SkiffAtom::Sub => "-",
            SkiffAtom::Mul => "*",
            SkiffAtom::Div => "/",
            SkiffAtom::True => "#t",
            SkiffAtom::False => "#f",
            SkiffAtom::Greater => ">",
            SkiffAtom::GreaterEq => ">=",
            SkiffAtom::Less => "<",
            SkiffAtom::LessEq => "<=",
            SkiffAtom::Eq => "=",
            SkiffAtom::Not => "not",
            SkiffAtom::Abs => "abs",
            SkiffAtom::Quotient => "quotient",
            SkiffAtom::Remainder => "remainder",
            SkiffAtom::Modulo => "modulo",
            SkiffAtom::IsNumber => "number?",
            SkiffAtom::IsProcedure => "procedure?",
            SkiffAtom::Identifier(identifier) => identifier,
            SkiffAtom::Integer(value) => return write!(f, "{}", value),
            SkiffAtom::Float(value) => return write!(f, "{:?}", value),
            SkiffAtom::Str(value) => return write!(f, "{:?}", value),
        })
    }
}

#[derive(Arbitrary, Debug)]
enum SkiffCommand {
    Lambda(Vec<SkiffCommand>),
    Define(Vec<SkiffCommand>),
    If(Vec<SkiffCommand>),
    And(Vec<SkiffCommand>),
    Or(Vec<SkiffCommand>),
    Set(Vec<SkiffCommand>),
    Quote(Vec<SkiffCommand>),
    Call(Vec<SkiffCommand>),

    Atom(SkiffAtom),
}

fn stringify_arguments(values: &[SkiffCommand]) -> String {
    values.iter()
        .map(SkiffCommand::to_string)
        .join(" ")
}

impl fmt::Display for SkiffCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (head, args) = match self {
            SkiffCommand::Atom(atom) => return atom.fmt(f),
            SkiffCommand::Call(args) => return write!(f, "({})", stringify_arguments(args)),
            SkiffCommand::Lambda(args) => ("lambda", args),
            SkiffCommand::Define(args) => ("define", args),
            SkiffCommand::If(args) => ("if", args),
            SkiffCommand::And(args) => ("and", args),
            SkiffCommand::Or(args) => ("or", args),
            SkiffCommand::Set(args) => ("set!", args),
            SkiffCommand::Quote(args) => ("quote", args),
        };

        write!(f, "({} {})", head, stringify_arguments(args))
    }
}

fuzz_target!(|commands: Vec<SkiffCommand>| {
    let mut context = EvaluationContext::with_config(EvaluatorConfig::with_max_depth(10_000), std::io::sink());

    for command in commands {
        let _ = context.evaluate_str(&command.to_string());
    }
});
