use std::{cmp::Ordering, collections::HashMap, io::Write, rc::Rc};

use crate::{
    environment::Environment,
    error::SkiffError,
    value::{Builtin, BuiltinFn, EvaluationResult, SpecialForm, Value},
};


#[derive(Debug, Clone, Copy)]
enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    fn as_float(self) -> f64 {
        match self {
            Self::Integer(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Self::Integer(value) => value == 0,
            Self::Float(value) => value == 0.0,
        }
    }
}

impl From<Number> for Value {
    fn from(number: Number) -> Self {
        match number {
            Number::Integer(value) => Value::Integer(value),
            Number::Float(value) => Value::Float(value),
        }
    }
}

fn to_number(name: &str, value: &Value) -> Result<Number, SkiffError> {
    match value {
        Value::Integer(value) => Ok(Number::Integer(*value)),
        Value::Float(value) => Ok(Number::Float(*value)),
        other => Err(SkiffError::TypeMismatch(format!(
            "{} expects numbers, got {} {}", name, other.type_name(), other.ext_repr()
        ))),
    }
}

fn to_integer(name: &str, value: &Value) -> Result<i64, SkiffError> {
    match value {
        Value::Integer(value) => Ok(*value),
        other => Err(SkiffError::TypeMismatch(format!(
            "{} expects integers, got {} {}", name, other.type_name(), other.ext_repr()
        ))),
    }
}

fn numbers(name: &str, values: &[Value]) -> Result<Vec<Number>, SkiffError> {
    values.iter().map(|value| to_number(name, value)).collect()
}

fn expect_arity(name: &str, values: &[Value], expected: usize) -> Result<(), SkiffError> {
    if values.len() != expected {
        return Err(SkiffError::arity(name, expected.to_string(), values.len()));
    }
    Ok(())
}

fn expect_at_least(name: &str, values: &[Value], minimum: usize) -> Result<(), SkiffError> {
    if values.len() < minimum {
        return Err(SkiffError::arity(name, format!("at least {}", minimum), values.len()));
    }
    Ok(())
}

fn combine(name: &str, a: Number, b: Number, op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> Result<Number, SkiffError> {
    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => op(a, b)
            .map(Number::Integer)
            .ok_or_else(|| SkiffError::NumericOverflow(format!("{} {} {}", a, name, b))),
        (a, b) => Ok(Number::Float(float_op(a.as_float(), b.as_float()))),
    }
}

fn add(a: Number, b: Number) -> Result<Number, SkiffError> {
    combine("+", a, b, i64::checked_add, |a, b| a + b)
}

fn subtract(a: Number, b: Number) -> Result<Number, SkiffError> {
    combine("-", a, b, i64::checked_sub, |a, b| a - b)
}

fn multiply(a: Number, b: Number) -> Result<Number, SkiffError> {
    combine("*", a, b, i64::checked_mul, |a, b| a * b)
}

// Integer division stays exact when it can, otherwise it falls back to floats
fn divide(a: Number, b: Number) -> Result<Number, SkiffError> {
    if b.is_zero() { return Err(SkiffError::DivisionByZero); }

    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => match a.checked_rem(b) {
            Some(0) => Ok(Number::Integer(a / b)),
            Some(_) => Ok(Number::Float(a as f64 / b as f64)),
            None => Err(SkiffError::NumericOverflow(format!("{} / {}", a, b))),
        },
        (a, b) => Ok(Number::Float(a.as_float() / b.as_float())),
    }
}

fn fold(values: &[Number], seed: Number, op: fn(Number, Number) -> Result<Number, SkiffError>) -> Result<Number, SkiffError> {
    values.iter().try_fold(seed, |acc, value| op(acc, *value))
}

fn builtin_add(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    let values = numbers("+", &values)?;
    Ok(fold(&values, Number::Integer(0), add)?.into())
}

fn builtin_sub(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    expect_at_least("-", &values, 1)?;

    let values = numbers("-", &values)?;
    if values.len() == 1 { return Ok(subtract(Number::Integer(0), values[0])?.into()) }
    Ok(fold(&values[1..], values[0], subtract)?.into())
}

fn builtin_mul(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    let values = numbers("*", &values)?;
    Ok(fold(&values, Number::Integer(1), multiply)?.into())
}

fn builtin_div(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    expect_at_least("/", &values, 1)?;

    let values = numbers("/", &values)?;
    if values.len() == 1 { return Ok(divide(Number::Integer(1), values[0])?.into()) }
    Ok(fold(&values[1..], values[0], divide)?.into())
}

fn compare_numbers(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(&b)),
        (a, b) => a.as_float().partial_cmp(&b.as_float()),
    }
}

fn builtin_compare(name: &str, values: Vec<Value>, accept: fn(Ordering) -> bool) -> EvaluationResult {
    expect_arity(name, &values, 2)?;

    let a = to_number(name, &values[0])?;
    let b = to_number(name, &values[1])?;
    Ok(Value::Boolean(compare_numbers(a, b).is_some_and(accept)))
}

fn builtin_less(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    builtin_compare("<", values, Ordering::is_lt)
}

fn builtin_less_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    builtin_compare("<=", values, Ordering::is_le)
}

fn builtin_greater(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    builtin_compare(">", values, Ordering::is_gt)
}

fn builtin_greater_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    builtin_compare(">=", values, Ordering::is_ge)
}

fn builtin_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    builtin_compare("=", values, Ordering::is_eq)
}

fn builtin_abs(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    expect_arity("abs", &values, 1)?;

    match to_number("abs", &values[0])? {
        Number::Integer(value) => value.checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| SkiffError::NumericOverflow("abs".to_owned())),
        Number::Float(value) => Ok(Value::Float(value.abs())),
    }
}

fn integer_division(name: &str, values: &[Value], op: fn(i64, i64) -> Option<i64>) -> EvaluationResult {
    expect_arity(name, values, 2)?;

    let a = to_integer(name, &values[0])?;
    let b = to_integer(name, &values[1])?;
    if b == 0 { return Err(SkiffError::DivisionByZero); }
    op(a, b).map(Value::Integer).ok_or_else(|| SkiffError::NumericOverflow(name.to_owned()))
}

fn builtin_quotient(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    integer_division("quotient", &values, i64::checked_div)
}

fn builtin_remainder(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    integer_division("remainder", &values, i64::checked_rem)
}

// The result takes the sign of the divisor
fn builtin_modulo(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    integer_division("modulo", &values, |a, b| {
        let remainder = a.checked_rem(b)?;
        if remainder != 0 && (remainder < 0) != (b < 0) { Some(remainder + b) } else { Some(remainder) }
    })
}

fn builtin_not(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    expect_arity("not", &values, 1)?;
    Ok(Value::Boolean(!values[0].is_truthy()))
}

fn predicate(name: &str, values: Vec<Value>, test: fn(&Value) -> bool) -> EvaluationResult {
    expect_arity(name, &values, 1)?;
    Ok(Value::Boolean(test(&values[0])))
}

fn builtin_is_number(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    predicate("number?", values, |value| matches!(value, Value::Integer(_) | Value::Float(_)))
}

fn builtin_is_integer(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    predicate("integer?", values, |value| match value {
        Value::Integer(_) => true,
        Value::Float(value) => value.is_finite() && value.fract() == 0.0,
        _ => false,
    })
}

fn builtin_is_boolean(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    predicate("boolean?", values, |value| matches!(value, Value::Boolean(_)))
}

fn builtin_is_string(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    predicate("string?", values, |value| matches!(value, Value::String(_)))
}

fn builtin_is_symbol(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    predicate("symbol?", values, |value| matches!(value, Value::Symbol(_)))
}

fn builtin_is_procedure(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    predicate("procedure?", values, |value| matches!(value, Value::Procedure(_) | Value::Builtin(_)))
}

fn builtin_is_exact(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    expect_arity("exact?", &values, 1)?;
    Ok(Value::Boolean(matches!(to_number("exact?", &values[0])?, Number::Integer(_))))
}

fn builtin_is_inexact(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    expect_arity("inexact?", &values, 1)?;
    Ok(Value::Boolean(matches!(to_number("inexact?", &values[0])?, Number::Float(_))))
}

fn euclid(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn magnitudes(name: &str, values: &[Value]) -> Result<Vec<u64>, SkiffError> {
    values.iter().map(|value| to_integer(name, value).map(i64::unsigned_abs)).collect()
}

fn to_result(name: &str, value: u64) -> EvaluationResult {
    i64::try_from(value).map(Value::Integer).map_err(|_| SkiffError::NumericOverflow(name.to_owned()))
}

fn builtin_gcd(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    let result = magnitudes("gcd", &values)?.into_iter().fold(0, euclid);
    to_result("gcd", result)
}

fn builtin_lcm(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    let result = magnitudes("lcm", &values)?.into_iter().try_fold(1u64, |acc, value| {
        if acc == 0 || value == 0 { return Some(0) }
        (acc / euclid(acc, value)).checked_mul(value)
    });
    to_result("lcm", result.ok_or_else(|| SkiffError::NumericOverflow("lcm".to_owned()))?)
}

// Strings compare by identity here, by contents in `equal?`
fn is_eqv(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b),
        (Value::Unspecified, Value::Unspecified) => true,
        (Value::Procedure(a), Value::Procedure(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
        (Value::Special(a), Value::Special(b)) => a == b,
        _ => false,
    }
}

fn is_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a == b,
        (a, b) => is_eqv(a, b),
    }
}

fn equivalence(name: &str, values: Vec<Value>, test: fn(&Value, &Value) -> bool) -> EvaluationResult {
    expect_arity(name, &values, 2)?;
    Ok(Value::Boolean(test(&values[0], &values[1])))
}

fn builtin_is_eqv(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    equivalence("eqv?", values, is_eqv)
}

fn builtin_is_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    equivalence("eq?", values, is_eqv)
}

fn builtin_is_equal(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    equivalence("equal?", values, is_equal)
}

fn to_str<'v>(name: &str, value: &'v Value) -> Result<&'v str, SkiffError> {
    match value {
        Value::String(value) => Ok(&**value),
        other => Err(SkiffError::TypeMismatch(format!(
            "{} expects strings, got {} {}", name, other.type_name(), other.ext_repr()
        ))),
    }
}

fn string_compare(name: &str, values: Vec<Value>, accept: fn(Ordering) -> bool) -> EvaluationResult {
    expect_arity(name, &values, 2)?;

    let a = to_str(name, &values[0])?;
    let b = to_str(name, &values[1])?;
    Ok(Value::Boolean(accept(a.cmp(b))))
}

fn builtin_string_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    string_compare("string=?", values, Ordering::is_eq)
}

fn builtin_string_less(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    string_compare("string<?", values, Ordering::is_lt)
}

fn builtin_string_less_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    string_compare("string<=?", values, Ordering::is_le)
}

fn builtin_string_greater(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    string_compare("string>?", values, Ordering::is_gt)
}

fn builtin_string_greater_eq(values: Vec<Value>, _output: &mut dyn Write) -> EvaluationResult {
    string_compare("string>=?", values, Ordering::is_ge)
}

fn builtin_display(values: Vec<Value>, output: &mut dyn Write) -> EvaluationResult {
    expect_arity("display", &values, 1)?;
    write!(output, "{}", values[0].ext_repr())?;
    Ok(Value::Unspecified)
}

fn builtin_newline(values: Vec<Value>, output: &mut dyn Write) -> EvaluationResult {
    expect_arity("newline", &values, 0)?;
    writeln!(output)?;
    Ok(Value::Unspecified)
}

fn procedure(name: &'static str, function: BuiltinFn) -> (Rc<str>, Value) {
    (name.into(), Value::Builtin(Builtin { name, function }))
}

fn special(form: SpecialForm) -> (Rc<str>, Value) {
    (form.name().into(), Value::Special(form))
}

/// The global frame every evaluation context starts from.
pub(crate) fn builtin_frame() -> Rc<Environment> {
    Environment::root(HashMap::from([
        special(SpecialForm::If),
        special(SpecialForm::Lambda),
        special(SpecialForm::Define),
        special(SpecialForm::Set),
        special(SpecialForm::Quote),
        special(SpecialForm::And),
        special(SpecialForm::Or),

        procedure("+", builtin_add),
        procedure("-", builtin_sub),
        procedure("*", builtin_mul),
        procedure("/", builtin_div),

        procedure("<", builtin_less),
        procedure("<=", builtin_less_eq),
        procedure(">", builtin_greater),
        procedure(">=", builtin_greater_eq),
        procedure("=", builtin_eq),

        procedure("abs", builtin_abs),
        procedure("quotient", builtin_quotient),
        procedure("remainder", builtin_remainder),
        procedure("modulo", builtin_modulo),
        procedure("gcd", builtin_gcd),
        procedure("lcm", builtin_lcm),
        procedure("exact?", builtin_is_exact),
        procedure("inexact?", builtin_is_inexact),

        procedure("not", builtin_not),
        procedure("number?", builtin_is_number),
        procedure("integer?", builtin_is_integer),
        procedure("boolean?", builtin_is_boolean),
        procedure("string?", builtin_is_string),
        procedure("symbol?", builtin_is_symbol),
        procedure("procedure?", builtin_is_procedure),

        procedure("eqv?", builtin_is_eqv),
        procedure("eq?", builtin_is_eq),
        procedure("equal?", builtin_is_equal),

        procedure("string=?", builtin_string_eq),
        procedure("string<?", builtin_string_less),
        procedure("string<=?", builtin_string_less_eq),
        procedure("string>?", builtin_string_greater),
        procedure("string>=?", builtin_string_greater_eq),

        procedure("display", builtin_display),
        procedure("newline", builtin_newline),
    ]))
}
