use std::rc::Rc;

use itertools::Itertools;

use crate::{
    error::SkiffError,
    interpreter::{atom_value, CallFrame, Machine},
    parser::{Ast, Atom, NodeId, NodeKind},
    value::{Procedure, SpecialForm, Value},
};


/// What a special form asks of the machine after one of its passes.
pub(crate) enum Step {
    Value(Value),
    /// Walk the operands again under the frame's new mask.
    Reenter(CallFrame),
}

fn malformed(ast: &Ast, node: NodeId) -> SkiffError {
    SkiffError::MalformedSpecialForm(ast.render(node))
}

// A masked-out or missing operand reads as unspecified
fn single(values: Vec<Value>) -> Value {
    values.into_iter().next().unwrap_or(Value::Unspecified)
}

impl CallFrame {
    fn mask_operands(&mut self, masked: bool) {
        self.mask.iter_mut().skip(1).for_each(|flag| *flag = masked);
    }

    /// Runs as soon as the operator turns out to be a special form, before any
    /// operand is evaluated: checks the shape of the form and masks the operands
    /// that must not be evaluated on the first pass.
    pub(crate) fn prepare(&mut self, form: SpecialForm, ast: &Ast) -> Result<(), SkiffError> {
        let operands = ast.operands(self.node).collect_vec();
        let node = self.node;

        self.form = Some(form);
        self.pass = 0;
        self.mask = vec![false; operands.len() + 1];

        match form {
            SpecialForm::If => {
                if !(2..=3).contains(&operands.len()) { return Err(malformed(ast, node)) }
                self.mask_operands(true);
                self.mask[1] = false;
            }
            SpecialForm::Lambda => {
                if operands.len() < 2 { return Err(malformed(ast, node)) }
                self.mask_operands(true);
            }
            SpecialForm::Define => match ast.kind(operands.first().copied().ok_or_else(|| malformed(ast, node))?) {
                NodeKind::Atom(Atom::Symbol(_)) if operands.len() == 2 => self.mask[1] = true,
                NodeKind::Compound { .. } if operands.len() >= 2 => self.mask_operands(true),
                _ => return Err(malformed(ast, node)),
            },
            SpecialForm::Set => {
                if operands.len() != 2 || ast.symbol(operands[0]).is_none() { return Err(malformed(ast, node)) }
                self.mask[1] = true;
            }
            SpecialForm::Quote => {
                if operands.len() != 1 { return Err(malformed(ast, node)) }
                self.mask_operands(true);
            }
            SpecialForm::And | SpecialForm::Or => {
                // One operand per pass, left to right
                self.mask_operands(true);
                if !operands.is_empty() {
                    self.mask[1] = false;
                    self.pass = 1;
                }
            }
        }

        Ok(())
    }
}

fn formal_parameters(ast: &Ast, form: NodeId, names: impl Iterator<Item = NodeId>) -> Result<Vec<Rc<str>>, SkiffError> {
    let mut parameters: Vec<Rc<str>> = Vec::new();

    for node in names {
        let name = ast.symbol(node).ok_or_else(|| malformed(ast, form))?;
        if parameters.contains(name) {
            return Err(malformed(ast, form));
        }
        parameters.push(name.clone());
    }

    Ok(parameters)
}

impl<'t, 'o> Machine<'t, 'o> {
    // The operands after the parameter list become the body. Copying their ids
    // out detaches them from the sibling chain of the defining form.
    fn make_procedure(&self, form: NodeId, name: Option<Rc<str>>, parameters: Vec<Rc<str>>) -> Value {
        let body: Rc<[NodeId]> = self.ast.operands(form).skip(1).collect();

        Value::Procedure(Rc::new(Procedure {
            name,
            parameters,
            body,
            environment: self.environment.clone(),
        }))
    }

    /// Performs one pass of a special form. `values` holds the evaluated,
    /// unmasked operands of this pass, without the operator.
    pub(crate) fn call_special(&mut self, form: SpecialForm, mut frame: CallFrame, values: Vec<Value>) -> Result<Step, SkiffError> {
        let ast = self.ast;
        let node = frame.node;
        let operands = ast.operands(node).collect_vec();

        match form {
            SpecialForm::If if frame.pass == 0 => {
                let chosen = if single(values).is_truthy() { 2 } else { 3 };
                frame.mask_operands(true);
                if let Some(flag) = frame.mask.get_mut(chosen) {
                    *flag = false;
                }
                frame.pass = 1;
                Ok(Step::Reenter(frame))
            }
            SpecialForm::If => Ok(Step::Value(single(values))),

            SpecialForm::Lambda => {
                let parameters = match ast.kind(operands[0]) {
                    NodeKind::Atom(_) => return Err(malformed(ast, node)),
                    _ => formal_parameters(ast, node, ast.children(operands[0]))?,
                };
                Ok(Step::Value(self.make_procedure(node, None, parameters)))
            }

            SpecialForm::Define => {
                let target = operands[0];
                if let Some(name) = ast.symbol(target) {
                    self.environment.bind(name.clone(), single(values));
                    return Ok(Step::Value(Value::Unspecified));
                }

                let mut signature = ast.children(target);
                let name = signature.next()
                    .and_then(|first| ast.symbol(first))
                    .ok_or_else(|| malformed(ast, node))?
                    .clone();
                let parameters = formal_parameters(ast, node, signature)?;
                let procedure = self.make_procedure(node, Some(name.clone()), parameters);
                self.environment.bind(name, procedure);
                Ok(Step::Value(Value::Unspecified))
            }

            SpecialForm::Set => {
                let name = ast.symbol(operands[0]).ok_or_else(|| malformed(ast, node))?;
                if !self.environment.contains(name) {
                    return Err(SkiffError::UnboundIdentifier(name.to_string()));
                }
                self.environment.set(name, single(values))?;
                Ok(Step::Value(Value::Unspecified))
            }

            SpecialForm::Quote => match ast.kind(operands[0]) {
                NodeKind::Atom(atom) => Ok(Step::Value(atom_value(atom))),
                NodeKind::Empty => Ok(Step::Value(Value::Unspecified)),
                NodeKind::Compound { .. } => Err(SkiffError::MalformedSpecialForm(format!(
                    "quoted lists are not supported: {}", ast.render(node)
                ))),
            },

            SpecialForm::And | SpecialForm::Or => {
                if frame.pass == 0 {
                    return Ok(Step::Value(Value::Boolean(form == SpecialForm::And)));
                }

                let value = single(values);
                let decided = match form {
                    SpecialForm::And => !value.is_truthy(),
                    _ => value.is_truthy(),
                };
                if decided || frame.pass == frame.operand_count() {
                    return Ok(Step::Value(value));
                }

                frame.mask[frame.pass] = true;
                frame.pass += 1;
                frame.mask[frame.pass] = false;
                Ok(Step::Reenter(frame))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{context::EvaluationContext, test_utils::SharedOutput, value::SkiffValue};

    #[test]
    fn if_evaluates_only_the_chosen_branch() -> anyhow::Result<()> {
        let output = SharedOutput::default();
        let mut context = EvaluationContext::with_output(output.clone());

        let result = context.evaluate_str("(if (< 1 2) (display \"yes\") (display \"no\"))")?;
        assert_eq!(result, SkiffValue::Unspecified);
        assert_eq!(output.contents(), "yes");
        Ok(())
    }

    #[test]
    fn lambda_does_not_evaluate_its_body() -> anyhow::Result<()> {
        let output = SharedOutput::default();
        let mut context = EvaluationContext::with_output(output.clone());

        context.evaluate_str("(define noisy (lambda (x) (display x) undefined-name))")?;
        assert_eq!(output.contents(), "");
        assert_eq!(context.evaluate_str("noisy")?, SkiffValue::Procedure("#<procedure>".to_owned()));
        assert_eq!(context.evaluate_str("(noisy 4)").unwrap_err().kind(), "UnboundIdentifier");
        assert_eq!(output.contents(), "4");
        Ok(())
    }

    #[test]
    fn define_forms_return_unspecified() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());

        assert_eq!(context.evaluate_str("(define x (* 6 7))")?, SkiffValue::Unspecified);
        assert_eq!(context.evaluate_str("x")?, SkiffValue::Integer(42));
        assert_eq!(context.evaluate_str("(define (square y) (* y y))")?, SkiffValue::Unspecified);
        assert_eq!(context.evaluate_str("square")?, SkiffValue::Procedure("#<procedure square>".to_owned()));
        assert_eq!(context.evaluate_str("(square x)")?, SkiffValue::Integer(1764));
        assert_eq!(context.evaluate_str("(define (f) 1 2 3)")?, SkiffValue::Unspecified);
        assert_eq!(context.evaluate_str("(f)")?, SkiffValue::Integer(3));
        Ok(())
    }

    #[test]
    fn internal_defines_stay_local() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());

        context.evaluate_str("(define (g) (define hidden 5) hidden)")?;
        assert_eq!(context.evaluate_str("(g)")?, SkiffValue::Integer(5));
        assert_eq!(context.evaluate_str("hidden").unwrap_err().kind(), "UnboundIdentifier");
        Ok(())
    }

    #[test]
    fn and_or_short_circuit() -> anyhow::Result<()> {
        let output = SharedOutput::default();
        let mut context = EvaluationContext::with_output(output.clone());

        assert_eq!(context.evaluate_str("(and)")?, SkiffValue::Boolean(true));
        assert_eq!(context.evaluate_str("(or)")?, SkiffValue::Boolean(false));
        assert_eq!(context.evaluate_str("(and 1 2 3)")?, SkiffValue::Integer(3));
        assert_eq!(context.evaluate_str("(or #f 7 (display \"never\"))")?, SkiffValue::Integer(7));
        assert_eq!(context.evaluate_str("(and 1 #f (display \"never\"))")?, SkiffValue::Boolean(false));
        assert_eq!(output.contents(), "");
        Ok(())
    }

    #[test]
    fn quote_returns_atoms_unevaluated() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());

        assert_eq!(context.evaluate_str("(quote unbound-thing)")?, SkiffValue::Symbol("unbound-thing".to_owned()));
        assert_eq!(context.evaluate_str("(quote 12)")?, SkiffValue::Integer(12));
        assert_eq!(context.evaluate_str("(quote (1 2))").unwrap_err().kind(), "MalformedSpecialForm");
        Ok(())
    }
}
