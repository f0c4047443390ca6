use std::{io::Write, rc::Rc};

use tracing::{debug, trace};

use crate::{
    config::EvaluatorConfig,
    environment::Environment,
    error::SkiffError,
    parser::{Ast, Atom, NodeId, NodeKind},
    special::Step,
    value::{EvaluationResult, Procedure, SpecialForm, Value},
};


/// Counters gathered while evaluating one top-level expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub steps: u64,
    pub peak_continuations: usize,
}

// Caller state saved when a user procedure is entered. The previous
// continuation is the element below this one on the continuation stack.
struct Continuation {
    caller_env: Rc<Environment>,
    return_node: NodeId,
    body: Rc<[NodeId]>,
    body_index: usize,
}

/// Pending evaluation of one combination. Its values live on the operand stack
/// above `base`; `mask` holds the skip flag of every child position
/// (operator at 0), so the shared tree itself is never annotated.
pub(crate) struct CallFrame {
    pub(crate) node: NodeId,
    pub(crate) base: usize,
    pub(crate) position: usize,
    pub(crate) form: Option<SpecialForm>,
    /// Special forms count their passes here: `if` uses 0 for the condition and
    /// 1 for the branch, `and`/`or` store the operand position being evaluated.
    pub(crate) pass: usize,
    pub(crate) mask: Vec<bool>,
}

impl CallFrame {
    fn new(node: NodeId, base: usize) -> Self {
        Self { node, base, position: 0, form: None, pass: 0, mask: Vec::new() }
    }

    pub(crate) fn is_masked(&self, position: usize) -> bool {
        self.mask.get(position).copied().unwrap_or(false)
    }

    pub(crate) fn operand_count(&self) -> usize {
        self.mask.len().saturating_sub(1)
    }

    // True when the value of the operand now being evaluated becomes the value of
    // the whole form, which makes a call in that operand a tail call.
    fn forwards_tail(&self) -> bool {
        match self.form {
            Some(SpecialForm::If) => self.pass == 1,
            Some(SpecialForm::And | SpecialForm::Or) => self.pass > 0 && self.pass == self.operand_count(),
            _ => false,
        }
    }
}

enum Frame {
    /// Base slot: resolving it finishes the run.
    TopLevel,
    Call(CallFrame),
    /// Divider between consecutive expressions of a procedure body.
    Body { base: usize },
}

pub(crate) fn atom_value(atom: &Atom) -> Value {
    match atom {
        Atom::Integer(value) => Value::Integer(*value),
        Atom::Float(value) => Value::Float(*value),
        Atom::Boolean(value) => Value::Boolean(*value),
        Atom::Str(value) => Value::String(value.clone()),
        Atom::Symbol(name) => Value::Symbol(name.clone()),
    }
}

/// Registers of one top-level evaluation. Dropping the machine discards every
/// pending frame and continuation.
pub(crate) struct Machine<'t, 'o> {
    pub(crate) ast: &'t Ast,
    output: &'o mut dyn Write,
    max_depth: Option<usize>,
    pc: Option<NodeId>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    pub(crate) environment: Rc<Environment>,
    continuations: Vec<Continuation>,
    stats: EvalStats,
}

impl<'t, 'o> Machine<'t, 'o> {
    fn new(ast: &'t Ast, output: &'o mut dyn Write, environment: Rc<Environment>, max_depth: Option<usize>, root: NodeId) -> Self {
        Self {
            ast,
            output,
            max_depth,
            pc: Some(root),
            stack: Vec::new(),
            frames: vec![Frame::TopLevel],
            environment,
            continuations: Vec::new(),
            stats: EvalStats::default(),
        }
    }

    fn run(&mut self) -> EvaluationResult {
        loop {
            self.stats.steps += 1;
            self.skip_masked();
            match self.pc {
                Some(node) => self.push_node(node)?,
                None => if let Some(value) = self.reduce()? {
                    return Ok(value)
                },
            }
        }
    }

    fn check_depth(&self) -> Result<(), SkiffError> {
        match self.max_depth {
            Some(limit) if self.frames.len() + self.continuations.len() >= limit => Err(SkiffError::StackOverflow(limit)),
            _ => Ok(()),
        }
    }

    fn skip_masked(&mut self) {
        let Some(Frame::Call(frame)) = self.frames.last_mut() else { return };
        while let Some(node) = self.pc {
            if !frame.is_masked(frame.position) { break }
            self.pc = self.ast.next(node);
            frame.position += 1;
        }
    }

    fn resolve(&self, atom: &Atom) -> EvaluationResult {
        match atom {
            Atom::Symbol(name) => self.environment.lookup(name),
            literal => Ok(atom_value(literal)),
        }
    }

    fn push_node(&mut self, node: NodeId) -> Result<(), SkiffError> {
        match self.ast.kind(node) {
            NodeKind::Atom(atom) => {
                let value = self.resolve(atom)?;
                self.deliver(node, value)
            }
            NodeKind::Empty => self.deliver(node, Value::Unspecified),
            NodeKind::Compound { operator } => {
                self.check_depth()?;
                self.frames.push(Frame::Call(CallFrame::new(node, self.stack.len())));
                // The operator slot is evaluated first, whether it is a symbol
                // or a nested combination.
                self.pc = Some(*operator);
                Ok(())
            }
        }
    }

    // Stores the value of `node` and moves on to whatever follows it in the
    // innermost frame. A special operator landing in the operator slot gets to
    // mask the operands before any of them is evaluated.
    fn deliver(&mut self, node: NodeId, value: Value) -> Result<(), SkiffError> {
        let special = match (&value, self.frames.last()) {
            (Value::Special(form), Some(Frame::Call(frame))) if frame.position == 0 => Some(*form),
            _ => None,
        };
        self.stack.push(value);

        match self.frames.last_mut() {
            Some(Frame::Call(frame)) => {
                if let Some(form) = special {
                    frame.prepare(form, self.ast)?;
                }
                frame.position += 1;
                self.pc = self.ast.next(node);
            }
            _ => self.pc = None,
        }
        Ok(())
    }

    fn pop_value(&mut self) -> Value {
        match self.stack.pop() {
            Some(value) => value,
            None => unreachable!("a finished region always leaves its value on the stack"),
        }
    }

    fn reduce(&mut self) -> Result<Option<Value>, SkiffError> {
        let Some(frame) = self.frames.pop() else {
            unreachable!("the top-level frame ends the run before the frame stack empties")
        };

        match frame {
            Frame::TopLevel => Ok(Some(self.pop_value())),
            Frame::Body { base } => {
                let value = self.pop_value();
                debug_assert_eq!(self.stack.len(), base, "a body expression leaves exactly one value");
                self.next_body_expression(value)?;
                Ok(None)
            }
            Frame::Call(frame) => {
                let values = self.stack.split_off(frame.base);
                self.dispatch(frame, values)?;
                Ok(None)
            }
        }
    }

    fn next_body_expression(&mut self, value: Value) -> Result<(), SkiffError> {
        let Some(continuation) = self.continuations.last_mut() else {
            unreachable!("body frames always run under a continuation")
        };

        continuation.body_index += 1;
        if let Some(&next) = continuation.body.get(continuation.body_index) {
            self.frames.push(Frame::Body { base: self.stack.len() });
            self.pc = Some(next);
            return Ok(())
        }

        let Some(continuation) = self.continuations.pop() else { unreachable!() };
        self.environment = continuation.caller_env;
        self.deliver(continuation.return_node, value)
    }

    fn dispatch(&mut self, frame: CallFrame, values: Vec<Value>) -> Result<(), SkiffError> {
        let mut values = values.into_iter();
        let Some(operator) = values.next() else {
            unreachable!("the operator slot is never masked")
        };
        let node = frame.node;

        match operator {
            Value::Builtin(builtin) => {
                trace!(builtin = builtin.name, "calling builtin");
                let result = (builtin.function)(values.collect(), &mut *self.output)?;
                self.deliver(node, result)
            }
            Value::Special(form) => match self.call_special(form, frame, values.collect())? {
                Step::Value(value) => self.deliver(node, value),
                Step::Reenter(mut frame) => {
                    // Undo the pop of the operator and walk the operands again
                    // under the new mask.
                    self.stack.push(Value::Special(form));
                    frame.position = 1;
                    self.pc = self.ast.operands(node).next();
                    self.frames.push(Frame::Call(frame));
                    Ok(())
                }
            },
            Value::Procedure(procedure) => self.apply(node, procedure, values.collect()),
            other => Err(SkiffError::TypeMismatch(format!(
                "cannot apply {} in {}", other.ext_repr(), self.ast.render(node)
            ))),
        }
    }

    fn in_tail_position(&self) -> bool {
        let Some(continuation) = self.continuations.last() else { return false };

        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Call(call) if call.forwards_tail() => continue,
                Frame::Body { .. } => return continuation.body_index + 1 == continuation.body.len(),
                _ => return false,
            }
        }
        false
    }

    fn drop_forwarding_frames(&mut self) {
        while let Some(Frame::Call(call)) = self.frames.last() {
            if !call.forwards_tail() { break }
            let base = call.base;
            self.frames.pop();
            self.stack.truncate(base);
        }
    }

    fn apply(&mut self, call_node: NodeId, procedure: Rc<Procedure>, arguments: Vec<Value>) -> Result<(), SkiffError> {
        if arguments.len() != procedure.parameters.len() {
            return Err(SkiffError::arity(
                procedure.display_name(),
                procedure.parameters.len().to_string(),
                arguments.len(),
            ));
        }

        let environment = Environment::new(procedure.environment.clone());
        for (name, value) in procedure.parameters.iter().zip(arguments) {
            environment.bind(name.clone(), value);
        }

        if self.in_tail_position() {
            // Reuse the running activation: the caller to return to stays the same.
            self.drop_forwarding_frames();
            if let Some(continuation) = self.continuations.last_mut() {
                continuation.body = procedure.body.clone();
                continuation.body_index = 0;
            }
        } else {
            self.check_depth()?;
            self.continuations.push(Continuation {
                caller_env: self.environment.clone(),
                return_node: call_node,
                body: procedure.body.clone(),
                body_index: 0,
            });
            self.frames.push(Frame::Body { base: self.stack.len() });
            self.stats.peak_continuations = self.stats.peak_continuations.max(self.continuations.len());
        }

        trace!(procedure = %procedure.display_name(), depth = self.continuations.len(), "entering procedure");
        self.environment = environment;
        self.pc = procedure.body.first().copied();
        Ok(())
    }
}

/// Owns the global environment and the output sink shared by all top-level
/// evaluations.
pub(crate) struct Evaluator {
    global: Rc<Environment>,
    output: Box<dyn Write>,
    config: EvaluatorConfig,
    last_stats: EvalStats,
}

impl Evaluator {
    pub(crate) fn new(global: Rc<Environment>, output: Box<dyn Write>, config: EvaluatorConfig) -> Self {
        Self { global, output, config, last_stats: EvalStats::default() }
    }

    pub(crate) fn last_stats(&self) -> EvalStats {
        self.last_stats
    }

    pub(crate) fn evaluate(&mut self, ast: &Ast, root: NodeId) -> EvaluationResult {
        let (result, stats) = {
            let mut machine = Machine::new(ast, &mut *self.output, self.global.clone(), self.config.max_depth, root);
            let result = machine.run();
            (result, machine.stats)
        };
        self.last_stats = stats;

        debug!(
            expression = %ast.render(root),
            steps = stats.steps,
            peak_continuations = stats.peak_continuations,
            ok = result.is_ok(),
            "evaluated top-level expression"
        );
        // An evaluation error takes precedence over a failing flush
        let flushed = self.output.flush();
        let value = result?;
        flushed?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use crate::{
        context::EvaluationContext,
        test_utils::{all_testcases, load_test_pair, SharedOutput, TestEvaluationResult, TestOutput},
        value::SkiffValue,
    };

    use super::*;

    fn compare(a: &SkiffValue, b: &TestOutput) -> bool {
        match (a, b) {
            (_, TestOutput::Repr(repr)) if repr == "?" => true,
            (SkiffValue::Integer(a), TestOutput::Number(b)) => (*a as f64 - b).abs() < 1.0e-9,
            (SkiffValue::Float(a), TestOutput::Number(b)) => (a - b).abs() < 1.0e-9,
            (SkiffValue::Boolean(a), TestOutput::Boolean(b)) => a == b,
            (value, TestOutput::Repr(repr)) => &value.to_string() == repr,
            _ => false
        }
    }

    fn assert_run(testcase: usize, entries: &[(String, TestEvaluationResult)]) -> anyhow::Result<()> {
        let mut evaluation_context = EvaluationContext::with_output(SharedOutput::default());
        for (lineno, (source, expected)) in entries.iter().enumerate() {
            let result = evaluation_context.evaluate_str(source.as_str());
            let expected: Result<_, _> = expected.clone().into();

            println!("{}:\n{:?}", source, result);
            match (&result, &expected) {
                (Ok(a), Ok(b)) => assert!(compare(a, b), "Testcase({}, {}): Got {:?}, expected {:?}", testcase, lineno, result, expected),
                (Err(result), Err(expected))
                    => assert_eq!(result.kind(), expected, "Testcase({}, {}): Got {:?}, expected {:?}", testcase, lineno, result, expected),
                _ => bail!("Testcase({}, {}): Got {:?}, expected {:?}", testcase, lineno, result, expected),
            }
        }

        Ok(())
    }

    #[test]
    fn evaluate_testcase() -> anyhow::Result<()> {
        for testcase in all_testcases() {
            println!("Running testcase {}", testcase);
            let entries = load_test_pair(testcase)?;
            assert_run(testcase, &entries)?;
        }

        Ok(())
    }

    fn run_all(context: &mut EvaluationContext, program: &[&str]) -> Result<SkiffValue, SkiffError> {
        let mut last = SkiffValue::Unspecified;
        for line in program {
            last = context.evaluate_str(line)?;
        }
        Ok(last)
    }

    #[test]
    fn arithmetic_folds_left() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        assert_eq!(context.evaluate_str("(- 10 1 2)")?, SkiffValue::Integer(7));
        assert_eq!(context.evaluate_str("(/ 100 5 2)")?, SkiffValue::Integer(10));
        Ok(())
    }

    #[test]
    fn only_false_is_falsy() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        assert_eq!(context.evaluate_str("(if #f 1 2)")?, SkiffValue::Integer(2));
        assert_eq!(context.evaluate_str("(if 0 1 2)")?, SkiffValue::Integer(1));
        assert_eq!(context.evaluate_str("(if \"\" 1 2)")?, SkiffValue::Integer(1));
        assert_eq!(context.evaluate_str("(if #f 1)")?, SkiffValue::Unspecified);
        Ok(())
    }

    #[test]
    fn closures_share_their_environment() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        let result = run_all(&mut context, &[
            "(define x 1)",
            "(define f (lambda () x))",
            "(set! x 2)",
            "(f)",
        ])?;
        assert_eq!(result, SkiffValue::Integer(2));

        let result = run_all(&mut context, &[
            "(define (make-counter) (define n 0) (lambda () (set! n (+ n 1)) n))",
            "(define tick (make-counter))",
            "(tick)",
            "(tick)",
        ])?;
        assert_eq!(result, SkiffValue::Integer(2));
        Ok(())
    }

    #[test]
    fn deep_recursion_uses_the_heap() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        let result = run_all(&mut context, &[
            "(define (count n) (if (= n 0) 0 (+ 1 (count (- n 1)))))",
            "(count 100000)",
        ])?;
        assert_eq!(result, SkiffValue::Integer(100000));
        // one activation per call, from (count 100000) down to (count 0)
        assert_eq!(context.last_stats().peak_continuations, 100001);
        Ok(())
    }

    #[test]
    fn tail_calls_reuse_the_activation() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        let result = run_all(&mut context, &[
            "(define (loop n acc) (if (= n 0) acc (loop (- n 1) (+ acc 1))))",
            "(loop 1000000 0)",
        ])?;
        assert_eq!(result, SkiffValue::Integer(1000000));
        assert_eq!(context.last_stats().peak_continuations, 1);

        let result = run_all(&mut context, &[
            "(define (down n) (or (= n 0) (and (> n 0) (down (- n 1)))))",
            "(down 50000)",
        ])?;
        assert_eq!(result, SkiffValue::Boolean(true));
        assert_eq!(context.last_stats().peak_continuations, 1);
        Ok(())
    }

    #[test]
    fn body_runs_in_program_order() -> anyhow::Result<()> {
        let output = SharedOutput::default();
        let mut context = EvaluationContext::with_output(output.clone());
        let result = run_all(&mut context, &[
            "(define f (lambda () (display 1) (display 2) 3))",
            "(f)",
        ])?;
        assert_eq!(result, SkiffValue::Integer(3));
        assert_eq!(output.contents(), "12");
        Ok(())
    }

    #[test]
    fn recursive_calls_inside_branches() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        let result = run_all(&mut context, &[
            "(define (fib n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))",
            "(fib 15)",
        ])?;
        assert_eq!(result, SkiffValue::Integer(610));
        Ok(())
    }

    #[test]
    fn set_on_unbound_identifier_fails() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        let error = context.evaluate_str("(set! never-bound 1)").unwrap_err();
        assert_eq!(error, SkiffError::UnboundIdentifier("never-bound".to_owned()));
        assert!(matches!(context.evaluate_str("never-bound"), Err(SkiffError::UnboundIdentifier(_))));
        Ok(())
    }

    #[test]
    fn failures_keep_committed_bindings() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        context.evaluate_str("(define x 10)")?;

        let error = context.evaluate_str("(begin-nowhere (define y 1))").unwrap_err();
        assert_eq!(error.kind(), "UnboundIdentifier");

        let error = context.evaluate_str("(+ x (/ 1 0))").unwrap_err();
        assert_eq!(error, SkiffError::DivisionByZero);

        assert_eq!(context.evaluate_str("(+ x 1)")?, SkiffValue::Integer(11));
        Ok(())
    }

    #[test]
    fn arity_is_checked_for_procedures() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        context.evaluate_str("(define (pair a b) a)")?;
        let error = context.evaluate_str("(pair 1)").unwrap_err();
        assert_eq!(error, SkiffError::ArityMismatch {
            callee: "#<procedure pair>".to_owned(),
            expected: "2".to_owned(),
            received: 1,
        });
        assert_eq!(context.evaluate_str("(< 1 2 3)").unwrap_err().kind(), "ArityMismatch");
        Ok(())
    }

    #[test]
    fn operator_slot_can_be_an_expression() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        assert_eq!(context.evaluate_str("((lambda (x) (* x x)) 5)")?, SkiffValue::Integer(25));
        assert_eq!(context.evaluate_str("((if #t + -) 5 3)")?, SkiffValue::Integer(8));
        assert_eq!(context.evaluate_str("((if #t if lambda) #f 1 2)")?, SkiffValue::Integer(2));
        assert_eq!(context.evaluate_str("(5 3)").unwrap_err().kind(), "TypeMismatch");
        Ok(())
    }

    #[test]
    fn special_forms_validate_their_shape() {
        let mut context = EvaluationContext::with_output(SharedOutput::default());
        for source in ["(define x)", "(define 5 1)", "(set! 5 1)", "(lambda (x))", "(lambda (x 1) x)", "(if)", "(if 1 2 3 4)", "(lambda (x x) x)"] {
            let error = context.evaluate_str(source).unwrap_err();
            assert_eq!(error.kind(), "MalformedSpecialForm", "{}", source);
        }
    }

    #[test]
    fn errors_in_deeply_nested_forms_are_reported() {
        let depth = 100_000;
        let mut context = EvaluationContext::with_output(SharedOutput::default());

        let nested = format!("{}1{}", "(+ 1 ".repeat(depth), ")".repeat(depth));
        assert_eq!(context.evaluate_str(&nested), Ok(SkiffValue::Integer(depth as i64 + 1)));

        let error = context.evaluate_str(&format!("(5 {})", nested)).unwrap_err();
        assert_eq!(error.kind(), "TypeMismatch");

        let error = context.evaluate_str(&format!("(if {})", nested)).unwrap_err();
        assert_eq!(error.kind(), "MalformedSpecialForm");
    }

    struct FailingFlush;

    impl Write for FailingFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn evaluation_errors_win_over_flush_errors() {
        let mut context = EvaluationContext::with_output(FailingFlush);

        assert_eq!(context.evaluate_str("(/ 1 0)"), Err(SkiffError::DivisionByZero));
        assert_eq!(context.evaluate_str("1").unwrap_err().kind(), "Output");
    }

    #[test]
    fn depth_limit_is_reported() -> anyhow::Result<()> {
        let mut context = EvaluationContext::with_config(EvaluatorConfig::with_max_depth(100), SharedOutput::default());
        context.evaluate_str("(define (count n) (if (= n 0) 0 (+ 1 (count (- n 1)))))")?;
        assert_eq!(context.evaluate_str("(count 1000)").unwrap_err(), SkiffError::StackOverflow(100));
        assert_eq!(context.evaluate_str("(count 10)")?, SkiffValue::Integer(10));
        Ok(())
    }
}
