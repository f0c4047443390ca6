use std::io::Write;

use tracing::debug;

use crate::{
    builtin::builtin_frame,
    config::EvaluatorConfig,
    error::SkiffError,
    interpreter::{EvalStats, Evaluator},
    parser::{Ast, Reader},
    value::SkiffValue,
};


/// An evaluation context that takes source text and evaluates it to give
/// values.
///
/// Every expression read through the context is kept in one arena for as long
/// as the context lives, since procedures defined by earlier expressions keep
/// referring to their bodies. Definitions persist between calls.
pub struct EvaluationContext {
    ast: Ast,
    reader: Reader,
    evaluator: Evaluator,
}

impl EvaluationContext {
    /// A context printing to standard output.
    pub fn new() -> Self {
        Self::with_output(std::io::stdout())
    }

    pub fn with_output<W: Write + 'static>(output: W) -> Self {
        Self::with_config(EvaluatorConfig::default(), output)
    }

    pub fn with_config<W: Write + 'static>(config: EvaluatorConfig, output: W) -> Self {
        Self {
            ast: Ast::new(),
            reader: Reader::new(),
            evaluator: Evaluator::new(builtin_frame(), Box::new(output), config),
        }
    }

    /// Evaluates every expression in `input` in order and returns the value of
    /// the last one. Evaluation stops at the first error; bindings made by the
    /// expressions before it are kept.
    pub fn evaluate_str(&mut self, input: &str) -> Result<SkiffValue, SkiffError> {
        let mut reader = Reader::new();
        reader.feed(input)?;

        let mut last = SkiffValue::Unspecified;
        while let Some(root) = reader.read(&mut self.ast)? {
            last = self.evaluator.evaluate(&self.ast, root)?.into();
        }

        if reader.is_pending() {
            return Err(SkiffError::SyntaxError("incomplete expression".to_owned()));
        }
        Ok(last)
    }

    /// Feeds a chunk of interactive input and evaluates every expression it
    /// completes, one result per expression. An incomplete trailing expression
    /// is kept until a later chunk closes it.
    ///
    /// A syntax error discards the buffered input, so the next chunk starts
    /// from a clean slate.
    pub fn feed(&mut self, input: &str) -> Vec<Result<SkiffValue, SkiffError>> {
        let mut results = Vec::new();

        if let Err(error) = self.reader.feed(input) {
            self.reader.clear();
            results.push(Err(error));
            return results;
        }

        loop {
            match self.reader.read(&mut self.ast) {
                Ok(Some(root)) => results.push(self.evaluator.evaluate(&self.ast, root).map(SkiffValue::from)),
                Ok(None) => break,
                Err(error) => {
                    debug!(%error, "discarding buffered input");
                    self.reader.clear();
                    results.push(Err(error));
                    break;
                }
            }
        }

        results
    }

    /// True while fed input holds an unfinished expression.
    pub fn is_pending(&self) -> bool {
        self.reader.is_pending()
    }

    /// Drops any unfinished input.
    pub fn reset_input(&mut self) {
        self.reader.clear();
    }

    /// Statistics of the most recent top-level evaluation.
    pub fn last_stats(&self) -> EvalStats {
        self.evaluator.last_stats()
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new()
    }
}
