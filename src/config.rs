/// Tunables for the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Upper bound on pending frames plus in-flight procedure activations.
    /// `None` leaves recursion bounded by heap memory only.
    pub max_depth: Option<usize>,
}

impl EvaluatorConfig {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth: Some(max_depth) }
    }
}
