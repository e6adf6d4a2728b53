use thiserror::Error;

// ---------------------------------------------------------------------------
// Domain errors raised by the fitting layer and the fit view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum XpsError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("parameter '{name}': min ({min}) is greater than max ({max})")]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error("parameter '{name}': {message}")]
    Expression { name: String, message: String },

    #[error("expression cycle through parameter '{0}'")]
    ExpressionCycle(String),

    #[error("trace index {index} out of range (spectrum has {len} traces)")]
    TraceOutOfRange { index: usize, len: usize },

    #[error("no fit result stored for trace {0}")]
    NoFitResult(usize),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("nothing to fit: {0}")]
    EmptyFit(String),
}
