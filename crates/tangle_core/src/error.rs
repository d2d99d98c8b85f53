use thiserror::Error;

/// Structural errors raised while building sparsity patterns, expression
/// nodes and functions. These are detected at construction time; once a
/// node or function exists its offsets and shapes are consistent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Invalid sparsity pattern: {0}")]
    InvalidSparsity(String),

    #[error("Invalid offset table: {0}")]
    InvalidOffsets(String),

    #[error("Shape mismatch in {op}: {details}")]
    ShapeMismatch { op: &'static str, details: String },

    #[error(
        "Diagsplit: the presence of nonzeros outside the diagonal blocks is unsupported \
         ({covered} of {total} nonzeros lie inside a block)"
    )]
    DiagsplitCoverage { covered: usize, total: usize },

    #[error("Function input {0} is not a purely symbolic expression")]
    NonSymbolicInput(usize),

    #[error("Function has free variables: {0:?}")]
    FreeVariables(Vec<String>),

    #[error("Expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("Argument {index} has {got} nonzeros, expected {expected}")]
    NonzeroCount {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("Argument {index} has shape {got:?}, expected {expected:?}")]
    ArgumentShape {
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Configuration and assembly errors of the collocation discretizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollocationError {
    #[error("Unknown collocation scheme \"{0}\", expected \"radau\" or \"legendre\"")]
    UnknownScheme(String),

    #[error("Interpolation order {0} is out of range: collocation tables are defined for orders 1 to 5")]
    DegreeOutOfRange(usize),

    #[error("Number of finite elements must be at least 1")]
    NoFiniteElements,

    #[error("Integration horizon must satisfy tf > t0 (t0 = {t0}, tf = {tf})")]
    InvalidHorizon { t0: f64, tf: f64 },

    #[error("Implicit function unknowns and equations do not match ({equations} equations, {unknowns} unknowns)")]
    EquationCountMismatch { equations: usize, unknowns: usize },

    #[error("Invalid DAE function \"{name}\": {details}")]
    InvalidDae { name: String, details: String },

    #[error("No {kind} plugin registered under \"{name}\"")]
    UnknownPlugin { kind: &'static str, name: String },
}
