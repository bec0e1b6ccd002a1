//! Error types for constraint condensation and assembly.

use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or solving a constrained system.
#[derive(Error, Debug)]
pub enum Error {
    /// A DOF flagged as slave by the structural pass has no global relation.
    #[error("no master-slave relation registered for slave equation {equation_id}")]
    MissingRelation { equation_id: usize },

    /// Local matrices or vectors disagree with the declared sizes.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// A slave DOF is also used as master by another relation.
    #[error("equation {equation_id} is both a slave and a master (chained constraints are not supported)")]
    ChainedConstraint { equation_id: usize },

    /// A re-evaluated constraint references a master unknown to its relation.
    #[error("slave {slave} gained master {master} after the relations were formulated")]
    PatternChanged { slave: usize, master: usize },

    /// Equation id outside the system.
    #[error("equation id {id} out of range (system size {size})")]
    InvalidEquationId { id: usize, size: usize },

    /// Attempted write to a position missing from the sparsity pattern.
    #[error("entry ({row}, {col}) is not part of the matrix structure")]
    OutOfPattern { row: usize, col: usize },

    /// Build requested before the matrix structure was set up.
    #[error("matrix structure has not been set up")]
    MissingStructure,

    /// Assembly errors.
    #[error("assembly error: {0}")]
    Assembly(String),

    /// Solver errors.
    #[error("solver error: {0}")]
    Solver(String),

    /// Matrix singularity or conditioning issues.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),
}
