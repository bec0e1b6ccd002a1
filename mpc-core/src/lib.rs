//! MPC Core - master-slave constraint condensation
//!
//! Builds and solves linear systems in which some DOFs are tied to others by
//! multi-point constraints (periodic boundaries, rigid links, hanging nodes):
//! - Global master-slave relations condensed from local constraints
//! - Sparsity structure that anticipates the couplings condensation creates
//! - Local condensation of element contributions onto master DOFs
//! - Parallel row-locked assembly using Rayon
//! - Sparse Cholesky (faer) and dense LU solvers
//!
//! # Architecture
//!
//! - [`Assemblable`] trait: elements and conditions, the source of local systems
//! - [`Constraint`] trait: slave/master ids with weights and constants
//! - [`GlobalRelations`]: one relation per slave DOF
//! - [`ConstraintPolicy`]: plain or condensed treatment of local systems
//! - [`BuilderAndSolver`]: set-up, build, solve and slave reconstruction
//! - [`Solver`] trait: linear system solution strategies

pub mod assembly;
pub mod builder;
pub mod constraint;
pub mod contribution;
pub mod dirichlet;
pub mod dof;
pub mod error;
pub mod policy;
pub mod relation;
pub mod solver;
pub mod sparse;
pub mod structure;
pub mod transform;

pub use builder::{BuilderAndSolver, BuilderConfig, SolveReport};
pub use constraint::{Constraint, ConstraintSystem, LinearConstraint};
pub use contribution::{Assemblable, DenseContribution, LocalContribution};
pub use dof::{Dof, DofAccessor, DofSet};
pub use error::{Error, Result};
pub use policy::ConstraintPolicy;
pub use relation::{GlobalRelation, GlobalRelations};
pub use solver::{Solver, SolverConfig, SolverType};
pub use sparse::{CsrMatrix, SparseSystem};
pub use structure::MatrixStructure;
