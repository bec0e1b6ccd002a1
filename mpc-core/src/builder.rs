//! Builder-and-solver orchestration.
//!
//! [`BuilderAndSolver`] drives one linear solve of a constrained model:
//!
//! 1. [`set_up_system`](BuilderAndSolver::set_up_system) condenses the
//!    constraints into global master-slave relations and picks the policy.
//! 2. [`set_up_structure`](BuilderAndSolver::set_up_structure) computes the
//!    sparsity pattern, including the couplings condensation will create.
//! 3. [`build_and_solve`](BuilderAndSolver::build_and_solve) refreshes the
//!    relation values, assembles, applies fixed DOFs, solves and
//!    reconstructs the slave increments.
//!
//! The structure is kept across builds until it is set up again.

use crate::assembly::{assemble, run_parallel, thread_pool};
use crate::constraint::Constraint;
use crate::contribution::Assemblable;
use crate::dof::DofAccessor;
use crate::error::{Error, Result};
use crate::policy::ConstraintPolicy;
use crate::relation::GlobalRelations;
use crate::solver::{select_solver, solve_with_stats, SolveStats, Solver, SolverConfig};
use crate::sparse::SparseSystem;
use crate::structure::{build_structure, MatrixStructure};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::time::Instant;
use tracing::{debug, info};

/// Builder configuration.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BuilderConfig {
    /// Number of parallel threads (0 = use the global Rayon pool).
    pub n_threads: usize,
    /// Keep the master weights from set-up instead of re-evaluating them on
    /// every build. Only valid for constraints whose weights do not depend on
    /// the DOF state.
    pub cache_linear_weights: bool,
}

/// Result of [`BuilderAndSolver::build_and_solve`].
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Assembled system; `dx` holds the full increment, slaves included.
    pub system: SparseSystem,
    /// Statistics of the linear solve.
    pub stats: SolveStats,
    /// Wall-clock time of the build in seconds.
    pub build_time_seconds: f64,
    /// Number of slave DOFs reconstructed.
    pub n_slaves: usize,
}

/// Orchestrates set-up, build, solve and slave reconstruction.
pub struct BuilderAndSolver<S: Solver = Box<dyn Solver>> {
    solver: S,
    config: BuilderConfig,
    policy: ConstraintPolicy,
    structure: Option<MatrixStructure>,
    pool: Option<ThreadPool>,
}

/// Dedicated pool for `n_threads`, started on first use and kept afterwards.
fn ensure_pool(pool: &mut Option<ThreadPool>, n_threads: usize) -> Result<Option<&ThreadPool>> {
    if n_threads > 0 && pool.is_none() {
        *pool = thread_pool(n_threads)?;
    }
    Ok(pool.as_ref())
}

impl BuilderAndSolver<Box<dyn Solver>> {
    /// Builder with a solver picked from `solver_config` for `n_equations`.
    pub fn from_config(config: BuilderConfig, solver_config: &SolverConfig, n_equations: usize) -> Self {
        Self::new(select_solver(solver_config, n_equations), config)
    }
}

impl<S: Solver> BuilderAndSolver<S> {
    /// New builder, unconstrained until [`set_up_system`](Self::set_up_system).
    pub fn new(solver: S, config: BuilderConfig) -> Self {
        Self {
            solver,
            config,
            policy: ConstraintPolicy::Unconstrained,
            structure: None,
            pool: None,
        }
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn policy(&self) -> &ConstraintPolicy {
        &self.policy
    }

    /// Current structure, if set up.
    pub fn structure(&self) -> Option<&MatrixStructure> {
        self.structure.as_ref()
    }

    /// Global relations, if constrained.
    pub fn relations(&self) -> Option<&GlobalRelations> {
        self.policy.relations()
    }

    /// Formulate the global relations and choose the policy.
    ///
    /// Any previous relations are discarded. With no constraint producing a
    /// relation the builder stays unconstrained. The structure must be set up
    /// again afterwards.
    pub fn set_up_system<C: Constraint>(&mut self, constraints: &[C], dofs: &dyn DofAccessor) -> Result<()> {
        self.structure = None;
        if constraints.is_empty() {
            self.policy = ConstraintPolicy::Unconstrained;
            return Ok(());
        }

        let mut relations = match std::mem::take(&mut self.policy) {
            ConstraintPolicy::Condensation(relations) => relations,
            ConstraintPolicy::Unconstrained => GlobalRelations::new(),
        };
        relations.clear();
        relations.formulate(constraints, dofs)?;

        self.policy = if relations.is_empty() {
            ConstraintPolicy::Unconstrained
        } else {
            ConstraintPolicy::Condensation(relations)
        };
        Ok(())
    }

    /// Compute the sparsity pattern for `n_equations` rows.
    pub fn set_up_structure<E, C>(&mut self, n_equations: usize, elements: &[E], conditions: &[C]) -> Result<()>
    where
        E: Assemblable,
        C: Assemblable,
    {
        let pool = ensure_pool(&mut self.pool, self.config.n_threads)?;
        let empty = GlobalRelations::new();
        let relations = self.policy.relations().unwrap_or(&empty);
        let structure = run_parallel(pool, || build_structure(n_equations, elements, conditions, relations))?;
        debug!(
            n_equations,
            nnz = structure.nnz(),
            n_slaves = relations.len(),
            "set up matrix structure"
        );
        self.structure = Some(structure);
        Ok(())
    }

    /// Refresh the relation values and assemble the global system.
    ///
    /// # Errors
    ///
    /// [`Error::MissingStructure`] if [`set_up_structure`](Self::set_up_structure)
    /// has not run; otherwise any error of the relation update or assembly.
    pub fn build<E, C, K>(
        &mut self,
        elements: &[E],
        conditions: &[C],
        constraints: &[K],
        dofs: &dyn DofAccessor,
    ) -> Result<SparseSystem>
    where
        E: Assemblable,
        C: Assemblable,
        K: Constraint,
    {
        let structure = self.structure.as_ref().ok_or(Error::MissingStructure)?;
        if structure.n_equations() != dofs.len() {
            return Err(Error::SizeMismatch(format!(
                "structure has {} equations, DOF set has {}",
                structure.n_equations(),
                dofs.len()
            )));
        }

        let refresh_weights = !self.config.cache_linear_weights;
        if let Some(relations) = self.policy.relations_mut() {
            relations.update_values(constraints, dofs, refresh_weights)?;
        }

        let pool = ensure_pool(&mut self.pool, self.config.n_threads)?;
        let policy = &self.policy;
        run_parallel(pool, || assemble(structure, elements, conditions, dofs, policy))
    }

    /// Start a solution step on every constraint, in parallel.
    ///
    /// Runs before the first build of the step so constraints can store
    /// coefficients that stay fixed during it.
    pub fn initialize_solution_step<C: Constraint>(&mut self, constraints: &mut [C], dofs: &dyn DofAccessor) -> Result<()> {
        let pool = ensure_pool(&mut self.pool, self.config.n_threads)?;
        run_parallel(pool, || {
            constraints
                .par_iter_mut()
                .try_for_each(|constraint| constraint.initialize_solution_step(dofs))
        })?;
        debug!(n_constraints = constraints.len(), "initialized solution step");
        Ok(())
    }

    /// Finish a solution step on every constraint, in parallel.
    pub fn finalize_solution_step<C: Constraint>(&mut self, constraints: &mut [C], dofs: &dyn DofAccessor) -> Result<()> {
        let pool = ensure_pool(&mut self.pool, self.config.n_threads)?;
        run_parallel(pool, || {
            constraints
                .par_iter_mut()
                .try_for_each(|constraint| constraint.finalize_solution_step(dofs))
        })
    }

    /// Build, apply fixed DOFs, solve and reconstruct the slaves.
    ///
    /// `apply_dirichlet` runs on the assembled system before the solve;
    /// pass [`crate::dirichlet::apply_fixed_dofs`] for the default treatment.
    /// The returned system carries the full increment in `dx`. The DOF values
    /// themselves are left untouched.
    pub fn build_and_solve<E, C, K, F>(
        &mut self,
        elements: &[E],
        conditions: &[C],
        constraints: &[K],
        dofs: &dyn DofAccessor,
        apply_dirichlet: F,
    ) -> Result<SolveReport>
    where
        E: Assemblable,
        C: Assemblable,
        K: Constraint,
        F: FnOnce(&mut SparseSystem, &dyn DofAccessor),
    {
        let start = Instant::now();
        let mut system = self.build(elements, conditions, constraints, dofs)?;
        let build_time_seconds = start.elapsed().as_secs_f64();

        apply_dirichlet(&mut system, dofs);

        let (mut dx, stats) = solve_with_stats(&self.solver, &system.matrix, &system.rhs)?;
        let n_slaves = self.reconstruct_slaves(&mut dx)?;
        system.dx = dx;

        info!(
            n_equations = stats.n_equations,
            nnz = stats.nnz,
            n_slaves,
            solver = %stats.solver,
            build_time = build_time_seconds,
            solve_time = stats.time_seconds,
            residual = stats.residual,
            "build and solve finished"
        );

        Ok(SolveReport {
            system,
            stats,
            build_time_seconds,
            n_slaves,
        })
    }

    /// Overwrite each slave increment with the value its relation implies.
    ///
    /// Relations are visited once each in ascending slave order. Returns the
    /// number of slaves written.
    pub fn reconstruct_slaves(&self, dx: &mut [f64]) -> Result<usize> {
        match self.policy.relations() {
            Some(relations) => reconstruct_slaves(relations, dx),
            None => Ok(0),
        }
    }
}

/// Slave reconstruction over a relation registry.
///
/// Masters are never slaves, so every right-hand side reads solved master
/// increments only.
pub fn reconstruct_slaves(relations: &GlobalRelations, dx: &mut [f64]) -> Result<usize> {
    let size = dx.len();
    for relation in relations {
        let slave = relation.slave_id();
        if let Some(&id) = std::iter::once(&slave)
            .chain(relation.master_ids())
            .find(|&&id| id >= size)
        {
            return Err(Error::InvalidEquationId { id, size });
        }
        dx[slave] = relation.slave_increment(dx);
    }
    Ok(relations.len())
}
