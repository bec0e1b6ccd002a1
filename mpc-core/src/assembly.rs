//! Parallel assembly of the global system.
//!
//! Local contributions are computed, passed through the constraint policy
//! and scatter-added into the row-locked global system using Rayon for
//! shared-memory parallelism. Elements are processed first, then conditions;
//! each loop ends at a join barrier.

use crate::contribution::Assemblable;
use crate::dof::DofAccessor;
use crate::error::{Error, Result};
use crate::policy::ConstraintPolicy;
use crate::sparse::{RowLockedSystem, SparseSystem};
use crate::structure::MatrixStructure;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

/// Dedicated pool of `n_threads` workers, or `None` (global Rayon pool)
/// when `n_threads` is zero.
pub fn thread_pool(n_threads: usize) -> Result<Option<ThreadPool>> {
    if n_threads == 0 {
        return Ok(None);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .map_err(|e| Error::Assembly(format!("failed to start thread pool: {}", e)))?;
    Ok(Some(pool))
}

/// Run `op` inside `pool`, or on the global Rayon pool.
pub fn run_parallel<R, F>(pool: Option<&ThreadPool>, op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// Assemble the global system from all active elements and conditions.
///
/// Items with an explicit inactive flag are skipped. Every contribution goes
/// through `policy` before it is scattered, so with condensation active the
/// slave rows only receive the elements' own slave-slave blocks.
///
/// # Errors
///
/// Fails on the first element or condition whose local system cannot be
/// computed, condensed or scattered; the partially built system is dropped.
pub fn assemble<E, C>(
    structure: &MatrixStructure,
    elements: &[E],
    conditions: &[C],
    dofs: &dyn DofAccessor,
    policy: &ConstraintPolicy,
) -> Result<SparseSystem>
where
    E: Assemblable,
    C: Assemblable,
{
    let system = RowLockedSystem::new(structure);

    scatter(&system, structure, elements, dofs, policy)?;
    scatter(&system, structure, conditions, dofs, policy)?;

    debug!(
        n_elements = elements.len(),
        n_conditions = conditions.len(),
        nnz = structure.nnz(),
        constrained = policy.is_constrained(),
        "assembled global system"
    );
    system.finish()
}

fn scatter<T: Assemblable>(
    system: &RowLockedSystem<'_>,
    structure: &MatrixStructure,
    items: &[T],
    dofs: &dyn DofAccessor,
    policy: &ConstraintPolicy,
) -> Result<()> {
    items
        .par_iter()
        .filter(|item| item.is_active())
        .try_for_each(|item| {
            let local = item.calculate_local_system(dofs)?;
            let local = policy.apply(local, structure)?;
            system.add(&local)
        })
}
