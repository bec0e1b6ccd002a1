//! Condensation of local contributions.
//!
//! A local system `(K, r)` on ids `E` that touches slave DOFs is rewritten in
//! terms of the retained unknowns. The local indices are split into
//!
//! - slaves `S`: ids of `E` that carry a global relation,
//! - internals `I = E \ S`,
//! - masters `M`: masters of the slaves that are not already in `E`, appended
//!   after the original ids.
//!
//! With the local transformation `u = T·ũ + g`, where `T` is the identity on
//! `I ∪ M` and holds the relation weights on slave rows, and `g` holds the
//! relation constants:
//!
//! ```text
//! r' = Tᵀ (r - K g)
//! K' = Tᵀ K T
//! ```
//!
//! Slave rows and columns of the result are then decoupled from everything
//! else. The element's own slave-slave block is restored and the slave RHS
//! entries are zeroed; slave increments are recovered after the solve.

use crate::contribution::LocalContribution;
use crate::error::{Error, Result};
use crate::relation::{GlobalRelation, GlobalRelations};
use crate::structure::MatrixStructure;
use nalgebra::{DMatrix, DVector};

/// Whether any of `ids` was a slave when `structure` was built.
pub fn has_slave(ids: &[usize], structure: &MatrixStructure) -> bool {
    ids.iter().any(|&id| structure.is_slave(id))
}

/// Condense a local contribution against the global relations.
///
/// Contributions without slaves are returned as they are. Otherwise the
/// returned contribution is extended by the appended masters.
///
/// # Errors
///
/// - [`Error::SizeMismatch`] if `K`, `r` and `E` disagree in size
/// - [`Error::MissingRelation`] if an id flagged as slave by the structure has
///   no relation in the registry
pub fn condense(
    local: LocalContribution,
    relations: &GlobalRelations,
    structure: &MatrixStructure,
) -> Result<LocalContribution> {
    let n = local.equation_ids.len();
    if local.lhs.shape() != (n, n) || local.rhs.len() != n {
        return Err(Error::SizeMismatch(format!(
            "local system is {}x{} with {} RHS entries for {} equation ids",
            local.lhs.nrows(),
            local.lhs.ncols(),
            local.rhs.len(),
            n
        )));
    }

    if !has_slave(&local.equation_ids, structure) {
        return Ok(local);
    }

    // Slave positions with their relations, in local order.
    let mut slaves: Vec<(usize, &GlobalRelation)> = Vec::new();
    for (i, &id) in local.equation_ids.iter().enumerate() {
        if structure.is_slave(id) {
            let relation = relations
                .find(id)
                .ok_or(Error::MissingRelation { equation_id: id })?;
            slaves.push((i, relation));
        }
    }

    let mut equation_ids = local.equation_ids.clone();
    for (_, relation) in &slaves {
        for &master in relation.master_ids() {
            if !equation_ids.contains(&master) {
                equation_ids.push(master);
            }
        }
    }
    let size = equation_ids.len();
    let local_index = |id: usize| equation_ids.iter().position(|&e| e == id);

    let mut is_slave = vec![false; size];
    for &(s, _) in &slaves {
        is_slave[s] = true;
    }

    let mut transformation = DMatrix::<f64>::zeros(size, size);
    let mut constants = DVector::<f64>::zeros(size);
    for i in (0..size).filter(|&i| !is_slave[i]) {
        transformation[(i, i)] = 1.0;
    }
    for &(s, relation) in &slaves {
        for (master, weight) in relation.masters() {
            // Masters were appended above, so the lookup cannot fail.
            if let Some(m) = local_index(master) {
                transformation[(s, m)] += weight;
            }
        }
        constants[s] = relation.constant();
    }

    let mut lhs_ext = DMatrix::<f64>::zeros(size, size);
    lhs_ext.view_mut((0, 0), (n, n)).copy_from(&local.lhs);
    let mut rhs_ext = DVector::<f64>::zeros(size);
    rhs_ext.rows_mut(0, n).copy_from(&local.rhs);

    // The RHS needs the untransformed K, so it is computed first.
    let residual = &rhs_ext - &lhs_ext * &constants;
    let mut rhs = transformation.tr_mul(&residual);
    let mut lhs = transformation.tr_mul(&(&lhs_ext * &transformation));

    for &(s, _) in &slaves {
        for j in 0..size {
            if is_slave[j] {
                lhs[(s, j)] = local.lhs[(s, j)];
            } else {
                lhs[(s, j)] = 0.0;
                lhs[(j, s)] = 0.0;
            }
        }
        rhs[s] = 0.0;
    }

    Ok(LocalContribution {
        lhs,
        rhs,
        equation_ids,
    })
}
