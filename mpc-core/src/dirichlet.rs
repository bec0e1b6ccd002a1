//! Default treatment of fixed DOFs.
//!
//! The assembled system is incremental: the solve yields `dx`, and a fixed
//! DOF must not move. Its row and column are decoupled, its diagonal set to a
//! representative scale of the matrix and its RHS entry zeroed.
//!
//! Rows that end up entirely empty (a DOF no active element touches) get the
//! same scaled diagonal and a zero RHS, so the system stays solvable and their
//! increment is zero. A load on such a row has nothing to act on and is
//! dropped with a warning.

use crate::dof::DofAccessor;
use crate::sparse::SparseSystem;
use tracing::{debug, warn};

/// Mean absolute value of the nonzero diagonal entries, or 1 if there is none.
pub fn diagonal_scale(system: &SparseSystem) -> f64 {
    let (sum, count) = (0..system.n_equations())
        .map(|i| system.entry(i, i).abs())
        .filter(|&d| d > 0.0)
        .fold((0.0, 0usize), |(s, c), d| (s + d, c + 1));
    if count == 0 {
        1.0
    } else {
        sum / count as f64
    }
}

/// Apply homogeneous incremental conditions for every fixed DOF.
pub fn apply_fixed_dofs(system: &mut SparseSystem, dofs: &dyn DofAccessor) {
    let n = system.n_equations();
    let scale = diagonal_scale(system);
    let fixed: Vec<bool> = (0..n).map(|i| dofs.is_fixed(i)).collect();

    let mut n_fixed = 0;
    let mut empty = vec![false; n];
    for (row, (cols, values)) in row_slices(system).enumerate() {
        if fixed[row] {
            n_fixed += 1;
            for (&col, value) in cols.iter().zip(values.iter_mut()) {
                *value = if col == row { scale } else { 0.0 };
            }
            continue;
        }

        // Free row: drop couplings to fixed columns.
        for (&col, value) in cols.iter().zip(values.iter_mut()) {
            if fixed[col] {
                *value = 0.0;
            }
        }
        if values.iter().all(|&v| v == 0.0) {
            if let Ok(k) = cols.binary_search(&row) {
                values[k] = scale;
                empty[row] = true;
            }
        }
    }

    let mut n_empty = 0;
    for (row, rhs) in system.rhs.iter_mut().enumerate() {
        if empty[row] {
            n_empty += 1;
            if *rhs != 0.0 {
                warn!(row, rhs = *rhs, "load on a DOF without stiffness dropped");
            }
            *rhs = 0.0;
        } else if fixed[row] {
            *rhs = 0.0;
        }
    }

    debug!(n_fixed, n_empty, scale, "applied fixed DOF conditions");
}

fn row_slices(system: &mut SparseSystem) -> impl Iterator<Item = (&[usize], &mut [f64])> + '_ {
    let (offsets, cols, values) = system.matrix.csr_data_mut();
    let mut rest = values;
    offsets.windows(2).map(move |w| {
        let len = w[1] - w[0];
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
        rest = tail;
        (&cols[w[0]..w[1]], head)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::assemble;
    use crate::contribution::DenseContribution;
    use crate::dof::DofSet;
    use crate::policy::ConstraintPolicy;
    use crate::relation::GlobalRelations;
    use crate::structure::build_structure;
    use approx::assert_relative_eq;

    fn spring_system(dofs: &DofSet) -> SparseSystem {
        let elements = vec![
            DenseContribution::spring(0, 1, 2.0),
            DenseContribution::spring(1, 2, 2.0),
        ];
        let loads = vec![DenseContribution::point_load(0, 3.0), DenseContribution::point_load(2, 1.0)];
        let structure = build_structure(4, &elements, &loads, &GlobalRelations::new()).unwrap();
        assemble(&structure, &elements, &loads, dofs, &ConstraintPolicy::Unconstrained).unwrap()
    }

    #[test]
    fn test_fixed_row_and_column_are_decoupled() {
        let mut dofs = DofSet::zeros(4);
        dofs.fix(0, 0.0).unwrap();
        let mut system = spring_system(&dofs);
        let scale = diagonal_scale(&system);
        assert_relative_eq!(scale, (2.0 + 4.0 + 2.0) / 3.0);

        apply_fixed_dofs(&mut system, &dofs);

        assert_relative_eq!(system.entry(0, 0), scale);
        assert_eq!(system.entry(0, 1), 0.0);
        assert_eq!(system.entry(1, 0), 0.0);
        assert_relative_eq!(system.entry(1, 1), 4.0);
        assert_eq!(system.rhs[0], 0.0);
        assert_eq!(system.rhs[2], 1.0);
    }

    #[test]
    fn test_untouched_dof_gets_pivot() {
        let dofs = DofSet::zeros(4);
        let mut system = spring_system(&dofs);
        assert_eq!(system.entry(3, 3), 0.0);
        apply_fixed_dofs(&mut system, &dofs);
        assert!(system.entry(3, 3) > 0.0);
    }

    #[test]
    fn test_load_on_untouched_dof_is_dropped() {
        let elements = vec![DenseContribution::spring(0, 1, 2.0)];
        let loads = vec![DenseContribution::point_load(1, 1.0), DenseContribution::point_load(2, 5.0)];
        let mut dofs = DofSet::zeros(3);
        dofs.fix(0, 0.0).unwrap();
        let structure = build_structure(3, &elements, &loads, &GlobalRelations::new()).unwrap();
        let mut system = assemble(&structure, &elements, &loads, &dofs, &ConstraintPolicy::Unconstrained).unwrap();
        assert_eq!(system.rhs[2], 5.0);

        apply_fixed_dofs(&mut system, &dofs);

        // DOF 2 has a pivot but no load, so its increment stays zero.
        assert_relative_eq!(system.entry(2, 2), 2.0);
        assert_eq!(system.rhs[2], 0.0);
        assert_eq!(system.rhs[1], 1.0);
    }
}
