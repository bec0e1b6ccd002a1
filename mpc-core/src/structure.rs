//! Sparsity structure of the global system.
//!
//! The nonzero pattern is computed once per rebuild. Elements that touch a
//! slave DOF will, after condensation, couple that slave's masters with each
//! other and with the element's remaining DOFs, so those masters are added to
//! the element's id list before its pairwise couplings are registered.
//!
//! Elements and conditions are scattered in parallel. Each global row owns a
//! lock that is held only while that row's column set is extended.

use crate::contribution::Assemblable;
use crate::error::{Error, Result};
use crate::relation::GlobalRelations;
use crate::sparse::{lock_row, CsrMatrix};
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

/// Expected number of columns per row, used to pre-size the row sets.
const ROW_CAPACITY: usize = 40;

/// Fixed nonzero pattern of the global matrix plus the slaves it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixStructure {
    pattern: SparsityPattern,
    slave_mask: Vec<bool>,
}

impl MatrixStructure {
    /// Wrap an existing pattern. `slave_mask[i]` marks equation `i` as slave.
    pub fn new(pattern: SparsityPattern, slave_mask: Vec<bool>) -> Result<Self> {
        if pattern.major_dim() != slave_mask.len() || pattern.minor_dim() != slave_mask.len() {
            return Err(Error::SizeMismatch(format!(
                "pattern is {}x{} but the slave mask has {} entries",
                pattern.major_dim(),
                pattern.minor_dim(),
                slave_mask.len()
            )));
        }
        Ok(Self {
            pattern,
            slave_mask,
        })
    }

    /// Number of equations (rows and columns).
    pub fn n_equations(&self) -> usize {
        self.slave_mask.len()
    }

    /// Number of structural nonzeros.
    pub fn nnz(&self) -> usize {
        self.pattern.nnz()
    }

    /// The underlying CSR pattern.
    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    /// Sorted column indices of `row`.
    pub fn row_columns(&self, row: usize) -> &[usize] {
        self.pattern.lane(row)
    }

    /// Whether `(row, col)` has storage.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.n_equations() && self.row_columns(row).binary_search(&col).is_ok()
    }

    /// Whether `equation_id` was a slave when the structure was built.
    pub fn is_slave(&self, equation_id: usize) -> bool {
        self.slave_mask.get(equation_id).copied().unwrap_or(false)
    }

    /// Whether any slave was registered.
    pub fn has_slaves(&self) -> bool {
        self.slave_mask.iter().any(|&s| s)
    }

    /// CSR matrix with this pattern and all values zero.
    pub fn zero_matrix(&self) -> Result<CsrMatrix> {
        CsrMatrix::try_from_pattern_and_values(self.pattern.clone(), vec![0.0; self.nnz()])
            .map_err(|e| Error::Assembly(format!("invalid matrix structure: {}", e)))
    }
}

/// Append the masters of every slave in `ids` that are not already present.
///
/// Returns `true` if at least one id of the original list is a slave.
pub fn append_masters(ids: &mut Vec<usize>, relations: &GlobalRelations) -> bool {
    let n_original = ids.len();
    let mut found_slave = false;
    for i in 0..n_original {
        if let Some(relation) = relations.find(ids[i]) {
            found_slave = true;
            for &master in relation.master_ids() {
                if !ids.contains(&master) {
                    ids.push(master);
                }
            }
        }
    }
    found_slave
}

/// Compute the matrix structure for `n_equations` unknowns.
///
/// Every row receives its diagonal entry, so isolated or fixed DOFs keep a
/// pivot. Inactive elements and conditions are included: activity may change
/// between builds while the structure stays fixed.
///
/// # Errors
///
/// Returns [`Error::InvalidEquationId`] if any id (original or appended
/// master) is outside `0..n_equations`.
pub fn build_structure<E, C>(
    n_equations: usize,
    elements: &[E],
    conditions: &[C],
    relations: &GlobalRelations,
) -> Result<MatrixStructure>
where
    E: Assemblable,
    C: Assemblable,
{
    let rows: Vec<Mutex<HashSet<usize>>> = (0..n_equations)
        .into_par_iter()
        .map(|i| {
            let mut set = HashSet::with_capacity(ROW_CAPACITY);
            set.insert(i);
            Mutex::new(set)
        })
        .collect();

    scatter_ids(&rows, elements, relations)?;
    scatter_ids(&rows, conditions, relations)?;

    let mut row_offsets = Vec::with_capacity(n_equations + 1);
    let mut col_indices = Vec::new();
    row_offsets.push(0);
    for row in rows {
        let set = row
            .into_inner()
            .map_err(|_| Error::Assembly("row lock poisoned during structure build".into()))?;
        let mut cols: Vec<usize> = set.into_iter().collect();
        cols.sort_unstable();
        col_indices.extend_from_slice(&cols);
        row_offsets.push(col_indices.len());
    }

    let pattern =
        SparsityPattern::try_from_offsets_and_indices(n_equations, n_equations, row_offsets, col_indices)
            .map_err(|e| Error::Assembly(format!("invalid sparsity pattern: {}", e)))?;
    let slave_mask = (0..n_equations).map(|i| relations.contains(i)).collect();

    debug!(
        n_equations,
        nnz = pattern.nnz(),
        n_slaves = relations.len(),
        "matrix structure built"
    );
    MatrixStructure::new(pattern, slave_mask)
}

fn scatter_ids<T: Assemblable>(
    rows: &[Mutex<HashSet<usize>>],
    items: &[T],
    relations: &GlobalRelations,
) -> Result<()> {
    let size = rows.len();
    items.par_iter().try_for_each(|item| {
        let mut ids = item.equation_ids();
        append_masters(&mut ids, relations);
        if let Some(&id) = ids.iter().find(|&&id| id >= size) {
            return Err(Error::InvalidEquationId { id, size });
        }
        for &row in &ids {
            let mut set = lock_row(&rows[row])?;
            set.extend(ids.iter().copied());
        }
        Ok(())
    })
}
