//! Sparse matrix storage.
//!
//! Uses CSR (Compressed Sparse Row) format with a pattern fixed before
//! assembly. During a build the values live in [`RowLockedSystem`], which
//! guards every global row (matrix values and RHS entry) with its own lock so
//! parallel scatter from many elements only contends on shared rows.

use crate::contribution::LocalContribution;
use crate::error::{Error, Result};
use crate::structure::MatrixStructure;
use nalgebra_sparse::csr::CsrMatrix as NalgebraCsr;
use std::sync::{Mutex, MutexGuard};

/// Compressed Sparse Row matrix.
pub type CsrMatrix = NalgebraCsr<f64>;

/// Lock a per-row mutex, reporting poisoning as an assembly error.
pub(crate) fn lock_row<T>(row: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    row.lock()
        .map_err(|_| Error::Assembly("row lock poisoned by a panicking thread".into()))
}

/// Assembled global system.
#[derive(Debug, Clone)]
pub struct SparseSystem {
    /// Global matrix.
    pub matrix: CsrMatrix,
    /// Right-hand side.
    pub rhs: Vec<f64>,
    /// Solution increment, filled by the solve.
    pub dx: Vec<f64>,
}

impl SparseSystem {
    /// Number of equations.
    pub fn n_equations(&self) -> usize {
        self.rhs.len()
    }

    /// Value stored at `(row, col)`, zero if outside the pattern.
    pub fn entry(&self, row: usize, col: usize) -> f64 {
        let row = self.matrix.row(row);
        row.col_indices()
            .binary_search(&col)
            .map(|k| row.values()[k])
            .unwrap_or(0.0)
    }
}

#[derive(Debug)]
struct RowBuffer {
    values: Vec<f64>,
    rhs: f64,
}

/// Global system under construction, one lock per row.
#[derive(Debug)]
pub struct RowLockedSystem<'a> {
    structure: &'a MatrixStructure,
    rows: Vec<Mutex<RowBuffer>>,
}

impl<'a> RowLockedSystem<'a> {
    /// Zero system with the given structure.
    pub fn new(structure: &'a MatrixStructure) -> Self {
        let rows = (0..structure.n_equations())
            .map(|i| {
                Mutex::new(RowBuffer {
                    values: vec![0.0; structure.row_columns(i).len()],
                    rhs: 0.0,
                })
            })
            .collect();
        Self { structure, rows }
    }

    /// Number of equations.
    pub fn n_equations(&self) -> usize {
        self.rows.len()
    }

    /// Scatter-add a local contribution.
    ///
    /// Each touched row is locked only while its own entries are added.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEquationId`] for ids outside the system
    /// - [`Error::OutOfPattern`] if a local entry maps to a position the
    ///   structure did not allocate
    pub fn add(&self, local: &LocalContribution) -> Result<()> {
        let size = self.rows.len();
        let ids = &local.equation_ids;
        for (i, &row) in ids.iter().enumerate() {
            if row >= size {
                return Err(Error::InvalidEquationId { id: row, size });
            }
            let columns = self.structure.row_columns(row);
            let mut buffer = lock_row(&self.rows[row])?;
            for (j, &col) in ids.iter().enumerate() {
                let pos = columns
                    .binary_search(&col)
                    .map_err(|_| Error::OutOfPattern { row, col })?;
                buffer.values[pos] += local.lhs[(i, j)];
            }
            buffer.rhs += local.rhs[i];
        }
        Ok(())
    }

    /// Convert to a CSR system. The solution increment starts at zero.
    pub fn finish(self) -> Result<SparseSystem> {
        let n = self.rows.len();
        let mut values = Vec::with_capacity(self.structure.nnz());
        let mut rhs = Vec::with_capacity(n);
        for row in self.rows {
            let buffer = row
                .into_inner()
                .map_err(|_| Error::Assembly("row lock poisoned by a panicking thread".into()))?;
            values.extend_from_slice(&buffer.values);
            rhs.push(buffer.rhs);
        }
        let matrix = CsrMatrix::try_from_pattern_and_values(self.structure.pattern().clone(), values)
            .map_err(|e| Error::Assembly(format!("assembled values do not fit the pattern: {}", e)))?;
        Ok(SparseSystem {
            matrix,
            rhs,
            dx: vec![0.0; n],
        })
    }
}
