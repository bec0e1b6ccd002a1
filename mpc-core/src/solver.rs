//! Linear system solvers.
//!
//! Solves the condensed, Dirichlet-treated system `A dx = b` for the
//! increment of the free and master DOFs.
//!
//! # Solver Backends
//!
//! - [`FaerCholeskySolver`]: Sparse Cholesky factorization using the faer library.
//!   Condensation preserves symmetry, so SPD element matrices give an SPD
//!   global matrix.
//! - [`CachedCholeskySolver`]: Same factorization, reusing the symbolic analysis
//!   across solves. The sparsity pattern is fixed once the structure is built,
//!   so repeated builds only redo the numeric phase.
//! - [`DenseLUSolver`]: nalgebra dense LU for small or unsymmetric systems.

use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use std::sync::Mutex;
use std::time::Instant;

/// Linear solver interface.
pub trait Solver: Send + Sync {
    /// Solve the linear system Ax = b.
    ///
    /// # Arguments
    ///
    /// * `matrix` - Global system matrix
    /// * `rhs` - Right-hand side
    ///
    /// # Returns
    ///
    /// Solution increment
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>>;

    /// Solver name for diagnostics.
    fn name(&self) -> &str;
}

/// Solver selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverType {
    /// Sparse Cholesky with cached symbolic analysis.
    Cholesky,
    /// Dense LU.
    DenseLu,
    /// Dense LU up to the threshold, sparse Cholesky above it.
    #[default]
    Auto,
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverConfig {
    /// Solver type to use.
    pub solver_type: SolverType,
    /// Largest system solved densely under [`SolverType::Auto`].
    pub dense_threshold: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver_type: SolverType::Auto,
            dense_threshold: 64,
        }
    }
}

/// Solution statistics.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveStats {
    /// Solver name used.
    pub solver: String,
    /// Number of equations.
    pub n_equations: usize,
    /// Stored entries in the matrix.
    pub nnz: usize,
    /// Euclidean norm of `A x - b`.
    pub residual: f64,
    /// Wall-clock time of the solve in seconds.
    pub time_seconds: f64,
}

/// Solve and collect statistics.
pub fn solve_with_stats(solver: &dyn Solver, matrix: &CsrMatrix, rhs: &[f64]) -> Result<(Vec<f64>, SolveStats)> {
    let start = Instant::now();
    let x = solver.solve(matrix, rhs)?;
    let time_seconds = start.elapsed().as_secs_f64();
    let stats = SolveStats {
        solver: solver.name().to_string(),
        n_equations: matrix.nrows(),
        nnz: matrix.nnz(),
        residual: residual_norm(matrix, &x, rhs),
        time_seconds,
    };
    Ok((x, stats))
}

/// `|A x - b|`.
pub fn residual_norm(matrix: &CsrMatrix, x: &[f64], rhs: &[f64]) -> f64 {
    matrix
        .row_iter()
        .zip(rhs)
        .map(|(row, &b)| {
            let ax: f64 = row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &a)| a * x[j])
                .sum();
            (ax - b).powi(2)
        })
        .sum::<f64>()
        .sqrt()
}

fn check_dimensions(matrix: &CsrMatrix, rhs: &[f64]) -> Result<()> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(Error::Solver("Matrix must be square".into()));
    }
    if n != rhs.len() {
        return Err(Error::Solver(format!(
            "RHS size mismatch: {} equations, {} RHS entries",
            n,
            rhs.len()
        )));
    }
    Ok(())
}

/// Direct solver using nalgebra dense LU factorization.
///
/// Does not require symmetry. Memory grows with the square of the system
/// size, so this is meant for small systems.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseLUSolver;

impl DenseLUSolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for DenseLUSolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        use nalgebra::{DMatrix, DVector};

        check_dimensions(matrix, rhs)?;
        if matrix.nrows() == 0 {
            return Ok(vec![]);
        }

        let dense = DMatrix::from(matrix);
        let b = DVector::from_column_slice(rhs);
        let solution = dense
            .lu()
            .solve(&b)
            .ok_or_else(|| Error::SingularMatrix("LU factorization failed".into()))?;

        Ok(solution.as_slice().to_vec())
    }

    fn name(&self) -> &str {
        "Dense LU"
    }
}

/// Convert a nalgebra-sparse CSR matrix to faer CSC format.
///
/// Each CSR row is scattered into the CSC columns, so the result is the same
/// matrix, not its transpose. Row indices stay sorted within every column.
fn csr_to_faer_csc(csr: &CsrMatrix) -> SparseColMat<usize, f64> {
    let nrows = csr.nrows();
    let ncols = csr.ncols();
    let row_offsets = csr.row_offsets();
    let col_indices = csr.col_indices();
    let values = csr.values();

    let mut col_offsets = vec![0usize; ncols + 1];
    for &col in col_indices {
        col_offsets[col + 1] += 1;
    }
    for i in 0..ncols {
        col_offsets[i + 1] += col_offsets[i];
    }

    let nnz = values.len();
    let mut csc_row_indices = vec![0usize; nnz];
    let mut csc_values = vec![0.0f64; nnz];
    let mut next = col_offsets[..ncols].to_vec();

    for row in 0..nrows {
        for idx in row_offsets[row]..row_offsets[row + 1] {
            let col = col_indices[idx];
            let pos = next[col];
            csc_row_indices[pos] = row;
            csc_values[pos] = values[idx];
            next[col] += 1;
        }
    }

    let symbolic = SymbolicSparseColMat::new_checked(nrows, ncols, col_offsets, None, csc_row_indices);
    SparseColMat::new(symbolic, csc_values)
}

fn map_llt_error(e: SparseLltError) -> Error {
    match e {
        SparseLltError::Generic(err) => Error::Solver(format!("Sparse Cholesky error: {:?}", err)),
        SparseLltError::Numeric(LltError::NonPositivePivot { index }) => {
            Error::SingularMatrix(format!("Matrix is not positive definite at pivot {}", index))
        }
    }
}

fn analyze(csc: &SparseColMat<usize, f64>) -> Result<SymbolicLlt<usize>> {
    SymbolicLlt::try_new(csc.as_ref().symbolic(), faer::Side::Lower)
        .map_err(|_| Error::Solver("Symbolic Cholesky analysis failed".into()))
}

fn factor_and_solve(
    symbolic: SymbolicLlt<usize>,
    csc: &SparseColMat<usize, f64>,
    rhs: &[f64],
) -> Result<Vec<f64>> {
    let n = rhs.len();
    let llt = Llt::try_new_with_symbolic(symbolic, csc.as_ref(), faer::Side::Lower).map_err(map_llt_error)?;
    let mut x = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
    llt.solve_in_place(x.as_mut());
    Ok((0..n).map(|i| x[(i, 0)]).collect())
}

/// Sparse Cholesky solver using the faer library.
///
/// # Example
///
/// ```ignore
/// let solver = FaerCholeskySolver::new();
/// let dx = solver.solve(&system.matrix, &system.rhs)?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FaerCholeskySolver;

impl FaerCholeskySolver {
    /// Create a new sparse Cholesky solver.
    pub fn new() -> Self {
        Self
    }
}

impl Solver for FaerCholeskySolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        check_dimensions(matrix, rhs)?;
        if matrix.nrows() == 0 {
            return Ok(vec![]);
        }
        let csc = csr_to_faer_csc(matrix);
        let symbolic = analyze(&csc)?;
        factor_and_solve(symbolic, &csc, rhs)
    }

    fn name(&self) -> &str {
        "faer Sparse Cholesky (LLᵀ)"
    }
}

/// Sparse Cholesky solver with cached symbolic factorization.
///
/// The first solve analyzes the pattern; later solves reuse the analysis as
/// long as the matrix has exactly the same sparsity pattern. Any other
/// pattern is analyzed afresh and replaces the cache.
#[derive(Default)]
pub struct CachedCholeskySolver {
    cache: Mutex<Option<CachedAnalysis>>,
}

struct CachedAnalysis {
    row_offsets: Vec<usize>,
    col_indices: Vec<usize>,
    symbolic: SymbolicLlt<usize>,
}

impl CachedAnalysis {
    fn matches(&self, matrix: &CsrMatrix) -> bool {
        self.row_offsets == matrix.row_offsets() && self.col_indices == matrix.col_indices()
    }
}

impl CachedCholeskySolver {
    /// Create a new cached Cholesky solver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached analysis.
    pub fn reset(&self) {
        if let Ok(mut cached) = self.cache.lock() {
            *cached = None;
        }
    }

    /// Whether an analysis is cached.
    pub fn is_analyzed(&self) -> bool {
        self.cache.lock().map(|c| c.is_some()).unwrap_or(false)
    }
}

impl Solver for CachedCholeskySolver {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        check_dimensions(matrix, rhs)?;
        if matrix.nrows() == 0 {
            return Ok(vec![]);
        }
        let csc = csr_to_faer_csc(matrix);

        let mut cached = self
            .cache
            .lock()
            .map_err(|_| Error::Solver("symbolic cache poisoned".into()))?;
        let reusable = cached
            .as_ref()
            .filter(|analysis| analysis.matches(matrix))
            .map(|analysis| analysis.symbolic.clone());
        let symbolic = match reusable {
            Some(symbolic) => symbolic,
            None => {
                let symbolic = analyze(&csc)?;
                *cached = Some(CachedAnalysis {
                    row_offsets: matrix.row_offsets().to_vec(),
                    col_indices: matrix.col_indices().to_vec(),
                    symbolic: symbolic.clone(),
                });
                symbolic
            }
        };
        drop(cached);

        factor_and_solve(symbolic, &csc, rhs)
    }

    fn name(&self) -> &str {
        "faer Sparse Cholesky (cached)"
    }
}

/// Select solver based on configuration and problem size.
pub fn select_solver(config: &SolverConfig, n_equations: usize) -> Box<dyn Solver> {
    match config.solver_type {
        SolverType::Cholesky => Box::new(CachedCholeskySolver::new()),
        SolverType::DenseLu => Box::new(DenseLUSolver::new()),
        SolverType::Auto => {
            if n_equations <= config.dense_threshold {
                Box::new(DenseLUSolver::new())
            } else {
                Box::new(CachedCholeskySolver::new())
            }
        }
    }
}

impl Solver for Box<dyn Solver> {
    fn solve(&self, matrix: &CsrMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        (**self).solve(matrix, rhs)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
