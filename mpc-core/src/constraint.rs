//! Master-slave constraints.
//!
//! A constraint expresses a set of slave DOFs as an affine combination of
//! master DOFs:
//!
//! ```text
//! u_s = Σ_m T[s, m] · u_m + c[s]
//! ```
//!
//! The weight matrix `T` has one row per slave and one column per master.
//! Coefficients are evaluated from the current DOF state every time they are
//! requested, so nonlinear or time-varying constraints are supported.

use crate::dof::DofAccessor;
use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Evaluated coefficients of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSystem {
    /// Weights, shape (n_slaves, n_masters).
    pub weights: DMatrix<f64>,
    /// Constants, length n_slaves.
    pub constants: DVector<f64>,
}

/// Multi-point constraint interface.
///
/// Constraints must be thread-safe (Send + Sync) so they can be shared with
/// the parallel build.
pub trait Constraint: Send + Sync {
    /// Equation ids of the slave DOFs (rows of the weight matrix).
    fn slave_ids(&self) -> &[usize];

    /// Equation ids of the master DOFs (columns of the weight matrix).
    fn master_ids(&self) -> &[usize];

    /// Evaluate the weight matrix and constant vector at the current state.
    fn calculate_local_system(&self, dofs: &dyn DofAccessor) -> Result<ConstraintSystem>;

    /// Explicit activity flag. `None` means the flag was never set.
    fn active_flag(&self) -> Option<bool> {
        None
    }

    /// Constraints without an explicit flag are active.
    fn is_active(&self) -> bool {
        self.active_flag().unwrap_or(true)
    }

    /// Called once at the start of a solution step, before any build.
    /// Constraints that precompute their coefficients do it here.
    fn initialize_solution_step(&mut self, _dofs: &dyn DofAccessor) -> Result<()> {
        Ok(())
    }

    /// Called once after the step has converged.
    fn finalize_solution_step(&mut self, _dofs: &dyn DofAccessor) -> Result<()> {
        Ok(())
    }
}

impl<T: Constraint + ?Sized> Constraint for Box<T> {
    fn slave_ids(&self) -> &[usize] {
        (**self).slave_ids()
    }

    fn master_ids(&self) -> &[usize] {
        (**self).master_ids()
    }

    fn calculate_local_system(&self, dofs: &dyn DofAccessor) -> Result<ConstraintSystem> {
        (**self).calculate_local_system(dofs)
    }

    fn active_flag(&self) -> Option<bool> {
        (**self).active_flag()
    }

    fn initialize_solution_step(&mut self, dofs: &dyn DofAccessor) -> Result<()> {
        (**self).initialize_solution_step(dofs)
    }

    fn finalize_solution_step(&mut self, dofs: &dyn DofAccessor) -> Result<()> {
        (**self).finalize_solution_step(dofs)
    }
}

/// Evaluate a constraint and check its coefficients against its id lists.
pub fn evaluate(constraint: &dyn Constraint, dofs: &dyn DofAccessor) -> Result<ConstraintSystem> {
    let system = constraint.calculate_local_system(dofs)?;
    check_dimensions(
        constraint.slave_ids().len(),
        constraint.master_ids().len(),
        &system.weights,
        &system.constants,
    )?;
    Ok(system)
}

fn check_dimensions(
    n_slaves: usize,
    n_masters: usize,
    weights: &DMatrix<f64>,
    constants: &DVector<f64>,
) -> Result<()> {
    if weights.nrows() != n_slaves || weights.ncols() != n_masters {
        return Err(Error::SizeMismatch(format!(
            "weight matrix is {}x{}, constraint declares {} slaves and {} masters",
            weights.nrows(),
            weights.ncols(),
            n_slaves,
            n_masters
        )));
    }
    if constants.len() != n_slaves {
        return Err(Error::SizeMismatch(format!(
            "constant vector has {} entries, constraint declares {} slaves",
            constants.len(),
            n_slaves
        )));
    }
    Ok(())
}

/// Constraint with fixed coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    slave_ids: Vec<usize>,
    master_ids: Vec<usize>,
    weights: DMatrix<f64>,
    constants: DVector<f64>,
    active: Option<bool>,
}

impl LinearConstraint {
    /// Create a constraint relating several slaves to several masters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeMismatch`] if `weights` is not
    /// (n_slaves × n_masters) or `constants` is not of length n_slaves.
    pub fn new(
        slave_ids: Vec<usize>,
        master_ids: Vec<usize>,
        weights: DMatrix<f64>,
        constants: DVector<f64>,
    ) -> Result<Self> {
        check_dimensions(slave_ids.len(), master_ids.len(), &weights, &constants)?;
        Ok(Self {
            slave_ids,
            master_ids,
            weights,
            constants,
            active: None,
        })
    }

    /// Single slave tied to `(master, weight)` pairs plus a constant.
    pub fn scalar(slave_id: usize, masters: &[(usize, f64)], constant: f64) -> Self {
        Self {
            slave_ids: vec![slave_id],
            master_ids: masters.iter().map(|&(id, _)| id).collect(),
            weights: DMatrix::from_row_iterator(1, masters.len(), masters.iter().map(|&(_, w)| w)),
            constants: DVector::from_element(1, constant),
            active: None,
        }
    }

    /// Periodic / tie relation `u_slave = u_master`.
    pub fn tie(slave_id: usize, master_id: usize) -> Self {
        Self::scalar(slave_id, &[(master_id, 1.0)], 0.0)
    }

    /// Set an explicit activity flag.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Change the activity flag in place.
    pub fn set_active(&mut self, active: bool) {
        self.active = Some(active);
    }
}

impl Constraint for LinearConstraint {
    fn slave_ids(&self) -> &[usize] {
        &self.slave_ids
    }

    fn master_ids(&self) -> &[usize] {
        &self.master_ids
    }

    fn calculate_local_system(&self, _dofs: &dyn DofAccessor) -> Result<ConstraintSystem> {
        Ok(ConstraintSystem {
            weights: self.weights.clone(),
            constants: self.constants.clone(),
        })
    }

    fn active_flag(&self) -> Option<bool> {
        self.active
    }
}
