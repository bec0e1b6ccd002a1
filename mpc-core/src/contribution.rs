//! Local contributions of elements and conditions.
//!
//! Element formulations live outside this crate. The builder only needs each
//! element or condition to report the equations it touches and to produce a
//! dense local system for the current state.

use crate::dof::DofAccessor;
use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Dense local system of one element or condition.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalContribution {
    /// Local left-hand side (stiffness-like), shape (n, n).
    pub lhs: DMatrix<f64>,
    /// Local right-hand side (residual-like), length n.
    pub rhs: DVector<f64>,
    /// Global equation ids of the local rows/columns, length n.
    pub equation_ids: Vec<usize>,
}

impl LocalContribution {
    /// Create a contribution, checking that all sizes agree and that
    /// `equation_ids` has no duplicates.
    pub fn new(lhs: DMatrix<f64>, rhs: DVector<f64>, equation_ids: Vec<usize>) -> Result<Self> {
        let contribution = Self {
            lhs,
            rhs,
            equation_ids,
        };
        contribution.validate()?;
        Ok(contribution)
    }

    /// Number of local equations.
    pub fn size(&self) -> usize {
        self.equation_ids.len()
    }

    /// Check the size and uniqueness requirements.
    pub fn validate(&self) -> Result<()> {
        let n = self.equation_ids.len();
        if self.lhs.nrows() != n || self.lhs.ncols() != n {
            return Err(Error::SizeMismatch(format!(
                "local matrix is {}x{} but {} equation ids were given",
                self.lhs.nrows(),
                self.lhs.ncols(),
                n
            )));
        }
        if self.rhs.len() != n {
            return Err(Error::SizeMismatch(format!(
                "local vector has {} entries but {} equation ids were given",
                self.rhs.len(),
                n
            )));
        }
        let mut sorted = self.equation_ids.clone();
        sorted.sort_unstable();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::SizeMismatch(format!(
                "equation id {} appears twice in one contribution",
                w[0]
            )));
        }
        Ok(())
    }
}

/// Element or condition that contributes to the global system.
///
/// Implementations must be thread-safe (Send + Sync) because the build loop
/// evaluates them in parallel.
pub trait Assemblable: Send + Sync {
    /// Global equation ids touched by this item, in local order.
    fn equation_ids(&self) -> Vec<usize>;

    /// Compute the local system at the current DOF state.
    fn calculate_local_system(&self, dofs: &dyn DofAccessor) -> Result<LocalContribution>;

    /// Explicit activity flag. `None` means the flag was never set.
    fn active_flag(&self) -> Option<bool> {
        None
    }

    /// Items without an explicit flag are active.
    fn is_active(&self) -> bool {
        self.active_flag().unwrap_or(true)
    }
}

impl<T: Assemblable + ?Sized> Assemblable for Box<T> {
    fn equation_ids(&self) -> Vec<usize> {
        (**self).equation_ids()
    }

    fn calculate_local_system(&self, dofs: &dyn DofAccessor) -> Result<LocalContribution> {
        (**self).calculate_local_system(dofs)
    }

    fn active_flag(&self) -> Option<bool> {
        (**self).active_flag()
    }
}

/// Contribution with a constant local system.
///
/// Useful for linear elements whose matrices are computed once, and for
/// loads that do not depend on the state.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseContribution {
    local: LocalContribution,
    active: Option<bool>,
}

impl DenseContribution {
    /// Wrap a constant local system.
    pub fn new(lhs: DMatrix<f64>, rhs: DVector<f64>, equation_ids: Vec<usize>) -> Result<Self> {
        Ok(Self {
            local: LocalContribution::new(lhs, rhs, equation_ids)?,
            active: None,
        })
    }

    /// Two-node spring of stiffness `k` between equations `a` and `b`.
    pub fn spring(a: usize, b: usize, k: f64) -> Self {
        let lhs = DMatrix::from_row_slice(2, 2, &[k, -k, -k, k]);
        Self {
            local: LocalContribution {
                lhs,
                rhs: DVector::zeros(2),
                equation_ids: vec![a, b],
            },
            active: None,
        }
    }

    /// Point load `value` on equation `id`, with no stiffness.
    pub fn point_load(id: usize, value: f64) -> Self {
        Self {
            local: LocalContribution {
                lhs: DMatrix::zeros(1, 1),
                rhs: DVector::from_element(1, value),
                equation_ids: vec![id],
            },
            active: None,
        }
    }

    /// Set an explicit activity flag.
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// The wrapped local system.
    pub fn local(&self) -> &LocalContribution {
        &self.local
    }
}

impl Assemblable for DenseContribution {
    fn equation_ids(&self) -> Vec<usize> {
        self.local.equation_ids.clone()
    }

    fn calculate_local_system(&self, _dofs: &dyn DofAccessor) -> Result<LocalContribution> {
        Ok(self.local.clone())
    }

    fn active_flag(&self) -> Option<bool> {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dof::DofSet;

    #[test]
    fn test_validate_sizes() {
        let ok = LocalContribution::new(DMatrix::identity(2, 2), DVector::zeros(2), vec![4, 1]);
        assert!(ok.is_ok());

        let bad_rhs = LocalContribution::new(DMatrix::identity(2, 2), DVector::zeros(3), vec![4, 1]);
        assert!(matches!(bad_rhs, Err(Error::SizeMismatch(_))));

        let bad_lhs = LocalContribution::new(DMatrix::identity(3, 3), DVector::zeros(2), vec![4, 1]);
        assert!(matches!(bad_lhs, Err(Error::SizeMismatch(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let dup = LocalContribution::new(DMatrix::identity(2, 2), DVector::zeros(2), vec![3, 3]);
        assert!(matches!(dup, Err(Error::SizeMismatch(_))));
    }

    #[test]
    fn test_spring_is_symmetric_and_singular() {
        let spring = DenseContribution::spring(0, 5, 10.0);
        let local = spring.calculate_local_system(&DofSet::zeros(6)).unwrap();
        assert_eq!(local.equation_ids, vec![0, 5]);
        assert_eq!(local.lhs, local.lhs.transpose());
        assert!(local.lhs.determinant().abs() < 1e-12);
        assert!(spring.is_active());
        assert!(!spring.with_active(false).is_active());
    }
}
