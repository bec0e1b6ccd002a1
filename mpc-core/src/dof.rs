//! Degrees of freedom and access to their current state.
//!
//! Equation ids are dense and zero-based: the DOF with equation id `i` owns
//! row and column `i` of the global system.

use crate::error::{Error, Result};

/// A scalar unknown of the discretized system.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dof {
    /// Row/column of this DOF in the global system.
    pub equation_id: usize,
    /// Current value (displacement, temperature, ...).
    pub value: f64,
    /// Fixed DOFs carry a prescribed value (Dirichlet condition).
    pub fixed: bool,
}

impl Dof {
    /// Free DOF with the given current value.
    pub fn free(equation_id: usize, value: f64) -> Self {
        Self {
            equation_id,
            value,
            fixed: false,
        }
    }

    /// Fixed DOF holding a prescribed value.
    pub fn fixed(equation_id: usize, value: f64) -> Self {
        Self {
            equation_id,
            value,
            fixed: true,
        }
    }
}

/// Read/write access to DOF state by equation id.
///
/// Elements, conditions and constraints evaluate their local systems through
/// this trait, so any DOF storage can be plugged into the builder.
pub trait DofAccessor: Sync {
    /// Number of equations.
    fn len(&self) -> usize;

    /// Whether there are no equations.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value of the DOF owning `equation_id`.
    fn value(&self, equation_id: usize) -> f64;

    /// Overwrite the current value of the DOF owning `equation_id`.
    fn set_value(&mut self, equation_id: usize, value: f64);

    /// Whether the DOF owning `equation_id` is fixed.
    fn is_fixed(&self, equation_id: usize) -> bool;
}

/// Dense DOF storage indexed by equation id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DofSet {
    dofs: Vec<Dof>,
}

impl DofSet {
    /// `n` free DOFs, all with value zero.
    pub fn zeros(n: usize) -> Self {
        Self {
            dofs: (0..n).map(|i| Dof::free(i, 0.0)).collect(),
        }
    }

    /// Free DOFs initialized from `values`.
    pub fn from_values(values: &[f64]) -> Self {
        Self {
            dofs: values
                .iter()
                .enumerate()
                .map(|(i, &v)| Dof::free(i, v))
                .collect(),
        }
    }

    /// Build from explicit DOFs. Equation ids must be a permutation of `0..n`.
    pub fn from_dofs(mut dofs: Vec<Dof>) -> Result<Self> {
        let n = dofs.len();
        dofs.sort_by_key(|d| d.equation_id);
        for (i, dof) in dofs.iter().enumerate() {
            if dof.equation_id != i {
                return Err(Error::InvalidEquationId {
                    id: dof.equation_id,
                    size: n,
                });
            }
        }
        Ok(Self { dofs })
    }

    /// Mark a DOF as fixed at `value`.
    pub fn fix(&mut self, equation_id: usize, value: f64) -> Result<()> {
        let size = self.dofs.len();
        let dof = self
            .dofs
            .get_mut(equation_id)
            .ok_or(Error::InvalidEquationId {
                id: equation_id,
                size,
            })?;
        dof.value = value;
        dof.fixed = true;
        Ok(())
    }

    /// Release a previously fixed DOF.
    pub fn free(&mut self, equation_id: usize) -> Result<()> {
        let size = self.dofs.len();
        let dof = self
            .dofs
            .get_mut(equation_id)
            .ok_or(Error::InvalidEquationId {
                id: equation_id,
                size,
            })?;
        dof.fixed = false;
        Ok(())
    }

    /// Get a DOF by equation id.
    pub fn get(&self, equation_id: usize) -> Option<&Dof> {
        self.dofs.get(equation_id)
    }

    /// All DOFs in equation order.
    pub fn dofs(&self) -> &[Dof] {
        &self.dofs
    }

    /// Equation ids of all fixed DOFs.
    pub fn fixed_ids(&self) -> Vec<usize> {
        self.dofs
            .iter()
            .filter(|d| d.fixed)
            .map(|d| d.equation_id)
            .collect()
    }

    /// Current values in equation order.
    pub fn values(&self) -> Vec<f64> {
        self.dofs.iter().map(|d| d.value).collect()
    }

    /// Add a solved increment to every DOF value.
    pub fn apply_increment(&mut self, dx: &[f64]) -> Result<()> {
        if dx.len() != self.dofs.len() {
            return Err(Error::SizeMismatch(format!(
                "increment has {} entries, system has {} DOFs",
                dx.len(),
                self.dofs.len()
            )));
        }
        for (dof, &delta) in self.dofs.iter_mut().zip(dx) {
            dof.value += delta;
        }
        Ok(())
    }
}

impl DofAccessor for DofSet {
    fn len(&self) -> usize {
        self.dofs.len()
    }

    fn value(&self, equation_id: usize) -> f64 {
        self.dofs[equation_id].value
    }

    fn set_value(&mut self, equation_id: usize, value: f64) {
        self.dofs[equation_id].value = value;
    }

    fn is_fixed(&self, equation_id: usize) -> bool {
        self.dofs[equation_id].fixed
    }
}
