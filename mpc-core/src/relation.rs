//! Global master-slave relations.
//!
//! Any number of local constraints may name the same slave DOF. Before
//! assembly they are condensed into exactly one [`GlobalRelation`] per unique
//! slave equation id, whose master weights are the sum of every contribution
//! asserting that slave. The registry ([`GlobalRelations`]) is rebuilt once
//! per system setup and its values are refreshed at the start of every build.
//!
//! Relations are stored in a `BTreeMap`, so iteration visits slaves in
//! ascending equation id order.

use crate::constraint::{evaluate, Constraint};
use crate::dof::DofAccessor;
use crate::error::{Error, Result};
use std::collections::btree_map::{self, BTreeMap};
use tracing::{debug, warn};

/// Condensed relation of one slave DOF to its masters.
///
/// `lhs_value` is the current value of the slave DOF and `rhs_value` the
/// value implied by its masters. Their difference is the constant the slave
/// increment has to close so the constraint holds after the update.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRelation {
    slave_id: usize,
    master_ids: Vec<usize>,
    weights: Vec<f64>,
    lhs_value: f64,
    rhs_value: f64,
}

impl GlobalRelation {
    /// Empty relation for `slave_id`.
    pub fn new(slave_id: usize) -> Self {
        Self {
            slave_id,
            master_ids: Vec::new(),
            weights: Vec::new(),
            lhs_value: 0.0,
            rhs_value: 0.0,
        }
    }

    /// Equation id of the slave.
    pub fn slave_id(&self) -> usize {
        self.slave_id
    }

    /// Master equation ids in insertion order.
    pub fn master_ids(&self) -> &[usize] {
        &self.master_ids
    }

    /// Weights, parallel to [`master_ids`](Self::master_ids).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// `(master, weight)` pairs.
    pub fn masters(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.master_ids.iter().copied().zip(self.weights.iter().copied())
    }

    /// Number of distinct masters.
    pub fn n_masters(&self) -> usize {
        self.master_ids.len()
    }

    /// Weight of `master_id`, if it is a master of this relation.
    pub fn weight(&self, master_id: usize) -> Option<f64> {
        self.position(master_id).map(|i| self.weights[i])
    }

    /// Add `weight` to the entry of `master_id`, creating it if absent.
    pub fn add_master(&mut self, master_id: usize, weight: f64) {
        match self.position(master_id) {
            Some(i) => self.weights[i] += weight,
            None => {
                self.master_ids.push(master_id);
                self.weights.push(weight);
            }
        }
    }

    /// Current slave value.
    pub fn lhs_value(&self) -> f64 {
        self.lhs_value
    }

    /// Slave value implied by the masters.
    pub fn rhs_value(&self) -> f64 {
        self.rhs_value
    }

    /// Record the current slave value.
    pub fn set_lhs_value(&mut self, value: f64) {
        self.lhs_value = value;
    }

    /// Accumulate an implied value from one asserting constraint.
    pub fn update_rhs_value(&mut self, value: f64) {
        self.rhs_value += value;
    }

    /// Constant term of the incremental relation.
    pub fn constant(&self) -> f64 {
        self.rhs_value - self.lhs_value
    }

    /// Slave increment implied by already solved master increments.
    pub fn slave_increment(&self, dx: &[f64]) -> f64 {
        self.masters()
            .fold(self.constant(), |acc, (master, weight)| acc + weight * dx[master])
    }

    fn position(&self, master_id: usize) -> Option<usize> {
        self.master_ids.iter().position(|&m| m == master_id)
    }

    fn reset_values(&mut self) {
        self.lhs_value = 0.0;
        self.rhs_value = 0.0;
    }

    fn reset_weights(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
    }

    fn refresh_master(&mut self, master_id: usize, weight: f64) -> Result<()> {
        let i = self.position(master_id).ok_or(Error::PatternChanged {
            slave: self.slave_id,
            master: master_id,
        })?;
        self.weights[i] += weight;
        Ok(())
    }
}

/// Registry holding one [`GlobalRelation`] per slave equation id.
#[derive(Debug, Clone, Default)]
pub struct GlobalRelations {
    relations: BTreeMap<usize, GlobalRelation>,
}

impl GlobalRelations {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every relation.
    pub fn clear(&mut self) {
        self.relations.clear();
    }

    /// Number of slave DOFs.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether no slave is registered.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Relation of `slave_id`, if it is a slave.
    pub fn find(&self, slave_id: usize) -> Option<&GlobalRelation> {
        self.relations.get(&slave_id)
    }

    /// Whether `equation_id` is a registered slave.
    pub fn contains(&self, equation_id: usize) -> bool {
        self.relations.contains_key(&equation_id)
    }

    /// Relations in ascending slave id order.
    pub fn iter(&self) -> btree_map::Values<'_, usize, GlobalRelation> {
        self.relations.values()
    }

    /// Insert or replace a relation directly.
    pub fn insert(&mut self, relation: GlobalRelation) {
        self.relations.insert(relation.slave_id, relation);
    }

    /// Condense every active constraint into the registry.
    ///
    /// Weights of constraints naming the same slave are summed. Calling this
    /// twice without [`clear`](Self::clear) adds the weights twice.
    ///
    /// # Errors
    ///
    /// - [`Error::SizeMismatch`] for malformed constraint coefficients
    /// - [`Error::InvalidEquationId`] for ids outside `dofs`
    /// - [`Error::ChainedConstraint`] if a slave is also used as a master
    pub fn formulate<C: Constraint>(&mut self, constraints: &[C], dofs: &dyn DofAccessor) -> Result<()> {
        for constraint in constraints.iter().filter(|c| c.is_active()) {
            check_ids(constraint, dofs.len())?;
            let system = evaluate(constraint, dofs)?;
            let masters = constraint.master_ids();

            for (row, &slave) in constraint.slave_ids().iter().enumerate() {
                let relation = self
                    .relations
                    .entry(slave)
                    .or_insert_with(|| GlobalRelation::new(slave));
                for (col, &master) in masters.iter().enumerate() {
                    relation.add_master(master, system.weights[(row, col)]);
                }
            }
        }

        for relation in self.relations.values() {
            if let Some(&master) = relation.master_ids.iter().find(|&&m| self.relations.contains_key(&m)) {
                return Err(Error::ChainedConstraint { equation_id: master });
            }
        }

        if self.relations.is_empty() {
            warn!(n_constraints = constraints.len(), "no active constraint produced a relation");
        } else {
            debug!(n_slaves = self.relations.len(), "formulated global master-slave relations");
        }
        Ok(())
    }

    /// Re-evaluate every active constraint at the current DOF state.
    ///
    /// Stores the current slave value and the implied value on each relation.
    /// With `refresh_weights`, the master weights are recomputed from the same
    /// evaluation; otherwise the weights from [`formulate`](Self::formulate)
    /// are kept.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEquationId`] for ids outside `dofs`
    /// - [`Error::MissingRelation`] if an active constraint names a slave that
    ///   was not formulated
    /// - [`Error::PatternChanged`] if a refreshed master is new to its relation
    pub fn update_values<C: Constraint>(
        &mut self,
        constraints: &[C],
        dofs: &dyn DofAccessor,
        refresh_weights: bool,
    ) -> Result<()> {
        for relation in self.relations.values_mut() {
            relation.reset_values();
            if refresh_weights {
                relation.reset_weights();
            }
        }

        for constraint in constraints.iter().filter(|c| c.is_active()) {
            check_ids(constraint, dofs.len())?;
            let system = evaluate(constraint, dofs)?;
            let masters = constraint.master_ids();

            for (row, &slave) in constraint.slave_ids().iter().enumerate() {
                let relation = self
                    .relations
                    .get_mut(&slave)
                    .ok_or(Error::MissingRelation { equation_id: slave })?;

                let mut implied = system.constants[row];
                for (col, &master) in masters.iter().enumerate() {
                    let weight = system.weights[(row, col)];
                    implied += weight * dofs.value(master);
                    if refresh_weights {
                        relation.refresh_master(master, weight)?;
                    }
                }

                relation.set_lhs_value(dofs.value(slave));
                relation.update_rhs_value(implied);
            }
        }
        Ok(())
    }
}

fn check_ids<C: Constraint>(constraint: &C, size: usize) -> Result<()> {
    match constraint
        .slave_ids()
        .iter()
        .chain(constraint.master_ids())
        .find(|&&id| id >= size)
    {
        Some(&id) => Err(Error::InvalidEquationId { id, size }),
        None => Ok(()),
    }
}

impl<'a> IntoIterator for &'a GlobalRelations {
    type Item = &'a GlobalRelation;
    type IntoIter = btree_map::Values<'a, usize, GlobalRelation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ConstraintSystem, LinearConstraint};
    use crate::dof::DofSet;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn test_formulate_sums_weights_of_same_slave() {
        let constraints = vec![
            LinearConstraint::scalar(2, &[(0, 0.3)], 0.0),
            LinearConstraint::scalar(2, &[(0, 0.2), (1, 0.5)], 0.0),
        ];
        let mut relations = GlobalRelations::new();
        relations.formulate(&constraints, &DofSet::zeros(3)).unwrap();

        assert_eq!(relations.len(), 1);
        let rel = relations.find(2).unwrap();
        assert_eq!(rel.master_ids(), &[0, 1]);
        assert_relative_eq!(rel.weight(0).unwrap(), 0.5, epsilon = 1e-15);
        assert_relative_eq!(rel.weight(1).unwrap(), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn test_formulate_twice_accumulates() {
        let constraints = vec![LinearConstraint::scalar(1, &[(0, 1.5)], 0.0)];
        let dofs = DofSet::zeros(2);
        let mut relations = GlobalRelations::new();
        relations.formulate(&constraints, &dofs).unwrap();
        relations.formulate(&constraints, &dofs).unwrap();
        assert_relative_eq!(relations.find(1).unwrap().weight(0).unwrap(), 3.0);

        relations.clear();
        assert!(relations.is_empty());
        relations.formulate(&constraints, &dofs).unwrap();
        assert_relative_eq!(relations.find(1).unwrap().weight(0).unwrap(), 1.5);
    }

    #[test]
    fn test_formulate_multi_slave_constraint() {
        let c = LinearConstraint::new(
            vec![3, 4],
            vec![0, 1],
            DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.25, 0.75]),
            DVector::from_vec(vec![0.0, 1.0]),
        )
        .unwrap();
        let mut relations = GlobalRelations::new();
        relations.formulate(&[c], &DofSet::zeros(5)).unwrap();

        assert_eq!(relations.len(), 2);
        let ids: Vec<usize> = relations.iter().map(|r| r.slave_id()).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_relative_eq!(relations.find(4).unwrap().weight(1).unwrap(), 0.75);
    }

    #[test]
    fn test_inactive_constraints_are_skipped() {
        let constraints = vec![
            LinearConstraint::tie(1, 0).with_active(false),
            LinearConstraint::tie(2, 0),
        ];
        let mut relations = GlobalRelations::new();
        relations.formulate(&constraints, &DofSet::zeros(3)).unwrap();
        assert!(relations.find(1).is_none());
        assert!(relations.contains(2));
    }

    #[test]
    fn test_formulate_rejects_chains() {
        let constraints = vec![LinearConstraint::tie(1, 0), LinearConstraint::tie(2, 1)];
        let mut relations = GlobalRelations::new();
        let result = relations.formulate(&constraints, &DofSet::zeros(3));
        assert!(matches!(result, Err(Error::ChainedConstraint { equation_id: 1 })));
    }

    #[test]
    fn test_formulate_rejects_out_of_range_ids() {
        let constraints = vec![LinearConstraint::tie(5, 0)];
        let mut relations = GlobalRelations::new();
        let result = relations.formulate(&constraints, &DofSet::zeros(3));
        assert!(matches!(result, Err(Error::InvalidEquationId { id: 5, size: 3 })));
    }

    #[test]
    fn test_update_values_computes_constant() {
        let constraints = vec![LinearConstraint::scalar(2, &[(0, 0.5), (1, 0.5)], 0.1)];
        let dofs = DofSet::from_values(&[2.0, 4.0, 1.0]);
        let mut relations = GlobalRelations::new();
        relations.formulate(&constraints, &dofs).unwrap();
        relations.update_values(&constraints, &dofs, true).unwrap();

        let rel = relations.find(2).unwrap();
        assert_relative_eq!(rel.lhs_value(), 1.0);
        assert_relative_eq!(rel.rhs_value(), 3.1, epsilon = 1e-12);
        assert_relative_eq!(rel.constant(), 2.1, epsilon = 1e-12);

        // A second update starts from scratch instead of accumulating.
        relations.update_values(&constraints, &dofs, true).unwrap();
        assert_relative_eq!(relations.find(2).unwrap().rhs_value(), 3.1, epsilon = 1e-12);
        assert_relative_eq!(relations.find(2).unwrap().weight(0).unwrap(), 0.5);
    }

    #[test]
    fn test_slave_increment() {
        let mut rel = GlobalRelation::new(2);
        rel.add_master(0, 0.5);
        rel.add_master(1, 0.5);
        rel.update_rhs_value(0.1);
        let dx = [2.0, 4.0, 0.0];
        assert_relative_eq!(rel.slave_increment(&dx), 3.1, epsilon = 1e-12);
    }

    /// Slave follows a master with a state-dependent weight `w = 1 + u_0`.
    struct Stretch;

    impl Constraint for Stretch {
        fn slave_ids(&self) -> &[usize] {
            &[1]
        }

        fn master_ids(&self) -> &[usize] {
            &[0]
        }

        fn calculate_local_system(&self, dofs: &dyn DofAccessor) -> Result<ConstraintSystem> {
            Ok(ConstraintSystem {
                weights: DMatrix::from_element(1, 1, 1.0 + dofs.value(0)),
                constants: DVector::zeros(1),
            })
        }
    }

    #[test]
    fn test_nonlinear_weights_follow_state() {
        let constraints = [Stretch];
        let mut relations = GlobalRelations::new();
        relations.formulate(&constraints, &DofSet::zeros(2)).unwrap();
        assert_relative_eq!(relations.find(1).unwrap().weight(0).unwrap(), 1.0);

        let moved = DofSet::from_values(&[1.0, 0.0]);
        relations.update_values(&constraints, &moved, true).unwrap();
        assert_relative_eq!(relations.find(1).unwrap().weight(0).unwrap(), 2.0);
        assert_relative_eq!(relations.find(1).unwrap().rhs_value(), 2.0);

        // Cached weights keep the formulation-time value.
        relations.update_values(&constraints, &moved, false).unwrap();
        assert_relative_eq!(relations.find(1).unwrap().weight(0).unwrap(), 2.0);
        let mut cached = GlobalRelations::new();
        cached.formulate(&constraints, &DofSet::zeros(2)).unwrap();
        cached.update_values(&constraints, &moved, false).unwrap();
        assert_relative_eq!(cached.find(1).unwrap().weight(0).unwrap(), 1.0);
    }

    #[test]
    fn test_update_values_reports_unknown_slave() {
        let dofs = DofSet::zeros(3);
        let mut relations = GlobalRelations::new();
        relations.formulate(&[LinearConstraint::tie(1, 0)], &dofs).unwrap();

        let result = relations.update_values(&[LinearConstraint::tie(2, 0)], &dofs, true);
        assert!(matches!(result, Err(Error::MissingRelation { equation_id: 2 })));
    }

    #[test]
    fn test_update_values_rejects_out_of_range_ids() {
        let dofs = DofSet::zeros(3);
        let mut relations = GlobalRelations::new();
        relations.formulate(&[LinearConstraint::tie(2, 0)], &dofs).unwrap();

        let constraints = [LinearConstraint::tie(2, 0), LinearConstraint::tie(2, 9)];
        let result = relations.update_values(&constraints, &dofs, true);
        assert!(matches!(result, Err(Error::InvalidEquationId { id: 9, size: 3 })));

        let result = relations.update_values(&[LinearConstraint::tie(7, 0)], &dofs, false);
        assert!(matches!(result, Err(Error::InvalidEquationId { id: 7, size: 3 })));
    }

    #[test]
    fn test_update_values_reports_new_master() {
        let dofs = DofSet::zeros(3);
        let mut relations = GlobalRelations::new();
        relations.formulate(&[LinearConstraint::tie(2, 0)], &dofs).unwrap();

        let result = relations.update_values(&[LinearConstraint::tie(2, 1)], &dofs, true);
        assert!(matches!(result, Err(Error::PatternChanged { slave: 2, master: 1 })));
    }
}
