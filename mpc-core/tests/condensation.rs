//! End-to-end condensation scenarios through the public API.

use approx::assert_relative_eq;
use mpc_core::dirichlet::apply_fixed_dofs;
use mpc_core::policy::ConstraintPolicy;
use mpc_core::solver::{CachedCholeskySolver, DenseLUSolver};
use mpc_core::structure::build_structure;
use mpc_core::transform::condense;
use mpc_core::{
    Assemblable, BuilderAndSolver, BuilderConfig, DenseContribution, DofAccessor, DofSet, GlobalRelations,
    LinearConstraint,
};
use nalgebra::{DMatrix, DVector};

/// Three-node element with a Laplacian-like stiffness.
fn triangle(ids: [usize; 3]) -> DenseContribution {
    let lhs = DMatrix::from_row_slice(3, 3, &[2.0, -1.0, -1.0, -1.0, 2.0, -1.0, -1.0, -1.0, 2.0]);
    DenseContribution::new(lhs, DVector::zeros(3), ids.to_vec()).unwrap()
}

fn spring_chain(n: usize) -> Vec<DenseContribution> {
    (0..n - 1).map(|i| DenseContribution::spring(i, i + 1, 1.0)).collect()
}

#[test]
fn condensed_contributions_stay_inside_structure() {
    let elements = vec![triangle([0, 1, 2]), triangle([1, 2, 3]), triangle([3, 4, 5])];
    let none: Vec<DenseContribution> = Vec::new();
    let constraints = vec![LinearConstraint::scalar(5, &[(0, 0.5), (1, 0.5)], 0.0)];
    let dofs = DofSet::zeros(6);

    let mut relations = GlobalRelations::new();
    relations.formulate(&constraints, &dofs).unwrap();
    relations.update_values(&constraints, &dofs, true).unwrap();
    let structure = build_structure(6, &elements, &none, &relations).unwrap();

    for element in &elements {
        let local = element.calculate_local_system(&dofs).unwrap();
        let condensed = condense(local, &relations, &structure).unwrap();
        for &row in &condensed.equation_ids {
            for &col in &condensed.equation_ids {
                assert!(structure.contains(row, col), "({}, {}) missing from structure", row, col);
            }
        }
    }

    // The element holding the slave now couples its other DOFs to both masters.
    assert!(structure.contains(3, 0));
    assert!(structure.contains(4, 1));
    assert!(structure.contains(0, 4));

    let policy = ConstraintPolicy::Condensation(relations);
    let system = mpc_core::assembly::assemble(&structure, &elements, &none, &dofs, &policy).unwrap();
    assert_relative_eq!(system.entry(4, 0), -0.5);
}

#[test]
fn duplicate_constraints_sum_their_weights() {
    let constraints = vec![
        LinearConstraint::scalar(3, &[(0, 0.25)], 0.0),
        LinearConstraint::scalar(3, &[(0, 0.5), (1, 1.0)], 0.0),
    ];
    let mut relations = GlobalRelations::new();
    relations.formulate(&constraints, &DofSet::zeros(4)).unwrap();

    let relation = relations.find(3).unwrap();
    assert_relative_eq!(relation.weight(0).unwrap(), 0.75);
    assert_relative_eq!(relation.weight(1).unwrap(), 1.0);
    assert_eq!(relation.n_masters(), 2);
}

#[test]
fn constrained_chain_matches_manual_substitution() {
    // Chain 0-1-2-3-4, DOF 0 fixed, u4 = 0.5 u1 + 0.5 u2 + 0.1.
    let elements = spring_chain(5);
    let loads = vec![DenseContribution::point_load(3, 1.0), DenseContribution::point_load(4, 2.0)];
    let constraints = vec![LinearConstraint::scalar(4, &[(1, 0.5), (2, 0.5)], 0.1)];
    let mut dofs = DofSet::zeros(5);
    dofs.fix(0, 0.0).unwrap();

    let mut builder = BuilderAndSolver::new(CachedCholeskySolver::new(), BuilderConfig::default());
    builder.set_up_system(&constraints, &dofs).unwrap();
    builder.set_up_structure(5, &elements, &loads).unwrap();
    let report = builder
        .build_and_solve(&elements, &loads, &constraints, &dofs, apply_fixed_dofs)
        .unwrap();
    let dx = report.system.dx.clone();

    // u = T q + g over q = (u1, u2, u3).
    let mut k = DMatrix::<f64>::zeros(5, 5);
    for i in 0..4 {
        k[(i, i)] += 1.0;
        k[(i + 1, i + 1)] += 1.0;
        k[(i, i + 1)] -= 1.0;
        k[(i + 1, i)] -= 1.0;
    }
    let f = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    let mut t = DMatrix::<f64>::zeros(5, 3);
    t[(1, 0)] = 1.0;
    t[(2, 1)] = 1.0;
    t[(3, 2)] = 1.0;
    t[(4, 0)] = 0.5;
    t[(4, 1)] = 0.5;
    let g = DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.1]);
    let reduced = t.transpose() * &k * &t;
    let load = t.transpose() * (&f - &k * &g);
    let q = reduced.lu().solve(&load).unwrap();

    assert_relative_eq!(dx[0], 0.0, epsilon = 1e-12);
    for i in 0..3 {
        assert_relative_eq!(dx[i + 1], q[i], epsilon = 1e-10);
    }
    assert_relative_eq!(dx[4], 0.5 * dx[1] + 0.5 * dx[2] + 0.1, epsilon = 1e-12);

    dofs.apply_increment(&dx).unwrap();
    assert_relative_eq!(dofs.value(4), 0.5 * dofs.value(1) + 0.5 * dofs.value(2) + 0.1, epsilon = 1e-12);

    // Second iteration from the converged state: the gap is closed, the
    // structure is reused and the relation stays satisfied.
    let report = builder
        .build_and_solve(&elements, &loads, &constraints, &dofs, apply_fixed_dofs)
        .unwrap();
    let dx = &report.system.dx;
    assert_relative_eq!(dx[4], 0.5 * dx[1] + 0.5 * dx[2], epsilon = 1e-12);
    assert!(builder.solver().is_analyzed());
}

#[test]
fn inactive_constraint_leaves_system_unconstrained() {
    let elements = spring_chain(3);
    let loads = vec![DenseContribution::point_load(2, 1.0)];
    let constraints = vec![LinearConstraint::tie(2, 1).with_active(false)];
    let mut dofs = DofSet::zeros(3);
    dofs.fix(0, 0.0).unwrap();

    let mut builder = BuilderAndSolver::new(DenseLUSolver::new(), BuilderConfig::default());
    builder.set_up_system(&constraints, &dofs).unwrap();
    assert!(!builder.policy().is_constrained());
    builder.set_up_structure(3, &elements, &loads).unwrap();

    let report = builder
        .build_and_solve(&elements, &loads, &constraints, &dofs, apply_fixed_dofs)
        .unwrap();
    assert_relative_eq!(report.system.dx[1], 1.0, epsilon = 1e-12);
    assert_relative_eq!(report.system.dx[2], 2.0, epsilon = 1e-12);
    assert_eq!(report.n_slaves, 0);
}
