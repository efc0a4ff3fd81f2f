//! End-to-end IK scenarios on the reference arm.
//!
//! Each test builds a target from a known configuration, so the target is exactly
//! reachable, then checks what the solver recovers:
//!
//! - the plain solve recovers the configuration from a zero initial guess
//! - a collision-aware solve leaves an obstacle the zero configuration intersects
//! - zero weights behave like omitted factors
//! - all linear solver backends agree
//! - malformed requests fail before any iteration
//! - a free floating base absorbs an out-of-reach offset

use std::sync::Arc;

use apex_ik::collision::{CollisionQuery, Geometry, LinkGeometry, RobotCollision};
use apex_ik::error::ApexIkError;
use apex_ik::factors::PoseTarget;
use apex_ik::ik::{
    BasePose, CollisionIkWeights, IkConfig, IkError, IkOptions, IkWeights, solve_ik,
    solve_ik_with_coll,
};
use apex_ik::kinematics::{KinematicModel, KinematicTree};
use apex_ik::linalg::LinearSolverType;
use apex_ik::manifold::LieGroup;
use apex_ik::manifold::se3::SE3;
use nalgebra::{DVector, Vector3, Vector6, dvector};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const UPPER_ARM: usize = 2;
const FOREARM: usize = 3;

fn arm() -> Result<Arc<dyn KinematicModel>, Box<dyn std::error::Error>> {
    Ok(Arc::new(KinematicTree::reference_arm()?))
}

fn flange(model: &Arc<dyn KinematicModel>) -> usize {
    model.num_links() - 1
}

fn target_at(
    model: &Arc<dyn KinematicModel>,
    q: &DVector<f64>,
) -> Result<PoseTarget, Box<dyn std::error::Error>> {
    let link = flange(model);
    Ok(PoseTarget::new(link, model.link_pose(q, link)?))
}

fn pose_error(reached: &SE3, target: &SE3) -> f64 {
    target.between(reached).log(None).coeffs().norm()
}

/// Capsules on the upper arm and forearm plus a sphere on the tool flange.
fn arm_collision(
    model: &Arc<dyn KinematicModel>,
) -> Result<RobotCollision, Box<dyn std::error::Error>> {
    let shapes = vec![
        LinkGeometry::new(
            UPPER_ARM,
            Geometry::capsule_between(Vector3::zeros(), Vector3::new(0.05, 0.0, 0.4), 0.04),
        ),
        LinkGeometry::new(
            FOREARM,
            Geometry::capsule_between(Vector3::zeros(), Vector3::new(0.35, 0.0, 0.05), 0.04),
        ),
        LinkGeometry::new(flange(model), Geometry::sphere(Vector3::zeros(), 0.03)),
    ];
    // The arm segments meet at the elbow, only the flange is checked against the upper arm
    Ok(RobotCollision::new(Arc::clone(model), shapes)?.with_self_pairs(vec![(0, 2)])?)
}

#[test]
fn test_reference_arm_recovers_reachable_configuration() -> TestResult {
    let model = arm()?;
    let q_star = dvector![0.2, -0.3, 0.4, 0.1, 0.3, -0.2];
    let target = target_at(&model, &q_star)?;

    let weights = IkWeights::from_pos_rot(50.0, 10.0)
        .with_rest_weight(0.001)
        .with_limit_weight(100.0);
    let options = IkOptions::new().with_config(IkConfig::new().with_max_iterations(50));
    let solution = solve_ik(&model, &[target], &DVector::zeros(6), &weights, &options)?;

    assert!(solution.report.iterations <= 50);
    let distance = (&solution.joints - &q_star).norm();
    assert!(distance < 1e-3, "distance to q* {distance:.3e}, {}", solution.report);
    Ok(())
}

#[test]
fn test_collision_solve_clears_intersecting_obstacle() -> TestResult {
    let model = arm()?;
    let collision: Arc<dyn CollisionQuery> = Arc::new(arm_collision(&model)?);
    // Sits on the forearm at the zero configuration
    let obstacle = Geometry::sphere(Vector3::new(0.3, 0.0, 0.85), 0.05);
    let q0 = DVector::zeros(6);
    let start = collision.world_distances(&q0, &obstacle)?;
    assert!(start.iter().any(|d| d.distance < 0.0));

    let q_star = dvector![1.2, 0.1, -0.2, 0.0, 0.2, 0.0];
    let target = target_at(&model, &q_star)?;
    let weights = CollisionIkWeights::new().with_velocity_weight(0.0);
    let solution = solve_ik_with_coll(
        &model,
        &[target],
        &collision,
        std::slice::from_ref(&obstacle),
        &q0,
        &weights,
        &IkConfig::collision().with_max_iterations(100),
    )?;

    let min_distance = collision
        .world_distances(&solution.joints, &obstacle)?
        .iter()
        .map(|d| d.distance)
        .fold(f64::INFINITY, f64::min);
    assert!(
        min_distance >= weights.world_margin - 1e-2,
        "min obstacle distance {min_distance:.4}, {}",
        solution.report
    );
    assert!(solution.report.final_cost < solution.report.initial_cost);
    Ok(())
}

#[test]
fn test_zero_weight_matches_omitted_factor() -> TestResult {
    let model = arm()?;
    let target = target_at(&model, &dvector![-0.4, 0.2, 0.3, -0.1, 0.5, 0.2])?;
    let q0 = DVector::zeros(6);
    let weights = IkWeights::from_pos_rot(50.0, 10.0);

    let without = solve_ik(&model, &[target.clone()], &q0, &weights, &IkOptions::new())?;
    let with_zero = solve_ik(
        &model,
        &[target],
        &q0,
        &weights.clone().with_manipulability_weight(0.0),
        &IkOptions::new().with_manipulability(true),
    )?;

    assert!((&without.joints - &with_zero.joints).norm() < 1e-9);
    assert_eq!(without.report.iterations, with_zero.report.iterations);
    assert!((without.report.final_cost - with_zero.report.final_cost).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_zero_rotation_weight_ignores_target_rotation() -> TestResult {
    let model = arm()?;
    let link = flange(&model);
    let reached = model.link_pose(&dvector![0.3, 0.1, -0.2, 0.4, -0.3, 0.1], link)?;
    let position = reached.translation();
    let upright = PoseTarget::new(link, SE3::from_translation(position));
    let tilted = PoseTarget::new(
        link,
        SE3::from_translation_euler(position.x, position.y, position.z, 0.7, -0.4, 1.1),
    );

    let weights = IkWeights::new(Vector6::new(50.0, 50.0, 50.0, 0.0, 0.0, 0.0));
    let q0 = DVector::zeros(6);
    let a = solve_ik(&model, &[upright], &q0, &weights, &IkOptions::new())?;
    let b = solve_ik(&model, &[tilted], &q0, &weights, &IkOptions::new())?;

    assert!((&a.joints - &b.joints).norm() < 1e-9);
    assert!((a.report.final_cost - b.report.final_cost).abs() < 1e-12);
    assert_eq!(a.report.status, b.report.status);
    let end = model.link_pose(&a.joints, link)?.translation();
    assert!((end - position).norm() < 1e-3);
    Ok(())
}

#[test]
fn test_backends_agree() -> TestResult {
    let model = arm()?;
    let target = target_at(&model, &dvector![0.1, 0.2, -0.2, 0.0, 0.3, 0.0])?;
    let weights = IkWeights::from_pos_rot(50.0, 10.0);
    let q0 = DVector::zeros(6);

    let mut solutions = Vec::new();
    for backend in [
        LinearSolverType::SparseCholesky,
        LinearSolverType::ConjugateGradient,
        LinearSolverType::DenseCholesky,
    ] {
        let options =
            IkOptions::new().with_config(IkConfig::new().with_linear_solver_type(backend));
        let solution = solve_ik(&model, &[target.clone()], &q0, &weights, &options)?;
        assert!(solution.report.is_converged(), "{backend:?}: {}", solution.report);
        solutions.push(solution.joints);
    }

    for joints in &solutions[1..] {
        assert!((joints - &solutions[0]).norm() < 1e-5);
    }
    Ok(())
}

#[test]
fn test_malformed_requests_fail_fast() -> TestResult {
    let model = arm()?;
    let target = target_at(&model, &DVector::zeros(6))?;
    let weights = IkWeights::from_pos_rot(1.0, 1.0);
    let q0 = DVector::zeros(6);

    let result = solve_ik(&model, &[], &q0, &weights, &IkOptions::new());
    assert!(matches!(result, Err(ApexIkError::Ik(IkError::EmptyTargets))));

    let far_link = PoseTarget::new(model.num_links(), SE3::identity());
    let result = solve_ik(&model, &[far_link], &q0, &weights, &IkOptions::new());
    assert!(matches!(
        result,
        Err(ApexIkError::Ik(IkError::LinkOutOfRange { .. }))
    ));

    let result = solve_ik(&model, &[target.clone()], &DVector::zeros(5), &weights, &IkOptions::new());
    assert!(matches!(
        result,
        Err(ApexIkError::Ik(IkError::LengthMismatch { expected: 6, actual: 5, .. }))
    ));

    let negative = weights.clone().with_rest_weight(-1.0);
    let result = solve_ik(&model, &[target.clone()], &q0, &negative, &IkOptions::new());
    assert!(matches!(result, Err(ApexIkError::Ik(IkError::InvalidWeight { .. }))));

    let result = solve_ik(&model, &[target.clone()], &q0, &weights, &IkOptions::new().with_dt(0.0));
    assert!(matches!(result, Err(ApexIkError::Ik(IkError::InvalidTimeStep(_)))));

    let base = BasePose::new(SE3::identity()).with_locked([6]);
    let options = IkOptions::new().with_base(base);
    let result = solve_ik(&model, &[target.clone()], &q0, &weights, &options);
    assert!(matches!(result, Err(ApexIkError::Ik(IkError::InvalidLockedDof(6)))));

    let collision: Arc<dyn CollisionQuery> = Arc::new(arm_collision(&model)?);
    let result = solve_ik_with_coll(
        &model,
        &[target],
        &collision,
        &[],
        &q0,
        &CollisionIkWeights::new().with_self_collision(5.0, -0.01),
        &IkConfig::collision(),
    );
    assert!(matches!(result, Err(ApexIkError::Ik(IkError::InvalidMargin { .. }))));
    Ok(())
}

#[test]
fn test_floating_base_reaches_offset_target() -> TestResult {
    let model = arm()?;
    let link = flange(&model);
    let home = model.link_pose(&DVector::zeros(6), link)?;
    // Beyond the reach of the arm alone
    let offset = SE3::from_translation(Vector3::new(1.5, 0.8, 0.2));
    let target = PoseTarget::new(link, offset.compose(&home, None, None));

    let options = IkOptions::new().with_base(BasePose::new(SE3::identity()));
    let solution = solve_ik(
        &model,
        &[target.clone()],
        &DVector::zeros(6),
        &IkWeights::from_pos_rot(50.0, 10.0),
        &options,
    )?;

    let reached = solution
        .base_pose
        .compose(&model.link_pose(&solution.joints, link)?, None, None);
    let error = pose_error(&reached, &target.pose);
    assert!(error < 1e-3, "pose error {error:.3e}, {}", solution.report);
    assert!(solution.base_pose.translation().norm() > 1.0);
    Ok(())
}
