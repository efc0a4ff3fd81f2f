//! IK entry points.

use std::sync::Arc;

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::collision::{CollisionQuery, Geometry};
use crate::core::problem::VariableEnum;
use crate::core::CoreError;
use crate::error::ApexIkResult;
use crate::factors::PoseTarget;
use crate::ik::{
    BASE_VARIABLE, CollisionIkWeights, IkConfig, IkOptions, IkProblem, IkWeights,
    JOINTS_VARIABLE, SolveReport,
};
use crate::kinematics::KinematicModel;
use crate::manifold::se3::SE3;
use crate::optimizer::LevenbergMarquardt;
use std::collections::HashMap;

/// Result of [`solve_ik`].
#[derive(Debug, Clone)]
pub struct IkSolution {
    /// Identity unless a floating base was modeled
    pub base_pose: SE3,
    pub joints: DVector<f64>,
    pub report: SolveReport,
}

/// Result of [`solve_ik_with_coll`].
#[derive(Debug, Clone)]
pub struct CollisionIkSolution {
    pub joints: DVector<f64>,
    pub report: SolveReport,
}

/// Solve for joints (and the floating base, if `options.base` is set) that bring every
/// target link to its target pose.
///
/// Targets and the floating base pose share one world frame; the link poses are composed
/// onto the base. Without a base, targets are in the model root frame.
///
/// Returns an error only for malformed input or a failure inside the model; non-convergence
/// is reported through [`SolveReport::status`].
///
/// ```
/// use apex_ik::factors::PoseTarget;
/// use apex_ik::ik::{IkOptions, IkWeights, solve_ik};
/// use apex_ik::kinematics::{KinematicModel, KinematicTree};
/// use nalgebra::{DVector, dvector};
/// use std::sync::Arc;
/// # fn example() -> apex_ik::error::ApexIkResult<()> {
///
/// let model: Arc<dyn KinematicModel> = Arc::new(KinematicTree::reference_arm()?);
/// let flange = model.num_links() - 1;
/// let goal = dvector![0.2, -0.3, 0.4, 0.1, 0.3, -0.2];
/// let target = PoseTarget::new(flange, model.link_pose(&goal, flange)?);
///
/// let solution = solve_ik(
///     &model,
///     &[target],
///     &DVector::zeros(6),
///     &IkWeights::from_pos_rot(50.0, 10.0),
///     &IkOptions::new(),
/// )?;
/// assert!(solution.report.is_converged());
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn solve_ik(
    model: &Arc<dyn KinematicModel>,
    targets: &[PoseTarget],
    initial: &DVector<f64>,
    weights: &IkWeights,
    options: &IkOptions,
) -> ApexIkResult<IkSolution> {
    let ik_problem = IkProblem::build(model, targets, initial, weights, options)?;
    let (parameters, report) = run(ik_problem, &options.config)?;

    let base_pose = if options.base.is_some() {
        match parameters.get(BASE_VARIABLE) {
            Some(VariableEnum::SE3(var)) => var.value.clone(),
            _ => return Err(missing_variable(BASE_VARIABLE)),
        }
    } else {
        SE3::identity()
    };
    let joints = joints_of(&parameters)?;

    Ok(IkSolution {
        base_pose,
        joints,
        report,
    })
}

/// Like [`solve_ik`] without a floating base, adding self-collision and world-collision
/// margins. Obstacles are given in the model root frame.
///
/// Use [`IkConfig::collision`] for the usual settings of this solve.
pub fn solve_ik_with_coll(
    model: &Arc<dyn KinematicModel>,
    targets: &[PoseTarget],
    collision: &Arc<dyn CollisionQuery>,
    obstacles: &[Geometry],
    initial: &DVector<f64>,
    weights: &CollisionIkWeights,
    config: &IkConfig,
) -> ApexIkResult<CollisionIkSolution> {
    let ik_problem =
        IkProblem::build_with_collision(model, targets, collision, obstacles, initial, weights)?;
    let (parameters, report) = run(ik_problem, config)?;
    let joints = joints_of(&parameters)?;
    Ok(CollisionIkSolution { joints, report })
}

fn run(
    ik_problem: IkProblem,
    config: &IkConfig,
) -> ApexIkResult<(HashMap<String, VariableEnum>, SolveReport)> {
    let (problem, initial_values) = ik_problem.into_problem();
    let mut solver = LevenbergMarquardt::with_config(config.to_optimizer_config());
    let result = solver.optimize(&problem, &initial_values)?;
    let report = SolveReport::from(&result);

    if report.is_converged() {
        debug!("IK solved: {}", report);
    } else {
        warn!("IK did not converge: {}", report);
    }
    Ok((result.parameters, report))
}

fn joints_of(parameters: &HashMap<String, VariableEnum>) -> ApexIkResult<DVector<f64>> {
    match parameters.get(JOINTS_VARIABLE) {
        Some(VariableEnum::Rn(var)) => Ok(var.to_vector()),
        _ => Err(missing_variable(JOINTS_VARIABLE)),
    }
}

fn missing_variable(name: &str) -> crate::error::ApexIkError {
    CoreError::Variable(format!("solver result has no {name} variable of the expected type"))
        .log()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ik::BasePose;
    use crate::kinematics::KinematicTree;
    use crate::linalg::LinearSolverType;
    use crate::manifold::LieGroup;
    use nalgebra::{Vector3, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn arm() -> Result<Arc<dyn KinematicModel>, Box<dyn std::error::Error>> {
        Ok(Arc::new(KinematicTree::reference_arm()?))
    }

    #[test]
    fn test_reachable_target_with_dense_backend() -> TestResult {
        let model = arm()?;
        let flange = model.num_links() - 1;
        let goal = dvector![0.3, 0.2, -0.3, 0.2, -0.4, 0.1];
        let target = PoseTarget::new(flange, model.link_pose(&goal, flange)?);

        let weights = IkWeights::from_pos_rot(50.0, 10.0)
            .with_rest_weight(0.0)
            .with_limit_weight(0.0);
        let options = IkOptions::new()
            .with_config(IkConfig::new().with_linear_solver_type(LinearSolverType::DenseCholesky));
        let solution = solve_ik(&model, &[target.clone()], &DVector::zeros(6), &weights, &options)?;

        let reached = model.link_pose(&solution.joints, flange)?;
        let error = target.pose.between(&reached).log(None);
        assert!(error.coeffs().norm() < 1e-4, "pose error {}", error.coeffs().norm());
        assert!(solution.report.final_cost < solution.report.initial_cost);
        assert!(solution.base_pose.is_approx(&SE3::identity(), 1e-12));
        Ok(())
    }

    #[test]
    fn test_locked_base_dofs_stay_put() -> TestResult {
        let model = arm()?;
        let flange = model.num_links() - 1;
        // Target shifted in the plane and raised: the locked tz cannot absorb the rise
        let home = model.link_pose(&DVector::zeros(6), flange)?;
        let shift = SE3::from_translation(Vector3::new(0.3, -0.2, 0.05));
        let target = PoseTarget::new(flange, shift.compose(&home, None, None));

        let base = BasePose::planar(SE3::from_translation(Vector3::new(0.0, 0.0, 0.25)));
        let options = IkOptions::new().with_base(base);
        let solution = solve_ik(
            &model,
            &[target],
            &DVector::zeros(6),
            &IkWeights::from_pos_rot(10.0, 1.0),
            &options,
        )?;

        let base_pose = solution.base_pose;
        assert!((base_pose.translation().z - 0.25).abs() < 1e-12);
        let rotated_z = base_pose.rotation_matrix() * Vector3::z();
        assert!((rotated_z - Vector3::z()).norm() < 1e-9);
        assert!(solution.report.final_cost < solution.report.initial_cost);
        Ok(())
    }
}
