//! Turns a validated IK request into a factor list and initial variable values.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::collision::{CollisionQuery, Geometry};
use crate::core::problem::Problem;
use crate::error::ApexIkResult;
use crate::factors::{
    Factor, JointLimitFactor, JointVelocityFactor, ManipulabilityFactor, PoseFactor, PoseTarget,
    RestFactor, SelfCollisionFactor, WorldCollisionFactor,
};
use crate::ik::config::{check_dt, check_margin, check_weight};
use crate::ik::{CollisionIkWeights, IkError, IkOptions, IkResult, IkWeights};
use crate::kinematics::KinematicModel;
use crate::manifold::ManifoldType;

/// Name of the joint configuration variable.
pub const JOINTS_VARIABLE: &str = "joints";
/// Name of the floating base variable.
pub const BASE_VARIABLE: &str = "base";

/// One IK cost term.
pub enum IkFactor {
    PoseMatch(PoseFactor),
    JointLimit(JointLimitFactor),
    JointVelocity(JointVelocityFactor),
    Rest(RestFactor),
    Manipulability(ManipulabilityFactor),
    SelfCollision(SelfCollisionFactor),
    WorldCollision(WorldCollisionFactor),
}

impl IkFactor {
    pub fn kind(&self) -> &'static str {
        match self {
            IkFactor::PoseMatch(_) => "pose",
            IkFactor::JointLimit(_) => "joint_limit",
            IkFactor::JointVelocity(_) => "joint_velocity",
            IkFactor::Rest(_) => "rest",
            IkFactor::Manipulability(_) => "manipulability",
            IkFactor::SelfCollision(_) => "self_collision",
            IkFactor::WorldCollision(_) => "world_collision",
        }
    }

    /// Variables read by the factor, in parameter order.
    pub fn variables(&self) -> Vec<&'static str> {
        match self {
            IkFactor::PoseMatch(f) if f.has_base() => vec![JOINTS_VARIABLE, BASE_VARIABLE],
            _ => vec![JOINTS_VARIABLE],
        }
    }

    fn inner(&self) -> &dyn Factor {
        match self {
            IkFactor::PoseMatch(f) => f,
            IkFactor::JointLimit(f) => f,
            IkFactor::JointVelocity(f) => f,
            IkFactor::Rest(f) => f,
            IkFactor::Manipulability(f) => f,
            IkFactor::SelfCollision(f) => f,
            IkFactor::WorldCollision(f) => f,
        }
    }
}

impl Factor for IkFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        self.inner().linearize(params, compute_jacobian)
    }

    fn get_dimension(&self) -> usize {
        self.inner().get_dimension()
    }
}

/// Factors and initial values of one IK solve.
pub struct IkProblem {
    factors: Vec<IkFactor>,
    initial_values: HashMap<String, (ManifoldType, DVector<f64>)>,
    locked_base_dofs: BTreeSet<usize>,
}

fn check_targets(model: &dyn KinematicModel, targets: &[PoseTarget]) -> IkResult<()> {
    if targets.is_empty() {
        return Err(IkError::EmptyTargets.log());
    }
    let num_links = model.num_links();
    if let Some(target) = targets.iter().find(|t| t.link >= num_links) {
        return Err(IkError::LinkOutOfRange {
            link: target.link,
            num_links,
        }
        .log());
    }
    Ok(())
}

fn check_configuration(what: &'static str, q: &DVector<f64>, n: usize) -> IkResult<()> {
    if q.len() != n {
        return Err(IkError::LengthMismatch {
            what,
            expected: n,
            actual: q.len(),
        }
        .log());
    }
    if q.iter().any(|v| !v.is_finite()) {
        return Err(IkError::NonFinite(what).log());
    }
    Ok(())
}

fn check_pose_weights(weights: &nalgebra::Vector6<f64>) -> IkResult<()> {
    for &w in weights.iter() {
        check_weight("pose weight", w)?;
    }
    Ok(())
}

impl IkProblem {
    /// Plain IK: limit, velocity, rest and pose factors, then manipulability if enabled.
    pub fn build(
        model: &Arc<dyn KinematicModel>,
        targets: &[PoseTarget],
        initial: &DVector<f64>,
        weights: &IkWeights,
        options: &IkOptions,
    ) -> IkResult<Self> {
        let n = model.num_actuated_joints();
        check_targets(model.as_ref(), targets)?;
        check_configuration("initial configuration", initial, n)?;
        let rest = options.rest.as_ref().unwrap_or(initial);
        check_configuration("rest configuration", rest, n)?;
        check_pose_weights(&weights.pose)?;
        let rest_weights = weights.rest.resolve(n, "rest weight")?;
        let limit_weights = weights.limit.resolve(n, "limit weight")?;
        let velocity_weights = weights.velocity.resolve(n, "velocity weight")?;
        check_weight("manipulability weight", weights.manipulability)?;
        check_dt(options.dt)?;

        let mut locked_base_dofs = BTreeSet::new();
        if let Some(base) = &options.base {
            if let Some(&dof) = base.locked.iter().find(|&&dof| dof >= 6) {
                return Err(IkError::InvalidLockedDof(dof).log());
            }
            if base.locked.len() == 6 {
                warn!("All six base DOFs are locked, the base pose will not move");
            }
            locked_base_dofs = base.locked.clone();
        }
        if !options.use_manipulability && weights.manipulability > 0.0 {
            debug!("Manipulability disabled, its weight is ignored");
        }

        let limits = model.joint_limits();
        let mut factors = vec![
            IkFactor::JointLimit(JointLimitFactor::new(
                limits.lower.clone(),
                limits.upper.clone(),
                limit_weights,
            )),
            IkFactor::JointVelocity(JointVelocityFactor::new(
                initial.clone(),
                options.dt,
                limits.velocity.clone(),
                velocity_weights,
            )),
            IkFactor::Rest(RestFactor::new(rest.clone(), rest_weights)),
            IkFactor::PoseMatch(PoseFactor::new(
                Arc::clone(model),
                targets.to_vec(),
                weights.pose,
                options.base.is_some(),
            )),
        ];
        if options.use_manipulability {
            factors.push(IkFactor::Manipulability(ManipulabilityFactor::new(
                Arc::clone(model),
                targets.iter().map(|t| t.link).collect(),
                weights.manipulability,
            )));
        }

        let mut initial_values = HashMap::new();
        initial_values.insert(
            JOINTS_VARIABLE.to_string(),
            (ManifoldType::RN, initial.clone()),
        );
        if let Some(base) = &options.base {
            initial_values.insert(
                BASE_VARIABLE.to_string(),
                (ManifoldType::SE3, DVector::from(base.initial.clone())),
            );
        }

        Ok(Self::logged(IkProblem {
            factors,
            initial_values,
            locked_base_dofs,
        }))
    }

    /// Collision-aware IK: pose, rest, velocity and limit factors, self-collision, then one
    /// world-collision factor per obstacle.
    pub fn build_with_collision(
        model: &Arc<dyn KinematicModel>,
        targets: &[PoseTarget],
        collision: &Arc<dyn CollisionQuery>,
        obstacles: &[Geometry],
        initial: &DVector<f64>,
        weights: &CollisionIkWeights,
    ) -> ApexIkResult<Self> {
        let n = model.num_actuated_joints();
        check_targets(model.as_ref(), targets)?;
        check_configuration("initial configuration", initial, n)?;
        let pose_weights = weights.pose_weights();
        check_pose_weights(&pose_weights)?;
        let rest_weights = weights.rest.resolve(n, "rest weight")?;
        let limit_weights = weights.limit.resolve(n, "limit weight")?;
        let velocity_weights = weights.velocity.resolve(n, "velocity weight")?;
        check_dt(weights.dt)?;
        check_weight("self-collision weight", weights.self_collision)?;
        check_weight("world-collision weight", weights.world_collision)?;
        check_margin("self-collision margin", weights.self_margin)?;
        check_margin("world-collision margin", weights.world_margin)?;
        for obstacle in obstacles {
            obstacle.validate()?;
        }

        let limits = model.joint_limits();
        let mut factors = vec![
            IkFactor::PoseMatch(PoseFactor::new(
                Arc::clone(model),
                targets.to_vec(),
                pose_weights,
                false,
            )),
            IkFactor::Rest(RestFactor::new(initial.clone(), rest_weights)),
            IkFactor::JointVelocity(JointVelocityFactor::new(
                initial.clone(),
                weights.dt,
                limits.velocity.clone(),
                velocity_weights,
            )),
            IkFactor::JointLimit(JointLimitFactor::new(
                limits.lower.clone(),
                limits.upper.clone(),
                limit_weights,
            )),
            IkFactor::SelfCollision(SelfCollisionFactor::new(
                Arc::clone(collision),
                n,
                weights.self_margin,
                weights.self_collision,
            )),
        ];
        for (i, obstacle) in obstacles.iter().enumerate() {
            if collision.num_world_pairs(obstacle) == 0 {
                warn!(
                    "Obstacle {} ({}) has no robot shape to check against, ignoring it",
                    i,
                    obstacle.shape.name()
                );
                continue;
            }
            factors.push(IkFactor::WorldCollision(WorldCollisionFactor::new(
                Arc::clone(collision),
                obstacle.clone(),
                n,
                weights.world_margin,
                weights.world_collision,
            )));
        }

        let mut initial_values = HashMap::new();
        initial_values.insert(
            JOINTS_VARIABLE.to_string(),
            (ManifoldType::RN, initial.clone()),
        );

        Ok(Self::logged(IkProblem {
            factors,
            initial_values,
            locked_base_dofs: BTreeSet::new(),
        }))
    }

    fn logged(problem: IkProblem) -> IkProblem {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let summary: Vec<String> = problem
                .factors
                .iter()
                .map(|f| format!("{}[{}]", f.kind(), f.get_dimension()))
                .collect();
            debug!(
                "Assembled IK problem: {} factors ({}), {} variables",
                problem.factors.len(),
                summary.join(", "),
                problem.initial_values.len()
            );
        }
        problem
    }

    pub fn factors(&self) -> &[IkFactor] {
        &self.factors
    }

    pub fn initial_values(&self) -> &HashMap<String, (ManifoldType, DVector<f64>)> {
        &self.initial_values
    }

    pub fn locked_base_dofs(&self) -> &BTreeSet<usize> {
        &self.locked_base_dofs
    }

    /// Residual blocks in factor order, with the locked base DOFs fixed.
    pub fn into_problem(self) -> (Problem, HashMap<String, (ManifoldType, DVector<f64>)>) {
        let mut problem = Problem::new();
        for factor in self.factors {
            let variables = factor.variables();
            problem.add_residual_block(&variables, Box::new(factor));
        }
        for &dof in &self.locked_base_dofs {
            problem.fix_variable(BASE_VARIABLE, dof);
        }
        (problem, self.initial_values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{CollisionResult, Distance, PairDistance};
    use crate::ik::BasePose;
    use crate::kinematics::tree::KinematicTree;
    use crate::manifold::se3::SE3;
    use nalgebra::Vector3;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    struct NoCollision;

    impl CollisionQuery for NoCollision {
        fn num_self_pairs(&self) -> usize {
            1
        }

        fn self_distances(&self, q: &DVector<f64>) -> CollisionResult<Vec<PairDistance>> {
            Ok(vec![PairDistance {
                pair: (0, 1),
                distance: 1.0,
                gradient: DVector::zeros(q.len()),
            }])
        }

        fn num_world_pairs(&self, obstacle: &Geometry) -> usize {
            if obstacle.radius() > 0.0 { 2 } else { 0 }
        }

        fn world_distances(
            &self,
            q: &DVector<f64>,
            _obstacle: &Geometry,
        ) -> CollisionResult<Vec<Distance>> {
            Ok(vec![
                Distance {
                    distance: 1.0,
                    gradient: DVector::zeros(q.len()),
                };
                2
            ])
        }
    }

    fn arm() -> Result<Arc<dyn KinematicModel>, Box<dyn std::error::Error>> {
        Ok(Arc::new(KinematicTree::reference_arm()?))
    }

    fn flange_target(model: &Arc<dyn KinematicModel>) -> PoseTarget {
        PoseTarget::new(model.num_links() - 1, SE3::identity())
    }

    #[test]
    fn test_plain_factor_order() -> TestResult {
        let model = arm()?;
        let q0 = DVector::zeros(6);
        let targets = [flange_target(&model)];
        let weights = IkWeights::from_pos_rot(1.0, 1.0);

        let problem = IkProblem::build(&model, &targets, &q0, &weights, &IkOptions::new())?;
        let kinds: Vec<_> = problem.factors().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, ["joint_limit", "joint_velocity", "rest", "pose"]);
        assert_eq!(problem.initial_values().len(), 1);

        let options = IkOptions::new()
            .with_manipulability(true)
            .with_base(BasePose::planar(SE3::identity()));
        let problem = IkProblem::build(&model, &targets, &q0, &weights, &options)?;
        let kinds: Vec<_> = problem.factors().iter().map(|f| f.kind()).collect();
        assert_eq!(kinds.last(), Some(&"manipulability"));
        assert_eq!(problem.factors()[3].variables(), vec![JOINTS_VARIABLE, BASE_VARIABLE]);
        assert_eq!(problem.locked_base_dofs().len(), 3);

        let (problem, values) = problem.into_problem();
        assert_eq!(problem.num_residual_blocks(), 5);
        assert_eq!(values[BASE_VARIABLE].1.len(), 7);
        assert_eq!(problem.fixed_variable_indexes[BASE_VARIABLE].len(), 3);
        Ok(())
    }

    #[test]
    fn test_collision_factor_order() -> TestResult {
        let model = arm()?;
        let query: Arc<dyn CollisionQuery> = Arc::new(NoCollision);
        let obstacles = [
            Geometry::sphere(Vector3::new(1.0, 0.0, 0.0), 0.1),
            Geometry::plane(Vector3::zeros(), Vector3::z()),
            Geometry::sphere(Vector3::new(0.0, 1.0, 0.0), 0.2),
        ];
        let problem = IkProblem::build_with_collision(
            &model,
            &[flange_target(&model)],
            &query,
            &obstacles,
            &DVector::zeros(6),
            &CollisionIkWeights::default(),
        )?;
        let kinds: Vec<_> = problem.factors().iter().map(|f| f.kind()).collect();
        // The plane has no checkable pairs in this query and is dropped
        assert_eq!(
            kinds,
            [
                "pose",
                "rest",
                "joint_velocity",
                "joint_limit",
                "self_collision",
                "world_collision",
                "world_collision"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_request_validation() -> TestResult {
        let model = arm()?;
        let q0 = DVector::zeros(6);
        let weights = IkWeights::from_pos_rot(1.0, 1.0);
        let options = IkOptions::new();
        let target = [flange_target(&model)];

        assert!(matches!(
            IkProblem::build(&model, &[], &q0, &weights, &options),
            Err(IkError::EmptyTargets)
        ));
        assert!(matches!(
            IkProblem::build(&model, &[PoseTarget::new(42, SE3::identity())], &q0, &weights, &options),
            Err(IkError::LinkOutOfRange { link: 42, .. })
        ));
        assert!(matches!(
            IkProblem::build(&model, &target, &DVector::zeros(5), &weights, &options),
            Err(IkError::LengthMismatch { expected: 6, actual: 5, .. })
        ));
        assert!(matches!(
            IkProblem::build(&model, &target, &q0, &weights, &options.clone().with_rest(DVector::zeros(2))),
            Err(IkError::LengthMismatch { actual: 2, .. })
        ));
        assert!(matches!(
            IkProblem::build(&model, &target, &q0, &IkWeights::from_pos_rot(-1.0, 1.0), &options),
            Err(IkError::InvalidWeight { .. })
        ));
        assert!(matches!(
            IkProblem::build(&model, &target, &q0, &weights, &options.clone().with_dt(0.0)),
            Err(IkError::InvalidTimeStep(_))
        ));
        assert!(matches!(
            IkProblem::build(
                &model,
                &target,
                &q0,
                &weights,
                &options.clone().with_base(BasePose::new(SE3::identity()).with_locked([6])),
            ),
            Err(IkError::InvalidLockedDof(6))
        ));
        let mut bad = q0.clone();
        bad[0] = f64::NAN;
        assert!(matches!(
            IkProblem::build(&model, &target, &bad, &weights, &options),
            Err(IkError::NonFinite(_))
        ));
        Ok(())
    }

    #[test]
    fn test_negative_margin_is_rejected() -> TestResult {
        let model = arm()?;
        let query: Arc<dyn CollisionQuery> = Arc::new(NoCollision);
        let weights = CollisionIkWeights::default().with_world_collision(10.0, -0.1);
        let result = IkProblem::build_with_collision(
            &model,
            &[flange_target(&model)],
            &query,
            &[],
            &DVector::zeros(6),
            &weights,
        );
        assert!(matches!(
            result,
            Err(crate::error::ApexIkError::Ik(IkError::InvalidMargin { .. }))
        ));
        Ok(())
    }
}
