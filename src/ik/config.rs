//! Weights and options for IK solves.
//!
//! All structs are plain values with `with_*` builders. Weights multiply squared errors, so
//! a residual is scaled by `sqrt(weight)` and a weight of 0 switches its term off.

use std::collections::BTreeSet;

use nalgebra::{DVector, Vector6};
use web_time::Duration;

use crate::ik::{IkError, IkResult};
use crate::linalg::LinearSolverType;
use crate::manifold::se3::SE3;
use crate::optimizer::LevenbergMarquardtConfig;

/// A per-joint weight, either shared by all joints or given per joint.
#[derive(Debug, Clone, PartialEq)]
pub enum JointWeights {
    Uniform(f64),
    PerJoint(DVector<f64>),
}

impl From<f64> for JointWeights {
    fn from(weight: f64) -> Self {
        JointWeights::Uniform(weight)
    }
}

impl From<DVector<f64>> for JointWeights {
    fn from(weights: DVector<f64>) -> Self {
        JointWeights::PerJoint(weights)
    }
}

impl JointWeights {
    /// Expand to `n` validated entries.
    pub(crate) fn resolve(&self, n: usize, what: &'static str) -> IkResult<DVector<f64>> {
        let weights = match self {
            JointWeights::Uniform(w) => DVector::repeat(n, *w),
            JointWeights::PerJoint(w) if w.len() == n => w.clone(),
            JointWeights::PerJoint(w) => {
                return Err(IkError::LengthMismatch {
                    what,
                    expected: n,
                    actual: w.len(),
                }
                .log());
            }
        };
        for &value in weights.iter() {
            check_weight(what, value)?;
        }
        Ok(weights)
    }

    /// True if every entry is zero.
    pub fn is_zero(&self) -> bool {
        match self {
            JointWeights::Uniform(w) => *w == 0.0,
            JointWeights::PerJoint(w) => w.iter().all(|v| *v == 0.0),
        }
    }
}

pub(crate) fn check_weight(what: &'static str, value: f64) -> IkResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(IkError::InvalidWeight { what, value }.log());
    }
    Ok(())
}

pub(crate) fn check_margin(what: &'static str, value: f64) -> IkResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(IkError::InvalidMargin { what, value }.log());
    }
    Ok(())
}

pub(crate) fn check_dt(dt: f64) -> IkResult<()> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(IkError::InvalidTimeStep(dt).log());
    }
    Ok(())
}

/// Engine settings for one IK solve.
#[derive(Debug, Clone)]
pub struct IkConfig {
    pub linear_solver_type: LinearSolverType,
    pub gradient_tolerance: f64,
    pub parameter_tolerance: f64,
    /// Relative cost change of an accepted step below which the solve stops
    pub cost_tolerance: f64,
    pub max_iterations: usize,
    /// Initial Levenberg-Marquardt damping
    pub damping: f64,
    pub timeout: Option<Duration>,
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            linear_solver_type: LinearSolverType::ConjugateGradient,
            gradient_tolerance: 1e-5,
            parameter_tolerance: 1e-5,
            cost_tolerance: 1e-8,
            max_iterations: 50,
            damping: 5e-4,
            timeout: None,
        }
    }
}

impl IkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for collision-aware solves: same tolerances, initial damping 1.0.
    pub fn collision() -> Self {
        Self::default().with_damping(1.0)
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn to_optimizer_config(&self) -> LevenbergMarquardtConfig {
        let config = LevenbergMarquardtConfig::new()
            .with_linear_solver_type(self.linear_solver_type)
            .with_gradient_tolerance(self.gradient_tolerance)
            .with_parameter_tolerance(self.parameter_tolerance)
            .with_cost_tolerance(self.cost_tolerance)
            .with_max_iterations(self.max_iterations)
            .with_damping(self.damping);
        match self.timeout {
            Some(timeout) => config.with_timeout(timeout),
            None => config,
        }
    }
}

/// Factor weights for [`solve_ik`](crate::ik::solve_ik).
#[derive(Debug, Clone, PartialEq)]
pub struct IkWeights {
    /// `[pos×3, rot×3]`, applied to every target
    pub pose: Vector6<f64>,
    pub rest: JointWeights,
    pub limit: JointWeights,
    pub velocity: JointWeights,
    /// Only used when manipulability is enabled in [`IkOptions`]
    pub manipulability: f64,
}

impl IkWeights {
    pub fn new(pose: Vector6<f64>) -> Self {
        Self {
            pose,
            rest: JointWeights::Uniform(0.001),
            limit: JointWeights::Uniform(100.0),
            velocity: JointWeights::Uniform(0.0),
            manipulability: 0.001,
        }
    }

    /// Same position weight on x, y, z and same rotation weight on all three axes.
    pub fn from_pos_rot(pos: f64, rot: f64) -> Self {
        Self::new(Vector6::new(pos, pos, pos, rot, rot, rot))
    }

    pub fn with_rest_weight(mut self, weight: impl Into<JointWeights>) -> Self {
        self.rest = weight.into();
        self
    }

    pub fn with_limit_weight(mut self, weight: impl Into<JointWeights>) -> Self {
        self.limit = weight.into();
        self
    }

    pub fn with_velocity_weight(mut self, weight: impl Into<JointWeights>) -> Self {
        self.velocity = weight.into();
        self
    }

    pub fn with_manipulability_weight(mut self, weight: f64) -> Self {
        self.manipulability = weight;
        self
    }
}

/// Floating base modeled as an SE(3) variable.
#[derive(Debug, Clone)]
pub struct BasePose {
    pub initial: SE3,
    /// Tangent DOFs `[tx, ty, tz, rx, ry, rz]` (body frame) that stay at their initial value
    pub locked: BTreeSet<usize>,
}

impl BasePose {
    /// Fully free base starting at `initial`.
    pub fn new(initial: SE3) -> Self {
        Self {
            initial,
            locked: BTreeSet::new(),
        }
    }

    /// Base that may only translate in its x-y plane and yaw.
    pub fn planar(initial: SE3) -> Self {
        Self::new(initial).with_locked([2, 3, 4])
    }

    pub fn with_locked(mut self, dofs: impl IntoIterator<Item = usize>) -> Self {
        self.locked.extend(dofs);
        self
    }
}

/// Toggles and extra inputs for [`solve_ik`](crate::ik::solve_ik).
#[derive(Debug, Clone)]
pub struct IkOptions {
    pub use_manipulability: bool,
    /// `None` keeps the base at the identity
    pub base: Option<BasePose>,
    /// Time step for the velocity limit factor
    pub dt: f64,
    /// Rest configuration; defaults to the initial configuration
    pub rest: Option<DVector<f64>>,
    pub config: IkConfig,
}

impl Default for IkOptions {
    fn default() -> Self {
        Self {
            use_manipulability: false,
            base: None,
            dt: 0.01,
            rest: None,
            config: IkConfig::default(),
        }
    }
}

impl IkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manipulability(mut self, use_manipulability: bool) -> Self {
        self.use_manipulability = use_manipulability;
        self
    }

    pub fn with_base(mut self, base: BasePose) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_rest(mut self, rest: DVector<f64>) -> Self {
        self.rest = Some(rest);
        self
    }

    pub fn with_config(mut self, config: IkConfig) -> Self {
        self.config = config;
        self
    }
}

/// Factor weights and margins for [`solve_ik_with_coll`](crate::ik::solve_ik_with_coll).
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionIkWeights {
    pub position: f64,
    pub rotation: f64,
    pub rest: JointWeights,
    pub limit: JointWeights,
    pub velocity: JointWeights,
    /// Time step for the velocity limit factor
    pub dt: f64,
    pub self_collision: f64,
    pub self_margin: f64,
    pub world_collision: f64,
    pub world_margin: f64,
}

impl Default for CollisionIkWeights {
    fn default() -> Self {
        Self {
            position: 5.0,
            rotation: 1.0,
            rest: JointWeights::Uniform(0.001),
            limit: JointWeights::Uniform(100.0),
            velocity: JointWeights::Uniform(100.0),
            dt: 0.1,
            self_collision: 5.0,
            self_margin: 0.05,
            world_collision: 10.0,
            world_margin: 0.1,
        }
    }
}

impl CollisionIkWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pose_weights(mut self, position: f64, rotation: f64) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn with_rest_weight(mut self, weight: impl Into<JointWeights>) -> Self {
        self.rest = weight.into();
        self
    }

    /// Sets the limit weight. The velocity weight follows unless set afterwards.
    pub fn with_limit_weight(mut self, weight: impl Into<JointWeights>) -> Self {
        self.limit = weight.into();
        self.velocity = self.limit.clone();
        self
    }

    pub fn with_velocity_weight(mut self, weight: impl Into<JointWeights>) -> Self {
        self.velocity = weight.into();
        self
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_self_collision(mut self, weight: f64, margin: f64) -> Self {
        self.self_collision = weight;
        self.self_margin = margin;
        self
    }

    pub fn with_world_collision(mut self, weight: f64, margin: f64) -> Self {
        self.world_collision = weight;
        self.world_margin = margin;
        self
    }

    pub fn pose_weights(&self) -> Vector6<f64> {
        let (p, r) = (self.position, self.rotation);
        Vector6::new(p, p, p, r, r, r)
    }
}
