//! Kinematic tree with revolute, prismatic and fixed joints.
//!
//! Link 0 is the root. Joint `i` connects its parent link to child link `i + 1`, so a link
//! is always listed after its parent and forward kinematics is a single pass. Actuated
//! joints (non-fixed) take their positions from the configuration vector in declaration
//! order.

use nalgebra::{DMatrix, DVector, Unit, UnitQuaternion, Vector3};
use tracing::debug;

use crate::kinematics::{JointLimits, KinematicModel, KinematicsError, KinematicsResult};
use crate::manifold::{LieGroup, se3::SE3};

#[derive(Debug, Clone, PartialEq)]
pub enum JointKind {
    /// Rotation about a unit axis in the joint frame
    Revolute { axis: Vector3<f64> },
    /// Translation along a unit axis in the joint frame
    Prismatic { axis: Vector3<f64> },
    Fixed,
}

/// A joint and the link it carries.
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    /// Parent link index
    pub parent: usize,
    /// Transform from the parent link frame to the joint frame
    pub origin: SE3,
    pub kind: JointKind,
    pub lower: f64,
    pub upper: f64,
    pub max_velocity: f64,
}

impl Joint {
    pub fn revolute(name: &str, parent: usize, origin: SE3, axis: Vector3<f64>) -> Self {
        Self::with_kind(name, parent, origin, JointKind::Revolute { axis })
    }

    pub fn prismatic(name: &str, parent: usize, origin: SE3, axis: Vector3<f64>) -> Self {
        Self::with_kind(name, parent, origin, JointKind::Prismatic { axis })
    }

    pub fn fixed(name: &str, parent: usize, origin: SE3) -> Self {
        Self::with_kind(name, parent, origin, JointKind::Fixed)
    }

    fn with_kind(name: &str, parent: usize, origin: SE3, kind: JointKind) -> Self {
        Joint {
            name: name.to_string(),
            parent,
            origin,
            kind,
            lower: -std::f64::consts::PI,
            upper: std::f64::consts::PI,
            max_velocity: 10.0,
        }
    }

    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn with_max_velocity(mut self, max_velocity: f64) -> Self {
        self.max_velocity = max_velocity;
        self
    }

    pub fn is_actuated(&self) -> bool {
        !matches!(self.kind, JointKind::Fixed)
    }

    /// Motion of the child frame relative to the joint frame at position `value`.
    fn motion(&self, value: f64) -> SE3 {
        match &self.kind {
            JointKind::Revolute { axis } => SE3::new(
                Vector3::zeros(),
                UnitQuaternion::from_axis_angle(&Unit::new_unchecked(*axis), value),
            ),
            JointKind::Prismatic { axis } => SE3::from_translation(axis * value),
            JointKind::Fixed => SE3::identity(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KinematicTree {
    joints: Vec<Joint>,
    /// Actuated index of each joint, `None` for fixed joints
    actuated_index: Vec<Option<usize>>,
    limits: JointLimits,
}

impl KinematicTree {
    /// Validate the joints and build the tree.
    ///
    /// Axes are normalized. Fails on a parent that is not an earlier link, a zero axis,
    /// `lower > upper`, a negative velocity bound or a non-finite value.
    pub fn new(mut joints: Vec<Joint>) -> KinematicsResult<Self> {
        let mut actuated_index = Vec::with_capacity(joints.len());
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut velocity = Vec::new();

        for (i, joint) in joints.iter_mut().enumerate() {
            if joint.parent > i {
                return Err(KinematicsError::InvalidModel(format!(
                    "joint '{}' (child link {}) has parent link {} which is not declared yet",
                    joint.name,
                    i + 1,
                    joint.parent
                ))
                .log());
            }
            if !joint.origin.is_valid(1e-6) {
                return Err(KinematicsError::InvalidModel(format!(
                    "joint '{}' has an invalid origin",
                    joint.name
                ))
                .log());
            }

            if let JointKind::Revolute { axis } | JointKind::Prismatic { axis } = &mut joint.kind {
                let norm = axis.norm();
                if !norm.is_finite() || norm < 1e-12 {
                    return Err(KinematicsError::InvalidModel(format!(
                        "joint '{}' has a degenerate axis",
                        joint.name
                    ))
                    .log());
                }
                *axis /= norm;
            }

            if !joint.is_actuated() {
                actuated_index.push(None);
                continue;
            }
            if !(joint.lower <= joint.upper) || !(joint.max_velocity >= 0.0) {
                return Err(KinematicsError::InvalidModel(format!(
                    "joint '{}' has invalid limits [{}, {}] / velocity {}",
                    joint.name, joint.lower, joint.upper, joint.max_velocity
                ))
                .log());
            }
            actuated_index.push(Some(lower.len()));
            lower.push(joint.lower);
            upper.push(joint.upper);
            velocity.push(joint.max_velocity);
        }

        debug!(
            "Kinematic tree: {} links, {} actuated joints",
            joints.len() + 1,
            lower.len()
        );

        Ok(KinematicTree {
            joints,
            actuated_index,
            limits: JointLimits {
                lower: DVector::from_vec(lower),
                upper: DVector::from_vec(upper),
                velocity: DVector::from_vec(velocity),
            },
        })
    }

    /// Six-joint anthropomorphic arm: base yaw, shoulder and elbow pitch, then a
    /// roll-pitch-yaw wrist and a fixed tool flange. The zero configuration has the upper
    /// arm vertical and the forearm horizontal. The tool flange is the last link.
    pub fn reference_arm() -> KinematicsResult<Self> {
        let x = Vector3::x();
        let y = Vector3::y();
        let z = Vector3::z();
        let offset = |tx, ty, tz| SE3::from_translation(Vector3::new(tx, ty, tz));
        Self::new(vec![
            Joint::revolute("base_yaw", 0, offset(0.0, 0.0, 0.3), z),
            Joint::revolute("shoulder", 1, offset(0.0, 0.0, 0.1), y),
            Joint::revolute("elbow", 2, offset(0.05, 0.0, 0.4), y),
            Joint::revolute("wrist_roll", 3, offset(0.35, 0.0, 0.05), x),
            Joint::revolute("wrist_pitch", 4, offset(0.05, 0.0, 0.0), y),
            Joint::revolute("wrist_yaw", 5, offset(0.08, 0.0, 0.0), z),
            Joint::fixed("flange", 6, offset(0.1, 0.0, 0.0)),
        ])
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    /// Link carried by the named joint.
    pub fn link_index(&self, joint_name: &str) -> Option<usize> {
        self.joints
            .iter()
            .position(|j| j.name == joint_name)
            .map(|i| i + 1)
    }

    /// Clamp positions into the joint limits.
    pub fn clamp(&self, q: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            q.len(),
            q.iter()
                .zip(self.limits.lower.iter().zip(self.limits.upper.iter()))
                .map(|(v, (lo, hi))| v.clamp(*lo, *hi)),
        )
    }

    fn check_configuration(&self, q: &DVector<f64>) -> KinematicsResult<()> {
        if q.len() != self.limits.len() {
            return Err(KinematicsError::ConfigurationSize {
                expected: self.limits.len(),
                actual: q.len(),
            }
            .log());
        }
        if let Some(i) = q.iter().position(|v| !v.is_finite()) {
            return Err(KinematicsError::NonFinite(i).log());
        }
        Ok(())
    }

    fn check_link(&self, link: usize) -> KinematicsResult<()> {
        if link >= self.num_links() {
            return Err(KinematicsError::LinkOutOfRange {
                link,
                num_links: self.num_links(),
            }
            .log());
        }
        Ok(())
    }

    /// Link poses plus the joint frames (parent pose composed with the joint origin).
    fn frames(&self, q: &DVector<f64>) -> (Vec<SE3>, Vec<SE3>) {
        let mut links = Vec::with_capacity(self.num_links());
        let mut joint_frames = Vec::with_capacity(self.joints.len());
        links.push(SE3::identity());

        for (joint, index) in self.joints.iter().zip(&self.actuated_index) {
            let value = index.map_or(0.0, |i| q[i]);
            let frame = links[joint.parent].compose(&joint.origin, None, None);
            links.push(frame.compose(&joint.motion(value), None, None));
            joint_frames.push(frame);
        }
        (links, joint_frames)
    }
}

impl KinematicModel for KinematicTree {
    fn num_actuated_joints(&self) -> usize {
        self.limits.len()
    }

    fn num_links(&self) -> usize {
        self.joints.len() + 1
    }

    fn forward(&self, q: &DVector<f64>) -> KinematicsResult<Vec<SE3>> {
        self.check_configuration(q)?;
        Ok(self.frames(q).0)
    }

    fn jacobian(&self, q: &DVector<f64>, link: usize) -> KinematicsResult<DMatrix<f64>> {
        self.check_configuration(q)?;
        self.check_link(link)?;

        let (links, joint_frames) = self.frames(q);
        let target = links[link].translation();
        let mut jac = DMatrix::zeros(6, self.num_actuated_joints());

        // Walk from the link up to the root through the joints that carry it
        let mut current = link;
        while current > 0 {
            let joint_idx = current - 1;
            let joint = &self.joints[joint_idx];
            if let Some(col) = self.actuated_index[joint_idx] {
                let frame = &joint_frames[joint_idx];
                match &joint.kind {
                    JointKind::Revolute { axis } => {
                        let world_axis = frame.rotation_quaternion() * axis;
                        let linear = world_axis.cross(&(target - frame.translation()));
                        jac.fixed_view_mut::<3, 1>(0, col).copy_from(&linear);
                        jac.fixed_view_mut::<3, 1>(3, col).copy_from(&world_axis);
                    }
                    JointKind::Prismatic { axis } => {
                        let world_axis = frame.rotation_quaternion() * axis;
                        jac.fixed_view_mut::<3, 1>(0, col).copy_from(&world_axis);
                    }
                    JointKind::Fixed => {}
                }
            }
            current = joint.parent;
        }
        Ok(jac)
    }

    fn joint_limits(&self) -> &JointLimits {
        &self.limits
    }
}
