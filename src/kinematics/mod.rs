//! Kinematic models.
//!
//! The IK factors only see a robot through [`KinematicModel`]: link poses and world-frame
//! geometric Jacobians as functions of the actuated joint vector. [`KinematicTree`] is the
//! concrete model shipped with the crate.

use nalgebra::{DMatrix, DVector, Vector3};
use thiserror::Error;
use tracing::error;

use crate::manifold::{se3::SE3, skew};

pub mod tree;

pub use tree::{Joint, JointKind, KinematicTree};

#[derive(Debug, Clone, Error)]
pub enum KinematicsError {
    #[error("Link index {link} out of range for a model with {num_links} links")]
    LinkOutOfRange { link: usize, num_links: usize },

    #[error("Configuration has {actual} entries, model has {expected} actuated joints")]
    ConfigurationSize { expected: usize, actual: usize },

    #[error("Non-finite joint value at index {0}")]
    NonFinite(usize),

    #[error("Invalid kinematic model: {0}")]
    InvalidModel(String),
}

impl KinematicsError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

pub type KinematicsResult<T> = Result<T, KinematicsError>;

/// Position and velocity bounds of the actuated joints.
#[derive(Debug, Clone, PartialEq)]
pub struct JointLimits {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
    /// Non-negative velocity magnitude bounds (rad/s or m/s)
    pub velocity: DVector<f64>,
}

impl JointLimits {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// `lower ≤ q ≤ upper` for every joint.
    pub fn contains(&self, q: &DVector<f64>) -> bool {
        q.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(v, (lo, hi))| *lo <= *v && *v <= *hi)
    }
}

/// Joint vector → link poses, plus geometric Jacobians.
///
/// Link poses are expressed in the model root frame. The optional floating base of an IK
/// problem is composed on the left by the caller.
pub trait KinematicModel: Send + Sync {
    fn num_actuated_joints(&self) -> usize;

    fn num_links(&self) -> usize;

    /// One pose per link.
    fn forward(&self, q: &DVector<f64>) -> KinematicsResult<Vec<SE3>>;

    /// 6×n Jacobian of `link`. Rows 0..3 are the linear velocity of the link origin and
    /// rows 3..6 the angular velocity, both in the root frame.
    fn jacobian(&self, q: &DVector<f64>, link: usize) -> KinematicsResult<DMatrix<f64>>;

    fn joint_limits(&self) -> &JointLimits;

    fn link_pose(&self, q: &DVector<f64>, link: usize) -> KinematicsResult<SE3> {
        let num_links = self.num_links();
        self.forward(q)?
            .into_iter()
            .nth(link)
            .ok_or_else(|| KinematicsError::LinkOutOfRange { link, num_links }.log())
    }

    /// 3×n Jacobian of a point rigidly attached to `link`, given in root coordinates.
    fn point_jacobian(
        &self,
        q: &DVector<f64>,
        link: usize,
        point: &Vector3<f64>,
    ) -> KinematicsResult<DMatrix<f64>> {
        let origin = self.link_pose(q, link)?.translation();
        Ok(point_jacobian(&self.jacobian(q, link)?, &origin, point))
    }
}

/// Shift a link Jacobian to a point, `J_p = J_v − [p − o]× J_ω`.
pub fn point_jacobian(
    link_jacobian: &DMatrix<f64>,
    link_origin: &Vector3<f64>,
    point: &Vector3<f64>,
) -> DMatrix<f64> {
    let lever = skew(&(point - link_origin));
    let lever = DMatrix::from_iterator(3, 3, lever.iter().copied());
    link_jacobian.rows(0, 3) - lever * link_jacobian.rows(3, 3)
}
