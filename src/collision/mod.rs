//! Collision distance queries.
//!
//! The IK collision factors consume signed distances and their gradients with respect to the
//! joint configuration through [`CollisionQuery`]. [`RobotCollision`] implements it for
//! primitive shapes attached to the links of a [`KinematicModel`](crate::kinematics::KinematicModel).
//!
//! Distances are positive when separated and negative when interpenetrating.

use nalgebra::DVector;
use thiserror::Error;
use tracing::error;

use crate::kinematics::KinematicsError;

pub mod geometry;
pub mod robot;

pub use geometry::{Contact, Geometry, Shape, signed_distance};
pub use robot::{LinkGeometry, RobotCollision};

#[derive(Debug, Clone, Error)]
pub enum CollisionError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Distance between {0} and {1} is not supported")]
    UnsupportedPair(&'static str, &'static str),

    #[error("Collision pair ({0}, {1}) references a missing shape")]
    InvalidPair(usize, usize),

    #[error(transparent)]
    Kinematics(#[from] KinematicsError),
}

impl CollisionError {
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

pub type CollisionResult<T> = Result<T, CollisionError>;

/// Signed distance of one robot shape to an obstacle.
#[derive(Debug, Clone)]
pub struct Distance {
    pub distance: f64,
    /// `∂distance/∂q`
    pub gradient: DVector<f64>,
}

/// Signed distance between two robot shapes.
#[derive(Debug, Clone)]
pub struct PairDistance {
    /// Indices of the two shapes
    pub pair: (usize, usize),
    pub distance: f64,
    /// `∂distance/∂q`
    pub gradient: DVector<f64>,
}

/// Configuration-dependent signed distances.
pub trait CollisionQuery: Send + Sync {
    fn num_self_pairs(&self) -> usize;

    /// One entry per checked pair, in a fixed order.
    fn self_distances(&self, q: &DVector<f64>) -> CollisionResult<Vec<PairDistance>>;

    /// Number of entries [`world_distances`](Self::world_distances) returns for `obstacle`.
    fn num_world_pairs(&self, obstacle: &Geometry) -> usize;

    /// One entry per robot shape that can be checked against `obstacle`, in a fixed order.
    /// The obstacle is given in the model root frame.
    fn world_distances(
        &self,
        q: &DVector<f64>,
        obstacle: &Geometry,
    ) -> CollisionResult<Vec<Distance>>;
}
