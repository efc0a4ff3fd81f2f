//! Collision avoidance factors.
//!
//! Both factors apply the same hinge to signed distances from a [`CollisionQuery`]:
//!
//! ```text
//! r_k = sqrt(w) · max(0, margin − d_k)        ∂r_k/∂q = −sqrt(w) · ∇d_kᵀ   (when active)
//! ```
//!
//! Penetration (`d < 0`) just extends the linear branch.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::collision::{CollisionQuery, Geometry};
use crate::error::ApexIkResult;
use crate::factors::{Factor, FactorError, check_param};

/// Hinge over `(distance, gradient)` pairs, expecting exactly `rows` of them.
fn margin_hinge<'a>(
    distances: impl ExactSizeIterator<Item = (f64, &'a DVector<f64>)>,
    rows: usize,
    num_joints: usize,
    margin: f64,
    sqrt_weight: f64,
    compute_jacobian: bool,
) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
    if distances.len() != rows {
        return Err(FactorError::InvalidDimension {
            expected: rows,
            actual: distances.len(),
        }
        .log()
        .into());
    }

    let mut residual = DVector::zeros(rows);
    let mut jacobian = compute_jacobian.then(|| DMatrix::zeros(rows, num_joints));
    for (k, (distance, gradient)) in distances.enumerate() {
        let violation = margin - distance;
        if violation <= 0.0 || sqrt_weight == 0.0 {
            continue;
        }
        residual[k] = sqrt_weight * violation;
        if let Some(jac) = jacobian.as_mut() {
            if gradient.len() != num_joints {
                return Err(FactorError::InvalidDimension {
                    expected: num_joints,
                    actual: gradient.len(),
                }
                .log()
                .into());
            }
            jac.row_mut(k).copy_from(&(gradient.transpose() * -sqrt_weight));
        }
    }
    Ok((residual, jacobian))
}

/// Keeps every checked pair of robot shapes at least `margin` apart.
pub struct SelfCollisionFactor {
    query: Arc<dyn CollisionQuery>,
    num_joints: usize,
    margin: f64,
    sqrt_weight: f64,
}

impl SelfCollisionFactor {
    pub fn new(query: Arc<dyn CollisionQuery>, num_joints: usize, margin: f64, weight: f64) -> Self {
        SelfCollisionFactor {
            query,
            num_joints,
            margin,
            sqrt_weight: weight.max(0.0).sqrt(),
        }
    }
}

impl Factor for SelfCollisionFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        check_param(params, 1, 0, self.num_joints)?;
        let pairs = self.query.self_distances(&params[0])?;
        margin_hinge(
            pairs.iter().map(|p| (p.distance, &p.gradient)),
            self.get_dimension(),
            self.num_joints,
            self.margin,
            self.sqrt_weight,
            compute_jacobian,
        )
    }

    fn get_dimension(&self) -> usize {
        self.query.num_self_pairs()
    }
}

/// Keeps every robot shape at least `margin` away from one static obstacle.
pub struct WorldCollisionFactor {
    query: Arc<dyn CollisionQuery>,
    obstacle: Geometry,
    num_joints: usize,
    margin: f64,
    sqrt_weight: f64,
}

impl WorldCollisionFactor {
    pub fn new(
        query: Arc<dyn CollisionQuery>,
        obstacle: Geometry,
        num_joints: usize,
        margin: f64,
        weight: f64,
    ) -> Self {
        WorldCollisionFactor {
            query,
            obstacle,
            num_joints,
            margin,
            sqrt_weight: weight.max(0.0).sqrt(),
        }
    }

    pub fn obstacle(&self) -> &Geometry {
        &self.obstacle
    }
}

impl Factor for WorldCollisionFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        check_param(params, 1, 0, self.num_joints)?;
        let distances = self.query.world_distances(&params[0], &self.obstacle)?;
        margin_hinge(
            distances.iter().map(|d| (d.distance, &d.gradient)),
            self.get_dimension(),
            self.num_joints,
            self.margin,
            self.sqrt_weight,
            compute_jacobian,
        )
    }

    fn get_dimension(&self) -> usize {
        self.query.num_world_pairs(&self.obstacle)
    }
}
