//! Optimization variables on manifolds.
//!
//! A [`Variable`] pairs a manifold value with the set of tangent DOFs that are held fixed.
//! Updates are applied in the tangent space, `x ← x ⊞ δ`, with the fixed components of `δ`
//! zeroed first. A floating robot base that may only yaw and translate in the plane is an
//! SE(3) variable with `{tz, rx, ry}` fixed.
//!
//! ```
//! use apex_ik::core::variable::Variable;
//! use apex_ik::manifold::{se3::{SE3, SE3Tangent}, so3::SO3};
//! use nalgebra::Vector6;
//!
//! let mut base = Variable::new(SE3::identity()).with_fixed_indices([2, 3, 4]);
//! assert!(base.is_fixed(2) && !base.is_fixed(5));
//!
//! base.apply_step(&SE3Tangent::new(Vector6::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.3)));
//! assert!((base.value.rotation_so3().angular_distance(&SO3::identity()) - 0.3).abs() < 1e-12);
//! ```

use std::collections::BTreeSet;

use crate::manifold::{LieGroup, Tangent, rn::Rn};
use nalgebra::DVector;

/// A manifold value plus the tangent indices it may not move along.
#[derive(Clone, Debug)]
pub struct Variable<M: LieGroup> {
    /// The manifold value
    pub value: M,
    /// Tangent indices that stay constant during optimization
    pub fixed_indices: BTreeSet<usize>,
}

impl<M> Variable<M>
where
    M: LieGroup + Clone + 'static,
    M::TangentVector: Tangent<M>,
{
    pub fn new(value: M) -> Self {
        Variable {
            value,
            fixed_indices: BTreeSet::new(),
        }
    }

    pub fn with_fixed_indices(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.fixed_indices.extend(indices);
        self
    }

    /// Degrees of freedom (tangent space dimension).
    pub fn get_size(&self) -> usize {
        self.value.tangent_dim()
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.fixed_indices.contains(&index)
    }

    /// `x ⊞ δ` without modifying the variable.
    pub fn plus(&self, tangent: &M::TangentVector) -> M {
        self.value.plus(tangent, None, None)
    }

    /// `self ⊟ other`
    pub fn minus(&self, other: &Self) -> M::TangentVector {
        self.value.minus(&other.value, None, None)
    }

    /// Retract the variable along `tangent`. Callers zero the fixed components beforehand.
    pub fn apply_step(&mut self, tangent: &M::TangentVector) {
        let mut value = self.plus(tangent);
        value.normalize();
        self.value = value;
    }
}

impl Variable<Rn> {
    pub fn to_vector(&self) -> DVector<f64> {
        self.value.data().clone()
    }

    pub fn from_vector(values: DVector<f64>) -> Self {
        Self::new(Rn::new(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{
        rn::RnTangent,
        se3::{SE3, SE3Tangent},
    };
    use nalgebra::{Vector3, Vector6, dvector};

    #[test]
    fn test_variable_size_follows_manifold() {
        assert_eq!(Variable::from_vector(dvector![1.0, 2.0, 3.0, 4.0]).get_size(), 4);
        assert_eq!(Variable::new(SE3::identity()).get_size(), SE3::DOF);
    }

    #[test]
    fn test_variable_rn_step_is_addition() {
        let mut joints = Variable::from_vector(dvector![0.1, 0.2]);
        joints.apply_step(&RnTangent::new(dvector![0.5, -0.2]));
        assert!((joints.to_vector() - dvector![0.6, 0.0]).norm() < 1e-12);
    }

    #[test]
    fn test_variable_se3_step_uses_right_plus() {
        let start = SE3::from_translation_euler(1.0, 0.0, 0.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let mut base = Variable::new(start);
        // A body-frame x step moves along world y after a quarter turn about z
        base.apply_step(&SE3Tangent::new(Vector6::new(0.5, 0.0, 0.0, 0.0, 0.0, 0.0)));
        assert!((base.value.translation() - Vector3::new(1.0, 0.5, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_variable_plus_minus_roundtrip() {
        let a = Variable::new(SE3::from_translation_euler(0.3, -0.2, 0.1, 0.2, 0.1, -0.4));
        let b = Variable::new(SE3::from_translation_euler(-0.5, 0.4, 1.0, -0.3, 0.2, 0.9));
        let delta = a.minus(&b);
        let moved = b.plus(&delta);
        assert!(moved.is_approx(&a.value, 1e-10));
    }
}
