//! Target pose factor.
//!
//! For each target `(link, T*)` with `T = B · T_link(q) = (R, t)` and `T* = (R*, t*)` the
//! residual stacks a position and a rotation error
//!
//! ```text
//! e = [t − t*, log(R*ᵀ R)]
//! ```
//!
//! scaled per dimension by `sqrt(w)` with `w = [pos, pos, pos, rot, rot, rot]`. `B` is the
//! floating base pose when the factor is built with one, otherwise the identity. Targets
//! and `B` share one frame, the world frame the base is placed in. Targets are stacked into
//! one block of `6 · n_targets` rows.
//!
//! The position rows do not depend on the target rotation, so a zero rotation weight
//! removes the target orientation from the problem entirely.
//!
//! Jacobians (right perturbations, `Jv`/`Jω` the rows of the geometric Jacobian, `R_l` the
//! link rotation in the model root, `R_B` and `t_l` the base rotation and link origin):
//!
//! ```text
//! ∂e/∂q    = [R_B · Jv ; Jr⁻¹(θ) · R_lᵀ · Jω]
//! ∂e/∂base = [[R_B, −R_B [t_l]×], [0, Jr⁻¹(θ) · R_lᵀ]]
//! ```

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix3, Vector6};

use crate::error::ApexIkResult;
use crate::factors::{Factor, check_param};
use crate::kinematics::{KinematicModel, KinematicsError};
use crate::manifold::{LieGroup, Tangent, se3::SE3, skew};

/// Desired pose of one link, in the world frame the floating base is placed in (the model
/// root frame when no base is modeled).
#[derive(Debug, Clone)]
pub struct PoseTarget {
    pub link: usize,
    pub pose: SE3,
}

impl PoseTarget {
    pub fn new(link: usize, pose: SE3) -> Self {
        PoseTarget { link, pose }
    }
}

pub struct PoseFactor {
    model: Arc<dyn KinematicModel>,
    targets: Vec<PoseTarget>,
    sqrt_weights: Vector6<f64>,
    with_base: bool,
}

impl PoseFactor {
    /// `weights` is `[pos×3, rot×3]`. With `with_base` the factor reads a second SE(3)
    /// parameter block for the floating base.
    pub fn new(
        model: Arc<dyn KinematicModel>,
        targets: Vec<PoseTarget>,
        weights: Vector6<f64>,
        with_base: bool,
    ) -> Self {
        PoseFactor {
            model,
            targets,
            sqrt_weights: weights.map(|w| w.max(0.0).sqrt()),
            with_base,
        }
    }

    pub fn targets(&self) -> &[PoseTarget] {
        &self.targets
    }

    /// Whether the factor reads a floating base block.
    pub fn has_base(&self) -> bool {
        self.with_base
    }
}

impl Factor for PoseFactor {
    fn linearize(
        &self,
        params: &[DVector<f64>],
        compute_jacobian: bool,
    ) -> ApexIkResult<(DVector<f64>, Option<DMatrix<f64>>)> {
        let n = self.model.num_actuated_joints();
        let blocks = if self.with_base { 2 } else { 1 };
        check_param(params, blocks, 0, n)?;
        let base = if self.with_base {
            check_param(params, blocks, 1, SE3::REP_SIZE)?;
            SE3::from(params[1].clone())
        } else {
            SE3::identity()
        };

        let q = &params[0];
        let link_poses = self.model.forward(q)?;
        let dim = self.get_dimension();
        let cols = n + if self.with_base { 6 } else { 0 };
        let mut residual = DVector::zeros(dim);
        let mut jacobian = compute_jacobian.then(|| DMatrix::zeros(dim, cols));
        let base_rotation = base.rotation_matrix();
        let pos_weights = self.sqrt_weights.fixed_rows::<3>(0).into_owned();
        let rot_weights = self.sqrt_weights.fixed_rows::<3>(3).into_owned();

        for (i, target) in self.targets.iter().enumerate() {
            let link_pose = link_poses.get(target.link).ok_or_else(|| {
                KinematicsError::LinkOutOfRange {
                    link: target.link,
                    num_links: link_poses.len(),
                }
                .log()
            })?;
            let current = base.compose(link_pose, None, None);
            let position_error = current.translation() - target.pose.translation();
            let rotation_error = target
                .pose
                .rotation_so3()
                .between(current.rotation_so3())
                .log(None);
            residual
                .rows_mut(6 * i, 3)
                .copy_from(&pos_weights.component_mul(&position_error));
            residual
                .rows_mut(6 * i + 3, 3)
                .copy_from(&rot_weights.component_mul(&rotation_error.coeffs()));

            if let Some(jac) = jacobian.as_mut() {
                let pos_rows = Matrix3::from_diagonal(&pos_weights) * base_rotation;
                let rot_rows = Matrix3::from_diagonal(&rot_weights)
                    * rotation_error.right_jacobian_inv()
                    * link_pose.rotation_matrix().transpose();

                let geometric = self.model.jacobian(q, target.link)?;
                let to_dynamic = |m: Matrix3<f64>| DMatrix::from_iterator(3, 3, m.iter().copied());
                jac.view_mut((6 * i, 0), (3, n))
                    .copy_from(&(to_dynamic(pos_rows) * geometric.rows(0, 3)));
                jac.view_mut((6 * i + 3, 0), (3, n))
                    .copy_from(&(to_dynamic(rot_rows) * geometric.rows(3, 3)));

                if self.with_base {
                    let lever = -(pos_rows * skew(&link_pose.translation()));
                    jac.fixed_view_mut::<3, 3>(6 * i, n).copy_from(&pos_rows);
                    jac.fixed_view_mut::<3, 3>(6 * i, n + 3).copy_from(&lever);
                    jac.fixed_view_mut::<3, 3>(6 * i + 3, n + 3).copy_from(&rot_rows);
                }
            }
        }

        Ok((residual, jacobian))
    }

    fn get_dimension(&self) -> usize {
        6 * self.targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_utils::numeric_jacobian;
    use crate::kinematics::KinematicTree;
    use crate::manifold::se3::SE3Tangent;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn arm() -> Result<Arc<dyn KinematicModel>, Box<dyn std::error::Error>> {
        Ok(Arc::new(KinematicTree::reference_arm()?))
    }

    #[test]
    fn test_residual_is_zero_at_target() -> TestResult {
        let model = arm()?;
        let q = dvector![0.1, -0.3, 0.5, 0.2, 0.4, -0.1];
        let target = model.link_pose(&q, 7)?;
        let factor = PoseFactor::new(
            model,
            vec![PoseTarget::new(7, target)],
            Vector6::repeat(1.0),
            false,
        );
        let (residual, _) = factor.linearize(&[q], false)?;
        assert!(residual.norm() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_weights_scale_by_square_root() -> TestResult {
        let model = arm()?;
        let target = SE3::from_translation_euler(0.5, 0.1, 0.7, 0.2, 0.0, 0.0);
        let q = DVector::zeros(6);
        let unit = PoseFactor::new(model.clone(), vec![PoseTarget::new(7, target.clone())], Vector6::repeat(1.0), false);
        let weighted = PoseFactor::new(
            model,
            vec![PoseTarget::new(7, target)],
            Vector6::new(4.0, 4.0, 4.0, 0.0, 0.0, 0.0),
            false,
        );
        let (r1, _) = unit.linearize(&[q.clone()], false)?;
        let (r2, _) = weighted.linearize(&[q], false)?;
        for i in 0..3 {
            assert!((r2[i] - 2.0 * r1[i]).abs() < 1e-12);
            assert_eq!(r2[i + 3], 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_zero_rotation_weight_drops_target_orientation() -> TestResult {
        let model = arm()?;
        let weights = Vector6::new(50.0, 50.0, 50.0, 0.0, 0.0, 0.0);
        let upright = SE3::from_translation_euler(0.4, 0.1, 0.6, 0.0, 0.0, 0.0);
        let tilted = SE3::from_translation_euler(0.4, 0.1, 0.6, 0.7, -0.4, 1.1);
        let a = PoseFactor::new(model.clone(), vec![PoseTarget::new(7, upright)], weights, true);
        let b = PoseFactor::new(model, vec![PoseTarget::new(7, tilted)], weights, true);

        let q = dvector![0.2, -0.1, 0.3, 0.5, -0.2, 0.4];
        let base = SE3::from_translation_euler(0.1, 0.2, 0.0, 0.0, 0.0, 0.3);
        let params = [q, base.into()];
        let (ra, ja) = a.linearize(&params, true)?;
        let (rb, jb) = b.linearize(&params, true)?;
        assert_eq!(ra, rb);
        assert_eq!(ja.ok_or("missing jacobian")?, jb.ok_or("missing jacobian")?);
        assert!(ra.norm() > 0.0);
        Ok(())
    }

    #[test]
    fn test_joint_jacobian_matches_finite_difference() -> TestResult {
        let model = arm()?;
        let targets = vec![
            PoseTarget::new(7, SE3::from_translation_euler(0.4, 0.2, 0.6, 0.3, -0.2, 0.5)),
            PoseTarget::new(4, SE3::from_translation_euler(0.2, -0.1, 0.9, 0.0, 0.4, 0.0)),
        ];
        let factor = PoseFactor::new(model, targets, Vector6::new(5.0, 5.0, 5.0, 1.0, 1.0, 1.0), false);
        let q = dvector![0.2, -0.4, 0.7, 0.3, -0.5, 0.9];
        let (_, jac) = factor.linearize(&[q.clone()], true)?;
        let jac = jac.ok_or("missing jacobian")?;
        let numeric = numeric_jacobian(&factor, &[q], 1e-6)?;
        assert_eq!(jac.shape(), (12, 6));
        assert!((jac - numeric).amax() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_base_jacobian_matches_finite_difference() -> TestResult {
        let model = arm()?;
        let target = SE3::from_translation_euler(0.9, 0.4, 0.6, 0.1, 0.2, 0.8);
        let factor = PoseFactor::new(model, vec![PoseTarget::new(7, target)], Vector6::new(2.0, 2.0, 2.0, 0.5, 0.5, 0.5), true);
        let q = dvector![0.3, 0.1, -0.2, 0.4, 0.2, -0.3];
        let base = SE3::from_translation_euler(0.2, -0.1, 0.0, 0.0, 0.0, 0.4);
        let (residual, jac) = factor.linearize(&[q.clone(), base.clone().into()], true)?;
        let jac = jac.ok_or("missing jacobian")?;
        assert_eq!(jac.shape(), (6, 12));

        let h = 1e-6;
        for k in 0..6 {
            let mut delta = Vector6::zeros();
            delta[k] = h;
            let moved = base.right_plus(&SE3Tangent::new(delta), None, None);
            let (moved_residual, _) = factor.linearize(&[q.clone(), moved.into()], false)?;
            let column = (moved_residual - &residual) / h;
            for r in 0..6 {
                assert!((column[r] - jac[(r, 6 + k)]).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_parameter_errors_propagate() -> TestResult {
        let model = arm()?;
        let factor = PoseFactor::new(model, vec![PoseTarget::new(7, SE3::identity())], Vector6::repeat(1.0), true);
        assert!(factor.linearize(&[DVector::zeros(6)], false).is_err());
        assert!(factor.linearize(&[DVector::zeros(5), DVector::zeros(7)], false).is_err());
        Ok(())
    }
}
