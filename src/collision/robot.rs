//! Collision geometry attached to the links of a kinematic model.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use crate::collision::{
    CollisionError, CollisionQuery, CollisionResult, Distance, PairDistance,
    geometry::{Geometry, Shape, signed_distance},
};
use crate::kinematics::{KinematicModel, KinematicsError, point_jacobian};
use crate::manifold::se3::SE3;

/// A shape rigidly attached to a link, posed in the link frame.
#[derive(Debug, Clone)]
pub struct LinkGeometry {
    pub link: usize,
    pub geometry: Geometry,
}

impl LinkGeometry {
    pub fn new(link: usize, geometry: Geometry) -> Self {
        LinkGeometry { link, geometry }
    }
}

/// Robot collision model over primitive shapes.
///
/// By default every pair of shapes on different links is checked. Adjacent links usually
/// overlap at the joint and should be excluded with [`ignore_link_pair`](Self::ignore_link_pair).
pub struct RobotCollision {
    model: Arc<dyn KinematicModel>,
    shapes: Vec<LinkGeometry>,
    self_pairs: Vec<(usize, usize)>,
}

fn both_planes(a: &Geometry, b: &Geometry) -> bool {
    matches!((&a.shape, &b.shape), (Shape::Plane, Shape::Plane))
}

impl RobotCollision {
    pub fn new(model: Arc<dyn KinematicModel>, shapes: Vec<LinkGeometry>) -> CollisionResult<Self> {
        let num_links = model.num_links();
        for shape in &shapes {
            if shape.link >= num_links {
                return Err(CollisionError::Kinematics(
                    KinematicsError::LinkOutOfRange {
                        link: shape.link,
                        num_links,
                    }
                    .log(),
                ));
            }
            shape.geometry.validate()?;
        }

        let mut self_pairs = Vec::new();
        for i in 0..shapes.len() {
            for j in i + 1..shapes.len() {
                if shapes[i].link != shapes[j].link
                    && !both_planes(&shapes[i].geometry, &shapes[j].geometry)
                {
                    self_pairs.push((i, j));
                }
            }
        }
        debug!(
            "Robot collision model: {} shapes, {} self pairs",
            shapes.len(),
            self_pairs.len()
        );

        Ok(RobotCollision {
            model,
            shapes,
            self_pairs,
        })
    }

    /// Replace the checked pairs. Indices refer to the shape list.
    pub fn with_self_pairs(mut self, pairs: Vec<(usize, usize)>) -> CollisionResult<Self> {
        for &(a, b) in &pairs {
            let valid = a != b
                && a < self.shapes.len()
                && b < self.shapes.len()
                && !both_planes(&self.shapes[a].geometry, &self.shapes[b].geometry);
            if !valid {
                return Err(CollisionError::InvalidPair(a, b).log());
            }
        }
        self.self_pairs = pairs;
        Ok(self)
    }

    /// Stop checking shapes of `link_a` against shapes of `link_b`.
    pub fn ignore_link_pair(mut self, link_a: usize, link_b: usize) -> Self {
        let shapes = &self.shapes;
        self.self_pairs.retain(|&(i, j)| {
            let (li, lj) = (shapes[i].link, shapes[j].link);
            !((li == link_a && lj == link_b) || (li == link_b && lj == link_a))
        });
        self
    }

    pub fn shapes(&self) -> &[LinkGeometry] {
        &self.shapes
    }

    pub fn self_pairs(&self) -> &[(usize, usize)] {
        &self.self_pairs
    }

    pub fn model(&self) -> &Arc<dyn KinematicModel> {
        &self.model
    }

    /// Shapes in the root frame at configuration `q`.
    pub fn posed_shapes(&self, q: &DVector<f64>) -> CollisionResult<Vec<Geometry>> {
        let poses = self.model.forward(q)?;
        Ok(self.pose_shapes(&poses))
    }

    fn pose_shapes(&self, link_poses: &[SE3]) -> Vec<Geometry> {
        self.shapes
            .iter()
            .map(|s| s.geometry.transform(&link_poses[s.link]))
            .collect()
    }

    /// Link Jacobians for the links that carry shapes, indexed by link.
    fn link_jacobians(&self, q: &DVector<f64>) -> CollisionResult<Vec<Option<DMatrix<f64>>>> {
        let mut jacobians = vec![None; self.model.num_links()];
        for shape in &self.shapes {
            if jacobians[shape.link].is_none() {
                jacobians[shape.link] = Some(self.model.jacobian(q, shape.link)?);
            }
        }
        Ok(jacobians)
    }

    /// `Jᵀ n` for a point attached to `link`, i.e. the configuration-space gradient of the point's
    /// displacement along `normal`.
    fn projected_gradient(
        &self,
        jacobians: &[Option<DMatrix<f64>>],
        link_poses: &[SE3],
        link: usize,
        point: &Vector3<f64>,
        normal: &Vector3<f64>,
    ) -> DVector<f64> {
        match &jacobians[link] {
            Some(jac) => {
                let jp = point_jacobian(jac, &link_poses[link].translation(), point);
                jp.tr_mul(&DVector::from_column_slice(normal.as_slice()))
            }
            None => DVector::zeros(self.model.num_actuated_joints()),
        }
    }
}

impl CollisionQuery for RobotCollision {
    fn num_self_pairs(&self) -> usize {
        self.self_pairs.len()
    }

    fn self_distances(&self, q: &DVector<f64>) -> CollisionResult<Vec<PairDistance>> {
        let link_poses = self.model.forward(q)?;
        let posed = self.pose_shapes(&link_poses);
        let jacobians = self.link_jacobians(q)?;

        self.self_pairs
            .iter()
            .map(|&(a, b)| {
                let contact = signed_distance(&posed[a], &posed[b])?;
                let toward_b = self.projected_gradient(
                    &jacobians,
                    &link_poses,
                    self.shapes[b].link,
                    &contact.point_b,
                    &contact.normal,
                );
                let toward_a = self.projected_gradient(
                    &jacobians,
                    &link_poses,
                    self.shapes[a].link,
                    &contact.point_a,
                    &contact.normal,
                );
                Ok(PairDistance {
                    pair: (a, b),
                    distance: contact.distance,
                    gradient: toward_b - toward_a,
                })
            })
            .collect()
    }

    fn num_world_pairs(&self, obstacle: &Geometry) -> usize {
        self.shapes
            .iter()
            .filter(|s| !both_planes(&s.geometry, obstacle))
            .count()
    }

    fn world_distances(
        &self,
        q: &DVector<f64>,
        obstacle: &Geometry,
    ) -> CollisionResult<Vec<Distance>> {
        obstacle.validate()?;
        let link_poses = self.model.forward(q)?;
        let posed = self.pose_shapes(&link_poses);
        let jacobians = self.link_jacobians(q)?;

        self.shapes
            .iter()
            .zip(&posed)
            .filter(|(_, geometry)| !both_planes(geometry, obstacle))
            .map(|(shape, geometry)| {
                let contact = signed_distance(geometry, obstacle)?;
                // The obstacle is static, only the robot witness point moves
                let gradient = -self.projected_gradient(
                    &jacobians,
                    &link_poses,
                    shape.link,
                    &contact.point_a,
                    &contact.normal,
                );
                Ok(Distance {
                    distance: contact.distance,
                    gradient,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::{Joint, KinematicTree};
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// Three-link planar arm folding back over its base.
    fn folding_arm() -> Result<Arc<dyn KinematicModel>, Box<dyn std::error::Error>> {
        let offset = |x| SE3::from_translation(Vector3::new(x, 0.0, 0.0));
        let tree = KinematicTree::new(vec![
            Joint::revolute("j1", 0, SE3::identity(), Vector3::z()),
            Joint::revolute("j2", 1, offset(1.0), Vector3::z()),
            Joint::revolute("j3", 2, offset(1.0), Vector3::z()),
        ])?;
        Ok(Arc::new(tree))
    }

    fn link_capsules(model: Arc<dyn KinematicModel>) -> CollisionResult<RobotCollision> {
        let shapes = (1..=3)
            .map(|link| {
                LinkGeometry::new(
                    link,
                    Geometry::capsule_between(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.9, 0.0, 0.0), 0.05),
                )
            })
            .collect();
        RobotCollision::new(model, shapes)
    }

    #[test]
    fn test_default_pairs_skip_same_link_and_ignored_links() -> TestResult {
        let robot = link_capsules(folding_arm()?)?;
        assert_eq!(robot.num_self_pairs(), 3);
        let robot = robot.ignore_link_pair(1, 2).ignore_link_pair(3, 2);
        assert_eq!(robot.self_pairs(), &[(0, 2)]);
        Ok(())
    }

    #[test]
    fn test_posed_shapes_follow_links() -> TestResult {
        let robot = link_capsules(folding_arm()?)?;
        let posed = robot.posed_shapes(&dvector![0.0, 0.0, 0.0])?;
        assert_eq!(posed.len(), 3);
        for (k, shape) in posed.iter().enumerate() {
            assert_relative_eq!(shape.pose.translation().x, k as f64 + 0.5, epsilon = 1e-12);
        }
        let turned = robot.posed_shapes(&dvector![std::f64::consts::FRAC_PI_2, 0.0, 0.0])?;
        assert_relative_eq!(turned[0].pose.translation().y, 0.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_self_distance_shrinks_as_arm_folds() -> TestResult {
        let robot = link_capsules(folding_arm()?)?.with_self_pairs(vec![(0, 2)])?;
        let open = robot.self_distances(&dvector![0.0, 0.0, 0.0])?;
        let folded = robot.self_distances(&dvector![0.0, 2.6, 1.8])?;
        assert_eq!(open.len(), 1);
        assert!(open[0].distance > folded[0].distance);
        assert_relative_eq!(open[0].distance, 1.2 - 0.1, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_self_gradient_matches_finite_difference() -> TestResult {
        let robot = link_capsules(folding_arm()?)?.with_self_pairs(vec![(0, 2)])?;
        let q = dvector![0.3, 2.2, 1.4];
        let base = robot.self_distances(&q)?;
        let h = 1e-6;
        for i in 0..3 {
            let mut moved = q.clone();
            moved[i] += h;
            let moved_distance = robot.self_distances(&moved)?[0].distance;
            assert_relative_eq!(
                base[0].gradient[i],
                (moved_distance - base[0].distance) / h,
                epsilon = 1e-4
            );
        }
        Ok(())
    }

    #[test]
    fn test_world_gradient_matches_finite_difference() -> TestResult {
        let robot = link_capsules(folding_arm()?)?;
        let obstacle = Geometry::sphere(Vector3::new(1.2, 0.8, 0.1), 0.2);
        let q = dvector![0.4, 0.5, -0.3];
        let base = robot.world_distances(&q, &obstacle)?;
        assert_eq!(base.len(), robot.num_world_pairs(&obstacle));
        let h = 1e-6;
        for i in 0..3 {
            let mut moved = q.clone();
            moved[i] += h;
            let moved_distances = robot.world_distances(&moved, &obstacle)?;
            for (b, m) in base.iter().zip(&moved_distances) {
                assert_relative_eq!(b.gradient[i], (m.distance - b.distance) / h, epsilon = 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_root_shapes_have_zero_gradient() -> TestResult {
        let model = folding_arm()?;
        let robot = RobotCollision::new(
            model,
            vec![LinkGeometry::new(0, Geometry::sphere(Vector3::zeros(), 0.1))],
        )?;
        let floor = Geometry::plane(Vector3::new(0.0, 0.0, -1.0), Vector3::z());
        let distances = robot.world_distances(&dvector![0.1, 0.2, 0.3], &floor)?;
        assert_relative_eq!(distances[0].distance, 0.9, epsilon = 1e-12);
        assert_relative_eq!(distances[0].gradient.norm(), 0.0);
        Ok(())
    }

    #[test]
    fn test_invalid_inputs_are_rejected() -> TestResult {
        let model = folding_arm()?;
        let bad_link = RobotCollision::new(
            model.clone(),
            vec![LinkGeometry::new(7, Geometry::sphere(Vector3::zeros(), 0.1))],
        );
        assert!(matches!(bad_link, Err(CollisionError::Kinematics(_))));

        let robot = link_capsules(model)?;
        assert!(matches!(
            robot.with_self_pairs(vec![(0, 5)]),
            Err(CollisionError::InvalidPair(0, 5))
        ));
        Ok(())
    }
}
