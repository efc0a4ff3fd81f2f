//! Primitive collision shapes and their signed distances.
//!
//! Spheres and capsules are handled as a core (a point or a segment) inflated by a radius.
//! A capsule's segment runs along the local z axis of its pose. A plane is the local xy
//! plane of its pose, with the local z axis as the outward normal.

use nalgebra::{UnitQuaternion, Vector3};

use crate::collision::{CollisionError, CollisionResult};
use crate::manifold::{LieGroup, se3::SE3};

/// Below this separation two witness points count as coincident.
const COINCIDENT: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Sphere { radius: f64 },
    Capsule { radius: f64, half_length: f64 },
    Plane,
}

impl Shape {
    pub fn name(&self) -> &'static str {
        match self {
            Shape::Sphere { .. } => "sphere",
            Shape::Capsule { .. } => "capsule",
            Shape::Plane => "plane",
        }
    }
}

/// A shape placed by a pose.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub shape: Shape,
    pub pose: SE3,
}

enum Core {
    Point(Vector3<f64>),
    Segment(Vector3<f64>, Vector3<f64>),
}

impl Geometry {
    pub fn sphere(center: Vector3<f64>, radius: f64) -> Self {
        Geometry {
            shape: Shape::Sphere { radius },
            pose: SE3::from_translation(center),
        }
    }

    /// Capsule of total segment length `height` along the local z axis of `pose`.
    pub fn capsule(pose: SE3, radius: f64, height: f64) -> Self {
        Geometry {
            shape: Shape::Capsule {
                radius,
                half_length: height / 2.0,
            },
            pose,
        }
    }

    /// Capsule whose segment runs from `start` to `end`.
    pub fn capsule_between(start: Vector3<f64>, end: Vector3<f64>, radius: f64) -> Self {
        let axis = end - start;
        let rotation = align_z(&axis);
        Self::capsule(
            SE3::new((start + end) / 2.0, rotation),
            radius,
            axis.norm(),
        )
    }

    /// Plane through `point` with outward `normal`.
    pub fn plane(point: Vector3<f64>, normal: Vector3<f64>) -> Self {
        Geometry {
            shape: Shape::Plane,
            pose: SE3::new(point, align_z(&normal)),
        }
    }

    pub fn radius(&self) -> f64 {
        match self.shape {
            Shape::Sphere { radius } | Shape::Capsule { radius, .. } => radius,
            Shape::Plane => 0.0,
        }
    }

    /// Rejects negative or non-finite sizes and invalid poses.
    pub fn validate(&self) -> CollisionResult<()> {
        let sizes_ok = match self.shape {
            Shape::Sphere { radius } => radius.is_finite() && radius >= 0.0,
            Shape::Capsule {
                radius,
                half_length,
            } => {
                radius.is_finite() && radius >= 0.0 && half_length.is_finite() && half_length >= 0.0
            }
            Shape::Plane => true,
        };
        if !sizes_ok || !self.pose.is_valid(1e-6) {
            return Err(CollisionError::InvalidGeometry(format!(
                "{} with pose {}",
                self.shape.name(),
                self.pose
            ))
            .log());
        }
        Ok(())
    }

    /// The same shape placed by `tf ∘ pose`.
    pub fn transform(&self, tf: &SE3) -> Geometry {
        Geometry {
            shape: self.shape.clone(),
            pose: tf.compose(&self.pose, None, None),
        }
    }

    pub fn normal(&self) -> Vector3<f64> {
        self.pose.rotation_quaternion() * Vector3::z()
    }

    fn core(&self) -> Core {
        match self.shape {
            Shape::Capsule { half_length, .. } => {
                let offset = self.normal() * half_length;
                let center = self.pose.translation();
                Core::Segment(center - offset, center + offset)
            }
            _ => Core::Point(self.pose.translation()),
        }
    }
}

/// Rotation taking the z axis onto `direction`. A zero direction gives the identity.
fn align_z(direction: &Vector3<f64>) -> UnitQuaternion<f64> {
    if direction.norm() < COINCIDENT {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::rotation_between(&Vector3::z(), direction).unwrap_or_else(|| {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    })
}

/// Closest points between shapes `a` and `b`.
///
/// `point_a` and `point_b` lie on the cores (the plane surface for planes) and move rigidly
/// with their shapes. `normal` is the unit direction from `a` to `b`, and
/// `distance = normal · (point_b − point_a) − r_a − r_b`. The derivative of the distance
/// under rigid motions is therefore `normalᵀ (δpoint_b − δpoint_a)`.
#[derive(Debug, Clone)]
pub struct Contact {
    pub distance: f64,
    pub point_a: Vector3<f64>,
    pub point_b: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl Contact {
    fn swapped(self) -> Contact {
        Contact {
            distance: self.distance,
            point_a: self.point_b,
            point_b: self.point_a,
            normal: -self.normal,
        }
    }
}

pub fn signed_distance(a: &Geometry, b: &Geometry) -> CollisionResult<Contact> {
    match (&a.shape, &b.shape) {
        (Shape::Plane, Shape::Plane) => {
            Err(CollisionError::UnsupportedPair("plane", "plane").log())
        }
        (Shape::Plane, _) => Ok(core_to_plane(b, a).swapped()),
        (_, Shape::Plane) => Ok(core_to_plane(a, b)),
        _ => Ok(core_to_core(a, b)),
    }
}

fn core_to_core(a: &Geometry, b: &Geometry) -> Contact {
    let (point_a, point_b) = match (a.core(), b.core()) {
        (Core::Point(pa), Core::Point(pb)) => (pa, pb),
        (Core::Point(pa), Core::Segment(s, e)) => (pa, closest_on_segment(&pa, &s, &e)),
        (Core::Segment(s, e), Core::Point(pb)) => (closest_on_segment(&pb, &s, &e), pb),
        (Core::Segment(s1, e1), Core::Segment(s2, e2)) => closest_between_segments(&s1, &e1, &s2, &e2),
    };

    let delta = point_b - point_a;
    let separation = delta.norm();
    let normal = if separation > COINCIDENT {
        delta / separation
    } else {
        Vector3::z()
    };

    Contact {
        distance: separation - a.radius() - b.radius(),
        point_a,
        point_b,
        normal,
    }
}

fn core_to_plane(a: &Geometry, plane: &Geometry) -> Contact {
    let plane_normal = plane.normal();
    let origin = plane.pose.translation();
    let height = |p: &Vector3<f64>| plane_normal.dot(&(p - origin));

    let point_a = match a.core() {
        Core::Point(p) => p,
        Core::Segment(s, e) => {
            if height(&e) < height(&s) {
                e
            } else {
                s
            }
        }
    };
    let h = height(&point_a);

    Contact {
        distance: h - a.radius(),
        point_a,
        point_b: point_a - plane_normal * h,
        normal: -plane_normal,
    }
}

fn closest_on_segment(p: &Vector3<f64>, start: &Vector3<f64>, end: &Vector3<f64>) -> Vector3<f64> {
    let axis = end - start;
    let length_sq = axis.norm_squared();
    if length_sq < COINCIDENT * COINCIDENT {
        return *start;
    }
    let t = ((p - start).dot(&axis) / length_sq).clamp(0.0, 1.0);
    start + axis * t
}

/// Closest points of segments `p1q1` and `p2q2` (Ericson, Real-Time Collision Detection 5.1.9).
fn closest_between_segments(
    p1: &Vector3<f64>,
    q1: &Vector3<f64>,
    p2: &Vector3<f64>,
    q2: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.norm_squared();
    let e = d2.norm_squared();
    let f = d2.dot(&r);
    let eps = COINCIDENT * COINCIDENT;

    if a <= eps && e <= eps {
        return (*p1, *p2);
    }
    if a <= eps {
        return (*p1, p2 + d2 * (f / e).clamp(0.0, 1.0));
    }

    let c = d1.dot(&r);
    if e <= eps {
        return (p1 + d1 * (-c / a).clamp(0.0, 1.0), *p2);
    }

    let b = d1.dot(&d2);
    let denom = a * e - b * b;
    // Parallel segments: any s is optimal, start from the first endpoint
    let mut s = if denom > 1e-12 * a * e {
        ((b * f - c * e) / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (p1 + d1 * s, p2 + d2 * t)
}
