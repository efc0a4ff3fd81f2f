//! # Apex IK
//!
//! Inverse kinematics for articulated robots as sparse nonlinear least squares.
//!
//! A request (target link poses, an initial configuration and factor weights) becomes a
//! factor graph over the joint configuration and, optionally, a floating base pose. A
//! Levenberg-Marquardt engine drives the weighted residuals toward zero.
//!
//! ## Cost factors
//!
//! - **Pose match**: SE(3) error of each target link
//! - **Joint and velocity limits**: hinge penalties outside the bounds
//! - **Rest pose**: pull toward a preferred configuration
//! - **Manipulability**: push away from kinematic singularities
//! - **Self and world collision**: hinge penalties inside a distance margin
//!
//! ## Linear algebra backends
//!
//! - **Sparse Cholesky**: faer LLᵀ with cached symbolic factorization
//! - **Conjugate Gradient**: matrix-free, Jacobi-preconditioned
//! - **Dense Cholesky**: nalgebra, for small problems
//!
//! ## Example
//!
//! ```
//! use apex_ik::{IkOptions, IkWeights, KinematicModel, KinematicTree, PoseTarget, solve_ik};
//! use nalgebra::{DVector, dvector};
//! use std::sync::Arc;
//! # fn example() -> apex_ik::ApexIkResult<()> {
//!
//! let model: Arc<dyn KinematicModel> = Arc::new(KinematicTree::reference_arm()?);
//! let flange = model.num_links() - 1;
//! let target = PoseTarget::new(flange, model.link_pose(&dvector![0.1, 0.2, -0.2, 0.0, 0.3, 0.0], flange)?);
//!
//! let solution = solve_ik(
//!     &model,
//!     &[target],
//!     &DVector::zeros(6),
//!     &IkWeights::from_pos_rot(50.0, 10.0),
//!     &IkOptions::new(),
//! )?;
//! println!("{}", solution.report);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod collision;
pub mod core;
pub mod error;
pub mod factors;
pub mod ik;
pub mod kinematics;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod optimizer;

pub use collision::{CollisionQuery, Geometry, LinkGeometry, RobotCollision};
pub use crate::core::variable::Variable;
pub use error::{ApexIkError, ApexIkResult};
pub use factors::{
    Factor, JointLimitFactor, JointVelocityFactor, ManipulabilityFactor, PoseFactor, PoseTarget,
    RestFactor, SelfCollisionFactor, WorldCollisionFactor,
};
pub use ik::{
    BasePose, CollisionIkSolution, CollisionIkWeights, IkConfig, IkFactor, IkOptions,
    IkSolution, IkWeights, SolveReport, solve_ik, solve_ik_with_coll,
};
pub use kinematics::{Joint, JointLimits, KinematicModel, KinematicTree};
pub use linalg::{LinearSolverType, SparseLinearSolver};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig, OptimizationStatus};
