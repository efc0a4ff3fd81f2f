use std::sync::Arc;

use apex_ik::collision::{CollisionQuery, Geometry, LinkGeometry, RobotCollision};
use apex_ik::factors::PoseTarget;
use apex_ik::ik::{CollisionIkWeights, IkConfig, IkOptions, IkWeights, solve_ik, solve_ik_with_coll};
use apex_ik::init_logger;
use apex_ik::kinematics::{KinematicModel, KinematicTree};
use apex_ik::linalg::LinearSolverType;
use apex_ik::manifold::LieGroup;
use apex_ik::manifold::se3::SE3;
use clap::Parser;
use nalgebra::{DVector, Vector3};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "solve_arm_ik")]
#[command(about = "Solve inverse kinematics for the 6-DOF reference arm")]
struct Args {
    /// Target flange position in meters, as "x,y,z"
    #[arg(short, long, value_delimiter = ',', num_args = 3, default_values_t = [0.4, 0.2, 0.6])]
    position: Vec<f64>,

    /// Target flange roll/pitch/yaw in radians, as "roll,pitch,yaw"
    #[arg(short, long, value_delimiter = ',', num_args = 3, default_values_t = [0.0, 0.5, 0.0])]
    rpy: Vec<f64>,

    /// Position residual weight
    #[arg(long, default_value = "50.0")]
    position_weight: f64,

    /// Rotation residual weight (0 matches the position only)
    #[arg(long, default_value = "10.0")]
    rotation_weight: f64,

    /// Linear solver: "cholesky", "cg" or "dense"
    #[arg(short, long, default_value = "cg")]
    solver: String,

    /// Maximum number of LM iterations
    #[arg(short, long, default_value = "50")]
    max_iterations: usize,

    /// Optional spherical obstacle as "x,y,z,radius", enables the collision-aware solve
    #[arg(long, value_delimiter = ',', num_args = 4)]
    obstacle: Option<Vec<f64>>,
}

fn parse_solver(name: &str) -> Option<LinearSolverType> {
    match name {
        "cholesky" => Some(LinearSolverType::SparseCholesky),
        "cg" => Some(LinearSolverType::ConjugateGradient),
        "dense" => Some(LinearSolverType::DenseCholesky),
        _ => None,
    }
}

/// Capsules on the upper arm and forearm, a sphere on the flange.
fn arm_collision(model: &Arc<dyn KinematicModel>) -> Result<RobotCollision, Box<dyn std::error::Error>> {
    let flange = model.num_links() - 1;
    let shapes = vec![
        LinkGeometry::new(
            2,
            Geometry::capsule_between(Vector3::zeros(), Vector3::new(0.05, 0.0, 0.4), 0.04),
        ),
        LinkGeometry::new(
            3,
            Geometry::capsule_between(Vector3::zeros(), Vector3::new(0.35, 0.0, 0.05), 0.04),
        ),
        LinkGeometry::new(flange, Geometry::sphere(Vector3::zeros(), 0.03)),
    ];
    Ok(RobotCollision::new(Arc::clone(model), shapes)?.ignore_link_pair(2, 3))
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let Some(linear_solver_type) = parse_solver(&args.solver) else {
        return Err(format!("unknown solver '{}', expected cholesky, cg or dense", args.solver).into());
    };

    let model: Arc<dyn KinematicModel> = Arc::new(KinematicTree::reference_arm()?);
    let flange = model.num_links() - 1;
    let (p, r) = (&args.position, &args.rpy);
    let goal = SE3::from_translation_euler(p[0], p[1], p[2], r[0], r[1], r[2]);
    let target = PoseTarget::new(flange, goal.clone());
    let initial = DVector::zeros(model.num_actuated_joints());

    info!(
        "Target flange position [{:.3}, {:.3}, {:.3}], rpy [{:.3}, {:.3}, {:.3}]",
        p[0], p[1], p[2], r[0], r[1], r[2]
    );

    let joints = match &args.obstacle {
        Some(o) => {
            let robot = Arc::new(arm_collision(&model)?);
            let collision: Arc<dyn CollisionQuery> = robot.clone();
            let obstacle = Geometry::sphere(Vector3::new(o[0], o[1], o[2]), o[3]);
            let weights = CollisionIkWeights::new()
                .with_pose_weights(args.position_weight, args.rotation_weight);
            let config = IkConfig::collision()
                .with_linear_solver_type(linear_solver_type)
                .with_max_iterations(args.max_iterations);
            let solution = solve_ik_with_coll(
                &model,
                &[target],
                &collision,
                std::slice::from_ref(&obstacle),
                &initial,
                &weights,
                &config,
            )?;
            info!("{}", solution.report);

            let clearance = collision
                .world_distances(&solution.joints, &obstacle)?
                .iter()
                .map(|d| d.distance)
                .fold(f64::INFINITY, f64::min);
            info!("Obstacle clearance: {:.4} m (margin {:.3} m)", clearance, weights.world_margin);
            if clearance < weights.world_margin {
                warn!("Solution is inside the world-collision margin");
            }
            for (shape, posed) in robot.shapes().iter().zip(robot.posed_shapes(&solution.joints)?) {
                let center = posed.pose.translation();
                info!(
                    "Link {} {} at [{:.3}, {:.3}, {:.3}]",
                    shape.link,
                    posed.shape.name(),
                    center.x,
                    center.y,
                    center.z
                );
            }
            solution.joints
        }
        None => {
            let weights = IkWeights::from_pos_rot(args.position_weight, args.rotation_weight);
            let options = IkOptions::new().with_config(
                IkConfig::new()
                    .with_linear_solver_type(linear_solver_type)
                    .with_max_iterations(args.max_iterations),
            );
            let solution = solve_ik(&model, &[target], &initial, &weights, &options)?;
            info!("{}", solution.report);
            solution.joints
        }
    };

    let reached = model.link_pose(&joints, flange)?;
    let position_error = (reached.translation() - goal.translation()).norm();
    let rotation_error = goal.rotation_so3().between(reached.rotation_so3()).log(None).angle();
    info!(
        "Joints: [{}]",
        joints
            .iter()
            .map(|q| format!("{:.4}", q))
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!(
        "Flange error: position {:.3e} m, rotation {:.3e} rad",
        position_error, rotation_error
    );
    Ok(())
}

fn main() {
    init_logger();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("solve_arm_ik failed: {}", e);
        std::process::exit(1);
    }
}
