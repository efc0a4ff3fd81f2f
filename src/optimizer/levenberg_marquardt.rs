//! Levenberg-Marquardt algorithm implementation.
//!
//! Minimizes
//!
//! ```text
//! min f(x) = ½‖r(x)‖² = ½Σᵢ rᵢ(x)²
//! ```
//!
//! by solving the damped normal equations at each iteration:
//!
//! ```text
//! (JᵀJ + λI)·δ = −Jᵀr
//! ```
//!
//! and updating `x ← x ⊞ δ` with manifold right-plus.
//!
//! # Step acceptance and damping
//!
//! Each step is scored with the gain ratio
//!
//! ```text
//! ρ = [f(x) − f(x ⊞ δ)] / [½ δᵀ(λδ − Jᵀr)]
//! ```
//!
//! and the damping follows Nielsen's rule:
//!
//! - `ρ > 0`: accept, `λ ← λ · max(1/3, 1 − (2ρ − 1)³)`, `ν ← 2`
//! - `ρ ≤ 0`: reject, `λ ← λ · ν`, `ν ← 2ν`
//!
//! If the linear backend cannot solve the system (for example a singular `JᵀJ` at tiny
//! damping), the damping is raised the same way and the solve retried. The error surfaces
//! only once the damping hits its upper bound.
//!
//! # Termination
//!
//! Checked in this order:
//!
//! 1. `‖Jᵀr‖ < gradient_tolerance` at the current iterate, before any step is taken
//! 2. NaN or Inf in the cost or gradient
//! 3. Timeout
//! 4. Maximum iterations
//! 5. After an accepted step: `‖δ‖ ≤ tol_p (‖x‖ + tol_p)`
//! 6. After an accepted step: `|Δf| / f < cost_tolerance`
//!
//! Reaching the iteration cap is not an error; the best iterate is returned.
//!
//! ```
//! use apex_ik::core::problem::Problem;
//! use apex_ik::factors::RestFactor;
//! use apex_ik::manifold::ManifoldType;
//! use apex_ik::optimizer::{LevenbergMarquardt, LevenbergMarquardtConfig};
//! use nalgebra::{DVector, dvector};
//! use std::collections::HashMap;
//! # fn example() -> apex_ik::error::ApexIkResult<()> {
//!
//! let mut problem = Problem::new();
//! problem.add_residual_block(
//!     &["joints"],
//!     Box::new(RestFactor::new(dvector![0.5, -0.5], DVector::repeat(2, 1.0))),
//! );
//!
//! let mut initial_values = HashMap::new();
//! initial_values.insert("joints".to_string(), (ManifoldType::RN, dvector![0.0, 0.0]));
//!
//! let mut solver = LevenbergMarquardt::with_config(LevenbergMarquardtConfig::new());
//! let result = solver.optimize(&problem, &initial_values)?;
//! assert!(result.status.is_converged());
//! assert!((result.parameters["joints"].to_vector()[0] - 0.5).abs() < 1e-6);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::core::problem::{Problem, SymbolicStructure, VariableEnum};
use crate::error::ApexIkResult;
use crate::linalg::{self, LinAlgError, LinearSolverType, SparseLinearSolver};
use crate::manifold::ManifoldType;
use crate::optimizer::{
    ConvergenceInfo, OptimizationStatus, OptimizerError, SolverResult, apply_parameter_step,
    compute_cost,
};

use faer::{Mat, sparse::SparseColMat};
use nalgebra::DVector;
use std::collections::HashMap;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use tracing::{debug, warn};
use web_time::{Duration, Instant};

/// Summary statistics for the Levenberg-Marquardt optimization process.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: usize,
    /// Steps that lowered the cost
    pub successful_steps: usize,
    pub unsuccessful_steps: usize,
    pub final_damping: f64,
    pub max_gradient_norm: f64,
    pub final_gradient_norm: f64,
    pub max_parameter_update_norm: f64,
    pub final_parameter_update_norm: f64,
    pub total_time: Duration,
    pub average_time_per_iteration: Duration,
    /// Filled only when debug logging is enabled
    pub iteration_history: Vec<IterationStats>,
    pub convergence_status: OptimizationStatus,
}

impl Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Levenberg-Marquardt Final Result")?;
        if self.convergence_status.is_converged() {
            writeln!(f, "CONVERGED ({:?})", self.convergence_status)?;
        } else {
            writeln!(f, "NOT CONVERGED ({:?})", self.convergence_status)?;
        }

        writeln!(f)?;
        writeln!(f, "Cost:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final:     {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total:              {}", self.iterations)?;
        writeln!(
            f,
            "  Successful steps:   {} ({:.1}%)",
            self.successful_steps,
            100.0 * self.successful_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(
            f,
            "  Unsuccessful steps: {} ({:.1}%)",
            self.unsuccessful_steps,
            100.0 * self.unsuccessful_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(f, "  Final damping:      {:.2e}", self.final_damping)?;
        writeln!(f)?;
        writeln!(f, "Gradient:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_gradient_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_gradient_norm)?;
        writeln!(f)?;
        writeln!(f, "Parameter Update:")?;
        writeln!(f, "  Max norm:   {:.2e}", self.max_parameter_update_norm)?;
        writeln!(f, "  Final norm: {:.2e}", self.final_parameter_update_norm)?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(
            f,
            "  Total time:             {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "  Average per iteration:  {:.2}ms",
            self.average_time_per_iteration.as_secs_f64() * 1000.0
        )?;

        Ok(())
    }
}

/// One row of the per-iteration debug table.
#[derive(Debug, Clone)]
pub struct IterationStats {
    pub iteration: usize,
    /// Cost after the iteration
    pub cost: f64,
    pub cost_change: f64,
    /// ‖Jᵀr‖ before the step
    pub gradient_norm: f64,
    pub step_norm: f64,
    /// Gain ratio ρ
    pub tr_ratio: f64,
    /// Damping λ after the update
    pub damping: f64,
    /// Linear solver iterations (0 for direct solvers)
    pub ls_iter: usize,
    pub iter_time_ms: f64,
    pub total_time_ms: f64,
    pub accepted: bool,
}

impl IterationStats {
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>13}  {:>11}  {:>11}  {:>7}  {:>11}  {:>13}  {:>6}",
            "iter",
            "cost",
            "cost_change",
            "|gradient|",
            "|step|",
            "tr_ratio",
            "damping",
            "ls_iter",
            "iter_time",
            "total_time",
            "status"
        );
    }

    pub fn print_line(&self) {
        let status = if self.accepted { "✓" } else { "✗" };

        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>13.2e}  {:>11.2e}  {:>11.2e}  {:>7}  {:>9.2}ms  {:>11.2}ms  {:>6}",
            self.iteration,
            self.cost,
            self.cost_change,
            self.gradient_norm,
            self.step_norm,
            self.tr_ratio,
            self.damping,
            self.ls_iter,
            self.iter_time_ms,
            self.total_time_ms,
            status
        );
    }
}

/// Configuration parameters for the Levenberg-Marquardt optimizer.
///
/// ```
/// use apex_ik::linalg::LinearSolverType;
/// use apex_ik::optimizer::LevenbergMarquardtConfig;
///
/// let config = LevenbergMarquardtConfig::new()
///     .with_linear_solver_type(LinearSolverType::ConjugateGradient)
///     .with_max_iterations(100)
///     .with_damping(1e-3)
///     .with_damping_bounds(1e-12, 1e12);
/// assert_eq!(config.max_iterations, 100);
/// ```
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    pub linear_solver_type: LinearSolverType,
    pub max_iterations: usize,
    /// Stop when `|Δf| / f` of an accepted step is below this
    pub cost_tolerance: f64,
    /// Stop when `‖δ‖ ≤ tol (‖x‖ + tol)` for an accepted step
    pub parameter_tolerance: f64,
    /// Stop when `‖Jᵀr‖` is below this
    pub gradient_tolerance: f64,
    pub timeout: Option<Duration>,
    /// Initial damping λ₀
    pub damping: f64,
    pub damping_min: f64,
    pub damping_max: f64,
    /// Initial growth factor ν applied on rejection
    pub damping_nu: f64,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            linear_solver_type: LinearSolverType::default(),
            max_iterations: 50,
            cost_tolerance: 1e-6,
            parameter_tolerance: 1e-8,
            gradient_tolerance: 1e-10,
            timeout: None,
            damping: 1e-4,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_nu: 2.0,
        }
    }
}

impl LevenbergMarquardtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    fn validate(&self) -> Result<(), OptimizerError> {
        let invalid = |msg: String| Err(OptimizerError::InvalidParameters(msg).log());
        if !(self.damping_min > 0.0 && self.damping_min <= self.damping_max) {
            return invalid(format!(
                "damping bounds [{:e}, {:e}] must satisfy 0 < min <= max",
                self.damping_min, self.damping_max
            ));
        }
        if !self.damping.is_finite() || self.damping <= 0.0 {
            return invalid(format!("initial damping {:e} must be positive", self.damping));
        }
        if !(self.damping_nu > 1.0) {
            return invalid(format!("damping growth factor {} must exceed 1", self.damping_nu));
        }
        for (name, value) in [
            ("cost", self.cost_tolerance),
            ("parameter", self.parameter_tolerance),
            ("gradient", self.gradient_tolerance),
        ] {
            if !(value >= 0.0) {
                return invalid(format!("{name} tolerance {value:e} must be non-negative"));
            }
        }
        Ok(())
    }

    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:        Levenberg-Marquardt\n  Linear solver: {}\n  Convergence Criteria:\n  Max iterations:      {}\n  Cost tolerance:      {:.2e}\n  Parameter tolerance: {:.2e}\n  Gradient tolerance:  {:.2e}\n  Timeout:             {:?}\n  Damping Parameters:\n  Initial damping:     {:.2e}\n  Damping range:       [{:.2e}, {:.2e}]\n  Initial nu:          {:.2}",
            self.linear_solver_type,
            self.max_iterations,
            self.cost_tolerance,
            self.parameter_tolerance,
            self.gradient_tolerance,
            self.timeout,
            self.damping,
            self.damping_min,
            self.damping_max,
            self.damping_nu,
        );
    }
}

/// State for optimization iteration
struct LinearizerResult {
    variables: HashMap<String, VariableEnum>,
    variable_index_map: HashMap<String, usize>,
    sorted_vars: Vec<String>,
    symbolic_structure: SymbolicStructure,
    current_cost: f64,
    initial_cost: f64,
    damping: f64,
    damping_nu: f64,
}

/// Result from step computation
struct StepResult {
    step: Mat<f64>,
    predicted_reduction: f64,
}

/// Result from step evaluation
struct StepEvaluation {
    accepted: bool,
    cost_reduction: f64,
    rho: f64,
}

/// Levenberg-Marquardt solver for nonlinear least squares on manifold variables.
///
/// The solver is stateless between calls to [`optimize`](Self::optimize); damping starts
/// from the configured value every time.
pub struct LevenbergMarquardt {
    config: LevenbergMarquardtConfig,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::with_config(LevenbergMarquardtConfig::default())
    }

    pub fn with_config(config: LevenbergMarquardtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// Nielsen's damping update. Returns whether the step is accepted.
    fn update_damping(&self, state: &mut LinearizerResult, rho: f64) -> bool {
        if rho > 0.0 {
            let coff = 2.0 * rho - 1.0;
            state.damping *= (1.0_f64 / 3.0).max(1.0 - coff * coff * coff);
            state.damping = state.damping.max(self.config.damping_min);
            state.damping_nu = 2.0;
            true
        } else {
            self.increase_damping(state);
            false
        }
    }

    fn increase_damping(&self, state: &mut LinearizerResult) {
        state.damping *= state.damping_nu;
        state.damping_nu *= 2.0;
        state.damping = state.damping.min(self.config.damping_max);
    }

    /// Actual over predicted reduction.
    fn compute_step_quality(current_cost: f64, new_cost: f64, predicted_reduction: f64) -> f64 {
        let actual_reduction = current_cost - new_cost;
        if predicted_reduction.abs() < 1e-15 {
            if actual_reduction > 0.0 { 1.0 } else { 0.0 }
        } else {
            actual_reduction / predicted_reduction
        }
    }

    /// `½ δᵀ(λδ − g)`, the reduction promised by the damped quadratic model.
    fn compute_predicted_reduction(step: &Mat<f64>, gradient: &Mat<f64>, damping: f64) -> f64 {
        let diff = damping * step - gradient;
        (0.5 * step.transpose() * &diff)[(0, 0)]
    }

    /// Stopping rules that apply before a step is attempted.
    fn check_pre_step(
        &self,
        iteration: usize,
        cost: f64,
        gradient_norm: f64,
        elapsed: Duration,
    ) -> Option<OptimizationStatus> {
        if gradient_norm < self.config.gradient_tolerance {
            return Some(OptimizationStatus::GradientToleranceReached);
        }
        if !cost.is_finite() || !gradient_norm.is_finite() {
            return Some(OptimizationStatus::InvalidNumericalValues);
        }
        if let Some(timeout) = self.config.timeout
            && elapsed >= timeout
        {
            return Some(OptimizationStatus::Timeout);
        }
        if iteration >= self.config.max_iterations {
            return Some(OptimizationStatus::MaxIterationsReached);
        }
        None
    }

    /// Stopping rules that apply after an accepted step.
    fn check_post_step(
        &self,
        cost_before: f64,
        cost_after: f64,
        parameter_norm: f64,
        parameter_update_norm: f64,
    ) -> Option<OptimizationStatus> {
        let relative_step_tolerance =
            self.config.parameter_tolerance * (parameter_norm + self.config.parameter_tolerance);
        if parameter_update_norm <= relative_step_tolerance {
            return Some(OptimizationStatus::ParameterToleranceReached);
        }

        let relative_cost_change = (cost_before - cost_after).abs() / cost_before.max(1e-10);
        if relative_cost_change < self.config.cost_tolerance {
            return Some(OptimizationStatus::CostToleranceReached);
        }
        None
    }

    /// `‖x‖` over all variables in their vector form.
    fn compute_parameter_norm(variables: &HashMap<String, VariableEnum>) -> f64 {
        variables
            .values()
            .map(|v| v.to_vector().norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    fn initialize_optimization_state(
        &self,
        problem: &Problem,
        initial_params: &HashMap<String, (ManifoldType, DVector<f64>)>,
    ) -> ApexIkResult<LinearizerResult> {
        if problem.num_residual_blocks() == 0 {
            return Err(OptimizerError::NoResidualBlocks.log().into());
        }
        let variables = problem.initialize_variables(initial_params)?;
        if variables.is_empty() {
            return Err(OptimizerError::EmptyProblem.log().into());
        }

        // Jacobian columns follow the sorted variable names
        let mut variable_index_map = HashMap::new();
        let mut col_offset = 0;
        let mut sorted_vars: Vec<String> = variables.keys().cloned().collect();
        sorted_vars.sort();

        for var_name in &sorted_vars {
            variable_index_map.insert(var_name.clone(), col_offset);
            col_offset += variables[var_name].get_size();
        }

        let symbolic_structure =
            problem.build_symbolic_structure(&variables, &variable_index_map, col_offset)?;

        let residual = problem.compute_residual_sparse(&variables)?;
        let current_cost = compute_cost(&residual);

        Ok(LinearizerResult {
            variables,
            variable_index_map,
            sorted_vars,
            symbolic_structure,
            current_cost,
            initial_cost: current_cost,
            damping: self.config.damping,
            damping_nu: self.config.damping_nu,
        })
    }

    /// Solve the damped system, raising the damping until the backend succeeds.
    fn compute_levenberg_marquardt_step(
        &self,
        residuals: &Mat<f64>,
        jacobian: &SparseColMat<usize, f64>,
        gradient: &Mat<f64>,
        state: &mut LinearizerResult,
        linear_solver: &mut dyn SparseLinearSolver,
    ) -> ApexIkResult<StepResult> {
        loop {
            let failure = match linear_solver.solve_augmented_equation(
                residuals,
                jacobian,
                state.damping,
            ) {
                Ok(step) if step.col(0).iter().all(|v| v.is_finite()) => {
                    let predicted_reduction =
                        Self::compute_predicted_reduction(&step, gradient, state.damping);
                    return Ok(StepResult {
                        step,
                        predicted_reduction,
                    });
                }
                Ok(_) => "non-finite step".to_string(),
                Err(e @ LinAlgError::InvalidDamping(_)) => return Err(e.into()),
                Err(e) => e.to_string(),
            };

            if state.damping >= self.config.damping_max {
                return Err(OptimizerError::LinearSolveFailed(format!(
                    "{failure} at maximum damping {:.2e}",
                    state.damping
                ))
                .log()
                .into());
            }
            let previous = state.damping;
            self.increase_damping(state);
            warn!(
                "Linear solve failed ({failure}) at damping {:.2e}, retrying with {:.2e}",
                previous, state.damping
            );
        }
    }

    /// Try the step on a copy of the variables; commit it only if accepted.
    fn evaluate_and_apply_step(
        &self,
        step_result: &StepResult,
        state: &mut LinearizerResult,
        problem: &Problem,
    ) -> ApexIkResult<StepEvaluation> {
        let mut candidate = state.variables.clone();
        apply_parameter_step(&mut candidate, step_result.step.as_ref(), &state.sorted_vars);

        let new_residual = problem.compute_residual_sparse(&candidate)?;
        let new_cost = compute_cost(&new_residual);

        let rho = if new_cost.is_finite() {
            Self::compute_step_quality(
                state.current_cost,
                new_cost,
                step_result.predicted_reduction,
            )
        } else {
            0.0
        };
        let accepted = self.update_damping(state, rho);

        let cost_reduction = if accepted {
            let reduction = state.current_cost - new_cost;
            state.variables = candidate;
            state.current_cost = new_cost;
            reduction
        } else {
            0.0
        };

        Ok(StepEvaluation {
            accepted,
            cost_reduction,
            rho,
        })
    }

    /// Run the optimization from `initial_params`.
    ///
    /// Errors only for malformed problems, factor failures, or a linear system that stays
    /// unsolvable at maximum damping. Every other outcome is reported through
    /// [`SolverResult::status`].
    pub fn optimize(
        &mut self,
        problem: &Problem,
        initial_params: &HashMap<String, (ManifoldType, DVector<f64>)>,
    ) -> ApexIkResult<SolverResult<HashMap<String, VariableEnum>>> {
        let start_time = Instant::now();
        self.config.validate()?;

        let mut state = self.initialize_optimization_state(problem, initial_params)?;
        let mut linear_solver = self.config.linear_solver_type.create_solver();

        let mut iteration = 0;
        let mut cost_evaluations = 1;
        let mut jacobian_evaluations = 0;
        let mut successful_steps = 0;
        let mut unsuccessful_steps = 0;
        let mut max_gradient_norm: f64 = 0.0;
        let mut max_parameter_update_norm: f64 = 0.0;
        let mut final_gradient_norm = 0.0;
        let mut final_parameter_update_norm = 0.0;
        let mut iteration_stats = Vec::new();

        let debug_enabled = tracing::enabled!(tracing::Level::DEBUG);
        if debug_enabled {
            self.config.print_configuration();
            IterationStats::print_header();
        }

        let status = loop {
            let iter_start = Instant::now();
            let (residuals, jacobian) = problem.compute_residual_and_jacobian_sparse(
                &state.variables,
                &state.variable_index_map,
                &state.symbolic_structure,
            )?;
            jacobian_evaluations += 1;

            let gradient = linalg::gradient(&residuals, &jacobian);
            let gradient_norm = gradient.norm_l2();
            final_gradient_norm = gradient_norm;
            if gradient_norm.is_finite() {
                max_gradient_norm = max_gradient_norm.max(gradient_norm);
            }

            if let Some(status) = self.check_pre_step(
                iteration,
                state.current_cost,
                gradient_norm,
                start_time.elapsed(),
            ) {
                break status;
            }

            let step_result = self.compute_levenberg_marquardt_step(
                &residuals,
                &jacobian,
                &gradient,
                &mut state,
                linear_solver.as_mut(),
            )?;
            let step_norm = step_result.step.norm_l2();
            max_parameter_update_norm = max_parameter_update_norm.max(step_norm);
            final_parameter_update_norm = step_norm;

            let cost_before = state.current_cost;
            let step_eval = self.evaluate_and_apply_step(&step_result, &mut state, problem)?;
            cost_evaluations += 1;
            iteration += 1;

            if step_eval.accepted {
                successful_steps += 1;
            } else {
                unsuccessful_steps += 1;
            }

            if debug_enabled {
                let stats = IterationStats {
                    iteration,
                    cost: state.current_cost,
                    cost_change: step_eval.cost_reduction,
                    gradient_norm,
                    step_norm,
                    tr_ratio: step_eval.rho,
                    damping: state.damping,
                    ls_iter: linear_solver.iterations(),
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
                    accepted: step_eval.accepted,
                };
                stats.print_line();
                iteration_stats.push(stats);
            }

            if step_eval.accepted {
                let parameter_norm = Self::compute_parameter_norm(&state.variables);
                if let Some(status) = self.check_post_step(
                    cost_before,
                    state.current_cost,
                    parameter_norm,
                    step_norm,
                ) {
                    break status;
                }
            }
        };

        let elapsed = start_time.elapsed();
        if debug_enabled {
            let summary = LevenbergMarquardtSummary {
                initial_cost: state.initial_cost,
                final_cost: state.current_cost,
                iterations: iteration,
                successful_steps,
                unsuccessful_steps,
                final_damping: state.damping,
                max_gradient_norm,
                final_gradient_norm,
                max_parameter_update_norm,
                final_parameter_update_norm,
                total_time: elapsed,
                average_time_per_iteration: if iteration > 0 {
                    elapsed / iteration as u32
                } else {
                    Duration::from_secs(0)
                },
                iteration_history: iteration_stats,
                convergence_status: status,
            };
            debug!("{}", summary);
        }

        Ok(SolverResult {
            status,
            iterations: iteration,
            initial_cost: state.initial_cost,
            final_cost: state.current_cost,
            parameters: state.variables,
            elapsed_time: elapsed,
            convergence_info: Some(ConvergenceInfo {
                final_gradient_norm,
                final_parameter_update_norm,
                final_damping: state.damping,
                cost_evaluations,
                jacobian_evaluations,
            }),
        })
    }
}
