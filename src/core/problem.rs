//! Nonlinear least-squares problem over manifold variables.
//!
//! A [`Problem`] is an ordered list of residual blocks. Block `i` fills the residual rows
//! after block `i − 1`, so the stacked residual and the Jacobian row layout follow insertion
//! order:
//!
//! ```text
//! minimize  Σ_i ‖r_i(x)‖²
//! ```
//!
//! Variables live outside the problem in a name → [`VariableEnum`] map created by
//! [`Problem::initialize_variables`]. The Jacobian column layout is a name → first column map
//! chosen by the optimizer. The sparsity pattern is computed once per solve by
//! [`Problem::build_symbolic_structure`]; each linearization only refills the values.
//!
//! Tangent DOFs registered with [`Problem::fix_variable`] get all-zero Jacobian columns and
//! their step components are dropped in [`VariableEnum::apply_tangent_step`].
//!
//! ```
//! use apex_ik::core::problem::Problem;
//! use apex_ik::factors::RestFactor;
//! use apex_ik::manifold::ManifoldType;
//! use nalgebra::{DVector, dvector};
//! use std::collections::HashMap;
//! # fn example() -> apex_ik::error::ApexIkResult<()> {
//!
//! let mut problem = Problem::new();
//! let rest = RestFactor::new(DVector::zeros(2), DVector::repeat(2, 1.0));
//! problem.add_residual_block(&["joints"], Box::new(rest));
//!
//! let mut initial_values = HashMap::new();
//! initial_values.insert("joints".to_string(), (ManifoldType::RN, dvector![0.3, -0.1]));
//! let variables = problem.initialize_variables(&initial_values)?;
//! assert_eq!(variables["joints"].get_size(), 2);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use faer::{
    Col, Mat, MatRef,
    sparse::{Argsort, Pair, SparseColMat, SymbolicSparseColMat},
};
use nalgebra::DVector;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    core::{CoreError, residual_block::ResidualBlock, variable::Variable},
    error::{ApexIkError, ApexIkResult},
    factors::Factor,
    manifold::{ManifoldError, ManifoldType, rn, se3},
};

/// Sparsity pattern of the Jacobian plus the argsort that maps the value order produced by
/// [`Problem::compute_residual_and_jacobian_sparse`] into column-major storage.
pub struct SymbolicStructure {
    pub pattern: SymbolicSparseColMat<usize>,
    pub order: Argsort<usize>,
}

/// A problem variable of any supported manifold.
#[derive(Clone, Debug)]
pub enum VariableEnum {
    Rn(Variable<rn::Rn>),
    SE3(Variable<se3::SE3>),
}

impl VariableEnum {
    /// Tangent space size
    pub fn get_size(&self) -> usize {
        match self {
            VariableEnum::Rn(var) => var.get_size(),
            VariableEnum::SE3(var) => var.get_size(),
        }
    }

    pub fn manifold_type(&self) -> ManifoldType {
        match self {
            VariableEnum::Rn(_) => ManifoldType::RN,
            VariableEnum::SE3(_) => ManifoldType::SE3,
        }
    }

    /// Parameter vector handed to factors.
    pub fn to_vector(&self) -> DVector<f64> {
        match self {
            VariableEnum::Rn(var) => var.to_vector(),
            VariableEnum::SE3(var) => var.value.clone().into(),
        }
    }

    pub fn get_fixed_indices(&self) -> &BTreeSet<usize> {
        match self {
            VariableEnum::Rn(var) => &var.fixed_indices,
            VariableEnum::SE3(var) => &var.fixed_indices,
        }
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.get_fixed_indices().contains(&index)
    }

    /// `x ← x ⊞ δ` with `δ` read from `step_slice` (one column, `get_size()` rows).
    /// Components at fixed indices are zeroed first.
    pub fn apply_tangent_step(&mut self, step_slice: MatRef<f64>) {
        let size = self.get_size();
        let mut step = DVector::from_iterator(size, (0..size).map(|i| step_slice[(i, 0)]));
        for &fixed_idx in self.get_fixed_indices() {
            if fixed_idx < size {
                step[fixed_idx] = 0.0;
            }
        }

        match self {
            VariableEnum::Rn(var) => var.apply_step(&rn::RnTangent::new(step)),
            VariableEnum::SE3(var) => var.apply_step(&se3::SE3Tangent::from(step)),
        }
    }
}

pub struct Problem {
    /// Rows of the stacked residual
    pub total_residual_dimension: usize,

    residual_id_count: usize,

    residual_blocks: Vec<ResidualBlock>,

    /// Locked tangent indices per variable name
    pub fixed_variable_indexes: HashMap<String, BTreeSet<usize>>,
}

impl Default for Problem {
    fn default() -> Self {
        Self::new()
    }
}

impl Problem {
    pub fn new() -> Self {
        Self {
            total_residual_dimension: 0,
            residual_id_count: 0,
            residual_blocks: Vec::new(),
            fixed_variable_indexes: HashMap::new(),
        }
    }

    /// Append a block reading `variable_key_list` (in parameter order). Returns its id.
    pub fn add_residual_block(
        &mut self,
        variable_key_list: &[&str],
        factor: Box<dyn Factor>,
    ) -> usize {
        let new_residual_dimension = factor.get_dimension();
        let block_id = self.residual_id_count;
        self.residual_blocks.push(ResidualBlock::new(
            block_id,
            self.total_residual_dimension,
            variable_key_list,
            factor,
        ));
        self.residual_id_count += 1;
        self.total_residual_dimension += new_residual_dimension;
        block_id
    }

    pub fn residual_blocks(&self) -> &[ResidualBlock] {
        &self.residual_blocks
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks.len()
    }

    /// Lock tangent index `idx` of variable `var_to_fix`.
    pub fn fix_variable(&mut self, var_to_fix: &str, idx: usize) {
        self.fixed_variable_indexes
            .entry(var_to_fix.to_owned())
            .or_default()
            .insert(idx);
    }

    /// Build the variable map from `name → (manifold, initial vector)`, attaching the fixed
    /// indices registered so far.
    ///
    /// SE(3) vectors are `[tx, ty, tz, qw, qx, qy, qz]`; the quaternion is normalized.
    pub fn initialize_variables(
        &self,
        initial_values: &HashMap<String, (ManifoldType, DVector<f64>)>,
    ) -> ApexIkResult<HashMap<String, VariableEnum>> {
        initial_values
            .iter()
            .map(|(key, (manifold, values))| -> ApexIkResult<(String, VariableEnum)> {
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(CoreError::Variable(format!(
                        "initial value of {key} is not finite"
                    ))
                    .log_with_source(ManifoldError::InvalidNumber)
                    .into());
                }
                let fixed = self.fixed_variable_indexes.get(key).cloned().unwrap_or_default();
                let variable = match manifold {
                    ManifoldType::RN => {
                        let mut var = Variable::from_vector(values.clone());
                        var.fixed_indices = fixed;
                        VariableEnum::Rn(var)
                    }
                    ManifoldType::SE3 => {
                        if values.len() != se3::SE3::REP_SIZE {
                            return Err(ApexIkError::from(ManifoldError::DimensionMismatch {
                                expected: se3::SE3::REP_SIZE,
                                actual: values.len(),
                            }));
                        }
                        let mut var = Variable::new(se3::SE3::from(values.clone()));
                        var.fixed_indices = fixed;
                        VariableEnum::SE3(var)
                    }
                };
                Ok((key.to_owned(), variable))
            })
            .collect()
    }

    /// Parameter vectors of `residual_block`, in its key order.
    fn block_parameters<'a>(
        residual_block: &ResidualBlock,
        variables: &'a HashMap<String, VariableEnum>,
    ) -> ApexIkResult<Vec<&'a VariableEnum>> {
        residual_block
            .variable_key_list
            .iter()
            .map(|key| {
                variables.get(key).ok_or_else(|| {
                    CoreError::Variable(format!(
                        "Residual block {} references unknown variable {}",
                        residual_block.residual_block_id, key
                    ))
                    .log()
                    .into()
                })
            })
            .collect()
    }

    /// Sparsity pattern of the stacked Jacobian.
    ///
    /// Every block contributes a dense `dim × dof` sub-block for each variable it reads.
    /// Entries are listed block by block, variable by variable, row-major inside each
    /// sub-block; the Jacobian values are produced in the same order.
    pub fn build_symbolic_structure(
        &self,
        variables: &HashMap<String, VariableEnum>,
        variable_index_sparce_matrix: &HashMap<String, usize>,
        total_dof: usize,
    ) -> ApexIkResult<SymbolicStructure> {
        let mut indices = Vec::<Pair<usize, usize>>::new();

        for residual_block in &self.residual_blocks {
            let block_variables = Self::block_parameters(residual_block, variables)?;
            for (var_key, variable) in residual_block.variable_key_list.iter().zip(block_variables) {
                let col_start = Self::column_of(variable_index_sparce_matrix, var_key)?;
                for row_idx in 0..residual_block.dimension() {
                    for col_idx in 0..variable.get_size() {
                        indices.push(Pair::new(
                            residual_block.residual_row_start_idx + row_idx,
                            col_start + col_idx,
                        ));
                    }
                }
            }
        }

        let (pattern, order) = SymbolicSparseColMat::try_new_from_indices(
            self.total_residual_dimension,
            total_dof,
            &indices,
        )
        .map_err(|e| {
            CoreError::SymbolicStructure(
                "Failed to build symbolic sparse matrix structure".to_string(),
            )
            .log_with_source(e)
        })?;

        Ok(SymbolicStructure { pattern, order })
    }

    fn column_of(
        variable_index_sparce_matrix: &HashMap<String, usize>,
        var_key: &str,
    ) -> ApexIkResult<usize> {
        variable_index_sparce_matrix.get(var_key).copied().ok_or_else(|| {
            CoreError::Variable(format!(
                "Missing key {} in variable-to-column-index mapping",
                var_key
            ))
            .log()
            .into()
        })
    }

    /// Stacked residual as an `m × 1` matrix.
    pub fn compute_residual_sparse(
        &self,
        variables: &HashMap<String, VariableEnum>,
    ) -> ApexIkResult<Mat<f64>> {
        let total_residual = Arc::new(Mutex::new(Col::<f64>::zeros(self.total_residual_dimension)));

        #[cfg(feature = "parallel")]
        let result: Result<Vec<()>, ApexIkError> = self
            .residual_blocks
            .par_iter()
            .map(|residual_block| {
                self.compute_residual_block(residual_block, variables, &total_residual)
            })
            .collect();

        #[cfg(not(feature = "parallel"))]
        let result: Result<Vec<()>, ApexIkError> = self
            .residual_blocks
            .iter()
            .map(|residual_block| {
                self.compute_residual_block(residual_block, variables, &total_residual)
            })
            .collect();

        result?;

        let total_residual = Self::unwrap_residual(total_residual)?;
        Ok(total_residual.as_ref().as_mat().to_owned())
    }

    /// Stacked residual and sparse Jacobian over the pattern in `symbolic_structure`.
    pub fn compute_residual_and_jacobian_sparse(
        &self,
        variables: &HashMap<String, VariableEnum>,
        variable_index_sparce_matrix: &HashMap<String, usize>,
        symbolic_structure: &SymbolicStructure,
    ) -> ApexIkResult<(Mat<f64>, SparseColMat<usize, f64>)> {
        let total_residual = Arc::new(Mutex::new(Col::<f64>::zeros(self.total_residual_dimension)));
        let total_nnz = symbolic_structure.pattern.compute_nnz();

        #[cfg(feature = "parallel")]
        let jacobian_blocks: Result<Vec<Vec<f64>>, ApexIkError> = self
            .residual_blocks
            .par_iter()
            .map(|residual_block| {
                self.compute_residual_and_jacobian_block(
                    residual_block,
                    variables,
                    variable_index_sparce_matrix,
                    &total_residual,
                )
            })
            .collect();

        #[cfg(not(feature = "parallel"))]
        let jacobian_blocks: Result<Vec<Vec<f64>>, ApexIkError> = self
            .residual_blocks
            .iter()
            .map(|residual_block| {
                self.compute_residual_and_jacobian_block(
                    residual_block,
                    variables,
                    variable_index_sparce_matrix,
                    &total_residual,
                )
            })
            .collect();

        let mut jacobian_values = Vec::with_capacity(total_nnz);
        for mut block_values in jacobian_blocks? {
            jacobian_values.append(&mut block_values);
        }

        let total_residual = Self::unwrap_residual(total_residual)?;
        let jacobian_sparse = SparseColMat::new_from_argsort(
            symbolic_structure.pattern.clone(),
            &symbolic_structure.order,
            jacobian_values.as_slice(),
        )
        .map_err(|e| {
            CoreError::SymbolicStructure(
                "Failed to create sparse Jacobian from argsort".to_string(),
            )
            .log_with_source(e)
        })?;

        Ok((total_residual.as_ref().as_mat().to_owned(), jacobian_sparse))
    }

    fn unwrap_residual(total_residual: Arc<Mutex<Col<f64>>>) -> ApexIkResult<Col<f64>> {
        let total_residual = Arc::try_unwrap(total_residual)
            .map_err(|_| {
                CoreError::ParallelComputation(
                    "Failed to unwrap Arc for total residual".to_string(),
                )
                .log()
            })?
            .into_inner()
            .map_err(|e| {
                CoreError::ParallelComputation(
                    "Failed to extract mutex inner value for total residual".to_string(),
                )
                .log_with_source(e)
            })?;
        Ok(total_residual)
    }

    fn write_block_residual(
        residual_block: &ResidualBlock,
        res: &DVector<f64>,
        total_residual: &Arc<Mutex<Col<f64>>>,
    ) -> ApexIkResult<()> {
        let mut total_residual = total_residual.lock().map_err(|e| {
            CoreError::ParallelComputation("Failed to acquire lock on total residual".to_string())
                .log_with_source(e)
        })?;

        let start_idx = residual_block.residual_row_start_idx;
        let mut total_residual_mut = total_residual.as_mut();
        for (i, value) in res.iter().enumerate() {
            total_residual_mut[start_idx + i] = *value;
        }
        Ok(())
    }

    fn compute_residual_block(
        &self,
        residual_block: &ResidualBlock,
        variables: &HashMap<String, VariableEnum>,
        total_residual: &Arc<Mutex<Col<f64>>>,
    ) -> ApexIkResult<()> {
        let param_vectors: Vec<DVector<f64>> = Self::block_parameters(residual_block, variables)?
            .iter()
            .map(|v| v.to_vector())
            .collect();
        let res = residual_block.residual(&param_vectors)?;
        Self::write_block_residual(residual_block, &res, total_residual)
    }

    /// Writes the block residual and returns its Jacobian values in pattern order.
    fn compute_residual_and_jacobian_block(
        &self,
        residual_block: &ResidualBlock,
        variables: &HashMap<String, VariableEnum>,
        variable_index_sparce_matrix: &HashMap<String, usize>,
        total_residual: &Arc<Mutex<Col<f64>>>,
    ) -> ApexIkResult<Vec<f64>> {
        let block_variables = Self::block_parameters(residual_block, variables)?;
        let param_vectors: Vec<DVector<f64>> =
            block_variables.iter().map(|v| v.to_vector()).collect();
        let local_cols: usize = block_variables.iter().map(|v| v.get_size()).sum();

        let (res, jac) = residual_block.residual_and_jacobian(&param_vectors, local_cols)?;
        Self::write_block_residual(residual_block, &res, total_residual)?;

        let mut local_jacobian_values = Vec::with_capacity(res.len() * local_cols);
        let mut variable_local_idx = 0;
        for (var_key, variable) in residual_block.variable_key_list.iter().zip(&block_variables) {
            Self::column_of(variable_index_sparce_matrix, var_key)?;
            let var_size = variable.get_size();
            for row_idx in 0..jac.nrows() {
                for col_idx in 0..var_size {
                    let value = if variable.is_fixed(col_idx) {
                        0.0
                    } else {
                        jac[(row_idx, variable_local_idx + col_idx)]
                    };
                    local_jacobian_values.push(value);
                }
            }
            variable_local_idx += var_size;
        }

        Ok(local_jacobian_values)
    }
}
