//! A factor bound to the variables it reads.
//!
//! Each block owns one [`Factor`] and occupies the rows
//! `residual_row_start_idx .. residual_row_start_idx + factor.get_dimension()` of the stacked
//! residual vector and Jacobian. Variables are passed to the factor in the order of
//! `variable_key_list`.

use nalgebra::{DMatrix, DVector};

use crate::core::CoreError;
use crate::error::ApexIkResult;
use crate::factors::Factor;

pub struct ResidualBlock {
    /// Position of the block in the problem, also its insertion order
    pub residual_block_id: usize,

    /// First row of this block in the stacked residual
    pub residual_row_start_idx: usize,

    /// Names of the variables the factor reads, in parameter order
    pub variable_key_list: Vec<String>,

    pub factor: Box<dyn Factor>,
}

impl ResidualBlock {
    pub fn new(
        residual_block_id: usize,
        residual_row_start_idx: usize,
        variable_key_list: &[&str],
        factor: Box<dyn Factor>,
    ) -> Self {
        ResidualBlock {
            residual_block_id,
            residual_row_start_idx,
            variable_key_list: variable_key_list.iter().map(|s| s.to_string()).collect(),
            factor,
        }
    }

    pub fn dimension(&self) -> usize {
        self.factor.get_dimension()
    }

    /// Residual of the block at `params`, checked against the declared dimension.
    pub fn residual(&self, params: &[DVector<f64>]) -> ApexIkResult<DVector<f64>> {
        let (residual, _) = self.factor.linearize(params, false)?;
        self.check_rows(residual.len())?;
        Ok(residual)
    }

    /// Residual and `dim × local_cols` Jacobian of the block at `params`.
    pub fn residual_and_jacobian(
        &self,
        params: &[DVector<f64>],
        local_cols: usize,
    ) -> ApexIkResult<(DVector<f64>, DMatrix<f64>)> {
        let (residual, jacobian) = self.factor.linearize(params, true)?;
        let jacobian = jacobian.ok_or_else(|| {
            CoreError::FactorLinearization(
                "Factor returned None for Jacobian when compute_jacobian=true".to_string(),
            )
            .log()
        })?;
        self.check_rows(residual.len())?;
        if jacobian.shape() != (residual.len(), local_cols) {
            return Err(CoreError::DimensionMismatch(format!(
                "block {} Jacobian is {}x{}, expected {}x{}",
                self.residual_block_id,
                jacobian.nrows(),
                jacobian.ncols(),
                residual.len(),
                local_cols
            ))
            .log()
            .into());
        }
        Ok((residual, jacobian))
    }

    fn check_rows(&self, rows: usize) -> ApexIkResult<()> {
        if rows != self.dimension() {
            return Err(CoreError::DimensionMismatch(format!(
                "block {} residual has {} rows, factor declares {}",
                self.residual_block_id,
                rows,
                self.dimension()
            ))
            .log()
            .into());
        }
        Ok(())
    }
}
