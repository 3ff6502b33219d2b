use crate::matrix::ExpressionMatrix;
use crate::modules::{detect_modules, ModuleAssignment, ModuleConfig};
use crate::network::threshold::{pick_soft_threshold, SoftThresholdSelection, ThresholdConfig};
use crate::network::{build_network, Network, NetworkConfig};
use crate::orchestrate::{run_network_pipeline, NetworkPipelineConfig, PipelineOutcome};
use crate::testing::utils::{extract_unique_groups, get_group_indices};
use crate::testing::{difference_test, DifferenceTestConfig, DifferenceTestResult};
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use single_utilities::traits::FloatOpsTS;

/// Co-expression analysis on samples × features matrices (rows = cells,
/// columns = genes).
pub trait CoexpressionOps<T>
where
    T: FloatOpsTS,
{
    fn to_expression_matrix(&self) -> anyhow::Result<ExpressionMatrix>;

    fn soft_threshold(&self, config: &ThresholdConfig) -> anyhow::Result<SoftThresholdSelection> {
        let expr = self.to_expression_matrix()?;
        Ok(pick_soft_threshold(&expr, config)?)
    }

    fn coexpression_network(&self, power: f64, config: &NetworkConfig) -> anyhow::Result<Network> {
        let expr = self.to_expression_matrix()?;
        Ok(build_network(&expr, power, config)?)
    }

    /// Modules of the network built at `power`.
    fn coexpression_modules(
        &self,
        power: f64,
        network_config: &NetworkConfig,
        module_config: &ModuleConfig,
    ) -> anyhow::Result<ModuleAssignment> {
        let expr = self.to_expression_matrix()?;
        let network = build_network(&expr, power, network_config)?;
        Ok(detect_modules(&expr, &network, module_config)?)
    }

    /// Threshold selection, network and modules in one pass.
    fn network_pipeline(&self, config: &NetworkPipelineConfig) -> anyhow::Result<PipelineOutcome> {
        let expr = self.to_expression_matrix()?;
        Ok(run_network_pipeline(&expr, config)?)
    }

    fn differential_coexpression(
        &self,
        group1_indices: &[usize],
        group2_indices: &[usize],
        config: &DifferenceTestConfig,
    ) -> anyhow::Result<DifferenceTestResult> {
        let expr = self.to_expression_matrix()?;
        let x = expr.select_samples(group1_indices)?;
        let y = expr.select_samples(group2_indices)?;
        Ok(difference_test(&x, &y, config)?)
    }

    /// Two-group test from one label per sample; the smaller label is group 1.
    fn differential_coexpression_by_groups(
        &self,
        group_ids: &[usize],
        config: &DifferenceTestConfig,
    ) -> anyhow::Result<DifferenceTestResult> {
        let unique_groups = extract_unique_groups(group_ids);
        if unique_groups.len() != 2 {
            return Err(anyhow::anyhow!(
                "Currently only two-group comparisons are supported"
            ));
        }
        let (group1_indices, group2_indices) = get_group_indices(group_ids, &unique_groups)?;
        self.differential_coexpression(&group1_indices, &group2_indices, config)
    }
}

impl<T> CoexpressionOps<T> for CsrMatrix<T>
where
    T: FloatOpsTS,
{
    fn to_expression_matrix(&self) -> anyhow::Result<ExpressionMatrix> {
        Ok(ExpressionMatrix::from_csr(self)?)
    }
}

impl<T> CoexpressionOps<T> for Array2<T>
where
    T: FloatOpsTS,
{
    fn to_expression_matrix(&self) -> anyhow::Result<ExpressionMatrix> {
        Ok(ExpressionMatrix::from_dense(self)?)
    }
}
