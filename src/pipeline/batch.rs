use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info};

use super::Pipeline;
use crate::compiler::compile_direct;
use crate::error::{ErrorReport, StageError};
use crate::executor::MeshReport;
use crate::kernel::SolidKernel;
use crate::models::{DesignId, Stage};

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Compile and check only; report the paths that would be written.
    pub simulate: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Exported { mesh: MeshReport },
    Simulated { program_path: PathBuf, mesh_path: PathBuf },
    Failed { error: ErrorReport },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub design_id: DesignId,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn failed(&self) -> impl Iterator<Item = &BatchItem> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed { .. }))
    }

    pub fn succeeded(&self) -> usize {
        self.items.len() - self.failed().count()
    }
}

impl<K: SolidKernel> Pipeline<K> {
    /// Builds each design in turn. An empty `ids` means every registered
    /// design. A failing item is reported with its id and the batch goes on.
    pub async fn run_batch(
        &self,
        ids: &[DesignId],
        options: &BatchOptions,
    ) -> Result<BatchReport, StageError> {
        let mut ids = if ids.is_empty() {
            self.list()?.into_iter().map(|design| design.id).collect()
        } else {
            ids.to_vec()
        };
        if let Some(limit) = options.limit {
            ids.truncate(limit);
        }

        let mut report = BatchReport::default();
        for id in ids {
            let outcome = if options.simulate {
                self.simulate_item(&id)
            } else {
                self.build_item(&id).await
            };
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(design_id = %id, stage = %err.stage, error = %err.error, "Batch item failed");
                    ItemOutcome::Failed {
                        error: err.report(),
                    }
                }
            };
            report.items.push(BatchItem {
                design_id: id,
                outcome,
            });
        }

        info!(
            items = report.items.len(),
            succeeded = report.succeeded(),
            simulate = options.simulate,
            "Batch finished"
        );
        Ok(report)
    }

    async fn build_item(&self, id: &DesignId) -> Result<ItemOutcome, StageError> {
        let design = self.design(id)?;
        if !design.state.has_program() {
            self.compile(id).await?;
        }
        let exported = self.export(id).await?;
        Ok(ItemOutcome::Exported {
            mesh: exported.mesh,
        })
    }

    fn simulate_item(&self, id: &DesignId) -> Result<ItemOutcome, StageError> {
        let plan = self
            .store
            .load(id)
            .map_err(|e| StageError::new(Stage::Store, Some(id), e))?;
        compile_direct(&plan).map_err(|e| StageError::new(Stage::Compile, Some(id), e))?;
        Ok(ItemOutcome::Simulated {
            program_path: self.store.program_path(id),
            mesh_path: self.store.mesh_path(id, plan.export_format),
        })
    }
}
