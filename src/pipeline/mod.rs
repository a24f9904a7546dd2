//! Pipeline orchestrator.
//!
//! Drives a design through `Initial → Planned → Compiled → Exported`. Every
//! stage works in memory and persists only once it has succeeded, so a failed
//! stage never replaces an artifact from an earlier run. Each flow holds the
//! design's lock from start to finish.

mod batch;
mod lock;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cadplan_core::defaults::InferredDimension;
use cadplan_core::{ExportFormat, Plan};
use serde::Serialize;
use tracing::{info, warn};

use crate::compiler::{CompiledProgram, Compiler};
use crate::config::{CompileStrategy, Config};
use crate::editor::{Adjustment, Editor, Target};
use crate::error::{CadError, CadResult, StageError};
use crate::executor::{persist_mesh, Executor, MeshReport, Rendered};
use crate::kernel::{SolidKernel, VoxelKernel};
use crate::llm::{ChatClient, LanguageModel};
use crate::models::*;
use crate::store::PlanStore;
use crate::translator::Translator;

pub use batch::{BatchItem, BatchOptions, BatchReport, ItemOutcome};
pub use lock::{DesignGuard, DesignLocks};

// ============================================================
// Flow results
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub program_path: PathBuf,
    pub strategy: CompileStrategy,
    pub model_attempts: u32,
    pub mesh: MeshReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Created {
    pub design: Design,
    pub plan: Plan,
    pub inferred: Vec<InferredDimension>,
    pub build: Build,
}

#[derive(Debug, Clone, Serialize)]
pub struct Refined {
    pub design: Design,
    pub plan: Plan,
    pub targets: Vec<Target>,
    pub adjustments: Vec<Adjustment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub build: Build,
}

#[derive(Debug, Clone, Serialize)]
pub struct Compiled {
    pub design: Design,
    pub program_path: PathBuf,
    pub result_name: String,
    pub strategy: CompileStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct Exported {
    pub design: Design,
    pub mesh: MeshReport,
}

/// Everything persisted for one design.
#[derive(Debug, Clone, Serialize)]
pub struct DesignView {
    pub design: Design,
    pub plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_path: Option<PathBuf>,
}

// ============================================================
// Pipeline
// ============================================================

pub struct Pipeline<K: SolidKernel = VoxelKernel> {
    config: Arc<Config>,
    store: PlanStore,
    model: Arc<dyn LanguageModel>,
    executor: Executor<K>,
    locks: DesignLocks,
}

impl<K: SolidKernel> Clone for Pipeline<K> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            model: Arc::clone(&self.model),
            executor: self.executor.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl Pipeline<VoxelKernel> {
    /// Production wiring: store under `config.data_dir`, the configured chat
    /// endpoint and the voxel kernel.
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let store = PlanStore::open(&config.data_dir)?;
        let model = Arc::new(ChatClient::from_config(&config.model)?);
        let kernel = VoxelKernel::new(config.kernel.resolution);
        Ok(Self::new(config, store, model, kernel))
    }
}

/// Sets the flag when a kernel run is abandoned, so the blocking task stops
/// at its next checkpoint.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl<K: SolidKernel> Pipeline<K> {
    pub fn new(config: Config, store: PlanStore, model: Arc<dyn LanguageModel>, kernel: K) -> Self {
        Self {
            config: Arc::new(config),
            store,
            model,
            executor: Executor::new(Arc::new(kernel)),
            locks: DesignLocks::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    pub fn locks(&self) -> &DesignLocks {
        &self.locks
    }

    // ============================================================
    // Flows
    // ============================================================

    /// Request text to exported mesh under a fresh design id. Any failure
    /// after the plan was stored discards the new design entirely.
    pub async fn create(&self, request: &str) -> Result<Created, StageError> {
        let translation = Translator::new(self.model.as_ref(), &self.config)
            .translate(request)
            .await
            .map_err(|e| StageError::new(Stage::Translate, None, e))?;

        let id = self
            .store
            .create_with_request(&translation.plan, Some(request.trim()))
            .map_err(|e| StageError::new(Stage::Store, None, e))?;
        let _guard = self.lock(&id, Stage::Store)?;
        self.store.record(
            &id,
            Stage::Translate,
            EventOutcome::Succeeded,
            format!(
                "{} feature(s), {} inferred dimension(s), {} prompt(s)",
                translation.plan.features.len(),
                translation.inferred.len(),
                translation.attempts
            ),
        );

        let build = match self.build(&id, &translation.plan).await {
            Ok(build) => build,
            Err(err) => {
                if let Err(discard) = self.store.discard(&id) {
                    warn!(design_id = %id, error = %discard, "Could not discard failed design");
                }
                return Err(err);
            }
        };

        let design = self.design(&id)?;
        info!(design_id = %id, mesh = %build.mesh.path.display(), "Design created");
        Ok(Created {
            design,
            plan: translation.plan,
            inferred: translation.inferred,
            build,
        })
    }

    /// Applies a change request to the stored plan and rebuilds.
    ///
    /// The new plan is stored as the next revision before rebuilding. When the
    /// rebuild fails the previous program and mesh stay in place and the
    /// design is left `Planned`.
    pub async fn refine(&self, id: &DesignId, request: &str) -> Result<Refined, StageError> {
        let _guard = self.lock(id, Stage::Edit)?;
        let design = self.design(id)?;
        if design.state == DesignState::Initial {
            return Err(StageError::new(
                Stage::Edit,
                Some(id),
                CadError::ValidationFailed(format!("design {} has no plan to refine", id)),
            ));
        }
        let plan = self.store.load(id).map_err(|e| self.fail(Stage::Store, id, e))?;

        let outcome = Editor::new(self.model.as_ref(), &self.config)
            .edit(&plan, request)
            .await
            .map_err(|e| self.fail(Stage::Edit, id, e))?;

        let snapshot = if self.config.snapshots {
            Some(self.store.snapshot(id).map_err(|e| self.fail(Stage::Store, id, e))?)
        } else {
            None
        };
        let revision = self
            .store
            .overwrite(id, &outcome.plan)
            .map_err(|e| self.fail(Stage::Store, id, e))?;

        let targets: Vec<String> = outcome.targets.iter().map(ToString::to_string).collect();
        self.store.record(
            id,
            Stage::Edit,
            EventOutcome::Succeeded,
            format!("revision {}: {} ({})", revision, request.trim(), targets.join(", ")),
        );
        for adjustment in &outcome.adjustments {
            self.store.record(
                id,
                Stage::Edit,
                EventOutcome::Adjusted,
                format!(
                    "{}.{} {} -> {} [{}]",
                    adjustment.location,
                    adjustment.key,
                    adjustment.from,
                    adjustment.to,
                    adjustment.rule.id()
                ),
            );
        }

        let build = self.build(id, &outcome.plan).await?;
        let design = self.design(id)?;
        info!(design_id = %id, revision, "Design refined");
        Ok(Refined {
            design,
            plan: outcome.plan,
            targets: outcome.targets,
            adjustments: outcome.adjustments,
            snapshot,
            build,
        })
    }

    /// Compiles the stored plan and persists the program. The mesh is not
    /// touched; run [`Pipeline::export`] afterwards.
    pub async fn compile(&self, id: &DesignId) -> Result<Compiled, StageError> {
        let _guard = self.lock(id, Stage::Compile)?;
        let plan = self.store.load(id).map_err(|e| self.fail(Stage::Store, id, e))?;
        let compiled = self.compile_plan(id, &plan).await?;
        let program_path = self.persist_program(id, &compiled)?;
        Ok(Compiled {
            design: self.design(id)?,
            program_path,
            result_name: compiled.result_name,
            strategy: compiled.strategy,
        })
    }

    /// Re-runs the persisted program and rewrites the mesh. Deterministic:
    /// an unchanged program exports byte-identical output.
    pub async fn export(&self, id: &DesignId) -> Result<Exported, StageError> {
        let _guard = self.lock(id, Stage::Export)?;
        let design = self.design(id)?;
        if !design.state.has_program() {
            return Err(StageError::new(
                Stage::Export,
                Some(id),
                CadError::ValidationFailed(format!(
                    "design {} has no program for its current plan; compile it first",
                    id
                )),
            ));
        }
        let source = self
            .store
            .load_program(id)
            .map_err(|e| self.fail(Stage::Store, id, e))?;
        let rendered = self
            .run_kernel(id, source, design.export_format)
            .await
            .map_err(|e| self.fail(Stage::Execute, id, e))?;
        let mesh = self.persist_mesh(id, &rendered)?;
        Ok(Exported {
            design: self.design(id)?,
            mesh,
        })
    }

    /// Copies the current plan into a new snapshot version.
    pub fn snapshot(&self, id: &DesignId) -> Result<String, StageError> {
        let _guard = self.lock(id, Stage::Store)?;
        let version = self
            .store
            .snapshot(id)
            .map_err(|e| StageError::new(Stage::Store, Some(id), e))?;
        info!(design_id = %id, version = %version, "Snapshot taken");
        Ok(version)
    }

    pub fn show(&self, id: &DesignId) -> Result<DesignView, StageError> {
        let design = self.design(id)?;
        let plan = self
            .store
            .load(id)
            .map_err(|e| StageError::new(Stage::Store, Some(id), e))?;
        let program = if design.state.has_program() {
            self.store.load_program(id).ok()
        } else {
            None
        };
        let mesh_path = Some(self.store.mesh_path(id, design.export_format))
            .filter(|path| design.state == DesignState::Exported && path.exists());
        Ok(DesignView {
            design,
            plan,
            program,
            mesh_path,
        })
    }

    pub fn list(&self) -> Result<Vec<Design>, StageError> {
        self.store
            .list()
            .map_err(|e| StageError::new(Stage::Store, None, e))
    }

    pub fn history(&self, id: &DesignId) -> Result<Vec<DesignEvent>, StageError> {
        self.store
            .history(id)
            .map_err(|e| StageError::new(Stage::Store, Some(id), e))
    }

    pub fn snapshots(&self, id: &DesignId) -> Result<Vec<Snapshot>, StageError> {
        self.store
            .snapshots(id)
            .map_err(|e| StageError::new(Stage::Store, Some(id), e))
    }

    // ============================================================
    // Stages
    // ============================================================

    /// Compile and execute in memory, then persist program and mesh.
    async fn build(&self, id: &DesignId, plan: &Plan) -> Result<Build, StageError> {
        let compiled = self.compile_plan(id, plan).await?;
        let rendered = self
            .run_kernel(id, compiled.source.clone(), plan.export_format)
            .await
            .map_err(|e| self.fail(Stage::Execute, id, e))?;

        let program_path = self.persist_program(id, &compiled)?;
        let mesh = self.persist_mesh(id, &rendered)?;
        Ok(Build {
            program_path,
            strategy: compiled.strategy,
            model_attempts: compiled.attempts,
            mesh,
        })
    }

    async fn compile_plan(&self, id: &DesignId, plan: &Plan) -> Result<CompiledProgram, StageError> {
        Compiler::new(self.model.as_ref(), &self.config)
            .compile(plan)
            .await
            .map_err(|e| self.fail(Stage::Compile, id, e))
    }

    fn persist_program(&self, id: &DesignId, compiled: &CompiledProgram) -> Result<PathBuf, StageError> {
        let path = self
            .store
            .write_program(id, &compiled.source)
            .map_err(|e| self.fail(Stage::Store, id, e))?;
        self.store
            .set_state(id, DesignState::Compiled)
            .map_err(|e| self.fail(Stage::Store, id, e))?;
        self.store.record(
            id,
            Stage::Compile,
            EventOutcome::Succeeded,
            format!(
                "{:?} strategy, {} statement(s), result `{}`",
                compiled.strategy,
                compiled.program.statements.len(),
                compiled.result_name
            ),
        );
        Ok(path)
    }

    fn persist_mesh(&self, id: &DesignId, rendered: &Rendered) -> Result<MeshReport, StageError> {
        let path = self.store.mesh_path(id, rendered.format);
        let report = persist_mesh(rendered, &path).map_err(|e| self.fail(Stage::Export, id, e))?;
        self.store
            .set_state(id, DesignState::Exported)
            .map_err(|e| self.fail(Stage::Store, id, e))?;
        self.store.record(
            id,
            Stage::Export,
            EventOutcome::Succeeded,
            format!("{} ({} bytes, volume {:.3})", path.display(), report.bytes, report.volume),
        );
        info!(design_id = %id, path = %path.display(), volume = report.volume, "Mesh exported");
        Ok(report)
    }

    /// Runs a program on the blocking pool under the kernel timeout. A panic
    /// inside the kernel fails this run only.
    async fn run_kernel(&self, id: &DesignId, source: String, format: ExportFormat) -> CadResult<Rendered> {
        let executor = self.executor.clone();
        let name = id.to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(Arc::clone(&cancel));

        let task = tokio::task::spawn_blocking(move || executor.render(&source, format, &name, &cancel));
        let timeout = self.config.kernel.timeout;
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => {
                Err(CadError::ValidationFailed("geometry kernel panicked".to_string()))
            }
            Ok(Err(join)) => Err(CadError::ValidationFailed(join.to_string())),
            Err(_) => Err(CadError::UpstreamUnavailable(format!(
                "geometry kernel did not finish within {:?}",
                timeout
            ))),
        }
    }

    // ============================================================
    // Helpers
    // ============================================================

    fn lock(&self, id: &DesignId, stage: Stage) -> Result<DesignGuard, StageError> {
        self.locks
            .acquire(id)
            .map_err(|e| StageError::new(stage, Some(id), e))
    }

    fn design(&self, id: &DesignId) -> Result<Design, StageError> {
        self.store
            .design(id)
            .map_err(|e| StageError::new(Stage::Store, Some(id), e))
    }

    /// Records a failed stage in the design history.
    fn fail(&self, stage: Stage, id: &DesignId, error: CadError) -> StageError {
        warn!(design_id = %id, stage = %stage, error = %error, "Stage failed");
        self.store
            .record(id, stage, EventOutcome::Failed, error.to_string());
        StageError::new(stage, Some(id), error)
    }
}
