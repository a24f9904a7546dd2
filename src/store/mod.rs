//! Design plan store: the persisted plan, program and mesh of each design
//! identity, indexed by the registry database.
//!
//! Layout under the data directory:
//!
//! ```text
//! plans/{id}.json
//! programs/{id}.cad
//! meshes/{id}.{stl|obj}
//! snapshots/{id}/{version}.json
//! cadplan.db
//! ```
//!
//! Every file write goes to a temporary file in the destination directory and
//! is renamed into place, so a reader sees either the previous or the new
//! content and an interrupted write leaves the previous artifact intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use cadplan_core::{ExportFormat, Plan};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{CadError, CadResult};
use crate::models::*;

const PLANS: &str = "plans";
const PROGRAMS: &str = "programs";
const MESHES: &str = "meshes";
const SNAPSHOTS: &str = "snapshots";

#[derive(Clone)]
pub struct PlanStore {
    root: PathBuf,
    db: Database,
}

impl PlanStore {
    /// Opens (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        for dir in [PLANS, PROGRAMS, MESHES, SNAPSHOTS] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        let db = Database::open(root.join("cadplan.db"))?;
        db.migrate()?;
        Ok(Self { root, db })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn plan_path(&self, id: &DesignId) -> PathBuf {
        self.root.join(PLANS).join(format!("{}.json", id))
    }

    pub fn program_path(&self, id: &DesignId) -> PathBuf {
        self.root.join(PROGRAMS).join(format!("{}.cad", id))
    }

    pub fn mesh_path(&self, id: &DesignId, format: ExportFormat) -> PathBuf {
        self.root
            .join(MESHES)
            .join(format!("{}.{}", id, format.extension()))
    }

    pub fn snapshot_dir(&self, id: &DesignId) -> PathBuf {
        self.root.join(SNAPSHOTS).join(id.as_str())
    }

    // ============================================================
    // Plans
    // ============================================================

    pub fn create(&self, plan: &Plan) -> CadResult<DesignId> {
        self.create_with_request(plan, None)
    }

    /// Mints a new identity, persists `plan` as revision 1 and registers the
    /// design as `Planned`.
    pub fn create_with_request(&self, plan: &Plan, request: Option<&str>) -> CadResult<DesignId> {
        let mut id = DesignId::mint();
        while self.db.design_exists(&id)? {
            id = DesignId::mint();
        }

        self.db.insert_design(CreateDesignInput {
            id: id.clone(),
            request: request.map(str::to_string),
            export_format: plan.export_format,
        })?;
        if let Err(err) = write_atomic(&self.plan_path(&id), plan.to_json_pretty().as_bytes()) {
            if let Err(cleanup) = self.db.delete_design(&id) {
                warn!(design_id = %id, error = %cleanup, "Could not roll back design row");
            }
            return Err(err.into());
        }
        self.db.bump_revision(&id, plan.export_format)?;

        info!(design_id = %id, "Created design");
        Ok(id)
    }

    /// Reads the latest plan. Content that does not parse is reported as
    /// corrupt and left on disk untouched.
    pub fn load(&self, id: &DesignId) -> CadResult<Plan> {
        if !self.db.design_exists(id)? {
            return Err(CadError::NotFound(id.clone()));
        }
        let text = match std::fs::read_to_string(self.plan_path(id)) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CadError::NotFound(id.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        Plan::from_json(&text).map_err(|err| CadError::CorruptPlan {
            id: id.clone(),
            reason: err.to_string(),
        })
    }

    /// Replaces the plan of an existing design and returns the new revision.
    pub fn overwrite(&self, id: &DesignId, plan: &Plan) -> CadResult<u32> {
        if !self.db.design_exists(id)? {
            return Err(CadError::NotFound(id.clone()));
        }
        write_atomic(&self.plan_path(id), plan.to_json_pretty().as_bytes())?;
        let revision = self
            .db
            .bump_revision(id, plan.export_format)?
            .ok_or_else(|| CadError::NotFound(id.clone()))?;
        info!(design_id = %id, revision, "Overwrote plan");
        Ok(revision)
    }

    /// Copies the current plan to a new, never reused version file.
    pub fn snapshot(&self, id: &DesignId) -> CadResult<String> {
        let design = self.design(id)?;
        let source = self.plan_path(id);
        let content = std::fs::read(&source).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => CadError::NotFound(id.clone()),
            _ => err.into(),
        })?;

        let dir = self.snapshot_dir(id);
        std::fs::create_dir_all(&dir)?;
        let now = Utc::now();
        let stamp = now.format("%Y%m%d_%H%M%S_%3f").to_string();
        let base = format!("v{}_r{}", stamp, design.revision);
        let mut version_id = base.clone();
        let mut n = 1;
        while dir.join(format!("{}.json", version_id)).exists() {
            n += 1;
            version_id = format!("{}_{}", base, n);
        }
        let path = dir.join(format!("{}.json", version_id));
        write_atomic(&path, &content)?;

        self.db.insert_snapshot(&Snapshot {
            version_id: version_id.clone(),
            design_id: id.clone(),
            revision: design.revision,
            path: path.display().to_string(),
            created_at: now,
        })?;
        debug!(design_id = %id, version_id = %version_id, "Snapshot written");
        Ok(version_id)
    }

    /// Removes every artifact and registry row of a design.
    pub fn discard(&self, id: &DesignId) -> CadResult<()> {
        let mut paths = vec![self.plan_path(id), self.program_path(id)];
        paths.extend([ExportFormat::Stl, ExportFormat::Obj].map(|f| self.mesh_path(id, f)));
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), error = %err, "Could not remove artifact"),
            }
        }
        let snapshots = self.snapshot_dir(id);
        if snapshots.exists() {
            std::fs::remove_dir_all(&snapshots)?;
        }
        self.db.delete_design(id)?;
        info!(design_id = %id, "Discarded design");
        Ok(())
    }

    // ============================================================
    // Programs
    // ============================================================

    pub fn write_program(&self, id: &DesignId, source: &str) -> CadResult<PathBuf> {
        let path = self.program_path(id);
        write_atomic(&path, source.as_bytes())?;
        Ok(path)
    }

    pub fn load_program(&self, id: &DesignId) -> CadResult<String> {
        match std::fs::read_to_string(self.program_path(id)) {
            Ok(source) => Ok(source),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CadError::NotFound(id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    // ============================================================
    // Registry
    // ============================================================

    pub fn design(&self, id: &DesignId) -> CadResult<Design> {
        self.db
            .get_design(id)?
            .ok_or_else(|| CadError::NotFound(id.clone()))
    }

    pub fn list(&self) -> CadResult<Vec<Design>> {
        Ok(self.db.list_designs()?)
    }

    pub fn set_state(&self, id: &DesignId, state: DesignState) -> CadResult<()> {
        if self.db.set_design_state(id, state)? {
            Ok(())
        } else {
            Err(CadError::NotFound(id.clone()))
        }
    }

    pub fn history(&self, id: &DesignId) -> CadResult<Vec<DesignEvent>> {
        self.design(id)?;
        Ok(self.db.get_history(id)?)
    }

    pub fn snapshots(&self, id: &DesignId) -> CadResult<Vec<Snapshot>> {
        self.design(id)?;
        Ok(self.db.get_snapshots(id)?)
    }

    /// Appends to the design history. History is advisory: a failed write is
    /// logged and never fails the flow that produced the event.
    pub fn record(&self, id: &DesignId, stage: Stage, outcome: EventOutcome, detail: impl Into<String>) {
        let input = CreateEventInput {
            design_id: id.clone(),
            stage,
            outcome,
            detail: detail.into(),
        };
        if let Err(err) = self.db.append_event(input) {
            warn!(design_id = %id, error = %err, "Could not record history event");
        }
    }
}

/// Writes `bytes` to `path` through a temporary file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".cadplan-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
