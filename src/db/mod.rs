//! SQLite design registry: lifecycle state, revisions, history and the
//! snapshot index. Plan, program and mesh content lives in files owned by
//! the plan store; this database only indexes it.

mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use cadplan_core::ExportFormat;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Design operations
    // ============================================================

    pub fn insert_design(&self, input: CreateDesignInput) -> Result<Design> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();

        conn.execute(
            "INSERT INTO designs (id, request, state, revision, export_format, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?, ?)",
            (
                input.id.as_str(),
                &input.request,
                DesignState::Initial.as_str(),
                input.export_format.extension(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(Design {
            id: input.id,
            request: input.request,
            state: DesignState::Initial,
            revision: 0,
            export_format: input.export_format,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_design(&self, id: &DesignId) -> Result<Option<Design>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let design = conn
            .query_row(
                "SELECT id, request, state, revision, export_format, created_at, updated_at
                 FROM designs WHERE id = ?",
                [id.as_str()],
                design_from_row,
            )
            .optional()?;
        Ok(design)
    }

    pub fn design_exists(&self, id: &DesignId) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM designs WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All designs, oldest first.
    pub fn list_designs(&self) -> Result<Vec<Design>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, request, state, revision, export_format, created_at, updated_at
             FROM designs ORDER BY created_at, id",
        )?;
        let designs = stmt
            .query_map([], design_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(designs)
    }

    pub fn set_design_state(&self, id: &DesignId, state: DesignState) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE designs SET state = ?, updated_at = ? WHERE id = ?",
            (state.as_str(), Utc::now().to_rfc3339(), id.as_str()),
        )?;
        Ok(rows > 0)
    }

    /// Records a new plan revision and moves the design to `Planned`.
    /// Returns the new revision, or `None` for an unknown design.
    pub fn bump_revision(&self, id: &DesignId, export_format: ExportFormat) -> Result<Option<u32>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE designs SET revision = revision + 1, state = ?, export_format = ?, updated_at = ?
             WHERE id = ?",
            (
                DesignState::Planned.as_str(),
                export_format.extension(),
                Utc::now().to_rfc3339(),
                id.as_str(),
            ),
        )?;
        if rows == 0 {
            return Ok(None);
        }
        let revision: u32 = conn.query_row(
            "SELECT revision FROM designs WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(Some(revision))
    }

    pub fn delete_design(&self, id: &DesignId) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM designs WHERE id = ?", [id.as_str()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // History operations
    // ============================================================

    pub fn append_event(&self, input: CreateEventInput) -> Result<DesignEvent> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO design_events (id, design_id, stage, outcome, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                input.design_id.as_str(),
                input.stage.as_str(),
                input.outcome.as_str(),
                &input.detail,
                now.to_rfc3339(),
            ),
        )?;

        Ok(DesignEvent {
            id,
            design_id: input.design_id,
            stage: input.stage,
            outcome: input.outcome,
            detail: input.detail,
            created_at: now,
        })
    }

    /// Events for a design in the order they were recorded.
    pub fn get_history(&self, design_id: &DesignId) -> Result<Vec<DesignEvent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, design_id, stage, outcome, detail, created_at
             FROM design_events WHERE design_id = ? ORDER BY created_at, rowid",
        )?;

        let events = stmt
            .query_map([design_id.as_str()], |row| {
                Ok(DesignEvent {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    design_id: DesignId::from_stored(row.get(1)?),
                    stage: Stage::from_str(&row.get::<_, String>(2)?).unwrap_or(Stage::Store),
                    outcome: EventOutcome::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(EventOutcome::Failed),
                    detail: row.get(4)?,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    // ============================================================
    // Snapshot operations
    // ============================================================

    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO snapshots (version_id, design_id, revision, path, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                &snapshot.version_id,
                snapshot.design_id.as_str(),
                snapshot.revision,
                &snapshot.path,
                snapshot.created_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn get_snapshots(&self, design_id: &DesignId) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT version_id, design_id, revision, path, created_at
             FROM snapshots WHERE design_id = ? ORDER BY created_at, rowid",
        )?;

        let snapshots = stmt
            .query_map([design_id.as_str()], |row| {
                Ok(Snapshot {
                    version_id: row.get(0)?,
                    design_id: DesignId::from_stored(row.get(1)?),
                    revision: row.get(2)?,
                    path: row.get(3)?,
                    created_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(snapshots)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn design_from_row(row: &Row<'_>) -> rusqlite::Result<Design> {
    Ok(Design {
        id: DesignId::from_stored(row.get(0)?),
        request: row.get(1)?,
        state: DesignState::from_str(&row.get::<_, String>(2)?).unwrap_or(DesignState::Initial),
        revision: row.get(3)?,
        export_format: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or(ExportFormat::Stl),
        created_at: parse_datetime(row.get::<_, String>(5)?),
        updated_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
