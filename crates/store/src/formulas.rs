// Versioned custom formulas in SQLite

use std::path::Path;

use calcgraph_expr::{validate_with_limits, FormulaConstant, Limits};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS custom_formulas (
    id TEXT PRIMARY KEY,
    report_id TEXT,                 -- NULL = applies to every report
    use_case_id TEXT,               -- NULL = report-level field
    field_key TEXT NOT NULL,
    label TEXT NOT NULL,
    expression TEXT NOT NULL,
    input_fields TEXT NOT NULL,     -- JSON array of variable names
    constants TEXT NOT NULL,        -- JSON array of {key, label, value}
    is_active INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL,
    notes TEXT,
    created_by TEXT,
    created_at TEXT NOT NULL        -- RFC 3339
);

CREATE UNIQUE INDEX IF NOT EXISTS custom_formulas_version
    ON custom_formulas(COALESCE(report_id, ''), COALESCE(use_case_id, ''), field_key, version);

CREATE UNIQUE INDEX IF NOT EXISTS custom_formulas_one_active
    ON custom_formulas(COALESCE(report_id, ''), COALESCE(use_case_id, ''), field_key)
    WHERE is_active = 1;
"#;

const COLUMNS: &str = "id, report_id, use_case_id, field_key, label, expression, input_fields, constants, \
                       is_active, version, notes, created_by, created_at";

/// The `(reportId, useCaseId, fieldKey)` tuple that groups versions.
///
/// An empty scope id means the same as no scope id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaKey {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "scope_id")]
    pub report_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "scope_id")]
    pub use_case_id: Option<String>,
    pub field_key: String,
}

impl FormulaKey {
    pub fn new(field_key: impl Into<String>) -> Self {
        Self { field_key: field_key.into(), ..Self::default() }
    }

    pub fn for_report(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = non_empty(Some(report_id.into()));
        self
    }

    pub fn for_use_case(mut self, use_case_id: impl Into<String>) -> Self {
        self.use_case_id = non_empty(Some(use_case_id.into()));
        self
    }

    /// Collapse empty scope ids to `None`.
    pub fn normalized(self) -> Self {
        Self {
            report_id: non_empty(self.report_id),
            use_case_id: non_empty(self.use_case_id),
            field_key: self.field_key,
        }
    }
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.filter(|s| !s.is_empty())
}

fn scope_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(non_empty)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFormula {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: FormulaKey,
    pub label: String,
    pub expression: String,
    pub input_fields: Vec<String>,
    pub constants: Vec<FormulaConstant>,
    pub is_active: bool,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when saving a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomFormula {
    #[serde(flatten)]
    pub key: FormulaKey,
    pub label: String,
    pub expression: String,
    #[serde(default)]
    pub input_fields: Vec<String>,
    #[serde(default)]
    pub constants: Vec<FormulaConstant>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

// Column values as stored, before JSON/uuid/timestamp decoding.
struct RawRow {
    id: String,
    report_id: Option<String>,
    use_case_id: Option<String>,
    field_key: String,
    label: String,
    expression: String,
    input_fields: String,
    constants: String,
    is_active: bool,
    version: u32,
    notes: Option<String>,
    created_by: Option<String>,
    created_at: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            report_id: row.get(1)?,
            use_case_id: row.get(2)?,
            field_key: row.get(3)?,
            label: row.get(4)?,
            expression: row.get(5)?,
            input_fields: row.get(6)?,
            constants: row.get(7)?,
            is_active: row.get(8)?,
            version: row.get(9)?,
            notes: row.get(10)?,
            created_by: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn decode(self) -> Result<CustomFormula> {
        let corrupt = |reason: String| StoreError::Corrupt { id: self.id.clone(), reason };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let input_fields = serde_json::from_str(&self.input_fields).map_err(|e| corrupt(e.to_string()))?;
        let constants = serde_json::from_str(&self.constants).map_err(|e| corrupt(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);

        Ok(CustomFormula {
            id,
            key: FormulaKey {
                report_id: self.report_id,
                use_case_id: self.use_case_id,
                field_key: self.field_key,
            },
            label: self.label,
            expression: self.expression,
            input_fields,
            constants,
            is_active: self.is_active,
            version: self.version,
            notes: self.notes,
            created_by: self.created_by,
            created_at,
        })
    }
}

/// Custom formula versions backed by one SQLite connection.
pub struct FormulaStore {
    conn: Connection,
    limits: Limits,
}

impl FormulaStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, limits: Limits::default() })
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Save a new version for `new.key`.
    ///
    /// The expression must validate against its input fields and constant
    /// keys. The version number is one past the highest existing version for
    /// the key; the first version of a key is activated immediately.
    pub fn create_version(&mut self, mut new: NewCustomFormula) -> Result<CustomFormula> {
        new.key = new.key.normalized();
        let available: Vec<&str> = new
            .input_fields
            .iter()
            .map(String::as_str)
            .chain(new.constants.iter().map(|c| c.key.as_str()))
            .collect();
        let validation = validate_with_limits(&new.expression, &available, &self.limits);
        if !validation.is_valid {
            log::warn!("rejected custom formula for '{}': {:?}", new.key.field_key, validation.messages());
            return Err(StoreError::InvalidExpression(validation.messages()));
        }

        let input_fields = serde_json::to_string(&new.input_fields).map_err(|e| StoreError::Corrupt {
            id: new.key.field_key.clone(),
            reason: e.to_string(),
        })?;
        let constants = serde_json::to_string(&new.constants).map_err(|e| StoreError::Corrupt {
            id: new.key.field_key.clone(),
            reason: e.to_string(),
        })?;

        let tx = self.conn.transaction()?;
        let max_version: Option<u32> = tx.query_row(
            "SELECT MAX(version) FROM custom_formulas
             WHERE COALESCE(report_id, '') = COALESCE(?1, '') AND COALESCE(use_case_id, '') = COALESCE(?2, '')
               AND field_key = ?3",
            params![new.key.report_id, new.key.use_case_id, new.key.field_key],
            |row| row.get(0),
        )?;
        let version = max_version.unwrap_or(0) + 1;
        let is_active = max_version.is_none();

        let formula = CustomFormula {
            id: Uuid::new_v4(),
            key: new.key,
            label: new.label,
            expression: new.expression,
            input_fields: new.input_fields,
            constants: new.constants,
            is_active,
            version,
            notes: new.notes,
            created_by: new.created_by,
            created_at: Utc::now(),
        };

        tx.execute(
            &format!("INSERT INTO custom_formulas ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"),
            params![
                formula.id.to_string(),
                formula.key.report_id,
                formula.key.use_case_id,
                formula.key.field_key,
                formula.label,
                formula.expression,
                input_fields,
                constants,
                formula.is_active,
                formula.version,
                formula.notes,
                formula.created_by,
                formula.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        log::info!(
            "saved custom formula '{}' v{} ({})",
            formula.key.field_key,
            formula.version,
            if formula.is_active { "active" } else { "inactive" }
        );
        Ok(formula)
    }

    /// Make `id` the only active version of its key.
    ///
    /// Both updates run in one transaction; the partial unique index rejects
    /// any interleaving that would leave two rows active.
    pub fn activate(&mut self, id: &str) -> Result<CustomFormula> {
        let tx = self.conn.transaction()?;
        let key: Option<(Option<String>, Option<String>, String)> = tx
            .query_row(
                "SELECT report_id, use_case_id, field_key FROM custom_formulas WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((report_id, use_case_id, field_key)) = key else {
            return Err(StoreError::Conflict(format!("cannot activate unknown custom formula version {}", id)));
        };

        tx.execute(
            "UPDATE custom_formulas SET is_active = 0
             WHERE COALESCE(report_id, '') = COALESCE(?1, '') AND COALESCE(use_case_id, '') = COALESCE(?2, '')
               AND field_key = ?3",
            params![report_id, use_case_id, field_key],
        )?;
        tx.execute("UPDATE custom_formulas SET is_active = 1 WHERE id = ?1", params![id])?;
        tx.commit()?;

        let formula = self.get(id)?;
        log::info!("activated custom formula '{}' v{}", formula.key.field_key, formula.version);
        Ok(formula)
    }

    pub fn get(&self, id: &str) -> Result<CustomFormula> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM custom_formulas WHERE id = ?1"),
                params![id],
                RawRow::read,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .decode()
    }

    /// Every version for `key`, newest first.
    pub fn list_versions(&self, key: &FormulaKey) -> Result<Vec<CustomFormula>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM custom_formulas
             WHERE COALESCE(report_id, '') = COALESCE(?1, '') AND COALESCE(use_case_id, '') = COALESCE(?2, '')
               AND field_key = ?3
             ORDER BY version DESC"
        ))?;
        let rows = stmt.query_map(params![key.report_id, key.use_case_id, key.field_key], RawRow::read)?;

        let mut formulas = Vec::new();
        for row in rows {
            formulas.push(row?.decode()?);
        }
        Ok(formulas)
    }

    pub fn active(&self, key: &FormulaKey) -> Result<Option<CustomFormula>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM custom_formulas
                     WHERE COALESCE(report_id, '') = COALESCE(?1, '') AND COALESCE(use_case_id, '') = COALESCE(?2, '')
               AND field_key = ?3 AND is_active = 1"
                ),
                params![key.report_id, key.use_case_id, key.field_key],
                RawRow::read,
            )
            .optional()?
            .map(RawRow::decode)
            .transpose()
    }
}
