// 🗄️ Relational store - SQLite through rusqlite
// Two tables rebuilt per run, lookup indexes, integrity validation

use crate::dataset::DatasetKind;
use crate::error::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Secondary indexes created after the bulk load: (name, table, column)
pub const INDEXES: &[(&str, &str, &str)] = &[
    ("idx_empresas_cnpj", "empresas", "cnpj_basico"),
    ("idx_estab_cnpj", "estabelecimentos", "cnpj_basico"),
    ("idx_estab_cnae", "estabelecimentos", "id_cnae"),
    ("idx_estab_uf", "estabelecimentos", "uf"),
];

const ORPHAN_SAMPLE: i64 = 5;

/// Open (or create) the store file
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Pragmas applied to every store connection
pub fn configure(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

// ============================================================================
// SCHEMA
// ============================================================================

/// DDL for one dataset table. Every column is TEXT so values are stored
/// exactly as published.
pub fn create_table_sql(kind: DatasetKind) -> String {
    let columns: Vec<String> = kind
        .columns()
        .iter()
        .map(|column| match (kind, *column) {
            // advisory only: the parent column is not unique
            (DatasetKind::Establishments, "cnpj_basico") => {
                format!("{:<28} TEXT REFERENCES empresas (cnpj_basico)", column)
            }
            _ => format!("{:<28} TEXT", column),
        })
        .collect();

    format!(
        "CREATE TABLE {} (\n    {}\n)",
        kind.table(),
        columns.join(",\n    ")
    )
}

/// Drop and recreate both dataset tables
pub fn recreate_tables(conn: &Connection) -> Result<()> {
    suspend_integrity(conn)?;

    conn.execute("DROP TABLE IF EXISTS estabelecimentos", [])?;
    conn.execute("DROP TABLE IF EXISTS empresas", [])?;

    for kind in DatasetKind::ALL {
        conn.execute(&create_table_sql(kind), [])?;
    }

    info!("Recreated tables empresas and estabelecimentos");
    Ok(())
}

// ============================================================================
// INTEGRITY TOGGLE
// ============================================================================

/// Turn off foreign-key enforcement for the staging phase
pub fn suspend_integrity(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", false)?;
    debug!("Foreign-key enforcement suspended");
    Ok(())
}

pub fn restore_integrity(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", true)?;
    debug!("Foreign-key enforcement restored");
    Ok(())
}

pub fn integrity_enforced(conn: &Connection) -> Result<bool> {
    let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    Ok(on == 1)
}

// ============================================================================
// INSERTS
// ============================================================================

pub fn insert_sql(kind: DatasetKind) -> String {
    let columns = kind.columns();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        kind.table(),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Append one batch of decoded rows in a single transaction
pub fn insert_batch(
    conn: &mut Connection,
    kind: DatasetKind,
    rows: &[Vec<Option<String>>],
) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(&insert_sql(kind))?;
        for row in rows {
            stmt.execute(params_from_iter(row.iter()))?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

// ============================================================================
// INDEXES
// ============================================================================

pub fn create_indexes(conn: &Connection) -> Result<()> {
    for (name, table, column) in INDEXES {
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS {} ON {}({})", name, table, column),
            [],
        )?;
        debug!("Index {} ready", name);
    }
    info!("Created {} lookup indexes", INDEXES.len());
    Ok(())
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn count_rows(conn: &Connection, kind: DatasetKind) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", kind.table()),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Legal names of the entity rows carrying `base_identifier` (possibly none)
pub fn entity_names(conn: &Connection, base_identifier: &str) -> Result<Vec<Option<String>>> {
    let mut stmt =
        conn.prepare_cached("SELECT razao_social FROM empresas WHERE cnpj_basico = ?1")?;
    let names = stmt
        .query_map(params![base_identifier], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Result of the post-load referential check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Establishment rows whose base identifier has no entity row
    pub orphans: i64,
    /// A few of the offending base identifiers, smallest first
    pub sample: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphans == 0
    }
}

/// Check establishments → entities once, after both tables are staged
pub fn validate_integrity(conn: &Connection) -> Result<IntegrityReport> {
    let orphans: i64 = conn.query_row(
        "SELECT COUNT(*) FROM estabelecimentos e
         WHERE NOT EXISTS (SELECT 1 FROM empresas emp WHERE emp.cnpj_basico = e.cnpj_basico)",
        [],
        |row| row.get(0),
    )?;

    let sample = if orphans == 0 {
        Vec::new()
    } else {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT e.cnpj_basico FROM estabelecimentos e
             WHERE NOT EXISTS (SELECT 1 FROM empresas emp WHERE emp.cnpj_basico = e.cnpj_basico)
             ORDER BY e.cnpj_basico
             LIMIT ?1",
        )?;
        let sample = stmt
            .query_map(params![ORPHAN_SAMPLE], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        sample
    };

    Ok(IntegrityReport { orphans, sample })
}
