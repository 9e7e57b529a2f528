// 📤 Projection Exporter
// One fixed filtered join → semicolon-delimited UTF-8 (with BOM) file

use crate::db::table_exists;
use crate::error::{EtlError, Result};
use crate::records::DELIMITER;
use crate::staging::{commit, staging_file};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Dimension tables the projection joins against (never written here)
pub const DIMENSION_TABLES: &[&str] = &["cnae", "municipios", "motivo_situacao_cadastral"];

// ============================================================================
// FILTER SET
// ============================================================================

/// ProjectionFilter - the business question the export answers.
///
/// Changing any list means a new constant with a new version, so reports
/// from different runs can tell whether they answered the same question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectionFilter {
    pub name: &'static str,
    pub version: u32,
    /// Municipality codes (region filter), compared numerically
    pub municipalities: &'static [i64],
    /// Registration status codes, compared numerically
    pub statuses: &'static [i64],
    /// Main activity (CNAE) codes, compared as text
    pub activity_codes: &'static [&'static str],
}

impl ProjectionFilter {
    pub fn label(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }
}

/// Active, suspended and closed construction/engineering businesses in the
/// three target municipalities.
pub const CONSTRUCTION_SERVICES_V1: ProjectionFilter = ProjectionFilter {
    name: "construction-services",
    version: 1,
    municipalities: &[6313, 7157, 6669],
    statuses: &[2, 3, 8],
    activity_codes: &[
        "1622601", "1622602", "1622699", "2330301", "2330302", "2330305", "2599301", "3313901",
        "3314707", "3329501", "3511500", "4120400", "4213800", "4221902", "4221903", "4221904",
        "4221905", "4222701", "4292801", "4299501", "4299599", "4311801", "4311802", "4312600",
        "4313400", "4319300", "4321500", "4322301", "4322302", "4322303", "4329105", "4329199",
        "4330401", "4330402", "4330403", "4330404", "4330405", "4330499", "4391600", "4399101",
        "4399102", "4399103", "4399104", "4399105", "4399199", "7111100", "7112000", "7119701",
        "7119702", "7410202",
    ],
};

// ============================================================================
// ROWS
// ============================================================================

/// Output columns, in file order
pub const PROJECTION_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "nome_fantasia",
    "razao_social",
    "descricao_cnae",
    "bairro",
    "nome_municipio",
    "tipo_do_logradouro",
    "logradouro",
    "numero",
    "cep",
    "complemento",
    "ddd1",
    "telefone1",
    "ddd2",
    "telefone2",
    "correio_eletronico",
    "data_de_inicio_atividade",
    "data_situacao_cadastro",
    "capital_social",
    "descricao_situacao_cadastral",
];

/// One exported row; NULLs come back as empty strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionRow {
    pub cnpj_basico: String,
    pub nome_fantasia: String,
    pub razao_social: String,
    pub descricao_cnae: String,
    pub bairro: String,
    pub nome_municipio: String,
    pub tipo_do_logradouro: String,
    pub logradouro: String,
    pub numero: String,
    pub cep: String,
    pub complemento: String,
    pub ddd1: String,
    pub telefone1: String,
    pub ddd2: String,
    pub telefone2: String,
    pub correio_eletronico: String,
    pub data_de_inicio_atividade: String,
    pub data_situacao_cadastro: String,
    pub capital_social: String,
    pub descricao_situacao_cadastral: String,
}

fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map_err(rusqlite::Error::Utf8Error)?
            .to_string(),
        ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

impl ProjectionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ProjectionRow {
            cnpj_basico: text_at(row, 0)?,
            nome_fantasia: text_at(row, 1)?,
            razao_social: text_at(row, 2)?,
            descricao_cnae: text_at(row, 3)?,
            bairro: text_at(row, 4)?,
            nome_municipio: text_at(row, 5)?,
            tipo_do_logradouro: text_at(row, 6)?,
            logradouro: text_at(row, 7)?,
            numero: text_at(row, 8)?,
            cep: text_at(row, 9)?,
            complemento: text_at(row, 10)?,
            ddd1: text_at(row, 11)?,
            telefone1: text_at(row, 12)?,
            ddd2: text_at(row, 13)?,
            telefone2: text_at(row, 14)?,
            correio_eletronico: text_at(row, 15)?,
            data_de_inicio_atividade: text_at(row, 16)?,
            data_situacao_cadastro: text_at(row, 17)?,
            capital_social: text_at(row, 18)?,
            descricao_situacao_cadastral: text_at(row, 19)?,
        })
    }
}

// ============================================================================
// QUERY
// ============================================================================

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// SQL for `filter`, optionally restricted to one base identifier
pub fn projection_sql(filter: &ProjectionFilter, restrict_base: bool) -> String {
    let mut sql = format!(
        "SELECT
            e.cnpj_basico, e.nome_fantasia, emp.razao_social, c.descricao_cnae,
            e.bairro, m.nome_municipio, e.tipo_do_logradouro, e.logradouro,
            e.numero, e.cep, e.complemento, e.ddd1, e.telefone1, e.ddd2,
            e.telefone2, e.correio_eletronico, e.data_de_inicio_atividade,
            e.data_situacao_cadastro, emp.capital_social, mot.descricao_situacao_cadastral
         FROM estabelecimentos e
         JOIN cnae c ON e.id_cnae = c.id_cnae
         JOIN empresas emp ON emp.cnpj_basico = e.cnpj_basico
         JOIN municipios m ON m.id_municipio = e.id_municipio
         JOIN motivo_situacao_cadastral mot ON mot.id_situacao_cadastral = e.id_situacao_cadastral
         WHERE CAST(e.id_municipio AS INTEGER) IN ({})
           AND CAST(e.id_situacao_cadastral AS INTEGER) IN ({})
           AND e.id_cnae IN ({})",
        placeholders(filter.municipalities.len()),
        placeholders(filter.statuses.len()),
        placeholders(filter.activity_codes.len()),
    );
    if restrict_base {
        sql.push_str("\n           AND e.cnpj_basico = ?");
    }
    sql.push_str("\n         ORDER BY e.cnpj_basico, e.cnpj_ordem, e.cnpj_dv, e.rowid, emp.rowid");
    sql
}

fn projection_params(filter: &ProjectionFilter, base_identifier: Option<&str>) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::new();
    values.extend(filter.municipalities.iter().map(|&m| Value::Integer(m)));
    values.extend(filter.statuses.iter().map(|&s| Value::Integer(s)));
    values.extend(
        filter
            .activity_codes
            .iter()
            .map(|code| Value::Text(code.to_string())),
    );
    if let Some(base) = base_identifier {
        values.push(Value::Text(base.to_string()));
    }
    values
}

/// Fail early when a dimension table the join needs is absent
pub fn check_dimensions(conn: &Connection) -> Result<()> {
    for table in DIMENSION_TABLES {
        if !table_exists(conn, table)? {
            return Err(EtlError::MissingDimension(table.to_string()));
        }
    }
    Ok(())
}

/// Run the projection and materialize the whole result in memory
pub fn query_projection(
    conn: &Connection,
    filter: &ProjectionFilter,
    base_identifier: Option<&str>,
) -> Result<Vec<ProjectionRow>> {
    check_dimensions(conn)?;

    let mut stmt = conn.prepare(&projection_sql(filter, base_identifier.is_some()))?;
    let params = projection_params(filter, base_identifier);
    let rows = stmt
        .query_map(params_from_iter(params.iter()), ProjectionRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// EXPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub rows: usize,
    pub filter: String,
    /// SHA-256 of the written file, hex
    pub sha256: String,
}

/// Write the projection to `output` (BOM, header row, `;` delimiter)
pub fn export_projection(
    conn: &Connection,
    filter: &ProjectionFilter,
    output: &Path,
) -> Result<ExportSummary> {
    let rows = query_projection(conn, filter, None)?;

    let temp = staging_file(output, ".export-")?;

    {
        let mut out = BufWriter::new(temp.as_file());
        out.write_all(UTF8_BOM)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_writer(out);
        writer.write_record(PROJECTION_COLUMNS)?;
        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    commit(temp, output)?;

    let sha256 = file_sha256(output)?;
    info!(
        "Exported {} rows to {} (filter {}, sha256 {})",
        rows.len(),
        output.display(),
        filter.label(),
        sha256
    );

    Ok(ExportSummary {
        path: output.to_path_buf(),
        rows: rows.len(),
        filter: filter.label(),
        sha256,
    })
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
