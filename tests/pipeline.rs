// End-to-end runs against a temporary data directory and an in-process fetcher

use cnpj_etl::db;
use cnpj_etl::{
    export_only, lookup, DatasetKind, EtlError, Fetcher, IntegrityPolicy, LoadMode, Pipeline,
    PipelineConfig,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const ENTITIES_URL: &str = "https://dadosabertos.example.gov.br/CNPJ/Empresas0.zip";
const ESTABLISHMENTS_URL: &str = "https://dadosabertos.example.gov.br/CNPJ/Estabelecimentos0.zip";

/// Serves archives from memory
struct MemoryFetcher {
    archives: HashMap<String, Vec<u8>>,
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> cnpj_etl::Result<u64> {
        let body = self.archives.get(url).ok_or_else(|| EtlError::Transport {
            url: url.to_string(),
            message: "404 Not Found".to_string(),
        })?;
        fs::write(dest, body)?;
        Ok(body.len() as u64)
    }
}

fn zip_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in members {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn line(fields: &[&str]) -> Vec<u8> {
    let mut out = fields
        .iter()
        .map(|f| format!("\"{}\"", f))
        .collect::<Vec<_>>()
        .join(";")
        .into_bytes();
    out.push(b'\n');
    out
}

fn establishment(ordem: &str, status: &str, cnae: &str, municipio: &str) -> Vec<u8> {
    let mut fields = vec![""; 30];
    fields[0] = "12345678";
    fields[1] = ordem;
    fields[2] = "55";
    fields[3] = "1";
    fields[4] = "OBRA CERTA";
    fields[5] = status;
    fields[6] = "20050103";
    fields[10] = "20050103";
    fields[11] = cnae;
    fields[13] = "RUA";
    fields[14] = "DAS FLORES";
    fields[15] = "100";
    fields[17] = "CENTRO";
    fields[18] = "70000000";
    fields[19] = "DF";
    fields[20] = municipio;
    fields[21] = "61";
    fields[22] = "33334444";
    line(&fields)
}

fn entities_archive() -> Vec<u8> {
    // razao_social carries Latin-1 bytes (Ç = C7, Ã = C3)
    let mut body = b"\"12345678\";\"CONSTRU\xc7\xc3O ALFA LTDA\";\"2062\";\"49\";\"250000,00\";\"03\";\"\"\n".to_vec();
    body.extend(line(&["87654321", "BETA COMERCIO", "2062", "49", "0,00", "01", ""]));
    body.extend(line(&["11111111", "GAMA SERVICOS", "2135", "50", "1000,00", "01", ""]));
    zip_bytes(&[
        ("K3241.K03200Y0.D40810.EMPRECSV", body),
        ("LEIAME.txt", b"layout".to_vec()),
    ])
}

fn establishments_archive() -> Vec<u8> {
    let mut body = establishment("0001", "02", "4120400", "6313");
    body.extend(establishment("0002", "02", "4711302", "6313"));
    body.extend(establishment("0003", "04", "4120400", "6313"));
    zip_bytes(&[("K3241.K03200Y0.D40810.ESTABELE", body)])
}

fn seed_dimensions(database: &Path) {
    let conn = Connection::open(database).unwrap();
    conn.execute_batch(
        "CREATE TABLE cnae (id_cnae INTEGER PRIMARY KEY, descricao_cnae TEXT);
         CREATE TABLE municipios (id_municipio INTEGER PRIMARY KEY, nome_municipio TEXT);
         CREATE TABLE motivo_situacao_cadastral (
             id_situacao_cadastral INTEGER PRIMARY KEY,
             descricao_situacao_cadastral TEXT
         );
         INSERT INTO cnae VALUES (4120400, 'Construção de edifícios');
         INSERT INTO cnae VALUES (4711302, 'Comércio varejista');
         INSERT INTO municipios VALUES (6313, 'CIDADE A');
         INSERT INTO motivo_situacao_cadastral VALUES (2, 'ATIVA');
         INSERT INTO motivo_situacao_cadastral VALUES (4, 'INAPTA');",
    )
    .unwrap();
}

/// Data directory with manifests and dimension tables in place
fn workspace(mode: LoadMode) -> (TempDir, PipelineConfig, MemoryFetcher) {
    workspace_with(
        mode,
        &format!("{}\n\nhttps://dadosabertos.example.gov.br/CNPJ/\n", ENTITIES_URL),
        &format!("{}\n", ESTABLISHMENTS_URL),
        vec![
            (ENTITIES_URL, entities_archive()),
            (ESTABLISHMENTS_URL, establishments_archive()),
        ],
    )
}

fn workspace_with(
    mode: LoadMode,
    entity_manifest: &str,
    establishment_manifest: &str,
    archives: Vec<(&str, Vec<u8>)>,
) -> (TempDir, PipelineConfig, MemoryFetcher) {
    let dir = TempDir::new().unwrap();
    let mut config = PipelineConfig::with_data_dir(dir.path().join("data"));
    config.load_mode = mode;
    config.batch_size = 2;

    fs::create_dir_all(&config.data_dir).unwrap();
    fs::write(config.manifest_path(DatasetKind::Entities), entity_manifest).unwrap();
    fs::write(
        config.manifest_path(DatasetKind::Establishments),
        establishment_manifest,
    )
    .unwrap();
    seed_dimensions(&config.database);

    let fetcher = MemoryFetcher {
        archives: archives
            .into_iter()
            .map(|(url, body)| (url.to_string(), body))
            .collect(),
    };
    (dir, config, fetcher)
}

/// Entities without 12345678, so every establishment is an orphan
fn orphan_workspace(mode: LoadMode) -> (TempDir, PipelineConfig, MemoryFetcher) {
    let mut entities = line(&["87654321", "BETA COMERCIO", "2062", "49", "0,00", "01", ""]);
    entities.extend(line(&["11111111", "GAMA SERVICOS", "2135", "50", "1000,00", "01", ""]));
    let mut establishments = establishment("0001", "02", "4120400", "6313");
    establishments.extend(establishment("0002", "02", "4120400", "6313"));

    workspace_with(
        mode,
        &format!("{}\n", ENTITIES_URL),
        &format!("{}\n", ESTABLISHMENTS_URL),
        vec![
            (ENTITIES_URL, zip_bytes(&[("K.EMPRECSV", entities)])),
            (ESTABLISHMENTS_URL, zip_bytes(&[("K.ESTABELE", establishments)])),
        ],
    )
}

fn export_text(path: &Path) -> String {
    let bytes = fs::read(path).unwrap();
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"), "export starts with a BOM");
    String::from_utf8(bytes[3..].to_vec()).unwrap()
}

#[test]
fn test_materialized_run_exports_only_matching_rows() {
    let (_dir, config, fetcher) = workspace(LoadMode::Materialized);
    let pipeline = Pipeline::new(config.clone(), fetcher).unwrap();

    let report = pipeline.run().unwrap();

    assert_eq!(report.acquisition[0].fetched, 1);
    assert_eq!(report.acquisition[0].ignored, 1);
    assert_eq!(report.load.entities.rows, 3);
    assert_eq!(report.load.establishments.rows, 3);
    assert_eq!(report.load.establishments.batches, 2);
    assert_eq!(report.normalized_rows, 6);
    assert!(report.integrity.is_clean());
    assert_eq!(report.export.rows, 1);
    assert_eq!(report.export.filter, "construction-services@v1");

    let text = export_text(&config.export_path);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("cnpj_basico;nome_fantasia;razao_social;descricao_cnae"));
    assert!(lines[1].starts_with("12345678;OBRA CERTA;CONSTRUÇÃO ALFA LTDA;Construção de edifícios;CENTRO;CIDADE A;"));
    assert!(lines[1].ends_with(";250000,00;ATIVA"));

    // ready files were normalized in place and carry the header
    let ready = config
        .extract_dir(DatasetKind::Entities)
        .join("K3241.K03200Y0.D40810.EMPRECSV.csv");
    let normalized = fs::read(&ready).unwrap();
    assert!(normalized.starts_with(b"cnpj_basico;razao_social;"));
    assert!(config.extract_dir(DatasetKind::Entities).join("LEIAME.txt").exists());

    let conn = db::open_store(&config.database).unwrap();
    assert!(db::integrity_enforced(&conn).unwrap());
    assert!(db::entity_names(&conn, "99999999").unwrap().is_empty());

    let json = fs::read_to_string(&config.report_path).unwrap();
    assert!(json.contains("\"load_mode\": \"materialized\""));
}

#[test]
fn test_rerun_skips_downloads_and_reproduces_export() {
    let (_dir, config, fetcher) = workspace(LoadMode::Materialized);
    let pipeline = Pipeline::new(config.clone(), fetcher).unwrap();

    let first = pipeline.run().unwrap();
    let first_bytes = fs::read(&config.export_path).unwrap();
    let second = pipeline.run().unwrap();
    let second_bytes = fs::read(&config.export_path).unwrap();

    assert_eq!(second.acquisition[0].fetched, 0);
    assert_eq!(second.acquisition[0].skipped, 1);
    assert_eq!(second.acquisition[1].skipped, 1);
    assert_eq!(second.load.entities.rows, 3, "tables rebuilt, not appended");
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first.export.sha256, second.export.sha256);
}

#[test]
fn test_streaming_run_matches_materialized_export() {
    let (_dir, config, fetcher) = workspace(LoadMode::Streaming);
    let pipeline = Pipeline::new(config.clone(), fetcher).unwrap();
    let streamed = pipeline.run().unwrap();

    assert_eq!(streamed.normalized_rows, 0);
    assert_eq!(streamed.load.entities.rows, 3);
    assert!(!config
        .extract_dir(DatasetKind::Entities)
        .join("K3241.K03200Y0.D40810.EMPRECSV.csv")
        .exists());

    let (_other, materialized_config, fetcher) = workspace(LoadMode::Materialized);
    let materialized = Pipeline::new(materialized_config, fetcher)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(streamed.export.sha256, materialized.export.sha256);
}

#[test]
fn test_corrupt_archive_aborts_before_loading() {
    let (_dir, config, fetcher) = workspace(LoadMode::Materialized);
    let download = config.download_dir(DatasetKind::Entities);
    fs::create_dir_all(&download).unwrap();
    fs::write(download.join("Empresas0.zip"), b"<html>maintenance</html>").unwrap();

    let pipeline = Pipeline::new(config.clone(), fetcher).unwrap();
    let err = pipeline.run().unwrap_err();

    assert!(matches!(err, EtlError::CorruptArchive { .. }), "got {err:?}");
    let conn = db::open_store(&config.database).unwrap();
    assert_eq!(db::count_rows(&conn, DatasetKind::Entities).unwrap(), 0);
    assert_eq!(db::count_rows(&conn, DatasetKind::Establishments).unwrap(), 0);
    assert!(!config.export_path.exists());
}

#[test]
fn test_transport_failure_surfaces_as_error() {
    let (_dir, config, mut fetcher) = workspace(LoadMode::Streaming);
    fetcher.archives.remove(ESTABLISHMENTS_URL);

    let pipeline = Pipeline::new(config, fetcher).unwrap();
    let err = pipeline.run().unwrap_err();

    assert!(matches!(err, EtlError::Transport { .. }), "got {err:?}");
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_orphans_fail_the_run_under_enforce() {
    let (_dir, config, fetcher) = orphan_workspace(LoadMode::Materialized);
    assert_eq!(config.integrity, IntegrityPolicy::Enforce);

    let err = Pipeline::new(config.clone(), fetcher)
        .unwrap()
        .run()
        .unwrap_err();

    match &err {
        EtlError::IntegrityViolation { orphans, sample } => {
            assert_eq!(*orphans, 2);
            assert_eq!(sample, &vec!["12345678".to_string()]);
        }
        other => panic!("expected IntegrityViolation, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 6);
    assert!(!config.export_path.exists());
    assert!(!config.report_path.exists());
}

#[test]
fn test_orphans_are_reported_under_warn() {
    let (_dir, mut config, fetcher) = orphan_workspace(LoadMode::Streaming);
    config.integrity = IntegrityPolicy::Warn;

    let report = Pipeline::new(config.clone(), fetcher).unwrap().run().unwrap();

    assert_eq!(report.integrity.orphans, 2);
    assert_eq!(report.integrity.sample, vec!["12345678".to_string()]);
    assert_eq!(report.load.establishments.rows, 2);
    assert_eq!(report.export.rows, 0, "inner join drops orphans");
    assert!(config.export_path.exists());

    let json = fs::read_to_string(&config.report_path).unwrap();
    assert!(json.contains("\"orphans\": 2"));
}

/// One archive carrying both members, every row on base identifier 12345678
fn combined_workspace(mode: LoadMode) -> (TempDir, PipelineConfig, MemoryFetcher) {
    const COMBINED_URL: &str = "https://dadosabertos.example.gov.br/CNPJ/Cnpj0.zip";

    let mut entities = Vec::new();
    for name in ["ALFA CONSTRUCOES LTDA", "ALFA CONSTRUCOES LTDA - ME", "ALFA OBRAS LTDA"] {
        entities.extend(line(&["12345678", name, "2062", "49", "100,00", "01", ""]));
    }
    let mut establishments = establishment("0001", "02", "4120400", "6313");
    establishments.extend(establishment("0002", "02", "4711302", "6313"));
    establishments.extend(establishment("0003", "04", "4120400", "6313"));

    let archive = zip_bytes(&[
        ("K3241.K03200Y0.D40810.EMPRECSV", entities),
        ("K3241.K03200Y0.D40810.ESTABELE", establishments),
    ]);
    let manifest = format!("{}\n", COMBINED_URL);
    workspace_with(mode, &manifest, &manifest, vec![(COMBINED_URL, archive)])
}

fn check_combined_scenario(mode: LoadMode) {
    let (_dir, config, fetcher) = combined_workspace(mode);
    let report = Pipeline::new(config.clone(), fetcher).unwrap().run().unwrap();

    assert_eq!(report.load.entities.rows, 3);
    assert_eq!(report.load.establishments.rows, 3);
    assert!(report.integrity.is_clean());
    // one matching establishment joined against three entity rows
    assert_eq!(report.export.rows, 3);

    let rows = lookup(&config, "12345678").unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.cnpj_basico == "12345678"));
    assert!(rows.iter().all(|r| r.nome_fantasia == "OBRA CERTA"));
    let mut names: Vec<&str> = rows.iter().map(|r| r.razao_social.as_str()).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["ALFA CONSTRUCOES LTDA", "ALFA CONSTRUCOES LTDA - ME", "ALFA OBRAS LTDA"]
    );
    assert!(lookup(&config, "99999999").unwrap().is_empty());

    let again = export_only(&config).unwrap();
    assert_eq!(again.rows, 3);
    assert_eq!(again.sha256, report.export.sha256);
}

#[test]
fn test_single_archive_scenario_materialized() {
    check_combined_scenario(LoadMode::Materialized);
}

#[test]
fn test_single_archive_scenario_streaming() {
    check_combined_scenario(LoadMode::Streaming);
}
