// 🗂️ Dataset kinds - fixed column schemas and archive naming conventions

use serde::{Deserialize, Serialize};

// ============================================================================
// COLUMN SCHEMAS
// ============================================================================

/// Entity (company) layout, in file order.
pub const ENTITY_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "razao_social",
    "natureza_juridica",
    "qualificacao_responsavel",
    "capital_social",
    "porte_empresa",
    "ente_federativo_responsavel",
];

/// Establishment layout, in file order.
pub const ESTABLISHMENT_COLUMNS: &[&str] = &[
    "cnpj_basico",
    "cnpj_ordem",
    "cnpj_dv",
    "identificador_matriz_filial",
    "nome_fantasia",
    "id_situacao_cadastral",
    "data_situacao_cadastro",
    "motivo_cadastral",
    "nome_da_cidade_no_exterior",
    "pais",
    "data_de_inicio_atividade",
    "id_cnae",
    "cnae_fiscal_secundaria",
    "tipo_do_logradouro",
    "logradouro",
    "numero",
    "complemento",
    "bairro",
    "cep",
    "uf",
    "id_municipio",
    "ddd1",
    "telefone1",
    "ddd2",
    "telefone2",
    "ddd_do_fax",
    "fax",
    "correio_eletronico",
    "situacao_especial",
    "data_da_situacao_especial",
];

/// Suffix appended to recognized members once they are ready for loading
pub const READY_SUFFIX: &str = ".csv";

// ============================================================================
// DATASET KIND
// ============================================================================

/// DatasetKind - which of the two registry feeds a file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Entities,
    Establishments,
}

impl DatasetKind {
    /// Both kinds, in the order the pipeline acquires them
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Entities, DatasetKind::Establishments];

    /// Table name in the store (also the working-directory name)
    pub fn table(&self) -> &'static str {
        match self {
            DatasetKind::Entities => "empresas",
            DatasetKind::Establishments => "estabelecimentos",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            DatasetKind::Entities => ENTITY_COLUMNS,
            DatasetKind::Establishments => ESTABLISHMENT_COLUMNS,
        }
    }

    /// Member-name suffix the publisher uses for this kind inside the archives
    pub fn member_suffix(&self) -> &'static str {
        match self {
            DatasetKind::Entities => ".EMPRECSV",
            DatasetKind::Establishments => ".ESTABELE",
        }
    }

    pub fn manifest_name(&self) -> String {
        format!("{}.txt", self.table())
    }

    /// True for raw (not yet renamed) members of this kind
    pub fn is_member(&self, name: &str) -> bool {
        name.ends_with(self.member_suffix())
    }

    /// True for members already renamed with the ready marker
    pub fn is_ready_file(&self, name: &str) -> bool {
        name.strip_suffix(READY_SUFFIX)
            .map(|stem| self.is_member(stem))
            .unwrap_or(false)
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_counts() {
        assert_eq!(DatasetKind::Entities.columns().len(), 7);
        assert_eq!(DatasetKind::Establishments.columns().len(), 30);
        assert_eq!(DatasetKind::Entities.columns()[0], "cnpj_basico");
        assert_eq!(DatasetKind::Establishments.columns()[0], "cnpj_basico");
    }

    #[test]
    fn test_member_recognition() {
        let e = DatasetKind::Entities;
        assert!(e.is_member("K3241.K03200Y0.D40810.EMPRECSV"));
        assert!(!e.is_member("K3241.K03200Y0.D40810.ESTABELE"));
        assert!(!e.is_member("K3241.K03200Y0.D40810.EMPRECSV.csv"));
        assert!(e.is_ready_file("K3241.K03200Y0.D40810.EMPRECSV.csv"));
        assert!(!e.is_ready_file("notes.csv"));

        let s = DatasetKind::Establishments;
        assert!(s.is_member("K3241.K03200Y1.D40810.ESTABELE"));
        assert!(s.is_ready_file("K3241.K03200Y1.D40810.ESTABELE.csv"));
    }

    #[test]
    fn test_table_names() {
        assert_eq!(DatasetKind::Entities.to_string(), "empresas");
        assert_eq!(DatasetKind::Establishments.manifest_name(), "estabelecimentos.txt");
    }
}
