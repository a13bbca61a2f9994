//! Carrega suítes de teste a partir de arquivos JSON no disco.
//!
//! O formato é o `Suite` do módulo `protocol`; qualquer campo
//! desconhecido é ignorado pelo serde, então suítes antigas continuam
//! carregando depois de extensões do formato.

use crate::protocol::Suite;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Lê e desserializa uma suíte. Erros de IO e de parse voltam com o
/// caminho do arquivo no contexto.
pub fn load_suite_from_file(path: &Path) -> Result<Suite> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read suite file: {}", path.display()))?;
    let suite: Suite = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse suite file: {}", path.display()))?;

    info!(
        suite = %suite.meta.id,
        cases = suite.cases.len(),
        path = %path.display(),
        "suite loaded"
    );
    Ok(suite)
}
