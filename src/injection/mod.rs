//! # Módulo de Injeção - Templates de Parâmetros entre Test Cases
//!
//! Este módulo resolve placeholders `{{dep.caminho}}` dentro dos
//! `input_params` de um test case, buscando valores nas respostas já
//! capturadas das dependências.
//!
//! ## Para todos entenderem:
//!
//! Imagine que o case `start_job_run` cria um job run e a resposta traz
//! o id gerado. O case seguinte precisa desse id:
//!
//! ```text
//! Case 1: start_job_run
//! Resposta: { "result": { "content": [{ "text": "{\"job_run_id\": \"jr_abc\"}" }] } }
//!
//! Case 2: get_job_run
//! Parâmetro: "job_run_id": "{{start_job_run.result.content[0].text.job_run_id}}"
//! Resolvido: "job_run_id": "jr_abc"
//! ```
//!
//! ## Sintaxe do caminho:
//!
//! | Token    | Significado                                   |
//! |----------|-----------------------------------------------|
//! | `campo`  | Acesso a chave de objeto                      |
//! | `[0]`    | Índice de array                               |
//! | `texto.x`| Se o valor atual for string, tenta parsear    |
//! |          | como JSON antes de descer em `x`              |
//!
//! O tokenizador e o avaliador são separados da reescrita de parâmetros
//! para poderem ser testados isoladamente.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Respostas capturadas por test case, indexadas pelo nome.
pub type ResponseMap = HashMap<String, Value>;

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid template regex"));

static PATH_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+|\[\d+\]").expect("valid path token regex"));

// ============================================================================
// ERROS
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum InjectionError {
    /// O template referencia uma dependência sem resposta registrada
    /// (ou com resposta nula). É assim que a falha de uma dependência
    /// impede chamadas sem sentido nos dependentes.
    #[error("missing response for dependency '{dependency}'")]
    MissingDependencyResponse { dependency: String },

    /// Falha ao navegar o caminho dentro da resposta: container errado,
    /// chave ausente, índice fora do array ou string que não é JSON.
    #[error("failed to extract '{path}': {reason}")]
    Extraction { path: String, reason: String },
}

// ============================================================================
// AVALIADOR DE CAMINHO
// ============================================================================

/// Navega `value` seguindo o caminho tokenizado.
///
/// Tokens de índice exigem array; tokens de campo exigem objeto, com a
/// exceção de strings, que são parseadas como JSON antes do lookup
/// (respostas MCP carregam JSON embutido em campos de texto).
pub fn extract_path(value: &Value, path: &str) -> Result<Value, InjectionError> {
    let mut current = value.clone();

    for token in PATH_TOKEN_RE.find_iter(path) {
        let token = token.as_str();

        if token.starts_with('[') {
            let index: usize = token[1..token.len() - 1]
                .parse()
                .expect("token regex only matches digits");
            let arr = current.as_array().ok_or_else(|| InjectionError::Extraction {
                path: path.to_string(),
                reason: format!("expected array at '{}', got {}", token, kind_of(&current)),
            })?;
            current = arr
                .get(index)
                .cloned()
                .ok_or_else(|| InjectionError::Extraction {
                    path: path.to_string(),
                    reason: format!("index {} out of bounds (array has {} items)", index, arr.len()),
                })?;
        } else {
            if let Value::String(s) = &current {
                current = serde_json::from_str(s).map_err(|_| InjectionError::Extraction {
                    path: path.to_string(),
                    reason: format!("expected JSON string at '{}' but failed to parse", token),
                })?;
            }
            let obj = current.as_object().ok_or_else(|| InjectionError::Extraction {
                path: path.to_string(),
                reason: format!("expected object at '{}', got {}", token, kind_of(&current)),
            })?;
            current = obj
                .get(token)
                .cloned()
                .ok_or_else(|| InjectionError::Extraction {
                    path: path.to_string(),
                    reason: format!("key '{}' not found", token),
                })?;
        }
    }

    Ok(current)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// RESOLUÇÃO DE TEMPLATES
// ============================================================================

/// Resolve um único template `dep.sub.caminho` contra o response map.
/// O primeiro segmento identifica a dependência; o restante é o caminho
/// dentro da resposta dela.
pub fn resolve_template(template: &str, responses: &ResponseMap) -> Result<Value, InjectionError> {
    let (dep_name, sub_path) = match template.split_once('.') {
        Some((dep, rest)) => (dep, rest),
        None => (template, ""),
    };

    let response = responses
        .get(dep_name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| InjectionError::MissingDependencyResponse {
            dependency: dep_name.to_string(),
        })?;

    extract_path(response, sub_path)
}

/// Reescreve recursivamente um valor de parâmetro, substituindo todos
/// os tokens `{{...}}` embutidos em strings. Listas e objetos são
/// resolvidos elemento a elemento; chaves nunca são templatadas.
pub fn resolve_params(params: &Value, responses: &ResponseMap) -> Result<Value, InjectionError> {
    match params {
        Value::String(s) => resolve_string(s, responses),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_params(item, responses)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_params(v, responses)?);
            }
            Ok(Value::Object(resolved))
        }
        scalar => Ok(scalar.clone()),
    }
}

/// Substitui cada token dentro de uma string. Se a string inteira for
/// um único token, o valor resolvido mantém o tipo original (número,
/// objeto, lista). Strings mistas viram substituição textual: strings
/// sem aspas, o resto em JSON compacto.
fn resolve_string(input: &str, responses: &ResponseMap) -> Result<Value, InjectionError> {
    if let Some(capture) = TEMPLATE_RE.captures(input) {
        let whole = capture.get(0).expect("regex always has group 0");
        if whole.start() == 0 && whole.end() == input.len() {
            let template = capture.get(1).expect("template group").as_str().trim();
            return resolve_template(template, responses);
        }
    }

    let mut result = String::new();
    let mut last_index = 0;

    for capture in TEMPLATE_RE.captures_iter(input) {
        let matched = capture.get(0).expect("regex always has group 0");
        result.push_str(&input[last_index..matched.start()]);

        let template = capture.get(1).expect("template group").as_str().trim();
        let resolved = resolve_template(template, responses)?;
        result.push_str(&render(&resolved));

        last_index = matched.end();
    }

    result.push_str(&input[last_index..]);
    Ok(Value::String(result))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// TESTES
// ============================================================================
