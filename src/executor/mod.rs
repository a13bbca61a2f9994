//! # Módulo Executor (Orquestração do Run)
//!
//! Este módulo executa uma suíte de test cases contra o servidor MCP,
//! respeitando dependências, validando respostas e rodando cleanup.
//!
//! ## Para todos entenderem:
//!
//! O executor percorre os cases em ordem topológica. Para cada case:
//!
//! 1. Se algum ancestral falhou, o case é pulado (skipped) e o nome do
//!    primeiro ancestral com falha vira a mensagem de validação
//! 2. Os parâmetros são resolvidos: templates `{{dep.path}}` são
//!    substituídos por valores extraídos das respostas anteriores
//! 3. A tool é chamada exatamente uma vez por case (memoização)
//! 4. Todos os validators rodam; o case passa só se todos passarem
//! 5. Cleanup roda sempre que o case foi invocado, mesmo em falha,
//!    primeiro o próprio case e depois as dependências em ordem
//!    reversa de declaração (idempotente entre cases que compartilham
//!    dependências)
//!
//! Erros de um case nunca derrubam o run: viram um resultado `failed`
//! com o texto do erro e a execução continua.

use crate::client::{StateClient, ToolClient};
use crate::config::HarnessConfig;
use crate::graph::{DependencyGraph, GraphError};
use crate::injection::{resolve_params, ResponseMap};
use crate::protocol::{
    CaseStatus, ExecutionReport, ExecutionResult, RunSummary, Suite, TestCase,
};
use crate::validators::{ValidationContext, ValidationResult};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// ESTADO DO RUN
// ============================================================================

/// Estado mutável acumulado durante um run.
#[derive(Default)]
struct RunState {
    /// Respostas capturadas, indexadas por nome do case.
    responses: ResponseMap,
    /// Sucesso por case, fonte de verdade para o skip de dependentes.
    success_map: HashMap<String, bool>,
    /// Resultados por case; presença aqui é a memoização de invocação.
    results: HashMap<String, ExecutionResult>,
    /// Cases cujo cleanup já rodou.
    cleaned: HashSet<String>,
}

// ============================================================================
// EXECUTOR
// ============================================================================

pub struct Executor {
    suite_id: String,
    cases: HashMap<String, TestCase>,
    /// Ordem de declaração, usada para montar o relatório final.
    declaration_order: Vec<String>,
    /// Ordem topológica calculada na construção; ciclo aborta aqui.
    execution_order: Vec<String>,
    tools: Arc<dyn ToolClient>,
    state: Arc<dyn StateClient>,
    config: HarnessConfig,
}

impl Executor {
    /// Constrói o executor e valida o grafo de dependências. Ciclos,
    /// nomes duplicados e referências a cases inexistentes são erros
    /// fatais antes de qualquer tool call.
    pub fn new(
        suite: Suite,
        tools: Arc<dyn ToolClient>,
        state: Arc<dyn StateClient>,
        config: HarnessConfig,
    ) -> Result<Self, GraphError> {
        let graph = DependencyGraph::build(&suite.cases)?;
        let execution_order = graph.execution_order()?;
        let declaration_order: Vec<String> =
            suite.cases.iter().map(|c| c.test_name.clone()).collect();
        let cases = suite
            .cases
            .into_iter()
            .map(|c| (c.test_name.clone(), c))
            .collect();

        Ok(Self {
            suite_id: suite.meta.id,
            cases,
            declaration_order,
            execution_order,
            tools,
            state,
            config,
        })
    }

    /// Executa a suíte inteira e devolve o relatório do run.
    pub async fn run(&self) -> ExecutionReport {
        let started_at = Utc::now();
        info!(
            suite = %self.suite_id,
            cases = self.execution_order.len(),
            "starting suite run"
        );

        let mut state = RunState::default();
        for name in &self.execution_order {
            self.execute_case(name, &mut state).await;
        }

        let summary = RunSummary::from_success_map(&state.success_map);
        info!(
            suite = %self.suite_id,
            passed = summary.passed,
            failed = summary.failed,
            success_rate = summary.success_rate,
            "suite run finished"
        );

        let results = self
            .declaration_order
            .iter()
            .filter_map(|name| state.results.remove(name))
            .collect();

        ExecutionReport {
            run_id: Uuid::new_v4(),
            suite_id: self.suite_id.clone(),
            started_at: started_at.to_rfc3339(),
            finished_at: Utc::now().to_rfc3339(),
            summary,
            success_map: state.success_map,
            results,
        }
    }

    /// Executa um case, garantindo antes que todas as dependências já
    /// tenham resultado. Memoizado: um case nunca roda duas vezes.
    fn execute_case<'a>(
        &'a self,
        name: &'a str,
        state: &'a mut RunState,
    ) -> Pin<Box<dyn Future<Output = ()> + 'a>> {
        Box::pin(async move {
            if state.results.contains_key(name) {
                return;
            }
            let case = match self.cases.get(name) {
                Some(case) => case,
                None => return,
            };

            for dep in &case.dependencies {
                self.execute_case(dep, &mut *state).await;
            }

            let start = Instant::now();
            if let Some(ancestor) = self.first_failing_ancestor(name, &state.success_map) {
                warn!(test = name, dependency = %ancestor, "skipping, dependency failed");
                state.success_map.insert(name.to_string(), false);
                state.results.insert(
                    name.to_string(),
                    ExecutionResult {
                        test_name: name.to_string(),
                        status: CaseStatus::Skipped,
                        success: false,
                        validations: vec![ValidationResult::fail(format!(
                            "Dependency '{ancestor}' failed"
                        ))],
                        error: None,
                        duration_ms: start.elapsed().as_millis() as u64,
                    },
                );
                // Case pulado nunca invocou a tool; não há o que limpar.
                return;
            }

            // Dependência que passou mas não deixou resposta utilizável
            // (nula ou ausente) aborta o case antes de qualquer tool
            // call, mesmo que os parâmetros não a referenciem.
            if let Some(dep) = case.dependencies.iter().find(|dep| {
                matches!(state.responses.get(dep.as_str()), None | Some(Value::Null))
            }) {
                error!(test = name, dependency = %dep, "aborting, dependency left no usable response");
                state.success_map.insert(name.to_string(), false);
                state.results.insert(
                    name.to_string(),
                    ExecutionResult {
                        test_name: name.to_string(),
                        status: CaseStatus::Failed,
                        success: false,
                        validations: Vec::new(),
                        error: Some(format!(
                            "dependency '{dep}' produced no usable response"
                        )),
                        duration_ms: start.elapsed().as_millis() as u64,
                    },
                );
                self.run_cleanup_chain(name, state).await;
                return;
            }

            info!(test = name, tool = %case.tool_name, "executing test case");
            let result = self.invoke_and_validate(case, state, start).await;
            state
                .success_map
                .insert(name.to_string(), result.success);
            if result.success {
                info!(test = name, "test case passed");
            } else {
                error!(test = name, error = ?result.error, "test case failed");
            }
            state.results.insert(name.to_string(), result);

            self.run_cleanup_chain(name, state).await;
        })
    }

    /// Invoca a tool e roda os validators. Qualquer erro vira um
    /// resultado `failed` com o texto do erro; nada propaga.
    async fn invoke_and_validate(
        &self,
        case: &TestCase,
        state: &mut RunState,
        start: Instant,
    ) -> ExecutionResult {
        let failed = |error: String, start: Instant| ExecutionResult {
            test_name: case.test_name.clone(),
            status: CaseStatus::Failed,
            success: false,
            validations: Vec::new(),
            error: Some(error),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        let params = match resolve_params(&case.input_params, &state.responses) {
            Ok(params) => params,
            Err(e) => return failed(format!("parameter resolution failed: {e}"), start),
        };

        let response = match self.tools.call_tool(&case.tool_name, &params).await {
            Ok(response) => response,
            Err(e) => return failed(format!("tool call failed: {e:#}"), start),
        };
        state
            .responses
            .insert(case.test_name.clone(), response.clone());

        // Sem validators o case passa por vacuidade: a chamada em si é o
        // teste.
        let mut validations = Vec::with_capacity(case.validators.len());
        let mut all_passed = true;
        for validator in &case.validators {
            let cx = ValidationContext {
                response: &response,
                tool_params: &params,
                responses: &state.responses,
                state: self.state.as_ref(),
            };
            let result = validator.validate(&cx).await;
            all_passed &= result.success;
            validations.push(result);
        }

        ExecutionResult {
            test_name: case.test_name.clone(),
            status: if all_passed {
                CaseStatus::Passed
            } else {
                CaseStatus::Failed
            },
            success: all_passed,
            validations,
            error: None,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Primeiro ancestral (direto ou transitivo) com falha registrada,
    /// em DFS pela ordem de declaração das dependências.
    fn first_failing_ancestor(
        &self,
        name: &str,
        success_map: &HashMap<String, bool>,
    ) -> Option<String> {
        let case = self.cases.get(name)?;
        for dep in &case.dependencies {
            if success_map.get(dep) == Some(&false) {
                return Some(dep.clone());
            }
            if let Some(ancestor) = self.first_failing_ancestor(dep, success_map) {
                return Some(ancestor);
            }
        }
        None
    }

    /// Roda o cleanup do case e, recursivamente, das dependências em
    /// ordem reversa de declaração. Idempotente: cada case limpa uma
    /// única vez por run.
    async fn run_cleanup_chain(&self, name: &str, state: &mut RunState) {
        let mut chain = Vec::new();
        self.collect_cleanup_chain(name, &mut state.cleaned, &mut chain);

        for case_name in chain {
            let case = match self.cases.get(&case_name) {
                Some(case) => case,
                None => continue,
            };
            if case.cleanups.is_empty() {
                continue;
            }
            info!(test = %case_name, actions = case.cleanups.len(), "running cleanup");
            for action in &case.cleanups {
                action
                    .run(
                        &case_name,
                        state.responses.get(&case_name),
                        self.state.as_ref(),
                        &self.config,
                    )
                    .await;
            }
        }
    }

    fn collect_cleanup_chain(
        &self,
        name: &str,
        cleaned: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        if !cleaned.insert(name.to_string()) {
            return;
        }
        out.push(name.to_string());
        if let Some(case) = self.cases.get(name) {
            for dep in case.dependencies.iter().rev() {
                self.collect_cleanup_chain(dep, cleaned, out);
            }
        }
    }
}

// ============================================================================
// TESTES
// ============================================================================
