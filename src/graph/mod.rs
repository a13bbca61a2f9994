//! # Módulo de Grafo de Dependências (Ordenação Topológica)
//!
//! Este módulo constrói o grafo de dependências entre test cases e
//! produz a ordem de execução usando o algoritmo de Kahn.
//!
//! ## Para todos entenderem:
//!
//! Cada test case pode declarar dependências: "só me execute depois
//! que `create_database_basic` tiver rodado". O grafo organiza essas
//! relações e o sort topológico gera uma fila onde toda dependência
//! aparece antes de quem depende dela.
//!
//! ## Conceitos:
//!
//! - **Aresta reversa**: guardamos `dep → dependente` (quem uma
//!   dependência "libera" ao terminar), não o contrário
//! - **Grau de entrada (in-degree)**: quantas dependências um case tem
//! - **Ciclo**: A→B→A nunca pode ser ordenado; é erro fatal antes de
//!   qualquer execução
//!
//! O desempate entre nós prontos é FIFO pela ordem de definição, então
//! a saída é determinística para uma mesma entrada.

use crate::protocol::TestCase;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::info;

// ============================================================================
// ERROS DE CONSTRUÇÃO DO GRAFO
// ============================================================================

/// Erros fatais de grafo. Qualquer um deles aborta a execução inteira
/// antes do primeiro tool call.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    /// Dois test cases com o mesmo nome tornam a resolução de
    /// dependências ambígua.
    #[error("duplicate test case name '{name}'")]
    DuplicateName { name: String },

    /// Dependência declarada aponta para um case que não existe no run.
    #[error("test case '{test}' depends on undefined test case '{dependency}'")]
    UnknownDependency { test: String, dependency: String },

    /// O conjunto de dependências contém um ciclo; os nomes restantes
    /// são os nós que nunca alcançaram grau de entrada zero.
    #[error("dependency cycle detected among test cases: {remaining:?}")]
    CycleDetected { remaining: Vec<String> },
}

// ============================================================================
// GRAFO
// ============================================================================

/// Grafo de dependências derivado de um conjunto de test cases.
/// Construído uma vez por run; imutável depois disso.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Aresta reversa: nome da dependência → cases que dependem dela.
    dependents: HashMap<String, Vec<String>>,

    /// Quantas dependências cada case declara.
    in_degree: HashMap<String, usize>,

    /// Ordem de definição, usada como desempate FIFO.
    order: Vec<String>,
}

impl DependencyGraph {
    /// Constrói o grafo validando nomes duplicados e referências a
    /// cases inexistentes.
    pub fn build(cases: &[TestCase]) -> Result<Self, GraphError> {
        let mut defined: HashSet<&str> = HashSet::new();
        for case in cases {
            if !defined.insert(case.test_name.as_str()) {
                return Err(GraphError::DuplicateName {
                    name: case.test_name.clone(),
                });
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut order = Vec::with_capacity(cases.len());

        for case in cases {
            order.push(case.test_name.clone());
            in_degree.entry(case.test_name.clone()).or_insert(0);
            dependents.entry(case.test_name.clone()).or_default();
        }

        for case in cases {
            for dep in &case.dependencies {
                if !defined.contains(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        test: case.test_name.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(case.test_name.clone());
                *in_degree.entry(case.test_name.clone()).or_insert(0) += 1;
            }
        }

        info!(nodes = order.len(), "dependency graph built");
        Ok(Self {
            dependents,
            in_degree,
            order,
        })
    }

    /// Algoritmo de Kahn: fila semeada com os nós de grau zero na ordem
    /// de definição; cada nó removido decrementa o grau dos dependentes.
    /// Se sobrar nó não emitido, existe um ciclo.
    pub fn execution_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree = self.in_degree.clone();
        let mut queue: VecDeque<String> = self
            .order
            .iter()
            .filter(|name| in_degree[*name] == 0)
            .cloned()
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(name) = queue.pop_front() {
            if let Some(successors) = self.dependents.get(&name) {
                for succ in successors {
                    let degree = in_degree
                        .get_mut(succ)
                        .expect("successor registered during build");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(succ.clone());
                    }
                }
            }
            sorted.push(name);
        }

        if sorted.len() < self.order.len() {
            let emitted: HashSet<&String> = sorted.iter().collect();
            let remaining: Vec<String> = self
                .order
                .iter()
                .filter(|name| !emitted.contains(name))
                .cloned()
                .collect();
            return Err(GraphError::CycleDetected { remaining });
        }

        Ok(sorted)
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(name: &str, deps: Vec<&str>) -> TestCase {
        TestCase {
            test_name: name.to_string(),
            tool_name: "manage_aws_glue_databases".to_string(),
            input_params: json!({ "operation": "get-database" }),
            dependencies: deps.into_iter().map(String::from).collect(),
            validators: vec![],
            cleanups: vec![],
        }
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let cases = vec![
            case("D", vec!["B", "C"]),
            case("B", vec!["A"]),
            case("C", vec!["A"]),
            case("A", vec![]),
        ];

        let graph = DependencyGraph::build(&cases).unwrap();
        let order = graph.execution_order().unwrap();

        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        for c in &cases {
            for dep in &c.dependencies {
                assert!(
                    pos(dep) < pos(&c.test_name),
                    "'{}' must come before '{}'",
                    dep,
                    c.test_name
                );
            }
        }
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_definition_order_is_fifo_tiebreak() {
        let cases = vec![case("b", vec![]), case("a", vec![]), case("c", vec![])];
        let graph = DependencyGraph::build(&cases).unwrap();
        let order = graph.execution_order().unwrap();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_cycle_is_detected() {
        let cases = vec![case("A", vec!["B"]), case("B", vec!["A"])];
        let graph = DependencyGraph::build(&cases).unwrap();
        let err = graph.execution_order().unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_three_node_cycle_is_detected() {
        let cases = vec![
            case("A", vec!["C"]),
            case("B", vec!["A"]),
            case("C", vec!["B"]),
        ];
        let graph = DependencyGraph::build(&cases).unwrap();
        assert!(matches!(
            graph.execution_order(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_partial_cycle_reports_only_cycle_members() {
        let cases = vec![
            case("ok", vec![]),
            case("C", vec!["D"]),
            case("D", vec!["C"]),
        ];
        let graph = DependencyGraph::build(&cases).unwrap();
        match graph.execution_order() {
            Err(GraphError::CycleDetected { remaining }) => {
                assert_eq!(remaining, vec!["C".to_string(), "D".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency_is_rejected() {
        let cases = vec![case("A", vec!["missing"])];
        let err = DependencyGraph::build(&cases).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                test: "A".to_string(),
                dependency: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let cases = vec![case("A", vec![]), case("A", vec![])];
        let err = DependencyGraph::build(&cases).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName { name } if name == "A"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let cases = vec![case("A", vec!["A"])];
        let graph = DependencyGraph::build(&cases).unwrap();
        assert!(matches!(
            graph.execution_order(),
            Err(GraphError::CycleDetected { .. })
        ));
    }
}
