//! Knowledge graph projection of the fix learning store.
//!
//! Failure patterns, strategies and complexity categories are nodes. A
//! failure links to every strategy tried against it, weighted by success
//! rate, and to the complexity category it was last seen at. The graph is
//! rebuilt from the learning rows on demand and never stored separately.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::domain::models::{FixLearning, FixStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Failure,
    Strategy,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    FixedBy,
    ClassifiedAs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub weight: f64,
    pub times_tried: u32,
    pub times_succeeded: u32,
}

/// Aggregate performance of one strategy across every failure pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyScore {
    pub strategy: FixStrategy,
    pub success_rate: f64,
    pub times_tried: u32,
    pub times_succeeded: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

fn failure_id(pattern: &str) -> String {
    format!("failure:{pattern}")
}

fn strategy_id(strategy: FixStrategy) -> String {
    format!("strategy:{}", strategy.as_str())
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl KnowledgeGraph {
    pub fn from_learnings(learnings: &[FixLearning]) -> Self {
        let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
        let mut edges = Vec::new();

        for learning in learnings {
            let from = failure_id(&learning.failure_pattern);
            nodes.entry(from.clone()).or_insert_with(|| GraphNode {
                id: from.clone(),
                kind: NodeKind::Failure,
                label: learning.failure_pattern.clone(),
            });

            let to = strategy_id(learning.fix_strategy);
            nodes.entry(to.clone()).or_insert_with(|| GraphNode {
                id: to.clone(),
                kind: NodeKind::Strategy,
                label: learning.fix_strategy.as_str().to_string(),
            });

            edges.push(GraphEdge {
                from: from.clone(),
                to,
                kind: EdgeKind::FixedBy,
                weight: learning.success_rate(),
                times_tried: learning.times_tried,
                times_succeeded: learning.times_succeeded,
            });

            if let Some(complexity) = learning.qualifiers.complexity {
                let category = format!("category:{}", complexity.as_str());
                nodes.entry(category.clone()).or_insert_with(|| GraphNode {
                    id: category.clone(),
                    kind: NodeKind::Category,
                    label: complexity.as_str().to_string(),
                });
                let exists = edges
                    .iter()
                    .any(|e| e.kind == EdgeKind::ClassifiedAs && e.from == from && e.to == category);
                if !exists {
                    edges.push(GraphEdge {
                        from,
                        to: category,
                        kind: EdgeKind::ClassifiedAs,
                        weight: 1.0,
                        times_tried: 0,
                        times_succeeded: 0,
                    });
                }
            }
        }

        Self {
            nodes: nodes.into_values().collect(),
            edges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Outgoing edges of a failure pattern, heaviest first.
    pub fn paths_from(&self, failure_pattern: &str) -> Vec<&GraphEdge> {
        let id = failure_id(failure_pattern);
        let mut out: Vec<&GraphEdge> = self.edges.iter().filter(|e| e.from == id).collect();
        out.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.to.cmp(&b.to))
        });
        out
    }

    /// Strategies ranked by pooled success rate over all patterns.
    pub fn top_strategies(&self, limit: usize) -> Vec<StrategyScore> {
        let mut totals: HashMap<String, (u32, u32)> = HashMap::new();
        for edge in self.edges.iter().filter(|e| e.kind == EdgeKind::FixedBy) {
            let entry = totals.entry(edge.to.clone()).or_default();
            entry.0 += edge.times_tried;
            entry.1 += edge.times_succeeded;
        }

        let mut scores: Vec<StrategyScore> = totals
            .into_iter()
            .filter_map(|(id, (tried, succeeded))| {
                let strategy = FixStrategy::from_str(id.strip_prefix("strategy:")?)?;
                Some(StrategyScore {
                    strategy,
                    success_rate: if tried == 0 { 0.0 } else { f64::from(succeeded) / f64::from(tried) },
                    times_tried: tried,
                    times_succeeded: succeeded,
                })
            })
            .collect();

        scores.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.times_tried.cmp(&a.times_tried))
                .then_with(|| a.strategy.cmp(&b.strategy))
        });
        scores.truncate(limit);
        scores
    }

    /// Pooled success rate per strategy, for ranking candidates.
    pub fn strategy_rank(&self) -> HashMap<FixStrategy, f64> {
        self.top_strategies(usize::MAX)
            .into_iter()
            .map(|s| (s.strategy, s.success_rate))
            .collect()
    }

    /// Graphviz rendering.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph fix_knowledge {\n    rankdir=LR;\n");
        for node in &self.nodes {
            let shape = match node.kind {
                NodeKind::Failure => "box",
                NodeKind::Strategy => "ellipse",
                NodeKind::Category => "diamond",
            };
            let _ = writeln!(
                dot,
                "    \"{}\" [label=\"{}\", shape={}];",
                escape_dot(&node.id),
                escape_dot(&node.label),
                shape
            );
        }
        for edge in &self.edges {
            let label = match edge.kind {
                EdgeKind::FixedBy => format!("{:.2} ({}/{})", edge.weight, edge.times_succeeded, edge.times_tried),
                EdgeKind::ClassifiedAs => "classified".to_string(),
            };
            let _ = writeln!(
                dot,
                "    \"{}\" -> \"{}\" [label=\"{}\"];",
                escape_dot(&edge.from),
                escape_dot(&edge.to),
                label
            );
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Complexity, LearningQualifiers};
    use chrono::Utc;

    fn learning(pattern: &str, strategy: FixStrategy, tried: u32, ok: u32) -> FixLearning {
        FixLearning {
            failure_pattern: pattern.to_string(),
            fix_strategy: strategy,
            times_tried: tried,
            times_succeeded: ok,
            qualifiers: LearningQualifiers::default().with_complexity(Complexity::Simple),
            last_used_at: Utc::now(),
        }
    }

    fn sample() -> KnowledgeGraph {
        KnowledgeGraph::from_learnings(&[
            learning("cannot find module <str>", FixStrategy::ImportFix, 4, 4),
            learning("cannot find module <str>", FixStrategy::DependencyAdd, 4, 1),
            learning("timeout of <num>ms exceeded", FixStrategy::TimeoutIncrease, 2, 1),
            learning("timeout of <num>ms exceeded", FixStrategy::ImportFix, 2, 0),
        ])
    }

    #[test]
    fn test_nodes_are_deduplicated() {
        let graph = sample();
        let count = |kind| graph.nodes.iter().filter(|n| n.kind == kind).count();
        assert_eq!(count(NodeKind::Failure), 2);
        assert_eq!(count(NodeKind::Strategy), 3);
        assert_eq!(count(NodeKind::Category), 1);
        assert_eq!(graph.edges.len(), 4 + 2);
    }

    #[test]
    fn test_paths_from_sorted_by_weight() {
        let graph = sample();
        let paths = graph.paths_from("cannot find module <str>");
        assert_eq!(paths[0].to, "strategy:import-fix");
        assert_eq!(paths[0].weight, 1.0);
        assert!(paths.iter().any(|e| e.kind == EdgeKind::ClassifiedAs));
    }

    #[test]
    fn test_top_strategies_pool_across_patterns() {
        let top = sample().top_strategies(2);
        assert_eq!(top.len(), 2);
        // import-fix: 4/6 pooled, timeout-increase: 1/2
        assert_eq!(top[0].strategy, FixStrategy::ImportFix);
        assert_eq!(top[0].times_tried, 6);
        assert_eq!(top[1].strategy, FixStrategy::TimeoutIncrease);
    }

    #[test]
    fn test_dot_export_contains_edges() {
        let dot = sample().to_dot();
        assert!(dot.starts_with("digraph fix_knowledge {"));
        assert!(dot.contains("\"failure:cannot find module <str>\" -> \"strategy:import-fix\""));
        assert!(dot.contains("shape=diamond"));
    }

    #[test]
    fn test_json_export() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 6);
        assert_eq!(json["edges"][0]["kind"], "fixed_by");
    }
}
