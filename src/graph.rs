//! Node/edge view of recorded lineage, ready to be serialized for a graph UI.

use indexmap::IndexMap;
use serde::Serialize;

use crate::catalog::LineageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Data,
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineageGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl LineageGraph {
    /// Turns every record into `source column -> job -> target column`.
    ///
    /// All executions of a job share its task node. Nodes are listed once, in order of first
    /// appearance; edges are kept per record.
    pub fn from_records(records: &[LineageRecord]) -> Self {
        let mut nodes = IndexMap::new();
        let mut edges = vec![];
        for record in records {
            let source = column_node(&record.source.id.to_string(), record.source.fqdn.to_string());
            let target = column_node(&record.target.id.to_string(), record.target.fqdn.to_string());
            let task = GraphNode {
                id: format!("task:{}", record.job.id),
                name: record.job.name.clone(),
                kind: NodeKind::Task,
            };
            edges.push(GraphEdge {
                source: source.id.clone(),
                target: task.id.clone(),
            });
            edges.push(GraphEdge {
                source: task.id.clone(),
                target: target.id.clone(),
            });
            for node in [source, task, target] {
                nodes.entry(node.id.clone()).or_insert(node);
            }
        }
        Self {
            nodes: nodes.into_values().collect(),
            edges,
        }
    }
}

fn column_node(id: &str, name: String) -> GraphNode {
    GraphNode {
        id: format!("column:{}", id),
        name,
        kind: NodeKind::Data,
    }
}
