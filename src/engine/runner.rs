mod diagnostics;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use petgraph::Graph;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::node::{Node, NodeId};
use crate::error::EngineError;
use crate::table::Table;

pub use diagnostics::{Diagnostics, TaskExecution};

/// The result of a pipeline run: the table of every sink, by name.
#[derive(Debug, Default)]
pub struct Outputs {
    tables: BTreeMap<String, Rc<Table>>,
    diagnostics: Diagnostics,
}

impl Outputs {
    pub fn get(&self, name: &str) -> Option<&Rc<Table>> {
        self.tables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rc<Table>)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Timings of the tasks which were computed during this run.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_tables(self) -> BTreeMap<String, Rc<Table>> {
        self.tables
    }
}

/// Runs every node reachable from the registered roots, in dependency order.
///
/// 1. Starting from the roots, every node reachable along outgoing edges is
///    collected into a graph, including nodes which are only known through
///    edges and not registered themselves.
/// 2. The graph is sorted topologically. A cycle fails the run before any
///    task is executed.
/// 3. Nodes execute in that order. Producers are always done by the time
///    their consumers run, so pulls inside [`Node::run`] hit the cache.
/// 4. The cached table of every registered sink is returned.
pub(crate) fn run_graph(pipeline: &str, registered: &[Node]) -> Result<Outputs, EngineError> {
    let mut graph: Graph<Node, ()> = Graph::new();
    let mut indices: HashMap<NodeId, NodeIndex> = HashMap::new();

    let mut queue: VecDeque<Node> = registered
        .iter()
        .filter(|node| node.is_root())
        .cloned()
        .collect();

    while let Some(node) = queue.pop_front() {
        if indices.contains_key(&node.id()) {
            continue;
        }
        queue.extend(node.outputs());
        indices.insert(node.id(), graph.add_node(node));
    }

    for index in graph.node_indices() {
        for producer in graph[index].inputs() {
            if let Some(&source) = indices.get(&producer.id()) {
                graph.add_edge(source, index, ());
            }
        }
    }

    let order = toposort(&graph, None)
        .map_err(|cycle| EngineError::Cycle(graph[cycle.node_id()].name().to_string()))?;

    let root_span = tracing::span!(Level::INFO, "pipeline", name = pipeline);
    root_span.pb_set_style(&crate::utils::style_pipeline());
    root_span.pb_set_length(order.len() as u64);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let mut execution_times = HashMap::new();

    for index in order {
        let node = &graph[index];
        let start = Instant::now();
        let (_, computed) = node.execute()?;

        if computed {
            execution_times.insert(
                node.id(),
                TaskExecution {
                    name: node.name().to_string(),
                    start,
                    duration: start.elapsed(),
                },
            );
        }

        root_span.pb_inc(1);
    }

    let tables = registered
        .iter()
        .filter(|node| node.is_sink())
        .filter_map(|node| node.cached().map(|table| (node.name().to_string(), table)))
        .collect();

    tracing::info!(
        computed = execution_times.len(),
        reachable = graph.node_count(),
        "pipeline complete"
    );

    Ok(Outputs {
        tables,
        diagnostics: Diagnostics { execution_times },
    })
}
