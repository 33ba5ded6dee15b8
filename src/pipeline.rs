use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::{self, Node, Outputs, Scope, Task};
use crate::error::EngineError;

/// Name to node map of one pipeline, in registration order.
pub(crate) struct Registry {
    name: Cow<'static, str>,
    order: Vec<String>,
    nodes: HashMap<String, Node>,
}

impl Registry {
    fn new(name: Cow<'static, str>) -> Self {
        Self {
            name,
            order: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Inserts the node, displacing any node registered under the same name.
    /// The displaced node keeps its slot in registration order.
    pub(crate) fn replace(&mut self, node: Node) -> Option<Node> {
        let name = node.name().to_string();
        let displaced = self.nodes.insert(name.clone(), node);

        match &displaced {
            Some(old) => tracing::warn!(
                pipeline = %self.name,
                task = %name,
                displaced = old.kind(),
                "task name registered twice, replacing the earlier task"
            ),
            None => self.order.push(name),
        }

        displaced
    }

    pub(crate) fn try_insert(&mut self, node: Node) -> Result<(), EngineError> {
        if self.nodes.contains_key(node.name()) {
            return Err(EngineError::DuplicateName(node.name().to_string()));
        }
        self.order.push(node.name().to_string());
        self.nodes.insert(node.name().to_string(), node);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A named collection of nodes which can be run as a whole.
///
/// Nodes join a pipeline either explicitly through [`Pipeline::add`], or
/// implicitly by being created with [`Node::new`] while the pipeline is
/// entered:
///
/// ```
/// use ltvflow::{Node, Pipeline};
/// use ltvflow::nodes::{Ltv, Rfm};
///
/// let pipeline = Pipeline::named("ltv");
/// let rfm = pipeline.scope(|| {
///     let rfm = Node::new("rfm", Rfm::default());
///     rfm.connect(&Node::new("ltv", Ltv::default()));
///     rfm
/// });
///
/// assert_eq!(pipeline.names(), ["rfm", "ltv"]);
/// assert_eq!(pipeline.roots(), [rfm]);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    registry: Rc<RefCell<Registry>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::named("pipeline")
    }

    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry::new(name.into()))),
        }
    }

    pub fn name(&self) -> String {
        self.registry.borrow().name().to_string()
    }

    /// Registers a node, failing if the name is already taken.
    pub fn add(&self, node: Node) -> Result<Node, EngineError> {
        self.registry.borrow_mut().try_insert(node.clone())?;
        Ok(node)
    }

    /// Creates a node for `task` and registers it under `name`.
    pub fn add_task<T: Task>(&self, name: impl Into<String>, task: T) -> Result<Node, EngineError> {
        self.add(Node::detached(name, task))
    }

    /// Registers a node, returning the node it displaced, if any.
    ///
    /// The displaced node is no longer returned by [`Pipeline::get`], but
    /// edges to and from it remain in place.
    pub fn replace(&self, node: Node) -> Option<Node> {
        self.registry.borrow_mut().replace(node)
    }

    pub fn get(&self, name: &str) -> Option<Node> {
        self.registry.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.borrow().get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered nodes in registration order.
    pub fn nodes(&self) -> Vec<Node> {
        self.registry.borrow().iter().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry
            .borrow()
            .iter()
            .map(|node| node.name().to_string())
            .collect()
    }

    pub fn roots(&self) -> Vec<Node> {
        self.nodes().into_iter().filter(Node::is_root).collect()
    }

    pub fn sinks(&self) -> Vec<Node> {
        self.nodes().into_iter().filter(Node::is_sink).collect()
    }

    /// Adds an edge between two registered nodes.
    pub fn connect(&self, producer: &str, consumer: &str) -> Result<(), EngineError> {
        let registry = self.registry.borrow();
        let find = |name: &str| {
            registry
                .get(name)
                .ok_or_else(|| EngineError::UnknownNode(name.to_string()))
        };

        find(producer)?.connect(find(consumer)?);
        Ok(())
    }

    /// Makes this the pipeline [`Node::new`] registers with on this thread,
    /// until the returned guard is dropped.
    pub fn enter(&self) -> Scope {
        engine::push(Rc::clone(&self.registry))
    }

    /// Runs `f` with this pipeline entered.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.enter();
        f()
    }

    /// Runs every node reachable from the roots and returns the sink tables.
    ///
    /// Nodes which already hold a result are not computed again, so after a
    /// failure a second call only retries what did not finish.
    pub fn run(&self) -> Result<Outputs, EngineError> {
        // Snapshot, so tasks may create nodes in this pipeline while running.
        let (name, nodes) = {
            let registry = self.registry.borrow();
            (registry.name().to_string(), registry.iter().cloned().collect::<Vec<_>>())
        };

        engine::run_graph(&name, &nodes)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("nodes", &self.names())
            .finish()
    }
}

/// Renders the registered graph as a Mermaid flowchart.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.nodes();
        let index: HashMap<_, _> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();

        writeln!(f, "graph LR")?;

        for (i, node) in nodes.iter().enumerate() {
            let name = node.name().replace('"', "\\\"");
            writeln!(f, "    {i}[\"{name}\"]")?;

            if node.is_sink() {
                writeln!(f, "    {i} --> Output")?;
            }
        }

        writeln!(f, "    Output[Output]")?;

        for (target, node) in nodes.iter().enumerate() {
            for producer in node.inputs() {
                // Edges from unregistered producers are not drawn.
                if let Some(source) = index.get(&producer.id()) {
                    let kind = short_kind(producer.kind())
                        .replace('<', "&lt;")
                        .replace('>', "&gt;");
                    writeln!(f, "    {source} -- \"{kind}\" --> {target}")?;
                }
            }
        }

        Ok(())
    }
}

/// `ltvflow::nodes::rfm::Rfm` to `Rfm`.
fn short_kind(kind: &str) -> &str {
    let path = kind.split('<').next().unwrap_or(kind);
    match path.rfind("::") {
        Some(at) => &kind[at + 2..],
        None => kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Inputs;
    use crate::table::Table;

    struct Constant(i64);

    impl Task for Constant {
        fn compute(&self, _: Inputs) -> anyhow::Result<Table> {
            Ok(Table::new().with_column("value", vec![self.0])?)
        }
    }

    #[test]
    fn test_add_rejects_duplicate_names() {
        let pipeline = Pipeline::new();
        pipeline.add_task("a", Constant(1)).unwrap();

        let err = pipeline.add_task("a", Constant(2)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(name) if name == "a"));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_replace_is_last_write_wins() {
        let pipeline = Pipeline::new();
        let first = pipeline.add_task("a", Constant(1)).unwrap();
        pipeline.add_task("b", Constant(2)).unwrap();

        let second = Node::detached("a", Constant(3));
        let displaced = pipeline.replace(second.clone());

        assert_eq!(displaced, Some(first));
        assert_eq!(pipeline.get("a"), Some(second));
        assert_eq!(pipeline.names(), ["a", "b"]);
    }

    #[test]
    fn test_connect_by_name() {
        let pipeline = Pipeline::new();
        let a = pipeline.add_task("a", Constant(1)).unwrap();
        let b = pipeline.add_task("b", Constant(2)).unwrap();

        pipeline.connect("a", "b").unwrap();
        assert_eq!(b.inputs(), [a.clone()]);
        assert_eq!(pipeline.roots(), [a]);
        assert_eq!(pipeline.sinks(), [b]);

        let err = pipeline.connect("a", "missing").unwrap_err();
        assert!(matches!(err, EngineError::UnknownNode(name) if name == "missing"));
    }

    #[test]
    fn test_scope_registers_nodes() {
        let pipeline = Pipeline::named("scoped");
        let outside = Node::new("outside", Constant(0));

        pipeline.scope(|| {
            Node::new("inside", Constant(1));
        });

        assert!(pipeline.contains("inside"));
        assert!(!pipeline.contains(outside.name()));
    }

    #[test]
    fn test_mermaid_rendering() {
        let pipeline = Pipeline::new();
        let a = pipeline.add_task("a", Constant(1)).unwrap();
        let b = pipeline.add_task("b", Constant(2)).unwrap();
        a.connect(&b);

        let rendered = pipeline.to_string();
        assert_eq!(
            rendered,
            "graph LR\n    0[\"a\"]\n    1[\"b\"]\n    1 --> Output\n    Output[Output]\n    0 -- \"Constant\" --> 1\n"
        );
    }

    #[test]
    fn test_short_kind() {
        assert_eq!(short_kind("ltvflow::nodes::rfm::Rfm"), "Rfm");
        assert_eq!(short_kind("a::Wrap<b::Inner>"), "Wrap<b::Inner>");
        assert_eq!(short_kind("Plain"), "Plain");
    }
}
