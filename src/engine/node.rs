use std::any::TypeId;
use std::borrow::Cow;
use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::context;
use crate::engine::depends::{self, Depends, Inputs};
use crate::error::EngineError;
use crate::table::Table;

/// A unit of computation in the graph.
///
/// Implementors declare the parameters they expect from upstream nodes in
/// [`Task::dependencies`] and produce exactly one [`Table`] in
/// [`Task::compute`]. The output must depend only on the resolved inputs and
/// the task's own configuration.
pub trait Task: 'static {
    /// Declared compute parameters, in the order they are bound.
    fn dependencies(&self) -> Vec<Depends> {
        Vec::new()
    }

    /// Capabilities provided in addition to the task's own type.
    fn provides(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn compute(&self, inputs: Inputs) -> anyhow::Result<Table>;
}

/// Something a producer can be matched on by a [`Depends`] descriptor.
///
/// Every node provides the capability of its concrete task type. Tags let
/// unrelated task types fill the same role, e.g. several readers all
/// providing `"transactions"`. A tag never matches a type, even one whose
/// name it spells.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// A concrete task type. The name is only for display.
    Type(TypeId, &'static str),
    Tag(Cow<'static, str>),
}

impl Capability {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    pub fn tag(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Tag(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Type(_, name) => *name,
            Self::Tag(name) => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-unique identity of a node, independent of its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A consumer owns its producers. A producer only observes its consumers,
/// so dropping a consumer never keeps it alive through upstream nodes.
enum Link {
    Owned(Rc<NodeInner>),
    Observed(Weak<NodeInner>),
}

impl Link {
    fn node(&self) -> Option<Node> {
        match self {
            Link::Owned(inner) => Some(Node(Rc::clone(inner))),
            Link::Observed(weak) => weak.upgrade().map(Node),
        }
    }
}

/// Edges keyed by peer name, in insertion order.
#[derive(Default)]
struct Edges(Vec<(String, Link)>);

impl Edges {
    fn insert(&mut self, name: &str, link: Link) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = link,
            None => self.0.push((name.to_string(), link)),
        }
    }

    fn live(&self) -> Vec<Node> {
        self.0.iter().filter_map(|(_, link)| link.node()).collect()
    }

    fn names(&self) -> Vec<String> {
        self.0.iter().map(|(name, _)| name.clone()).collect()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct NodeInner {
    id: NodeId,
    name: String,
    kind: &'static str,
    capabilities: Vec<Capability>,
    task: Box<dyn Task>,
    inputs: RefCell<Edges>,
    outputs: RefCell<Edges>,
    cache: OnceCell<Rc<Table>>,
    running: Cell<bool>,
}

/// Clears the running marker when a computation ends, successfully or not.
struct Running<'a>(&'a Cell<bool>);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A handle to a task in the graph.
///
/// Cloning a `Node` is cheap and yields another handle to the same task.
/// A node is owned by the [`Pipeline`](crate::Pipeline) it is registered
/// with, by any handles the caller keeps, and by its consumers. The edge
/// from a producer to its consumers is weak.
#[derive(Clone)]
pub struct Node(Rc<NodeInner>);

impl Node {
    /// Creates a node and registers it with the innermost active
    /// [`Scope`](crate::Scope) of the current thread, if there is one.
    ///
    /// Registration is last-write-wins: a node registered earlier under the
    /// same name is displaced from the pipeline's name map.
    pub fn new<T: Task>(name: impl Into<String>, task: T) -> Self {
        let node = Self::detached(name, task);

        if let Some(registry) = context::current() {
            registry.borrow_mut().replace(node.clone());
        }

        node
    }

    /// Creates a node without consulting the scope stack.
    pub fn detached<T: Task>(name: impl Into<String>, task: T) -> Self {
        let mut capabilities = vec![Capability::of::<T>()];
        capabilities.extend(task.provides());

        Self(Rc::new(NodeInner {
            id: NodeId::next(),
            name: name.into(),
            kind: std::any::type_name::<T>(),
            capabilities,
            task: Box::new(task),
            inputs: RefCell::default(),
            outputs: RefCell::default(),
            cache: OnceCell::new(),
            running: Cell::new(false),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Type name of the wrapped task.
    pub fn kind(&self) -> &'static str {
        self.0.kind
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.0.capabilities
    }

    pub fn provides(&self, capability: &Capability) -> bool {
        self.0.capabilities.contains(capability)
    }

    /// Adds an edge from `self` to `consumer` and returns the consumer, so
    /// calls can be chained: `read.connect(&rfm).connect(&ltv)`.
    pub fn connect(&self, consumer: &Node) -> Node {
        consumer
            .0
            .inputs
            .borrow_mut()
            .insert(&self.0.name, Link::Owned(Rc::clone(&self.0)));
        self.0
            .outputs
            .borrow_mut()
            .insert(&consumer.0.name, Link::Observed(Rc::downgrade(&consumer.0)));
        consumer.clone()
    }

    /// Connects `self` to every consumer in order.
    pub fn connect_all(&self, consumers: &[Node]) -> &Self {
        for consumer in consumers {
            self.connect(consumer);
        }
        self
    }

    /// Connects every producer in order to `self`.
    pub fn gather(&self, producers: &[Node]) -> &Self {
        for producer in producers {
            producer.connect(self);
        }
        self
    }

    /// Live producers, in edge insertion order.
    pub fn inputs(&self) -> Vec<Node> {
        self.0.inputs.borrow().live()
    }

    /// Live consumers, in edge insertion order.
    pub fn outputs(&self) -> Vec<Node> {
        self.0.outputs.borrow().live()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.0.inputs.borrow().names()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.0.outputs.borrow().names()
    }

    pub fn is_root(&self) -> bool {
        self.0.inputs.borrow().is_empty()
    }

    pub fn is_sink(&self) -> bool {
        self.0.outputs.borrow().is_empty()
    }

    /// The memoized result, if the node has run successfully.
    pub fn cached(&self) -> Option<Rc<Table>> {
        self.0.cache.get().cloned()
    }

    pub fn is_done(&self) -> bool {
        self.0.cache.get().is_some()
    }

    /// Runs the node, pulling its producers first.
    ///
    /// The first successful run caches the result and every later call
    /// returns the same table without computing again. A failed run caches
    /// nothing, so calling `run` again retries `compute`.
    pub fn run(&self) -> Result<Rc<Table>, EngineError> {
        self.execute().map(|(table, _)| table)
    }

    /// Like [`Node::run`], also reporting whether `compute` was called.
    pub(crate) fn execute(&self) -> Result<(Rc<Table>, bool), EngineError> {
        let inner = &self.0;

        if let Some(table) = inner.cache.get() {
            tracing::debug!(task = %inner.name, "using cached result");
            return Ok((Rc::clone(table), false));
        }

        if inner.running.replace(true) {
            return Err(EngineError::Cycle(inner.name.clone()));
        }
        let _running = Running(&inner.running);

        let span = tracing::info_span!("task", name = %inner.name);
        span.pb_set_style(&crate::utils::style_task());
        span.pb_set_message(&format!("Running {}", inner.name));
        let _enter = span.enter();

        let producers = self.inputs();
        let inputs = depends::resolve(&inner.name, &inner.task.dependencies(), producers)?;

        tracing::debug!(kind = inner.kind, "computing");
        let table = inner
            .task
            .compute(inputs)
            .map_err(|source| EngineError::Task {
                name: inner.name.clone(),
                source,
            })?;

        let table = Rc::clone(inner.cache.get_or_init(|| Rc::new(table)));
        Ok((table, true))
    }
}

/// Adds an edge from `producer` to `consumer`.
pub fn connect(producer: &Node, consumer: &Node) {
    producer.connect(consumer);
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .field("done", &self.is_done())
            .finish()
    }
}
