//! In-memory graph model: nodes, their source edges and an ordered list of
//! observers notified synchronously on every structural edit.
use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GraphError;

/// A configuration value: either a leaf text value or a nested group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    Group(Config),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) => Some(s),
            ConfigValue::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Config> {
        match self {
            ConfigValue::Group(g) => Some(g),
            ConfigValue::Text(_) => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Text(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::Text(s)
    }
}

impl From<Config> for ConfigValue {
    fn from(c: Config) -> Self {
        ConfigValue::Group(c)
    }
}

/// Ordered parameter mapping. Keys may repeat, which is how repeatable groups
/// (e.g. several `<band>` entries) are represented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    entries: Vec<(String, ConfigValue)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for a single text parameter.
    pub fn with(mut self, name: &str, value: impl Into<ConfigValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ConfigValue::as_str)
    }

    /// All values stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigValue> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Replaces the first value stored under `name`, or appends it.
    pub fn set(&mut self, name: &str, value: impl Into<ConfigValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Appends a value even if `name` is already present.
    pub fn push(&mut self, name: &str, value: impl Into<ConfigValue>) {
        self.entries.push((name.to_string(), value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<ConfigValue> {
        let pos = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A directed edge from a consuming node to the node whose output it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub role: String,
    pub node_id: String,
}

impl Source {
    pub fn new(role: &str, node_id: &str) -> Self {
        Self {
            role: role.to_string(),
            node_id: node_id.to_string(),
        }
    }
}

/// A configured instance of a named operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub operator: String,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Node {
    pub fn new(id: &str, operator: &str) -> Self {
        Self {
            id: id.to_string(),
            operator: operator.to_string(),
            config: Config::new(),
            sources: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_source(mut self, role: &str, node_id: &str) -> Self {
        self.sources.push(Source::new(role, node_id));
        self
    }

    pub fn has_source(&self, producer: &str) -> bool {
        self.sources.iter().any(|s| s.node_id == producer)
    }
}

/// Structural change notifications delivered to graph observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    Added { id: String },
    Removed { id: String },
    Selected { id: String },
    Connected { consumer: String, producer: String },
    Disconnected { consumer: String, producer: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&GraphEvent)>;

/// An ordered collection of nodes.
///
/// Editing is single-threaded; a graph must not be edited while it is executing.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
    selected: Option<String>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes)
            .field("selected", &self.selected)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Clone for Graph {
    /// Clones the nodes and selection; observers stay with the original.
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            selected: self.selected.clone(),
            observers: Vec::new(),
            next_observer: 0,
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&GraphEvent) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    fn notify(&mut self, event: GraphEvent) {
        debug!(?event, "Graph event");
        for (_, observer) in self.observers.iter_mut() {
            observer(&event);
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn last_node(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Ids of all nodes holding at least one edge to `producer`, in graph order.
    pub fn consumers_of(&self, producer: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.has_source(producer))
            .map(|n| n.id.clone())
            .collect()
    }

    /// Returns an id not yet used in this graph, derived from `base`.
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}({n})"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Appends a node. An empty id is replaced with a fresh one derived from
    /// the operator name. Returns the id the node was stored under.
    pub fn add_node(&mut self, mut node: Node) -> Result<String, GraphError> {
        if node.id.is_empty() {
            node.id = self.unique_id(&node.operator);
        } else if self.contains(&node.id) {
            return Err(GraphError::DuplicateId { id: node.id });
        }
        let id = node.id.clone();
        self.nodes.push(node);
        self.notify(GraphEvent::Added { id: id.clone() });
        Ok(id)
    }

    /// Removes a node. Source edges in other nodes that still reference it are
    /// left in place; disconnect consumers first for a clean removal.
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        let node = self.nodes.remove(pos);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        self.notify(GraphEvent::Removed { id: id.to_string() });
        Some(node)
    }

    /// Appends a source edge. Edges are not deduplicated.
    pub fn connect(&mut self, consumer: &str, role: &str, producer: &str) -> Result<(), GraphError> {
        if !self.contains(producer) {
            return Err(GraphError::UnknownNode {
                id: producer.to_string(),
            });
        }
        let node = self
            .find_node_mut(consumer)
            .ok_or_else(|| GraphError::UnknownNode {
                id: consumer.to_string(),
            })?;
        node.sources.push(Source::new(role, producer));
        self.notify(GraphEvent::Connected {
            consumer: consumer.to_string(),
            producer: producer.to_string(),
        });
        Ok(())
    }

    /// Removes every edge on `consumer` whose producer is `producer`.
    /// Returns the number of edges removed.
    pub fn disconnect_source(&mut self, consumer: &str, producer: &str) -> Result<usize, GraphError> {
        let node = self
            .find_node_mut(consumer)
            .ok_or_else(|| GraphError::UnknownNode {
                id: consumer.to_string(),
            })?;
        let before = node.sources.len();
        node.sources.retain(|s| s.node_id != producer);
        let removed = before - node.sources.len();
        if removed > 0 {
            self.notify(GraphEvent::Disconnected {
                consumer: consumer.to_string(),
                producer: producer.to_string(),
            });
        }
        Ok(removed)
    }

    pub fn set_selected(&mut self, id: &str) -> Result<(), GraphError> {
        if !self.contains(id) {
            return Err(GraphError::UnknownNode { id: id.to_string() });
        }
        self.selected = Some(id.to_string());
        self.notify(GraphEvent::Selected { id: id.to_string() });
        Ok(())
    }

    pub fn selected(&self) -> Option<&Node> {
        self.selected.as_deref().and_then(|id| self.find_node(id))
    }

    pub fn clear(&mut self) {
        let ids: Vec<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        for id in ids {
            self.remove_node(&id);
        }
    }

    /// Checks the structural invariants required before execution.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }
        let mut seen = HashMap::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if seen.insert(node.id.as_str(), ()).is_some() {
                return Err(GraphError::DuplicateId {
                    id: node.id.clone(),
                });
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Node indices ordered so every node comes after all of its sources.
    /// Independent nodes keep their graph order.
    pub fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; self.nodes.len()];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            for source in &node.sources {
                let &producer = index.get(source.node_id.as_str()).ok_or_else(|| {
                    GraphError::DanglingSource {
                        node: node.id.clone(),
                        source_id: source.node_id.clone(),
                    }
                })?;
                indegree[i] += 1;
                consumers[producer].push(i);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &c in &consumers[i] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    ready.push_back(c);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .find(|&i| indegree[i] > 0)
                .unwrap_or_default();
            return Err(GraphError::Cycle {
                id: self.nodes[stuck].id.clone(),
            });
        }
        Ok(order)
    }
}
