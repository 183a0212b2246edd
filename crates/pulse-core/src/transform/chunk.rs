//! Hierarchical rollups.
//!
//! [`chunk`] groups events level by level (for example by `app`, then by
//! `title`) into a tree whose nodes carry the total duration and event count
//! of their subtree. Nodes live in a flat arena and refer to their children by
//! [`NodeId`]; there are no parent pointers.

use std::collections::HashMap;

use chrono::TimeDelta;
use serde_json::{Map, Value};

use crate::{Event, canonical_value, delta_to_secs, values_eq};

/// Index of a node in a [`ChunkTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A grouping node.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkNode {
    /// Data key this node groups by; `None` for the root.
    pub key: Option<String>,
    /// Value of `key` shared by every event under this node.
    pub value: Option<Value>,
    pub duration: TimeDelta,
    pub count: usize,
    pub children: Vec<NodeId>,
}

impl ChunkNode {
    fn new(key: Option<String>, value: Option<Value>) -> Self {
        Self {
            key,
            value,
            duration: TimeDelta::zero(),
            count: 0,
            children: Vec::new(),
        }
    }
}

/// Arena holding a rollup tree. Node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkTree {
    nodes: Vec<ChunkNode>,
}

impl ChunkTree {
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &ChunkNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Children of `id`, longest duration first.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &ChunkNode> {
        self.node(id).children.iter().map(|child| self.node(*child))
    }

    /// Finds the child of `id` grouping `value`.
    pub fn child(&self, id: NodeId, value: &Value) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|child| {
                self.node(*child)
                    .value
                    .as_ref()
                    .is_some_and(|v| values_eq(v, value))
            })
    }

    /// Renders the subtree under `id` as nested JSON.
    ///
    /// Children are listed longest first, each carrying the grouping value
    /// it stands for:
    ///
    /// ```json
    /// {"duration": 30.0, "count": 2, "key": "app",
    ///  "children": [{"value": "vim", "duration": 30.0, "count": 2, "children": []}]}
    /// ```
    pub fn to_json(&self, id: NodeId) -> Value {
        let node = self.node(id);
        let mut out = Map::new();
        if let Some(value) = &node.value {
            out.insert("value".to_string(), value.clone());
        }
        out.insert("duration".to_string(), Value::from(delta_to_secs(node.duration)));
        out.insert("count".to_string(), Value::from(node.count));

        let child_key = node
            .children
            .first()
            .and_then(|child| self.node(*child).key.clone());
        if let Some(key) = child_key {
            out.insert("key".to_string(), Value::String(key));
        }
        let children = node.children.iter().map(|child| self.to_json(*child)).collect();
        out.insert("children".to_string(), Value::Array(children));
        Value::Object(out)
    }
}

/// Builds a rollup tree grouping events by `keys`, one level per key.
///
/// An event missing a key is counted at every level above it but does not
/// descend further.
pub fn chunk<S: AsRef<str>>(events: &[Event], keys: &[S]) -> ChunkTree {
    let mut nodes = vec![ChunkNode::new(None, None)];
    let mut index: HashMap<(usize, String), usize> = HashMap::new();

    for event in events {
        let mut current = 0;
        nodes[current].duration += event.duration;
        nodes[current].count += 1;

        for key in keys {
            let key = key.as_ref();
            let Some(value) = event.data.get(key) else {
                break;
            };
            let lookup = (current, canonical_value(value).to_string());
            let next = if let Some(&existing) = index.get(&lookup) {
                existing
            } else {
                let id = nodes.len();
                nodes.push(ChunkNode::new(Some(key.to_string()), Some(value.clone())));
                nodes[current].children.push(NodeId(id));
                index.insert(lookup, id);
                id
            };
            nodes[next].duration += event.duration;
            nodes[next].count += 1;
            current = next;
        }
    }

    let durations: Vec<TimeDelta> = nodes.iter().map(|n| n.duration).collect();
    for node in &mut nodes {
        node.children
            .sort_by(|a, b| durations[b.0].cmp(&durations[a.0]));
    }

    ChunkTree { nodes }
}
