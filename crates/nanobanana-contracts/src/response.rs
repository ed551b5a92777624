use indexmap::IndexMap;
use serde_json::Value;

/// Handle to a node inside a [`ResponseGraph`].
///
/// Identity is the slot index, so two structurally equal subtrees stored twice are still
/// distinct nodes, and an edge back to an ancestor forms a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Closed set of shapes an API response can take once it has been adapted from the client's
/// own types.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseNode {
    /// Null, numbers and booleans. Never carries an image.
    Leaf,
    Bytes(Vec<u8>),
    Text(String),
    InlineData(BlobNode),
    FileData(BlobNode),
    Mapping(IndexMap<String, NodeId>),
    Sequence(Vec<NodeId>),
    Opaque(ObjectNode),
}

impl ResponseNode {
    pub fn is_composite(&self) -> bool {
        !matches!(
            self,
            ResponseNode::Leaf | ResponseNode::Bytes(_) | ResponseNode::Text(_)
        )
    }
}

/// Payload wrapper (`inline_data` / `file_data`) with its nested `data` field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobNode {
    pub mime_type: Option<String>,
    pub uri: Option<String>,
    pub data: Option<NodeId>,
}

/// A typed client object exposed through named attributes, optionally iterable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectNode {
    pub type_name: String,
    pub attributes: IndexMap<String, NodeId>,
    pub items: Option<Vec<NodeId>>,
}

impl ObjectNode {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: IndexMap::new(),
            items: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: NodeId) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_items(mut self, items: Vec<NodeId>) -> Self {
        self.items = Some(items);
        self
    }
}

/// Arena holding one response. Nodes are only ever appended, so a `NodeId` stays valid for
/// the lifetime of the graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseGraph {
    nodes: Vec<ResponseNode>,
    root: Option<NodeId>,
}

impl ResponseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: &Value) -> Self {
        let mut graph = Self::new();
        let root = graph.add_json(value);
        graph.set_root(root);
        graph
    }

    pub fn add(&mut self, node: ResponseNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Appends `value` as a subtree and returns its root.
    pub fn add_json(&mut self, value: &Value) -> NodeId {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) => self.add(ResponseNode::Leaf),
            Value::String(text) => self.add(ResponseNode::Text(text.clone())),
            Value::Array(rows) => {
                let items = rows.iter().map(|row| self.add_json(row)).collect();
                self.add(ResponseNode::Sequence(items))
            }
            Value::Object(map) => {
                let mut entries = IndexMap::with_capacity(map.len());
                for (key, child) in map {
                    let id = self.add_json(child);
                    entries.insert(key.clone(), id);
                }
                self.add(ResponseNode::Mapping(entries))
            }
        }
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&ResponseNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ResponseNode> {
        self.nodes.get_mut(id.0)
    }

    /// Looks up a named field: a mapping key, an object attribute, or the `data` of a
    /// payload wrapper.
    pub fn field(&self, id: NodeId, name: &str) -> Option<NodeId> {
        match self.node(id)? {
            ResponseNode::Mapping(entries) => entries.get(name).copied(),
            ResponseNode::Opaque(object) => object.attributes.get(name).copied(),
            ResponseNode::InlineData(blob) | ResponseNode::FileData(blob) if name == "data" => {
                blob.data
            }
            _ => None,
        }
    }

    /// Elements of a sequence or an iterable object; empty for everything else.
    pub fn items(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            Some(ResponseNode::Sequence(items)) => items.as_slice(),
            Some(ResponseNode::Opaque(ObjectNode {
                items: Some(items), ..
            })) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id)? {
            ResponseNode::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}
