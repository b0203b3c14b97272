use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::foundation::core::{ResultType, Value};
use crate::foundation::error::{CompositorError, CompositorResult};
use crate::nodes::NodeTypeRegistry;
use crate::tree::model::{InputSocket, Node, NodeId, NodeTree, OutputSocket};

/// JSON description of a root tree and the group trees it references.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeDocument {
    /// Name of the root tree in `trees`.
    pub root: String,
    /// All trees by name.
    pub trees: BTreeMap<String, TreeDef>,
}

/// One tree of a [`TreeDocument`].
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeDef {
    /// Interface inputs.
    #[serde(default)]
    pub inputs: Vec<SocketDef>,
    /// Interface outputs.
    #[serde(default)]
    pub outputs: Vec<SocketDef>,
    /// Nodes in order.
    pub nodes: Vec<NodeDef>,
    /// Links.
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

/// An interface socket or an explicit group node socket.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketDef {
    /// Identifier.
    pub name: String,
    /// Kind.
    #[serde(rename = "type")]
    pub ty: ResultType,
    /// Default for inputs; zero when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// One node of a [`TreeDef`].
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDef {
    /// Unique name within the tree.
    pub name: String,
    /// `group`, `group_input`, `group_output`, or a registered node kind.
    pub kind: String,
    /// Kind-specific parameters.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
    /// Referenced tree, for group nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    /// Sockets of a group node whose tree is missing from the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sockets: Option<GroupSocketsDef>,
    /// Input default overrides by socket identifier.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, Value>,
    /// Input sockets to mark unavailable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
    /// Request a thumbnail.
    #[serde(default)]
    pub preview: bool,
    /// For group output nodes: the active one.
    #[serde(default)]
    pub active: bool,
}

/// Explicit sockets of a group node.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSocketsDef {
    /// Inputs.
    #[serde(default)]
    pub inputs: Vec<SocketDef>,
    /// Outputs.
    #[serde(default)]
    pub outputs: Vec<SocketDef>,
}

/// A link written as `[node, socket]` pairs.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDef {
    /// Producer `[node, output]`.
    pub from: (String, String),
    /// Consumer `[node, input]`.
    pub to: (String, String),
    /// Muted links behave as absent.
    #[serde(default)]
    pub muted: bool,
}

impl TreeDocument {
    /// Parse a document from JSON.
    pub fn from_reader<R: Read>(reader: R) -> CompositorResult<Self> {
        serde_json::from_reader(reader)
            .map_err(|e| CompositorError::serde(format!("tree document JSON: {e}")))
    }

    /// Parse a document from a JSON file.
    pub fn from_path(path: &Path) -> CompositorResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            CompositorError::validation(format!("open '{}': {e}", path.display()))
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Build the root tree. Group nodes referencing trees absent from the document are kept
    /// with no tree; groups that reference themselves directly or indirectly are rejected.
    pub fn build(
        &self,
        registry: &NodeTypeRegistry,
        base_dir: Option<&Path>,
    ) -> CompositorResult<Arc<NodeTree>> {
        if !self.trees.contains_key(&self.root) {
            return Err(CompositorError::validation(format!(
                "root tree '{}' is not defined",
                self.root
            )));
        }
        let mut b = Builder {
            doc: self,
            registry,
            base_dir,
            built: HashMap::new(),
            stack: Vec::new(),
        };
        b.tree(&self.root)
    }
}

struct Builder<'d> {
    doc: &'d TreeDocument,
    registry: &'d NodeTypeRegistry,
    base_dir: Option<&'d Path>,
    built: HashMap<&'d str, Arc<NodeTree>>,
    stack: Vec<&'d str>,
}

impl<'d> Builder<'d> {
    fn tree(&mut self, name: &'d str) -> CompositorResult<Arc<NodeTree>> {
        if let Some(t) = self.built.get(name) {
            return Ok(Arc::clone(t));
        }
        if self.stack.contains(&name) {
            return Err(CompositorError::validation(format!(
                "group tree '{name}' contains itself (via {})",
                self.stack.join(" -> ")
            )));
        }
        let Some(def) = self.doc.trees.get(name) else {
            return Err(CompositorError::validation(format!(
                "tree '{name}' is not defined"
            )));
        };

        self.stack.push(name);
        let mut tb = NodeTree::builder(name);
        for s in &def.inputs {
            tb.interface_input(s.name.clone(), s.ty, s.default.unwrap_or(Value::zero(s.ty)));
        }
        for s in &def.outputs {
            tb.interface_output(s.name.clone(), s.ty);
        }

        let mut ids: HashMap<&str, NodeId> = HashMap::new();
        for n in &def.nodes {
            let id = match n.kind.as_str() {
                "group_input" => tb.add_group_input(n.name.clone()),
                "group_output" => tb.add_group_output(n.name.clone(), n.active),
                "group" => {
                    let node = self.group_node(n)?;
                    tb.add(node)
                }
                kind => {
                    let ty = self
                        .registry
                        .create(kind, &n.params, self.base_dir)
                        .map_err(|e| {
                            CompositorError::validation(format!("tree '{name}', node '{}': {e}", n.name))
                        })?;
                    tb.add(Node::typed(n.name.clone(), ty))
                }
            };
            if let Some(node) = tb.node_mut(id) {
                apply_overrides(node, n, name)?;
            }
            ids.insert(n.name.as_str(), id);
        }

        for l in &def.links {
            let from = lookup(&ids, name, &l.from.0)?;
            let to = lookup(&ids, name, &l.to.0)?;
            tb.link(from, &l.from.1, to, &l.to.1)?;
            if l.muted {
                tb.mute_last_link();
            }
        }

        let tree = Arc::new(tb.build()?);
        self.stack.pop();
        self.built.insert(name, Arc::clone(&tree));
        Ok(tree)
    }

    fn group_node(&mut self, n: &'d NodeDef) -> CompositorResult<Node> {
        let child = match &n.tree {
            Some(t) if self.doc.trees.contains_key(t.as_str()) => Some(self.tree(t.as_str())?),
            _ => None,
        };
        match child {
            Some(t) => Ok(Node::group(n.name.clone(), t)),
            None => {
                tracing::warn!(node = %n.name, tree = ?n.tree, "group tree missing; outputs will be invalid");
                let sockets = n.sockets.clone().unwrap_or_default();
                Ok(Node::missing_group(
                    n.name.clone(),
                    sockets
                        .inputs
                        .iter()
                        .map(|s| InputSocket::new(s.name.clone(), s.ty, s.default.unwrap_or(Value::zero(s.ty))))
                        .collect(),
                    sockets
                        .outputs
                        .iter()
                        .map(|s| OutputSocket::new(s.name.clone(), s.ty))
                        .collect(),
                ))
            }
        }
    }
}

fn apply_overrides(node: &mut Node, def: &NodeDef, tree: &str) -> CompositorResult<()> {
    node.show_preview = def.preview;
    for (ident, value) in &def.defaults {
        let Some(s) = node.inputs.iter_mut().find(|s| &s.identifier == ident) else {
            return Err(CompositorError::validation(format!(
                "tree '{tree}', node '{}': no input '{ident}' to set a default on",
                def.name
            )));
        };
        s.default = value.convert(s.ty);
    }
    for ident in &def.unavailable {
        let Some(s) = node.inputs.iter_mut().find(|s| &s.identifier == ident) else {
            return Err(CompositorError::validation(format!(
                "tree '{tree}', node '{}': no input '{ident}'",
                def.name
            )));
        };
        s.available = false;
    }
    Ok(())
}

fn lookup(ids: &HashMap<&str, NodeId>, tree: &str, node: &str) -> CompositorResult<NodeId> {
    ids.get(node).copied().ok_or_else(|| {
        CompositorError::validation(format!("tree '{tree}': link references unknown node '{node}'"))
    })
}

#[cfg(test)]
#[path = "../../tests/unit/tree/document.rs"]
mod tests;
