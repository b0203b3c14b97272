use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::foundation::core::{ResultType, Value};
use crate::foundation::error::{CompositorError, CompositorResult};
use crate::nodes::NodeType;

/// Index of a node inside its [`NodeTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// An output socket address: node plus output index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    /// Owning node.
    pub node: NodeId,
    /// Index into [`Node::outputs`].
    pub socket: usize,
}

/// An input socket address: node plus input index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputRef {
    /// Owning node.
    pub node: NodeId,
    /// Index into [`Node::inputs`].
    pub socket: usize,
}

/// Input socket with its static default.
#[derive(Clone, Debug, PartialEq)]
pub struct InputSocket {
    /// Identifier, unique among the node's inputs.
    pub identifier: String,
    /// Logical type.
    pub ty: ResultType,
    /// Value used when the socket is unlinked.
    pub default: Value,
    /// Unavailable sockets are ignored by scheduling and compilation.
    pub available: bool,
}

impl InputSocket {
    /// Available input socket.
    pub fn new(identifier: impl Into<String>, ty: ResultType, default: Value) -> Self {
        Self {
            identifier: identifier.into(),
            ty,
            default: default.convert(ty),
            available: true,
        }
    }
}

/// Output socket.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSocket {
    /// Identifier, unique among the node's outputs.
    pub identifier: String,
    /// Logical type.
    pub ty: ResultType,
    /// Unavailable sockets are never computed.
    pub available: bool,
}

impl OutputSocket {
    /// Available output socket.
    pub fn new(identifier: impl Into<String>, ty: ResultType) -> Self {
        Self {
            identifier: identifier.into(),
            ty,
            available: true,
        }
    }
}

/// Socket of a tree's group interface.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceSocket {
    /// Identifier shared by the group node socket and the group input/output node socket.
    pub identifier: String,
    /// Logical type.
    pub ty: ResultType,
    /// Value used when the interface input is not supplied.
    pub default: Value,
}

/// The closed set of node kinds the compiler dispatches on, plus the node-type extension point.
#[derive(Clone)]
pub enum NodeKind {
    /// References a nested tree. `None` models a broken library link.
    Group(Option<Arc<NodeTree>>),
    /// Exposes the enclosing instance's inputs.
    GroupInput,
    /// Receives the enclosing instance's outputs.
    GroupOutput,
    /// Any other node, implemented by its type.
    Typed(Arc<dyn NodeType>),
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(Some(tree)) => write!(f, "Group({})", tree.name),
            Self::Group(None) => f.write_str("Group(<missing>)"),
            Self::GroupInput => f.write_str("GroupInput"),
            Self::GroupOutput => f.write_str("GroupOutput"),
            Self::Typed(t) => write!(f, "Typed({})", t.name()),
        }
    }
}

/// One node of a tree.
#[derive(Clone, Debug)]
pub struct Node {
    /// Name, unique within the tree. Feeds instance keys.
    pub name: String,
    /// What the node is.
    pub kind: NodeKind,
    /// Input sockets in declaration order.
    pub inputs: Vec<InputSocket>,
    /// Output sockets in declaration order.
    pub outputs: Vec<OutputSocket>,
    /// Whether a thumbnail of the node's first output is wanted.
    pub show_preview: bool,
    /// For group output nodes: whether this is the active one.
    pub active: bool,
}

impl Node {
    /// A node implemented by `ty`, with sockets taken from the type's declaration.
    pub fn typed(name: impl Into<String>, ty: Arc<dyn NodeType>) -> Self {
        let decl = ty.declare();
        Self {
            name: name.into(),
            kind: NodeKind::Typed(ty),
            inputs: decl.inputs,
            outputs: decl.outputs,
            show_preview: false,
            active: false,
        }
    }

    /// A group node whose sockets mirror `tree`'s interface.
    pub fn group(name: impl Into<String>, tree: Arc<NodeTree>) -> Self {
        let inputs = tree
            .interface_inputs()
            .iter()
            .map(|s| InputSocket::new(s.identifier.clone(), s.ty, s.default))
            .collect();
        let outputs = tree
            .interface_outputs()
            .iter()
            .map(|s| OutputSocket::new(s.identifier.clone(), s.ty))
            .collect();
        Self {
            name: name.into(),
            kind: NodeKind::Group(Some(tree)),
            inputs,
            outputs,
            show_preview: false,
            active: false,
        }
    }

    /// A group node whose tree is missing, with explicitly supplied sockets.
    pub fn missing_group(
        name: impl Into<String>,
        inputs: Vec<InputSocket>,
        outputs: Vec<OutputSocket>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Group(None),
            inputs,
            outputs,
            show_preview: false,
            active: false,
        }
    }

    /// Enable the preview flag.
    pub fn with_preview(mut self) -> Self {
        self.show_preview = true;
        self
    }

    /// Index of the input named `identifier`.
    pub fn input_index(&self, identifier: &str) -> Option<usize> {
        self.inputs.iter().position(|s| s.identifier == identifier)
    }

    /// Index of the output named `identifier`.
    pub fn output_index(&self, identifier: &str) -> Option<usize> {
        self.outputs.iter().position(|s| s.identifier == identifier)
    }

    /// Whether this is a group node.
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    /// The node type, for typed nodes.
    pub fn node_type(&self) -> Option<&Arc<dyn NodeType>> {
        match &self.kind {
            NodeKind::Typed(t) => Some(t),
            _ => None,
        }
    }
}

/// A link from an output socket to an input socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    /// Producer socket.
    pub from: OutputRef,
    /// Consumer socket.
    pub to: InputRef,
    /// Muted links behave as if absent.
    pub muted: bool,
}

/// A validated node tree: the root compositing tree or a nested group.
#[derive(Clone, Debug)]
pub struct NodeTree {
    /// Tree name, used in diagnostics.
    pub name: String,
    nodes: Vec<Node>,
    links: Vec<Link>,
    interface_inputs: Vec<InterfaceSocket>,
    interface_outputs: Vec<InterfaceSocket>,
    input_link: HashMap<InputRef, usize>,
    output_links: HashMap<OutputRef, Vec<usize>>,
}

impl NodeTree {
    /// Start building a tree.
    pub fn builder(name: impl Into<String>) -> NodeTreeBuilder {
        NodeTreeBuilder {
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
            interface_inputs: Vec::new(),
            interface_outputs: Vec::new(),
        }
    }

    /// All nodes in stable order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Ids of all nodes in stable order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| NodeId(i as u32))
    }

    /// Node with id `id`.
    ///
    /// # Panics
    /// Panics if `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Node named `name`.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name == name)
            .map(|i| NodeId(i as u32))
    }

    /// All links.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Interface inputs in declaration order.
    pub fn interface_inputs(&self) -> &[InterfaceSocket] {
        &self.interface_inputs
    }

    /// Interface outputs in declaration order.
    pub fn interface_outputs(&self) -> &[InterfaceSocket] {
        &self.interface_outputs
    }

    /// The producer feeding `input`, ignoring muted links and unavailable sockets.
    pub fn linked_output(&self, input: InputRef) -> Option<OutputRef> {
        let link = self.links[*self.input_link.get(&input)?];
        (!link.muted && self.is_output_available(link.from)).then_some(link.from)
    }

    /// Consumers fed by `output`, ignoring muted links and unavailable sockets.
    pub fn linked_inputs(&self, output: OutputRef) -> impl Iterator<Item = InputRef> + '_ {
        self.output_links
            .get(&output)
            .into_iter()
            .flatten()
            .map(|&i| self.links[i])
            .filter(|l| !l.muted && self.is_input_available(l.to))
            .map(|l| l.to)
    }

    /// Whether the input socket exists and is available.
    pub fn is_input_available(&self, input: InputRef) -> bool {
        self.nodes
            .get(input.node.0 as usize)
            .and_then(|n| n.inputs.get(input.socket))
            .is_some_and(|s| s.available)
    }

    /// Whether the output socket exists and is available.
    pub fn is_output_available(&self, output: OutputRef) -> bool {
        self.nodes
            .get(output.node.0 as usize)
            .and_then(|n| n.outputs.get(output.socket))
            .is_some_and(|s| s.available)
    }

    /// The group output node that binds interface outputs: the first one flagged active, else
    /// the first one.
    pub fn group_output_node(&self) -> Option<NodeId> {
        let mut first = None;
        for (i, n) in self.nodes.iter().enumerate() {
            if matches!(n.kind, NodeKind::GroupOutput) {
                if n.active {
                    return Some(NodeId(i as u32));
                }
                first.get_or_insert(NodeId(i as u32));
            }
        }
        first
    }
}

/// Incremental [`NodeTree`] construction with validation on [`NodeTreeBuilder::build`].
#[derive(Debug)]
pub struct NodeTreeBuilder {
    name: String,
    nodes: Vec<Node>,
    links: Vec<Link>,
    interface_inputs: Vec<InterfaceSocket>,
    interface_outputs: Vec<InterfaceSocket>,
}

impl NodeTreeBuilder {
    /// Declare an interface input. Declare the interface before adding group input nodes.
    pub fn interface_input(
        &mut self,
        identifier: impl Into<String>,
        ty: ResultType,
        default: Value,
    ) -> &mut Self {
        self.interface_inputs.push(InterfaceSocket {
            identifier: identifier.into(),
            ty,
            default: default.convert(ty),
        });
        self
    }

    /// Declare an interface output. Declare the interface before adding group output nodes.
    pub fn interface_output(&mut self, identifier: impl Into<String>, ty: ResultType) -> &mut Self {
        self.interface_outputs.push(InterfaceSocket {
            identifier: identifier.into(),
            ty,
            default: Value::zero(ty),
        });
        self
    }

    /// Add a node and return its id.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Add a group input node exposing the interface inputs declared so far.
    pub fn add_group_input(&mut self, name: impl Into<String>) -> NodeId {
        let outputs = self
            .interface_inputs
            .iter()
            .map(|s| OutputSocket::new(s.identifier.clone(), s.ty))
            .collect();
        self.add(Node {
            name: name.into(),
            kind: NodeKind::GroupInput,
            inputs: Vec::new(),
            outputs,
            show_preview: false,
            active: false,
        })
    }

    /// Add a group output node receiving the interface outputs declared so far.
    pub fn add_group_output(&mut self, name: impl Into<String>, active: bool) -> NodeId {
        let inputs = self
            .interface_outputs
            .iter()
            .map(|s| InputSocket::new(s.identifier.clone(), s.ty, s.default))
            .collect();
        self.add(Node {
            name: name.into(),
            kind: NodeKind::GroupOutput,
            inputs,
            outputs: Vec::new(),
            show_preview: false,
            active,
        })
    }

    /// Mutable access to a node added earlier.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    /// Link `from.output` to `to.input` by socket identifier.
    pub fn link(
        &mut self,
        from: NodeId,
        output: &str,
        to: NodeId,
        input: &str,
    ) -> CompositorResult<&mut Self> {
        let from_node = self
            .nodes
            .get(from.0 as usize)
            .ok_or_else(|| CompositorError::validation(format!("unknown node {from:?}")))?;
        let to_node = self
            .nodes
            .get(to.0 as usize)
            .ok_or_else(|| CompositorError::validation(format!("unknown node {to:?}")))?;
        let socket_out = from_node.output_index(output).ok_or_else(|| {
            CompositorError::validation(format!(
                "node '{}' has no output '{output}'",
                from_node.name
            ))
        })?;
        let socket_in = to_node.input_index(input).ok_or_else(|| {
            CompositorError::validation(format!("node '{}' has no input '{input}'", to_node.name))
        })?;
        self.links.push(Link {
            from: OutputRef {
                node: from,
                socket: socket_out,
            },
            to: InputRef {
                node: to,
                socket: socket_in,
            },
            muted: false,
        });
        Ok(self)
    }

    /// Mute the most recently added link.
    pub fn mute_last_link(&mut self) -> &mut Self {
        if let Some(l) = self.links.last_mut() {
            l.muted = true;
        }
        self
    }

    /// Validate and freeze the tree.
    ///
    /// Rejects duplicate node names, inputs with more than one link, and cycles.
    pub fn build(self) -> CompositorResult<NodeTree> {
        let mut names = HashMap::new();
        for (i, n) in self.nodes.iter().enumerate() {
            if names.insert(n.name.as_str(), i).is_some() {
                return Err(CompositorError::validation(format!(
                    "tree '{}': duplicate node name '{}'",
                    self.name, n.name
                )));
            }
        }

        let mut input_link = HashMap::new();
        let mut output_links: HashMap<OutputRef, Vec<usize>> = HashMap::new();
        for (i, l) in self.links.iter().enumerate() {
            if input_link.insert(l.to, i).is_some() {
                let n = &self.nodes[l.to.node.0 as usize];
                return Err(CompositorError::validation(format!(
                    "tree '{}': input '{}' of node '{}' has more than one link",
                    self.name, n.inputs[l.to.socket].identifier, n.name
                )));
            }
            output_links.entry(l.from).or_default().push(i);
        }

        let tree = NodeTree {
            name: self.name,
            nodes: self.nodes,
            links: self.links,
            interface_inputs: self.interface_inputs,
            interface_outputs: self.interface_outputs,
            input_link,
            output_links,
        };
        check_acyclic(&tree)?;
        Ok(tree)
    }
}

fn check_acyclic(tree: &NodeTree) -> CompositorResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let mut marks = vec![Mark::New; tree.nodes.len()];
    let mut adjacency = vec![Vec::<usize>::new(); tree.nodes.len()];
    for l in &tree.links {
        adjacency[l.from.node.0 as usize].push(l.to.node.0 as usize);
    }

    for start in 0..tree.nodes.len() {
        if marks[start] != Mark::New {
            continue;
        }
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::Active;
        while let Some(top) = stack.last_mut() {
            let (n, next) = *top;
            if let Some(&m) = adjacency[n].get(next) {
                top.1 += 1;
                match marks[m] {
                    Mark::Active => {
                        return Err(CompositorError::validation(format!(
                            "tree '{}': link cycle through node '{}'",
                            tree.name, tree.nodes[m].name
                        )));
                    }
                    Mark::New => {
                        marks[m] = Mark::Active;
                        stack.push((m, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[n] = Mark::Done;
                stack.pop();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/tree/model.rs"]
mod tests;
