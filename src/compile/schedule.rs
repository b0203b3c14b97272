use std::collections::{BTreeSet, HashSet};

use crate::foundation::core::InstanceKey;
use crate::tree::model::{InputRef, NodeId, NodeKind, NodeTree};

/// Which kinds of output nodes an instance must compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputTypes {
    /// Interface outputs through the active group output node.
    pub group_output: bool,
    /// Viewer nodes, only honored in the active instance.
    pub viewer: bool,
}

impl OutputTypes {
    /// Only interface outputs. Used for nested group instances.
    pub const GROUP_OUTPUT: Self = Self {
        group_output: true,
        viewer: false,
    };

    /// Interface outputs and viewers.
    pub const ALL: Self = Self {
        group_output: true,
        viewer: true,
    };
}

/// Ordered list of nodes to compile. Every node appears after all of its scheduled producers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    order: Vec<NodeId>,
    members: HashSet<NodeId>,
}

impl Schedule {
    /// Build from an order. Duplicates keep their first position.
    pub fn from_order(order: impl IntoIterator<Item = NodeId>) -> Self {
        let mut s = Self::default();
        for n in order {
            if s.members.insert(n) {
                s.order.push(n);
            }
        }
        s
    }

    /// Whether `node` is scheduled.
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    /// Nodes in execution order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    /// Number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// What a scheduler is asked to cover for one tree instance.
#[derive(Clone, Copy, Debug)]
pub struct ScheduleRequest<'a> {
    /// Output kinds to compute.
    pub output_types: OutputTypes,
    /// Interface outputs some consumer needs.
    pub needed_outputs: &'a BTreeSet<String>,
    /// Key of the instance being scheduled.
    pub instance_key: InstanceKey,
    /// Key of the instance the user is looking at.
    pub active_instance_key: InstanceKey,
}

/// Produces the node order of one tree instance.
pub trait Scheduler {
    /// Order the nodes of `tree` needed to satisfy `request`.
    fn schedule(&self, tree: &NodeTree, request: &ScheduleRequest<'_>) -> Schedule;
}

/// Post-order depth-first traversal from the needed output nodes.
///
/// Roots are the active group output node (restricted to needed interface outputs) and, when
/// requested in the active instance, every viewer node. Inputs are visited in socket order.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthFirstScheduler;

impl Scheduler for DepthFirstScheduler {
    #[tracing::instrument(level = "trace", skip_all, fields(tree = %tree.name))]
    fn schedule(&self, tree: &NodeTree, request: &ScheduleRequest<'_>) -> Schedule {
        let mut visit = Visit {
            tree,
            done: HashSet::new(),
            order: Vec::new(),
        };

        if request.output_types.group_output
            && !request.needed_outputs.is_empty()
            && let Some(out) = tree.group_output_node()
        {
            let node = tree.node(out);
            let roots: Vec<usize> = node
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, s)| s.available && request.needed_outputs.contains(&s.identifier))
                .map(|(i, _)| i)
                .collect();
            visit.node(out, Some(&roots));
        }

        if request.output_types.viewer && request.instance_key == request.active_instance_key {
            for id in tree.node_ids() {
                if let NodeKind::Typed(t) = &tree.node(id).kind
                    && t.is_viewer()
                {
                    visit.node(id, None);
                }
            }
        }

        Schedule::from_order(visit.order)
    }
}

struct Visit<'t> {
    tree: &'t NodeTree,
    done: HashSet<NodeId>,
    order: Vec<NodeId>,
}

impl Visit<'_> {
    fn node(&mut self, root: NodeId, only_inputs: Option<&[usize]>) {
        if self.done.contains(&root) {
            return;
        }
        // (node, producers still to visit)
        let mut stack = vec![(root, self.producers(root, only_inputs))];
        self.done.insert(root);
        while let Some((n, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(p) => {
                    if self.done.insert(p) {
                        let next = self.producers(p, None);
                        stack.push((p, next));
                    }
                }
                None => {
                    self.order.push(*n);
                    stack.pop();
                }
            }
        }
    }

    /// Producers of `n` in reverse socket order, so popping yields socket order.
    fn producers(&self, n: NodeId, only_inputs: Option<&[usize]>) -> Vec<NodeId> {
        let node = self.tree.node(n);
        let mut out: Vec<NodeId> = (0..node.inputs.len())
            .filter(|i| only_inputs.is_none_or(|only| only.contains(i)))
            .map(|socket| InputRef { node: n, socket })
            .filter(|&input| self.tree.is_input_available(input))
            .filter_map(|input| self.tree.linked_output(input))
            .map(|o| o.node)
            .collect();
        out.reverse();
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/schedule.rs"]
mod tests;
