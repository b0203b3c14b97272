use std::collections::HashMap;

use crate::compile::fusion::{FusionCandidate, FusionPredicate};
use crate::compile::schedule::Schedule;
use crate::result::store::{ResultId, ResultStore};
use crate::tree::model::{InputRef, NodeId, NodeTree, OutputRef};

/// Mutable compilation state of one tree instance.
///
/// Tracks which operation each compiled node went into, the result produced for every
/// compiled output socket, and the pixel unit currently being accumulated.
pub(crate) struct CompileState<'s> {
    schedule: &'s Schedule,
    node_operations: HashMap<NodeId, usize>,
    output_results: HashMap<OutputRef, ResultId>,
    pixel_unit: Vec<NodeId>,
    pixel_unit_is_single_value: bool,
}

impl<'s> CompileState<'s> {
    pub(crate) fn new(schedule: &'s Schedule) -> Self {
        Self {
            schedule,
            node_operations: HashMap::new(),
            output_results: HashMap::new(),
            pixel_unit: Vec::new(),
            pixel_unit_is_single_value: false,
        }
    }

    pub(crate) fn schedule(&self) -> &'s Schedule {
        self.schedule
    }

    /// Record that `node` compiled into the operation at `index` of the stream.
    pub(crate) fn map_node_to_operation(&mut self, node: NodeId, index: usize) {
        self.node_operations.insert(node, index);
    }

    /// Stream index of the operation `node` compiled into.
    #[cfg(test)]
    pub(crate) fn node_operation(&self, node: NodeId) -> Option<usize> {
        self.node_operations.get(&node).copied()
    }

    pub(crate) fn into_node_operations(self) -> HashMap<NodeId, usize> {
        self.node_operations
    }

    /// Record the result produced for `output`.
    pub(crate) fn map_output_to_result(&mut self, output: OutputRef, result: ResultId) {
        self.output_results.insert(output, result);
    }

    /// The live result for a compiled output socket.
    pub(crate) fn result_from_output(&self, output: OutputRef) -> Option<ResultId> {
        self.output_results.get(&output).copied()
    }

    pub(crate) fn pixel_unit(&self) -> &[NodeId] {
        &self.pixel_unit
    }

    /// Append `node` to the open unit. The first node fixes the unit's single-valueness.
    pub(crate) fn add_node_to_pixel_unit(&mut self, node: NodeId, is_single_value: bool) {
        if self.pixel_unit.is_empty() {
            self.pixel_unit_is_single_value = is_single_value;
        }
        self.pixel_unit.push(node);
    }

    /// Close the open unit and hand back its nodes.
    pub(crate) fn take_pixel_unit(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.pixel_unit)
    }

    /// Whether `node` would compute a single value: every available linked input is either
    /// a single-value result or comes from the open unit while the unit is single-valued.
    /// Unlinked inputs read constants.
    pub(crate) fn is_pixel_node_single_value(
        &self,
        tree: &NodeTree,
        node: NodeId,
        results: &ResultStore,
    ) -> bool {
        let n = tree.node(node);
        (0..n.inputs.len())
            .map(|socket| InputRef { node, socket })
            .filter(|&i| tree.is_input_available(i))
            .filter_map(|i| tree.linked_output(i))
            .all(|o| {
                if self.pixel_unit.contains(&o.node) {
                    return self.pixel_unit_is_single_value;
                }
                self.result_from_output(o)
                    .is_none_or(|id| results.get(id).is_single_value())
            })
    }

    /// Whether the open unit must be compiled before `node` is handled.
    pub(crate) fn should_compile_pixel_unit(
        &self,
        tree: &NodeTree,
        node: NodeId,
        node_is_pixel: bool,
        node_is_single_value: bool,
        predicate: &dyn FusionPredicate,
    ) -> bool {
        if self.pixel_unit.is_empty() {
            return false;
        }
        if !node_is_pixel {
            return true;
        }
        !predicate.can_join(&FusionCandidate {
            tree,
            unit: &self.pixel_unit,
            node,
            unit_is_single_value: self.pixel_unit_is_single_value,
            node_is_single_value,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/state.rs"]
mod tests;
