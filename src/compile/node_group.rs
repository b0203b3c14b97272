use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::compile::fusion::lower_unit;
use crate::compile::group::{
    GroupInputBinding, GroupInputOperation, GroupNodeOperation, GroupOutputOperation,
};
use crate::compile::operation::{
    EvalCtx, InputSingleValueOperation, Operation, OperationCore, UndefinedOperation, evaluate,
};
use crate::compile::pixel::{PixelOperation, PixelOperationBase};
use crate::compile::schedule::{OutputTypes, ScheduleRequest};
use crate::compile::state::CompileState;
use crate::foundation::core::{InstanceKey, ResultType, Value};
use crate::render::cpu::CpuPixelOperation;
use crate::render::gpu::GpuPixelOperation;
use crate::render::preview::SharedPreviews;
use crate::result::store::{ResultId, ResultStore};
use crate::tree::model::{InputRef, NodeId, NodeKind, NodeTree, OutputRef};

/// How a tree instance evaluation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Every scheduled node ran.
    Completed,
    /// Cancellation was observed; intermediate results were freed.
    Canceled,
}

/// Compiles one tree instance into an operation stream and evaluates it as it goes.
///
/// Interface outputs are results owned by this operation. Their reference counts, set by the
/// caller before [`NodeGroupOperation::execute`], select which outputs are needed.
pub struct NodeGroupOperation {
    core: OperationCore,
    tree: Arc<NodeTree>,
    output_types: OutputTypes,
    previews: Option<SharedPreviews>,
    active_instance_key: InstanceKey,
    instance_key: InstanceKey,
    operations: Vec<Box<dyn Operation>>,
    node_operations: HashMap<NodeId, usize>,
}

impl NodeGroupOperation {
    /// Declare one input per interface input and create one result per interface output.
    pub fn new(
        results: &mut ResultStore,
        tree: Arc<NodeTree>,
        output_types: OutputTypes,
        previews: Option<SharedPreviews>,
        active_instance_key: InstanceKey,
        instance_key: InstanceKey,
    ) -> Self {
        let mut core = OperationCore::new();
        for s in tree.interface_inputs() {
            core.declare_input(s.identifier.clone(), s.ty);
        }
        for s in tree.interface_outputs() {
            core.populate_output(s.identifier.clone(), results.create(s.ty));
        }
        core.set_instance_key(instance_key);
        Self {
            core,
            tree,
            output_types,
            previews,
            active_instance_key,
            instance_key,
            operations: Vec::new(),
            node_operations: HashMap::new(),
        }
    }

    /// Interface bookkeeping.
    pub fn core(&self) -> &OperationCore {
        &self.core
    }

    /// Bind interface input `identifier` to a result produced outside this instance.
    pub fn map_input(&mut self, identifier: &str, result: ResultId) -> bool {
        self.core.map_input(identifier, result)
    }

    /// Result of interface output `identifier`.
    pub fn output(&self, identifier: &str) -> Option<ResultId> {
        self.core.output(identifier)
    }

    /// Number of operations in the compiled stream.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Stream index of the operation node `name` compiled into, after execution.
    pub fn operation_index(&self, name: &str) -> Option<usize> {
        let id = self.tree.find_node(name)?;
        self.node_operations.get(&id).copied()
    }

    fn is_active(&self) -> bool {
        self.instance_key == self.active_instance_key
    }

    /// Schedule, compile, and evaluate the tree. Needed interface outputs that end up
    /// unallocated, including on cancellation, are allocated as invalid.
    #[tracing::instrument(level = "debug", skip_all, fields(tree = %self.tree.name, key = self.instance_key.0))]
    pub fn execute(&mut self, cx: &mut EvalCtx<'_>) -> ExecutionStatus {
        let tree = Arc::clone(&self.tree);
        let needed: BTreeSet<String> = self
            .core
            .outputs()
            .iter()
            .filter(|b| cx.results.should_compute(b.result))
            .map(|b| b.identifier.clone())
            .collect();
        let schedule = cx.context.scheduler().schedule(
            &tree,
            &ScheduleRequest {
                output_types: self.output_types,
                needed_outputs: &needed,
                instance_key: self.instance_key,
                active_instance_key: self.active_instance_key,
            },
        );
        tracing::debug!(nodes = schedule.len(), "scheduled");

        let mut state = CompileState::new(&schedule);
        let mut status = ExecutionStatus::Completed;
        for node in schedule.iter() {
            if cx.context.is_canceled() {
                tracing::info!(tree = %tree.name, "evaluation canceled");
                self.cancel_evaluation(cx);
                status = ExecutionStatus::Canceled;
                break;
            }

            let is_pixel = self.is_pixel_node(&tree, node, cx);
            let is_single_value =
                is_pixel && state.is_pixel_node_single_value(&tree, node, cx.results);
            if state.should_compile_pixel_unit(
                &tree,
                node,
                is_pixel,
                is_single_value,
                cx.context.fusion_predicate(),
            ) {
                self.compile_pixel_unit(&tree, &mut state, cx);
            }

            if is_pixel {
                state.add_node_to_pixel_unit(node, is_single_value);
            } else {
                self.compile_node(&tree, &mut state, node, cx);
            }
        }
        if status == ExecutionStatus::Completed && !state.pixel_unit().is_empty() {
            self.compile_pixel_unit(&tree, &mut state, cx);
        }
        self.node_operations = state.into_node_operations();

        for b in self.core.outputs() {
            if cx.results.should_compute(b.result) && !cx.results.get(b.result).is_allocated() {
                cx.results.allocate_invalid(b.result);
            }
        }
        status
    }

    fn is_pixel_node(&self, tree: &NodeTree, node: NodeId, cx: &EvalCtx<'_>) -> bool {
        if !cx.context.fusion_enabled() {
            return false;
        }
        match &tree.node(node).kind {
            NodeKind::Typed(t) => t.pixel_function().is_some() && t.poll(tree),
            _ => false,
        }
    }

    /// Free the outputs of every operation compiled so far.
    fn cancel_evaluation(&mut self, cx: &mut EvalCtx<'_>) {
        for op in &self.operations {
            for b in op.core().outputs() {
                cx.results.free(b.result);
            }
        }
    }

    fn compile_node(
        &mut self,
        tree: &NodeTree,
        state: &mut CompileState<'_>,
        id: NodeId,
        cx: &mut EvalCtx<'_>,
    ) {
        let node = tree.node(id);
        let key = self.instance_key.child(&node.name);
        let mut core = OperationCore::for_node(node, cx.results);
        core.set_instance_key(key);

        let previews = if self.is_active() || node.is_group() {
            self.previews.clone()
        } else {
            None
        };
        let wants_preview = node.show_preview && self.is_active() && !core.outputs().is_empty();
        if wants_preview && let Some(p) = &previews {
            core.set_preview(p.clone(), key);
        }

        let polled = match &node.kind {
            NodeKind::Typed(t) => t.poll(tree),
            _ => true,
        };
        let mut op: Box<dyn Operation> = if !polled {
            tracing::debug!(node = %node.name, "node failed to poll");
            Box::new(UndefinedOperation::new(core))
        } else {
            match &node.kind {
                NodeKind::Group(child) => Box::new(GroupNodeOperation::new(
                    core,
                    child.clone(),
                    previews,
                    self.active_instance_key,
                )),
                NodeKind::GroupInput => {
                    let bindings = self.group_input_bindings();
                    Box::new(GroupInputOperation::new(core, bindings))
                }
                NodeKind::GroupOutput if tree.group_output_node() == Some(id) => Box::new(
                    GroupOutputOperation::new(core, self.core.outputs().to_vec()),
                ),
                NodeKind::GroupOutput => Box::new(UndefinedOperation::new(core)),
                NodeKind::Typed(t) => t.operation(node, core),
            }
        };

        self.map_node_operation_inputs(tree, state, id, op.as_mut(), cx);

        for (socket, s) in node.outputs.iter().enumerate() {
            if !s.available {
                continue;
            }
            let Some(result) = op.core().output(&s.identifier) else {
                continue;
            };
            let out = OutputRef { node: id, socket };
            let consumers = tree
                .linked_inputs(out)
                .filter(|i| state.schedule().contains(i.node))
                .count();
            cx.results
                .set_reference_count(result, u32::try_from(consumers).unwrap_or(u32::MAX));
            state.map_output_to_result(out, result);
        }
        if op.core().preview().is_some()
            && let Some(first) = op.core().outputs().first()
        {
            cx.results.increment_reference_count(first.result, 1);
        }

        let index = self.operations.len();
        state.map_node_to_operation(id, index);
        self.operations.push(op);
        evaluate(self.operations[index].as_mut(), cx);
    }

    /// Bind every available input of `id` to its producer's result, or to a fresh single-value
    /// result holding the socket default.
    fn map_node_operation_inputs(
        &mut self,
        tree: &NodeTree,
        state: &CompileState<'_>,
        id: NodeId,
        op: &mut dyn Operation,
        cx: &mut EvalCtx<'_>,
    ) {
        let node = tree.node(id);
        for (socket, s) in node.inputs.iter().enumerate() {
            if !s.available {
                continue;
            }
            let linked = tree
                .linked_output(InputRef { node: id, socket })
                .and_then(|o| state.result_from_output(o));
            let result = match linked {
                Some(r) => r,
                None => self.single_value_input(s.ty, s.default, cx),
            };
            op.core_mut().map_input(&s.identifier, result);
        }
    }

    fn single_value_input(
        &mut self,
        ty: ResultType,
        value: Value,
        cx: &mut EvalCtx<'_>,
    ) -> ResultId {
        let mut op = InputSingleValueOperation::new(cx.results, ty, value);
        let result = op.result();
        evaluate(&mut op, cx);
        self.operations.push(Box::new(op));
        result
    }

    fn group_input_bindings(&self) -> Vec<GroupInputBinding> {
        self.tree
            .interface_inputs()
            .iter()
            .map(|s| GroupInputBinding {
                identifier: s.identifier.clone(),
                result: self.core.input(&s.identifier),
                default: s.default,
            })
            .collect()
    }

    fn compile_pixel_unit(
        &mut self,
        tree: &NodeTree,
        state: &mut CompileState<'_>,
        cx: &mut EvalCtx<'_>,
    ) {
        let unit = state.take_pixel_unit();
        self.compile_unit_nodes(tree, state, &unit, cx);
    }

    /// Compile `unit` into one pixel operation, splitting it in half while it exceeds the
    /// context's pixel limits. A single node always compiles.
    fn compile_unit_nodes(
        &mut self,
        tree: &NodeTree,
        state: &mut CompileState<'_>,
        unit: &[NodeId],
        cx: &mut EvalCtx<'_>,
    ) {
        if unit.is_empty() {
            return;
        }
        let previews = if self.is_active() {
            self.previews.clone()
        } else {
            None
        };
        let has_previews = previews.is_some();
        let lowered = lower_unit(tree, unit, state.schedule(), &|_| has_previews);

        let limits = cx.context.pixel_limits();
        if unit.len() > 1
            && (lowered.inputs.len() > limits.max_inputs
                || lowered.outputs.len() > limits.max_outputs)
        {
            tracing::debug!(
                nodes = unit.len(),
                inputs = lowered.inputs.len(),
                outputs = lowered.outputs.len(),
                "pixel unit exceeds limits; splitting"
            );
            let (first, second) = unit.split_at(unit.len() / 2);
            self.compile_unit_nodes(tree, state, first, cx);
            self.compile_unit_nodes(tree, state, second, cx);
            return;
        }

        let inputs_are_single_value = lowered.inputs.iter().all(|i| {
            state
                .result_from_output(i.source)
                .is_none_or(|id| cx.results.get(id).is_single_value())
        });
        let base = PixelOperationBase::new(lowered, tree, self.instance_key, previews, cx.results);
        let mut op: Box<dyn PixelOperation> = if !cx.context.use_gpu() || inputs_are_single_value
        {
            Box::new(CpuPixelOperation::new(base, inputs_are_single_value))
        } else {
            Box::new(GpuPixelOperation::new(base))
        };

        let links: Vec<(String, OutputRef, u32)> = op
            .base()
            .inputs_to_linked_outputs()
            .map(|(ident, source, n)| (ident.to_owned(), source, n))
            .collect();
        for (ident, source, occurrences) in links {
            let result = match state.result_from_output(source) {
                Some(r) => {
                    if occurrences > 1 {
                        cx.results.decrement_reference_count(r, occurrences - 1);
                    }
                    r
                }
                None => {
                    let ty = tree.node(source.node).outputs[source.socket].ty;
                    self.single_value_input(ty, Value::zero(ty), cx)
                }
            };
            op.core_mut().map_input(&ident, result);
        }
        op.base().compute_results_reference_counts(cx.results);

        let index = self.operations.len();
        for &n in unit {
            state.map_node_to_operation(n, index);
        }
        for (source, result) in op.base().outputs_to_results() {
            state.map_output_to_result(source, result);
        }

        let op: Box<dyn Operation> = op;
        self.operations.push(op);
        evaluate(self.operations[index].as_mut(), cx);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/node_group.rs"]
mod tests;
