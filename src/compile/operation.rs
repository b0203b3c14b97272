use std::time::Instant;

use smallvec::SmallVec;

use crate::context::Context;
use crate::foundation::core::{InstanceKey, ResultType, Value};
use crate::render::preview::{SharedPreviews, write_preview};
use crate::result::store::{ResultId, ResultStore, ResultView};
use crate::tree::model::Node;

/// A declared input of an operation and the result mapped to it, if any.
#[derive(Clone, Debug)]
pub struct InputBinding {
    /// Input identifier.
    pub identifier: String,
    /// Expected kind.
    pub ty: ResultType,
    /// Mapped result. Unmapped inputs read as the zero value of `ty`.
    pub result: Option<ResultId>,
}

/// An output owned by an operation.
#[derive(Clone, Debug)]
pub struct OutputBinding {
    /// Output identifier.
    pub identifier: String,
    /// Owned result.
    pub result: ResultId,
}

#[derive(Clone, Debug)]
pub(crate) struct PreviewTarget {
    pub(crate) previews: SharedPreviews,
    pub(crate) key: InstanceKey,
}

/// Bookkeeping shared by every operation: input bindings, owned outputs, and identity.
#[derive(Clone, Debug, Default)]
pub struct OperationCore {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
    instance_key: Option<InstanceKey>,
    preview: Option<PreviewTarget>,
}

impl OperationCore {
    /// Empty core with no inputs or outputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Core for `node`: one input per available input socket and one freshly created result
    /// per available output socket.
    pub fn for_node(node: &Node, results: &mut ResultStore) -> Self {
        let mut core = Self::new();
        for s in node.inputs.iter().filter(|s| s.available) {
            core.declare_input(s.identifier.clone(), s.ty);
        }
        for s in node.outputs.iter().filter(|s| s.available) {
            core.populate_output(s.identifier.clone(), results.create(s.ty));
        }
        core
    }

    /// Declare an input.
    pub fn declare_input(&mut self, identifier: impl Into<String>, ty: ResultType) {
        self.inputs.push(InputBinding {
            identifier: identifier.into(),
            ty,
            result: None,
        });
    }

    /// Take ownership of `result` as the output `identifier`.
    pub fn populate_output(&mut self, identifier: impl Into<String>, result: ResultId) {
        self.outputs.push(OutputBinding {
            identifier: identifier.into(),
            result,
        });
    }

    /// Bind the input `identifier` to `result`. Returns `false` for unknown identifiers.
    pub fn map_input(&mut self, identifier: &str, result: ResultId) -> bool {
        match self.inputs.iter_mut().find(|b| b.identifier == identifier) {
            Some(b) => {
                b.result = Some(result);
                true
            }
            None => false,
        }
    }

    /// All input bindings.
    pub fn inputs(&self) -> &[InputBinding] {
        &self.inputs
    }

    /// All owned outputs.
    pub fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    /// Result bound to input `identifier`.
    pub fn input(&self, identifier: &str) -> Option<ResultId> {
        self.inputs
            .iter()
            .find(|b| b.identifier == identifier)
            .and_then(|b| b.result)
    }

    /// Result owned as output `identifier`.
    pub fn output(&self, identifier: &str) -> Option<ResultId> {
        self.outputs
            .iter()
            .find(|b| b.identifier == identifier)
            .map(|b| b.result)
    }

    /// Read input `identifier`, falling back to the zero value of its kind when unbound.
    pub fn input_view(&self, results: &ResultStore, identifier: &str) -> ResultView {
        match self.inputs.iter().find(|b| b.identifier == identifier) {
            Some(InputBinding {
                result: Some(id), ..
            }) => results.view(*id),
            Some(b) => ResultView::Uniform(Value::zero(b.ty)),
            None => ResultView::Uniform(Value::Float(0.0)),
        }
    }

    /// Key of the node occurrence this operation stands for.
    pub fn instance_key(&self) -> Option<InstanceKey> {
        self.instance_key
    }

    /// Set the node occurrence key.
    pub fn set_instance_key(&mut self, key: InstanceKey) {
        self.instance_key = Some(key);
    }

    pub(crate) fn set_preview(&mut self, previews: SharedPreviews, key: InstanceKey) {
        self.preview = Some(PreviewTarget { previews, key });
    }

    pub(crate) fn preview(&self) -> Option<&PreviewTarget> {
        self.preview.as_ref()
    }
}

/// Everything an operation may touch while it runs.
pub struct EvalCtx<'a> {
    /// Host services.
    pub context: &'a dyn Context,
    /// Result arena of the whole evaluation.
    pub results: &'a mut ResultStore,
}

impl<'a> EvalCtx<'a> {
    /// Bundle a context with a result store.
    pub fn new(context: &'a dyn Context, results: &'a mut ResultStore) -> Self {
        Self { context, results }
    }
}

/// One executable step of an evaluation stream.
pub trait Operation {
    /// Shared bookkeeping.
    fn core(&self) -> &OperationCore;

    /// Mutable shared bookkeeping.
    fn core_mut(&mut self) -> &mut OperationCore;

    /// Compute outputs from mapped inputs. Must allocate every output it is asked to compute.
    fn execute(&mut self, cx: &mut EvalCtx<'_>);

    /// Record a thumbnail of the first output if one was requested, then drop the extra
    /// reference the compiler took for it.
    fn compute_preview(&mut self, cx: &mut EvalCtx<'_>) {
        let core = self.core();
        let (Some(target), Some(first)) = (core.preview(), core.outputs().first()) else {
            return;
        };
        if cx.results.get(first.result).is_allocated() {
            write_preview(&target.previews, target.key, &cx.results.view(first.result));
        }
        cx.results.release(first.result);
    }

    /// Drop one reference from every mapped input.
    fn release_inputs(&mut self, cx: &mut EvalCtx<'_>) {
        for b in self.core().inputs() {
            if let Some(id) = b.result {
                cx.results.release(id);
            }
        }
    }

    /// Node occurrences whose execution time this operation accounts for.
    fn profiled_keys(&self) -> SmallVec<[InstanceKey; 4]> {
        self.core().instance_key().into_iter().collect()
    }
}

/// Run one operation through its full lifecycle: execute, profile, preview, release inputs,
/// and free outputs nobody consumes.
pub fn evaluate(op: &mut dyn Operation, cx: &mut EvalCtx<'_>) {
    let start = Instant::now();
    op.execute(cx);
    let end = Instant::now();

    if let Some(profiler) = cx.context.profiler() {
        profiler.add_operation_execution_time(&op.profiled_keys(), start, end);
    }

    op.compute_preview(cx);
    op.release_inputs(cx);
    release_unneeded_results(op, cx);
}

fn release_unneeded_results(op: &dyn Operation, cx: &mut EvalCtx<'_>) {
    for b in op.core().outputs() {
        if !cx.results.should_compute(b.result) {
            cx.results.free(b.result);
        }
    }
}

/// Fallback for nodes that cannot be evaluated: every output becomes invalid.
#[derive(Debug)]
pub struct UndefinedOperation {
    core: OperationCore,
}

impl UndefinedOperation {
    /// Wrap a prepared core.
    pub fn new(core: OperationCore) -> Self {
        Self { core }
    }
}

impl Operation for UndefinedOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        for b in self.core.outputs() {
            cx.results.allocate_invalid(b.result);
        }
    }
}

/// Supplies the default value of an unlinked input as a single-value result.
#[derive(Debug)]
pub struct InputSingleValueOperation {
    core: OperationCore,
    value: Value,
}

impl InputSingleValueOperation {
    /// Identifier of the only output.
    pub const OUTPUT: &'static str = "Output";

    /// Create the operation and its output with one consumer.
    pub fn new(results: &mut ResultStore, ty: ResultType, value: Value) -> Self {
        let id = results.create(ty);
        results.set_reference_count(id, 1);
        let mut core = OperationCore::new();
        core.populate_output(Self::OUTPUT, id);
        Self {
            core,
            value: value.convert(ty),
        }
    }

    /// The produced result.
    pub fn result(&self) -> ResultId {
        self.core.outputs()[0].result
    }
}

impl Operation for InputSingleValueOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        cx.results.allocate_single(self.result(), self.value);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/operation.rs"]
mod tests;
