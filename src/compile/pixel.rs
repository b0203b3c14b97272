use smallvec::SmallVec;

use crate::compile::fusion::{LoweredUnit, PixelProcedure};
use crate::compile::operation::{EvalCtx, Operation, OperationCore};
use crate::foundation::core::{Domain, InstanceKey};
use crate::render::preview::{SharedPreviews, write_preview};
use crate::result::store::{ResultId, ResultStore, ResultView};
use crate::tree::model::{NodeTree, OutputRef};

/// State shared by every pixel operation backend: the lowered unit and its external interface.
pub struct PixelOperationBase {
    core: OperationCore,
    unit: LoweredUnit,
    node_keys: SmallVec<[InstanceKey; 4]>,
    previews: Option<(SharedPreviews, SmallVec<[InstanceKey; 2]>)>,
}

impl PixelOperationBase {
    pub(crate) fn new(
        unit: LoweredUnit,
        tree: &NodeTree,
        instance_key: InstanceKey,
        previews: Option<SharedPreviews>,
        results: &mut ResultStore,
    ) -> Self {
        let mut core = OperationCore::new();
        for i in &unit.inputs {
            core.declare_input(i.identifier.clone(), i.ty);
        }
        for o in &unit.outputs {
            core.populate_output(o.identifier.clone(), results.create(o.ty));
        }
        let key_of = |node| instance_key.child(&tree.node(node).name);
        let node_keys = unit.nodes.iter().map(|n| key_of(*n)).collect();
        let previews = previews.map(|p| {
            let keys = unit
                .outputs
                .iter()
                .map(|o| key_of(o.source.node))
                .collect();
            (p, keys)
        });
        Self {
            core,
            unit,
            node_keys,
            previews,
        }
    }

    /// Shared bookkeeping.
    pub fn core(&self) -> &OperationCore {
        &self.core
    }

    /// Mutable shared bookkeeping.
    pub fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    /// The fused per-pixel program.
    pub fn procedure(&self) -> &PixelProcedure {
        &self.unit.procedure
    }

    /// Number of nodes fused into this operation.
    pub fn node_count(&self) -> usize {
        self.unit.nodes.len()
    }

    /// External inputs: identifier, the outside output feeding it, and how many unit inputs
    /// read it.
    pub(crate) fn inputs_to_linked_outputs(&self) -> impl Iterator<Item = (&str, OutputRef, u32)> {
        self.unit
            .inputs
            .iter()
            .map(|i| (i.identifier.as_str(), i.source, i.occurrences))
    }

    /// Unit node outputs paired with the results exported for them.
    pub(crate) fn outputs_to_results(&self) -> impl Iterator<Item = (OutputRef, ResultId)> {
        self.unit
            .outputs
            .iter()
            .zip(self.core.outputs())
            .map(|(o, b)| (o.source, b.result))
    }

    /// Set each exported output's count to its outside consumers, plus one for a preview.
    pub(crate) fn compute_results_reference_counts(&self, results: &mut ResultStore) {
        for (o, b) in self.unit.outputs.iter().zip(self.core.outputs()) {
            let preview = u32::from(o.preview && self.previews.is_some());
            results.set_reference_count(b.result, o.consumers + preview);
        }
    }

    /// Snapshots of every external input in slot order.
    pub(crate) fn input_views(&self, results: &ResultStore) -> Vec<ResultView> {
        self.core
            .inputs()
            .iter()
            .map(|b| self.core.input_view(results, &b.identifier))
            .collect()
    }

    /// `(procedure output index, result)` for every output some consumer needs.
    pub(crate) fn needed_outputs(&self, results: &ResultStore) -> Vec<(usize, ResultId)> {
        self.core
            .outputs()
            .iter()
            .enumerate()
            .filter(|(_, b)| results.should_compute(b.result))
            .map(|(i, b)| (i, b.result))
            .collect()
    }

    pub(crate) fn profiled_keys(&self) -> SmallVec<[InstanceKey; 4]> {
        self.node_keys.clone()
    }

    pub(crate) fn compute_preview(&self, cx: &mut EvalCtx<'_>) {
        let Some((previews, keys)) = &self.previews else {
            return;
        };
        for ((o, b), key) in self.unit.outputs.iter().zip(self.core.outputs()).zip(keys) {
            if !o.preview {
                continue;
            }
            if cx.results.get(b.result).is_allocated() {
                write_preview(previews, *key, &cx.results.view(b.result));
            }
            cx.results.release(b.result);
        }
    }
}

/// Domain of the first image among `views`, or `None` when all are uniform.
pub(crate) fn image_domain(views: &[ResultView]) -> Option<Domain> {
    views.iter().find_map(ResultView::domain)
}

/// A compiled pixel unit: an [`Operation`] with access to its shared pixel state.
pub trait PixelOperation: Operation {
    /// Shared pixel state.
    fn base(&self) -> &PixelOperationBase;

    /// Mutable shared pixel state.
    fn base_mut(&mut self) -> &mut PixelOperationBase;
}
