use std::sync::Arc;

use crate::compile::node_group::NodeGroupOperation;
use crate::compile::operation::{EvalCtx, Operation, OperationCore, OutputBinding};
use crate::compile::schedule::OutputTypes;
use crate::foundation::core::{InstanceKey, Value};
use crate::render::preview::SharedPreviews;
use crate::result::store::ResultId;
use crate::tree::model::NodeTree;

/// Evaluates a nested tree as a child instance and hands its outputs to the group node's
/// outputs without copying.
pub(crate) struct GroupNodeOperation {
    core: OperationCore,
    tree: Option<Arc<NodeTree>>,
    previews: Option<SharedPreviews>,
    active_instance_key: InstanceKey,
}

impl GroupNodeOperation {
    pub(crate) fn new(
        core: OperationCore,
        tree: Option<Arc<NodeTree>>,
        previews: Option<SharedPreviews>,
        active_instance_key: InstanceKey,
    ) -> Self {
        Self {
            core,
            tree,
            previews,
            active_instance_key,
        }
    }
}

impl Operation for GroupNodeOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        let Some(tree) = &self.tree else {
            tracing::warn!(key = ?self.core.instance_key(), "group node has no tree");
            for b in self.core.outputs() {
                if cx.results.should_compute(b.result) {
                    cx.results.allocate_invalid(b.result);
                }
            }
            return;
        };

        let mut child = NodeGroupOperation::new(
            cx.results,
            Arc::clone(tree),
            OutputTypes::GROUP_OUTPUT,
            self.previews.clone(),
            self.active_instance_key,
            self.core.instance_key().unwrap_or_default(),
        );
        for b in self.core.outputs() {
            if let Some(id) = child.output(&b.identifier) {
                let needed = cx.results.should_compute(b.result);
                cx.results.set_reference_count(id, u32::from(needed));
            }
        }
        for b in self.core.inputs() {
            if let Some(id) = b.result {
                child.map_input(&b.identifier, id);
            }
        }

        child.execute(cx);

        for b in self.core.outputs() {
            let child_output = child.output(&b.identifier);
            if cx.results.should_compute(b.result) {
                match child_output {
                    Some(id) => cx.results.share_data(b.result, id),
                    None => cx.results.allocate_invalid(b.result),
                }
            }
        }
        for b in child.core().outputs() {
            cx.results.free(b.result);
        }
    }
}

/// Interface input of the enclosing instance.
#[derive(Clone, Debug)]
pub(crate) struct GroupInputBinding {
    pub(crate) identifier: String,
    pub(crate) result: Option<ResultId>,
    pub(crate) default: Value,
}

/// Exposes the enclosing instance's inputs, or interface defaults for unmapped ones.
pub(crate) struct GroupInputOperation {
    core: OperationCore,
    bindings: Vec<GroupInputBinding>,
}

impl GroupInputOperation {
    pub(crate) fn new(core: OperationCore, bindings: Vec<GroupInputBinding>) -> Self {
        Self { core, bindings }
    }
}

impl Operation for GroupInputOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        for out in self.core.outputs() {
            if !cx.results.should_compute(out.result) {
                continue;
            }
            match self.bindings.iter().find(|b| b.identifier == out.identifier) {
                Some(GroupInputBinding {
                    result: Some(id), ..
                }) if cx.results.get(*id).is_allocated() => {
                    cx.results.share_data(out.result, *id);
                }
                Some(b) => cx.results.allocate_single(out.result, b.default),
                None => cx.results.allocate_invalid(out.result),
            }
        }
    }
}

/// Binds its inputs to the enclosing instance's outputs.
pub(crate) struct GroupOutputOperation {
    core: OperationCore,
    targets: Vec<OutputBinding>,
}

impl GroupOutputOperation {
    pub(crate) fn new(core: OperationCore, targets: Vec<OutputBinding>) -> Self {
        Self { core, targets }
    }
}

impl Operation for GroupOutputOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        for input in self.core.inputs() {
            let Some(target) = self.targets.iter().find(|t| t.identifier == input.identifier)
            else {
                continue;
            };
            if !cx.results.should_compute(target.result) {
                continue;
            }
            match input.result {
                Some(id) => cx.results.share_data(target.result, id),
                None => cx.results.allocate_single(target.result, Value::zero(input.ty)),
            }
        }
    }
}
