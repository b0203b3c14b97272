use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::compile::node_group::{ExecutionStatus, NodeGroupOperation};
use crate::compile::operation::EvalCtx;
use crate::compile::schedule::OutputTypes;
use crate::context::Context;
use crate::foundation::core::{InstanceKey, Value};
use crate::foundation::error::{CompositorError, CompositorResult};
use crate::render::preview::Preview;
use crate::result::buffer_pool::PixelBuffer;
use crate::result::store::ResultStore;
use crate::tree::model::NodeTree;

/// Options for one evaluation of a root tree.
#[derive(Clone, Debug)]
pub struct CompositorOpts {
    /// Output kinds to compute in the root instance.
    pub output_types: OutputTypes,
    /// Interface outputs to compute. `None` computes all of them.
    pub outputs: Option<Vec<String>>,
    /// Instance whose previews and viewers are wanted.
    pub active_instance_key: InstanceKey,
    /// Collect node previews.
    pub previews: bool,
}

impl Default for CompositorOpts {
    fn default() -> Self {
        Self {
            output_types: OutputTypes::ALL,
            outputs: None,
            active_instance_key: InstanceKey::ROOT,
            previews: false,
        }
    }
}

/// Value of one root interface output after evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum EvaluatedOutput {
    /// Uniform value.
    Single(Value),
    /// Image copied out of the evaluation.
    Image(PixelBuffer),
    /// The output could not be computed.
    Invalid,
}

/// Outcome of [`Compositor::evaluate`].
#[derive(Debug)]
pub struct Evaluation {
    /// Whether every scheduled node ran.
    pub status: ExecutionStatus,
    /// Requested root outputs by identifier.
    pub outputs: BTreeMap<String, EvaluatedOutput>,
    /// Previews by node occurrence.
    pub previews: HashMap<InstanceKey, Preview>,
    /// Total root time when profiling is on.
    pub total_time: Option<Duration>,
}

/// Evaluates root trees against a [`Context`].
pub struct Compositor<C> {
    context: C,
}

impl<C: Context> Compositor<C> {
    /// Wrap a context.
    pub fn new(context: C) -> Self {
        Self { context }
    }

    /// The wrapped context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable access to the wrapped context.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Compile and evaluate `tree` as the root instance.
    #[tracing::instrument(level = "info", skip_all, fields(tree = %tree.name))]
    pub fn evaluate(
        &self,
        tree: &Arc<NodeTree>,
        opts: &CompositorOpts,
    ) -> CompositorResult<Evaluation> {
        let requested: Vec<String> = match &opts.outputs {
            Some(names) => {
                for n in names {
                    if !tree.interface_outputs().iter().any(|s| &s.identifier == n) {
                        return Err(CompositorError::validation(format!(
                            "tree '{}' has no output '{n}'",
                            tree.name
                        )));
                    }
                }
                names.clone()
            }
            None => tree
                .interface_outputs()
                .iter()
                .map(|s| s.identifier.clone())
                .collect(),
        };

        if let Some(p) = self.context.profiler() {
            p.reset();
        }
        let previews = opts
            .previews
            .then(|| Arc::new(Mutex::new(HashMap::new())));
        let mut results = ResultStore::new(
            Arc::clone(self.context.buffer_pool()),
            self.context.precision(),
        );
        let mut root = NodeGroupOperation::new(
            &mut results,
            Arc::clone(tree),
            opts.output_types,
            previews.clone(),
            opts.active_instance_key,
            InstanceKey::ROOT,
        );
        for name in &requested {
            if let Some(id) = root.output(name) {
                results.set_reference_count(id, 1);
            }
        }

        let mut cx = EvalCtx::new(&self.context, &mut results);
        let status = root.execute(&mut cx);

        let mut outputs = BTreeMap::new();
        for b in root.core().outputs() {
            if requested.contains(&b.identifier) {
                let e = results.get(b.result);
                let value = if e.is_invalid() || !e.is_allocated() {
                    EvaluatedOutput::Invalid
                } else if let Some(img) = e.image() {
                    EvaluatedOutput::Image(PixelBuffer::clone(img))
                } else {
                    EvaluatedOutput::Single(e.single_value().unwrap_or(Value::zero(e.ty())))
                };
                outputs.insert(b.identifier.clone(), value);
            }
            results.free(b.result);
        }

        let total_time = self.context.profiler().map(|p| p.finalize(tree));
        let previews = match previews {
            Some(p) => std::mem::take(&mut *p.lock().unwrap_or_else(PoisonError::into_inner)),
            None => HashMap::new(),
        };
        tracing::debug!(live = results.live_results(), ?status, "evaluation finished");

        Ok(Evaluation {
            status,
            outputs,
            previews,
            total_time,
        })
    }
}

#[cfg(test)]
#[path = "../tests/unit/session.rs"]
mod tests;
