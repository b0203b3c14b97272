use std::sync::Arc;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::compile::fusion::{
    PixelProcedure, ProcedureOutput, ProcedureScratch, ProcedureStep, StepInput,
};
use crate::compile::operation::{EvalCtx, Operation, OperationCore};
use crate::compile::pixel::{PixelOperation, PixelOperationBase, image_domain};
use crate::context::Context;
use crate::foundation::core::{InstanceKey, Value};
use crate::nodes::PixelFunction;
use crate::result::buffer_pool::PixelBuffer;
use crate::result::store::{ResultId, ResultView};
use crate::tree::model::Node;

/// Run `f` on the context's thread pool, or the global one.
pub(crate) fn install<R: Send>(context: &dyn Context, f: impl FnOnce() -> R + Send) -> R {
    match context.thread_pool() {
        Some(pool) => pool.install(f),
        None => f(),
    }
}

/// Evaluate `procedure` over `inputs` and allocate each of `outputs`
/// (`(procedure output index, result)`).
///
/// With `single_value` or no image input the procedure runs once and outputs are single
/// values. Otherwise it runs per pixel over the domain of the first image input, rows in
/// parallel.
pub(crate) fn run_procedure(
    cx: &mut EvalCtx<'_>,
    procedure: &PixelProcedure,
    inputs: &[ResultView],
    outputs: &[(usize, ResultId)],
    single_value: bool,
) {
    if outputs.is_empty() {
        return;
    }
    let domain = if single_value {
        None
    } else {
        image_domain(inputs)
    };
    let out_types: Vec<_> = procedure.outputs().iter().map(|o| o.ty).collect();

    let Some(domain) = domain else {
        let uniform: Vec<Value> = inputs.iter().map(|v| v.sample(0, 0)).collect();
        let mut scratch = ProcedureScratch::new(procedure);
        let mut values: Vec<Value> = out_types.iter().map(|t| Value::zero(*t)).collect();
        procedure.evaluate(&uniform, &mut scratch, &mut values);
        for (idx, id) in outputs {
            cx.results.allocate_single(*id, values[*idx]);
        }
        return;
    };

    let mut buffers: Vec<PixelBuffer> = outputs
        .iter()
        .map(|(idx, _)| cx.results.acquire_buffer(domain, out_types[*idx]))
        .collect();
    let selected: Vec<usize> = outputs.iter().map(|(idx, _)| *idx).collect();

    install(cx.context, || {
        let height = domain.height as usize;
        let mut rows: Vec<SmallVec<[&mut [f32]; 4]>> = (0..height).map(|_| SmallVec::new()).collect();
        for buf in &mut buffers {
            let row_len = domain.width as usize * buf.ty().channels();
            for (y, chunk) in buf.data_mut().chunks_mut(row_len.max(1)).enumerate() {
                rows[y].push(chunk);
            }
        }
        rows.into_par_iter().enumerate().for_each_init(
            || {
                (
                    ProcedureScratch::new(procedure),
                    Vec::with_capacity(inputs.len()),
                    out_types.iter().map(|t| Value::zero(*t)).collect::<Vec<_>>(),
                )
            },
            |(scratch, ins, values), (y, mut row)| {
                for x in 0..domain.width {
                    ins.clear();
                    ins.extend(inputs.iter().map(|v| v.sample(x, y as u32)));
                    procedure.evaluate(ins, scratch, values);
                    for (slice, idx) in row.iter_mut().zip(&selected) {
                        let ch = out_types[*idx].channels();
                        let at = x as usize * ch;
                        values[*idx].write_channels(&mut slice[at..at + ch]);
                    }
                }
            },
        );
    });

    for ((_, id), buf) in outputs.iter().zip(buffers) {
        cx.results.allocate_image(*id, buf);
    }
}

/// Pixel unit evaluated on the CPU.
pub struct CpuPixelOperation {
    base: PixelOperationBase,
    is_single_value: bool,
}

impl CpuPixelOperation {
    /// Wrap a prepared base. `is_single_value` evaluates the unit once.
    pub fn new(base: PixelOperationBase, is_single_value: bool) -> Self {
        Self {
            base,
            is_single_value,
        }
    }
}

impl Operation for CpuPixelOperation {
    fn core(&self) -> &OperationCore {
        self.base.core()
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        self.base.core_mut()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(nodes = self.base.node_count(), single = self.is_single_value))]
    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        let views = self.base.input_views(cx.results);
        let outputs = self.base.needed_outputs(cx.results);
        run_procedure(
            cx,
            self.base.procedure(),
            &views,
            &outputs,
            self.is_single_value,
        );
    }

    fn compute_preview(&mut self, cx: &mut EvalCtx<'_>) {
        self.base.compute_preview(cx);
    }

    fn profiled_keys(&self) -> SmallVec<[InstanceKey; 4]> {
        self.base.profiled_keys()
    }
}

impl PixelOperation for CpuPixelOperation {
    fn base(&self) -> &PixelOperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PixelOperationBase {
        &mut self.base
    }
}

/// A single pixel node compiled on its own, outside of any fused unit.
pub struct PixelNodeOperation {
    core: OperationCore,
    procedure: PixelProcedure,
}

impl PixelNodeOperation {
    /// Build a one-step procedure reading the node's available inputs in order.
    pub fn new(core: OperationCore, node: &Node, function: Arc<dyn PixelFunction>) -> Self {
        let mut slot = 0;
        let mut inputs = Vec::new();
        let args = node
            .inputs
            .iter()
            .map(|s| {
                if s.available {
                    inputs.push(s.ty);
                    slot += 1;
                    (StepInput::External(slot - 1), s.ty)
                } else {
                    (StepInput::Constant(s.default), s.ty)
                }
            })
            .collect();
        let outputs = node
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, s)| s.available)
            .map(|(i, s)| ProcedureOutput {
                step: 0,
                output: i,
                ty: s.ty,
            })
            .collect();
        let step = ProcedureStep {
            name: node.name.clone(),
            function,
            inputs: args,
            outputs: node.outputs.iter().map(|s| s.ty).collect(),
        };
        Self {
            core,
            procedure: PixelProcedure::new(inputs, vec![step], outputs),
        }
    }
}

impl Operation for PixelNodeOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        let views: Vec<ResultView> = self
            .core
            .inputs()
            .iter()
            .map(|b| self.core.input_view(cx.results, &b.identifier))
            .collect();
        let outputs: Vec<(usize, ResultId)> = self
            .core
            .outputs()
            .iter()
            .enumerate()
            .filter(|(_, b)| cx.results.should_compute(b.result))
            .map(|(i, b)| (i, b.result))
            .collect();
        run_procedure(cx, &self.procedure, &views, &outputs, false);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/cpu.rs"]
mod tests;
