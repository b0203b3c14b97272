//! Pixel-node fusion: unit lowering into a [`PixelProcedure`], kernel identity, and the policy
//! deciding when a unit is closed.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::compile::schedule::Schedule;
use crate::foundation::core::{Precision, ResultType, Value};
use crate::nodes::PixelFunction;
use crate::render::gpu::KernelKey;
use crate::tree::model::{InputRef, NodeId, NodeTree, OutputRef};

/// Caps on the distinct external inputs and outputs of one compiled pixel unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelLimits {
    /// Maximum distinct external inputs.
    pub max_inputs: usize,
    /// Maximum external outputs.
    pub max_outputs: usize,
}

impl Default for PixelLimits {
    fn default() -> Self {
        Self {
            max_inputs: 16,
            max_outputs: 8,
        }
    }
}

/// A pixel node about to join the open unit.
#[derive(Clone, Copy, Debug)]
pub struct FusionCandidate<'a> {
    /// Tree being compiled.
    pub tree: &'a NodeTree,
    /// Nodes already in the open unit, in schedule order.
    pub unit: &'a [NodeId],
    /// Node about to join.
    pub node: NodeId,
    /// Whether the open unit computes single values.
    pub unit_is_single_value: bool,
    /// Whether the node would compute a single value.
    pub node_is_single_value: bool,
}

/// Decides whether a pixel node may join the open pixel unit.
pub trait FusionPredicate {
    /// `false` closes and compiles the open unit before the node is added.
    fn can_join(&self, candidate: &FusionCandidate<'_>) -> bool;
}

/// Joins a node only if it agrees with the unit on single-valueness.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleValueCompatible;

impl FusionPredicate for SingleValueCompatible {
    fn can_join(&self, c: &FusionCandidate<'_>) -> bool {
        c.unit_is_single_value == c.node_is_single_value
    }
}

/// Never joins; every pixel node becomes a unit of one.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverJoin;

impl FusionPredicate for NeverJoin {
    fn can_join(&self, _: &FusionCandidate<'_>) -> bool {
        false
    }
}

/// Where a step argument comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum StepInput {
    /// An external input slot.
    External(usize),
    /// An output of an earlier step.
    Internal {
        /// Producing step.
        step: usize,
        /// Output index of that step.
        output: usize,
    },
    /// The socket default of an unlinked input.
    Constant(Value),
}

/// One pixel node inside a procedure.
#[derive(Clone, Debug)]
pub struct ProcedureStep {
    /// Node name. Not part of the kernel source.
    pub name: String,
    /// Per-pixel computation.
    pub function: Arc<dyn PixelFunction>,
    /// Arguments with the kind each is converted to.
    pub inputs: Vec<(StepInput, ResultType)>,
    /// Kinds of the step outputs.
    pub outputs: Vec<ResultType>,
}

/// An exported step output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcedureOutput {
    /// Producing step.
    pub step: usize,
    /// Output index of that step.
    pub output: usize,
    /// Exported kind.
    pub ty: ResultType,
}

/// Straight-line per-pixel program for a fused unit.
#[derive(Clone, Debug, Default)]
pub struct PixelProcedure {
    inputs: Vec<ResultType>,
    steps: Vec<ProcedureStep>,
    outputs: Vec<ProcedureOutput>,
}

impl PixelProcedure {
    /// Assemble a procedure from parts.
    pub fn new(
        inputs: Vec<ResultType>,
        steps: Vec<ProcedureStep>,
        outputs: Vec<ProcedureOutput>,
    ) -> Self {
        Self {
            inputs,
            steps,
            outputs,
        }
    }

    /// Kinds of the external input slots.
    pub fn input_types(&self) -> &[ResultType] {
        &self.inputs
    }

    /// Exported outputs.
    pub fn outputs(&self) -> &[ProcedureOutput] {
        &self.outputs
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[ProcedureStep] {
        &self.steps
    }

    /// Evaluate one pixel. `outputs` receives one value per exported output.
    pub fn evaluate(&self, inputs: &[Value], scratch: &mut ProcedureScratch, outputs: &mut [Value]) {
        for (si, step) in self.steps.iter().enumerate() {
            let args: SmallVec<[Value; 8]> = step
                .inputs
                .iter()
                .map(|(src, ty)| {
                    let v = match src {
                        StepInput::External(i) => inputs.get(*i).copied().unwrap_or(Value::zero(*ty)),
                        StepInput::Internal { step, output } => scratch.values[*step][*output],
                        StepInput::Constant(v) => *v,
                    };
                    v.convert(*ty)
                })
                .collect();
            let outs = &mut scratch.values[si];
            for (o, ty) in outs.iter_mut().zip(&step.outputs) {
                *o = Value::zero(*ty);
            }
            step.function.evaluate(&args, outs);
        }
        for (dst, o) in outputs.iter_mut().zip(&self.outputs) {
            *dst = scratch.values[o.step][o.output].convert(o.ty);
        }
    }

    /// Textual kernel source. Equal sources compute equal functions.
    pub fn source(&self, precision: Precision) -> String {
        let mut s = String::new();
        let p = match precision {
            Precision::Half => "half",
            Precision::Full => "full",
        };
        let _ = writeln!(s, "#precision {p}");
        for (i, ty) in self.inputs.iter().enumerate() {
            let _ = writeln!(s, "in{i}: {} = load({i});", ty.as_str());
        }
        for (si, step) in self.steps.iter().enumerate() {
            let args: Vec<String> = step
                .inputs
                .iter()
                .map(|(src, ty)| {
                    let arg = match src {
                        StepInput::External(i) => format!("in{i}"),
                        StepInput::Internal { step, output } => format!("s{step}_{output}"),
                        StepInput::Constant(v) => format!("{v:?}"),
                    };
                    format!("{}({arg})", ty.as_str())
                })
                .collect();
            let outs: Vec<String> = step
                .outputs
                .iter()
                .enumerate()
                .map(|(oi, ty)| format!("s{si}_{oi}: {}", ty.as_str()))
                .collect();
            let _ = writeln!(
                s,
                "{} = {}({});",
                outs.join(", "),
                step.function.kernel_source(),
                args.join(", ")
            );
        }
        for (i, o) in self.outputs.iter().enumerate() {
            let _ = writeln!(s, "store({i}, {}(s{}_{}));", o.ty.as_str(), o.step, o.output);
        }
        s
    }

    /// Cache key of the compiled kernel for this procedure.
    pub fn kernel_key(&self, precision: Precision) -> KernelKey {
        let source = self.source(precision);
        KernelKey {
            identity: xxhash_rust::xxh3::xxh3_64(source.as_bytes()),
            precision,
        }
    }
}

/// Reusable per-thread step storage for [`PixelProcedure::evaluate`].
#[derive(Clone, Debug)]
pub struct ProcedureScratch {
    values: Vec<Vec<Value>>,
}

impl ProcedureScratch {
    /// Scratch sized for `procedure`.
    pub fn new(procedure: &PixelProcedure) -> Self {
        Self {
            values: procedure
                .steps
                .iter()
                .map(|s| s.outputs.iter().map(|t| Value::zero(*t)).collect())
                .collect(),
        }
    }
}

/// Stand-in for a unit member without a pixel function; all outputs stay zero.
#[derive(Debug)]
struct ZeroFunction;

impl PixelFunction for ZeroFunction {
    fn evaluate(&self, _: &[Value], _: &mut [Value]) {}

    fn kernel_source(&self) -> String {
        "zero".to_owned()
    }
}

/// An external input slot of a lowered unit.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ExternalInput {
    pub(crate) identifier: String,
    pub(crate) source: OutputRef,
    pub(crate) ty: ResultType,
    /// Number of unit input sockets linked to `source`.
    pub(crate) occurrences: u32,
}

/// An exported output of a lowered unit.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ExternalOutput {
    pub(crate) identifier: String,
    pub(crate) source: OutputRef,
    pub(crate) ty: ResultType,
    /// Scheduled consumers outside the unit.
    pub(crate) consumers: u32,
    /// Whether this is the preview output of its node.
    pub(crate) preview: bool,
}

/// A pixel unit lowered to a procedure plus its external interface.
#[derive(Clone, Debug)]
pub(crate) struct LoweredUnit {
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) procedure: PixelProcedure,
    pub(crate) inputs: Vec<ExternalInput>,
    pub(crate) outputs: Vec<ExternalOutput>,
}

/// Lower the pixel nodes `unit` of `tree`. `wants_preview` selects nodes whose first output is
/// exported for a thumbnail even without outside consumers.
pub(crate) fn lower_unit(
    tree: &NodeTree,
    unit: &[NodeId],
    schedule: &Schedule,
    wants_preview: &dyn Fn(NodeId) -> bool,
) -> LoweredUnit {
    let position: HashMap<NodeId, usize> = unit.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let mut inputs: Vec<ExternalInput> = Vec::new();
    let mut input_slot: HashMap<OutputRef, usize> = HashMap::new();
    let mut steps = Vec::with_capacity(unit.len());

    for &id in unit {
        let node = tree.node(id);
        let function = node
            .node_type()
            .and_then(|t| t.pixel_function())
            .unwrap_or_else(|| Arc::new(ZeroFunction));
        let mut args = Vec::with_capacity(node.inputs.len());
        for (socket, s) in node.inputs.iter().enumerate() {
            let input = InputRef { node: id, socket };
            let src = match s.available.then(|| tree.linked_output(input)).flatten() {
                None => StepInput::Constant(s.default),
                Some(o) => match position.get(&o.node) {
                    Some(&step) => StepInput::Internal {
                        step,
                        output: o.socket,
                    },
                    None => {
                        let slot = *input_slot.entry(o).or_insert_with(|| {
                            inputs.push(ExternalInput {
                                identifier: format!("input{}", inputs.len()),
                                source: o,
                                ty: tree.node(o.node).outputs[o.socket].ty,
                                occurrences: 0,
                            });
                            inputs.len() - 1
                        });
                        inputs[slot].occurrences += 1;
                        StepInput::External(slot)
                    }
                },
            };
            args.push((src, s.ty));
        }
        steps.push(ProcedureStep {
            name: node.name.clone(),
            function,
            inputs: args,
            outputs: node.outputs.iter().map(|o| o.ty).collect(),
        });
    }

    let mut outputs = Vec::new();
    let mut exported = Vec::new();
    for (step, &id) in unit.iter().enumerate() {
        let node = tree.node(id);
        let preview_socket = (node.show_preview && wants_preview(id))
            .then(|| node.outputs.iter().position(|o| o.available))
            .flatten();
        for (socket, s) in node.outputs.iter().enumerate() {
            if !s.available {
                continue;
            }
            let source = OutputRef { node: id, socket };
            let consumers = tree
                .linked_inputs(source)
                .filter(|i| schedule.contains(i.node) && !position.contains_key(&i.node))
                .count();
            let preview = preview_socket == Some(socket);
            if consumers == 0 && !preview {
                continue;
            }
            exported.push(ProcedureOutput {
                step,
                output: socket,
                ty: s.ty,
            });
            outputs.push(ExternalOutput {
                identifier: format!("output{}", outputs.len()),
                source,
                ty: s.ty,
                consumers: u32::try_from(consumers).unwrap_or(u32::MAX),
                preview,
            });
        }
    }

    LoweredUnit {
        nodes: unit.to_vec(),
        procedure: PixelProcedure::new(inputs.iter().map(|i| i.ty).collect(), steps, exported),
        inputs,
        outputs,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/fusion.rs"]
mod tests;
