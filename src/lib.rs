//! Compositing node-graph compiler and evaluator.
//!
//! A [`NodeTree`] is scheduled, compiled into a stream of operations, and evaluated in a single
//! pass. Adjacent per-pixel nodes are fused into pixel operations that run on the CPU or on a
//! [`GpuDevice`]. Nested group trees evaluate as child instances whose outputs alias into the
//! parent without copies. Intermediate results are reference counted and released as soon as
//! their last consumer has run.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod compile;
mod context;
mod foundation;
mod nodes;
mod profile;
mod render;
mod result;
mod session;
mod tree;

pub use compile::fusion::{
    FusionCandidate, FusionPredicate, NeverJoin, PixelLimits, PixelProcedure, ProcedureOutput,
    ProcedureScratch, ProcedureStep, SingleValueCompatible, StepInput,
};
pub use compile::node_group::{ExecutionStatus, NodeGroupOperation};
pub use compile::operation::{
    EvalCtx, InputBinding, InputSingleValueOperation, Operation, OperationCore, OutputBinding,
    UndefinedOperation, evaluate,
};
pub use compile::pixel::{PixelOperation, PixelOperationBase};
pub use compile::schedule::{DepthFirstScheduler, OutputTypes, Schedule, ScheduleRequest, Scheduler};
pub use context::{Context, ContextBuilder, StandardContext, ViewerOutput};
pub use foundation::core::{Domain, InstanceKey, Precision, ResultType, Value, luminance};
pub use foundation::error::{CompositorError, CompositorResult};
pub use nodes::{
    BlurNode, CombineColorNode, GammaNode, ImageNode, InvertNode, MathNode, MathOp, MixBlend,
    MixRgbNode, NodeDeclaration, NodeFactory, NodeType, NodeTypeRegistry, PixelFunction, RgbNode,
    RgbToBwNode, SceneTimeNode, SeparateColorNode, ValueNode, ViewerNode,
};
pub use profile::Profiler;
pub use render::cpu::{CpuPixelOperation, PixelNodeOperation};
pub use render::gpu::{
    DeviceStats, GpuDevice, GpuKernel, GpuPixelOperation, KernelCache, KernelKey, SoftwareDevice,
};
pub use render::preview::{PREVIEW_SIZE, Preview, SharedPreviews};
pub use result::buffer_pool::{
    BufferPool, BufferPoolOpts, BufferPoolStats, PixelBuffer, SharedBufferPool,
};
pub use result::store::{ResultEntry, ResultId, ResultStore, ResultView};
pub use session::{Compositor, CompositorOpts, EvaluatedOutput, Evaluation};
pub use tree::document::{GroupSocketsDef, LinkDef, NodeDef, SocketDef, TreeDef, TreeDocument};
pub use tree::model::{
    InputRef, InputSocket, InterfaceSocket, Link, Node, NodeId, NodeKind, NodeTree,
    NodeTreeBuilder, OutputRef, OutputSocket,
};
