//! Node types: the per-node-type behavior the compiler consumes, plus the built-in set.

use std::fmt;
use std::sync::Arc;

use crate::compile::operation::{Operation, OperationCore, UndefinedOperation};
use crate::foundation::core::Value;
use crate::render::cpu::PixelNodeOperation;
use crate::tree::model::{InputSocket, Node, NodeTree, OutputSocket};

pub(crate) mod color;
pub(crate) mod filter;
pub(crate) mod input;
pub(crate) mod math;
pub(crate) mod output;
pub(crate) mod registry;

pub use color::{
    CombineColorNode, GammaNode, InvertNode, MixBlend, MixRgbNode, RgbToBwNode,
    SeparateColorNode,
};
pub use filter::BlurNode;
pub use input::{ImageNode, RgbNode, SceneTimeNode, ValueNode};
pub use math::{MathNode, MathOp};
pub use output::ViewerNode;
pub use registry::{NodeFactory, NodeTypeRegistry};

/// Sockets a node type exposes.
#[derive(Clone, Debug, Default)]
pub struct NodeDeclaration {
    /// Inputs in order.
    pub inputs: Vec<InputSocket>,
    /// Outputs in order.
    pub outputs: Vec<OutputSocket>,
}

/// Per-pixel computation of a pixel node.
///
/// `inputs` holds one value per declared input, already converted to the socket kind.
/// `outputs` holds one zero-initialized value per declared output.
pub trait PixelFunction: Send + Sync + fmt::Debug {
    /// Compute one pixel.
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]);

    /// Kernel snippet naming this computation. Equal snippets must compute equal functions.
    fn kernel_source(&self) -> String;
}

/// Behavior of one kind of node.
pub trait NodeType: Send + Sync {
    /// Stable kind name, as used in tree documents.
    fn name(&self) -> &str;

    /// Declared sockets.
    fn declare(&self) -> NodeDeclaration;

    /// Whether the node can be evaluated inside `tree`. Failing nodes compile to an
    /// operation producing invalid outputs.
    fn poll(&self, _tree: &NodeTree) -> bool {
        true
    }

    /// Per-pixel function, for nodes that can be fused into pixel operations.
    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        None
    }

    /// Whether this node writes the viewer output.
    fn is_viewer(&self) -> bool {
        false
    }

    /// Standalone operation for `node`. Pixel nodes default to running their pixel function
    /// on their own.
    fn operation(&self, node: &Node, core: OperationCore) -> Box<dyn Operation> {
        match self.pixel_function() {
            Some(function) => Box::new(PixelNodeOperation::new(core, node, function)),
            None => Box::new(UndefinedOperation::new(core)),
        }
    }
}

impl fmt::Debug for dyn NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeType({})", self.name())
    }
}
