use std::sync::Arc;

use crate::compile::operation::{EvalCtx, Operation, OperationCore};
use crate::context::ViewerOutput;
use crate::foundation::core::{ResultType, Value};
use crate::nodes::{NodeDeclaration, NodeType};
use crate::result::buffer_pool::PixelBuffer;
use crate::result::store::ResultView;
use crate::tree::model::{InputSocket, Node};

/// Hands a copy of its input to the host's viewer slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ViewerNode;

impl NodeType for ViewerNode {
    fn name(&self) -> &str {
        "viewer"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![InputSocket::new(
                "Image",
                ResultType::Color,
                Value::Color([0.0, 0.0, 0.0, 1.0]),
            )],
            outputs: Vec::new(),
        }
    }

    fn is_viewer(&self) -> bool {
        true
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(ViewerOperation { core })
    }
}

struct ViewerOperation {
    core: OperationCore,
}

impl Operation for ViewerOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        // The slot outlives the evaluation, so it never holds a pooled buffer.
        let view = match self.core.input_view(cx.results, "Image") {
            ResultView::Image(buf) => ResultView::Image(Arc::new(PixelBuffer::clone(&buf))),
            uniform => uniform,
        };
        let instance_key = self.core.instance_key().unwrap_or_default();
        tracing::debug!(?instance_key, domain = ?view.domain(), "viewer output");
        cx.context.write_viewer(ViewerOutput { instance_key, view });
    }
}

#[cfg(test)]
#[path = "../../tests/unit/nodes/output.rs"]
mod tests;
