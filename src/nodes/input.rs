use std::path::Path;
use std::sync::Arc;

use crate::compile::operation::{EvalCtx, Operation, OperationCore};
use crate::foundation::core::{Domain, ResultType, Value};
use crate::foundation::error::{CompositorError, CompositorResult};
use crate::nodes::{NodeDeclaration, NodeType};
use crate::result::buffer_pool::PixelBuffer;
use crate::tree::model::{Node, OutputSocket};

/// Constant scalar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueNode {
    /// Emitted value.
    pub value: f32,
}

impl NodeType for ValueNode {
    fn name(&self) -> &str {
        "value"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: Vec::new(),
            outputs: vec![OutputSocket::new("Value", ResultType::Float)],
        }
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(ConstantOperation {
            core,
            value: Value::Float(self.value),
        })
    }
}

/// Constant color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgbNode {
    /// Emitted color.
    pub color: [f32; 4],
}

impl NodeType for RgbNode {
    fn name(&self) -> &str {
        "rgb"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: Vec::new(),
            outputs: vec![OutputSocket::new("RGBA", ResultType::Color)],
        }
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(ConstantOperation {
            core,
            value: Value::Color(self.color),
        })
    }
}

struct ConstantOperation {
    core: OperationCore,
    value: Value,
}

impl Operation for ConstantOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        if let Some(out) = self.core.outputs().first()
            && cx.results.should_compute(out.result)
        {
            cx.results.allocate_single(out.result, self.value);
        }
    }
}

/// Current frame number as a scalar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneTimeNode;

impl NodeType for SceneTimeNode {
    fn name(&self) -> &str {
        "scene_time"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: Vec::new(),
            outputs: vec![OutputSocket::new("Frame", ResultType::Float)],
        }
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(SceneTimeOperation { core })
    }
}

struct SceneTimeOperation {
    core: OperationCore,
}

impl Operation for SceneTimeOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        if let Some(out) = self.core.output("Frame")
            && cx.results.should_compute(out)
        {
            let frame = cx.context.frame_number() as f32;
            cx.results.allocate_single(out, Value::Float(frame));
        }
    }
}

/// Caller-provided pixels, exposed without copying.
#[derive(Clone, Debug)]
pub struct ImageNode {
    image: Arc<PixelBuffer>,
}

impl ImageNode {
    /// Wrap color pixels. Non-color buffers are rejected.
    pub fn new(image: Arc<PixelBuffer>) -> CompositorResult<Self> {
        if image.ty() != ResultType::Color {
            return Err(CompositorError::validation(
                "image node expects a color buffer",
            ));
        }
        Ok(Self { image })
    }

    /// Image of `domain` filled with `color`.
    pub fn solid(domain: Domain, color: [f32; 4]) -> Self {
        Self {
            image: Arc::new(PixelBuffer::filled(
                domain,
                ResultType::Color,
                Value::Color(color),
            )),
        }
    }

    /// Decode an image file into linear color pixels.
    pub fn load(path: &Path) -> CompositorResult<Self> {
        let decoded = image::open(path).map_err(|e| {
            CompositorError::validation(format!("load image '{}': {e}", path.display()))
        })?;
        let rgba = decoded.to_rgba32f();
        let domain = Domain::new(rgba.width(), rgba.height());
        let buf = PixelBuffer::from_data(domain, ResultType::Color, rgba.into_raw())
            .ok_or_else(|| CompositorError::validation("decoded image has unexpected size"))?;
        Ok(Self {
            image: Arc::new(buf),
        })
    }

    /// The wrapped pixels.
    pub fn image(&self) -> &Arc<PixelBuffer> {
        &self.image
    }
}

impl NodeType for ImageNode {
    fn name(&self) -> &str {
        "image"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: Vec::new(),
            outputs: vec![
                OutputSocket::new("Image", ResultType::Color),
                OutputSocket::new("Alpha", ResultType::Float),
            ],
        }
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(ImageOperation {
            core,
            image: Arc::clone(&self.image),
        })
    }
}

struct ImageOperation {
    core: OperationCore,
    image: Arc<PixelBuffer>,
}

impl Operation for ImageOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        if let Some(out) = self.core.output("Image")
            && cx.results.should_compute(out)
        {
            cx.results.allocate_external(out, Arc::clone(&self.image));
        }
        if let Some(out) = self.core.output("Alpha")
            && cx.results.should_compute(out)
        {
            let mut alpha = cx.results.acquire_buffer(self.image.domain(), ResultType::Float);
            for (i, a) in alpha.data_mut().iter_mut().enumerate() {
                *a = self.image.pixel(i).as_color()[3];
            }
            cx.results.allocate_image(out, alpha);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/nodes/input.rs"]
mod tests;
