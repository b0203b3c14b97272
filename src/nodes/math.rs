use std::sync::Arc;

use crate::foundation::core::{ResultType, Value};
use crate::nodes::{NodeDeclaration, NodeType, PixelFunction};
use crate::tree::model::{InputSocket, OutputSocket};

/// Binary scalar operation of a [`MathNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    /// `a + b`
    Add,
    /// `a - b`
    Subtract,
    /// `a * b`
    Multiply,
    /// `a / b`, zero when `b` is zero.
    Divide,
    /// `a ^ b`, zero for negative bases with fractional exponents.
    Power,
    /// `min(a, b)`
    Minimum,
    /// `max(a, b)`
    Maximum,
}

impl MathOp {
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Subtract => a - b,
            Self::Multiply => a * b,
            Self::Divide => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
            Self::Power => {
                if a >= 0.0 || b.fract() == 0.0 {
                    a.powf(b)
                } else {
                    0.0
                }
            }
            Self::Minimum => a.min(b),
            Self::Maximum => a.max(b),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Power => "power",
            Self::Minimum => "minimum",
            Self::Maximum => "maximum",
        }
    }
}

/// Scalar math on two values, optionally clamped to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MathNode {
    /// Operation.
    pub op: MathOp,
    /// Clamp the result.
    pub clamp: bool,
}

impl MathNode {
    /// Unclamped math node.
    pub fn new(op: MathOp) -> Self {
        Self { op, clamp: false }
    }
}

impl NodeType for MathNode {
    fn name(&self) -> &str {
        "math"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![
                InputSocket::new("Value", ResultType::Float, Value::Float(0.5)),
                InputSocket::new("Value_001", ResultType::Float, Value::Float(0.5)),
            ],
            outputs: vec![OutputSocket::new("Value", ResultType::Float)],
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for MathNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        let r = self.op.apply(inputs[0].as_float(), inputs[1].as_float());
        outputs[0] = Value::Float(if self.clamp { r.clamp(0.0, 1.0) } else { r });
    }

    fn kernel_source(&self) -> String {
        if self.clamp {
            format!("math_{}_clamped", self.op.as_str())
        } else {
            format!("math_{}", self.op.as_str())
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/nodes/math.rs"]
mod tests;
