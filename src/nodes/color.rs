use std::sync::Arc;

use crate::foundation::core::{ResultType, Value, luminance};
use crate::nodes::{NodeDeclaration, NodeType, PixelFunction};
use crate::tree::model::{InputSocket, OutputSocket};

const WHITE: Value = Value::Color([1.0, 1.0, 1.0, 1.0]);
const GREY: Value = Value::Color([0.5, 0.5, 0.5, 1.0]);

/// Blend mode of a [`MixRgbNode`]. Alpha is taken from the first image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixBlend {
    /// Linear interpolation.
    Mix,
    /// `a + b`
    Add,
    /// `a * b`
    Multiply,
    /// `1 - (1 - a)(1 - b)`
    Screen,
    /// `a - b`
    Subtract,
    /// `|a - b|`
    Difference,
}

impl MixBlend {
    fn blend(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Mix => b,
            Self::Add => a + b,
            Self::Multiply => a * b,
            Self::Screen => 1.0 - (1.0 - a) * (1.0 - b),
            Self::Subtract => a - b,
            Self::Difference => (a - b).abs(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Mix => "mix",
            Self::Add => "add",
            Self::Multiply => "multiply",
            Self::Screen => "screen",
            Self::Subtract => "subtract",
            Self::Difference => "difference",
        }
    }
}

/// Blend two colors by factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixRgbNode {
    /// Blend mode.
    pub blend: MixBlend,
}

impl NodeType for MixRgbNode {
    fn name(&self) -> &str {
        "mix_rgb"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![
                InputSocket::new("Fac", ResultType::Float, Value::Float(0.5)),
                InputSocket::new("Image", ResultType::Color, GREY),
                InputSocket::new("Image_001", ResultType::Color, GREY),
            ],
            outputs: vec![OutputSocket::new("Image", ResultType::Color)],
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for MixRgbNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        let fac = inputs[0].as_float().clamp(0.0, 1.0);
        let a = inputs[1].as_color();
        let b = inputs[2].as_color();
        let mut out = a;
        for c in 0..3 {
            let blended = self.blend.blend(a[c], b[c]);
            out[c] = a[c] + (blended - a[c]) * fac;
        }
        outputs[0] = Value::Color(out);
    }

    fn kernel_source(&self) -> String {
        format!("mix_{}", self.blend.as_str())
    }
}

/// Invert RGB, blended with the original by factor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InvertNode;

impl NodeType for InvertNode {
    fn name(&self) -> &str {
        "invert"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![
                InputSocket::new("Fac", ResultType::Float, Value::Float(1.0)),
                InputSocket::new("Color", ResultType::Color, WHITE),
            ],
            outputs: vec![OutputSocket::new("Color", ResultType::Color)],
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for InvertNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        let fac = inputs[0].as_float();
        let c = inputs[1].as_color();
        let mut out = c;
        for i in 0..3 {
            out[i] = c[i] + ((1.0 - c[i]) - c[i]) * fac;
        }
        outputs[0] = Value::Color(out);
    }

    fn kernel_source(&self) -> String {
        "invert".to_owned()
    }
}

/// Raise positive RGB channels to a power.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GammaNode;

impl NodeType for GammaNode {
    fn name(&self) -> &str {
        "gamma"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![
                InputSocket::new("Image", ResultType::Color, WHITE),
                InputSocket::new("Gamma", ResultType::Float, Value::Float(1.0)),
            ],
            outputs: vec![OutputSocket::new("Image", ResultType::Color)],
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for GammaNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        let mut c = inputs[0].as_color();
        let g = inputs[1].as_float();
        for ch in c.iter_mut().take(3) {
            if *ch > 0.0 {
                *ch = ch.powf(g);
            }
        }
        outputs[0] = Value::Color(c);
    }

    fn kernel_source(&self) -> String {
        "gamma".to_owned()
    }
}

/// Color to luminance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgbToBwNode;

impl NodeType for RgbToBwNode {
    fn name(&self) -> &str {
        "rgb_to_bw"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![InputSocket::new("Image", ResultType::Color, GREY)],
            outputs: vec![OutputSocket::new("Val", ResultType::Float)],
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for RgbToBwNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        outputs[0] = Value::Float(luminance(inputs[0].as_color()));
    }

    fn kernel_source(&self) -> String {
        "rgb_to_bw".to_owned()
    }
}

/// Split a color into its four channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeparateColorNode;

const CHANNELS: [&str; 4] = ["Red", "Green", "Blue", "Alpha"];

impl NodeType for SeparateColorNode {
    fn name(&self) -> &str {
        "separate_color"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![InputSocket::new("Image", ResultType::Color, WHITE)],
            outputs: CHANNELS
                .iter()
                .map(|c| OutputSocket::new(*c, ResultType::Float))
                .collect(),
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for SeparateColorNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        let c = inputs[0].as_color();
        for (o, v) in outputs.iter_mut().zip(c) {
            *o = Value::Float(v);
        }
    }

    fn kernel_source(&self) -> String {
        "separate_rgba".to_owned()
    }
}

/// Build a color from four channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CombineColorNode;

impl NodeType for CombineColorNode {
    fn name(&self) -> &str {
        "combine_color"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: CHANNELS
                .iter()
                .map(|c| {
                    let default = if *c == "Alpha" { 1.0 } else { 0.0 };
                    InputSocket::new(*c, ResultType::Float, Value::Float(default))
                })
                .collect(),
            outputs: vec![OutputSocket::new("Image", ResultType::Color)],
        }
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(*self))
    }
}

impl PixelFunction for CombineColorNode {
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) {
        let mut c = [0.0; 4];
        for (ch, v) in c.iter_mut().zip(inputs) {
            *ch = v.as_float();
        }
        outputs[0] = Value::Color(c);
    }

    fn kernel_source(&self) -> String {
        "combine_rgba".to_owned()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/nodes/color.rs"]
mod tests;
