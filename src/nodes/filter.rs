use rayon::prelude::*;

use crate::compile::operation::{EvalCtx, Operation, OperationCore};
use crate::foundation::core::{ResultType, Value};
use crate::nodes::{NodeDeclaration, NodeType};
use crate::render::cpu::install;
use crate::result::buffer_pool::PixelBuffer;
use crate::result::store::ResultView;
use crate::tree::model::{InputSocket, Node, OutputSocket};

/// Separable Gaussian blur. `Size` is the kernel radius in pixels, read as a single value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlurNode;

impl NodeType for BlurNode {
    fn name(&self) -> &str {
        "blur"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![
                InputSocket::new("Image", ResultType::Color, Value::Color([1.0; 4])),
                InputSocket::new("Size", ResultType::Float, Value::Float(0.0)),
            ],
            outputs: vec![OutputSocket::new("Image", ResultType::Color)],
        }
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(BlurOperation { core })
    }
}

struct BlurOperation {
    core: OperationCore,
}

impl Operation for BlurOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    #[tracing::instrument(level = "debug", skip_all)]
    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        let Some(out) = self.core.output("Image") else {
            return;
        };
        if !cx.results.should_compute(out) {
            return;
        }
        let size = self.core.input_view(cx.results, "Size").sample(0, 0).as_float();
        let radius = if size.is_finite() { size.round().max(0.0) as u32 } else { 0 };

        match self.core.input_view(cx.results, "Image") {
            ResultView::Uniform(v) => cx.results.allocate_single(out, v),
            ResultView::Image(_) if radius == 0 => match self.core.input("Image") {
                Some(src) => cx.results.share_data(out, src),
                None => cx.results.allocate_invalid(out),
            },
            ResultView::Image(src) => {
                let weights = gaussian_weights(radius, radius as f32 / 2.0);
                let mut tmp = cx.results.acquire_buffer(src.domain(), src.ty());
                let mut dst = cx.results.acquire_buffer(src.domain(), src.ty());
                install(cx.context, || {
                    horizontal_pass(&src, &mut tmp, &weights);
                    vertical_pass(&tmp, &mut dst, &weights);
                });
                cx.results.return_buffer(tmp);
                cx.results.allocate_image(out, dst);
            }
        }
    }
}

/// Normalized Gaussian weights for `-radius..=radius`.
fn gaussian_weights(radius: u32, sigma: f32) -> Vec<f32> {
    let r = radius as i32;
    let sigma = sigma.max(0.5);
    let denom = 2.0 * sigma * sigma;
    let mut w: Vec<f32> = (-r..=r).map(|i| (-(i * i) as f32 / denom).exp()).collect();
    let sum: f32 = w.iter().sum();
    for v in &mut w {
        *v /= sum;
    }
    w
}

fn horizontal_pass(src: &PixelBuffer, dst: &mut PixelBuffer, k: &[f32]) {
    let d = src.domain();
    let ch = src.ty().channels();
    let row_len = d.width as usize * ch;
    let radius = (k.len() / 2) as i64;
    let w = i64::from(d.width);
    dst.data_mut()
        .par_chunks_mut(row_len.max(1))
        .enumerate()
        .for_each(|(y, row)| {
            let src_row = &src.data()[y * row_len..(y + 1) * row_len];
            for x in 0..w {
                let px = &mut row[x as usize * ch..(x as usize + 1) * ch];
                for (ki, &kw) in k.iter().enumerate() {
                    let sx = (x + ki as i64 - radius).clamp(0, w - 1) as usize;
                    for c in 0..ch {
                        px[c] += kw * src_row[sx * ch + c];
                    }
                }
            }
        });
}

fn vertical_pass(src: &PixelBuffer, dst: &mut PixelBuffer, k: &[f32]) {
    let d = src.domain();
    let ch = src.ty().channels();
    let row_len = d.width as usize * ch;
    let radius = (k.len() / 2) as i64;
    let h = i64::from(d.height);
    dst.data_mut()
        .par_chunks_mut(row_len.max(1))
        .enumerate()
        .for_each(|(y, row)| {
            for (ki, &kw) in k.iter().enumerate() {
                let sy = (y as i64 + ki as i64 - radius).clamp(0, h - 1) as usize;
                let src_row = &src.data()[sy * row_len..(sy + 1) * row_len];
                for (o, s) in row.iter_mut().zip(src_row) {
                    *o += kw * s;
                }
            }
        });
}

#[cfg(test)]
#[path = "../../tests/unit/nodes/filter.rs"]
mod tests;
