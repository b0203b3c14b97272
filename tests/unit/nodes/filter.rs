use std::sync::Arc;

use super::*;
use crate::context::{Context, StandardContext};
use crate::foundation::core::Domain;
use crate::result::store::{ResultId, ResultStore};
use crate::tree::model::NodeTree;

struct Blurred {
    results: ResultStore,
    out: ResultId,
}

fn blur(input: ResultView, size: f32) -> Blurred {
    let context = StandardContext::builder().threads(2).build().unwrap();
    let mut results = ResultStore::new(Arc::clone(context.buffer_pool()), context.precision());

    let mut tb = NodeTree::builder("t");
    let id = tb.add(Node::typed("blur", Arc::new(BlurNode)));
    let tree = tb.build().unwrap();
    let node = tree.node(id);

    let mut core = OperationCore::for_node(node, &mut results);
    let image = results.create(ResultType::Color);
    match input {
        ResultView::Uniform(v) => results.allocate_single(image, v),
        ResultView::Image(buf) => results.allocate_external(image, buf),
    }
    let size_id = results.create(ResultType::Float);
    results.allocate_single(size_id, Value::Float(size));
    core.map_input("Image", image);
    core.map_input("Size", size_id);
    let out = core.output("Image").unwrap();
    results.set_reference_count(out, 1);

    let mut op = BlurNode.operation(node, core);
    op.execute(&mut EvalCtx::new(&context, &mut results));
    Blurred { results, out }
}

fn impulse() -> Arc<PixelBuffer> {
    let mut buf = PixelBuffer::filled(Domain::new(5, 5), ResultType::Color, Value::Color([0.0; 4]));
    let center = 12 * 4;
    buf.data_mut()[center..center + 4].copy_from_slice(&[1.0; 4]);
    Arc::new(buf)
}

#[test]
fn uniform_input_passes_through() {
    let b = blur(ResultView::Uniform(Value::Color([0.3; 4])), 3.0);
    assert_eq!(b.results.get(b.out).single_value(), Some(Value::Color([0.3; 4])));
}

#[test]
fn zero_radius_aliases_input() {
    let src = impulse();
    let b = blur(ResultView::Image(Arc::clone(&src)), 0.0);
    assert!(Arc::ptr_eq(b.results.get(b.out).image().unwrap(), &src));
}

#[test]
fn blur_spreads_energy_symmetrically_and_preserves_sum() {
    let b = blur(ResultView::Image(impulse()), 1.0);
    let img = b.results.get(b.out).image().unwrap();

    let at = |x: u32, y: u32| img.sample_clamped(x, y).as_color()[0];
    assert!(at(2, 2) < 1.0);
    assert!(at(1, 2) > 0.0);
    assert!((at(1, 2) - at(3, 2)).abs() < 1e-6);
    assert!((at(2, 1) - at(2, 3)).abs() < 1e-6);
    assert!((at(1, 2) - at(2, 1)).abs() < 1e-6);
    assert_eq!(at(0, 0), 0.0);

    let sum: f32 = (0..25).map(|i| img.pixel(i).as_color()[0]).sum();
    assert!((sum - 1.0).abs() < 1e-5, "sum {sum}");
}

#[test]
fn weights_are_normalized() {
    let w = gaussian_weights(4, 2.0);
    assert_eq!(w.len(), 9);
    assert!((w.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    assert!(w[4] > w[3] && w[3] > w[0]);
}
