use std::sync::atomic::{AtomicBool, Ordering};

use super::*;
use crate::compile::fusion::PixelLimits;
use crate::context::{Context, StandardContext};
use crate::foundation::core::Domain;
use crate::nodes::{
    BlurNode, GammaNode, ImageNode, InvertNode, MathNode, MathOp, MixBlend, MixRgbNode,
    NodeDeclaration, NodeType, ValueNode,
};
use crate::tree::model::{InputSocket, Node, OutputSocket};

struct Run {
    op: NodeGroupOperation,
    results: ResultStore,
    status: ExecutionStatus,
}

fn run(tree: &Arc<NodeTree>, context: &StandardContext) -> Run {
    let mut results = ResultStore::new(Arc::clone(context.buffer_pool()), context.precision());
    let mut op = NodeGroupOperation::new(
        &mut results,
        Arc::clone(tree),
        OutputTypes::ALL,
        None,
        InstanceKey::ROOT,
        InstanceKey::ROOT,
    );
    for b in op.core().outputs() {
        results.set_reference_count(b.result, 1);
    }
    let status = {
        let mut cx = EvalCtx::new(context, &mut results);
        op.execute(&mut cx)
    };
    Run {
        op,
        results,
        status,
    }
}

impl Run {
    fn pixel(&self, output: &str, i: usize) -> Value {
        let id = self.op.output(output).unwrap();
        match self.results.view(id) {
            crate::result::store::ResultView::Image(buf) => buf.pixel(i),
            crate::result::store::ResultView::Uniform(v) => v,
        }
    }

    fn free_outputs(&mut self) {
        for b in self.op.core().outputs() {
            self.results.free(b.result);
        }
    }
}

fn live(context: &StandardContext) -> u64 {
    context.buffer_pool().lock().unwrap().stats().live_buffers
}

fn image(color: [f32; 4]) -> Arc<dyn NodeType> {
    Arc::new(ImageNode::solid(Domain::new(4, 4), color))
}

/// img -> invert -> gamma -> mix.Image ; img -> mix.Image_001 ; mix -> out.Image
fn fusable() -> Arc<NodeTree> {
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    let img = b.add(Node::typed("img", image([0.2, 0.4, 0.6, 1.0])));
    let inv = b.add(Node::typed("inv", Arc::new(InvertNode)));
    let gam = b.add(Node::typed("gamma", Arc::new(GammaNode)));
    let mix = b.add(Node::typed(
        "mix",
        Arc::new(MixRgbNode {
            blend: MixBlend::Add,
        }),
    ));
    let out = b.add_group_output("out", false);
    b.link(img, "Image", inv, "Color").unwrap();
    b.link(inv, "Color", gam, "Image").unwrap();
    b.link(gam, "Image", mix, "Image").unwrap();
    b.link(img, "Image", mix, "Image_001").unwrap();
    b.link(mix, "Image", out, "Image").unwrap();
    Arc::new(b.build().unwrap())
}

#[test]
fn adjacent_pixel_nodes_fuse_into_one_operation() {
    let context = StandardContext::builder().build().unwrap();
    let tree = fusable();
    let mut r = run(&tree, &context);

    assert_eq!(r.status, ExecutionStatus::Completed);
    let inv = r.op.operation_index("inv").unwrap();
    assert_eq!(r.op.operation_index("gamma"), Some(inv));
    assert_eq!(r.op.operation_index("mix"), Some(inv));
    assert_ne!(r.op.operation_index("img"), Some(inv));

    // invert: 0.8, 0.6, 0.4 ; add with fac 0.5: a + 0.5 * b
    let c = r.pixel("Image", 5).as_color();
    for (got, want) in c.iter().zip([0.9, 0.8, 0.7, 1.0]) {
        assert!((got - want).abs() < 1e-5, "{c:?}");
    }

    r.free_outputs();
    assert_eq!(live(&context), 0);
}

#[test]
fn disabled_fusion_gives_same_pixels_with_one_operation_per_node() {
    let tree = fusable();
    let fused_cx = StandardContext::builder().build().unwrap();
    let plain_cx = StandardContext::builder().disable_fusion().build().unwrap();
    let mut fused = run(&tree, &fused_cx);
    let mut plain = run(&tree, &plain_cx);

    assert_ne!(plain.op.operation_index("inv"), plain.op.operation_index("mix"));
    for i in 0..16 {
        assert_eq!(fused.pixel("Image", i), plain.pixel("Image", i));
    }
    fused.free_outputs();
    plain.free_outputs();
    assert_eq!(live(&fused_cx), 0);
    assert_eq!(live(&plain_cx), 0);
}

#[test]
fn oversized_unit_is_split() {
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    let a = b.add(Node::typed("a", image([1.0, 0.0, 0.0, 1.0])));
    let c = b.add(Node::typed("c", image([0.0, 0.0, 1.0, 1.0])));
    let inv = b.add(Node::typed("inv", Arc::new(InvertNode)));
    let mix = b.add(Node::typed(
        "mix",
        Arc::new(MixRgbNode {
            blend: MixBlend::Mix,
        }),
    ));
    let out = b.add_group_output("out", false);
    b.link(a, "Image", inv, "Color").unwrap();
    b.link(c, "Image", mix, "Image").unwrap();
    b.link(inv, "Color", mix, "Image_001").unwrap();
    b.link(mix, "Image", out, "Image").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let wide = StandardContext::builder().build().unwrap();
    let narrow = StandardContext::builder()
        .pixel_limits(PixelLimits {
            max_inputs: 1,
            max_outputs: 8,
        })
        .build()
        .unwrap();
    let mut joined = run(&tree, &wide);
    let mut split = run(&tree, &narrow);

    assert_eq!(joined.op.operation_index("inv"), joined.op.operation_index("mix"));
    assert_ne!(split.op.operation_index("inv"), split.op.operation_index("mix"));
    assert_eq!(joined.pixel("Image", 0), split.pixel("Image", 0));

    joined.free_outputs();
    split.free_outputs();
    assert_eq!(live(&wide), 0);
    assert_eq!(live(&narrow), 0);
}

#[test]
fn pooled_producer_read_twice_by_one_unit_is_released() {
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    let img = b.add(Node::typed("img", image([0.2, 0.4, 0.6, 1.0])));
    let blur = b.add(Node::typed("blur", Arc::new(BlurNode)));
    b.node_mut(blur).unwrap().inputs[1].default = Value::Float(1.0);
    let mix = b.add(Node::typed(
        "mix",
        Arc::new(MixRgbNode {
            blend: MixBlend::Mix,
        }),
    ));
    let out = b.add_group_output("out", false);
    b.link(img, "Image", blur, "Image").unwrap();
    b.link(blur, "Image", mix, "Image").unwrap();
    b.link(blur, "Image", mix, "Image_001").unwrap();
    b.link(mix, "Image", out, "Image").unwrap();
    let tree = Arc::new(b.build().unwrap());

    for context in [
        StandardContext::builder().build().unwrap(),
        StandardContext::builder().disable_fusion().build().unwrap(),
    ] {
        let mut r = run(&tree, &context);
        assert_eq!(r.status, ExecutionStatus::Completed);
        let c = r.pixel("Image", 5).as_color();
        for (got, want) in c.iter().zip([0.2, 0.4, 0.6, 1.0]) {
            assert!((got - want).abs() < 1e-5, "{c:?}");
        }
        // Only the group output is still held; the blurred intermediate went back to the pool.
        assert_eq!(live(&context), 1);

        r.free_outputs();
        assert_eq!(live(&context), 0);
    }
}

#[test]
fn single_value_chain_stays_single_value() {
    let mut b = NodeTree::builder("root");
    b.interface_output("Value", ResultType::Float);
    let v = b.add(Node::typed("v", Arc::new(ValueNode { value: 2.0 })));
    let m = b.add(Node::typed("m", Arc::new(MathNode::new(MathOp::Power))));
    let out = b.add_group_output("out", false);
    b.link(v, "Value", m, "Value").unwrap();
    b.link(v, "Value", m, "Value_001").unwrap();
    b.link(m, "Value", out, "Value").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let context = StandardContext::builder().build().unwrap();
    let r = run(&tree, &context);
    let id = r.op.output("Value").unwrap();
    assert_eq!(r.results.get(id).single_value(), Some(Value::Float(4.0)));
    assert_eq!(live(&context), 0);
}

#[test]
fn group_output_aliases_pass_through_without_copy() {
    let mut g = NodeTree::builder("pass");
    g.interface_input("In", ResultType::Color, Value::Color([0.0; 4]));
    g.interface_output("Out", ResultType::Color);
    let gi = g.add_group_input("in");
    let go = g.add_group_output("out", false);
    g.link(gi, "In", go, "Out").unwrap();
    let inner = Arc::new(g.build().unwrap());

    let source = ImageNode::solid(Domain::new(3, 3), [0.5, 0.5, 0.5, 1.0]);
    let pixels = Arc::clone(source.image());
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    let img = b.add(Node::typed("img", Arc::new(source)));
    let grp = b.add(Node::group("G", inner));
    let out = b.add_group_output("out", false);
    b.link(img, "Image", grp, "In").unwrap();
    b.link(grp, "Out", out, "Image").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let context = StandardContext::builder().build().unwrap();
    let mut r = run(&tree, &context);
    let id = r.op.output("Image").unwrap();
    assert!(Arc::ptr_eq(r.results.get(id).image().unwrap(), &pixels));
    r.free_outputs();
    assert_eq!(r.results.live_results(), 0);
}

#[test]
fn unlinked_group_input_reads_interface_default() {
    let mut g = NodeTree::builder("pass");
    g.interface_input("In", ResultType::Float, Value::Float(0.75));
    g.interface_output("Out", ResultType::Float);
    let gi = g.add_group_input("in");
    let go = g.add_group_output("out", false);
    g.link(gi, "In", go, "Out").unwrap();
    let inner = Arc::new(g.build().unwrap());

    let mut b = NodeTree::builder("root");
    b.interface_output("Value", ResultType::Float);
    let grp = b.add(Node::group("G", inner));
    let out = b.add_group_output("out", false);
    b.link(grp, "Out", out, "Value").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let context = StandardContext::builder().build().unwrap();
    let r = run(&tree, &context);
    assert_eq!(r.pixel("Value", 0), Value::Float(0.75));
}

#[test]
fn missing_group_tree_yields_invalid_outputs() {
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    let grp = b.add(Node::missing_group(
        "lib",
        Vec::new(),
        vec![OutputSocket::new("Image", ResultType::Color)],
    ));
    let out = b.add_group_output("out", false);
    b.link(grp, "Image", out, "Image").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let context = StandardContext::builder().build().unwrap();
    let r = run(&tree, &context);
    assert_eq!(r.status, ExecutionStatus::Completed);
    assert!(r.results.get(r.op.output("Image").unwrap()).is_invalid());
}

struct Broken;

impl NodeType for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: Vec::new(),
            outputs: vec![OutputSocket::new("Value", ResultType::Float)],
        }
    }

    fn poll(&self, _tree: &NodeTree) -> bool {
        false
    }
}

#[test]
fn node_failing_poll_yields_invalid_outputs() {
    let mut b = NodeTree::builder("root");
    b.interface_output("Value", ResultType::Float);
    let n = b.add(Node::typed("broken", Arc::new(Broken)));
    let out = b.add_group_output("out", false);
    b.link(n, "Value", out, "Value").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let context = StandardContext::builder().build().unwrap();
    let r = run(&tree, &context);
    assert!(r.results.get(r.op.output("Value").unwrap()).is_invalid());
}

struct CancelOnRun(Arc<AtomicBool>);

impl NodeType for CancelOnRun {
    fn name(&self) -> &str {
        "cancel_on_run"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration {
            inputs: vec![InputSocket::new("Image", ResultType::Color, Value::Color([0.0; 4]))],
            outputs: vec![OutputSocket::new("Image", ResultType::Color)],
        }
    }

    fn operation(&self, _node: &Node, core: OperationCore) -> Box<dyn Operation> {
        Box::new(CancelOperation {
            core,
            flag: Arc::clone(&self.0),
        })
    }
}

struct CancelOperation {
    core: OperationCore,
    flag: Arc<AtomicBool>,
}

impl Operation for CancelOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        &mut self.core
    }

    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        self.flag.store(true, Ordering::Relaxed);
        if let (Some(input), Some(out)) = (self.core.input("Image"), self.core.output("Image")) {
            cx.results.share_data(out, input);
        }
    }
}

#[test]
fn cancellation_stops_and_frees_intermediates() {
    let context = StandardContext::builder().build().unwrap();
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    let img = b.add(Node::typed("img", image([1.0; 4])));
    let inv = b.add(Node::typed("inv", Arc::new(InvertNode)));
    let stop = b.add(Node::typed(
        "stop",
        Arc::new(CancelOnRun(context.cancel_handle())),
    ));
    let gam = b.add(Node::typed("gamma", Arc::new(GammaNode)));
    let out = b.add_group_output("out", false);
    b.link(img, "Image", inv, "Color").unwrap();
    b.link(inv, "Color", stop, "Image").unwrap();
    b.link(stop, "Image", gam, "Image").unwrap();
    b.link(gam, "Image", out, "Image").unwrap();
    let tree = Arc::new(b.build().unwrap());

    let mut r = run(&tree, &context);
    assert_eq!(r.status, ExecutionStatus::Canceled);
    assert!(r.op.operation_index("gamma").is_none());
    assert!(r.results.get(r.op.output("Image").unwrap()).is_invalid());
    r.free_outputs();
    assert_eq!(live(&context), 0);
    assert_eq!(r.results.live_results(), 0);
}
