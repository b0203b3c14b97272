use super::*;
use crate::context::StandardContext;
use crate::foundation::core::{Domain, ResultType};
use crate::nodes::{ImageNode, InvertNode, NodeType, ValueNode, ViewerNode};
use crate::tree::model::Node;

fn tree() -> Arc<NodeTree> {
    let mut b = NodeTree::builder("root");
    b.interface_output("Image", ResultType::Color);
    b.interface_output("Value", ResultType::Float);
    let img: Arc<dyn NodeType> = Arc::new(ImageNode::solid(Domain::new(2, 2), [0.25, 0.5, 0.75, 1.0]));
    let img = b.add(Node::typed("img", img));
    let inv = b.add(Node::typed("inv", Arc::new(InvertNode)).with_preview());
    let v = b.add(Node::typed("v", Arc::new(ValueNode { value: 7.0 })));
    let viewer = b.add(Node::typed("viewer", Arc::new(ViewerNode)));
    let out = b.add_group_output("out", false);
    b.link(img, "Image", inv, "Color").unwrap();
    b.link(inv, "Color", out, "Image").unwrap();
    b.link(v, "Value", out, "Value").unwrap();
    b.link(inv, "Color", viewer, "Image").unwrap();
    Arc::new(b.build().unwrap())
}

#[test]
fn evaluates_all_outputs_and_returns_pool_to_idle() {
    let compositor = Compositor::new(StandardContext::builder().build().unwrap());
    let eval = compositor.evaluate(&tree(), &CompositorOpts::default()).unwrap();

    assert_eq!(eval.status, ExecutionStatus::Completed);
    assert_eq!(eval.outputs["Value"], EvaluatedOutput::Single(Value::Float(7.0)));
    match &eval.outputs["Image"] {
        EvaluatedOutput::Image(buf) => {
            assert_eq!(buf.pixel(3), Value::Color([0.75, 0.5, 0.25, 1.0]));
        }
        other => panic!("expected image, got {other:?}"),
    }
    let stats = compositor.context().buffer_pool().lock().unwrap().stats();
    assert_eq!(stats.live_buffers, 0);
    assert!(compositor.context().take_viewer().is_some());
}

#[test]
fn requested_subset_only() {
    let compositor = Compositor::new(StandardContext::builder().build().unwrap());
    let opts = CompositorOpts {
        outputs: Some(vec!["Value".to_owned()]),
        output_types: OutputTypes::GROUP_OUTPUT,
        ..CompositorOpts::default()
    };
    let eval = compositor.evaluate(&tree(), &opts).unwrap();
    assert_eq!(eval.outputs.len(), 1);
    assert!(compositor.context().take_viewer().is_none());
}

#[test]
fn unknown_output_is_a_validation_error() {
    let compositor = Compositor::new(StandardContext::builder().build().unwrap());
    let opts = CompositorOpts {
        outputs: Some(vec!["Nope".to_owned()]),
        ..CompositorOpts::default()
    };
    let err = compositor.evaluate(&tree(), &opts).unwrap_err();
    assert!(matches!(err, CompositorError::Validation(_)));
}

#[test]
fn previews_and_profiling_are_reported() {
    let compositor = Compositor::new(StandardContext::builder().profile(true).build().unwrap());
    let opts = CompositorOpts {
        previews: true,
        ..CompositorOpts::default()
    };
    let eval = compositor.evaluate(&tree(), &opts).unwrap();

    let preview = &eval.previews[&InstanceKey::ROOT.child("inv")];
    assert_eq!((preview.width, preview.height), (2, 2));
    assert!(eval.total_time.is_some());
    let stats = compositor.context().buffer_pool().lock().unwrap().stats();
    assert_eq!(stats.live_buffers, 0);
}
