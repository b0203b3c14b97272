use super::*;
use crate::context::StandardContext;
use crate::foundation::core::{Domain, ResultType};
use crate::nodes::{InvertNode, MathNode, MathOp, NodeType};
use crate::result::store::ResultStore;
use crate::tree::model::NodeTree;

fn setup(threads: Option<usize>) -> (StandardContext, ResultStore) {
    let mut b = StandardContext::builder();
    if let Some(n) = threads {
        b = b.threads(n);
    }
    let context = b.build().unwrap();
    let results = ResultStore::new(Arc::clone(context.buffer_pool()), context.precision());
    (context, results)
}

fn invert_procedure() -> PixelProcedure {
    let step = ProcedureStep {
        name: "inv".to_owned(),
        function: Arc::new(InvertNode),
        inputs: vec![
            (StepInput::Constant(Value::Float(1.0)), ResultType::Float),
            (StepInput::External(0), ResultType::Color),
        ],
        outputs: vec![ResultType::Color],
    };
    PixelProcedure::new(
        vec![ResultType::Color],
        vec![step],
        vec![ProcedureOutput {
            step: 0,
            output: 0,
            ty: ResultType::Color,
        }],
    )
}

fn gradient(w: u32, h: u32) -> Arc<PixelBuffer> {
    let data = (0..w * h)
        .flat_map(|i| {
            let v = i as f32 / (w * h) as f32;
            [v, v, v, 1.0]
        })
        .collect();
    Arc::new(PixelBuffer::from_data(Domain::new(w, h), ResultType::Color, data).unwrap())
}

#[test]
fn per_pixel_over_first_image_domain() {
    let (context, mut results) = setup(Some(3));
    let src = gradient(7, 5);
    let out = results.create(ResultType::Color);
    let mut cx = EvalCtx::new(&context, &mut results);
    run_procedure(
        &mut cx,
        &invert_procedure(),
        &[ResultView::Image(Arc::clone(&src))],
        &[(0, out)],
        false,
    );

    let img = results.get(out).image().unwrap();
    assert_eq!(img.domain(), Domain::new(7, 5));
    for i in 0..35 {
        let s = src.pixel(i).as_color()[0];
        assert!((img.pixel(i).as_color()[0] - (1.0 - s)).abs() < 1e-6);
    }
}

#[test]
fn single_value_mode_evaluates_once() {
    let (context, mut results) = setup(None);
    let out = results.create(ResultType::Color);
    let mut cx = EvalCtx::new(&context, &mut results);
    run_procedure(
        &mut cx,
        &invert_procedure(),
        &[ResultView::Uniform(Value::Color([0.25, 0.25, 0.25, 1.0]))],
        &[(0, out)],
        true,
    );
    assert_eq!(
        results.get(out).single_value(),
        Some(Value::Color([0.75, 0.75, 0.75, 1.0]))
    );
}

#[test]
fn standalone_pixel_node_reads_inputs_by_slot() {
    let (context, mut results) = setup(None);
    let mut tb = NodeTree::builder("t");
    let ty: Arc<dyn NodeType> = Arc::new(MathNode::new(MathOp::Subtract));
    let id = tb.add(Node::typed("m", Arc::clone(&ty)));
    let tree = tb.build().unwrap();
    let node = tree.node(id);

    let mut core = OperationCore::for_node(node, &mut results);
    let a = results.create(ResultType::Float);
    let b = results.create(ResultType::Float);
    results.allocate_single(a, Value::Float(5.0));
    let buf = PixelBuffer::filled(Domain::new(2, 2), ResultType::Float, Value::Float(2.0));
    results.allocate_external(b, Arc::new(buf));
    core.map_input("Value", a);
    core.map_input("Value_001", b);
    let out = core.output("Value").unwrap();
    results.set_reference_count(out, 1);

    let mut op = ty.operation(node, core);
    op.execute(&mut EvalCtx::new(&context, &mut results));
    let img = results.get(out).image().unwrap();
    assert_eq!(img.pixel(3), Value::Float(3.0));
}
