use super::*;
use crate::compile::schedule::{DepthFirstScheduler, OutputTypes, ScheduleRequest, Scheduler};
use crate::foundation::core::InstanceKey;
use crate::nodes::{InvertNode, MathNode, MathOp, NodeType, ValueNode};
use crate::tree::model::Node;

fn full_schedule(tree: &NodeTree) -> Schedule {
    let needed = tree
        .interface_outputs()
        .iter()
        .map(|s| s.identifier.clone())
        .collect();
    DepthFirstScheduler.schedule(
        tree,
        &ScheduleRequest {
            output_types: OutputTypes::GROUP_OUTPUT,
            needed_outputs: &needed,
            instance_key: InstanceKey::ROOT,
            active_instance_key: InstanceKey::ROOT,
        },
    )
}

fn math(op: MathOp) -> Arc<dyn NodeType> {
    Arc::new(MathNode::new(op))
}

/// v -> m1.Value, v -> m1.Value_001 ; m1 -> m2.Value ; m1 -> out.A ; m2 -> out.B
fn chain() -> (NodeTree, [NodeId; 3]) {
    let mut b = NodeTree::builder("t");
    b.interface_output("A", ResultType::Float);
    b.interface_output("B", ResultType::Float);
    let v = b.add(Node::typed("v", Arc::new(ValueNode { value: 3.0 })));
    let m1 = b.add(Node::typed("m1", math(MathOp::Multiply)));
    let m2 = b.add(Node::typed("m2", math(MathOp::Add)));
    let out = b.add_group_output("out", false);
    b.link(v, "Value", m1, "Value").unwrap();
    b.link(v, "Value", m1, "Value_001").unwrap();
    b.link(m1, "Value", m2, "Value").unwrap();
    b.link(m1, "Value", out, "A").unwrap();
    b.link(m2, "Value", out, "B").unwrap();
    (b.build().unwrap(), [v, m1, m2])
}

#[test]
fn lowering_dedups_external_inputs_and_counts_occurrences() {
    let (t, [v, m1, m2]) = chain();
    let s = full_schedule(&t);
    let lowered = lower_unit(&t, &[m1, m2], &s, &|_| false);

    assert_eq!(lowered.inputs.len(), 1);
    assert_eq!(lowered.inputs[0].source, OutputRef { node: v, socket: 0 });
    assert_eq!(lowered.inputs[0].occurrences, 2);
    assert_eq!(lowered.inputs[0].identifier, "input0");

    let steps = lowered.procedure.steps();
    assert_eq!(steps[1].inputs[0].0, StepInput::Internal { step: 0, output: 0 });
    assert_eq!(steps[1].inputs[1].0, StepInput::Constant(Value::Float(0.5)));
}

#[test]
fn outputs_exported_only_for_outside_consumers() {
    let (t, [_, m1, m2]) = chain();
    let s = full_schedule(&t);
    let lowered = lower_unit(&t, &[m1, m2], &s, &|_| false);

    let sources: Vec<_> = lowered.outputs.iter().map(|o| o.source.node).collect();
    assert_eq!(sources, [m1, m2]);
    assert!(lowered.outputs.iter().all(|o| o.consumers == 1));
}

#[test]
fn preview_exports_an_otherwise_internal_output() {
    let mut b = NodeTree::builder("t");
    b.interface_output("Out", ResultType::Float);
    let a = b.add(Node::typed("a", math(MathOp::Add)).with_preview());
    let c = b.add(Node::typed("c", math(MathOp::Add)));
    let out = b.add_group_output("out", false);
    b.link(a, "Value", c, "Value").unwrap();
    b.link(c, "Value", out, "Out").unwrap();
    let t = b.build().unwrap();
    let s = full_schedule(&t);

    assert_eq!(lower_unit(&t, &[a, c], &s, &|_| false).outputs.len(), 1);
    let lowered = lower_unit(&t, &[a, c], &s, &|_| true);
    assert_eq!(lowered.outputs.len(), 2);
    assert!(lowered.outputs[0].preview);
    assert_eq!(lowered.outputs[0].consumers, 0);
}

#[test]
fn procedure_evaluates_chain() {
    let (t, [_, m1, m2]) = chain();
    let s = full_schedule(&t);
    let p = lower_unit(&t, &[m1, m2], &s, &|_| false).procedure;

    let mut scratch = ProcedureScratch::new(&p);
    let mut out = [Value::Float(0.0); 2];
    p.evaluate(&[Value::Float(3.0)], &mut scratch, &mut out);
    assert_eq!(out, [Value::Float(9.0), Value::Float(9.5)]);
}

#[test]
fn kernel_identity_ignores_node_names() {
    let build = |names: [&str; 2]| {
        let mut b = NodeTree::builder("t");
        b.interface_output("Out", ResultType::Color);
        let x = b.add(Node::typed(names[0], Arc::new(InvertNode)));
        let y = b.add(Node::typed(names[1], Arc::new(InvertNode)));
        let out = b.add_group_output("out", false);
        b.link(x, "Color", y, "Color").unwrap();
        b.link(y, "Color", out, "Out").unwrap();
        let t = b.build().unwrap();
        let s = full_schedule(&t);
        lower_unit(&t, &[x, y], &s, &|_| false).procedure
    };
    let p = build(["a", "b"]);
    let q = build(["c", "d"]);
    assert_eq!(p.kernel_key(Precision::Full), q.kernel_key(Precision::Full));
    assert_ne!(p.kernel_key(Precision::Full), p.kernel_key(Precision::Half));
}

#[test]
fn different_functions_get_different_kernels() {
    let (t, [_, m1, m2]) = chain();
    let s = full_schedule(&t);
    let a = lower_unit(&t, &[m1], &s, &|_| false).procedure;
    let b = lower_unit(&t, &[m2], &s, &|_| false).procedure;
    assert_ne!(a.kernel_key(Precision::Full), b.kernel_key(Precision::Full));
    assert!(a.source(Precision::Full).contains("math_multiply"));
}

#[test]
fn predicates() {
    let (t, [_, m1, m2]) = chain();
    let c = FusionCandidate {
        tree: &t,
        unit: &[m1],
        node: m2,
        unit_is_single_value: true,
        node_is_single_value: false,
    };
    assert!(!SingleValueCompatible.can_join(&c));
    assert!(SingleValueCompatible.can_join(&FusionCandidate {
        node_is_single_value: true,
        ..c
    }));
    assert!(!NeverJoin.can_join(&FusionCandidate {
        node_is_single_value: true,
        ..c
    }));
}
