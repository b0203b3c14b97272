use super::*;
use crate::nodes::{MathNode, MathOp, ValueNode};

fn value(v: f32) -> Arc<dyn NodeType> {
    Arc::new(ValueNode { value: v })
}

fn add() -> Arc<dyn NodeType> {
    Arc::new(MathNode::new(MathOp::Add))
}

#[test]
fn typed_node_takes_sockets_from_declaration() {
    let n = Node::typed("m", add());
    assert_eq!(n.input_index("Value_001"), Some(1));
    assert_eq!(n.output_index("Value"), Some(0));
    assert_eq!(n.inputs[0].default, Value::Float(0.5));
    assert!(!n.is_group());
}

#[test]
fn link_by_identifier_and_lookup_both_ways() {
    let mut b = NodeTree::builder("t");
    let v = b.add(Node::typed("v", value(1.0)));
    let m = b.add(Node::typed("m", add()));
    b.link(v, "Value", m, "Value_001").unwrap();
    let t = b.build().unwrap();

    let out = OutputRef { node: v, socket: 0 };
    let inp = InputRef { node: m, socket: 1 };
    assert_eq!(t.linked_output(inp), Some(out));
    assert_eq!(t.linked_inputs(out).collect::<Vec<_>>(), vec![inp]);
    assert_eq!(t.linked_output(InputRef { node: m, socket: 0 }), None);
}

#[test]
fn link_to_unknown_socket_is_rejected() {
    let mut b = NodeTree::builder("t");
    let v = b.add(Node::typed("v", value(1.0)));
    let m = b.add(Node::typed("m", add()));
    let err = b.link(v, "Nope", m, "Value").unwrap_err();
    assert!(err.to_string().contains("no output 'Nope'"));
}

#[test]
fn muted_links_and_unavailable_sockets_are_ignored() {
    let mut b = NodeTree::builder("t");
    let v = b.add(Node::typed("v", value(1.0)));
    let m = b.add(Node::typed("m", add()));
    b.link(v, "Value", m, "Value").unwrap();
    b.mute_last_link();
    b.link(v, "Value", m, "Value_001").unwrap();
    b.node_mut(m).unwrap().inputs[1].available = false;
    let t = b.build().unwrap();

    let out = OutputRef { node: v, socket: 0 };
    assert_eq!(t.linked_inputs(out).count(), 0);
    assert_eq!(t.linked_output(InputRef { node: m, socket: 0 }), None);
    assert!(!t.is_input_available(InputRef { node: m, socket: 1 }));
}

#[test]
fn duplicate_names_are_rejected() {
    let mut b = NodeTree::builder("t");
    b.add(Node::typed("v", value(1.0)));
    b.add(Node::typed("v", value(2.0)));
    assert!(b.build().unwrap_err().to_string().contains("duplicate node name"));
}

#[test]
fn second_link_into_one_input_is_rejected() {
    let mut b = NodeTree::builder("t");
    let a = b.add(Node::typed("a", value(1.0)));
    let c = b.add(Node::typed("c", value(2.0)));
    let m = b.add(Node::typed("m", add()));
    b.link(a, "Value", m, "Value").unwrap();
    b.link(c, "Value", m, "Value").unwrap();
    assert!(b.build().unwrap_err().to_string().contains("more than one link"));
}

#[test]
fn cycles_are_rejected() {
    let mut b = NodeTree::builder("t");
    let x = b.add(Node::typed("x", add()));
    let y = b.add(Node::typed("y", add()));
    b.link(x, "Value", y, "Value").unwrap();
    b.link(y, "Value", x, "Value").unwrap();
    assert!(b.build().unwrap_err().to_string().contains("cycle"));
}

#[test]
fn diamond_is_not_a_cycle() {
    let mut b = NodeTree::builder("t");
    let v = b.add(Node::typed("v", value(1.0)));
    let l = b.add(Node::typed("l", add()));
    let r = b.add(Node::typed("r", add()));
    let j = b.add(Node::typed("j", add()));
    b.link(v, "Value", l, "Value").unwrap();
    b.link(v, "Value", r, "Value").unwrap();
    b.link(l, "Value", j, "Value").unwrap();
    b.link(r, "Value", j, "Value_001").unwrap();
    assert!(b.build().is_ok());
}

#[test]
fn group_interface_nodes_mirror_declared_sockets() {
    let mut b = NodeTree::builder("g");
    b.interface_input("In", ResultType::Color, Value::Float(1.0));
    b.interface_output("Out", ResultType::Float);
    let gi = b.add_group_input("in");
    let go = b.add_group_output("out", false);
    b.link(gi, "In", go, "Out").unwrap();
    let g = Arc::new(b.build().unwrap());

    assert_eq!(g.interface_inputs()[0].default, Value::Color([1.0, 1.0, 1.0, 1.0]));
    assert_eq!(g.node(gi).outputs[0].ty, ResultType::Color);
    assert_eq!(g.node(go).inputs[0].ty, ResultType::Float);

    let node = Node::group("G", Arc::clone(&g));
    assert!(node.is_group());
    assert_eq!(node.input_index("In"), Some(0));
    assert_eq!(node.output_index("Out"), Some(0));
}

#[test]
fn active_group_output_wins_over_first() {
    let mut b = NodeTree::builder("t");
    b.interface_output("Out", ResultType::Float);
    b.add_group_output("first", false);
    let active = b.add_group_output("second", true);
    let t = b.build().unwrap();
    assert_eq!(t.group_output_node(), Some(active));

    let mut b = NodeTree::builder("t");
    b.interface_output("Out", ResultType::Float);
    let first = b.add_group_output("first", false);
    b.add_group_output("second", false);
    assert_eq!(b.build().unwrap().group_output_node(), Some(first));
}
