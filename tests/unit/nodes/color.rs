use super::*;

fn eval(f: &dyn PixelFunction, inputs: &[Value], outputs: usize) -> Vec<Value> {
    let mut out = vec![Value::Float(0.0); outputs];
    f.evaluate(inputs, &mut out);
    out
}

fn close(a: [f32; 4], b: [f32; 4]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
}

#[test]
fn mix_interpolates_rgb_and_keeps_first_alpha() {
    let node = MixRgbNode {
        blend: MixBlend::Mix,
    };
    let out = eval(
        &node,
        &[
            Value::Float(0.25),
            Value::Color([0.0, 0.0, 0.0, 0.5]),
            Value::Color([1.0, 1.0, 1.0, 1.0]),
        ],
        1,
    );
    assert!(close(out[0].as_color(), [0.25, 0.25, 0.25, 0.5]));
}

#[test]
fn blend_modes() {
    let a = Value::Color([0.5, 0.5, 0.5, 1.0]);
    let b = Value::Color([0.25, 0.25, 0.25, 1.0]);
    let at_full = |blend| {
        eval(&MixRgbNode { blend }, &[Value::Float(1.0), a, b], 1)[0].as_color()[0]
    };
    assert_eq!(at_full(MixBlend::Add), 0.75);
    assert_eq!(at_full(MixBlend::Multiply), 0.125);
    assert_eq!(at_full(MixBlend::Subtract), 0.25);
    assert_eq!(at_full(MixBlend::Difference), 0.25);
    assert_eq!(at_full(MixBlend::Screen), 0.625);
}

#[test]
fn factor_is_clamped() {
    let node = MixRgbNode {
        blend: MixBlend::Mix,
    };
    let out = eval(
        &node,
        &[Value::Float(3.0), Value::Color([0.0; 4]), Value::Color([1.0; 4])],
        1,
    );
    assert!(close(out[0].as_color(), [1.0, 1.0, 1.0, 0.0]));
}

#[test]
fn invert_by_factor() {
    let out = eval(
        &InvertNode,
        &[Value::Float(0.5), Value::Color([1.0, 0.0, 0.5, 0.3])],
        1,
    );
    assert!(close(out[0].as_color(), [0.5, 0.5, 0.5, 0.3]));
}

#[test]
fn gamma_skips_non_positive_channels() {
    let out = eval(
        &GammaNode,
        &[Value::Color([0.5, -1.0, 0.0, 0.5]), Value::Float(2.0)],
        1,
    );
    assert!(close(out[0].as_color(), [0.25, -1.0, 0.0, 0.5]));
}

#[test]
fn separate_then_combine_restores_color() {
    let c = [0.1, 0.2, 0.3, 0.4];
    let channels = eval(&SeparateColorNode, &[Value::Color(c)], 4);
    let back = eval(&CombineColorNode, &channels, 1);
    assert_eq!(back[0], Value::Color(c));
}

#[test]
fn rgb_to_bw_uses_luminance() {
    let out = eval(&RgbToBwNode, &[Value::Color([1.0, 1.0, 1.0, 1.0])], 1);
    assert!((out[0].as_float() - 1.0).abs() < 1e-6);
}

#[test]
fn combine_alpha_defaults_to_opaque() {
    let decl = CombineColorNode.declare();
    assert_eq!(decl.inputs[3].default, Value::Float(1.0));
    assert_eq!(decl.inputs[0].default, Value::Float(0.0));
}
