use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::foundation::core::Domain;
use crate::foundation::error::{CompositorError, CompositorResult};
use crate::nodes::{
    BlurNode, CombineColorNode, GammaNode, ImageNode, InvertNode, MathNode, MathOp, MixBlend,
    MixRgbNode, NodeType, RgbNode, RgbToBwNode, SceneTimeNode, SeparateColorNode, ValueNode,
    ViewerNode,
};

/// Builds a node type from document parameters. `base_dir` resolves relative file paths.
pub type NodeFactory =
    fn(params: &serde_json::Value, base_dir: Option<&Path>) -> CompositorResult<Arc<dyn NodeType>>;

/// Maps document node kinds to node type factories.
#[derive(Clone, Debug, Default)]
pub struct NodeTypeRegistry {
    factories: BTreeMap<String, NodeFactory>,
}

impl NodeTypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("value", |p, _| {
            Ok(Arc::new(ValueNode {
                value: get_f32_or(p, "value", 0.0)?,
            }))
        });
        r.register("rgb", |p, _| {
            Ok(Arc::new(RgbNode {
                color: get_color_or(p, "color", [0.5, 0.5, 0.5, 1.0])?,
            }))
        });
        r.register("image", parse_image);
        r.register("scene_time", |_, _| Ok(Arc::new(SceneTimeNode)));
        r.register("math", |p, _| {
            let op = match p.get("op") {
                Some(v) => serde_json::from_value::<MathOp>(v.clone())
                    .map_err(|e| CompositorError::validation(format!("math.op: {e}")))?,
                None => MathOp::Add,
            };
            Ok(Arc::new(MathNode {
                op,
                clamp: get_bool_or(p, "clamp", false)?,
            }))
        });
        r.register("mix_rgb", |p, _| {
            let blend = match p.get("blend") {
                Some(v) => serde_json::from_value::<MixBlend>(v.clone())
                    .map_err(|e| CompositorError::validation(format!("mix_rgb.blend: {e}")))?,
                None => MixBlend::Mix,
            };
            Ok(Arc::new(MixRgbNode { blend }))
        });
        r.register("invert", |_, _| Ok(Arc::new(InvertNode)));
        r.register("gamma", |_, _| Ok(Arc::new(GammaNode)));
        r.register("rgb_to_bw", |_, _| Ok(Arc::new(RgbToBwNode)));
        r.register("separate_color", |_, _| Ok(Arc::new(SeparateColorNode)));
        r.register("combine_color", |_, _| Ok(Arc::new(CombineColorNode)));
        r.register("blur", |_, _| Ok(Arc::new(BlurNode)));
        r.register("viewer", |_, _| Ok(Arc::new(ViewerNode)));
        r
    }

    /// Register or replace the factory for `kind`.
    pub fn register(&mut self, kind: &str, factory: NodeFactory) {
        self.factories.insert(normalize_kind(kind), factory);
    }

    /// Whether `kind` is known.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&normalize_kind(kind))
    }

    /// Instantiate `kind` with `params`.
    pub fn create(
        &self,
        kind: &str,
        params: &serde_json::Value,
        base_dir: Option<&Path>,
    ) -> CompositorResult<Arc<dyn NodeType>> {
        let key = normalize_kind(kind);
        if key.is_empty() {
            return Err(CompositorError::validation("node kind must be non-empty"));
        }
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| CompositorError::validation(format!("unknown node kind '{kind}'")))?;
        factory(params, base_dir)
    }
}

fn normalize_kind(kind: &str) -> String {
    kind.trim().to_ascii_lowercase().replace('-', "_")
}

fn parse_image(
    p: &serde_json::Value,
    base_dir: Option<&Path>,
) -> CompositorResult<Arc<dyn NodeType>> {
    if let Some(path) = p.get("path") {
        let path = path
            .as_str()
            .ok_or_else(|| CompositorError::validation("image.path must be a string"))?;
        let path = match base_dir {
            Some(dir) => dir.join(path),
            None => Path::new(path).to_path_buf(),
        };
        return Ok(Arc::new(ImageNode::load(&path)?));
    }
    let width = get_u32(p, "width")?;
    let height = get_u32(p, "height")?;
    let fill = get_color_or(p, "fill", [0.0, 0.0, 0.0, 1.0])?;
    Ok(Arc::new(ImageNode::solid(Domain::new(width, height), fill)))
}

fn get_u32(obj: &serde_json::Value, key: &str) -> CompositorResult<u32> {
    let Some(v) = obj.get(key) else {
        return Err(CompositorError::validation(format!(
            "missing node param '{key}'"
        )));
    };
    let Some(n) = v.as_u64() else {
        return Err(CompositorError::validation(format!(
            "node param '{key}' must be an integer"
        )));
    };
    u32::try_from(n)
        .map_err(|_| CompositorError::validation(format!("node param '{key}' is out of range")))
}

fn get_f32_or(obj: &serde_json::Value, key: &str, default: f32) -> CompositorResult<f32> {
    let Some(v) = obj.get(key) else {
        return Ok(default);
    };
    let n = v.as_f64().ok_or_else(|| {
        CompositorError::validation(format!("node param '{key}' must be a number"))
    })? as f32;
    if !n.is_finite() {
        return Err(CompositorError::validation(format!(
            "node param '{key}' must be finite"
        )));
    }
    Ok(n)
}

fn get_bool_or(obj: &serde_json::Value, key: &str, default: bool) -> CompositorResult<bool> {
    match obj.get(key) {
        None => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| {
            CompositorError::validation(format!("node param '{key}' must be a boolean"))
        }),
    }
}

fn get_color_or(
    obj: &serde_json::Value,
    key: &str,
    default: [f32; 4],
) -> CompositorResult<[f32; 4]> {
    let Some(v) = obj.get(key) else {
        return Ok(default);
    };
    let items = v.as_array().ok_or_else(|| {
        CompositorError::validation(format!("node param '{key}' must be an array"))
    })?;
    if items.len() != 3 && items.len() != 4 {
        return Err(CompositorError::validation(format!(
            "node param '{key}' must have 3 or 4 components"
        )));
    }
    let mut out = [0.0, 0.0, 0.0, 1.0];
    for (o, item) in out.iter_mut().zip(items) {
        *o = item.as_f64().ok_or_else(|| {
            CompositorError::validation(format!("node param '{key}' must contain numbers"))
        })? as f32;
    }
    Ok(out)
}

#[cfg(test)]
#[path = "../../tests/unit/nodes/registry.rs"]
mod tests;
