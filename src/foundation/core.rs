use crate::foundation::math::Fnv1a64;

/// Logical value kind carried by sockets and results.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// One channel.
    Float,
    /// Three channels (x, y, z).
    Vector,
    /// Four channels (r, g, b, a).
    Color,
}

impl ResultType {
    /// Number of `f32` channels stored per pixel.
    pub fn channels(self) -> usize {
        match self {
            Self::Float => 1,
            Self::Vector => 3,
            Self::Color => 4,
        }
    }

    /// Stable lowercase name used in kernel sources and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Vector => "vec3",
            Self::Color => "vec4",
        }
    }
}

/// Numeric precision requested for allocated buffers and compiled kernels.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 16-bit storage.
    Half,
    /// 32-bit storage.
    #[default]
    Full,
}

/// A uniform value: either a socket default or a single-value result.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Scalar.
    Float(f32),
    /// 3D vector.
    Vector([f32; 3]),
    /// RGBA color, straight alpha.
    Color([f32; 4]),
}

impl Value {
    /// The zero value of `ty`; also what invalid results read as.
    pub fn zero(ty: ResultType) -> Self {
        match ty {
            ResultType::Float => Self::Float(0.0),
            ResultType::Vector => Self::Vector([0.0; 3]),
            ResultType::Color => Self::Color([0.0; 4]),
        }
    }

    /// Kind of this value.
    pub fn ty(&self) -> ResultType {
        match self {
            Self::Float(_) => ResultType::Float,
            Self::Vector(_) => ResultType::Vector,
            Self::Color(_) => ResultType::Color,
        }
    }

    /// Implicit socket conversion applied when a link joins sockets of different kinds.
    pub fn convert(self, to: ResultType) -> Self {
        match (self, to) {
            (Self::Float(f), ResultType::Float) => Self::Float(f),
            (Self::Float(f), ResultType::Vector) => Self::Vector([f, f, f]),
            (Self::Float(f), ResultType::Color) => Self::Color([f, f, f, 1.0]),
            (Self::Vector(v), ResultType::Float) => Self::Float((v[0] + v[1] + v[2]) / 3.0),
            (Self::Vector(v), ResultType::Vector) => Self::Vector(v),
            (Self::Vector(v), ResultType::Color) => Self::Color([v[0], v[1], v[2], 1.0]),
            (Self::Color(c), ResultType::Float) => Self::Float(luminance(c)),
            (Self::Color(c), ResultType::Vector) => Self::Vector([c[0], c[1], c[2]]),
            (Self::Color(c), ResultType::Color) => Self::Color(c),
        }
    }

    /// Scalar view, converting if needed.
    pub fn as_float(self) -> f32 {
        match self.convert(ResultType::Float) {
            Self::Float(f) => f,
            _ => 0.0,
        }
    }

    /// Vector view, converting if needed.
    pub fn as_vector(self) -> [f32; 3] {
        match self.convert(ResultType::Vector) {
            Self::Vector(v) => v,
            _ => [0.0; 3],
        }
    }

    /// Color view, converting if needed.
    pub fn as_color(self) -> [f32; 4] {
        match self.convert(ResultType::Color) {
            Self::Color(c) => c,
            _ => [0.0; 4],
        }
    }

    /// Write channels into `out`, which must hold exactly `self.ty().channels()` floats.
    pub fn write_channels(&self, out: &mut [f32]) {
        match self {
            Self::Float(f) => out[0] = *f,
            Self::Vector(v) => out.copy_from_slice(v),
            Self::Color(c) => out.copy_from_slice(c),
        }
    }

    /// Read a value of kind `ty` from a channel slice.
    pub fn from_channels(ty: ResultType, px: &[f32]) -> Self {
        match ty {
            ResultType::Float => Self::Float(px[0]),
            ResultType::Vector => Self::Vector([px[0], px[1], px[2]]),
            ResultType::Color => Self::Color([px[0], px[1], px[2], px[3]]),
        }
    }
}

/// Rec. 709 luminance of a color.
pub fn luminance(c: [f32; 4]) -> f32 {
    0.2126 * c[0] + 0.7152 * c[1] + 0.0722 * c[2]
}

/// Pixel extent of an image result.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct Domain {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Domain {
    /// Construct a domain.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered.
    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }
}

/// Hierarchical identifier of one node occurrence within the nested group hierarchy.
///
/// Keys are only used to address previews and profiling data, never for correctness.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct InstanceKey(pub u64);

impl InstanceKey {
    /// Key of the root tree instance.
    pub const ROOT: Self = Self(5381);

    /// Derive the key of `node_name` inside the tree instance addressed by `self`.
    pub fn child(self, node_name: &str) -> Self {
        let mut h = Fnv1a64::new(self.0);
        h.write_bytes(node_name.as_bytes());
        Self(h.finish())
    }
}

impl Default for InstanceKey {
    fn default() -> Self {
        Self::ROOT
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
