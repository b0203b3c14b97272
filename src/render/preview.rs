use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::foundation::core::{Domain, InstanceKey};
use crate::foundation::math::unit_to_u8;
use crate::result::store::ResultView;

/// Longest side of a preview thumbnail.
pub const PREVIEW_SIZE: u32 = 128;

/// 8-bit RGBA thumbnail of a node output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGBA8 pixels.
    pub rgba8: Vec<u8>,
}

/// Preview sink shared by every instance of one evaluation, keyed by node occurrence.
pub type SharedPreviews = Arc<Mutex<HashMap<InstanceKey, Preview>>>;

/// Downscale `view` (nearest neighbor) and store it under `key`.
pub(crate) fn write_preview(previews: &SharedPreviews, key: InstanceKey, view: &ResultView) {
    let preview = make_preview(view);
    previews
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, preview);
}

pub(crate) fn make_preview(view: &ResultView) -> Preview {
    let src = view.domain().unwrap_or(Domain::new(1, 1));
    let size = fit(src);
    let mut rgba8 = Vec::with_capacity(size.pixel_count() * 4);
    for y in 0..size.height {
        let sy = scale(y, size.height, src.height);
        for x in 0..size.width {
            let sx = scale(x, size.width, src.width);
            let c = view.sample(sx, sy).as_color();
            rgba8.extend(c.iter().map(|v| unit_to_u8(*v)));
        }
    }
    Preview {
        width: size.width,
        height: size.height,
        rgba8,
    }
}

fn fit(src: Domain) -> Domain {
    let longest = src.width.max(src.height);
    if longest <= PREVIEW_SIZE {
        return src;
    }
    let w = (u64::from(src.width) * u64::from(PREVIEW_SIZE) / u64::from(longest)).max(1);
    let h = (u64::from(src.height) * u64::from(PREVIEW_SIZE) / u64::from(longest)).max(1);
    Domain::new(w as u32, h as u32)
}

fn scale(i: u32, dst: u32, src: u32) -> u32 {
    ((u64::from(i) * u64::from(src)) / u64::from(dst.max(1))) as u32
}

#[cfg(test)]
#[path = "../../tests/unit/render/preview.rs"]
mod tests;
