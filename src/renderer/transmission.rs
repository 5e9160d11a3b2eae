//! Transmission pre-pass targets.
//!
//! Transmissive materials sample a low-resolution capture of the opaque
//! scene as their refraction source. One target is allocated lazily per
//! camera id; a disposal hook reclaims the entry when a camera goes away,
//! so long sessions with transient cameras do not leak targets.

use rustc_hash::FxHashMap;

use crate::renderer::capabilities::Capabilities;
use crate::resources::render_target::RenderTarget;
use crate::resources::texture::{Filter, TextureType};
use crate::resources::version::IdAllocator;
use crate::resources::SharedRenderTarget;

use std::cell::RefCell;
use std::rc::Rc;

pub struct TransmissionPass {
    targets: FxHashMap<u64, SharedRenderTarget>,
}

impl Default for TransmissionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl TransmissionPass {
    #[must_use]
    pub fn new() -> Self {
        Self {
            targets: FxHashMap::default(),
        }
    }

    /// The transmission target for `camera_id`, sized `viewport × scale`,
    /// allocated on first use with mip generation and 4x MSAA. Half-float
    /// color is used when the device can render to it.
    pub fn target_for(
        &mut self,
        ids: &IdAllocator,
        camera_id: u64,
        viewport: (u32, u32),
        scale: f32,
        capabilities: &Capabilities,
    ) -> SharedRenderTarget {
        let width = ((viewport.0 as f32 * scale) as u32).max(1);
        let height = ((viewport.1 as f32 * scale) as u32).max(1);

        if let Some(target) = self.targets.get(&camera_id) {
            let needs_resize = {
                let t = target.borrow();
                t.width != width || t.height != height
            };
            if needs_resize {
                target.borrow_mut().set_size(width, height);
            }
            return Rc::clone(target);
        }

        let target = RenderTarget::new(ids, width, height).with_samples(4);
        {
            let mut texture = target.texture().borrow_mut();
            texture.generate_mipmaps = true;
            texture.min_filter = Filter::LinearMipmapLinear;
            if capabilities.color_buffer_half_float {
                texture.texel_type = TextureType::HalfFloat;
            }
        }
        let target = Rc::new(RefCell::new(target));
        self.targets.insert(camera_id, Rc::clone(&target));
        target
    }

    /// Disposal hook for a destroyed camera; returns the target so the
    /// caller can release its GPU objects.
    pub fn forget_camera(&mut self, camera_id: u64) -> Option<SharedRenderTarget> {
        self.targets.remove(&camera_id)
    }

    /// All live targets (renderer disposal).
    pub fn drain_targets(&mut self) -> Vec<SharedRenderTarget> {
        self.targets.drain().map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::recording::RecordingContext;
    use crate::gl::GlContext;

    fn caps() -> Capabilities {
        let ctx = RecordingContext::new();
        let _ = ctx.get_error();
        Capabilities::query(&ctx)
    }

    #[test]
    fn target_is_cached_per_camera_and_rescaled() {
        let ids = IdAllocator::new();
        let capabilities = caps();
        let mut pass = TransmissionPass::new();
        let a = pass.target_for(&ids, 1, (512, 256), 1.0, &capabilities);
        assert_eq!(a.borrow().width, 512);
        assert_eq!(a.borrow().samples, 4);

        let b = pass.target_for(&ids, 1, (512, 256), 0.5, &capabilities);
        assert_eq!(a.borrow().id(), b.borrow().id());
        assert_eq!(b.borrow().width, 256);
        assert_eq!(b.borrow().height, 128);

        let c = pass.target_for(&ids, 2, (512, 256), 0.5, &capabilities);
        assert_ne!(a.borrow().id(), c.borrow().id());
    }

    #[test]
    fn forget_camera_reclaims_the_entry() {
        let ids = IdAllocator::new();
        let capabilities = caps();
        let mut pass = TransmissionPass::new();
        pass.target_for(&ids, 7, (64, 64), 1.0, &capabilities);
        assert!(pass.forget_camera(7).is_some());
        assert!(pass.forget_camera(7).is_none());
    }
}
