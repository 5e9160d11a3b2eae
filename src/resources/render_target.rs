//! Off-screen render targets.

use crate::resources::texture::{Filter, Texture, TextureDimension, TextureSource};
use crate::resources::version::IdAllocator;
use crate::resources::SharedTexture;

use std::cell::RefCell;
use std::rc::Rc;

/// Integer rectangle (viewport / scissor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    #[must_use]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// Attachment dimensionality of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTargetKind {
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
}

/// One to eight color attachments plus optional depth storage.
///
/// The framebuffer and any renderbuffers are created lazily on first bind
/// and reclaimed on disposal. With `samples > 0` the target renders into
/// multisample renderbuffers and resolves into the attachment textures.
#[derive(Debug)]
pub struct RenderTarget {
    id: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub kind: RenderTargetKind,
    pub textures: Vec<SharedTexture>,
    /// Depth attachment texture; when absent a depth renderbuffer is used.
    /// `DepthStencil` format selects the combined attachment point.
    pub depth_texture: Option<SharedTexture>,
    pub samples: u32,
    pub depth_buffer: bool,
    pub stencil_buffer: bool,
    pub resolve_depth_buffer: bool,
    pub resolve_stencil_buffer: bool,
    pub viewport: Rect,
    pub scissor: Rect,
}

impl RenderTarget {
    #[must_use]
    pub fn new(ids: &IdAllocator, width: u32, height: u32) -> Self {
        let texture = Texture::render_target_texture(ids, width, height);
        Self {
            id: ids.allocate(),
            width,
            height,
            depth: 1,
            kind: RenderTargetKind::D2,
            textures: vec![Rc::new(RefCell::new(texture))],
            depth_texture: None,
            samples: 0,
            depth_buffer: true,
            stencil_buffer: false,
            resolve_depth_buffer: true,
            resolve_stencil_buffer: true,
            viewport: Rect::new(0, 0, width as i32, height as i32),
            scissor: Rect::new(0, 0, width as i32, height as i32),
        }
    }

    /// Target with `count` color attachments sharing one size.
    #[must_use]
    pub fn with_color_attachments(ids: &IdAllocator, width: u32, height: u32, count: usize) -> Self {
        assert!((1..=8).contains(&count));
        let mut target = Self::new(ids, width, height);
        target.textures = (0..count)
            .map(|_| Rc::new(RefCell::new(Texture::render_target_texture(ids, width, height))))
            .collect();
        target
    }

    /// Cube render target (six faces per attachment).
    #[must_use]
    pub fn new_cube(ids: &IdAllocator, size: u32) -> Self {
        let mut target = Self::new(ids, size, size);
        target.kind = RenderTargetKind::Cube;
        let mut texture = Texture::render_target_texture(ids, size, size);
        texture.dimension = TextureDimension::Cube;
        texture.source = TextureSource::Uninitialized {
            width: size,
            height: size,
            depth: 6,
        };
        target.textures = vec![Rc::new(RefCell::new(texture))];
        target
    }

    #[must_use]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// First color attachment.
    #[must_use]
    pub fn texture(&self) -> &SharedTexture {
        &self.textures[0]
    }

    /// Whether mipmaps should be regenerated after rendering into this
    /// target: requested on the attachment and meaningful for its filter.
    #[must_use]
    pub fn wants_mipmaps(&self) -> bool {
        let tex = self.textures[0].borrow();
        tex.generate_mipmaps && tex.min_filter.uses_mipmaps()
    }

    /// Checks the attached-depth-texture dimension invariant.
    #[must_use]
    pub fn validate(&self) -> bool {
        if let Some(depth) = &self.depth_texture {
            let depth = depth.borrow();
            if depth.source.width() != self.width || depth.source.height() != self.height {
                return false;
            }
            if !depth.is_depth() {
                return false;
            }
        }
        true
    }

    /// Resizes the target and all attachments, dropping GPU storage on next
    /// use. Viewport and scissor reset to the full size.
    pub fn set_size(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        for texture in &self.textures {
            let mut tex = texture.borrow_mut();
            let depth = tex.source.depth();
            tex.source = TextureSource::Uninitialized {
                width,
                height,
                depth,
            };
            tex.needs_update();
        }
        if let Some(depth_texture) = &self.depth_texture {
            let mut tex = depth_texture.borrow_mut();
            tex.source = TextureSource::Uninitialized {
                width,
                height,
                depth: 1,
            };
            tex.needs_update();
        }
        self.viewport = Rect::new(0, 0, width as i32, height as i32);
        self.scissor = Rect::new(0, 0, width as i32, height as i32);
    }

    /// Filter used when deciding if a resolve blit may use LINEAR.
    #[must_use]
    pub fn filter(&self) -> Filter {
        self.textures[0].borrow().mag_filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_texture_dimensions_must_match() {
        let ids = IdAllocator::new();
        let mut target = RenderTarget::new(&ids, 64, 64);
        target.depth_texture = Some(Rc::new(RefCell::new(Texture::depth_texture(
            &ids, 64, 64, false,
        ))));
        assert!(target.validate());
        target.depth_texture = Some(Rc::new(RefCell::new(Texture::depth_texture(
            &ids, 32, 64, false,
        ))));
        assert!(!target.validate());
    }

    #[test]
    fn resize_invalidates_attachments() {
        let ids = IdAllocator::new();
        let mut target = RenderTarget::new(&ids, 16, 16);
        let v0 = target.texture().borrow().version();
        target.set_size(32, 32);
        assert!(target.texture().borrow().version() > v0);
        assert_eq!(target.viewport, Rect::new(0, 0, 32, 32));
    }
}
