//! Render pass and framebuffer. Grounded on the original source's
//! `rhiframebuffer.cpp`, whose `vkSubpassDependencies` array confirms the
//! two implicit external<->subpass dependencies this module's Vulkan
//! realization must emit - a dependency pair the teacher's
//! `create_vk_render_pass` omits entirely.

use crate::resource::{next_resource_id, Resource, ResourceId};
use crate::{LoadOp, SampleCount, StoreOp, Texture, TextureFormat};
use std::fmt::Debug;
use std::sync::Arc;

/// Color-attachment format list (<=7) + optional depth/stencil format +
/// sample count + one subpass. `numberOfColorAttachments <=
/// capabilities.max_simultaneous_render_targets <= 8`.
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<&'static str>,
    pub color_formats: Vec<TextureFormat>,
    pub color_load_ops: Vec<LoadOp>,
    pub color_store_ops: Vec<StoreOp>,
    pub depth_stencil_format: Option<TextureFormat>,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub sample_count: SampleCount,
}

pub trait RenderPassObj: Resource + Debug + Send + Sync {
    fn color_attachment_count(&self) -> usize;
    fn has_depth_stencil(&self) -> bool;
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Strong refs to attachment textures; width/height are the min across
/// every attachment's extent at the bound mip level (SPEC_FULL.md §3).
pub struct Framebuffer {
    id: ResourceId,
    pub render_pass: Arc<dyn RenderPassObj>,
    pub color_attachments: Vec<Arc<dyn Texture>>,
    pub depth_attachment: Option<Arc<dyn Texture>>,
    pub width: u32,
    pub height: u32,
}

impl Framebuffer {
    pub fn new(
        render_pass: Arc<dyn RenderPassObj>,
        color_attachments: Vec<Arc<dyn Texture>>,
        depth_attachment: Option<Arc<dyn Texture>>,
    ) -> Self {
        let mut width = u32::MAX;
        let mut height = u32::MAX;
        for t in color_attachments.iter().chain(depth_attachment.iter()) {
            let (w, h, _) = t.size();
            width = width.min(w);
            height = height.min(h);
        }
        if color_attachments.is_empty() && depth_attachment.is_none() {
            width = 0;
            height = 0;
        }
        Self {
            id: next_resource_id(),
            render_pass,
            color_attachments,
            depth_attachment,
            width,
            height,
        }
    }
}

impl Resource for Framebuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
}

impl Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color_attachments", &self.color_attachments.len())
            .field("has_depth", &self.depth_attachment.is_some())
            .finish()
    }
}

/// What `set_graphics_render_target` binds: `None` clears the target,
/// `Some` points at an owned, reusable framebuffer (render pass +
/// attachments). Holding `Arc<Framebuffer>` rather than re-deriving
/// attachments keeps a recorded-but-unsubmitted reference alive.
pub type RenderTarget = Arc<Framebuffer>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageLayout, TextureDimension};

    #[derive(Debug)]
    struct FakeRenderPass {
        id: ResourceId,
        color_count: usize,
        depth: bool,
    }

    impl Resource for FakeRenderPass {
        fn id(&self) -> ResourceId {
            self.id
        }
    }

    impl RenderPassObj for FakeRenderPass {
        fn color_attachment_count(&self) -> usize {
            self.color_count
        }
        fn has_depth_stencil(&self) -> bool {
            self.depth
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[derive(Debug)]
    struct FakeTexture {
        id: ResourceId,
        size: (u32, u32, u32),
    }

    impl Resource for FakeTexture {
        fn id(&self) -> ResourceId {
            self.id
        }
    }

    impl Texture for FakeTexture {
        fn format(&self) -> TextureFormat {
            TextureFormat::Rgba8Unorm
        }
        fn size(&self) -> (u32, u32, u32) {
            self.size
        }
        fn dimension(&self) -> TextureDimension {
            TextureDimension::D2
        }
        fn mip_level_count(&self) -> u32 {
            1
        }
        fn sample_count(&self) -> SampleCount {
            SampleCount::X1
        }
        fn current_layout(&self) -> ImageLayout {
            ImageLayout::Undefined
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn fake_texture(w: u32, h: u32) -> Arc<dyn Texture> {
        Arc::new(FakeTexture { id: next_resource_id(), size: (w, h, 1) })
    }

    fn fake_render_pass(color_count: usize, depth: bool) -> Arc<dyn RenderPassObj> {
        Arc::new(FakeRenderPass { id: next_resource_id(), color_count, depth })
    }

    #[test]
    fn framebuffer_size_is_min_across_attachments() {
        let fb = Framebuffer::new(fake_render_pass(2, false), vec![fake_texture(256, 128), fake_texture(128, 256)], None);
        assert_eq!((fb.width, fb.height), (128, 128));
    }

    #[test]
    fn framebuffer_size_accounts_for_depth_attachment() {
        let fb = Framebuffer::new(fake_render_pass(1, true), vec![fake_texture(256, 256)], Some(fake_texture(64, 256)));
        assert_eq!((fb.width, fb.height), (64, 256));
    }

    #[test]
    fn attachmentless_framebuffer_has_zero_size() {
        let fb = Framebuffer::new(fake_render_pass(0, false), vec![], None);
        assert_eq!((fb.width, fb.height), (0, 0));
    }
}
