//! GPU buffer ownership for vertex and index attributes.
//!
//! One GL buffer per `BufferAttribute`, keyed by the attribute's id. The
//! first upload freezes the byte length; later versions dispatch either a
//! full `bufferSubData` or, when the attribute carries update ranges, one
//! sub-upload per coalesced range.

use rustc_hash::FxHashMap;

use crate::gl::{BufferHandle, GlContext};
use crate::resources::buffer::BufferAttribute;

/// Uploaded state of one attribute.
#[derive(Debug, Clone, Copy)]
pub struct GpuBuffer {
    pub handle: BufferHandle,
    pub gl_type: u32,
    pub bytes_per_element: usize,
    pub byte_len: usize,
    version: u64,
}

#[derive(Default)]
pub struct AttributeManager {
    buffers: FxHashMap<u64, GpuBuffer>,
}

impl AttributeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, attribute_id: u64) -> Option<&GpuBuffer> {
        self.buffers.get(&attribute_id)
    }

    /// Number of live GPU buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Creates or refreshes the GPU buffer backing `attribute`.
    pub fn update(
        &mut self,
        context: &impl GlContext,
        attribute: &mut BufferAttribute,
        target: u32,
    ) -> GpuBuffer {
        let id = attribute.id();

        if let Some(existing) = self.buffers.get(&id).copied() {
            if existing.version == attribute.version() {
                return existing;
            }

            if !attribute.update_ranges.is_empty() {
                attribute.merge_update_ranges();
            }
            let data = attribute.data.as_bytes();
            // byte length is frozen after the first upload
            debug_assert_eq!(existing.byte_len, data.len(), "attribute storage was resized");

            context.bind_buffer(target, Some(existing.handle));
            if attribute.update_ranges.is_empty() {
                context.buffer_sub_data(target, 0, data);
            } else {
                let stride = existing.bytes_per_element;
                for range in &attribute.update_ranges {
                    let begin = range.start * stride;
                    let end = begin + range.count * stride;
                    context.buffer_sub_data(target, begin, &data[begin..end]);
                }
                attribute.update_ranges.clear();
            }

            let updated = GpuBuffer {
                version: attribute.version(),
                ..existing
            };
            self.buffers.insert(id, updated);
            return updated;
        }

        let data = attribute.data.as_bytes();

        let handle = context.create_buffer();
        context.bind_buffer(target, Some(handle));
        context.buffer_data(target, data, attribute.usage.to_gl());
        attribute.update_ranges.clear();

        let buffer = GpuBuffer {
            handle,
            gl_type: attribute.data.gl_type(),
            bytes_per_element: attribute.data.bytes_per_element(),
            byte_len: data.len(),
            version: attribute.version(),
        };
        self.buffers.insert(id, buffer);
        buffer
    }

    /// Releases the GPU buffer for `attribute_id`, if any.
    pub fn dispose(&mut self, context: &impl GlContext, attribute_id: u64) {
        if let Some(buffer) = self.buffers.remove(&attribute_id) {
            context.delete_buffer(buffer.handle);
        }
    }

    /// Releases every GPU buffer (context loss / renderer disposal).
    pub fn dispose_all(&mut self, context: &impl GlContext) {
        for buffer in self.buffers.values() {
            context.delete_buffer(buffer.handle);
        }
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::consts as gl;
    use crate::gl::recording::RecordingContext;
    use crate::resources::version::IdAllocator;

    #[test]
    fn second_update_without_changes_is_free() {
        let ctx = RecordingContext::new();
        let ids = IdAllocator::new();
        let mut manager = AttributeManager::new();
        let mut attr = BufferAttribute::from_f32(&ids, vec![0.0; 12], 3);

        manager.update(&ctx, &mut attr, gl::ARRAY_BUFFER);
        ctx.take_calls();
        manager.update(&ctx, &mut attr, gl::ARRAY_BUFFER);
        assert!(ctx.calls().is_empty());
    }

    #[test]
    fn ranged_update_uploads_merged_ranges_only() {
        let ctx = RecordingContext::new();
        let ids = IdAllocator::new();
        let mut manager = AttributeManager::new();
        let mut attr = BufferAttribute::from_f32(&ids, vec![0.0; 100], 1);
        manager.update(&ctx, &mut attr, gl::ARRAY_BUFFER);
        ctx.take_calls();

        attr.add_update_range(4, 4);
        attr.add_update_range(0, 4);
        attr.add_update_range(50, 10);
        manager.update(&ctx, &mut attr, gl::ARRAY_BUFFER);

        let uploads = ctx.calls_matching("bufferSubData");
        assert_eq!(uploads.len(), 2);
        assert!(uploads[0].contains("0, len=32"));
        assert!(uploads[1].contains("200, len=40"));
    }
}
