//! Vertex and index data.
//!
//! A [`BufferAttribute`] owns a typed array plus the layout the shader sees
//! (`item_size`, normalization). Once uploaded, the byte length is frozen;
//! growing an attribute means creating a new one. Incremental edits are
//! described by [`UpdateRange`]s which are coalesced before dispatch so the
//! GPU sees at most one `bufferSubData` per disjoint region.

use crate::gl::consts as gl;
use crate::resources::version::{ChangeTracker, IdAllocator};

/// Buffer upload frequency hint, mapped 1:1 to the GL usage enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
    Stream,
}

impl BufferUsage {
    #[must_use]
    pub fn to_gl(self) -> u32 {
        match self {
            Self::Static => gl::STATIC_DRAW,
            Self::Dynamic => gl::DYNAMIC_DRAW,
            Self::Stream => gl::STREAM_DRAW,
        }
    }
}

/// A dirty region in element units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRange {
    pub start: usize,
    pub count: usize,
}

/// Typed backing storage for one attribute.
#[derive(Debug, Clone)]
pub enum AttributeData {
    F32(Vec<f32>),
    U32(Vec<u32>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U8(Vec<u8>),
    I8(Vec<i8>),
}

impl AttributeData {
    /// Number of scalar elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I8(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bytes_per_element(&self) -> usize {
        match self {
            Self::F32(_) | Self::U32(_) => 4,
            Self::U16(_) | Self::I16(_) => 2,
            Self::U8(_) | Self::I8(_) => 1,
        }
    }

    /// GL component type enum for this storage.
    #[must_use]
    pub fn gl_type(&self) -> u32 {
        match self {
            Self::F32(_) => gl::FLOAT,
            Self::U32(_) => gl::UNSIGNED_INT,
            Self::U16(_) => gl::UNSIGNED_SHORT,
            Self::I16(_) => gl::SHORT,
            Self::U8(_) => gl::UNSIGNED_BYTE,
            Self::I8(_) => gl::BYTE,
        }
    }

    /// Raw byte view for upload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::F32(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::I16(v) => bytemuck::cast_slice(v),
            Self::U8(v) => v,
            Self::I8(v) => bytemuck::cast_slice(v),
        }
    }

    /// Scalar at `index` widened to `f32` (for bounding volumes).
    #[must_use]
    pub fn get_f32(&self, index: usize) -> f32 {
        match self {
            Self::F32(v) => v[index],
            Self::U32(v) => v[index] as f32,
            Self::U16(v) => f32::from(v[index]),
            Self::I16(v) => f32::from(v[index]),
            Self::U8(v) => f32::from(v[index]),
            Self::I8(v) => f32::from(v[index]),
        }
    }

    /// Scalar at `index` as an index value. Panics for float storage.
    #[must_use]
    pub fn get_index(&self, index: usize) -> u32 {
        match self {
            Self::U32(v) => v[index],
            Self::U16(v) => u32::from(v[index]),
            Self::U8(v) => u32::from(v[index]),
            _ => panic!("index buffers must use unsigned integer storage"),
        }
    }
}

/// A typed array plus its vertex layout, version-tracked for lazy upload.
#[derive(Debug, Clone)]
pub struct BufferAttribute {
    id: u64,
    pub data: AttributeData,
    pub item_size: usize,
    pub normalized: bool,
    pub usage: BufferUsage,
    pub update_ranges: Vec<UpdateRange>,
    tracker: ChangeTracker,
}

impl BufferAttribute {
    #[must_use]
    pub fn new(ids: &IdAllocator, data: AttributeData, item_size: usize) -> Self {
        let mut tracker = ChangeTracker::new();
        tracker.changed();
        Self {
            id: ids.allocate(),
            data,
            item_size,
            normalized: false,
            usage: BufferUsage::Static,
            update_ranges: Vec::new(),
            tracker,
        }
    }

    #[must_use]
    pub fn from_f32(ids: &IdAllocator, data: Vec<f32>, item_size: usize) -> Self {
        Self::new(ids, AttributeData::F32(data), item_size)
    }

    #[must_use]
    pub fn from_u16(ids: &IdAllocator, data: Vec<u16>, item_size: usize) -> Self {
        Self::new(ids, AttributeData::U16(data), item_size)
    }

    #[must_use]
    pub fn from_u32(ids: &IdAllocator, data: Vec<u32>, item_size: usize) -> Self {
        Self::new(ids, AttributeData::U32(data), item_size)
    }

    #[must_use]
    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    /// Number of items (vertex count for a vertex attribute).
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / self.item_size
    }

    /// Marks the whole array dirty.
    pub fn needs_update(&mut self) {
        self.tracker.changed();
    }

    /// Marks a region dirty, in element units.
    pub fn add_update_range(&mut self, start: usize, count: usize) {
        self.update_ranges.push(UpdateRange { start, count });
        self.tracker.changed();
    }

    /// Coalesces pending update ranges in place. See [`merge_update_ranges`].
    pub fn merge_update_ranges(&mut self) {
        merge_update_ranges(&mut self.update_ranges);
    }
}

/// Sorts ranges by start and coalesces every adjacent or overlapping pair.
///
/// The result is canonical: applying the merge a second time is a no-op, and
/// no two residual ranges touch. Unlike the row-aware texel merge in the
/// texture manager this operates on a flat element space.
pub fn merge_update_ranges(ranges: &mut Vec<UpdateRange>) {
    if ranges.len() < 2 {
        return;
    }
    ranges.sort_by_key(|r| r.start);

    let mut merged: Vec<UpdateRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(prev) if range.start <= prev.start + prev.count => {
                let end = (range.start + range.count).max(prev.start + prev.count);
                prev.count = end - prev.start;
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_coalesces_overlapping_and_adjacent() {
        let mut ranges = vec![
            UpdateRange { start: 10, count: 5 },
            UpdateRange { start: 0, count: 4 },
            UpdateRange { start: 4, count: 2 },
            UpdateRange { start: 12, count: 10 },
        ];
        merge_update_ranges(&mut ranges);
        assert_eq!(
            ranges,
            vec![
                UpdateRange { start: 0, count: 6 },
                UpdateRange { start: 10, count: 12 },
            ]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let mut ranges = vec![
            UpdateRange { start: 3, count: 3 },
            UpdateRange { start: 0, count: 2 },
            UpdateRange { start: 8, count: 1 },
        ];
        merge_update_ranges(&mut ranges);
        let once = ranges.clone();
        merge_update_ranges(&mut ranges);
        assert_eq!(ranges, once);
        // no two residual ranges overlap or touch
        for pair in ranges.windows(2) {
            assert!(pair[0].start + pair[0].count < pair[1].start);
        }
    }

    #[test]
    fn version_advances_on_edits() {
        let ids = IdAllocator::new();
        let mut attr = BufferAttribute::from_f32(&ids, vec![0.0; 9], 3);
        let v0 = attr.version();
        attr.add_update_range(0, 3);
        assert!(attr.version() > v0);
        assert_eq!(attr.count(), 3);
    }
}
