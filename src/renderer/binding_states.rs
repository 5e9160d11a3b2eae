//! Vertex-array bindings per (geometry, program) pair.
//!
//! Draw setup collapses to a single `bindVertexArray` once a pair has been
//! seen: the created VAO records every attribute pointer and the index
//! binding. Wireframe draws get their own VAO keyed separately, pointing at
//! a derived line-pair index that is cached per geometry.

use rustc_hash::FxHashMap;

use crate::gl::consts as gl;
use crate::gl::{GlContext, VertexArrayHandle};
use crate::renderer::attributes::{AttributeManager, GpuBuffer};
use crate::renderer::programs::GlProgram;
use crate::resources::buffer::{AttributeData, BufferAttribute};
use crate::resources::geometry::Geometry;
use crate::resources::version::IdAllocator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BindingKey {
    geometry_id: u64,
    program_id: u64,
    wireframe: bool,
}

struct BindingState {
    vao: VertexArrayHandle,
    /// Attribute id per bound name, to detect re-created attribute objects.
    bound: FxHashMap<String, u64>,
    index_id: Option<u64>,
}

/// Index buffer view returned from setup, ready for `drawElements`.
#[derive(Debug, Clone, Copy)]
pub struct IndexBinding {
    pub buffer: GpuBuffer,
    pub count: usize,
}

#[derive(Default)]
pub struct BindingStates {
    states: FxHashMap<BindingKey, BindingState>,
    /// Derived wireframe index per geometry: (source index version, attribute).
    wireframe_indices: FxHashMap<u64, (u64, BufferAttribute)>,
    current: Option<VertexArrayHandle>,
}

impl BindingStates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a VAO for `(geometry, program, wireframe)` is bound and all
    /// attribute data is current. Returns the index binding for indexed draws.
    pub fn setup(
        &mut self,
        context: &impl GlContext,
        ids: &IdAllocator,
        attributes: &mut AttributeManager,
        geometry: &mut Geometry,
        program: &GlProgram,
        wireframe: bool,
    ) -> Option<IndexBinding> {
        let key = BindingKey {
            geometry_id: geometry.id(),
            program_id: program.id,
            wireframe,
        };

        // refresh attribute storage regardless of VAO reuse
        for attribute in geometry.attributes.values_mut() {
            attributes.update(context, attribute, gl::ARRAY_BUFFER);
        }

        let needs_setup = !self.states.contains_key(&key);
        if needs_setup {
            let vao = context.create_vertex_array();
            context.bind_vertex_array(Some(vao));
            self.current = Some(vao);

            let mut bound = FxHashMap::default();
            for (name, location) in &program.attributes {
                let Some(attribute) = geometry.attributes.get(name) else {
                    continue;
                };
                let Some(buffer) = attributes.get(attribute.id()).copied() else {
                    continue;
                };
                Self::bind_pointer(context, name, *location, attribute, buffer);
                bound.insert(name.clone(), attribute.id());
            }

            self.states.insert(
                key,
                BindingState {
                    vao,
                    bound,
                    index_id: None,
                },
            );
        } else {
            let state = self.states.get_mut(&key).unwrap();
            if self.current != Some(state.vao) {
                context.bind_vertex_array(Some(state.vao));
                self.current = Some(state.vao);
            }
            // re-point attributes whose backing object was replaced
            for (name, location) in &program.attributes {
                let Some(attribute) = geometry.attributes.get(name) else {
                    continue;
                };
                if state.bound.get(name) == Some(&attribute.id()) {
                    continue;
                }
                if let Some(buffer) = attributes.get(attribute.id()).copied() {
                    Self::bind_pointer(context, name, *location, attribute, buffer);
                    state.bound.insert(name.clone(), attribute.id());
                }
            }
        }

        // index selection: wireframe expansion replaces the triangle index
        if wireframe {
            let (buffer, count, index_id) = {
                let index = self.wireframe_index(ids, geometry);
                let buffer = attributes.update(context, index, gl::ELEMENT_ARRAY_BUFFER);
                (buffer, index.count(), index.id())
            };
            let state = self.states.get_mut(&key).unwrap();
            if state.index_id != Some(index_id) {
                context.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, Some(buffer.handle));
                state.index_id = Some(index_id);
            }
            return Some(IndexBinding { buffer, count });
        }

        if let Some(index) = geometry.index.as_mut() {
            let buffer = attributes.update(context, index, gl::ELEMENT_ARRAY_BUFFER);
            let count = index.count();
            let state = self.states.get_mut(&key).unwrap();
            if state.index_id != Some(index.id()) {
                context.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, Some(buffer.handle));
                state.index_id = Some(index.id());
            }
            return Some(IndexBinding { buffer, count });
        }
        None
    }

    fn bind_pointer(
        context: &impl GlContext,
        name: &str,
        location: u32,
        attribute: &BufferAttribute,
        buffer: GpuBuffer,
    ) {
        context.bind_buffer(gl::ARRAY_BUFFER, Some(buffer.handle));
        let instanced = name.starts_with("instance");

        if attribute.item_size == 16 {
            // mat4 attribute occupies four consecutive vec4 locations
            let stride = 16 * buffer.bytes_per_element as i32;
            for column in 0..4u32 {
                let loc = location + column;
                context.enable_vertex_attrib(loc);
                context.vertex_attrib_pointer(
                    loc,
                    4,
                    buffer.gl_type,
                    attribute.normalized,
                    stride,
                    (column as usize) * 4 * buffer.bytes_per_element,
                );
                context.vertex_attrib_divisor(loc, 1);
            }
            return;
        }

        context.enable_vertex_attrib(location);
        let integer = matches!(
            attribute.data,
            AttributeData::U32(_) | AttributeData::I16(_) | AttributeData::I8(_)
        ) && !attribute.normalized;
        if integer {
            context.vertex_attrib_i_pointer(location, attribute.item_size as i32, buffer.gl_type, 0, 0);
        } else {
            context.vertex_attrib_pointer(
                location,
                attribute.item_size as i32,
                buffer.gl_type,
                attribute.normalized,
                0,
                0,
            );
        }
        if instanced {
            context.vertex_attrib_divisor(location, 1);
        }
    }

    /// Triangle index expanded into line pairs, cached until the source
    /// index changes.
    fn wireframe_index(
        &mut self,
        ids: &IdAllocator,
        geometry: &mut Geometry,
    ) -> &mut BufferAttribute {
        let geometry_id = geometry.id();
        let source_version = geometry.index.as_ref().map_or(0, BufferAttribute::version);

        let stale = self
            .wireframe_indices
            .get(&geometry_id)
            .map_or(true, |(version, _)| *version != source_version);
        if stale {
            let derived = Self::derive_wireframe_index(ids, geometry);
            self.wireframe_indices
                .insert(geometry_id, (source_version, derived));
        }
        &mut self.wireframe_indices.get_mut(&geometry_id).unwrap().1
    }

    fn derive_wireframe_index(ids: &IdAllocator, geometry: &Geometry) -> BufferAttribute {
        let mut lines: Vec<u32> = Vec::new();
        match &geometry.index {
            Some(index) => {
                let count = index.count();
                for tri in 0..count / 3 {
                    let a = index.data.get_index(tri * 3);
                    let b = index.data.get_index(tri * 3 + 1);
                    let c = index.data.get_index(tri * 3 + 2);
                    lines.extend_from_slice(&[a, b, b, c, c, a]);
                }
            }
            None => {
                let count = geometry.vertex_count() as u32;
                for tri in 0..count / 3 {
                    let a = tri * 3;
                    lines.extend_from_slice(&[a, a + 1, a + 1, a + 2, a + 2, a]);
                }
            }
        }
        BufferAttribute::from_u32(ids, lines, 1)
    }

    /// Unbinds the current VAO (end of frame; external GL interop).
    pub fn reset(&mut self, context: &impl GlContext) {
        if self.current.take().is_some() {
            context.bind_vertex_array(None);
        }
    }

    /// Deletes every VAO touching `geometry_id` and the derived wireframe
    /// index, releasing its GPU buffer through `attributes`.
    pub fn dispose_geometry(
        &mut self,
        context: &impl GlContext,
        attributes: &mut AttributeManager,
        geometry_id: u64,
    ) {
        self.states.retain(|key, state| {
            if key.geometry_id == geometry_id {
                context.delete_vertex_array(state.vao);
                false
            } else {
                true
            }
        });
        if let Some((_, index)) = self.wireframe_indices.remove(&geometry_id) {
            attributes.dispose(context, index.id());
        }
    }

    /// Deletes every VAO referencing `program_id`.
    pub fn dispose_program(&mut self, context: &impl GlContext, program_id: u64) {
        self.states.retain(|key, state| {
            if key.program_id == program_id {
                context.delete_vertex_array(state.vao);
                false
            } else {
                true
            }
        });
    }

    pub fn dispose_all(&mut self, context: &impl GlContext) {
        for state in self.states.values() {
            context.delete_vertex_array(state.vao);
        }
        self.states.clear();
        self.wireframe_indices.clear();
        self.current = None;
    }
}
