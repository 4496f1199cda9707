//! Mesh entity batch renderer
//!
//! Orchestrates one frame of 3D mesh rendering:
//!
//! ```text
//! start_scene ──> submit_object_for_rendering (xN) ──> end_scene ──> do_tasks
//!                        │                               │
//!                        ▼                               ├─ shadow cascades
//!                 BatchCollector                         ├─ per-shader globals
//!          (groups ─> batches ─> instances,              ├─ mesh uploads
//!           flat transparent list)                       ├─ shadow passes (opaque only)
//!                                                        ├─ main pass
//!                                                        └─ transparent pass x2
//! ```
//!
//! Opaque geometry is drawn by walking pipeline groups, then mesh batches,
//! then instances, so shaders are bound once per group and mesh buffers once
//! per batch. Transparent geometry is sorted back to front and drawn twice:
//! a depth-only prepass and then a blended color pass, which keeps faces of
//! one transparent mesh from blending over each other.

use std::collections::HashSet;
use std::sync::Arc;

use super::backend::{GraphicsBackend, ShaderHandle, UniformValue};
use super::batch_collector::{BatchCollector, MeshSubmission};
use super::camera::Camera;
use super::error::{RenderError, RenderResult};
use super::gl_queue::{GlTaskQueue, GlTaskSender};
use super::instance::{ObjectFlags, RenderInstanceObjectData, Renderable};
use super::light::LightModel;
use super::mesh::{EntityModel, Mesh, MeshId, MetaState};
use super::render_object_pool::{PoolStats, RenderObjectPool};
use super::shader::{uniforms, ShaderLibrary, ShaderVariant, DIFFUSE_TEXTURE_SLOT};
use super::shadow::ShadowCascades;
use crate::config::{RendererConfig, MAX_SHADOW_CASCADES};
use crate::foundation::math::{Color, Mat4};

/// Whether the renderer is collecting objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    /// Between frames
    Idle,
    /// Between `start_scene` and `end_scene`
    InScene,
}

/// Counters for one rendered frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Pipeline state groups (distinct opaque shaders)
    pub pipeline_groups: usize,
    /// Mesh batches (distinct opaque (mesh, shader) pairs)
    pub mesh_batches: usize,
    /// Opaque mesh instances submitted
    pub opaque_instances: usize,
    /// Transparent mesh instances submitted
    pub transparent_instances: usize,
    /// Meshes streamed to the GPU
    pub mesh_uploads: usize,
    /// Draw calls into the main framebuffer
    pub draw_calls: usize,
    /// Draw calls into shadow cascades
    pub shadow_draw_calls: usize,
    /// Opaque instances skipped by camera frustum culling
    pub culled_instances: usize,
}

/// Which target an opaque walk renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpaquePass {
    Main,
    Shadow(usize),
}

/// Batched renderer for mesh entities
pub struct MeshEntityBatchRenderer {
    config: RendererConfig,
    shaders: ShaderLibrary,
    collector: BatchCollector,
    pool: RenderObjectPool,
    cascades: ShadowCascades,
    gl_tasks: GlTaskQueue,

    state: SceneState,
    camera: Camera,
    light: LightModel,
    closest_object_dist: f32,
    furthest_object_dist: f32,

    skipped_meshes: HashSet<MeshId>,
    reported_missing_shaders: HashSet<String>,
    shadow_sampler_names: Vec<String>,
    global_shaders: Vec<ShaderHandle>,
    frame_count: u64,
}

impl MeshEntityBatchRenderer {
    /// Create a renderer
    ///
    /// The shader library must contain the configured default shader.
    pub fn new(config: RendererConfig, shaders: ShaderLibrary) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
        if shaders.get(&config.default_shader).is_none() {
            return Err(RenderError::InitializationFailed(format!(
                "default shader '{}' is not registered",
                config.default_shader
            )));
        }

        let shadow_sampler_names = (0..config.shadow_cascade_count)
            .map(|i| format!("{}C{}", uniforms::SHADOW_MAP_TEXTURE, i + 1))
            .collect();

        log::info!(
            "Mesh batch renderer created ({} shadow cascades, {} programs)",
            config.shadow_cascade_count,
            shaders.len()
        );

        Ok(Self {
            collector: BatchCollector::new(config.initial_instance_capacity),
            pool: RenderObjectPool::new(&config),
            cascades: ShadowCascades::new(&config),
            gl_tasks: GlTaskQueue::new(),
            state: SceneState::Idle,
            camera: Camera::default(),
            light: LightModel::default(),
            closest_object_dist: f32::MAX,
            furthest_object_dist: 0.0,
            skipped_meshes: HashSet::new(),
            reported_missing_shaders: HashSet::new(),
            shadow_sampler_names,
            global_shaders: Vec::new(),
            frame_count: 0,
            config,
            shaders,
        })
    }

    /// Renderer configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Registered shader programs
    pub fn shaders(&self) -> &ShaderLibrary {
        &self.shaders
    }

    /// Registered shader programs, for hot-registering new ones
    pub fn shaders_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.shaders
    }

    /// Producer handle for work that must run on the frame thread
    pub fn gl_tasks(&self) -> GlTaskSender {
        self.gl_tasks.sender()
    }

    /// Current scene state
    pub fn state(&self) -> SceneState {
        self.state
    }

    /// Whether submissions are currently accepted
    pub fn is_gathering_objects(&self) -> bool {
        self.state == SceneState::InScene
    }

    /// Shadow cascades of the last rendered frame
    pub fn cascades(&self) -> &ShadowCascades {
        &self.cascades
    }

    /// Render object pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Number of frames ended so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Draw records collected for the current frame
    pub fn collector(&self) -> &BatchCollector {
        &self.collector
    }

    /// Begin collecting a frame
    ///
    /// Discards everything collected for the previous frame and runs queued
    /// frame thread tasks.
    pub fn start_scene(&mut self, backend: &mut dyn GraphicsBackend, camera: &Camera, light: &LightModel) {
        if self.state == SceneState::InScene {
            log::warn!("start_scene called while a scene was open; previous submissions discarded");
        }

        self.gl_tasks.drain(backend);

        self.collector.reset();
        self.skipped_meshes.clear();
        self.closest_object_dist = f32::MAX;
        self.furthest_object_dist = 0.0;
        self.camera = camera.clone();
        self.light = light.clone();
        self.state = SceneState::InScene;

        log::trace!("Scene {} started", self.frame_count);
    }

    /// Shader replacing the default choice, `None` when missing
    fn resolve_override(&mut self, name: &str) -> Option<ShaderHandle> {
        let handle = self.shaders.get(name).map(|program| program.handle());
        if handle.is_none() && self.reported_missing_shaders.insert(name.to_string()) {
            log::warn!(
                "Shader '{}' not found, using '{}'",
                name,
                self.shaders.default_program().name()
            );
        }
        handle
    }

    /// Collect every visible mesh of `object`
    ///
    /// Ignored outside `start_scene`/`end_scene`.
    pub fn submit_object_for_rendering(&mut self, object: &dyn Renderable) {
        if self.state != SceneState::InScene {
            log::debug!("Object submitted outside of a scene; ignored");
            return;
        }

        let Some(entity) = object.entity() else {
            return;
        };
        if entity.meshes.is_empty() {
            return;
        }

        let meta = object.meta_state();
        let (center, radius) = object.bounding_sphere();
        let distance = (center - self.camera.position).norm();

        let object_index = self.collector.add_object(RenderInstanceObjectData {
            model_matrix: object.model_matrix(),
            backface_culling: entity.backface_culling,
            meta_state: Arc::clone(meta),
            distance_to_camera: distance,
            sphere_center: center,
            sphere_radius: radius,
            flags: meta.custom_flags.unwrap_or_else(|| object.object_flags()),
            visibility: [true; MAX_SHADOW_CASCADES + 1],
        });

        self.closest_object_dist = self.closest_object_dist.min(distance - radius);
        self.furthest_object_dist = self.furthest_object_dist.max(distance + radius);

        let override_shader = match meta.shader_override.as_deref() {
            Some(name) => self.resolve_override(name),
            None => None,
        };

        for (index, mesh) in entity.meshes.iter().enumerate() {
            if !meta.is_mesh_visible(index) {
                continue;
            }

            let default = self.shaders.default_program();
            let (shader, shader_overridden) = match override_shader {
                Some(shader) => (shader, true),
                None if mesh.is_skinned() => (default.variant(ShaderVariant::Skinned), false),
                None => (default.handle(), false),
            };

            self.collector.add_mesh(
                object_index,
                MeshSubmission {
                    mesh,
                    shader,
                    shader_overridden,
                    transparent: meta.is_transparent(&mesh.material),
                    bones: object.bone_matrices(index),
                },
            );
        }
    }

    /// Draw everything collected since `start_scene`
    pub fn end_scene(&mut self, backend: &mut dyn GraphicsBackend) -> FrameStats {
        if self.state != SceneState::InScene {
            log::warn!("end_scene called without start_scene");
            return FrameStats::default();
        }
        self.state = SceneState::Idle;
        self.frame_count += 1;

        let mut stats = FrameStats {
            pipeline_groups: self.collector.group_count(),
            mesh_batches: self.collector.batch_count(),
            opaque_instances: self.collector.instance_count(),
            transparent_instances: self.collector.transparent_count(),
            ..FrameStats::default()
        };

        self.cascades.update(
            &self.camera,
            &self.light,
            self.closest_object_dist,
            self.furthest_object_dist,
        );

        let camera_frustum = self.camera.frustum();
        let cascades = self.cascades.cascades();
        for object in self.collector.objects_mut() {
            let (center, radius) = (object.sphere_center, object.sphere_radius);
            object.visibility[0] = camera_frustum.intersects_sphere(center, radius);
            for (slot, cascade) in cascades.iter().enumerate() {
                object.visibility[slot + 1] = cascade.frustum.intersects_sphere(center, radius);
            }
        }

        self.upload_global_uniforms(backend);
        stats.mesh_uploads = self.upload_meshes(backend);

        for slot in 0..self.cascades.len() {
            backend.bind_texture(DIFFUSE_TEXTURE_SLOT + 1 + slot as u32, None);
        }

        let shadows = self.light.shadows && !self.cascades.is_empty();
        if shadows {
            for cascade in 0..self.cascades.len() {
                backend.bind_shadow_target(cascade);
                backend.set_color_write(false);
                let (draws, _) = self.render_opaque(backend, OpaquePass::Shadow(cascade));
                stats.shadow_draw_calls += draws;
            }
            backend.set_color_write(true);
            backend.bind_main_target();

            for slot in 0..self.cascades.len() {
                let texture = backend.shadow_texture(slot);
                backend.bind_texture(DIFFUSE_TEXTURE_SLOT + 1 + slot as u32, texture);
            }
        }

        backend.set_blending(false);
        let (draws, culled) = self.render_opaque(backend, OpaquePass::Main);
        stats.draw_calls += draws;
        stats.culled_instances = culled;

        self.collector.sort_transparent();
        backend.set_color_write(false);
        stats.draw_calls += self.render_transparent(backend);
        backend.set_color_write(true);
        backend.set_blending(true);
        backend.set_depth_write(false);
        stats.draw_calls += self.render_transparent(backend);
        backend.set_depth_write(true);
        backend.set_blending(false);
        backend.set_face_culling(false);

        log::trace!("Scene {} ended: {:?}", self.frame_count, stats);
        stats
    }

    /// End-of-frame housekeeping: recycle render objects and run queued tasks
    pub fn do_tasks(&mut self, backend: &mut dyn GraphicsBackend) {
        self.pool.do_tasks();
        self.gl_tasks.drain(backend);
    }

    /// Upload camera, light and cascade uniforms once per shader in use
    fn upload_global_uniforms(&mut self, backend: &mut dyn GraphicsBackend) {
        let mut shaders = std::mem::take(&mut self.global_shaders);
        shaders.clear();
        for &shader in self.collector.shaders_used() {
            if !shaders.contains(&shader) {
                shaders.push(shader);
            }
            if self.light.shadows {
                for skinned in [false, true] {
                    let variant = self.shaders.shadow_variant(shader, skinned);
                    if !shaders.contains(&variant) {
                        shaders.push(variant);
                    }
                }
            }
        }

        let light_matrices = self.cascades.light_matrices();
        let far_distances = self.cascades.far_distances();
        let unit_to_texel = self.cascades.unit_to_texel();
        let view_projection = self.camera.view_projection_matrix();
        let shadows = self.light.shadows && !self.cascades.is_empty();

        for &shader in &shaders {
            backend.use_shader(shader);
            backend.set_uniform(shader, uniforms::DIFFUSE_TEXTURE, UniformValue::Int(DIFFUSE_TEXTURE_SLOT as i32));
            for (slot, name) in self.shadow_sampler_names.iter().enumerate() {
                let unit = DIFFUSE_TEXTURE_SLOT as usize + 1 + slot;
                backend.set_uniform(shader, name, UniformValue::Int(unit as i32));
            }
            backend.set_uniform(shader, uniforms::CASCADE_LIGHT_PROJ, UniformValue::Mat4Array(&light_matrices));
            backend.set_uniform(shader, uniforms::CASCADE_FAR, UniformValue::FloatArray(&far_distances));
            backend.set_uniform(shader, uniforms::CASCADE_UNIT_TO_TEXEL, UniformValue::FloatArray(&unit_to_texel));
            backend.set_uniform(shader, uniforms::VIEW_PROJECTION, UniformValue::Mat4(view_projection));
            backend.set_uniform(shader, uniforms::CAMERA_POSITION, UniformValue::Vec3(self.camera.position));
            backend.set_uniform(shader, uniforms::SUN_DIRECTION, UniformValue::Vec3(self.light.sun_direction_normalized()));
            backend.set_uniform(shader, uniforms::AMBIENT_COLOR, UniformValue::Color(self.light.ambient_color));
            backend.set_uniform(shader, uniforms::AMBIENT_STRENGTH, UniformValue::Float(self.light.ambient_strength));
            backend.set_uniform(shader, uniforms::DIFFUSE_STRENGTH, UniformValue::Float(self.light.diffuse_strength));
            backend.set_uniform(shader, uniforms::SHADOW_OPACITY, UniformValue::Float(self.light.shadow_opacity));
            backend.set_uniform(shader, uniforms::SHADOWS_ENABLED, UniformValue::Int(i32::from(shadows)));
        }

        self.global_shaders = shaders;
    }

    /// Give every mesh used this frame a render object; returns upload count
    fn upload_meshes(&mut self, backend: &mut dyn GraphicsBackend) -> usize {
        let mut uploads = 0;
        for mesh in self.collector.meshes_used() {
            if let Err(error) = mesh.validate() {
                debug_assert!(false, "invalid mesh data: {}", error);
                log::error!("Skipping mesh: {}", error);
                self.skipped_meshes.insert(mesh.id());
                continue;
            }

            let result = self
                .pool
                .get_mesh_render_object_or_create_new(mesh, backend)
                .and_then(|(handle, already_uploaded)| {
                    if already_uploaded {
                        return Ok(false);
                    }
                    self.pool.upload(handle, mesh, backend).map(|()| true)
                });

            match result {
                Ok(true) => uploads += 1,
                Ok(false) => {}
                Err(error) => {
                    log::error!("Mesh '{}' could not be uploaded: {}", mesh.name, error);
                    self.skipped_meshes.insert(mesh.id());
                }
            }
        }
        uploads
    }

    /// Walk groups, batches and instances; returns (draws, culled instances)
    fn render_opaque(&self, backend: &mut dyn GraphicsBackend, pass: OpaquePass) -> (usize, usize) {
        let (cascade, view_slot) = match pass {
            OpaquePass::Main => (None, 0),
            OpaquePass::Shadow(index) => (Some(index), index + 1),
        };
        let pass_view_projection = match cascade {
            Some(index) => self.cascades.cascades()[index].light_view_proj,
            None => self.camera.view_projection_matrix(),
        };

        let mut draws = 0;
        let mut culled = 0;
        for (_, group) in self.collector.groups() {
            let mut bound_shader = None;

            for (_, batch) in self.collector.batches_of(group) {
                let mesh = &batch.mesh;
                if self.skipped_meshes.contains(&mesh.id()) {
                    continue;
                }

                let shader = match cascade {
                    Some(_) => self.shaders.shadow_variant(group.shader, mesh.is_skinned()),
                    None => group.shader,
                };
                if bound_shader != Some(shader) {
                    backend.use_shader(shader);
                    let rendering_shadow_map = cascade.map_or(-1, |index| index as i32);
                    backend.set_uniform(shader, uniforms::RENDERING_SHADOW_MAP, UniformValue::Int(rendering_shadow_map));
                    backend.set_uniform(shader, uniforms::VIEW_PROJECTION, UniformValue::Mat4(pass_view_projection));
                    bound_shader = Some(shader);
                }

                if !self.bind_mesh(backend, shader, mesh) {
                    continue;
                }

                for (_, instance) in self.collector.instances_of(batch) {
                    let object = self.collector.object(instance.object);
                    if cascade.is_some() && !object.flags.contains(ObjectFlags::CAST_SHADOWS) {
                        continue;
                    }
                    if !object.visibility[view_slot] {
                        culled += 1;
                        continue;
                    }

                    if draw_instance(
                        backend,
                        shader,
                        mesh,
                        object,
                        instance.bones.as_deref(),
                        group.upload_meta_state,
                    ) {
                        draws += 1;
                    }
                }
            }
        }

        (draws, if cascade.is_none() { culled } else { 0 })
    }

    /// Draw the sorted transparent list once with the current target state
    fn render_transparent(&self, backend: &mut dyn GraphicsBackend) -> usize {
        let view_projection = self.camera.view_projection_matrix();
        let mut bound_shader = None;
        let mut draws = 0;

        for record in self.collector.transparent() {
            if self.skipped_meshes.contains(&record.mesh.id()) {
                continue;
            }

            if bound_shader != Some(record.shader) {
                backend.use_shader(record.shader);
                backend.set_uniform(record.shader, uniforms::RENDERING_SHADOW_MAP, UniformValue::Int(-1));
                backend.set_uniform(record.shader, uniforms::VIEW_PROJECTION, UniformValue::Mat4(view_projection));
                bound_shader = Some(record.shader);
            }

            if !self.bind_mesh(backend, record.shader, &record.mesh) {
                continue;
            }

            let object = self.collector.object(record.object);
            if draw_instance(
                backend,
                record.shader,
                &record.mesh,
                object,
                record.bones.as_deref(),
                record.upload_meta_state,
            ) {
                draws += 1;
            }
        }
        draws
    }

    /// Bind material and buffers of a mesh; false if it has no render object
    fn bind_mesh(&self, backend: &mut dyn GraphicsBackend, shader: ShaderHandle, mesh: &Mesh) -> bool {
        let Some((_, render_object)) = self.pool.lookup(mesh.id()) else {
            debug_assert!(false, "mesh '{}' has no render object", mesh.name);
            log::error!("Mesh '{}' has no render object; draw dropped", mesh.name);
            return false;
        };

        backend.set_uniform(shader, uniforms::DIFFUSE_COLOR, UniformValue::Color(mesh.material.diffuse_color));
        backend.bind_texture(DIFFUSE_TEXTURE_SLOT, mesh.material.diffuse_texture);
        backend.bind_vertex_array(render_object.vertex_array);
        true
    }

    /// Draw one entity immediately, outside of the batched scene
    ///
    /// Meant for UI previews and similar one-off draws. No shadows are
    /// applied. `bones` holds the skinning matrices per mesh. Returns the
    /// number of draw calls issued.
    pub fn render_entity_standalone(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        entity: &EntityModel,
        meta: &MetaState,
        model_matrix: Mat4,
        bones: Option<&[Arc<[Mat4]>]>,
        light: Option<&LightModel>,
    ) -> usize {
        let override_shader = match meta.shader_override.as_deref() {
            Some(name) => self.resolve_override(name),
            None => None,
        };
        let light = light.cloned().unwrap_or_else(|| LightModel {
            ambient_color: Color::WHITE,
            ambient_strength: 1.0,
            diffuse_strength: 0.0,
            ..LightModel::default()
        });
        let view_projection = self.camera.view_projection_matrix();

        backend.bind_main_target();
        for slot in 0..self.cascades.len() {
            backend.bind_texture(DIFFUSE_TEXTURE_SLOT + 1 + slot as u32, None);
        }

        let mut draws = 0;
        for (index, mesh) in entity.meshes.iter().enumerate() {
            if !meta.is_mesh_visible(index) {
                continue;
            }
            if let Err(error) = mesh.validate() {
                debug_assert!(false, "invalid mesh data: {}", error);
                log::error!("Skipping mesh: {}", error);
                continue;
            }

            let default = self.shaders.default_program();
            let shader = match override_shader {
                Some(shader) => shader,
                None if mesh.is_skinned() => default.variant(ShaderVariant::Skinned),
                None => default.handle(),
            };

            let (handle, already_uploaded) = match self.pool.get_mesh_render_object_or_create_new(mesh, backend) {
                Ok(result) => result,
                Err(error) => {
                    log::error!("No render object for '{}': {}", mesh.name, error);
                    continue;
                }
            };
            if !already_uploaded {
                if let Err(error) = self.pool.upload(handle, mesh, backend) {
                    log::error!("Mesh '{}' could not be uploaded: {}", mesh.name, error);
                    continue;
                }
            }

            backend.use_shader(shader);
            if override_shader.is_some() {
                for (name, value) in &meta.shader_uniforms {
                    backend.set_uniform(shader, name, value.as_value());
                }
            }
            backend.set_uniform(shader, uniforms::RENDERING_SHADOW_MAP, UniformValue::Int(-1));
            backend.set_uniform(shader, uniforms::VIEW_PROJECTION, UniformValue::Mat4(view_projection));
            backend.set_uniform(shader, uniforms::CAMERA_POSITION, UniformValue::Vec3(self.camera.position));
            backend.set_uniform(shader, uniforms::SUN_DIRECTION, UniformValue::Vec3(light.sun_direction_normalized()));
            backend.set_uniform(shader, uniforms::AMBIENT_COLOR, UniformValue::Color(light.ambient_color));
            backend.set_uniform(shader, uniforms::AMBIENT_STRENGTH, UniformValue::Float(light.ambient_strength));
            backend.set_uniform(shader, uniforms::DIFFUSE_STRENGTH, UniformValue::Float(light.diffuse_strength));
            backend.set_uniform(shader, uniforms::SHADOW_OPACITY, UniformValue::Float(0.0));
            backend.set_uniform(shader, uniforms::SHADOWS_ENABLED, UniformValue::Int(0));
            backend.set_uniform(shader, uniforms::LIGHT_MODE, UniformValue::Int(ObjectFlags::RECEIVE_AMBIENT.light_mode()));
            backend.set_uniform(shader, uniforms::MODEL_MATRIX, UniformValue::Mat4(model_matrix));
            backend.set_uniform(shader, uniforms::OBJECT_TINT, UniformValue::Color(meta.tint));
            if let Some(mesh_bones) = bones.and_then(|b| b.get(index)).filter(|_| mesh.is_skinned()) {
                backend.set_uniform(shader, uniforms::BONE_MATRICES, UniformValue::Mat4Array(&mesh_bones[..]));
            }

            if !self.bind_mesh(backend, shader, mesh) {
                continue;
            }
            backend.set_face_culling(entity.backface_culling);
            match backend.draw_indexed(mesh.indices.len() as u32) {
                Ok(()) => draws += 1,
                Err(error) => log::warn!("Standalone draw of '{}' failed: {}", mesh.name, error),
            }
        }

        backend.set_face_culling(false);
        draws
    }
}

/// Push per-instance uniforms and draw; false if the backend rejected the draw
fn draw_instance(
    backend: &mut dyn GraphicsBackend,
    shader: ShaderHandle,
    mesh: &Mesh,
    object: &RenderInstanceObjectData,
    bones: Option<&[Mat4]>,
    upload_meta_state: bool,
) -> bool {
    backend.set_uniform(shader, uniforms::LIGHT_MODE, UniformValue::Int(object.flags.light_mode()));
    backend.set_uniform(shader, uniforms::MODEL_MATRIX, UniformValue::Mat4(object.model_matrix));
    backend.set_uniform(shader, uniforms::OBJECT_TINT, UniformValue::Color(object.meta_state.tint));
    if let Some(bones) = bones.filter(|_| mesh.is_skinned()) {
        backend.set_uniform(shader, uniforms::BONE_MATRICES, UniformValue::Mat4Array(bones));
    }
    if upload_meta_state {
        for (name, value) in &object.meta_state.shader_uniforms {
            backend.set_uniform(shader, name, value.as_value());
        }
    }
    backend.set_face_culling(object.backface_culling);

    match backend.draw_indexed(mesh.indices.len() as u32) {
        Ok(()) => true,
        Err(error) => {
            log::warn!("Draw of '{}' failed: {}", mesh.name, error);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Transform, Vec3};
    use crate::render::headless::{BackendCommand, HeadlessBackend, RecordedTarget};
    use crate::render::mesh::Material;
    use crate::world::Aabb;

    struct TestObject {
        entity: EntityModel,
        meta: Arc<MetaState>,
        position: Vec3,
        flags: ObjectFlags,
    }

    impl TestObject {
        fn new(mesh: &Arc<Mesh>, position: Vec3) -> Self {
            Self {
                entity: EntityModel::new(
                    "test",
                    vec![Arc::clone(mesh)],
                    Aabb::from_center_extents(Vec3::zeros(), Vec3::repeat(0.5)),
                ),
                meta: Arc::new(MetaState::default()),
                position,
                flags: ObjectFlags::default(),
            }
        }
    }

    impl Renderable for TestObject {
        fn entity(&self) -> Option<&EntityModel> {
            Some(&self.entity)
        }

        fn meta_state(&self) -> &Arc<MetaState> {
            &self.meta
        }

        fn model_matrix(&self) -> Mat4 {
            Transform::from_position(self.position).to_matrix()
        }

        fn bounding_sphere(&self) -> (Vec3, f32) {
            (self.position, 0.5)
        }

        fn object_flags(&self) -> ObjectFlags {
            self.flags
        }
    }

    fn renderer() -> MeshEntityBatchRenderer {
        let mut shaders = ShaderLibrary::new("default", ShaderHandle(1));
        shaders.register_variant("default", ShaderVariant::Skinned, ShaderHandle(2)).unwrap();
        shaders.register_variant("default", ShaderVariant::ShadowMap, ShaderHandle(3)).unwrap();
        MeshEntityBatchRenderer::new(RendererConfig::default(), shaders).unwrap()
    }

    fn camera() -> Camera {
        let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 60.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::zeros(), Vec3::y());
        camera
    }

    fn quad(color: Color) -> Arc<Mesh> {
        Arc::new(Mesh::quad("quad", 1.0, Material::colored("m", color)))
    }

    #[test]
    fn test_submission_outside_scene_is_ignored() {
        let mut renderer = renderer();
        let mesh = quad(Color::WHITE);
        renderer.submit_object_for_rendering(&TestObject::new(&mesh, Vec3::zeros()));
        assert_eq!(renderer.collector().instance_count(), 0);

        let mut backend = HeadlessBackend::default();
        assert_eq!(renderer.end_scene(&mut backend), FrameStats::default());
    }

    #[test]
    fn test_shared_mesh_uploads_once() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);
        let light = LightModel { shadows: false, ..LightModel::default() };

        renderer.start_scene(&mut backend, &camera(), &light);
        for x in [-1.0, 0.0, 1.0] {
            renderer.submit_object_for_rendering(&TestObject::new(&mesh, Vec3::new(x, 0.0, 0.0)));
        }
        let stats = renderer.end_scene(&mut backend);

        assert_eq!(stats.mesh_uploads, 1);
        assert_eq!(stats.pipeline_groups, 1);
        assert_eq!(stats.mesh_batches, 1);
        assert_eq!(stats.draw_calls, 3);
        let vao_binds = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, BackendCommand::BindVertexArray(_)))
            .count();
        assert_eq!(vao_binds, 1);
    }

    #[test]
    fn test_transparent_drawn_far_to_near_twice() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let glass = quad(Color::rgba(1.0, 1.0, 1.0, 0.5));

        renderer.start_scene(&mut backend, &camera(), &LightModel::default());
        renderer.submit_object_for_rendering(&TestObject::new(&glass, Vec3::new(0.0, 0.0, 5.0)));
        renderer.submit_object_for_rendering(&TestObject::new(&glass, Vec3::new(0.0, 0.0, 0.0)));
        let stats = renderer.end_scene(&mut backend);

        assert_eq!(stats.transparent_instances, 2);
        assert_eq!(stats.shadow_draw_calls, 0);

        let draws: Vec<_> = backend.draws().collect();
        assert_eq!(draws.len(), 4);
        assert!(!draws[0].color_write && !draws[1].color_write);
        assert!(draws[2].color_write && draws[2].blending);

        let z = |i: usize| draws[i].model.unwrap()[(2, 3)];
        assert_eq!(z(0), 0.0);
        assert_eq!(z(1), 5.0);
        assert_eq!(z(2), 0.0);
        assert_eq!(z(3), 5.0);
    }

    #[test]
    fn test_shadow_pass_skips_non_casters() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);

        let caster = TestObject::new(&mesh, Vec3::zeros());
        let mut non_caster = TestObject::new(&mesh, Vec3::new(1.0, 0.0, 0.0));
        non_caster.flags = ObjectFlags::RECEIVE_SHADOWS | ObjectFlags::RECEIVE_AMBIENT;

        renderer.start_scene(&mut backend, &camera(), &LightModel::default());
        renderer.submit_object_for_rendering(&caster);
        renderer.submit_object_for_rendering(&non_caster);
        let stats = renderer.end_scene(&mut backend);

        assert_eq!(stats.draw_calls, 2);
        assert!(stats.shadow_draw_calls <= renderer.config().shadow_cascade_count);
        assert!(stats.shadow_draw_calls >= 1);
        for draw in backend.draws() {
            if draw.target != RecordedTarget::Main {
                assert_eq!(draw.shader, Some(ShaderHandle(3)));
                assert_eq!(draw.model.unwrap()[(0, 3)], 0.0);
            }
        }
    }

    #[test]
    fn test_missing_override_falls_back_to_default() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);
        let mut object = TestObject::new(&mesh, Vec3::zeros());
        object.meta = Arc::new(MetaState {
            shader_override: Some("does_not_exist".to_string()),
            ..MetaState::default()
        });

        renderer.start_scene(&mut backend, &camera(), &LightModel { shadows: false, ..LightModel::default() });
        renderer.submit_object_for_rendering(&object);
        renderer.end_scene(&mut backend);

        assert_eq!(renderer.collector().shaders_used(), &[ShaderHandle(1)]);
        assert_eq!(backend.visible_draws().next().unwrap().shader, Some(ShaderHandle(1)));
    }

    #[test]
    fn test_hidden_mesh_is_not_collected() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);
        let mut object = TestObject::new(&mesh, Vec3::zeros());
        let mut meta = MetaState::default();
        meta.set_mesh_visible(0, false);
        object.meta = Arc::new(meta);

        renderer.start_scene(&mut backend, &camera(), &LightModel::default());
        renderer.submit_object_for_rendering(&object);
        let stats = renderer.end_scene(&mut backend);
        assert_eq!(stats.opaque_instances, 0);
        assert_eq!(stats.mesh_uploads, 0);
    }

    #[test]
    fn test_do_tasks_recycles_and_runs_queue() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);

        for _ in 0..3 {
            renderer.start_scene(&mut backend, &camera(), &LightModel::default());
            renderer.submit_object_for_rendering(&TestObject::new(&mesh, Vec3::zeros()));
            let stats = renderer.end_scene(&mut backend);
            assert_eq!(stats.mesh_uploads, 1);
            renderer.do_tasks(&mut backend);
        }
        assert_eq!(renderer.pool_stats().created, 1);

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        renderer.gl_tasks().execute_async(move |_| flag.store(true, std::sync::atomic::Ordering::Release));
        renderer.do_tasks(&mut backend);
        assert!(ran.load(std::sync::atomic::Ordering::Acquire));
    }

    #[test]
    fn test_offscreen_object_is_culled() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);

        renderer.start_scene(&mut backend, &camera(), &LightModel { shadows: false, ..LightModel::default() });
        renderer.submit_object_for_rendering(&TestObject::new(&mesh, Vec3::new(500.0, 0.0, 0.0)));
        let stats = renderer.end_scene(&mut backend);
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.culled_instances, 1);
    }

    #[test]
    fn test_standalone_draw() {
        let mut renderer = renderer();
        let mut backend = HeadlessBackend::default();
        let mesh = quad(Color::WHITE);
        let object = TestObject::new(&mesh, Vec3::zeros());

        let draws = renderer.render_entity_standalone(
            &mut backend,
            &object.entity,
            &object.meta,
            Mat4::identity(),
            None,
            None,
        );
        assert_eq!(draws, 1);
        assert_eq!(backend.upload_count(), 3);
    }

    #[test]
    fn test_missing_default_shader_fails_construction() {
        let config = RendererConfig {
            default_shader: "mesh".to_string(),
            ..RendererConfig::default()
        };
        let shaders = ShaderLibrary::new("default", ShaderHandle(1));
        assert!(MeshEntityBatchRenderer::new(config, shaders).is_err());
    }
}
