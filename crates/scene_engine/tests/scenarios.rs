//! End-to-end scenarios through the public API

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use scene_engine::config::MAX_SHADOW_CASCADES;
use scene_engine::foundation::arena::ArenaAllocator;
use scene_engine::map::{Component, ComponentInit};
use scene_engine::prelude::*;
use scene_engine::render::{BackendCommand, BatchCollector, MeshSubmission, RenderInstanceObjectData, ShaderVariant};

fn camera() -> Camera {
    let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 60.0, 16.0 / 9.0, 0.1, 200.0);
    camera.look_at(Vec3::zeros(), Vec3::y());
    camera
}

fn renderer() -> MeshEntityBatchRenderer {
    let mut shaders = ShaderLibrary::new("default", ShaderHandle(1));
    shaders.register_variant("default", ShaderVariant::Skinned, ShaderHandle(2)).unwrap();
    shaders.register_variant("default", ShaderVariant::ShadowMap, ShaderHandle(3)).unwrap();
    shaders.register_variant("default", ShaderVariant::SkinnedShadowMap, ShaderHandle(4)).unwrap();
    shaders.register("ghost", ShaderHandle(10));
    MeshEntityBatchRenderer::new(RendererConfig::default(), shaders).unwrap()
}

fn entity(name: &str, color: Color) -> Arc<EntityModel> {
    let mesh = Arc::new(Mesh::quad(name, 1.0, Material::colored(name, color)));
    Arc::new(EntityModel::new(
        name,
        vec![mesh],
        Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.0)),
    ))
}

fn placed(entity: &Arc<EntityModel>, position: Vec3) -> ObjectRenderData {
    ObjectRenderData::new(Arc::clone(entity), Transform::from_position(position))
}

#[test]
fn scenario_a_shared_mesh_is_uploaded_once_and_drawn_in_one_batch() {
    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    let crate_model = entity("crate", Color::WHITE);
    let light = LightModel {
        shadows: false,
        ..LightModel::default()
    };

    renderer.start_scene(&mut backend, &camera(), &light);
    for x in [-2.0, 0.0, 2.0] {
        renderer.submit_object_for_rendering(&placed(&crate_model, Vec3::new(x, 0.0, 0.0)));
    }
    let stats = renderer.end_scene(&mut backend);

    assert_eq!(stats.pipeline_groups, 1);
    assert_eq!(stats.mesh_batches, 1);
    assert_eq!(stats.opaque_instances, 3);
    assert_eq!(stats.mesh_uploads, 1);
    assert_eq!(backend.visible_draws().count(), 3);

    let vertex_array_binds = backend
        .commands()
        .iter()
        .filter(|command| matches!(command, BackendCommand::BindVertexArray(_)))
        .count();
    assert_eq!(vertex_array_binds, 1);

    // Next frame reuses the recycled render object
    renderer.do_tasks(&mut backend);
    let buffers = backend.buffer_count();
    renderer.start_scene(&mut backend, &camera(), &light);
    renderer.submit_object_for_rendering(&placed(&crate_model, Vec3::zeros()));
    renderer.end_scene(&mut backend);
    assert_eq!(backend.buffer_count(), buffers);
}

#[test]
fn scenario_b_transparent_objects_draw_far_to_near() {
    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    let glass = entity("glass", Color::rgba(0.5, 0.8, 1.0, 0.4));

    renderer.start_scene(&mut backend, &camera(), &LightModel::default());
    // 5 units from the camera, submitted first
    renderer.submit_object_for_rendering(&placed(&glass, Vec3::new(0.0, 0.0, 5.0)));
    // 10 units from the camera
    renderer.submit_object_for_rendering(&placed(&glass, Vec3::zeros()));
    let stats = renderer.end_scene(&mut backend);
    assert_eq!(stats.transparent_instances, 2);

    let color_draws: Vec<_> = backend.visible_draws().collect();
    assert_eq!(color_draws.len(), 2);
    assert!(color_draws.iter().all(|draw| draw.blending));
    assert_eq!(color_draws[0].model.unwrap()[(2, 3)], 0.0);
    assert_eq!(color_draws[1].model.unwrap()[(2, 3)], 5.0);
}

#[test]
fn scenario_c_object_removed_before_loading_is_never_initialized() {
    struct CountInit(Rc<Cell<u32>>);

    impl Component for CountInit {
        fn init(&mut self, _owner: ObjectId) -> ComponentInit {
            self.0.set(self.0.get() + 1);
            ComponentInit::Ready
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    let inits = Rc::new(Cell::new(0));
    let mut map = GameMap::new("c", MapConfig::default(), WorldTreeConfig::default()).unwrap();
    map.init();

    let bounds = Aabb::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0));
    let x = map.add_object(GameObject::new("x", ObjectKind::Actor, bounds).with_component(CountInit(Rc::clone(&inits))));
    assert!(map.remove_object(x));
    assert!(!map.remove_object(x));

    for _ in 0..4 {
        map.tick();
    }
    assert_eq!(inits.get(), 0);
    assert_eq!(map.state(), MapState::Initialized);

    let mut found = Vec::new();
    map.query().in_shape(Sphere::new(Vec3::zeros(), 50.0)).collect_into(&mut found);
    assert!(!found.contains(&x));
    assert!(map.object(x).is_none());
}

#[test]
fn arena_reuses_slots_after_reset() {
    let mut arena = ArenaAllocator::with_capacity(4);
    for frame in 0..3u32 {
        arena.reset();
        let first = arena.allocate(frame * 10);
        assert_eq!(first.get(), 0);
        assert_eq!(arena[first], frame * 10);
        arena.allocate(frame * 10 + 1);
        arena.allocate(frame * 10 + 2);
    }
    assert_eq!(arena.len(), 3);
    assert_eq!(arena.high_water_mark(), 3);
}

#[test]
fn batches_match_distinct_mesh_shader_pairs() {
    let meshes: Vec<Arc<Mesh>> = (0..3)
        .map(|i| Arc::new(Mesh::quad(format!("m{}", i), 1.0, Material::default())))
        .collect();
    let shaders = [ShaderHandle(1), ShaderHandle(2)];

    let mut collector = BatchCollector::new(16);
    let object = collector.add_object(RenderInstanceObjectData {
        model_matrix: Mat4::identity(),
        backface_culling: true,
        meta_state: Arc::new(MetaState::default()),
        distance_to_camera: 1.0,
        sphere_center: Vec3::zeros(),
        sphere_radius: 1.0,
        flags: ObjectFlags::default(),
        visibility: Default::default(),
    });

    // Pairs repeat and arrive in scrambled order
    let order = [(0, 0), (1, 1), (0, 0), (2, 0), (1, 0), (0, 1), (2, 0), (1, 1)];
    for (mesh, shader) in order {
        collector.add_mesh(
            object,
            MeshSubmission {
                mesh: &meshes[mesh],
                shader: shaders[shader],
                shader_overridden: false,
                transparent: false,
                bones: None,
            },
        );
    }

    assert_eq!(collector.batch_count(), 5);
    assert_eq!(collector.group_count(), 2);
    assert_eq!(collector.instance_count(), order.len());
}

#[test]
fn map_feeds_visible_objects_to_renderer() {
    let mut map = GameMap::new("feed", MapConfig::default(), WorldTreeConfig::default()).unwrap();
    let model = entity("pillar", Color::WHITE);
    for x in [0.0, 3.0, 600.0] {
        let render = placed(&model, Vec3::new(x, 0.0, 0.0));
        let object = GameObject::new("pillar", ObjectKind::Prop, render.world_bounds()).with_render_data(render);
        map.add_object(object);
    }
    map.add_object(GameObject::new(
        "trigger",
        ObjectKind::Trigger,
        Aabb::from_center_extents(Vec3::zeros(), Vec3::repeat(1.0)),
    ));
    map.init();
    for _ in 0..5 {
        map.tick();
    }

    let camera = camera();
    let view = camera.view_bounds(0.0).unwrap();
    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    renderer.start_scene(&mut backend, &camera, &LightModel::default());
    let submitted = map.submit_visible(&mut renderer, LayerId::ALL, view);
    let stats = renderer.end_scene(&mut backend);

    assert_eq!(submitted, 2);
    assert_eq!(stats.opaque_instances, 2);
    assert_eq!(backend.visible_draws().count(), 2);
}

#[test]
fn cloned_mesh_draws_in_its_own_batch() {
    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    let white = Mesh::quad("tile", 1.0, Material::colored("tile", Color::WHITE));
    let mut red = white.clone();
    red.material.diffuse_color = Color::rgb(1.0, 0.0, 0.0);

    let bounds = Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.0));
    let white_model = Arc::new(EntityModel::new("white", vec![Arc::new(white)], bounds));
    let red_model = Arc::new(EntityModel::new("red", vec![Arc::new(red)], bounds));
    let light = LightModel {
        shadows: false,
        ..LightModel::default()
    };

    renderer.start_scene(&mut backend, &camera(), &light);
    renderer.submit_object_for_rendering(&placed(&white_model, Vec3::new(-1.0, 0.0, 0.0)));
    let mut scaled = placed(&red_model, Vec3::new(1.0, 0.0, 0.0));
    scaled.transform.scale = Vec3::repeat(2.0);
    renderer.submit_object_for_rendering(&scaled);
    let stats = renderer.end_scene(&mut backend);

    assert_eq!(stats.mesh_batches, 2);
    assert_eq!(stats.mesh_uploads, 2);
    assert_eq!(backend.visible_draws().count(), 2);
}

#[test]
fn camera_frustum_finds_objects_off_the_ground_plane() {
    let mut map = GameMap::new("depth", MapConfig::default(), WorldTreeConfig::default()).unwrap();
    let model = entity("lamp", Color::WHITE);
    for position in [Vec3::new(0.0, 0.0, 3.0), Vec3::new(1.0, 1.0, -4.0), Vec3::new(0.0, 0.0, 30.0)] {
        let render = placed(&model, position);
        let object = GameObject::new("lamp", ObjectKind::Prop, render.world_bounds()).with_render_data(render);
        map.add_object(object);
    }
    map.init();
    for _ in 0..5 {
        map.tick();
    }

    let camera = camera();
    let ground = camera.view_bounds(0.0).unwrap();
    assert_eq!(map.query().in_shape(ground).count(), 0);

    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    renderer.start_scene(&mut backend, &camera, &LightModel::default());
    let submitted = map.submit_visible(&mut renderer, LayerId::ALL, camera.frustum());
    let stats = renderer.end_scene(&mut backend);

    // The lamp at z = 30 sits behind the camera
    assert_eq!(submitted, 2);
    assert_eq!(stats.opaque_instances, 2);
}

#[test]
fn shadow_cascades_are_contiguous_after_a_frame() {
    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    let model = entity("crate", Color::WHITE);

    renderer.start_scene(&mut backend, &camera(), &LightModel::default());
    for z in [-40.0, -10.0, 0.0, 5.0] {
        renderer.submit_object_for_rendering(&placed(&model, Vec3::new(0.0, 0.0, z)));
    }
    let stats = renderer.end_scene(&mut backend);
    assert!(stats.shadow_draw_calls > 0);

    let cascades = renderer.cascades().cascades();
    assert_eq!(cascades.len(), renderer.config().shadow_cascade_count);
    assert!(cascades.len() <= MAX_SHADOW_CASCADES);
    for pair in cascades.windows(2) {
        assert_eq!(pair[0].far, pair[1].near);
        assert!(pair[0].near < pair[0].far);
    }
}

#[test]
fn shader_override_uploads_meta_uniforms() {
    let mut renderer = renderer();
    let mut backend = HeadlessBackend::default();
    let model = entity("ghost", Color::WHITE);

    let mut render = placed(&model, Vec3::zeros());
    render.meta_state = Arc::new(MetaState {
        shader_override: Some("ghost".to_string()),
        shader_uniforms: vec![("glow".to_string(), scene_engine::render::OwnedUniform::Float(0.7))],
        ..MetaState::default()
    });

    renderer.start_scene(&mut backend, &camera(), &LightModel::default());
    renderer.submit_object_for_rendering(&render);
    renderer.end_scene(&mut backend);

    let draw = backend.visible_draws().next().unwrap();
    assert_eq!(draw.shader, Some(ShaderHandle(10)));
    assert!(backend.uniform_values("glow").count() >= 1);
}
