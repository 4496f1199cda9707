//! Headless scene demo
//!
//! Scatters crates and glass panes over a map, loads them over a few ticks
//! and renders a fixed number of frames through the recording backend,
//! logging per-frame statistics.

use std::any::Any;
use std::sync::Arc;

use rand::Rng;
use scene_engine::foundation::logging;
use scene_engine::foundation::math::Quat;
use scene_engine::map::{MemoryStorage, ObjectBehavior};
use scene_engine::prelude::*;
use scene_engine::render::ShaderVariant;

const OBJECT_COUNT: usize = 200;
const FRAME_COUNT: u64 = 120;
const FIELD_HALF_SIZE: f32 = 60.0;
const FRAME_TIME: f32 = 1.0 / 60.0;

/// Rotates its object around the view axis
struct Spinner {
    radians_per_second: f32,
    angle: f32,
}

impl ObjectBehavior for Spinner {
    fn update(&mut self, _id: ObjectId, dt: f32, render: Option<&mut ObjectRenderData>) {
        self.angle += self.radians_per_second * dt;
        if let Some(render) = render {
            render.transform.rotation = Quat::from_axis_angle(&Vec3::z_axis(), self.angle);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct DemoApp {
    config: EngineConfig,
    renderer: MeshEntityBatchRenderer,
    backend: HeadlessBackend,
    camera: Camera,
    light: LightModel,
    map: GameMap,
}

impl DemoApp {
    pub fn new(config: EngineConfig) -> Result<Self, Box<dyn std::error::Error>> {
        log::info!("Creating headless scene demo...");

        let mut shaders = ShaderLibrary::new(config.renderer.default_shader.clone(), ShaderHandle(1));
        let default = config.renderer.default_shader.clone();
        shaders.register_variant(&default, ShaderVariant::Skinned, ShaderHandle(2))?;
        shaders.register_variant(&default, ShaderVariant::ShadowMap, ShaderHandle(3))?;
        shaders.register_variant(&default, ShaderVariant::SkinnedShadowMap, ShaderHandle(4))?;

        let renderer = MeshEntityBatchRenderer::new(config.renderer.clone(), shaders)?;
        let backend = HeadlessBackend::new(config.renderer.shadow_cascade_count);
        let map = GameMap::from_engine_config("demo", &config)?;

        let mut camera = Camera::perspective(Vec3::new(0.0, -20.0, 80.0), 60.0, 16.0 / 9.0, 0.1, 400.0);
        camera.look_at(Vec3::zeros(), Vec3::y());

        Ok(Self {
            config,
            renderer,
            backend,
            camera,
            light: LightModel::default(),
            map,
        })
    }

    pub fn initialize(&mut self) {
        let crate_model = Arc::new(EntityModel::new(
            "crate",
            vec![Arc::new(Mesh::quad("crate", 2.0, Material::colored("wood", Color::rgb(0.6, 0.4, 0.2))))],
            Aabb::from_center_extents(Vec3::zeros(), Vec3::new(1.0, 1.0, 0.0)),
        ));
        let glass_model = Arc::new(EntityModel::new(
            "glass",
            vec![Arc::new(Mesh::quad("glass", 3.0, Material::colored("glass", Color::rgba(0.6, 0.8, 1.0, 0.35))))],
            Aabb::from_center_extents(Vec3::zeros(), Vec3::new(1.5, 1.5, 0.0)),
        ));

        let mut rng = rand::thread_rng();
        for i in 0..OBJECT_COUNT {
            let position = Vec3::new(
                rng.gen_range(-FIELD_HALF_SIZE..FIELD_HALF_SIZE),
                rng.gen_range(-FIELD_HALF_SIZE..FIELD_HALF_SIZE),
                rng.gen_range(-2.0..2.0),
            );
            let glass = i % 5 == 0;
            let model = if glass { &glass_model } else { &crate_model };

            let render = ObjectRenderData::new(Arc::clone(model), Transform::from_position(position));
            let object = GameObject::new(
                if glass { "glass" } else { "crate" },
                ObjectKind::Prop,
                render.world_bounds(),
            )
            .with_render_data(render)
            .with_behavior(Spinner {
                radians_per_second: rng.gen_range(-3.0..3.0),
                angle: 0.0,
            });
            self.map.add_object(object);
        }

        self.map.init();
        let mut ticks = 0;
        while self.map.state() != MapState::Initialized {
            self.map.tick();
            ticks += 1;
        }
        log::info!("Loaded {} objects in {} ticks", self.map.len(), ticks);
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for frame in 0..FRAME_COUNT {
            let moved = self.map.update(FRAME_TIME);
            log::trace!("Frame {}: {} objects moved", frame, moved);
            let stats = self.render_frame();

            if frame % 30 == 0 {
                log::info!(
                    "Frame {}: {} groups, {} batches, {} opaque, {} transparent, {} draws ({} shadow), {} culled",
                    frame,
                    stats.pipeline_groups,
                    stats.mesh_batches,
                    stats.opaque_instances,
                    stats.transparent_instances,
                    stats.draw_calls,
                    stats.shadow_draw_calls,
                    stats.culled_instances
                );
            }
        }

        let pool = self.renderer.pool_stats();
        log::info!("Render objects: {} created, {} free", pool.created, pool.free);

        let mut storage = MemoryStorage::new();
        self.map.save(&mut storage, "demo")?;
        log::info!("Saved map '{}' ({} objects)", self.map.name(), self.map.len());
        Ok(())
    }

    fn render_frame(&mut self) -> FrameStats {
        self.backend.clear_commands();
        self.renderer.start_scene(&mut self.backend, &self.camera, &self.light);

        let submitted = self.map.submit_visible(&mut self.renderer, LayerId::ALL, self.camera.frustum());
        log::debug!("Submitted {} objects", submitted);

        let stats = self.renderer.end_scene(&mut self.backend);
        self.renderer.do_tasks(&mut self.backend);
        stats
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(&path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    logging::init_with_level(&config.log_level);

    log::info!("Starting scene demo");
    let mut app = DemoApp::new(config)?;
    app.initialize();
    app.run()?;
    log::info!(
        "Scene demo finished after {} frames (log level '{}')",
        app.renderer.frame_count(),
        app.config.log_level
    );
    Ok(())
}
