//! Cascaded shadow maps for the sun light
//!
//! The camera depth range that actually contains submitted objects is split
//! into cascades with the practical split scheme, a blend between a
//! logarithmic distribution (dense near the camera) and a uniform one. Each
//! cascade gets an orthographic light projection tightly fitted around the
//! camera frustum slice it covers.

use super::camera::{Camera, Frustum};
use super::light::LightModel;
use crate::config::RendererConfig;
use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};

/// One depth slice of the camera frustum
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowCascade {
    /// Cascade number, 0 is closest to the camera
    pub index: usize,
    /// Camera distance where the cascade starts
    pub near: f32,
    /// Camera distance where the cascade ends
    pub far: f32,
    /// World to light clip space
    pub light_view_proj: Mat4,
    /// Edge length of the depth target in texels
    pub resolution: f32,
    /// World units covered by one texel
    pub unit_to_texel: f32,
    /// Frustum of the light projection, for caster culling
    pub frustum: Frustum,
}

impl ShadowCascade {
    fn new(index: usize, base_resolution: u32) -> Self {
        // Farther cascades cover more area and get smaller targets
        let resolution = if index == 0 {
            base_resolution as f32
        } else {
            base_resolution as f32 / (2 * index) as f32
        };
        Self {
            index,
            near: 0.0,
            far: 0.0,
            light_view_proj: Mat4::identity(),
            resolution,
            unit_to_texel: 1.0,
            frustum: Frustum::from_matrix(&Mat4::identity()),
        }
    }
}

/// Far distance of every split in `[near, far]` with the practical scheme
///
/// `lambda` = 1 is purely logarithmic, 0 purely uniform. The last split
/// always equals `far`.
pub fn practical_splits(near: f32, far: f32, count: usize, lambda: f32) -> Vec<f32> {
    (1..=count)
        .map(|i| {
            if i == count {
                return far;
            }
            let p = i as f32 / count as f32;
            let log_split = near * (far / near).powf(p);
            let uniform_split = near + (far - near) * p;
            utils::lerp(uniform_split, log_split, lambda)
        })
        .collect()
}

/// Set of cascades recomputed every frame
#[derive(Debug, Clone)]
pub struct ShadowCascades {
    cascades: Vec<ShadowCascade>,
    split_lambda: f32,
    caster_padding: f32,
}

impl ShadowCascades {
    /// Allocate the cascades described by `config`
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            cascades: (0..config.shadow_cascade_count)
                .map(|i| ShadowCascade::new(i, config.shadow_map_resolution))
                .collect(),
            split_lambda: config.cascade_split_lambda,
            caster_padding: config.shadow_caster_padding,
        }
    }

    /// Cascades, closest first
    pub fn cascades(&self) -> &[ShadowCascade] {
        &self.cascades
    }

    /// Number of cascades
    pub fn len(&self) -> usize {
        self.cascades.len()
    }

    /// Whether shadows have no cascades at all
    pub fn is_empty(&self) -> bool {
        self.cascades.is_empty()
    }

    /// Recompute splits and light matrices
    ///
    /// `closest`/`furthest` are the object distance bounds gathered during
    /// submission; values outside the camera clip range (or the sentinels of
    /// an empty scene) fall back to the camera near/far planes.
    pub fn update(&mut self, camera: &Camera, light: &LightModel, closest: f32, furthest: f32) {
        let near = if closest.is_finite() && closest >= camera.near && closest <= camera.far {
            closest
        } else {
            camera.near
        };
        let far = if furthest > near && furthest <= camera.far {
            furthest
        } else {
            camera.far
        };

        let splits = practical_splits(near, far, self.cascades.len(), self.split_lambda);
        let sun = light.sun_direction_normalized();

        let mut previous_end = near;
        for (cascade, &split_far) in self.cascades.iter_mut().zip(&splits) {
            cascade.near = previous_end;
            cascade.far = split_far;
            previous_end = split_far;

            let corners = camera.frustum_slice_corners(cascade.near, cascade.far);
            let (view_proj, width) = fit_light_projection(&corners, sun, self.caster_padding);
            cascade.light_view_proj = view_proj;
            cascade.unit_to_texel = width / cascade.resolution;
            cascade.frustum = Frustum::from_matrix(&view_proj);
        }

        log::trace!(
            "Shadow cascades over [{:.2}, {:.2}]: {:?}",
            near,
            far,
            splits
        );
    }

    /// Light matrices of every cascade
    pub fn light_matrices(&self) -> Vec<Mat4> {
        self.cascades.iter().map(|c| c.light_view_proj).collect()
    }

    /// Far split distance of every cascade
    pub fn far_distances(&self) -> Vec<f32> {
        self.cascades.iter().map(|c| c.far).collect()
    }

    /// Texel size of every cascade
    pub fn unit_to_texel(&self) -> Vec<f32> {
        self.cascades.iter().map(|c| c.unit_to_texel).collect()
    }
}

/// Orthographic light projection enclosing `corners`
///
/// Returns the view-projection and the width of the fitted box. The near
/// plane is pulled towards the light by `padding` so casters between the
/// light and the slice still land in the depth map.
fn fit_light_projection(corners: &[Vec3; 8], sun: Vec3, padding: f32) -> (Mat4, f32) {
    let center = corners.iter().fold(Vec3::zeros(), |acc, c| acc + c) / 8.0;
    let radius = corners
        .iter()
        .map(|c| (c - center).norm())
        .fold(0.0f32, f32::max);

    // Any up vector not parallel to the light works for an orthographic view
    let up = if sun.y.abs() > 0.99 { Vec3::z() } else { Vec3::y() };
    let eye = center - sun * radius.max(1.0);
    let light_view = Mat4::look_at(eye, center, up);

    let mut min = Vec3::repeat(f32::MAX);
    let mut max = Vec3::repeat(f32::MIN);
    for corner in corners {
        let p = light_view.project_point(corner);
        min = min.inf(&p);
        max = max.sup(&p);
    }

    // View space looks down -z, so depth = -z
    let near = -max.z - padding;
    let far = -min.z;
    let projection = Mat4::orthographic(min.x, max.x, min.y, max.y, near, far);

    (projection * light_view, max.x - min.x)
}
