//! # Camera and view frustum
//!
//! Perspective camera used by the batch renderer plus the frustum helpers
//! the shadow cascades and visibility culling need.
//!
//! The camera is right-handed with Y up and produces OpenGL style clip space
//! (z in [-1, 1]).

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3, Vec4};
use crate::world::{Aabb, Ray, Shape};

/// 3D perspective camera
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera looks at
    pub target: Vec3,
    /// Up vector
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    /// Width over height
    pub aspect: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
}

impl Camera {
    /// Create a perspective camera looking at the origin
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov: utils::deg_to_rad(fov_degrees),
            aspect,
            near,
            far,
        }
    }

    /// Point the camera at `target`
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
        log::trace!("Camera look_at updated - target: {:?}, up: {:?}", target, up);
    }

    /// Update the aspect ratio after a resize
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > 0.01 {
            log::debug!("Camera aspect ratio changed: {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// Normalized view direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    /// World to view space
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// View to clip space
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective(self.fov, self.aspect, self.near, self.far)
    }

    /// World to clip space
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Frustum of the full view volume
    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(&self.view_projection_matrix())
    }

    /// World-space corners of the view volume between `near` and `far`
    ///
    /// The first four corners lie on the near plane, the last four on the
    /// far plane, both in the order (-x,-y), (+x,-y), (+x,+y), (-x,+y).
    pub fn frustum_slice_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let projection = Mat4::perspective(self.fov, self.aspect, near, far);
        let inverse = match (projection * self.view_matrix()).try_inverse() {
            Some(inverse) => inverse,
            None => {
                log::warn!("Camera view-projection is not invertible; using identity corners");
                Mat4::identity()
            }
        };

        let mut corners = [Vec3::zeros(); 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let z = if i < 4 { -1.0 } else { 1.0 };
            let (x, y) = match i % 4 {
                0 => (-1.0, -1.0),
                1 => (1.0, -1.0),
                2 => (1.0, 1.0),
                _ => (-1.0, 1.0),
            };
            *corner = inverse.project_point(&Vec3::new(x, y, z));
        }
        corners
    }

    /// Ray from the camera through a point in normalized device coordinates
    pub fn screen_to_world_ray(&self, screen_x: f32, screen_y: f32) -> Option<Ray> {
        let inverse = self.view_projection_matrix().try_inverse()?;

        let unproject = |z: f32| {
            let h = inverse * Vec4::new(screen_x, screen_y, z, 1.0);
            Vec3::new(h.x / h.w, h.y / h.w, h.z / h.w)
        };
        let world_near = unproject(-1.0);
        let world_far = unproject(1.0);

        Some(Ray::new(self.position, world_far - world_near))
    }

    /// Area of the plane `z = plane_z` visible to the camera, for 2D maps
    ///
    /// Returns `None` when an edge of the view never reaches the plane.
    pub fn view_bounds(&self, plane_z: f32) -> Option<Aabb> {
        let corners = self.frustum_slice_corners(self.near, self.far);
        let mut min = Vec3::new(f32::MAX, f32::MAX, plane_z);
        let mut max = Vec3::new(f32::MIN, f32::MIN, plane_z);

        for i in 0..4 {
            let start = corners[i];
            let end = corners[i + 4];
            let dz = end.z - start.z;
            if dz.abs() <= f32::EPSILON {
                return None;
            }
            let t = (plane_z - start.z) / dz;
            if !(0.0..=1.0).contains(&t) {
                return None;
            }
            let hit = start + (end - start) * t;
            min.x = min.x.min(hit.x);
            min.y = min.y.min(hit.y);
            max.x = max.x.max(hit.x);
            max.y = max.y.max(hit.y);
        }

        Some(Aabb::new(min, max))
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 3.0, 3.0),
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

/// Six clip planes extracted from a view-projection matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract the planes of `view_projection` (normals point inwards)
    pub fn from_matrix(view_projection: &Mat4) -> Self {
        let row = |i: usize| {
            let r = view_projection.row(i);
            Vec4::new(r[0], r[1], r[2], r[3])
        };
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let mut planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2];
        for plane in &mut planes {
            let length = plane.xyz().norm();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }
        Self { planes }
    }

    /// Whether a sphere is inside or touching the frustum
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.xyz().dot(&center) + plane.w >= -radius)
    }
}

impl Shape for Frustum {
    /// Conservative: a box is rejected only when it lies fully behind one plane
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.xyz();
            let farthest = Vec3::new(
                if normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            normal.dot(&farthest) + plane.w >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> Camera {
        let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 60.0, 1.0, 1.0, 100.0);
        camera.look_at(Vec3::zeros(), Vec3::y());
        camera
    }

    #[test]
    fn test_slice_corners_lie_on_planes() {
        let camera = camera();
        let corners = camera.frustum_slice_corners(2.0, 20.0);
        for corner in &corners[..4] {
            assert_relative_eq!(corner.z, 8.0, epsilon = 1e-3);
        }
        for corner in &corners[4..] {
            assert_relative_eq!(corner.z, -10.0, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_frustum_sphere_culling() {
        let frustum = camera().frustum();
        assert!(frustum.intersects_sphere(Vec3::zeros(), 1.0));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 20.0), 1.0));
        assert!(!frustum.intersects_sphere(Vec3::new(500.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn test_frustum_box_culling() {
        let frustum = camera().frustum();
        let near_box = Aabb::from_center_extents(Vec3::new(0.0, 0.0, 3.0), Vec3::repeat(0.5));
        let behind = Aabb::from_center_extents(Vec3::new(0.0, 0.0, 15.0), Vec3::repeat(0.5));
        let beside = Aabb::from_center_extents(Vec3::new(300.0, 0.0, 0.0), Vec3::repeat(0.5));
        let straddling = Aabb::new(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(1.0, 1.0, 20.0));

        assert!(frustum.intersects_aabb(&near_box));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&beside));
        assert!(frustum.intersects_aabb(&straddling));
    }

    #[test]
    fn test_center_ray_points_forward() {
        let camera = camera();
        let ray = camera.screen_to_world_ray(0.0, 0.0).unwrap();
        assert_relative_eq!(ray.direction, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-4);
    }

    #[test]
    fn test_view_bounds_centered_on_target() {
        let bounds = camera().view_bounds(0.0).unwrap();
        assert_relative_eq!(bounds.center().x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(bounds.center().y, 0.0, epsilon = 1e-3);
        assert!(bounds.extents().x > 1.0);
    }
}
