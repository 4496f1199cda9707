//! Bounding volumes and query shapes
//!
//! Every query shape only needs to answer one question: does it touch a
//! given axis-aligned box. The world tree uses that to prune subtrees and
//! the query engine uses it to filter individual objects, so any type
//! implementing [`Shape`] can drive a spatial query.
//!
//! 2D content uses the same types with a zero-thickness z extent.

use crate::foundation::math::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-Aligned Bounding Box for spatial queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents (half-size)
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Flat rectangle on the z = 0 plane, for 2D maps
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            min: Vec3::new(x, y, 0.0),
            max: Vec3::new(x + width, y + height, 0.0),
        }
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Radius of the sphere enclosing this box
    pub fn bounding_radius(&self) -> f32 {
        self.extents().norm()
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    /// Check if `other` lies completely inside this AABB
    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.x >= self.min.x && other.max.x <= self.max.x &&
        other.min.y >= self.min.y && other.max.y <= self.max.y &&
        other.min.z >= self.min.z && other.max.z <= self.max.z
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Test ray intersection with this AABB using slab method
    /// Returns the distance to the entry point if the ray intersects, None otherwise
    pub fn intersect_ray(&self, ray_origin: Vec3, ray_dir: Vec3) -> Option<f32> {
        let mut tmin = f32::NEG_INFINITY;
        let mut tmax = f32::INFINITY;

        for axis in 0..3 {
            let (min, max, origin, dir) = (self.min[axis], self.max[axis], ray_origin[axis], ray_dir[axis]);
            if dir == 0.0 {
                // Parallel to this slab: inside it or never
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }
            let t1 = (min - origin) / dir;
            let t2 = (max - origin) / dir;
            tmin = tmin.max(t1.min(t2));
            tmax = tmax.min(t1.max(t2));
        }

        if tmax >= tmin && tmax >= 0.0 {
            Some(tmin.max(0.0))
        } else {
            None
        }
    }

    /// Closest point inside the box to `point`
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        Vec3::new(
            point.x.clamp(self.min.x, self.max.x),
            point.y.clamp(self.min.y, self.max.y),
            point.z.clamp(self.min.z, self.max.z),
        )
    }
}

/// Anything a spatial query can be filtered by
pub trait Shape {
    /// Whether the shape touches `aabb`
    fn intersects_aabb(&self, aabb: &Aabb) -> bool;
}

impl<S: Shape + ?Sized> Shape for &S {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        (**self).intersects_aabb(aabb)
    }
}

/// Shape that matches everything; used by the unfiltered query variants
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShape;

impl Shape for NoShape {
    #[inline]
    fn intersects_aabb(&self, _aabb: &Aabb) -> bool {
        true
    }
}

impl Shape for Aabb {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.intersects(aabb)
    }
}

/// Sphere (or circle on a 2D map)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Center point
    pub center: Vec3,
    /// Radius
    pub radius: f32,
}

impl Sphere {
    /// Create a new sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

impl Shape for Sphere {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let closest = aabb.closest_point(self.center);
        (closest - self.center).norm_squared() <= self.radius * self.radius
    }
}

/// Single point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point(pub Vec3);

impl Shape for Point {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.contains_point(self.0)
    }
}

/// Ray or segment, e.g. for mouse picking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Start of the ray
    pub origin: Vec3,
    /// Normalized direction
    pub direction: Vec3,
    /// Length of the segment; `f32::INFINITY` for an unbounded ray
    pub max_distance: f32,
}

impl Ray {
    /// Create an unbounded ray
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
            max_distance: f32::INFINITY,
        }
    }

    /// Limit the ray to a segment of the given length
    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = max_distance;
        self
    }
}

impl Shape for Ray {
    fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.intersect_ray(self.origin, self.direction)
            .is_some_and(|t| t <= self.max_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_aabb_contains_point() {
        let aabb = unit_box();
        assert!(aabb.contains_point(Vec3::zeros()));
        assert!(aabb.contains_point(Vec3::new(0.5, 0.5, 0.5)));
        assert!(!aabb.contains_point(Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_contains_box() {
        let outer = unit_box();
        let inner = Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.5));
        let straddling = Aabb::from_center_extents(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.5, 0.5, 0.5));
        assert!(outer.contains(&inner));
        assert!(!outer.contains(&straddling));
        assert!(outer.intersects(&straddling));
    }

    #[test]
    fn test_aabb_intersects() {
        let aabb1 = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 2.0, 2.0));
        let aabb2 = Aabb::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(3.0, 3.0, 3.0));
        let aabb3 = Aabb::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(7.0, 7.0, 7.0));

        assert!(aabb1.intersects(&aabb2));
        assert!(!aabb1.intersects(&aabb3));
    }

    #[test]
    fn test_flat_rects_intersect() {
        let a = Aabb::rect(0.0, 0.0, 10.0, 10.0);
        let b = Aabb::rect(5.0, 5.0, 10.0, 10.0);
        let c = Aabb::rect(20.0, 0.0, 1.0, 1.0);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_sphere_shape() {
        let aabb = unit_box();
        assert!(Sphere::new(Vec3::new(2.0, 0.0, 0.0), 1.5).intersects_aabb(&aabb));
        assert!(!Sphere::new(Vec3::new(3.0, 0.0, 0.0), 1.5).intersects_aabb(&aabb));
    }

    #[test]
    fn test_ray_shape_respects_max_distance() {
        let aabb = Aabb::from_center_extents(Vec3::new(10.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        let ray = Ray::new(Vec3::zeros(), Vec3::x());
        assert!(ray.intersects_aabb(&aabb));
        assert!(!ray.with_max_distance(5.0).intersects_aabb(&aabb));
        assert!(!Ray::new(Vec3::zeros(), -Vec3::x()).intersects_aabb(&aabb));
    }

    #[test]
    fn test_parallel_ray_on_slab_face() {
        let aabb = unit_box();
        // Travels along +X with y and z exactly on the min faces
        let origin = Vec3::new(-5.0, aabb.min.y, aabb.min.z);
        assert_eq!(aabb.intersect_ray(origin, Vec3::x()), Some(4.0));

        let outside = Vec3::new(-5.0, aabb.min.y - 0.01, 0.0);
        assert_eq!(aabb.intersect_ray(outside, Vec3::x()), None);

        // Pointing away along a flat axis still misses
        assert_eq!(aabb.intersect_ray(Vec3::new(0.0, 0.0, 5.0), Vec3::z()), None);
    }

    #[test]
    fn test_no_shape_matches_everything() {
        assert!(NoShape.intersects_aabb(&unit_box()));
    }
}
