//! Math utilities and types
//!
//! Provides fundamental math types for 3D graphics and game development.

use serde::{Deserialize, Serialize};

pub use nalgebra::{
    Vector3, Vector4,
    Matrix4,
    Quaternion,
    Unit,
};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Linear RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Red channel
    pub r: f32,
    /// Green channel
    pub g: f32,
    /// Blue channel
    pub b: f32,
    /// Alpha channel (1.0 = fully opaque)
    pub a: f32,
}

impl Color {
    /// Opaque white, also the neutral tint
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    /// Create a color from all four channels
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    /// Whether the alpha channel requires blending
    pub fn is_translucent(&self) -> bool {
        self.a < 1.0
    }

    /// Component-wise product, used to apply a tint on top of a base color
    pub fn modulate(&self, other: &Color) -> Color {
        Color::rgba(self.r * other.r, self.g * other.g, self.b * other.b, self.a * other.a)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Largest scale factor, used to scale bounding spheres
    pub fn max_scale(&self) -> f32 {
        self.scale.x.abs().max(self.scale.y.abs()).max(self.scale.z.abs())
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Linear interpolation
    pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
        a + (b - a) * t
    }
}

/// Extension trait for Mat4 with additional convenience methods
pub trait Mat4Ext {
    /// Create an OpenGL style perspective projection matrix (clip z in [-1, 1])
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Create an OpenGL style orthographic projection matrix
    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4;

    /// Create a right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Transform a point, including the perspective divide
    fn project_point(&self, point: &Vec3) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_perspective(aspect, fov_y, near, far)
    }

    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_orthographic(left, right, bottom, top, near, far)
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(eye), &Point3::from(target), &up)
    }

    fn project_point(&self, point: &Vec3) -> Vec3 {
        let h = self * Vec4::new(point.x, point.y, point.z, 1.0);
        if h.w.abs() > f32::EPSILON {
            Vec3::new(h.x / h.w, h.y / h.w, h.z / h.w)
        } else {
            Vec3::new(h.x, h.y, h.z)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_color_translucency() {
        assert!(!Color::WHITE.is_translucent());
        assert!(Color::rgba(1.0, 0.0, 0.0, 0.5).is_translucent());
    }

    #[test]
    fn test_color_modulate() {
        let tinted = Color::rgb(0.5, 1.0, 1.0).modulate(&Color::rgba(1.0, 0.5, 1.0, 0.25));
        assert_relative_eq!(tinted.r, 0.5);
        assert_relative_eq!(tinted.g, 0.5);
        assert_relative_eq!(tinted.a, 0.25);
    }

    #[test]
    fn test_look_at_moves_eye_to_origin() {
        let eye = Vec3::new(0.0, 2.0, 5.0);
        let view = Mat4::look_at(eye, Vec3::zeros(), Vec3::y());
        let transformed = view.project_point(&eye);
        assert_relative_eq!(transformed.norm(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_transform_matrix_translation() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        let point = transform.to_matrix().project_point(&Vec3::zeros());
        assert_relative_eq!(point, Vec3::new(1.0, 2.0, 3.0));
    }
}
