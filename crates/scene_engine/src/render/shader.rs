//! Shader program registry
//!
//! Programs are registered by name together with their preprocessor
//! variants. Lookups by name fall back to the default program so a missing
//! shader asset degrades the look of a frame instead of failing it.

use std::collections::HashMap;

use super::backend::{ShaderHandle, UniformValue};
use super::error::{RenderError, RenderResult};
use crate::foundation::math::{Color, Mat4, Vec3};

/// Uniform names shared by the mesh shaders
pub mod uniforms {
    /// Per-instance model matrix
    pub const MODEL_MATRIX: &str = "modelMatrix";
    /// Camera view-projection matrix
    pub const VIEW_PROJECTION: &str = "viewProjection";
    /// Camera world position
    pub const CAMERA_POSITION: &str = "cameraPosition";
    /// Normalized sun direction
    pub const SUN_DIRECTION: &str = "sunDirection";
    /// Ambient light color
    pub const AMBIENT_COLOR: &str = "ambientColor";
    /// Ambient light strength
    pub const AMBIENT_STRENGTH: &str = "ambientLightStrength";
    /// Diffuse light strength
    pub const DIFFUSE_STRENGTH: &str = "diffuseStrength";
    /// Shadow opacity
    pub const SHADOW_OPACITY: &str = "shadowOpacity";
    /// Whether shadow maps are sampled (0 or 1)
    pub const SHADOWS_ENABLED: &str = "shadowsEnabled";
    /// Light-space matrix per cascade
    pub const CASCADE_LIGHT_PROJ: &str = "cascadeLightProj";
    /// Far split distance per cascade
    pub const CASCADE_FAR: &str = "cascadeFar";
    /// World units covered by one shadow texel, per cascade
    pub const CASCADE_UNIT_TO_TEXEL: &str = "cascadeUnitToTexel";
    /// Cascade being rendered, -1 in the main pass
    pub const RENDERING_SHADOW_MAP: &str = "renderingShadowMap";
    /// Material diffuse color
    pub const DIFFUSE_COLOR: &str = "diffuseColor";
    /// Per-object tint
    pub const OBJECT_TINT: &str = "objectTint";
    /// Skinning matrices
    pub const BONE_MATRICES: &str = "boneMatrices";
    /// Lighting mode (0 full, 1 no ambient, 2 no shadow, 3 neither)
    pub const LIGHT_MODE: &str = "lightMode";
    /// Sampler slot of the diffuse texture
    pub const DIFFUSE_TEXTURE: &str = "diffuseTexture";
    /// Sampler slot prefix of the cascade depth textures
    pub const SHADOW_MAP_TEXTURE: &str = "shadowMapTexture";
}

/// Texture slot of the diffuse texture; cascade textures follow it
pub const DIFFUSE_TEXTURE_SLOT: u32 = 0;

/// Preprocessor variant of a shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVariant {
    /// Skinned meshes
    Skinned,
    /// Depth-only rendering into a shadow cascade
    ShadowMap,
    /// Skinned meshes rendered into a shadow cascade
    SkinnedShadowMap,
}

impl ShaderVariant {
    /// Preprocessor tag the variant is compiled with
    pub fn tag(self) -> &'static str {
        match self {
            ShaderVariant::Skinned => "SKINNED",
            ShaderVariant::ShadowMap => "SHADOW_MAP",
            ShaderVariant::SkinnedShadowMap => "SKINNED_SHADOW_MAP",
        }
    }

    /// Variant for a shadow pass over a mesh with or without bones
    pub fn shadow_for(skinned: bool) -> Self {
        if skinned {
            ShaderVariant::SkinnedShadowMap
        } else {
            ShaderVariant::ShadowMap
        }
    }
}

/// Owned uniform value, for storing uniforms past the call that set them
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedUniform {
    /// Integer
    Int(i32),
    /// Float
    Float(f32),
    /// Vector
    Vec3(Vec3),
    /// Color
    Color(Color),
    /// Matrix
    Mat4(Mat4),
    /// Matrix array
    Mat4Array(Vec<Mat4>),
    /// Float array
    FloatArray(Vec<f32>),
}

impl OwnedUniform {
    /// Borrow as a value that can be passed to a backend
    pub fn as_value(&self) -> UniformValue<'_> {
        match self {
            OwnedUniform::Int(v) => UniformValue::Int(*v),
            OwnedUniform::Float(v) => UniformValue::Float(*v),
            OwnedUniform::Vec3(v) => UniformValue::Vec3(*v),
            OwnedUniform::Color(v) => UniformValue::Color(*v),
            OwnedUniform::Mat4(v) => UniformValue::Mat4(*v),
            OwnedUniform::Mat4Array(v) => UniformValue::Mat4Array(v),
            OwnedUniform::FloatArray(v) => UniformValue::FloatArray(v),
        }
    }
}

impl From<UniformValue<'_>> for OwnedUniform {
    fn from(value: UniformValue<'_>) -> Self {
        match value {
            UniformValue::Int(v) => Self::Int(v),
            UniformValue::Float(v) => Self::Float(v),
            UniformValue::Vec3(v) => Self::Vec3(v),
            UniformValue::Color(v) => Self::Color(v),
            UniformValue::Mat4(v) => Self::Mat4(v),
            UniformValue::Mat4Array(v) => Self::Mat4Array(v.to_vec()),
            UniformValue::FloatArray(v) => Self::FloatArray(v.to_vec()),
        }
    }
}

/// A named program and its compiled variants
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    name: String,
    handle: ShaderHandle,
    variants: HashMap<ShaderVariant, ShaderHandle>,
}

impl ShaderProgram {
    /// Program name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle of the base program
    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    /// Handle of a variant, falling back to the base program
    pub fn variant(&self, variant: ShaderVariant) -> ShaderHandle {
        self.variants.get(&variant).copied().unwrap_or(self.handle)
    }

    /// Whether a dedicated variant was compiled
    pub fn has_variant(&self, variant: ShaderVariant) -> bool {
        self.variants.contains_key(&variant)
    }
}

/// Registry of shader programs by name
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    programs: HashMap<String, ShaderProgram>,
    by_handle: HashMap<ShaderHandle, String>,
    default_program: String,
}

impl ShaderLibrary {
    /// Create a library whose default program is `name`
    pub fn new(default_name: impl Into<String>, handle: ShaderHandle) -> Self {
        let mut library = Self {
            programs: HashMap::new(),
            by_handle: HashMap::new(),
            default_program: default_name.into(),
        };
        let name = library.default_program.clone();
        library.register(name, handle);
        library
    }

    /// Register (or replace) a program
    pub fn register(&mut self, name: impl Into<String>, handle: ShaderHandle) -> &mut Self {
        let name = name.into();
        if let Some(previous) = self.programs.remove(&name) {
            self.by_handle.remove(&previous.handle);
            for variant in previous.variants.values() {
                self.by_handle.remove(variant);
            }
        }
        self.by_handle.insert(handle, name.clone());
        self.programs.insert(
            name.clone(),
            ShaderProgram {
                name,
                handle,
                variants: HashMap::new(),
            },
        );
        self
    }

    /// Register a compiled variant of an existing program
    pub fn register_variant(
        &mut self,
        name: &str,
        variant: ShaderVariant,
        handle: ShaderHandle,
    ) -> RenderResult<()> {
        let program = self.programs.get_mut(name).ok_or_else(|| {
            RenderError::ResourceCreationFailed(format!(
                "cannot add {} variant to unknown shader '{}'",
                variant.tag(),
                name
            ))
        })?;
        program.variants.insert(variant, handle);
        self.by_handle.insert(handle, name.to_string());
        Ok(())
    }

    /// Look up a program by name
    pub fn get(&self, name: &str) -> Option<&ShaderProgram> {
        self.programs.get(name)
    }

    /// Program owning `handle`, whether it is a base program or a variant
    pub fn program_of(&self, handle: ShaderHandle) -> Option<&ShaderProgram> {
        self.by_handle.get(&handle).and_then(|name| self.programs.get(name))
    }

    /// The default program
    ///
    /// Always present: it is registered on construction and `register`
    /// only ever replaces it.
    pub fn default_program(&self) -> &ShaderProgram {
        match self.programs.get(&self.default_program) {
            Some(program) => program,
            None => unreachable!("default shader program is never removed"),
        }
    }

    /// Program by name, or the default program when it is missing
    pub fn resolve(&self, name: &str) -> (&ShaderProgram, bool) {
        match self.programs.get(name) {
            Some(program) => (program, true),
            None => (self.default_program(), false),
        }
    }

    /// Shadow pass handle for a main pass handle
    pub fn shadow_variant(&self, handle: ShaderHandle, skinned: bool) -> ShaderHandle {
        self.program_of(handle)
            .map_or(handle, |program| program.variant(ShaderVariant::shadow_for(skinned)))
    }

    /// Number of registered programs
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether only the default program is registered
    pub fn is_empty(&self) -> bool {
        self.programs.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> ShaderLibrary {
        let mut library = ShaderLibrary::new("default", ShaderHandle(1));
        library.register_variant("default", ShaderVariant::Skinned, ShaderHandle(2)).unwrap();
        library.register_variant("default", ShaderVariant::ShadowMap, ShaderHandle(3)).unwrap();
        library.register("water", ShaderHandle(10));
        library
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let library = library();
        let (program, found) = library.resolve("missing");
        assert!(!found);
        assert_eq!(program.handle(), ShaderHandle(1));

        let (water, found) = library.resolve("water");
        assert!(found);
        assert_eq!(water.handle(), ShaderHandle(10));
    }

    #[test]
    fn test_variant_fallback() {
        let library = library();
        let default = library.default_program();
        assert_eq!(default.variant(ShaderVariant::Skinned), ShaderHandle(2));
        assert_eq!(default.variant(ShaderVariant::SkinnedShadowMap), ShaderHandle(1));
        assert_eq!(library.shadow_variant(ShaderHandle(1), false), ShaderHandle(3));
        assert_eq!(library.shadow_variant(ShaderHandle(2), false), ShaderHandle(3));
        assert_eq!(library.shadow_variant(ShaderHandle(10), true), ShaderHandle(10));
    }

    #[test]
    fn test_variant_of_unknown_program_fails() {
        let mut library = library();
        assert!(library.register_variant("nope", ShaderVariant::Skinned, ShaderHandle(4)).is_err());
    }

    #[test]
    fn test_owned_uniform_round_trip() {
        let bones = [Mat4::identity(); 2];
        let owned = OwnedUniform::from(UniformValue::Mat4Array(&bones));
        assert_eq!(owned.as_value(), UniformValue::Mat4Array(&bones));
    }
}
