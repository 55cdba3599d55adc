//! Material parameter sets.
//!
//! Every drawable piece of an object carries a [`ParamSet`]. Appearance
//! controls never touch GPU state directly: they write named parameters here
//! and the renderer reads them when building the frame. Which parameter a
//! control writes depends on the object kind (see `registry`).

use std::collections::HashMap;

/// Point-cloud opacity.
pub const OPACITY: &str = "opacity";
/// Per-material alpha on mesh sub-materials.
pub const ALPHA: &str = "alpha";
/// Point-cloud brightness multiplier.
pub const BRIGHTNESS: &str = "brightness";
/// Point-cloud point size in pixels.
pub const POINT_SIZE: &str = "pointSize";
/// Base color of a mesh material.
pub const BASE_COLOR: &str = "baseColor";

/// Runtime value for a material parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl Default for ParamValue {
    fn default() -> Self {
        ParamValue::Float(0.0)
    }
}

impl ParamValue {
    /// Get as float, returning 0.0 for non-float types.
    pub fn as_float(&self) -> f32 {
        match self {
            ParamValue::Float(v) => *v,
            _ => 0.0,
        }
    }

    /// Get as vec4, padding with zeros for smaller types.
    pub fn as_vec4(&self) -> [f32; 4] {
        match self {
            ParamValue::Float(v) => [*v, 0.0, 0.0, 0.0],
            ParamValue::Vec3(v) => [v[0], v[1], v[2], 0.0],
            ParamValue::Vec4(v) => *v,
        }
    }
}

/// Named parameters of one material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSet {
    values: HashMap<String, ParamValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_float(mut self, name: &str, value: f32) -> Self {
        self.set_float(name, value);
        self
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.values.insert(name.to_string(), ParamValue::Float(value));
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Float value of `name`, or `default` when unset.
    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        self.values.get(name).map(ParamValue::as_float).unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Shading program of a mesh sub-material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MaterialKind {
    #[default]
    Standard,
    /// Environment-reflective shading. Enabling it also qualifies the object
    /// for the edge-particle halo.
    Reflective,
}

/// Blend modes for pipelines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Standard alpha blending.
    #[default]
    AlphaBlend,
    /// Additive blending (particles).
    Additive,
}

impl BlendMode {
    /// Convert to wgpu blend state.
    pub fn to_blend_state(&self) -> wgpu::BlendState {
        match self {
            BlendMode::AlphaBlend => wgpu::BlendState::ALPHA_BLENDING,
            BlendMode::Additive => wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::SrcAlpha,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            },
        }
    }
}

/// A mesh sub-material: its program and parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialInstance {
    pub kind: MaterialKind,
    pub params: ParamSet,
    /// Set when alpha < 1 so the renderer sorts it with transparent draws.
    pub transparent: bool,
}

impl MaterialInstance {
    pub fn standard(base_color: [f32; 4]) -> Self {
        let mut params = ParamSet::new().with_float(ALPHA, 1.0);
        params.set(BASE_COLOR, ParamValue::Vec4(base_color));
        Self {
            kind: MaterialKind::Standard,
            params,
            transparent: false,
        }
    }

    /// Swap the program, keeping the base color. Alpha is reset to 1 like a
    /// freshly created material; the registry re-applies the object's opacity.
    pub fn replaced_with(&self, kind: MaterialKind) -> Self {
        let mut next = Self::standard(self.base_color());
        next.kind = kind;
        next
    }

    pub fn base_color(&self) -> [f32; 4] {
        self.params
            .get(BASE_COLOR)
            .map(ParamValue::as_vec4)
            .unwrap_or([1.0, 1.0, 1.0, 1.0])
    }

    pub fn alpha(&self) -> f32 {
        self.params.float_or(ALPHA, 1.0)
    }
}

/// Parameter set for a point cloud with default appearance.
pub fn point_cloud_params() -> ParamSet {
    ParamSet::new()
        .with_float(OPACITY, 1.0)
        .with_float(BRIGHTNESS, 1.0)
        .with_float(POINT_SIZE, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_value_conversion() {
        assert_eq!(ParamValue::Float(0.5).as_float(), 0.5);
        assert_eq!(ParamValue::Vec3([1.0, 2.0, 3.0]).as_vec4(), [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(ParamValue::Vec4([1.0; 4]).as_float(), 0.0);
    }

    #[test]
    fn test_point_cloud_defaults() {
        let params = point_cloud_params();
        assert_eq!(params.float_or(OPACITY, 0.0), 1.0);
        assert_eq!(params.float_or(POINT_SIZE, 0.0), 2.0);
        assert!(!params.contains(ALPHA));
    }

    #[test]
    fn test_replace_keeps_color() {
        let mut material = MaterialInstance::standard([0.2, 0.4, 0.6, 1.0]);
        material.params.set_float(ALPHA, 0.3);
        let reflective = material.replaced_with(MaterialKind::Reflective);
        assert_eq!(reflective.kind, MaterialKind::Reflective);
        assert_eq!(reflective.base_color(), [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(reflective.alpha(), 1.0);
    }
}
