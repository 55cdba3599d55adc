//! External controls to viewer state.
//!
//! Controls arrive as `(key, value)` pairs from the host's panel, outside the
//! frame loop. Each is applied to the registry, the particle engine or the AR
//! session; values equal to the last applied one are skipped so a panel that
//! re-sends its whole state every tick costs nothing. Anything that needs the
//! render driver or an async step is returned as a [`SyncEffect`] for the
//! viewer to carry out.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ar::ArSession;
use crate::edge_particles::EdgeParticleEngine;
use crate::error::SyncError;
use crate::material::MaterialKind;
use crate::particle::ParticleParam;
use crate::registry::{Axis, ObjectRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectProperty {
    Position(Axis),
    Rotation(Axis),
    Opacity,
    Visible,
    Brightness,
    PointSize,
    Reflective,
}

impl ObjectProperty {
    const SIMPLE: [(&'static str, ObjectProperty); 5] = [
        ("opacity", ObjectProperty::Opacity),
        ("visible", ObjectProperty::Visible),
        ("brightness", ObjectProperty::Brightness),
        ("pointSize", ObjectProperty::PointSize),
        ("reflective", ObjectProperty::Reflective),
    ];

    fn suffix(&self) -> String {
        match self {
            ObjectProperty::Position(axis) => format!("position.{}", axis.name()),
            ObjectProperty::Rotation(axis) => format!("rotation.{}", axis.name()),
            other => Self::SIMPLE
                .iter()
                .find(|(_, p)| p == other)
                .map(|(s, _)| s.to_string())
                .unwrap_or_default(),
        }
    }

    /// Split `<name>.<property>` where the name itself may contain dots.
    fn split(rest: &str) -> Option<(&str, ObjectProperty)> {
        for (suffix, property) in Self::SIMPLE {
            if let Some(name) = rest.strip_suffix(suffix).and_then(|r| r.strip_suffix('.')) {
                return Some((name, property));
            }
        }
        let (head, axis) = rest.rsplit_once('.')?;
        let axis = Axis::from_str(axis).ok()?;
        let (name, kind) = head.rsplit_once('.')?;
        match kind {
            "position" => Some((name, ObjectProperty::Position(axis))),
            "rotation" => Some((name, ObjectProperty::Rotation(axis))),
            _ => None,
        }
    }
}

/// Address of one control.
///
/// String forms: `object:<name>.<property>` (`position.x`, `rotation.y`,
/// `opacity`, `visible`, `brightness`, `pointSize`, `reflective`),
/// `particles.<param>`, `particles.enabled`, `particles.followCamera`,
/// `particles.edgeDebug`, `ar.enabled`, `ar.parallaxSensitivity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlKey {
    Object { name: String, property: ObjectProperty },
    Particle(ParticleParam),
    ParticlesEnabled,
    FollowCamera,
    EdgeDebug,
    ArMode,
    ParallaxSensitivity,
}

impl ControlKey {
    pub fn object(name: impl Into<String>, property: ObjectProperty) -> Self {
        ControlKey::Object {
            name: name.into(),
            property,
        }
    }
}

impl FromStr for ControlKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || SyncError::UnknownKey(s.to_string());

        if let Some(rest) = s.strip_prefix("object:") {
            let (name, property) = ObjectProperty::split(rest).ok_or_else(unknown)?;
            if name.is_empty() {
                return Err(unknown());
            }
            return Ok(ControlKey::object(name, property));
        }

        match s {
            "particles.enabled" => Ok(ControlKey::ParticlesEnabled),
            "particles.followCamera" => Ok(ControlKey::FollowCamera),
            "particles.edgeDebug" => Ok(ControlKey::EdgeDebug),
            "ar.enabled" => Ok(ControlKey::ArMode),
            "ar.parallaxSensitivity" => Ok(ControlKey::ParallaxSensitivity),
            other => other
                .strip_prefix("particles.")
                .and_then(ParticleParam::from_name)
                .map(ControlKey::Particle)
                .ok_or_else(unknown),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlKey::Object { name, property } => write!(f, "object:{}.{}", name, property.suffix()),
            ControlKey::Particle(p) => write!(f, "particles.{}", p.name()),
            ControlKey::ParticlesEnabled => write!(f, "particles.enabled"),
            ControlKey::FollowCamera => write!(f, "particles.followCamera"),
            ControlKey::EdgeDebug => write!(f, "particles.edgeDebug"),
            ControlKey::ArMode => write!(f, "ar.enabled"),
            ControlKey::ParallaxSensitivity => write!(f, "ar.parallaxSensitivity"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Number(f32),
    Flag(bool),
}

impl ControlValue {
    fn number(&self, key: &ControlKey) -> Result<f32, SyncError> {
        match self {
            ControlValue::Number(v) => Ok(*v),
            ControlValue::Flag(_) => Err(SyncError::WrongType {
                key: key.to_string(),
                expected: "number",
            }),
        }
    }

    fn flag(&self, key: &ControlKey) -> Result<bool, SyncError> {
        match self {
            ControlValue::Flag(v) => Ok(*v),
            ControlValue::Number(_) => Err(SyncError::WrongType {
                key: key.to_string(),
                expected: "boolean",
            }),
        }
    }
}

/// Follow-up work the viewer performs after a control was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    None,
    /// Value equal to the last applied one; nothing was touched.
    Unchanged,
    ActivateParticles(String),
    DeactivateParticles(String),
    SetParticlesEnabled(bool),
    SetArMode(bool),
}

/// State a control can write to directly.
pub struct SyncTargets<'a> {
    pub registry: &'a mut ObjectRegistry,
    pub particles: &'a mut EdgeParticleEngine,
    pub ar: &'a mut ArSession,
}

#[derive(Debug, Default)]
pub struct ControlSync {
    applied: HashMap<ControlKey, ControlValue>,
}

impl ControlSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value applied for `key`.
    pub fn last(&self, key: &ControlKey) -> Option<ControlValue> {
        self.applied.get(key).copied()
    }

    /// Apply one control. Failed writes are not remembered, so the same value
    /// is retried on the next send.
    pub fn apply(&mut self, key: ControlKey, value: ControlValue, targets: SyncTargets<'_>) -> Result<SyncEffect, SyncError> {
        if self.applied.get(&key) == Some(&value) {
            return Ok(SyncEffect::Unchanged);
        }
        let effect = Self::write(&key, value, targets)?;
        self.applied.insert(key, value);
        Ok(effect)
    }

    fn write(key: &ControlKey, value: ControlValue, t: SyncTargets<'_>) -> Result<SyncEffect, SyncError> {
        match key {
            ControlKey::Object { name, property } => {
                match property {
                    ObjectProperty::Position(axis) => t.registry.set_target_position(name, *axis, value.number(key)?)?,
                    ObjectProperty::Rotation(axis) => t.registry.set_rotation(name, *axis, value.number(key)?)?,
                    ObjectProperty::Opacity => t.registry.set_opacity(name, value.number(key)?)?,
                    ObjectProperty::Visible => t.registry.set_visible(name, value.flag(key)?)?,
                    ObjectProperty::Brightness => t.registry.set_brightness(name, value.number(key)?)?,
                    ObjectProperty::PointSize => t.registry.set_point_size(name, value.number(key)?)?,
                    ObjectProperty::Reflective => {
                        let on = value.flag(key)?;
                        let kind = if on { MaterialKind::Reflective } else { MaterialKind::Standard };
                        t.registry.set_material_kind(name, kind)?;
                        return Ok(if on {
                            SyncEffect::ActivateParticles(name.clone())
                        } else {
                            SyncEffect::DeactivateParticles(name.clone())
                        });
                    }
                }
                Ok(SyncEffect::None)
            }
            ControlKey::Particle(param) => {
                t.particles.set_param(*param, value.number(key)?);
                Ok(SyncEffect::None)
            }
            ControlKey::FollowCamera => {
                t.particles.set_follow_camera(value.flag(key)?);
                Ok(SyncEffect::None)
            }
            ControlKey::EdgeDebug => {
                t.particles.set_edge_debug(value.flag(key)?);
                Ok(SyncEffect::None)
            }
            ControlKey::ParticlesEnabled => Ok(SyncEffect::SetParticlesEnabled(value.flag(key)?)),
            ControlKey::ArMode => Ok(SyncEffect::SetArMode(value.flag(key)?)),
            ControlKey::ParallaxSensitivity => {
                t.ar.set_sensitivity(value.number(key)?);
                Ok(SyncEffect::None)
            }
        }
    }

    /// Drop remembered values for a removed object.
    pub fn forget_object(&mut self, object: &str) {
        self.applied
            .retain(|key, _| !matches!(key, ControlKey::Object { name, .. } if name == object));
    }

    /// Forget a single key so its next value is always applied.
    pub fn forget(&mut self, key: &ControlKey) {
        self.applied.remove(key);
    }

    pub fn clear(&mut self) {
        self.applied.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ar::DEFAULT_PARALLAX_SENSITIVITY;
    use crate::gpu::mesh::Vertex;
    use crate::registry::VisualObject;

    #[test]
    fn test_parse_keys() {
        assert_eq!(
            "object:rock.ply.position.x".parse::<ControlKey>().unwrap(),
            ControlKey::object("rock.ply", ObjectProperty::Position(Axis::X))
        );
        assert_eq!(
            "object:my.statue.glb.reflective".parse::<ControlKey>().unwrap(),
            ControlKey::object("my.statue.glb", ObjectProperty::Reflective)
        );
        assert_eq!(
            "particles.orbitSpeed".parse::<ControlKey>().unwrap(),
            ControlKey::Particle(ParticleParam::OrbitSpeed)
        );
        assert_eq!("ar.enabled".parse::<ControlKey>().unwrap(), ControlKey::ArMode);
        assert!("particles.gravity".parse::<ControlKey>().is_err());
        assert!("object:.opacity".parse::<ControlKey>().is_err());
        assert!("object:rock.ply.scale.x".parse::<ControlKey>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let keys = [
            ControlKey::object("rock.ply", ObjectProperty::Rotation(Axis::Z)),
            ControlKey::object("a.glb", ObjectProperty::PointSize),
            ControlKey::Particle(ParticleParam::Settle),
            ControlKey::FollowCamera,
            ControlKey::ParallaxSensitivity,
        ];
        for key in keys {
            assert_eq!(key.to_string().parse::<ControlKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_value_deserializes_untagged() {
        let v: ControlValue = serde_json::from_str("0.5").unwrap();
        assert_eq!(v, ControlValue::Number(0.5));
        let v: ControlValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ControlValue::Flag(true));
    }

    fn fixtures() -> (ObjectRegistry, EdgeParticleEngine, ArSession) {
        let mut registry = ObjectRegistry::new();
        registry
            .register(VisualObject::point_cloud("rock.ply", vec![Vertex::point([0.0; 3], [1.0; 3])]))
            .unwrap();
        (registry, EdgeParticleEngine::default(), ArSession::new(DEFAULT_PARALLAX_SENSITIVITY, false))
    }

    #[test]
    fn test_repeated_value_is_skipped() {
        let (mut registry, mut particles, mut ar) = fixtures();
        let mut sync = ControlSync::new();
        let key = ControlKey::object("rock.ply", ObjectProperty::Opacity);

        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        assert_eq!(sync.apply(key.clone(), ControlValue::Number(0.3), targets).unwrap(), SyncEffect::None);

        // Change the object behind the sync layer's back; a resend of the
        // same value must not overwrite it.
        registry.set_opacity("rock.ply", 0.9).unwrap();
        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        assert_eq!(sync.apply(key, ControlValue::Number(0.3), targets).unwrap(), SyncEffect::Unchanged);
        assert_eq!(registry.get("rock.ply").unwrap().opacity(), 0.9);
    }

    #[test]
    fn test_failed_write_not_remembered() {
        let (mut registry, mut particles, mut ar) = fixtures();
        let mut sync = ControlSync::new();
        let key = ControlKey::object("ghost.glb", ObjectProperty::Opacity);
        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        assert!(matches!(sync.apply(key.clone(), ControlValue::Number(0.5), targets), Err(SyncError::Registry(_))));
        assert_eq!(sync.last(&key), None);
    }

    #[test]
    fn test_wrong_type() {
        let (mut registry, mut particles, mut ar) = fixtures();
        let mut sync = ControlSync::new();
        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        let err = sync
            .apply(ControlKey::object("rock.ply", ObjectProperty::Visible), ControlValue::Number(1.0), targets)
            .unwrap_err();
        assert!(matches!(err, SyncError::WrongType { expected: "boolean", .. }));
    }

    #[test]
    fn test_particle_and_ar_controls() {
        let (mut registry, mut particles, mut ar) = fixtures();
        let mut sync = ControlSync::new();

        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        sync.apply(ControlKey::Particle(ParticleParam::Vortex), ControlValue::Number(2.5), targets).unwrap();
        assert_eq!(particles.params().vortex, 2.5);

        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        sync.apply(ControlKey::ParallaxSensitivity, ControlValue::Number(0.2), targets).unwrap();
        assert_eq!(ar.sensitivity(), 0.2);

        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        let effect = sync.apply(ControlKey::ParticlesEnabled, ControlValue::Flag(false), targets).unwrap();
        assert_eq!(effect, SyncEffect::SetParticlesEnabled(false));
    }

    #[test]
    fn test_forget_object() {
        let (mut registry, mut particles, mut ar) = fixtures();
        let mut sync = ControlSync::new();
        let key = ControlKey::object("rock.ply", ObjectProperty::Brightness);
        let targets = SyncTargets { registry: &mut registry, particles: &mut particles, ar: &mut ar };
        sync.apply(key.clone(), ControlValue::Number(1.5), targets).unwrap();
        sync.forget_object("rock.ply");
        assert_eq!(sync.last(&key), None);
    }
}
