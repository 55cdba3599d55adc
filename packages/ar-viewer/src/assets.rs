//! Asset list classification and placement of freshly loaded assets.
//!
//! File listing and parsing happen outside the viewer. The host hands over
//! file names; this module decides what kind of object each becomes and how
//! it is placed when it enters the scene.

use std::path::Path;

use glam::Vec3;
use serde::Serialize;

use crate::gpu::mesh::{Bounds, Vertex};
use crate::registry::{MeshNode, VisualObject};

/// Longest side of a point cloud after load normalization.
pub const POINT_CLOUD_EXTENT: f32 = 2.0;
/// Base rotation of a loaded point cloud, degrees: x = 90, y = 180.
pub const POINT_CLOUD_ROTATION_DEGREES: Vec3 = Vec3::new(90.0, 180.0, 0.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetKind {
    PointCloud,
    Mesh,
}

/// Result of classifying one model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Supported(AssetKind),
    /// Recognized but not loadable, with a hint for the user.
    Unsupported(&'static str),
    Ignored,
}

fn extension(path: &str) -> Option<String> {
    Path::new(path).extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// File name without directories; used as the object's registry name.
pub fn object_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

pub fn classify(path: &str) -> Classification {
    match extension(path).as_deref() {
        Some("ply") | Some("splat") => Classification::Supported(AssetKind::PointCloud),
        Some("glb") | Some("gltf") => Classification::Supported(AssetKind::Mesh),
        Some("spz") => Classification::Unsupported("convert .spz files to .splat, or rename to .ply if it is a plain point cloud"),
        _ => Classification::Ignored,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextureKind {
    /// Equirectangular HDR.
    Hdr,
    /// PNG or JPEG.
    Ldr,
}

pub fn classify_texture(path: &str) -> Option<TextureKind> {
    match extension(path).as_deref() {
        Some("hdr") => Some(TextureKind::Hdr),
        Some("png") | Some("jpg") | Some("jpeg") => Some(TextureKind::Ldr),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetEntry {
    pub path: String,
    pub name: String,
    pub kind: AssetKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundTexture {
    pub path: String,
    pub kind: TextureKind,
}

/// Classified asset listing handed to the viewer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetList {
    pub entries: Vec<AssetEntry>,
    pub unsupported: Vec<String>,
    pub background: Option<BackgroundTexture>,
}

impl AssetList {
    pub fn from_paths<S: AsRef<str>>(models: &[S], texture: Option<&str>) -> Self {
        let mut list = AssetList::default();
        for path in models {
            let path = path.as_ref();
            match classify(path) {
                Classification::Supported(kind) => list.entries.push(AssetEntry {
                    path: path.to_string(),
                    name: object_name(path),
                    kind,
                }),
                Classification::Unsupported(hint) => {
                    log::error!("Unsupported asset format: {} ({})", path, hint);
                    list.unsupported.push(path.to_string());
                }
                Classification::Ignored => log::debug!("Skipping non-model file {}", path),
            }
        }

        list.background = texture.and_then(|path| match classify_texture(path) {
            Some(kind) => Some(BackgroundTexture {
                path: path.to_string(),
                kind,
            }),
            None => {
                log::warn!("Unsupported background texture {}", path);
                None
            }
        });

        log::info!(
            "Assets: {} point clouds, {} meshes, {} unsupported",
            list.count(AssetKind::PointCloud),
            list.count(AssetKind::Mesh),
            list.unsupported.len()
        );
        list
    }

    pub fn count(&self, kind: AssetKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a point-cloud object as it enters the scene: scaled so its longest
/// side is [`POINT_CLOUD_EXTENT`], at the origin, with the base rotation.
pub fn place_point_cloud(name: impl Into<String>, vertices: Vec<Vertex>) -> VisualObject {
    let bounds = Bounds::from_points(vertices.iter().map(|v| Vec3::from(v.position)));
    let scale = bounds
        .map(|b| b.max_dimension())
        .filter(|d| *d > 0.0)
        .map(|d| POINT_CLOUD_EXTENT / d)
        .unwrap_or(1.0);
    VisualObject::point_cloud(name, vertices).placed(Vec3::ZERO, POINT_CLOUD_ROTATION_DEGREES, scale)
}

/// Build a mesh object at the origin with its authored scale.
pub fn place_mesh(name: impl Into<String>, root: MeshNode) -> VisualObject {
    VisualObject::mesh(name, root).placed(Vec3::ZERO, Vec3::ZERO, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("models/rock.ply"), Classification::Supported(AssetKind::PointCloud));
        assert_eq!(classify("garden.SPLAT"), Classification::Supported(AssetKind::PointCloud));
        assert_eq!(classify("statue.glb"), Classification::Supported(AssetKind::Mesh));
        assert!(matches!(classify("scan.spz"), Classification::Unsupported(_)));
        assert_eq!(classify("readme.txt"), Classification::Ignored);
        assert_eq!(classify("noext"), Classification::Ignored);
    }

    #[test]
    fn test_asset_list() {
        let list = AssetList::from_paths(&["/m/rock.ply", "/m/statue.glb", "/m/scan.spz", "/m/notes.md"], Some("/t/sky.hdr"));
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.entries[0].name, "rock.ply");
        assert_eq!(list.unsupported, vec!["/m/scan.spz".to_string()]);
        assert_eq!(list.background.as_ref().map(|b| b.kind), Some(TextureKind::Hdr));

        let list = AssetList::from_paths::<&str>(&[], Some("bg.gif"));
        assert!(list.is_empty());
        assert!(list.background.is_none());
    }

    #[test]
    fn test_point_cloud_normalized() {
        let vertices = vec![
            Vertex::point([0.0, 0.0, 0.0], [1.0; 3]),
            Vertex::point([10.0, 4.0, 2.0], [1.0; 3]),
        ];
        let object = place_point_cloud("rock.ply", vertices);
        assert!((object.transform.scale.x - 0.2).abs() < 1e-6);
        assert_eq!(object.rotation_degrees, POINT_CLOUD_ROTATION_DEGREES);
        assert_eq!(object.target_position, Vec3::ZERO);
    }

    #[test]
    fn test_single_point_cloud_keeps_unit_scale() {
        let object = place_point_cloud("dot.ply", vec![Vertex::point([1.0, 1.0, 1.0], [1.0; 3])]);
        assert_eq!(object.transform.scale, Vec3::ONE);
    }
}
