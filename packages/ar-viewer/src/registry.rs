//! Live set of visual objects.
//!
//! The registry owns every loaded [`VisualObject`]: its smoothed transform,
//! its explicit targets and its appearance state. Appearance writes are
//! routed to the right material parameters by object kind and re-applied
//! every frame, because materials can be swapped at runtime.

use std::collections::HashMap;
use std::str::FromStr;

use glam::{Mat4, Vec3};
use serde::Serialize;

use crate::ar::ArPose;
use crate::error::{GpuError, RegistryError};
use crate::gpu::driver::{DrawStyle, GeometryData, GeometryId, MaskGeometry, MaskTopology, ObjectDraw, RenderDriver};
use crate::gpu::mesh::{Bounds, Vertex};
use crate::material::{self, MaterialInstance, MaterialKind, ParamSet};

/// Fraction of the remaining distance covered per `advance` call.
pub const SMOOTHING_FACTOR: f32 = 0.1;
/// Smallest accepted point size in pixels.
pub const MIN_POINT_SIZE: f32 = 0.1;
pub const DEFAULT_POINT_SIZE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn name(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl FromStr for Axis {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(RegistryError::InvalidAxis(other.to_string())),
        }
    }
}

fn set_axis(v: &mut Vec3, axis: Axis, value: f32) {
    match axis {
        Axis::X => v.x = value,
        Axis::Y => v.y = value,
        Axis::Z => v.z = value,
    }
}

/// Transform component for objects and mesh nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    /// Euler angles in radians, XYZ order.
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Model = Translation * Rotation * Scale
    pub fn matrix(&self) -> Mat4 {
        let rotation = glam::Quat::from_euler(glam::EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z);
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
    PointCloud,
    Mesh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudData {
    pub vertices: Vec<Vertex>,
    pub params: ParamSet,
    pub gpu: Option<GeometryId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub material: MaterialInstance,
    pub gpu: Option<GeometryId>,
}

impl SubMesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>, material: MaterialInstance) -> Self {
        Self { vertices, indices, material, gpu: None }
    }
}

/// A node of a mesh hierarchy. Children inherit the node's transform.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshNode {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub sub_meshes: Vec<SubMesh>,
    pub children: Vec<MeshNode>,
}

impl MeshNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            visible: true,
            sub_meshes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_sub_mesh(mut self, sub_mesh: SubMesh) -> Self {
        self.sub_meshes.push(sub_mesh);
        self
    }

    pub fn with_child(mut self, child: MeshNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Visit every sub-mesh with its accumulated matrix, skipping hidden
    /// branches.
    pub fn visit_visible<'a>(&'a self, parent: Mat4, f: &mut dyn FnMut(&'a SubMesh, Mat4)) {
        if !self.visible {
            return;
        }
        let world = parent * self.transform.matrix();
        for sub in &self.sub_meshes {
            f(sub, world);
        }
        for child in &self.children {
            child.visit_visible(world, f);
        }
    }

    pub fn for_each_sub_mesh_mut(&mut self, f: &mut dyn FnMut(&mut SubMesh)) {
        for sub in &mut self.sub_meshes {
            f(sub);
        }
        for child in &mut self.children {
            child.for_each_sub_mesh_mut(f);
        }
    }

    pub fn for_each_sub_mesh(&self, f: &mut dyn FnMut(&SubMesh)) {
        for sub in &self.sub_meshes {
            f(sub);
        }
        for child in &self.children {
            child.for_each_sub_mesh(f);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectGeometry {
    PointCloud(PointCloudData),
    Mesh(MeshNode),
}

/// A loaded asset placed in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualObject {
    name: String,
    /// Current (smoothed) transform.
    pub transform: Transform,
    pub target_position: Vec3,
    /// Explicit rotation in degrees, applied without smoothing.
    pub rotation_degrees: Vec3,
    opacity: f32,
    pub visible: bool,
    brightness: f32,
    point_size: f32,
    pub geometry: ObjectGeometry,
}

impl VisualObject {
    fn new(name: impl Into<String>, geometry: ObjectGeometry) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            target_position: Vec3::ZERO,
            rotation_degrees: Vec3::ZERO,
            opacity: 1.0,
            visible: true,
            brightness: 1.0,
            point_size: DEFAULT_POINT_SIZE,
            geometry,
        }
    }

    pub fn point_cloud(name: impl Into<String>, vertices: Vec<Vertex>) -> Self {
        Self::new(
            name,
            ObjectGeometry::PointCloud(PointCloudData {
                vertices,
                params: material::point_cloud_params(),
                gpu: None,
            }),
        )
    }

    pub fn mesh(name: impl Into<String>, root: MeshNode) -> Self {
        Self::new(name, ObjectGeometry::Mesh(root))
    }

    /// Place the object at `position` (current and target) with a base
    /// rotation in degrees and a uniform scale.
    pub fn placed(mut self, position: Vec3, rotation_degrees: Vec3, scale: f32) -> Self {
        self.transform.position = position;
        self.target_position = position;
        self.rotation_degrees = rotation_degrees;
        self.transform.rotation = Vec3::new(
            rotation_degrees.x.to_radians(),
            rotation_degrees.y.to_radians(),
            rotation_degrees.z.to_radians(),
        );
        self.transform.scale = Vec3::splat(scale);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ObjectKind {
        match self.geometry {
            ObjectGeometry::PointCloud(_) => ObjectKind::PointCloud,
            ObjectGeometry::Mesh(_) => ObjectKind::Mesh,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn point_size(&self) -> f32 {
        self.point_size
    }

    /// Whether any sub-material uses the reflective program.
    pub fn is_reflective(&self) -> bool {
        let mut reflective = false;
        if let ObjectGeometry::Mesh(root) = &self.geometry {
            root.for_each_sub_mesh(&mut |sub| reflective |= sub.material.kind == MaterialKind::Reflective);
        }
        reflective
    }

    /// Write opacity, brightness and point size into the material parameters
    /// of this object's kind: `opacity` on a point cloud, `alpha` on every
    /// sub-material of a mesh including nested children.
    pub fn apply_appearance(&mut self) {
        let (opacity, brightness, point_size) = (self.opacity, self.brightness, self.point_size);
        match &mut self.geometry {
            ObjectGeometry::PointCloud(cloud) => {
                cloud.params.set_float(material::OPACITY, opacity);
                cloud.params.set_float(material::BRIGHTNESS, brightness);
                cloud.params.set_float(material::POINT_SIZE, point_size);
            }
            ObjectGeometry::Mesh(root) => {
                root.for_each_sub_mesh_mut(&mut |sub| {
                    sub.material.params.set_float(material::ALPHA, opacity);
                    sub.material.transparent = opacity < 1.0;
                });
            }
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }

    /// World-space copy of the visible geometry for the silhouette mask.
    pub fn mask_geometry(&self) -> MaskGeometry {
        let model = self.model_matrix();
        match &self.geometry {
            ObjectGeometry::PointCloud(cloud) => MaskGeometry {
                topology: MaskTopology::Points,
                positions: cloud
                    .vertices
                    .iter()
                    .map(|v| model.transform_point3(Vec3::from(v.position)).to_array())
                    .collect(),
                indices: Vec::new(),
            },
            ObjectGeometry::Mesh(root) => {
                let mut positions = Vec::new();
                let mut indices = Vec::new();
                root.visit_visible(model, &mut |sub, world| {
                    let base = positions.len() as u32;
                    positions.extend(sub.vertices.iter().map(|v| world.transform_point3(Vec3::from(v.position)).to_array()));
                    indices.extend(sub.indices.iter().map(|i| base + i));
                });
                MaskGeometry {
                    topology: MaskTopology::Triangles,
                    positions,
                    indices,
                }
            }
        }
    }

    /// World-space bounds of the visible geometry.
    pub fn world_bounds(&self) -> Option<Bounds> {
        Bounds::from_points(self.mask_geometry().positions.into_iter().map(Vec3::from))
    }

    /// Upload every drawable piece that has no GPU geometry yet. On failure,
    /// pieces uploaded by this call are released again.
    pub fn upload<D: RenderDriver>(&mut self, driver: &mut D) -> Result<(), GpuError> {
        let mut uploaded = Vec::new();
        let result = match &mut self.geometry {
            ObjectGeometry::PointCloud(cloud) => match cloud.gpu {
                Some(_) => Ok(()),
                None => driver.upload_geometry(GeometryData::Points(&cloud.vertices)).map(|id| {
                    uploaded.push(id);
                    cloud.gpu = Some(id);
                }),
            },
            ObjectGeometry::Mesh(root) => {
                let mut result = Ok(());
                root.for_each_sub_mesh_mut(&mut |sub| {
                    if result.is_err() || sub.gpu.is_some() {
                        return;
                    }
                    match driver.upload_geometry(GeometryData::Triangles {
                        vertices: &sub.vertices,
                        indices: &sub.indices,
                    }) {
                        Ok(id) => {
                            uploaded.push(id);
                            sub.gpu = Some(id);
                        }
                        Err(e) => result = Err(e),
                    }
                });
                result
            }
        };

        if result.is_err() {
            for id in &uploaded {
                driver.release_geometry(*id);
            }
            self.forget_handles(&uploaded);
        }
        result
    }

    /// Release all GPU geometry held by this object. Safe to call twice.
    pub fn release<D: RenderDriver>(&mut self, driver: &mut D) {
        match &mut self.geometry {
            ObjectGeometry::PointCloud(cloud) => {
                if let Some(id) = cloud.gpu.take() {
                    driver.release_geometry(id);
                }
            }
            ObjectGeometry::Mesh(root) => root.for_each_sub_mesh_mut(&mut |sub| {
                if let Some(id) = sub.gpu.take() {
                    driver.release_geometry(id);
                }
            }),
        }
    }

    fn forget_handles(&mut self, ids: &[GeometryId]) {
        match &mut self.geometry {
            ObjectGeometry::PointCloud(cloud) => {
                if cloud.gpu.is_some_and(|id| ids.contains(&id)) {
                    cloud.gpu = None;
                }
            }
            ObjectGeometry::Mesh(root) => root.for_each_sub_mesh_mut(&mut |sub| {
                if sub.gpu.is_some_and(|id| ids.contains(&id)) {
                    sub.gpu = None;
                }
            }),
        }
    }

    /// Draw calls for this object, or none when hidden.
    pub fn draws(&self) -> Vec<ObjectDraw> {
        if !self.visible {
            return Vec::new();
        }
        let model = self.model_matrix();
        match &self.geometry {
            ObjectGeometry::PointCloud(cloud) => cloud
                .gpu
                .map(|geometry| ObjectDraw {
                    geometry,
                    model,
                    style: DrawStyle::Points {
                        opacity: cloud.params.float_or(material::OPACITY, 1.0),
                        brightness: cloud.params.float_or(material::BRIGHTNESS, 1.0),
                        point_size: cloud.params.float_or(material::POINT_SIZE, DEFAULT_POINT_SIZE),
                    },
                })
                .into_iter()
                .collect(),
            ObjectGeometry::Mesh(root) => {
                let mut draws = Vec::new();
                root.visit_visible(model, &mut |sub, world| {
                    if let Some(geometry) = sub.gpu {
                        draws.push(ObjectDraw {
                            geometry,
                            model: world,
                            style: DrawStyle::Surface {
                                alpha: sub.material.alpha(),
                                reflective: sub.material.kind == MaterialKind::Reflective,
                            },
                        });
                    }
                });
                draws
            }
        }
    }
}

/// Registry of live objects, keyed by unique name, iterated in insertion
/// order.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<String, VisualObject>,
    order: Vec<String>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register with full opacity, visible.
    pub fn register(&mut self, object: VisualObject) -> Result<(), RegistryError> {
        self.register_with(object, 1.0, true)
    }

    /// Register an object. A name that is already present is rejected and
    /// the existing object is left untouched.
    pub fn register_with(&mut self, mut object: VisualObject, opacity: f32, visible: bool) -> Result<(), RegistryError> {
        if self.objects.contains_key(object.name()) {
            log::warn!("Object '{}' is already registered, ignoring duplicate", object.name());
            return Err(RegistryError::Duplicate(object.name().to_string()));
        }
        object.opacity = opacity.clamp(0.0, 1.0);
        object.visible = visible;
        object.apply_appearance();

        log::info!("Registered {:?} '{}'", object.kind(), object.name());
        self.order.push(object.name().to_string());
        self.objects.insert(object.name().to_string(), object);
        Ok(())
    }

    /// Remove and return an object. The caller releases its GPU resources.
    pub fn remove(&mut self, name: &str) -> Result<VisualObject, RegistryError> {
        let object = self.objects.remove(name).ok_or_else(|| not_found(name))?;
        self.order.retain(|n| n != name);
        log::info!("Removed object '{}'", name);
        Ok(object)
    }

    /// Remove every object, in insertion order.
    pub fn drain(&mut self) -> Vec<VisualObject> {
        let order = std::mem::take(&mut self.order);
        order.into_iter().filter_map(|name| self.objects.remove(&name)).collect()
    }

    pub fn get(&self, name: &str) -> Option<&VisualObject> {
        self.objects.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VisualObject> {
        self.objects.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &VisualObject> {
        self.order.iter().filter_map(|n| self.objects.get(n))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn lookup(&mut self, name: &str) -> Result<&mut VisualObject, RegistryError> {
        match self.objects.get_mut(name) {
            Some(object) => Ok(object),
            None => {
                log::error!("Object '{}' not found", name);
                Err(not_found(name))
            }
        }
    }

    pub fn set_target_position(&mut self, name: &str, axis: Axis, value: f32) -> Result<(), RegistryError> {
        let object = self.lookup(name)?;
        set_axis(&mut object.target_position, axis, value);
        Ok(())
    }

    /// Set one rotation axis in degrees. Takes effect on the next `advance`
    /// without smoothing.
    pub fn set_rotation(&mut self, name: &str, axis: Axis, degrees: f32) -> Result<(), RegistryError> {
        let object = self.lookup(name)?;
        set_axis(&mut object.rotation_degrees, axis, degrees);
        Ok(())
    }

    /// Set opacity, clamped to [0, 1].
    pub fn set_opacity(&mut self, name: &str, value: f32) -> Result<(), RegistryError> {
        let object = self.lookup(name)?;
        object.opacity = value.clamp(0.0, 1.0);
        object.apply_appearance();
        Ok(())
    }

    pub fn set_visible(&mut self, name: &str, visible: bool) -> Result<(), RegistryError> {
        let object = self.lookup(name)?;
        object.visible = visible;
        Ok(())
    }

    /// Set brightness, clamped to >= 0. Only point clouds render it.
    pub fn set_brightness(&mut self, name: &str, value: f32) -> Result<(), RegistryError> {
        let object = self.lookup(name)?;
        object.brightness = value.max(0.0);
        if object.kind() != ObjectKind::PointCloud {
            log::warn!("Brightness only applies to point clouds, '{}' is a mesh", name);
        }
        object.apply_appearance();
        Ok(())
    }

    /// Set point size in pixels, clamped to >= 0.1. Only point clouds render it.
    pub fn set_point_size(&mut self, name: &str, value: f32) -> Result<(), RegistryError> {
        let object = self.lookup(name)?;
        object.point_size = value.max(MIN_POINT_SIZE);
        if object.kind() != ObjectKind::PointCloud {
            log::warn!("Point size only applies to point clouds, '{}' is a mesh", name);
        }
        object.apply_appearance();
        Ok(())
    }

    /// Replace every sub-material of a mesh with `kind`. Returns false for
    /// point clouds and for meshes already using `kind` everywhere.
    pub fn set_material_kind(&mut self, name: &str, kind: MaterialKind) -> Result<bool, RegistryError> {
        let object = self.lookup(name)?;
        let ObjectGeometry::Mesh(root) = &mut object.geometry else {
            log::warn!("Material programs only apply to meshes, '{}' is a point cloud", name);
            return Ok(false);
        };

        let mut changed = false;
        root.for_each_sub_mesh_mut(&mut |sub| {
            if sub.material.kind != kind {
                sub.material = sub.material.replaced_with(kind);
                changed = true;
            }
        });
        // New materials start opaque; restore the object's opacity.
        object.apply_appearance();
        Ok(changed)
    }

    /// Per-frame step: rotation is applied directly, position moves 0.1 of
    /// the remaining distance to its target, appearance is re-applied.
    ///
    /// With an AR pose, rotation comes from the pose and the parallax offset
    /// is added to the explicit target before smoothing. `dt` is not used:
    /// the approach is per call, not per second.
    pub fn advance(&mut self, _dt: f32, ar: Option<&ArPose>) {
        for name in &self.order {
            let Some(object) = self.objects.get_mut(name) else {
                continue;
            };

            let mut target = object.target_position;
            match ar {
                Some(pose) => {
                    object.transform.rotation = pose.object_rotation;
                    target.x += pose.parallax.x;
                    target.y += pose.parallax.y;
                }
                None => {
                    let r = object.rotation_degrees;
                    object.transform.rotation = Vec3::new(r.x.to_radians(), r.y.to_radians(), r.z.to_radians());
                }
            }

            let position = object.transform.position;
            object.transform.position = position + (target - position) * SMOOTHING_FACTOR;
            object.apply_appearance();
        }
    }

    /// Draw calls for all visible objects.
    pub fn draws(&self) -> Vec<ObjectDraw> {
        self.iter().flat_map(VisualObject::draws).collect()
    }
}

fn not_found(name: &str) -> RegistryError {
    RegistryError::NotFound(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mesh::create_cube_geometry;

    fn cloud(name: &str) -> VisualObject {
        VisualObject::point_cloud(
            name,
            vec![Vertex::point([0.0, 0.0, 0.0], [1.0; 3]), Vertex::point([1.0, 1.0, 1.0], [1.0; 3])],
        )
    }

    fn nested_mesh(name: &str) -> VisualObject {
        let (v, i) = create_cube_geometry([1.0; 3]);
        let child = MeshNode::new("child")
            .with_sub_mesh(SubMesh::new(v.clone(), i.clone(), MaterialInstance::standard([1.0; 4])))
            .with_child(MeshNode::new("grandchild").with_sub_mesh(SubMesh::new(v.clone(), i.clone(), MaterialInstance::standard([1.0; 4]))));
        let root = MeshNode::new("root")
            .with_sub_mesh(SubMesh::new(v, i, MaterialInstance::standard([1.0; 4])))
            .with_child(child);
        VisualObject::mesh(name, root)
    }

    fn alphas(object: &VisualObject) -> Vec<f32> {
        let mut out = Vec::new();
        if let ObjectGeometry::Mesh(root) = &object.geometry {
            root.for_each_sub_mesh(&mut |sub| out.push(sub.material.alpha()));
        }
        out
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("rock.ply")).unwrap();
        registry.set_opacity("rock.ply", 0.4).unwrap();

        let err = registry.register(cloud("rock.ply")).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("rock.ply".into()));
        assert_eq!(registry.len(), 1);
        // Existing object untouched.
        assert_eq!(registry.get("rock.ply").unwrap().opacity(), 0.4);
    }

    #[test]
    fn test_not_found() {
        let mut registry = ObjectRegistry::new();
        let missing = RegistryError::NotFound("ghost.glb".into());
        assert_eq!(registry.set_opacity("ghost.glb", 0.5), Err(missing.clone()));
        assert_eq!(registry.set_visible("ghost.glb", false), Err(missing.clone()));
        assert_eq!(registry.set_brightness("ghost.glb", 2.0), Err(missing.clone()));
        assert_eq!(registry.set_target_position("ghost.glb", Axis::X, 1.0), Err(missing.clone()));
        assert_eq!(registry.set_rotation("ghost.glb", Axis::Y, 45.0), Err(missing.clone()));
        assert_eq!(registry.remove("ghost.glb").unwrap_err(), missing);
    }

    #[test]
    fn test_opacity_clamped() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("a.ply")).unwrap();

        registry.set_opacity("a.ply", 1.7).unwrap();
        assert_eq!(registry.get("a.ply").unwrap().opacity(), 1.0);

        registry.set_opacity("a.ply", -0.3).unwrap();
        assert_eq!(registry.get("a.ply").unwrap().opacity(), 0.0);

        registry.register_with(cloud("b.ply"), 3.0, true).unwrap();
        assert_eq!(registry.get("b.ply").unwrap().opacity(), 1.0);
    }

    #[test]
    fn test_opacity_routes_to_point_cloud_param() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("a.ply")).unwrap();
        registry.set_opacity("a.ply", 0.25).unwrap();

        let ObjectGeometry::PointCloud(data) = &registry.get("a.ply").unwrap().geometry else {
            panic!("expected point cloud");
        };
        assert_eq!(data.params.float_or(material::OPACITY, 1.0), 0.25);
        assert!(!data.params.contains(material::ALPHA));
    }

    #[test]
    fn test_opacity_routes_to_every_nested_sub_material() {
        let mut registry = ObjectRegistry::new();
        registry.register(nested_mesh("statue.glb")).unwrap();
        registry.set_opacity("statue.glb", 0.5).unwrap();

        let object = registry.get("statue.glb").unwrap();
        assert_eq!(alphas(object), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_material_swap_keeps_opacity() {
        let mut registry = ObjectRegistry::new();
        registry.register(nested_mesh("statue.glb")).unwrap();
        registry.set_opacity("statue.glb", 0.6).unwrap();

        assert!(registry.set_material_kind("statue.glb", MaterialKind::Reflective).unwrap());
        let object = registry.get("statue.glb").unwrap();
        assert!(object.is_reflective());
        assert_eq!(alphas(object), vec![0.6, 0.6, 0.6]);

        // Same kind again is a no-op.
        assert!(!registry.set_material_kind("statue.glb", MaterialKind::Reflective).unwrap());
    }

    #[test]
    fn test_brightness_and_point_size_clamped() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("a.ply")).unwrap();
        registry.set_brightness("a.ply", -1.0).unwrap();
        registry.set_point_size("a.ply", 0.0).unwrap();

        let object = registry.get("a.ply").unwrap();
        assert_eq!(object.brightness(), 0.0);
        assert_eq!(object.point_size(), MIN_POINT_SIZE);
    }

    #[test]
    fn test_smoothing_fixed_point() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("a.ply").placed(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, 1.0)).unwrap();
        for _ in 0..10 {
            registry.advance(0.016, None);
        }
        assert_eq!(registry.get("a.ply").unwrap().transform.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_rotation_is_immediate() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("a.ply")).unwrap();
        registry.set_rotation("a.ply", Axis::Y, 90.0).unwrap();
        registry.advance(0.016, None);
        let rotation = registry.get("a.ply").unwrap().transform.rotation;
        assert!((rotation.y - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_ar_pose_overrides_rotation_and_offsets_target() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("a.ply")).unwrap();
        registry.set_rotation("a.ply", Axis::X, 45.0).unwrap();
        let pose = ArPose {
            object_rotation: Vec3::new(0.1, 0.2, 0.3),
            parallax: glam::Vec2::new(1.0, -1.0),
        };
        registry.advance(0.016, Some(&pose));

        let object = registry.get("a.ply").unwrap();
        assert_eq!(object.transform.rotation, Vec3::new(0.1, 0.2, 0.3));
        assert!((object.transform.position - Vec3::new(0.1, -0.1, 0.0)).length() < 1e-6);
        // Explicit target is not replaced.
        assert_eq!(object.target_position, Vec3::ZERO);
    }

    #[test]
    fn test_hidden_object_has_no_draws() {
        let mut registry = ObjectRegistry::new();
        registry.register_with(cloud("a.ply"), 1.0, false).unwrap();
        assert!(registry.draws().is_empty());
    }

    #[test]
    fn test_mask_geometry_is_world_space() {
        let object = cloud("a.ply").placed(Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, 2.0);
        let mask = object.mask_geometry();
        assert_eq!(mask.topology, MaskTopology::Points);
        assert_eq!(mask.positions, vec![[5.0, 0.0, 0.0], [7.0, 2.0, 2.0]]);

        let mesh = nested_mesh("m.glb");
        let mask = mesh.mask_geometry();
        assert_eq!(mask.positions.len(), 72);
        assert_eq!(mask.indices.len(), 108);
        assert!(mask.indices.iter().all(|&i| (i as usize) < mask.positions.len()));
    }

    #[test]
    fn test_drain_in_order() {
        let mut registry = ObjectRegistry::new();
        registry.register(cloud("b.ply")).unwrap();
        registry.register(cloud("a.ply")).unwrap();
        let names: Vec<_> = registry.drain().iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names, vec!["b.ply", "a.ply"]);
        assert!(registry.is_empty());
    }
}
