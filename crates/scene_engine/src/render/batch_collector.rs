//! Two-level draw batching
//!
//! Opaque meshes are grouped first by shader (pipeline state group) and then
//! by (mesh, shader) (mesh batch), so the renderer binds every shader once
//! per frame and every mesh buffer once per batch. Both levels, and the
//! instances inside a batch, are intrusive lists threaded through frame
//! arenas; the lookup tables only map keys to arena indices.
//!
//! Transparent meshes skip grouping entirely and land in a flat list that is
//! re-sorted back to front every frame.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::backend::ShaderHandle;
use super::instance::{
    MeshRenderMeshBatch, MeshRenderPipelineStateGroup, RenderInstanceMeshData,
    RenderInstanceMeshDataTransparent, RenderInstanceObjectData,
};
use super::mesh::{Mesh, MeshId};
use crate::foundation::arena::{ArenaAllocator, ArenaIndex, ArenaList, ArenaListIter};
use crate::foundation::math::Mat4;

/// Lookup key of a mesh batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// Mesh identity
    pub mesh: MeshId,
    /// Shader the mesh is drawn with
    pub shader: ShaderHandle,
}

/// How one submitted mesh should be collected
#[derive(Debug, Clone)]
pub struct MeshSubmission<'a> {
    /// Mesh to draw
    pub mesh: &'a Arc<Mesh>,
    /// Shader chosen for the main pass
    pub shader: ShaderHandle,
    /// Shader is an override wanting the meta state uniforms
    pub shader_overridden: bool,
    /// Goes through the sorted transparent list
    pub transparent: bool,
    /// Skinning matrices
    pub bones: Option<Arc<[Mat4]>>,
}

/// Per-frame collection of submitted draws
#[derive(Debug)]
pub struct BatchCollector {
    objects: ArenaAllocator<RenderInstanceObjectData>,
    groups: ArenaAllocator<MeshRenderPipelineStateGroup>,
    group_list: ArenaList,
    batches: ArenaAllocator<MeshRenderMeshBatch>,
    instances: ArenaAllocator<RenderInstanceMeshData>,
    transparent: ArenaAllocator<RenderInstanceMeshDataTransparent>,

    group_lookup: HashMap<ShaderHandle, ArenaIndex>,
    batch_lookup: HashMap<BatchKey, ArenaIndex>,

    shaders_used: Vec<ShaderHandle>,
    shaders_used_lookup: HashSet<ShaderHandle>,
    meshes_used: Vec<Arc<Mesh>>,
    meshes_used_lookup: HashSet<MeshId>,
}

impl BatchCollector {
    /// Create a collector whose instance arenas start at `initial_capacity`
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            objects: ArenaAllocator::with_capacity(initial_capacity / 2),
            groups: ArenaAllocator::with_capacity(4),
            group_list: ArenaList::new(),
            batches: ArenaAllocator::with_capacity(16),
            instances: ArenaAllocator::with_capacity(initial_capacity),
            transparent: ArenaAllocator::with_capacity(initial_capacity / 4),
            group_lookup: HashMap::new(),
            batch_lookup: HashMap::new(),
            shaders_used: Vec::new(),
            shaders_used_lookup: HashSet::new(),
            meshes_used: Vec::new(),
            meshes_used_lookup: HashSet::new(),
        }
    }

    /// Forget everything collected; keeps all backing memory
    pub fn reset(&mut self) {
        self.objects.reset();
        self.groups.reset();
        self.group_list = ArenaList::new();
        self.batches.reset();
        self.instances.reset();
        self.transparent.reset();
        self.group_lookup.clear();
        self.batch_lookup.clear();
        self.shaders_used.clear();
        self.shaders_used_lookup.clear();
        self.meshes_used.clear();
        self.meshes_used_lookup.clear();
    }

    /// Record an object; its meshes reference the returned index
    pub fn add_object(&mut self, object: RenderInstanceObjectData) -> ArenaIndex {
        self.objects.allocate(object)
    }

    /// Record one mesh of an object added with [`add_object`](Self::add_object)
    pub fn add_mesh(&mut self, object: ArenaIndex, submission: MeshSubmission<'_>) {
        let mesh = submission.mesh;
        if self.meshes_used_lookup.insert(mesh.id()) {
            self.meshes_used.push(Arc::clone(mesh));
        }
        if self.shaders_used_lookup.insert(submission.shader) {
            self.shaders_used.push(submission.shader);
        }

        if submission.transparent {
            let sequence = self.transparent.len() as u32;
            let distance_to_camera = self.objects[object].distance_to_camera;
            self.transparent.allocate(RenderInstanceMeshDataTransparent {
                mesh: Arc::clone(mesh),
                shader: submission.shader,
                object,
                distance_to_camera,
                bones: submission.bones,
                upload_meta_state: submission.shader_overridden,
                sequence,
            });
            return;
        }

        let group = match self.group_lookup.get(&submission.shader) {
            Some(&group) => group,
            None => {
                let group = self.groups.allocate(MeshRenderPipelineStateGroup::new(
                    submission.shader,
                    submission.shader_overridden,
                ));
                self.group_list.append(&mut self.groups, group);
                self.group_lookup.insert(submission.shader, group);
                group
            }
        };

        let key = BatchKey {
            mesh: mesh.id(),
            shader: submission.shader,
        };
        let batch = match self.batch_lookup.get(&key) {
            Some(&batch) => batch,
            None => {
                let batch = self
                    .batches
                    .allocate(MeshRenderMeshBatch::new(Arc::clone(mesh), submission.shader));
                self.groups[group].batches.append(&mut self.batches, batch);
                self.batch_lookup.insert(key, batch);
                batch
            }
        };

        let instance = self
            .instances
            .allocate(RenderInstanceMeshData::new(object, submission.bones));
        self.batches[batch].instances.append(&mut self.instances, instance);
    }

    /// Order the transparent list back to front
    ///
    /// Stable, so equal distances keep submission order.
    pub fn sort_transparent(&mut self) {
        self.transparent
            .active_slice_mut()
            .sort_by(|a, b| b.distance_to_camera.total_cmp(&a.distance_to_camera));
    }

    /// Submitted objects
    pub fn objects(&self) -> &[RenderInstanceObjectData] {
        self.objects.active_slice()
    }

    /// Submitted objects, for filling in per-frame results
    pub fn objects_mut(&mut self) -> &mut [RenderInstanceObjectData] {
        self.objects.active_slice_mut()
    }

    /// Object record at `index`
    pub fn object(&self, index: ArenaIndex) -> &RenderInstanceObjectData {
        &self.objects[index]
    }

    /// Pipeline groups in first-use order
    pub fn groups(&self) -> ArenaListIter<'_, MeshRenderPipelineStateGroup> {
        self.group_list.iter(&self.groups)
    }

    /// Mesh batches of a group in first-use order
    pub fn batches_of<'a>(
        &'a self,
        group: &MeshRenderPipelineStateGroup,
    ) -> ArenaListIter<'a, MeshRenderMeshBatch> {
        group.batches.iter(&self.batches)
    }

    /// Instances of a batch in submission order
    pub fn instances_of<'a>(
        &'a self,
        batch: &MeshRenderMeshBatch,
    ) -> ArenaListIter<'a, RenderInstanceMeshData> {
        batch.instances.iter(&self.instances)
    }

    /// Transparent records (sorted once [`sort_transparent`](Self::sort_transparent) ran)
    pub fn transparent(&self) -> &[RenderInstanceMeshDataTransparent] {
        self.transparent.active_slice()
    }

    /// Distinct shaders in first-use order
    pub fn shaders_used(&self) -> &[ShaderHandle] {
        &self.shaders_used
    }

    /// Distinct meshes in first-use order
    pub fn meshes_used(&self) -> &[Arc<Mesh>] {
        &self.meshes_used
    }

    /// Number of pipeline groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of mesh batches
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Number of opaque instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of transparent instances
    pub fn transparent_count(&self) -> usize {
        self.transparent.len()
    }
}

impl Default for BatchCollector {
    fn default() -> Self {
        Self::new(crate::config::RendererConfig::default().initial_instance_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::instance::ObjectFlags;
    use crate::render::mesh::{Material, MetaState};

    fn object(collector: &mut BatchCollector, distance: f32) -> ArenaIndex {
        collector.add_object(RenderInstanceObjectData {
            model_matrix: Mat4::identity(),
            backface_culling: true,
            meta_state: Arc::new(MetaState::default()),
            distance_to_camera: distance,
            sphere_center: Vec3::zeros(),
            sphere_radius: 1.0,
            flags: ObjectFlags::default(),
            visibility: [true; crate::config::MAX_SHADOW_CASCADES + 1],
        })
    }

    fn submit(collector: &mut BatchCollector, object: ArenaIndex, mesh: &Arc<Mesh>, shader: u64, transparent: bool) {
        collector.add_mesh(
            object,
            MeshSubmission {
                mesh,
                shader: ShaderHandle(shader),
                shader_overridden: false,
                transparent,
                bones: None,
            },
        );
    }

    fn quad(name: &str) -> Arc<Mesh> {
        Arc::new(Mesh::quad(name, 1.0, Material::default()))
    }

    #[test]
    fn test_batches_match_distinct_pairs() {
        let meshes = [quad("a"), quad("b"), quad("c")];
        let pairs = [(0, 1), (1, 1), (0, 2), (0, 1), (2, 2), (1, 1), (0, 2), (2, 2)];

        let mut collector = BatchCollector::new(8);
        for (mesh, shader) in pairs {
            let obj = object(&mut collector, 1.0);
            submit(&mut collector, obj, &meshes[mesh], shader, false);
        }

        let distinct: HashSet<_> = pairs.iter().collect();
        assert_eq!(collector.batch_count(), distinct.len());
        assert_eq!(collector.group_count(), 2);
        assert_eq!(collector.instance_count(), pairs.len());
        assert_eq!(collector.meshes_used().len(), 3);
        assert_eq!(collector.shaders_used(), &[ShaderHandle(1), ShaderHandle(2)]);
    }

    #[test]
    fn test_batch_lists_keep_submission_order() {
        let mesh = quad("a");
        let mut collector = BatchCollector::new(8);
        let objects: Vec<_> = (0..3).map(|i| object(&mut collector, i as f32)).collect();
        for &obj in &objects {
            submit(&mut collector, obj, &mesh, 1, false);
        }

        let (_, group) = collector.groups().next().unwrap();
        let (_, batch) = collector.batches_of(group).next().unwrap();
        let order: Vec<_> = collector.instances_of(batch).map(|(_, i)| i.object).collect();
        assert_eq!(order, objects);
    }

    #[test]
    fn test_transparent_sorted_back_to_front_and_stable() {
        let mesh = quad("glass");
        let mut collector = BatchCollector::new(8);
        for distance in [5.0, 10.0, 7.5, 10.0, 1.0] {
            let obj = object(&mut collector, distance);
            submit(&mut collector, obj, &mesh, 1, true);
        }
        collector.sort_transparent();

        let sorted = collector.transparent();
        assert_eq!(collector.batch_count(), 0);
        for pair in sorted.windows(2) {
            assert!(pair[0].distance_to_camera >= pair[1].distance_to_camera);
        }
        assert_eq!(sorted[0].sequence, 1);
        assert_eq!(sorted[1].sequence, 3);
    }

    #[test]
    fn test_reset_clears_lookups() {
        let mesh = quad("a");
        let mut collector = BatchCollector::new(8);
        let obj = object(&mut collector, 1.0);
        submit(&mut collector, obj, &mesh, 1, false);

        collector.reset();
        assert_eq!(collector.groups().count(), 0);
        assert!(collector.meshes_used().is_empty());

        let obj = object(&mut collector, 1.0);
        submit(&mut collector, obj, &mesh, 1, false);
        assert_eq!(collector.batch_count(), 1);
        assert_eq!(collector.instance_count(), 1);
    }
}
