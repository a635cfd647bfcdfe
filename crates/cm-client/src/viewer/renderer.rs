//! Graphics resource ownership
//!
//! Uploaded shapes are represented by [`GpuMesh`] handles. A handle releases
//! its resource when dropped, so replacing the handle stored in a view is
//! enough to free the previous shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::mesh::Mesh;

/// Identifier of an uploaded shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// What an uploaded shape represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// Backend-produced geometry
    Mesh,
    /// Locally synthesized stand-in
    Placeholder,
    /// Selection overlay
    Highlight,
}

/// Destination of mesh uploads
pub trait RenderBackend: Send + Sync {
    /// Upload a mesh and return its resource id
    fn upload(&self, mesh: &Mesh, kind: ShapeKind) -> ResourceId;

    /// Free a previously uploaded resource
    fn release(&self, id: ResourceId);
}

/// Owned handle to an uploaded shape
pub struct GpuMesh {
    id: ResourceId,
    kind: ShapeKind,
    backend: Arc<dyn RenderBackend>,
}

impl GpuMesh {
    /// Upload `mesh` through `backend`
    pub fn upload(backend: &Arc<dyn RenderBackend>, mesh: &Mesh, kind: ShapeKind) -> Self {
        let id = backend.upload(mesh, kind);
        Self {
            id,
            kind,
            backend: Arc::clone(backend),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ShapeKind {
        self.kind
    }
}

impl Drop for GpuMesh {
    fn drop(&mut self) {
        self.backend.release(self.id);
    }
}

impl std::fmt::Debug for GpuMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuMesh")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Render backend that only tracks which resources are alive
#[derive(Default)]
pub struct HeadlessRenderer {
    next_id: AtomicU64,
    uploads: AtomicUsize,
    live: Mutex<HashMap<ResourceId, (ShapeKind, usize)>>,
}

impl HeadlessRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of resources uploaded and not yet released
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Live resources of one kind
    pub fn live_of(&self, kind: ShapeKind) -> usize {
        self.live.lock().values().filter(|(k, _)| *k == kind).count()
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.live.lock().contains_key(&id)
    }

    /// Uploads performed over the renderer's lifetime
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

impl RenderBackend for HeadlessRenderer {
    fn upload(&self, mesh: &Mesh, kind: ShapeKind) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(id, (kind, mesh.triangle_count()));
        tracing::trace!(id = id.0, ?kind, triangles = mesh.triangle_count(), "Uploaded shape");
        id
    }

    fn release(&self, id: ResourceId) {
        if self.live.lock().remove(&id).is_none() {
            tracing::warn!(id = id.0, "Released unknown shape");
        }
    }
}
