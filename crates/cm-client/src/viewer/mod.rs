//! Model view: meshes, placeholders and selection

pub mod math;
mod mesh;
mod renderer;
mod state;

pub use mesh::{Mesh, MeshDecodeError, RayHit};
pub use renderer::{GpuMesh, HeadlessRenderer, RenderBackend, ResourceId, ShapeKind};
pub use state::{Framing, ModelView, ViewState};
