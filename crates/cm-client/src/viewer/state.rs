//! Model view state machine
//!
//! ```text
//! Empty -> Placeholder -> Rendered -> Selected
//!            ^   |           ^  |        |
//!            |   +-----------+  +--------+  (pick miss / deselect / update)
//!            +------------------------------ update without a usable mesh
//! ```
//!
//! Every update fully replaces the shown shape. The previous shape and any
//! selection overlay are released before the new shape is uploaded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use cm_protocol::{BoundingBox, ElementKind, GeometrySelection, ModelState, Vec3};

use super::math::{add, normalize, scale};
use super::mesh::Mesh;
use super::renderer::{GpuMesh, RenderBackend, ShapeKind};

/// Edge length of the placeholder when the model has no usable extent
const DEFAULT_PLACEHOLDER_EXTENT: f64 = 10.0;

/// Vertical field of view used for framing, in degrees
const FIELD_OF_VIEW_DEG: f64 = 50.0;

/// Observable state of a model view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewState {
    Empty,
    Placeholder,
    Rendered,
    Selected,
}

impl std::fmt::Display for ViewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewState::Empty => write!(f, "empty"),
            ViewState::Placeholder => write!(f, "placeholder"),
            ViewState::Rendered => write!(f, "rendered"),
            ViewState::Selected => write!(f, "selected"),
        }
    }
}

/// Camera placement that frames the current shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Framing {
    pub target: Vec3,
    pub eye: Vec3,
    pub distance: f64,
    pub near: f64,
    pub far: f64,
}

struct Shape {
    mesh: Mesh,
    bounds: BoundingBox,
    /// Dropping this releases the uploaded resource
    _handle: GpuMesh,
    real: bool,
}

struct Highlight {
    selection: GeometrySelection,
    _handle: GpuMesh,
}

/// Renders one model state at a time
pub struct ModelView {
    renderer: Arc<dyn RenderBackend>,
    shape: Option<Shape>,
    highlight: Option<Highlight>,
    parameters: BTreeMap<String, Value>,
    source_test_case_id: Option<String>,
}

impl ModelView {
    pub fn new(renderer: Arc<dyn RenderBackend>) -> Self {
        Self {
            renderer,
            shape: None,
            highlight: None,
            parameters: BTreeMap::new(),
            source_test_case_id: None,
        }
    }

    pub fn state(&self) -> ViewState {
        match &self.shape {
            None => ViewState::Empty,
            Some(shape) if !shape.real => ViewState::Placeholder,
            Some(_) if self.highlight.is_some() => ViewState::Selected,
            Some(_) => ViewState::Rendered,
        }
    }

    /// Replace the shown model
    ///
    /// A decodable mesh is rendered as-is. A missing model, a model without
    /// mesh data, or mesh data that fails to decode shows a placeholder sized
    /// from the model's bounding box.
    pub fn update(&mut self, model: Option<&ModelState>) -> ViewState {
        self.highlight = None;
        self.shape = None;

        self.parameters = model.map(|m| m.parameters.clone()).unwrap_or_default();
        self.source_test_case_id = model.and_then(|m| m.source_test_case_id.clone());

        let decoded = match model.and_then(|m| m.mesh_data()) {
            Some(data) => match Mesh::decode(data) {
                Ok(mesh) => Some(mesh),
                Err(e) => {
                    tracing::warn!("Mesh decode failed, showing placeholder: {}", e);
                    None
                }
            },
            None => None,
        };

        self.shape = Some(match decoded {
            Some(mesh) => self.install(mesh, true),
            None => {
                let bounds = model
                    .and_then(|m| m.bounding_box())
                    .filter(|b| b.is_valid() && b.diagonal() > 0.0)
                    .copied()
                    .unwrap_or_else(|| BoundingBox::centered_cube(DEFAULT_PLACEHOLDER_EXTENT));
                self.install(Mesh::cuboid(&bounds), false)
            }
        });

        let state = self.state();
        tracing::debug!(%state, "Model view updated");
        state
    }

    fn install(&self, mesh: Mesh, real: bool) -> Shape {
        let kind = if real {
            ShapeKind::Mesh
        } else {
            ShapeKind::Placeholder
        };
        let handle = GpuMesh::upload(&self.renderer, &mesh, kind);
        let bounds = mesh
            .bounds()
            .unwrap_or_else(|| BoundingBox::centered_cube(DEFAULT_PLACEHOLDER_EXTENT));
        Shape {
            mesh,
            bounds,
            _handle: handle,
            real,
        }
    }

    /// Release everything and return to `Empty`
    pub fn clear(&mut self) {
        self.highlight = None;
        self.shape = None;
        self.parameters.clear();
        self.source_test_case_id = None;
    }

    /// Select the nearest face hit by a ray
    ///
    /// Only a real mesh can be picked. A miss clears any selection.
    pub fn pick(&mut self, origin: Vec3, dir: Vec3) -> Option<&GeometrySelection> {
        let shape = self.shape.as_ref().filter(|s| s.real)?;

        let Some(hit) = shape.mesh.raycast(origin, dir) else {
            self.highlight = None;
            return None;
        };

        let selection = GeometrySelection {
            element_kind: ElementKind::Face,
            element_id: format!("face_{}", hit.triangle),
            coordinates: hit.point,
            normal: Some(hit.normal),
        };
        let overlay = shape.mesh.extract_triangle(hit.triangle)?;

        // Drop the old overlay before uploading the new one
        self.highlight = None;
        let handle = GpuMesh::upload(&self.renderer, &overlay, ShapeKind::Highlight);
        self.highlight = Some(Highlight {
            selection,
            _handle: handle,
        });
        self.selection()
    }

    /// Drop the selection, keeping the mesh
    pub fn deselect(&mut self) {
        self.highlight = None;
    }

    pub fn selection(&self) -> Option<&GeometrySelection> {
        self.highlight.as_ref().map(|h| &h.selection)
    }

    /// Camera placement framing the shown shape
    pub fn fit_view(&self) -> Option<Framing> {
        let bounds = self.shape.as_ref()?.bounds;
        let target = bounds.center();
        let radius = (bounds.diagonal() / 2.0).max(f64::EPSILON);

        let half_fov = (FIELD_OF_VIEW_DEG / 2.0).to_radians();
        let distance = radius / half_fov.sin();
        let eye = add(target, scale(normalize([1.0, 1.0, 1.0]), distance));

        Some(Framing {
            target,
            eye,
            distance,
            near: (distance - radius).max(distance * 0.01),
            far: distance + radius * 2.0,
        })
    }

    /// Triangle mesh of a real model, `None` for placeholders
    pub fn real_mesh(&self) -> Option<&Mesh> {
        self.shape.as_ref().filter(|s| s.real).map(|s| &s.mesh)
    }

    /// Binary STL of a real model; placeholders are never exported
    pub fn export_stl(&self) -> Option<Vec<u8>> {
        self.real_mesh().map(Mesh::to_binary_stl)
    }

    /// Extent of the shown shape
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.shape.as_ref().map(|s| s.bounds)
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn source_test_case_id(&self) -> Option<&str> {
        self.source_test_case_id.as_deref()
    }
}

impl std::fmt::Debug for ModelView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelView")
            .field("state", &self.state())
            .field("selection", &self.selection())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cube_model_state, meshless_model_state};
    use crate::viewer::renderer::HeadlessRenderer;
    use cm_protocol::MeshData;

    fn view() -> (ModelView, Arc<HeadlessRenderer>) {
        let renderer = HeadlessRenderer::new();
        (ModelView::new(renderer.clone()), renderer)
    }

    #[test]
    fn test_starts_empty() {
        let (view, renderer) = view();
        assert_eq!(view.state(), ViewState::Empty);
        assert!(view.fit_view().is_none());
        assert_eq!(renderer.live_count(), 0);
    }

    #[test]
    fn test_placeholder_released_when_mesh_arrives() {
        let (mut view, renderer) = view();

        assert_eq!(view.update(None), ViewState::Placeholder);
        assert_eq!(renderer.live_of(ShapeKind::Placeholder), 1);

        assert_eq!(view.update(Some(&cube_model_state())), ViewState::Rendered);
        assert_eq!(renderer.live_of(ShapeKind::Placeholder), 0);
        assert_eq!(renderer.live_of(ShapeKind::Mesh), 1);
        assert_eq!(renderer.live_count(), 1);
    }

    #[test]
    fn test_repeated_updates_do_not_leak() {
        let (mut view, renderer) = view();
        for _ in 0..10 {
            view.update(Some(&cube_model_state()));
            view.pick([0.1, 0.2, 5.0], [0.0, 0.0, -1.0]);
            view.update(Some(&meshless_model_state()));
        }
        assert_eq!(renderer.live_count(), 1);
        assert_eq!(renderer.upload_count(), 30);
    }

    #[test]
    fn test_meshless_model_uses_bounding_box() {
        let (mut view, _renderer) = view();
        let mut model = meshless_model_state();
        model.bounding_box = Some(BoundingBox::new([0.0, 0.0, 0.0], [4.0, 2.0, 1.0]));

        assert_eq!(view.update(Some(&model)), ViewState::Placeholder);
        assert_eq!(view.bounds().unwrap().max, [4.0, 2.0, 1.0]);
        assert_eq!(view.parameters()["width"], serde_json::json!(10.0));
        assert!(view.real_mesh().is_none());
        assert!(view.export_stl().is_none());
    }

    #[test]
    fn test_corrupt_mesh_falls_back_to_placeholder() {
        let (mut view, renderer) = view();
        let mut model = cube_model_state();
        model.mesh_data = Some(MeshData {
            format: "stl".to_string(),
            data_base64: "AAAA".to_string(),
        });

        assert_eq!(view.update(Some(&model)), ViewState::Placeholder);
        assert_eq!(view.bounds().unwrap(), BoundingBox::centered_cube(1.0));
        assert_eq!(renderer.live_of(ShapeKind::Mesh), 0);
    }

    #[test]
    fn test_pick_hit_and_miss() {
        let (mut view, renderer) = view();
        view.update(Some(&cube_model_state()));

        let selection = view.pick([0.1, 0.2, 5.0], [0.0, 0.0, -1.0]).cloned().unwrap();
        assert_eq!(selection.element_kind, ElementKind::Face);
        assert!(selection.element_id.starts_with("face_"));
        assert!((selection.coordinates[2] - 0.5).abs() < 1e-9);
        assert_eq!(selection.normal, Some([0.0, 0.0, 1.0]));
        assert_eq!(view.state(), ViewState::Selected);
        assert_eq!(renderer.live_of(ShapeKind::Highlight), 1);

        // A second hit replaces the overlay
        view.pick([0.0, 5.0, 0.1], [0.0, -1.0, 0.0]);
        assert_eq!(renderer.live_of(ShapeKind::Highlight), 1);

        assert!(view.pick([9.0, 9.0, 5.0], [0.0, 0.0, -1.0]).is_none());
        assert_eq!(view.state(), ViewState::Rendered);
        assert_eq!(renderer.live_of(ShapeKind::Highlight), 0);
    }

    #[test]
    fn test_placeholder_cannot_be_picked() {
        let (mut view, _renderer) = view();
        view.update(None);
        assert!(view.pick([0.0, 0.0, 50.0], [0.0, 0.0, -1.0]).is_none());
        assert_eq!(view.state(), ViewState::Placeholder);
    }

    #[test]
    fn test_update_clears_selection() {
        let (mut view, _renderer) = view();
        view.update(Some(&cube_model_state()));
        view.pick([0.1, 0.2, 5.0], [0.0, 0.0, -1.0]);

        assert_eq!(view.update(Some(&cube_model_state())), ViewState::Rendered);
        assert!(view.selection().is_none());
    }

    #[test]
    fn test_deselect_and_clear() {
        let (mut view, renderer) = view();
        view.update(Some(&cube_model_state()));
        view.pick([0.1, 0.2, 5.0], [0.0, 0.0, -1.0]);

        view.deselect();
        assert_eq!(view.state(), ViewState::Rendered);

        view.clear();
        assert_eq!(view.state(), ViewState::Empty);
        assert_eq!(renderer.live_count(), 0);
    }

    #[test]
    fn test_fit_view_is_idempotent() {
        let (mut view, _renderer) = view();
        view.update(Some(&cube_model_state()));
        view.pick([0.1, 0.2, 5.0], [0.0, 0.0, -1.0]);

        let first = view.fit_view().unwrap();
        let second = view.fit_view().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.target, [0.0, 0.0, 0.0]);
        assert!(first.distance > 0.0 && first.near < first.distance && first.far > first.distance);
        assert_eq!(view.state(), ViewState::Selected);
    }

    #[test]
    fn test_export_real_mesh() {
        let (mut view, _renderer) = view();
        view.update(Some(&cube_model_state()));
        let stl = view.export_stl().unwrap();
        assert_eq!(Mesh::from_stl(&stl).unwrap().triangle_count(), 12);
    }
}
