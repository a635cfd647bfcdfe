//! Payloads carried by channel messages
//!
//! These mirror what the generation backend produces: model states with an
//! encoded surface mesh, execution results for parameter updates, session
//! snapshots and provider metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A point or direction in model space
pub type Vec3 = [f64; 3];

/// Axis-aligned bounding box of a model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl BoundingBox {
    /// Create a bounding box from two corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Cube of edge `size` centered on the origin
    pub fn centered_cube(size: f64) -> Self {
        let half = size / 2.0;
        Self {
            min: [-half, -half, -half],
            max: [half, half, half],
        }
    }

    /// Smallest box containing all points, `None` for an empty iterator
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = *points.next()?;
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for p in points {
            for axis in 0..3 {
                bounds.min[axis] = bounds.min[axis].min(p[axis]);
                bounds.max[axis] = bounds.max[axis].max(p[axis]);
            }
        }
        Some(bounds)
    }

    /// Center of the box
    pub fn center(&self) -> Vec3 {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }

    /// Edge lengths along each axis
    pub fn size(&self) -> Vec3 {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Length of the box diagonal
    pub fn diagonal(&self) -> f64 {
        let [x, y, z] = self.size();
        (x * x + y * y + z * z).sqrt()
    }

    /// Whether all coordinates are finite and min does not exceed max
    pub fn is_valid(&self) -> bool {
        (0..3).all(|axis| {
            self.min[axis].is_finite()
                && self.max[axis].is_finite()
                && self.min[axis] <= self.max[axis]
        })
    }
}

/// Encoded surface mesh produced by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    /// Encoding of the decoded bytes (currently always `stl`)
    #[serde(default = "default_mesh_format")]
    pub format: String,
    /// Base64 of the mesh file
    pub data_base64: String,
}

fn default_mesh_format() -> String {
    "stl".to_string()
}

/// Serializable snapshot of the current 3D model
///
/// The backend sends two shapes under this name: the execution output
/// (`mesh_data` and `bounding_box` at the top level) and the stored dialog
/// state (the same data nested under `geometry_data`). Accessors look in both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Kind of geometry, e.g. `solid`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Encoded mesh, absent when execution produced no geometry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_data: Option<MeshData>,
    /// Model extent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    /// Named model parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_of_mass: Option<Vec3>,
    /// Nested execution output in dialog-state snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_data: Option<Box<ModelState>>,
    /// Benchmark case this state was produced for, set locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_test_case_id: Option<String>,
}

impl ModelState {
    /// Mesh data from the top level or the nested geometry snapshot
    pub fn mesh_data(&self) -> Option<&MeshData> {
        self.mesh_data
            .as_ref()
            .or_else(|| self.geometry_data.as_ref().and_then(|g| g.mesh_data()))
    }

    /// Bounding box from the top level or the nested geometry snapshot
    pub fn bounding_box(&self) -> Option<&BoundingBox> {
        self.bounding_box
            .as_ref()
            .or_else(|| self.geometry_data.as_ref().and_then(|g| g.bounding_box()))
    }

    /// Whether this state carries anything that could be rendered as a mesh
    pub fn has_mesh(&self) -> bool {
        self.mesh_data()
            .map(|m| !m.data_base64.is_empty())
            .unwrap_or(false)
    }
}

/// Kind of geometric element a selection refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Face,
    Edge,
    Vertex,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementKind::Face => write!(f, "face"),
            ElementKind::Edge => write!(f, "edge"),
            ElementKind::Vertex => write!(f, "vertex"),
        }
    }
}

/// A picked element of the current mesh, sent along with user messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometrySelection {
    #[serde(rename = "element_type")]
    pub element_kind: ElementKind,
    pub element_id: String,
    pub coordinates: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<Vec3>,
}

/// Reply to a user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Natural-language reply text
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_state: Option<ModelState>,
}

/// Provider metadata for the generation model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.provider, self.model_name)?;
        if self.is_local {
            write!(f, " (local)")?;
        }
        Ok(())
    }
}

/// Status of a backend execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Error,
    Timeout,
    Cancelled,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Result of executing a plan or a set of graph nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_data: Option<ModelState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Outcome of a pushed parameter change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdateResult {
    pub parameter_name: String,
    pub new_value: Value,
    #[serde(default)]
    pub execution_result: ExecutionResult,
    #[serde(default)]
    pub affected_nodes: Vec<String>,
}

/// Full session snapshot pushed on request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_state: Option<ModelState>,
    #[serde(default)]
    pub conversation_history: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pig_state: Option<Value>,
    #[serde(default)]
    pub is_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_code: Option<String>,
}

/// Domain error reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}
