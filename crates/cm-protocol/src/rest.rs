//! Payloads for the one-shot REST collaborators

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::payload::{BoundingBox, MeshData, ModelInfo, ModelState};

/// Response to a session establishment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

/// Result of running a reference procedure out of band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceExecution {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_data: Option<MeshData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReferenceExecution {
    /// Model state suitable for the viewer, `None` when the run failed
    pub fn model_state(&self) -> Option<ModelState> {
        if !self.success {
            return None;
        }
        Some(ModelState {
            mesh_data: self.mesh_data.clone(),
            bounding_box: self.bounding_box,
            ..Default::default()
        })
    }
}

/// Backend health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: String,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Edit-session operations
#[derive(Debug, Clone, PartialEq)]
pub enum EditRequest {
    /// Load the session's model as editable code
    LoadForEdit { file_path: Option<String> },
    /// Replace the model code directly
    EditCode {
        code: String,
        auto_regenerate: bool,
    },
    /// Apply several parameter changes at once
    UpdateParameters {
        updates: Map<String, Value>,
        auto_regenerate: bool,
    },
    /// Record a checkpoint of the current model
    Checkpoint { description: Option<String> },
    /// Return to an earlier checkpoint
    Rollback { checkpoint_id: String },
    /// Check code without applying it
    Validate { code: String },
}

impl EditRequest {
    /// Action segment of the edit endpoint path
    pub fn action(&self) -> &'static str {
        match self {
            EditRequest::LoadForEdit { .. } => "load",
            EditRequest::EditCode { .. } => "code",
            EditRequest::UpdateParameters { .. } => "parameters",
            EditRequest::Checkpoint { .. } => "checkpoint",
            EditRequest::Rollback { .. } => "rollback",
            EditRequest::Validate { .. } => "validate",
        }
    }

    /// Path of the edit endpoint for a session
    pub fn path(&self, session_id: &str) -> String {
        format!("api/session/{}/edit/{}", session_id, self.action())
    }

    /// JSON request body
    pub fn body(&self) -> Value {
        match self {
            EditRequest::LoadForEdit { file_path } => json!({ "file_path": file_path }),
            EditRequest::EditCode {
                code,
                auto_regenerate,
            } => json!({ "code": code, "auto_regenerate": auto_regenerate }),
            EditRequest::UpdateParameters {
                updates,
                auto_regenerate,
            } => json!({ "parameter_updates": updates, "auto_regenerate": auto_regenerate }),
            EditRequest::Checkpoint { description } => json!({ "description": description }),
            EditRequest::Rollback { checkpoint_id } => json!({ "checkpoint_id": checkpoint_id }),
            EditRequest::Validate { code } => json!({ "code": code }),
        }
    }

    /// Whether a successful response should carry a regenerated model
    pub fn regenerates(&self) -> bool {
        match self {
            EditRequest::EditCode {
                auto_regenerate, ..
            }
            | EditRequest::UpdateParameters {
                auto_regenerate, ..
            } => *auto_regenerate,
            _ => false,
        }
    }
}

/// Model regeneration triggered by an edit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegenerationResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_data: Option<ModelState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of an edit-session operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration_result: Option<RegenerationResult>,
    /// Operation-specific fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EditResponse {
    /// Regenerated model, present only when the edit and the regeneration both succeeded
    pub fn regenerated_model(&self) -> Option<&ModelState> {
        if !self.success {
            return None;
        }
        self.regeneration_result
            .as_ref()
            .filter(|r| r.success)
            .and_then(|r| r.model_data.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_without_model_info() {
        let start: SessionStart =
            serde_json::from_value(json!({"session_id": "abc123"})).unwrap();
        assert_eq!(start.session_id, "abc123");
        assert!(start.model_info.is_none());
    }

    #[test]
    fn test_edit_request_paths() {
        let req = EditRequest::Rollback {
            checkpoint_id: "cp1".to_string(),
        };
        assert_eq!(req.path("s1"), "api/session/s1/edit/rollback");
        assert_eq!(req.body(), json!({"checkpoint_id": "cp1"}));
        assert!(!req.regenerates());

        let req = EditRequest::EditCode {
            code: "box()".to_string(),
            auto_regenerate: true,
        };
        assert!(req.regenerates());
    }

    #[test]
    fn test_edit_response_regenerated_model() {
        let resp: EditResponse = serde_json::from_value(json!({
            "success": true,
            "data": {"code": "x"},
            "regeneration_result": {
                "success": true,
                "model_data": {"mesh_data": {"data_base64": "AAAA"}}
            }
        }))
        .unwrap();

        assert!(resp.payload.contains_key("data"));
        assert!(resp.regenerated_model().unwrap().has_mesh());
    }

    #[test]
    fn test_edit_response_failed_regeneration() {
        let resp: EditResponse = serde_json::from_value(json!({
            "success": true,
            "regeneration_result": {"success": false, "error": "syntax"}
        }))
        .unwrap();
        assert!(resp.regenerated_model().is_none());

        let resp: EditResponse =
            serde_json::from_value(json!({"success": false, "error": "no session"})).unwrap();
        assert_eq!(resp.error.as_deref(), Some("no session"));
        assert!(resp.regenerated_model().is_none());
    }

    #[test]
    fn test_reference_execution_model_state() {
        let ok: ReferenceExecution = serde_json::from_value(json!({
            "success": true,
            "mesh_data": {"format": "stl", "data_base64": "AAAA"}
        }))
        .unwrap();
        assert!(ok.model_state().unwrap().has_mesh());

        let failed: ReferenceExecution =
            serde_json::from_value(json!({"success": false, "error": "boom"})).unwrap();
        assert!(failed.model_state().is_none());
    }
}
