//! REST collaborators over HTTP
//!
//! Non-2xx responses become [`BackendError::Status`] carrying the server's
//! `detail` field when present, or the raw body otherwise.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use url::Url;

use cm_core::config::ClientConfig;
use cm_core::error::BackendError;
use cm_core::traits::Backend;
use cm_core::{CmError, ExportFormat};
use cm_protocol::{
    EditRequest, EditResponse, HealthStatus, ModelInfo, ReferenceExecution, SessionId,
    SessionStart, SessionState,
};

/// [`Backend`] talking to the CM2 server
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, CmError> {
        let base = config.http_base()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::Http(format!("invalid path {}: {}", path, e)))
    }

    async fn get(&self, path: &str) -> Result<Response, BackendError> {
        let url = self.url(path)?;
        tracing::debug!(%url, "GET");
        let response = self.client.get(url).send().await.map_err(http_error)?;
        check_status(response).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Response, BackendError> {
        let url = self.url(path)?;
        tracing::debug!(%url, "POST");
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(http_error)?;
        check_status(response).await
    }
}

fn http_error(e: reqwest::Error) -> BackendError {
    BackendError::Http(e.to_string())
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    tracing::warn!(status = status.as_u16(), "Backend request failed: {}", message);
    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

/// Pull `field` out of a `{field: ...}` wrapper
async fn unwrap_field(response: Response, field: &str) -> Result<Value, BackendError> {
    let mut body: Value = decode(response).await?;
    body.get_mut(field)
        .map(Value::take)
        .ok_or_else(|| BackendError::Decode(format!("missing '{}' in response", field)))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn start_session(&self) -> Result<SessionStart, BackendError> {
        let response = self.post("api/session/start", None).await?;
        decode(response).await
    }

    async fn model_info(&self) -> Result<ModelInfo, BackendError> {
        decode(self.get("api/model/info").await?).await
    }

    async fn parameters(&self, session: &SessionId) -> Result<Value, BackendError> {
        let response = self
            .get(&format!("api/session/{}/parameters", session))
            .await?;
        unwrap_field(response, "parameters").await
    }

    async fn operations(&self, session: &SessionId) -> Result<Vec<Value>, BackendError> {
        let response = self
            .get(&format!("api/session/{}/operations", session))
            .await?;
        match unwrap_field(response, "operations").await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(BackendError::Decode(format!(
                "operations must be a list, got {}",
                other
            ))),
        }
    }

    async fn session_state(&self, session: &SessionId) -> Result<SessionState, BackendError> {
        decode(self.get(&format!("api/session/{}/state", session)).await?).await
    }

    async fn export(
        &self,
        session: &SessionId,
        format: ExportFormat,
    ) -> Result<Bytes, BackendError> {
        let response = self
            .get(&format!("api/session/{}/export/{}", session, format.as_str()))
            .await?;
        response.bytes().await.map_err(http_error)
    }

    async fn execute_reference(
        &self,
        case_id: &str,
        procedure: &str,
    ) -> Result<ReferenceExecution, BackendError> {
        let body = json!({ "case_id": case_id, "procedure": procedure });
        decode(self.post("api/test/execute_reference", Some(body)).await?).await
    }

    async fn edit(
        &self,
        session: &SessionId,
        request: &EditRequest,
    ) -> Result<EditResponse, BackendError> {
        let path = request.path(session.as_str());
        decode(self.post(&path, Some(request.body())).await?).await
    }

    async fn health(&self) -> Result<HealthStatus, BackendError> {
        decode(self.get("health").await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn backend(server: &MockServer) -> HttpBackend {
        let config = ClientConfig {
            server_url: server.uri(),
            ..Default::default()
        };
        HttpBackend::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_start_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/session/start"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"session_id": "abc123", "status": "success"})),
            )
            .mount(&server)
            .await;

        let start = backend(&server).await.start_session().await.unwrap();
        assert_eq!(start.session_id, "abc123");
        assert!(start.model_info.is_none());
    }

    #[tokio::test]
    async fn test_error_detail_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/session/start"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({"detail": "LLM unavailable"})),
            )
            .mount(&server)
            .await;

        let err = backend(&server).await.start_session().await.unwrap_err();
        match err {
            BackendError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "LLM unavailable");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_endpoints_unwrap_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session/abc123/parameters"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"parameters": {"width": 10}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/session/abc123/operations"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"operations": [{"type": "box"}, {"type": "fillet"}]})),
            )
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let session = SessionId::new("abc123");
        assert_eq!(
            backend.parameters(&session).await.unwrap(),
            json!({"width": 10})
        );
        assert_eq!(backend.operations(&session).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_wrapper_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session/abc123/parameters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"width": 10})))
            .mount(&server)
            .await;

        let err = backend(&server)
            .await
            .parameters(&SessionId::new("abc123"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Decode(_)));
    }

    #[tokio::test]
    async fn test_export_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/session/abc123/export/step"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ISO-10303-21;".to_vec()))
            .mount(&server)
            .await;

        let bytes = backend(&server)
            .await
            .export(&SessionId::new("abc123"), ExportFormat::Step)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ISO-10303-21;");
    }

    #[tokio::test]
    async fn test_execute_reference_posts_case() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/test/execute_reference"))
            .and(body_json(json!({"case_id": "box", "procedure": "result = 1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "no result"})),
            )
            .mount(&server)
            .await;

        let execution = backend(&server)
            .await
            .execute_reference("box", "result = 1")
            .await
            .unwrap();
        assert!(!execution.success);
        assert_eq!(execution.error.as_deref(), Some("no result"));
        assert!(execution.model_state().is_none());
    }

    #[tokio::test]
    async fn test_edit_uses_action_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/session/abc123/edit/checkpoint"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "checkpoint_id": "cp-1"})),
            )
            .mount(&server)
            .await;

        let response = backend(&server)
            .await
            .edit(
                &SessionId::new("abc123"),
                &EditRequest::Checkpoint {
                    description: Some("before fillet".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.payload["checkpoint_id"], "cp-1");
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "healthy", "service": "CM2"})),
            )
            .mount(&server)
            .await;

        assert!(backend(&server).await.health().await.unwrap().is_healthy());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        let config = ClientConfig {
            server_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let err = HttpBackend::new(&config).unwrap().health().await.unwrap_err();
        assert!(matches!(err, BackendError::Http(_)));
    }
}
