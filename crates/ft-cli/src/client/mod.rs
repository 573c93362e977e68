//! HTTP client for the engine's polling API
//!
//! Every call is a plain request/response; output of running commands is
//! collected by polling with the cursor the previous poll returned.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use ft_core::api::{
    Ack, CompletionRequest, CompletionResponse, CreateSessionRequest, ErrorBody, ExecuteRequest,
    ExecuteResponse, ExecutionView, FanoutAccepted, FanoutRequest, HealthResponse, PollResponse,
    SessionDescriptor, SessionList,
};
use ft_core::{ExecutionId, HostId};

/// Default engine address
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8722";

/// Upper bound on a single request, above the engine's own command bound
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors returned by [`EngineClient`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The engine answered with an error body
    #[error("{message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },

    /// The request never got an answer
    #[error("Request to the engine failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Machine-readable kind of an API error
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::Api { kind, .. } => Some(kind),
            ClientError::Http(_) => None,
        }
    }

    /// The command needs `--yes` (or an interactive confirmation)
    pub fn needs_confirmation(&self) -> bool {
        self.kind() == Some("confirmation_required")
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Client of one engine
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl EngineClient {
    /// Create a client for `server` authenticating with `token`
    pub fn new(server: &str, token: Option<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/api", server.trim_end_matches('/')),
            token,
        })
    }

    /// Engine address the client talks to
    pub fn server(&self) -> &str {
        self.base.trim_end_matches("/api")
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        self.send(self.request(Method::GET, "/health")).await
    }

    pub async fn list_sessions(&self) -> ClientResult<Vec<SessionDescriptor>> {
        let list: SessionList = self.send(self.request(Method::GET, "/sessions")).await?;
        Ok(list.sessions)
    }

    /// Create the session for a host, or join the existing one
    pub async fn create_session(&self, host_id: &str) -> ClientResult<SessionDescriptor> {
        let body = CreateSessionRequest {
            host_id: HostId::new(host_id),
        };
        self.send_json(Method::POST, "/sessions", &body).await
    }

    pub async fn execute(
        &self,
        session_id: &str,
        command: &str,
        confirm: bool,
        wait: bool,
    ) -> ClientResult<ExecuteResponse> {
        let body = ExecuteRequest {
            command: command.to_string(),
            confirm,
            wait,
        };
        self.send_json(
            Method::POST,
            &format!("/sessions/{}/execute", session_id),
            &body,
        )
        .await
    }

    pub async fn poll(&self, session_id: &str, since: Option<u64>) -> ClientResult<PollResponse> {
        let mut request = self.request(Method::GET, &format!("/sessions/{}/poll", session_id));
        if let Some(since) = since {
            request = request.query(&[("since", since)]);
        }
        self.send(request).await
    }

    pub async fn completions(&self, session_id: &str, partial: &str) -> ClientResult<Vec<String>> {
        let body = CompletionRequest {
            partial: partial.to_string(),
            cwd: None,
        };
        let response: CompletionResponse = self
            .send_json(
                Method::POST,
                &format!("/sessions/{}/completions", session_id),
                &body,
            )
            .await?;
        Ok(response.suggestions)
    }

    pub async fn interrupt(&self, session_id: &str) -> ClientResult<()> {
        let _: Ack = self
            .send(self.request(Method::POST, &format!("/sessions/{}/interrupt", session_id)))
            .await?;
        Ok(())
    }

    pub async fn close(&self, session_id: &str) -> ClientResult<()> {
        let _: Ack = self
            .send(self.request(Method::DELETE, &format!("/sessions/{}", session_id)))
            .await?;
        Ok(())
    }

    /// Start a fan-out; returns its execution id
    pub async fn submit(
        &self,
        command: &str,
        host_ids: &[String],
        confirm: bool,
    ) -> ClientResult<ExecutionId> {
        let body = FanoutRequest {
            command: command.to_string(),
            host_ids: host_ids.iter().map(HostId::new).collect(),
            confirm,
        };
        let accepted: FanoutAccepted = self.send_json(Method::POST, "/executions", &body).await?;
        Ok(accepted.execution_id)
    }

    pub async fn execution(&self, execution_id: &str) -> ClientResult<ExecutionView> {
        self.send(self.request(Method::GET, &format!("/executions/{}", execution_id)))
            .await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        self.send(self.request(method, path).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request.send().await?;
        tracing::debug!("{} {}", response.status(), response.url());
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let (kind, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.message),
        Err(_) => (
            "http".to_string(),
            if text.is_empty() {
                format!("engine returned {}", status)
            } else {
                text
            },
        ),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        kind,
        message,
    })
}
