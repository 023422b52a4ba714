use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ClientError;
use crate::metrics::track_remote_call;
use crate::models::answer::SubmitAnswerRequest;
use crate::models::results::Results;
use crate::models::SessionEnvelope;

/// REST contract of the remote grading service.
#[async_trait]
pub trait ExamService: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<SessionEnvelope, ClientError>;

    async fn submit_answer(
        &self,
        session_id: &str,
        req: &SubmitAnswerRequest,
    ) -> Result<(), ClientError>;

    async fn complete_session(&self, session_id: &str) -> Result<(), ClientError>;

    async fn get_results(&self, session_id: &str) -> Result<Results, ClientError>;
}

impl ClientError {
    /// Transport hiccups and 5xx/429 responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

pub struct HttpExamService {
    http_client: Client,
    base_url: Url,
    token: Option<String>,
    client_id: String,
}

impl HttpExamService {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        // Url::join drops the last path segment unless it ends with '/'
        let mut base = config.api_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            http_client,
            base_url: Url::parse(&base)?,
            token: config.api_token.clone(),
            client_id: Uuid::new_v4().to_string(),
        })
    }

    fn endpoint(&self, session_id: &str, suffix: Option<&str>) -> Result<Url, ClientError> {
        let mut url = self.base_url.join("api/v1/sessions/")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(session_id);
        if let Some(suffix) = suffix {
            url.path_segments_mut()
                .map_err(|_| ClientError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
                .push(suffix);
        }
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("x-client-id", &self.client_id);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check_status(session_id: &str, response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ClientError::NotFound(session_id.to_string()));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ClientError::Status { status, body })
    }
}

#[async_trait]
impl ExamService for HttpExamService {
    async fn get_session(&self, session_id: &str) -> Result<SessionEnvelope, ClientError> {
        let url = self.endpoint(session_id, None)?;
        tracing::debug!("Fetching session {} from {}", session_id, url);

        track_remote_call("get_session", async {
            let response = self.authorize(self.http_client.get(url)).send().await?;
            let response = Self::check_status(session_id, response).await?;
            let envelope: SessionEnvelope = response.json().await?;

            if envelope.questions.is_empty() {
                return Err(ClientError::Empty(session_id.to_string()));
            }
            Ok(envelope)
        })
        .await
    }

    async fn submit_answer(
        &self,
        session_id: &str,
        req: &SubmitAnswerRequest,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(session_id, Some("answers"))?;
        tracing::debug!(
            "Submitting answer: session={}, question={}",
            session_id,
            req.question_id
        );

        track_remote_call("submit_answer", async {
            let response = self
                .authorize(self.http_client.post(url))
                .json(req)
                .send()
                .await?;
            Self::check_status(session_id, response).await?;
            Ok(())
        })
        .await
    }

    async fn complete_session(&self, session_id: &str) -> Result<(), ClientError> {
        let url = self.endpoint(session_id, Some("complete"))?;
        tracing::debug!("Completing session {}", session_id);

        track_remote_call("complete_session", async {
            let response = self.authorize(self.http_client.post(url)).send().await?;
            Self::check_status(session_id, response).await?;
            Ok(())
        })
        .await
    }

    async fn get_results(&self, session_id: &str) -> Result<Results, ClientError> {
        let url = self.endpoint(session_id, Some("results"))?;
        tracing::debug!("Fetching results for session {}", session_id);

        track_remote_call("get_results", async {
            let response = self.authorize(self.http_client.get(url)).send().await?;
            let response = Self::check_status(session_id, response).await?;
            Ok(response.json().await?)
        })
        .await
    }
}
