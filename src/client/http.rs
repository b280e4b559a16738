//! reqwest implementation of [`ResourceClient`] speaking the backend's JSON envelope.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ClientError, ClientResult, ResourceClient};
use crate::auth::API_KEY_HEADER;
use crate::config::ClientConfig;
use crate::models::{
    CreateParticipationRequest, DeleteOutcome, LoginRequest, Mission, MissionFilter,
    MissionPatch, Participation, ParticipationQuery, RegisterRequest, SpotAdjustment, User,
};

/// Body of every backend response, success or error. `revisionId` is not used client-side.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    message: String,
}

#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| ClientError::Validation("API key is not a valid header".into()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let base_url = Url::parse(&config.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                ClientError::Validation(format!("Invalid backend URL: {}", config.base_url))
            })?;

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    /// `{base}/api/{segments...}`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.http.request(method, self.endpoint(segments))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        let status = response.status();

        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let envelope: Envelope<T> = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            // Non-envelope bodies come from layers in front of the handlers.
            Err(_) if !status.is_success() => {
                let message = String::from_utf8_lossy(&body).into_owned();
                return Err(error_for_status(status, message));
            }
            Err(e) => {
                return Err(ClientError::Server {
                    status: status.as_u16(),
                    message: format!("Malformed response body: {}", e),
                })
            }
        };

        match envelope {
            Envelope {
                success: true,
                data: Some(data),
                ..
            } if status.is_success() => Ok(data),
            Envelope { error, .. } => {
                let message = error
                    .map(|e| e.message)
                    .unwrap_or_else(|| status.to_string());
                Err(error_for_status(status, message))
            }
        }
    }
}

fn error_for_status(status: StatusCode, message: String) -> ClientError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ClientError::Validation(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT => ClientError::Conflict(message),
        other => ClientError::Server {
            status: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ResourceClient for HttpClient {
    async fn list_missions(&self, filter: &MissionFilter) -> ClientResult<Vec<Mission>> {
        self.send(self.request(Method::GET, &["missions"]).query(filter))
            .await
    }

    async fn get_mission(&self, id: &str) -> ClientResult<Mission> {
        self.send(self.request(Method::GET, &["missions", id]))
            .await
    }

    async fn patch_mission(&self, id: &str, patch: &MissionPatch) -> ClientResult<Mission> {
        self.send(
            self.request(Method::PATCH, &["missions", id])
                .json(patch),
        )
        .await
    }

    async fn adjust_spots(&self, id: &str, delta: i64) -> ClientResult<Mission> {
        self.send(
            self.request(Method::POST, &["missions", id, "spots"])
                .json(&SpotAdjustment { delta }),
        )
        .await
    }

    async fn list_participations(
        &self,
        query: &ParticipationQuery,
    ) -> ClientResult<Vec<Participation>> {
        self.send(self.request(Method::GET, &["participations"]).query(query))
            .await
    }

    async fn create_participation(
        &self,
        user_id: &str,
        mission_id: &str,
    ) -> ClientResult<Participation> {
        let body = CreateParticipationRequest {
            user_id: user_id.to_string(),
            mission_id: mission_id.to_string(),
        };
        self.send(self.request(Method::POST, &["participations"]).json(&body))
            .await
    }

    async fn delete_participation(&self, id: &str) -> ClientResult<bool> {
        let outcome: DeleteOutcome = self
            .send(self.request(Method::DELETE, &["participations", id]))
            .await?;
        Ok(outcome.deleted)
    }

    async fn get_user(&self, id: &str) -> ClientResult<User> {
        self.send(self.request(Method::GET, &["users", id]))
            .await
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<User> {
        self.send(self.request(Method::POST, &["users"]).json(request))
            .await
    }

    async fn login(&self, request: &LoginRequest) -> ClientResult<User> {
        self.send(self.request(Method::POST, &["users", "login"]).json(request))
            .await
    }
}
