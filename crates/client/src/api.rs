//! REST API client for the detection backend's HTTP endpoints.
//!
//! Wraps the person directory, health check, one-shot detection, and the
//! server-side video utilities using [`reqwest`].

use eyesis_core::clip::Clip;
use eyesis_core::error::CoreError;
use eyesis_core::person::{EnrollRequest, Person};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::messages::{DetectBody, DetectionPayload};

/// HTTP client for one detection backend.
#[derive(Debug, Clone)]
pub struct DetectorApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub active_connections: u64,
    #[serde(default)]
    pub websocket_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PersonsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    persons: Vec<Person>,
}

/// Response of `POST /enroll`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub person: Option<Person>,
}

#[derive(Debug, Deserialize)]
struct UpdatePersonResponse {
    person: Person,
}

/// Response of `POST /extract_frames`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractFramesResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub total_frames: u64,
    #[serde(default)]
    pub output_dir: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum DetectorApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Detection API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body reported `success: false`.
    #[error("Detection API reported failure: {0}")]
    Unsuccessful(String),

    /// The request was rejected locally before being sent.
    #[error(transparent)]
    Invalid(#[from] CoreError),
}

impl DetectorApi {
    /// Create a new API client.
    ///
    /// * `api_url` - Base HTTP URL including the API prefix, e.g.
    ///   `http://localhost:5000/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `GET /persons`: the enrolled person directory.
    pub async fn list_persons(&self) -> Result<Vec<Person>, DetectorApiError> {
        let response = self
            .client
            .get(format!("{}/persons", self.api_url))
            .send()
            .await?;

        let body: PersonsResponse = Self::parse_response(response).await?;
        if !body.success {
            return Err(DetectorApiError::Unsuccessful("person list".into()));
        }
        Ok(body.persons)
    }

    /// `GET /health`: lightweight health check.
    pub async fn health(&self) -> Result<HealthResponse, DetectorApiError> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `POST /detect`: one-shot detection for a single frame.
    pub async fn detect(&self, body: &DetectBody) -> Result<DetectionPayload, DetectorApiError> {
        let response = self
            .client
            .post(format!("{}/detect", self.api_url))
            .json(body)
            .send()
            .await?;

        let payload: DetectionPayload = Self::parse_response(response).await?;
        if payload.success == Some(false) {
            return Err(DetectorApiError::Unsuccessful("detection".into()));
        }
        Ok(payload)
    }

    /// `POST /enroll`: register a new person from a face image.
    pub async fn enroll(&self, request: EnrollRequest) -> Result<EnrollResponse, DetectorApiError> {
        request.validate()?;

        let form = Form::new()
            .text("person_id", request.person_id)
            .text("name", request.name)
            .text("person_type", request.person_type)
            .part("image", Part::bytes(request.image).file_name(request.file_name));

        let response = self
            .client
            .post(format!("{}/enroll", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let body: EnrollResponse = Self::parse_response(response).await?;
        if !body.success {
            return Err(DetectorApiError::Unsuccessful(body.message));
        }
        Ok(body)
    }

    /// `PUT /persons/{id}`: rename or re-categorize a person.
    pub async fn update_person(
        &self,
        person_id: &str,
        name: &str,
        person_type: &str,
    ) -> Result<Person, DetectorApiError> {
        let form = Form::new()
            .text("name", name.to_string())
            .text("person_type", person_type.to_string());

        let response = self
            .client
            .put(format!("{}/persons/{}", self.api_url, person_id))
            .multipart(form)
            .send()
            .await?;

        let body: UpdatePersonResponse = Self::parse_response(response).await?;
        Ok(body.person)
    }

    /// `DELETE /persons/{id}`.
    pub async fn delete_person(&self, person_id: &str) -> Result<(), DetectorApiError> {
        let response = self
            .client
            .delete(format!("{}/persons/{}", self.api_url, person_id))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// `POST /extract_clip`: cut `clip`'s time range out of the source
    /// video and return the encoded video bytes. Open clips are refused.
    pub async fn extract_clip(
        &self,
        video: Vec<u8>,
        video_file_name: &str,
        clip: &Clip,
    ) -> Result<Vec<u8>, DetectorApiError> {
        let end = clip.end_time_seconds.ok_or(CoreError::ClipOpen(clip.id))?;

        let form = Form::new()
            .part("video", Part::bytes(video).file_name(video_file_name.to_string()))
            .text("start_time", clip.start_time_seconds.to_string())
            .text("end_time", end.to_string())
            .text("person_name", clip.person_name.clone());

        let response = self
            .client
            .post(format!("{}/extract_clip", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// `POST /extract_frames`: split a video into frames server-side.
    pub async fn extract_frames(
        &self,
        video: Vec<u8>,
        video_file_name: &str,
    ) -> Result<ExtractFramesResponse, DetectorApiError> {
        let form = Form::new().part("video", Part::bytes(video).file_name(video_file_name.to_string()));

        let response = self
            .client
            .post(format!("{}/extract_frames", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let body: ExtractFramesResponse = Self::parse_response(response).await?;
        if !body.success {
            return Err(DetectorApiError::Unsuccessful("frame extraction".into()));
        }
        Ok(body)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`DetectorApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, DetectorApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DetectorApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DetectorApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), DetectorApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
