use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Invalid context service URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
}

/// One timed transcript excerpt of the video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub start: f64,
    pub duration: f64,
    pub topic: String,
}

impl Transcript {
    /// True when playback time `t` falls inside `[start, start + duration)`
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.start + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContextRequest {
    pub video_id: String,
    pub query_text: String,
    /// Current playback position in seconds
    pub duration: String,
}

impl VideoContextRequest {
    pub fn new(video_id: impl Into<String>, query_text: impl Into<String>, current_time: f64) -> Self {
        Self {
            video_id: video_id.into(),
            query_text: query_text.into(),
            duration: current_time.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoContextResponse {
    pub video_id: String,
    pub subject: String,
    pub exam: String,
    pub class: String,
    #[serde(default)]
    pub topic_transcripts: Vec<Transcript>,
    #[serde(default)]
    pub context_transcripts: Vec<Transcript>,
}

impl VideoContextResponse {
    /// Used when the context service cannot be reached
    pub fn fallback(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            subject: "Science".to_string(),
            exam: "NCERT Board".to_string(),
            class: "10th".to_string(),
            topic_transcripts: Vec::new(),
            context_transcripts: Vec::new(),
        }
    }
}

/// What the prompts know about the video at the moment of the question
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub class: String,
    pub subject: String,
    pub exam: String,
    pub current_time: f64,
    pub current_topic: String,
    pub current_content: String,
    pub context_transcripts: Vec<Transcript>,
}

impl VideoMetadata {
    pub fn from_context(context: VideoContextResponse, current_time: f64) -> Self {
        let current = context
            .context_transcripts
            .iter()
            .find(|transcript| transcript.contains(current_time));

        let (current_topic, current_content) = match current {
            Some(transcript) => (transcript.topic.clone(), transcript.text.clone()),
            None => ("Unknown topic".to_string(), String::new()),
        };

        Self {
            class: context.class,
            subject: context.subject,
            exam: context.exam,
            current_time,
            current_topic,
            current_content,
            context_transcripts: context.context_transcripts,
        }
    }
}

impl Default for VideoMetadata {
    fn default() -> Self {
        Self::from_context(VideoContextResponse::fallback(""), 0.0)
    }
}

#[async_trait::async_trait]
pub trait VideoContextProvider: Send + Sync {
    async fn fetch_context(
        &self,
        request: &VideoContextRequest,
    ) -> Result<VideoContextResponse, ContextError>;
}

/// Client for the transcript vector-search service
pub struct HttpVideoContextClient {
    client: Client,
    endpoint: Url,
}

impl HttpVideoContextClient {
    pub fn new(base_url: &str) -> Result<Self, ContextError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("vector-search")?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl VideoContextProvider for HttpVideoContextClient {
    async fn fetch_context(
        &self,
        request: &VideoContextRequest,
    ) -> Result<VideoContextResponse, ContextError> {
        log::debug!(
            "Context: Fetching context for video {} at {}s",
            request.video_id,
            request.duration
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ContextError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        Ok(response.json().await?)
    }
}
