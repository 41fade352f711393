//! Volcengine TTS connector implementation
//!
//! Implements the `NarrationSource` trait for the V3 unidirectional
//! streaming endpoint.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpStreamResponse};
use core_async::sync::CancellationToken;
use core_playback::{pump_stream, ChunkSender, NarrationSource, ProtocolConfig, StreamOutcome};
use core_runtime::config::TtsApiConfig;
use core_runtime::logging::mask_identifier;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, VolcengineTtsError};
use crate::types::{ErrorBody, TtsRequestBody};

/// Upper bound on an error response body read for its message.
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;

/// Longest raw error body excerpt used when no message can be extracted.
const MAX_ERROR_EXCERPT_CHARS: usize = 200;

/// Response header carrying the service-side trace id.
const LOG_ID_HEADER: &str = "x-tt-logid";

/// Volcengine TTS connector
///
/// Issues one streaming POST per narration and forwards the decoded audio
/// into the session's chunk queue.
///
/// # Example
///
/// ```ignore
/// use provider_volcengine_tts::VolcengineTtsConnector;
///
/// let connector = VolcengineTtsConnector::new(http_client, tts_config);
/// controller
///     .start_streaming(|chunks, cancel| async move {
///         connector.narrate("从前有座山", chunks, cancel).await
///     })
///     .await?;
/// ```
pub struct VolcengineTtsConnector {
    http_client: Arc<dyn HttpClient>,
    config: TtsApiConfig,
    protocol: ProtocolConfig,
}

impl std::fmt::Debug for VolcengineTtsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolcengineTtsConnector")
            .field("config", &self.config)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl VolcengineTtsConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, config: TtsApiConfig) -> Self {
        Self {
            http_client,
            config,
            protocol: ProtocolConfig::default(),
        }
    }

    pub fn with_protocol_config(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn config(&self) -> &TtsApiConfig {
        &self.config
    }

    /// Build the authenticated request for `text`.
    ///
    /// Fails before anything is sent when a credential is missing.
    pub fn build_request(&self, text: &str, request_id: &str) -> Result<HttpRequest> {
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            return Err(VolcengineTtsError::MissingCredentials { missing });
        }
        if text.trim().is_empty() {
            return Err(VolcengineTtsError::EmptyText);
        }

        let body = TtsRequestBody::from_config(&self.config, text)
            .map_err(|e| VolcengineTtsError::RequestBuild(e.to_string()))?;

        let request = HttpRequest::new(HttpMethod::Post, self.config.endpoint.as_str())
            .header("X-Api-App-Id", self.config.app_id.as_str())
            .header("X-Api-Access-Key", self.config.access_key.as_str())
            .header("X-Api-Resource-Id", self.config.resource_id.as_str())
            .header("X-Api-Request-Id", request_id)
            .json(&body)?;

        Ok(request)
    }

    /// Send the request, giving up as soon as `cancel` fires.
    ///
    /// Returns `None` when cancelled before the response headers arrived.
    async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<HttpStreamResponse>> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            response = self.http_client.execute_stream(request) => response?,
        };

        if response.is_success() {
            return Ok(Some(response));
        }

        let status_code = response.status;
        let message = match response.into_buffered(MAX_ERROR_BODY_BYTES).await {
            Ok(buffered) => error_message(&buffered.body),
            Err(e) => {
                debug!(error = %e, "Failed to read error response body");
                None
            }
        }
        .unwrap_or_else(|| format!("HTTP {}", status_code));

        warn!(status = status_code, message = %message, "TTS request rejected");
        Err(VolcengineTtsError::ApiError {
            status_code,
            message,
        })
    }
}

/// Message of an error response: JSON `message` / `error.message`, otherwise
/// a short excerpt of the raw body.
fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if let Some(message) = parsed.message() {
            return Some(message.to_string());
        }
    }

    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_ERROR_EXCERPT_CHARS).collect())
}

fn header_value<'a>(response: &'a HttpStreamResponse, name: &str) -> Option<&'a str> {
    response
        .headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[async_trait]
impl NarrationSource for VolcengineTtsConnector {
    #[instrument(skip(self, text, chunks, cancel), fields(chars = text.chars().count()))]
    async fn narrate(
        &self,
        text: &str,
        chunks: ChunkSender,
        cancel: CancellationToken,
    ) -> core_playback::Result<()> {
        let request_id = Uuid::new_v4().to_string();
        let request = self.build_request(text, &request_id)?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        debug!(
            request_id = %request_id,
            app_id = %mask_identifier(&self.config.app_id),
            voice = %self.config.voice,
            "Opening TTS stream"
        );

        let Some(response) = self.open_stream(request, &cancel).await? else {
            debug!(request_id = %request_id, "TTS request cancelled before response");
            return Ok(());
        };

        if let Some(log_id) = header_value(&response, LOG_ID_HEADER) {
            debug!(request_id = %request_id, log_id = %log_id, "TTS stream opened");
        }

        match pump_stream(response.body, &chunks, &cancel, &self.protocol).await? {
            StreamOutcome::Completed(stats) => {
                info!(
                    request_id = %request_id,
                    chunks = stats.audio_chunks,
                    bytes = stats.audio_bytes,
                    skipped = stats.skipped_lines,
                    "TTS stream completed"
                );
            }
            StreamOutcome::Cancelled => {
                debug!(request_id = %request_id, "TTS stream cancelled");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "volcengine-tts"
    }
}
