//! # Core Configuration Module
//!
//! Configuration for the storybook narration core.
//!
//! ## Overview
//!
//! [`CoreConfig`] is assembled with a builder that enforces fail-fast
//! validation: every required bridge must be present and every tunable must be
//! in range before the core is constructed.
//!
//! ## Required Dependencies
//!
//! - `AudioSinkFactory` - provisions the audio destination for each session
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - streaming HTTP (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled and no sink factory is given,
//! a file-spooling sink under the system temp directory is used.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, TtsApiConfig};
//!
//! let config = CoreConfig::builder()
//!     .tts(TtsApiConfig::new("app-id", "access-key", "volc.service_type.10029"))
//!     .sink_factory(Arc::new(MySinkFactory))
//!     .build()?;
//! ```
//!
//! TTS credentials may be left empty at build time (the reader can be opened
//! before the user configured narration); the provider refuses to issue a
//! request until they are filled in.

use crate::error::{Error, Result};
use bridge_traits::{AudioSinkFactory, HttpClient};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// TTS API
// ============================================================================

fn default_tts_endpoint() -> String {
    "https://openspeech.bytedance.com/api/v3/tts/unidirectional".to_string()
}

fn default_voice() -> String {
    "zh_female_cancan_mars_bigtts".to_string()
}

fn default_encoding() -> String {
    "mp3".to_string()
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_speech_rate() -> i32 {
    0
}

fn default_language() -> String {
    "zh-cn".to_string()
}

fn default_user_uid() -> String {
    "storybook-reader".to_string()
}

/// Streaming TTS service settings.
///
/// Field names follow the persisted reader settings (`ttsAppId`,
/// `ttsAccessKey`, ...), so a settings export deserializes directly.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsApiConfig {
    #[serde(default, rename = "ttsAppId")]
    pub app_id: String,

    #[serde(default, rename = "ttsAccessKey")]
    pub access_key: String,

    #[serde(default, rename = "ttsResourceId")]
    pub resource_id: String,

    /// Speaker id.
    #[serde(default = "default_voice", rename = "ttsVoice")]
    pub voice: String,

    /// Full endpoint URL. Point this at a proxy when the host cannot reach
    /// the service directly.
    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Speech rate adjustment, -50..=100 (0 = normal).
    #[serde(default = "default_speech_rate")]
    pub speech_rate: i32,

    /// Language hint sent in the request additions.
    #[serde(default = "default_language")]
    pub language: String,

    /// Caller-chosen user id sent with every request.
    #[serde(default = "default_user_uid")]
    pub user_uid: String,
}

impl Default for TtsApiConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            access_key: String::new(),
            resource_id: String::new(),
            voice: default_voice(),
            endpoint: default_tts_endpoint(),
            encoding: default_encoding(),
            sample_rate: default_sample_rate(),
            speech_rate: default_speech_rate(),
            language: default_language(),
            user_uid: default_user_uid(),
        }
    }
}

impl std::fmt::Debug for TtsApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsApiConfig")
            .field("app_id", &crate::logging::mask_identifier(&self.app_id))
            .field("access_key", &"[REDACTED]")
            .field("resource_id", &self.resource_id)
            .field("voice", &self.voice)
            .field("endpoint", &self.endpoint)
            .field("encoding", &self.encoding)
            .field("sample_rate", &self.sample_rate)
            .field("speech_rate", &self.speech_rate)
            .field("language", &self.language)
            .finish()
    }
}

impl TtsApiConfig {
    pub fn new(
        app_id: impl Into<String>,
        access_key: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            access_key: access_key.into(),
            resource_id: resource_id.into(),
            ..Self::default()
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_speech_rate(mut self, rate: i32) -> Self {
        self.speech_rate = rate;
        self
    }

    /// Whether all three credentials are filled in.
    pub fn has_credentials(&self) -> bool {
        self.missing_credentials().is_empty()
    }

    /// Names of the credential fields that are still empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.app_id.trim().is_empty() {
            missing.push("app_id");
        }
        if self.access_key.trim().is_empty() {
            missing.push("access_key");
        }
        if self.resource_id.trim().is_empty() {
            missing.push("resource_id");
        }
        missing
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(format!(
                "TTS endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            ));
        }
        if self.voice.trim().is_empty() {
            return Err("TTS voice cannot be empty".to_string());
        }
        if self.encoding.trim().is_empty() {
            return Err("TTS audio encoding cannot be empty".to_string());
        }
        if !(8_000..=48_000).contains(&self.sample_rate) {
            return Err(format!(
                "TTS sample rate must be within 8000..=48000 Hz, got {}",
                self.sample_rate
            ));
        }
        if !(-50..=100).contains(&self.speech_rate) {
            return Err(format!(
                "TTS speech rate must be within -50..=100, got {}",
                self.speech_rate
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Narration timing
// ============================================================================

fn default_auto_advance_delay_ms() -> u64 {
    500
}

fn default_auto_restart_delay_ms() -> u64 {
    300
}

fn default_auto_advance() -> bool {
    true
}

/// Page-turn timing for read-aloud mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationConfig {
    /// Turn the page automatically when a page's narration ends.
    #[serde(default = "default_auto_advance")]
    pub auto_advance: bool,

    /// Pause between the end of a page's audio and the automatic page turn.
    #[serde(default = "default_auto_advance_delay_ms")]
    pub auto_advance_delay_ms: u64,

    /// Settle delay between an automatic page turn and narration of the new
    /// page.
    #[serde(default = "default_auto_restart_delay_ms")]
    pub auto_restart_delay_ms: u64,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            auto_advance: default_auto_advance(),
            auto_advance_delay_ms: default_auto_advance_delay_ms(),
            auto_restart_delay_ms: default_auto_restart_delay_ms(),
        }
    }
}

impl NarrationConfig {
    pub fn auto_advance_delay(&self) -> Duration {
        Duration::from_millis(self.auto_advance_delay_ms)
    }

    pub fn auto_restart_delay(&self) -> Duration {
        Duration::from_millis(self.auto_restart_delay_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        const MAX_DELAY_MS: u64 = 10_000;
        if self.auto_advance_delay_ms > MAX_DELAY_MS {
            return Err(format!(
                "auto_advance_delay_ms exceeds {}ms",
                MAX_DELAY_MS
            ));
        }
        if self.auto_restart_delay_ms > MAX_DELAY_MS {
            return Err(format!(
                "auto_restart_delay_ms exceeds {}ms",
                MAX_DELAY_MS
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CoreConfig
// ============================================================================

const DEFAULT_EVENT_BUS_CAPACITY: usize = 100;

/// Core configuration for the narration core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Streaming HTTP client
    pub http_client: Arc<dyn HttpClient>,

    /// Audio sink provider (required)
    pub sink_factory: Arc<dyn AudioSinkFactory>,

    pub tts: TtsApiConfig,

    pub narration: NarrationConfig,

    /// Buffered events per event-bus subscriber before lagging
    pub event_bus_capacity: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("sink_factory", &"AudioSinkFactory { ... }")
            .field("tts", &self.tts)
            .field("narration", &self.narration)
            .field("event_bus_capacity", &self.event_bus_capacity)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<()> {
        self.tts.validate().map_err(Error::Config)?;
        self.narration.validate().map_err(Error::Config)?;

        if self.event_bus_capacity == 0 {
            return Err(Error::Config(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "A streaming HttpClient is required to call the TTS service. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject a platform-native adapter."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn sink_factory_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "AudioSinkFactory".to_string(),
        message: "An AudioSinkFactory is required for narration playback. \
                 Desktop: enable the 'desktop-shims' feature to spool audio to disk. \
                 Web: inject a MediaSource-backed sink."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_sink_factory() -> Result<Arc<dyn AudioSinkFactory>> {
    let dir = std::env::temp_dir().join("storybook-narration");
    let factory: Arc<dyn AudioSinkFactory> = Arc::new(bridge_desktop::SpoolSinkFactory::new(dir));
    Ok(factory)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_sink_factory() -> Result<Arc<dyn AudioSinkFactory>> {
    Err(sink_factory_missing_error())
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    sink_factory: Option<Arc<dyn AudioSinkFactory>>,
    tts: Option<TtsApiConfig>,
    narration: Option<NarrationConfig>,
    event_bus_capacity: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn sink_factory(mut self, factory: Arc<dyn AudioSinkFactory>) -> Self {
        self.sink_factory = Some(factory);
        self
    }

    pub fn tts(mut self, tts: TtsApiConfig) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn narration(mut self, narration: NarrationConfig) -> Self {
        self.narration = Some(narration);
        self
    }

    pub fn event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = Some(capacity);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when a required bridge is absent and no
    ///   platform default is compiled in
    /// - [`Error::Config`] when a value is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let sink_factory = match self.sink_factory {
            Some(factory) => factory,
            None => provide_default_sink_factory()?,
        };

        let config = CoreConfig {
            http_client,
            sink_factory,
            tts: self.tts.unwrap_or_default(),
            narration: self.narration.unwrap_or_default(),
            event_bus_capacity: self
                .event_bus_capacity
                .unwrap_or(DEFAULT_EVENT_BUS_CAPACITY),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{AudioSink, HttpRequest, HttpStreamResponse, SinkDescriptor};

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            Err(bridge_traits::BridgeError::NotAvailable("mock".to_string()))
        }
    }

    struct MockSinkFactory;

    #[async_trait]
    impl AudioSinkFactory for MockSinkFactory {
        async fn create_sink(&self, _descriptor: &SinkDescriptor) -> BridgeResult<Arc<dyn AudioSink>> {
            Err(bridge_traits::BridgeError::NotAvailable("mock".to_string()))
        }
    }

    fn builder_with_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .sink_factory(Arc::new(MockSinkFactory))
    }

    #[test]
    fn test_builder_with_bridges_uses_defaults() {
        let config = builder_with_bridges().build().unwrap();

        assert_eq!(config.tts.voice, "zh_female_cancan_mars_bigtts");
        assert_eq!(config.tts.encoding, "mp3");
        assert_eq!(config.tts.sample_rate, 24_000);
        assert_eq!(config.narration.auto_advance_delay(), Duration::from_millis(500));
        assert_eq!(config.narration.auto_restart_delay(), Duration::from_millis(300));
        assert_eq!(config.event_bus_capacity, DEFAULT_EVENT_BUS_CAPACITY);
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_sink_factory() {
        let err = CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .build()
            .unwrap_err();

        match err {
            Error::CapabilityMissing { capability, .. } => {
                assert_eq!(capability, "AudioSinkFactory")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client() {
        let err = CoreConfig::builder()
            .sink_factory(Arc::new(MockSinkFactory))
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::CapabilityMissing { ref capability, .. } if capability == "HttpClient"));
    }

    #[test]
    fn test_missing_credentials_do_not_block_build() {
        let config = builder_with_bridges().build().unwrap();
        assert!(!config.tts.has_credentials());
        assert_eq!(
            config.tts.missing_credentials(),
            vec!["app_id", "access_key", "resource_id"]
        );
    }

    #[test]
    fn test_credentials_present() {
        let tts = TtsApiConfig::new("app", "key", "volc.service_type.10029");
        assert!(tts.has_credentials());
        assert!(tts.missing_credentials().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let err = builder_with_bridges()
            .tts(TtsApiConfig::default().with_endpoint("ftp://tts"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("endpoint")));
    }

    #[test]
    fn test_validate_rejects_speech_rate_out_of_range() {
        let tts = TtsApiConfig::default().with_speech_rate(200);
        assert!(tts.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_long_delays() {
        let narration = NarrationConfig {
            auto_advance_delay_ms: 60_000,
            ..NarrationConfig::default()
        };
        assert!(narration.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_event_capacity() {
        let err = builder_with_bridges().event_bus_capacity(0).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_tts_config_deserializes_reader_settings() {
        let json = r#"{
            "ttsAppId": "123",
            "ttsAccessKey": "secret",
            "ttsResourceId": "volc.service_type.10029"
        }"#;
        let tts: TtsApiConfig = serde_json::from_str(json).unwrap();

        assert_eq!(tts.app_id, "123");
        assert_eq!(tts.voice, "zh_female_cancan_mars_bigtts");
        assert_eq!(tts.endpoint, default_tts_endpoint());
        assert!(tts.has_credentials());
    }

    #[test]
    fn test_tts_debug_hides_access_key() {
        let tts = TtsApiConfig::new("1234567", "very-secret", "res");
        let debug = format!("{:?}", tts);
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("***4567"));
    }

    #[test]
    fn test_narration_config_partial_json() {
        let narration: NarrationConfig =
            serde_json::from_str(r#"{"auto_advance_delay_ms": 800}"#).unwrap();
        assert_eq!(narration.auto_advance_delay_ms, 800);
        assert_eq!(narration.auto_restart_delay_ms, 300);
        assert!(narration.auto_advance);
    }
}
