//! Volcengine TTS request and error body types
//!
//! Shapes for the V3 unidirectional streaming HTTP endpoint.

use core_runtime::config::TtsApiConfig;
use serde::{Deserialize, Serialize};

/// Top-level request body.
#[derive(Debug, Clone, Serialize)]
pub struct TtsRequestBody {
    pub user: TtsUser,
    pub req_params: TtsRequestParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct TtsUser {
    pub uid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TtsRequestParams {
    pub text: String,

    /// Voice id
    pub speaker: String,

    pub audio_params: AudioParams,

    /// JSON document encoded as a string, as the API expects.
    pub additions: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioParams {
    /// `mp3`, `ogg_opus` or `pcm`
    pub format: String,
    pub sample_rate: u32,
    /// -50 (slow) ..= 100 (fast), 0 is normal speed
    pub speech_rate: i32,
}

/// Free-form options carried inside `req_params.additions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Additions {
    pub explicit_language: String,
    /// Read markdown markup literally instead of stripping it.
    pub disable_markdown_filter: bool,
}

impl TtsRequestBody {
    /// Assemble the body for `text` from the configured voice and audio
    /// settings.
    pub fn from_config(config: &TtsApiConfig, text: &str) -> serde_json::Result<Self> {
        let additions = Additions {
            explicit_language: config.language.clone(),
            disable_markdown_filter: false,
        };

        Ok(Self {
            user: TtsUser {
                uid: config.user_uid.clone(),
            },
            req_params: TtsRequestParams {
                text: text.to_string(),
                speaker: config.voice.clone(),
                audio_params: AudioParams {
                    format: config.encoding.clone(),
                    sample_rate: config.sample_rate,
                    speech_rate: config.speech_rate,
                },
                additions: serde_json::to_string(&additions)?,
            },
        })
    }
}

/// Body of a non-2xx answer. The gateway and the TTS service use different
/// shapes; both are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Most specific human-readable message, if any.
    pub fn message(&self) -> Option<&str> {
        let non_blank = |m: &&str| !m.trim().is_empty();
        self.message.as_deref().filter(non_blank).or_else(|| {
            self.error
                .as_ref()
                .and_then(|e| e.message.as_deref())
                .filter(non_blank)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let config = TtsApiConfig::new("app", "key", "volc.service_type.10029").with_speech_rate(10);
        let body = TtsRequestBody::from_config(&config, "从前有座山").unwrap();
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["user"]["uid"], "storybook-reader");
        assert_eq!(json["req_params"]["text"], "从前有座山");
        assert_eq!(json["req_params"]["speaker"], "zh_female_cancan_mars_bigtts");
        assert_eq!(json["req_params"]["audio_params"]["format"], "mp3");
        assert_eq!(json["req_params"]["audio_params"]["sample_rate"], 24000);
        assert_eq!(json["req_params"]["audio_params"]["speech_rate"], 10);

        // additions travels as a string holding JSON
        let additions: serde_json::Value =
            serde_json::from_str(json["req_params"]["additions"].as_str().unwrap()).unwrap();
        assert_eq!(additions["explicit_language"], "zh-cn");
        assert_eq!(additions["disable_markdown_filter"], false);
    }

    #[test]
    fn test_error_body_top_level_message() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"code":45000000,"message":"resource not granted"}"#).unwrap();
        assert_eq!(body.message(), Some("resource not granted"));
        assert_eq!(body.code, Some(45000000));
    }

    #[test]
    fn test_error_body_nested_message() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":{"code":"InvalidAccessKey","message":"access key is invalid"}}"#,
        )
        .unwrap();
        assert_eq!(body.message(), Some("access key is invalid"));
    }

    #[test]
    fn test_error_body_blank_message_ignored() {
        let body: ErrorBody = serde_json::from_str(r#"{"message":"  "}"#).unwrap();
        assert_eq!(body.message(), None);
    }
}
