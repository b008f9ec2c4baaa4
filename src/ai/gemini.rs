// gemini.rs - Waste classification through the Gemini generateContent API.
//
// One non-streaming request per analysis. The request carries the image as
// inline data plus a fixed instruction, and pins the output to a four-field
// JSON schema via `responseSchema`. The schema cannot force the category
// enum, so the decoded record goes through `WasteCategory::repair`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ClassificationResult, ClassifyError, RawClassification, WasteClassifier};
use crate::capture::EncodedPayload;
use crate::settings::{Settings, SettingsError};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const CLASSIFY_PROMPT: &str = "Analyze the object in this image. Identify the object, \
determine if it is recyclable, compostable, or non-recyclable trash. Provide a brief, \
actionable disposal suggestion and a short, related eco-friendly tip. \
Respond ONLY with the specified JSON format.";

pub struct GeminiClient {
    endpoint: String,
    api_key: String,
    model: String,
    prompt: String,
    timeout: Duration,
    client: Client,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            prompt: CLASSIFY_PROMPT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            client: Client::new(),
        }
    }

    /// Build a client from settings. Fails if no API key is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let client = Self::new(&settings.endpoint, settings.api_key()?, &settings.model)
            .with_prompt(&settings.prompt)
            .with_timeout(settings.request_timeout());
        Ok(client)
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        if !prompt.trim().is_empty() {
            self.prompt = prompt;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request_body(&self, payload: &EncodedPayload) -> Value {
        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [
                        {
                            "inlineData": {
                                "mimeType": payload.mime_type,
                                "data": payload.data
                            }
                        },
                        { "text": self.prompt }
                    ]
                }
            ],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema()
            }
        })
    }
}

#[async_trait]
impl WasteClassifier for GeminiClient {
    async fn classify(
        &self,
        payload: &EncodedPayload,
    ) -> Result<ClassificationResult, ClassifyError> {
        if payload.is_empty() {
            return Err(ClassifyError::NoInput);
        }

        log::info!("[LLM] Model: {}", self.model);
        log::debug!(
            "[LLM] Sending {} base64 chars ({})",
            payload.data.len(),
            payload.mime_type
        );
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(self.url())
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(&self.build_request_body(payload))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        log::info!("[LLM] HTTP {} in {}ms", status, start.elapsed().as_millis());

        if !status.is_success() {
            return Err(ClassifyError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let text = extract_text(&body)?;
        decode_classification(&text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

impl GeminiClient {
    fn transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            ClassifyError::Timeout(self.timeout)
        } else {
            ClassifyError::ConnectionError(e.to_string())
        }
    }
}

/// Output schema sent as `generationConfig.responseSchema`.
fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "objectName": {
                "type": "STRING",
                "description": "The name of the identified waste item (e.g., 'plastic bottle', 'apple core')."
            },
            "classification": {
                "type": "STRING",
                "description": "The waste category: 'Recyclable', 'Compostable', or 'Non-Recyclable'."
            },
            "disposalSuggestion": {
                "type": "STRING",
                "description": "Clear, concise instructions on how to properly dispose of the item."
            },
            "ecoTip": {
                "type": "STRING",
                "description": "A short, actionable eco-friendly tip related to the item or waste in general."
            }
        },
        "required": ["objectName", "classification", "disposalSuggestion", "ecoTip"]
    })
}

// ── Response envelope ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate.
fn extract_text(body: &str) -> Result<String, ClassifyError> {
    let envelope: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| ClassifyError::InvalidResponse(format!("bad envelope: {}", e)))?;

    let text: String = envelope
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(ClassifyError::InvalidResponse("no text in response".into()));
    }
    Ok(text.to_string())
}

/// Fields the model must return, in schema order.
const REQUIRED_FIELDS: [&str; 4] = ["objectName", "classification", "disposalSuggestion", "ecoTip"];

/// Decode the model's JSON text into a validated result.
pub fn decode_classification(text: &str) -> Result<ClassificationResult, ClassifyError> {
    let value: serde_json::Value = serde_json::from_str(text.trim())
        .map_err(|e| ClassifyError::InvalidResponse(format!("bad classification JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| ClassifyError::InvalidResponse("classification is not an object".into()))?;
    if let Some(field) = REQUIRED_FIELDS.into_iter().find(|f| !object.contains_key(*f)) {
        return Err(ClassifyError::MissingField(field));
    }

    let raw: RawClassification = serde_json::from_value(value)
        .map_err(|e| ClassifyError::InvalidResponse(format!("bad classification fields: {}", e)))?;
    Ok(raw.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::WasteCategory;

    fn payload() -> EncodedPayload {
        EncodedPayload {
            data: "aGVsbG8=".into(),
            mime_type: "image/png".into(),
        }
    }

    #[test]
    fn request_body_structure() {
        let client = GeminiClient::new(DEFAULT_ENDPOINT, "k", DEFAULT_MODEL);
        let body = client.build_request_body(&payload());

        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[0]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(parts[1]["text"], CLASSIFY_PROMPT);

        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        let required = config["responseSchema"]["required"].as_array().unwrap();
        assert_eq!(
            required,
            &vec![
                json!("objectName"),
                json!("classification"),
                json!("disposalSuggestion"),
                json!("ecoTip")
            ]
        );
        for field in ["objectName", "classification", "disposalSuggestion", "ecoTip"] {
            assert_eq!(config["responseSchema"]["properties"][field]["type"], "STRING");
        }
    }

    #[test]
    fn api_key_stays_out_of_the_url() {
        let client = GeminiClient::new("https://example.test/", "secret", "gemini-2.5-flash");
        let url = client.url();
        assert_eq!(
            url,
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(!url.contains("secret"));
    }

    #[test]
    fn blank_prompt_keeps_default() {
        let client = GeminiClient::new(DEFAULT_ENDPOINT, "k", DEFAULT_MODEL).with_prompt("  ");
        assert_eq!(client.prompt, CLASSIFY_PROMPT);
    }

    #[test]
    fn from_settings_requires_key() {
        assert!(GeminiClient::from_settings(&Settings::default()).is_err());

        let settings = Settings {
            api_key: "abc".into(),
            request_timeout_secs: 7,
            ..Settings::default()
        };
        let client = GeminiClient::from_settings(&settings).unwrap();
        assert_eq!(client.timeout, Duration::from_secs(7));
        assert_eq!(client.api_key, "abc");
    }

    #[test]
    fn extracts_and_joins_text_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"objectName\":"},{"text":"\"x\"}"}]}}]}"#;
        assert_eq!(extract_text(body).unwrap(), r#"{"objectName":"x"}"#);
    }

    #[test]
    fn empty_candidates_are_invalid() {
        assert!(matches!(
            extract_text(r#"{"candidates":[]}"#),
            Err(ClassifyError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_text(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#),
            Err(ClassifyError::InvalidResponse(_))
        ));
        assert!(matches!(extract_text("<html>"), Err(ClassifyError::InvalidResponse(_))));
    }

    #[test]
    fn decode_names_the_missing_field() {
        let err = decode_classification(
            r#"{"objectName":"can","classification":"Recyclable","disposalSuggestion":"Rinse."}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::MissingField("ecoTip")));

        let err = decode_classification(
            r#"{"objectName":"can","classification":1,"disposalSuggestion":"","ecoTip":""}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidResponse(_)));
        assert!(matches!(decode_classification("[]"), Err(ClassifyError::InvalidResponse(_))));
    }

    #[test]
    fn decode_repairs_category() {
        let result = decode_classification(
            r#"{"objectName":"apple core","classification":"compostable","disposalSuggestion":"...","ecoTip":"..."}"#,
        )
        .unwrap();
        assert_eq!(result.classification, WasteCategory::Compostable);
    }

    #[test]
    fn decode_rejects_missing_fields_and_garbage() {
        assert!(decode_classification(r#"{"objectName":"can"}"#).is_err());
        assert!(decode_classification("not json").is_err());
    }

    #[tokio::test]
    async fn empty_payload_fails_before_network() {
        // Unroutable endpoint: reaching the network would error differently.
        let client = GeminiClient::new("http://0.0.0.0:1", "k", DEFAULT_MODEL);
        let empty = EncodedPayload {
            data: String::new(),
            mime_type: "image/png".into(),
        };
        assert!(matches!(client.classify(&empty).await, Err(ClassifyError::NoInput)));
    }
}
