//! Gemini REST client implementing the generation backend contract.
//!
//! Text, vision, and speech go through `models/{model}:generateContent`;
//! image generation through Imagen `:predict` (or a multimodal
//! `generateContent` when a source image is attached and an image-editing
//! model is configured); video through `:predictLongRunning` with a poll
//! loop; music through the Lyria realtime websocket (see [`crate::music`]).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use mediagraph_core::error::{EngineError, Result};
use mediagraph_core::node::Params;
use mediagraph_core::traits::{GenerationBackend, TextInputs, VideoImageInput};

use crate::config::GeminiConfig;
use crate::music;

/// Google Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(EngineError::backend)?;
        Ok(Self { config, http })
    }

    fn url(&self, model: &str, verb: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.config.base_url, model, verb, self.config.api_key
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(EngineError::backend)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Backend(format!("{status}: {text}")));
        }
        response.json().await.map_err(EngineError::backend)
    }

    async fn generate_content(
        &self,
        model: &str,
        parts: Vec<Part>,
        generation_config: Value,
    ) -> Result<GenerateContentResponse> {
        let body = json!({
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": generation_config,
        });
        let value = self.post(&self.url(model, "generateContent"), &body).await?;
        serde_json::from_value(value).map_err(EngineError::backend)
    }

    /// Build a Gemini `responseSchema` from the node's `output_fields`
    /// declarations (`[{name, type}]`).
    fn output_schema(fields: &[Value]) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in fields {
            let Some(name) = field.get("name").and_then(Value::as_str) else {
                continue;
            };
            let field_type = match field.get("type").and_then(Value::as_str) {
                Some("number") => "NUMBER",
                Some("integer") => "INTEGER",
                Some("boolean") => "BOOLEAN",
                Some("array") => "ARRAY",
                _ => "STRING",
            };
            let mut schema = json!({"type": field_type});
            if field_type == "ARRAY" {
                schema["items"] = json!({"type": "STRING"});
            }
            properties.insert(name.to_string(), schema);
            required.push(Value::String(name.to_string()));
        }
        json!({"type": "OBJECT", "properties": properties, "required": required})
    }

    fn first_text(response: &GenerateContentResponse) -> Result<String> {
        let text: String = response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(EngineError::Backend("empty model response".to_string()));
        }
        Ok(text)
    }

    fn first_inline_data(response: &GenerateContentResponse) -> Result<Vec<u8>> {
        let data = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.inline_data.as_ref()))
            .ok_or_else(|| EngineError::Backend("no inline data in response".to_string()))?;
        BASE64.decode(&data.data).map_err(EngineError::backend)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate_text(
        &self,
        prompt: &str,
        params: &Map<String, Value>,
        inputs: TextInputs<'_>,
    ) -> Result<String> {
        let p = Params(params);
        let mut config = json!({
            "temperature": p.f64_or("temperature", 0.7),
            "maxOutputTokens": p.u64_or("max_tokens", 2048),
            "topP": p.f64_or("top_p", 0.95),
        });
        if let Some(fields) = p.structured_output() {
            config["responseMimeType"] = json!("application/json");
            config["responseSchema"] = Self::output_schema(fields);
        }

        let mut parts = Vec::new();
        for image in inputs.images {
            parts.push(Part::inline("image/png", image));
        }
        for audio in inputs.audios {
            parts.push(Part::inline("audio/wav", audio));
        }
        for video in inputs.videos {
            parts.push(Part::inline("video/mp4", video));
        }
        parts.push(Part::text(prompt));

        let response = self
            .generate_content(&self.config.text_model, parts, config)
            .await?;
        Self::first_text(&response)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        params: &Map<String, Value>,
        images: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let p = Params(params);

        // With source images and an image-capable model, generate in one
        // multimodal call; otherwise fall through to Imagen prediction.
        if !images.is_empty() {
            if let Some(edit_model) = &self.config.image_edit_model {
                let mut parts: Vec<Part> =
                    images.iter().map(|i| Part::inline("image/png", i)).collect();
                parts.push(Part::text(prompt));
                let config = json!({"responseModalities": ["IMAGE", "TEXT"]});
                let response = self.generate_content(edit_model, parts, config).await?;
                return Self::first_inline_data(&response);
            }
        }

        let body = json!({
            "instances": [{"prompt": prompt}],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": p.str("aspect_ratio").unwrap_or("1:1"),
            },
        });
        let value = self
            .post(&self.url(&self.config.image_model, "predict"), &body)
            .await?;
        let encoded = value["predictions"][0]["bytesBase64Encoded"]
            .as_str()
            .ok_or_else(|| EngineError::Backend("no image in prediction response".to_string()))?;
        BASE64.decode(encoded).map_err(EngineError::backend)
    }

    fn supports_image_input(&self) -> bool {
        self.config.image_edit_model.is_some()
    }

    async fn generate_video(
        &self,
        prompt: &str,
        params: &Map<String, Value>,
        image: VideoImageInput<'_>,
    ) -> Result<Vec<u8>> {
        let p = Params(params);
        let mut instance = json!({"prompt": prompt});
        match image {
            VideoImageInput::None => {}
            VideoImageInput::FirstFrame(bytes) => {
                instance["image"] = json!({
                    "bytesBase64Encoded": BASE64.encode(bytes),
                    "mimeType": "image/png",
                });
            }
            VideoImageInput::References(images) => {
                let references: Vec<Value> = images
                    .iter()
                    .map(|bytes| {
                        json!({
                            "image": {
                                "bytesBase64Encoded": BASE64.encode(bytes),
                                "mimeType": "image/png",
                            },
                            "referenceType": "asset",
                        })
                    })
                    .collect();
                instance["referenceImages"] = Value::Array(references);
            }
        }

        let body = json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": p.str("aspect_ratio").unwrap_or("16:9"),
                "personGeneration": "allow_adult",
            },
        });
        let value = self
            .post(&self.url(&self.config.video_model, "predictLongRunning"), &body)
            .await?;
        let operation = value["name"]
            .as_str()
            .ok_or_else(|| EngineError::Backend("no operation name returned".to_string()))?
            .to_string();

        // Veo takes minutes; poll until the operation reports done. The
        // caller holds its semaphore slot for the whole wait.
        let operation_url = format!(
            "{}/{}?key={}",
            self.config.base_url, operation, self.config.api_key
        );
        let done = loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let status: Value = self
                .http
                .get(&operation_url)
                .send()
                .await
                .map_err(EngineError::backend)?
                .json()
                .await
                .map_err(EngineError::backend)?;
            debug!(operation = %operation, done = status["done"].as_bool().unwrap_or(false), "video poll");
            if status["done"].as_bool().unwrap_or(false) {
                break status;
            }
        };

        if let Some(error) = done.get("error") {
            return Err(EngineError::Backend(error.to_string()));
        }
        let uri = done["response"]["generateVideoResponse"]["generatedSamples"][0]["video"]["uri"]
            .as_str()
            .ok_or_else(|| EngineError::Backend("no video uri in finished operation".to_string()))?;

        let download = self
            .http
            .get(uri)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(EngineError::backend)?;
        let bytes = download.bytes().await.map_err(EngineError::backend)?;
        Ok(bytes.to_vec())
    }

    async fn generate_speech(&self, text: &str, params: &Map<String, Value>) -> Result<Vec<u8>> {
        let p = Params(params);
        let config = json!({
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": {"voiceName": p.str("voice").unwrap_or("Kore")}
                }
            },
        });
        let response = self
            .generate_content(&self.config.tts_model, vec![Part::text(text)], config)
            .await?;
        Self::first_inline_data(&response)
    }

    async fn generate_music(&self, prompt: &str, params: &Map<String, Value>) -> Result<Vec<u8>> {
        let duration = Params(params).u64_or("duration", 10);
        music::stream_music(&self.config, prompt, duration).await
    }

    async fn analyze_image(
        &self,
        image: &[u8],
        prompt: &str,
        params: &Map<String, Value>,
    ) -> Result<String> {
        let p = Params(params);
        let config = json!({
            "temperature": p.f64_or("temperature", 0.4),
            "maxOutputTokens": p.u64_or("max_tokens", 1024),
        });
        let parts = vec![Part::inline("image/png", image), Part::text(prompt)];
        let response = self
            .generate_content(&self.config.vision_model, parts, config)
            .await?;
        Self::first_text(&response)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineDataOut>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataOut {
    mime_type: String,
    data: String,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineDataOut {
                mime_type: mime_type.to_string(),
                data: BASE64.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: ResponseContent,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineDataIn>,
}

#[derive(Debug, Deserialize)]
struct InlineDataIn {
    #[serde(default)]
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_schema_maps_field_types() {
        let fields = vec![
            json!({"name": "title", "type": "string"}),
            json!({"name": "score", "type": "number"}),
            json!({"name": "tags", "type": "array"}),
        ];
        let schema = GeminiClient::output_schema(&fields);
        assert_eq!(schema["type"], "OBJECT");
        assert_eq!(schema["properties"]["title"]["type"], "STRING");
        assert_eq!(schema["properties"]["score"]["type"], "NUMBER");
        assert_eq!(schema["properties"]["tags"]["type"], "ARRAY");
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "STRING");
        assert_eq!(schema["required"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn parts_serialize_to_wire_shape() {
        let part = Part::inline("image/png", b"abc");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["inlineData"]["mimeType"], "image/png");
        assert_eq!(value["inlineData"]["data"], BASE64.encode(b"abc"));
        assert!(value.get("text").is_none());
    }

    #[test]
    fn first_text_rejects_empty_candidates() {
        let response = GenerateContentResponse { candidates: vec![] };
        assert!(GeminiClient::first_text(&response).is_err());
    }
}
