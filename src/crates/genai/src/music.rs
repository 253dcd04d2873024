//! Lyria realtime music streaming over websocket.
//!
//! The realtime API has no request/response shape: the client opens a
//! socket, announces the model, sets weighted prompts, asks for playback,
//! and then reads audio chunks (base64 raw PCM, 16-bit 48 kHz stereo) until
//! it has collected enough. We stop after `duration` seconds of wall time
//! and concatenate whatever arrived.

use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use mediagraph_core::error::{EngineError, Result};

use crate::config::GeminiConfig;

/// Stream `duration` seconds of generated music for `prompt` and return
/// the concatenated raw PCM bytes.
pub async fn stream_music(config: &GeminiConfig, prompt: &str, duration: u64) -> Result<Vec<u8>> {
    let url = format!(
        "wss://{}/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateMusic?key={}",
        config.ws_host, config.api_key
    );
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .map_err(EngineError::backend)?;

    let setup = json!({"setup": {"model": config.music_model}});
    socket
        .send(Message::Text(setup.to_string()))
        .await
        .map_err(EngineError::backend)?;

    let prompts = json!({
        "clientContent": {
            "weightedPrompts": [{"text": prompt, "weight": 1.0}],
        }
    });
    socket
        .send(Message::Text(prompts.to_string()))
        .await
        .map_err(EngineError::backend)?;

    let play = json!({"playbackControl": "PLAY"});
    socket
        .send(Message::Text(play.to_string()))
        .await
        .map_err(EngineError::backend)?;

    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut pcm: Vec<u8> = Vec::new();

    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let frame = match tokio::time::timeout(remaining, socket.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                warn!(error = %err, "music socket error, stopping early");
                break;
            }
            // Socket closed or deadline reached.
            Ok(None) | Err(_) => break,
        };

        let payload = match frame {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(message) = serde_json::from_slice::<Value>(&payload) else {
            continue;
        };
        if let Some(chunks) = message["serverContent"]["audioChunks"].as_array() {
            for chunk in chunks {
                if let Some(data) = chunk["data"].as_str() {
                    match BASE64.decode(data) {
                        Ok(bytes) => pcm.extend_from_slice(&bytes),
                        Err(err) => debug!(error = %err, "skipping undecodable audio chunk"),
                    }
                }
            }
        }
    }

    let _ = socket.close(None).await;

    if pcm.is_empty() {
        return Err(EngineError::Backend(
            "music stream produced no audio".to_string(),
        ));
    }
    Ok(pcm)
}
