//! Gemini Live (`BidiGenerateContent`) over WebSocket
//!
//! One socket per session. After the handshake a `setup` message is sent and
//! the session counts as open once the server acknowledges it with
//! `setupComplete`. A reader task turns server frames into
//! [`SessionEvent`]s, a writer task serializes outbound microphone audio.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{LiveConfig, LiveSession, LiveTransport, ModelPart, ServerMessage, SessionEvent};
use crate::audio::EncodedBlob;
use crate::{Error, Result};

/// Public Live API endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Opens Gemini Live sessions with an API key
pub struct GeminiTransport {
    endpoint: String,
    api_key: SecretString,
}

impl GeminiTransport {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

#[async_trait]
impl LiveTransport for GeminiTransport {
    async fn open(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn LiveSession>> {
        let url = self.url()?;

        tracing::debug!(endpoint = %self.endpoint, model = %config.model, "connecting to live endpoint");

        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let setup = serde_json::to_string(&SetupFrame::from_config(config))?;
        sink.send(Message::Text(setup))
            .await
            .map_err(|e| Error::Transport(format!("setup failed: {e}")))?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        let writer_events = events.clone();
        tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let message = match outbound {
                    Outbound::Input(blob) => {
                        match serde_json::to_string(&RealtimeInputFrame::audio(&blob)) {
                            Ok(json) => Message::Text(json),
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize input frame");
                                continue;
                            }
                        }
                    }
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };

                if let Err(e) = sink.send(message).await {
                    let _ = writer_events.send(SessionEvent::Error(format!("send failed: {e}")));
                    break;
                }
            }
            let _ = sink.close().await;
            tracing::trace!("live writer finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let payload = match frame {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(close)) => {
                        let reason = close
                            .map(|c| c.reason.to_string())
                            .filter(|r| !r.is_empty());
                        tracing::debug!(reason = ?reason, "live socket closed by server");
                        let _ = events.send(SessionEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = events.send(SessionEvent::Error(e.to_string()));
                        return;
                    }
                };

                match parse_server_frame(&payload) {
                    Ok(parsed) => {
                        for event in parsed {
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "unrecognized server frame"),
                }
            }
            let _ = events.send(SessionEvent::Closed { reason: None });
        });

        Ok(Box::new(GeminiSession {
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
            reader,
        }))
    }
}

enum Outbound {
    Input(EncodedBlob),
    Close,
}

/// Handle to an open socket
struct GeminiSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
    reader: JoinHandle<()>,
}

impl LiveSession for GeminiSession {
    fn send_input(&self, blob: EncodedBlob) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Transport("session closed".to_string()));
        }
        self.outbound
            .send(Outbound::Input(blob))
            .map_err(|_| Error::Transport("session writer stopped".to_string()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
        self.reader.abort();
        tracing::debug!("live session closed");
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        // The writer exits on its own after sending the close frame
        self.close();
    }
}

// Wire format

#[derive(Serialize)]
struct SetupFrame<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    generation_config: GenerationConfig<'a>,
    system_instruction: Content<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Empty>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoice<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice<'a> {
    voice_name: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Empty {}

impl<'a> SetupFrame<'a> {
    fn from_config(config: &'a LiveConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: [config.response_modality.as_str()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoice {
                                voice_name: &config.voice,
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: [TextPart {
                        text: &config.system_instruction,
                    }],
                },
                output_audio_transcription: config.output_transcription.then_some(Empty {}),
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputFrame<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
struct RealtimeInput<'a> {
    audio: &'a EncodedBlob,
}

impl<'a> RealtimeInputFrame<'a> {
    const fn audio(blob: &'a EncodedBlob) -> Self {
        Self {
            realtime_input: RealtimeInput { audio: blob },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    interrupted: bool,
    turn_complete: bool,
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WirePart {
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// Translate one server JSON frame into session events
fn parse_server_frame(payload: &[u8]) -> Result<Vec<SessionEvent>> {
    let frame: ServerFrame = serde_json::from_slice(payload)?;
    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(SessionEvent::Open);
    }

    if let Some(content) = frame.server_content {
        let mut parts: Vec<ModelPart> = content
            .model_turn
            .map(|turn| turn.parts)
            .unwrap_or_default()
            .into_iter()
            .map(|part| ModelPart {
                inline_audio: part.inline_data.map(|d| d.data),
                text: part.text,
            })
            .filter(|part| part.inline_audio.is_some() || part.text.is_some())
            .collect();

        if let Some(text) = content
            .output_transcription
            .and_then(|t| t.text)
            .filter(|t| !t.is_empty())
        {
            parts.push(ModelPart::text(text));
        }

        let message = ServerMessage {
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
            parts,
        };
        if !message.is_empty() {
            events.push(SessionEvent::Message(message));
        }
    }

    // The session ends when the socket closes, not on notice
    if let Some(go_away) = frame.go_away {
        tracing::info!(
            time_left = go_away.time_left.as_deref().unwrap_or("unknown"),
            "server going away"
        );
    }

    Ok(events)
}
