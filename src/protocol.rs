//! Wire message types for the client-facing and backend-facing JSON
//! protocol. TypeScript types are generated via `cargo test export_types`.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::audio::AudioFormat;

/// First text frame a client or backend must send after connecting.
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export, export_to = "../generated/Handshake.ts")]
pub struct Handshake {
    pub client_type: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub audio_config: Option<PartialAudioConfig>,
}

/// Partial audio config as sent at handshake time; unspecified fields fall
/// back to `AudioFormat::default()` plus `container_type: "raw"`.
#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export, export_to = "../generated/PartialAudioConfig.ts")]
pub struct PartialAudioConfig {
    #[serde(default, rename = "audioDataType")]
    pub container_type: Option<String>,
    #[serde(default, rename = "sampleRate")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
    #[serde(default, rename = "bitDepth")]
    pub bit_depth: Option<u16>,
}

pub const SUPPORTED_CONTAINER_TYPES: &[&str] = &["raw", "wav", "mp3", "ogg"];

/// Fully resolved per-call audio descriptor (handshake config layered over
/// defaults).
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../generated/AudioConfig.ts")]
pub struct AudioConfig {
    pub container_type: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let fmt = AudioFormat::default();
        Self {
            container_type: "raw".to_string(),
            sample_rate: fmt.sample_rate,
            channels: fmt.channels,
            bit_depth: fmt.bit_depth,
        }
    }
}

impl AudioConfig {
    pub fn from_partial(partial: Option<PartialAudioConfig>) -> Result<Self, String> {
        let default = Self::default();
        let Some(partial) = partial else {
            return Ok(default);
        };
        let container_type = partial.container_type.unwrap_or(default.container_type);
        if !SUPPORTED_CONTAINER_TYPES.contains(&container_type.as_str()) {
            return Err(container_type);
        }
        Ok(Self {
            container_type,
            sample_rate: partial.sample_rate.unwrap_or(default.sample_rate),
            channels: partial.channels.unwrap_or(default.channels),
            bit_depth: partial.bit_depth.unwrap_or(default.bit_depth),
        })
    }

    pub fn as_audio_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: self.bit_depth,
        }
    }
}

/// Text commands a client may send in place of binary audio.
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export, export_to = "../generated/ClientCommand.ts")]
#[serde(tag = "command")]
pub enum ClientCommand {
    #[serde(rename = "audio_complete")]
    AudioComplete,
    #[serde(rename = "touch")]
    Touch {
        #[serde(default)]
        amount: Option<f32>,
    },
}

/// Text messages the backend may send downstream.
#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export, export_to = "../generated/BackendMessage.ts")]
#[serde(tag = "type")]
pub enum BackendMessage {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        call_id: Option<String>,
        content: String,
    },
}

/// Messages the server sends to clients as text frames.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../generated/ServerMessage.ts")]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session_info")]
    SessionInfo { content: SessionInfo },
    #[serde(rename = "text")]
    Text {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        content: String,
    },
    #[serde(rename = "error")]
    Error { content: String },
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck,
    #[serde(rename = "streamAudio")]
    StreamAudio { data: StreamAudioData },
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../generated/SessionInfo.ts")]
pub struct SessionInfo {
    pub session_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../generated/StreamAudioData.ts")]
pub struct StreamAudioData {
    #[serde(rename = "audioDataType")]
    pub audio_data_type: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(rename = "bitDepth")]
    pub bit_depth: u16,
    #[serde(rename = "audioData")]
    pub audio_data: String,
}
