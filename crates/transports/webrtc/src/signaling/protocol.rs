//! Relay and data-channel message formats
//!
//! Outbound messages are serialized from typed envelopes. Inbound text is
//! parsed once into [`InboundMessage`], so the rest of the crate never looks
//! at raw JSON.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Relay action carried by every negotiation envelope
pub const NEGOTIATE_ACTION: &str = "negotiate";

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
}

/// Offer or answer exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in its browser-compatible JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,

    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,

    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,

    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Per-connection negotiation payload
///
/// Serialized as `{"description": {...}}` or `{"candidate": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMessage {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalingMessage {
    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Description(d) => match d.kind {
                SdpKind::Offer => "offer",
                SdpKind::Answer => "answer",
                SdpKind::Pranswer => "pranswer",
            },
            SignalingMessage::Candidate(_) => "candidate",
        }
    }
}

/// Negotiation payload addressed to one connection
///
/// `{"action":"negotiate","connectionId":"...","description":{...}}`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateEnvelope<'a> {
    pub action: &'static str,
    pub connection_id: &'a str,
    #[serde(flatten)]
    pub message: &'a SignalingMessage,
}

impl<'a> NegotiateEnvelope<'a> {
    pub fn new(connection_id: &'a str, message: &'a SignalingMessage) -> Self {
        Self {
            action: NEGOTIATE_ACTION,
            connection_id,
            message,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to encode negotiate message: {}", e))
        })
    }
}

/// Join request sent by a slave to the master it wants to reach
///
/// `{"storeId":"...","connectionId":"...","action":"negotiate","type":"INITIATE"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateEnvelope {
    pub store_id: String,
    pub connection_id: String,
    pub action: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl InitiateEnvelope {
    pub const TYPE: &'static str = "INITIATE";

    pub fn new(store_id: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            connection_id: connection_id.into(),
            action: NEGOTIATE_ACTION.to_string(),
            kind: Self::TYPE.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to encode initiate message: {}", e))
        })
    }
}

/// Mesh-level control carried only by the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A new participant wants a dedicated connection with us
    Initiate { sender_connection_id: String },
    /// Participant metadata changed out of band
    Update {
        user_id: String,
        conversation_id: String,
    },
}

/// Any message that can arrive on a relay socket or negotiation channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Description or candidate for a connection
    Negotiation {
        message: SignalingMessage,
        /// Set by the relay; absent on peer data channels
        sender_connection_id: Option<String>,
    },
    Control(ControlMessage),
    /// A null or empty candidate marking the end of remote gathering
    EndOfCandidates,
}

impl InboundMessage {
    /// Parse a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns `SignalingError` if the text is not a JSON object, or carries
    /// none of `type`, `description` or `candidate`, and
    /// `SerializationError` if a payload has the wrong shape.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::SignalingError(format!("Invalid JSON message: {}", e)))?;
        let Value::Object(obj) = value else {
            return Err(Error::SignalingError(
                "Message is not a JSON object".to_string(),
            ));
        };

        let sender_connection_id = string_field(&obj, "senderConnectionId");

        match obj.get("type").and_then(Value::as_str) {
            Some(InitiateEnvelope::TYPE) => {
                let sender_connection_id = sender_connection_id.ok_or_else(|| {
                    Error::SignalingError("INITIATE without senderConnectionId".to_string())
                })?;
                return Ok(InboundMessage::Control(ControlMessage::Initiate {
                    sender_connection_id,
                }));
            }
            Some("UPDATE") => {
                return Ok(InboundMessage::Control(ControlMessage::Update {
                    user_id: string_field(&obj, "userId").unwrap_or_default(),
                    conversation_id: string_field(&obj, "conversationId").unwrap_or_default(),
                }));
            }
            _ => {}
        }

        if let Some(description) = obj.get("description").filter(|v| !v.is_null()) {
            let description: SessionDescription = serde_json::from_value(description.clone())
                .map_err(|e| {
                    Error::SerializationError(format!("Invalid session description: {}", e))
                })?;
            return Ok(InboundMessage::Negotiation {
                message: SignalingMessage::Description(description),
                sender_connection_id,
            });
        }

        match obj.get("candidate") {
            Some(Value::Null) => Ok(InboundMessage::EndOfCandidates),
            Some(candidate) => {
                let candidate: IceCandidate = serde_json::from_value(candidate.clone())
                    .map_err(|e| {
                        Error::SerializationError(format!("Invalid ICE candidate: {}", e))
                    })?;
                if candidate.candidate.is_empty() {
                    return Ok(InboundMessage::EndOfCandidates);
                }
                Ok(InboundMessage::Negotiation {
                    message: SignalingMessage::Candidate(candidate),
                    sender_connection_id,
                })
            }
            None => Err(Error::SignalingError(format!(
                "Unrecognised message: {}",
                text
            ))),
        }
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Application command sent on the command data channel as plain text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Peer should re-enable its camera
    VideoOn,
    /// Peer stopped sending; the receiver drops the connection
    VideoOff,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::VideoOn => "VIDEO_ON",
            Command::VideoOff => "VIDEO_OFF",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "VIDEO_ON" => Ok(Command::VideoOn),
            "VIDEO_OFF" => Ok(Command::VideoOff),
            other => Err(Error::SignalingError(format!("Unknown command: {}", other))),
        }
    }
}
