use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;

use crate::error::CodecError;

/// How payloads are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Bytes go through untouched
    #[default]
    Raw,
    /// UTF-8 JSON documents
    Json,
    /// Base64 text
    Binary,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::Json => "json",
            Codec::Binary => "binary",
        }
    }

    pub fn encode(&self, payload: &Payload) -> Result<Bytes, CodecError> {
        match (self, payload) {
            (Codec::Raw, Payload::Bytes(bytes)) => Ok(bytes.clone()),
            (Codec::Json, Payload::Bytes(bytes)) => {
                // Already serialized, only check it parses
                serde_json::from_slice::<IgnoredAny>(bytes)?;
                Ok(bytes.clone())
            }
            (Codec::Raw | Codec::Json, Payload::Json(value)) => {
                Ok(Bytes::from(serde_json::to_vec(value)?))
            }
            (Codec::Binary, Payload::Bytes(bytes)) => Ok(Bytes::from(STANDARD.encode(bytes))),
            (Codec::Binary, Payload::Json(value)) => {
                Ok(Bytes::from(STANDARD.encode(serde_json::to_vec(value)?)))
            }
        }
    }

    pub fn decode(&self, bytes: &Bytes) -> Result<Payload, CodecError> {
        match self {
            Codec::Raw => Ok(Payload::Bytes(bytes.clone())),
            Codec::Json => Ok(Payload::Json(serde_json::from_slice(bytes)?)),
            Codec::Binary => Ok(Payload::Bytes(Bytes::from(STANDARD.decode(bytes)?))),
        }
    }

    /// Decodes straight into a typed value, whatever the wire layout.
    pub fn decode_json<T: DeserializeOwned>(&self, bytes: &Bytes) -> Result<T, CodecError> {
        match self {
            Codec::Raw | Codec::Json => Ok(serde_json::from_slice(bytes)?),
            Codec::Binary => Ok(serde_json::from_slice(&STANDARD.decode(bytes)?)?),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "raw" => Ok(Codec::Raw),
            "json" => Ok(Codec::Json),
            "binary" | "base64" => Ok(Codec::Binary),
            _ => Err(format!("unknown serializer {s}, must be raw, json or binary")),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message body before encoding or after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl Payload {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        Ok(Payload::Json(serde_json::to_value(value)?))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }
}

impl fmt::Display for Payload {
    /// Bytes print as a byte-string literal, `b"hello"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(bytes) => write!(f, "{bytes:?}"),
            Payload::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(value: &[u8; N]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}
