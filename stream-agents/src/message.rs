use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::broker::Received;
use crate::codec::{Codec, Payload};
use crate::error::CodecError;

/// A message handed to an agent. The payload is kept as it came off the
/// wire; decoding happens on demand so that a malformed payload reaches the
/// handler as an error it can act on.
#[derive(Debug, Clone)]
pub struct Message {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Bytes>,
    payload: Bytes,
    timestamp_ms: Option<i64>,
    codec: Codec,
}

impl Message {
    pub(crate) fn new(received: Received, codec: Codec) -> Self {
        Self {
            topic: received.topic,
            partition: received.partition,
            offset: received.offset,
            key: received.key,
            payload: received.payload,
            timestamp_ms: received.timestamp_ms,
            codec,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Wire bytes, before decoding.
    pub fn raw(&self) -> &Bytes {
        &self.payload
    }

    pub fn value(&self) -> Result<Payload, CodecError> {
        self.codec.decode(&self.payload)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        self.codec.decode_json(&self.payload)
    }
}
