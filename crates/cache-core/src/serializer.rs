//! Payload serializer registry.
//!
//! Values cross the engine boundary wrapped in a one-byte envelope naming
//! the codec used at write time, so the matching decoder is always
//! recoverable at read time regardless of which engine stored the bytes.

use crate::error::{CacheError, CacheResult};
use std::sync::Arc;

/// A payload codec identified by a stable one-byte id.
pub trait PayloadCodec: Send + Sync {
    /// Stable envelope id; must be unique within a registry
    fn codec_id(&self) -> u8;

    /// Codec name for logging and diagnostics
    fn name(&self) -> &'static str;

    /// Whether this codec is a good fit for `value`
    fn suits(&self, value: &[u8]) -> bool;

    /// Encode a raw payload
    fn encode(&self, value: &[u8]) -> CacheResult<Vec<u8>>;

    /// Decode a previously encoded payload
    fn decode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>>;
}

/// Identity codec; stores bytes untouched. Fits everything.
#[derive(Debug, Default)]
pub struct RawCodec;

impl PayloadCodec for RawCodec {
    fn codec_id(&self) -> u8 {
        0
    }

    fn name(&self) -> &'static str {
        "raw"
    }

    fn suits(&self, _value: &[u8]) -> bool {
        true
    }

    fn encode(&self, value: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(value.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// JSON codec; canonicalizes valid JSON documents to their compact form.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn codec_id(&self) -> u8 {
        1
    }

    fn name(&self) -> &'static str {
        "json"
    }

    fn suits(&self, value: &[u8]) -> bool {
        serde_json::from_slice::<serde_json::Value>(value).is_ok()
    }

    fn encode(&self, value: &[u8]) -> CacheResult<Vec<u8>> {
        let parsed: serde_json::Value = serde_json::from_slice(value)
            .map_err(|e| CacheError::serialization(format!("not valid JSON: {e}")))?;
        serde_json::to_vec(&parsed).map_err(|e| CacheError::serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Registry of codecs; chooses the best codec per value at write time and
/// dispatches on the envelope byte at read time.
pub struct SerializerRegistry {
    // Ordered by preference; encode_best picks the first codec that suits
    // the value, so Raw goes last as the catch-all.
    codecs: Vec<Arc<dyn PayloadCodec>>,
}

impl SerializerRegistry {
    /// An empty registry with no codecs
    #[must_use]
    pub fn new() -> Self {
        Self { codecs: Vec::new() }
    }

    /// The default registry: JSON preferred, raw as fallback
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(RawCodec));
        registry
    }

    /// Append a codec. Preference follows registration order.
    pub fn register(&mut self, codec: Arc<dyn PayloadCodec>) {
        self.codecs.push(codec);
    }

    /// Encode `value` with the first codec that suits it, prefixing the
    /// envelope byte.
    ///
    /// # Errors
    /// [`CacheError::Serialization`] when no registered codec fits.
    pub fn encode_best(&self, value: &[u8]) -> CacheResult<Vec<u8>> {
        let codec = self
            .codecs
            .iter()
            .find(|c| c.suits(value))
            .ok_or_else(|| CacheError::serialization("no codec accepts this value"))?;

        let mut envelope = Vec::with_capacity(value.len() + 1);
        envelope.push(codec.codec_id());
        envelope.extend_from_slice(&codec.encode(value)?);
        Ok(envelope)
    }

    /// Decode an envelope produced by [`Self::encode_best`].
    ///
    /// # Errors
    /// [`CacheError::Serialization`] for empty input or an unknown codec id.
    pub fn decode(&self, envelope: &[u8]) -> CacheResult<Vec<u8>> {
        let (&id, body) = envelope
            .split_first()
            .ok_or_else(|| CacheError::serialization("empty payload envelope"))?;

        let codec = self
            .codecs
            .iter()
            .find(|c| c.codec_id() == id)
            .ok_or_else(|| CacheError::serialization(format!("unknown codec id {id}")))?;

        codec.decode(body)
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
