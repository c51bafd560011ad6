//! Binary fingerprint protocol.
//!
//! # Frame layout
//!
//! ```text
//! "KFP" | version: u8 | tag_len: u16 LE | tag (utf-8) | payload_len: u32 LE | payload
//! ```
//!
//! Payloads are `bincode` encoded (fixed-width integers, little endian).
//! The layout is stable for a given protocol version.

use std::marker::PhantomData;

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{EmptyFingerprint, Fingerprint, ParametersFingerprint, SourceSetFingerprint, combined};
use crate::consts::{FINGERPRINT_MAX_NESTING, FINGERPRINT_PAYLOAD_LIMIT_BYTES};

const MAGIC: &[u8; 3] = b"KFP";
const PROTOCOL_VERSION: u8 = 1;

/// Errors raised while encoding or decoding fingerprints.
#[derive(Debug, Error)]
pub enum ProtocolError {
  #[error("fingerprint data is truncated")]
  Truncated,

  #[error("fingerprint data does not start with the expected magic bytes")]
  BadMagic,

  #[error("unsupported fingerprint protocol version {0}")]
  UnsupportedVersion(u8),

  #[error("fingerprint kind tag is not valid utf-8")]
  InvalidTag,

  #[error("no decoder registered for fingerprint kind {0:?}")]
  UnknownKind(String),

  #[error("fingerprint payload for {kind:?} is too large ({len} bytes)")]
  PayloadTooLarge { kind: String, len: usize },

  #[error("{0} trailing bytes after fingerprint frame")]
  TrailingBytes(usize),

  #[error("fingerprint payload codec error: {0}")]
  Codec(#[from] bincode::Error),

  #[error("fingerprint frames are nested more than {limit} levels deep")]
  TooDeep { limit: usize },

  /// A fingerprint kind with its own payload format rejected its input.
  #[error("invalid {kind:?} payload: {message}")]
  InvalidPayload { kind: String, message: String },
}

fn bincode_options() -> impl Options {
  bincode::DefaultOptions::new()
    .with_fixint_encoding()
    .with_little_endian()
}

/// Encode a payload value with the protocol's bincode settings.
pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
  Ok(bincode_options().serialize(value)?)
}

/// Decode a payload value, refusing oversized allocations.
pub(crate) fn decode_value<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T, ProtocolError> {
  Ok(
    bincode_options()
      .with_limit(FINGERPRINT_PAYLOAD_LIMIT_BYTES)
      .deserialize(bytes)?,
  )
}

/// Serialize any fingerprint into a self-describing frame.
pub fn encode(fingerprint: &dyn Fingerprint) -> Result<Vec<u8>, ProtocolError> {
  let tag = fingerprint.protocol_tag();
  let payload = fingerprint.encode_payload()?;

  let tag_len = u16::try_from(tag.len()).map_err(|_| ProtocolError::InvalidTag)?;
  let payload_len = u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
    kind: tag.to_string(),
    len: payload.len(),
  })?;

  let mut out = Vec::with_capacity(MAGIC.len() + 1 + 2 + tag.len() + 4 + payload.len());
  out.extend_from_slice(MAGIC);
  out.push(PROTOCOL_VERSION);
  out.extend_from_slice(&tag_len.to_le_bytes());
  out.extend_from_slice(tag.as_bytes());
  out.extend_from_slice(&payload_len.to_le_bytes());
  out.extend_from_slice(&payload);
  Ok(out)
}

/// Split a frame into its tag and payload.
fn read_frame(bytes: &[u8]) -> Result<(&str, &[u8]), ProtocolError> {
  let mut cursor = bytes;

  let magic = take(&mut cursor, MAGIC.len())?;
  if magic != MAGIC {
    return Err(ProtocolError::BadMagic);
  }

  let version = take(&mut cursor, 1)?[0];
  if version != PROTOCOL_VERSION {
    return Err(ProtocolError::UnsupportedVersion(version));
  }

  let tag_len = u16::from_le_bytes([take(&mut cursor, 1)?[0], take(&mut cursor, 1)?[0]]) as usize;
  let tag = std::str::from_utf8(take(&mut cursor, tag_len)?).map_err(|_| ProtocolError::InvalidTag)?;

  let len_bytes = take(&mut cursor, 4)?;
  let payload_len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
  if payload_len as u64 > FINGERPRINT_PAYLOAD_LIMIT_BYTES {
    return Err(ProtocolError::PayloadTooLarge {
      kind: tag.to_string(),
      len: payload_len,
    });
  }
  let payload = take(&mut cursor, payload_len)?;

  if !cursor.is_empty() {
    return Err(ProtocolError::TrailingBytes(cursor.len()));
  }

  Ok((tag, payload))
}

fn take<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8], ProtocolError> {
  if cursor.len() < n {
    return Err(ProtocolError::Truncated);
  }
  let (head, tail) = cursor.split_at(n);
  *cursor = tail;
  Ok(head)
}

/// Reconstructs fingerprints of one or more kinds from their payload.
pub trait FingerprintDecoder: Send + Sync {
  /// Whether this decoder handles the given protocol tag.
  fn supports(&self, tag: &str) -> bool;

  /// Decode a payload. Child frames of composite kinds go through `nested`.
  fn decode(&self, payload: &[u8], nested: &NestedFrames<'_>) -> Result<Box<dyn Fingerprint>, ProtocolError>;
}

/// Decodes the child frames of a composite fingerprint one level deeper.
pub struct NestedFrames<'a> {
  registry: &'a ProtocolRegistry,
  depth: usize,
}

impl NestedFrames<'_> {
  /// Decode a child frame through the same registry.
  pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Fingerprint>, ProtocolError> {
    self.registry.decode_at(bytes, self.depth + 1)
  }

  /// Nesting level of the frame being decoded; zero for the outermost frame.
  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn registry(&self) -> &ProtocolRegistry {
    self.registry
  }
}

/// Decoder for fingerprint kinds whose payload is their own serde representation.
pub struct PayloadDecoder<T> {
  tag: &'static str,
  _marker: PhantomData<fn() -> T>,
}

impl<T> PayloadDecoder<T> {
  pub fn new(tag: &'static str) -> Self {
    Self {
      tag,
      _marker: PhantomData,
    }
  }
}

impl<T: Fingerprint + DeserializeOwned> FingerprintDecoder for PayloadDecoder<T> {
  fn supports(&self, tag: &str) -> bool {
    tag == self.tag
  }

  fn decode(&self, payload: &[u8], _nested: &NestedFrames<'_>) -> Result<Box<dyn Fingerprint>, ProtocolError> {
    Ok(Box::new(decode_value::<T>(payload)?))
  }
}

/// Ordered set of fingerprint decoders.
///
/// Decoding scans decoders in registration order and the first one whose
/// `supports` accepts the tag wins. Registering a decoder for an already
/// handled tag therefore has no effect unless it is registered first.
#[derive(Default)]
pub struct ProtocolRegistry {
  decoders: Vec<Box<dyn FingerprintDecoder>>,
}

impl ProtocolRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry knowing every built-in fingerprint kind.
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(PayloadDecoder::<SourceSetFingerprint>::new(SourceSetFingerprint::TAG));
    registry.register(PayloadDecoder::<ParametersFingerprint>::new(ParametersFingerprint::TAG));
    registry.register(PayloadDecoder::<EmptyFingerprint>::new(EmptyFingerprint::TAG));
    registry.register(combined::CombinedDecoder);
    registry
  }

  /// Append a decoder; it is consulted after all previously registered ones.
  pub fn register(&mut self, decoder: impl FingerprintDecoder + 'static) -> &mut Self {
    self.decoders.push(Box::new(decoder));
    self
  }

  /// Number of registered decoders.
  pub fn len(&self) -> usize {
    self.decoders.len()
  }

  pub fn is_empty(&self) -> bool {
    self.decoders.is_empty()
  }

  /// Decode a single frame produced by [`encode`].
  ///
  /// Frames nested deeper than [`FINGERPRINT_MAX_NESTING`] are rejected.
  pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Fingerprint>, ProtocolError> {
    self.decode_at(bytes, 0)
  }

  fn decode_at(&self, bytes: &[u8], depth: usize) -> Result<Box<dyn Fingerprint>, ProtocolError> {
    if depth > FINGERPRINT_MAX_NESTING {
      return Err(ProtocolError::TooDeep {
        limit: FINGERPRINT_MAX_NESTING,
      });
    }

    let (tag, payload) = read_frame(bytes)?;
    let decoder = self
      .decoders
      .iter()
      .find(|decoder| decoder.supports(tag))
      .ok_or_else(|| ProtocolError::UnknownKind(tag.to_string()))?;
    decoder.decode(
      payload,
      &NestedFrames {
        registry: self,
        depth,
      },
    )
  }
}
