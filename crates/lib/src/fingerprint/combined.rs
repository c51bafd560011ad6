use std::any::Any;

use serde::{Deserialize, Serialize};

use super::protocol::{decode_value, encode_value};
use super::{Fingerprint, FingerprintDecoder, NestedFrames, ProtocolError, encode, same_kind_eq};

/// Ordered combination of child fingerprints.
///
/// Equal iff both sides have the same number of parts and every part is
/// pairwise equal.
#[derive(Debug, Default)]
pub struct CombinedFingerprint {
  parts: Vec<Box<dyn Fingerprint>>,
}

impl CombinedFingerprint {
  pub const TAG: &'static str = "combined";

  pub fn new(parts: Vec<Box<dyn Fingerprint>>) -> Self {
    Self { parts }
  }

  pub fn parts(&self) -> &[Box<dyn Fingerprint>] {
    &self.parts
  }
}

impl Fingerprint for CombinedFingerprint {
  fn protocol_tag(&self) -> &'static str {
    Self::TAG
  }

  fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
    let frames = self
      .parts
      .iter()
      .map(|part| encode(part.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    encode_value(&frames)
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn eq_fingerprint(&self, other: &dyn Fingerprint) -> bool {
    let Some(other) = other.as_any().downcast_ref::<CombinedFingerprint>() else {
      return false;
    };
    self.parts.len() == other.parts.len()
      && self
        .parts
        .iter()
        .zip(&other.parts)
        .all(|(a, b)| a.eq_fingerprint(b.as_ref()))
  }
}

/// Decodes combined fingerprints by decoding each child frame one level deeper.
///
/// Child frames are borrowed from the payload, not copied.
pub(super) struct CombinedDecoder;

impl FingerprintDecoder for CombinedDecoder {
  fn supports(&self, tag: &str) -> bool {
    tag == CombinedFingerprint::TAG
  }

  fn decode(&self, payload: &[u8], nested: &NestedFrames<'_>) -> Result<Box<dyn Fingerprint>, ProtocolError> {
    let frames: Vec<&[u8]> = decode_value(payload)?;
    let parts = frames
      .into_iter()
      .map(|frame| nested.decode(frame))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Box::new(CombinedFingerprint::new(parts)))
  }
}

/// Fingerprint of a builder without inputs. All empty fingerprints are equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyFingerprint;

impl EmptyFingerprint {
  pub const TAG: &'static str = "empty";
}

impl Fingerprint for EmptyFingerprint {
  fn protocol_tag(&self) -> &'static str {
    Self::TAG
  }

  fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
    encode_value(self)
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn eq_fingerprint(&self, other: &dyn Fingerprint) -> bool {
    same_kind_eq(self, other)
  }
}
