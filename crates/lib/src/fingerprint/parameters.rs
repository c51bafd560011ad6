use std::any::Any;

use serde::{Deserialize, Serialize};

use super::protocol::encode_value;
use super::{Fingerprint, ProtocolError, same_kind_eq};
use crate::util::hash::{ContentHash, hash_bytes};

/// Digest of a structured parameter block.
///
/// The digest covers the canonical JSON form of the parameters, so two
/// blocks with the same values produce the same fingerprint regardless of
/// how they were built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParametersFingerprint {
  name: String,
  digest: ContentHash,
}

impl ParametersFingerprint {
  pub const TAG: &'static str = "parameters";

  /// Fingerprint a serializable value.
  ///
  /// Serializing through `serde_json::Value` sorts object keys, which makes
  /// the digest independent of map iteration order.
  pub fn of<T: Serialize + ?Sized>(name: impl Into<String>, parameters: &T) -> Result<Self, serde_json::Error> {
    let value = serde_json::to_value(parameters)?;
    let canonical = serde_json::to_vec(&value)?;
    Ok(Self {
      name: name.into(),
      digest: hash_bytes(&canonical),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn digest(&self) -> &ContentHash {
    &self.digest
  }
}

impl Fingerprint for ParametersFingerprint {
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
