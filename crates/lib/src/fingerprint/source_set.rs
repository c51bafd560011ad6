use std::any::Any;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::protocol::encode_value;
use super::{Fingerprint, ProtocolError, same_kind_eq};
use crate::fs::RelativePath;
use crate::util::hash::ContentHash;

/// Content digest of every file in a source set.
///
/// Files are keyed by their path relative to the suite root, so adding,
/// removing, renaming or editing any file changes the fingerprint. When the
/// owning dependency is a full dependency the sorted ignore rules are part
/// of the fingerprint too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSetFingerprint {
  files: BTreeMap<RelativePath, ContentHash>,
  exclusions: Option<Vec<String>>,
}

impl SourceSetFingerprint {
  pub const TAG: &'static str = "source-set";

  pub fn new(files: BTreeMap<RelativePath, ContentHash>, exclusions: Option<Vec<String>>) -> Self {
    let exclusions = exclusions.map(|mut rules| {
      rules.sort();
      rules.dedup();
      rules
    });
    Self { files, exclusions }
  }

  pub fn files(&self) -> &BTreeMap<RelativePath, ContentHash> {
    &self.files
  }

  pub fn exclusions(&self) -> Option<&[String]> {
    self.exclusions.as_deref()
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

impl Fingerprint for SourceSetFingerprint {
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
