//! Fingerprints computed from real inputs and their binary protocol.

use std::any::Any;
use std::sync::{Arc, RwLock};

use kiln_lib::deps::{Dependencies, IgnoreList, MultipleDependencies, ParametersDependencies, SourceSet, SourceSetDependencies};
use kiln_lib::fingerprint::{
  CombinedFingerprint, EmptyFingerprint, Fingerprint, NestedFrames, PayloadDecoder, ProtocolError, ProtocolRegistry,
  encode, same_kind_eq,
};
use kiln_lib::fs::{FileSystemDirectory, LocalDirectory};
use serde::{Deserialize, Serialize};

use super::common::rel;

fn suite() -> (tempfile::TempDir, Arc<LocalDirectory>, SourceSetDependencies) {
  let temp = tempfile::tempdir().unwrap();
  let root = Arc::new(LocalDirectory::new(temp.path()));
  root.write_file(&rel("file1"), b"Contents of file 1\n").unwrap();
  root.write_file(&rel("file2"), b"Contents of file 2\n").unwrap();
  root.write_file(&rel("sub/file3"), b"Contents of file 3\n").unwrap();
  let sources = SourceSet::scan("test", &*root, None)
    .unwrap()
    .into_shared();
  let deps = SourceSetDependencies::new(root.clone(), sources)
    .with_ignore(IgnoreList::new(["*.bak"]).unwrap())
    .with_full_dependency(true);
  (temp, root, deps)
}

#[test]
fn source_set_fingerprint_survives_the_protocol() {
  let (_temp, _root, deps) = suite();
  let registry = ProtocolRegistry::with_defaults();

  let original = deps.create_fingerprint().unwrap();
  let decoded = registry.decode(&encode(original.as_ref()).unwrap()).unwrap();

  assert!(*original == *decoded);
  assert!(*decoded == *original);
}

#[test]
fn stored_fingerprint_detects_later_changes() {
  let (_temp, root, deps) = suite();
  let registry = ProtocolRegistry::with_defaults();
  let stored = encode(deps.create_fingerprint().unwrap().as_ref()).unwrap();

  root.write_file(&rel("sub/file3"), b"Modified contents of file 3\n").unwrap();

  let previous = registry.decode(&stored).unwrap();
  assert!(*previous != *deps.create_fingerprint().unwrap());
}

#[test]
fn equal_state_encodes_to_identical_bytes() {
  let (_temp, _root, deps) = suite();
  let a = encode(deps.create_fingerprint().unwrap().as_ref()).unwrap();
  let b = encode(deps.create_fingerprint().unwrap().as_ref()).unwrap();
  assert_eq!(a, b);
}

#[test]
fn composite_dependencies_round_trip() {
  let (_temp, root, _deps) = suite();
  let sources = SourceSet::new("one").with_files([rel("file1")]).into_shared();
  let composite = MultipleDependencies::new([
    Arc::new(SourceSetDependencies::new(root, sources)) as Arc<dyn Dependencies>,
    Arc::new(ParametersDependencies::new("settings", Arc::new(RwLock::new(("x64", true))))) as Arc<dyn Dependencies>,
  ]);
  let registry = ProtocolRegistry::with_defaults();

  let original = composite.create_fingerprint().unwrap();
  let decoded = registry.decode(&encode(original.as_ref()).unwrap()).unwrap();

  assert!(*original == *decoded);
  let parts = decoded.as_any().downcast_ref::<CombinedFingerprint>().unwrap().parts();
  assert_eq!(parts.len(), 2);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct ToolVersionFingerprint {
  tool: String,
  version: (u32, u32, u32),
}

impl Fingerprint for ToolVersionFingerprint {
  fn protocol_tag(&self) -> &'static str {
    "tool-version"
  }

  fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(self).map_err(|e| ProtocolError::InvalidPayload {
      kind: "tool-version".to_string(),
      message: e.to_string(),
    })
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn eq_fingerprint(&self, other: &dyn Fingerprint) -> bool {
    same_kind_eq(self, other)
  }
}

#[test]
fn user_kinds_decode_once_registered() {
  let tool = ToolVersionFingerprint {
    tool: "csc".to_string(),
    version: (4, 8, 1),
  };
  let combined = CombinedFingerprint::new(vec![Box::new(EmptyFingerprint), Box::new(tool)]);
  let bytes = encode(&combined).unwrap();

  let defaults = ProtocolRegistry::with_defaults();
  assert!(matches!(defaults.decode(&bytes), Err(ProtocolError::UnknownKind(tag)) if tag == "tool-version"));

  let mut registry = ProtocolRegistry::with_defaults();
  registry.register(JsonDecoder);
  let decoded = registry.decode(&bytes).unwrap();
  assert!(combined.eq_fingerprint(decoded.as_ref()));
}

struct JsonDecoder;

impl kiln_lib::fingerprint::FingerprintDecoder for JsonDecoder {
  fn supports(&self, tag: &str) -> bool {
    tag == "tool-version"
  }

  fn decode(&self, payload: &[u8], _nested: &NestedFrames<'_>) -> Result<Box<dyn Fingerprint>, ProtocolError> {
    let value: ToolVersionFingerprint =
      serde_json::from_slice(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: "tool-version".to_string(),
        message: e.to_string(),
      })?;
    Ok(Box::new(value))
  }
}

#[test]
fn payload_decoder_handles_serde_kinds() {
  let mut registry = ProtocolRegistry::new();
  registry.register(PayloadDecoder::<EmptyFingerprint>::new(EmptyFingerprint::TAG));
  assert_eq!(registry.len(), 1);

  let decoded = registry.decode(&encode(&EmptyFingerprint).unwrap()).unwrap();
  assert!(EmptyFingerprint.eq_fingerprint(decoded.as_ref()));
}

#[test]
fn garbage_is_rejected_not_misread() {
  let registry = ProtocolRegistry::with_defaults();
  assert!(registry.decode(b"").is_err());
  assert!(registry.decode(b"not a fingerprint at all").is_err());

  let mut bytes = encode(&EmptyFingerprint).unwrap();
  let len = bytes.len();
  bytes[len - 4..].copy_from_slice(&u32::MAX.to_le_bytes());
  assert!(registry.decode(&bytes).is_err());
}
