//! Fingerprints: immutable, comparable snapshots of a builder's inputs.
//!
//! A fingerprint is produced by a builder's [`Dependencies`](crate::deps::Dependencies)
//! and used both as a change detector and as the key of a build cache entry.
//! Every concrete kind has a protocol tag and a binary payload, so any
//! fingerprint can be written with [`encode`] and read back through a
//! [`ProtocolRegistry`].

mod combined;
mod parameters;
mod protocol;
mod source_set;

use std::any::Any;
use std::fmt;

pub use combined::{CombinedFingerprint, EmptyFingerprint};
pub use parameters::ParametersFingerprint;
pub use protocol::{FingerprintDecoder, NestedFrames, PayloadDecoder, ProtocolError, ProtocolRegistry, encode};
pub use source_set::SourceSetFingerprint;

/// A point-in-time digest of a builder's observable inputs.
///
/// Two fingerprints are equal iff the observed input state is equal.
/// Implementations must produce a canonical payload: equal fingerprints
/// encode to identical bytes.
pub trait Fingerprint: fmt::Debug + Send + Sync + 'static {
  /// Discriminator written in front of the payload.
  fn protocol_tag(&self) -> &'static str;

  /// Serialize the fingerprint body.
  fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError>;

  fn as_any(&self) -> &dyn Any;

  /// Compare against a fingerprint of any kind.
  fn eq_fingerprint(&self, other: &dyn Fingerprint) -> bool;
}

impl PartialEq for dyn Fingerprint {
  fn eq(&self, other: &Self) -> bool {
    self.eq_fingerprint(other)
  }
}

/// Equality helper for fingerprint kinds with a `PartialEq` implementation.
///
/// Fingerprints of different concrete kinds are never equal.
pub fn same_kind_eq<T: PartialEq + 'static>(this: &T, other: &dyn Fingerprint) -> bool {
  other.as_any().downcast_ref::<T>().is_some_and(|other| other == this)
}
