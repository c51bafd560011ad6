use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use super::{Dependencies, FingerprintError};
use crate::fingerprint::{Fingerprint, ParametersFingerprint};

/// Dependency on a structured parameter block, such as a project's
/// compiler settings.
///
/// The block is shared with its owner, so the fingerprint reflects the
/// parameters as they are when the fingerprint is created.
pub struct ParametersDependencies<T> {
  name: String,
  parameters: Arc<RwLock<T>>,
}

impl<T> ParametersDependencies<T> {
  pub fn new(name: impl Into<String>, parameters: Arc<RwLock<T>>) -> Self {
    Self {
      name: name.into(),
      parameters,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

impl<T: Serialize + Send + Sync> Dependencies for ParametersDependencies<T> {
  fn create_fingerprint(&self) -> Result<Box<dyn Fingerprint>, FingerprintError> {
    let parameters = self.parameters.read().unwrap_or_else(PoisonError::into_inner);
    let fingerprint =
      ParametersFingerprint::of(&self.name, &*parameters).map_err(|source| FingerprintError::Parameters {
        name: self.name.clone(),
        source,
      })?;
    Ok(Box::new(fingerprint))
  }
}
