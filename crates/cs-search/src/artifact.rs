//! JSON artifacts for finished runs.
//!
//! The envelope (`run_id`, `created_at`) identifies one execution and is not
//! covered by the digest; two runs of the same spec produce the same digest
//! but different run ids.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use cs_types::{config_error, CsError, CsResult, OrchestratorResult, SearchResult};

/// A result type that can be persisted as an artifact.
pub trait ArtifactPayload: Serialize + DeserializeOwned {
    const SCHEMA_VERSION: &'static str;

    /// Digest stored with the payload.
    fn digest(&self) -> &str;

    /// Digest recomputed from the payload's content.
    fn recompute_digest(&self) -> String;

    /// True when every digest the payload carries matches its content.
    fn verify_digest(&self) -> bool;
}

impl ArtifactPayload for SearchResult {
    const SCHEMA_VERSION: &'static str = "certsearch.search.v1";

    fn digest(&self) -> &str {
        &self.digest
    }

    fn recompute_digest(&self) -> String {
        SearchResult::recompute_digest(self)
    }

    fn verify_digest(&self) -> bool {
        SearchResult::verify_digest(self)
    }
}

impl ArtifactPayload for OrchestratorResult {
    const SCHEMA_VERSION: &'static str = "certsearch.orchestrator.v1";

    fn digest(&self) -> &str {
        &self.digest
    }

    fn recompute_digest(&self) -> String {
        OrchestratorResult::recompute_digest(self)
    }

    fn verify_digest(&self) -> bool {
        OrchestratorResult::verify_digest(self)
    }
}

/// Envelope around a persisted result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: ArtifactPayload")]
pub struct RunArtifact<T> {
    pub schema_version: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub digest: String,
    pub result: T,
}

pub type SearchArtifact = RunArtifact<SearchResult>;
pub type OrchestratorArtifact = RunArtifact<OrchestratorResult>;

impl<T: ArtifactPayload> RunArtifact<T> {
    pub fn new(result: T) -> Self {
        Self {
            schema_version: T::SCHEMA_VERSION.to_string(),
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            digest: result.digest().to_string(),
            result,
        }
    }

    /// Check the schema tag and every digest.
    pub fn validate(&self) -> CsResult<()> {
        if self.schema_version != T::SCHEMA_VERSION {
            return Err(config_error!(
                "unexpected artifact schema {}, expected {}",
                self.schema_version,
                T::SCHEMA_VERSION
            ));
        }
        if self.digest != self.result.digest() || !self.result.verify_digest() {
            return Err(CsError::DigestMismatch {
                recorded: self.digest.clone(),
                recomputed: self.result.recompute_digest(),
            });
        }
        Ok(())
    }

    pub fn to_json_string(&self) -> CsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> CsResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json_string()?)?;
        info!("Wrote artifact {} to {}", self.run_id, path.display());
        Ok(())
    }

    /// Parse and validate an artifact.
    pub fn from_json_str(text: &str) -> CsResult<Self> {
        let artifact: Self = serde_json::from_str(text)?;
        artifact.validate()?;
        Ok(artifact)
    }

    pub fn read_json(path: impl AsRef<Path>) -> CsResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
