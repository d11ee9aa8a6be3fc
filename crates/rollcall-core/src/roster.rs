//! In-memory roster of enrolled identities and their reference embeddings.
//!
//! The roster is flattened: an identity with three enrollment photos
//! contributes three entries, each an independent match candidate. It is
//! loaded once per session and read-only while matching.

use crate::types::{Embedding, IdentityId};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RosterError {
    #[error("embedding has {actual} dimensions, roster uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding is empty")]
    EmptyEmbedding,
}

/// One reference embedding owned by an enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub embedding: Embedding,
}

/// Backing store the roster is loaded from.
pub trait RosterSource {
    type Error: std::error::Error;

    /// Every reference embedding, primary encodings first, in a stable order.
    fn fetch_entries(&self) -> Result<Vec<RosterEntry>, Self::Error>;
}

/// Ordered, flattened collection of reference embeddings.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    dimension: Option<usize>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty roster that only accepts embeddings of length `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            entries: Vec::new(),
            dimension: Some(dimension),
        }
    }

    /// Load the roster from `source`; the first entry fixes the dimension.
    ///
    /// Never fails: an unreachable or corrupt source yields an empty roster
    /// and a warning, so the pipeline keeps running with zero known identities.
    pub fn load<S: RosterSource>(source: &S) -> Roster {
        Self::load_expecting(source, None)
    }

    /// Load the roster keeping only entries of the `expected` dimension,
    /// normally the active extractor's embedding length.
    pub fn load_expecting<S: RosterSource>(source: &S, expected: Option<usize>) -> Roster {
        let entries = match source.fetch_entries() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "could not load roster; continuing with no known identities");
                return expected.map_or_else(Roster::new, Roster::with_dimension);
            }
        };

        let fetched = entries.len();
        let mut roster = expected.map_or_else(Roster::new, Roster::with_dimension);
        let mut mismatched: Vec<usize> = Vec::new();
        for entry in entries {
            let id = entry.identity_id;
            match roster.push(entry) {
                Ok(()) => {}
                Err(RosterError::DimensionMismatch { actual, .. }) => {
                    tracing::debug!(identity_id = id, dimension = actual, "skipping roster entry of other dimension");
                    mismatched.push(actual);
                }
                Err(e) => tracing::warn!(identity_id = id, error = %e, "skipping roster entry"),
            }
        }

        if !mismatched.is_empty() {
            mismatched.sort_unstable();
            mismatched.dedup();
            if roster.is_empty() {
                tracing::warn!(
                    stored = fetched,
                    expected = ?roster.dimension(),
                    found = ?mismatched,
                    "no stored encoding has the expected dimension; students must be re-enrolled"
                );
            } else {
                tracing::warn!(
                    skipped = fetched - roster.len(),
                    expected = ?roster.dimension(),
                    found = ?mismatched,
                    "skipped stored encodings of another dimension"
                );
            }
        }

        tracing::info!(
            entries = roster.len(),
            identities = roster.identity_count(),
            dimension = ?roster.dimension(),
            "roster loaded"
        );
        roster
    }

    /// Append a reference embedding. Unless fixed up front, the first entry
    /// sets the roster dimension.
    pub fn push(&mut self, entry: RosterEntry) -> Result<(), RosterError> {
        let actual = entry.embedding.dimension();
        if actual == 0 {
            return Err(RosterError::EmptyEmbedding);
        }
        match self.dimension {
            Some(expected) if expected != actual => {
                return Err(RosterError::DimensionMismatch { expected, actual });
            }
            Some(_) => {}
            None => self.dimension = Some(actual),
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shared dimensionality `D`, or `None` for an empty roster.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of distinct identities.
    pub fn identity_count(&self) -> usize {
        let mut ids: Vec<IdentityId> = self.entries.iter().map(|e| e.identity_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}
