//! Nearest-neighbor identity matching against the roster.

use crate::roster::Roster;
use crate::types::{Embedding, IdentityId, UNKNOWN_NAME};
use serde::Serialize;

/// Default maximum embedding distance accepted as a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.45;

/// Result of matching one query embedding against the roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Matched identity, `None` when no reference lies within tolerance.
    pub identity_id: Option<IdentityId>,
    /// Display name of the match, or `"Unknown"`.
    pub display_name: String,
    /// Best distance found; `None` only when nothing was compared.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            identity_id: None,
            display_name: UNKNOWN_NAME.to_string(),
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// Strategy for comparing a query embedding against the roster.
pub trait Matcher {
    fn find(&self, query: &Embedding, roster: &Roster, tolerance: f32) -> MatchResult;
}

/// Euclidean nearest-neighbor matcher.
///
/// Every reference vector is a candidate on its own; the single closest one
/// wins, ties going to the entry that comes first in roster order.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find(&self, query: &Embedding, roster: &Roster, tolerance: f32) -> MatchResult {
        if roster.is_empty() {
            return MatchResult::unknown(None);
        }
        let Some(dimension) = roster.dimension() else {
            return MatchResult::unknown(None);
        };
        if query.dimension() != dimension {
            tracing::warn!(
                query = query.dimension(),
                roster = dimension,
                "query embedding dimension does not match roster"
            );
            return MatchResult::unknown(None);
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in roster.entries().iter().enumerate() {
            let dist = query.euclidean_distance(&entry.embedding);
            // Strict comparison keeps the first-encountered entry on ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => {
                let entry = &roster.entries()[idx];
                MatchResult {
                    identity_id: Some(entry.identity_id),
                    display_name: entry.display_name.clone(),
                    distance: Some(best_dist),
                }
            }
            Some(_) => MatchResult::unknown(Some(best_dist)),
            // Only reachable when every distance was NaN.
            None => MatchResult::unknown(None),
        }
    }
}
