//! rollcall-core: Identity matching and attention classification.
//!
//! Matches face embeddings against an enrolled roster and derives a
//! frame-level attentiveness signal from facial landmarks. The vision
//! models, camera and storage plug in through the traits in
//! [`extractor`], [`pipeline`] and [`roster`].

pub mod attention;
pub mod enroll;
pub mod extractor;
pub mod frame;
pub mod head_pose;
pub mod linalg;
pub mod matcher;
pub mod pipeline;
pub mod rescale;
pub mod roster;
pub mod types;

pub use attention::{AttentionMethod, AttentionMetric, AttentionState};
pub use extractor::{EmbeddingExtractor, LandmarkExtractor};
pub use frame::Frame;
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use pipeline::{FrameReport, FrameSource, Pipeline, PipelineConfig, ReportSink};
pub use rescale::DownscaleFactor;
pub use roster::{Roster, RosterEntry, RosterSource};
pub use types::{DetectedFace, Embedding, FaceBox, FaceLandmarks, IdentityId, Point2};
