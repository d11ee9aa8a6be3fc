//! Per-frame coordinator: downscale, extract, match, classify, emit.
//!
//! One frame is fully processed before the next is read. Steady-state
//! errors (read, detection, landmark) are logged and absorbed here; only
//! construction can fail.

use crate::attention::{AttentionMethod, AttentionState};
use crate::extractor::{EmbeddingExtractor, LandmarkExtractor};
use crate::frame::Frame;
use crate::matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_TOLERANCE};
use crate::rescale::DownscaleFactor;
use crate::roster::Roster;
use crate::types::{FaceBox, IdentityId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pause after a failed frame read before trying again.
pub const READ_BACKOFF: Duration = Duration::from_millis(50);

/// Produces frames for the pipeline, one at a time.
pub trait FrameSource {
    type Error: std::error::Error;

    fn next_frame(&mut self) -> Result<Frame, Self::Error>;
}

/// Consumer of per-frame results. Must not block the loop.
pub trait ReportSink {
    fn emit(&self, report: &FrameReport);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedFace {
    pub result: MatchResult,
    /// Box in original-frame pixel coordinates.
    pub face_box: FaceBox,
}

/// Everything the pipeline concluded about one frame.
///
/// The attention value is frame-level: it comes from the first landmark set
/// and is shared by every face in the frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub faces: Vec<RecognizedFace>,
    pub attention: AttentionState,
}

impl FrameReport {
    /// Identities matched in this frame, in detection order.
    pub fn recognized_ids(&self) -> impl Iterator<Item = IdentityId> + '_ {
        self.faces.iter().filter_map(|f| f.result.identity_id)
    }

    /// "Detected: Alice, Unknown" or "No face detected".
    pub fn status_line(&self) -> String {
        if self.faces.is_empty() {
            return "No face detected".to_string();
        }
        let names: Vec<&str> = self
            .faces
            .iter()
            .map(|f| f.result.display_name.as_str())
            .collect();
        format!("Detected: {}", names.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub tolerance: f32,
    pub downscale: DownscaleFactor,
    pub attention: AttentionMethod,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            downscale: DownscaleFactor::default(),
            attention: AttentionMethod::default(),
        }
    }
}

/// Counters reported when [`Pipeline::run`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: u64,
    pub read_errors: u64,
    pub detection_errors: u64,
}

/// Owns the extractors and the roster for one recognition session.
///
/// Dropping the pipeline releases the extractors' model state.
pub struct Pipeline<E, L, M = EuclideanMatcher> {
    embedder: E,
    landmarker: L,
    matcher: M,
    roster: Roster,
    config: PipelineConfig,
}

impl<E, L> Pipeline<E, L, EuclideanMatcher>
where
    E: EmbeddingExtractor,
    L: LandmarkExtractor,
{
    pub fn new(embedder: E, landmarker: L, roster: Roster, config: PipelineConfig) -> Self {
        Self::with_matcher(embedder, landmarker, EuclideanMatcher, roster, config)
    }
}

impl<E, L, M> Pipeline<E, L, M>
where
    E: EmbeddingExtractor,
    L: LandmarkExtractor,
    M: Matcher,
{
    pub fn with_matcher(
        embedder: E,
        landmarker: L,
        matcher: M,
        roster: Roster,
        config: PipelineConfig,
    ) -> Self {
        tracing::info!(
            tolerance = config.tolerance,
            downscale = config.downscale.get(),
            attention = config.attention.name(),
            roster_entries = roster.len(),
            "pipeline ready"
        );
        Self {
            embedder,
            landmarker,
            matcher,
            roster,
            config,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a single frame.
    ///
    /// Only a detection failure is returned; landmark and attention failures
    /// are absorbed into a not-attentive state.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport, E::Error> {
        let scale = self.config.downscale;
        let small = frame.downscale(scale);
        let detected = self.embedder.extract(&small)?;

        let faces = detected
            .iter()
            .map(|face| RecognizedFace {
                result: self
                    .matcher
                    .find(&face.embedding, &self.roster, self.config.tolerance),
                face_box: scale.to_original(face.face_box),
            })
            .collect();

        let attention = self.frame_attention(frame);

        Ok(FrameReport { faces, attention })
    }

    /// Attention for the frame, from the first landmark set on the full-size frame.
    fn frame_attention(&mut self, frame: &Frame) -> AttentionState {
        let sets = match self.landmarker.landmarks(frame) {
            Ok(sets) => sets,
            Err(e) => {
                tracing::warn!(error = %e, "landmark extraction failed; treating frame as not attentive");
                return AttentionState::no_landmarks();
            }
        };
        let Some(first) = sets.first() else {
            return AttentionState::no_landmarks();
        };
        match self
            .config
            .attention
            .classify(first, frame.width, frame.height)
        {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "attention classification failed; treating frame as not attentive");
                AttentionState::ear_unavailable()
            }
        }
    }

    /// Drive the loop until `stop` is raised.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &K, stop: &AtomicBool) -> RunStats
    where
        S: FrameSource,
        K: ReportSink,
    {
        let mut stats = RunStats::default();

        while !stop.load(Ordering::Relaxed) {
            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "frame read failed; skipping");
                    stats.read_errors += 1;
                    std::thread::sleep(READ_BACKOFF);
                    continue;
                }
            };

            match self.process_frame(&frame) {
                Ok(report) => {
                    tracing::debug!(
                        status = %report.status_line(),
                        attentive = report.attention.attentive,
                        "frame processed"
                    );
                    sink.emit(&report);
                    stats.frames += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "face detection failed; skipping frame");
                    stats.detection_errors += 1;
                }
            }
        }

        tracing::info!(
            frames = stats.frames,
            read_errors = stats.read_errors,
            detection_errors = stats.detection_errors,
            "pipeline stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::{AttentionMetric, EAR_EYE_INDICES};
    use crate::roster::RosterEntry;
    use crate::types::{DetectedFace, Embedding, FaceLandmarks, Point2};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("mock failure")]
    struct MockError;

    /// Returns the same faces for every frame and records the frame sizes it saw.
    struct FixedEmbedder {
        faces: Vec<DetectedFace>,
        fail: bool,
        seen: Vec<(u32, u32)>,
    }

    impl EmbeddingExtractor for FixedEmbedder {
        type Error = MockError;
        fn extract(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, MockError> {
            self.seen.push((frame.width, frame.height));
            if self.fail {
                return Err(MockError);
            }
            Ok(self.faces.clone())
        }
    }

    struct FixedLandmarker(Result<Vec<FaceLandmarks>, ()>);

    impl LandmarkExtractor for FixedLandmarker {
        type Error = MockError;
        fn landmarks(&mut self, _frame: &Frame) -> Result<Vec<FaceLandmarks>, MockError> {
            self.0.clone().map_err(|_| MockError)
        }
    }

    /// Yields queued results, then raises the stop flag.
    struct QueueSource<'a> {
        queue: VecDeque<Result<Frame, MockError>>,
        stop: &'a AtomicBool,
    }

    impl FrameSource for QueueSource<'_> {
        type Error = MockError;
        fn next_frame(&mut self) -> Result<Frame, MockError> {
            let next = self.queue.pop_front().unwrap_or(Err(MockError));
            if self.queue.is_empty() {
                self.stop.store(true, Ordering::Relaxed);
            }
            next
        }
    }

    #[derive(Default)]
    struct CollectSink(RefCell<Vec<FrameReport>>);

    impl ReportSink for CollectSink {
        fn emit(&self, report: &FrameReport) {
            self.0.borrow_mut().push(report.clone());
        }
    }

    fn alice_roster() -> Roster {
        let mut roster = Roster::new();
        roster
            .push(RosterEntry {
                identity_id: 1,
                display_name: "Alice".into(),
                embedding: Embedding::new(vec![0.1, 0.0]),
            })
            .unwrap();
        roster
    }

    fn face(values: Vec<f32>, b: FaceBox) -> DetectedFace {
        DetectedFace {
            embedding: Embedding::new(values),
            face_box: b,
        }
    }

    fn open_eye_landmarks() -> FaceLandmarks {
        let mut points = vec![Point2::new(0.0, 0.0); 468];
        let eye = [
            Point2::new(100.0, 100.0),
            Point2::new(110.0, 94.0),
            Point2::new(120.0, 94.0),
            Point2::new(130.0, 100.0),
            Point2::new(120.0, 106.0),
            Point2::new(110.0, 106.0),
        ];
        for (&i, &p) in EAR_EYE_INDICES.iter().zip(eye.iter()) {
            points[i] = p;
        }
        FaceLandmarks { points, normalized: false }
    }

    fn ear_config() -> PipelineConfig {
        PipelineConfig {
            attention: AttentionMethod::EyeAspectRatio { threshold: 0.23 },
            ..PipelineConfig::default()
        }
    }

    fn pipeline(
        faces: Vec<DetectedFace>,
        landmarks: Result<Vec<FaceLandmarks>, ()>,
        config: PipelineConfig,
    ) -> Pipeline<FixedEmbedder, FixedLandmarker> {
        Pipeline::new(
            FixedEmbedder { faces, fail: false, seen: Vec::new() },
            FixedLandmarker(landmarks),
            alice_roster(),
            config,
        )
    }

    #[test]
    fn test_process_frame_matches_and_rescales() {
        let mut p = pipeline(
            vec![
                face(vec![0.0, 0.0], FaceBox::new(10, 50, 40, 20)),
                face(vec![5.0, 5.0], FaceBox::new(0, 10, 10, 0)),
            ],
            Ok(vec![open_eye_landmarks()]),
            ear_config(),
        );
        let frame = Frame::new(vec![0; 640 * 480], 640, 480);
        let report = p.process_frame(&frame).unwrap();

        // Detection runs on the quarter-size frame.
        assert_eq!(p.embedder.seen, vec![(160, 120)]);

        assert_eq!(report.faces.len(), 2);
        assert_eq!(report.faces[0].result.display_name, "Alice");
        assert_eq!(report.faces[0].face_box, FaceBox::new(40, 200, 160, 80));
        assert_eq!(report.faces[1].result.display_name, "Unknown");
        assert_eq!(report.recognized_ids().collect::<Vec<_>>(), vec![1]);
        assert_eq!(report.status_line(), "Detected: Alice, Unknown");

        // EAR = (12 + 12) / (2 * 30) = 0.4.
        assert!(report.attention.attentive);
    }

    #[test]
    fn test_no_faces_status_line() {
        let mut p = pipeline(vec![], Ok(vec![]), PipelineConfig::default());
        let report = p.process_frame(&Frame::new(vec![0; 64], 8, 8)).unwrap();
        assert_eq!(report.status_line(), "No face detected");
        assert_eq!(report.attention, AttentionState::no_landmarks());
    }

    #[test]
    fn test_landmark_failure_is_not_attentive() {
        let mut p = pipeline(
            vec![face(vec![0.1, 0.0], FaceBox::new(0, 4, 4, 0))],
            Err(()),
            ear_config(),
        );
        let report = p.process_frame(&Frame::new(vec![0; 64], 8, 8)).unwrap();
        assert_eq!(report.faces.len(), 1);
        assert!(!report.attention.attentive);
        assert_eq!(report.attention.metric, AttentionMetric::NoLandmarks);
    }

    #[test]
    fn test_malformed_ear_landmarks_absorbed() {
        let short = FaceLandmarks { points: vec![Point2::default(); 10], normalized: true };
        let mut p = pipeline(vec![], Ok(vec![short]), ear_config());
        let report = p.process_frame(&Frame::new(vec![0; 64], 8, 8)).unwrap();
        assert!(!report.attention.attentive);
        assert_eq!(report.attention.metric, AttentionMetric::EarUnavailable);
    }

    #[test]
    fn test_first_landmark_set_drives_attention() {
        let closed = FaceLandmarks { points: vec![Point2::new(1.0, 1.0); 468], normalized: false };
        let mut p = pipeline(vec![], Ok(vec![open_eye_landmarks(), closed]), ear_config());
        let report = p.process_frame(&Frame::new(vec![0; 64], 8, 8)).unwrap();
        assert!(report.attention.attentive);
    }

    #[test]
    fn test_run_skips_failed_reads_and_emits_per_frame() {
        let stop = AtomicBool::new(false);
        let mut source = QueueSource {
            queue: VecDeque::from(vec![
                Ok(Frame::new(vec![0; 64], 8, 8)),
                Err(MockError),
                Ok(Frame::new(vec![0; 64], 8, 8)),
            ]),
            stop: &stop,
        };
        let sink = CollectSink::default();
        let mut p = pipeline(
            vec![face(vec![0.1, 0.0], FaceBox::new(0, 4, 4, 0))],
            Ok(vec![]),
            PipelineConfig::default(),
        );

        let stats = p.run(&mut source, &sink, &stop);

        assert_eq!(stats, RunStats { frames: 2, read_errors: 1, detection_errors: 0 });
        let reports = sink.0.borrow();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.faces[0].result.identity_id == Some(1)));
    }

    #[test]
    fn test_run_skips_detection_failures() {
        let stop = AtomicBool::new(false);
        let mut source = QueueSource {
            queue: VecDeque::from(vec![Ok(Frame::new(vec![0; 64], 8, 8))]),
            stop: &stop,
        };
        let sink = CollectSink::default();
        let mut p = pipeline(vec![], Ok(vec![]), PipelineConfig::default());
        p.embedder.fail = true;

        let stats = p.run(&mut source, &sink, &stop);

        assert_eq!(stats.detection_errors, 1);
        assert!(sink.0.borrow().is_empty());
    }

    #[test]
    fn test_run_returns_immediately_when_stopped() {
        let stop = AtomicBool::new(true);
        let mut source = QueueSource { queue: VecDeque::new(), stop: &stop };
        let sink = CollectSink::default();
        let mut p = pipeline(vec![], Ok(vec![]), PipelineConfig::default());
        assert_eq!(p.run(&mut source, &sink, &stop), RunStats::default());
    }
}
