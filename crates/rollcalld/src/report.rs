//! Outbound attendance events.
//!
//! Every post is spawned as its own task with a bounded timeout. Failures and
//! non-2xx replies are logged and dropped; the frame loop never waits on them.

use reqwest::Client;
use rollcall_core::{AttentionMethod, FrameReport, IdentityId, ReportSink};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    /// One `{student_id, present, attention}` post per recognized face.
    Simple,
    /// One `{detections, engagement_data}` post per frame.
    Batched,
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("attendance service replied {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleEvent {
    pub student_id: IdentityId,
    pub present: u8,
    pub attention: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEntry {
    pub student_id: IdentityId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementEntry {
    pub student_id: IdentityId,
    pub attention_score: f32,
    pub eyes_open: bool,
    pub facing_camera: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchedEvent {
    pub detections: Vec<DetectionEntry>,
    pub engagement_data: Vec<EngagementEntry>,
}

pub fn simple_events(report: &FrameReport) -> Vec<SimpleEvent> {
    let attention = if report.attention.attentive { 100.0 } else { 0.0 };
    report
        .recognized_ids()
        .map(|student_id| SimpleEvent {
            student_id,
            present: 1,
            attention,
        })
        .collect()
}

/// `None` when nothing in the frame was recognized.
///
/// Only the signal the active method measures is reported; the other one is `true`.
pub fn batched_event(report: &FrameReport, method: &AttentionMethod) -> Option<BatchedEvent> {
    let ids: Vec<IdentityId> = report.recognized_ids().collect();
    if ids.is_empty() {
        return None;
    }

    let attentive = report.attention.attentive;
    let (eyes_open, facing_camera) = match method {
        AttentionMethod::EyeAspectRatio { .. } => (attentive, true),
        AttentionMethod::HeadPose { .. } => (true, attentive),
    };

    Some(BatchedEvent {
        detections: ids.iter().map(|&student_id| DetectionEntry { student_id }).collect(),
        engagement_data: ids
            .iter()
            .map(|&student_id| EngagementEntry {
                student_id,
                attention_score: if attentive { 1.0 } else { 0.0 },
                eyes_open,
                facing_camera,
            })
            .collect(),
    })
}

/// Report sink that posts frame results to the attendance service.
pub struct HttpReporter {
    client: Client,
    base_url: String,
    mode: ReportMode,
    method: AttentionMethod,
    runtime: Handle,
}

impl HttpReporter {
    pub fn new(
        base_url: &str,
        mode: ReportMode,
        method: AttentionMethod,
        timeout: Duration,
        runtime: Handle,
    ) -> Result<Self, ReportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
            method,
            runtime,
        })
    }

    fn spawn_post<T: Serialize>(&self, path: &str, body: &T) {
        let body = match serde_json::to_value(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode attendance event");
                return;
            }
        };
        let client = self.client.clone();
        let url = format!("{}{path}", self.base_url);

        self.runtime.spawn(async move {
            if let Err(e) = post(&client, &url, &body).await {
                tracing::warn!(url = %url, error = %e, "attendance post failed; dropped");
            }
        });
    }
}

async fn post(client: &Client, url: &str, body: &serde_json::Value) -> Result<(), ReportError> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ReportError::Status(status));
    }
    tracing::trace!(url, %status, "attendance post delivered");
    Ok(())
}

impl ReportSink for HttpReporter {
    fn emit(&self, report: &FrameReport) {
        match self.mode {
            ReportMode::Simple => {
                for event in simple_events(report) {
                    self.spawn_post("/attendance/log", &event);
                }
            }
            ReportMode::Batched => {
                if let Some(event) = batched_event(report, &self.method) {
                    self.spawn_post("/api/ai/process-frame", &event);
                }
            }
        }
    }
}
