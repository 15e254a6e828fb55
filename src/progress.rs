//! Progress events emitted by a batch run.
//!
//! A batch run is a lazy, forward-only sequence of [`ProgressEvent`]s:
//! a Started event before each external call, an error event when one
//! image's call fails, and exactly one terminal Complete event. The type
//! is transport-agnostic; [`ProgressEvent::to_ndjson`] renders the
//! newline-delimited JSON record shape for callers that stream events over
//! a wire, but consumers may equally match on the struct directly.
//!
//! Absent fields are omitted from the JSON output, so each record carries
//! only the subset that applies to it:
//!
//! ```text
//! {"progress":0,"total":3,"status":"Extracting text from img_1.png... (1/3)","current_image":"img_1.png"}
//! {"error":"Error with img_2.png: API error: quota exceeded"}
//! {"progress":3,"total":3,"status":"Extraction Complete!","complete":true}
//! ```

use serde::{Deserialize, Serialize};

/// One record in a batch run's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 0-based index of the image being processed; equals `total` on the
    /// terminal event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<usize>,

    /// Number of images in the selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,

    /// Human-readable status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Name of the image currently being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image: Option<String>,

    /// Failure description: per-item when `current_image`-scoped, fatal when
    /// it is the only populated field besides `complete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set on the terminal event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
}

impl ProgressEvent {
    /// Event emitted just before the external call for image `index`.
    pub fn started(index: usize, total: usize, image: &str) -> Self {
        Self {
            progress: Some(index),
            total: Some(total),
            status: Some(format!(
                "Extracting text from {image}... ({}/{total})",
                index + 1
            )),
            current_image: Some(image.to_string()),
            error: None,
            complete: None,
        }
    }

    /// Event recording one image's failure; the batch continues after it.
    pub fn item_failed(image: &str, reason: &str) -> Self {
        Self {
            progress: None,
            total: None,
            status: None,
            current_image: Some(image.to_string()),
            error: Some(format!("Error with {image}: {reason}")),
            complete: None,
        }
    }

    /// Terminal event after every selection entry has been attempted.
    pub fn completed(total: usize) -> Self {
        Self {
            progress: Some(total),
            total: Some(total),
            status: Some("Extraction Complete!".to_string()),
            current_image: None,
            error: None,
            complete: Some(true),
        }
    }

    /// Terminal event for a failure that ends the run before (or outside)
    /// the per-image loop, e.g. session construction.
    pub fn fatal(reason: &str) -> Self {
        Self {
            progress: None,
            total: None,
            status: None,
            current_image: None,
            error: Some(reason.to_string()),
            complete: Some(true),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.complete == Some(true)
    }

    /// Render the event as one newline-terminated JSON record.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
