//! # pdfglean
//!
//! Extract embedded raster images from a PDF and batch-run each image
//! through a multimodal text-extraction model, producing per-image text
//! files and one merged text file.
//!
//! ## Why this crate?
//!
//! Plenty of PDFs carry their real content as embedded images: scanned
//! receipts, figure-heavy reports, photographed forms. Text-layer tools see
//! nothing there. This crate recovers the embedded images deterministically,
//! keeps them (and the text derived from them) as a consistent on-disk
//! working set, and drives a sequential, progress-streamed batch of
//! model calls with per-image failure isolation.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Extract   recover embedded images via lopdf → img_1.png, img_2.jpg…
//!  ├─ 2. Select    caller picks a subset from the sorted gallery listing
//!  ├─ 3. Batch     one model call per image, strictly in order,
//!  │               Started/error events streamed as it goes
//!  └─ 4. Download  merged_text.txt assembled from the successful results
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfglean::{extract_images, run_batch, BatchRequest, GeminiFactory, WorkingSetStore};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = WorkingSetStore::under_root("./workset");
//!     store.ensure_layout()?;
//!
//!     let staged = store.stage_source("scan.pdf", &std::fs::read("scan.pdf")?)?;
//!     let count = extract_images(&store, &staged)?;
//!     println!("extracted {count} images");
//!
//!     let request = BatchRequest::new(
//!         store.list_images()?,
//!         "Transcribe all text in this image.",
//!         std::env::var("GEMINI_API_KEY")?,
//!     );
//!     let mut events = run_batch(store.clone(), Arc::new(GeminiFactory::default()), request)?;
//!     while let Some(event) = events.next().await {
//!         print!("{}", event.to_ndjson()?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Single-session model
//!
//! The working set assumes one logical user: one source-document slot, one
//! extracted set, no locking. Callers that expose this over a transport must
//! serialise extraction, deletion, and batch runs themselves.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfglean` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod error;
pub mod extract;
pub mod ocr;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run_batch, BatchRequest, EventStream};
pub use error::{GleanError, ItemError};
pub use extract::{extract_images, extract_images_from_bytes};
pub use ocr::{
    GeminiExtractor, GeminiFactory, ImagePayload, TextExtractor, TextExtractorFactory,
    DEFAULT_MODEL,
};
pub use progress::ProgressEvent;
pub use store::{WorkingSetStore, MERGED_DOWNLOAD_NAME, MERGED_NAME, SOURCE_NAME};
