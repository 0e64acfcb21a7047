//! dcim-fixer - Photo Path Normalizer for Field-Survey Tables
//!
//! Field-survey apps store one photo path per text column. Over the years
//! those paths drift: `files/` instead of `DCIM/`, missing separators,
//! `.png.jpg` double extensions, no extension at all. This crate repairs
//! them in place, marks rows whose photo no longer exists on disk, and
//! reports per-column statistics.
//!
//! # Features
//!
//! - **Ordered Rewrite Rules**: Seven SQL rewrites applied per column,
//!   in a fixed order, inside one transaction.
//!
//! - **Existence Verification**: Every stored path is resolved against a
//!   photo folder; missing files become `File Not Found`.
//!
//! - **Sentinel Stability**: `Link Not Found` and `File Not Found` are
//!   terminal and never rewritten again.
//!
//! - **Statistics**: Per-column counts of valid, malformed and sentinel
//!   values, plus the rows holding each sentinel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SQLite Database                          │
//! │                (survey table, photo path columns)               │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Pipeline                               │
//! │   ┌──────────────┐    ┌──────────────┐    ┌──────────────┐      │
//! │   │ Rewrite      │───►│ Existence    │───►│ Statistics   │      │
//! │   │ Rules (1-7)  │    │ Verifier     │    │ (read-only)  │      │
//! │   │ 1 tx         │    │ 1 tx         │    │              │      │
//! │   └──────┬───────┘    └──────┬───────┘    └──────────────┘      │
//! │          │                   │  stat()                          │
//! │          │                   ▼                                  │
//! │          │            ┌──────────────┐                          │
//! │          │            │ Photo Folder │                          │
//! │          │            │   DCIM/...   │                          │
//! │          │            └──────────────┘                          │
//! │          ▼                                                      │
//! │   ┌──────────────────────────┐                                  │
//! │   │      ProgressSink        │                                  │
//! │   │  (bar, channel, closure) │                                  │
//! │   └──────────────────────────┘                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Fix paths and verify against the photo folder
//! dcim-fixer survey.db fix --table visits --folder /mnt/photos
//!
//! # Only inspect
//! dcim-fixer survey.db report --table visits
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod progress;

pub use config::{CliArgs, FixOptions, PipelineConfig, WatchedColumn};
pub use error::{FixerError, Result};
pub use pipeline::{
    apply_rules, gather_statistics, verify_existence, Pipeline, PipelineOutcome, RewriteRule,
    StatsReport, FILE_NOT_FOUND, LINK_NOT_FOUND,
};
pub use progress::{NoProgress, ProgressSink};
