//! Progress reporting for the fix pipeline
//!
//! Stages report `(percent, message)` pairs through the [`ProgressSink`]
//! observer. The sink decides what to do with them: drive a terminal
//! progress bar, forward them over a channel to another thread, or drop
//! them.

use crate::pipeline::stats::StatsReport;
use console::style;
use crossbeam_channel::Sender;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A single progress update
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Completion within the reporting stage, 0-100
    pub percent: f64,

    /// Human-readable status
    pub message: String,
}

/// Receives progress updates from a running stage
///
/// Called synchronously on the stage's thread. Percentages are monotonic
/// within one stage but not across stages.
pub trait ProgressSink {
    fn report(&mut self, percent: f64, message: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(f64, &str),
{
    fn report(&mut self, percent: f64, message: &str) {
        self(percent, message)
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: f64, _message: &str) {}
}

/// Forwards updates to a consumer on another thread
///
/// A disconnected receiver is ignored: losing the display must not fail
/// the stage.
impl ProgressSink for Sender<ProgressEvent> {
    fn report(&mut self, percent: f64, message: &str) {
        let _ = self.send(ProgressEvent {
            percent,
            message: message.to_string(),
        });
    }
}

/// Maps a stage's 0-100 onto a window of an overall run
///
/// `ScaledProgress::new(sink, 10.0, 40.0)` turns 0% into 10% and 100% into 50%.
pub struct ScaledProgress<'a> {
    inner: &'a mut dyn ProgressSink,
    offset: f64,
    span: f64,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a mut dyn ProgressSink, offset: f64, span: f64) -> Self {
        Self {
            inner,
            offset,
            span,
        }
    }
}

impl ProgressSink for ScaledProgress<'_> {
    fn report(&mut self, percent: f64, message: &str) {
        let scaled = self.offset + percent.clamp(0.0, 100.0) * self.span / 100.0;
        self.inner.report(scaled, message);
    }
}

/// Terminal progress bar for a fix run
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Resolution of the bar (one tick per 0.1%)
    const TICKS: u64 = 1000;

    pub fn new() -> Self {
        let bar = ProgressBar::new(Self::TICKS);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
                .expect("Invalid progress template")
                .progress_chars("=> ")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Set a status message without moving the bar
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.set_position(Self::TICKS);
        self.bar.finish_with_message(message.to_string());
    }

    /// Stop the bar where it is (used on failure)
    pub fn abandon(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressReporter {
    fn report(&mut self, percent: f64, message: &str) {
        let ticks = (percent.clamp(0.0, 100.0) * Self::TICKS as f64 / 100.0).round() as u64;
        self.bar.set_position(ticks);
        self.bar.set_message(message.to_string());
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of a run
pub fn print_header(database: &str, table: &str, folder: Option<&str>) {
    println!();
    println!(
        "{} {}",
        style("dcim-fixer").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Database:").bold(), database);
    println!("  {} {}", style("Table:").bold(), table);
    if let Some(folder) = folder {
        println!("  {} {}", style("Photos:").bold(), folder);
    }
    println!();
}

/// Print the outcome of a fix run
pub fn print_summary(format_updates: u64, missing_updates: u64, duration: Duration, log_path: &str) {
    println!();
    println!("{}", style("Fix Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Format fixing updates:").bold(),
        format_number(format_updates)
    );
    println!(
        "  {} {}",
        style("Missing file updates:").bold(),
        format_number(missing_updates)
    );
    println!(
        "  {} {}",
        style("Total updates:").bold(),
        format_number(format_updates + missing_updates)
    );
    println!(
        "  {} {:.1}s",
        style("Duration:").bold(),
        duration.as_secs_f64()
    );
    println!("  {} {}", style("Log:").bold(), log_path);
    println!();
}

/// Print per-column statistics
pub fn print_report(report: &StatsReport) {
    println!();
    println!("{}", style("FILE AND LINK STATUS REPORT").bold());
    println!("{}", style("─".repeat(80)).dim());

    for col in &report.columns {
        println!();
        println!(
            "{} {} ({})",
            style("Column:").bold(),
            style(&col.column).cyan().bold(),
            col.label
        );
        println!("  Total count:                  {}", format_number(col.total_count));
        println!("  Empty or NULL:                {}", format_number(col.empty_or_null_count));
        println!("  Missing slash & not empty:    {}", format_number(col.no_slash_count));
        println!("  .jpg count:                   {}", format_number(col.jpg_count));
        println!("  .jpeg count:                  {}", format_number(col.jpeg_count));
        println!("  Other extension count:        {}", format_number(col.other_extension_count));
        println!("  Missing extension count:      {}", format_number(col.missing_extension_count));
        println!("  Double extension count:       {}", format_number(col.double_extension_count));
        println!("  Wrong path (files/) count:    {}", format_number(col.wrong_path_count));
        println!("  'File Not Found' count:       {}", format_number(col.file_not_found_count));
        println!("  'Link Not Found' count:       {}", format_number(col.link_not_found_count));

        if !col.file_not_found_rows.is_empty() {
            println!("  {}", style("Rows with 'File Not Found':").yellow().bold());
            for row in &col.file_not_found_rows {
                println!("    {}", row);
            }
        }
        if !col.link_not_found_rows.is_empty() {
            println!("  {}", style("Rows with 'Link Not Found':").yellow().bold());
            for row in &col.link_not_found_rows {
                println!("    {}", row);
            }
        }
    }
    println!();
}
