use crate::job::TrainingJobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Remaining training time, or `N/A` before the first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eta {
    NotAvailable,
    Remaining(u64),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => f.write_str("N/A"),
            Self::Remaining(secs) => {
                write!(f, "{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
            }
        }
    }
}

/// `remaining = trunc(elapsed / step * (total - step))`, clamped at zero.
#[must_use]
pub fn calculate_eta(step: u64, total_steps: u64, elapsed: Duration) -> Eta {
    if step == 0 {
        return Eta::NotAvailable;
    }
    let per_step = elapsed.as_secs_f64() / step as f64;
    let remaining_steps = total_steps.saturating_sub(step);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let remaining = (per_step * remaining_steps as f64) as u64;
    Eta::Remaining(remaining)
}

/// Optimizer steps per wall-clock second, reported under the `samples/sec` label.
#[must_use]
pub fn samples_per_second(step: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { step as f64 / secs } else { 0.0 }
}

/// Point-in-time training snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgressEvent {
    pub epoch: f64,
    pub total_epochs: u32,
    pub step: u64,
    pub total_steps: u64,
    pub loss: f64,
    pub samples_per_second: f64,
    pub eta: Eta,
}

impl fmt::Display for TrainingProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let epoch = self.epoch.max(0.0).trunc() as u64;
        write!(
            f,
            "Epoch {epoch}/{}, Step {}/{}, Loss: {:.4}, Speed: {:.2} samples/sec, ETA: {}",
            self.total_epochs, self.step, self.total_steps, self.loss, self.samples_per_second, self.eta
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: TrainingJobId },
    Message { job_id: TrainingJobId, message: String },
    Step { job_id: TrainingJobId, progress: TrainingProgressEvent },
    Finished { job_id: TrainingJobId },
}

impl ProgressEvent {
    /// The line printed for this event, without the timestamp prefix.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Started { job_id } => format!("Training job {job_id} started"),
            Self::Message { message, .. } => message.clone(),
            Self::Step { progress, .. } => progress.to_string(),
            Self::Finished { job_id } => format!("Training job {job_id} finished"),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Prefix a message with the local `YYYY-MM-DD HH:MM:SS - ` timestamp.
#[must_use]
pub fn format_log_line(message: &str) -> String {
    format!("{} - {message}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
}

/// Prints every event as a timestamped line on stdout.
#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", format_log_line(&event.render()));
        let _ = stdout.flush();
    }
}

/// Writes timestamped lines to any writer, e.g. a job log file.
pub struct LogLineSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LogLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> ProgressSink for LogLineSink<W> {
    fn on_event(&self, event: ProgressEvent) {
        let mut writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _ = writeln!(writer, "{}", format_log_line(&event.render()));
        let _ = writer.flush();
    }
}
