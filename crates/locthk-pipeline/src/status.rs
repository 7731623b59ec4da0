//! Progress and status reporting.

/// Receives progress updates from a run.
pub trait StatusSink {
    /// Fraction of the run completed, in `0.0..=1.0`.
    fn progress(&mut self, fraction: f64);

    /// One-line status message.
    fn status(&mut self, message: &str);
}

impl<T: StatusSink + ?Sized> StatusSink for &mut T {
    fn progress(&mut self, fraction: f64) {
        (**self).progress(fraction);
    }

    fn status(&mut self, message: &str) {
        (**self).status(message);
    }
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl StatusSink for Silent {
    fn progress(&mut self, _fraction: f64) {}

    fn status(&mut self, _message: &str) {}
}

/// Forwards updates to `tracing` at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn progress(&mut self, fraction: f64) {
        tracing::info!(progress = fraction, "progress");
    }

    fn status(&mut self, message: &str) {
        tracing::info!("{message}");
    }
}
