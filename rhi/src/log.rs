//! `LogSink` boundary: every internal call site logs through this trait
//! rather than calling the `log` crate directly, so an embedding
//! application can redirect diagnostics (telemetry, crash reporting)
//! without patching the RHI core. `DefaultLogSink` is what every
//! `Device` uses unless constructed with an override.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Info,
    Debug,
    PerformanceWarning,
    Warning,
    Critical,
}

pub trait LogSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// Forwards to the `log` crate. `PerformanceWarning` and `Critical` have no
/// native `log::Level` counterpart; they fold onto `Warn` and `Error`.
#[derive(Debug, Default)]
pub struct DefaultLogSink;

impl LogSink for DefaultLogSink {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Trace => log::trace!("{message}"),
            Severity::Info => log::info!("{message}"),
            Severity::Debug => log::debug!("{message}"),
            Severity::PerformanceWarning | Severity::Warning => log::warn!("{message}"),
            Severity::Critical => log::error!("{message}"),
        }
    }
}
