// File: chaos-monkey/src/report.rs
//
// Tick Reporting
//
// Every tick ends in exactly one report: the action result once the post-phase
// passed, or the error that aborted the tick. A scheduled tick whose run was
// stopped before its action was bound is dropped instead. Sinks decide what to
// do with reports, a sink that panics only loses the report it was given.

use crate::error::MonkeyError;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Outcome of one tick
#[derive(Debug)]
pub struct TickReport<T> {
    /// Tick number, starting at 1 for the first tick of the scheduler
    pub tick: u64,
    /// Behaviour selected for this tick, `None` if selection itself failed
    pub behaviour: Option<String>,
    /// Action result or the failure that ended the tick
    pub outcome: Result<T, MonkeyError>,
}

impl<T> TickReport<T> {
    /// Whether the tick completed its post-phase
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Failure of the tick, if any
    pub fn error(&self) -> Option<&MonkeyError> {
        self.outcome.as_ref().err()
    }
}

/// Destination of tick reports
pub trait ReportSink<T>: Send + Sync {
    /// Receive the report of a finished tick
    fn report(&self, report: TickReport<T>);
}

impl<T, S> ReportSink<T> for Arc<S>
where
    S: ReportSink<T> + ?Sized,
{
    fn report(&self, report: TickReport<T>) {
        (**self).report(report)
    }
}

/// Logs failures at error level and successes at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl<T> ReportSink<T> for LogSink {
    fn report(&self, report: TickReport<T>) {
        let behaviour = report.behaviour.as_deref().unwrap_or("<none>");
        match &report.outcome {
            Ok(_) => {
                if log::log_enabled!(log::Level::Debug) {
                    debug!("Tick #{} '{}' completed", report.tick, behaviour);
                }
            }
            Err(e) => {
                if log::log_enabled!(log::Level::Error) {
                    error!("Tick #{} '{}' failed: {}", report.tick, behaviour, e);
                }
            }
        }
    }
}

/// Forwards reports into an unbounded channel
pub struct ChannelSink<T> {
    sender: UnboundedSender<TickReport<T>>,
}

impl<T> ChannelSink<T> {
    /// Sink plus the receiving end of its channel
    pub fn channel() -> (Self, UnboundedReceiver<TickReport<T>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<T: Send> ReportSink<T> for ChannelSink<T> {
    fn report(&self, report: TickReport<T>) {
        // Receiver gone means nobody listens anymore, drop silently
        let _ = self.sender.send(report);
    }
}
