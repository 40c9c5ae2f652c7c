//! Debounced input reporting.
//!
//! Frontends produce input samples far faster than the server wants them.
//! A [`Reporter`] merges samples into one queued [`Report`] and sends it at
//! most once per interval:
//!
//! - press/release and click counters are summed
//! - coordinates are averaged with the queued value, two points at a time
//!   (so repeated merges drift toward the latest sample)
//! - samples for a new id are appended as they are

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{error, trace, warn};

use crate::error::ensure;
use crate::network::Connector;
use crate::protocol::frontend::{
    FrontendPacket, JoystickSample, Report, ScreenSample, TactileSample,
};

/// Where flushed reports go.
pub trait ReportSink: Send + Sync + 'static {
    fn send_report(&self, report: Report);
}

impl ReportSink for Connector<FrontendPacket> {
    fn send_report(&self, report: Report) {
        if let Err(e) = self.send(FrontendPacket::Report(report)) {
            warn!(remote = %self.remote(), error = %e, "report dropped");
        }
    }
}

// ── Merging ──────────────────────────────────────────────────────

/// A sample that can be folded into a queued sample with the same id.
trait Sample {
    fn id(&self) -> u32;
    fn absorb(&mut self, newer: Self);
}

impl Sample for TactileSample {
    fn id(&self) -> u32 {
        self.id
    }

    fn absorb(&mut self, newer: Self) {
        self.down = self.down.saturating_add(newer.down);
        self.up = self.up.saturating_add(newer.up);
    }
}

impl Sample for JoystickSample {
    fn id(&self) -> u32 {
        self.id
    }

    fn absorb(&mut self, newer: Self) {
        self.x = (self.x + newer.x) / 2.0;
        self.y = (self.y + newer.y) / 2.0;
    }
}

impl Sample for ScreenSample {
    fn id(&self) -> u32 {
        self.id
    }

    fn absorb(&mut self, newer: Self) {
        self.x = (self.x + newer.x) / 2.0;
        self.y = (self.y + newer.y) / 2.0;
        self.clicks = self.clicks.saturating_add(newer.clicks);
    }
}

fn merge_samples<T: Sample>(queued: &mut Vec<T>, incoming: Vec<T>) {
    for sample in incoming {
        match queued.iter_mut().find(|q| q.id() == sample.id()) {
            Some(existing) => existing.absorb(sample),
            None => queued.push(sample),
        }
    }
}

/// Folds `sample` into `queued`, category by category.
pub fn merge(queued: &mut Report, sample: Report) {
    merge_samples(&mut queued.joystick, sample.joystick);
    merge_samples(&mut queued.tactile, sample.tactile);
    merge_samples(&mut queued.screen, sample.screen);
}

// ── Reporter ─────────────────────────────────────────────────────

struct ReporterState {
    queued: Report,
    callbacks: Vec<oneshot::Sender<()>>,
    /// `None` until the first flush.
    last_flush: Option<Instant>,
    scheduled: bool,
}

/// Merges samples and flushes them through a [`ReportSink`] at a bounded
/// rate. At most one flush is scheduled at a time; once scheduled it always
/// runs.
pub struct Reporter<S> {
    sink: Arc<S>,
    state: Arc<Mutex<ReporterState>>,
    interval: Duration,
}

impl<S> Clone for Reporter<S> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
            interval: self.interval,
        }
    }
}

impl<S: ReportSink> Reporter<S> {
    /// The first report goes out as soon as it is queued; later ones at
    /// most once per `interval`.
    pub fn new(sink: S, interval: Duration) -> Self {
        Self {
            sink: Arc::new(sink),
            state: Arc::new(Mutex::new(ReporterState {
                queued: Report::default(),
                callbacks: Vec::new(),
                last_flush: None,
                scheduled: false,
            })),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Queues `sample`. The returned receiver completes once the report
    /// containing it has been handed to the sink.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add(&self, sample: Report) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        merge(&mut state.queued, sample);
        state.callbacks.push(tx);

        if !state.scheduled {
            state.scheduled = true;
            let delay = match state.last_flush {
                Some(last) => (last + self.interval).saturating_duration_since(Instant::now()),
                None => Duration::ZERO,
            };
            trace!(?delay, "report flush scheduled");

            let reporter = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                reporter.flush();
            });
        }
        rx
    }

    /// A copy of the aggregate waiting for the next flush.
    pub fn queued(&self) -> Report {
        self.lock().queued.clone()
    }

    fn flush(&self) {
        let (report, callbacks) = {
            let mut state = self.lock();
            if let Err(e) = ensure(state.scheduled, "report flushed without a schedule") {
                error!(error = %e, "reporter state corrupted");
            }
            state.scheduled = false;
            state.last_flush = Some(Instant::now());
            (
                mem::take(&mut state.queued),
                mem::take(&mut state.callbacks),
            )
        };

        self.sink.send_report(report);
        for callback in callbacks {
            let _ = callback.send(());
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
