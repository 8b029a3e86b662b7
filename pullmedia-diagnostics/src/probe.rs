//! Pass-through source that audits what flows through it
//!
//! [`ProbedSource`] forwards every call to the wrapped source and records
//! traffic counters plus timestamp ordering: after the first buffer, times
//! must strictly increase, except for the first buffer after a seek, which
//! may go backwards but never below zero.

use parking_lot::Mutex;
use pullmedia_core::{MediaResult, MediaSource, MetaData, ReadOptions, ReadOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Counters collected by a [`ProbedSource`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Buffers returned by `read`
    pub buffers: u64,
    /// Payload bytes returned by `read`
    pub bytes: u64,
    /// `FormatChanged` results
    pub format_changes: u64,
    /// Seek requests passed through
    pub seeks: u64,
    /// Buffers whose time did not increase
    pub ordering_violations: u64,
    /// Buffers with a negative time
    pub negative_timestamps: u64,
    /// Failed reads
    pub errors: u64,
    /// Time of the first buffer
    pub first_time_us: Option<i64>,
    /// Time of the most recent buffer
    pub last_time_us: Option<i64>,
    /// Whether end of stream was reached
    pub end_of_stream: bool,
}

impl ProbeReport {
    /// Whether every timestamp obeyed the ordering rules
    pub fn is_well_ordered(&self) -> bool {
        self.ordering_violations == 0 && self.negative_timestamps == 0
    }

    /// Report as pretty JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    report: ProbeReport,
    after_seek: bool,
}

/// Read-only view of a probe's counters, usable after the source moved away
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    state: Arc<Mutex<ProbeState>>,
}

impl ProbeHandle {
    /// Snapshot of the counters
    pub fn report(&self) -> ProbeReport {
        self.state.lock().report.clone()
    }
}

/// Media source wrapper recording traffic and timestamp ordering
pub struct ProbedSource<S: MediaSource> {
    inner: S,
    name: String,
    state: Arc<Mutex<ProbeState>>,
}

impl<S: MediaSource> ProbedSource<S> {
    /// Wrap `inner`; `name` labels ordering warnings
    pub fn new(inner: S, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
            state: Arc::new(Mutex::new(ProbeState::default())),
        }
    }

    /// Handle to the counters
    pub fn handle(&self) -> ProbeHandle {
        ProbeHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Snapshot of the counters
    pub fn report(&self) -> ProbeReport {
        self.state.lock().report.clone()
    }

    /// Unwrap the source
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn record(&self, outcome: &MediaResult<ReadOutcome>) {
        let mut state = self.state.lock();
        let ProbeState { report, after_seek } = &mut *state;
        match outcome {
            Ok(ReadOutcome::Buffer(buffer)) => {
                report.buffers += 1;
                report.bytes += buffer.data().len() as u64;
                let Some(time_us) = buffer.time_us() else {
                    return;
                };
                if time_us < 0 {
                    report.negative_timestamps += 1;
                    warn!(source = %self.name, time_us, "negative timestamp");
                }
                if let Some(last) = report.last_time_us {
                    if !*after_seek && time_us <= last {
                        report.ordering_violations += 1;
                        warn!(
                            source = %self.name,
                            time_us,
                            last_us = last,
                            "timestamp went backwards"
                        );
                    }
                }
                report.first_time_us.get_or_insert(time_us);
                report.last_time_us = Some(time_us);
                *after_seek = false;
            }
            Ok(ReadOutcome::FormatChanged) => report.format_changes += 1,
            Ok(ReadOutcome::EndOfStream) => report.end_of_stream = true,
            Err(_) => report.errors += 1,
        }
    }
}

impl<S: MediaSource> MediaSource for ProbedSource<S> {
    fn start(&mut self, params: Option<&MetaData>) -> MediaResult<()> {
        self.inner.start(params)?;
        *self.state.lock() = ProbeState::default();
        Ok(())
    }

    fn stop(&mut self) -> MediaResult<()> {
        self.inner.stop()
    }

    fn format(&self) -> Arc<MetaData> {
        self.inner.format()
    }

    fn read(&mut self, options: &ReadOptions) -> MediaResult<ReadOutcome> {
        if options.seek().is_some() {
            let mut state = self.state.lock();
            state.report.seeks += 1;
            state.after_seek = true;
        }
        let outcome = self.inner.read(options);
        self.record(&outcome);
        outcome
    }
}
