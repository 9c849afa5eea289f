//! Janitor
//!
//! Periodic idle-flow eviction. The only caller of [`FlowTable::sweep`].
//!
//! Live capture sweeps on a wall-clock interval. Replay sweeps whenever the
//! capture timeline crosses the next interval boundary: the ingest task
//! holds a [`CaptureTicks`] and waits for the janitor's sweep before it
//! applies the packet that crossed it.

use crate::table::FlowTable;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Source of "now" for idle decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SweepClock {
    /// Wall-clock time (live capture)
    #[default]
    Wall,
    /// Latest capture timestamp ingested (file replay)
    Capture,
}

/// Sweep at capture time `now`, answered with the number of evicted flows
#[derive(Debug)]
struct SweepRequest {
    now: DateTime<Utc>,
    done: oneshot::Sender<usize>,
}

/// Capture-time tick source, driven by the ingest task
#[derive(Debug)]
pub struct CaptureTicks {
    interval: chrono::Duration,
    next: Option<DateTime<Utc>>,
    requests: mpsc::Sender<SweepRequest>,
}

impl CaptureTicks {
    /// Call before applying a packet captured at `timestamp`
    ///
    /// When `timestamp` reaches the next boundary, asks the janitor to sweep
    /// at `timestamp` and waits for it. Returns the number of evicted flows,
    /// or `None` when no sweep was due or the janitor has stopped.
    pub async fn advance(&mut self, timestamp: DateTime<Utc>) -> Option<usize> {
        let interval = self.interval;
        let after = |ts: DateTime<Utc>| ts.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let Some(next) = self.next else {
            // First packet starts the capture timeline
            self.next = Some(after(timestamp));
            return None;
        };
        if timestamp < next {
            return None;
        }
        self.next = Some(after(timestamp));

        let (done, evicted) = oneshot::channel();
        self.requests
            .send(SweepRequest { now: timestamp, done })
            .await
            .ok()?;
        evicted.await.ok()
    }
}

/// Periodic sweep task
pub struct Janitor {
    table: Arc<FlowTable>,
    interval: Duration,
    clock: SweepClock,
    requests: Option<mpsc::Receiver<SweepRequest>>,
}

impl Janitor {
    /// Create janitor for `table`
    pub fn new(table: Arc<FlowTable>, interval: Duration, clock: SweepClock) -> Self {
        Self {
            table,
            interval,
            clock,
            requests: None,
        }
    }

    /// Sweep on capture-time boundaries reported through the returned
    /// [`CaptureTicks`] instead of on wall-clock ticks
    pub fn capture_driven(&mut self) -> CaptureTicks {
        let (tx, rx) = mpsc::channel(1);
        self.requests = Some(rx);
        CaptureTicks {
            interval: chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::MAX),
            next: None,
            requests: tx,
        }
    }

    /// Run on the current runtime until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(cancel))
    }

    /// Sweep every interval until cancelled; returns the number of sweeps
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        tracing::info!(interval_secs = self.interval.as_secs_f64(), clock = ?self.clock, "Starting janitor");

        if let Some(requests) = self.requests.take() {
            return self.run_capture_driven(requests, cancel).await;
        }

        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sweeps = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if self.tick().is_some() {
                        sweeps += 1;
                    }
                }
            }
        }

        tracing::info!(sweeps, "Janitor stopped");
        sweeps
    }

    async fn run_capture_driven(self, mut requests: mpsc::Receiver<SweepRequest>, cancel: CancellationToken) -> u64 {
        let mut sweeps = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let evicted = self.table.sweep(request.now);
                    sweeps += 1;
                    tracing::debug!(evicted, resident = self.table.len(), now = %request.now, "janitor capture tick");
                    let _ = request.done.send(evicted);
                }
            }
        }

        tracing::info!(sweeps, "Janitor stopped");
        sweeps
    }

    /// One sweep at the clock's current time
    ///
    /// Returns the number of evicted flows, or `None` when the capture
    /// clock has not started yet.
    pub fn tick(&self) -> Option<usize> {
        let now = self.now()?;
        let evicted = self.table.sweep(now);
        tracing::debug!(evicted, resident = self.table.len(), "janitor tick");
        Some(evicted)
    }

    fn now(&self) -> Option<DateTime<Utc>> {
        match self.clock {
            SweepClock::Wall => Some(Utc::now()),
            SweepClock::Capture => self.table.capture_clock(),
        }
    }
}
