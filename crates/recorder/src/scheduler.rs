//! Scan loop and per-channel capture tasks.
//!
//! Each cycle moves failed channels back to `Idle`, then claims every idle
//! channel with an `Idle -> Probing` compare-and-set and submits it to the
//! worker pool. A channel that is probing or recording is never claimed
//! again until its task has settled it. Between cycles the loop sleeps until
//! the anchor plus the idle interval; `stop` interrupts the sleep.

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use {
    streamsaver_config::{CycleAnchor, StreamSaverConfig},
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{
    capture::{LiveCapture, Outcome},
    events::{ChannelEvent, EventKind},
    pool::TaskHandle,
    service::{RecorderService, lock},
    types::{ChannelSnapshot, ChannelState, now_ms},
};

/// Lower bound on the spacing between cycle starts.
pub const MIN_CYCLE_GAP: Duration = Duration::from_secs(1);

/// Timing settings of the scan loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub idle_interval: Duration,
    pub anchor: CycleAnchor,
    /// Termination grace handed to cancelled captures.
    pub grace: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &StreamSaverConfig) -> Self {
        Self {
            idle_interval: config.idle_interval(),
            anchor: config.scanner.cycle_anchor,
            grace: config.termination_grace(),
        }
    }
}

/// Counters reported through `status()`.
#[derive(Debug, Clone, Default)]
pub(crate) struct CycleStats {
    pub completed: u64,
    pub last_started_at_ms: Option<u64>,
    pub next_scan_at_ms: Option<u64>,
}

/// A submitted capture task, keyed by channel id in the service.
pub(crate) struct ActiveRun {
    pub run_id: u64,
    pub handle: TaskHandle,
}

/// When the next cycle may start.
pub fn cycle_deadline(
    cycle_start: Instant,
    submission_end: Instant,
    anchor: CycleAnchor,
    interval: Duration,
) -> Instant {
    let from = match anchor {
        CycleAnchor::CycleStart => cycle_start,
        CycleAnchor::SubmissionEnd => submission_end,
    };
    from + interval.max(MIN_CYCLE_GAP)
}

impl RecorderService {
    pub(crate) async fn scan_loop(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval = ?self.settings.idle_interval,
            anchor = ?self.settings.anchor,
            "scan loop started"
        );
        loop {
            let started = Instant::now();
            let cycle = {
                let mut stats = lock(&self.cycle);
                stats.last_started_at_ms = Some(now_ms());
                stats.next_scan_at_ms = None;
                stats.completed + 1
            };
            self.events
                .emit(ChannelEvent::system(EventKind::ScanCycleStarted { cycle }));

            let submitted = self.scan_once();
            let submission_end = Instant::now();

            let deadline = cycle_deadline(
                started,
                submission_end,
                self.settings.anchor,
                self.settings.idle_interval,
            );
            {
                let mut stats = lock(&self.cycle);
                stats.completed = cycle;
                let wait = deadline.saturating_duration_since(Instant::now());
                stats.next_scan_at_ms = Some(now_ms() + wait.as_millis() as u64);
            }
            self.events.emit(ChannelEvent::system(EventKind::ScanCycleFinished {
                cycle,
                submitted,
            }));

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep_until(deadline) => {},
            }
        }
        lock(&self.cycle).next_scan_at_ms = None;
        info!("scan loop stopped");
    }

    /// Run the submission pass of one cycle. Returns how many channels were
    /// submitted to the pool.
    pub fn scan_once(self: &Arc<Self>) -> usize {
        for id in self.state.ids_in_state(ChannelState::Error) {
            if let Err(e) = self
                .state
                .transition(&id, ChannelState::Error, ChannelState::Idle)
            {
                debug!(channel = %id, error = %e, "retry skipped");
            }
        }

        let mut submitted = 0;
        for id in self.state.ids_in_state(ChannelState::Idle) {
            // Claim and registration happen under the active lock so that a
            // concurrent removal sees either nothing or the registered task.
            let mut active = lock(&self.active);
            let channel = match self
                .state
                .transition(&id, ChannelState::Idle, ChannelState::Probing)
            {
                Ok(channel) => channel,
                Err(e) => {
                    debug!(channel = %id, error = %e, "channel skipped");
                    continue;
                },
            };

            let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
            let svc = Arc::clone(self);
            let snapshot = channel.snapshot();
            let handle = self.pool.submit(id.clone(), move |cancel| async move {
                svc.run_capture(run_id, snapshot, cancel).await;
            });
            active.insert(id, ActiveRun { run_id, handle });
            submitted += 1;
        }
        submitted
    }

    async fn run_capture(
        self: Arc<Self>,
        run_id: u64,
        channel: ChannelSnapshot,
        cancel: CancellationToken,
    ) {
        let id = channel.id.clone();
        let mut recording = false;
        let outcome = self
            .adapter
            .run(&channel, cancel, |live| {
                recording = self.begin_recording(&id, live);
                recording
            })
            .await;
        self.settle(&id, outcome, recording);

        let mut active = lock(&self.active);
        if active.get(&id).is_some_and(|run| run.run_id == run_id) {
            active.remove(&id);
        }
    }

    /// `Probing -> Recording` right before the pipeline starts. Returns
    /// `false` when the channel was removed or reset in the meantime.
    fn begin_recording(&self, id: &str, live: &LiveCapture) -> bool {
        let mut was_live = None;
        let moved = self.state.transition_with(
            id,
            ChannelState::Probing,
            ChannelState::Recording,
            |ch| {
                was_live = ch.last_live;
                ch.last_live = Some(true);
                ch.last_error = None;
                ch.scheduled_start = None;
            },
        );
        if let Err(e) = moved {
            debug!(channel = %id, error = %e, "recording not started");
            return false;
        }

        if was_live != Some(true) {
            let event = ChannelEvent::channel(id, EventKind::ChannelLive);
            self.events.emit(match &live.title {
                Some(title) => event.with_detail(title.clone()),
                None => event,
            });
        }
        self.events.emit(
            ChannelEvent::channel(id, EventKind::RecordingStarted)
                .with_detail(live.path.display().to_string()),
        );
        true
    }

    /// Apply a finished capture to the channel's state.
    fn settle(&self, id: &str, outcome: Outcome, recording: bool) {
        let from = if recording {
            ChannelState::Recording
        } else {
            ChannelState::Probing
        };

        let settled = match outcome {
            Outcome::NotLive { scheduled } => {
                let mut was_live = None;
                let mut announced = None;
                let res = self
                    .state
                    .transition_with(id, from, ChannelState::Idle, |ch| {
                        was_live = ch.last_live;
                        announced = ch.scheduled_start.take();
                        ch.last_live = Some(false);
                        ch.last_error = None;
                        ch.scheduled_start = scheduled.clone();
                    });
                if res.is_ok() {
                    if was_live != Some(false) {
                        self.events
                            .emit(ChannelEvent::channel(id, EventKind::ChannelOffline));
                    }
                    if let Some(starts) = scheduled
                        && announced.as_deref() != Some(starts.as_str())
                    {
                        self.events.emit(
                            ChannelEvent::channel(id, EventKind::StreamScheduled)
                                .with_detail(starts),
                        );
                    }
                }
                res
            },
            Outcome::Recorded { path, duration } => {
                let detail = format!("{} ({}s)", path.display(), duration.as_secs());
                let res = self
                    .state
                    .transition_with(id, from, ChannelState::Idle, |ch| {
                        ch.last_recording = Some(path);
                    });
                if res.is_ok() {
                    self.events.emit(
                        ChannelEvent::channel(id, EventKind::RecordingFinished)
                            .with_detail(detail),
                    );
                }
                res
            },
            Outcome::Failed(err) => {
                let message = err.to_string();
                let res = self.state.fail(id, from, message.clone());
                if res.is_ok() {
                    let kind = if recording {
                        EventKind::RecordingFailed
                    } else {
                        EventKind::ProbeFailed
                    };
                    self.events
                        .emit(ChannelEvent::channel(id, kind).with_detail(message));
                }
                res
            },
            Outcome::Cancelled => {
                let res = self.state.transition(id, from, ChannelState::Idle);
                if res.is_ok() && recording {
                    self.events
                        .emit(ChannelEvent::channel(id, EventKind::RecordingCancelled));
                }
                res
            },
        };

        if let Err(e) = settled {
            debug!(channel = %id, error = %e, "capture result dropped");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(CycleAnchor::CycleStart, 300, 300)]
    #[case(CycleAnchor::SubmissionEnd, 300, 305)]
    #[case(CycleAnchor::CycleStart, 0, 1)]
    #[case(CycleAnchor::SubmissionEnd, 0, 6)]
    fn deadline_follows_anchor(
        #[case] anchor: CycleAnchor,
        #[case] interval_secs: u64,
        #[case] expected_secs: u64,
    ) {
        let start = Instant::now();
        let end = start + Duration::from_secs(5);
        let deadline = cycle_deadline(start, end, anchor, Duration::from_secs(interval_secs));
        assert_eq!(deadline - start, Duration::from_secs(expected_secs));
    }

    #[test]
    fn tiny_interval_is_floored() {
        let start = Instant::now();
        let deadline = cycle_deadline(start, start, CycleAnchor::CycleStart, Duration::from_millis(1));
        assert_eq!(deadline - start, MIN_CYCLE_GAP);
    }

    #[test]
    fn settings_follow_config() {
        let mut config = StreamSaverConfig::default();
        config.scanner.idle_interval_minutes = 0.5;
        config.scanner.cycle_anchor = CycleAnchor::SubmissionEnd;
        config.recorder.termination_grace_secs = 3;
        let settings = SchedulerSettings::from_config(&config);
        assert_eq!(settings.idle_interval, Duration::from_secs(30));
        assert_eq!(settings.anchor, CycleAnchor::SubmissionEnd);
        assert_eq!(settings.grace, Duration::from_secs(3));
    }
}
