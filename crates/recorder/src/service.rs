//! Orchestrator facade.
//!
//! [`RecorderService`] owns the channel registry, the worker pool and the
//! scan loop. Front ends add, remove and configure channels through it, query
//! state and subscribe to events.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, atomic::AtomicU64},
    time::Duration,
};

use {
    streamsaver_config::{ChannelConfig, StreamSaverConfig},
    tokio::{sync::broadcast, task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    capture::{CaptureAdapter, CaptureBackend, CaptureSettings, ProcessBackend},
    events::{ChannelEvent, EventBus, EventKind},
    pool::WorkerPool,
    scheduler::{ActiveRun, CycleStats, SchedulerSettings},
    state::ChannelStateStore,
    store::ChannelStore,
    types::{Channel, ChannelPatch, ChannelState, RecorderStatus, StoredChannel},
};

/// Extra time on top of the termination grace before a cancelled task is
/// aborted.
const STOP_MARGIN: Duration = Duration::from_secs(5);

pub struct RecorderService {
    pub(crate) state: ChannelStateStore,
    pub(crate) events: Arc<EventBus>,
    pub(crate) pool: WorkerPool,
    pub(crate) adapter: CaptureAdapter,
    pub(crate) settings: SchedulerSettings,
    pub(crate) active: Mutex<HashMap<String, ActiveRun>>,
    pub(crate) next_run: AtomicU64,
    pub(crate) cycle: Mutex<CycleStats>,
    store: Arc<dyn ChannelStore>,
    loaded: tokio::sync::Mutex<bool>,
    shutdown: Mutex<Option<CancellationToken>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecorderService {
    pub fn new(
        config: &StreamSaverConfig,
        store: Arc<dyn ChannelStore>,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Arc<Self>> {
        let minutes = config.scanner.idle_interval_minutes;
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(Error::invalid_config(format!(
                "idle interval must be a non-negative number of minutes, got {minutes}"
            )));
        }
        let pool = WorkerPool::new(config.recorder.max_concurrent_downloads)?;
        let events = Arc::new(EventBus::new());

        Ok(Arc::new(Self {
            state: ChannelStateStore::new(Arc::clone(&events)),
            events,
            pool,
            adapter: CaptureAdapter::new(backend, CaptureSettings::from_config(config)),
            settings: SchedulerSettings::from_config(config),
            active: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(1),
            cycle: Mutex::new(CycleStats::default()),
            store,
            loaded: tokio::sync::Mutex::new(false),
            shutdown: Mutex::new(None),
            loop_handle: Mutex::new(None),
        }))
    }

    /// Service driving the external stream tool and ffmpeg.
    pub fn with_process_backend(
        config: &StreamSaverConfig,
        store: Arc<dyn ChannelStore>,
    ) -> Result<Arc<Self>> {
        let backend = Arc::new(ProcessBackend::from_config(config));
        Self::new(config, store, backend)
    }

    /// Restore persisted channels. Runs once; later calls return `0`.
    pub async fn load(&self) -> Result<usize> {
        let mut loaded = self.loaded.lock().await;
        if *loaded {
            return Ok(0);
        }
        let stored = self.store.load_channels().await?;
        let mut count = 0;
        for channel in stored {
            let id = channel.config.id.clone();
            match self.state.insert(Channel::from(channel)) {
                Ok(_) => count += 1,
                Err(e) => warn!(channel = %id, error = %e, "skipping stored channel"),
            }
        }
        *loaded = true;
        info!(count, "loaded channels");
        Ok(count)
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.load().await?;
        let token = {
            let mut shutdown = lock(&self.shutdown);
            if shutdown.is_some() {
                debug!("recorder already running");
                return Ok(());
            }
            let token = CancellationToken::new();
            *shutdown = Some(token.clone());
            token
        };

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.scan_loop(token).await;
        });
        *lock(&self.loop_handle) = Some(handle);

        info!(
            channels = self.state.len(),
            max_concurrent = self.pool.capacity(),
            "recorder started"
        );
        Ok(())
    }

    /// Stop the scan loop, cancel in-flight captures and wait for them to
    /// wind down. Channels end up `Idle`.
    pub async fn stop(&self) {
        let token = lock(&self.shutdown).take();
        if let Some(token) = token {
            token.cancel();
        }

        let handle = lock(&self.loop_handle).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "scan loop ended abnormally");
        }

        let runs: Vec<ActiveRun> = lock(&self.active).drain().map(|(_, run)| run).collect();
        for run in &runs {
            self.pool.cancel(&run.handle);
        }
        let deadline = Instant::now() + self.stop_limit();
        for run in runs {
            let left = deadline.saturating_duration_since(Instant::now());
            run.handle.join_timeout(left).await;
        }

        for state in [ChannelState::Probing, ChannelState::Recording] {
            for id in self.state.ids_in_state(state) {
                if let Err(e) = self.state.transition(&id, state, ChannelState::Idle) {
                    debug!(channel = %id, error = %e, "reset skipped");
                }
            }
        }
        info!("recorder stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shutdown).is_some()
    }

    // ── Channels ────────────────────────────────────────────────────────────

    pub async fn add_channel(&self, config: ChannelConfig) -> Result<Channel> {
        self.load().await?;
        let channel = self.state.add(config)?;
        if let Err(e) = self.store.save_channel(&StoredChannel::from(&channel)).await {
            // A scan may have claimed the channel while the write was pending.
            let run = {
                let mut active = lock(&self.active);
                let _ = self.state.remove(channel.id());
                active.remove(channel.id())
            };
            if let Some(run) = run {
                self.pool.cancel(&run.handle);
                run.handle.join_timeout(self.stop_limit()).await;
            }
            return Err(e);
        }
        self.events.emit(
            ChannelEvent::channel(channel.id(), EventKind::ChannelAdded)
                .with_detail(channel.display_name()),
        );
        Ok(channel)
    }

    /// Remove a channel in any state. An in-flight capture is cancelled and
    /// awaited before the record is deleted from persistence.
    pub async fn remove_channel(&self, id: &str) -> Result<Channel> {
        self.load().await?;
        let (removed, run) = {
            let mut active = lock(&self.active);
            let removed = self.state.remove(id)?;
            (removed, active.remove(id))
        };

        if let Some(run) = run {
            self.pool.cancel(&run.handle);
            run.handle.join_timeout(self.stop_limit()).await;
        }

        match self.store.delete_channel(id).await {
            Ok(()) | Err(Error::NotFound { .. }) => {},
            Err(e) => return Err(e),
        }
        self.events
            .emit(ChannelEvent::channel(id, EventKind::ChannelRemoved));
        Ok(removed)
    }

    /// Stop the channel's recording and keep tracking it. The capture settles
    /// as cancelled and the channel returns to `Idle`, so a stream that is
    /// still live is picked up again by the next cycle.
    pub async fn stop_recording(&self, id: &str) -> Result<Channel> {
        let run = {
            let mut active = lock(&self.active);
            let channel = self.state.get(id)?;
            if channel.state != ChannelState::Recording {
                return Err(Error::not_recording(id, channel.state));
            }
            active.remove(id)
        };

        if let Some(run) = run {
            info!(channel = %id, task = run.handle.id, "stopping recording");
            self.pool.cancel(&run.handle);
            // An aborted task never settles its channel.
            if run.handle.join_timeout(self.stop_limit()).await.is_none()
                && let Err(e) = self
                    .state
                    .transition(id, ChannelState::Recording, ChannelState::Idle)
            {
                debug!(channel = %id, error = %e, "reset skipped");
            }
        }
        self.state.get(id)
    }

    /// Change alias or quality. Rejected with [`Error::ChannelBusy`] while the
    /// channel is probing or recording.
    pub async fn update_channel(&self, id: &str, patch: ChannelPatch) -> Result<Channel> {
        self.load().await?;
        if patch.is_empty() {
            return self.state.get(id);
        }
        let channel = self.state.update_config(id, &patch)?;
        let stored = StoredChannel::from(&channel);
        match self.store.update_channel(&stored).await {
            Err(Error::NotFound { .. }) => self.store.save_channel(&stored).await?,
            other => other?,
        }
        self.events.emit(
            ChannelEvent::channel(id, EventKind::ChannelUpdated).with_detail(describe(&patch)),
        );
        Ok(channel)
    }

    pub fn list_channels(&self) -> Vec<Channel> {
        self.state.list()
    }

    pub fn get_channel(&self, id: &str) -> Result<Channel> {
        self.state.get(id)
    }

    // ── Status & events ─────────────────────────────────────────────────────

    pub fn status(&self) -> RecorderStatus {
        let channels = self.state.list();
        let count = |s: ChannelState| channels.iter().filter(|c| c.state == s).count();
        let cycle = lock(&self.cycle).clone();
        RecorderStatus {
            running: self.is_running(),
            channel_count: channels.len(),
            recording_count: count(ChannelState::Recording),
            error_count: count(ChannelState::Error),
            pool_capacity: self.pool.capacity(),
            pool_running: self.pool.running(),
            pool_queued: self.pool.queued(),
            cycles_completed: cycle.completed,
            last_cycle_started_at_ms: cycle.last_started_at_ms,
            next_scan_at_ms: cycle.next_scan_at_ms,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn recent_events(&self, limit: usize) -> Vec<ChannelEvent> {
        self.events.recent(limit)
    }

    /// Resize the worker pool. Applies to future grants only.
    pub fn set_max_concurrent_downloads(&self, max: usize) -> Result<()> {
        self.pool.set_capacity(max)?;
        info!(max, "max concurrent downloads changed");
        Ok(())
    }

    fn stop_limit(&self) -> Duration {
        self.settings.grace + STOP_MARGIN
    }
}

fn describe(patch: &ChannelPatch) -> String {
    let mut parts = Vec::new();
    match &patch.alias {
        Some(Some(alias)) => parts.push(format!("alias={alias}")),
        Some(None) => parts.push("alias cleared".to_string()),
        None => {},
    }
    if let Some(quality) = patch.quality {
        parts.push(format!("quality={quality}"));
    }
    parts.join(", ")
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            capture::{ProbeReport, tests::ScriptedBackend},
            store_memory::InMemoryStore,
        },
        std::path::Path,
        streamsaver_config::Quality,
    };

    struct Harness {
        svc: Arc<RecorderService>,
        backend: Arc<ScriptedBackend>,
        store: Arc<InMemoryStore>,
        _tmp: tempfile::TempDir,
    }

    fn harness(backend: ScriptedBackend, max: usize) -> Harness {
        harness_with(backend, |cfg| cfg.recorder.max_concurrent_downloads = max)
    }

    fn harness_with(
        backend: ScriptedBackend,
        tweak: impl FnOnce(&mut StreamSaverConfig),
    ) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = StreamSaverConfig::default();
        config.recorder.records_dir = tmp.path().to_path_buf();
        config.recorder.termination_grace_secs = 1;
        config.scanner.probe_timeout_secs = 2;
        tweak(&mut config);

        let backend = Arc::new(backend);
        let store = Arc::new(InMemoryStore::new());
        let svc = RecorderService::new(
            &config,
            Arc::clone(&store) as Arc<dyn ChannelStore>,
            Arc::clone(&backend) as Arc<dyn CaptureBackend>,
        )
        .unwrap();
        Harness {
            svc,
            backend,
            store,
            _tmp: tmp,
        }
    }

    async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn state_of(svc: &RecorderService, id: &str) -> ChannelState {
        svc.get_channel(id).unwrap().state
    }

    fn count_events(svc: &RecorderService, kind: &EventKind) -> usize {
        svc.recent_events(usize::MAX)
            .iter()
            .filter(|e| &e.kind == kind)
            .count()
    }

    fn files_under(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|rd| {
                rd.flatten()
                    .map(|e| {
                        if e.path().is_dir() {
                            files_under(&e.path())
                        } else {
                            1
                        }
                    })
                    .sum()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn add_list_and_persist() {
        let h = harness(ScriptedBackend::with_report(ProbeReport::offline()), 2);
        h.svc.add_channel(ChannelConfig::new("b")).await.unwrap();
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        let err = h.svc.add_channel(ChannelConfig::new("a")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateChannel { .. }));

        let ids: Vec<String> = h
            .svc
            .list_channels()
            .into_iter()
            .map(|c| c.config.id)
            .collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(h.store.load_channels().await.unwrap().len(), 2);
        assert_eq!(count_events(&h.svc, &EventKind::ChannelAdded), 2);
    }

    #[tokio::test]
    async fn load_restores_persisted_channels_once() {
        let h = harness(ScriptedBackend::with_report(ProbeReport::offline()), 2);
        let mut cfg = ChannelConfig::new("kept");
        cfg.quality = Quality::P720;
        h.store
            .save_channel(&StoredChannel::from(&Channel::new(cfg)))
            .await
            .unwrap();

        assert_eq!(h.svc.load().await.unwrap(), 1);
        assert_eq!(h.svc.load().await.unwrap(), 0);
        let ch = h.svc.get_channel("kept").unwrap();
        assert_eq!(ch.state, ChannelState::Idle);
        assert_eq!(ch.config.quality, Quality::P720);
    }

    #[tokio::test]
    async fn rejects_zero_concurrency_and_negative_interval() {
        let store: Arc<dyn ChannelStore> = Arc::new(InMemoryStore::new());
        let backend: Arc<dyn CaptureBackend> =
            Arc::new(ScriptedBackend::with_report(ProbeReport::offline()));

        let mut config = StreamSaverConfig::default();
        config.recorder.max_concurrent_downloads = 0;
        assert!(matches!(
            RecorderService::new(&config, Arc::clone(&store), Arc::clone(&backend)),
            Err(Error::InvalidConfig { .. })
        ));

        let mut config = StreamSaverConfig::default();
        config.scanner.idle_interval_minutes = -1.0;
        assert!(matches!(
            RecorderService::new(&config, store, backend),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn offline_channel_returns_to_idle_and_logs_once() {
        let h = harness(ScriptedBackend::with_report(ProbeReport::offline()), 2);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        for _ in 0..2 {
            assert_eq!(h.svc.scan_once(), 1);
            wait_for("idle", || state_of(&h.svc, "a") == ChannelState::Idle).await;
            wait_for("task cleanup", || lock(&h.svc.active).is_empty()).await;
        }

        let ch = h.svc.get_channel("a").unwrap();
        assert_eq!(ch.last_live, Some(false));
        assert_eq!(count_events(&h.svc, &EventKind::ChannelOffline), 1);
        assert_eq!(h.svc.pool.running(), 0);
    }

    #[tokio::test]
    async fn scheduled_stream_is_reported_once() {
        let h = harness(
            ScriptedBackend::with_report(ProbeReport {
                scheduled: Some("2 hours".into()),
                ..ProbeReport::offline()
            }),
            1,
        );
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        for _ in 0..3 {
            h.svc.scan_once();
            wait_for("task cleanup", || lock(&h.svc.active).is_empty()).await;
        }
        assert_eq!(count_events(&h.svc, &EventKind::StreamScheduled), 1);
        assert_eq!(
            h.svc.get_channel("a").unwrap().scheduled_start.as_deref(),
            Some("2 hours")
        );
    }

    #[tokio::test]
    async fn single_slot_records_one_of_two_live_channels() {
        let h = harness(ScriptedBackend::live(&[1080, 720]), 1);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();
        h.svc.add_channel(ChannelConfig::new("b")).await.unwrap();

        assert_eq!(h.svc.scan_once(), 2);
        wait_for("a recording", || state_of(&h.svc, "a") == ChannelState::Recording).await;

        // B waits for the slot held by A.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state_of(&h.svc, "b"), ChannelState::Probing);
        assert_eq!(h.svc.pool.running(), 1);
        assert_eq!(h.svc.pool.queued(), 1);
        assert_eq!(h.svc.status().recording_count, 1);

        // Neither busy channel is submitted again.
        assert_eq!(h.svc.scan_once(), 0);

        // Freeing A's slot lets B start.
        h.svc.remove_channel("a").await.unwrap();
        wait_for("b recording", || state_of(&h.svc, "b") == ChannelState::Recording).await;
        assert_eq!(h.svc.pool.running(), 1);
        h.svc.stop().await;
    }

    #[tokio::test]
    async fn missing_resolution_moves_channel_to_error_and_retries() {
        let h = harness(ScriptedBackend::live(&[720, 480]), 2);
        let mut cfg = ChannelConfig::new("a");
        cfg.quality = Quality::P1080;
        h.svc.add_channel(cfg).await.unwrap();

        h.svc.scan_once();
        wait_for("error", || state_of(&h.svc, "a") == ChannelState::Error).await;
        let ch = h.svc.get_channel("a").unwrap();
        assert!(ch.last_error.unwrap().contains("1080"));
        assert!(h.backend.recorded.lock().unwrap().is_empty());
        assert_eq!(files_under(&h.svc.adapter.settings().records_dir), 0);
        assert_eq!(count_events(&h.svc, &EventKind::ProbeFailed), 1);
        wait_for("task cleanup", || lock(&h.svc.active).is_empty()).await;

        // The next cycle retries, and a lower quality now records.
        h.svc
            .update_channel("a", ChannelPatch {
                quality: Some(Quality::P720),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(h.svc.scan_once(), 1);
        wait_for("recording", || state_of(&h.svc, "a") == ChannelState::Recording).await;
        assert_eq!(h.svc.get_channel("a").unwrap().last_error, None);
        assert_eq!(h.backend.recorded.lock().unwrap()[0].format.format_id, "f720");
        h.svc.stop().await;
    }

    #[tokio::test]
    async fn probe_failure_is_retried_next_cycle() {
        let h = harness(ScriptedBackend::with_report(ProbeReport::offline()), 2);
        *h.backend.report.lock().unwrap() = Err("tool crashed".into());
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        h.svc.scan_once();
        wait_for("error", || state_of(&h.svc, "a") == ChannelState::Error).await;
        wait_for("task cleanup", || lock(&h.svc.active).is_empty()).await;
        assert_eq!(h.svc.status().error_count, 1);

        *h.backend.report.lock().unwrap() = Ok(ProbeReport::offline());
        assert_eq!(h.svc.scan_once(), 1);
        wait_for("idle", || state_of(&h.svc, "a") == ChannelState::Idle).await;
        assert_eq!(h.svc.get_channel("a").unwrap().last_error, None);
    }

    #[tokio::test]
    async fn finished_recording_returns_to_idle() {
        let mut backend = ScriptedBackend::live(&[1080, 720, 480]);
        backend.record_for = Some(Duration::from_millis(20));
        let h = harness(backend, 2);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        h.svc.scan_once();
        wait_for("finished", || {
            count_events(&h.svc, &EventKind::RecordingFinished) == 1
        })
        .await;
        let ch = h.svc.get_channel("a").unwrap();
        assert_eq!(ch.state, ChannelState::Idle);
        assert_eq!(ch.recording_started_at_ms, None);
        let path = ch.last_recording.unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".ts"));
        assert_eq!(h.backend.recorded.lock().unwrap()[0].format.format_id, "f1080");
        assert_eq!(count_events(&h.svc, &EventKind::ChannelLive), 1);
    }

    #[tokio::test]
    async fn remove_while_recording_cancels_capture() {
        let h = harness(ScriptedBackend::live(&[720]), 2);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();
        h.svc.scan_once();
        wait_for("recording", || state_of(&h.svc, "a") == ChannelState::Recording).await;

        let removed = h.svc.remove_channel("a").await.unwrap();
        assert_eq!(removed.state, ChannelState::Recording);
        assert!(matches!(h.svc.get_channel("a"), Err(Error::NotFound { .. })));
        assert!(h.store.load_channels().await.unwrap().is_empty());
        assert_eq!(h.svc.pool.running(), 0);
        assert!(lock(&h.svc.active).is_empty());
        assert_eq!(h.svc.scan_once(), 0);
        assert_eq!(count_events(&h.svc, &EventKind::ChannelRemoved), 1);
    }

    #[tokio::test]
    async fn stop_recording_keeps_channel_tracked() {
        let h = harness(ScriptedBackend::live(&[720]), 1);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        assert!(matches!(
            h.svc.stop_recording("a").await,
            Err(Error::NotRecording {
                state: ChannelState::Idle,
                ..
            })
        ));
        assert!(matches!(
            h.svc.stop_recording("ghost").await,
            Err(Error::NotFound { .. })
        ));

        h.svc.scan_once();
        wait_for("recording", || state_of(&h.svc, "a") == ChannelState::Recording).await;

        let ch = h.svc.stop_recording("a").await.unwrap();
        assert_eq!(ch.state, ChannelState::Idle);
        assert_eq!(ch.recording_started_at_ms, None);
        assert_eq!(count_events(&h.svc, &EventKind::RecordingCancelled), 1);
        assert_eq!(h.svc.pool.running(), 0);
        assert!(lock(&h.svc.active).is_empty());
        assert_eq!(h.store.load_channels().await.unwrap().len(), 1);

        // Still live, so the next cycle records again.
        assert_eq!(h.svc.scan_once(), 1);
        wait_for("recording again", || {
            state_of(&h.svc, "a") == ChannelState::Recording
        })
        .await;
        h.svc.stop().await;
    }

    /// Store whose saves fail once `release` is notified.
    struct StalledStore {
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl ChannelStore for StalledStore {
        async fn load_channels(&self) -> Result<Vec<StoredChannel>> {
            Ok(Vec::new())
        }

        async fn save_channel(&self, _channel: &StoredChannel) -> Result<()> {
            self.release.notified().await;
            Err(Error::message("disk full"))
        }

        async fn update_channel(&self, _channel: &StoredChannel) -> Result<()> {
            Ok(())
        }

        async fn delete_channel(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_add_cancels_a_capture_started_meanwhile() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = StreamSaverConfig::default();
        config.recorder.records_dir = tmp.path().to_path_buf();
        config.recorder.termination_grace_secs = 1;
        let store = Arc::new(StalledStore {
            release: tokio::sync::Notify::new(),
        });
        let svc = RecorderService::new(
            &config,
            Arc::clone(&store) as Arc<dyn ChannelStore>,
            Arc::new(ScriptedBackend::live(&[720])),
        )
        .unwrap();

        let adding = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.add_channel(ChannelConfig::new("a")).await }
        });
        wait_for("channel visible", || svc.get_channel("a").is_ok()).await;
        assert_eq!(svc.scan_once(), 1);
        wait_for("recording", || state_of(&svc, "a") == ChannelState::Recording).await;

        store.release.notify_one();
        let err = adding.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(matches!(svc.get_channel("a"), Err(Error::NotFound { .. })));
        assert!(lock(&svc.active).is_empty());
        assert_eq!(svc.pool.running(), 0);
    }

    #[tokio::test]
    async fn remove_missing_channel_is_not_found() {
        let h = harness(ScriptedBackend::with_report(ProbeReport::offline()), 1);
        assert!(matches!(
            h.svc.remove_channel("ghost").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_round_trip_and_busy_rejection() {
        let h = harness(ScriptedBackend::live(&[720]), 1);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();

        let patch = ChannelPatch {
            alias: Some(Some("Morning Show".into())),
            quality: Some(Quality::P720),
        };
        h.svc.update_channel("a", patch).await.unwrap();
        let listed = h.svc.list_channels();
        assert_eq!(listed[0].display_name(), "Morning Show");
        assert_eq!(listed[0].config.quality, Quality::P720);
        let stored = h.store.load_channels().await.unwrap();
        assert_eq!(stored[0].config.alias.as_deref(), Some("Morning Show"));

        h.svc.scan_once();
        wait_for("recording", || state_of(&h.svc, "a") == ChannelState::Recording).await;
        let err = h
            .svc
            .update_channel("a", ChannelPatch {
                quality: Some(Quality::P480),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelBusy {
            state: ChannelState::Recording,
            ..
        }));
        assert_eq!(h.svc.get_channel("a").unwrap().config.quality, Quality::P720);
        h.svc.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_captures_and_resets_state() {
        let h = harness(ScriptedBackend::live(&[720]), 1);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();
        h.svc.add_channel(ChannelConfig::new("b")).await.unwrap();
        h.svc.start().await.unwrap();
        assert!(h.svc.is_running());

        wait_for("recording", || h.svc.status().recording_count == 1).await;
        h.svc.stop().await;

        assert!(!h.svc.is_running());
        for ch in h.svc.list_channels() {
            assert_eq!(ch.state, ChannelState::Idle, "{}", ch.id());
        }
        assert_eq!(h.svc.pool.running(), 0);
        assert_eq!(h.svc.pool.queued(), 0);
        assert_eq!(count_events(&h.svc, &EventKind::RecordingCancelled), 1);
        let status = h.svc.status();
        assert_eq!(status.next_scan_at_ms, None);
        assert!(status.cycles_completed >= 1);
    }

    #[tokio::test]
    async fn stop_interrupts_idle_sleep() {
        let h = harness(ScriptedBackend::with_report(ProbeReport::offline()), 2);
        h.svc.start().await.unwrap();
        // Starting twice is a no-op.
        h.svc.start().await.unwrap();
        wait_for("first cycle", || h.svc.status().cycles_completed == 1).await;
        assert!(h.svc.status().next_scan_at_ms.is_some());

        let begun = Instant::now();
        h.svc.stop().await;
        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(!h.svc.status().running);
    }

    #[tokio::test]
    async fn cycles_respect_idle_interval() {
        let h = harness_with(ScriptedBackend::with_report(ProbeReport::offline()), |cfg| {
            // 1.5 seconds.
            cfg.scanner.idle_interval_minutes = 0.025;
        });
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();
        h.svc.start().await.unwrap();

        wait_for("first cycle", || h.svc.status().cycles_completed == 1).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.svc.status().cycles_completed, 1);

        wait_for("second cycle", || h.svc.status().cycles_completed == 2).await;
        h.svc.stop().await;

        let starts: Vec<u64> = h
            .svc
            .recent_events(usize::MAX)
            .iter()
            .filter(|e| matches!(e.kind, EventKind::ScanCycleStarted { .. }))
            .map(|e| e.at_ms)
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= 1_499, "{starts:?}");
    }

    #[tokio::test]
    async fn resizing_pool_admits_queued_channel() {
        let h = harness(ScriptedBackend::live(&[720]), 1);
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();
        h.svc.add_channel(ChannelConfig::new("b")).await.unwrap();
        h.svc.scan_once();
        wait_for("one recording", || h.svc.status().recording_count == 1).await;

        assert!(matches!(
            h.svc.set_max_concurrent_downloads(0),
            Err(Error::InvalidConfig { .. })
        ));
        h.svc.set_max_concurrent_downloads(2).unwrap();
        wait_for("both recording", || h.svc.status().recording_count == 2).await;
        assert_eq!(h.svc.status().pool_capacity, 2);
        h.svc.stop().await;
    }

    #[tokio::test]
    async fn subscribers_see_lifecycle_events() {
        let mut backend = ScriptedBackend::live(&[720]);
        backend.record_for = Some(Duration::from_millis(10));
        let h = harness(backend, 1);
        let mut rx = h.svc.subscribe();
        h.svc.add_channel(ChannelConfig::new("a")).await.unwrap();
        h.svc.scan_once();

        let mut kinds = Vec::new();
        while !kinds.contains(&EventKind::RecordingFinished) {
            let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(ev.kind);
        }
        let pos = |k: &EventKind| kinds.iter().position(|x| x == k).unwrap();
        assert!(pos(&EventKind::ChannelAdded) < pos(&EventKind::RecordingStarted));
        assert!(pos(&EventKind::RecordingStarted) < pos(&EventKind::RecordingFinished));
    }

    #[test]
    fn describe_patch() {
        let patch = ChannelPatch {
            alias: Some(None),
            quality: Some(Quality::P480),
        };
        assert_eq!(describe(&patch), "alias cleared, quality=480");
    }
}
