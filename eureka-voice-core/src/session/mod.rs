//! Session orchestration: the controller, its state machine, and the
//! provider variants it drives.
//!
//! [`VoiceSessionController`] owns at most one session at a time. `toggle()`
//! either starts a session (spawning the provider plus an apply loop that
//! folds [`ProviderEvent`]s into the state machine) or tears the current one
//! down. Teardown is cooperative — cancel, then wait for the provider to
//! release its resources — and every applied event is guarded by a session
//! epoch so nothing from a torn-down session can touch fresh state.

pub mod live;
pub mod provider;
pub mod simulated;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::audio::levels::DEFAULT_BAND_COUNT;
use crate::audio::CaptureHints;
use crate::error::{Result, VoiceError};
use crate::identity::DEFAULT_ROOM_PREFIX;
use crate::ipc::events::{
    LevelsEvent, SessionSnapshot, SessionStatus, StatusEvent, TranscriptEvent, TranscriptKind,
};
use provider::{ProviderEvent, SessionMode, SessionProvider, SessionRun};
use simulated::SimulatedTimeline;

use crate::tasks::CancelHandle;

/// Depth of the provider → controller event channel.
const EVENT_CHANNEL_CAP: usize = 256;

/// Depth of each UI-facing broadcast channel.
const BROADCAST_CAP: usize = 256;

/// Everything configurable about a session, with defaults matching the
/// shipped application.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// Token service endpoint for live sessions.
    pub token_endpoint: String,
    /// Budget for the token fetch and for the socket open, each.
    pub connect_timeout: Duration,
    /// Number of visualization bands; fixed for the controller's lifetime.
    pub band_count: usize,
    /// Spacing of analyzer ticks in live sessions.
    pub analyzer_interval: Duration,
    /// Sample rate of the published PCM16 track (Hz).
    pub publish_sample_rate: u32,
    pub capture_hints: CaptureHints,
    /// Input device to prefer; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Prefix for generated room names.
    pub room_prefix: String,
    /// Hard cap on session length; the watchdog tears down sessions that
    /// outlive it. `None` disables the cap.
    pub max_session: Option<Duration>,
    /// How long the error state is displayed before resetting to idle.
    /// `None` keeps the error until the next `toggle()`.
    pub error_reset: Option<Duration>,
    /// Timeline for simulated sessions.
    pub simulated: SimulatedTimeline,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Live,
            token_endpoint: "http://localhost:3000/api/session-token".into(),
            connect_timeout: Duration::from_secs(10),
            band_count: DEFAULT_BAND_COUNT,
            analyzer_interval: Duration::from_millis(16),
            publish_sample_rate: 16_000,
            capture_hints: CaptureHints::default(),
            preferred_input_device: None,
            room_prefix: DEFAULT_ROOM_PREFIX.into(),
            max_session: Some(Duration::from_secs(120)),
            error_reset: Some(Duration::from_secs(10)),
            simulated: SimulatedTimeline::default(),
        }
    }
}

/// Counters for observing controller behavior. All relaxed — they feed
/// logs and debugging surfaces, not control flow.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    sessions_started: AtomicU64,
    events_applied: AtomicU64,
    stale_events_dropped: AtomicU64,
    transcripts_applied: AtomicU64,
    agent_messages: AtomicU64,
    completions_fired: AtomicU64,
    watchdog_teardowns: AtomicU64,
}

/// Point-in-time copy of [`SessionDiagnostics`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub sessions_started: u64,
    pub events_applied: u64,
    pub stale_events_dropped: u64,
    pub transcripts_applied: u64,
    pub agent_messages: u64,
    pub completions_fired: u64,
    pub watchdog_teardowns: u64,
}

impl SessionDiagnostics {
    fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            stale_events_dropped: self.stale_events_dropped.load(Ordering::Relaxed),
            transcripts_applied: self.transcripts_applied.load(Ordering::Relaxed),
            agent_messages: self.agent_messages.load(Ordering::Relaxed),
            completions_fired: self.completions_fired.load(Ordering::Relaxed),
            watchdog_teardowns: self.watchdog_teardowns.load(Ordering::Relaxed),
        }
    }
}

type CompletionHook = Box<dyn Fn(&str) + Send + Sync>;

/// Mutable session view, guarded by one lock.
struct SessionState {
    status: SessionStatus,
    transcript: String,
    audio_level: f32,
    audio_levels: Vec<f32>,
    error: Option<String>,
    /// Latch: set when the final transcript is applied, so completion fires
    /// exactly once and later transcript events are ignored.
    completion_fired: bool,
}

/// The running session's handles, present only while one is active.
struct ActiveSession {
    epoch: u64,
    cancel: CancelHandle,
    driver: tokio::task::JoinHandle<()>,
}

struct Shared {
    band_count: usize,
    state: Mutex<SessionState>,
    active: Mutex<Option<ActiveSession>>,
    /// Bumped at every session start and stop; events carrying an older
    /// epoch are dropped.
    epoch: AtomicU64,
    /// Shared sequence for level and transcript events.
    seq: AtomicU64,
    status_tx: broadcast::Sender<StatusEvent>,
    levels_tx: broadcast::Sender<LevelsEvent>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    diagnostics: SessionDiagnostics,
    completion: Mutex<Option<CompletionHook>>,
    error_reset: Option<Duration>,
    /// Handle for the pending error-display reset, if one is scheduled.
    /// Dropping it cancels the timer; the next toggle or start does so.
    reset_task: Mutex<Option<CancelHandle>>,
}

impl Shared {
    fn new(config: &SessionConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (levels_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            band_count: config.band_count,
            state: Mutex::new(SessionState {
                status: SessionStatus::Idle,
                transcript: String::new(),
                audio_level: 0.0,
                audio_levels: vec![0.0; config.band_count],
                error: None,
                completion_fired: false,
            }),
            active: Mutex::new(None),
            epoch: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            status_tx,
            levels_tx,
            transcript_tx,
            diagnostics: SessionDiagnostics::default(),
            completion: Mutex::new(None),
            error_reset: config.error_reset,
            reset_task: Mutex::new(None),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Transition to `status` (no-op when already there) and broadcast.
    fn set_status(&self, state: &mut SessionState, status: SessionStatus, detail: Option<String>) {
        if state.status == status {
            return;
        }
        debug!(from = ?state.status, to = ?status, "session status change");
        state.status = status;
        if status == SessionStatus::Error {
            state.error = detail.clone();
        }
        let _ = self.status_tx.send(StatusEvent { status, detail });
    }

    /// Fold one provider event into the state machine. Events from a
    /// superseded session epoch are dropped.
    fn apply_event(&self, epoch: u64, event: ProviderEvent) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            self.diagnostics
                .stale_events_dropped
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.diagnostics.events_applied.fetch_add(1, Ordering::Relaxed);

        // Fire the completion hook outside the state lock.
        let mut completed: Option<String> = None;
        {
            let mut state = self.state.lock();
            match event {
                ProviderEvent::Connected => {
                    if state.status == SessionStatus::Connecting {
                        self.set_status(&mut state, SessionStatus::Connected, None);
                    }
                }
                ProviderEvent::TrackPublished => {
                    if matches!(
                        state.status,
                        SessionStatus::Connecting | SessionStatus::Connected
                    ) {
                        self.set_status(&mut state, SessionStatus::Listening, None);
                    }
                }
                ProviderEvent::Levels { average, bands } => {
                    if matches!(
                        state.status,
                        SessionStatus::Listening | SessionStatus::Processing
                    ) {
                        state.audio_level = average.clamp(0.0, 1.0);
                        state.audio_levels.clear();
                        state
                            .audio_levels
                            .extend(bands.iter().map(|b| b.clamp(0.0, 1.0)));
                        state.audio_levels.resize(self.band_count, 0.0);
                        let _ = self.levels_tx.send(LevelsEvent {
                            seq: self.next_seq(),
                            average: state.audio_level,
                            bands: state.audio_levels.clone(),
                        });
                    }
                }
                ProviderEvent::Transcript { text, is_final } => {
                    if state.status.is_active() && !state.completion_fired {
                        state.transcript = text.clone();
                        self.diagnostics
                            .transcripts_applied
                            .fetch_add(1, Ordering::Relaxed);
                        let kind = if is_final {
                            TranscriptKind::Final
                        } else {
                            TranscriptKind::Partial
                        };
                        let _ = self.transcript_tx.send(TranscriptEvent {
                            seq: self.next_seq(),
                            text: text.clone(),
                            kind,
                        });
                        if is_final {
                            state.completion_fired = true;
                            self.set_status(&mut state, SessionStatus::Processing, None);
                            completed = Some(text);
                        }
                    }
                }
                ProviderEvent::Processing => {
                    if state.status == SessionStatus::Listening {
                        self.set_status(&mut state, SessionStatus::Processing, None);
                    }
                }
                ProviderEvent::Agent { text } => {
                    self.diagnostics.agent_messages.fetch_add(1, Ordering::Relaxed);
                    info!(chars = text.chars().count(), "agent response received");
                }
                ProviderEvent::Disconnected { reason } => {
                    warn!(reason = reason.as_str(), "session disconnected");
                    self.set_status(&mut state, SessionStatus::Disconnected, Some(reason));
                }
            }
        }

        if let Some(text) = completed {
            self.diagnostics
                .completions_fired
                .fetch_add(1, Ordering::Relaxed);
            if let Some(hook) = self.completion.lock().as_ref() {
                hook(&text);
            }
        }
    }

    /// Settle final state after the provider returned. Stale epochs (a stop
    /// already settled this session) are ignored.
    fn finish_session(self: &Arc<Self>, epoch: u64, result: Result<()>) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }

        // Natural end: drop the session handles ourselves.
        {
            let mut active = self.active.lock();
            if active.as_ref().map(|a| a.epoch) == Some(epoch) {
                *active = None;
            }
        }

        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                if state.completion_fired {
                    self.set_status(&mut state, SessionStatus::Complete, None);
                }
                // Completed, cancelled, or remote-dropped (the Disconnected
                // status was already broadcast): settle back to idle.
                self.reset_to_idle(&mut state);
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = message.as_str(), "session failed");
                // The session's own cancellation has already fired (its
                // handle went with the ActiveSession above), so the reset
                // timer gets its own handle. A later toggle or start drops
                // it, cancelling the timer.
                if let Some(reset_after) = self.error_reset {
                    let (handle, mut token) = CancelHandle::pair();
                    let shared = Arc::clone(self);
                    tokio::spawn(async move {
                        if !token.delay(reset_after).await {
                            return;
                        }
                        if shared.epoch.load(Ordering::SeqCst) != epoch {
                            return;
                        }
                        let mut state = shared.state.lock();
                        if state.status == SessionStatus::Error {
                            shared.reset_to_idle(&mut state);
                        }
                    });
                    *self.reset_task.lock() = Some(handle);
                }
                self.set_status(&mut state, SessionStatus::Error, Some(message));
            }
        }
    }

    /// Return to idle. The transcript is kept for the embedding UI to read;
    /// the next session start clears it.
    fn reset_to_idle(&self, state: &mut SessionState) {
        state.audio_level = 0.0;
        state.audio_levels.iter_mut().for_each(|b| *b = 0.0);
        state.error = None;
        self.set_status(state, SessionStatus::Idle, None);
    }
}

/// Owns the single voice session and exposes its state to the embedding UI.
///
/// Cheap to clone-share via the internal `Arc`; all methods take `&self`.
pub struct VoiceSessionController {
    shared: Arc<Shared>,
    provider: Arc<dyn SessionProvider>,
    max_session: Option<Duration>,
    /// Serializes toggle/stop so concurrent calls cannot double-start.
    op_lock: tokio::sync::Mutex<()>,
}

impl VoiceSessionController {
    /// Build a controller with the provider selected by `config.mode`.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let provider = provider::from_config(&config)?;
        Ok(Self::with_provider(config, provider))
    }

    /// Build a controller around an explicit provider (tests, embedders with
    /// their own transport).
    pub fn with_provider(config: SessionConfig, provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            shared: Arc::new(Shared::new(&config)),
            provider,
            max_session: config.max_session,
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Register the hook invoked with the final transcript, exactly once per
    /// completed session. Replaces any previous hook.
    pub fn on_complete<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.completion.lock() = Some(Box::new(hook));
    }

    /// Start a session if none is active, stop the active one otherwise.
    /// A toggle on a lingering error state acknowledges it back to idle.
    pub async fn toggle(&self) {
        let _guard = self.op_lock.lock().await;
        if self.shared.active.lock().is_some() {
            self.stop_locked().await;
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if state.status == SessionStatus::Error {
                // Acknowledging the error supersedes its auto-reset timer.
                self.shared.reset_task.lock().take();
                self.shared.reset_to_idle(&mut state);
                return;
            }
        }
        self.start_locked();
    }

    /// Tear down the active session and wait for its resources to be
    /// released. No-op when idle.
    pub async fn stop(&self) {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await;
    }

    fn start_locked(&self) {
        let shared = &self.shared;
        let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        shared
            .diagnostics
            .sessions_started
            .fetch_add(1, Ordering::Relaxed);

        {
            let mut state = shared.state.lock();
            // A fresh session supersedes any pending error-display reset.
            shared.reset_task.lock().take();
            state.transcript.clear();
            state.audio_level = 0.0;
            state.audio_levels.iter_mut().for_each(|b| *b = 0.0);
            state.error = None;
            state.completion_fired = false;
            shared.set_status(&mut state, SessionStatus::Connecting, None);
        }
        info!(epoch, provider = self.provider.name(), "session starting");

        let (cancel_handle, cancel) = CancelHandle::pair();
        let watchdog_token = self.max_session.is_some().then(|| cancel.clone());
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAP);

        let provider = Arc::clone(&self.provider);
        let driver_shared = Arc::clone(shared);
        let driver = tokio::spawn(async move {
            let run = SessionRun {
                events: event_tx,
                cancel,
            };
            let runner = tokio::spawn(async move { provider.run(run).await });

            // The provider owns the event sender; the loop ends when it
            // returns.
            while let Some(event) = event_rx.recv().await {
                driver_shared.apply_event(epoch, event);
            }

            let result = match runner.await {
                Ok(r) => r,
                Err(e) => Err(VoiceError::Other(anyhow::anyhow!(
                    "session task panicked: {e}"
                ))),
            };
            driver_shared.finish_session(epoch, result);
        });

        *shared.active.lock() = Some(ActiveSession {
            epoch,
            cancel: cancel_handle,
            driver,
        });

        if let (Some(cap), Some(mut token)) = (self.max_session, watchdog_token) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                // Same cancellation as the rest of the session: teardown or
                // a natural end retires the watchdog immediately.
                if !token.delay(cap).await {
                    return;
                }
                if shared.epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }
                warn!(cap_secs = cap.as_secs(), "session exceeded cap, forcing teardown");
                shared
                    .diagnostics
                    .watchdog_teardowns
                    .fetch_add(1, Ordering::Relaxed);
                teardown(&shared, Some(epoch)).await;
            });
        }
    }

    async fn stop_locked(&self) {
        teardown(&self.shared, None).await;
    }

    /// Point-in-time view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.state.lock();
        SessionSnapshot {
            status: state.status,
            is_listening: state.status == SessionStatus::Listening,
            transcript: state.transcript.clone(),
            audio_level: state.audio_level,
            audio_levels: state.audio_levels.clone(),
            error: state.error.clone(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.state.lock().status
    }

    pub fn is_listening(&self) -> bool {
        self.status() == SessionStatus::Listening
    }

    pub fn transcript(&self) -> String {
        self.shared.state.lock().transcript.clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.status_tx.subscribe()
    }

    pub fn subscribe_levels(&self) -> broadcast::Receiver<LevelsEvent> {
        self.shared.levels_tx.subscribe()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.shared.transcript_tx.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }
}

/// Cancel the active session (if any) and wait for its driver to finish.
///
/// `expected_epoch` restricts the teardown to one specific session; `None`
/// tears down whatever is active. Bumping the epoch first makes every event
/// still in flight stale.
async fn teardown(shared: &Arc<Shared>, expected_epoch: Option<u64>) {
    let taken = {
        let mut active = shared.active.lock();
        let wanted = match (active.as_ref(), expected_epoch) {
            (Some(session), Some(expected)) => session.epoch == expected,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if wanted {
            active.take()
        } else {
            None
        }
    };

    let Some(session) = taken else {
        return;
    };

    shared.epoch.fetch_add(1, Ordering::SeqCst);
    session.cancel.cancel();
    let _ = session.driver.await;
    debug!(epoch = session.epoch, "session torn down");

    let mut state = shared.state.lock();
    shared.reset_to_idle(&mut state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Emits a fixed event list, then returns the scripted result.
    struct ScriptedProvider {
        events: Vec<ProviderEvent>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl SessionProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, run: SessionRun) -> Result<()> {
            for event in self.events.clone() {
                if run.events.send(event).await.is_err() {
                    return Ok(());
                }
            }
            match &self.fail_with {
                Some(msg) => Err(VoiceError::Connection(msg.clone())),
                None => Ok(()),
            }
        }
    }

    /// Connects, then idles until cancelled.
    struct PendingProvider;

    #[async_trait]
    impl SessionProvider for PendingProvider {
        fn name(&self) -> &'static str {
            "pending"
        }

        async fn run(&self, run: SessionRun) -> Result<()> {
            let SessionRun { events, mut cancel } = run;
            let _ = events.send(ProviderEvent::Connected).await;
            let _ = events.send(ProviderEvent::TrackPublished).await;
            cancel.cancelled().await;
            Ok(())
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            mode: SessionMode::Simulated,
            max_session: None,
            error_reset: None,
            ..SessionConfig::default()
        }
    }

    async fn wait_for_status(
        rx: &mut broadcast::Receiver<StatusEvent>,
        wanted: SessionStatus,
    ) -> StatusEvent {
        loop {
            let event = rx.recv().await.expect("status stream closed");
            if event.status == wanted {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn full_session_walks_the_status_ladder_and_completes_once() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![
                ProviderEvent::Connected,
                ProviderEvent::TrackPublished,
                ProviderEvent::Transcript {
                    text: "build me".into(),
                    is_final: false,
                },
                ProviderEvent::Transcript {
                    text: "build me a rocket".into(),
                    is_final: true,
                },
            ],
            fail_with: None,
        });
        let controller = VoiceSessionController::with_provider(test_config(), provider);

        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(String::new()));
        {
            let completions = Arc::clone(&completions);
            let seen = Arc::clone(&seen);
            controller.on_complete(move |text| {
                completions.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = text.to_string();
            });
        }

        let mut status = controller.subscribe_status();
        controller.toggle().await;

        // Connecting → Connected → Listening → Processing → Complete → Idle.
        for wanted in [
            SessionStatus::Connecting,
            SessionStatus::Connected,
            SessionStatus::Listening,
            SessionStatus::Processing,
            SessionStatus::Complete,
            SessionStatus::Idle,
        ] {
            wait_for_status(&mut status, wanted).await;
        }

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(&*seen.lock(), "build me a rocket");
        // Transcript survives the return to idle.
        assert_eq!(controller.transcript(), "build me a rocket");
        assert_eq!(controller.diagnostics().transcripts_applied, 2);
    }

    #[tokio::test]
    async fn toggle_twice_starts_then_stops() {
        let controller =
            VoiceSessionController::with_provider(test_config(), Arc::new(PendingProvider));
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Listening).await;
        assert!(controller.status().is_active());

        controller.toggle().await;
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert!(controller.shared.active.lock().is_none());
    }

    #[tokio::test]
    async fn stop_while_connecting_returns_to_idle() {
        let controller =
            VoiceSessionController::with_provider(test_config(), Arc::new(PendingProvider));
        controller.toggle().await;
        controller.stop().await;
        let snap = controller.snapshot();
        assert_eq!(snap.status, SessionStatus::Idle);
        assert!(!snap.is_listening);
        assert!(snap.audio_levels.iter().all(|b| *b == 0.0));
    }

    #[tokio::test]
    async fn stale_events_from_a_stopped_session_are_dropped() {
        let controller =
            VoiceSessionController::with_provider(test_config(), Arc::new(PendingProvider));
        let mut status = controller.subscribe_status();
        controller.toggle().await;
        // Let the session's own events settle before stopping, so the only
        // stale event is the one injected below.
        wait_for_status(&mut status, SessionStatus::Listening).await;
        let old_epoch = controller.shared.epoch.load(Ordering::SeqCst);
        controller.stop().await;

        controller.shared.apply_event(
            old_epoch,
            ProviderEvent::Transcript {
                text: "ghost".into(),
                is_final: true,
            },
        );

        assert_eq!(controller.transcript(), "");
        assert_eq!(controller.diagnostics().stale_events_dropped, 1);
        assert_eq!(controller.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_error_state() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![],
            fail_with: Some("token service returned 500".into()),
        });
        let controller = VoiceSessionController::with_provider(test_config(), provider);
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        let event = wait_for_status(&mut status, SessionStatus::Error).await;
        assert!(event.detail.unwrap().contains("500"));

        let snap = controller.snapshot();
        assert_eq!(snap.status, SessionStatus::Error);
        assert!(snap.error.unwrap().contains("500"));
        assert!(snap.transcript.is_empty());

        // Toggling a lingering error acknowledges it without starting.
        controller.toggle().await;
        let snap = controller.snapshot();
        assert_eq!(snap.status, SessionStatus::Idle);
        assert!(snap.error.is_none());
        assert_eq!(controller.diagnostics().sessions_started, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_state_resets_to_idle_after_the_configured_delay() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![],
            fail_with: Some("boom".into()),
        });
        let mut config = test_config();
        config.error_reset = Some(Duration::from_secs(10));
        let controller = VoiceSessionController::with_provider(config, provider);
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Error).await;

        wait_for_status(&mut status, SessionStatus::Idle).await;
        let snap = controller.snapshot();
        assert_eq!(snap.status, SessionStatus::Idle);
        assert!(snap.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_tears_down_a_session_that_exceeds_the_cap() {
        let mut config = test_config();
        config.max_session = Some(Duration::from_secs(120));
        let controller =
            VoiceSessionController::with_provider(config, Arc::new(PendingProvider));
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Listening).await;

        wait_for_status(&mut status, SessionStatus::Idle).await;
        assert_eq!(controller.diagnostics().watchdog_teardowns, 1);
        assert!(controller.shared.active.lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_shares_the_session_cancellation() {
        let mut config = test_config();
        config.max_session = Some(Duration::from_secs(120));
        let controller =
            VoiceSessionController::with_provider(config, Arc::new(PendingProvider));
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Listening).await;

        // Provider and watchdog both hold the one session token.
        {
            let active = controller.shared.active.lock();
            let session = active.as_ref().expect("session should be active");
            assert_eq!(session.cancel.observers(), 2);
        }

        controller.stop().await;
        // Stop retired the watchdog with the session; running the clock far
        // past the cap must not produce a late teardown.
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(controller.diagnostics().watchdog_teardowns, 0);
        assert_eq!(controller.status(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledging_an_error_cancels_the_pending_reset() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![],
            fail_with: Some("boom".into()),
        });
        let mut config = test_config();
        config.error_reset = Some(Duration::from_secs(10));
        let controller = VoiceSessionController::with_provider(config, provider);
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Error).await;
        assert!(controller.shared.reset_task.lock().is_some());

        // Acknowledge the error; the scheduled reset goes with it.
        controller.toggle().await;
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert!(controller.shared.reset_task.lock().is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn out_of_order_connected_is_ignored_when_already_listening() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![
                ProviderEvent::Connected,
                ProviderEvent::TrackPublished,
                // Late duplicate must not regress the status.
                ProviderEvent::Connected,
                ProviderEvent::Transcript {
                    text: "done".into(),
                    is_final: true,
                },
            ],
            fail_with: None,
        });
        let controller = VoiceSessionController::with_provider(test_config(), provider);
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Listening).await;
        let next = status.recv().await.expect("status stream closed");
        assert_eq!(next.status, SessionStatus::Processing);
    }

    #[tokio::test]
    async fn levels_are_clamped_and_padded_to_the_band_count() {
        let controller =
            VoiceSessionController::with_provider(test_config(), Arc::new(PendingProvider));
        let mut status = controller.subscribe_status();
        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Listening).await;

        let epoch = controller.shared.epoch.load(Ordering::SeqCst);
        controller.shared.apply_event(
            epoch,
            ProviderEvent::Levels {
                average: 1.7,
                bands: vec![-0.5, 0.5, 2.0],
            },
        );

        let snap = controller.snapshot();
        assert_eq!(snap.audio_level, 1.0);
        assert_eq!(snap.audio_levels.len(), DEFAULT_BAND_COUNT);
        assert_eq!(&snap.audio_levels[..3], &[0.0, 0.5, 1.0]);
        assert!(snap.audio_levels[3..].iter().all(|b| *b == 0.0));

        controller.stop().await;
    }

    #[tokio::test]
    async fn transcripts_after_the_final_are_ignored() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![
                ProviderEvent::Connected,
                ProviderEvent::TrackPublished,
                ProviderEvent::Transcript {
                    text: "final text".into(),
                    is_final: true,
                },
                ProviderEvent::Transcript {
                    text: "late partial".into(),
                    is_final: false,
                },
                ProviderEvent::Transcript {
                    text: "second final".into(),
                    is_final: true,
                },
            ],
            fail_with: None,
        });
        let controller = VoiceSessionController::with_provider(test_config(), provider);

        let completions = Arc::new(AtomicUsize::new(0));
        {
            let completions = Arc::clone(&completions);
            controller.on_complete(move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            });
        }

        let mut status = controller.subscribe_status();
        controller.toggle().await;
        wait_for_status(&mut status, SessionStatus::Idle).await;

        assert_eq!(controller.transcript(), "final text");
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_disconnect_settles_back_to_idle() {
        let provider = Arc::new(ScriptedProvider {
            events: vec![
                ProviderEvent::Connected,
                ProviderEvent::TrackPublished,
                ProviderEvent::Disconnected {
                    reason: "remote closed".into(),
                },
            ],
            fail_with: None,
        });
        let controller = VoiceSessionController::with_provider(test_config(), provider);
        let mut status = controller.subscribe_status();

        controller.toggle().await;
        // The drop is surfaced, then the session settles to idle on its own.
        let event = wait_for_status(&mut status, SessionStatus::Disconnected).await;
        assert_eq!(event.detail.as_deref(), Some("remote closed"));
        wait_for_status(&mut status, SessionStatus::Idle).await;
        assert!(controller.shared.active.lock().is_none());

        controller.toggle().await;
        assert_eq!(controller.status(), SessionStatus::Connecting);
        controller.stop().await;
    }
}
