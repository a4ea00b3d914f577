//! Gesture-to-recording state machine.
//!
//! Every await inside [`CaptureSession::begin_press`] is a point where the
//! user may already have let go. Each press gets its own arming signal; after
//! each await the press re-checks that signal (and that it is still the
//! current press) before touching shared state, so a release during setup can
//! never be overtaken by a late device start.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::gesture::{crosses_cancel_threshold, Point};
use super::{CaptureDevice, CaptureError};
use crate::config::CaptureSettings;
use crate::domain::Recording;

/// Observable state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No gesture in progress
    Idle,

    /// Permission and device setup in flight, gesture still held
    Arming,

    /// Device is recording
    Recording,

    /// Device is recording but the gesture is in the cancel region
    Cancelling,

    /// Gesture ended, waiting for the device to stop; presses are ignored
    Stopping,
}

/// Result of [`CaptureSession::begin_press`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// The device started recording
    Recording,

    /// The gesture ended (or was force-stopped) before the device started
    Abandoned,

    /// A session was already in progress
    Ignored,
}

/// Why a finished recording was not handed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Released inside the cancel region
    Cancelled,

    /// Shorter than the minimum duration
    TooShort,

    /// The device produced no file
    NoRecording,
}

/// Result of [`CaptureSession::end_press`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No session was in progress
    Ignored,

    /// Released while arming; the device was never started
    NotStarted,

    /// The device was stopped and its output thrown away
    Discarded(DiscardReason),

    /// A usable recording
    Completed(Recording),
}

/// Cooperative cancellation for one press
#[derive(Debug, Default)]
struct ArmingSignal {
    cancelled: AtomicBool,
    wake: Notify,
}

impl ArmingSignal {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the press is not waiting yet
        self.wake.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    signal: Arc<ArmingSignal>,
    origin: Point,
    /// Latest position seen while arming
    last_position: Option<Point>,
    started_at: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CaptureState,
    session: Option<ActiveSession>,
}

/// The single live capture session of a client
pub struct CaptureSession {
    device: Arc<dyn CaptureDevice>,
    settings: CaptureSettings,
    inner: Mutex<Inner>,
}

impl CaptureSession {
    pub fn new(device: Arc<dyn CaptureDevice>, settings: CaptureSettings) -> Self {
        Self {
            device,
            settings,
            inner: Mutex::new(Inner {
                state: CaptureState::Idle,
                session: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Correlation id of the press in progress
    pub fn session_id(&self) -> Option<Uuid> {
        self.lock().session.as_ref().map(|s| s.id)
    }

    /// Time since the device started, while recording
    pub fn elapsed(&self) -> Option<Duration> {
        self.lock()
            .session
            .as_ref()
            .and_then(|s| s.started_at)
            .map(|t| t.elapsed())
    }

    /// Whether the press `id` should stop at this resumption point
    fn should_stop(&self, id: Uuid, signal: &ArmingSignal) -> bool {
        if signal.is_cancelled() {
            return true;
        }
        let inner = self.lock();
        !matches!(inner.session, Some(ref s) if s.id == id)
    }

    /// Return to Idle if press `id` is still the one arming
    fn abandon(&self, id: Uuid) {
        let mut inner = self.lock();
        let current = matches!(inner.session, Some(ref s) if s.id == id);
        if current && inner.state == CaptureState::Arming {
            inner.state = CaptureState::Idle;
            inner.session = None;
        }
    }

    /// Finger down: request permission, set the device up, wait out the
    /// arming delay and start recording unless released meanwhile.
    #[instrument(skip(self, origin))]
    pub async fn begin_press(&self, origin: Point) -> Result<PressOutcome, CaptureError> {
        let (id, signal) = {
            let mut inner = self.lock();
            if inner.state != CaptureState::Idle {
                debug!(state = ?inner.state, "Press ignored, session already active");
                return Ok(PressOutcome::Ignored);
            }

            let signal = Arc::new(ArmingSignal::default());
            let id = Uuid::new_v4();
            inner.state = CaptureState::Arming;
            inner.session = Some(ActiveSession {
                id,
                signal: Arc::clone(&signal),
                origin,
                last_position: None,
                started_at: None,
            });
            (id, signal)
        };
        debug!(session_id = %id, "Arming");

        let granted = match self.device.request_permission().await {
            Ok(granted) => granted,
            Err(e) => {
                self.abandon(id);
                warn!(session_id = %id, error = %e, "Permission request failed");
                return Err(CaptureError::StartFailure(e.to_string()));
            }
        };
        if !granted {
            self.abandon(id);
            info!(session_id = %id, "Microphone permission denied");
            return Err(CaptureError::PermissionDenied);
        }
        if self.should_stop(id, &signal) {
            self.abandon(id);
            debug!(session_id = %id, "Released during permission request");
            return Ok(PressOutcome::Abandoned);
        }

        if let Err(e) = self.device.configure().await {
            self.abandon(id);
            warn!(session_id = %id, error = %e, "Failed to configure audio mode");
            return Err(CaptureError::StartFailure(e.to_string()));
        }
        if self.should_stop(id, &signal) {
            self.abandon(id);
            debug!(session_id = %id, "Released during audio configuration");
            return Ok(PressOutcome::Abandoned);
        }

        if let Err(e) = self.device.prepare().await {
            self.abandon(id);
            warn!(session_id = %id, error = %e, "Failed to prepare recorder");
            return Err(CaptureError::StartFailure(e.to_string()));
        }

        // Arming delay, cut short by a cancel; the flag decides either way
        if !signal.is_cancelled() {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.arming_delay()) => {}
                _ = signal.wake.notified() => {}
            }
        }

        // The start decision and the device start happen under one lock
        let mut inner = self.lock();
        let is_current = matches!(inner.session, Some(ref s) if s.id == id);
        if !is_current || signal.is_cancelled() {
            if is_current {
                inner.state = CaptureState::Idle;
                inner.session = None;
            }
            debug!(session_id = %id, "Released during arming delay");
            return Ok(PressOutcome::Abandoned);
        }

        if let Err(e) = self.device.start() {
            inner.state = CaptureState::Idle;
            inner.session = None;
            warn!(session_id = %id, error = %e, "Device failed to start");
            return Err(CaptureError::StartFailure(e.to_string()));
        }

        let mut state = CaptureState::Recording;
        if let Some(ref mut s) = inner.session {
            s.started_at = Some(Instant::now());
            // The finger may already be in the cancel region
            if let Some(position) = s.last_position {
                if crosses_cancel_threshold(s.origin, position, self.settings.cancel_distance) {
                    state = CaptureState::Cancelling;
                }
            }
        }
        inner.state = state;
        info!(session_id = %id, ?state, "Recording started");

        Ok(PressOutcome::Recording)
    }

    /// Finger moved: toggle between Recording and Cancelling.
    ///
    /// While arming the position is remembered and applied once recording starts.
    pub fn update_gesture(&self, position: Point) -> CaptureState {
        let mut inner = self.lock();
        if inner.state == CaptureState::Arming {
            if let Some(ref mut s) = inner.session {
                s.last_position = Some(position);
            }
            return inner.state;
        }
        if !matches!(inner.state, CaptureState::Recording | CaptureState::Cancelling) {
            return inner.state;
        }

        let origin = match inner.session {
            Some(ref s) => s.origin,
            None => return inner.state,
        };

        inner.state = if crosses_cancel_threshold(origin, position, self.settings.cancel_distance) {
            CaptureState::Cancelling
        } else {
            CaptureState::Recording
        };
        inner.state
    }

    /// Finger up. `was_cancelling` is the caller's view of the gesture.
    #[instrument(skip(self))]
    pub async fn end_press(&self, was_cancelling: bool) -> ReleaseOutcome {
        let (id, started_at, cancelling) = {
            let mut inner = self.lock();
            match inner.state {
                CaptureState::Idle | CaptureState::Stopping => return ReleaseOutcome::Ignored,
                CaptureState::Arming => {
                    if let Some(session) = inner.session.take() {
                        session.signal.cancel();
                        debug!(session_id = %session.id, "Released before recording started");
                    }
                    inner.state = CaptureState::Idle;
                    return ReleaseOutcome::NotStarted;
                }
                CaptureState::Recording | CaptureState::Cancelling => {
                    let cancelling = was_cancelling || inner.state == CaptureState::Cancelling;
                    let session = inner.session.take();
                    match session.and_then(|s| s.started_at.map(|t| (s.id, t))) {
                        Some((id, started_at)) => {
                            inner.state = CaptureState::Stopping;
                            (id, started_at, cancelling)
                        }
                        None => {
                            inner.state = CaptureState::Idle;
                            return ReleaseOutcome::Ignored;
                        }
                    }
                }
            }
        };

        let elapsed = started_at.elapsed();

        let produced = match self.stop_device().await {
            Ok(produced) => produced,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Device failed to stop cleanly");
                None
            }
        };

        if cancelling {
            info!(session_id = %id, "Recording cancelled");
            return ReleaseOutcome::Discarded(DiscardReason::Cancelled);
        }
        if elapsed < self.settings.min_duration() {
            info!(session_id = %id, elapsed_ms = elapsed.as_millis() as u64, "Recording too short");
            return ReleaseOutcome::Discarded(DiscardReason::TooShort);
        }

        match produced {
            Some(path) => {
                info!(session_id = %id, elapsed_ms = elapsed.as_millis() as u64, "Recording finished");
                ReleaseOutcome::Completed(Recording {
                    path,
                    duration: elapsed,
                })
            }
            None => ReleaseOutcome::Discarded(DiscardReason::NoRecording),
        }
    }

    /// Abort whatever is in progress and return to Idle.
    ///
    /// Returns `true` if a session was active. A stop already in flight is
    /// left to finish and reports `false`.
    #[instrument(skip(self))]
    pub async fn force_stop(&self) -> bool {
        let started = {
            let mut inner = self.lock();
            match inner.state {
                CaptureState::Idle | CaptureState::Stopping => return false,
                CaptureState::Arming => {
                    if let Some(session) = inner.session.take() {
                        session.signal.cancel();
                    }
                    inner.state = CaptureState::Idle;
                    false
                }
                CaptureState::Recording | CaptureState::Cancelling => {
                    let started = inner
                        .session
                        .take()
                        .map(|s| s.started_at.is_some())
                        .unwrap_or(false);
                    inner.state = if started {
                        CaptureState::Stopping
                    } else {
                        CaptureState::Idle
                    };
                    started
                }
            }
        };

        if started {
            if let Err(e) = self.stop_device().await {
                warn!(error = %e, "Device failed to stop during force stop");
            }
        }
        info!(device_was_started = started, "Capture force-stopped");

        true
    }

    /// Stop the device, then leave `Stopping` for `Idle`
    async fn stop_device(&self) -> anyhow::Result<Option<PathBuf>> {
        let _idle = IdleWhenStopped(self);
        self.device.stop().await
    }
}

/// Moves a stopping session to Idle on drop, also when the stop is abandoned
struct IdleWhenStopped<'a>(&'a CaptureSession);

impl Drop for IdleWhenStopped<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.lock();
        if inner.state == CaptureState::Stopping {
            inner.state = CaptureState::Idle;
        }
    }
}
