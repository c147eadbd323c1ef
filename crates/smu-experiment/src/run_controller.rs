//! RunController - exclusive owner of an instrument session and its runs.
//!
//! `start` validates the configuration, checks adapter capabilities and then
//! spawns a driver task that advances the protocol one step at a time. The
//! task holds the session lock for the whole run, so a second `start` cannot
//! reach the instrument.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ start() ┌─────────┐  done   ┌────────────┐       ┌───────────┐
//! │ Idle │────────▶│ Running │────────▶│ Completing │──────▶│ Completed │
//! └──────┘         └────┬────┘         └────────────┘       └───────────┘
//!                   │   │  ▲
//!         pause()   │   │  │ resume()
//!                   ▼   │  │
//!            ┌─────────┐│ ┌────────┐
//!            │ Pausing │┴▶│ Paused │
//!            └─────────┘  └────────┘
//!
//!   Running/Pausing/Paused ──abort()──▶ Aborting ──▶ Aborted
//!   any step error ────────────────────────────────▶ Failed
//! ```
//!
//! Output shutdown (level to 0, output off) runs on every exit path before
//! the terminal state is published. A run whose shutdown fails is `Failed`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = RunController::new(session, EngineSettings::default());
//! let mut live = controller.subscribe();
//!
//! let run_id = controller.start(config)?;
//! while let Ok(record) = live.recv().await {
//!     println!("{} {:?}", record.sequence_index, record.resistance);
//! }
//! let status = controller.wait().await;
//! ```

use crate::buffer::AcquisitionBuffer;
use crate::protocols::{self, Protocol, Recorder, Step, StepContext};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use smu_core::{
    ConflictError, EngineSettings, InstrumentFamily, InstrumentSession, MeasurementRecord,
    SmuError, SmuResult, SourceMeasure, TestKind, TestRunConfig,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Lifecycle state of the current (or last) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Pausing,
    Paused,
    Completing,
    Aborting,
    Completed,
    Aborted,
    Failed,
}

impl RunState {
    /// A run owns the session in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Running
                | RunState::Pausing
                | RunState::Paused
                | RunState::Completing
                | RunState::Aborting
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Aborted | RunState::Failed
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Pausing => "pausing",
            RunState::Paused => "paused",
            RunState::Completing => "completing",
            RunState::Aborting => "aborting",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
            RunState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub records: u64,
    /// Records a complete run produces, when known.
    pub expected: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.expected {
            Some(0) => Some(1.0),
            Some(expected) => Some((self.records as f64 / expected as f64).min(1.0)),
            None => None,
        }
    }
}

/// Descriptive data of a started run, written into export headers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub kind: TestKind,
    pub config: TestRunConfig,
    pub identity: String,
    pub family: InstrumentFamily,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    pub state: RunState,
    pub metadata: Option<RunMetadata>,
    pub progress: Progress,
    /// First error of a failed run.
    pub error: Option<SmuError>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    fn idle() -> Self {
        Self {
            state: RunState::Idle,
            metadata: None,
            progress: Progress::default(),
            error: None,
            finished_at: None,
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.metadata.as_ref().map(|m| m.run_id)
    }
}

/// Everything needed to persist a finished (or in-progress) run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub state: RunState,
    pub error: Option<SmuError>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records: Vec<MeasurementRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Abort,
}

enum Outcome {
    Completed,
    Aborted,
    Failed(SmuError),
}

struct ActiveRun {
    control: watch::Sender<Control>,
    pausable: bool,
    kind: TestKind,
    task: JoinHandle<()>,
}

pub struct RunController {
    session: Arc<tokio::sync::Mutex<InstrumentSession>>,
    identity: String,
    family: InstrumentFamily,
    settings: EngineSettings,
    buffer: Arc<AcquisitionBuffer>,
    status: Arc<watch::Sender<RunStatus>>,
    active: Mutex<Option<ActiveRun>>,
}

impl RunController {
    pub fn new(session: InstrumentSession, settings: EngineSettings) -> Self {
        let identity = session.identity().to_string();
        let family = session.family();
        let buffer = Arc::new(AcquisitionBuffer::new(settings.record_channel_capacity));
        let (status, _) = watch::channel(RunStatus::idle());
        Self {
            session: Arc::new(tokio::sync::Mutex::new(session)),
            identity,
            family,
            settings,
            buffer,
            status: Arc::new(status),
            active: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn family(&self) -> InstrumentFamily {
        self.family
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate `config` and start it in the background.
    ///
    /// # Errors
    /// - `Configuration` for invalid parameters
    /// - `Conflict` while another run is active
    /// - `Instrument(Unsupported)` when the adapter lacks a capability the
    ///   run needs
    ///
    /// None of these issue a hardware command.
    #[instrument(skip(self, config), fields(kind = %config.kind()), err)]
    pub fn start(&self, config: TestRunConfig) -> SmuResult<Uuid> {
        config.validate(&self.settings.limits)?;

        let mut active = self.active.lock();
        {
            let current = self.status.borrow();
            if current.state.is_active() {
                let active_run = current
                    .run_id()
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                return Err(ConflictError::RunActive { active_run }.into());
            }
        }
        let mut session = self
            .session
            .clone()
            .try_lock_owned()
            .map_err(|_| ConflictError::RunActive {
                active_run: "instrument session in use".to_string(),
            })?;

        let protocol = protocols::build(&config)?;
        protocol.preflight(session.driver_mut())?;
        self.buffer.begin_run()?;

        let run_id = Uuid::new_v4();
        let kind = config.kind();
        let metadata = RunMetadata {
            run_id,
            kind,
            config,
            identity: self.identity.clone(),
            family: self.family,
            started_at: Utc::now(),
        };
        let expected = protocol.expected_records();
        let pausable = protocol.pausable();
        self.status.send_modify(|status| {
            *status = RunStatus {
                state: RunState::Running,
                metadata: Some(metadata),
                progress: Progress {
                    records: 0,
                    expected,
                },
                error: None,
                finished_at: None,
            }
        });

        let (control, control_rx) = watch::channel(Control::Run);
        let recorder = Recorder::new(self.buffer.clone(), Instant::now());
        let task = tokio::spawn(
            drive(
                protocol,
                session,
                recorder,
                self.buffer.clone(),
                self.status.clone(),
                control_rx,
            )
            .instrument(info_span!("run", %run_id, %kind)),
        );
        *active = Some(ActiveRun {
            control,
            pausable,
            kind,
            task,
        });

        info!(%run_id, ?expected, "run started");
        Ok(run_id)
    }

    /// Request an abort. No-op unless a run is running or paused.
    #[instrument(skip(self))]
    pub fn abort(&self) {
        let active = self.active.lock();
        let Some(run) = active.as_ref() else {
            return;
        };
        let requested = self.status.send_if_modified(|status| {
            if matches!(
                status.state,
                RunState::Running | RunState::Pausing | RunState::Paused
            ) {
                status.state = RunState::Aborting;
                true
            } else {
                false
            }
        });
        if requested {
            run.control.send_replace(Control::Abort);
            info!("abort requested");
        }
    }

    /// Pause at the next step boundary.
    ///
    /// Only step-count protocols (sweep, IV loop, endurance) can pause.
    #[instrument(skip(self), err)]
    pub fn pause(&self) -> SmuResult<()> {
        let active = self.active.lock();
        let Some(run) = active.as_ref() else {
            return Err(SmuError::InvalidState("no run to pause".to_string()));
        };
        if !run.pausable {
            return Err(SmuError::InvalidState(format!(
                "{} runs cannot be paused",
                run.kind
            )));
        }

        let mut rejected = None;
        let requested = self.status.send_if_modified(|status| match status.state {
            RunState::Running => {
                status.state = RunState::Pausing;
                true
            }
            RunState::Pausing | RunState::Paused => false,
            other => {
                rejected = Some(other);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(SmuError::InvalidState(format!(
                "cannot pause a run that is {state}"
            )));
        }
        if requested {
            run.control.send_replace(Control::Pause);
            info!("pause requested");
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub fn resume(&self) -> SmuResult<()> {
        let active = self.active.lock();
        let Some(run) = active.as_ref() else {
            return Err(SmuError::InvalidState("no run to resume".to_string()));
        };

        let mut rejected = None;
        self.status.send_if_modified(|status| match status.state {
            RunState::Pausing | RunState::Paused => {
                status.state = RunState::Running;
                true
            }
            other => {
                rejected = Some(other);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(SmuError::InvalidState(format!(
                "cannot resume a run that is {state}"
            )));
        }
        run.control.send_replace(Control::Run);
        info!("run resumed");
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        self.status.borrow().clone()
    }

    /// Status updates, for display loops.
    pub fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Wait until no run is active and return the final status.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.status.subscribe();
        let finished = match rx.wait_for(|status| !status.state.is_active()).await {
            Ok(status) => Some(status.clone()),
            Err(_) => None,
        };
        finished.unwrap_or_else(|| self.status())
    }

    pub fn snapshot(&self) -> Vec<MeasurementRecord> {
        self.buffer.snapshot()
    }

    /// Discard the records of the last run. Refused until the run's terminal
    /// state is published.
    pub fn clear(&self) -> Result<(), ConflictError> {
        // Holding the status borrow keeps the driver out of its final publish.
        let status = self.status.borrow();
        if status.state.is_active() {
            return Err(ConflictError::BufferInUse);
        }
        self.buffer.clear()
    }

    /// Live feed of records as they are appended.
    pub fn subscribe(&self) -> broadcast::Receiver<MeasurementRecord> {
        self.buffer.subscribe()
    }

    /// Metadata, state and records of the current or last run.
    pub fn report(&self) -> Option<RunReport> {
        let status = self.status();
        let metadata = status.metadata?;
        Some(RunReport {
            metadata,
            state: status.state,
            error: status.error,
            finished_at: status.finished_at,
            records: self.buffer.snapshot(),
        })
    }

    /// Abort any active run, wait for it to finish and close the session
    /// with the output off.
    #[instrument(skip(self), err)]
    pub async fn disconnect(self) -> SmuResult<()> {
        self.abort();
        self.wait().await;
        let run = self.active.lock().take();
        if let Some(run) = run {
            if let Err(err) = run.task.await {
                warn!(error = %err, "run task ended abnormally");
            }
        }

        let session = Arc::try_unwrap(self.session)
            .map_err(|_| SmuError::InvalidState("instrument session still in use".to_string()))?
            .into_inner();
        session.disconnect().await?;
        Ok(())
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("identity", &self.identity)
            .field("state", &self.status.borrow().state)
            .field("records", &self.buffer.len())
            .finish()
    }
}

/// Driver task: run the protocol to an outcome, shut the output down, then
/// publish the terminal state.
async fn drive(
    mut protocol: Box<dyn Protocol>,
    mut session: OwnedMutexGuard<InstrumentSession>,
    mut recorder: Recorder,
    buffer: Arc<AcquisitionBuffer>,
    status: Arc<watch::Sender<RunStatus>>,
    mut control: watch::Receiver<Control>,
) {
    let outcome = execute(
        protocol.as_mut(),
        session.driver_mut(),
        &mut recorder,
        &status,
        &mut control,
    )
    .await;

    match &outcome {
        Outcome::Completed => status.send_modify(|s| s.state = RunState::Completing),
        Outcome::Aborted => info!(records = recorder.count(), "run aborted"),
        Outcome::Failed(err) => error!(error = %err, records = recorder.count(), "run failed"),
    }

    let shutdown = session.driver_mut().safe_shutdown().await;
    drop(session);

    let (state, failure) = match (outcome, shutdown) {
        (Outcome::Failed(err), Err(shutdown_err)) => {
            warn!(error = %shutdown_err, "output shutdown after failure also failed");
            (RunState::Failed, Some(err))
        }
        (Outcome::Failed(err), Ok(())) => (RunState::Failed, Some(err)),
        (_, Err(shutdown_err)) => {
            error!(error = %shutdown_err, "output shutdown failed");
            (RunState::Failed, Some(shutdown_err.into()))
        }
        (Outcome::Completed, Ok(())) => (RunState::Completed, None),
        (Outcome::Aborted, Ok(())) => (RunState::Aborted, None),
    };

    let records = recorder.count();
    status.send_modify(|s| {
        s.state = state;
        s.error = failure;
        s.progress.records = records;
        s.finished_at = Some(Utc::now());
        // Released inside the publish: whoever sees the terminal state finds
        // the buffer free, and nobody finds it free any earlier.
        buffer.end_run();
    });
    info!(%state, records, "run finished");
}

async fn execute(
    protocol: &mut dyn Protocol,
    smu: &mut dyn SourceMeasure,
    recorder: &mut Recorder,
    status: &watch::Sender<RunStatus>,
    control: &mut watch::Receiver<Control>,
) -> Outcome {
    loop {
        if checkpoint(control, status).await == Control::Abort {
            return Outcome::Aborted;
        }

        let step = {
            let mut ctx = StepContext::new(&mut *smu, &mut *recorder);
            protocol.step(&mut ctx).await
        };
        let records = recorder.count();
        status.send_modify(|s| s.progress.records = records);

        match step {
            Ok(Step::Continue) => {}
            Ok(Step::SleepUntil(deadline)) => {
                if sleep_until(deadline, control).await == Control::Abort {
                    return Outcome::Aborted;
                }
            }
            Ok(Step::Done) => return Outcome::Completed,
            Err(err) => return Outcome::Failed(err),
        }
    }
}

/// Step boundary. Returns the control in force once any pause has ended.
async fn checkpoint(
    control: &mut watch::Receiver<Control>,
    status: &watch::Sender<RunStatus>,
) -> Control {
    // Controller dropped.
    if control.has_changed().is_err() {
        return Control::Abort;
    }
    let requested = *control.borrow_and_update();
    if requested != Control::Pause {
        return requested;
    }

    status.send_modify(|s| {
        if s.state == RunState::Pausing {
            s.state = RunState::Paused;
        }
    });
    info!("run paused");

    loop {
        if control.changed().await.is_err() {
            return Control::Abort;
        }
        let next = *control.borrow_and_update();
        if next != Control::Pause {
            return next;
        }
    }
}

/// Inter-sample wait, cut short by abort.
async fn sleep_until(deadline: Instant, control: &mut watch::Receiver<Control>) -> Control {
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Control::Run,
            changed = control.changed() => {
                if changed.is_err() {
                    return Control::Abort;
                }
                if *control.borrow_and_update() == Control::Abort {
                    return Control::Abort;
                }
            }
        }
    }
}
