// Booking wizard
// Gated linear flow Selection -> Details -> AddOns -> Payment -> Confirmed,
// with Abandoned as the cancellation terminal.

use std::{fmt, sync::Arc};

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    client::{BookingApi, BookingSubmission, Confirmation, SubmissionError},
    draft::{BookingDraft, DraftPatch},
    store::{DraftStore, StoreError},
    validation::{validate_step, FieldError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WizardStep {
    Selection,
    Details,
    AddOns,
    Payment,
}

impl WizardStep {
    pub const ALL: [WizardStep; 4] = [
        WizardStep::Selection,
        WizardStep::Details,
        WizardStep::AddOns,
        WizardStep::Payment,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardStep::Selection => "selection",
            WizardStep::Details => "details",
            WizardStep::AddOns => "add-ons",
            WizardStep::Payment => "payment",
        };
        f.write_str(name)
    }
}

/// Per-step completion flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletedSteps(u8);

impl CompletedSteps {
    pub fn insert(&mut self, step: WizardStep) {
        self.0 |= 1 << step.index();
    }

    pub fn contains(&self, step: WizardStep) -> bool {
        self.0 & (1 << step.index()) != 0
    }

    // Every step ahead of `step`
    pub fn before(step: WizardStep) -> Self {
        Self((1 << step.index()) - 1)
    }

    // Forget `step` and everything after it
    pub fn truncate(&mut self, step: WizardStep) {
        self.0 &= (1 << step.index()) - 1;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn steps(&self) -> Vec<WizardStep> {
        WizardStep::ALL
            .into_iter()
            .filter(|s| self.contains(*s))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardState {
    InProgress {
        step: WizardStep,
        completed: CompletedSteps,
    },
    Confirmed(Confirmation),
    Abandoned,
}

impl WizardState {
    fn initial() -> Self {
        WizardState::InProgress {
            step: WizardStep::Selection,
            completed: CompletedSteps::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WizardState::InProgress { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            WizardState::InProgress { .. } => "in-progress",
            WizardState::Confirmed(_) => "confirmed",
            WizardState::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Moved(WizardStep),
    Confirmed(Confirmation),
    // A submission is already running; nothing happened
    InFlight,
    // The session was reset or cancelled while submitting, response dropped
    Ignored,
}

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("Validation failed at {step}: {} field error(s)", .errors.len())]
    Validation {
        step: WizardStep,
        errors: Vec<FieldError>,
    },

    #[error("Submission failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Wizard is {0}")]
    Terminal(&'static str),

    #[error("Draft store error: {0}")]
    Store(#[from] StoreError),
}

impl WizardError {
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            WizardError::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

// First step, in flow order, whose slice of the draft fails validation
fn first_invalid_step(draft: &BookingDraft, today: NaiveDate) -> Option<(WizardStep, Vec<FieldError>)> {
    WizardStep::ALL.into_iter().find_map(|step| {
        let errors = validate_step(draft.slice(step), today);
        (!errors.is_empty()).then_some((step, errors))
    })
}

pub trait Clock: Send + Sync + 'static {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

struct Session {
    draft: BookingDraft,
    state: WizardState,
    last_error: Option<SubmissionError>,
    // Bumped on reset/cancel so late responses can be recognized
    epoch: u64,
    in_flight: Option<u64>,
}

impl Session {
    fn fresh(epoch: u64) -> Self {
        Self {
            draft: BookingDraft::new(),
            state: WizardState::initial(),
            last_error: None,
            epoch,
            in_flight: None,
        }
    }

    fn in_progress(&self) -> Result<(WizardStep, CompletedSteps), WizardError> {
        match self.state {
            WizardState::InProgress { step, completed } => Ok((step, completed)),
            _ => Err(WizardError::Terminal(self.state.name())),
        }
    }

    fn is_submitting(&self) -> bool {
        self.in_flight == Some(self.epoch)
    }
}

struct Persistence {
    store: Arc<dyn DraftStore>,
    session_id: String,
}

/// One booking session. Collaborators are injected; the wizard owns its draft.
pub struct BookingWizard {
    client: Arc<dyn BookingApi>,
    clock: Arc<dyn Clock>,
    persistence: Option<Persistence>,
    session: Mutex<Session>,
}

impl BookingWizard {
    pub fn new(client: Arc<dyn BookingApi>) -> Self {
        Self {
            client,
            clock: Arc::new(SystemClock),
            persistence: None,
            session: Mutex::new(Session::fresh(0)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist the draft under `session_id`. A snapshot already stored for the
    /// session is restored and the wizard resumes at the first invalid step.
    pub fn with_store(
        mut self,
        store: Arc<dyn DraftStore>,
        session_id: impl Into<String>,
    ) -> Result<Self, WizardError> {
        let session_id = session_id.into();

        if let Some(draft) = store.load(&session_id)? {
            let step = first_invalid_step(&draft, self.clock.today())
                .map_or(WizardStep::Payment, |(step, _)| step);
            let completed = CompletedSteps::before(step);

            debug!(session_id = %session_id, %step, "resumed booking draft");
            let session = self.session.get_mut();
            session.draft = draft;
            session.state = WizardState::InProgress { step, completed };
        }

        self.persistence = Some(Persistence { store, session_id });
        Ok(self)
    }

    fn persist(&self, draft: &BookingDraft) {
        if let Some(p) = &self.persistence {
            if let Err(e) = p.store.save(&p.session_id, draft) {
                warn!(session_id = %p.session_id, error = %e, "could not persist draft");
            }
        }
    }

    fn discard_snapshot(&self) {
        if let Some(p) = &self.persistence {
            p.store.discard(&p.session_id);
        }
    }

    pub fn state(&self) -> WizardState {
        self.session.lock().state.clone()
    }

    pub fn current_step(&self) -> Option<WizardStep> {
        match self.session.lock().state {
            WizardState::InProgress { step, .. } => Some(step),
            _ => None,
        }
    }

    pub fn draft(&self) -> BookingDraft {
        self.session.lock().draft.clone()
    }

    pub fn booking_id(&self) -> Option<String> {
        match &self.session.lock().state {
            WizardState::Confirmed(c) => Some(c.booking_id.clone()),
            _ => None,
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.session.lock().is_submitting()
    }

    pub fn last_submission_error(&self) -> Option<SubmissionError> {
        self.session.lock().last_error.clone()
    }

    /// Field errors for the active step, empty once the wizard is terminal.
    pub fn validate_current(&self) -> Vec<FieldError> {
        let session = self.session.lock();
        match session.state {
            WizardState::InProgress { step, .. } => {
                validate_step(session.draft.slice(step), self.clock.today())
            }
            _ => vec![],
        }
    }

    pub async fn advance(&self) -> Result<Advance, WizardError> {
        let (submission, epoch) = {
            let mut session = self.session.lock();

            if session.is_submitting() {
                return Ok(Advance::InFlight);
            }

            let (step, mut completed) = session.in_progress()?;
            let today = self.clock.today();

            let errors = validate_step(session.draft.slice(step), today);
            if !errors.is_empty() {
                debug!(%step, errors = errors.len(), "step validation failed");
                return Err(WizardError::Validation { step, errors });
            }

            if let Some(next) = step.next() {
                completed.insert(step);
                session.state = WizardState::InProgress {
                    step: next,
                    completed,
                };
                debug!(from = %step, to = %next, "advanced booking step");
                self.persist(&session.draft);
                return Ok(Advance::Moved(next));
            }

            // Earlier steps may have been edited after they were completed
            if let Some((failed, errors)) = first_invalid_step(&session.draft, today) {
                completed.truncate(failed);
                session.state = WizardState::InProgress {
                    step: failed,
                    completed,
                };
                debug!(from = %step, to = %failed, errors = errors.len(), "draft invalid before submission");
                return Err(WizardError::Validation {
                    step: failed,
                    errors,
                });
            }

            let submission = BookingSubmission::from_draft(&session.draft)?;
            session.in_flight = Some(session.epoch);
            (submission, session.epoch)
        };

        let result = self.client.submit(&submission).await;

        let mut session = self.session.lock();
        if session.in_flight == Some(epoch) {
            session.in_flight = None;
        }

        if session.epoch != epoch {
            debug!(key = %submission.idempotency_key, "dropping response for a discarded session");
            return Ok(Advance::Ignored);
        }

        match result {
            Ok(confirmation) => {
                info!(booking_id = %confirmation.booking_id, "booking wizard confirmed");
                session.state = WizardState::Confirmed(confirmation.clone());
                session.last_error = None;
                self.discard_snapshot();
                Ok(Advance::Confirmed(confirmation))
            }
            Err(err) => {
                warn!(error = %err, "booking submission failed, staying on payment");
                session.last_error = Some(err.clone());
                Err(WizardError::Submission(err))
            }
        }
    }

    pub fn retreat(&self) -> Result<WizardStep, WizardError> {
        let mut session = self.session.lock();
        let (step, completed) = session.in_progress()?;

        let target = step.previous().unwrap_or(step);
        session.state = WizardState::InProgress {
            step: target,
            completed,
        };
        debug!(from = %step, to = %target, "retreated booking step");
        Ok(target)
    }

    pub fn update_draft(&self, patch: DraftPatch) -> Result<(), WizardError> {
        let mut session = self.session.lock();
        session.in_progress()?;

        session.draft.merge(patch);
        self.persist(&session.draft);
        Ok(())
    }

    // Treat the booking as one-way rather than an unfinished round trip
    pub fn skip_return(&self) -> Result<(), WizardError> {
        let mut session = self.session.lock();
        session.in_progress()?;

        session.draft.skip_return();
        self.persist(&session.draft);
        Ok(())
    }

    pub fn reset(&self) {
        let mut session = self.session.lock();
        let epoch = session.epoch + 1;
        *session = Session::fresh(epoch);
        self.discard_snapshot();
        debug!(epoch, "booking wizard reset");
    }

    pub fn cancel(&self) -> Result<(), WizardError> {
        let mut session = self.session.lock();
        if let WizardState::Confirmed(_) = session.state {
            return Err(WizardError::Terminal(session.state.name()));
        }

        let epoch = session.epoch + 1;
        *session = Session::fresh(epoch);
        session.state = WizardState::Abandoned;
        self.discard_snapshot();
        debug!(epoch, "booking wizard abandoned");
        Ok(())
    }
}
