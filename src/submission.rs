//! The answer submission form as a state machine.
//!
//! ```text
//! Editing --begin_submit--> Submitting --complete--> Resolved{correct}
//!    ^                          |                          |
//!    +---- validation/persistence error                    |
//!    +---------------------- try_again (incorrect only) ---+
//! ```
//!
//! Submission is split in three steps (`begin_submit`, `PendingSubmission::run`,
//! `complete`) so a caller holding the form behind a lock can release it while
//! the remote calls are in flight. The `Submitting` phase is what keeps a
//! second submission from starting meanwhile.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::backend::ProgressBackend;
use crate::domain::{Case, CaseId};
use crate::error::{PersistenceError, SubmitError, ValidationError};
use crate::progress::{record_solve, SolveOutcome};
use crate::validation::{answers_match, validate};

pub const SOLVED_TITLE: &str = "Case Solved!";
pub const INCORRECT_TITLE: &str = "Not Quite Right";
pub const INCORRECT_MESSAGE: &str = "Try again with a different answer.";
pub const ACCOUNT_NOTE: &str = "Note: You need an account to gain the XP reward for this case.";

/// Fired once, on the first transition into the solved state.
pub type OnSolve = Box<dyn FnOnce() + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
  Editing,
  Submitting,
  Resolved { correct: bool },
}

impl Phase {
  pub fn name(&self) -> &'static str {
    match self {
      Phase::Editing => "editing",
      Phase::Submitting => "submitting",
      Phase::Resolved { correct: true } => "solved",
      Phase::Resolved { correct: false } => "incorrect",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// Outcome of one submission attempt, before it is applied to the form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
  Rejected(ValidationError),
  Incorrect,
  Correct(SolveOutcome),
}

/// Snapshot handed out by `begin_submit`; owns everything the attempt needs.
pub struct PendingSubmission {
  case: Arc<Case>,
  answer: String,
}

impl PendingSubmission {
  /// Validate, compare and, when correct, persist progress.
  /// Validation failures never reach the backend.
  #[instrument(level = "info", skip_all, fields(case_id = %self.case.id, answer_len = self.answer.len()))]
  pub async fn run(
    self,
    backend: &dyn ProgressBackend,
    access_token: Option<&str>,
  ) -> Result<Verdict, PersistenceError> {
    let normalized = match validate(&self.answer) {
      Ok(n) => n,
      Err(e) => {
        debug!(target: "submission", case_id = %self.case.id, error = ?e, "Answer rejected by validation");
        return Ok(Verdict::Rejected(e));
      }
    };
    if !answers_match(&normalized, &self.case.solution.answer) {
      return Ok(Verdict::Incorrect);
    }
    let outcome = record_solve(backend, &self.case, access_token).await?;
    Ok(Verdict::Correct(outcome))
  }
}

/// What `complete` did to the form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
  pub case_id: CaseId,
  pub phase: Phase,
  /// True only on the call where the on-solve notification fired.
  pub solved_now: bool,
}

/// Render-ready description of the form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionView {
  Editing {
    answer: String,
    error: Option<String>,
    disabled: bool,
  },
  Submitting {
    answer: String,
    disabled: bool,
  },
  Solved {
    title: &'static str,
    #[serde(rename = "successMessage")]
    success_message: String,
    explanation: String,
    note: &'static str,
  },
  Incorrect {
    title: &'static str,
    message: &'static str,
  },
}

pub struct SubmissionForm {
  case: Arc<Case>,
  answer: String,
  phase: Phase,
  error: Option<String>,
  on_solve: Option<OnSolve>,
}

impl fmt::Debug for SubmissionForm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubmissionForm")
      .field("case_id", &self.case.id)
      .field("answer_len", &self.answer.len())
      .field("phase", &self.phase)
      .field("error", &self.error)
      .field("on_solve_pending", &self.on_solve.is_some())
      .finish()
  }
}

impl SubmissionForm {
  pub fn new(case: Arc<Case>) -> Self {
    Self { case, answer: String::new(), phase: Phase::Editing, error: None, on_solve: None }
  }

  pub fn with_on_solve(case: Arc<Case>, on_solve: OnSolve) -> Self {
    Self { on_solve: Some(on_solve), ..Self::new(case) }
  }

  pub fn case_id(&self) -> &CaseId { &self.case.id }
  pub fn phase(&self) -> Phase { self.phase }
  pub fn answer(&self) -> &str { &self.answer }
  pub fn error(&self) -> Option<&str> { self.error.as_deref() }

  fn not_editable(&self) -> SubmitError {
    SubmitError::NotEditable { phase: self.phase.name() }
  }

  /// Replace the answer text. Input is disabled outside `Editing`.
  pub fn set_answer(&mut self, answer: impl Into<String>) -> Result<(), SubmitError> {
    if self.phase != Phase::Editing {
      return Err(self.not_editable());
    }
    self.answer = answer.into();
    Ok(())
  }

  /// Enter `Submitting`. Fails if an attempt is already in flight or resolved.
  pub fn begin_submit(&mut self) -> Result<PendingSubmission, SubmitError> {
    if self.phase != Phase::Editing {
      return Err(self.not_editable());
    }
    self.phase = Phase::Submitting;
    self.error = None;
    Ok(PendingSubmission { case: Arc::clone(&self.case), answer: self.answer.clone() })
  }

  /// Apply an attempt's result. Errors send the form back to `Editing` with text.
  pub fn complete(&mut self, result: Result<Verdict, PersistenceError>) -> Result<Completion, SubmitError> {
    if self.phase != Phase::Submitting {
      return Err(self.not_editable());
    }
    let mut solved_now = false;
    match result {
      Ok(Verdict::Rejected(e)) => {
        self.phase = Phase::Editing;
        self.error = Some(e.to_string());
      }
      Ok(Verdict::Incorrect) => {
        self.phase = Phase::Resolved { correct: false };
        info!(target: "submission", case_id = %self.case.id, "Incorrect answer");
      }
      Ok(Verdict::Correct(outcome)) => {
        self.phase = Phase::Resolved { correct: true };
        info!(target: "submission", case_id = %self.case.id, ?outcome, "Case solved");
        if let Some(notify) = self.on_solve.take() {
          notify();
        }
        solved_now = true;
      }
      Err(e) => {
        warn!(target: "submission", case_id = %self.case.id, error = %e, "Error updating solved cases");
        self.phase = Phase::Editing;
        self.error = Some(e.user_message());
      }
    }
    Ok(Completion { case_id: self.case.id.clone(), phase: self.phase, solved_now })
  }

  /// Full attempt for callers that hold the form exclusively.
  pub async fn submit(
    &mut self,
    backend: &dyn ProgressBackend,
    access_token: Option<&str>,
  ) -> Result<Completion, SubmitError> {
    let pending = self.begin_submit()?;
    let result = pending.run(backend, access_token).await;
    self.complete(result)
  }

  /// Leave the incorrect result and edit again; the answer text is kept.
  pub fn try_again(&mut self) -> Result<(), SubmitError> {
    if self.phase != (Phase::Resolved { correct: false }) {
      return Err(self.not_editable());
    }
    self.phase = Phase::Editing;
    self.error = None;
    Ok(())
  }

  pub fn view(&self) -> SubmissionView {
    match self.phase {
      Phase::Editing => SubmissionView::Editing {
        answer: self.answer.clone(),
        error: self.error.clone(),
        disabled: false,
      },
      Phase::Submitting => SubmissionView::Submitting { answer: self.answer.clone(), disabled: true },
      Phase::Resolved { correct: true } => SubmissionView::Solved {
        title: SOLVED_TITLE,
        success_message: self.case.solution.success_message.clone(),
        explanation: self.case.solution.explanation.clone(),
        note: ACCOUNT_NOTE,
      },
      Phase::Resolved { correct: false } => SubmissionView::Incorrect {
        title: INCORRECT_TITLE,
        message: INCORRECT_MESSAGE,
      },
    }
  }
}
