//! Progress update on a correct answer: identity, fetch, conditional increment.

use tracing::{info, instrument};

use crate::backend::ProgressBackend;
use crate::domain::Case;
use crate::error::PersistenceError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SolveOutcome {
  /// No authenticated user; nothing persisted.
  Anonymous,
  /// Case was already in the user's completed set; nothing changed.
  AlreadyCompleted { user_id: String },
  /// Case appended and experience awarded.
  Awarded { user_id: String, xp: u32 },
}

/// Record that the current user solved `case`. Calls run strictly in order;
/// any failure after identity lookup aborts the sequence.
#[instrument(level = "info", skip(backend, case, access_token), fields(case_id = %case.id))]
pub async fn record_solve(
  backend: &dyn ProgressBackend,
  case: &Case,
  access_token: Option<&str>,
) -> Result<SolveOutcome, PersistenceError> {
  let Some(user) = backend.current_user(access_token).await? else {
    info!(target: "submission", case_id = %case.id, "No authenticated user; progress not persisted");
    return Ok(SolveOutcome::Anonymous);
  };

  let mut progress = backend.fetch_user_progress(&user).await?;
  if !progress.mark_completed(&case.id) {
    info!(target: "submission", user_id = %user.id, case_id = %case.id, "Case already completed; no XP awarded");
    return Ok(SolveOutcome::AlreadyCompleted { user_id: user.id });
  }

  backend
    .increment_experience(&user, case.xp_reward, &case.id, &progress.completed_cases)
    .await?;
  info!(target: "submission", user_id = %user.id, case_id = %case.id, xp = case.xp_reward, "Case recorded as completed");
  Ok(SolveOutcome::Awarded { user_id: user.id, xp: case.xp_reward })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MemoryBackend;
  use crate::domain::{CaseId, Solution, User};

  fn case() -> Case {
    Case {
      id: CaseId::from("case-7"),
      title: "The Vanishing Ledger".into(),
      xp_reward: 75,
      solution: Solution { answer: "John Doe".into(), success_message: String::new(), explanation: String::new() },
    }
  }

  async fn backend_with_user() -> MemoryBackend {
    let b = MemoryBackend::new();
    b.add_user("tok", User::new("u1")).await;
    b
  }

  #[tokio::test]
  async fn anonymous_skips_progress_calls() {
    let b = backend_with_user().await;
    let out = record_solve(&b, &case(), None).await.unwrap();
    assert_eq!(out, SolveOutcome::Anonymous);
    assert_eq!(b.progress_calls(), 0);
  }

  #[tokio::test]
  async fn first_solve_awards_once_and_resolve_is_idempotent() {
    let b = backend_with_user().await;
    let out = record_solve(&b, &case(), Some("tok")).await.unwrap();
    assert_eq!(out, SolveOutcome::Awarded { user_id: "u1".into(), xp: 75 });

    let out = record_solve(&b, &case(), Some("tok")).await.unwrap();
    assert_eq!(out, SolveOutcome::AlreadyCompleted { user_id: "u1".into() });

    let (progress, xp) = b.progress_of("u1").await.unwrap();
    assert_eq!(progress.completed_cases, vec![CaseId::from("case-7")]);
    assert_eq!(xp, 75);
    assert_eq!(b.increment_calls(), 1);
  }

  #[tokio::test]
  async fn fetch_failure_aborts_before_increment() {
    let b = backend_with_user().await;
    b.fail_fetch_with(Some(PersistenceError::Transport("connection reset".into()))).await;
    let err = record_solve(&b, &case(), Some("tok")).await.unwrap_err();
    assert_eq!(err.user_message(), "connection reset");
    assert_eq!(b.increment_calls(), 0);
  }

  #[tokio::test]
  async fn increment_failure_is_surfaced() {
    let b = backend_with_user().await;
    b.fail_increment_with(Some(PersistenceError::Remote { status: 500, message: None })).await;
    let err = record_solve(&b, &case(), Some("tok")).await.unwrap_err();
    assert_eq!(err, PersistenceError::Remote { status: 500, message: None });
  }
}
