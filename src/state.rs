//! Application state: case store, submission sessions and the progress backend.
//!
//! Sessions are one `SubmissionForm` each. A submit holds the session lock only
//! to enter and leave `Submitting`; the remote calls run with the lock released.
//! A session in `Submitting` is never removed (close, eviction, WS release), so
//! every committed progress update reaches the form that started it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{MemoryBackend, ProgressBackend, SupabaseBackend};
use crate::config::{load_app_config_from_env, AppConfig, SessionConfig};
use crate::domain::{Case, CaseId};
use crate::error::SubmitError;
use crate::seeds::seed_cases;
use crate::submission::{Completion, Phase, SubmissionForm, SubmissionView};

/// One open form plus the last time a client acted on it.
#[derive(Debug)]
pub struct Session {
  pub form: SubmissionForm,
  pub touched: Instant,
}

impl Session {
  fn new(form: SubmissionForm) -> Self {
    Self { form, touched: Instant::now() }
  }

  fn touch(&mut self) -> &mut SubmissionForm {
    self.touched = Instant::now();
    &mut self.form
  }

  fn in_flight(&self) -> bool {
    self.form.phase() == Phase::Submitting
  }
}

#[derive(Clone)]
pub struct AppState {
  pub cases: Arc<RwLock<HashMap<CaseId, Arc<Case>>>>,
  pub sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
  pub backend: Arc<dyn ProgressBackend>,
  pub solved_total: Arc<AtomicU64>,
  pub limits: SessionConfig,
}

impl AppState {
  /// Build state from env: load config, pick a backend, index cases.
  #[instrument(level = "info", skip_all)]
  pub fn new() -> Self {
    let cfg = load_app_config_from_env();
    let backend: Arc<dyn ProgressBackend> = match SupabaseBackend::from_config(&cfg.backend) {
      Some(b) => {
        info!(target: "case_desk", base_url = %b.base_url, table = %b.progress_table, rpc = %b.increment_rpc, "Remote progress backend enabled.");
        Arc::new(b)
      }
      None => {
        info!(target: "case_desk", "No backend URL/key configured. Using in-memory progress store.");
        Arc::new(MemoryBackend::new())
      }
    };
    Self::from_config(cfg, backend)
  }

  /// Config cases first; built-in seeds fill in only when the config has none.
  pub fn from_config(cfg: AppConfig, backend: Arc<dyn ProgressBackend>) -> Self {
    let mut cases: Vec<Case> = cfg.cases.into_iter().map(Case::from).collect();
    if cases.is_empty() {
      cases = seed_cases();
    }
    info!(target: "case_desk", cases = cases.len(), max_sessions = cfg.sessions.max_sessions, idle_ttl_secs = cfg.sessions.idle_ttl_secs, "Startup case inventory");
    Self::with_cases(cases, backend).with_limits(cfg.sessions)
  }

  pub fn with_cases(cases: Vec<Case>, backend: Arc<dyn ProgressBackend>) -> Self {
    let by_id = cases.into_iter().map(|c| (c.id.clone(), Arc::new(c))).collect();
    Self {
      cases: Arc::new(RwLock::new(by_id)),
      sessions: Arc::new(RwLock::new(HashMap::new())),
      backend,
      solved_total: Arc::new(AtomicU64::new(0)),
      limits: SessionConfig::default(),
    }
  }

  pub fn with_limits(mut self, limits: SessionConfig) -> Self {
    self.limits = limits;
    self
  }

  pub async fn get_case(&self, id: &CaseId) -> Option<Arc<Case>> {
    self.cases.read().await.get(id).cloned()
  }

  /// All cases ordered by id.
  pub async fn list_cases(&self) -> Vec<Arc<Case>> {
    let mut all: Vec<_> = self.cases.read().await.values().cloned().collect();
    all.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    all
  }

  /// Open a fresh form for `case_id`. None if the case is unknown.
  /// At capacity the least recently touched idle session makes room.
  #[instrument(level = "info", skip(self), fields(%case_id))]
  pub async fn open_session(&self, case_id: &CaseId) -> Option<(Uuid, SubmissionView)> {
    let case = self.get_case(case_id).await?;
    let id = Uuid::new_v4();
    let solved_total = Arc::clone(&self.solved_total);
    let notified_case = case.id.clone();
    let form = SubmissionForm::with_on_solve(
      case,
      Box::new(move || {
        solved_total.fetch_add(1, Ordering::Relaxed);
        info!(target: "submission", session = %id, case_id = %notified_case, "Solved notification");
      }),
    );
    let view = form.view();

    let mut sessions = self.sessions.write().await;
    while sessions.len() >= self.limits.max_sessions {
      let oldest = sessions
        .iter()
        .filter(|(_, s)| !s.in_flight())
        .min_by_key(|(_, s)| s.touched)
        .map(|(sid, _)| *sid);
      let Some(oldest) = oldest else {
        warn!(target: "case_desk", open = sessions.len(), max = self.limits.max_sessions, "Session cap reached with every session in flight");
        break;
      };
      sessions.remove(&oldest);
      debug!(target: "case_desk", session = %oldest, "Evicted least recently used session");
    }
    sessions.insert(id, Session::new(form));
    drop(sessions);

    info!(target: "submission", session = %id, %case_id, "Session opened");
    Some((id, view))
  }

  pub async fn view(&self, session: Uuid) -> Result<SubmissionView, SubmitError> {
    let sessions = self.sessions.read().await;
    sessions.get(&session).map(|s| s.form.view()).ok_or(SubmitError::UnknownSession)
  }

  pub async fn set_answer(&self, session: Uuid, answer: String) -> Result<SubmissionView, SubmitError> {
    let mut sessions = self.sessions.write().await;
    let form = sessions.get_mut(&session).ok_or(SubmitError::UnknownSession)?.touch();
    form.set_answer(answer)?;
    Ok(form.view())
  }

  /// Run one submission for `session`, optionally replacing the answer first.
  #[instrument(level = "info", skip(self, answer, access_token), fields(%session, has_token = access_token.is_some()))]
  pub async fn submit(
    &self,
    session: Uuid,
    answer: Option<String>,
    access_token: Option<&str>,
  ) -> Result<(SubmissionView, Completion), SubmitError> {
    let pending = {
      let mut sessions = self.sessions.write().await;
      let form = sessions.get_mut(&session).ok_or(SubmitError::UnknownSession)?.touch();
      if let Some(a) = answer {
        form.set_answer(a)?;
      }
      form.begin_submit()?
    };

    let result = pending.run(self.backend.as_ref(), access_token).await;

    let mut sessions = self.sessions.write().await;
    let Some(entry) = sessions.get_mut(&session) else {
      // Removal paths skip in-flight sessions; reaching this means the table was cleared externally.
      warn!(target: "submission", %session, ok = result.is_ok(), "Session vanished while its submission was in flight");
      return Err(SubmitError::UnknownSession);
    };
    let form = entry.touch();
    let completion = form.complete(result)?;
    Ok((form.view(), completion))
  }

  pub async fn try_again(&self, session: Uuid) -> Result<SubmissionView, SubmitError> {
    let mut sessions = self.sessions.write().await;
    let form = sessions.get_mut(&session).ok_or(SubmitError::UnknownSession)?.touch();
    form.try_again()?;
    Ok(form.view())
  }

  /// Drop a session. Refused while its submission is in flight.
  pub async fn close_session(&self, session: Uuid) -> Result<(), SubmitError> {
    let mut sessions = self.sessions.write().await;
    let entry = sessions.get(&session).ok_or(SubmitError::UnknownSession)?;
    if entry.in_flight() {
      return Err(SubmitError::NotEditable { phase: Phase::Submitting.name() });
    }
    sessions.remove(&session);
    Ok(())
  }

  /// Drop every listed session that is not in flight. Returns how many went.
  pub async fn close_sessions(&self, ids: &[Uuid]) -> usize {
    let mut sessions = self.sessions.write().await;
    let mut closed = 0;
    for id in ids {
      if matches!(sessions.get(id), Some(s) if !s.in_flight()) {
        sessions.remove(id);
        closed += 1;
      }
    }
    closed
  }

  /// Drop sessions untouched for at least `max_idle`. In-flight sessions stay.
  pub async fn evict_idle(&self, max_idle: Duration) -> usize {
    let now = Instant::now();
    let mut sessions = self.sessions.write().await;
    let before = sessions.len();
    sessions.retain(|_, s| s.in_flight() || now.duration_since(s.touched) < max_idle);
    before - sessions.len()
  }
}

/// Periodically evict idle sessions per `state.limits`.
pub fn spawn_session_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(state.limits.sweep_interval());
    loop {
      interval.tick().await;
      let evicted = state.evict_idle(state.limits.idle_ttl()).await;
      if evicted > 0 {
        info!(target: "case_desk", evicted, "Idle sessions evicted");
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::User;

  fn state_with(backend: Arc<MemoryBackend>) -> AppState {
    AppState::with_cases(seed_cases(), backend)
  }

  #[tokio::test]
  async fn unknown_case_opens_no_session() {
    let state = state_with(Arc::new(MemoryBackend::new()));
    assert!(state.open_session(&CaseId::from("nope")).await.is_none());
  }

  #[tokio::test]
  async fn submit_solves_and_counts_notification() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_user("tok", User::new("u1")).await;
    let state = state_with(Arc::clone(&backend));

    let (id, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    let (view, done) = state.submit(id, Some(" john DOE ".into()), Some("tok")).await.unwrap();
    assert!(matches!(view, SubmissionView::Solved { .. }));
    assert!(done.solved_now);
    assert_eq!(state.solved_total.load(Ordering::Relaxed), 1);
    assert_eq!(backend.progress_of("u1").await.unwrap().1, 50);

    let again = state.submit(id, Some("john doe".into()), Some("tok")).await;
    assert_eq!(again.unwrap_err(), SubmitError::NotEditable { phase: "solved" });
  }

  #[tokio::test]
  async fn session_in_flight_refuses_second_submit() {
    let state = state_with(Arc::new(MemoryBackend::new()));
    let (id, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    state.set_answer(id, "John Doe".into()).await.unwrap();

    let _pending = {
      let mut sessions = state.sessions.write().await;
      sessions.get_mut(&id).unwrap().form.begin_submit().unwrap()
    };
    let err = state.submit(id, None, None).await.unwrap_err();
    assert_eq!(err, SubmitError::NotEditable { phase: "submitting" });
  }

  #[tokio::test]
  async fn try_again_and_close() {
    let state = state_with(Arc::new(MemoryBackend::new()));
    let (id, _) = state.open_session(&CaseId::from("case-002")).await.unwrap();
    let (_, done) = state.submit(id, Some("John Doe".into()), None).await.unwrap();
    assert_eq!(done.phase, Phase::Resolved { correct: false });
    assert!(matches!(state.try_again(id).await.unwrap(), SubmissionView::Editing { answer, .. } if answer == "John Doe"));
    state.close_session(id).await.unwrap();
    assert_eq!(state.view(id).await.unwrap_err(), SubmitError::UnknownSession);
    assert_eq!(state.close_session(id).await.unwrap_err(), SubmitError::UnknownSession);
  }

  #[tokio::test]
  async fn in_flight_session_survives_close_and_eviction() {
    let state = state_with(Arc::new(MemoryBackend::new()));
    let (busy, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    let (idle, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    state.set_answer(busy, "John Doe".into()).await.unwrap();

    let pending = {
      let mut sessions = state.sessions.write().await;
      sessions.get_mut(&busy).unwrap().form.begin_submit().unwrap()
    };
    assert_eq!(state.close_session(busy).await.unwrap_err(), SubmitError::NotEditable { phase: "submitting" });
    assert_eq!(state.close_sessions(&[busy, idle]).await, 1);
    assert_eq!(state.evict_idle(Duration::ZERO).await, 0);

    // the committed outcome still lands on the form
    let result = pending.run(state.backend.as_ref(), None).await;
    let mut sessions = state.sessions.write().await;
    let done = sessions.get_mut(&busy).unwrap().form.complete(result).unwrap();
    assert!(done.solved_now);
  }

  #[tokio::test]
  async fn idle_sessions_are_evicted() {
    let state = state_with(Arc::new(MemoryBackend::new()));
    let (id, _) = state.open_session(&CaseId::from("case-002")).await.unwrap();
    assert_eq!(state.evict_idle(Duration::from_secs(3600)).await, 0);
    assert_eq!(state.evict_idle(Duration::ZERO).await, 1);
    assert_eq!(state.view(id).await.unwrap_err(), SubmitError::UnknownSession);
  }

  #[tokio::test]
  async fn cap_evicts_least_recently_touched() {
    let limits = SessionConfig { max_sessions: 2, ..SessionConfig::default() };
    let state = state_with(Arc::new(MemoryBackend::new())).with_limits(limits);
    let (a, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    let (b, _) = state.open_session(&CaseId::from("case-001")).await.unwrap();
    {
      let mut sessions = state.sessions.write().await;
      let stale = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
      sessions.get_mut(&a).unwrap().touched = stale;
    }
    let (c, _) = state.open_session(&CaseId::from("case-002")).await.unwrap();

    let sessions = state.sessions.read().await;
    assert_eq!(sessions.len(), 2);
    assert!(!sessions.contains_key(&a));
    assert!(sessions.contains_key(&b) && sessions.contains_key(&c));
  }

  #[test]
  fn config_cases_replace_seeds() {
    let cfg = AppConfig::from_toml_str("inline", "[[cases]]\nid = \"only\"\nanswer = \"Ann Lee\"\n").unwrap();
    let state = AppState::from_config(cfg, Arc::new(MemoryBackend::new()));
    assert_eq!(state.limits, SessionConfig::default());
    let cases = state.cases.try_read().unwrap();
    assert_eq!(cases.len(), 1);
    assert!(cases.contains_key(&CaseId::from("only")));
  }
}
