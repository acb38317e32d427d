//! Progress store abstraction.
//!
//! `ProgressBackend` is the seam between submission logic and the remote
//! data/auth service. `SupabaseBackend` talks to a PostgREST + GoTrue style
//! service over HTTP; `MemoryBackend` keeps everything in-process and is used
//! when no remote is configured (and by tests).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BackendConfig;
use crate::domain::{CaseId, User, UserProgress};
use crate::error::PersistenceError;
use crate::util::trunc_for_log;

#[async_trait]
pub trait ProgressBackend: Send + Sync {
  /// Identity behind `access_token`. `Ok(None)` means anonymous.
  async fn current_user(&self, access_token: Option<&str>) -> Result<Option<User>, PersistenceError>;

  async fn fetch_user_progress(&self, user: &User) -> Result<UserProgress, PersistenceError>;

  /// Add `xp_amount` and store `completed_cases` for the user in one remote call.
  async fn increment_experience(
    &self,
    user: &User,
    xp_amount: u32,
    case_id: &CaseId,
    completed_cases: &[CaseId],
  ) -> Result<(), PersistenceError>;
}

// -------- Remote (Supabase-style REST) --------

#[derive(Clone)]
pub struct SupabaseBackend {
  client: reqwest::Client,
  pub base_url: String,
  anon_key: String,
  pub progress_table: String,
  pub increment_rpc: String,
}

#[derive(Deserialize)]
struct ProgressRow {
  #[serde(default)]
  completed_cases: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct IncrementArgs<'a> {
  user_id: &'a str,
  xp_amount: u32,
  case_id: &'a CaseId,
  cases_array: &'a [CaseId],
}

impl SupabaseBackend {
  /// Build the client when a backend URL and key are configured; otherwise None.
  pub fn from_config(cfg: &BackendConfig) -> Option<Self> {
    let base_url = cfg.url.as_ref()?.trim_end_matches('/').to_string();
    let anon_key = cfg.anon_key.clone()?;
    let client = match reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()
    {
      Ok(c) => c,
      Err(e) => {
        error!(target: "case_desk", error = %e, "Failed to build HTTP client for backend");
        return None;
      }
    };
    Some(Self {
      client,
      base_url,
      anon_key,
      progress_table: cfg.progress_table.clone(),
      increment_rpc: cfg.increment_rpc.clone(),
    })
  }

  fn request(&self, method: reqwest::Method, path: &str, bearer: &str) -> reqwest::RequestBuilder {
    self.client
      .request(method, format!("{}{}", self.base_url, path))
      .header(USER_AGENT, "case-desk/0.1")
      .header("apikey", &self.anon_key)
      .header(AUTHORIZATION, format!("Bearer {}", bearer))
  }

  /// Progress reads and writes run as the user when we have their token.
  fn user_bearer<'a>(&'a self, user: &'a User) -> &'a str {
    user.access_token.as_deref().unwrap_or(&self.anon_key)
  }

  fn progress_request(&self, user: &User) -> reqwest::RequestBuilder {
    let path = format!("/rest/v1/{}", self.progress_table);
    self
      .request(reqwest::Method::GET, &path, self.user_bearer(user))
      .query(&[("id", format!("eq.{}", user.id)), ("select", "completed_cases".to_string())])
      .header(ACCEPT, "application/vnd.pgrst.object+json")
  }

  fn increment_request(
    &self,
    user: &User,
    xp_amount: u32,
    case_id: &CaseId,
    completed_cases: &[CaseId],
  ) -> reqwest::RequestBuilder {
    let path = format!("/rest/v1/rpc/{}", self.increment_rpc);
    let args = IncrementArgs { user_id: &user.id, xp_amount, case_id, cases_array: completed_cases };
    self
      .request(reqwest::Method::POST, &path, self.user_bearer(user))
      .header(CONTENT_TYPE, "application/json")
      .json(&args)
  }

  async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, PersistenceError> {
    let res = req.send().await.map_err(|e| PersistenceError::Transport(e.to_string()))?;
    if res.status().is_success() {
      return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    debug!(target: "case_desk", status, body = %trunc_for_log(&body, 300), "Backend error body");
    Err(PersistenceError::Remote { status, message: extract_remote_error(&body) })
  }
}

#[async_trait]
impl ProgressBackend for SupabaseBackend {
  #[instrument(level = "info", skip(self, access_token), fields(has_token = access_token.is_some()))]
  async fn current_user(&self, access_token: Option<&str>) -> Result<Option<User>, PersistenceError> {
    let Some(token) = access_token else { return Ok(None) };
    let req = self.request(reqwest::Method::GET, "/auth/v1/user", token);
    // An unknown or expired token is treated as "no user", not as a failure.
    match self.send(req).await {
      Ok(res) => match res.json::<User>().await {
        Ok(user) => Ok(Some(User { access_token: Some(token.to_string()), ..user })),
        Err(e) => {
          warn!(target: "case_desk", error = %e, "Unreadable auth user payload; continuing anonymously");
          Ok(None)
        }
      },
      Err(e) => {
        warn!(target: "case_desk", error = %e, "Auth lookup failed; continuing anonymously");
        Ok(None)
      }
    }
  }

  #[instrument(level = "info", skip(self, user), fields(user_id = %user.id))]
  async fn fetch_user_progress(&self, user: &User) -> Result<UserProgress, PersistenceError> {
    let row: ProgressRow = self
      .send(self.progress_request(user))
      .await?
      .json()
      .await
      .map_err(|e| PersistenceError::Decode(e.to_string()))?;
    Ok(progress_from_value(row.completed_cases))
  }

  #[instrument(level = "info", skip(self, user, completed_cases), fields(user_id = %user.id, %case_id, cases = completed_cases.len()))]
  async fn increment_experience(
    &self,
    user: &User,
    xp_amount: u32,
    case_id: &CaseId,
    completed_cases: &[CaseId],
  ) -> Result<(), PersistenceError> {
    self.send(self.increment_request(user, xp_amount, case_id, completed_cases)).await?;
    info!(target: "case_desk", user_id = %user.id, %case_id, xp_amount, "Experience incremented");
    Ok(())
  }
}

/// Anything that is not an array of strings counts as "nothing completed yet".
fn progress_from_value(v: Option<serde_json::Value>) -> UserProgress {
  let completed_cases = match v {
    Some(serde_json::Value::Array(items)) => items
      .into_iter()
      .filter_map(|i| i.as_str().map(CaseId::from))
      .collect(),
    _ => Vec::new(),
  };
  UserProgress { completed_cases }
}

/// Pull a human-readable message out of a PostgREST/GoTrue error body.
fn extract_remote_error(body: &str) -> Option<String> {
  let v: serde_json::Value = serde_json::from_str(body).ok()?;
  ["message", "error_description", "msg", "error"]
    .iter()
    .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
}

// -------- In-memory --------

/// In-process users and progress. Tokens map to user ids.
#[derive(Default)]
pub struct MemoryBackend {
  tokens: RwLock<HashMap<String, User>>,
  progress: RwLock<HashMap<String, (UserProgress, u64)>>,
  failing_fetch: RwLock<Option<PersistenceError>>,
  failing_increment: RwLock<Option<PersistenceError>>,
  user_calls: AtomicUsize,
  fetch_calls: AtomicUsize,
  increment_calls: AtomicUsize,
}

impl MemoryBackend {
  pub fn new() -> Self { Self::default() }

  /// Register a user reachable through `token`, with an empty progress row.
  pub async fn add_user(&self, token: &str, user: User) {
    self.progress.write().await.entry(user.id.clone()).or_default();
    self.tokens.write().await.insert(token.to_string(), user);
  }

  /// Make the next progress fetches fail with `err` (None to clear).
  pub async fn fail_fetch_with(&self, err: Option<PersistenceError>) {
    *self.failing_fetch.write().await = err;
  }

  pub async fn fail_increment_with(&self, err: Option<PersistenceError>) {
    *self.failing_increment.write().await = err;
  }

  pub async fn progress_of(&self, user_id: &str) -> Option<(UserProgress, u64)> {
    self.progress.read().await.get(user_id).cloned()
  }

  /// Total backend calls of any kind.
  pub fn calls(&self) -> usize {
    self.user_calls.load(Ordering::SeqCst) + self.progress_calls()
  }

  /// Calls that touch progress (fetch + increment).
  pub fn progress_calls(&self) -> usize {
    self.fetch_calls.load(Ordering::SeqCst) + self.increment_calls.load(Ordering::SeqCst)
  }

  pub fn increment_calls(&self) -> usize {
    self.increment_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ProgressBackend for MemoryBackend {
  async fn current_user(&self, access_token: Option<&str>) -> Result<Option<User>, PersistenceError> {
    self.user_calls.fetch_add(1, Ordering::SeqCst);
    let Some(token) = access_token else { return Ok(None) };
    let user = self.tokens.read().await.get(token).cloned();
    Ok(user.map(|u| User { access_token: Some(token.to_string()), ..u }))
  }

  async fn fetch_user_progress(&self, user: &User) -> Result<UserProgress, PersistenceError> {
    self.fetch_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(err) = self.failing_fetch.read().await.clone() {
      return Err(err);
    }
    self.progress
      .read()
      .await
      .get(&user.id)
      .map(|(p, _)| p.clone())
      .ok_or_else(|| PersistenceError::NotFound(format!("No progress row for user {}", user.id)))
  }

  async fn increment_experience(
    &self,
    user: &User,
    xp_amount: u32,
    _case_id: &CaseId,
    completed_cases: &[CaseId],
  ) -> Result<(), PersistenceError> {
    self.increment_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(err) = self.failing_increment.read().await.clone() {
      return Err(err);
    }
    let mut progress = self.progress.write().await;
    let entry = progress.entry(user.id.clone()).or_default();
    entry.0.completed_cases = completed_cases.to_vec();
    entry.1 += u64::from(xp_amount);
    Ok(())
  }
}
