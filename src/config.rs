//! Service configuration loaded from TOML, with environment overrides.
//!
//! Expected schema:
//!
//! ```toml
//! [backend]
//! url = "https://xyz.supabase.co"
//! anon_key = "..."
//! timeout_secs = 20
//! progress_table = "user_info"
//! increment_rpc = "increment_user_xp"
//!
//! [sessions]
//! idle_ttl_secs = 1800
//! max_sessions = 10000
//! sweep_interval_secs = 60
//!
//! [[cases]]
//! id = "case-001"
//! title = "The Missing Ledger"
//! xp_reward = 50
//! answer = "John Doe"
//! success_message = "..."
//! explanation = "..."
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{Case, CaseId, Solution};
use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub sessions: SessionConfig,
  #[serde(default)]
  pub cases: Vec<CaseCfg>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BackendConfig {
  #[serde(default)] pub url: Option<String>,
  #[serde(default)] pub anon_key: Option<String>,
  #[serde(default = "default_timeout_secs")] pub timeout_secs: u64,
  #[serde(default = "default_progress_table")] pub progress_table: String,
  #[serde(default = "default_increment_rpc")] pub increment_rpc: String,
}

fn default_timeout_secs() -> u64 { 20 }
fn default_progress_table() -> String { "user_info".into() }
fn default_increment_rpc() -> String { "increment_user_xp".into() }

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: None,
      anon_key: None,
      timeout_secs: default_timeout_secs(),
      progress_table: default_progress_table(),
      increment_rpc: default_increment_rpc(),
    }
  }
}

/// Bounds on the in-memory session table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
  /// Sessions untouched for this long are evicted by the sweeper.
  #[serde(default = "default_idle_ttl_secs")] pub idle_ttl_secs: u64,
  /// Opening past this count evicts the least recently touched session first.
  #[serde(default = "default_max_sessions")] pub max_sessions: usize,
  #[serde(default = "default_sweep_interval_secs")] pub sweep_interval_secs: u64,
}

fn default_idle_ttl_secs() -> u64 { 30 * 60 }
fn default_max_sessions() -> usize { 10_000 }
fn default_sweep_interval_secs() -> u64 { 60 }

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      idle_ttl_secs: default_idle_ttl_secs(),
      max_sessions: default_max_sessions(),
      sweep_interval_secs: default_sweep_interval_secs(),
    }
  }
}

impl SessionConfig {
  pub fn idle_ttl(&self) -> Duration { Duration::from_secs(self.idle_ttl_secs) }
  pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }
}

/// Case entry accepted in TOML (flat; the solution fields sit beside the id).
#[derive(Clone, Debug, Deserialize)]
pub struct CaseCfg {
  pub id: String,
  #[serde(default)] pub title: String,
  #[serde(default)] pub xp_reward: u32,
  pub answer: String,
  #[serde(default)] pub success_message: String,
  #[serde(default)] pub explanation: String,
}

impl From<CaseCfg> for Case {
  fn from(c: CaseCfg) -> Self {
    Case {
      id: CaseId(c.id),
      title: c.title,
      xp_reward: c.xp_reward,
      solution: Solution {
        answer: c.answer,
        success_message: c.success_message,
        explanation: c.explanation,
      },
    }
  }
}

impl AppConfig {
  pub fn from_toml_str(path: &str, s: &str) -> Result<Self, ConfigError> {
    toml::from_str(s).map_err(|source| ConfigError::Parse { path: path.to_string(), source })
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let s = std::fs::read_to_string(path)
      .map_err(|source| ConfigError::Read { path: display.clone(), source })?;
    Self::from_toml_str(&display, &s)
  }

  /// `SUPABASE_URL` / `SUPABASE_ANON_KEY` win over the file.
  pub fn apply_env_overrides(&mut self) {
    if let Ok(url) = std::env::var("SUPABASE_URL") {
      self.backend.url = Some(url);
    }
    if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
      self.backend.anon_key = Some(key);
    }
  }
}

/// Load from APP_CONFIG_PATH (if set) then apply env overrides.
/// Read/parse errors are logged and defaults are used.
pub fn load_app_config_from_env() -> AppConfig {
  let mut cfg = match std::env::var("APP_CONFIG_PATH") {
    Ok(path) => match AppConfig::load(&path) {
      Ok(cfg) => {
        info!(target: "case_desk", %path, cases = cfg.cases.len(), "Loaded app config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "case_desk", %path, error = %e, "Failed to load config; using defaults");
        AppConfig::default()
      }
    },
    Err(_) => AppConfig::default(),
  };
  cfg.apply_env_overrides();
  cfg
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_backend_and_cases() {
    let cfg = AppConfig::from_toml_str(
      "inline",
      r#"
        [backend]
        url = "https://x.supabase.co"
        anon_key = "k"

        [[cases]]
        id = "case-001"
        title = "The Missing Ledger"
        xp_reward = 50
        answer = "John Doe"
      "#,
    )
    .unwrap();
    assert_eq!(cfg.backend.url.as_deref(), Some("https://x.supabase.co"));
    assert_eq!(cfg.backend.timeout_secs, 20);
    assert_eq!(cfg.backend.increment_rpc, "increment_user_xp");
    let case: Case = cfg.cases[0].clone().into();
    assert_eq!(case.id, CaseId::from("case-001"));
    assert_eq!(case.solution.answer, "John Doe");
    assert_eq!(case.xp_reward, 50);
  }

  #[test]
  fn empty_file_gives_defaults() {
    let cfg = AppConfig::from_toml_str("inline", "").unwrap();
    assert!(cfg.cases.is_empty());
    assert!(cfg.backend.url.is_none());
    assert_eq!(cfg.backend.progress_table, "user_info");
    assert_eq!(cfg.sessions, SessionConfig::default());
  }

  #[test]
  fn session_limits_are_configurable() {
    let cfg = AppConfig::from_toml_str("inline", "[sessions]\nmax_sessions = 3\nsweep_interval_secs = 0\n").unwrap();
    assert_eq!(cfg.sessions.max_sessions, 3);
    assert_eq!(cfg.sessions.idle_ttl(), Duration::from_secs(1800));
    assert_eq!(cfg.sessions.sweep_interval(), Duration::from_secs(1));
  }

  #[test]
  fn case_without_answer_is_a_parse_error() {
    let err = AppConfig::from_toml_str("inline", "[[cases]]\nid = \"x\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn missing_file_is_a_read_error() {
    let err = AppConfig::load("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
  }
}
