//! Domain models: cases, their solutions, users and remote progress records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque case identifier, stored remotely inside `completed_cases`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(pub String);

impl CaseId {
  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CaseId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for CaseId {
  fn from(s: &str) -> Self { CaseId(s.to_string()) }
}

/// Expected answer plus the texts revealed once the case is solved.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solution {
  pub answer: String,
  #[serde(default)] pub success_message: String,
  #[serde(default)] pub explanation: String,
}

/// A puzzle unit. Only `id`, `xp_reward` and `solution` drive submission logic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
  pub id: CaseId,
  #[serde(default)] pub title: String,
  #[serde(default)] pub xp_reward: u32,
  pub solution: Solution,
}

/// Authenticated identity as reported by the auth service.
/// `access_token` is the caller's JWT; progress calls are made on its behalf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  #[serde(default)] pub email: Option<String>,
  #[serde(skip)] pub access_token: Option<String>,
}

impl User {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into(), email: None, access_token: None }
  }
}

/// Remote `user_info` row, reduced to the progress we touch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserProgress {
  pub completed_cases: Vec<CaseId>,
}

impl UserProgress {
  pub fn has_completed(&self, id: &CaseId) -> bool {
    self.completed_cases.iter().any(|c| c == id)
  }

  /// Append `id` unless already present. Returns true when it was added.
  pub fn mark_completed(&mut self, id: &CaseId) -> bool {
    if self.has_completed(id) {
      return false;
    }
    self.completed_cases.push(id.clone());
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mark_completed_is_idempotent() {
    let mut p = UserProgress::default();
    let id = CaseId::from("case-1");
    assert!(p.mark_completed(&id));
    assert!(!p.mark_completed(&id));
    assert_eq!(p.completed_cases, vec![id]);
  }

  #[test]
  fn case_deserializes_from_camel_case() {
    let json = r#"{"id":"c1","title":"T","xpReward":50,
      "solution":{"answer":"John Doe","successMessage":"ok","explanation":"because"}}"#;
    let c: Case = serde_json::from_str(json).unwrap();
    assert_eq!(c.id, CaseId::from("c1"));
    assert_eq!(c.xp_reward, 50);
    assert_eq!(c.solution.success_message, "ok");
  }
}
