//! Answer validation and comparison.
//!
//! Input is normalized (trim + lowercase) once; the normalized value is what
//! gets length-checked, scanned for SQL keywords and compared to the solution.
//! Validation stops at the first failure.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ValidationError;

pub const MIN_ANSWER_LEN: usize = 5;
pub const MAX_ANSWER_LEN: usize = 60;

/// SQL keywords refused as whole words. Answers are names, not queries.
pub const RESERVED_WORDS: &[&str] = &[
  "select", "insert", "update", "delete", "from", "where", "and", "or",
  "join", "inner", "left", "right", "outer", "on", "group", "by", "having",
  "order", "asc", "desc", "limit", "create", "drop", "alter", "table",
  "database", "index", "view", "procedure", "function", "trigger", "union",
  "distinct", "all", "as", "into", "values", "set",
];

fn reserved_patterns() -> &'static [(&'static str, Regex)] {
  static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
  PATTERNS.get_or_init(|| {
    RESERVED_WORDS
      .iter()
      .map(|w| {
        let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(w)))
          .expect("reserved word pattern is a literal");
        (*w, re)
      })
      .collect()
  })
}

pub fn normalize(raw: &str) -> String {
  raw.trim().to_lowercase()
}

/// First denylisted keyword found as a whole word, if any.
pub fn find_reserved_word(text: &str) -> Option<&'static str> {
  reserved_patterns()
    .iter()
    .find(|(_, re)| re.is_match(text))
    .map(|(w, _)| *w)
}

/// Normalize and validate a raw answer. Returns the normalized text on success.
pub fn validate(raw: &str) -> Result<String, ValidationError> {
  let answer = normalize(raw);
  let len = answer.chars().count();
  if len < MIN_ANSWER_LEN {
    return Err(ValidationError::TooShort);
  }
  if len > MAX_ANSWER_LEN {
    return Err(ValidationError::TooLong);
  }
  if let Some(word) = find_reserved_word(&answer) {
    return Err(ValidationError::ReservedWord { word });
  }
  Ok(answer)
}

/// Compare an already-normalized answer with the expected one (lowercased only).
pub fn answers_match(normalized: &str, expected: &str) -> bool {
  normalized == expected.to_lowercase()
}
