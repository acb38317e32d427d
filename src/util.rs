//! Small utility helpers used across modules.

/// Log-safe truncation for large strings, cut on a char boundary.
/// Keeps remote error bodies from flooding the logs.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let cut = s.char_indices().map(|(i, _)| i).take_while(|i| *i <= max).last().unwrap_or(0);
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_strings_pass_through() {
    assert_eq!(trunc_for_log("abc", 10), "abc");
  }

  #[test]
  fn long_strings_are_cut_on_char_boundary() {
    let s = "ééééé"; // 10 bytes
    assert_eq!(trunc_for_log(s, 3), "é… (10 bytes total)");
  }
}
