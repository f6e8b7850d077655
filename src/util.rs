//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Parse a user-typed answer. Accepts surrounding spaces, a leading '+',
/// a unicode minus and a decimal comma. Anything else is `None`.
pub fn parse_answer(raw: &str) -> Option<f64> {
  let s = raw.trim().replace('−', "-").replace(',', ".");
  let s = s.strip_prefix('+').unwrap_or(&s);
  if s.is_empty() {
    return None;
  }
  s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Log-safe truncation for large strings.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}
