use chrono::{DateTime, Utc};
use querydeck::cache::QueryStatus;
use querydeck::QueryError;
use ratatui::prelude::*;

/// Shorten to `max_len` characters, ending in "..." when cut.
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
  }
}

pub fn status_color(status: QueryStatus) -> Color {
  match status {
    QueryStatus::Idle => Color::DarkGray,
    QueryStatus::Loading => Color::Yellow,
    QueryStatus::Success => Color::Green,
    QueryStatus::Error => Color::Red,
  }
}

/// Text for an error shown next to a form or list. Validation messages are
/// already user-facing and lose their prefix.
pub fn error_message(error: &QueryError) -> String {
  match error {
    QueryError::Validation(message) => message.clone(),
    other => other.to_string(),
  }
}

/// `12000.5` as `$12,000.50`.
pub fn format_price(price: f64) -> String {
  let cents = (price * 100.0).round() as i64;
  let (sign, cents) = if cents < 0 { ("-", -cents) } else { ("", cents) };
  let whole = (cents / 100).to_string();
  let mut grouped = String::new();
  for (i, c) in whole.chars().enumerate() {
    if i > 0 && (whole.len() - i) % 3 == 0 {
      grouped.push(',');
    }
    grouped.push(c);
  }
  format!("{sign}${grouped}.{:02}", cents % 100)
}

pub fn format_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
  let mut size = bytes as f64;
  let mut unit = 0;
  while size >= 1024.0 && unit + 1 < UNITS.len() {
    size /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{bytes} B")
  } else {
    format!("{size:.1} {}", UNITS[unit])
  }
}

/// "just now", "42s ago", "5m ago", "3h ago" or a date.
pub fn age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let secs = (now - at).num_seconds().max(0);
  match secs {
    0..=4 => "just now".to_string(),
    5..=59 => format!("{secs}s ago"),
    60..=3599 => format!("{}m ago", secs / 60),
    3600..=86399 => format!("{}h ago", secs / 3600),
    _ => at.format("%Y-%m-%d").to_string(),
  }
}

/// A `width` x `height` box centered in `area`, shrunk to fit.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
  let width = width.min(area.width);
  let height = height.min(area.height);
  Rect::new(
    area.x + (area.width - width) / 2,
    area.y + (area.height - height) / 2,
    width,
    height,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn test_truncate() {
    assert_eq!(truncate("hello", 5), "hello");
    assert_eq!(truncate("hello world", 8), "hello...");
    assert_eq!(truncate("žluťoučký kůň", 8), "žluťo...");
  }

  #[test]
  fn test_error_message() {
    assert_eq!(error_message(&QueryError::Validation("Make is required".into())), "Make is required");
    assert_eq!(
      error_message(&QueryError::Http { status: 503, message: "down".into() }),
      "HTTP 503: down"
    );
  }

  #[test]
  fn test_format_price() {
    assert_eq!(format_price(12000.5), "$12,000.50");
    assert_eq!(format_price(999.0), "$999.00");
    assert_eq!(format_price(1234567.0), "$1,234,567.00");
  }

  #[test]
  fn test_format_size() {
    assert_eq!(format_size(512), "512 B");
    assert_eq!(format_size(1536), "1.5 KB");
    assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
  }

  #[test]
  fn test_age() {
    let now = Utc::now();
    assert_eq!(age(now, now), "just now");
    assert_eq!(age(now - Duration::seconds(42), now), "42s ago");
    assert_eq!(age(now - Duration::minutes(5), now), "5m ago");
  }

  #[test]
  fn test_centered_fits() {
    let area = Rect::new(0, 0, 20, 10);
    assert_eq!(centered(area, 10, 4), Rect::new(5, 3, 10, 4));
    assert_eq!(centered(area, 40, 40), area);
  }
}
