use crate::ui::view::ShortcutInfo;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Cache counters shown in the header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub pending_mutations: usize,
}

/// Header bar: title, cache counters and the view's shortcuts.
pub fn draw_header(
  frame: &mut Frame,
  area: Rect,
  title: &str,
  stats: CacheStats,
  shortcuts: &[ShortcutInfo],
) {
  let separator = Span::styled("│", Style::default().fg(Color::DarkGray));
  let mut spans = vec![
    Span::styled(format!(" {title} "), Style::default().fg(Color::Cyan).bold()),
    separator.clone(),
    Span::styled(
      format!(" {} cached ", stats.entries),
      Style::default().fg(Color::White),
    ),
  ];
  if stats.pending_mutations > 0 {
    spans.push(separator);
    spans.push(Span::styled(
      format!(" {} saving ", stats.pending_mutations),
      Style::default().fg(Color::Yellow).bold(),
    ));
  }
  spans.push(Span::raw(" "));
  spans.extend(shortcut_spans(shortcuts));

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
  frame.render_widget(paragraph, area);
}

/// `<key> label` pairs in priority order.
fn shortcut_spans(shortcuts: &[ShortcutInfo]) -> Vec<Span<'static>> {
  let mut sorted: Vec<&ShortcutInfo> = shortcuts.iter().collect();
  sorted.sort_by_key(|s| s.priority);
  sorted
    .into_iter()
    .flat_map(|s| {
      [
        Span::styled(format!(" <{}>", s.key), Style::default().fg(Color::Cyan)),
        Span::styled(format!(" {} ", s.label), Style::default().fg(Color::DarkGray)),
      ]
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_shortcuts_sorted_by_priority() {
    let shortcuts = [
      ShortcutInfo::new("q", "back").with_priority(90),
      ShortcutInfo::new(":", "command").with_priority(10),
    ];
    let text: String = shortcut_spans(&shortcuts)
      .iter()
      .map(|s| s.content.as_ref())
      .collect();
    assert_eq!(text, " <:> command  <q> back ");
  }
}
