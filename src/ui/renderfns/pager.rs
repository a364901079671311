use querydeck::pagination::PaginationState;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Page-number bar: `‹ prev  1 [2] 3 4 5  next ›  Showing 7-12 of 100`.
pub fn pager_line(state: &PaginationState, pages: &[usize]) -> Line<'static> {
  let enabled = Style::default().fg(Color::Cyan);
  let disabled = Style::default().fg(Color::DarkGray);

  let mut spans = vec![Span::styled(
    "‹ prev ",
    if state.has_prev() { enabled } else { disabled },
  )];
  for &page in pages {
    if page == state.page {
      spans.push(Span::styled(format!("[{page}]"), Style::default().fg(Color::Yellow).bold()));
    } else {
      spans.push(Span::raw(format!(" {page} ")));
    }
  }
  spans.push(Span::styled(
    " next ›",
    if state.has_next() { enabled } else { disabled },
  ));
  if let Some((first, last)) = state.showing() {
    spans.push(Span::styled(
      format!("  Showing {first}-{last} of {}", state.total),
      disabled,
    ));
  }
  Line::from(spans)
}

pub fn draw_pager(frame: &mut Frame, area: Rect, state: &PaginationState, pages: &[usize]) {
  frame.render_widget(Paragraph::new(pager_line(state, pages)).centered(), area);
}

#[cfg(test)]
mod tests {
  use super::*;
  use querydeck::pagination::page_numbers;

  fn text(line: &Line) -> String {
    line.spans.iter().map(|s| s.content.as_ref()).collect()
  }

  #[test]
  fn test_pager_marks_current_page() {
    let state = PaginationState::derive(100, 6, 2);
    let line = pager_line(&state, &page_numbers(100, 6, 2, 5));
    assert_eq!(
      text(&line),
      "‹ prev  1 [2] 3  4  5  next ›  Showing 7-12 of 100"
    );
  }

  #[test]
  fn test_pager_empty_list() {
    let state = PaginationState::derive(0, 6, 1);
    assert_eq!(text(&pager_line(&state, &[])), "‹ prev  next ›");
  }
}
