use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Breadcrumb of the view stack on the left, status message on the right.
pub fn draw_footer(frame: &mut Frame, area: Rect, breadcrumb: &[String], status: Option<&str>) {
  let mut spans = vec![Span::raw(" ")];
  for (i, part) in breadcrumb.iter().enumerate() {
    if i > 0 {
      spans.push(Span::styled(" > ", Style::default().fg(Color::DarkGray)));
    }
    let style = if i + 1 == breadcrumb.len() {
      Style::default().fg(Color::Cyan).bold()
    } else {
      Style::default().fg(Color::White)
    };
    spans.push(Span::styled(part.clone(), style));
  }

  let chunks = Layout::horizontal([Constraint::Min(10), Constraint::Percentage(60)]).split(area);
  let background = Style::default().bg(Color::Black);
  frame.render_widget(Paragraph::new(Line::from(spans)).style(background), chunks[0]);
  if let Some(status) = status {
    frame.render_widget(
      Paragraph::new(format!("{status} "))
        .right_aligned()
        .style(background.fg(Color::Yellow)),
      chunks[1],
    );
  } else {
    frame.render_widget(Paragraph::default().style(background), chunks[1]);
  }
}
