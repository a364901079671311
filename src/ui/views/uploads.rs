use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent};
use querydeck::api::types::{FileSpec, UploadedFile};
use querydeck::api::{keys, DataClient};
use querydeck::query::{
  use_entry, use_mutation, use_progress_mutation, EntryBinding, EntryOptions, MutationBinding,
};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Gauge, Paragraph, Row, Table, TableState};
use std::path::Path;

use crate::ui::components::{Confirm, InputResult, KeyResult, TextInput};
use crate::ui::renderfns::{age, centered, error_message, format_size};
use crate::ui::view::{ShortcutInfo, View, ViewAction, ViewContext};
use crate::ui::{data_block, draw_placeholder, ensure_valid_selection};

/// Describe a local file for upload.
fn file_spec(path: &Path) -> Result<FileSpec, String> {
  let meta = std::fs::metadata(path).map_err(|e| format!("{}: {e}", path.display()))?;
  if !meta.is_file() {
    return Err(format!("{}: not a file", path.display()));
  }
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  let kind = path
    .extension()
    .map(|e| e.to_string_lossy().to_lowercase())
    .unwrap_or_else(|| "file".to_string());
  Ok(FileSpec {
    name,
    size: meta.len(),
    kind,
  })
}

/// Parse a space separated list of paths, stopping at the first bad one.
fn parse_paths(input: &str) -> Result<Vec<FileSpec>, String> {
  input
    .split_whitespace()
    .map(|p| file_spec(Path::new(p)))
    .collect()
}

/// Uploaded files with a progress bar for the batch in flight.
pub struct UploadsView {
  files: EntryBinding<Vec<UploadedFile>>,
  table_state: TableState,
  prompt: Option<TextInput>,
  confirm: Confirm<u64>,
  upload: MutationBinding<Vec<FileSpec>, Vec<UploadedFile>>,
  delete: MutationBinding<u64, u64>,
  message: Option<String>,
}

impl UploadsView {
  pub fn new(ctx: ViewContext) -> Self {
    let client = &ctx.client;
    let files = use_entry(
      client.cache(),
      keys::files(),
      client.files_loader(),
      EntryOptions::default(),
    );

    let api = client.backend().clone();
    let upload = use_progress_mutation(
      client.executor(),
      move |files: Vec<FileSpec>, progress| {
        let api = api.clone();
        async move { api.upload_many(files, progress).await }
      },
      |_| DataClient::upload_options(),
    );
    let api = client.backend().clone();
    let delete = use_mutation(
      client.executor(),
      move |id: u64| {
        let api = api.clone();
        async move { api.delete_file(id).await }
      },
      |id| DataClient::delete_file_options(*id),
    );

    Self {
      files,
      table_state: TableState::default(),
      prompt: None,
      confirm: Confirm::new(),
      upload,
      delete,
      message: None,
    }
  }

  fn all_files(&self) -> &[UploadedFile] {
    self.files.data().map(Vec::as_slice).unwrap_or(&[])
  }

  fn handle_prompt(&mut self, key: KeyEvent) -> Option<ViewAction> {
    let prompt = self.prompt.as_mut()?;
    match prompt.handle_key(key) {
      InputResult::Submitted(value) => {
        self.prompt = None;
        match parse_paths(&value) {
          Ok(files) if files.is_empty() => {
            self.message = Some("Please select files".to_string());
          }
          Ok(files) => {
            self.message = None;
            self.upload.mutate(files);
          }
          Err(err) => self.message = Some(format!("Cannot upload {err}")),
        }
      }
      InputResult::Cancelled => self.prompt = None,
      InputResult::Consumed | InputResult::NotHandled => {}
    }
    Some(ViewAction::None)
  }

  fn handle_confirm(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match self.confirm.handle_key(key) {
      KeyResult::Event(id) => {
        self.delete.mutate(id);
        Some(ViewAction::None)
      }
      KeyResult::Handled => Some(ViewAction::None),
      KeyResult::NotHandled => None,
    }
  }

  fn handle_actions(&mut self, key: KeyEvent) -> Option<ViewAction> {
    match key.code {
      KeyCode::Char('j') | KeyCode::Down => self.table_state.select_next(),
      KeyCode::Char('k') | KeyCode::Up => self.table_state.select_previous(),
      KeyCode::Char('u') => {
        if !self.upload.is_pending() {
          self.prompt = Some(TextInput::new());
        }
      }
      KeyCode::Char('d') | KeyCode::Delete => {
        let selected = self
          .table_state
          .selected()
          .and_then(|i| self.all_files().get(i));
        if let Some(file) = selected {
          let question = format!("Delete {}?", file.name);
          let id = file.id;
          self.confirm.ask(question, id);
        }
      }
      KeyCode::Char('r') => self.files.refetch(),
      KeyCode::Char('q') | KeyCode::Esc => return Some(ViewAction::Pop),
      _ => return None,
    }
    Some(ViewAction::None)
  }

  fn render_table(&mut self, frame: &mut Frame, area: Rect) {
    let rows_len = self.all_files().len();
    ensure_valid_selection(&mut self.table_state, rows_len);

    let block = data_block(format!("Uploads ({rows_len})"), self.files.status());
    if rows_len == 0 {
      draw_placeholder(
        frame,
        area,
        block,
        self.files.is_loading(),
        self.files.error(),
        "files",
      );
      return;
    }

    let now = Utc::now();
    let rows: Vec<Row> = self
      .all_files()
      .iter()
      .map(|file| {
        Row::new(vec![
          Span::styled(file.id.to_string(), Style::default().fg(Color::Cyan)),
          Span::raw(file.name.clone()),
          Span::styled(file.kind.clone(), Style::default().fg(Color::Magenta)),
          Span::raw(format_size(file.size)),
          Span::styled(age(file.uploaded_at, now), Style::default().fg(Color::DarkGray)),
        ])
      })
      .collect();

    let table = Table::new(
      rows,
      [
        Constraint::Length(5),
        Constraint::Min(16),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(12),
      ],
    )
    .header(Row::new(["ID", "Name", "Type", "Size", "Uploaded"]).style(Style::default().bold()))
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut self.table_state);
  }

  fn render_progress(&self, frame: &mut Frame, area: Rect) {
    let percent = self.upload.progress().unwrap_or(0);
    let (label, color) = if self.upload.is_pending() {
      (format!("Uploading {percent}%"), Color::Yellow)
    } else if self.upload.is_error() {
      ("Upload failed".to_string(), Color::Red)
    } else if self.upload.is_success() {
      ("Upload complete".to_string(), Color::Green)
    } else {
      ("Press 'u' to upload files".to_string(), Color::DarkGray)
    };
    let gauge = Gauge::default()
      .block(Block::default().borders(Borders::ALL).title(" Progress "))
      .gauge_style(Style::default().fg(color))
      .percent(u16::from(percent.min(100)))
      .label(label);
    frame.render_widget(gauge, area);
  }

  fn render_prompt(&self, frame: &mut Frame, area: Rect) {
    let Some(prompt) = &self.prompt else {
      return;
    };
    let popup = centered(area, 70, 3);
    frame.render_widget(Clear, popup);
    let mut spans = vec![Span::styled("paths: ", Style::default().fg(Color::DarkGray))];
    spans.extend(prompt.spans(Style::default().fg(Color::White)));
    let paragraph = Paragraph::new(Line::from(spans)).block(
      Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Upload files (space separated) "),
    );
    frame.render_widget(paragraph, popup);
  }
}

impl View for UploadsView {
  fn handle_key(&mut self, key: KeyEvent) -> ViewAction {
    self
      .handle_prompt(key)
      .or_else(|| self.handle_confirm(key))
      .or_else(|| self.handle_actions(key))
      .unwrap_or(ViewAction::None)
  }

  fn render(&mut self, frame: &mut Frame, area: Rect) {
    let [list, progress] = Layout::vertical([Constraint::Min(3), Constraint::Length(3)]).areas(area);
    self.render_table(frame, list);
    self.render_progress(frame, progress);
    self.render_prompt(frame, area);
    self.confirm.render_overlay(frame, area);
  }

  fn breadcrumb_label(&self) -> String {
    "Uploads".to_string()
  }

  fn tick(&mut self) {
    self.files.poll();
    if self.upload.poll() {
      match (self.upload.error(), self.upload.result()) {
        (Some(err), _) => {
          self.message = Some(format!("Upload failed: {}", error_message(err)));
        }
        (None, Some(files)) => {
          self.message = Some(format!("Uploaded {} file(s)", files.len()));
        }
        (None, None) => {}
      }
    }
    if self.delete.poll() {
      self.message = Some(match (self.delete.error(), self.delete.result()) {
        (Some(err), _) => format!("Delete failed, file restored: {}", error_message(err)),
        (None, Some(id)) => format!("Deleted file #{id}"),
        (None, None) => String::new(),
      });
    }
  }

  fn captures_input(&self) -> bool {
    self.prompt.is_some() || self.confirm.is_active()
  }

  fn status(&self) -> Option<String> {
    self.message.clone().filter(|m| !m.is_empty())
  }

  fn shortcuts(&self) -> Vec<ShortcutInfo> {
    vec![
      ShortcutInfo::new(":", "command").with_priority(10),
      ShortcutInfo::new("u", "upload").with_priority(20),
      ShortcutInfo::new("d", "delete").with_priority(21),
      ShortcutInfo::new("r", "refetch").with_priority(40),
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_parse_paths() {
    let dir = std::env::temp_dir().join(format!("querydeck-uploads-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let report = dir.join("Report.PDF");
    std::fs::File::create(&report)
      .unwrap()
      .write_all(b"12345")
      .unwrap();
    let notes = dir.join("notes");
    std::fs::File::create(&notes).unwrap();

    let input = format!("{}  {}", report.display(), notes.display());
    let files = parse_paths(&input).unwrap();
    assert_eq!(
      files,
      vec![
        FileSpec {
          name: "Report.PDF".into(),
          size: 5,
          kind: "pdf".into(),
        },
        FileSpec {
          name: "notes".into(),
          size: 0,
          kind: "file".into(),
        },
      ]
    );

    assert!(parse_paths("").unwrap().is_empty());
    assert!(parse_paths(&dir.join("missing.txt").display().to_string()).is_err());
    assert!(parse_paths(&dir.display().to_string()).is_err());

    std::fs::remove_dir_all(&dir).unwrap();
  }
}
