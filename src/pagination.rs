//! Page arithmetic and list controllers.
//!
//! Three shapes of paging are supported: server-side with a total count,
//! client-side slicing of a fully cached list, and has-more cursors.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::QueryKey;

/// Derived paging position. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
  pub page: usize,
  pub limit: usize,
  pub total: usize,
}

impl PaginationState {
  /// Clamp `page` into `[1, max(total_pages, 1)]`. A zero `limit` is
  /// treated as 1.
  pub fn derive(total: usize, limit: usize, page: usize) -> Self {
    let limit = limit.max(1);
    let last = total.div_ceil(limit).max(1);
    Self {
      page: page.clamp(1, last),
      limit,
      total,
    }
  }

  pub fn total_pages(&self) -> usize {
    self.total.div_ceil(self.limit.max(1))
  }

  pub fn has_next(&self) -> bool {
    self.page < self.total_pages()
  }

  pub fn has_prev(&self) -> bool {
    self.page > 1
  }

  pub fn window(&self) -> PageWindow {
    window_for(self.page, self.limit)
  }

  /// 1-based index range of the items shown, for "Showing a-b of n" lines.
  pub fn showing(&self) -> Option<(usize, usize)> {
    if self.total == 0 {
      return None;
    }
    let window = self.window();
    let first = window.offset + 1;
    let last = window.offset.saturating_add(window.length).min(self.total);
    Some((first, last))
  }
}

/// Offset/length pair for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
  pub offset: usize,
  pub length: usize,
}

impl PageWindow {
  /// Items of this page from a fully loaded list. Out-of-range windows
  /// yield an empty slice.
  pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
    let start = self.offset.min(items.len());
    let end = self.offset.saturating_add(self.length).min(items.len());
    &items[start..end]
  }

  /// Write the window as query parameters, replacing existing ones with the
  /// same names.
  pub fn apply_to(&self, url: &mut Url, offset_param: &str, limit_param: &str) {
    let kept: Vec<(String, String)> = url
      .query_pairs()
      .filter(|(name, _)| name != offset_param && name != limit_param)
      .map(|(name, value)| (name.into_owned(), value.into_owned()))
      .collect();
    url
      .query_pairs_mut()
      .clear()
      .extend_pairs(kept)
      .append_pair(offset_param, &self.offset.to_string())
      .append_pair(limit_param, &self.length.to_string());
  }
}

/// Window for `page` (1-based; 0 is treated as 1).
pub fn window_for(page: usize, limit: usize) -> PageWindow {
  let limit = limit.max(1);
  PageWindow {
    offset: (page.max(1) - 1).saturating_mul(limit),
    length: limit,
  }
}

/// Page numbers to show in a pager: at most `max_visible`, centered on
/// `current` and shifted to stay within `1..=total_pages`.
pub fn page_numbers(total: usize, limit: usize, current: usize, max_visible: usize) -> Vec<usize> {
  let state = PaginationState::derive(total, limit, current);
  let pages = state.total_pages();
  let visible = max_visible.min(pages);
  if visible == 0 {
    return Vec::new();
  }

  let half = visible / 2;
  let start = state
    .page
    .saturating_sub(half)
    .max(1)
    .min(pages + 1 - visible);
  (start..start + visible).collect()
}

/// Paging over one keyed list.
///
/// Produces the per-page cache key (`base` plus `{"page", "limit"}`) and
/// keeps the page valid as the total changes.
#[derive(Debug, Clone)]
pub struct ListController {
  base: QueryKey,
  state: PaginationState,
}

impl ListController {
  pub fn new(base: QueryKey, limit: usize) -> Self {
    Self {
      base,
      state: PaginationState::derive(0, limit, 1),
    }
  }

  pub fn state(&self) -> PaginationState {
    self.state
  }

  pub fn base(&self) -> &QueryKey {
    &self.base
  }

  /// Cache key for the current page.
  pub fn key(&self) -> QueryKey {
    self.key_for(self.state.page)
  }

  pub fn key_for(&self, page: usize) -> QueryKey {
    self.base.clone().with(serde_json::json!({
      "page": page,
      "limit": self.state.limit,
    }))
  }

  /// Replace the base key (filters changed) and go back to page 1.
  pub fn set_base(&mut self, base: QueryKey) {
    if base != self.base {
      self.base = base;
      self.state = PaginationState::derive(self.state.total, self.state.limit, 1);
    }
  }

  /// Record a new total, clamping the page.
  pub fn set_total(&mut self, total: usize) {
    self.state = PaginationState::derive(total, self.state.limit, self.state.page);
  }

  /// Page before any total is known is not clamped above.
  pub fn go_to(&mut self, page: usize) -> bool {
    let before = self.state.page;
    self.state = if self.state.total == 0 {
      PaginationState {
        page: page.max(1),
        ..self.state
      }
    } else {
      PaginationState::derive(self.state.total, self.state.limit, page)
    };
    self.state.page != before
  }

  pub fn next(&mut self) -> bool {
    self.state.has_next() && self.go_to(self.state.page + 1)
  }

  pub fn prev(&mut self) -> bool {
    self.state.has_prev() && self.go_to(self.state.page - 1)
  }

  pub fn page_numbers(&self, max_visible: usize) -> Vec<usize> {
    page_numbers(self.state.total, self.state.limit, self.state.page, max_visible)
  }
}

/// Has-more pagination for APIs that don't report a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
  pub page: usize,
  pub limit: usize,
  pub has_more: bool,
}

impl CursorState {
  pub fn new(limit: usize) -> Self {
    Self {
      page: 1,
      limit: limit.max(1),
      has_more: true,
    }
  }

  pub fn window(&self) -> PageWindow {
    window_for(self.page, self.limit)
  }

  /// Record what the last response said about further pages.
  pub fn update(&mut self, has_more: bool) {
    self.has_more = has_more;
  }

  pub fn has_prev(&self) -> bool {
    self.page > 1
  }

  pub fn next(&mut self) -> bool {
    if self.has_more {
      self.page += 1;
      true
    } else {
      false
    }
  }

  pub fn prev(&mut self) -> bool {
    if self.has_prev() {
      self.page -= 1;
      // The page we came from exists
      self.has_more = true;
      true
    } else {
      false
    }
  }
}
