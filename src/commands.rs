/// Commands reachable from the `:` prompt, with ranked autocomplete.
use querydeck::config::StartView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  Open(StartView),
  /// Invalidate everything cached and reload the current screen
  Refresh,
  /// Drop unwatched entries now instead of waiting for the gc task
  Collect,
  Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  pub action: Action,
}

pub const COMMANDS: &[Command] = &[
  Command {
    name: "cars",
    aliases: &["c", "car"],
    description: "Cars manager",
    action: Action::Open(StartView::Cars),
  },
  Command {
    name: "employees",
    aliases: &["e", "team", "staff"],
    description: "Team directory",
    action: Action::Open(StartView::Employees),
  },
  Command {
    name: "users",
    aliases: &["u", "user"],
    description: "User accounts",
    action: Action::Open(StartView::Users),
  },
  Command {
    name: "posts",
    aliases: &["p", "blog"],
    description: "Blog posts",
    action: Action::Open(StartView::Posts),
  },
  Command {
    name: "uploads",
    aliases: &["f", "files"],
    description: "File uploads",
    action: Action::Open(StartView::Uploads),
  },
  Command {
    name: "refresh",
    aliases: &["r", "reload"],
    description: "Invalidate all cached data",
    action: Action::Refresh,
  },
  Command {
    name: "gc",
    aliases: &["collect"],
    description: "Drop unused cache entries",
    action: Action::Collect,
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    description: "Exit querydeck",
    action: Action::Quit,
  },
];

/// Look up a command by exact name or alias.
pub fn find(input: &str) -> Option<&'static Command> {
  let input = input.trim().to_lowercase();
  COMMANDS
    .iter()
    .find(|cmd| cmd.name == input || cmd.aliases.contains(&input.as_str()))
}

/// Suggestions for `input`, best first: exact name, exact alias, name
/// prefix, alias prefix, then substring matches.
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input = input.trim().to_lowercase();
  if input.is_empty() {
    return COMMANDS.iter().collect();
  }

  let rank = |cmd: &Command| -> Option<u8> {
    let aliases = cmd.aliases.iter();
    if cmd.name == input {
      Some(0)
    } else if cmd.aliases.contains(&input.as_str()) {
      Some(1)
    } else if cmd.name.starts_with(&input) {
      Some(2)
    } else if aliases.clone().any(|a| a.starts_with(&input)) {
      Some(3)
    } else if cmd.name.contains(&input) {
      Some(4)
    } else if aliases.clone().any(|a| a.contains(&input)) {
      Some(5)
    } else {
      None
    }
  };

  let mut matches: Vec<(&'static Command, u8)> = COMMANDS
    .iter()
    .filter_map(|cmd| rank(cmd).map(|r| (cmd, r)))
    .collect();
  // Stable, so equal ranks keep table order
  matches.sort_by_key(|(_, r)| *r);
  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    assert_eq!(get_suggestions("").len(), COMMANDS.len());
  }

  #[test]
  fn test_alias_beats_prefix() {
    // "u" is an alias of users and a prefix of uploads
    let names: Vec<_> = get_suggestions("u").iter().map(|c| c.name).collect();
    assert_eq!(names.first(), Some(&"users"));
    assert!(names.contains(&"uploads"));
  }

  #[test]
  fn test_substring_match() {
    let suggestions = get_suggestions("ploy");
    assert_eq!(suggestions[0].name, "employees");
  }

  #[test]
  fn test_no_match() {
    assert!(get_suggestions("zzz").is_empty());
    assert!(find("zzz").is_none());
  }

  #[test]
  fn test_find_by_alias() {
    assert_eq!(
      find(" Blog ").map(|c| c.action),
      Some(Action::Open(StartView::Posts))
    );
    assert_eq!(find("q").map(|c| c.action), Some(Action::Quit));
  }
}
