/// Available shell commands and resolution logic

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "open",
    aliases: &["o", "mount"],
    usage: "open <service> <method> [json-params]",
    description: "Open a screen reading one remote query",
  },
  Command {
    name: "close",
    aliases: &["c", "unmount"],
    usage: "close <screen>",
    description: "Close a screen and stop its auto-refresh",
  },
  Command {
    name: "screens",
    aliases: &["ls", "list"],
    usage: "screens",
    description: "List open screens",
  },
  Command {
    name: "request",
    aliases: &["r", "get"],
    usage: "request <screen>",
    description: "Read through the cache",
  },
  Command {
    name: "force",
    aliases: &["f", "pull"],
    usage: "force <screen>",
    description: "Fetch ignoring the cache",
  },
  Command {
    name: "invalidate",
    aliases: &["inv", "drop"],
    usage: "invalidate <screen>",
    description: "Drop a screen's cached entry",
  },
  Command {
    name: "optimistic",
    aliases: &["set"],
    usage: "optimistic <screen> <json>",
    description: "Show a local value before the remote confirms it",
  },
  Command {
    name: "write",
    aliases: &["w", "put"],
    usage: "write <service> <method> <json-params> <json-value>",
    description: "Change a document in the simulated remote",
  },
  Command {
    name: "fail",
    aliases: &["outage"],
    usage: "fail on|off",
    description: "Make the simulated remote fail every read",
  },
  Command {
    name: "online",
    aliases: &["up"],
    usage: "online",
    description: "Report connectivity regained",
  },
  Command {
    name: "offline",
    aliases: &["down"],
    usage: "offline",
    description: "Report connectivity lost",
  },
  Command {
    name: "foreground",
    aliases: &["fg"],
    usage: "foreground",
    description: "Report the app returned to the foreground",
  },
  Command {
    name: "background",
    aliases: &["bg"],
    usage: "background",
    description: "Report the app went to the background",
  },
  Command {
    name: "refresh",
    aliases: &["sweep"],
    usage: "refresh [prefix]",
    description: "Refresh everything, or every key under a prefix",
  },
  Command {
    name: "stats",
    aliases: &["cache"],
    usage: "stats",
    description: "Show cache entries and subscriptions",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit the shell",
  },
];

/// Outcome of matching typed input against the command table
#[derive(Debug)]
pub enum Resolution {
  Found(&'static Command),
  /// Several commands match equally well
  Ambiguous(Vec<&'static Command>),
  Unknown,
}

/// Matches with their priority, best first. Lower is better.
fn ranked(input: &str) -> Vec<(&'static Command, u32)> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().map(|cmd| (cmd, 0)).collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);
  matches
}

/// Get suggestions for a given input, best match first
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  ranked(input).into_iter().map(|(cmd, _)| cmd).collect()
}

/// Resolve typed input to a single command.
///
/// Input matching several commands at the best priority is ambiguous.
pub fn resolve(input: &str) -> Resolution {
  let input = input.trim();
  if input.is_empty() {
    return Resolution::Unknown;
  }

  let matches = ranked(input);
  let Some(&(best, priority)) = matches.first() else {
    return Resolution::Unknown;
  };
  let tied: Vec<&'static Command> = matches
    .iter()
    .take_while(|(_, p)| *p == priority)
    .map(|(cmd, _)| *cmd)
    .collect();

  if tied.len() > 1 {
    Resolution::Ambiguous(tied)
  } else {
    Resolution::Found(best)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_input_returns_all() {
    let suggestions = get_suggestions("");
    assert_eq!(suggestions.len(), COMMANDS.len());
    assert!(matches!(resolve("  "), Resolution::Unknown));
  }

  fn resolved(input: &str) -> &'static str {
    match resolve(input) {
      Resolution::Found(cmd) => cmd.name,
      other => panic!("expected one command for {:?}, got {:?}", input, other),
    }
  }

  #[test]
  fn test_exact_match() {
    let suggestions = get_suggestions("offline");
    assert!(!suggestions.is_empty());
    assert_eq!(suggestions[0].name, "offline");
    assert_eq!(resolved("offline"), "offline");
  }

  #[test]
  fn test_alias_match() {
    assert_eq!(resolved("fg"), "foreground");
    assert_eq!(resolved("q"), "quit");
    assert_eq!(resolved("ls"), "screens");
  }

  #[test]
  fn test_prefix_match() {
    assert_eq!(resolved("inval"), "invalidate");
    assert_eq!(resolved("ref"), "refresh");
    assert_eq!(resolved("req"), "request");
  }

  #[test]
  fn test_exact_alias_beats_prefix() {
    // "o" is an alias of open and a prefix of online/offline/optimistic
    assert_eq!(resolved("o"), "open");
  }

  #[test]
  fn test_equal_prefix_matches_are_ambiguous() {
    match resolve("re") {
      Resolution::Ambiguous(candidates) => {
        let names: Vec<&str> = candidates.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["request", "refresh"]);
      }
      other => panic!("expected ambiguity, got {:?}", other),
    }
    assert!(matches!(resolve("of"), Resolution::Found(cmd) if cmd.name == "offline"));
    assert!(matches!(resolve("on"), Resolution::Found(cmd) if cmd.name == "online"));
  }

  #[test]
  fn test_unknown_input() {
    assert!(matches!(resolve("zzz"), Resolution::Unknown));
  }
}
