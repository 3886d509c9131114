//! Reader commands typed on stdin.

/// One console command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Stop,
    Next,
    Back,
    Restart,
    ToggleAutoFollow,
    Help,
    Quit,
}

impl Command {
    /// Parse a typed line; the first letter is enough
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.trim().to_ascii_lowercase();
        let command = match word.as_str() {
            "p" | "play" => Self::Play,
            "s" | "stop" => Self::Stop,
            "n" | "next" => Self::Next,
            "b" | "back" | "prev" => Self::Back,
            "r" | "restart" => Self::Restart,
            "a" | "auto" => Self::ToggleAutoFollow,
            "h" | "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

pub const HELP: &str = "\
Commands:
  p  play this page (turns on auto-follow)
  s  stop
  n  next page
  b  previous page
  r  restart from the first page
  a  toggle auto-follow
  q  quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_forms() {
        assert_eq!(Command::parse("p"), Some(Command::Play));
        assert_eq!(Command::parse("  NEXT \n"), Some(Command::Next));
        assert_eq!(Command::parse("prev"), Some(Command::Back));
        assert_eq!(Command::parse("a"), Some(Command::ToggleAutoFollow));
        assert_eq!(Command::parse("exit"), Some(Command::Quit));
    }

    #[test]
    fn test_unknown_input() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("jump"), None);
    }
}
