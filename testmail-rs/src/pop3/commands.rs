use crate::error::{MailError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// `VERB [arguments]`
fn command_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\S+)(?:\s+(.*))?$").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pop3Command {
    Capa,
    Noop,
    User(String),
    Pass(String),
    Stat,
    List(Option<String>),
    Uidl(Option<String>),
    Retr(String),
    Top(String),
    Dele(String),
    Rset,
    Quit,
    Unknown(String),
}

impl Pop3Command {
    /// Parse a line with its terminator already removed.
    ///
    /// Fails only when the line is not `VERB [arguments]` at all; unknown
    /// verbs parse as [`Pop3Command::Unknown`].
    pub fn parse(line: &str) -> Result<Self> {
        let caps = command_line()
            .captures(line)
            .ok_or_else(|| MailError::Pop3Protocol(format!("Malformed command {:?}", line)))?;

        let command = caps[1].to_uppercase();
        let args = caps.get(2).map(|m| m.as_str()).unwrap_or("");

        Ok(match command.as_str() {
            "CAPA" => Self::Capa,
            "NOOP" => Self::Noop,
            "USER" => Self::User(args.to_string()),
            "PASS" => Self::Pass(args.to_string()),
            "STAT" => Self::Stat,
            "LIST" => Self::List(optional_arg(args)),
            "UIDL" => Self::Uidl(optional_arg(args)),
            "RETR" => Self::Retr(args.trim().to_string()),
            "TOP" => Self::Top(args.trim().to_string()),
            "DELE" => Self::Dele(args.trim().to_string()),
            "RSET" => Self::Rset,
            "QUIT" => Self::Quit,
            _ => Self::Unknown(command),
        })
    }
}

fn optional_arg(args: &str) -> Option<String> {
    let arg = args.trim();
    if arg.is_empty() {
        None
    } else {
        Some(arg.to_string())
    }
}

/// Parse a message number; anything but a positive integer is `None`.
pub fn parse_index(arg: &str) -> Option<usize> {
    arg.trim().parse::<usize>().ok().filter(|&n| n > 0)
}

/// Parse `TOP msg n`. A missing or non-numeric line count is 0.
pub fn parse_top_args(args: &str) -> (Option<usize>, i64) {
    let mut parts = args.split_whitespace();
    let index = parts.next().and_then(parse_index);
    let lines = parts.next().and_then(|n| n.parse::<i64>().ok()).unwrap_or(0);
    (index, lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Pop3Command::parse("CAPA").unwrap(), Pop3Command::Capa);
        assert_eq!(Pop3Command::parse("stat").unwrap(), Pop3Command::Stat);
        assert_eq!(Pop3Command::parse("QUIT").unwrap(), Pop3Command::Quit);
    }

    #[test]
    fn test_parse_user_pass_keep_arguments() {
        assert_eq!(
            Pop3Command::parse("USER bob@example.com").unwrap(),
            Pop3Command::User("bob@example.com".to_string())
        );
        assert_eq!(
            Pop3Command::parse("PASS with spaces ").unwrap(),
            Pop3Command::Pass("with spaces ".to_string())
        );
    }

    #[test]
    fn test_parse_list_argument() {
        assert_eq!(Pop3Command::parse("LIST").unwrap(), Pop3Command::List(None));
        assert_eq!(
            Pop3Command::parse("LIST 2").unwrap(),
            Pop3Command::List(Some("2".to_string()))
        );
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        assert_eq!(
            Pop3Command::parse("APOP x y").unwrap(),
            Pop3Command::Unknown("APOP".to_string())
        );
        assert!(Pop3Command::parse("").is_err());
        assert!(Pop3Command::parse(" LIST").is_err());
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("3"), Some(3));
        assert_eq!(parse_index("0"), None);
        assert_eq!(parse_index("-1"), None);
        assert_eq!(parse_index("abc"), None);
    }

    #[test]
    fn test_parse_top_args() {
        assert_eq!(parse_top_args("1 10"), (Some(1), 10));
        assert_eq!(parse_top_args("1"), (Some(1), 0));
        assert_eq!(parse_top_args("2 -5"), (Some(2), -5));
        assert_eq!(parse_top_args(""), (None, 0));
    }
}
