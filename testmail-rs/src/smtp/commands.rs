use regex::Regex;
use std::sync::OnceLock;

fn mail_from_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)FROM:\s*<([^>]+)>").expect("static regex"))
}

fn rcpt_to_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)TO:\s*<([^>]+)>").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    /// `None` when the argument does not contain `FROM:<address>`
    MailFrom(Option<String>),
    /// `None` when the argument does not contain `TO:<address>`
    RcptTo(Option<String>),
    Data,
    Rset,
    Quit,
    Noop,
    Unknown(String),
}

impl SmtpCommand {
    /// Parse a command line with its terminator removed. Never fails: anything
    /// unrecognised (including an empty line) is [`SmtpCommand::Unknown`].
    pub fn parse(line: &str) -> Self {
        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };
        let command = command.to_uppercase();

        match command.as_str() {
            "HELO" => SmtpCommand::Helo(args.to_string()),
            "EHLO" => SmtpCommand::Ehlo(args.to_string()),
            "AUTH" => {
                let (mechanism, initial) = match args.split_once(' ') {
                    Some((mechanism, initial)) => (mechanism, initial.trim()),
                    None => (args, ""),
                };
                SmtpCommand::Auth {
                    mechanism: mechanism.to_uppercase(),
                    initial_response: if initial.is_empty() {
                        None
                    } else {
                        Some(initial.to_string())
                    },
                }
            }
            "MAIL" => SmtpCommand::MailFrom(Self::parse_path(mail_from_path(), args)),
            "RCPT" => SmtpCommand::RcptTo(Self::parse_path(rcpt_to_path(), args)),
            "DATA" => SmtpCommand::Data,
            "RSET" => SmtpCommand::Rset,
            "QUIT" => SmtpCommand::Quit,
            "NOOP" => SmtpCommand::Noop,
            _ => SmtpCommand::Unknown(command),
        }
    }

    fn parse_path(pattern: &Regex, args: &str) -> Option<String> {
        pattern
            .captures(args)
            .map(|caps| caps[1].to_string())
    }
}
