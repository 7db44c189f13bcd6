//! Line commands read by the `latchkey` binary.

use std::str::FromStr;

use latchkey_core::Passphrase;
use thiserror::Error;

/// A parsed terminal command.
#[derive(Debug, Clone)]
pub enum Command {
    /// `unlock <passphrase>`. The passphrase is the rest of the line.
    Unlock(Passphrase),
    /// `lock`
    Lock,
    /// `fg`: the application became visible.
    Foreground,
    /// `bg`: the application was hidden.
    Background,
    /// `status`
    Status,
    /// `quit`: terminate and exit.
    Quit,
}

/// Why a line did not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Blank line.
    #[error("empty command")]
    Empty,

    /// `unlock` without a passphrase.
    #[error("usage: unlock <passphrase>")]
    MissingPassphrase,

    /// Unrecognized verb.
    #[error("unknown command {0:?} (expected unlock, lock, fg, bg, status, quit)")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match verb {
            "" => Err(CommandError::Empty),
            "unlock" => {
                let passphrase = rest.trim_start();
                if passphrase.is_empty() {
                    return Err(CommandError::MissingPassphrase);
                }
                Ok(Self::Unlock(Passphrase::from(passphrase)))
            },
            "lock" => Ok(Self::Lock),
            "fg" | "foreground" => Ok(Self::Foreground),
            "bg" | "background" => Ok(Self::Background),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unlock_keeps_inner_spaces() {
        let Command::Unlock(passphrase) = "unlock  correct horse battery ".parse().unwrap() else {
            unreachable!("parsed as another command");
        };
        assert_eq!(passphrase.expose(), "correct horse battery");
    }

    #[test]
    fn verbs_parse() {
        assert!(matches!("lock".parse(), Ok(Command::Lock)));
        assert!(matches!(" fg ".parse(), Ok(Command::Foreground)));
        assert!(matches!("background".parse(), Ok(Command::Background)));
        assert!(matches!("status".parse(), Ok(Command::Status)));
        assert!(matches!("exit".parse(), Ok(Command::Quit)));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert_eq!("".parse::<Command>().unwrap_err(), CommandError::Empty);
        assert_eq!("unlock".parse::<Command>().unwrap_err(), CommandError::MissingPassphrase);
        assert_eq!(
            "reboot now".parse::<Command>().unwrap_err(),
            CommandError::Unknown("reboot".into())
        );
    }
}
