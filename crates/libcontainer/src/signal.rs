//! Signals accepted by the kill operation, parsed from a number or a name
//! with or without the `SIG` prefix

use std::convert::TryFrom;
use std::fmt::Display;

use nix::sys::signal::Signal as NixSignal;

/// POSIX Signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal(NixSignal);

#[derive(Debug, thiserror::Error)]
pub enum SignalError<T> {
    #[error("invalid signal: {0}")]
    InvalidSignal(T),
}

impl TryFrom<&str> for Signal {
    type Error = SignalError<String>;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let invalid = || SignalError::InvalidSignal(s.to_string());
        let upper = s.trim().to_ascii_uppercase();

        if let Ok(number) = upper.parse::<i32>() {
            return Signal::try_from(number).map_err(|_| invalid());
        }

        let name = match upper.as_str() {
            "IOT" | "SIGIOT" => "SIGABRT".to_string(),
            other if other.starts_with("SIG") => other.to_string(),
            other => format!("SIG{other}"),
        };
        NixSignal::iterator()
            .find(|signal| signal.as_str() == name)
            .map(Signal)
            .ok_or_else(invalid)
    }
}

impl TryFrom<i32> for Signal {
    type Error = SignalError<i32>;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        NixSignal::try_from(value)
            .map_err(|_| SignalError::InvalidSignal(value))
            .map(Signal)
    }
}

impl From<NixSignal> for Signal {
    fn from(s: NixSignal) -> Self {
        Signal(s)
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

impl Signal {
    pub(crate) fn into_raw(self) -> NixSignal {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal::*;

    use super::*;

    #[test]
    fn test_conversion_from_string() {
        let test_sets = [
            (SIGHUP, vec!["1", "HUP", "SIGHUP", "hup"]),
            (SIGINT, vec!["2", "INT", "SIGINT"]),
            (SIGABRT, vec!["6", "ABRT", "IOT", "SIGABRT", "SIGIOT"]),
            (SIGKILL, vec!["9", "KILL", "SIGKILL", "sigkill"]),
            (SIGUSR1, vec!["10", "USR1", "SIGUSR1"]),
            (SIGTERM, vec!["15", "TERM", "SIGTERM"]),
            (SIGCHLD, vec!["17", "CHLD", "SIGCHLD"]),
            (SIGCONT, vec!["18", "CONT", "SIGCONT"]),
            (SIGSTOP, vec!["19", "STOP", "SIGSTOP"]),
            (SIGWINCH, vec!["28", "WINCH", "SIGWINCH"]),
            (SIGSYS, vec!["31", "SYS", "SIGSYS"]),
        ];
        for (signal, strings) in test_sets {
            for s in strings {
                assert_eq!(signal, Signal::try_from(s).unwrap().into_raw(), "{s}");
            }
        }
    }

    #[test]
    fn test_conversion_from_string_should_be_failed() {
        assert!(Signal::try_from("invalid").is_err());
        assert!(Signal::try_from("SIG").is_err());
        assert!(Signal::try_from("0").is_err());
        assert!(Signal::try_from("65").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Signal::from(SIGTERM).to_string(), "SIGTERM");
    }
}
