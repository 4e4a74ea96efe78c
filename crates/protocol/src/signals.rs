//! Translation between SSH signal names and OS signals.
//!
//! SSH names signals without the `SIG` prefix (RFC 4254 §6.10). Only the
//! names listed in the RFC are accepted from peers.

use nix::sys::signal::Signal;

/// Signal names defined by RFC 4254 and their OS counterparts.
const SSH_SIGNALS: &[(&str, Signal)] = &[
    ("ABRT", Signal::SIGABRT),
    ("ALRM", Signal::SIGALRM),
    ("FPE", Signal::SIGFPE),
    ("HUP", Signal::SIGHUP),
    ("ILL", Signal::SIGILL),
    ("INT", Signal::SIGINT),
    ("KILL", Signal::SIGKILL),
    ("PIPE", Signal::SIGPIPE),
    ("QUIT", Signal::SIGQUIT),
    ("SEGV", Signal::SIGSEGV),
    ("TERM", Signal::SIGTERM),
    ("USR1", Signal::SIGUSR1),
    ("USR2", Signal::SIGUSR2),
];

/// Look up the OS signal for an SSH signal name.
pub fn from_ssh_name(name: &str) -> Option<Signal> {
    SSH_SIGNALS
        .iter()
        .find(|(ssh, _)| *ssh == name)
        .map(|(_, signal)| *signal)
}

/// Look up the SSH name for an OS signal defined by the RFC.
pub fn to_ssh_name(signal: Signal) -> Option<&'static str> {
    SSH_SIGNALS
        .iter()
        .find(|(_, os)| *os == signal)
        .map(|(ssh, _)| *ssh)
}

/// Name reported in an `exit-signal` message.
///
/// Signals outside the RFC set are reported by their OS name with the `SIG`
/// prefix removed.
pub fn exit_signal_name(signal: Signal) -> String {
    match to_ssh_name(signal) {
        Some(name) => name.to_string(),
        None => signal
            .as_str()
            .trim_start_matches("SIG")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ssh_name() {
        assert_eq!(from_ssh_name("INT"), Some(Signal::SIGINT));
        assert_eq!(from_ssh_name("KILL"), Some(Signal::SIGKILL));
        assert_eq!(from_ssh_name("USR2"), Some(Signal::SIGUSR2));
    }

    #[test]
    fn test_from_ssh_name_is_exact() {
        assert_eq!(from_ssh_name("SIGINT"), None);
        assert_eq!(from_ssh_name("int"), None);
        assert_eq!(from_ssh_name(""), None);
    }

    #[test]
    fn test_to_ssh_name() {
        assert_eq!(to_ssh_name(Signal::SIGTERM), Some("TERM"));
        assert_eq!(to_ssh_name(Signal::SIGWINCH), None);
    }

    #[test]
    fn test_table_is_bijective() {
        for (name, signal) in SSH_SIGNALS {
            assert_eq!(from_ssh_name(name), Some(*signal));
            assert_eq!(to_ssh_name(*signal), Some(*name));
        }
    }

    #[test]
    fn test_exit_signal_name_fallback() {
        assert_eq!(exit_signal_name(Signal::SIGSEGV), "SEGV");
        assert_eq!(exit_signal_name(Signal::SIGWINCH), "WINCH");
    }
}
