//! Classification of command results into exit messages.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use channel_protocol::signals;
use channel_protocol::ExitOutcome;
use nix::sys::signal::Signal;

use crate::process::RunError;

/// Classify the result of running a command.
///
/// - success is exit status 0
/// - a native PTY exit code or terminating signal is reported as-is
/// - a wait status reports the signal that killed the process, or its code
/// - everything else (launch failures, undecodable statuses) is unclassified
pub fn classify(result: &Result<(), RunError>) -> ExitOutcome {
    match result {
        Ok(()) => ExitOutcome::Success,
        Err(RunError::PtyExit { code }) => ExitOutcome::ExitCode(*code),
        Err(RunError::PtySignaled {
            signal,
            core_dumped,
        }) => ExitOutcome::Signaled {
            signal: signals::exit_signal_name(*signal),
            core_dumped: *core_dumped,
        },
        Err(RunError::Exited(status)) => classify_status(*status),
        Err(_) => ExitOutcome::Unclassified,
    }
}

fn classify_status(status: ExitStatus) -> ExitOutcome {
    if let Some(number) = status.signal() {
        return match Signal::try_from(number) {
            Ok(signal) => ExitOutcome::Signaled {
                signal: signals::exit_signal_name(signal),
                core_dumped: status.core_dumped(),
            },
            Err(_) => ExitOutcome::Unclassified,
        };
    }

    match status.code() {
        Some(code) => ExitOutcome::ExitCode(code as u32),
        None => ExitOutcome::Unclassified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyError;

    /// Raw wait status for a normal exit with `code`.
    fn exited(code: i32) -> RunError {
        RunError::Exited(ExitStatus::from_raw(code << 8))
    }

    #[test]
    fn test_success() {
        assert_eq!(classify(&Ok(())), ExitOutcome::Success);
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(classify(&Err(exited(3))), ExitOutcome::ExitCode(3));
        assert_eq!(classify(&Err(exited(255))), ExitOutcome::ExitCode(255));
    }

    #[test]
    fn test_pty_exit_code() {
        assert_eq!(
            classify(&Err(RunError::PtyExit { code: 130 })),
            ExitOutcome::ExitCode(130)
        );
    }

    #[test]
    fn test_pty_signaled() {
        assert_eq!(
            classify(&Err(RunError::PtySignaled {
                signal: Signal::SIGINT,
                core_dumped: false
            })),
            ExitOutcome::Signaled {
                signal: "INT".to_string(),
                core_dumped: false
            }
        );
    }

    #[test]
    fn test_killed_by_signal() {
        let status = ExitStatus::from_raw(Signal::SIGKILL as i32);
        assert_eq!(
            classify(&Err(RunError::Exited(status))),
            ExitOutcome::Signaled {
                signal: "KILL".to_string(),
                core_dumped: false
            }
        );
    }

    #[test]
    fn test_core_dump_flag() {
        let status = ExitStatus::from_raw(Signal::SIGSEGV as i32 | 0x80);
        assert_eq!(
            classify(&Err(RunError::Exited(status))),
            ExitOutcome::Signaled {
                signal: "SEGV".to_string(),
                core_dumped: true
            }
        );
    }

    #[test]
    fn test_signal_outside_rfc_set() {
        let status = ExitStatus::from_raw(Signal::SIGWINCH as i32);
        assert_eq!(
            classify(&Err(RunError::Exited(status))),
            ExitOutcome::Signaled {
                signal: "WINCH".to_string(),
                core_dumped: false
            }
        );
    }

    #[test]
    fn test_stopped_status_is_unclassified() {
        // 0x137f: stopped by SIGSTOP, neither exited nor signaled.
        let status = ExitStatus::from_raw(0x137f);
        assert_eq!(
            classify(&Err(RunError::Exited(status))),
            ExitOutcome::Unclassified
        );
    }

    #[test]
    fn test_other_errors_are_unclassified() {
        let launch = RunError::Launch(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(classify(&Err(launch)), ExitOutcome::Unclassified);
        assert_eq!(
            classify(&Err(RunError::Pty(PtyError::NotOpen))),
            ExitOutcome::Unclassified
        );
        assert_eq!(
            classify(&Err(RunError::NotStarted)),
            ExitOutcome::Unclassified
        );
    }
}
