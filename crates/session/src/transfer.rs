//! File transfer sub-flows: SCP over `exec` and the `sftp` subsystem.
//!
//! The transfer protocols themselves are provided by external engines; the
//! session only recognises the requests and hands the channel over.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::channel::{BoxReader, BoxWriter, SessionChannel};

/// Errors reported by transfer engines.
#[derive(Error, Debug)]
pub enum TransferError {
    /// No engine is configured for this transfer kind.
    #[error("{0} is not available")]
    Unavailable(&'static str),

    /// The command line could not be understood.
    #[error("invalid scp command: {0}")]
    InvalidCommand(String),

    /// The transfer failed.
    #[error("transfer failed: {0}")]
    Failed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Returns true when an `exec` command line invokes scp.
///
/// The first whitespace-separated token must be `scp`, in any case.
pub fn is_scp_command(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|token| token.eq_ignore_ascii_case("scp"))
}

/// Builds SCP engines from `exec` command lines.
pub trait ScpEngineFactory: Send + Sync {
    /// Create an engine bound to the channel's streams.
    fn from_command(
        &self,
        command: &str,
        input: BoxReader,
        output: BoxWriter,
        stderr: BoxWriter,
    ) -> Result<Box<dyn ScpEngine>, TransferError>;
}

/// A configured SCP transfer.
#[async_trait]
pub trait ScpEngine: Send {
    /// Run the transfer to completion.
    async fn copy(self: Box<Self>) -> Result<(), TransferError>;
}

/// Builds SFTP servers bound to a channel.
pub trait SftpServerFactory: Send + Sync {
    /// Create a server serving the channel's byte stream.
    fn new_server(
        &self,
        channel: Arc<dyn SessionChannel>,
    ) -> Result<Box<dyn SftpServer>, TransferError>;
}

/// An SFTP server attached to a channel.
#[async_trait]
pub trait SftpServer: Send {
    /// Serve requests until the client disconnects.
    async fn serve(self: Box<Self>) -> Result<(), TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scp_commands() {
        assert!(is_scp_command("scp -t /tmp/file"));
        assert!(is_scp_command("scp"));
        assert!(is_scp_command("  scp -f a"));
        assert!(is_scp_command("SCP -t ."));
        assert!(is_scp_command("scp\t-v -t ."));
    }

    #[test]
    fn test_non_scp_commands() {
        assert!(!is_scp_command("scpx -t ."));
        assert!(!is_scp_command("echo scp"));
        assert!(!is_scp_command("/usr/bin/scp -t ."));
        assert!(!is_scp_command(""));
    }

    #[test]
    fn test_transfer_error_display() {
        assert_eq!(
            TransferError::Unavailable("sftp").to_string(),
            "sftp is not available"
        );
    }
}
