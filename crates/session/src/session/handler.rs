//! Entry point for new session channels.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Session, SessionSettings};
use crate::channel::NewChannel;
use crate::config::Config;
use crate::process::{ProcessRunner, Runner};
use crate::pty::{NativePtyProvider, PtyProvider};
use crate::shell::{ConfiguredShell, ShellLocator};
use crate::transfer::{ScpEngineFactory, SftpServerFactory};

/// Accepts session channels and runs a [`Session`] on each.
#[derive(Clone)]
pub struct SessionChannelHandler {
    settings: SessionSettings,
}

impl SessionChannelHandler {
    /// Creates a handler using host terminals for `pty-req`.
    pub fn new(
        runner: Arc<dyn Runner>,
        shell_locator: Arc<dyn ShellLocator>,
        default_env: BTreeMap<String, String>,
        keepalive_interval: Option<Duration>,
    ) -> Self {
        Self {
            settings: SessionSettings {
                runner,
                shell_locator,
                default_env,
                keepalive_interval,
                pty_provider: Arc::new(NativePtyProvider::default()),
                scp: None,
                sftp: None,
            },
        }
    }

    /// Creates a handler from configuration.
    pub fn from_config(config: &Config) -> Self {
        let session = &config.session;
        Self::new(
            Arc::new(ProcessRunner::new()),
            Arc::new(ConfiguredShell::new(Some(session.shell.clone()))),
            session.default_env.clone(),
            session.keepalive_interval(),
        )
        .with_pty_provider(Arc::new(NativePtyProvider::new(
            session.pty_provider_dir.clone(),
        )))
    }

    /// Use a different PTY provider.
    pub fn with_pty_provider(mut self, provider: Arc<dyn PtyProvider>) -> Self {
        self.settings.pty_provider = provider;
        self
    }

    /// Enable `scp` over `exec`.
    pub fn with_scp(mut self, factory: Arc<dyn ScpEngineFactory>) -> Self {
        self.settings.scp = Some(factory);
        self
    }

    /// Enable the `sftp` subsystem.
    pub fn with_sftp(mut self, factory: Arc<dyn SftpServerFactory>) -> Self {
        self.settings.sftp = Some(factory);
        self
    }

    /// Settings applied to each new session.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Accept a channel and serve it until the session is destroyed.
    ///
    /// Accept failures are logged; nothing else happens in that case.
    pub async fn handle_new_channel(&self, new_channel: Box<dyn NewChannel>) {
        let accepted = match new_channel.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept session channel");
                return;
            }
        };

        let session = Session::new(accepted.channel, &self.settings);
        session.service_requests(accepted.requests).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.session.shell = "/bin/sh".to_string();
        config.session.keepalive_interval_secs = 0;
        config
            .session
            .default_env
            .insert("TZ".to_string(), "UTC".to_string());

        let handler = SessionChannelHandler::from_config(&config);
        let settings = handler.settings();

        assert_eq!(
            settings.shell_locator.shell_path(),
            std::path::PathBuf::from("/bin/sh")
        );
        assert_eq!(settings.keepalive_interval, None);
        assert_eq!(settings.default_env["TZ"], "UTC");
        assert!(settings.scp.is_none());
        assert!(settings.sftp.is_none());
    }

    #[test]
    fn test_default_keepalive_from_config() {
        let handler = SessionChannelHandler::from_config(&Config::default());
        assert_eq!(
            handler.settings().keepalive_interval,
            Some(Duration::from_secs(30))
        );
    }
}
