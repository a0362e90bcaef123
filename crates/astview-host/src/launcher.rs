//! Starting view processes.

use astview_core::{Address, RemotingError, Result, ViewLauncher};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

/// Spawns the view executable with `--url <base>?address=<json>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
    base_url: Url,
    debug: bool,
}

impl ProcessLauncher {
    pub fn new(executable: PathBuf, base_url: Url) -> Self {
        Self {
            executable,
            base_url,
            debug: false,
        }
    }

    /// Pass `--debug` on to spawned views.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn command(&self, title: &str, address: &Address) -> Result<Command> {
        let url = address.launch_url(&self.base_url)?;
        let mut command = Command::new(&self.executable);
        command
            .arg("--url")
            .arg(url.as_str())
            .arg("--title")
            .arg(title)
            .stdin(Stdio::null());
        if self.debug {
            command.arg("--debug");
        }
        Ok(command)
    }
}

impl ViewLauncher for ProcessLauncher {
    fn launch(&self, title: &str, address: &Address) -> Result<()> {
        let mut child = self
            .command(title, address)?
            .spawn()
            .map_err(|e| RemotingError::Config {
                message: format!(
                    "failed to start view {}: {}",
                    self.executable.display(),
                    e
                ),
            })?;

        info!(
            "Started view process {} for key {}",
            child.id().map(|id| id.to_string()).unwrap_or_default(),
            address.key
        );

        let key = address.key.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("View process for key {} exited: {}", key, status),
                Err(e) => warn!("Failed to wait for view process for key {}: {}", key, e),
            }
        });
        Ok(())
    }
}

/// Does not start anything; prints the URL so a view can be opened by hand.
#[derive(Debug, Clone)]
pub struct UrlLauncher {
    base_url: Url,
}

impl UrlLauncher {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

impl ViewLauncher for UrlLauncher {
    fn launch(&self, title: &str, address: &Address) -> Result<()> {
        let url = address.launch_url(&self.base_url)?;
        info!("Open view '{}' manually", title);
        // Intentional stdout: scripts pick this line up.
        println!("VIEW_URL={}", url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_carries_address_url() {
        let launcher = ProcessLauncher::new(
            PathBuf::from("astview-view"),
            Url::parse("astview://view").unwrap(),
        )
        .with_debug(true);
        let command = launcher
            .command("AST", &Address::new("localhost", 1235, "3"))
            .unwrap();

        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "--url");
        assert_eq!(
            Address::from_url(&args[1]).unwrap(),
            Some(Address::new("localhost", 1235, "3"))
        );
        assert_eq!(&args[2..], ["--title", "AST", "--debug"]);
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_config_error() {
        let launcher = ProcessLauncher::new(
            PathBuf::from("/nonexistent/astview-view"),
            Url::parse("astview://view").unwrap(),
        );
        let result = launcher.launch("AST", &Address::new("localhost", 1235, "1"));
        assert!(matches!(result, Err(RemotingError::Config { .. })));
    }
}
