use std::path::Path;
use std::process::{Child, Command, Stdio};

use seekcore_config::ViewerSettings;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("no viewer command configured")]
    EmptyCommand,
    #[error("failed to launch {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait ShellActions {
    fn launch_viewer(&self, path: &Path) -> Result<(), ShellError>;
}

/// Opens files with the configured external viewer.
pub struct ViewerLauncher {
    settings: ViewerSettings,
}

impl ViewerLauncher {
    pub fn new(settings: ViewerSettings) -> Self {
        Self { settings }
    }
}

impl ShellActions for ViewerLauncher {
    fn launch_viewer(&self, path: &Path) -> Result<(), ShellError> {
        launch_viewer(path, &self.settings).map(drop)
    }
}

/// Spawns `command args... path` without waiting for it.
pub fn launch_viewer(path: &Path, viewer: &ViewerSettings) -> Result<Child, ShellError> {
    let command = viewer.command.trim();
    if command.is_empty() {
        return Err(ShellError::EmptyCommand);
    }

    let child = Command::new(command)
        .args(&viewer.args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| ShellError::Spawn {
            command: command.to_string(),
            source,
        })?;

    info!(viewer = command, path = %path.display(), pid = child.id(), "viewer launched");
    Ok(child)
}
