use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::Action;
use super::ActionProvider;
use super::Theme;
use crate::config::CommandsConfig;
use crate::error::ActionError;

/// Action provider that shells out to a configured command per action
#[derive(Debug, Clone)]
pub struct CommandProvider {
    commands: CommandsConfig,
}

impl CommandProvider {
    pub fn new(commands: CommandsConfig) -> Self {
        Self { commands }
    }

    fn argv_for(&self, action: Action) -> &[String] {
        match action {
            Action::WakeDisplay => &self.commands.display_on,
            Action::SleepDisplay => &self.commands.display_off,
            Action::SetTheme(Theme::Dark) => &self.commands.theme_dark,
            Action::SetTheme(Theme::Light) => &self.commands.theme_light,
        }
    }
}

/// Run `argv` to completion and return its stdout. `what` names the action
/// in errors and logs.
pub(crate) async fn run_command(what: &str, argv: &[String]) -> Result<String, ActionError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ActionError::Unsupported(what.to_string()))?;

    debug!("Running {:?} for {}", argv, what);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ActionError::Spawn {
            program: program.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ActionError::Failed {
            program: program.clone(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl ActionProvider for CommandProvider {
    async fn perform(&self, action: Action) -> Result<(), ActionError> {
        run_command(&action.to_string(), self.argv_for(action))
            .await
            .map(|_| ())
    }

    async fn current_theme(&self) -> Result<Theme, ActionError> {
        let stdout = run_command("theme query", &self.commands.theme_query).await?;
        if stdout.contains(&self.commands.theme_query_dark_marker) {
            Ok(Theme::Dark)
        } else {
            Ok(Theme::Light)
        }
    }
}
