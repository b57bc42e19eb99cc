//! OS-level side effects behind the switches.
//!
//! Entities never touch the operating system directly; they ask an
//! [`ActionProvider`] to perform an [`Action`]. The production provider runs
//! configured commands, tests substitute a recording mock.

mod command;

use std::fmt;

use async_trait::async_trait;

pub use command::CommandProvider;
pub(crate) use command::run_command;

use crate::error::ActionError;

/// Desktop colour scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

/// A single OS-level side effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Simulate user input so the display leaves power saving
    WakeDisplay,

    /// Ask the monitor to power off
    SleepDisplay,

    /// Write the theme preference
    SetTheme(Theme),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::WakeDisplay => f.write_str("wake display"),
            Action::SleepDisplay => f.write_str("sleep display"),
            Action::SetTheme(theme) => write!(f, "set {} theme", theme),
        }
    }
}

/// Performs OS actions on behalf of entities
#[async_trait]
pub trait ActionProvider: Send + Sync {
    /// Carry out `action`, returning once the OS call has completed
    async fn perform(&self, action: Action) -> Result<(), ActionError>;

    /// Read the theme preference currently in effect
    async fn current_theme(&self) -> Result<Theme, ActionError>;
}

/// Recording provider for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockActionProvider {
    pub performed: std::sync::Mutex<Vec<Action>>,
    pub theme: Option<Theme>,
    pub fail: bool,
}

#[cfg(test)]
impl MockActionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose every action fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_theme(theme: Theme) -> Self {
        Self {
            theme: Some(theme),
            ..Self::default()
        }
    }

    pub fn performed(&self) -> Vec<Action> {
        self.performed.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ActionProvider for MockActionProvider {
    async fn perform(&self, action: Action) -> Result<(), ActionError> {
        self.performed.lock().unwrap().push(action);
        if self.fail {
            return Err(ActionError::Other(format!("mock failure: {}", action)));
        }
        Ok(())
    }

    async fn current_theme(&self) -> Result<Theme, ActionError> {
        self.theme
            .ok_or_else(|| ActionError::Unsupported("theme query".to_string()))
    }
}
