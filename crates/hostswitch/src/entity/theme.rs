use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;

use super::Capability;
use super::Entity;
use super::EntityContext;
use super::EntityFactoryResult;
use super::FailurePolicy;
use super::SwitchState;
use super::ENTITY_FACTORIES;
use crate::actions::Action;
use crate::actions::ActionProvider;
use crate::actions::Theme;
use crate::error::ActionError;

/// Dark mode switch: on selects the dark theme, off the light theme.
///
/// The theme preference is readable, so the initial state mirrors the OS.
/// A failed write leaves the state untouched.
pub struct ThemeMode {
    actions: Arc<dyn ActionProvider>,
}

impl ThemeMode {
    pub fn new(actions: Arc<dyn ActionProvider>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl Capability for ThemeMode {
    fn kind(&self) -> &'static str {
        "theme"
    }

    async fn apply(&self, on: bool) -> Result<(), ActionError> {
        let theme = if on { Theme::Dark } else { Theme::Light };
        self.actions.perform(Action::SetTheme(theme)).await
    }

    async fn query_state(&self) -> Result<Option<SwitchState>, ActionError> {
        let theme = self.actions.current_theme().await?;
        Ok(Some(SwitchState::from_on(theme == Theme::Dark)))
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Strict
    }
}

#[distributed_slice(ENTITY_FACTORIES)]
fn init_theme(ctx: &EntityContext) -> EntityFactoryResult {
    let config = &ctx.config.theme;
    if !config.enabled {
        return Ok(Vec::new());
    }

    let entity = Entity::new(
        &ctx.config.mqtt.discovery_prefix,
        &ctx.config.device,
        "dark_mode",
        &config.name,
        Box::new(ThemeMode::new(ctx.actions.clone())),
    );
    Ok(vec![entity])
}
