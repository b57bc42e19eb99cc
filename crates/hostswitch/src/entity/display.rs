use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;

use super::Capability;
use super::Entity;
use super::EntityContext;
use super::EntityFactoryResult;
use super::FailurePolicy;
use super::ENTITY_FACTORIES;
use crate::actions::Action;
use crate::actions::ActionProvider;
use crate::error::ActionError;

/// Display power: on wakes the screen, off powers the monitor down.
///
/// There is no reliable way to read display power back, so the entity starts
/// from the configured state. Failures are optimistic: waking and sleeping
/// are fire-and-forget and the requested state is reported regardless.
pub struct Display {
    actions: Arc<dyn ActionProvider>,
}

impl Display {
    pub fn new(actions: Arc<dyn ActionProvider>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl Capability for Display {
    fn kind(&self) -> &'static str {
        "display"
    }

    async fn apply(&self, on: bool) -> Result<(), ActionError> {
        let action = if on {
            Action::WakeDisplay
        } else {
            Action::SleepDisplay
        };
        self.actions.perform(action).await
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Optimistic
    }
}

#[distributed_slice(ENTITY_FACTORIES)]
fn init_display(ctx: &EntityContext) -> EntityFactoryResult {
    let config = &ctx.config.display;
    if !config.enabled {
        return Ok(Vec::new());
    }

    let entity = Entity::new(
        &ctx.config.mqtt.discovery_prefix,
        &ctx.config.device,
        "display",
        &config.name,
        Box::new(Display::new(ctx.actions.clone())),
    )
    .with_state(config.initial_state);
    Ok(vec![entity])
}
