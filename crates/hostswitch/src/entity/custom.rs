use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use linkme::distributed_slice;

use super::Capability;
use super::Entity;
use super::EntityContext;
use super::EntityFactoryResult;
use super::FailurePolicy;
use super::ENTITY_FACTORIES;
use super::UNKNOWN_PAYLOAD;
use crate::actions::run_command;
use crate::config::sanitize_host_id;
use crate::error::ActionError;
use crate::error::ConfigError;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), ActionError>> + Send>>;
type Handler = Box<dyn Fn(bool) -> HandlerFuture + Send + Sync>;

/// Capability whose command handling is a closure supplied at construction.
///
/// Lets a deployment attach its own behaviour to one entity without a new
/// capability type. The closure receives `true` for on and `false` for off.
pub struct Custom {
    kind: &'static str,
    policy: FailurePolicy,
    handler: Handler,
}

impl Custom {
    pub fn new<F, Fut>(kind: &'static str, policy: FailurePolicy, handler: F) -> Self
    where
        F: Fn(bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Self {
            kind,
            policy,
            handler: Box::new(move |on| Box::pin(handler(on))),
        }
    }
}

#[async_trait]
impl Capability for Custom {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn apply(&self, on: bool) -> Result<(), ActionError> {
        (self.handler)(on).await
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }
}

/// Switches declared under `[[switches]]`, each running one command for on
/// and one for off.
#[distributed_slice(ENTITY_FACTORIES)]
fn init_command_switches(ctx: &EntityContext) -> EntityFactoryResult {
    let mut entities = Vec::with_capacity(ctx.config.switches.len());

    for switch in &ctx.config.switches {
        if switch.object_id.is_empty() || sanitize_host_id(&switch.object_id) != switch.object_id
        {
            return Err(ConfigError::Invalid {
                field: "switches.object_id",
                message: format!(
                    "'{}' must be non-empty and contain only [a-z0-9_]",
                    switch.object_id
                ),
            }
            .into());
        }
        if switch.on.is_empty() || switch.off.is_empty() {
            return Err(ConfigError::Invalid {
                field: "switches.on",
                message: format!("switch '{}' needs both on and off commands", switch.object_id),
            }
            .into());
        }
        if switch.payload_on == switch.payload_off
            || switch.payload_on == UNKNOWN_PAYLOAD
            || switch.payload_off == UNKNOWN_PAYLOAD
        {
            return Err(ConfigError::Invalid {
                field: "switches.payload_on",
                message: format!(
                    "switch '{}' needs two distinct payloads, neither of them '{}'",
                    switch.object_id, UNKNOWN_PAYLOAD
                ),
            }
            .into());
        }

        let on_argv = switch.on.clone();
        let off_argv = switch.off.clone();
        let label = switch.object_id.clone();
        let policy = if switch.optimistic {
            FailurePolicy::Optimistic
        } else {
            FailurePolicy::Strict
        };

        let capability = Custom::new("command", policy, move |on| {
            let argv = if on { on_argv.clone() } else { off_argv.clone() };
            let what = format!("{} {}", label, if on { "on" } else { "off" });
            async move { run_command(&what, &argv).await.map(|_| ()) }
        });

        let entity = Entity::new(
            &ctx.config.mqtt.discovery_prefix,
            &ctx.config.device,
            &switch.object_id,
            &switch.name,
            Box::new(capability),
        )
        .with_payloads(&switch.payload_on, &switch.payload_off)
        .with_state(switch.initial_state);
        entities.push(entity);
    }

    Ok(entities)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::entity::tests::device;
    use crate::entity::SwitchState;
    use crate::mqtt::client::MockMqttClient;

    #[tokio::test]
    async fn test_injected_handler_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let custom = Custom::new("counter", FailurePolicy::Strict, move |on| {
            let seen = seen.clone();
            async move {
                assert!(on);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let mut entity = Entity::new(
            "homeassistant",
            &device(),
            "counter",
            "Counter",
            Box::new(custom),
        );
        let mut client = MockMqttClient::new();
        entity.handle_command("ON", &mut client).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entity.state(), SwitchState::On);
    }

    #[tokio::test]
    async fn test_failure_policy_is_per_instance() {
        let failing = |policy| {
            Custom::new("broken", policy, |_| async {
                Err(ActionError::Other("nope".to_string()))
            })
        };
        let mut client = MockMqttClient::new();

        let mut strict = Entity::new(
            "homeassistant",
            &device(),
            "strict",
            "Strict",
            Box::new(failing(FailurePolicy::Strict)),
        );
        strict.handle_command("ON", &mut client).await.unwrap();
        assert_eq!(strict.state(), SwitchState::Unknown);

        let mut optimistic = Entity::new(
            "homeassistant",
            &device(),
            "optimistic",
            "Optimistic",
            Box::new(failing(FailurePolicy::Optimistic)),
        );
        optimistic.handle_command("ON", &mut client).await.unwrap();
        assert_eq!(optimistic.state(), SwitchState::On);
    }
}
