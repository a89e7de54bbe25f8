use tracing::warn;

use intentus_protocol::{AgentResponse, ErrorInfo, IntentEnvelope};

/// A routing middleware hook. Hook failures are logged and never
/// interrupt routing.
pub trait RouterHook: Send + Sync {
    fn name(&self) -> &str;

    fn before_route(&self, _envelope: &IntentEnvelope) -> Result<(), String> {
        Ok(())
    }

    fn after_route(
        &self,
        _envelope: &IntentEnvelope,
        _response: &AgentResponse,
    ) -> Result<(), String> {
        Ok(())
    }

    fn on_error(&self, _envelope: &IntentEnvelope, _error: &ErrorInfo) -> Result<(), String> {
        Ok(())
    }
}

pub(crate) fn run_before(hooks: &[Box<dyn RouterHook>], envelope: &IntentEnvelope) {
    for hook in hooks {
        if let Err(reason) = hook.before_route(envelope) {
            warn!(hook = hook.name(), reason, "before_route hook failed");
        }
    }
}

pub(crate) fn run_after(
    hooks: &[Box<dyn RouterHook>],
    envelope: &IntentEnvelope,
    response: &AgentResponse,
) {
    for hook in hooks {
        if let Err(reason) = hook.after_route(envelope, response) {
            warn!(hook = hook.name(), reason, "after_route hook failed");
        }
    }
    if let Some(error) = &response.error {
        for hook in hooks {
            if let Err(reason) = hook.on_error(envelope, error) {
                warn!(hook = hook.name(), reason, "on_error hook failed");
            }
        }
    }
}
