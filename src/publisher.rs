//! Outbound setpoint commands
//!
//! Decides from a [`StateDelta`] whether the device needs a command and
//! publishes it on the command topic.

use crate::observability::SessionMetrics;
use crate::protocol::{PhoneCommand, COMMAND_TOPIC};
use crate::state::{ChangeOrigin, Readiness, StateDelta};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Publishes setpoint commands for reconciled changes
pub struct CommandPublisher {
    metrics: Arc<SessionMetrics>,
}

impl CommandPublisher {
    pub fn new(metrics: Arc<SessionMetrics>) -> Self {
        Self { metrics }
    }

    /// Which command, if any, a delta calls for.
    ///
    /// Device echoes are never sent back. Until stored setpoints are known a
    /// user gesture only produces the empty command, so defaults can never
    /// overwrite what the device holds.
    pub fn plan_command(delta: &StateDelta, readiness: Readiness) -> Option<PhoneCommand> {
        if delta.origin == ChangeOrigin::Device {
            return None;
        }

        if readiness != Readiness::Ready {
            return match delta.origin {
                ChangeOrigin::User => Some(PhoneCommand::noop()),
                _ => None,
            };
        }

        delta
            .touches_setpoints()
            .then(|| delta.setpoints.to_command())
    }

    /// Publish the command for `delta`, if any. Failures are logged and
    /// counted; the caller carries on either way.
    pub async fn publish_if_changed<T>(&self, transport: &T, delta: &StateDelta, readiness: Readiness)
    where
        T: Transport + ?Sized,
    {
        let Some(command) = Self::plan_command(delta, readiness) else {
            debug!(origin = ?delta.origin, "No command needed");
            return;
        };

        let payload = match command.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize command");
                self.metrics.publish_failed();
                return;
            }
        };

        match transport.publish(COMMAND_TOPIC, payload, false).await {
            Ok(()) => {
                self.metrics.command_published(command.is_noop());
                info!(
                    topic = COMMAND_TOPIC,
                    noop = command.is_noop(),
                    command = ?command.phone_data,
                    "Published setpoint command"
                );
            }
            Err(e) => {
                self.metrics.publish_failed();
                error!(topic = COMMAND_TOPIC, error = %e, "Failed to publish setpoint command");
            }
        }
    }
}
