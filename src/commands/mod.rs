//! Operator commands and their routing to the controller
//!
//! A command is delivered over the controller's live relay session when one
//! exists, otherwise published through the broker. When neither path is
//! available the outcome says so; that is not an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bridge::BrokerLink;
use crate::sessions::{Role, SharedRegistry};
use crate::Result;

/// Detail reported when no channel can reach the controller
pub const CONTROLLER_UNAVAILABLE: &str = "Controller not connected";

/// Parameters of the mixing program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixParams {
    pub speed: i64,
}

/// Parameters of the drain program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainParams {
    pub rate: i64,
    pub duration: i64,
}

/// Parameters of a fermentation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FermentationParams {
    pub temperature: f64,
    #[serde(rename = "pH")]
    pub ph: f64,
    pub dissolved_oxygen: f64,
    pub nutrient_concentration: f64,
    pub base_concentration: f64,
    pub duration: i64,
    pub nutrient_delay: f64,
    pub experiment_name: String,
    pub comment: String,
}

/// A program the controller can run
///
/// Serializes to the flat wire message, tagged by `program`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "program", rename_all = "snake_case")]
pub enum Command {
    Mix(MixParams),
    Drain(DrainParams),
    Fermentation(FermentationParams),
    Stop,
}

impl Command {
    /// Program name as it appears in the wire message
    #[must_use]
    pub const fn program(&self) -> &'static str {
        match self {
            Self::Mix(_) => "mix",
            Self::Drain(_) => "drain",
            Self::Fermentation(_) => "fermentation",
            Self::Stop => "stop",
        }
    }

    /// Render the wire message
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be serialized
    pub fn render(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Operator-facing confirmation once the command is on its way
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Mix(p) => format!("Mix program started with speed {}", p.speed),
            Self::Drain(p) => format!(
                "Drain program started with rate {} and duration {}",
                p.rate, p.duration
            ),
            Self::Fermentation(_) => "Fermentation program started".to_string(),
            Self::Stop => "All programs stopped".to_string(),
        }
    }
}

/// Path a command took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The controller's relay session
    Direct,
    /// The broker commands topic
    Broker,
    /// Nothing reached the controller
    None,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Broker => "broker",
            Self::None => "none",
        }
    }
}

/// Result of routing one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub channel: Channel,
    pub detail: String,
}

impl DispatchOutcome {
    #[must_use]
    pub const fn delivered(&self) -> bool {
        !matches!(self.channel, Channel::None)
    }
}

/// Chooses a channel for each command and delivers it
#[derive(Clone)]
pub struct CommandRouter {
    registry: SharedRegistry,
    broker: Option<Arc<dyn BrokerLink>>,
}

impl CommandRouter {
    #[must_use]
    pub fn new(registry: SharedRegistry, broker: Option<Arc<dyn BrokerLink>>) -> Self {
        Self { registry, broker }
    }

    #[must_use]
    pub const fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Whether the broker path is currently usable
    #[must_use]
    pub fn broker_connected(&self) -> bool {
        self.broker.as_ref().is_some_and(|b| b.is_connected())
    }

    /// Deliver `command` over the first available channel
    ///
    /// A failed direct send drops the controller session and falls through
    /// to the broker.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the broker accepted the
    /// connection but the publish failed
    pub async fn dispatch(&self, command: &Command) -> Result<DispatchOutcome> {
        let wire = command.render()?;
        let text = serde_json::to_string(&wire)?;

        let delivery = self.registry.send(Role::Controller, &text).await;
        if delivery.any() {
            tracing::info!(program = command.program(), channel = "direct", "command dispatched");
            return Ok(DispatchOutcome {
                channel: Channel::Direct,
                detail: "sent to controller session".to_string(),
            });
        }
        if delivery.failed() > 0 {
            tracing::warn!(
                program = command.program(),
                "controller session did not accept command, trying broker"
            );
        }

        if let Some(broker) = self.broker.as_ref().filter(|b| b.is_connected()) {
            broker.publish_command(&wire).await?;
            tracing::info!(program = command.program(), channel = "broker", "command dispatched");
            return Ok(DispatchOutcome {
                channel: Channel::Broker,
                detail: "published to broker".to_string(),
            });
        }

        tracing::warn!(program = command.program(), "no channel reaches the controller");
        Ok(DispatchOutcome {
            channel: Channel::None,
            detail: CONTROLLER_UNAVAILABLE.to_string(),
        })
    }
}
