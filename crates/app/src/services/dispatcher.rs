//! Command dispatcher — executes relay commands against the hub.
//!
//! Every command yields a [`CommandResponse`]; failures never escape as
//! errors, they become `{success: false}` after being logged. Commands that
//! require the relay session to be rebuilt say so through a
//! [`SessionDirective`] instead of touching the session themselves.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;

use hubrelay_domain::command::{CapabilityCommand, Command, CommandEnvelope, CommandResponse};
use hubrelay_domain::error::BridgeError;
use hubrelay_domain::flow::{FlowCommand, merge_flows};
use hubrelay_domain::subscription::{SubscriptionAction, SubscriptionRequest};
use hubrelay_domain::time::now;

use crate::ports::{HubApi, SettingsStore};
use crate::services::authorization::AuthorizationFilter;
use crate::services::settings::Settings;

/// What the session should do once the response has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirective {
    Continue,
    Reinitialize,
}

/// Outcome of one dispatched command.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub response: CommandResponse,
    pub directive: SessionDirective,
}

impl Dispatched {
    fn reply(response: CommandResponse) -> Self {
        Self {
            response,
            directive: SessionDirective::Continue,
        }
    }
}

/// Property name of [`Command::GetLocationProperty`] listing flows.
const FLOWS_PROPERTY: &str = "flows";

pub struct CommandDispatcher<H, S> {
    hub: Arc<H>,
    settings: Arc<Settings<S>>,
    filter: AuthorizationFilter<S>,
    relay_url: String,
}

impl<H, S> CommandDispatcher<H, S>
where
    H: HubApi,
    S: SettingsStore,
{
    pub fn new(hub: Arc<H>, settings: Arc<Settings<S>>, relay_url: impl Into<String>) -> Self {
        let filter = AuthorizationFilter::new(Arc::clone(&settings));
        Self {
            hub,
            settings,
            filter,
            relay_url: relay_url.into(),
        }
    }

    /// Execute one command envelope.
    pub async fn dispatch(&self, envelope: CommandEnvelope) -> Dispatched {
        tracing::debug!(?envelope, "received command");
        let command = Command::parse(envelope);
        let name = command.name().to_string();
        match self.execute(command).await {
            Ok(dispatched) => dispatched,
            Err(err) => {
                tracing::error!(command = %name, error = %err, "command failed");
                Dispatched::reply(CommandResponse::failure())
            }
        }
    }

    async fn execute(&self, command: Command) -> Result<Dispatched, BridgeError> {
        let response = match command {
            Command::SendCommand { device_id, entries } => {
                self.send_command(device_id, entries).await?
            }
            Command::GetDevice { device_id } => self.get_device(device_id).await?,
            Command::GetDevices => self.get_devices().await?,
            Command::GetSubscriptions => self.get_subscriptions().await?,
            Command::UpdateSubscriptions { action, entries } => {
                self.update_subscriptions(action, entries).await?
            }
            Command::LocationCommand { command, payload } => {
                self.location_command(command.as_deref(), payload).await?
            }
            Command::GetLocationProperty { property } => {
                self.location_property(property.as_deref()).await?
            }
            Command::GetEventUrl => CommandResponse::ok().with_url(self.relay_url.clone()),
            Command::SetEventUrl { url } => {
                tracing::info!(?url, "event url change requested; reinitializing relay session");
                return Ok(Dispatched {
                    response: CommandResponse::ok(),
                    directive: SessionDirective::Reinitialize,
                });
            }
            Command::Unknown(kind) => {
                tracing::debug!(command = %kind, "unsupported command");
                CommandResponse::failure()
            }
        };
        Ok(Dispatched::reply(response))
    }

    async fn send_command(
        &self,
        device_id: Option<String>,
        entries: Vec<Value>,
    ) -> Result<CommandResponse, BridgeError> {
        let Some(device_id) = device_id else {
            tracing::warn!("send_command without deviceId");
            return Ok(CommandResponse::failure());
        };
        if !self.settings.is_device_authorized(&device_id).await? {
            tracing::debug!(%device_id, "command ignored: device not authorized");
            return Ok(CommandResponse::failure());
        }

        let commands: Vec<CapabilityCommand> = entries
            .iter()
            .filter_map(|entry| {
                let command = CapabilityCommand::from_entry(entry);
                if command.is_none() {
                    tracing::warn!(%device_id, %entry, "invalid command entry");
                }
                command
            })
            .collect();

        let results = join_all(commands.iter().map(|command| {
            tracing::info!(
                %device_id,
                capability = %command.capability,
                value = %command.value,
                "sending command"
            );
            self.hub
                .set_capability_value(&device_id, &command.capability, command.value.clone())
        }))
        .await;

        let mut success = true;
        for (command, result) in commands.iter().zip(results) {
            if let Err(err) = result {
                tracing::error!(
                    %device_id,
                    capability = %command.capability,
                    error = %err,
                    "capability command failed"
                );
                success = false;
            }
        }
        Ok(if success {
            CommandResponse::ok()
        } else {
            CommandResponse::failure()
        })
    }

    async fn get_device(&self, device_id: Option<String>) -> Result<CommandResponse, BridgeError> {
        let Some(device_id) = device_id else {
            return Ok(CommandResponse::failure());
        };
        let things = self.settings.selected_things().await?;
        let Some(selection) = things.get(&device_id).filter(|s| s.authorized) else {
            tracing::debug!(%device_id, "get_device ignored: device not authorized");
            return Ok(CommandResponse::failure());
        };
        let Some(mut device) = self.hub.get_device(&device_id).await? else {
            tracing::debug!(%device_id, "device not found on hub");
            return Ok(CommandResponse::failure());
        };
        let custom = self.settings.custom_capabilities().await?;
        device.inject_metadata(&custom, Some(selection));
        Ok(CommandResponse::ok().with_data(serde_json::to_value(device)?))
    }

    async fn get_devices(&self) -> Result<CommandResponse, BridgeError> {
        let auth = self.settings.authorizations().await?;
        let custom = self.settings.custom_capabilities().await?;

        let mut things = Vec::new();
        for mut device in self.hub.get_devices().await? {
            let Some(selection) = auth.things.get(&device.id).filter(|s| s.authorized) else {
                continue;
            };
            device.inject_metadata(&custom, Some(selection));
            things.push(serde_json::to_value(device)?);
        }

        let stamp = now().timestamp_millis();
        for user in self.hub.get_users().await? {
            if auth.users.is_authorized(&user.id) {
                things.push(serde_json::to_value(user.to_thing(stamp))?);
            }
        }
        tracing::debug!(count = things.len(), "listing authorized things");
        Ok(CommandResponse::ok().with_data(Value::Array(things)))
    }

    async fn get_subscriptions(&self) -> Result<CommandResponse, BridgeError> {
        let all = self.settings.event_subscriptions().await?;
        let visible = self.filter.filter_subscriptions(all).await?;
        Ok(CommandResponse::ok().with_data(serde_json::to_value(visible)?))
    }

    async fn update_subscriptions(
        &self,
        action: SubscriptionAction,
        entries: Option<Vec<Value>>,
    ) -> Result<CommandResponse, BridgeError> {
        let Some(entries) = entries else {
            return Ok(CommandResponse::ok());
        };
        let requests: Vec<SubscriptionRequest> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(request) => Some(request),
                Err(err) => {
                    tracing::warn!(error = %err, "invalid subscription entry");
                    None
                }
            })
            .collect();
        let permitted = self.filter.filter_requests(requests).await?;
        tracing::info!(?action, count = permitted.len(), "updating subscriptions");
        self.settings
            .update_event_subscriptions(&permitted, action)
            .await?;
        Ok(CommandResponse::ok())
    }

    async fn location_command(
        &self,
        command: Option<&str>,
        payload: Value,
    ) -> Result<CommandResponse, BridgeError> {
        let flow = match command.unwrap_or_default().parse::<FlowCommand>() {
            Ok(flow) => flow,
            Err(err) => {
                tracing::warn!(error = %err, "location command rejected");
                return Ok(CommandResponse::failure());
            }
        };
        tracing::info!(command = %flow, "running flow command");
        self.hub.run_flow_command(flow, payload).await?;
        Ok(CommandResponse::ok())
    }

    async fn location_property(
        &self,
        property: Option<&str>,
    ) -> Result<CommandResponse, BridgeError> {
        if property != Some(FLOWS_PROPERTY) {
            tracing::debug!(?property, "unsupported location property");
            return Ok(CommandResponse::failure());
        }
        let flows = self.hub.get_flows().await?;
        let advanced = self.hub.get_advanced_flows().await?;
        Ok(CommandResponse::ok().with_data(Value::Object(merge_flows(flows, advanced))))
    }
}
