//! Registrar — aligns hub listeners with the subscription document.
//!
//! A registration pass walks every authorized device and attaches a
//! listener for each subscribed capability it exposes. Composite
//! capabilities attach one listener per contributing part, routed through
//! the [`EventAggregator`]. Passes are additive and idempotent: existing
//! listeners are never duplicated nor removed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use hubrelay_domain::capability::{CompositeCapability, CustomCapabilities};
use hubrelay_domain::device::Device;
use hubrelay_domain::error::BridgeError;
use hubrelay_domain::event::OutboundEvent;
use hubrelay_domain::user::UserSnapshot;

use crate::ports::{CapabilityCallback, HubApi, SettingsStore};
use crate::services::aggregator::EventAggregator;
use crate::services::forwarder::EventSink;
use crate::services::listener_registry::{ListenerRegistry, Registration};
use crate::services::settings::Settings;
use crate::services::user_monitor::UserMonitor;

/// Counts from one registration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub installed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub monitored_users: usize,
}

pub struct Registrar<H, S> {
    hub: Arc<H>,
    settings: Arc<Settings<S>>,
    registry: Arc<ListenerRegistry>,
    aggregator: Arc<EventAggregator<H>>,
    users: Arc<UserMonitor>,
    sink: EventSink,
}

impl<H, S> Registrar<H, S>
where
    H: HubApi + 'static,
    S: SettingsStore,
{
    pub fn new(
        hub: Arc<H>,
        settings: Arc<Settings<S>>,
        aggregator: Arc<EventAggregator<H>>,
        users: Arc<UserMonitor>,
        sink: EventSink,
    ) -> Self {
        Self {
            hub,
            settings,
            registry: Arc::new(ListenerRegistry::new()),
            aggregator,
            users,
            sink,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Run one registration pass.
    ///
    /// A listener that fails to attach is logged and counted; the pass
    /// carries on with the remaining capabilities.
    ///
    /// # Errors
    ///
    /// Returns hub or settings errors raised while reading the inventory.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<RegistrationReport, BridgeError> {
        let devices = self.hub.get_devices().await?;
        let things = self.settings.selected_things().await?;
        let custom = self.settings.custom_capabilities().await?;
        let mut report = RegistrationReport::default();

        for device in devices.iter().filter(|d| things.is_authorized(&d.id)) {
            let Some(subscriptions) = self.settings.device_subscriptions(&device.id).await? else {
                continue;
            };
            for (capability, entry) in &subscriptions {
                if !entry.subscribed {
                    continue;
                }
                if device.has_capability(capability) {
                    self.attach_direct(device, capability, &custom, &mut report)
                        .await;
                } else if let Some(composite) = CompositeCapability::lookup(capability) {
                    self.attach_composite(device, composite, &mut report).await;
                }
            }
        }

        report.monitored_users = self.rescope_users().await?;
        tracing::info!(
            installed = report.installed,
            skipped = report.skipped,
            failed = report.failed,
            monitored_users = report.monitored_users,
            live = self.registry.len(),
            "registration pass complete"
        );
        Ok(report)
    }

    async fn attach_direct(
        &self,
        device: &Device,
        capability: &str,
        custom: &CustomCapabilities,
        report: &mut RegistrationReport,
    ) {
        if self.registry.is_registered(&device.id, capability) {
            return;
        }
        let sink = self.sink.clone();
        let device_id = device.id.clone();
        let capability_id = capability.to_string();
        let attributes = custom.get(&device.id, capability).cloned();
        let callback: CapabilityCallback = Arc::new(move |value: Value| {
            let mut event = OutboundEvent::new(device_id.clone(), capability_id.clone(), value);
            if let Some(attributes) = &attributes {
                event = event.with_custom(attributes.clone());
            }
            if sink.send(event).is_err() {
                tracing::debug!("event pipeline closed; dropping capability event");
            }
        });
        self.attach(device, capability, callback, report).await;
    }

    async fn attach_composite(
        &self,
        device: &Device,
        composite: &'static CompositeCapability,
        report: &mut RegistrationReport,
    ) {
        for part in composite.capabilities() {
            if !device.has_capability(part) || self.registry.is_registered(&device.id, part) {
                continue;
            }
            let aggregator = Arc::clone(&self.aggregator);
            let device_id = device.id.clone();
            let callback: CapabilityCallback = Arc::new(move |value: Value| {
                aggregator.push(composite, OutboundEvent::new(device_id.clone(), part, value));
            });
            self.attach(device, part, callback, report).await;
        }
    }

    async fn attach(
        &self,
        device: &Device,
        capability: &str,
        callback: CapabilityCallback,
        report: &mut RegistrationReport,
    ) {
        match self
            .hub
            .listen_capability(&device.id, capability, callback)
            .await
        {
            Ok(handle) => match self.registry.register(&device.id, capability, handle) {
                Registration::Installed => {
                    tracing::info!(device = %device.name, capability, "registered listener");
                    report.installed += 1;
                }
                Registration::Skipped => report.skipped += 1,
            },
            Err(err) => {
                tracing::warn!(
                    device_id = %device.id,
                    capability,
                    error = %err,
                    "failed to attach listener"
                );
                report.failed += 1;
            }
        }
    }

    async fn rescope_users(&self) -> Result<usize, BridgeError> {
        let users = self.hub.get_users().await?;
        let selected = self.settings.selected_users().await?;
        let subscriptions = self.settings.event_subscriptions().await?;

        let monitored: HashMap<String, UserSnapshot> = users
            .iter()
            .filter(|user| selected.is_authorized(&user.id))
            .filter(|user| {
                subscriptions
                    .get(&user.key().to_string())
                    .is_some_and(|caps| caps.values().any(|entry| entry.subscribed))
            })
            .map(|user| (user.id.clone(), user.snapshot()))
            .collect();
        let count = monitored.len();
        self.users.rescope(monitored);
        if count > 0 {
            self.users.ensure_installed(self.hub.as_ref()).await?;
        }
        Ok(count)
    }
}
