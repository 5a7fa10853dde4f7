// ── Device registry ──
//
// The set of controllable devices for the account. Readers get a cheap
// snapshot; a refresh swaps in a whole new set at once.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use secrecy::ExposeSecret;
use tracing::debug;

use crate::convert::device_from_thing;
use crate::credentials::CredentialManager;
use crate::error::CoreError;
use crate::model::Device;

/// What changed between two device sets, by thing id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: Vec<Device>,
    pub removed: Vec<Device>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct DeviceRegistry {
    devices: ArcSwap<Vec<Device>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Fetch the account's devices and replace the cached set.
    ///
    /// Entries without a thing id are dropped with a warning. On failure
    /// the previous set is left in place.
    pub async fn refresh(&self, creds: &CredentialManager) -> Result<RegistryDiff, CoreError> {
        let token = creds.token().await?;
        let things = match creds
            .client()
            .list_things(token.access_token.expose_secret())
            .await
        {
            Ok(things) => things,
            Err(e) => {
                creds.note_failure(&e).await;
                return Err(CoreError::fetch(e));
            }
        };

        let devices: Vec<Device> = things.into_iter().filter_map(device_from_thing).collect();
        debug!(count = devices.len(), "device list fetched");
        Ok(self.apply(devices))
    }

    /// Replace the device set wholesale and report the difference.
    pub fn apply(&self, devices: Vec<Device>) -> RegistryDiff {
        let previous = self.devices.swap(Arc::new(devices));
        let current = self.devices.load();

        let old_ids: BTreeSet<&str> = previous.iter().map(|d| d.thing_id.as_str()).collect();
        let new_ids: BTreeSet<&str> = current.iter().map(|d| d.thing_id.as_str()).collect();

        RegistryDiff {
            added: current
                .iter()
                .filter(|d| !old_ids.contains(d.thing_id.as_str()))
                .cloned()
                .collect(),
            removed: previous
                .iter()
                .filter(|d| !new_ids.contains(d.thing_id.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Device>> {
        self.devices.load_full()
    }

    pub fn by_id(&self, thing_id: &str) -> Option<Device> {
        self.devices
            .load()
            .iter()
            .find(|d| d.thing_id == thing_id)
            .cloned()
    }

    /// Look up a device by its friendly name (exact match).
    pub fn by_name(&self, friendly_name: &str) -> Option<Device> {
        self.devices
            .load()
            .iter()
            .find(|d| d.friendly_name == friendly_name)
            .cloned()
    }

    pub fn contains(&self, thing_id: &str) -> bool {
        self.devices.load().iter().any(|d| d.thing_id == thing_id)
    }

    pub fn friendly_names(&self) -> Vec<String> {
        self.devices
            .load()
            .iter()
            .map(|d| d.friendly_name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.load().is_empty()
    }
}
