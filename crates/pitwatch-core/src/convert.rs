// ── API-to-domain type conversions ──
//
// Bridges raw `pitwatch_api` wire types into canonical `pitwatch_core::model`
// domain types.

use pitwatch_api::models::Accessory;
use pitwatch_api::{GrillUpdate, Thing};
use tracing::warn;

use crate::model::{Device, DeviceState, Probe};

// ── DeviceState ────────────────────────────────────────────────────

impl From<&GrillUpdate> for DeviceState {
    fn from(update: &GrillUpdate) -> Self {
        let status = &update.status;
        Self {
            grill_temp: status.grill,
            set_temp: status.set,
            pellet_level: status.pellet_level,
            connected: status.connected,
            system_status: status.system_status,
            probes: update
                .accessories()
                .filter(|a| a.is_probe())
                .map(Probe::from)
                .collect(),
        }
    }
}

impl From<&Accessory> for Probe {
    fn from(acc: &Accessory) -> Self {
        let reading = acc.probe.clone().unwrap_or_default();
        Self {
            id: acc.uuid.clone(),
            connected: acc.con,
            current_temp: reading.get_temp,
            target_temp: reading.set_temp,
        }
    }
}

// ── Device ─────────────────────────────────────────────────────────

/// Convert a listed thing. Entries without an id cannot be addressed and
/// are dropped; a missing friendly name falls back to the id.
pub(crate) fn device_from_thing(thing: Thing) -> Option<Device> {
    let Some(thing_id) = thing.thing_name.filter(|id| !id.is_empty()) else {
        warn!(
            friendly_name = thing.friendly_name.as_deref().unwrap_or(""),
            "dropping device entry without a thing id"
        );
        return None;
    };

    let friendly_name = thing
        .friendly_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| thing_id.clone());

    Some(Device {
        thing_id,
        friendly_name,
    })
}
