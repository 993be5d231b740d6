//! Connected device records and structural identity.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;

use crate::identifiers::DeviceId;
use crate::protocol::{WireDevice, WireDeviceInfo};

// ============================================================================
// Types
// ============================================================================

/// Device record shared with readers.
///
/// A device keeps the same `Arc` for as long as it stays in the roster;
/// refreshes update it in place.
pub type SharedDevice = Arc<RwLock<RemoteDevice>>;

// ============================================================================
// DeviceInfo
// ============================================================================

/// Static description of the app running on a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device model.
    pub model: String,
    /// Operating system.
    pub os_type: String,
    /// Application bundle id.
    pub app_id: String,
    /// Application version.
    pub app_version: String,
    /// `true` for the app's main process.
    pub is_main_process: bool,
    /// Per-install device id.
    pub device_uid: Option<String>,
}

impl From<WireDeviceInfo> for DeviceInfo {
    fn from(info: WireDeviceInfo) -> Self {
        Self {
            model: info.model,
            os_type: info.os_type,
            app_id: info.app_id,
            app_version: info.app_version,
            is_main_process: info.is_main_process,
            device_uid: info.device_uid.filter(|uid| !uid.is_empty()),
        }
    }
}

// ============================================================================
// DeviceIdentity
// ============================================================================

/// Fingerprint used to tell whether two records describe the same device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Application bundle id.
    pub app_id: String,
    /// Per-install device id.
    pub device_uid: Option<String>,
    /// Router-stable id.
    pub router_id: Option<String>,
}

impl DeviceIdentity {
    /// Returns `true` if the fingerprints share a stable key.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        let uid_match = !self.app_id.is_empty()
            && self.app_id == other.app_id
            && self.device_uid.is_some()
            && self.device_uid == other.device_uid;
        let router_match = self.router_id.is_some() && self.router_id == other.router_id;
        uid_match || router_match
    }
}

// ============================================================================
// RemoteDevice
// ============================================================================

/// One remote runtime agent known to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    /// Router-assigned id.
    pub id: DeviceId,
    /// Router-stable id, when the router provides one.
    pub router_id: Option<String>,
    /// App description.
    pub info: DeviceInfo,
    /// Placeholder announced for a simulator without an app.
    pub simulator: bool,
    /// Whether the agent currently holds a link to the router.
    pub connected: bool,
}

impl RemoteDevice {
    /// Builds a record from a roster entry, using `fallback_id` when the
    /// entry carries none.
    #[must_use]
    pub fn from_wire(wire: WireDevice, fallback_id: Option<DeviceId>) -> Option<Self> {
        let id = wire
            .id
            .filter(|id| !id.is_empty())
            .or(fallback_id)?;

        Some(Self {
            id,
            router_id: wire.router_id.filter(|id| !id.is_empty()),
            info: wire.info.into(),
            simulator: wire.simulator,
            connected: wire.connected,
        })
    }

    /// Returns this device's identity fingerprint.
    #[must_use]
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            app_id: self.info.app_id.clone(),
            device_uid: self.info.device_uid.clone(),
            router_id: self.router_id.clone(),
        }
    }

    /// Returns `true` if the roster entry describes this device.
    ///
    /// Matches by id first, then by `(appId, deviceUid)`, then by router id.
    #[must_use]
    pub fn matches(&self, wire: &WireDevice) -> bool {
        if wire.id.as_ref().is_some_and(|id| *id == self.id) {
            return true;
        }
        self.identity().same_device(&wire_identity(wire))
    }

    /// Returns `true` if the device can be auto-selected.
    #[inline]
    #[must_use]
    pub fn is_selectable_main(&self) -> bool {
        self.info.is_main_process && !self.simulator
    }

    /// Replaces the mutable fields with a fresher roster entry.
    pub(crate) fn refresh(&mut self, fresh: Self) {
        *self = fresh;
    }
}

/// Identity fingerprint of a roster entry.
pub(crate) fn wire_identity(wire: &WireDevice) -> DeviceIdentity {
    DeviceIdentity {
        app_id: wire.info.app_id.clone(),
        device_uid: wire.info.device_uid.clone().filter(|uid| !uid.is_empty()),
        router_id: wire.router_id.clone().filter(|id| !id.is_empty()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(id: Option<u64>, app_id: &str, uid: Option<&str>, router_id: Option<&str>) -> WireDevice {
        WireDevice {
            id: id.map(DeviceId::from),
            router_id: router_id.map(str::to_owned),
            info: WireDeviceInfo {
                app_id: app_id.into(),
                device_uid: uid.map(str::to_owned),
                is_main_process: true,
                ..WireDeviceInfo::default()
            },
            connected: true,
            simulator: false,
        }
    }

    #[test]
    fn test_matches_by_id() {
        let device = RemoteDevice::from_wire(wire(Some(7), "a", None, None), None).expect("device");
        assert!(device.matches(&wire(Some(7), "other", None, None)));
        assert!(!device.matches(&wire(Some(8), "a", None, None)));
    }

    #[test]
    fn test_matches_rotated_id_by_uid() {
        let device = RemoteDevice::from_wire(wire(Some(7), "a", Some("u1"), None), None).expect("device");
        assert!(device.matches(&wire(Some(9), "a", Some("u1"), None)));
        assert!(!device.matches(&wire(Some(9), "b", Some("u1"), None)));
    }

    #[test]
    fn test_matches_by_router_id() {
        let device = RemoteDevice::from_wire(wire(Some(7), "a", None, Some("r-1")), None).expect("device");
        assert!(device.matches(&wire(None, "", None, Some("r-1"))));
    }

    #[test]
    fn test_from_wire_requires_some_id() {
        assert!(RemoteDevice::from_wire(wire(None, "a", None, None), None).is_none());
        let device = RemoteDevice::from_wire(wire(None, "a", None, None), Some(DeviceId::from(3)))
            .expect("fallback");
        assert_eq!(device.id, DeviceId::from(3));
    }

    #[test]
    fn test_simulator_is_not_auto_selectable() {
        let mut entry = wire(Some(1), "a", None, None);
        entry.simulator = true;
        let device = RemoteDevice::from_wire(entry, None).expect("device");
        assert!(!device.is_selectable_main());
    }
}
