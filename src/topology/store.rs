//! Device and session topology.
//!
//! [`TopologyStore`] reconciles roster snapshots into a stable model and
//! keeps the active device and session selection.
//!
//! # Write Path
//!
//! Every writer follows the same three steps while holding the apply lock:
//!
//! 1. Plan the new state from a read snapshot
//! 2. Notify `SessionWillChange` listeners if the active session changes
//! 3. Commit under the write lock, then broadcast [`TopologyEvent`]s
//!
//! Readers therefore never see a half-applied roster, and cleanup for the
//! old session always runs before the new one becomes active.
//!
//! `SessionWillChange` listeners may call readers but must not call writers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::identifiers::{DeviceId, SessionId, SubscriptionId};
use crate::protocol::{WireDevice, WireSession};

use super::cache::{SelectionCache, keys};
use super::device::{DeviceIdentity, RemoteDevice, SharedDevice, wire_identity};
use super::session::Session;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the change notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Per-device selection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Selection follows auto-focus rules.
    #[default]
    Auto,
    /// The user pinned the selection; auto-focus does not move it.
    Manual,
}

/// Change notification broadcast after every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// The device roster changed.
    DevicesChanged {
        /// Devices that appeared.
        added: Vec<DeviceId>,
        /// Devices that disappeared.
        removed: Vec<DeviceId>,
    },
    /// A different device became active.
    ActiveDeviceChanged {
        /// New active device.
        device_id: Option<DeviceId>,
    },
    /// A device's session list changed.
    SessionsChanged {
        /// Owning device.
        device_id: DeviceId,
    },
    /// A device's selected session changed.
    SessionSelected {
        /// Owning device.
        device_id: DeviceId,
        /// New selection.
        session_id: Option<SessionId>,
    },
}

/// Payload of a `SessionWillChange` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    /// Device that will be active after the change.
    pub device_id: Option<DeviceId>,
    /// Session that is about to stop being active.
    pub old: Option<Session>,
    /// Session that is about to become active.
    pub new: Option<Session>,
}

/// Listener run before the active session changes.
pub type SessionWillChangeListener = Arc<dyn Fn(&SessionChange) + Send + Sync>;

/// Per-device metadata discarded when the device drops out while active.
#[derive(Debug, Clone, Copy, Default)]
struct DeviceCache {
    selected_session: Option<SessionId>,
    debug_mode: DebugMode,
}

/// Everything readers can observe.
struct TopologyState {
    devices: Vec<SharedDevice>,
    active_device: Option<DeviceId>,
    sessions: FxHashMap<DeviceId, Vec<Session>>,
    session_owner: FxHashMap<DeviceId, DeviceIdentity>,
    device_cache: FxHashMap<DeviceId, DeviceCache>,
    focus_request: Option<SessionId>,
    filter_text: String,
    auto_focus_last_session: bool,
    history: Vec<DeviceId>,
}

// ============================================================================
// TopologyState - Queries
// ============================================================================

impl TopologyState {
    fn device(&self, id: &DeviceId) -> Option<&SharedDevice> {
        self.devices.iter().find(|device| device.read().id == *id)
    }

    fn selected_session(&self, device_id: &DeviceId) -> Option<Session> {
        let selected = self.device_cache.get(device_id)?.selected_session?;
        self.sessions
            .get(device_id)?
            .iter()
            .find(|session| session.id == selected)
            .cloned()
    }

    fn active_session(&self) -> Option<Session> {
        self.selected_session(self.active_device.as_ref()?)
    }

    fn debug_mode(&self, device_id: &DeviceId) -> DebugMode {
        self.device_cache
            .get(device_id)
            .map(|cache| cache.debug_mode)
            .unwrap_or_default()
    }

    /// Highest session id whose URL passes the filter.
    fn newest_matching(&self, sessions: &[Session]) -> Option<SessionId> {
        sessions
            .iter()
            .filter(|session| session.matches_filter(&self.filter_text))
            .map(|session| session.id)
            .max()
    }

    /// Picks the active device's session after a roster refresh.
    ///
    /// Returns the selection and whether the pending focus request was used.
    fn choose_session(
        &self,
        device_id: &DeviceId,
        sessions: &[Session],
        previous: Option<SessionId>,
    ) -> (Option<SessionId>, bool) {
        if let Some(focus) = self.focus_request
            && sessions.iter().any(|session| session.id == focus)
        {
            return (Some(focus), true);
        }

        let candidate = self.newest_matching(sessions);
        let pinned = self.debug_mode(device_id) == DebugMode::Manual;

        if self.auto_focus_last_session && !pinned && candidate.is_some() {
            return (candidate, false);
        }

        if let Some(previous) = previous
            && sessions
                .iter()
                .any(|session| session.id == previous && session.matches_filter(&self.filter_text))
        {
            return (Some(previous), false);
        }

        (candidate, false)
    }

    fn remember(&mut self, device_id: &DeviceId) {
        self.history.retain(|id| id != device_id);
        self.history.push(device_id.clone());
    }
}

// ============================================================================
// Roster Plan
// ============================================================================

/// Outcome of matching a device roster against the current devices.
struct DevicePlan {
    /// New device list: index of the retained record, or `None` for new ones.
    entries: Vec<(Option<usize>, RemoteDevice)>,
    added: Vec<DeviceId>,
    removed: Vec<DeviceId>,
    /// Retained devices whose id rotated: (old, new).
    renamed: Vec<(DeviceId, DeviceId)>,
    /// Id slots whose cached sessions belong to a different device.
    purged: Vec<DeviceId>,
    active: Option<DeviceId>,
    active_dropped: Option<DeviceId>,
}

// ============================================================================
// TopologyStore
// ============================================================================

/// Owner of devices, sessions and the active selection.
pub struct TopologyStore {
    state: RwLock<TopologyState>,
    apply_lock: Mutex<()>,
    listeners: Mutex<Vec<(SubscriptionId, SessionWillChangeListener)>>,
    events_tx: broadcast::Sender<TopologyEvent>,
    cache: Arc<dyn SelectionCache>,
}

impl fmt::Debug for TopologyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("TopologyStore")
            .field("devices", &state.devices.len())
            .field("active_device", &state.active_device)
            .field("filter_text", &state.filter_text)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TopologyStore - Construction
// ============================================================================

impl TopologyStore {
    /// Creates an empty store, restoring the persisted selection.
    #[must_use]
    pub fn new(cache: Arc<dyn SelectionCache>) -> Self {
        let active_device = cache.load(keys::SELECTED_DEVICE).map(DeviceId::new);
        let filter_text = cache.load(keys::FILTER_TEXT).unwrap_or_default();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            state: RwLock::new(TopologyState {
                devices: Vec::new(),
                active_device,
                sessions: FxHashMap::default(),
                session_owner: FxHashMap::default(),
                device_cache: FxHashMap::default(),
                focus_request: None,
                filter_text,
                auto_focus_last_session: true,
                history: Vec::new(),
            }),
            apply_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            events_tx,
            cache,
        }
    }
}

// ============================================================================
// TopologyStore - Reconciliation
// ============================================================================

impl TopologyStore {
    /// Reconciles a device roster snapshot.
    ///
    /// Retained devices keep their `Arc` and are updated in place. Afterwards
    /// the active device is kept if still present, otherwise the first
    /// main-process device that is not a simulator placeholder is chosen.
    pub fn apply_device_roster(&self, roster: Vec<WireDevice>) {
        let _apply = self.apply_lock.lock();

        let (plan, old_active, old_session, new_session) = {
            let state = self.state.read();
            let plan = Self::plan_devices(&state, roster);

            let old_session = state.active_session();
            let new_session = plan.active.as_ref().and_then(|active| {
                if plan.purged.contains(active) || plan.active_dropped.as_ref() == Some(active) {
                    return None;
                }
                let source = plan
                    .renamed
                    .iter()
                    .find(|(_, new)| new == active)
                    .map_or(active, |(old, _)| old);
                state.selected_session(source)
            });

            (plan, state.active_device.clone(), old_session, new_session)
        };

        let active_changed = old_active != plan.active;
        self.notify_if_changed(plan.active.clone(), old_session.clone(), new_session.clone(), active_changed);

        let devices_changed = !plan.added.is_empty() || !plan.removed.is_empty();
        let DevicePlan {
            entries,
            added,
            removed,
            renamed,
            purged,
            active,
            active_dropped,
        } = plan;

        {
            let mut state = self.state.write();

            for (old, new) in &renamed {
                info!(old = %old, new = %new, "Device id rotated");
                if let Some(sessions) = state.sessions.remove(old) {
                    state.sessions.insert(new.clone(), sessions);
                }
                if let Some(owner) = state.session_owner.remove(old) {
                    state.session_owner.insert(new.clone(), owner);
                }
                if let Some(cache) = state.device_cache.remove(old) {
                    state.device_cache.insert(new.clone(), cache);
                }
            }

            for id in &purged {
                debug!(device_id = %id, "Purging sessions cached for a different device");
                state.sessions.remove(id);
                state.session_owner.remove(id);
                state.device_cache.remove(id);
            }

            if let Some(dropped) = &active_dropped {
                info!(device_id = %dropped, "Active device left, discarding its cached selection");
                state.device_cache.remove(dropped);
            }

            let mut devices = Vec::with_capacity(entries.len());
            for (index, device) in entries {
                match index.and_then(|i| state.devices.get(i)) {
                    Some(shared) => {
                        shared.write().refresh(device);
                        devices.push(Arc::clone(shared));
                    }
                    None => devices.push(Arc::new(RwLock::new(device))),
                }
            }
            state.devices = devices;

            state.active_device = active.clone();
            if active_changed && let Some(active) = &active {
                state.remember(active);
            }
        }

        for id in &added {
            info!(device_id = %id, "Device added");
        }
        for id in &removed {
            info!(device_id = %id, "Device removed");
        }

        if active_changed && let Some(active) = &active {
            self.cache.store(keys::SELECTED_DEVICE, active.as_str());
        }

        if devices_changed {
            self.emit(TopologyEvent::DevicesChanged { added, removed });
        }
        if active_changed {
            debug!(device_id = ?active, "Active device changed");
            self.emit(TopologyEvent::ActiveDeviceChanged {
                device_id: active.clone(),
            });
        }
        if let Some(active) = active
            && old_session.map(|s| s.id) != new_session.as_ref().map(|s| s.id)
        {
            self.emit(TopologyEvent::SessionSelected {
                device_id: active,
                session_id: new_session.map(|s| s.id),
            });
        }
    }

    /// Matches a roster against the current devices.
    fn plan_devices(state: &TopologyState, roster: Vec<WireDevice>) -> DevicePlan {
        let mut claimed = vec![false; state.devices.len()];
        let mut entries: Vec<(Option<usize>, RemoteDevice)> = Vec::with_capacity(roster.len());
        let mut added = Vec::new();
        let mut renamed = Vec::new();
        let mut purged = Vec::new();

        for wire in roster {
            let index = (0..state.devices.len())
                .find(|&i| !claimed[i] && state.devices[i].read().matches(&wire));
            let existing_id = index.map(|i| state.devices[i].read().id.clone());
            let identity = wire_identity(&wire);

            let Some(device) = RemoteDevice::from_wire(wire, existing_id.clone()) else {
                warn!("Skipping roster entry without a device id");
                continue;
            };

            if entries.iter().any(|(_, entry)| entry.id == device.id) {
                warn!(device_id = %device.id, "Skipping duplicate roster entry");
                continue;
            }

            match (index, existing_id) {
                (Some(i), Some(old_id)) => {
                    claimed[i] = true;
                    if old_id != device.id {
                        renamed.push((old_id, device.id.clone()));
                    }
                }
                _ => {
                    if let Some(owner) = state.session_owner.get(&device.id)
                        && *owner != identity
                        && !owner.same_device(&identity)
                    {
                        purged.push(device.id.clone());
                    }
                    added.push(device.id.clone());
                }
            }

            entries.push((index, device));
        }

        let removed: Vec<DeviceId> = state
            .devices
            .iter()
            .enumerate()
            .filter(|(i, _)| !claimed[*i])
            .map(|(_, device)| device.read().id.clone())
            .collect();

        let mut active = state.active_device.clone().map(|id| {
            renamed
                .iter()
                .find(|(old, _)| *old == id)
                .map_or(id, |(_, new)| new.clone())
        });

        let active_dropped = active.clone().filter(|id| removed.contains(id));

        if !active
            .as_ref()
            .is_some_and(|id| entries.iter().any(|(_, device)| device.id == *id))
        {
            active = entries
                .iter()
                .find(|(_, device)| device.is_selectable_main())
                .map(|(_, device)| device.id.clone());
        }

        DevicePlan {
            entries,
            added,
            removed,
            renamed,
            purged,
            active,
            active_dropped,
        }
    }

    /// Replaces one device's sessions.
    ///
    /// Screenshot and engine fields carry forward by session id. For the
    /// active device the selection is re-evaluated in this order: pending
    /// focus request, newest session passing the filter (auto-focus on and
    /// device not pinned), previous selection, newest session passing the
    /// filter, none.
    pub fn apply_session_roster(&self, device_id: &DeviceId, roster: Vec<WireSession>) {
        let _apply = self.apply_lock.lock();

        let (sessions, selection, previous, focus_used, is_active, old_session, owner) = {
            let state = self.state.read();
            let cached = state.sessions.get(device_id);

            let sessions: Vec<Session> = roster
                .into_iter()
                .map(|wire| {
                    let prior = cached.and_then(|list| list.iter().find(|s| s.id == wire.session_id));
                    Session::from_wire(wire, prior)
                })
                .collect();

            let is_active = state.active_device.as_ref() == Some(device_id);
            let previous = state
                .device_cache
                .get(device_id)
                .and_then(|cache| cache.selected_session);

            let (selection, focus_used) = if is_active {
                state.choose_session(device_id, &sessions, previous)
            } else {
                let kept = previous.filter(|id| sessions.iter().any(|s| s.id == *id));
                (kept, false)
            };

            let old_session = if is_active { state.active_session() } else { None };
            let owner = state.device(device_id).map(|device| device.read().identity());

            (sessions, selection, previous, focus_used, is_active, old_session, owner)
        };

        let new_session = selection.and_then(|id| sessions.iter().find(|s| s.id == id).cloned());

        if is_active {
            self.notify_if_changed(Some(device_id.clone()), old_session, new_session, false);
        }

        {
            let mut state = self.state.write();
            debug!(device_id = %device_id, count = sessions.len(), ?selection, "Session roster applied");

            state.sessions.insert(device_id.clone(), sessions);
            match owner {
                Some(owner) => {
                    state.session_owner.insert(device_id.clone(), owner);
                }
                None => warn!(device_id = %device_id, "Session roster for unknown device"),
            }
            state
                .device_cache
                .entry(device_id.clone())
                .or_default()
                .selected_session = selection;
            if focus_used {
                state.focus_request = None;
            }
        }

        self.emit(TopologyEvent::SessionsChanged {
            device_id: device_id.clone(),
        });
        if selection != previous {
            self.emit(TopologyEvent::SessionSelected {
                device_id: device_id.clone(),
                session_id: selection,
            });
        }
    }
}

// ============================================================================
// TopologyStore - Selection
// ============================================================================

impl TopologyStore {
    /// Makes a device active. Returns `false` if the device is unknown.
    pub fn select_device(&self, device_id: &DeviceId) -> bool {
        let _apply = self.apply_lock.lock();

        let (old_session, new_session) = {
            let state = self.state.read();
            if state.device(device_id).is_none() {
                return false;
            }
            if state.active_device.as_ref() == Some(device_id) {
                return true;
            }
            (state.active_session(), state.selected_session(device_id))
        };

        self.notify_if_changed(Some(device_id.clone()), old_session, new_session, true);

        {
            let mut state = self.state.write();
            state.active_device = Some(device_id.clone());
            state.remember(device_id);
        }

        info!(device_id = %device_id, "Device selected");
        self.cache.store(keys::SELECTED_DEVICE, device_id.as_str());
        self.emit(TopologyEvent::ActiveDeviceChanged {
            device_id: Some(device_id.clone()),
        });
        true
    }

    /// Selects a session of the active device.
    ///
    /// Returns `false` if the active device has no such session.
    pub fn select_session(&self, session_id: SessionId) -> bool {
        let _apply = self.apply_lock.lock();

        let (device_id, old_session, new_session) = {
            let state = self.state.read();
            let Some(device_id) = state.active_device.clone() else {
                return false;
            };
            let Some(new_session) = state
                .sessions
                .get(&device_id)
                .and_then(|list| list.iter().find(|s| s.id == session_id).cloned())
            else {
                return false;
            };
            (device_id, state.active_session(), new_session)
        };

        if old_session.as_ref().is_some_and(|s| s.id == session_id) {
            return true;
        }

        self.notify_if_changed(Some(device_id.clone()), old_session, Some(new_session), false);

        self.state
            .write()
            .device_cache
            .entry(device_id.clone())
            .or_default()
            .selected_session = Some(session_id);

        debug!(device_id = %device_id, %session_id, "Session selected");
        self.emit(TopologyEvent::SessionSelected {
            device_id,
            session_id: Some(session_id),
        });
        true
    }

    /// Focuses a session now if the active device has it, otherwise on the
    /// next session roster that contains it.
    ///
    /// Returns `true` if the session was selected immediately.
    pub fn request_focus(&self, session_id: SessionId) -> bool {
        if self.select_session(session_id) {
            return true;
        }
        debug!(%session_id, "Focus request deferred");
        self.state.write().focus_request = Some(session_id);
        false
    }

    /// Sets the session URL filter and persists it.
    pub fn set_filter_text(&self, filter_text: impl Into<String>) {
        let filter_text = filter_text.into();
        self.cache.store(keys::FILTER_TEXT, &filter_text);
        self.state.write().filter_text = filter_text;
    }

    /// Enables or disables auto-focus of the newest session.
    pub fn set_auto_focus_last_session(&self, enabled: bool) {
        self.state.write().auto_focus_last_session = enabled;
    }

    /// Sets a device's debug mode.
    pub fn set_debug_mode(&self, device_id: &DeviceId, mode: DebugMode) {
        self.state
            .write()
            .device_cache
            .entry(device_id.clone())
            .or_default()
            .debug_mode = mode;
    }

    /// Stores a screenshot on a session. Returns `false` if it is unknown.
    pub fn update_screenshot(&self, device_id: &DeviceId, session_id: SessionId, data: impl Into<String>) -> bool {
        let data = data.into();
        self.update_session(device_id, session_id, |session| {
            session.screenshot_cache = Some(data);
        })
    }

    /// Records a session's script engine. Returns `false` if it is unknown.
    pub fn set_engine_kind(&self, device_id: &DeviceId, session_id: SessionId, engine: impl Into<String>) -> bool {
        let engine = engine.into();
        self.update_session(device_id, session_id, |session| {
            session.engine_kind = Some(engine);
        })
    }

    fn update_session<F>(&self, device_id: &DeviceId, session_id: SessionId, update: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let updated = {
            let mut state = self.state.write();
            match state
                .sessions
                .get_mut(device_id)
                .and_then(|list| list.iter_mut().find(|s| s.id == session_id))
            {
                Some(session) => {
                    update(session);
                    true
                }
                None => false,
            }
        };

        if updated {
            self.emit(TopologyEvent::SessionsChanged {
                device_id: device_id.clone(),
            });
        }
        updated
    }
}

// ============================================================================
// TopologyStore - Readers
// ============================================================================

impl TopologyStore {
    /// Returns the devices in roster order.
    #[must_use]
    pub fn devices(&self) -> Vec<SharedDevice> {
        self.state.read().devices.clone()
    }

    /// Returns one device.
    #[must_use]
    pub fn device(&self, device_id: &DeviceId) -> Option<SharedDevice> {
        self.state.read().device(device_id).cloned()
    }

    /// Returns a device's sessions.
    #[must_use]
    pub fn sessions(&self, device_id: &DeviceId) -> Vec<Session> {
        self.state
            .read()
            .sessions
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the active device id.
    #[must_use]
    pub fn active_device_id(&self) -> Option<DeviceId> {
        let state = self.state.read();
        state
            .active_device
            .clone()
            .filter(|id| state.device(id).is_some())
    }

    /// Returns the active device.
    #[must_use]
    pub fn active_device(&self) -> Option<SharedDevice> {
        let state = self.state.read();
        state.active_device.as_ref().and_then(|id| state.device(id)).cloned()
    }

    /// Returns the active session.
    #[must_use]
    pub fn active_session(&self) -> Option<Session> {
        self.state.read().active_session()
    }

    /// Returns the devices selected so far, most recent last.
    #[must_use]
    pub fn history(&self) -> Vec<DeviceId> {
        self.state.read().history.clone()
    }

    /// Returns the session filter text.
    #[must_use]
    pub fn filter_text(&self) -> String {
        self.state.read().filter_text.clone()
    }

    /// Returns whether auto-focus of the newest session is enabled.
    #[must_use]
    pub fn auto_focus_last_session(&self) -> bool {
        self.state.read().auto_focus_last_session
    }

    /// Returns a device's debug mode.
    #[must_use]
    pub fn debug_mode(&self, device_id: &DeviceId) -> DebugMode {
        self.state.read().debug_mode(device_id)
    }
}

// ============================================================================
// TopologyStore - Notifications
// ============================================================================

impl TopologyStore {
    /// Subscribes to change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events_tx.subscribe()
    }

    /// Registers a listener run before the active session changes.
    pub fn on_session_will_change(&self, listener: SessionWillChangeListener) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.listeners.lock().push((id, listener));
        id
    }

    /// Removes a `SessionWillChange` listener.
    pub fn remove_session_will_change(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Runs `SessionWillChange` listeners when the active session changes.
    fn notify_if_changed(
        &self,
        device_id: Option<DeviceId>,
        old: Option<Session>,
        new: Option<Session>,
        device_switch: bool,
    ) {
        let same_session = old.as_ref().map(|s| s.id) == new.as_ref().map(|s| s.id);
        if (same_session && !device_switch) || (old.is_none() && new.is_none()) {
            return;
        }

        let listeners: Vec<SessionWillChangeListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let change = SessionChange { device_id, old, new };
        for listener in listeners {
            listener(&change);
        }
    }

    fn emit(&self, event: TopologyEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Default for TopologyStore {
    fn default() -> Self {
        Self::new(Arc::new(super::cache::MemorySelectionCache::new()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::protocol::WireDeviceInfo;
    use crate::topology::cache::MemorySelectionCache;

    fn device(id: u64, main: bool) -> WireDevice {
        WireDevice {
            id: Some(DeviceId::from(id)),
            router_id: None,
            info: WireDeviceInfo {
                app_id: format!("app-{id}"),
                is_main_process: main,
                ..WireDeviceInfo::default()
            },
            connected: true,
            simulator: false,
        }
    }

    fn session(id: u64, url: &str) -> WireSession {
        WireSession {
            session_id: SessionId::new(id),
            url: url.into(),
            kind: None,
            engine: None,
            screenshot: None,
        }
    }

    fn store() -> Arc<TopologyStore> {
        Arc::new(TopologyStore::default())
    }

    #[test]
    fn test_auto_select_and_auto_focus_scenario() {
        let store = store();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let reader = Arc::clone(&store);
        let sink = Arc::clone(&observed);
        store.on_session_will_change(Arc::new(move |change| {
            // Still the old state while listeners run
            sink.lock().push((
                change.old.as_ref().map(|s| s.id),
                change.new.as_ref().map(|s| s.id),
                reader.active_session().map(|s| s.id),
            ));
        }));

        store.apply_device_roster(vec![device(7, true)]);
        assert_eq!(store.active_device_id(), Some(DeviceId::from(7)));

        store.apply_session_roster(
            &DeviceId::from(7),
            vec![session(1, "http://a"), session(2, "http://b")],
        );

        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(2)));
        assert_eq!(*observed.lock(), vec![(None, Some(SessionId::new(2)), None)]);
    }

    #[test]
    fn test_retained_device_keeps_arc() {
        let store = store();
        store.apply_device_roster(vec![device(1, true), device(2, false)]);
        let before = store.device(&DeviceId::from(1)).expect("device");

        let mut refreshed = device(1, true);
        refreshed.info.app_version = "2.0".into();
        store.apply_device_roster(vec![refreshed, device(3, false)]);

        let after = store.device(&DeviceId::from(1)).expect("device");
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.read().info.app_version, "2.0");
        assert!(store.device(&DeviceId::from(2)).is_none());
        assert_eq!(store.devices().len(), 2);
    }

    #[test]
    fn test_rotated_id_matches_by_uid() {
        let store = store();
        let mut first = device(1, true);
        first.info.device_uid = Some("uid".into());
        store.apply_device_roster(vec![first.clone()]);
        store.apply_session_roster(&DeviceId::from(1), vec![session(4, "x")]);
        let before = store.device(&DeviceId::from(1)).expect("device");

        let mut rotated = first;
        rotated.id = Some(DeviceId::from(9));
        store.apply_device_roster(vec![rotated]);

        let after = store.device(&DeviceId::from(9)).expect("rotated device");
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(store.active_device_id(), Some(DeviceId::from(9)));
        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(4)));
    }

    #[test]
    fn test_dropped_active_device_discards_cache_and_reselects() {
        let store = store();
        store.apply_device_roster(vec![device(1, true), device(2, true)]);
        store.apply_session_roster(&DeviceId::from(1), vec![session(5, "x")]);
        store.set_debug_mode(&DeviceId::from(1), DebugMode::Manual);

        store.apply_device_roster(vec![device(2, true)]);
        assert_eq!(store.active_device_id(), Some(DeviceId::from(2)));
        assert_eq!(store.debug_mode(&DeviceId::from(1)), DebugMode::Auto);
        assert_eq!(
            store.history(),
            vec![DeviceId::from(1), DeviceId::from(2)]
        );

        // Device 1 comes back without a remembered selection
        store.apply_device_roster(vec![device(1, true), device(2, true)]);
        assert!(store.select_device(&DeviceId::from(1)));
        assert!(store.active_session().is_none());
    }

    #[test]
    fn test_no_main_process_device_means_no_selection() {
        let store = store();
        let mut simulator = device(1, true);
        simulator.simulator = true;
        store.apply_device_roster(vec![simulator, device(2, false)]);
        assert!(store.active_device_id().is_none());
    }

    #[test]
    fn test_different_device_in_same_slot_purges_sessions() {
        let store = store();
        store.apply_device_roster(vec![device(1, true)]);
        store.apply_session_roster(&DeviceId::from(1), vec![session(3, "x")]);

        store.apply_device_roster(vec![]);
        assert_eq!(store.sessions(&DeviceId::from(1)).len(), 1);

        let mut other = device(1, true);
        other.info.app_id = "someone-else".into();
        store.apply_device_roster(vec![other]);
        assert!(store.sessions(&DeviceId::from(1)).is_empty());
    }

    #[test]
    fn test_carry_forward_across_refresh() {
        let store = store();
        let id = DeviceId::from(7);
        store.apply_device_roster(vec![device(7, true)]);
        store.apply_session_roster(&id, vec![session(1, "x")]);
        assert!(store.update_screenshot(&id, SessionId::new(1), "img"));
        assert!(store.set_engine_kind(&id, SessionId::new(1), "v8"));

        store.apply_session_roster(&id, vec![session(1, "y"), session(2, "z")]);
        let sessions = store.sessions(&id);
        assert_eq!(sessions[0].url, "y");
        assert_eq!(sessions[0].screenshot_cache.as_deref(), Some("img"));
        assert_eq!(sessions[0].engine_kind.as_deref(), Some("v8"));
        assert!(sessions[1].screenshot_cache.is_none());
    }

    #[test]
    fn test_focus_request_wins() {
        let store = store();
        let id = DeviceId::from(7);
        store.apply_device_roster(vec![device(7, true)]);

        assert!(!store.request_focus(SessionId::new(1)));
        store.apply_session_roster(&id, vec![session(1, "a"), session(2, "b")]);
        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(1)));

        // The request is consumed
        store.apply_session_roster(&id, vec![session(1, "a"), session(2, "b"), session(3, "c")]);
        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(3)));
    }

    #[test]
    fn test_manual_mode_keeps_previous_selection() {
        let store = store();
        let id = DeviceId::from(7);
        store.apply_device_roster(vec![device(7, true)]);
        store.apply_session_roster(&id, vec![session(1, "a"), session(2, "b")]);
        assert!(store.select_session(SessionId::new(1)));
        store.set_debug_mode(&id, DebugMode::Manual);

        store.apply_session_roster(&id, vec![session(1, "a"), session(2, "b"), session(3, "c")]);
        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(1)));

        // Previous gone: fall back to the newest candidate
        store.apply_session_roster(&id, vec![session(2, "b"), session(3, "c")]);
        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(3)));
    }

    #[test]
    fn test_filter_limits_candidates() {
        let store = store();
        let id = DeviceId::from(7);
        store.set_filter_text("CHECKOUT");
        store.apply_device_roster(vec![device(7, true)]);
        store.apply_session_roster(
            &id,
            vec![session(1, "http://shop/checkout"), session(2, "http://shop/home")],
        );
        assert_eq!(store.active_session().map(|s| s.id), Some(SessionId::new(1)));

        store.apply_session_roster(&id, vec![session(2, "http://shop/home")]);
        assert!(store.active_session().is_none());

        store.apply_session_roster(&id, vec![]);
        assert!(store.active_session().is_none());
    }

    #[test]
    fn test_malformed_url_is_tolerated() {
        let store = store();
        let id = DeviceId::from(7);
        store.apply_device_roster(vec![device(7, true)]);
        store.apply_session_roster(&id, vec![session(1, "http://x/%FF"), session(2, "http%3A%2F%2Fy")]);

        let sessions = store.sessions(&id);
        assert_eq!(sessions[0].url, "http://x/%FF");
        assert_eq!(sessions[1].url, "http://y");
    }

    #[test]
    fn test_select_device_notifies_and_persists() {
        let cache = Arc::new(MemorySelectionCache::new());
        let store = TopologyStore::new(Arc::clone(&cache) as Arc<dyn SelectionCache>);
        store.apply_device_roster(vec![device(1, true), device(2, true)]);
        store.apply_session_roster(&DeviceId::from(1), vec![session(1, "a")]);
        store.apply_session_roster(&DeviceId::from(2), vec![session(8, "b")]);

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        store.on_session_will_change(Arc::new(move |change| sink.lock().push(change.clone())));

        assert!(store.select_device(&DeviceId::from(2)));
        assert!(!store.select_device(&DeviceId::from(99)));

        let changes = changes.lock();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old.as_ref().map(|s| s.id), Some(SessionId::new(1)));
        assert!(changes[0].new.is_none());
        assert_eq!(cache.load(keys::SELECTED_DEVICE).as_deref(), Some("2"));
    }

    #[test]
    fn test_persisted_selection_is_restored() {
        let cache = Arc::new(MemorySelectionCache::new());
        cache.store(keys::SELECTED_DEVICE, "2");
        cache.store(keys::FILTER_TEXT, "shop");

        let store = TopologyStore::new(cache as Arc<dyn SelectionCache>);
        assert_eq!(store.filter_text(), "shop");

        store.apply_device_roster(vec![device(1, true), device(2, false)]);
        assert_eq!(store.active_device_id(), Some(DeviceId::from(2)));
    }

    #[test]
    fn test_events_are_broadcast() {
        let store = store();
        let mut events = store.subscribe();

        store.apply_device_roster(vec![device(7, true)]);

        assert_eq!(
            events.try_recv().expect("devices"),
            TopologyEvent::DevicesChanged {
                added: vec![DeviceId::from(7)],
                removed: vec![],
            }
        );
        assert_eq!(
            events.try_recv().expect("active"),
            TopologyEvent::ActiveDeviceChanged {
                device_id: Some(DeviceId::from(7)),
            }
        );
    }

    proptest! {
        #[test]
        fn prop_reconciliation_keeps_identity(
            first in proptest::collection::btree_set(0u64..20, 0..10),
            second in proptest::collection::btree_set(0u64..20, 0..10),
        ) {
            let store = TopologyStore::default();
            store.apply_device_roster(first.iter().map(|id| device(*id, id % 2 == 0)).collect());
            let before: Vec<SharedDevice> = store.devices();

            store.apply_device_roster(second.iter().map(|id| device(*id, id % 2 == 0)).collect());
            let after = store.devices();

            prop_assert_eq!(after.len(), second.len());
            for shared in &after {
                let id = shared.read().id.clone();
                if let Some(old) = before.iter().find(|d| d.read().id == id) {
                    prop_assert!(Arc::ptr_eq(old, shared));
                }
            }

            if let Some(active) = store.active_device_id() {
                prop_assert!(after.iter().any(|d| d.read().id == active));
            } else {
                prop_assert!(after.iter().all(|d| !d.read().info.is_main_process));
            }
        }
    }
}
