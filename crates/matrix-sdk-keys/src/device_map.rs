// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A two-level map addressing values by user ID and device ID.
//!
//! [`DeviceMap`] is used both to shape request bodies (e.g. the one-time key
//! algorithms to claim, or the to-device message contents) and to decode
//! responses (e.g. the claimed one-time keys or the queried device keys).
//!
//! Encoding preserves explicitly empty user entries, since an empty entry is
//! meaningful in requests. Decoding, through [`DeviceMap::from_wire`] and
//! [`DeviceMap::from_wire_with`], always prunes empty user entries.

use std::collections::{btree_map, BTreeMap};

use ruma::{DeviceId, OwnedDeviceId, OwnedUserId, UserId};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// The wire shape of a [`DeviceMap`]: user IDs and device IDs as plain
/// strings.
pub type WireDeviceMap<V> = BTreeMap<String, BTreeMap<String, V>>;

/// A map from user ID to device ID to `V`.
///
/// Deserializing goes through [`DeviceMap::from_wire`], so the same pruning
/// applies as for decoded responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceMap<V> {
    inner: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, V>>,
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for DeviceMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        WireDeviceMap::deserialize(deserializer).map(Self::from_wire)
    }
}

impl<V> Default for DeviceMap<V> {
    fn default() -> Self {
        Self { inner: BTreeMap::new() }
    }
}

impl<V> DeviceMap<V> {
    /// Create a new, empty `DeviceMap`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value for the given user and device, returning the previous
    /// value if there was one.
    pub fn insert(
        &mut self,
        user_id: OwnedUserId,
        device_id: OwnedDeviceId,
        value: V,
    ) -> Option<V> {
        self.inner.entry(user_id).or_default().insert(device_id, value)
    }

    /// Set all the device entries of a user at once, replacing the existing
    /// ones.
    ///
    /// An empty `devices` map is kept as is, requests use it to address all
    /// the devices of a user.
    pub fn insert_user(
        &mut self,
        user_id: OwnedUserId,
        devices: BTreeMap<OwnedDeviceId, V>,
    ) -> Option<BTreeMap<OwnedDeviceId, V>> {
        self.inner.insert(user_id, devices)
    }

    /// Get the value for the given user and device.
    pub fn get(&self, user_id: &UserId, device_id: &DeviceId) -> Option<&V> {
        self.inner.get(user_id)?.get(device_id)
    }

    /// Get all the device entries of the given user.
    pub fn devices(&self, user_id: &UserId) -> Option<&BTreeMap<OwnedDeviceId, V>> {
        self.inner.get(user_id)
    }

    /// Iterate over the user IDs present in the map.
    pub fn user_ids(&self) -> impl Iterator<Item = &UserId> {
        self.inner.keys().map(|u| &**u)
    }

    /// Iterate over the device IDs of the given user.
    pub fn device_ids<'a>(&'a self, user_id: &UserId) -> impl Iterator<Item = &'a DeviceId> {
        self.inner.get(user_id).into_iter().flat_map(|d| d.keys().map(|d| &**d))
    }

    /// Remove the value for the given user and device.
    ///
    /// The user entry is removed as well if it has no devices left.
    pub fn remove(&mut self, user_id: &UserId, device_id: &DeviceId) -> Option<V> {
        let devices = self.inner.get_mut(user_id)?;
        let value = devices.remove(device_id);

        if devices.is_empty() {
            self.inner.remove(user_id);
        }

        value
    }

    /// Remove all the entries of the given user.
    pub fn remove_user(&mut self, user_id: &UserId) -> Option<BTreeMap<OwnedDeviceId, V>> {
        self.inner.remove(user_id)
    }

    /// Whether the map contains an entry for the given user, even an empty
    /// one.
    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.inner.contains_key(user_id)
    }

    /// The number of user entries.
    pub fn user_count(&self) -> usize {
        self.inner.len()
    }

    /// The total number of device entries, over all users.
    pub fn len(&self) -> usize {
        self.inner.values().map(BTreeMap::len).sum()
    }

    /// Whether the map contains no device entries at all.
    pub fn is_empty(&self) -> bool {
        self.inner.values().all(BTreeMap::is_empty)
    }

    /// Iterate over all the `(user_id, device_id, value)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&UserId, &DeviceId, &V)> {
        self.inner.iter().flat_map(|(user_id, devices)| {
            devices.iter().map(move |(device_id, value)| (&**user_id, &**device_id, value))
        })
    }

    /// Remove the user entries that don't have any device entry.
    pub fn prune(&mut self) {
        self.inner.retain(|_, devices| !devices.is_empty());
    }

    /// Transform every value of the map, keeping the addressing.
    pub fn map<W>(self, mut f: impl FnMut(V) -> W) -> DeviceMap<W> {
        let inner = self
            .inner
            .into_iter()
            .map(|(user_id, devices)| {
                (user_id, devices.into_iter().map(|(d, v)| (d, f(v))).collect())
            })
            .collect();

        DeviceMap { inner }
    }

    /// Get the underlying nested map.
    pub fn into_inner(self) -> BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, V>> {
        self.inner
    }

    /// Decode a wire-shaped map, pruning empty user entries.
    ///
    /// Entries with a malformed user ID are skipped.
    pub fn from_wire(wire: WireDeviceMap<V>) -> Self {
        Self::from_wire_with(wire, |_, _, value| Some(value))
    }

    /// Decode a wire-shaped map, converting each value with `f`.
    ///
    /// Values for which `f` returns `None` are dropped, and user entries that
    /// end up without any device are pruned. Entries with a malformed user ID
    /// are skipped.
    pub fn from_wire_with<W>(
        wire: WireDeviceMap<W>,
        mut f: impl FnMut(&UserId, &DeviceId, W) -> Option<V>,
    ) -> Self {
        let mut map = Self::new();

        for (user_id, devices) in wire {
            let user_id = match UserId::parse(user_id.as_str()) {
                Ok(user_id) => user_id,
                Err(e) => {
                    warn!(%user_id, "Skipping an entry with a malformed user ID: {e}");
                    continue;
                }
            };

            let devices: BTreeMap<OwnedDeviceId, V> = devices
                .into_iter()
                .filter_map(|(device_id, value)| {
                    let device_id = OwnedDeviceId::from(device_id);
                    let value = f(&*user_id, &*device_id, value)?;
                    Some((device_id, value))
                })
                .collect();

            if !devices.is_empty() {
                map.inner.insert(user_id, devices);
            }
        }

        map
    }
}

impl<V> FromIterator<(OwnedUserId, OwnedDeviceId, V)> for DeviceMap<V> {
    fn from_iter<T: IntoIterator<Item = (OwnedUserId, OwnedDeviceId, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (user_id, device_id, value) in iter {
            map.insert(user_id, device_id, value);
        }
        map
    }
}

impl<V> From<BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, V>>> for DeviceMap<V> {
    fn from(inner: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, V>>) -> Self {
        Self { inner }
    }
}

impl<V> IntoIterator for DeviceMap<V> {
    type Item = (OwnedUserId, BTreeMap<OwnedDeviceId, V>);
    type IntoIter = btree_map::IntoIter<OwnedUserId, BTreeMap<OwnedDeviceId, V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}
