// Copyright 2026 Daniel Pelikan
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

//! Radio transport boundary.
//!
//! A transport wraps the platform BLE stack. Commands go out through the
//! [`CentralTransport`] and [`PeripheralTransport`] traits; everything the
//! stack reports comes back as a [`CentralEvent`] or [`PeripheralEvent`]
//! fed to the matching facade's `handle_event`.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use super::ble_constants::config::DEFAULT_MAXIMUM_PAYLOAD_LENGTH;
use crate::error::TransportError;

/// Power state reported by the platform radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Transport handle of a remote peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub Uuid);

/// Transport handle of a subscribed remote central.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CentralHandle(pub Uuid);

/// A characteristic inside a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// GATT service published by a peripheral: one primary service carrying the
/// data characteristic (writable by centrals, notifying subscribers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub uuid: Uuid,
    pub data_characteristic: Uuid,
}

impl ServiceDefinition {
    pub fn characteristic(&self) -> Characteristic {
        Characteristic {
            service: self.uuid,
            uuid: self.data_characteristic,
        }
    }
}

/// A value found in advertisement data.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvertisementValue {
    Text(String),
    Bytes(Vec<u8>),
    Uuids(Vec<Uuid>),
    Number(i64),
    Flag(bool),
}

/// Advertisement data keyed by the names in `ble_constants::advertisement`.
pub type AdvertisementData = HashMap<String, AdvertisementValue>;

/// Identifier of a one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// One-shot timers. Expirations are delivered to the owning facade's
/// `handle_timer`.
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Cancel a pending timer. Unknown or fired timers are ignored.
    fn cancel(&mut self, id: TimerId);
}

/// Commands a central issues to the platform stack.
pub trait CentralTransport: Send {
    fn power_state(&self) -> PowerState;

    fn scan_for_peripherals(&mut self, services: Option<Vec<Uuid>>);

    fn stop_scan(&mut self);

    fn connect(&mut self, peripheral: PeerHandle);

    /// Abort a pending connect.
    fn cancel_connect(&mut self, peripheral: PeerHandle);

    fn disconnect(&mut self, peripheral: PeerHandle);

    fn discover_services(&mut self, peripheral: PeerHandle, services: Vec<Uuid>);

    fn discover_characteristics(
        &mut self,
        peripheral: PeerHandle,
        service: Uuid,
        characteristics: Vec<Uuid>,
    );

    fn set_notify(&mut self, peripheral: PeerHandle, characteristic: Characteristic, enabled: bool);

    /// Write without response. Returns `false` when the outbound buffer is
    /// full; the transport then reports `CentralEvent::ReadyToWrite`.
    fn write(&mut self, peripheral: PeerHandle, characteristic: Characteristic, value: &[u8])
        -> bool;

    fn maximum_write_length(&self, _peripheral: PeerHandle) -> usize {
        DEFAULT_MAXIMUM_PAYLOAD_LENGTH
    }

    /// Resolve previously seen peripherals by identifier.
    fn retrieve_peripherals(&self, identifiers: &[Uuid]) -> Vec<PeerHandle>;
}

/// Everything the platform stack reports to a central.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    PowerStateChanged(PowerState),
    Discovered {
        peripheral: PeerHandle,
        advertisement: AdvertisementData,
        rssi: i16,
    },
    Connected(PeerHandle),
    FailedToConnect {
        peripheral: PeerHandle,
        error: TransportError,
    },
    Disconnected {
        peripheral: PeerHandle,
        error: Option<TransportError>,
    },
    ServicesDiscovered {
        peripheral: PeerHandle,
        services: Result<Vec<Uuid>, TransportError>,
    },
    CharacteristicsDiscovered {
        peripheral: PeerHandle,
        service: Uuid,
        characteristics: Result<Vec<Characteristic>, TransportError>,
    },
    NotificationStateUpdated {
        peripheral: PeerHandle,
        characteristic: Characteristic,
        enabled: bool,
    },
    ValueUpdated {
        peripheral: PeerHandle,
        characteristic: Characteristic,
        value: Vec<u8>,
    },
    NameUpdated {
        peripheral: PeerHandle,
        name: String,
    },
    ReadyToWrite(PeerHandle),
    ScanFailed(TransportError),
}

/// Commands a peripheral issues to the platform stack.
pub trait PeripheralTransport: Send {
    fn power_state(&self) -> PowerState;

    fn add_service(&mut self, service: ServiceDefinition);

    fn remove_all_services(&mut self);

    fn start_advertising(&mut self, local_name: Option<String>, services: Vec<Uuid>);

    fn stop_advertising(&mut self);

    fn is_advertising(&self) -> bool;

    /// Notify one subscriber. Returns `false` when the transmit queue is
    /// full; the transport then reports `PeripheralEvent::ReadyToUpdateSubscribers`.
    fn update_value(
        &mut self,
        characteristic: Characteristic,
        value: &[u8],
        central: CentralHandle,
    ) -> bool;
}

/// Everything the platform stack reports to a peripheral.
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    PowerStateChanged(PowerState),
    ServiceAdded(Result<(), TransportError>),
    AdvertisingStarted(Result<(), TransportError>),
    Subscribed {
        central: CentralHandle,
        maximum_update_length: usize,
    },
    Unsubscribed(CentralHandle),
    WriteReceived {
        central: CentralHandle,
        value: Vec<u8>,
    },
    ReadyToUpdateSubscribers,
}
