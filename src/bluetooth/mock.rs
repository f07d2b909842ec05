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

//! Recording transports and a manually driven scheduler for tests.
//!
//! The fakes are cheap handles around shared state, so a test can keep a
//! clone after moving one into a facade and inspect what the facade did.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::ble_constants::config::DEFAULT_MAXIMUM_PAYLOAD_LENGTH;
use super::transport::{
    CentralHandle, CentralTransport, Characteristic, PeerHandle, PeripheralTransport, PowerState,
    Scheduler, ServiceDefinition, TimerId,
};

/// A command recorded by [`MockCentralTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCall {
    ScanForPeripherals(Option<Vec<Uuid>>),
    StopScan,
    Connect(PeerHandle),
    CancelConnect(PeerHandle),
    Disconnect(PeerHandle),
    DiscoverServices(PeerHandle, Vec<Uuid>),
    DiscoverCharacteristics(PeerHandle, Uuid, Vec<Uuid>),
    SetNotify(PeerHandle, Characteristic, bool),
    Write(PeerHandle, Characteristic, Vec<u8>),
}

struct CentralRecord {
    power_state: PowerState,
    calls: Vec<CentralCall>,
    write_budget: Option<usize>,
    maximum_write_length: usize,
    known: Vec<PeerHandle>,
}

/// Central transport that records every command.
#[derive(Clone)]
pub struct MockCentralTransport {
    record: Arc<Mutex<CentralRecord>>,
}

impl MockCentralTransport {
    /// Create a powered on transport accepting every write.
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(CentralRecord {
                power_state: PowerState::PoweredOn,
                calls: Vec::new(),
                write_budget: None,
                maximum_write_length: DEFAULT_MAXIMUM_PAYLOAD_LENGTH,
                known: Vec::new(),
            })),
        }
    }

    pub fn set_power_state(&self, state: PowerState) {
        self.record.lock().power_state = state;
    }

    /// Accept only `budget` more writes, `None` for unlimited.
    pub fn set_write_budget(&self, budget: Option<usize>) {
        self.record.lock().write_budget = budget;
    }

    pub fn set_maximum_write_length(&self, length: usize) {
        self.record.lock().maximum_write_length = length;
    }

    /// Make `handle` resolvable through `retrieve_peripherals`.
    pub fn add_known_peripheral(&self, handle: PeerHandle) {
        self.record.lock().known.push(handle);
    }

    pub fn calls(&self) -> Vec<CentralCall> {
        self.record.lock().calls.clone()
    }

    /// Return and forget the recorded calls.
    pub fn take_calls(&self) -> Vec<CentralCall> {
        std::mem::take(&mut self.record.lock().calls)
    }

    /// Values of every accepted write, in order.
    pub fn written_values(&self) -> Vec<Vec<u8>> {
        self.record
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                CentralCall::Write(_, _, value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: CentralCall) {
        self.record.lock().calls.push(call);
    }
}

impl Default for MockCentralTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralTransport for MockCentralTransport {
    fn power_state(&self) -> PowerState {
        self.record.lock().power_state
    }

    fn scan_for_peripherals(&mut self, services: Option<Vec<Uuid>>) {
        self.push(CentralCall::ScanForPeripherals(services));
    }

    fn stop_scan(&mut self) {
        self.push(CentralCall::StopScan);
    }

    fn connect(&mut self, peripheral: PeerHandle) {
        self.push(CentralCall::Connect(peripheral));
    }

    fn cancel_connect(&mut self, peripheral: PeerHandle) {
        self.push(CentralCall::CancelConnect(peripheral));
    }

    fn disconnect(&mut self, peripheral: PeerHandle) {
        self.push(CentralCall::Disconnect(peripheral));
    }

    fn discover_services(&mut self, peripheral: PeerHandle, services: Vec<Uuid>) {
        self.push(CentralCall::DiscoverServices(peripheral, services));
    }

    fn discover_characteristics(
        &mut self,
        peripheral: PeerHandle,
        service: Uuid,
        characteristics: Vec<Uuid>,
    ) {
        self.push(CentralCall::DiscoverCharacteristics(
            peripheral,
            service,
            characteristics,
        ));
    }

    fn set_notify(&mut self, peripheral: PeerHandle, characteristic: Characteristic, enabled: bool) {
        self.push(CentralCall::SetNotify(peripheral, characteristic, enabled));
    }

    fn write(
        &mut self,
        peripheral: PeerHandle,
        characteristic: Characteristic,
        value: &[u8],
    ) -> bool {
        let mut record = self.record.lock();
        if let Some(budget) = record.write_budget.as_mut() {
            if *budget == 0 {
                return false;
            }
            *budget -= 1;
        }
        record
            .calls
            .push(CentralCall::Write(peripheral, characteristic, value.to_vec()));
        true
    }

    fn maximum_write_length(&self, _peripheral: PeerHandle) -> usize {
        self.record.lock().maximum_write_length
    }

    fn retrieve_peripherals(&self, identifiers: &[Uuid]) -> Vec<PeerHandle> {
        self.record
            .lock()
            .known
            .iter()
            .filter(|handle| identifiers.contains(&handle.0))
            .copied()
            .collect()
    }
}

/// A command recorded by [`MockPeripheralTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCall {
    AddService(ServiceDefinition),
    RemoveAllServices,
    StartAdvertising(Option<String>, Vec<Uuid>),
    StopAdvertising,
    UpdateValue(Characteristic, Vec<u8>, CentralHandle),
}

struct PeripheralRecord {
    power_state: PowerState,
    advertising: bool,
    calls: Vec<PeripheralCall>,
    update_budget: Option<usize>,
}

/// Peripheral transport that records every command.
#[derive(Clone)]
pub struct MockPeripheralTransport {
    record: Arc<Mutex<PeripheralRecord>>,
}

impl MockPeripheralTransport {
    /// Create a powered on transport accepting every update.
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(PeripheralRecord {
                power_state: PowerState::PoweredOn,
                advertising: false,
                calls: Vec::new(),
                update_budget: None,
            })),
        }
    }

    pub fn set_power_state(&self, state: PowerState) {
        self.record.lock().power_state = state;
    }

    /// Accept only `budget` more updates, `None` for unlimited.
    pub fn set_update_budget(&self, budget: Option<usize>) {
        self.record.lock().update_budget = budget;
    }

    pub fn calls(&self) -> Vec<PeripheralCall> {
        self.record.lock().calls.clone()
    }

    /// Return and forget the recorded calls.
    pub fn take_calls(&self) -> Vec<PeripheralCall> {
        std::mem::take(&mut self.record.lock().calls)
    }

    /// Values of every accepted update for `central`, in order.
    pub fn updates_for(&self, central: CentralHandle) -> Vec<Vec<u8>> {
        self.record
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PeripheralCall::UpdateValue(_, value, to) if *to == central => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: PeripheralCall) {
        self.record.lock().calls.push(call);
    }
}

impl Default for MockPeripheralTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PeripheralTransport for MockPeripheralTransport {
    fn power_state(&self) -> PowerState {
        self.record.lock().power_state
    }

    fn add_service(&mut self, service: ServiceDefinition) {
        self.push(PeripheralCall::AddService(service));
    }

    fn remove_all_services(&mut self) {
        self.push(PeripheralCall::RemoveAllServices);
    }

    fn start_advertising(&mut self, local_name: Option<String>, services: Vec<Uuid>) {
        let mut record = self.record.lock();
        record.advertising = true;
        record
            .calls
            .push(PeripheralCall::StartAdvertising(local_name, services));
    }

    fn stop_advertising(&mut self) {
        let mut record = self.record.lock();
        record.advertising = false;
        record.calls.push(PeripheralCall::StopAdvertising);
    }

    fn is_advertising(&self) -> bool {
        self.record.lock().advertising
    }

    fn update_value(
        &mut self,
        characteristic: Characteristic,
        value: &[u8],
        central: CentralHandle,
    ) -> bool {
        let mut record = self.record.lock();
        if let Some(budget) = record.update_budget.as_mut() {
            if *budget == 0 {
                return false;
            }
            *budget -= 1;
        }
        record
            .calls
            .push(PeripheralCall::UpdateValue(characteristic, value.to_vec(), central));
        true
    }
}

#[derive(Default)]
struct Timers {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<TimerId, Duration>,
}

/// Scheduler whose clock only moves when told to.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    timers: Arc<Mutex<Timers>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.timers.lock().now
    }

    /// Pending timers in scheduling order.
    pub fn pending(&self) -> Vec<TimerId> {
        self.timers.lock().pending.keys().copied().collect()
    }

    pub fn deadline(&self, id: TimerId) -> Option<Duration> {
        self.timers.lock().pending.get(&id).copied()
    }

    /// Move the clock forward and return the timers that fired, earliest
    /// deadline first. Fired timers are forgotten.
    pub fn advance(&self, by: Duration) -> Vec<TimerId> {
        let mut timers = self.timers.lock();
        timers.now += by;
        let now = timers.now;

        let mut due: Vec<(Duration, TimerId)> = timers
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        due.sort();
        for (_, id) in &due {
            timers.pending.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let mut timers = self.timers.lock();
        timers.next_id += 1;
        let id = TimerId(timers.next_id);
        let deadline = timers.now + delay;
        timers.pending.insert(id, deadline);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.lock().pending.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_scheduler_orders_by_deadline() {
        let mut scheduler = ManualScheduler::new();
        let late = scheduler.schedule(Duration::from_secs(5));
        let early = scheduler.schedule(Duration::from_secs(1));
        let cancelled = scheduler.schedule(Duration::from_secs(2));
        scheduler.cancel(cancelled);

        assert!(scheduler.advance(Duration::from_millis(500)).is_empty());
        assert_eq!(
            scheduler.advance(Duration::from_secs(5)),
            vec![early, late]
        );
        assert!(scheduler.pending().is_empty());
        assert_eq!(scheduler.now(), Duration::from_millis(5500));
    }

    #[test]
    fn test_write_budget() {
        let mut transport = MockCentralTransport::new();
        let handle = PeerHandle(Uuid::new_v4());
        let characteristic = Characteristic {
            service: Uuid::new_v4(),
            uuid: Uuid::new_v4(),
        };
        transport.set_write_budget(Some(1));

        assert!(transport.write(handle, characteristic, b"a"));
        assert!(!transport.write(handle, characteristic, b"b"));
        assert_eq!(transport.written_values(), vec![b"a".to_vec()]);
    }
}
