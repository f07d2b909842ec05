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

//! Central role: scanning, connecting and exchanging data with peripherals.
//!
//! [`Central`] never blocks. Operations are submitted right away and
//! resolved later through their callbacks, as the transport reports events
//! through [`Central::handle_event`] and timers expire through
//! [`Central::handle_timer`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::availability::{
    notice_for, Availability, AvailabilityNotice, AvailabilityObserver, AvailabilityObservers,
    Role,
};
use crate::bluetooth::ble_constants::config::DEFAULT_MAXIMUM_PAYLOAD_LENGTH;
use crate::bluetooth::continuous::{ContinuousScanRequest, ContinuousScanState, ContinuousScanner};
use crate::bluetooth::peer::{deliver_data, RemotePeripheral};
use crate::bluetooth::pool::ConnectionPool;
use crate::bluetooth::reassembler::Reassembler;
use crate::bluetooth::scanner::{DiscoveriesChange, Discovery};
use crate::bluetooth::transfer::{ChunkSink, SendDataTask, TransferEngine};
use crate::bluetooth::transport::{
    CentralEvent, CentralTransport, Characteristic, PeerHandle, PowerState, Scheduler, TimerId,
};
use crate::config::Configuration;
use crate::error::{Error, Result, TransportError};
use crate::state::{CentralState, CentralStateEvent, CentralStateMachine};

/// Receives connection-level events of a central.
pub trait CentralDelegate: Send + Sync {
    /// A connected peripheral went away, whatever the reason.
    fn remote_peripheral_did_disconnect(&self, peripheral: &Arc<RemotePeripheral>);
}

/// Everything owned between `start` and `stop`.
struct Link {
    configuration: Configuration,
    transport: Box<dyn CentralTransport>,
    outbound: TransferEngine<RemotePeripheral>,
    inbound: Reassembler,
}

fn transport_of(link: &mut Option<Link>) -> Option<&mut (dyn CentralTransport + 'static)> {
    link.as_mut().map(|link| link.transport.as_mut())
}

struct PeripheralSink<'a> {
    transport: &'a mut dyn CentralTransport,
    pool: &'a ConnectionPool,
}

impl ChunkSink<RemotePeripheral> for PeripheralSink<'_> {
    fn is_connected(&self, peer: &RemotePeripheral) -> bool {
        self.pool.is_connected(peer.identifier())
    }

    fn maximum_payload_length(&self, peer: &RemotePeripheral) -> usize {
        match peer.handle() {
            Some(handle) => self.transport.maximum_write_length(handle),
            None => DEFAULT_MAXIMUM_PAYLOAD_LENGTH,
        }
    }

    fn write(&mut self, peer: &RemotePeripheral, chunk: &[u8]) -> bool {
        match (peer.handle(), peer.data_characteristic()) {
            (Some(handle), Some(characteristic)) => {
                self.transport.write(handle, characteristic, chunk)
            }
            _ => false,
        }
    }
}

/// The central side of the link.
pub struct Central {
    state_machine: CentralStateMachine,
    scheduler: Box<dyn Scheduler>,
    link: Option<Link>,
    scanner: ContinuousScanner,
    pool: ConnectionPool,
    known_peripherals: HashMap<Uuid, Weak<RemotePeripheral>>,
    delegate: Option<Weak<dyn CentralDelegate>>,
    observers: AvailabilityObservers,
}

impl Central {
    /// Create a new central driving its timers through `scheduler`.
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self {
            state_machine: CentralStateMachine::new(),
            scheduler: Box::new(scheduler),
            link: None,
            scanner: ContinuousScanner::new(),
            pool: ConnectionPool::new(),
            known_peripherals: HashMap::new(),
            delegate: None,
            observers: AvailabilityObservers::new(Role::Central),
        }
    }

    /// Attach the transport and start tracking its power state.
    pub fn start(
        &mut self,
        configuration: Configuration,
        transport: impl CentralTransport + 'static,
    ) -> Result<()> {
        configuration.validate()?;
        self.state_machine.handle_event(CentralStateEvent::Start)?;
        info!(
            "Starting central for service {}",
            configuration.service_uuid
        );

        let power_state = transport.power_state();
        self.link = Some(Link {
            outbound: TransferEngine::new(configuration.end_of_data_mark.clone()),
            inbound: Reassembler::new(configuration.end_of_data_mark.clone()),
            configuration,
            transport: Box::new(transport),
        });
        self.power_state_changed(power_state);
        Ok(())
    }

    /// `None` until started.
    pub fn availability(&self) -> Option<Availability> {
        self.link
            .as_ref()
            .map(|link| Availability::from(link.transport.power_state()))
    }

    pub fn state(&self) -> CentralState {
        self.state_machine.state()
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.link.as_ref().map(|link| &link.configuration)
    }

    pub fn continuous_scan_state(&self) -> ContinuousScanState {
        self.scanner.state()
    }

    /// Scan once for `duration`, reporting each new discovery to `progress`
    /// and all of them to `completion`.
    pub fn scan<P, C>(&mut self, duration: Duration, progress: P, completion: C)
    where
        P: FnMut(&[Discovery]) + Send + 'static,
        C: FnOnce(Result<Vec<Discovery>>) + Send + 'static,
    {
        if let Err(error) = self.state_machine.handle_event(CentralStateEvent::Scan) {
            return completion(Err(error.into()));
        }

        let services = self.service_uuids();
        self.scanner.scan(
            transport_of(&mut self.link),
            self.scheduler.as_mut(),
            services,
            duration,
            Box::new(progress),
            Box::new(completion),
        );
        self.sync_scan_state();
    }

    /// Scan in passes of `duration` separated by `in_between_delay` until
    /// interrupted, reporting peripherals as they appear and disappear.
    pub fn scan_continuously<C, S, E>(
        &mut self,
        duration: Duration,
        in_between_delay: Duration,
        on_change: C,
        on_state: S,
        on_error: E,
    ) where
        C: FnMut(&[DiscoveriesChange], &[Discovery]) + Send + 'static,
        S: FnMut(ContinuousScanState) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        if let Err(error) = self.state_machine.handle_event(CentralStateEvent::Scan) {
            return on_error(error.into());
        }

        let request = ContinuousScanRequest {
            services: self.service_uuids(),
            duration,
            in_between_delay,
            on_change: Box::new(on_change),
            on_state: Some(Box::new(on_state)),
            on_error: Some(Box::new(on_error)),
        };
        self.scanner.scan_continuously(
            transport_of(&mut self.link),
            self.scheduler.as_mut(),
            request,
        );
        self.sync_scan_state();
    }

    /// Stop the running scan or continuous scan, completing it with `Interrupted`.
    pub fn interrupt_scan(&mut self) {
        self.scanner
            .interrupt(transport_of(&mut self.link), self.scheduler.as_mut());
        self.sync_scan_state();
    }

    /// Connect to `peripheral`, giving up after `timeout`.
    pub fn connect<F>(&mut self, timeout: Duration, peripheral: &Arc<RemotePeripheral>, completion: F)
    where
        F: FnOnce(Arc<RemotePeripheral>, Result<()>) + Send + 'static,
    {
        if let Err(error) = self.state_machine.handle_event(CentralStateEvent::Connect) {
            return completion(peripheral.clone(), Err(error.into()));
        }

        self.pool.connect(
            transport_of(&mut self.link),
            self.scheduler.as_mut(),
            timeout,
            peripheral.clone(),
            Box::new(completion),
        );
    }

    pub fn interrupt_connection_attempt(&mut self, peripheral: &RemotePeripheral) -> Result<()> {
        self.pool.interrupt_attempt(
            transport_of(&mut self.link),
            self.scheduler.as_mut(),
            peripheral,
        )
    }

    /// Disconnect a connected peripheral. The delegate hears about it once
    /// the transport confirms.
    pub fn disconnect(&mut self, peripheral: &RemotePeripheral) -> Result<()> {
        self.pool.disconnect(transport_of(&mut self.link), peripheral)
    }

    /// Queue `data` for `peripheral`. Sends are served in submission order.
    pub fn send_data<F>(&mut self, data: Vec<u8>, peripheral: &Arc<RemotePeripheral>, completion: F)
    where
        F: FnOnce(Vec<u8>, Arc<RemotePeripheral>, Result<()>) + Send + 'static,
    {
        let Some(link) = self.link.as_mut() else {
            return completion(data, peripheral.clone(), Err(Error::PeerNotConnected));
        };

        debug!("Queueing {} bytes for {}", data.len(), peripheral.identifier());
        let task = SendDataTask::new(data, peripheral.clone(), Box::new(completion));
        let mut sink = PeripheralSink {
            transport: link.transport.as_mut(),
            pool: &self.pool,
        };
        link.outbound.enqueue(task, &mut sink);
    }

    pub fn connected_remote_peripherals(&self) -> Vec<Arc<RemotePeripheral>> {
        self.pool.connected().to_vec()
    }

    /// Resolve identifiers of previously seen peripherals. Identifiers the
    /// transport does not know yield shallow peripherals.
    pub fn retrieve_remote_peripherals(&mut self, identifiers: &[Uuid]) -> Vec<Arc<RemotePeripheral>> {
        let handles = match self.link.as_ref() {
            Some(link) => link.transport.retrieve_peripherals(identifiers),
            None => Vec::new(),
        };

        identifiers
            .iter()
            .map(|identifier| {
                match handles.iter().find(|handle| handle.0 == *identifier) {
                    Some(handle) => self.intern(*handle),
                    None => self.intern_shallow(*identifier),
                }
            })
            .collect()
    }

    pub fn set_delegate<D: CentralDelegate + 'static>(&mut self, delegate: &Arc<D>) {
        let weak: Weak<dyn CentralDelegate> = Arc::<D>::downgrade(delegate);
        self.delegate = Some(weak);
    }

    pub fn add_availability_observer<O: AvailabilityObserver + 'static>(&mut self, observer: &Arc<O>) {
        self.observers.add(observer);
    }

    pub fn remove_availability_observer<O: AvailabilityObserver + 'static>(
        &mut self,
        observer: &Arc<O>,
    ) {
        self.observers.remove(observer);
    }

    /// Interrupt everything in flight, drop connections and detach the transport.
    pub fn stop(&mut self) -> Result<()> {
        self.state_machine.handle_event(CentralStateEvent::Stop)?;

        self.scanner
            .interrupt(transport_of(&mut self.link), self.scheduler.as_mut());
        if let Some(link) = self.link.as_mut() {
            for peripheral in self.pool.connected() {
                if let Some(handle) = peripheral.handle() {
                    link.transport.disconnect(handle);
                }
            }
        }
        let dropped = self
            .pool
            .reset(transport_of(&mut self.link), self.scheduler.as_mut());
        for peripheral in &dropped {
            self.peripheral_disconnected(peripheral);
        }
        if let Some(mut link) = self.link.take() {
            link.outbound.fail_all();
        }

        info!("Central stopped");
        Ok(())
    }

    /// Feed an event reported by the transport.
    pub fn handle_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::PowerStateChanged(power_state) => self.power_state_changed(power_state),
            CentralEvent::Discovered {
                peripheral,
                advertisement,
                rssi,
            } => {
                let remote = self.intern(peripheral);
                let discovery = Discovery::new(advertisement, remote, rssi);
                if let Some(name) = discovery.local_name() {
                    discovery.remote_peripheral().set_name(Some(name.to_string()));
                }
                self.scanner.did_discover(discovery);
            }
            CentralEvent::Connected(handle) => {
                let services = self.service_uuids();
                if let Some(link) = self.link.as_mut() {
                    self.pool.did_connect(
                        link.transport.as_mut(),
                        self.scheduler.as_mut(),
                        services,
                        handle,
                    );
                }
            }
            CentralEvent::FailedToConnect { peripheral, error } => {
                self.pool
                    .did_fail_to_connect(self.scheduler.as_mut(), peripheral, error);
            }
            CentralEvent::Disconnected { peripheral, error } => {
                if let Some(error) = error {
                    warn!("Peripheral {:?} disconnected: {}", peripheral, error);
                }
                match self.pool.did_disconnect(peripheral) {
                    Some(remote) => self.peripheral_disconnected(&remote),
                    None => debug!("Ignoring disconnect of unknown {:?}", peripheral),
                }
            }
            CentralEvent::ServicesDiscovered {
                peripheral,
                services,
            } => self.services_discovered(peripheral, services),
            CentralEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => self.characteristics_discovered(peripheral, service, characteristics),
            CentralEvent::NotificationStateUpdated {
                peripheral,
                characteristic,
                enabled,
            } => self.notification_state_updated(peripheral, characteristic, enabled),
            CentralEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => self.value_updated(peripheral, characteristic, &value),
            CentralEvent::NameUpdated { peripheral, name } => {
                if let Some(remote) = self.peripheral_for(peripheral) {
                    remote.set_name(Some(name.clone()));
                    if let Some(delegate) = remote.peripheral_delegate() {
                        delegate.remote_peripheral_did_update_name(&remote, &name);
                    }
                }
            }
            CentralEvent::ReadyToWrite(_) => self.process_send_queue(),
            CentralEvent::ScanFailed(error) => {
                warn!("Scan failed: {}", error);
                self.scanner
                    .scan_failed(transport_of(&mut self.link), self.scheduler.as_mut(), error);
            }
        }
        self.sync_scan_state();
    }

    /// Feed an expired timer.
    pub fn handle_timer(&mut self, timer: TimerId) {
        let handled = self
            .pool
            .timer_elapsed(transport_of(&mut self.link), self.scheduler.as_mut(), timer)
            || self
                .scanner
                .timer_elapsed(transport_of(&mut self.link), self.scheduler.as_mut(), timer);
        if !handled {
            debug!("Ignoring stale timer {:?}", timer);
        }
        self.sync_scan_state();
    }

    fn power_state_changed(&mut self, power_state: PowerState) {
        if matches!(power_state, PowerState::Unknown | PowerState::Resetting) {
            debug!("Transient power state {:?}", power_state);
            return;
        }

        let availability = Availability::from(power_state);
        let previous = self.state_machine.state().availability();
        if previous == Some(availability) {
            return;
        }
        let event = match availability {
            Availability::Available => CentralStateEvent::SetAvailable,
            Availability::Unavailable(cause) => CentralStateEvent::SetUnavailable(cause),
        };
        if let Err(error) = self.state_machine.handle_event(event) {
            debug!("Ignoring power state {:?}: {}", power_state, error);
            return;
        }

        let Some(notice) = notice_for(previous, availability) else {
            return;
        };
        if let AvailabilityNotice::Changed(Availability::Unavailable(cause)) = notice {
            info!("Central unavailable: {}", cause.as_str());
            self.invalidate();
        }
        self.observers.notify(notice);
    }

    /// Fail everything that needs a usable radio.
    fn invalidate(&mut self) {
        self.scanner
            .interrupt(transport_of(&mut self.link), self.scheduler.as_mut());
        let dropped = self
            .pool
            .reset(transport_of(&mut self.link), self.scheduler.as_mut());
        for peripheral in &dropped {
            self.peripheral_disconnected(peripheral);
        }
    }

    fn peripheral_disconnected(&mut self, peripheral: &Arc<RemotePeripheral>) {
        if let Some(link) = self.link.as_mut() {
            link.inbound.discard(peripheral.identifier());
            link.outbound.fail_tasks_for(peripheral.identifier());
        }
        self.process_send_queue();

        if let Some(delegate) = self.delegate.as_ref().and_then(Weak::upgrade) {
            delegate.remote_peripheral_did_disconnect(peripheral);
        }
    }

    fn services_discovered(&mut self, handle: PeerHandle, services: std::result::Result<Vec<Uuid>, TransportError>) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(peripheral) = self.pool.connected_by_handle(handle) else {
            debug!("Ignoring services of unconnected {:?}", handle);
            return;
        };

        let service = link.configuration.service_uuid;
        match services {
            Ok(services) if services.contains(&service) => {
                link.transport.discover_characteristics(
                    handle,
                    service,
                    vec![link.configuration.characteristic_uuid],
                );
            }
            Ok(_) => warn!(
                "Peripheral {} does not offer service {}",
                peripheral.identifier(),
                service
            ),
            Err(error) => warn!(
                "Service discovery on {} failed: {}",
                peripheral.identifier(),
                error
            ),
        }
    }

    fn characteristics_discovered(
        &mut self,
        handle: PeerHandle,
        service: Uuid,
        characteristics: std::result::Result<Vec<Characteristic>, TransportError>,
    ) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(peripheral) = self.pool.connected_by_handle(handle) else {
            debug!("Ignoring characteristics of unconnected {:?}", handle);
            return;
        };
        if service != link.configuration.service_uuid {
            return;
        }

        let wanted = link.configuration.characteristic_uuid;
        match characteristics {
            Ok(characteristics) => {
                match characteristics.into_iter().find(|c| c.uuid == wanted) {
                    Some(characteristic) => {
                        peripheral.set_data_characteristic(Some(characteristic));
                        link.transport.set_notify(handle, characteristic, true);
                    }
                    None => warn!(
                        "Peripheral {} lacks characteristic {}",
                        peripheral.identifier(),
                        wanted
                    ),
                }
            }
            Err(error) => warn!(
                "Characteristic discovery on {} failed: {}",
                peripheral.identifier(),
                error
            ),
        }
    }

    fn notification_state_updated(
        &mut self,
        handle: PeerHandle,
        characteristic: Characteristic,
        enabled: bool,
    ) {
        let Some(peripheral) = self.pool.connected_by_handle(handle).cloned() else {
            return;
        };
        if !enabled || peripheral.data_characteristic() != Some(characteristic) {
            return;
        }

        info!("Peripheral {} is ready", peripheral.identifier());
        if let Some(delegate) = peripheral.peripheral_delegate() {
            delegate.remote_peripheral_is_ready(&peripheral);
        }
        self.process_send_queue();
    }

    fn value_updated(&mut self, handle: PeerHandle, characteristic: Characteristic, value: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if characteristic.service != link.configuration.service_uuid
            || characteristic.uuid != link.configuration.characteristic_uuid
        {
            debug!("Ignoring value on foreign characteristic {:?}", characteristic);
            return;
        }
        let Some(peripheral) = self.pool.connected_by_handle(handle).cloned() else {
            debug!("Ignoring value from unconnected {:?}", handle);
            return;
        };

        if let Some(data) = link.inbound.receive(peripheral.identifier(), value) {
            if !deliver_data(&peripheral, &data) {
                debug!(
                    "Dropping {} bytes from {}: no delegate",
                    data.len(),
                    peripheral.identifier()
                );
            }
        }
    }

    fn process_send_queue(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let mut sink = PeripheralSink {
            transport: link.transport.as_mut(),
            pool: &self.pool,
        };
        link.outbound.process(&mut sink);
    }

    /// A scan that ended on its own hands the central back to `Available`.
    fn sync_scan_state(&mut self) {
        if self.state_machine.state() == CentralState::Scanning
            && !self.scanner.is_busy()
            && self
                .state_machine
                .handle_event(CentralStateEvent::SetAvailable)
                .is_ok()
        {
            debug!("Scan over, central available");
        }
    }

    fn service_uuids(&self) -> Vec<Uuid> {
        self.link
            .as_ref()
            .map(|link| link.configuration.service_uuids())
            .unwrap_or_default()
    }

    fn peripheral_for(&self, handle: PeerHandle) -> Option<Arc<RemotePeripheral>> {
        self.pool
            .connected_by_handle(handle)
            .cloned()
            .or_else(|| self.known_peripherals.get(&handle.0).and_then(Weak::upgrade))
    }

    /// One shared peripheral per identifier, as long as anyone holds it.
    fn intern(&mut self, handle: PeerHandle) -> Arc<RemotePeripheral> {
        if let Some(existing) = self.known_peripherals.get(&handle.0).and_then(Weak::upgrade) {
            if existing.handle().is_none() {
                existing.attach_handle(handle);
            }
            return existing;
        }
        self.remember(Arc::new(RemotePeripheral::with_handle(handle)))
    }

    fn intern_shallow(&mut self, identifier: Uuid) -> Arc<RemotePeripheral> {
        if let Some(existing) = self.known_peripherals.get(&identifier).and_then(Weak::upgrade) {
            return existing;
        }
        self.remember(Arc::new(RemotePeripheral::new(identifier)))
    }

    fn remember(&mut self, peripheral: Arc<RemotePeripheral>) -> Arc<RemotePeripheral> {
        self.known_peripherals
            .retain(|_, known| known.strong_count() > 0);
        self.known_peripherals
            .insert(peripheral.identifier(), Arc::downgrade(&peripheral));
        peripheral
    }
}
