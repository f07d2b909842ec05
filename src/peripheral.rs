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

//! Peripheral role: publishing the data service and serving subscribers.

use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::availability::{
    notice_for, Availability, AvailabilityNotice, AvailabilityObserver, AvailabilityObservers,
    Role,
};
use crate::bluetooth::peer::{deliver_data, RemoteCentral};
use crate::bluetooth::reassembler::Reassembler;
use crate::bluetooth::transfer::{ChunkSink, SendDataTask, TransferEngine};
use crate::bluetooth::transport::{
    CentralHandle, Characteristic, PeripheralEvent, PeripheralTransport, PowerState, TimerId,
};
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::state::{PeripheralState, PeripheralStateEvent, PeripheralStateMachine};

/// Receives subscription events of a peripheral.
pub trait PeripheralDelegate: Send + Sync {
    fn remote_central_did_connect(&self, central: &Arc<RemoteCentral>);

    fn remote_central_did_disconnect(&self, central: &Arc<RemoteCentral>);
}

struct Link {
    configuration: Configuration,
    transport: Box<dyn PeripheralTransport>,
    outbound: TransferEngine<RemoteCentral>,
    inbound: Reassembler,
}

struct CentralSink<'a> {
    transport: &'a mut dyn PeripheralTransport,
    characteristic: Characteristic,
    connected: &'a [Arc<RemoteCentral>],
}

impl ChunkSink<RemoteCentral> for CentralSink<'_> {
    fn is_connected(&self, peer: &RemoteCentral) -> bool {
        self.connected
            .iter()
            .any(|central| central.identifier() == peer.identifier())
    }

    fn maximum_payload_length(&self, peer: &RemoteCentral) -> usize {
        peer.maximum_update_length()
    }

    fn write(&mut self, peer: &RemoteCentral, chunk: &[u8]) -> bool {
        self.transport
            .update_value(self.characteristic, chunk, peer.handle())
    }
}

/// The peripheral side of the link.
pub struct Peripheral {
    state_machine: PeripheralStateMachine,
    link: Option<Link>,
    connected: Vec<Arc<RemoteCentral>>,
    delegate: Option<Weak<dyn PeripheralDelegate>>,
    observers: AvailabilityObservers,
}

impl Peripheral {
    pub fn new() -> Self {
        Self {
            state_machine: PeripheralStateMachine::new(),
            link: None,
            connected: Vec::new(),
            delegate: None,
            observers: AvailabilityObservers::new(Role::Peripheral),
        }
    }

    /// Attach the transport. The service is published once the radio is on.
    pub fn start(
        &mut self,
        configuration: Configuration,
        transport: impl PeripheralTransport + 'static,
    ) -> Result<()> {
        configuration.validate()?;
        self.state_machine.handle_event(PeripheralStateEvent::Start)?;
        info!(
            "Starting peripheral for service {}",
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

    pub fn availability(&self) -> Option<Availability> {
        self.link
            .as_ref()
            .map(|link| Availability::from(link.transport.power_state()))
    }

    pub fn state(&self) -> PeripheralState {
        self.state_machine.state()
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.link.as_ref().map(|link| &link.configuration)
    }

    pub fn connected_remote_centrals(&self) -> Vec<Arc<RemoteCentral>> {
        self.connected.clone()
    }

    /// Queue `data` for a subscribed central.
    pub fn send_data<F>(&mut self, data: Vec<u8>, central: &Arc<RemoteCentral>, completion: F)
    where
        F: FnOnce(Vec<u8>, Arc<RemoteCentral>, Result<()>) + Send + 'static,
    {
        let Some(link) = self.link.as_mut() else {
            return completion(data, central.clone(), Err(Error::PeerNotConnected));
        };

        debug!("Queueing {} bytes for {}", data.len(), central.identifier());
        let task = SendDataTask::new(data, central.clone(), Box::new(completion));
        let mut sink = CentralSink {
            characteristic: link.configuration.service_definition().characteristic(),
            transport: link.transport.as_mut(),
            connected: &self.connected,
        };
        link.outbound.enqueue(task, &mut sink);
    }

    pub fn set_delegate<D: PeripheralDelegate + 'static>(&mut self, delegate: &Arc<D>) {
        let weak: Weak<dyn PeripheralDelegate> = Arc::<D>::downgrade(delegate);
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

    /// Withdraw the service and drop every subscriber.
    pub fn stop(&mut self) -> Result<()> {
        self.state_machine.handle_event(PeripheralStateEvent::Stop)?;

        if let Some(link) = self.link.as_mut() {
            if link.transport.is_advertising() {
                link.transport.stop_advertising();
            }
            link.transport.remove_all_services();
        }
        self.disconnect_all();
        if let Some(mut link) = self.link.take() {
            link.outbound.fail_all();
        }

        info!("Peripheral stopped");
        Ok(())
    }

    /// Feed an event reported by the transport.
    pub fn handle_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::PowerStateChanged(power_state) => {
                self.power_state_changed(power_state)
            }
            PeripheralEvent::ServiceAdded(result) => {
                let Some(link) = self.link.as_mut() else {
                    return;
                };
                match result {
                    Ok(()) => {
                        info!(
                            "Advertising service {} as {:?}",
                            link.configuration.service_uuid, link.configuration.local_name
                        );
                        link.transport.start_advertising(
                            link.configuration.local_name.clone(),
                            link.configuration.service_uuids(),
                        );
                    }
                    Err(error) => warn!("Failed to add service: {}", error),
                }
            }
            PeripheralEvent::AdvertisingStarted(result) => match result {
                Ok(()) => debug!("Advertising started"),
                Err(error) => warn!("Failed to start advertising: {}", error),
            },
            PeripheralEvent::Subscribed {
                central,
                maximum_update_length,
            } => self.subscribed(central, maximum_update_length),
            PeripheralEvent::Unsubscribed(central) => {
                match self.connected.iter().position(|c| c.handle() == central) {
                    Some(index) => {
                        let remote = self.connected.remove(index);
                        self.central_disconnected(&remote);
                    }
                    None => debug!("Ignoring unsubscribe of unknown {:?}", central),
                }
            }
            PeripheralEvent::WriteReceived { central, value } => {
                self.write_received(central, &value)
            }
            PeripheralEvent::ReadyToUpdateSubscribers => self.process_send_queue(),
        }
    }

    /// A peripheral arms no timers.
    pub fn handle_timer(&mut self, timer: TimerId) {
        debug!("Ignoring timer {:?}", timer);
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
            Availability::Available => PeripheralStateEvent::SetAvailable,
            Availability::Unavailable(cause) => PeripheralStateEvent::SetUnavailable(cause),
        };
        if let Err(error) = self.state_machine.handle_event(event) {
            debug!("Ignoring power state {:?}: {}", power_state, error);
            return;
        }

        let Some(notice) = notice_for(previous, availability) else {
            return;
        };
        match notice {
            AvailabilityNotice::Changed(Availability::Available) => {
                self.observers.notify(notice);
                self.publish_service();
            }
            AvailabilityNotice::Changed(Availability::Unavailable(cause)) => {
                info!("Peripheral unavailable: {}", cause.as_str());
                self.disconnect_all();
                self.observers.notify(notice);
            }
            AvailabilityNotice::CauseChanged(_) => self.observers.notify(notice),
        }
    }

    fn publish_service(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.transport.is_advertising() {
            return;
        }
        link.transport
            .add_service(link.configuration.service_definition());
    }

    fn subscribed(&mut self, handle: CentralHandle, maximum_update_length: usize) {
        if self.link.is_none() || self.state_machine.state() != PeripheralState::Available {
            debug!("Ignoring subscription of {:?} in {:?}", handle, self.state());
            return;
        }
        if self.connected.iter().any(|c| c.handle() == handle) {
            debug!("Central {:?} subscribed again", handle);
            return;
        }

        let central = Arc::new(RemoteCentral::new(handle, maximum_update_length));
        info!(
            "Central {} subscribed (update length {})",
            central.identifier(),
            central.maximum_update_length()
        );
        self.connected.push(central.clone());
        if let Some(delegate) = self.delegate.as_ref().and_then(Weak::upgrade) {
            delegate.remote_central_did_connect(&central);
        }
    }

    fn write_received(&mut self, handle: CentralHandle, value: &[u8]) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(central) = self.connected.iter().find(|c| c.handle() == handle) else {
            debug!("Ignoring write from unsubscribed {:?}", handle);
            return;
        };

        if let Some(data) = link.inbound.receive(central.identifier(), value) {
            if !deliver_data(central, &data) {
                debug!(
                    "Dropping {} bytes from {}: no delegate",
                    data.len(),
                    central.identifier()
                );
            }
        }
    }

    fn disconnect_all(&mut self) {
        for central in std::mem::take(&mut self.connected) {
            self.central_disconnected(&central);
        }
    }

    /// `central` is already out of the connected list.
    fn central_disconnected(&mut self, central: &Arc<RemoteCentral>) {
        info!("Central {} disconnected", central.identifier());
        if let Some(link) = self.link.as_mut() {
            link.inbound.discard(central.identifier());
            link.outbound.fail_tasks_for(central.identifier());
        }
        self.process_send_queue();

        if let Some(delegate) = self.delegate.as_ref().and_then(Weak::upgrade) {
            delegate.remote_central_did_disconnect(central);
        }
    }

    fn process_send_queue(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let mut sink = CentralSink {
            characteristic: link.configuration.service_definition().characteristic(),
            transport: link.transport.as_mut(),
            connected: &self.connected,
        };
        link.outbound.process(&mut sink);
    }
}

impl Default for Peripheral {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::UnavailabilityCause;
    use crate::bluetooth::mock::{MockPeripheralTransport, PeripheralCall};
    use crate::bluetooth::peer::{AnyRemotePeer, RemotePeerDelegate};
    use parking_lot::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    impl PeripheralDelegate for Recorder {
        fn remote_central_did_connect(&self, central: &Arc<RemoteCentral>) {
            self.events.lock().push(format!("connect {}", central.identifier()));
        }

        fn remote_central_did_disconnect(&self, central: &Arc<RemoteCentral>) {
            self.events
                .lock()
                .push(format!("disconnect {}", central.identifier()));
        }
    }

    impl RemotePeerDelegate for Recorder {
        fn remote_peer_did_send_data(&self, _peer: &AnyRemotePeer, data: &[u8]) {
            self.payloads.lock().push(data.to_vec());
        }
    }

    fn configuration() -> Configuration {
        Configuration::new(Uuid::new_v4(), Uuid::new_v4()).with_local_name("Kitchen")
    }

    fn started() -> (Peripheral, MockPeripheralTransport, Configuration) {
        let transport = MockPeripheralTransport::new();
        let config = configuration();
        let mut peripheral = Peripheral::new();
        peripheral.start(config.clone(), transport.clone()).unwrap();
        (peripheral, transport, config)
    }

    #[test]
    fn test_publishes_service_when_powered_on() {
        let transport = MockPeripheralTransport::new();
        transport.set_power_state(PowerState::PoweredOff);
        let config = configuration();
        let mut peripheral = Peripheral::new();
        peripheral.start(config.clone(), transport.clone()).unwrap();
        assert_eq!(
            peripheral.state(),
            PeripheralState::Unavailable(UnavailabilityCause::PoweredOff)
        );
        assert!(transport.calls().is_empty());

        peripheral.handle_event(PeripheralEvent::PowerStateChanged(PowerState::PoweredOn));
        peripheral.handle_event(PeripheralEvent::ServiceAdded(Ok(())));
        assert_eq!(
            transport.take_calls(),
            vec![
                PeripheralCall::AddService(config.service_definition()),
                PeripheralCall::StartAdvertising(
                    Some("Kitchen".to_string()),
                    vec![config.service_uuid]
                ),
            ]
        );

        peripheral.handle_event(PeripheralEvent::PowerStateChanged(PowerState::PoweredOn));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_subscribe_send_and_unsubscribe() {
        let (mut peripheral, transport, config) = started();
        let recorder = Arc::new(Recorder::default());
        peripheral.set_delegate(&recorder);

        let handle = CentralHandle(Uuid::new_v4());
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: handle,
            maximum_update_length: 4,
        });
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: handle,
            maximum_update_length: 4,
        });
        let centrals = peripheral.connected_remote_centrals();
        assert_eq!(centrals.len(), 1);

        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();
        peripheral.send_data(b"abcdefghij".to_vec(), &centrals[0], move |_, _, result| {
            *sink.lock() = Some(result)
        });
        assert_eq!(outcome.lock().take(), Some(Ok(())));
        assert_eq!(
            transport.updates_for(handle),
            vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec(), b"EOD".to_vec()]
        );
        assert!(transport.calls().iter().all(|call| match call {
            PeripheralCall::UpdateValue(characteristic, _, _) => {
                characteristic.uuid == config.characteristic_uuid
            }
            _ => true,
        }));

        peripheral.handle_event(PeripheralEvent::Unsubscribed(handle));
        assert!(peripheral.connected_remote_centrals().is_empty());
        assert_eq!(
            recorder.events.lock().as_slice(),
            &[
                format!("connect {}", handle.0),
                format!("disconnect {}", handle.0)
            ]
        );
    }

    #[test]
    fn test_send_resumes_when_ready() {
        let (mut peripheral, transport, _config) = started();
        let handle = CentralHandle(Uuid::new_v4());
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: handle,
            maximum_update_length: 2,
        });
        let central = peripheral.connected_remote_centrals().remove(0);

        transport.set_update_budget(Some(1));
        let outcome = Arc::new(Mutex::new(None));
        let sink = outcome.clone();
        peripheral.send_data(b"abcd".to_vec(), &central, move |_, _, result| {
            *sink.lock() = Some(result)
        });
        assert_eq!(transport.updates_for(handle), vec![b"ab".to_vec()]);
        assert!(outcome.lock().is_none());

        transport.set_update_budget(None);
        peripheral.handle_event(PeripheralEvent::ReadyToUpdateSubscribers);
        assert_eq!(outcome.lock().take(), Some(Ok(())));
        assert_eq!(
            transport.updates_for(handle),
            vec![b"ab".to_vec(), b"cd".to_vec(), b"EOD".to_vec()]
        );
    }

    #[test]
    fn test_reassembles_writes() {
        let (mut peripheral, _transport, _config) = started();
        let recorder = Arc::new(Recorder::default());
        let handle = CentralHandle(Uuid::new_v4());
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: handle,
            maximum_update_length: 20,
        });
        peripheral.connected_remote_centrals()[0].set_delegate(&recorder);

        for chunk in [b"hel".to_vec(), b"lo".to_vec(), b"EOD".to_vec()] {
            peripheral.handle_event(PeripheralEvent::WriteReceived {
                central: handle,
                value: chunk,
            });
        }
        peripheral.handle_event(PeripheralEvent::WriteReceived {
            central: CentralHandle(Uuid::new_v4()),
            value: b"EOD".to_vec(),
        });
        assert_eq!(recorder.payloads.lock().as_slice(), &[b"hello".to_vec()]);
    }

    #[test]
    fn test_power_off_drops_centrals_before_notifying() {
        struct Observer {
            peripheral_centrals: Arc<Mutex<Vec<String>>>,
        }

        impl AvailabilityObserver for Observer {
            fn availability_did_change(&self, _role: Role, availability: Availability) {
                self.peripheral_centrals
                    .lock()
                    .push(format!("{:?}", availability));
            }

            fn unavailability_cause_did_change(&self, _role: Role, cause: UnavailabilityCause) {
                self.peripheral_centrals.lock().push(format!("{:?}", cause));
            }
        }

        impl PeripheralDelegate for Observer {
            fn remote_central_did_connect(&self, _central: &Arc<RemoteCentral>) {}

            fn remote_central_did_disconnect(&self, _central: &Arc<RemoteCentral>) {
                self.peripheral_centrals.lock().push("disconnect".to_string());
            }
        }

        let (mut peripheral, _transport, _config) = started();
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(Observer {
            peripheral_centrals: log.clone(),
        });
        peripheral.add_availability_observer(&observer);
        peripheral.set_delegate(&observer);
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: CentralHandle(Uuid::new_v4()),
            maximum_update_length: 20,
        });

        peripheral.handle_event(PeripheralEvent::PowerStateChanged(PowerState::PoweredOff));
        peripheral.handle_event(PeripheralEvent::PowerStateChanged(PowerState::Unauthorized));
        assert_eq!(
            log.lock().as_slice(),
            &["disconnect", "Unavailable(PoweredOff)", "Unauthorized"]
        );
        assert!(peripheral.connected_remote_centrals().is_empty());
    }

    #[test]
    fn test_stop_withdraws_service() {
        let (mut peripheral, transport, _config) = started();
        peripheral.handle_event(PeripheralEvent::ServiceAdded(Ok(())));
        transport.take_calls();

        peripheral.stop().unwrap();
        assert_eq!(
            transport.calls(),
            vec![PeripheralCall::StopAdvertising, PeripheralCall::RemoveAllServices]
        );
        assert_eq!(peripheral.state(), PeripheralState::Initialized);
        assert!(peripheral.configuration().is_none());
        assert!(peripheral.stop().is_err());
    }

    #[test]
    fn test_subscription_ignored_unless_available() {
        let (mut peripheral, _transport, config) = started();
        let recorder = Arc::new(Recorder::default());
        peripheral.set_delegate(&recorder);
        peripheral.stop().unwrap();

        let late = CentralHandle(Uuid::new_v4());
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: late,
            maximum_update_length: 20,
        });
        assert!(peripheral.connected_remote_centrals().is_empty());

        let transport = MockPeripheralTransport::new();
        transport.set_power_state(PowerState::PoweredOff);
        peripheral.start(config, transport).unwrap();
        peripheral.handle_event(PeripheralEvent::Subscribed {
            central: late,
            maximum_update_length: 20,
        });
        assert!(peripheral.connected_remote_centrals().is_empty());
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_start_rejects_empty_end_of_data_mark() {
        let mut peripheral = Peripheral::new();
        let config = configuration().with_end_of_data_mark(Vec::new());

        assert!(matches!(
            peripheral.start(config, MockPeripheralTransport::new()),
            Err(Error::InvalidConfiguration(_))
        ));
        assert_eq!(peripheral.state(), PeripheralState::Initialized);
        assert!(peripheral.configuration().is_none());
    }
}
