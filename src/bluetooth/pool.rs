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

//! Connection attempts and live connections of a central.
//!
//! Every attempt is resolved exactly once: by the transport reporting a
//! connection or a failure, by its timeout timer, or by an interrupt.
//! Whichever comes first removes the attempt, so anything arriving later
//! finds nothing and is ignored.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::peer::{RemotePeripheral, RemotePeripheralState};
use super::transport::{CentralTransport, PeerHandle, Scheduler, TimerId};
use crate::error::{Error, Result, TransportError};

/// Invoked once per connect with the peripheral and the outcome.
pub type ConnectCompletion = Box<dyn FnOnce(Arc<RemotePeripheral>, Result<()>) + Send>;

struct ConnectionAttempt {
    peripheral: Arc<RemotePeripheral>,
    timer: TimerId,
    completion: ConnectCompletion,
}

impl ConnectionAttempt {
    fn fail(
        self,
        error: Error,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
    ) {
        scheduler.cancel(self.timer);
        if let (Some(transport), Some(handle)) = (transport, self.peripheral.handle()) {
            transport.cancel_connect(handle);
        }
        self.peripheral.set_state(RemotePeripheralState::Disconnected);
        debug!(
            "Connection attempt to {} failed: {}",
            self.peripheral.identifier(),
            error
        );
        (self.completion)(self.peripheral, Err(error));
    }
}

/// Attempts in flight and the set of connected peripherals.
#[derive(Default)]
pub(crate) struct ConnectionPool {
    attempts: Vec<ConnectionAttempt>,
    connected: Vec<Arc<RemotePeripheral>>,
}

impl ConnectionPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connected(&self) -> &[Arc<RemotePeripheral>] {
        &self.connected
    }

    pub(crate) fn is_connected(&self, identifier: Uuid) -> bool {
        self.connected.iter().any(|p| p.identifier() == identifier)
    }

    pub(crate) fn is_connecting(&self, identifier: Uuid) -> bool {
        self.attempts
            .iter()
            .any(|a| a.peripheral.identifier() == identifier)
    }

    pub(crate) fn connected_by_handle(&self, handle: PeerHandle) -> Option<&Arc<RemotePeripheral>> {
        self.connected.iter().find(|p| p.handle() == Some(handle))
    }

    pub(crate) fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Start connecting. Precondition failures complete immediately.
    pub(crate) fn connect(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        timeout: Duration,
        peripheral: Arc<RemotePeripheral>,
        completion: ConnectCompletion,
    ) {
        let Some(transport) = transport else {
            return completion(peripheral, Err(Error::NoTransportSet));
        };
        if self.is_connected(peripheral.identifier()) {
            return completion(peripheral, Err(Error::AlreadyConnected));
        }
        if self.is_connecting(peripheral.identifier()) {
            return completion(peripheral, Err(Error::AlreadyConnecting));
        }
        let Some(handle) = peripheral.handle() else {
            return completion(peripheral, Err(Error::NoHandle));
        };

        let timer = scheduler.schedule(timeout);
        info!(
            "Connecting to {} (timeout {:?})",
            peripheral.identifier(),
            timeout
        );
        peripheral.set_state(RemotePeripheralState::Connecting);
        self.attempts.push(ConnectionAttempt {
            peripheral,
            timer,
            completion,
        });
        transport.connect(handle);
    }

    fn take_attempt(&mut self, matches: impl Fn(&ConnectionAttempt) -> bool) -> Option<ConnectionAttempt> {
        let index = self.attempts.iter().position(matches)?;
        Some(self.attempts.remove(index))
    }

    /// The transport connected `handle`. Returns the peripheral when an
    /// attempt was waiting for it.
    pub(crate) fn did_connect(
        &mut self,
        transport: &mut dyn CentralTransport,
        scheduler: &mut dyn Scheduler,
        services: Vec<Uuid>,
        handle: PeerHandle,
    ) -> Option<Arc<RemotePeripheral>> {
        let Some(attempt) = self.take_attempt(|a| a.peripheral.handle() == Some(handle)) else {
            debug!("Ignoring connection to {:?} without an attempt", handle);
            return None;
        };

        scheduler.cancel(attempt.timer);
        let peripheral = attempt.peripheral;
        peripheral.set_state(RemotePeripheralState::Connected);
        self.connected.push(peripheral.clone());
        info!("Connected to {}", peripheral.identifier());

        transport.discover_services(handle, services);
        (attempt.completion)(peripheral.clone(), Ok(()));
        Some(peripheral)
    }

    /// The transport could not connect `handle`.
    pub(crate) fn did_fail_to_connect(
        &mut self,
        scheduler: &mut dyn Scheduler,
        handle: PeerHandle,
        error: TransportError,
    ) {
        let Some(attempt) = self.take_attempt(|a| a.peripheral.handle() == Some(handle)) else {
            debug!("Ignoring connection failure for {:?} without an attempt", handle);
            return;
        };

        warn!(
            "Failed to connect to {}: {}",
            attempt.peripheral.identifier(),
            error
        );
        scheduler.cancel(attempt.timer);
        attempt.peripheral.set_state(RemotePeripheralState::Disconnected);
        (attempt.completion)(attempt.peripheral, Err(Error::Transport(error)));
    }

    /// Resolve the attempt owning `timer` with `TimeoutElapsed`.
    /// Returns `false` when the timer belongs to no attempt.
    pub(crate) fn timer_elapsed(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        timer: TimerId,
    ) -> bool {
        match self.take_attempt(|a| a.timer == timer) {
            Some(attempt) => {
                info!("Connection to {} timed out", attempt.peripheral.identifier());
                attempt.fail(Error::TimeoutElapsed, transport, scheduler);
                true
            }
            None => false,
        }
    }

    /// Abort a pending connection attempt.
    pub(crate) fn interrupt_attempt(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        peripheral: &RemotePeripheral,
    ) -> Result<()> {
        let attempt = self
            .take_attempt(|a| a.peripheral.identifier() == peripheral.identifier())
            .ok_or(Error::NoAttemptForPeer)?;
        attempt.fail(Error::Interrupted, transport, scheduler);
        Ok(())
    }

    /// Ask the transport to disconnect a connected peripheral. The
    /// peripheral leaves the pool once the transport reports the disconnect.
    pub(crate) fn disconnect(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        peripheral: &RemotePeripheral,
    ) -> Result<()> {
        let connected = self
            .connected
            .iter()
            .find(|p| p.identifier() == peripheral.identifier())
            .ok_or(Error::NoConnectionForPeer)?;
        let transport = transport.ok_or(Error::NoTransportSet)?;
        let handle = connected.handle().ok_or(Error::NoHandle)?;

        if let Some(characteristic) = connected.data_characteristic() {
            transport.set_notify(handle, characteristic, false);
        }
        connected.set_state(RemotePeripheralState::Disconnecting);
        info!("Disconnecting from {}", connected.identifier());
        transport.disconnect(handle);
        Ok(())
    }

    /// The transport reports `handle` disconnected.
    pub(crate) fn did_disconnect(&mut self, handle: PeerHandle) -> Option<Arc<RemotePeripheral>> {
        let index = self
            .connected
            .iter()
            .position(|p| p.handle() == Some(handle))?;
        let peripheral = self.connected.remove(index);
        peripheral.set_state(RemotePeripheralState::Disconnected);
        peripheral.set_data_characteristic(None);
        info!("Disconnected from {}", peripheral.identifier());
        Some(peripheral)
    }

    /// Interrupt every attempt, then hand back every connected peripheral
    /// as disconnected.
    pub(crate) fn reset(
        &mut self,
        mut transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
    ) -> Vec<Arc<RemotePeripheral>> {
        for attempt in std::mem::take(&mut self.attempts) {
            attempt.fail(Error::Interrupted, transport.as_deref_mut(), scheduler);
        }

        let disconnected = std::mem::take(&mut self.connected);
        for peripheral in &disconnected {
            peripheral.set_state(RemotePeripheralState::Disconnected);
            peripheral.set_data_characteristic(None);
        }
        if !disconnected.is_empty() {
            info!("Dropped {} connections", disconnected.len());
        }
        disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::{CentralCall, ManualScheduler, MockCentralTransport};
    use parking_lot::Mutex;

    type Outcomes = Arc<Mutex<Vec<Result<()>>>>;

    fn record(outcomes: &Outcomes) -> ConnectCompletion {
        let outcomes = outcomes.clone();
        Box::new(move |_, result| outcomes.lock().push(result))
    }

    fn peripheral() -> Arc<RemotePeripheral> {
        Arc::new(RemotePeripheral::with_handle(PeerHandle(Uuid::new_v4())))
    }

    struct Fixture {
        pool: ConnectionPool,
        transport: MockCentralTransport,
        scheduler: ManualScheduler,
        outcomes: Outcomes,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                pool: ConnectionPool::new(),
                transport: MockCentralTransport::new(),
                scheduler: ManualScheduler::new(),
                outcomes: Outcomes::default(),
            }
        }

        fn connect(&mut self, peripheral: &Arc<RemotePeripheral>) {
            let completion = record(&self.outcomes);
            self.pool.connect(
                Some(&mut self.transport),
                &mut self.scheduler,
                Duration::from_secs(3),
                peripheral.clone(),
                completion,
            );
        }

        fn elapse(&mut self, by: Duration) {
            for timer in self.scheduler.advance(by) {
                self.pool
                    .timer_elapsed(Some(&mut self.transport), &mut self.scheduler, timer);
            }
        }
    }

    #[test]
    fn test_connect_success() {
        let mut fixture = Fixture::new();
        let target = peripheral();
        let handle = target.handle().unwrap();
        let service = Uuid::new_v4();

        fixture.connect(&target);
        assert_eq!(target.state(), RemotePeripheralState::Connecting);
        assert_eq!(fixture.transport.calls(), vec![CentralCall::Connect(handle)]);

        let connected = fixture.pool.did_connect(
            &mut fixture.transport,
            &mut fixture.scheduler,
            vec![service],
            handle,
        );
        assert_eq!(connected.as_ref(), Some(&target));
        assert_eq!(target.state(), RemotePeripheralState::Connected);
        assert!(fixture.pool.is_connected(target.identifier()));
        assert_eq!(fixture.pool.attempt_count(), 0);
        assert!(fixture.scheduler.pending().is_empty());
        assert_eq!(
            fixture.transport.calls().last(),
            Some(&CentralCall::DiscoverServices(handle, vec![service]))
        );
        assert_eq!(fixture.outcomes.lock().as_slice(), &[Ok(())]);
    }

    #[test]
    fn test_preconditions() {
        let mut fixture = Fixture::new();
        let target = peripheral();

        fixture.pool.connect(
            None,
            &mut fixture.scheduler,
            Duration::from_secs(1),
            target.clone(),
            record(&fixture.outcomes),
        );

        fixture.connect(&target);
        fixture.connect(&target);

        let shallow = Arc::new(RemotePeripheral::new(Uuid::new_v4()));
        fixture.connect(&shallow);

        fixture.pool.did_connect(
            &mut fixture.transport,
            &mut fixture.scheduler,
            vec![],
            target.handle().unwrap(),
        );
        fixture.connect(&target);

        assert_eq!(
            fixture.outcomes.lock().as_slice(),
            &[
                Err(Error::NoTransportSet),
                Err(Error::AlreadyConnecting),
                Err(Error::NoHandle),
                Ok(()),
                Err(Error::AlreadyConnected),
            ]
        );
    }

    #[test]
    fn test_timeout_fires_exactly_once() {
        let mut fixture = Fixture::new();
        let target = peripheral();
        let handle = target.handle().unwrap();

        fixture.connect(&target);
        fixture.elapse(Duration::from_secs(2));
        assert!(fixture.outcomes.lock().is_empty());

        fixture.elapse(Duration::from_secs(1));
        assert_eq!(
            fixture.outcomes.lock().as_slice(),
            &[Err(Error::TimeoutElapsed)]
        );
        assert!(fixture
            .transport
            .calls()
            .contains(&CentralCall::CancelConnect(handle)));
        assert_eq!(target.state(), RemotePeripheralState::Disconnected);

        // a late connect for the timed out attempt is ignored
        let late = fixture.pool.did_connect(
            &mut fixture.transport,
            &mut fixture.scheduler,
            vec![],
            handle,
        );
        assert!(late.is_none());
        fixture.pool.did_fail_to_connect(
            &mut fixture.scheduler,
            handle,
            TransportError::new("late"),
        );
        assert_eq!(fixture.outcomes.lock().len(), 1);
        assert!(!fixture.pool.is_connected(target.identifier()));
    }

    #[test]
    fn test_failure_cancels_timer() {
        let mut fixture = Fixture::new();
        let target = peripheral();

        fixture.connect(&target);
        fixture.pool.did_fail_to_connect(
            &mut fixture.scheduler,
            target.handle().unwrap(),
            TransportError::new("refused"),
        );
        assert!(fixture.scheduler.pending().is_empty());

        fixture.elapse(Duration::from_secs(10));
        assert_eq!(
            fixture.outcomes.lock().as_slice(),
            &[Err(Error::Transport(TransportError::new("refused")))]
        );
    }

    #[test]
    fn test_interrupt_attempt() {
        let mut fixture = Fixture::new();
        let target = peripheral();

        assert_eq!(
            fixture
                .pool
                .interrupt_attempt(Some(&mut fixture.transport), &mut fixture.scheduler, &target),
            Err(Error::NoAttemptForPeer)
        );

        fixture.connect(&target);
        fixture
            .pool
            .interrupt_attempt(Some(&mut fixture.transport), &mut fixture.scheduler, &target)
            .unwrap();
        assert_eq!(fixture.outcomes.lock().as_slice(), &[Err(Error::Interrupted)]);
        assert!(fixture.scheduler.pending().is_empty());
    }

    #[test]
    fn test_disconnect_and_reset() {
        let mut fixture = Fixture::new();
        let connected = peripheral();
        let pending = peripheral();

        assert_eq!(
            fixture.pool.disconnect(Some(&mut fixture.transport), &connected),
            Err(Error::NoConnectionForPeer)
        );

        fixture.connect(&connected);
        fixture.pool.did_connect(
            &mut fixture.transport,
            &mut fixture.scheduler,
            vec![],
            connected.handle().unwrap(),
        );
        fixture.connect(&pending);

        fixture
            .pool
            .disconnect(Some(&mut fixture.transport), &connected)
            .unwrap();
        assert_eq!(connected.state(), RemotePeripheralState::Disconnecting);
        assert!(fixture.pool.is_connected(connected.identifier()));

        let dropped = fixture
            .pool
            .reset(Some(&mut fixture.transport), &mut fixture.scheduler);
        assert_eq!(dropped, vec![connected.clone()]);
        assert_eq!(connected.state(), RemotePeripheralState::Disconnected);
        assert_eq!(pending.state(), RemotePeripheralState::Disconnected);
        assert!(fixture.pool.connected().is_empty());
        assert_eq!(fixture.pool.attempt_count(), 0);
        assert_eq!(
            fixture.outcomes.lock().as_slice(),
            &[Ok(()), Err(Error::Interrupted)]
        );
    }

    #[test]
    fn test_transport_disconnect() {
        let mut fixture = Fixture::new();
        let target = peripheral();
        let handle = target.handle().unwrap();

        fixture.connect(&target);
        fixture
            .pool
            .did_connect(&mut fixture.transport, &mut fixture.scheduler, vec![], handle);

        assert_eq!(fixture.pool.did_disconnect(handle), Some(target.clone()));
        assert_eq!(fixture.pool.did_disconnect(handle), None);
        assert!(fixture.pool.connected_by_handle(handle).is_none());
    }
}
