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

//! Remote peers as seen from either role.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use super::ble_constants::config::DEFAULT_MAXIMUM_PAYLOAD_LENGTH;
use super::transport::{CentralHandle, Characteristic, PeerHandle};

/// Receives complete payloads sent by a remote peer.
pub trait RemotePeerDelegate: Send + Sync {
    fn remote_peer_did_send_data(&self, peer: &AnyRemotePeer, data: &[u8]);
}

/// Identity and data delegate slot shared by both peer kinds.
pub struct PeerIdentity {
    identifier: Uuid,
    delegate: Mutex<Option<Weak<dyn RemotePeerDelegate>>>,
}

impl PeerIdentity {
    fn new(identifier: Uuid) -> Self {
        Self {
            identifier,
            delegate: Mutex::new(None),
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    fn set_delegate<D: RemotePeerDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak: Weak<dyn RemotePeerDelegate> = Arc::<D>::downgrade(delegate);
        *self.delegate.lock() = Some(weak);
    }

    fn delegate(&self) -> Option<Arc<dyn RemotePeerDelegate>> {
        self.delegate.lock().as_ref().and_then(Weak::upgrade)
    }
}

/// Behavior common to remote peripherals and remote centrals.
pub trait RemotePeer: Send + Sync + 'static {
    fn identity(&self) -> &PeerIdentity;

    /// Wrap a shared peer for delegate callbacks.
    fn to_any(self: &Arc<Self>) -> AnyRemotePeer;

    fn identifier(&self) -> Uuid {
        self.identity().identifier()
    }
}

/// Either kind of remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AnyRemotePeer {
    Peripheral(Arc<RemotePeripheral>),
    Central(Arc<RemoteCentral>),
}

impl AnyRemotePeer {
    pub fn identifier(&self) -> Uuid {
        match self {
            AnyRemotePeer::Peripheral(peripheral) => peripheral.identifier(),
            AnyRemotePeer::Central(central) => central.identifier(),
        }
    }

    fn identity(&self) -> &PeerIdentity {
        match self {
            AnyRemotePeer::Peripheral(peripheral) => peripheral.identity(),
            AnyRemotePeer::Central(central) => central.identity(),
        }
    }
}

/// Hand a reassembled payload to the peer's data delegate, if it is alive.
pub(crate) fn deliver_data<P: RemotePeer>(peer: &Arc<P>, data: &[u8]) -> bool {
    let peer = peer.to_any();
    match peer.identity().delegate() {
        Some(delegate) => {
            delegate.remote_peer_did_send_data(&peer, data);
            true
        }
        None => false,
    }
}

/// Connection state of a remote peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemotePeripheralState {
    /// Known by identifier only, no transport handle yet.
    Shallow,
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Peripheral-level events besides received data.
pub trait RemotePeripheralDelegate: Send + Sync {
    fn remote_peripheral_did_update_name(&self, _peripheral: &Arc<RemotePeripheral>, _name: &str) {
    }

    /// Notifications on the data characteristic are enabled.
    fn remote_peripheral_is_ready(&self, _peripheral: &Arc<RemotePeripheral>) {}
}

struct PeripheralLink {
    handle: Option<PeerHandle>,
    characteristic: Option<Characteristic>,
    state: RemotePeripheralState,
    name: Option<String>,
}

/// A remote peripheral seen by a central.
pub struct RemotePeripheral {
    identity: PeerIdentity,
    link: Mutex<PeripheralLink>,
    peripheral_delegate: Mutex<Option<Weak<dyn RemotePeripheralDelegate>>>,
}

impl RemotePeripheral {
    /// Create a shallow peripheral known only by its identifier.
    pub fn new(identifier: Uuid) -> Self {
        Self {
            identity: PeerIdentity::new(identifier),
            link: Mutex::new(PeripheralLink {
                handle: None,
                characteristic: None,
                state: RemotePeripheralState::Disconnected,
                name: None,
            }),
            peripheral_delegate: Mutex::new(None),
        }
    }

    /// Create a peripheral backed by a transport handle.
    pub fn with_handle(handle: PeerHandle) -> Self {
        let peripheral = Self::new(handle.0);
        peripheral.link.lock().handle = Some(handle);
        peripheral
    }

    pub fn identifier(&self) -> Uuid {
        self.identity.identifier
    }

    pub fn state(&self) -> RemotePeripheralState {
        let link = self.link.lock();
        match link.handle {
            Some(_) => link.state,
            None => RemotePeripheralState::Shallow,
        }
    }

    pub fn handle(&self) -> Option<PeerHandle> {
        self.link.lock().handle
    }

    /// Last advertised name.
    pub fn name(&self) -> Option<String> {
        self.link.lock().name.clone()
    }

    /// Data characteristic, once discovered.
    pub fn data_characteristic(&self) -> Option<Characteristic> {
        self.link.lock().characteristic
    }

    pub fn set_delegate<D: RemotePeerDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.identity.set_delegate(delegate);
    }

    pub fn set_peripheral_delegate<D: RemotePeripheralDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak: Weak<dyn RemotePeripheralDelegate> = Arc::<D>::downgrade(delegate);
        *self.peripheral_delegate.lock() = Some(weak);
    }

    pub(crate) fn peripheral_delegate(&self) -> Option<Arc<dyn RemotePeripheralDelegate>> {
        self.peripheral_delegate
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn attach_handle(&self, handle: PeerHandle) {
        self.link.lock().handle = Some(handle);
    }

    pub(crate) fn set_state(&self, state: RemotePeripheralState) {
        self.link.lock().state = state;
    }

    pub(crate) fn set_name(&self, name: Option<String>) {
        self.link.lock().name = name;
    }

    pub(crate) fn set_data_characteristic(&self, characteristic: Option<Characteristic>) {
        self.link.lock().characteristic = characteristic;
    }
}

impl RemotePeer for RemotePeripheral {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    fn to_any(self: &Arc<Self>) -> AnyRemotePeer {
        AnyRemotePeer::Peripheral(Arc::clone(self))
    }
}

impl fmt::Debug for RemotePeripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePeripheral")
            .field("identifier", &self.identity.identifier)
            .field("state", &self.state())
            .field("name", &self.name())
            .finish()
    }
}

impl PartialEq for RemotePeripheral {
    fn eq(&self, other: &Self) -> bool {
        self.identity.identifier == other.identity.identifier
    }
}

impl Eq for RemotePeripheral {}

impl Hash for RemotePeripheral {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.identifier.hash(state);
    }
}

/// A remote central subscribed to a peripheral.
pub struct RemoteCentral {
    identity: PeerIdentity,
    handle: CentralHandle,
    maximum_update_length: usize,
}

impl RemoteCentral {
    /// Create a new remote central for a subscriber.
    pub fn new(handle: CentralHandle, maximum_update_length: usize) -> Self {
        let maximum_update_length = if maximum_update_length == 0 {
            DEFAULT_MAXIMUM_PAYLOAD_LENGTH
        } else {
            maximum_update_length
        };
        Self {
            identity: PeerIdentity::new(handle.0),
            handle,
            maximum_update_length,
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.identity.identifier
    }

    pub fn handle(&self) -> CentralHandle {
        self.handle
    }

    pub fn maximum_update_length(&self) -> usize {
        self.maximum_update_length
    }

    pub fn set_delegate<D: RemotePeerDelegate + 'static>(&self, delegate: &Arc<D>) {
        self.identity.set_delegate(delegate);
    }
}

impl RemotePeer for RemoteCentral {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    fn to_any(self: &Arc<Self>) -> AnyRemotePeer {
        AnyRemotePeer::Central(Arc::clone(self))
    }
}

impl fmt::Debug for RemoteCentral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCentral")
            .field("identifier", &self.identity.identifier)
            .field("maximum_update_length", &self.maximum_update_length)
            .finish()
    }
}

impl PartialEq for RemoteCentral {
    fn eq(&self, other: &Self) -> bool {
        self.identity.identifier == other.identity.identifier
    }
}

impl Eq for RemoteCentral {}

impl Hash for RemoteCentral {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.identifier.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Inbox {
        received: Mutex<Vec<(Uuid, Vec<u8>)>>,
    }

    impl RemotePeerDelegate for Inbox {
        fn remote_peer_did_send_data(&self, peer: &AnyRemotePeer, data: &[u8]) {
            self.received.lock().push((peer.identifier(), data.to_vec()));
        }
    }

    #[test]
    fn test_shallow_until_handle_attached() {
        let id = Uuid::new_v4();
        let peripheral = RemotePeripheral::new(id);
        assert_eq!(peripheral.state(), RemotePeripheralState::Shallow);

        peripheral.attach_handle(PeerHandle(id));
        assert_eq!(peripheral.state(), RemotePeripheralState::Disconnected);

        peripheral.set_state(RemotePeripheralState::Connecting);
        assert_eq!(peripheral.state(), RemotePeripheralState::Connecting);
    }

    #[test]
    fn test_equality_by_identifier() {
        let id = Uuid::new_v4();
        let a = RemotePeripheral::with_handle(PeerHandle(id));
        let b = RemotePeripheral::new(id);
        b.set_name(Some("other".to_string()));
        assert_eq!(a, b);
        assert_ne!(a, RemotePeripheral::new(Uuid::new_v4()));
    }

    #[test]
    fn test_deliver_data_to_live_delegate() {
        let central = Arc::new(RemoteCentral::new(CentralHandle(Uuid::new_v4()), 0));
        assert_eq!(central.maximum_update_length(), DEFAULT_MAXIMUM_PAYLOAD_LENGTH);
        assert!(!deliver_data(&central, b"dropped"));

        let inbox = Arc::new(Inbox::default());
        central.set_delegate(&inbox);
        assert!(deliver_data(&central, b"hello"));
        assert_eq!(
            inbox.received.lock().as_slice(),
            &[(central.identifier(), b"hello".to_vec())]
        );

        drop(inbox);
        assert!(!deliver_data(&central, b"gone"));
    }
}
