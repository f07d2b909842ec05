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

//! Bluetooth communication module.
//!
//! Transport boundary, remote peers, scanning, connection management and
//! the chunked transfer protocol shared by both roles.

pub mod ble_constants;
pub(crate) mod continuous;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod peer;
pub(crate) mod pool;
pub mod reassembler;
pub(crate) mod scanner;
pub(crate) mod transfer;
pub mod transport;

pub use continuous::{ContinuousScanState, ScanChangeHandler, ScanErrorHandler, ScanStateHandler};
pub use peer::{
    AnyRemotePeer, PeerIdentity, RemoteCentral, RemotePeer, RemotePeerDelegate, RemotePeripheral,
    RemotePeripheralDelegate, RemotePeripheralState,
};
pub use pool::ConnectCompletion;
pub use reassembler::Reassembler;
pub use scanner::{DiscoveriesChange, Discovery, ScanCompletion, ScanProgressHandler};
pub use transfer::SendCompletion;
pub use transport::{
    AdvertisementData, AdvertisementValue, CentralEvent, CentralHandle, CentralTransport,
    Characteristic, PeerHandle, PeripheralEvent, PeripheralTransport, PowerState, Scheduler,
    ServiceDefinition, TimerId,
};
