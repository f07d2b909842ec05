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

//! bleconduit - byte payloads of any length over a single BLE characteristic.
//!
//! An application runs either a [`Central`], which scans for and connects
//! to peripherals, or a [`Peripheral`], which advertises a data service and
//! serves subscribed centrals. Payloads are cut into chunks no larger than
//! the link allows and terminated by an end-of-data marker.
//!
//! The facades do no I/O themselves. The platform stack sits behind
//! [`CentralTransport`] / [`PeripheralTransport`] and reports back through
//! `handle_event`; timers go through a [`Scheduler`]. [`events::spawn`]
//! runs a facade on a tokio task with a tokio-backed scheduler.

pub mod availability;
pub mod bluetooth;
pub mod central;
pub mod config;
pub mod error;
pub mod events;
pub mod peripheral;
pub mod state;

pub use availability::{Availability, AvailabilityObserver, Role, UnavailabilityCause};
pub use bluetooth::{
    AnyRemotePeer, CentralEvent, CentralTransport, DiscoveriesChange, Discovery,
    PeripheralEvent, PeripheralTransport, PowerState, RemoteCentral, RemotePeer,
    RemotePeerDelegate, RemotePeripheral, RemotePeripheralDelegate, Scheduler, TimerId,
};
pub use central::{Central, CentralDelegate};
pub use config::Configuration;
pub use error::{Error, Result, TransportError};
pub use events::{EventLoopHandle, Reactor, TokioScheduler};
pub use peripheral::{Peripheral, PeripheralDelegate};
pub use state::{CentralState, PeripheralState, TransitionError};
