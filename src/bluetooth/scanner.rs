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

//! Timed scan passes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use super::ble_constants::advertisement;
use super::peer::RemotePeripheral;
use super::transport::{AdvertisementData, AdvertisementValue, CentralTransport, Scheduler, TimerId};
use crate::error::{Error, Result};

/// A peripheral seen while scanning.
#[derive(Debug, Clone)]
pub struct Discovery {
    advertisement_data: AdvertisementData,
    remote_peripheral: Arc<RemotePeripheral>,
    rssi: i16,
}

impl Discovery {
    pub fn new(
        advertisement_data: AdvertisementData,
        remote_peripheral: Arc<RemotePeripheral>,
        rssi: i16,
    ) -> Self {
        Self {
            advertisement_data,
            remote_peripheral,
            rssi,
        }
    }

    pub fn advertisement_data(&self) -> &AdvertisementData {
        &self.advertisement_data
    }

    pub fn remote_peripheral(&self) -> &Arc<RemotePeripheral> {
        &self.remote_peripheral
    }

    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    /// Advertised local name, if any.
    pub fn local_name(&self) -> Option<&str> {
        match self.advertisement_data.get(advertisement::LOCAL_NAME) {
            Some(AdvertisementValue::Text(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for Discovery {
    fn eq(&self, other: &Self) -> bool {
        self.remote_peripheral.identifier() == other.remote_peripheral.identifier()
    }
}

impl Eq for Discovery {}

/// A discovery appearing in or vanishing from a continuous scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveriesChange {
    Insert(Discovery),
    Remove(Discovery),
}

impl DiscoveriesChange {
    pub fn discovery(&self) -> &Discovery {
        match self {
            DiscoveriesChange::Insert(discovery) | DiscoveriesChange::Remove(discovery) => {
                discovery
            }
        }
    }
}

/// Receives each new discovery of a pass.
pub type ScanProgressHandler = Box<dyn FnMut(&[Discovery]) + Send>;

/// Receives every discovery of a pass once it ends.
pub type ScanCompletion = Box<dyn FnOnce(Result<Vec<Discovery>>) + Send>;

enum PassOwner {
    Caller {
        progress: ScanProgressHandler,
        completion: ScanCompletion,
    },
    Session,
}

struct Pass {
    timer: TimerId,
    discoveries: Vec<Discovery>,
    owner: PassOwner,
}

/// Runs one scan pass at a time.
///
/// A pass either belongs to a caller, whose handlers it invokes directly,
/// or to a continuous scan session, which receives new discoveries and the
/// pass result as return values.
#[derive(Default)]
pub(crate) struct Scanner {
    pass: Option<Pass>,
}

impl Scanner {
    pub(crate) fn is_scanning(&self) -> bool {
        self.pass.is_some()
    }

    pub(crate) fn owns_timer(&self, timer: TimerId) -> bool {
        self.pass.as_ref().map_or(false, |pass| pass.timer == timer)
    }

    fn ready<'a>(
        &self,
        transport: Option<&'a mut (dyn CentralTransport + 'static)>,
    ) -> Result<&'a mut (dyn CentralTransport + 'static)> {
        if self.pass.is_some() {
            return Err(Error::Busy);
        }
        transport.ok_or(Error::NoTransportSet)
    }

    fn start(
        &mut self,
        transport: &mut dyn CentralTransport,
        scheduler: &mut dyn Scheduler,
        services: Vec<Uuid>,
        duration: Duration,
        owner: PassOwner,
    ) {
        let timer = scheduler.schedule(duration);
        self.pass = Some(Pass {
            timer,
            discoveries: Vec::new(),
            owner,
        });
        info!("Scanning for {:?} during {:?}", services, duration);
        transport.scan_for_peripherals(Some(services));
    }

    /// Start a pass reporting to the caller's handlers.
    pub(crate) fn scan(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        services: Vec<Uuid>,
        duration: Duration,
        progress: ScanProgressHandler,
        completion: ScanCompletion,
    ) {
        match self.ready(transport) {
            Ok(transport) => self.start(
                transport,
                scheduler,
                services,
                duration,
                PassOwner::Caller {
                    progress,
                    completion,
                },
            ),
            Err(error) => completion(Err(error)),
        }
    }

    /// Start a pass on behalf of a continuous scan session.
    pub(crate) fn scan_for_session(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        services: Vec<Uuid>,
        duration: Duration,
    ) -> Result<()> {
        let transport = self.ready(transport)?;
        self.start(transport, scheduler, services, duration, PassOwner::Session);
        Ok(())
    }

    /// Record a sighting. Returns the discovery when it is new in a session pass.
    pub(crate) fn did_discover(&mut self, discovery: Discovery) -> Option<Discovery> {
        let pass = self.pass.as_mut()?;
        if pass.discoveries.contains(&discovery) {
            return None;
        }

        debug!(
            "Discovered {} (rssi {})",
            discovery.remote_peripheral().identifier(),
            discovery.rssi()
        );
        pass.discoveries.push(discovery.clone());
        match &mut pass.owner {
            PassOwner::Caller { progress, .. } => {
                progress(std::slice::from_ref(&discovery));
                None
            }
            PassOwner::Session => Some(discovery),
        }
    }

    /// End the running pass, successfully when `error` is `None`.
    ///
    /// Caller passes are completed here. For session passes the outcome is
    /// returned instead.
    pub(crate) fn finish(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        error: Option<Error>,
    ) -> Option<Result<Vec<Discovery>>> {
        let pass = self.pass.take()?;
        scheduler.cancel(pass.timer);
        if let Some(transport) = transport {
            transport.stop_scan();
        }

        let outcome = match error {
            Some(error) => {
                info!("Scan ended: {}", error);
                Err(error)
            }
            None => {
                info!("Scan finished with {} discoveries", pass.discoveries.len());
                Ok(pass.discoveries)
            }
        };
        match pass.owner {
            PassOwner::Caller { completion, .. } => {
                completion(outcome);
                None
            }
            PassOwner::Session => Some(outcome),
        }
    }
}
