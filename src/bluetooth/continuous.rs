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

//! Continuous scanning.
//!
//! A session repeats scan passes separated by a delay and keeps the set of
//! peripherals seen in the latest pass. New peripherals are reported as
//! soon as they show up; peripherals missing from a finished pass are
//! reported as removed.

use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use super::scanner::{DiscoveriesChange, Discovery, ScanCompletion, ScanProgressHandler, Scanner};
use super::transport::{CentralTransport, Scheduler, TimerId};
use crate::error::{Error, Result, TransportError};

/// Phase of a continuous scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContinuousScanState {
    Stopped,
    Scanning,
    Waiting,
}

/// Receives `(changes, maintained discoveries)`; never called with no changes.
pub type ScanChangeHandler = Box<dyn FnMut(&[DiscoveriesChange], &[Discovery]) + Send>;

/// Receives every phase change of a session.
pub type ScanStateHandler = Box<dyn FnMut(ContinuousScanState) + Send>;

/// Receives the error that ended a session.
pub type ScanErrorHandler = Box<dyn FnOnce(Error) + Send>;

/// Parameters of a continuous scan session.
pub(crate) struct ContinuousScanRequest {
    pub(crate) services: Vec<Uuid>,
    pub(crate) duration: Duration,
    pub(crate) in_between_delay: Duration,
    pub(crate) on_change: ScanChangeHandler,
    pub(crate) on_state: Option<ScanStateHandler>,
    pub(crate) on_error: Option<ScanErrorHandler>,
}

struct Session {
    request: ContinuousScanRequest,
    maintained: Vec<Discovery>,
    delay_timer: Option<TimerId>,
}

/// Owns the scanner and the optional continuous session running on it.
pub(crate) struct ContinuousScanner {
    scanner: Scanner,
    state: ContinuousScanState,
    session: Option<Session>,
}

impl ContinuousScanner {
    pub(crate) fn new() -> Self {
        Self {
            scanner: Scanner::default(),
            state: ContinuousScanState::Stopped,
            session: None,
        }
    }

    pub(crate) fn state(&self) -> ContinuousScanState {
        self.state
    }

    /// A single pass or a session is running.
    pub(crate) fn is_busy(&self) -> bool {
        self.session.is_some() || self.scanner.is_scanning()
    }

    /// Run a single pass.
    pub(crate) fn scan(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        services: Vec<Uuid>,
        duration: Duration,
        progress: ScanProgressHandler,
        completion: ScanCompletion,
    ) {
        if self.session.is_some() {
            return completion(Err(Error::Busy));
        }
        self.scanner
            .scan(transport, scheduler, services, duration, progress, completion);
    }

    /// Start a session. Fails with `Busy` through the request's error handler
    /// while anything else is scanning.
    pub(crate) fn scan_continuously(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        request: ContinuousScanRequest,
    ) {
        if self.is_busy() {
            if let Some(on_error) = request.on_error {
                on_error(Error::Busy);
            }
            return;
        }

        info!(
            "Starting continuous scan ({:?} passes, {:?} apart)",
            request.duration, request.in_between_delay
        );
        self.session = Some(Session {
            request,
            maintained: Vec::new(),
            delay_timer: None,
        });
        self.start_pass(transport, scheduler);
    }

    fn start_pass(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
    ) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let services = session.request.services.clone();
        let duration = session.request.duration;

        self.set_state(ContinuousScanState::Scanning);
        if let Err(error) = self
            .scanner
            .scan_for_session(transport, scheduler, services, duration)
        {
            self.end_session(scheduler, Some(error));
        }
    }

    fn set_state(&mut self, state: ContinuousScanState) {
        self.state = state;
        if let Some(on_state) = self
            .session
            .as_mut()
            .and_then(|session| session.request.on_state.as_mut())
        {
            on_state(state);
        }
    }

    pub(crate) fn did_discover(&mut self, discovery: Discovery) {
        let Some(new) = self.scanner.did_discover(discovery) else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.maintained.contains(&new) {
            return;
        }

        session.maintained.push(new.clone());
        let changes = [DiscoveriesChange::Insert(new)];
        (session.request.on_change)(&changes[..], session.maintained.as_slice());
    }

    /// Handle a pass or delay timer. Returns `false` for foreign timers.
    pub(crate) fn timer_elapsed(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        timer: TimerId,
    ) -> bool {
        if self.scanner.owns_timer(timer) {
            if let Some(outcome) = self.scanner.finish(transport, scheduler, None) {
                self.pass_finished(scheduler, outcome);
            }
            return true;
        }

        match self.session.as_mut() {
            Some(session) if session.delay_timer == Some(timer) => {
                session.delay_timer = None;
                self.start_pass(transport, scheduler);
                true
            }
            _ => false,
        }
    }

    fn pass_finished(&mut self, scheduler: &mut dyn Scheduler, outcome: Result<Vec<Discovery>>) {
        let found = match outcome {
            Ok(found) => found,
            Err(error) => return self.end_session(scheduler, Some(error)),
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let removed: Vec<DiscoveriesChange> = session
            .maintained
            .iter()
            .filter(|discovery| !found.contains(discovery))
            .cloned()
            .map(DiscoveriesChange::Remove)
            .collect();
        session.maintained.retain(|discovery| found.contains(discovery));
        if !removed.is_empty() {
            (session.request.on_change)(removed.as_slice(), session.maintained.as_slice());
        }

        session.delay_timer = Some(scheduler.schedule(session.request.in_between_delay));
        self.set_state(ContinuousScanState::Waiting);
    }

    /// Stop whatever is scanning, completing it with `Interrupted`.
    pub(crate) fn interrupt(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
    ) {
        // a session pass ends together with its session below
        let _ = self
            .scanner
            .finish(transport, scheduler, Some(Error::Interrupted));
        self.end_session(scheduler, Some(Error::Interrupted));
    }

    /// The transport failed to scan.
    pub(crate) fn scan_failed(
        &mut self,
        transport: Option<&mut (dyn CentralTransport + 'static)>,
        scheduler: &mut dyn Scheduler,
        error: TransportError,
    ) {
        if let Some(Err(error)) = self
            .scanner
            .finish(transport, scheduler, Some(Error::Transport(error)))
        {
            self.end_session(scheduler, Some(error));
        }
    }

    fn end_session(&mut self, scheduler: &mut dyn Scheduler, error: Option<Error>) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Some(timer) = session.delay_timer.take() {
            scheduler.cancel(timer);
        }

        info!("Continuous scan stopped");
        self.state = ContinuousScanState::Stopped;
        if let Some(on_state) = session.request.on_state.as_mut() {
            on_state(ContinuousScanState::Stopped);
        }
        if let (Some(error), Some(on_error)) = (error, session.request.on_error.take()) {
            on_error(error);
        }
    }
}
