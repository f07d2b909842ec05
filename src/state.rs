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

//! Central and peripheral state machines.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::availability::{Availability, UnavailabilityCause};

const ANY_UNAVAILABLE: UnavailabilityCause = UnavailabilityCause::Any;

/// An event was fed to a state machine in a state that does not accept it.
///
/// `valid` lists the states the event is accepted in; `Unavailable(Any)`
/// stands for every unavailable cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {current:?}, expected one of {valid:?}")]
pub struct TransitionError<S: fmt::Debug> {
    pub current: S,
    pub valid: Vec<S>,
}

/// Central state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralState {
    Initialized,
    Starting,
    Unavailable(UnavailabilityCause),
    Available,
    Scanning,
}

impl CentralState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CentralState::Initialized => "Initialized",
            CentralState::Starting => "Starting",
            CentralState::Unavailable(_) => "Unavailable",
            CentralState::Available => "Available",
            CentralState::Scanning => "Scanning",
        }
    }

    /// Availability implied by this state, `None` before the radio reported in.
    pub fn availability(&self) -> Option<Availability> {
        match self {
            CentralState::Initialized | CentralState::Starting => None,
            CentralState::Unavailable(cause) => Some(Availability::Unavailable(*cause)),
            CentralState::Available | CentralState::Scanning => Some(Availability::Available),
        }
    }
}

/// Events accepted by the central state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralStateEvent {
    Start,
    SetAvailable,
    SetUnavailable(UnavailabilityCause),
    Scan,
    Connect,
    Stop,
}

/// Finite state machine of a central.
#[derive(Debug)]
pub struct CentralStateMachine {
    state: CentralState,
}

impl CentralStateMachine {
    /// Create a new state machine in `Initialized`.
    pub fn new() -> Self {
        Self {
            state: CentralState::Initialized,
        }
    }

    pub fn state(&self) -> CentralState {
        self.state
    }

    /// Apply an event. The state is left unchanged when the event is illegal.
    pub fn handle_event(
        &mut self,
        event: CentralStateEvent,
    ) -> Result<(), TransitionError<CentralState>> {
        use CentralState::*;

        let next = match (self.state, event) {
            (Initialized, CentralStateEvent::Start) => Starting,
            (Initialized, _) => return Err(self.reject(event)),
            (_, CentralStateEvent::SetAvailable) => Available,
            (_, CentralStateEvent::SetUnavailable(cause)) => Unavailable(cause),
            (_, CentralStateEvent::Stop) => Initialized,
            (Available, CentralStateEvent::Scan) => Scanning,
            (Available | Scanning, CentralStateEvent::Connect) => self.state,
            _ => return Err(self.reject(event)),
        };

        debug!("Central {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
        Ok(())
    }

    fn reject(&self, event: CentralStateEvent) -> TransitionError<CentralState> {
        use CentralState::*;

        let valid = match event {
            CentralStateEvent::Start => vec![Initialized],
            CentralStateEvent::SetAvailable
            | CentralStateEvent::SetUnavailable(_)
            | CentralStateEvent::Stop => {
                vec![Starting, Available, Unavailable(ANY_UNAVAILABLE), Scanning]
            }
            CentralStateEvent::Scan => vec![Available],
            CentralStateEvent::Connect => vec![Available, Scanning],
        };
        debug!("Central rejected {:?} in {:?}", event, self.state);
        TransitionError {
            current: self.state,
            valid,
        }
    }
}

impl Default for CentralStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Peripheral state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralState {
    Initialized,
    Starting,
    Unavailable(UnavailabilityCause),
    Available,
}

impl PeripheralState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeripheralState::Initialized => "Initialized",
            PeripheralState::Starting => "Starting",
            PeripheralState::Unavailable(_) => "Unavailable",
            PeripheralState::Available => "Available",
        }
    }

    /// Availability implied by this state, `None` before the radio reported in.
    pub fn availability(&self) -> Option<Availability> {
        match self {
            PeripheralState::Initialized | PeripheralState::Starting => None,
            PeripheralState::Unavailable(cause) => Some(Availability::Unavailable(*cause)),
            PeripheralState::Available => Some(Availability::Available),
        }
    }
}

/// Events accepted by the peripheral state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralStateEvent {
    Start,
    SetAvailable,
    SetUnavailable(UnavailabilityCause),
    Stop,
}

/// Finite state machine of a peripheral.
#[derive(Debug)]
pub struct PeripheralStateMachine {
    state: PeripheralState,
}

impl PeripheralStateMachine {
    /// Create a new state machine in `Initialized`.
    pub fn new() -> Self {
        Self {
            state: PeripheralState::Initialized,
        }
    }

    pub fn state(&self) -> PeripheralState {
        self.state
    }

    /// Apply an event. The state is left unchanged when the event is illegal.
    pub fn handle_event(
        &mut self,
        event: PeripheralStateEvent,
    ) -> Result<(), TransitionError<PeripheralState>> {
        use PeripheralState::*;

        let next = match (self.state, event) {
            (Initialized, PeripheralStateEvent::Start) => Starting,
            (_, PeripheralStateEvent::Start) => {
                return Err(TransitionError {
                    current: self.state,
                    valid: vec![Initialized],
                })
            }
            (Initialized, _) => {
                return Err(TransitionError {
                    current: self.state,
                    valid: vec![Starting, Available, Unavailable(ANY_UNAVAILABLE)],
                })
            }
            (_, PeripheralStateEvent::SetAvailable) => Available,
            (_, PeripheralStateEvent::SetUnavailable(cause)) => Unavailable(cause),
            (_, PeripheralStateEvent::Stop) => Initialized,
        };

        debug!("Peripheral {:?} --{:?}--> {:?}", self.state, event, next);
        self.state = next;
        Ok(())
    }
}

impl Default for PeripheralStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFF: UnavailabilityCause = UnavailabilityCause::PoweredOff;

    fn started_central() -> CentralStateMachine {
        let mut machine = CentralStateMachine::new();
        machine.handle_event(CentralStateEvent::Start).unwrap();
        machine
    }

    #[test]
    fn test_central_lifecycle() {
        let mut machine = started_central();
        assert_eq!(machine.state(), CentralState::Starting);
        assert_eq!(machine.state().availability(), None);

        machine.handle_event(CentralStateEvent::SetAvailable).unwrap();
        machine.handle_event(CentralStateEvent::Scan).unwrap();
        assert_eq!(machine.state(), CentralState::Scanning);

        machine.handle_event(CentralStateEvent::Connect).unwrap();
        assert_eq!(machine.state(), CentralState::Scanning);

        machine.handle_event(CentralStateEvent::SetUnavailable(OFF)).unwrap();
        assert_eq!(machine.state(), CentralState::Unavailable(OFF));

        machine.handle_event(CentralStateEvent::Stop).unwrap();
        assert_eq!(machine.state(), CentralState::Initialized);
    }

    #[test]
    fn test_central_rejects_scan_when_unavailable() {
        let mut machine = started_central();
        machine.handle_event(CentralStateEvent::SetUnavailable(OFF)).unwrap();

        let error = machine.handle_event(CentralStateEvent::Scan).unwrap_err();
        assert_eq!(error.current, CentralState::Unavailable(OFF));
        assert_eq!(error.valid, vec![CentralState::Available]);
        assert_eq!(machine.state(), CentralState::Unavailable(OFF));

        let error = machine.handle_event(CentralStateEvent::Connect).unwrap_err();
        assert_eq!(
            error.valid,
            vec![CentralState::Available, CentralState::Scanning]
        );
    }

    #[test]
    fn test_central_rejects_everything_but_start_when_initialized() {
        let mut machine = CentralStateMachine::new();
        for event in [
            CentralStateEvent::SetAvailable,
            CentralStateEvent::SetUnavailable(OFF),
            CentralStateEvent::Scan,
            CentralStateEvent::Connect,
            CentralStateEvent::Stop,
        ] {
            assert!(machine.handle_event(event).is_err());
            assert_eq!(machine.state(), CentralState::Initialized);
        }

        let mut machine = started_central();
        let error = machine.handle_event(CentralStateEvent::Start).unwrap_err();
        assert_eq!(error.valid, vec![CentralState::Initialized]);
    }

    #[test]
    fn test_central_scan_twice_is_rejected() {
        let mut machine = started_central();
        machine.handle_event(CentralStateEvent::SetAvailable).unwrap();
        machine.handle_event(CentralStateEvent::Scan).unwrap();
        assert!(machine.handle_event(CentralStateEvent::Scan).is_err());
        assert_eq!(machine.state(), CentralState::Scanning);
    }

    #[test]
    fn test_stop_listing_uses_any_cause() {
        let error = CentralStateMachine::new()
            .handle_event(CentralStateEvent::Stop)
            .unwrap_err();
        assert!(error
            .valid
            .contains(&CentralState::Unavailable(UnavailabilityCause::Any)));
    }

    #[test]
    fn test_peripheral_lifecycle() {
        let mut machine = PeripheralStateMachine::new();
        assert!(machine.handle_event(PeripheralStateEvent::SetAvailable).is_err());

        machine.handle_event(PeripheralStateEvent::Start).unwrap();
        machine.handle_event(PeripheralStateEvent::SetUnavailable(OFF)).unwrap();
        assert_eq!(
            machine.state().availability(),
            Some(Availability::Unavailable(OFF))
        );
        machine.handle_event(PeripheralStateEvent::SetAvailable).unwrap();
        assert_eq!(machine.state(), PeripheralState::Available);

        let error = machine.handle_event(PeripheralStateEvent::Start).unwrap_err();
        assert_eq!(error.current, PeripheralState::Available);

        machine.handle_event(PeripheralStateEvent::Stop).unwrap();
        assert_eq!(machine.state(), PeripheralState::Initialized);
    }

    #[test]
    fn test_central_transition_table() {
        use CentralState as S;
        use CentralStateEvent as E;

        let states = [S::Initialized, S::Starting, S::Unavailable(OFF), S::Available, S::Scanning];
        let events = [E::Start, E::SetAvailable, E::SetUnavailable(OFF), E::Scan, E::Connect, E::Stop];
        for state in states {
            for event in events {
                let expected = match (state, event) {
                    (S::Initialized, E::Start) => Some(S::Starting),
                    (S::Initialized, _) | (_, E::Start) => None,
                    (_, E::SetAvailable) => Some(S::Available),
                    (_, E::SetUnavailable(cause)) => Some(S::Unavailable(cause)),
                    (_, E::Stop) => Some(S::Initialized),
                    (S::Available, E::Scan) => Some(S::Scanning),
                    (S::Available | S::Scanning, E::Connect) => Some(state),
                    _ => None,
                };

                let mut machine = CentralStateMachine { state };
                let result = machine.handle_event(event);
                match expected {
                    Some(next) => {
                        assert_eq!(result, Ok(()), "{:?} on {:?}", event, state);
                        assert_eq!(machine.state(), next, "{:?} on {:?}", event, state);
                    }
                    None => {
                        let error = result.unwrap_err();
                        assert_eq!(error.current, state);
                        assert!(!error.valid.contains(&state), "{:?} on {:?}", event, state);
                        assert_eq!(machine.state(), state);
                    }
                }
            }
        }
    }

    #[test]
    fn test_peripheral_transition_table() {
        use PeripheralState as S;
        use PeripheralStateEvent as E;

        let states = [S::Initialized, S::Starting, S::Unavailable(OFF), S::Available];
        let events = [E::Start, E::SetAvailable, E::SetUnavailable(OFF), E::Stop];
        for state in states {
            for event in events {
                let expected = match (state, event) {
                    (S::Initialized, E::Start) => Some(S::Starting),
                    (S::Initialized, _) | (_, E::Start) => None,
                    (_, E::SetAvailable) => Some(S::Available),
                    (_, E::SetUnavailable(cause)) => Some(S::Unavailable(cause)),
                    (_, E::Stop) => Some(S::Initialized),
                };

                let mut machine = PeripheralStateMachine { state };
                let result = machine.handle_event(event);
                match expected {
                    Some(next) => {
                        assert_eq!(result, Ok(()), "{:?} on {:?}", event, state);
                        assert_eq!(machine.state(), next, "{:?} on {:?}", event, state);
                    }
                    None => {
                        let error = result.unwrap_err();
                        assert_eq!(error.current, state);
                        assert!(!error.valid.contains(&state), "{:?} on {:?}", event, state);
                        assert_eq!(machine.state(), state);
                    }
                }
            }
        }
    }
}
