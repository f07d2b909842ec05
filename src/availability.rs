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

//! Radio availability and observer fan-out.
//!
//! Availability is never stored. It is derived from the transport power
//! state each time it is asked for, and observers are told about the
//! changes the facades observe while driving their state machines.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::bluetooth::transport::PowerState;

/// Which side of the link a facade plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Central,
    Peripheral,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Central => "central",
            Role::Peripheral => "peripheral",
        }
    }
}

/// Why the radio cannot be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnavailabilityCause {
    /// Placeholder matching every other cause.
    Any,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
}

impl UnavailabilityCause {
    /// Compare two causes, treating `Any` as a wildcard.
    pub fn matches(&self, other: &UnavailabilityCause) -> bool {
        matches!(self, UnavailabilityCause::Any)
            || matches!(other, UnavailabilityCause::Any)
            || self == other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailabilityCause::Any => "any",
            UnavailabilityCause::Resetting => "resetting",
            UnavailabilityCause::Unsupported => "unsupported",
            UnavailabilityCause::Unauthorized => "unauthorized",
            UnavailabilityCause::PoweredOff => "powered off",
        }
    }
}

/// Whether the radio can currently be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Availability {
    Available,
    Unavailable(UnavailabilityCause),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    /// Compare two availabilities, treating `Unavailable(Any)` as matching
    /// every unavailable cause.
    pub fn matches(&self, other: &Availability) -> bool {
        match (self, other) {
            (Availability::Available, Availability::Available) => true,
            (Availability::Unavailable(a), Availability::Unavailable(b)) => a.matches(b),
            _ => false,
        }
    }
}

impl From<PowerState> for Availability {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::PoweredOn => Availability::Available,
            PowerState::Resetting => Availability::Unavailable(UnavailabilityCause::Resetting),
            PowerState::Unsupported => Availability::Unavailable(UnavailabilityCause::Unsupported),
            PowerState::Unauthorized => {
                Availability::Unavailable(UnavailabilityCause::Unauthorized)
            }
            PowerState::PoweredOff => Availability::Unavailable(UnavailabilityCause::PoweredOff),
            PowerState::Unknown => Availability::Unavailable(UnavailabilityCause::Any),
        }
    }
}

/// Receives availability changes of a central or peripheral.
pub trait AvailabilityObserver: Send + Sync {
    /// The radio became available, or unavailable for the first time.
    fn availability_did_change(&self, role: Role, availability: Availability);

    /// The radio stayed unavailable but for a different reason.
    fn unavailability_cause_did_change(&self, role: Role, cause: UnavailabilityCause);
}

/// What observers must be told about a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AvailabilityNotice {
    Changed(Availability),
    CauseChanged(UnavailabilityCause),
}

/// Classify a move from `previous` (None while starting) to `next`.
pub(crate) fn notice_for(
    previous: Option<Availability>,
    next: Availability,
) -> Option<AvailabilityNotice> {
    match (previous, next) {
        (Some(Availability::Available), Availability::Available) => None,
        (_, Availability::Available) => Some(AvailabilityNotice::Changed(next)),
        (Some(Availability::Unavailable(old)), Availability::Unavailable(cause)) => {
            (old != cause).then_some(AvailabilityNotice::CauseChanged(cause))
        }
        (_, Availability::Unavailable(_)) => Some(AvailabilityNotice::Changed(next)),
    }
}

/// Weak registry of availability observers for one role.
pub struct AvailabilityObservers {
    role: Role,
    observers: Vec<Weak<dyn AvailabilityObserver>>,
}

impl AvailabilityObservers {
    /// Create an empty registry.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            observers: Vec::new(),
        }
    }

    /// Register an observer. Adding the same observer twice has no effect.
    pub fn add<O: AvailabilityObserver + 'static>(&mut self, observer: &Arc<O>) {
        let weak: Weak<dyn AvailabilityObserver> = Arc::<O>::downgrade(observer);
        if !self.observers.iter().any(|o| Weak::ptr_eq(o, &weak)) {
            self.observers.push(weak);
        }
    }

    /// Unregister an observer. Unknown observers are ignored.
    pub fn remove<O: AvailabilityObserver + 'static>(&mut self, observer: &Arc<O>) {
        let weak: Weak<dyn AvailabilityObserver> = Arc::<O>::downgrade(observer);
        self.observers.retain(|o| !Weak::ptr_eq(o, &weak));
    }

    /// Number of live observers.
    pub fn len(&self) -> usize {
        self.observers.iter().filter(|o| o.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify(&mut self, notice: AvailabilityNotice) {
        self.observers.retain(|o| o.strong_count() > 0);
        debug!(
            "Notifying {} {} availability observers: {:?}",
            self.observers.len(),
            self.role.as_str(),
            notice
        );
        let live: Vec<Arc<dyn AvailabilityObserver>> =
            self.observers.iter().filter_map(Weak::upgrade).collect();
        for observer in live {
            match notice {
                AvailabilityNotice::Changed(availability) => {
                    observer.availability_did_change(self.role, availability)
                }
                AvailabilityNotice::CauseChanged(cause) => {
                    observer.unavailability_cause_did_change(self.role, cause)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<AvailabilityNotice>>,
    }

    impl AvailabilityObserver for Recorder {
        fn availability_did_change(&self, _role: Role, availability: Availability) {
            self.seen.lock().push(AvailabilityNotice::Changed(availability));
        }

        fn unavailability_cause_did_change(&self, _role: Role, cause: UnavailabilityCause) {
            self.seen.lock().push(AvailabilityNotice::CauseChanged(cause));
        }
    }

    const OFF: Availability = Availability::Unavailable(UnavailabilityCause::PoweredOff);

    #[test]
    fn test_any_is_a_wildcard() {
        let any = UnavailabilityCause::Any;
        assert!(any.matches(&UnavailabilityCause::PoweredOff));
        assert!(UnavailabilityCause::Unauthorized.matches(&any));
        assert!(!UnavailabilityCause::Unauthorized.matches(&UnavailabilityCause::PoweredOff));
        assert_ne!(any, UnavailabilityCause::PoweredOff);
        assert!(Availability::Unavailable(any).matches(&OFF));
        assert!(!Availability::Available.matches(&OFF));
    }

    #[test]
    fn test_power_state_mapping() {
        assert_eq!(Availability::from(PowerState::PoweredOn), Availability::Available);
        assert_eq!(Availability::from(PowerState::PoweredOff), OFF);
        assert_eq!(
            Availability::from(PowerState::Unknown),
            Availability::Unavailable(UnavailabilityCause::Any)
        );
    }

    #[test]
    fn test_notice_classification() {
        let unauthorized = Availability::Unavailable(UnavailabilityCause::Unauthorized);
        assert_eq!(
            notice_for(None, Availability::Available),
            Some(AvailabilityNotice::Changed(Availability::Available))
        );
        assert_eq!(notice_for(None, OFF), Some(AvailabilityNotice::Changed(OFF)));
        assert_eq!(
            notice_for(Some(Availability::Available), Availability::Available),
            None
        );
        assert_eq!(
            notice_for(Some(Availability::Available), OFF),
            Some(AvailabilityNotice::Changed(OFF))
        );
        assert_eq!(notice_for(Some(OFF), OFF), None);
        assert_eq!(
            notice_for(Some(OFF), unauthorized),
            Some(AvailabilityNotice::CauseChanged(
                UnavailabilityCause::Unauthorized
            ))
        );
        assert_eq!(
            notice_for(Some(OFF), Availability::Available),
            Some(AvailabilityNotice::Changed(Availability::Available))
        );
    }

    #[test]
    fn test_observers_are_idempotent_and_weak() {
        let mut observers = AvailabilityObservers::new(Role::Central);
        let recorder = Arc::new(Recorder::default());
        observers.add(&recorder);
        observers.add(&recorder);
        assert_eq!(observers.len(), 1);

        observers.notify(AvailabilityNotice::Changed(Availability::Available));
        assert_eq!(recorder.seen.lock().len(), 1);

        observers.remove(&recorder);
        observers.remove(&recorder);
        assert!(observers.is_empty());

        observers.add(&recorder);
        drop(recorder);
        observers.notify(AvailabilityNotice::Changed(OFF));
        assert!(observers.is_empty());
    }
}
