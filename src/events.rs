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

//! Event processing on a tokio task.
//!
//! A facade is owned by a single task. Transport events, timer expirations
//! and caller operations are all funneled through that task, so the facade
//! never sees two of them at once.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bluetooth::transport::{CentralEvent, PeripheralEvent, Scheduler, TimerId};
use crate::central::Central;
use crate::error::{Error, Result};
use crate::peripheral::Peripheral;

/// A facade that can be driven by an event loop.
pub trait Reactor: Send + 'static {
    type Event: Send + 'static;

    fn handle_event(&mut self, event: Self::Event);

    fn handle_timer(&mut self, timer: TimerId);
}

impl Reactor for Central {
    type Event = CentralEvent;

    fn handle_event(&mut self, event: CentralEvent) {
        Central::handle_event(self, event)
    }

    fn handle_timer(&mut self, timer: TimerId) {
        Central::handle_timer(self, timer)
    }
}

impl Reactor for Peripheral {
    type Event = PeripheralEvent;

    fn handle_event(&mut self, event: PeripheralEvent) {
        Peripheral::handle_event(self, event)
    }

    fn handle_timer(&mut self, timer: TimerId) {
        Peripheral::handle_timer(self, timer)
    }
}

/// Scheduler backed by tokio sleeps. Expired timers are sent back to the
/// event loop owning the facade.
pub struct TokioScheduler {
    expired: mpsc::UnboundedSender<TimerId>,
    next_id: u64,
    pending: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    fn new(expired: mpsc::UnboundedSender<TimerId>) -> Self {
        Self {
            expired,
            next_id: 0,
            pending: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.pending.retain(|_, task| !task.is_finished());
        self.next_id += 1;
        let id = TimerId(self.next_id);

        let expired = self.expired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // the loop is gone when this fails
            let _ = expired.send(id);
        });
        self.pending.insert(id, task);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(task) = self.pending.remove(&id) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }
}

enum Command<R: Reactor> {
    Event(R::Event),
    Call(Box<dyn FnOnce(&mut R) + Send>),
    Shutdown,
}

/// Sends work to a running event loop.
pub struct EventLoopHandle<R: Reactor> {
    commands: mpsc::UnboundedSender<Command<R>>,
}

impl<R: Reactor> Clone for EventLoopHandle<R> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<R: Reactor> EventLoopHandle<R> {
    /// Forward a transport event.
    pub fn send_event(&self, event: R::Event) -> Result<()> {
        self.commands
            .send(Command::Event(event))
            .map_err(|_| Error::EventLoopClosed)
    }

    /// Run `f` on the facade and return its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut R) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Call(Box::new(move |reactor: &mut R| {
                let _ = tx.send(f(reactor));
            })))
            .map_err(|_| Error::EventLoopClosed)?;
        rx.await.map_err(|_| Error::EventLoopClosed)
    }

    /// Stop the loop. The facade is handed back through the join handle.
    pub fn shutdown(&self) -> Result<()> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| Error::EventLoopClosed)
    }
}

/// Build a facade around a [`TokioScheduler`] and drive it on a new task.
///
/// Must be called from within a tokio runtime.
pub fn spawn<R, B>(build: B) -> (EventLoopHandle<R>, JoinHandle<R>)
where
    R: Reactor,
    B: FnOnce(TokioScheduler) -> R,
{
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let reactor = build(TokioScheduler::new(timer_tx));
    let task = tokio::spawn(run(reactor, command_rx, timer_rx));
    (
        EventLoopHandle {
            commands: command_tx,
        },
        task,
    )
}

async fn run<R: Reactor>(
    mut reactor: R,
    mut commands: mpsc::UnboundedReceiver<Command<R>>,
    mut timers: mpsc::UnboundedReceiver<TimerId>,
) -> R {
    info!("Event loop started");
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Event(event)) => reactor.handle_event(event),
                Some(Command::Call(call)) => call(&mut reactor),
                Some(Command::Shutdown) | None => break,
            },
            Some(timer) = timers.recv() => {
                debug!("Timer {:?} expired", timer);
                reactor.handle_timer(timer);
            }
        }
    }
    info!("Event loop stopped");
    reactor
}
