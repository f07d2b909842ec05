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

//! Outbound chunked transfers.
//!
//! Payloads are written in chunks no longer than the link allows, followed
//! by the end-of-data mark on the same characteristic. Tasks are served
//! strictly in submission order and only the head task is on the air.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::peer::RemotePeer;
use crate::error::{Error, Result};

/// Invoked once per send with the payload, its destination and the outcome.
pub type SendCompletion<P> = Box<dyn FnOnce(Vec<u8>, Arc<P>, Result<()>) + Send>;

/// Where the engine writes chunks to.
pub(crate) trait ChunkSink<P> {
    fn is_connected(&self, peer: &P) -> bool;

    fn maximum_payload_length(&self, peer: &P) -> usize;

    /// Returns `false` when the transport buffer is full.
    fn write(&mut self, peer: &P, chunk: &[u8]) -> bool;
}

/// A payload waiting to be written to a destination.
pub(crate) struct SendDataTask<P> {
    data: Vec<u8>,
    destination: Arc<P>,
    offset: usize,
    completion: SendCompletion<P>,
}

impl<P: RemotePeer> SendDataTask<P> {
    pub(crate) fn new(data: Vec<u8>, destination: Arc<P>, completion: SendCompletion<P>) -> Self {
        Self {
            data,
            destination,
            offset: 0,
            completion,
        }
    }

    fn sent_all_data(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn complete(self, result: Result<()>) {
        (self.completion)(self.data, self.destination, result);
    }
}

/// FIFO queue of send tasks for one facade.
pub(crate) struct TransferEngine<P> {
    tasks: VecDeque<SendDataTask<P>>,
    end_of_data_mark: Vec<u8>,
}

impl<P: RemotePeer> TransferEngine<P> {
    pub(crate) fn new(end_of_data_mark: impl Into<Vec<u8>>) -> Self {
        Self {
            tasks: VecDeque::new(),
            end_of_data_mark: end_of_data_mark.into(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Queue a task, failing it right away when its destination is not connected.
    pub(crate) fn enqueue(&mut self, task: SendDataTask<P>, sink: &mut impl ChunkSink<P>) {
        if !sink.is_connected(&task.destination) {
            debug!(
                "Refusing {} bytes for {}: not connected",
                task.data.len(),
                task.destination.identifier()
            );
            task.complete(Err(Error::PeerNotConnected));
            return;
        }

        self.tasks.push_back(task);
        if self.tasks.len() == 1 {
            self.process(sink);
        }
    }

    /// Write as much as the sink accepts, resuming the head task where it stopped.
    pub(crate) fn process(&mut self, sink: &mut impl ChunkSink<P>) {
        while let Some(task) = self.tasks.front_mut() {
            if !sink.is_connected(&task.destination) {
                if let Some(task) = self.tasks.pop_front() {
                    debug!("Dropping send to {}: disconnected", task.destination.identifier());
                    task.complete(Err(Error::PeerNotConnected));
                }
                continue;
            }

            if task.sent_all_data() {
                if !sink.write(&task.destination, &self.end_of_data_mark) {
                    return;
                }
                if let Some(task) = self.tasks.pop_front() {
                    info!(
                        "Sent {} bytes to {}",
                        task.data.len(),
                        task.destination.identifier()
                    );
                    task.complete(Ok(()));
                }
                continue;
            }

            let remaining = task.data.len() - task.offset;
            let length = sink.maximum_payload_length(&task.destination).max(1).min(remaining);
            let chunk = &task.data[task.offset..task.offset + length];
            if !sink.write(&task.destination, chunk) {
                debug!("Transport buffer full at offset {}", task.offset);
                return;
            }
            task.offset += length;
        }
    }

    /// Fail every queued task for `peer`.
    pub(crate) fn fail_tasks_for(&mut self, peer: Uuid) {
        let (failed, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| task.destination.identifier() == peer);
        self.tasks = kept;
        for task in failed {
            task.complete(Err(Error::PeerNotConnected));
        }
    }

    /// Fail every queued task.
    pub(crate) fn fail_all(&mut self) {
        for task in std::mem::take(&mut self.tasks) {
            task.complete(Err(Error::PeerNotConnected));
        }
    }
}
