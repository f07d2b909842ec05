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

//! Reassembly of marker-terminated payloads.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

/// Reassembles chunks into complete payloads, one buffer per remote peer.
///
/// A chunk equal to the end-of-data mark completes the payload. Chunks are
/// not escaped, so a payload chunk that happens to equal the mark ends the
/// payload early.
#[derive(Debug)]
pub struct Reassembler {
    end_of_data_mark: Vec<u8>,
    buffers: HashMap<Uuid, Vec<u8>>,
}

impl Reassembler {
    /// Create a new reassembler for the given end-of-data mark.
    pub fn new(end_of_data_mark: impl Into<Vec<u8>>) -> Self {
        Self {
            end_of_data_mark: end_of_data_mark.into(),
            buffers: HashMap::new(),
        }
    }

    /// Process an incoming chunk from `peer`.
    ///
    /// Returns `Some(payload)` when the chunk completes a payload. A mark
    /// with nothing buffered yields `None`.
    pub fn receive(&mut self, peer: Uuid, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk == self.end_of_data_mark.as_slice() {
            let payload = self.buffers.remove(&peer);
            match &payload {
                Some(data) => debug!("Payload from {} complete: {} bytes", peer, data.len()),
                None => debug!("End of data from {} with nothing buffered", peer),
            }
            return payload;
        }

        let buffer = self.buffers.entry(peer).or_default();
        buffer.extend_from_slice(chunk);
        debug!(
            "Buffered {} bytes from {} ({} total)",
            chunk.len(),
            peer,
            buffer.len()
        );
        None
    }

    /// Drop whatever is buffered for `peer`.
    pub fn discard(&mut self, peer: Uuid) {
        if let Some(buffer) = self.buffers.remove(&peer) {
            debug!("Discarded {} buffered bytes from {}", buffer.len(), peer);
        }
    }

    /// Drop every buffer.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Bytes currently buffered for `peer`.
    pub fn buffered(&self, peer: Uuid) -> Option<&[u8]> {
        self.buffers.get(&peer).map(Vec::as_slice)
    }

    pub fn end_of_data_mark(&self) -> &[u8] {
        &self.end_of_data_mark
    }
}
