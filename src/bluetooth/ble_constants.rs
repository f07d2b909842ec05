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

//! BLE defaults shared by the central and peripheral roles.

use std::time::Duration;

/// Marker written after the last chunk of every payload.
pub const DEFAULT_END_OF_DATA_MARK: &[u8] = b"EOD";

/// Marker reserved for signalling a cancelled transfer.
pub const DEFAULT_DATA_CANCELLED_MARK: &[u8] = b"COD";

/// Advertisement data keys reported by transports.
pub mod advertisement {
    /// Advertised local name (`AdvertisementValue::Text`).
    pub const LOCAL_NAME: &str = "local_name";
    /// Advertised service UUIDs (`AdvertisementValue::Uuids`).
    pub const SERVICE_UUIDS: &str = "service_uuids";
    /// Manufacturer specific data (`AdvertisementValue::Bytes`).
    pub const MANUFACTURER_DATA: &str = "manufacturer_data";
    /// Advertised transmit power level (`AdvertisementValue::Number`).
    pub const TX_POWER_LEVEL: &str = "tx_power_level";
}

/// Transfer and timing defaults.
pub mod config {
    use super::Duration;

    /// Maximum write length assumed when the transport does not report one.
    /// This is the ATT payload of the minimum 23 byte MTU.
    pub const DEFAULT_MAXIMUM_PAYLOAD_LENGTH: usize = 20;

    /// Default duration of a single scan pass.
    pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(3);

    /// Default delay between two passes of a continuous scan.
    pub const DEFAULT_IN_BETWEEN_DELAY: Duration = Duration::from_secs(3);

    /// Default connection attempt timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
}
