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

//! Configuration module.
//!
//! Handles loading and saving the service layout shared by both roles.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bluetooth::ble_constants::{DEFAULT_DATA_CANCELLED_MARK, DEFAULT_END_OF_DATA_MARK};
use crate::bluetooth::transport::ServiceDefinition;
use crate::error::Error;

fn default_end_of_data_mark() -> Vec<u8> {
    DEFAULT_END_OF_DATA_MARK.to_vec()
}

fn default_data_cancelled_mark() -> Vec<u8> {
    DEFAULT_DATA_CANCELLED_MARK.to_vec()
}

/// Service layout and transfer markers. Fixed once a facade is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Service carrying the data characteristic.
    pub service_uuid: Uuid,

    /// Characteristic payloads are exchanged on.
    pub characteristic_uuid: Uuid,

    /// Bytes terminating every payload.
    #[serde(default = "default_end_of_data_mark")]
    pub end_of_data_mark: Vec<u8>,

    /// Reserved marker for cancelled transfers.
    #[serde(default = "default_data_cancelled_mark")]
    pub data_cancelled_mark: Vec<u8>,

    /// Name advertised by a peripheral.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
}

impl Configuration {
    /// Create a configuration with the default markers.
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            characteristic_uuid,
            end_of_data_mark: default_end_of_data_mark(),
            data_cancelled_mark: default_data_cancelled_mark(),
            local_name: None,
        }
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_end_of_data_mark(mut self, mark: impl Into<Vec<u8>>) -> Self {
        self.end_of_data_mark = mark.into();
        self
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        vec![self.service_uuid]
    }

    /// Service a peripheral publishes for this configuration.
    pub fn service_definition(&self) -> ServiceDefinition {
        ServiceDefinition {
            uuid: self.service_uuid,
            data_characteristic: self.characteristic_uuid,
        }
    }

    /// Check the markers before a facade starts with this configuration.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.end_of_data_mark.is_empty() {
            return Err(Error::InvalidConfiguration(
                "end_of_data_mark must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}
