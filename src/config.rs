// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the transaction layer.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// One observer to load at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Identifier registered in the [`crate::observer::ObserverRegistry`].
    pub id: String,
    /// Free-form parameters handed to the observer factory.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ObserverConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Configuration shared by the oracle client, oracle server and transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of this process, sent with every oracle request.
    pub instance_id: String,
    /// How long a caller waits for a timestamp, in milliseconds. Negative
    /// waits forever, logging with exponential backoff.
    pub client_retry_timeout_ms: i64,
    /// How long a lock held by a live transactor is respected before it may
    /// be rolled back.
    pub rollback_timeout_ms: u64,
    /// Capacity of the oracle client's request queue.
    pub oracle_queue_capacity: usize,
    /// Number of timestamps the oracle server reserves durably at a time.
    pub oracle_reservation_block: u64,
    /// Interval between recomputations of the oldest-active marker.
    pub oracle_floor_interval_ms: u64,
    /// Observers to resolve from the registry.
    pub observers: Vec<ObserverConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: "percolate".to_string(),
            client_retry_timeout_ms: 30_000,
            rollback_timeout_ms: 300_000,
            oracle_queue_capacity: 1000,
            oracle_reservation_block: 100_000,
            oracle_floor_interval_ms: 1000,
            observers: Vec::new(),
        }
    }
}

impl Config {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make a component misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oracle_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "oracle_queue_capacity",
                reason: "must be positive".to_string(),
            });
        }
        if self.oracle_reservation_block == 0 {
            return Err(ConfigError::Invalid {
                field: "oracle_reservation_block",
                reason: "must be positive".to_string(),
            });
        }
        if self.oracle_floor_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "oracle_floor_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = id.into();
        self
    }

    pub fn with_client_retry_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.client_retry_timeout_ms = timeout_ms;
        self
    }

    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_oracle_queue_capacity(mut self, capacity: usize) -> Self {
        self.oracle_queue_capacity = capacity;
        self
    }

    pub fn with_oracle_reservation_block(mut self, block: u64) -> Self {
        self.oracle_reservation_block = block;
        self
    }

    pub fn with_oracle_floor_interval(mut self, interval: Duration) -> Self {
        self.oracle_floor_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_observer(mut self, observer: ObserverConfig) -> Self {
        self.observers.push(observer);
        self
    }

    /// Caller wait bound, `None` for unbounded.
    #[inline]
    pub fn client_retry_timeout(&self) -> Option<Duration> {
        u64::try_from(self.client_retry_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    #[inline]
    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_millis(self.rollback_timeout_ms)
    }

    #[inline]
    pub fn oracle_floor_interval(&self) -> Duration {
        Duration::from_millis(self.oracle_floor_interval_ms)
    }
}
