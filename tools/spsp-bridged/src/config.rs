// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge daemon configuration.
//!
//! Loaded from a TOML file; every option except the wireless interface has
//! a default.

use serde::{Deserialize, Deserializer, Serialize};
use spsp::codec::PASSWORD_LEN;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which far layer the bridge connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FarLayerKind {
    /// In-process broker; subscribers connect through this very bridge.
    LocalBroker,
    /// Upstream MQTT broker. Requires a platform MQTT adapter, which this
    /// build does not carry.
    Mqtt,
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgedConfig {
    /// Far layer selection.
    #[serde(default = "default_far_layer")]
    pub far_layer: FarLayerKind,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    pub espnow: EspNowSection,

    #[serde(default)]
    pub local_broker: LocalBrokerSection,

    #[serde(default)]
    pub reporting: ReportingSection,
}

/// `[espnow]` section: the wireless side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EspNowSection {
    /// Monitor-mode 802.11 interface name.
    pub interface: String,

    /// Network identifier; accepts an integer or a hex string ("0x...").
    #[serde(default, deserialize_with = "deserialize_ssid")]
    pub ssid: u32,

    /// Packet encryption password, exactly 32 characters.
    #[serde(default)]
    pub password: String,

    /// Delivery retries per send.
    #[serde(default = "default_retransmits")]
    pub retransmits: u8,
}

/// `[local_broker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBrokerSection {
    /// Topic prefix for published messages.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

impl Default for LocalBrokerSection {
    fn default() -> Self {
        LocalBrokerSection {
            topic_prefix: default_topic_prefix(),
        }
    }
}

/// `[reporting]` section, mapping 1:1 onto the bridge reporting flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingSection {
    #[serde(default = "default_true")]
    pub version: bool,
    #[serde(default = "default_true")]
    pub probe_payload: bool,
    #[serde(default = "default_true")]
    pub rssi_on_probe: bool,
    #[serde(default = "default_true")]
    pub rssi_on_pub: bool,
    #[serde(default = "default_true")]
    pub rssi_on_sub: bool,
    #[serde(default = "default_true")]
    pub rssi_on_unsub: bool,
}

impl Default for ReportingSection {
    fn default() -> Self {
        ReportingSection {
            version: true,
            probe_payload: true,
            rssi_on_probe: true,
            rssi_on_pub: true,
            rssi_on_sub: true,
            rssi_on_unsub: true,
        }
    }
}

impl From<&ReportingSection> for spsp::BridgeReporting {
    fn from(section: &ReportingSection) -> Self {
        spsp::BridgeReporting {
            version: section.version,
            probe_payload: section.probe_payload,
            rssi_on_probe: section.rssi_on_probe,
            rssi_on_pub: section.rssi_on_pub,
            rssi_on_sub: section.rssi_on_sub,
            rssi_on_unsub: section.rssi_on_unsub,
        }
    }
}

fn default_far_layer() -> FarLayerKind {
    FarLayerKind::LocalBroker
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retransmits() -> u8 {
    5
}

fn default_topic_prefix() -> String {
    "spsp".to_string()
}

fn default_true() -> bool {
    true
}

fn deserialize_ssid<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => u32::try_from(v)
            .map_err(|_| serde::de::Error::custom(format!("ssid out of range: {}", v))),
        Raw::Str(s) => {
            let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
            u32::from_str_radix(trimmed, 16)
                .map_err(|_| serde::de::Error::custom(format!("invalid ssid: '{}'", s)))
        }
    }
}

impl BridgedConfig {
    /// Loads and validates a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.espnow.interface.is_empty() {
            return Err(ConfigError::Invalid("espnow.interface is required".into()));
        }
        if self.espnow.password.len() != PASSWORD_LEN {
            return Err(ConfigError::Invalid(format!(
                "espnow.password must be exactly {} characters, got {}",
                PASSWORD_LEN,
                self.espnow.password.len()
            )));
        }
        Ok(())
    }

    /// Password as the fixed-size key the codec expects.
    pub fn password_bytes(&self) -> [u8; PASSWORD_LEN] {
        let mut password = [0u8; PASSWORD_LEN];
        password.copy_from_slice(self.espnow.password.as_bytes());
        password
    }

    /// Example configuration file content.
    pub fn example() -> &'static str {
        r#"# SPSP bridge daemon configuration

# Far layer: "local_broker" (in-process) or "mqtt" (needs an MQTT adapter)
far_layer = "local_broker"
log_level = "info"

[espnow]
# 802.11 interface in monitor mode
interface = "wlan1"
# Network identifier (integer or hex string)
ssid = "0x01020304"
# Exactly 32 characters
password = "01234567890123456789012345678901"
retransmits = 5

[local_broker]
topic_prefix = "spsp"

[reporting]
version = true
probe_payload = true
rssi_on_probe = true
rssi_on_pub = true
rssi_on_sub = true
rssi_on_unsub = true
"#
    }
}
