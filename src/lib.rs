//! sysqtt: host metrics published to MQTT in Home Assistant discovery format
//!
//! The crate turns a declarative sensor configuration into a registry of
//! sensors, keeps a broker session alive and publishes one state payload per
//! interval.
//!
//! ## Modules
//!
//! * `config`: TOML loading, the `[general]`, `[sensors]`, `[disk_mounted]`
//!   and `[logger]` sections, validation and defaults.
//!
//! * `core`: the session lifecycle engine:
//!   - sensor catalog, provider registry and registry builder
//!   - session controller (connect, retry, discovery, availability)
//!   - publication engine and scheduler
//!
//! * `logger`: `tracing` initialization with console output in several
//!   formats and optional systemd journald integration.
//!
//! The broker link itself lives in the `sysqtt-mqtt` crate.

pub mod config;
pub mod core;
pub mod logger;
