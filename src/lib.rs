//! # lorabridge - LoRa gateway ↔ ThingsBoard bridge
//!
//! lorabridge sits between a LoRa gateway board on a serial port and a
//! ThingsBoard instance. It moves data both ways:
//!
//! - **Uplink**: measurement triplets (`MAC:`, `ID:`, `Battery:`) read from the
//!   gateway are uploaded as telemetry of the device that sent them. Devices
//!   seen for the first time are provisioned on the fly.
//! - **Downlink**: when the gateway asks for messages (`GET_MSG`), every device's
//!   shared attributes are polled. Plain string attributes are forwarded once as
//!   `<name>:<text>` and deleted; calendar attributes (`Start:`/`End:`) are
//!   cached and forwarded as `calendar:<label>:Start=..:End=..` while active.
//!   Each poll ends with a `time:<epoch>` clock sync.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lorabridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     lorabridge::bridge::run(config).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - startup sequence and the foreground line handler
//! - [`poller`] - poll cycle, attribute classification, due-event dispatch
//! - [`registry`] - MAC → cloud identity, provisioning on first contact
//! - [`schedule`] - cached calendar events and calendar value parsing
//! - [`link`] - serial port, line framing, wire protocol
//! - [`cloud`] - `CloudApi` seam and the ThingsBoard REST client
//! - [`storage`] - atomic snapshot files and the data-dir lock
//! - [`config`] - TOML configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  lines   ┌──────────────┐  resolve/upload  ┌──────────────┐
//! │ serial link  │ ───────► │  Foreground  │ ───────────────► │              │
//! └──────────────┘          └──────────────┘                  │  CloudApi    │
//!        ▲                         │ GET_MSG                  │ (ThingsBoard)│
//!        │ calendar/message/time   ▼                          │              │
//!        └──────────────────  ┌──────────────┐ fetch/delete   │              │
//!                             │    Poller    │ ─────────────► │              │
//!                             └──────────────┘                └──────────────┘
//! ```

pub mod bridge;
pub mod cloud;
pub mod config;
pub mod error;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod poller;
pub mod registry;
pub mod schedule;
pub mod storage;
