// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for the Parley session supervisor.
//!
//! Exposes the stable external surface (`/health`, `/qr`, `/send-text`,
//! `/send-media`, `/send-voice`, `/media/{messageId}`) regardless of which
//! session driver is wrapped. The gateway holds no session state of its own:
//! reads observe watch snapshots, writes flow through the supervisor's
//! command channel.

pub mod handlers;
pub mod server;

pub use server::{build_router, serve_on, start_server, GatewayState};
