// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions implemented by session drivers.

pub mod driver;

pub use driver::{DriverFactory, SessionDriver};
