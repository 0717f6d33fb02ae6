// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Core of a REST facade over the Dramabox mobile API.
//!
//! The library talks to the upstream the way the Android app does (spoofed
//! device, signed requests, short-lived bearer tokens) and returns plain
//! data. The HTTP shell in [`server`] and the `dramabox-cli` binary are built
//! only with the `cli` feature.

pub mod api;
pub mod config;
pub mod error;

#[cfg(feature = "cli")]
pub mod server;

pub use api::{BestEffort, DramaboxClient};
pub use config::ClientConfig;
pub use error::{DramaboxError, Result};
