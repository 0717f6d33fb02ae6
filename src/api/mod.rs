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


//! Dramabox API client implementation
//!
//! Leaf-first:
//! - `device` - spoofed device identities and request signing
//! - `retry` - backoff policy and per-call attempt bookkeeping
//! - `cache` - keyed response cache with per-entry TTL
//! - `transport` - the wire seam (`reqwest` in production)
//! - `token` - bearer token lifecycle per language
//! - `client` - signed request pipeline
//! - `content`, `stream`, `pager` - the public operations

pub mod cache;
pub mod client;
pub mod content;
pub mod device;
pub mod models;
pub mod pager;
pub mod retry;
pub mod stream;
pub mod token;
pub mod transport;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use cache::{CacheStats, ResponseCache};
pub use client::{AuthMode, DramaboxClient, SessionContext};
pub use device::{DeviceIdentity, Signer};
pub use models::{Category, ChapterRecord, DramaDetail, DramaSummary, Page, StreamInfo};
pub use pager::BestEffort;
pub use retry::{RetryContext, RetryPolicy};
pub use token::{Token, TokenStore};
pub use transport::{HttpMethod, HttpTransport, Transport, UpstreamRequest, UpstreamResponse};
