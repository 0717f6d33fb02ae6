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


//! Stream URL lookup
//!
//! Served by the secondary upstream surface, which needs no token. The lookup
//! runs its own bounded retry loop and never touches the token store, so a
//! flaky stream host cannot rotate sessions used by the catalog calls.

use crate::api::cache::cache_key;
use crate::api::client::{decode_data, AuthMode, DramaboxClient};
use crate::api::models::{RawChapter, StreamInfo};
use crate::api::retry::RetryContext;
use crate::api::transport::HttpMethod;
use crate::api::validate;
use crate::error::{DramaboxError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub const STREAM_ENDPOINT: &str = "webfic/book/chapter";

impl DramaboxClient {
    /// Playable URLs for one episode
    ///
    /// # Endpoint
    /// `GET {stream_base_url}/webfic/book/chapter?bookId=..&index=..`
    ///
    /// # Arguments
    /// * `book_id` - Numeric book id
    /// * `episode` - 1-based episode number (upstream chapter index + 1)
    /// * `lang` - Language tag
    ///
    /// # Returns
    /// Chapter metadata and every video URL, the preferred one flagged
    ///
    /// # Errors
    /// - `Validation` - Bad book id, episode 0 or bad language
    /// - `NotFound` - The upstream has no such episode
    /// - any transport/status error after retries
    pub async fn get_stream_url(&self, book_id: &str, episode: u32, lang: &str) -> Result<Arc<StreamInfo>> {
        let book_id = validate::book_id(book_id)?;
        let episode = validate::episode(episode)?;
        let lang = validate::language(lang)?;

        let key = cache_key("stream", &[&book_id, &episode.to_string(), &lang]);
        self.cached(&key, self.config().cache_ttls.chapters, async {
            let payload = json!({
                "bookId": book_id,
                "index": episode - 1,
                "language": lang,
            });

            let retry = &self.config().retry;
            let mut ctx = RetryContext::new();
            let envelope = loop {
                match self
                    .send_once(STREAM_ENDPOINT, &payload, AuthMode::Anonymous, HttpMethod::Get, &lang)
                    .await
                {
                    Ok(envelope) => break envelope,
                    Err(err) => {
                        let attempt = ctx.attempt;
                        match retry.schedule(&mut ctx, err) {
                            Some(delay) => {
                                warn!(book_id = %book_id, episode, attempt, "stream lookup failed, retrying");
                                tokio::time::sleep(delay).await;
                            }
                            None => return Err(ctx.into_error(STREAM_ENDPOINT)),
                        }
                    }
                }
            };

            let raw: RawChapter = decode_data(STREAM_ENDPOINT, envelope)?
                .ok_or_else(|| DramaboxError::not_found(format!("Episode {} of drama {}", episode, book_id)))?;
            Ok(StreamInfo::from(raw))
        })
        .await
    }
}
