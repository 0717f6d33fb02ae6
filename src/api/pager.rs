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


//! Full chapter listing
//!
//! The upstream hands out chapters in windows of about five and truncates
//! windows when it suspects scraping. The pager walks every window, tells a
//! legitimately short window (near the end of the book, or at the paywall
//! boundary) from a throttled one, and recovers from throttling by rotating
//! the token before retrying the window once.
//!
//! # Window protocol
//! 1. Window at index 1 learns `chapterCount` and the paywall index
//! 2. Windows at 6, 11, 16, ... until the index passes `chapterCount`
//! 3. A pacing delay before every window after the first
//!
//! # Per-window outcomes
//! - enough items, or legitimately short: accepted
//! - `<= throttle_threshold` items elsewhere: suspected throttling, recover
//!   and retry once; the retry is accepted even if short
//! - zero items off the paywall boundary, or an error: recover and retry
//!   once; a second failure drops the window
//!
//! # Outer loop
//! A window that adds chapters advances the index. A window that adds nothing
//! is fetched again, up to `starvation_limit` times in a row, then skipped. A
//! dropped window is skipped.
//!
//! The listing never fails. Everything that went wrong is reported next to
//! the result in [`BestEffort::suppressed`].

use crate::api::client::DramaboxClient;
use crate::api::models::{BatchLoadData, ChapterRecord};
use crate::api::validate;
use crate::config::PagerConfig;
use crate::error::DramaboxError;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A result that is always produced, plus what was swallowed on the way
#[derive(Debug)]
pub struct BestEffort<T> {
    pub value: T,
    pub suppressed: Vec<DramaboxError>,
}

impl<T> BestEffort<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            suppressed: Vec::new(),
        }
    }

    /// True when nothing had to be swallowed
    pub fn is_clean(&self) -> bool {
        self.suppressed.is_empty()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T: Default> BestEffort<T> {
    fn failed(error: DramaboxError) -> Self {
        Self {
            value: T::default(),
            suppressed: vec![error],
        }
    }
}

/// State of one listing run
pub struct ChapterPager<'a> {
    client: &'a DramaboxClient,
    config: PagerConfig,
    book_id: String,
    lang: String,
    total: u32,
    pay_index: Option<u32>,
    /// Records in arrival order; duplicates resolved at the end
    arrived: Vec<ChapterRecord>,
    seen: HashSet<String>,
    suppressed: Vec<DramaboxError>,
    /// Set once an oversized chapter count has been reported
    capped: bool,
}

impl<'a> ChapterPager<'a> {
    pub fn new(client: &'a DramaboxClient, book_id: String, lang: String) -> Self {
        Self {
            config: client.config().pager.clone(),
            client,
            book_id,
            lang,
            total: 0,
            pay_index: None,
            arrived: Vec::new(),
            seen: HashSet::new(),
            suppressed: Vec::new(),
            capped: false,
        }
    }

    /// Walk every window and return the merged chapter list
    pub async fn run(mut self) -> BestEffort<Vec<ChapterRecord>> {
        let first = self.config.first_index;
        match self.fetch_window(first).await {
            Some(window) => {
                self.absorb(window);
            }
            None => {
                warn!(book_id = %self.book_id, "first window unavailable, giving up");
                return self.finish();
            }
        }

        let step = self.config.window_size;
        let mut current = self.config.second_index();
        let mut starved = 0u32;
        let mut rounds = 0u64;

        while current <= self.total {
            rounds += 1;
            if rounds > self.round_budget() {
                warn!(book_id = %self.book_id, index = current, rounds, "window budget spent, stopping");
                break;
            }

            tokio::time::sleep(self.config.pacing_delay).await;

            let advance = match self.fetch_window(current).await {
                Some(window) => {
                    if self.absorb(window) > 0 {
                        true
                    } else {
                        starved += 1;
                        let skip = starved >= self.config.starvation_limit;
                        if skip {
                            warn!(book_id = %self.book_id, index = current, "no new chapters, skipping window");
                        }
                        skip
                    }
                }
                None => true,
            };

            if advance {
                starved = 0;
                match current.checked_add(step) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        self.finish()
    }

    /// Fetch one window, recovering once from throttling or failure
    ///
    /// Returns `None` when the window is dropped.
    async fn fetch_window(&mut self, index: u32) -> Option<BatchLoadData> {
        for is_recovery in [false, true] {
            let (problem, upstream_error) = match self.client.load_window(&self.book_id, index, &self.lang).await {
                Ok(window) => match self.assess(index, &window, is_recovery) {
                    None => return Some(window),
                    Some(reason) => (DramaboxError::invalid_response(reason, None), false),
                },
                Err(err) => (err, true),
            };

            if is_recovery {
                warn!(book_id = %self.book_id, index, error = %problem, "window dropped after recovery");
                self.suppressed.push(problem);
                return None;
            }

            warn!(book_id = %self.book_id, index, error = %problem, "window anomaly, recovering");
            if upstream_error {
                self.suppressed.push(problem);
            }
            self.recover(index).await;
        }
        None
    }

    /// Most loop rounds the walk may take for the current total
    ///
    /// Every window may be fetched up to `starvation_limit` times.
    fn round_budget(&self) -> u64 {
        let windows = u64::from(self.total / self.config.window_size.max(1)) + 1;
        windows * u64::from(self.config.starvation_limit.max(1))
    }

    /// Chapter count reported by a window, capped at `max_chapters`
    fn bounded_total(&self, window: &BatchLoadData) -> u32 {
        window.chapter_count.min(self.config.max_chapters)
    }

    /// Decide whether a fetched window can be accepted as is
    ///
    /// Returns the reason when it cannot.
    fn assess(&self, index: u32, window: &BatchLoadData, is_recovery: bool) -> Option<String> {
        let count = window.chapter_list.len();
        let total = self.total.max(self.bounded_total(window));
        let at_paywall = self.pay_index.or(window.pay_chapter_index) == Some(index);
        let near_end = total.saturating_sub(index) < self.config.near_end_margin;

        if count == 0 && !at_paywall {
            return Some(format!("window {} is empty", index));
        }
        if count <= self.config.throttle_threshold && !at_paywall && !is_recovery && !near_end {
            return Some(format!("window {} returned only {} chapter(s) of {}", index, count, total));
        }
        None
    }

    /// Rotate the token, optionally refresh the paywall window, then wait
    async fn recover(&mut self, index: u32) {
        let client = self.client;
        let tokens = &client.context().tokens;
        info!(book_id = %self.book_id, index, "rotating token for recovery");

        tokens.invalidate(&self.lang).await;
        if let Err(err) = tokens.get_token(&self.lang).await {
            self.suppressed.push(err);
        }

        if self.config.refetch_paywall_on_recovery {
            if let Some(pay_index) = self.pay_index.filter(|pay| *pay != index) {
                match client.load_window(&self.book_id, pay_index, &self.lang).await {
                    Ok(window) => {
                        self.absorb(window);
                    }
                    Err(err) => self.suppressed.push(err),
                }
            }
        }

        tokio::time::sleep(self.config.recovery_delay).await;
    }

    /// Merge a window into the working set, returning how many ids were new
    fn absorb(&mut self, window: BatchLoadData) -> usize {
        if window.chapter_count > self.config.max_chapters && !self.capped {
            warn!(
                book_id = %self.book_id,
                reported = window.chapter_count,
                max = self.config.max_chapters,
                "implausible chapter count, capping"
            );
            self.suppressed.push(DramaboxError::invalid_response(
                format!(
                    "chapter count {} exceeds the limit of {}",
                    window.chapter_count, self.config.max_chapters
                ),
                None,
            ));
            self.capped = true;
        }
        self.total = self.total.max(self.bounded_total(&window));
        if self.pay_index.is_none() {
            self.pay_index = window.pay_chapter_index;
        }

        let mut added = 0;
        for raw in window.chapter_list {
            let record = raw.into_record();
            if self.seen.insert(record.chapter_id.clone()) {
                added += 1;
            }
            self.arrived.push(record);
        }

        debug!(book_id = %self.book_id, added, collected = self.seen.len(), total = self.total, "window merged");
        added
    }

    /// Deduplicate (last arrival wins) and order by chapter index
    fn finish(self) -> BestEffort<Vec<ChapterRecord>> {
        let chapters = merge_chapters(self.arrived);
        info!(
            book_id = %self.book_id,
            chapters = chapters.len(),
            total = self.total,
            suppressed = self.suppressed.len(),
            "chapter listing finished"
        );

        BestEffort {
            value: chapters,
            suppressed: self.suppressed,
        }
    }
}

/// Keep the last record per chapter id and sort by chapter index
pub fn merge_chapters(arrived: Vec<ChapterRecord>) -> Vec<ChapterRecord> {
    let mut by_id: HashMap<String, ChapterRecord> = HashMap::with_capacity(arrived.len());
    for record in arrived {
        by_id.insert(record.chapter_id.clone(), record);
    }

    let mut chapters: Vec<ChapterRecord> = by_id.into_values().collect();
    chapters.sort_by(ChapterRecord::cmp_by_index);
    chapters
}

impl DramaboxClient {
    /// Every chapter of a drama, best effort
    ///
    /// Never fails: invalid input, upstream errors and dropped windows end up
    /// in [`BestEffort::suppressed`] and the value holds whatever could be
    /// collected (possibly nothing).
    ///
    /// # Example
    /// ```rust,no_run
    /// # use dramabox_core::{ClientConfig, DramaboxClient};
    /// # async fn example() -> dramabox_core::Result<()> {
    /// let client = DramaboxClient::new(ClientConfig::default())?;
    /// let listing = client.batch_list_all_chapters("41000102938", "en").await;
    /// println!("{} chapters, {} problems", listing.value.len(), listing.suppressed.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn batch_list_all_chapters(&self, book_id: &str, lang: &str) -> BestEffort<Vec<ChapterRecord>> {
        let book_id = match validate::book_id(book_id) {
            Ok(id) => id,
            Err(err) => return BestEffort::failed(err),
        };
        let lang = match validate::language(lang) {
            Ok(lang) => lang,
            Err(err) => return BestEffort::failed(err),
        };

        ChapterPager::new(self, book_id, lang).run().await
    }
}
