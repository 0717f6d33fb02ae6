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


//! Catalog queries
//!
//! # Key Functionality
//! - Keyword search
//! - Home theater and VIP theater listings
//! - Drama detail with the first chapter window
//! - Categories, per-category listings and recommendations
//! - Cache maintenance and debug views
//!
//! # Upstream Endpoints
//! All calls are signed POSTs below `/drama-box/`:
//!
//! | Operation          | Endpoint                | Cache TTL class |
//! |--------------------|-------------------------|-----------------|
//! | search             | `search/search`         | search          |
//! | list_home          | `he001/theater`         | list            |
//! | get_vip_theater    | `he001/vip`             | detail          |
//! | get_detail         | `chapterv2/batch/load`  | detail          |
//! | list_chapters      | `chapterv2/batch/load`  | chapters        |
//! | list_categories    | `he001/classify`        | categories      |
//! | list_by_category   | `he001/classify`        | list            |
//! | list_recommended   | `he001/recommendBook`   | list            |
//!
//! Every operation returns an `Arc`: a cache hit hands back the same object
//! the miss stored.

use crate::api::cache::{cache_key, CacheStats};
use crate::api::client::DramaboxClient;
use crate::api::device::mask;
use crate::api::models::{
    BatchLoadData, Category, ChapterRecord, ClassifyData, DramaDetail, DramaSummary, Page, RecommendData, SearchData,
    TheaterData,
};
use crate::api::validate;
use crate::error::{DramaboxError, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub const SEARCH_ENDPOINT: &str = "search/search";
pub const THEATER_ENDPOINT: &str = "he001/theater";
pub const VIP_ENDPOINT: &str = "he001/vip";
pub const BATCH_LOAD_ENDPOINT: &str = "chapterv2/batch/load";
pub const CLASSIFY_ENDPOINT: &str = "he001/classify";
pub const RECOMMEND_ENDPOINT: &str = "he001/recommendBook";

/// Upstream channel id of the home theater
const THEATER_CHANNEL_ID: u32 = 43;

/// Upstream channel id of the VIP theater
const VIP_CHANNEL_ID: u32 = 205;

impl DramaboxClient {
    /// Search dramas by keyword
    ///
    /// # Endpoint
    /// `POST /drama-box/search/search`
    ///
    /// # Arguments
    /// * `keyword` - Search text (trimmed, at most 200 characters)
    /// * `page` - 1-based page number
    /// * `size` - Page size, 1..=50
    /// * `lang` - Language tag (`en`, `in`, `pt-BR`, ...)
    ///
    /// # Errors
    /// - `Validation` - Empty keyword or out-of-range paging
    /// - any upstream error after retries
    ///
    /// # Example
    /// ```rust,no_run
    /// # use dramabox_core::{ClientConfig, DramaboxClient};
    /// # async fn example() -> dramabox_core::Result<()> {
    /// let client = DramaboxClient::new(ClientConfig::default())?;
    /// let page = client.search("ceo", 1, 20, "en").await?;
    /// println!("{} results, more: {}", page.items.len(), page.has_more);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn search(&self, keyword: &str, page: u32, size: u32, lang: &str) -> Result<Arc<Page<DramaSummary>>> {
        let keyword = validate::keyword(keyword)?;
        let page = validate::page(page)?;
        let size = validate::page_size(size)?;
        let lang = validate::language(lang)?;

        let key = cache_key("search", &[&keyword, &page.to_string(), &size.to_string(), &lang]);
        self.cached(&key, self.config().cache_ttls.search, async {
            let payload = json!({
                "searchSource": "搜索按钮",
                "pageNo": page,
                "pageSize": size,
                "from": "search_sug",
                "keyword": keyword,
            });
            let data: SearchData = self.fetch_data(SEARCH_ENDPOINT, &payload, &lang).await?.unwrap_or_default();
            Ok(Page {
                items: data.search_list,
                has_more: data.is_more,
            })
        })
        .await
    }

    /// List the home theater
    ///
    /// # Endpoint
    /// `POST /drama-box/he001/theater`
    pub async fn list_home(&self, page: u32, size: u32, lang: &str) -> Result<Arc<Page<DramaSummary>>> {
        let page = validate::page(page)?;
        let size = validate::page_size(size)?;
        let lang = validate::language(lang)?;

        let key = cache_key("home", &[&page.to_string(), &size.to_string(), &lang]);
        self.cached(&key, self.config().cache_ttls.list, async {
            let payload = json!({
                "newChannelStyle": 1,
                "isNeedRank": 1,
                "pageNo": page,
                "pageSize": size,
                "index": 1,
                "channelId": THEATER_CHANNEL_ID,
            });
            let data: TheaterData = self.fetch_data(THEATER_ENDPOINT, &payload, &lang).await?.unwrap_or_default();
            let mut listing: Page<DramaSummary> = data.new_theater_list.map(Page::from).unwrap_or_else(Page::empty);
            listing.items.truncate(size as usize);
            Ok(listing)
        })
        .await
    }

    /// VIP theater, passed through as the upstream `data` payload
    ///
    /// # Endpoint
    /// `POST /drama-box/he001/vip`
    pub async fn get_vip_theater(&self, lang: &str) -> Result<Arc<Value>> {
        let lang = validate::language(lang)?;

        let key = cache_key("vip", &[&lang]);
        self.cached(&key, self.config().cache_ttls.detail, async {
            let payload = json!({
                "homePageStyle": 0,
                "isNeedRank": 1,
                "index": 4,
                "type": 0,
                "channelId": VIP_CHANNEL_ID,
            });
            let data: Option<Value> = self.fetch_data(VIP_ENDPOINT, &payload, &lang).await?;
            Ok(data.unwrap_or(Value::Null))
        })
        .await
    }

    /// Drama metadata plus the first window of chapters
    ///
    /// # Endpoint
    /// `POST /drama-box/chapterv2/batch/load` with `index = 1`
    ///
    /// # Arguments
    /// * `book_id` - Numeric book id
    /// * `lang` - Language tag
    ///
    /// # Errors
    /// - `Validation` - Non-numeric book id
    /// - `NotFound` - Upstream knows nothing about the book
    ///
    /// # Example
    /// ```rust,no_run
    /// # use dramabox_core::{ClientConfig, DramaboxClient};
    /// # async fn example() -> dramabox_core::Result<()> {
    /// let client = DramaboxClient::new(ClientConfig::default())?;
    /// let detail = client.get_detail("41000102938", "en").await?;
    /// println!("{}: {} chapters", detail.drama.book_name, detail.drama.chapter_count);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_detail(&self, book_id: &str, lang: &str) -> Result<Arc<DramaDetail>> {
        let book_id = validate::book_id(book_id)?;
        let lang = validate::language(lang)?;

        let key = cache_key("detail", &[&book_id, &lang]);
        self.cached(&key, self.config().cache_ttls.detail, async {
            let window = self.load_window(&book_id, self.config().pager.first_index, &lang).await?;
            if window.is_empty() {
                return Err(DramaboxError::not_found(format!("Drama {}", book_id)));
            }

            let drama = window.drama();
            let mut chapters: Vec<ChapterRecord> = window.chapter_list.into_iter().map(|raw| raw.into_record()).collect();
            chapters.sort_by(ChapterRecord::cmp_by_index);
            Ok(DramaDetail { drama, chapters })
        })
        .await
    }

    /// First window of chapters with resolved video paths
    ///
    /// For the complete listing use [`DramaboxClient::batch_list_all_chapters`].
    pub async fn list_chapters(&self, book_id: &str, lang: &str) -> Result<Arc<Vec<ChapterRecord>>> {
        let book_id = validate::book_id(book_id)?;
        let lang = validate::language(lang)?;

        let key = cache_key("chapters", &[&book_id, &lang]);
        self.cached(&key, self.config().cache_ttls.chapters, async {
            let detail = self.get_detail(&book_id, &lang).await?;
            Ok(detail.chapters.clone())
        })
        .await
    }

    /// All browsable categories
    ///
    /// # Endpoint
    /// `POST /drama-box/he001/classify`
    pub async fn list_categories(&self, lang: &str) -> Result<Arc<Vec<Category>>> {
        let lang = validate::language(lang)?;

        let key = cache_key("categories", &[&lang]);
        self.cached(&key, self.config().cache_ttls.categories, async {
            let payload = json!({
                "typeList": [],
                "showLabels": true,
                "pageNo": 1,
                "pageSize": 1,
            });
            let data: ClassifyData = self.fetch_data(CLASSIFY_ENDPOINT, &payload, &lang).await?.unwrap_or_default();
            Ok(data.categories())
        })
        .await
    }

    /// Dramas in one category
    ///
    /// # Endpoint
    /// `POST /drama-box/he001/classify` filtered by `typeList`
    pub async fn list_by_category(
        &self,
        category_id: &str,
        page: u32,
        size: u32,
        lang: &str,
    ) -> Result<Arc<Page<DramaSummary>>> {
        let category_id = validate::category_id(category_id)?;
        let page = validate::page(page)?;
        let size = validate::page_size(size)?;
        let lang = validate::language(lang)?;

        let key = cache_key("category", &[&category_id, &page.to_string(), &size.to_string(), &lang]);
        self.cached(&key, self.config().cache_ttls.list, async {
            let payload = json!({
                "typeList": [{"type": 1, "value": category_id}],
                "showLabels": false,
                "pageNo": page,
                "pageSize": size,
            });
            let data: ClassifyData = self.fetch_data(CLASSIFY_ENDPOINT, &payload, &lang).await?.unwrap_or_default();
            Ok(data.classify_book_list.map(Page::from).unwrap_or_else(Page::empty))
        })
        .await
    }

    /// Upstream recommendations
    ///
    /// # Endpoint
    /// `POST /drama-box/he001/recommendBook`
    pub async fn list_recommended(&self, lang: &str) -> Result<Arc<Vec<DramaSummary>>> {
        let lang = validate::language(lang)?;

        let key = cache_key("recommend", &[&lang]);
        self.cached(&key, self.config().cache_ttls.list, async {
            let payload = json!({
                "isNeedRank": 1,
                "specialColumnId": 0,
                "pageNo": 1,
            });
            let data: RecommendData = self.fetch_data(RECOMMEND_ENDPOINT, &payload, &lang).await?.unwrap_or_default();
            Ok(data.recommend_list.map(|page| page.records).unwrap_or_default())
        })
        .await
    }

    /// Drop every cached response and token
    pub async fn clear_cache(&self) {
        let before = self.context().cache.stats().await.entries;
        self.context().tokens.clear_all().await;
        self.context().cache.clear().await;
        info!(entries = before, "cache cleared");
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.context().cache.stats().await
    }

    /// The header set a signed request for `lang` would carry right now
    ///
    /// Signed over an empty JSON object body. The bearer token is masked.
    ///
    /// # Errors
    /// `TokenAcquisitionFailed` when no token can be minted
    pub async fn get_debug_headers(&self, lang: &str) -> Result<BTreeMap<String, String>> {
        let lang = validate::language(lang)?;
        let token = self.context().tokens.get_token(&lang).await?;

        let timestamp = Utc::now().timestamp_millis().to_string();
        let mut headers = self.signed_headers(&timestamp, "{}", &token, &lang);
        headers.insert("tn".to_string(), format!("Bearer {}", mask(&token.value)));
        headers.insert("timestamp".to_string(), timestamp);
        Ok(headers)
    }

    /// One batch-load window; a missing `data` object reads as an empty window
    pub(crate) async fn load_window(&self, book_id: &str, index: u32, lang: &str) -> Result<BatchLoadData> {
        let payload = json!({
            "boundaryIndex": 0,
            "comingPlaceholder": false,
            "index": index,
            "currencyPlaySource": "discover_new_rec_new",
            "needEndRecom": 0,
            "preLoad": false,
            "rid": "",
            "pullCid": "",
            "loadDirection": 0,
            "startUpKey": "",
            "bookId": book_id,
        });

        Ok(self
            .fetch_data(BATCH_LOAD_ENDPOINT, &payload, lang)
            .await?
            .unwrap_or_default())
    }
}
