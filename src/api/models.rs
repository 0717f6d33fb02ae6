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


//! Upstream payload models
//!
//! The upstream JSON is loosely typed: ids arrive as strings or numbers,
//! flags as booleans or `0`/`1`, and whole sub-objects may be missing. Every
//! field here carries an explicit fallback so a partial payload still parses:
//!
//! | Upstream shape            | Fallback                       |
//! |---------------------------|--------------------------------|
//! | missing string            | `""`                           |
//! | missing count / index     | `0`                            |
//! | missing list              | empty `Vec`                    |
//! | missing flag              | `false`                        |
//! | id as number              | decimal string                 |
//!
//! Types ending in `Data` mirror an upstream `data` object; the rest are the
//! normalized shapes handed to callers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Marker used when a chapter has no playable path
pub const VIDEO_UNAVAILABLE: &str = "unavailable";

/// Preferred qualities after an explicit default, best first
const PREFERRED_QUALITIES: [u32; 2] = [1080, 720];

// ============================================================================
// Lenient field deserializers
// ============================================================================

/// Accept a string or a number, producing a string
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {}", other))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = string_or_number(deserializer)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

/// Accept `true`/`false`, `0`/`1` or `"true"`/`"1"`
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    })
}

/// Accept a number or a numeric string
fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn opt_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Tags arrive either as plain strings or as `{tagName}` objects
fn tag_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags = match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(map) => map
                    .get("tagName")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(tags)
}

// ============================================================================
// Listing
// ============================================================================

/// One drama as it appears in any listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DramaSummary {
    #[serde(default, deserialize_with = "string_or_number")]
    pub book_id: String,
    #[serde(default)]
    pub book_name: String,
    #[serde(default, alias = "coverWap")]
    pub cover: String,
    #[serde(default)]
    pub introduction: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub chapter_count: u32,
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub play_count: Option<String>,
}

/// A page of listing results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
        }
    }
}

/// Upstream `{records, isMore}` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<DramaSummary>,
    #[serde(default, alias = "hasMore", deserialize_with = "flag")]
    pub is_more: bool,
}

impl From<RecordPage> for Page<DramaSummary> {
    fn from(page: RecordPage) -> Self {
        Page {
            items: page.records,
            has_more: page.is_more,
        }
    }
}

/// `data` of the search endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    #[serde(default, alias = "suggestList", alias = "bookList")]
    pub search_list: Vec<DramaSummary>,
    #[serde(default, alias = "hasMore", deserialize_with = "flag")]
    pub is_more: bool,
}

/// `data` of the home theater endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TheaterData {
    #[serde(default)]
    pub new_theater_list: Option<RecordPage>,
}

/// `data` of the recommendation endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendData {
    #[serde(default)]
    pub recommend_list: Option<RecordPage>,
}

// ============================================================================
// Categories
// ============================================================================

/// A browsable category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default, alias = "value", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, alias = "displayName")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryGroup {
    #[serde(default, alias = "list")]
    pub filter_list: Vec<Category>,
}

/// `data` of the classify endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyData {
    #[serde(default)]
    pub types: Vec<CategoryGroup>,
    #[serde(default)]
    pub classify_book_list: Option<RecordPage>,
}

impl ClassifyData {
    /// Every category across all groups, first occurrence of an id wins
    pub fn categories(&self) -> Vec<Category> {
        let mut seen = std::collections::HashSet::new();
        self.types
            .iter()
            .flat_map(|group| group.filter_list.iter())
            .filter(|category| !category.id.is_empty() && seen.insert(category.id.clone()))
            .cloned()
            .collect()
    }
}

// ============================================================================
// Chapters
// ============================================================================

/// One quality variant of a chapter video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPathEntry {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub quality: u32,
    #[serde(default)]
    pub video_path: String,
    #[serde(default, alias = "default", deserialize_with = "flag")]
    pub is_default: bool,
}

/// One CDN offering a set of quality variants
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdnEntry {
    #[serde(default)]
    pub cdn_domain: String,
    #[serde(default, deserialize_with = "flag")]
    pub is_default: bool,
    #[serde(default)]
    pub video_path_list: Vec<VideoPathEntry>,
}

/// Chapter as returned inside a batch-load window
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChapter {
    #[serde(default, deserialize_with = "string_or_number")]
    pub chapter_id: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub chapter_index: u32,
    #[serde(default)]
    pub chapter_name: String,
    #[serde(default)]
    pub cdn_list: Vec<CdnEntry>,
}

impl RawChapter {
    /// All path variants, default CDN first, empty paths dropped
    pub fn video_paths(&self) -> Vec<&VideoPathEntry> {
        let (preferred, rest): (Vec<&CdnEntry>, Vec<&CdnEntry>) =
            self.cdn_list.iter().partition(|cdn| cdn.is_default);

        preferred
            .into_iter()
            .chain(rest)
            .flat_map(|cdn| cdn.video_path_list.iter())
            .filter(|entry| !entry.video_path.is_empty())
            .collect()
    }

    /// Resolve the playable path
    ///
    /// Preference: explicit default flag, then 1080p, then 720p, then the
    /// first available entry. With no entries at all the result is
    /// [`VIDEO_UNAVAILABLE`].
    pub fn select_video_path(&self) -> String {
        select_path(&self.video_paths())
            .map(|entry| entry.video_path.clone())
            .unwrap_or_else(|| VIDEO_UNAVAILABLE.to_string())
    }

    pub fn into_record(self) -> ChapterRecord {
        let video_path = self.select_video_path();
        ChapterRecord {
            chapter_id: self.chapter_id,
            chapter_index: self.chapter_index,
            chapter_name: self.chapter_name,
            video_path,
        }
    }
}

/// Pick the preferred entry from an ordered candidate list
pub fn select_path<'a>(entries: &[&'a VideoPathEntry]) -> Option<&'a VideoPathEntry> {
    if let Some(entry) = entries.iter().find(|entry| entry.is_default) {
        return Some(entry);
    }
    for quality in PREFERRED_QUALITIES {
        if let Some(entry) = entries.iter().find(|entry| entry.quality == quality) {
            return Some(entry);
        }
    }
    entries.first().copied()
}

/// `data` of one batch-load window
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLoadData {
    #[serde(default, deserialize_with = "string_or_number")]
    pub book_id: String,
    #[serde(default)]
    pub book_name: String,
    #[serde(default, alias = "bookCover")]
    pub cover: String,
    #[serde(default)]
    pub introduction: String,
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub chapter_count: u32,
    /// Paywall boundary; absent for fully free books
    #[serde(
        default,
        alias = "chargeChapterNum",
        alias = "payIndex",
        deserialize_with = "opt_lenient_u32"
    )]
    pub pay_chapter_index: Option<u32>,
    #[serde(default)]
    pub chapter_list: Vec<RawChapter>,
}

impl BatchLoadData {
    /// True when the upstream knows nothing about the requested book
    pub fn is_empty(&self) -> bool {
        self.book_name.is_empty() && self.chapter_count == 0 && self.chapter_list.is_empty()
    }

    pub fn drama(&self) -> DramaInfo {
        DramaInfo {
            book_id: self.book_id.clone(),
            book_name: self.book_name.clone(),
            cover: self.cover.clone(),
            introduction: self.introduction.clone(),
            tags: self.tags.clone(),
            chapter_count: self.chapter_count,
        }
    }
}

/// Normalized chapter with a resolved video path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterRecord {
    pub chapter_id: String,
    pub chapter_index: u32,
    pub chapter_name: String,
    pub video_path: String,
}

impl ChapterRecord {
    pub fn has_video(&self) -> bool {
        self.video_path != VIDEO_UNAVAILABLE
    }

    pub fn cmp_by_index(&self, other: &Self) -> Ordering {
        self.chapter_index
            .cmp(&other.chapter_index)
            .then_with(|| self.chapter_id.cmp(&other.chapter_id))
    }
}

// ============================================================================
// Detail / stream
// ============================================================================

/// Drama metadata from the first batch-load window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DramaInfo {
    pub book_id: String,
    pub book_name: String,
    pub cover: String,
    pub introduction: String,
    pub tags: Vec<String>,
    pub chapter_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DramaDetail {
    pub drama: DramaInfo,
    pub chapters: Vec<ChapterRecord>,
}

/// Chapter metadata without a resolved path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMeta {
    pub chapter_id: String,
    pub chapter_index: u32,
    pub chapter_name: String,
}

/// One playable URL of a stream lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoUrl {
    pub quality: u32,
    pub url: String,
    /// The entry the path selection would pick
    pub preferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub chapter: ChapterMeta,
    pub video_urls: Vec<VideoUrl>,
}

impl From<RawChapter> for StreamInfo {
    fn from(raw: RawChapter) -> Self {
        let paths = raw.video_paths();
        let preferred = select_path(&paths);

        let video_urls = paths
            .iter()
            .map(|entry| VideoUrl {
                quality: entry.quality,
                url: entry.video_path.clone(),
                preferred: preferred.is_some_and(|p| std::ptr::eq(p, *entry)),
            })
            .collect();

        StreamInfo {
            chapter: ChapterMeta {
                chapter_id: raw.chapter_id.clone(),
                chapter_index: raw.chapter_index,
                chapter_name: raw.chapter_name.clone(),
            },
            video_urls,
        }
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapUser {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub uid: Option<String>,
}

/// `data` of the bootstrap (token mint) endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapData {
    #[serde(default)]
    pub user: Option<BootstrapUser>,
    /// Opaque attribution blob, replayed untouched
    #[serde(default)]
    pub attribution_pub_param: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(quality: u32, is_default: bool) -> VideoPathEntry {
        VideoPathEntry {
            quality,
            video_path: format!("https://cdn/{}.mp4", quality),
            is_default,
        }
    }

    fn chapter_with(paths: Vec<VideoPathEntry>) -> RawChapter {
        RawChapter {
            chapter_id: "c1".to_string(),
            chapter_index: 0,
            chapter_name: "EP 1".to_string(),
            cdn_list: vec![CdnEntry {
                cdn_domain: "cdn".to_string(),
                is_default: true,
                video_path_list: paths,
            }],
        }
    }

    #[test]
    fn test_select_explicit_default_first() {
        let raw: RawChapter = serde_json::from_value(json!({
            "chapterId": 1,
            "chapterIndex": 0,
            "cdnList": [{
                "videoPathList": [
                    {"quality": 720, "videoPath": "a720"},
                    {"quality": 1080, "default": false, "videoPath": "a1080"},
                    {"default": true, "quality": 480, "videoPath": "a480"}
                ]
            }]
        }))
        .unwrap();

        assert_eq!(raw.select_video_path(), "a480");
    }

    #[test]
    fn test_select_quality_fallbacks() {
        let chapter = chapter_with(vec![path(480, false), path(720, false), path(1080, false)]);
        assert_eq!(chapter.select_video_path(), "https://cdn/1080.mp4");

        let chapter = chapter_with(vec![path(480, false), path(720, false)]);
        assert_eq!(chapter.select_video_path(), "https://cdn/720.mp4");

        let chapter = chapter_with(vec![path(360, false), path(480, false)]);
        assert_eq!(chapter.select_video_path(), "https://cdn/360.mp4");
    }

    #[test]
    fn test_select_without_paths_yields_marker() {
        let chapter = chapter_with(Vec::new());
        let record = chapter.into_record();
        assert_eq!(record.video_path, VIDEO_UNAVAILABLE);
        assert!(!record.has_video());
    }

    #[test]
    fn test_default_cdn_is_searched_first() {
        let raw = RawChapter {
            cdn_list: vec![
                CdnEntry {
                    cdn_domain: "backup".to_string(),
                    is_default: false,
                    video_path_list: vec![VideoPathEntry {
                        quality: 720,
                        video_path: "backup720".to_string(),
                        is_default: false,
                    }],
                },
                CdnEntry {
                    cdn_domain: "main".to_string(),
                    is_default: true,
                    video_path_list: vec![VideoPathEntry {
                        quality: 720,
                        video_path: "main720".to_string(),
                        is_default: false,
                    }],
                },
            ],
            ..RawChapter::default()
        };
        assert_eq!(raw.select_video_path(), "main720");
    }

    #[test]
    fn test_lenient_fields() {
        let summary: DramaSummary = serde_json::from_value(json!({
            "bookId": 41000102938u64,
            "bookName": "Hidden Heir",
            "coverWap": "https://img/c.jpg",
            "chapterCount": "62",
            "tags": [{"tagName": "Revenge"}, "CEO"],
            "playCount": 1200000
        }))
        .unwrap();

        assert_eq!(summary.book_id, "41000102938");
        assert_eq!(summary.cover, "https://img/c.jpg");
        assert_eq!(summary.chapter_count, 62);
        assert_eq!(summary.tags, vec!["Revenge".to_string(), "CEO".to_string()]);
        assert_eq!(summary.play_count.as_deref(), Some("1200000"));
    }

    #[test]
    fn test_partial_batch_payload_parses() {
        let data: BatchLoadData = serde_json::from_value(json!({"chapterCount": 12})).unwrap();
        assert_eq!(data.chapter_count, 12);
        assert!(data.chapter_list.is_empty());
        assert_eq!(data.pay_chapter_index, None);
        assert!(!data.is_empty());

        let data: BatchLoadData = serde_json::from_value(json!({"chargeChapterNum": "10"})).unwrap();
        assert_eq!(data.pay_chapter_index, Some(10));
    }

    #[test]
    fn test_flag_variants() {
        let page: RecordPage = serde_json::from_value(json!({"isMore": 1})).unwrap();
        assert!(page.is_more);
        let page: RecordPage = serde_json::from_value(json!({"isMore": "0"})).unwrap();
        assert!(!page.is_more);
    }

    #[test]
    fn test_categories_are_deduplicated() {
        let data: ClassifyData = serde_json::from_value(json!({
            "types": [
                {"filterList": [{"value": 1, "name": "Romance"}, {"value": 2, "name": "Revenge"}]},
                {"filterList": [{"value": 1, "name": "Romance"}]}
            ]
        }))
        .unwrap();

        let ids: Vec<String> = data.categories().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_stream_info_flags_preferred_url() {
        let info = StreamInfo::from(chapter_with(vec![path(720, false), path(1080, false)]));
        let preferred: Vec<u32> = info
            .video_urls
            .iter()
            .filter(|url| url.preferred)
            .map(|url| url.quality)
            .collect();
        assert_eq!(preferred, vec![1080]);
        assert_eq!(info.video_urls.len(), 2);
    }
}
