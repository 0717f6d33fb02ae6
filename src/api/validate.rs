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


//! Caller input checks
//!
//! Text is trimmed and cut to [`MAX_TEXT_CHARS`] before any other check, so
//! nothing longer ever reaches a cache key or an upstream payload.

use crate::error::{DramaboxError, Result};
use regex::Regex;
use std::sync::OnceLock;

pub const MAX_TEXT_CHARS: usize = 200;
pub const MAX_PAGE_SIZE: u32 = 50;

const LANGUAGE_PATTERN: &str = r"^[a-z]{2}(-[A-Z]{2})?$";
const NUMERIC_ID_PATTERN: &str = r"^[0-9]+$";

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(regex) = cell.get() {
        return Ok(regex);
    }
    let regex = Regex::new(pattern)
        .map_err(|e| DramaboxError::InvalidConfiguration(format!("pattern '{}': {}", pattern, e)))?;
    Ok(cell.get_or_init(|| regex))
}

/// Trim and cut to [`MAX_TEXT_CHARS`] characters
pub fn truncate(input: &str) -> String {
    input.trim().chars().take(MAX_TEXT_CHARS).collect()
}

/// `xx` or `xx-YY`
pub fn language(lang: &str) -> Result<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let lang = truncate(lang);
    if !compiled(&PATTERN, LANGUAGE_PATTERN)?.is_match(&lang) {
        return Err(DramaboxError::validation(format!(
            "language must look like 'en' or 'pt-BR', got '{}'",
            lang
        )));
    }
    Ok(lang)
}

fn numeric_id(kind: &str, id: &str) -> Result<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let id = truncate(id);
    if !compiled(&PATTERN, NUMERIC_ID_PATTERN)?.is_match(&id) {
        return Err(DramaboxError::validation(format!("{} must be numeric, got '{}'", kind, id)));
    }
    Ok(id)
}

pub fn book_id(id: &str) -> Result<String> {
    numeric_id("bookId", id)
}

pub fn category_id(id: &str) -> Result<String> {
    numeric_id("categoryId", id)
}

pub fn keyword(keyword: &str) -> Result<String> {
    let keyword = truncate(keyword);
    if keyword.is_empty() {
        return Err(DramaboxError::validation("keyword must not be empty"));
    }
    Ok(keyword)
}

pub fn page(page: u32) -> Result<u32> {
    if page == 0 {
        return Err(DramaboxError::validation("page starts at 1"));
    }
    Ok(page)
}

pub fn page_size(size: u32) -> Result<u32> {
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(DramaboxError::validation(format!(
            "size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, size
        )));
    }
    Ok(size)
}

pub fn episode(episode: u32) -> Result<u32> {
    if episode == 0 {
        return Err(DramaboxError::validation("episode starts at 1"));
    }
    Ok(episode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language() {
        assert_eq!(language(" en ").unwrap(), "en");
        assert_eq!(language("pt-BR").unwrap(), "pt-BR");
        assert!(language("english").is_err());
        assert!(language("EN").is_err());
        assert!(language("").is_err());
    }

    #[test]
    fn test_ids() {
        assert_eq!(book_id("41000102938").unwrap(), "41000102938");
        assert!(book_id("41a").is_err());
        assert!(book_id("").is_err());
        assert!(category_id("-1").is_err());
    }

    #[test]
    fn test_keyword_is_trimmed_and_cut() {
        assert!(keyword("   ").is_err());
        assert_eq!(keyword("  ceo  ").unwrap(), "ceo");
        assert_eq!(keyword(&"x".repeat(500)).unwrap().chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_paging_bounds() {
        assert!(page(0).is_err());
        assert_eq!(page(3).unwrap(), 3);
        assert!(page_size(0).is_err());
        assert!(page_size(51).is_err());
        assert_eq!(page_size(50).unwrap(), 50);
        assert!(episode(0).is_err());
    }
}
