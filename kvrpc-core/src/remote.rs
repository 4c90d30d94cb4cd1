//! Value types for data-grid style consumers
//!
//! Select widgets fetch their options through a two-argument lookup and
//! tables fetch pages through a four-argument query. These shapes are fixed
//! so the binder offers dedicated `bind_options` / `bind_paged` entry points
//! for them.

use serde::{Deserialize, Serialize};

/// One entry of a remote select/lookup widget
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub divider: bool,
}

impl SelectOption {
    /// Option whose value and label are given
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Non-selectable separator line
    pub fn divider() -> Self {
        Self {
            divider: true,
            ..Default::default()
        }
    }
}

/// Column filter sent by a remote table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    /// Comparison operator, for example `"="`, `"like"`, `"<"`
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Column sort sent by a remote table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    pub field: String,
    pub dir: SortDirection,
}

/// One page of rows returned to a remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub data: Vec<T>,
    /// Number of the last available page (1-based; 0 when unpaged)
    pub last_page: u32,
    /// Total row count, when the service knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_row: Option<u64>,
}

impl<T> PagedResult<T> {
    /// Build a page from a slice of rows already cut by the service
    pub fn new(data: Vec<T>, last_page: u32) -> Self {
        Self {
            data,
            last_page,
            last_row: None,
        }
    }

    /// Cut page `page` (1-based) of size `page_size` out of all rows
    ///
    /// A missing page or size returns every row as a single unpaged result.
    pub fn paginate(rows: Vec<T>, page: Option<u32>, page_size: Option<u32>) -> Self {
        let total = rows.len() as u64;
        let (page, size) = match (page, page_size) {
            (Some(page), Some(size)) if size > 0 => (page.max(1), size),
            _ => {
                return Self {
                    data: rows,
                    last_page: 0,
                    last_row: Some(total),
                }
            }
        };
        let last_page = total.div_ceil(size as u64).max(1) as u32;
        let start = ((page - 1) as usize).saturating_mul(size as usize);
        let data = rows.into_iter().skip(start).take(size as usize).collect();
        Self {
            data,
            last_page,
            last_row: Some(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_option_wire_names() {
        let option = SelectOption {
            class_name: Some("bold".into()),
            ..SelectOption::new("1", "One")
        };
        let json = serde_json::to_value(&option).unwrap();
        assert_eq!(json["className"], "bold");
        assert_eq!(json["value"], "1");
        assert_eq!(json["disabled"], false);
        assert!(json.get("icon").is_none());
    }

    #[test]
    fn test_filter_type_field() {
        let filter: Filter =
            serde_json::from_str(r#"{"field":"name","type":"like","value":"Al"}"#).unwrap();
        assert_eq!(filter.kind, "like");
    }

    #[test]
    fn test_sorter_direction() {
        let sorter: Sorter = serde_json::from_str(r#"{"field":"age","dir":"desc"}"#).unwrap();
        assert_eq!(sorter.dir, SortDirection::Desc);
    }

    #[test]
    fn test_paginate() {
        let rows: Vec<u32> = (1..=25).collect();
        let page = PagedResult::paginate(rows.clone(), Some(3), Some(10));
        assert_eq!(page.data, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.last_row, Some(25));

        let beyond = PagedResult::paginate(rows.clone(), Some(9), Some(10));
        assert!(beyond.data.is_empty());

        let unpaged = PagedResult::paginate(rows, None, Some(10));
        assert_eq!(unpaged.data.len(), 25);
        assert_eq!(unpaged.last_page, 0);
    }

    #[test]
    fn test_paginate_empty() {
        let page = PagedResult::<u32>::paginate(Vec::new(), Some(1), Some(10));
        assert!(page.data.is_empty());
        assert_eq!(page.last_page, 1);
    }
}
