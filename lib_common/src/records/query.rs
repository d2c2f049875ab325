//! # Query Engine
//!
//! Turns raw list parameters into a validated [`ListQuery`] and runs it against a
//! [`RecordStore`].
//!
//! The sort column is the only identifier that ends up inside query text, so it
//! is parsed into [`SortColumn`] and rendered from a constant table. Caller input
//! never reaches the store unparsed.
//!
//! `total` and `data` are read together but not necessarily from one snapshot:
//! a concurrent mutation can land between the count and the page, so `total`
//! may be momentarily stale relative to `data`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error::RecordError;
use super::model::{validate_id, Record};
use super::store::{with_timeout, RecordStore};

/// Allow-listed sort columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortColumn {
    Id,
    Name,
    Species,
    Age,
    HealthStatus,
}

impl SortColumn {
    pub const ALL: [SortColumn; 5] = [
        SortColumn::Id,
        SortColumn::Name,
        SortColumn::Species,
        SortColumn::Age,
        SortColumn::HealthStatus,
    ];

    /// Parses the public `sortBy` name. Matching is exact.
    pub fn parse(raw: &str) -> Result<Self, RecordError> {
        Self::ALL
            .into_iter()
            .find(|column| column.param_name() == raw)
            .ok_or_else(|| RecordError::InvalidSortColumn(raw.to_string()))
    }

    /// Name used in the query string and JSON.
    pub fn param_name(self) -> &'static str {
        match self {
            SortColumn::Id => "id",
            SortColumn::Name => "name",
            SortColumn::Species => "species",
            SortColumn::Age => "age",
            SortColumn::HealthStatus => "healthStatus",
        }
    }

    /// Column name in the `animals` table.
    pub fn column_name(self) -> &'static str {
        match self {
            SortColumn::Id => "id",
            SortColumn::Name => "name",
            SortColumn::Species => "species",
            SortColumn::Age => "age",
            SortColumn::HealthStatus => "health_status",
        }
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.param_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Coerces any input to a direction. Only `desc`/`descending` (any case)
    /// select descending; everything else, including garbage, is ascending.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "desc" || s == "descending" => SortDirection::Descending,
            _ => SortDirection::Ascending,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// Raw query-string parameters of `GET /records`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// Page size bounds applied while building a [`ListQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

/// A validated list request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Case-insensitive substring matched against `name` or `species`; empty matches all.
    pub search_term: String,
    pub sort_column: SortColumn,
    pub sort_direction: SortDirection,
    /// 1-based.
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            sort_column: SortColumn::Id,
            sort_direction: SortDirection::Ascending,
            page_number: 1,
            page_size: PageLimits::default().default_page_size,
        }
    }
}

impl ListQuery {
    /// Builds a query from raw parameters. An unknown `sortBy` or non-positive
    /// paging is rejected; `order` is coerced; `limit` is clamped to the maximum.
    pub fn from_params(params: &ListParams, limits: &PageLimits) -> Result<Self, RecordError> {
        let sort_column = match non_blank(params.sort_by.as_deref()) {
            Some(raw) => SortColumn::parse(raw)?,
            None => SortColumn::Id,
        };
        let page_number = parse_positive("page", params.page.as_deref())?.unwrap_or(1);
        let page_size = parse_positive("limit", params.limit.as_deref())?
            .unwrap_or(limits.default_page_size)
            .min(limits.max_page_size.max(1));

        Ok(Self {
            search_term: params.search.as_deref().unwrap_or("").trim().to_string(),
            sort_column,
            sort_direction: SortDirection::normalize(params.order.as_deref()),
            page_number,
            page_size,
        })
    }

    /// Rows skipped before the page starts.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_positive(field: &str, raw: Option<&str>) -> Result<Option<u32>, RecordError> {
    let Some(raw) = non_blank(raw) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(value) if value >= 1 => Ok(Some(value)),
        _ => Err(RecordError::Validation(format!(
            "\"{}\" must be a positive integer",
            field
        ))),
    }
}

/// `ceil(total / page_size)`, zero for an empty result.
pub fn page_count(total: u64, page_size: u32) -> u64 {
    let size = u64::from(page_size.max(1));
    total.div_ceil(size)
}

/// One page of results, serialised as `{total, page, limit, totalPages, data}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    #[serde(rename = "total")]
    pub total_count: u64,
    #[serde(rename = "page")]
    pub page_number: u32,
    #[serde(rename = "limit")]
    pub page_size: u32,
    #[serde(rename = "totalPages")]
    pub page_count: u64,
    #[serde(rename = "data")]
    pub items: Vec<Record>,
}

/// Read side of the service.
pub struct QueryEngine<S> {
    store: Arc<S>,
    limits: PageLimits,
    timeout: Duration,
}

impl<S: RecordStore> QueryEngine<S> {
    pub fn new(store: Arc<S>, limits: PageLimits, timeout: Duration) -> Self {
        Self {
            store,
            limits,
            timeout,
        }
    }

    /// Validates raw parameters, then lists. Rejected parameters never reach the store.
    pub async fn list_params(&self, params: &ListParams) -> Result<ListPage, RecordError> {
        let query = ListQuery::from_params(params, &self.limits)?;
        self.list(&query).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListPage, RecordError> {
        let scan = with_timeout(self.timeout, self.store.scan(query)).await?;
        debug!(
            "List '{}' by {} {}: page {} of size {} returned {} of {} rows",
            query.search_term,
            query.sort_column,
            query.sort_direction.as_sql(),
            query.page_number,
            query.page_size,
            scan.items.len(),
            scan.total
        );

        Ok(ListPage {
            total_count: scan.total,
            page_number: query.page_number,
            page_size: query.page_size,
            page_count: page_count(scan.total, query.page_size),
            items: scan.items,
        })
    }

    /// Point lookup by id.
    pub async fn get(&self, id: &str) -> Result<Record, RecordError> {
        let id = validate_id(id)?;
        let found = with_timeout(self.timeout, self.store.get(&id)).await?;
        found.ok_or(RecordError::NotFound(id))
    }
}
