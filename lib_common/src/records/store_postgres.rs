//! # PostgreSQL Record Store
//!
//! Rows live in the `animals` table. `id` is the primary key, so duplicate
//! creates fail inside the `INSERT` itself (SQLSTATE 23505) and are reported as
//! [`StoreError::Duplicate`].
//!
//! `scan` issues the page query and the count query on the same connection but
//! outside a transaction; the count can trail the page under concurrent writes.

use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::{debug, error, info};

use super::error::StoreError;
use super::model::Record;
use super::query::{ListQuery, SortColumn, SortDirection};
use super::store::{RecordStore, ScanPage};

const SELECT_COLUMNS: &str = "id, name, species, age, health_status";

/// Idempotent bootstrap DDL for the `animals` table.
pub const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS animals (
    id            TEXT PRIMARY KEY CHECK (char_length(btrim(id)) > 0),
    name          TEXT NOT NULL,
    species       TEXT NOT NULL,
    age           INTEGER NOT NULL CHECK (age >= 0),
    health_status TEXT NOT NULL CHECK (char_length(health_status) >= 3)
)";

const FILTER_SQL: &str = "name ILIKE $1 ESCAPE '\\' OR species ILIKE $1 ESCAPE '\\'";

pub struct PgRecordStore {
    pool: Pool,
}

impl PgRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the `animals` table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA_SQL).await.map_err(map_db_error)?;
        info!("Table 'animals' is ready.");
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(|e| {
            error!("Database pool error: {}", e);
            StoreError::Unavailable(e.to_string())
        })
    }
}

/// `ORDER BY` clause for an allow-listed column. Both parts come from constant tables.
/// Text columns are compared lowercased, so the order does not depend on the
/// database collation.
pub fn order_clause(column: SortColumn, direction: SortDirection) -> String {
    match column {
        SortColumn::Id => format!("id {}", direction.as_sql()),
        SortColumn::Age => format!("age {}, id ASC", direction.as_sql()),
        text => format!("LOWER({}) {}, id ASC", text.column_name(), direction.as_sql()),
    }
}

pub fn list_sql(column: SortColumn, direction: SortDirection) -> String {
    format!(
        "SELECT {} FROM animals WHERE {} ORDER BY {} LIMIT $2 OFFSET $3",
        SELECT_COLUMNS,
        FILTER_SQL,
        order_clause(column, direction)
    )
}

pub fn count_sql() -> String {
    format!("SELECT COUNT(*) FROM animals WHERE {}", FILTER_SQL)
}

/// `%term%` with LIKE metacharacters escaped, so the term matches literally.
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn map_db_error(e: tokio_postgres::Error) -> StoreError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        // The caller already knows the id; the detail is only logged.
        debug!("Unique violation: {:?}", e.as_db_error().map(|d| d.message()));
        return StoreError::Duplicate(String::new());
    }
    error!("Database error: {:?}", e);
    StoreError::Backend(e.to_string())
}

fn row_to_record(row: &Row) -> Result<Record, StoreError> {
    let field = |e: tokio_postgres::Error| StoreError::Backend(format!("unexpected row shape: {}", e));
    Ok(Record {
        id: row.try_get("id").map_err(field)?,
        name: row.try_get("name").map_err(field)?,
        species: row.try_get("species").map_err(field)?,
        age: row.try_get("age").map_err(field)?,
        health_status: row.try_get("health_status").map_err(field)?,
    })
}

impl RecordStore for PgRecordStore {
    async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM animals WHERE id = $1", SELECT_COLUMNS);
        let stmt = client.prepare_cached(&sql).await.map_err(map_db_error)?;
        let row = client.query_opt(&stmt, &[&id]).await.map_err(map_db_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert(&self, record: &Record) -> Result<Record, StoreError> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO animals (id, name, species, age, health_status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SELECT_COLUMNS
        );
        let stmt = client.prepare_cached(&sql).await.map_err(map_db_error)?;
        let row = client
            .query_one(
                &stmt,
                &[
                    &record.id,
                    &record.name,
                    &record.species,
                    &record.age,
                    &record.health_status,
                ],
            )
            .await
            .map_err(|e| match map_db_error(e) {
                StoreError::Duplicate(_) => StoreError::Duplicate(record.id.clone()),
                other => other,
            })?;
        row_to_record(&row)
    }

    async fn update(&self, record: &Record) -> Result<Option<Record>, StoreError> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE animals SET name = $1, species = $2, age = $3, health_status = $4 \
             WHERE id = $5 RETURNING {}",
            SELECT_COLUMNS
        );
        let stmt = client.prepare_cached(&sql).await.map_err(map_db_error)?;
        let row = client
            .query_opt(
                &stmt,
                &[
                    &record.name,
                    &record.species,
                    &record.age,
                    &record.health_status,
                    &record.id,
                ],
            )
            .await
            .map_err(map_db_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn delete(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let client = self.client().await?;
        let sql = format!("DELETE FROM animals WHERE id = $1 RETURNING {}", SELECT_COLUMNS);
        let stmt = client.prepare_cached(&sql).await.map_err(map_db_error)?;
        let row = client.query_opt(&stmt, &[&id]).await.map_err(map_db_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn scan(&self, query: &ListQuery) -> Result<ScanPage, StoreError> {
        let client = self.client().await?;
        let pattern = like_pattern(&query.search_term);
        let limit = i64::from(query.page_size);
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);

        let list_stmt = client
            .prepare_cached(&list_sql(query.sort_column, query.sort_direction))
            .await
            .map_err(map_db_error)?;
        let rows = client
            .query(&list_stmt, &[&pattern, &limit, &offset])
            .await
            .map_err(map_db_error)?;

        let count_stmt = client.prepare_cached(&count_sql()).await.map_err(map_db_error)?;
        let total: i64 = client
            .query_one(&count_stmt, &[&pattern])
            .await
            .map_err(map_db_error)?
            .try_get(0)
            .map_err(map_db_error)?;

        let items = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
        Ok(ScanPage {
            items,
            total: u64::try_from(total).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern(""), "%%");
        assert_eq!(like_pattern("leo"), "%leo%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn order_clause_comes_from_the_allow_list() {
        assert_eq!(order_clause(SortColumn::Id, SortDirection::Ascending), "id ASC");
        assert_eq!(
            order_clause(SortColumn::HealthStatus, SortDirection::Descending),
            "LOWER(health_status) DESC, id ASC"
        );
        assert_eq!(order_clause(SortColumn::Age, SortDirection::Ascending), "age ASC, id ASC");
        for column in SortColumn::ALL {
            let sql = list_sql(column, SortDirection::Descending);
            let (_, order) = sql.split_once("ORDER BY ").unwrap();
            assert!(order.contains(&format!("{} DESC", column.column_name())), "{}", sql);
            assert!(sql.ends_with("LIMIT $2 OFFSET $3"));
        }
    }

    #[test]
    fn count_uses_the_same_filter_as_the_page() {
        assert!(count_sql().ends_with(FILTER_SQL));
        assert!(list_sql(SortColumn::Age, SortDirection::Ascending).contains(FILTER_SQL));
    }
}
