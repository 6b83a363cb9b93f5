use datapilot_core::{ColumnInfo, SchemaSnapshot, TableInfo};
use sqlx::Row;

use crate::{DbError, DbPool};

/// Reads table and view metadata from `sqlite_master`, skipping SQLite's
/// internal tables and the migration bookkeeping table.
pub async fn load_snapshot(pool: &DbPool) -> Result<SchemaSnapshot, DbError> {
    let objects = sqlx::query(
        "SELECT name, type
         FROM sqlite_master
         WHERE type IN ('table', 'view')
           AND name NOT LIKE 'sqlite_%'
           AND name <> '_sqlx_migrations'
         ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut tables = Vec::with_capacity(objects.len());
    for object in objects {
        let name: String = object.try_get("name")?;
        let is_view = object.try_get::<String, _>("type")? == "view";

        let columns = sqlx::query("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
            .bind(&name)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    data_type: row.try_get("type")?,
                    primary_key: row.try_get::<i64, _>("pk")? > 0,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let row_count = if is_view {
            None
        } else {
            let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&name));
            let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
            Some(count)
        };

        tables.push(TableInfo { name, is_view, columns, row_count });
    }

    Ok(SchemaSnapshot::new(tables))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
