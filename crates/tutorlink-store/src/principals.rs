//! CRUD operations for [`PrincipalRecord`] rows.

use chrono::{DateTime, Utc};
use rusqlite::params;

use tutorlink_shared::PrincipalId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::PrincipalRecord;

impl Database {
    /// Insert or replace a principal record in `collection`.
    pub fn upsert_principal(&self, collection: &str, record: &PrincipalRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO principals (collection, id, display_name, avatar_url, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (collection, id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_url   = excluded.avatar_url,
                updated_at   = excluded.updated_at",
            params![
                collection,
                record.id.as_str(),
                record.display_name,
                record.avatar_url,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a principal record from one collection.
    pub fn get_principal(&self, collection: &str, id: &PrincipalId) -> Result<PrincipalRecord> {
        self.conn()
            .query_row(
                "SELECT id, display_name, avatar_url, updated_at
                 FROM principals
                 WHERE collection = ?1 AND id = ?2",
                params![collection, id.as_str()],
                row_to_principal,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("{collection}/{id}"))
                }
                other => StoreError::Sqlite(other),
            })
    }

    /// List all principals in a collection, ordered by id.
    pub fn list_principals(&self, collection: &str) -> Result<Vec<PrincipalRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, avatar_url, updated_at
             FROM principals
             WHERE collection = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![collection], row_to_principal)?;

        let mut principals = Vec::new();
        for row in rows {
            principals.push(row?);
        }
        Ok(principals)
    }
}

fn row_to_principal(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrincipalRecord> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let avatar_url: Option<String> = row.get(2)?;
    let updated_str: String = row.get(3)?;

    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(PrincipalRecord {
        id: PrincipalId(id),
        display_name,
        avatar_url,
        updated_at,
    })
}
