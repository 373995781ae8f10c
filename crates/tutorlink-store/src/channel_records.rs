//! CRUD operations for [`ChannelRecord`] rows and their membership.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, Connection};

use tutorlink_shared::{ChannelClass, ChannelKey, ChannelRecord, PrincipalId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace a channel record together with its member set.
    pub fn upsert_channel_record(&self, record: &ChannelRecord) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let class = record.key.class.as_str();
        tx.execute(
            "INSERT INTO channel_records
                (class, id, display_name, description, avatar_url, owner_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (class, id) DO UPDATE SET
                display_name = excluded.display_name,
                description  = excluded.description,
                avatar_url   = excluded.avatar_url,
                owner_id     = excluded.owner_id,
                updated_at   = excluded.updated_at",
            params![
                class,
                record.key.id,
                record.display_name,
                record.description,
                record.avatar_url,
                record.owner_id.as_ref().map(PrincipalId::as_str),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.execute(
            "DELETE FROM channel_members WHERE class = ?1 AND channel_id = ?2",
            params![class, record.key.id],
        )?;
        for member in &record.member_ids {
            tx.execute(
                "INSERT INTO channel_members (class, channel_id, member_id) VALUES (?1, ?2, ?3)",
                params![class, record.key.id, member.as_str()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete a channel record.  Returns `true` if a row was deleted.
    pub fn delete_channel_record(&self, key: &ChannelKey) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM channel_records WHERE class = ?1 AND id = ?2",
            params![key.class.as_str(), key.id],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a channel record by key.
    pub fn get_channel_record(&self, key: &ChannelKey) -> Result<ChannelRecord> {
        let conn = self.conn();
        load_record(&conn, key)
    }

    /// List every record of one channel class, ordered by id.
    pub fn list_channel_records(&self, class: ChannelClass) -> Result<Vec<ChannelRecord>> {
        let conn = self.conn();
        let ids: Vec<String> = {
            let mut stmt =
                conn.prepare("SELECT id FROM channel_records WHERE class = ?1 ORDER BY id ASC")?;
            let rows = stmt.query_map(params![class.as_str()], |row| row.get(0))?;
            let ids = rows.collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        ids.into_iter()
            .map(|id| load_record(&conn, &ChannelKey::new(class, id)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_record(conn: &Connection, key: &ChannelKey) -> Result<ChannelRecord> {
    let class = key.class.as_str();

    let (display_name, description, avatar_url, owner_id) = conn
        .query_row(
            "SELECT display_name, description, avatar_url, owner_id
             FROM channel_records
             WHERE class = ?1 AND id = ?2",
            params![class, key.id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("{}/{}", key.class.collection(), key.id))
            }
            other => StoreError::Sqlite(other),
        })?;

    let mut stmt = conn.prepare(
        "SELECT member_id FROM channel_members WHERE class = ?1 AND channel_id = ?2",
    )?;
    let member_ids = stmt
        .query_map(params![class, key.id], |row| row.get::<_, String>(0))?
        .map(|row| row.map(PrincipalId))
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    Ok(ChannelRecord {
        key: key.clone(),
        display_name,
        description,
        avatar_url,
        member_ids,
        owner_id: owner_id.map(PrincipalId),
    })
}
