use crate::Database;
use crate::models::OfflineMessageRow;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Offline messages --

    /// Queue a payload for `owner`. Returns the new row id; ids grow
    /// monotonically, so id order is creation order.
    pub fn insert_offline_message(&self, owner: &str, payload: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO offline_messages (owner, payload) VALUES (?1, ?2)",
                (owner, payload),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Everything queued for `owner`, oldest first.
    pub fn get_offline_messages(&self, owner: &str) -> Result<Vec<OfflineMessageRow>> {
        self.with_conn(|conn| query_offline_messages(conn, owner))
    }

    /// Delete a batch of queued rows in one transaction.
    pub fn delete_offline_messages(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM offline_messages WHERE id = ?1")?;
                for id in ids {
                    stmt.execute([id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn count_offline_messages(&self, owner: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM offline_messages WHERE owner = ?1",
                [owner],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

fn query_offline_messages(conn: &Connection, owner: &str) -> Result<Vec<OfflineMessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner, payload, created_at
         FROM offline_messages
         WHERE owner = ?1
         ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map([owner], |row| {
            Ok(OfflineMessageRow {
                id: row.get(0)?,
                owner: row.get(1)?,
                payload: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
