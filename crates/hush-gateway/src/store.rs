use hush_db::Database;
use hush_db::models::OfflineMessageRow;

/// One queued message owed to `owner`.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineRecord {
    pub id: i64,
    pub owner: String,
    pub payload: String,
}

impl From<OfflineMessageRow> for OfflineRecord {
    fn from(row: OfflineMessageRow) -> Self {
        Self {
            id: row.id,
            owner: row.owner,
            payload: row.payload,
        }
    }
}

/// Durable per-recipient queue backing store-and-forward.
///
/// Methods block; async callers run them on `spawn_blocking`.
pub trait OfflineStore: Send + Sync + 'static {
    fn append(&self, owner: &str, payload: &str) -> anyhow::Result<i64>;

    /// Oldest first.
    fn list_by_owner(&self, owner: &str) -> anyhow::Result<Vec<OfflineRecord>>;

    fn delete_batch(&self, ids: &[i64]) -> anyhow::Result<()>;
}

impl OfflineStore for Database {
    fn append(&self, owner: &str, payload: &str) -> anyhow::Result<i64> {
        self.insert_offline_message(owner, payload)
    }

    fn list_by_owner(&self, owner: &str) -> anyhow::Result<Vec<OfflineRecord>> {
        Ok(self
            .get_offline_messages(owner)?
            .into_iter()
            .map(OfflineRecord::from)
            .collect())
    }

    fn delete_batch(&self, ids: &[i64]) -> anyhow::Result<()> {
        self.delete_offline_messages(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_backs_the_store() {
        let db = Database::open_in_memory().unwrap();
        let store: &dyn OfflineStore = &db;

        let r1 = store.append("B", "one").unwrap();
        let r2 = store.append("B", "two").unwrap();

        let records = store.list_by_owner("B").unwrap();
        assert_eq!(
            records,
            vec![
                OfflineRecord { id: r1, owner: "B".into(), payload: "one".into() },
                OfflineRecord { id: r2, owner: "B".into(), payload: "two".into() },
            ]
        );

        store.delete_batch(&[r1, r2]).unwrap();
        assert!(store.list_by_owner("B").unwrap().is_empty());
    }
}
