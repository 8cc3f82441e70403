/// Database row types — these map directly to SQLite rows.

/// A message owed to `owner`, queued because live delivery was not possible.
/// `payload` is the serialized envelope exactly as it would have been sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineMessageRow {
    pub id: i64,
    pub owner: String,
    pub payload: String,
    pub created_at: String,
}
