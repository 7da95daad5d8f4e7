use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ACTIVITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("activity");

/// Keeps at most this many entries; older ones are pruned on insert.
const MAX_ENTRIES: usize = 500;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub kind: String,
    pub message: String,
    pub created_at: u64,
}

/// Human-readable log of indexing passes, kept in the catalog database.
#[derive(Clone)]
pub struct ActivityStore {
    db: Arc<Database>,
}

impl ActivityStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn init_tables(&self) -> Result<(), String> {
        let write_txn = self.db.begin_write().map_err(|e| e.to_string())?;
        let _ = write_txn
            .open_table(ACTIVITY_TABLE)
            .map_err(|e| e.to_string())?;
        write_txn.commit().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn add_event(&self, kind: &str, message: impl Into<String>) -> Result<(), String> {
        let created_at = now_millis();
        // Zero-padded so keys sort by time.
        let id = format!("{:020}-{}", created_at, Uuid::new_v4());
        let entry = ActivityEntry {
            id: id.clone(),
            kind: kind.to_string(),
            message: message.into(),
            created_at,
        };
        let bytes = bincode::serialize(&entry).map_err(|e| e.to_string())?;
        let write_txn = self.db.begin_write().map_err(|e| e.to_string())?;
        {
            let mut table = write_txn
                .open_table(ACTIVITY_TABLE)
                .map_err(|e| e.to_string())?;
            table
                .insert(id.as_str(), bytes.as_slice())
                .map_err(|e| e.to_string())?;

            let total = table.len().map_err(|e| e.to_string())? as usize;
            if total > MAX_ENTRIES {
                let mut stale = Vec::with_capacity(total - MAX_ENTRIES);
                for item in table.iter().map_err(|e| e.to_string())?.take(total - MAX_ENTRIES) {
                    let item = item.map_err(|e| e.to_string())?;
                    stale.push(item.0.value().to_string());
                }
                for key in stale {
                    table.remove(key.as_str()).map_err(|e| e.to_string())?;
                }
            }
        }
        write_txn.commit().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Newest first.
    pub fn list_events(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ActivityEntry>, usize), String> {
        let read_txn = self.db.begin_read().map_err(|e| e.to_string())?;
        let table = match read_txn.open_table(ACTIVITY_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok((Vec::new(), 0)),
            Err(err) => return Err(err.to_string()),
        };

        let mut all = Vec::new();
        for entry in table.iter().map_err(|err| err.to_string())? {
            let entry = entry.map_err(|err| err.to_string())?;
            let item: ActivityEntry =
                bincode::deserialize(entry.1.value()).map_err(|err| err.to_string())?;
            all.push(item);
        }
        all.reverse();
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Ok((items, total))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as u64)
        .unwrap_or(0)
}
