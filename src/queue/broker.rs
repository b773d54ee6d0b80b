use crate::config::{BrokerKind, QueueConfig};
use crate::error::{Result, TagmarkError};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Named FIFO lists with an atomic move between two lists
pub trait Broker: Send + Sync {
    /// Append `payload` to the tail of `list`
    fn push(&self, list: &str, payload: &str) -> Result<()>;

    /// Atomically take the head of `from` and append it to `to`, waiting up
    /// to `wait` for `from` to become non-empty
    fn move_next(&self, from: &str, to: &str, wait: Duration) -> Result<Option<String>>;

    /// Remove the first occurrence of `payload` from `list`
    fn remove(&self, list: &str, payload: &str) -> Result<bool>;

    fn len(&self, list: &str) -> Result<usize>;

    /// Contents of `list`, head first
    fn items(&self, list: &str) -> Result<Vec<String>>;
}

/// Broker selected by configuration
pub fn open_broker(config: &QueueConfig) -> Result<Arc<dyn Broker>> {
    Ok(match config.broker {
        BrokerKind::Memory => Arc::new(MemoryBroker::new()),
        BrokerKind::Sqlite => Arc::new(SqliteBroker::open(
            &config.path,
            Duration::from_millis(config.poll_interval_ms),
        )?),
    })
}

/// In-process broker
#[derive(Default)]
pub struct MemoryBroker {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    ready: Condvar,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VecDeque<String>>>> {
        self.lists
            .lock()
            .map_err(|_| TagmarkError::Broker("memory broker lock poisoned".into()))
    }
}

impl Broker for MemoryBroker {
    fn push(&self, list: &str, payload: &str) -> Result<()> {
        self.lock()?
            .entry(list.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.ready.notify_all();
        Ok(())
    }

    fn move_next(&self, from: &str, to: &str, wait: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + wait;
        let mut lists = self.lock()?;
        loop {
            if let Some(payload) = lists.get_mut(from).and_then(VecDeque::pop_front) {
                lists
                    .entry(to.to_string())
                    .or_default()
                    .push_back(payload.clone());
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            lists = self
                .ready
                .wait_timeout(lists, deadline - now)
                .map_err(|_| TagmarkError::Broker("memory broker lock poisoned".into()))?
                .0;
        }
    }

    fn remove(&self, list: &str, payload: &str) -> Result<bool> {
        let mut lists = self.lock()?;
        let Some(items) = lists.get_mut(list) else {
            return Ok(false);
        };
        match items.iter().position(|p| p == payload) {
            Some(pos) => {
                items.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn len(&self, list: &str) -> Result<usize> {
        Ok(self.lock()?.get(list).map_or(0, VecDeque::len))
    }

    fn items(&self, list: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .get(list)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }
}

/// Durable broker in a SQLite file; several processes may share the file
pub struct SqliteBroker {
    conn: Mutex<Connection>,
    poll: Duration,
}

impl SqliteBroker {
    pub fn open(path: &Path, poll: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Self::setup(Connection::open(path)?, poll)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory()?, Duration::from_millis(10))
    }

    fn setup(conn: Connection, poll: Duration) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue_items (
                id integer PRIMARY KEY AUTOINCREMENT,
                list text NOT NULL,
                payload text NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_items_list ON queue_items(list, id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            poll: poll.max(Duration::from_millis(1)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TagmarkError::Broker("sqlite broker lock poisoned".into()))
    }

    fn try_move(&self, from: &str, to: &str) -> Result<Option<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, payload FROM queue_items WHERE list = ?1 ORDER BY id LIMIT 1",
                [from],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((id, payload)) = head else {
            return Ok(None);
        };
        tx.execute("DELETE FROM queue_items WHERE id = ?1", [id])?;
        tx.execute(
            "INSERT INTO queue_items (list, payload) VALUES (?1, ?2)",
            (to, &payload),
        )?;
        tx.commit()?;
        Ok(Some(payload))
    }
}

impl Broker for SqliteBroker {
    fn push(&self, list: &str, payload: &str) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO queue_items (list, payload) VALUES (?1, ?2)",
            (list, payload),
        )?;
        Ok(())
    }

    fn move_next(&self, from: &str, to: &str, wait: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(payload) = self.try_move(from, to)? {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.poll.min(deadline - now));
        }
    }

    fn remove(&self, list: &str, payload: &str) -> Result<bool> {
        let removed = self.lock()?.execute(
            "DELETE FROM queue_items WHERE id =
                (SELECT id FROM queue_items WHERE list = ?1 AND payload = ?2 ORDER BY id LIMIT 1)",
            (list, payload),
        )?;
        Ok(removed > 0)
    }

    fn len(&self, list: &str) -> Result<usize> {
        let count: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM queue_items WHERE list = ?1",
            [list],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn items(&self, list: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM queue_items WHERE list = ?1 ORDER BY id")?;
        let items = stmt
            .query_map([list], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(items)
    }
}
