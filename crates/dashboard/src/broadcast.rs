use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use datapilot_contracts::{LogEntry, LogLevel};
use tokio::sync::mpsc;

/// Tracks at most one live log connection per session id. A second `connect`
/// for the same id overwrites the first; the overwritten channel closes and
/// its socket task winds down on its own.
#[derive(Clone, Default)]
pub struct LogBroadcaster {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<String, Connection>,
    next_conn_id: u64,
}

struct Connection {
    conn_id: u64,
    tx: mpsc::UnboundedSender<LogEntry>,
}

/// Receiving half handed to the socket task. `conn_id` identifies this
/// particular registration so a replaced connection cannot evict its
/// replacement on cleanup.
pub struct LogReceiver {
    pub conn_id: u64,
    pub rx: mpsc::UnboundedReceiver<LogEntry>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn connect(&self, session_id: &str) -> LogReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        inner.next_conn_id += 1;
        let conn_id = inner.next_conn_id;
        inner
            .connections
            .insert(session_id.to_string(), Connection { conn_id, tx });
        LogReceiver { conn_id, rx }
    }

    /// Removes the registration only if it still belongs to `conn_id`.
    pub fn disconnect(&self, session_id: &str, conn_id: u64) {
        let mut inner = self.lock();
        if inner
            .connections
            .get(session_id)
            .is_some_and(|conn| conn.conn_id == conn_id)
        {
            inner.connections.remove(session_id);
        }
    }

    /// Pushes a log line to the session's live connection, if one is open.
    /// A closed channel tears down the registration and the message is
    /// silently dropped — the only failure policy. The constructed entry is
    /// returned either way so callers can mirror it elsewhere.
    pub fn send(&self, session_id: &str, level: LogLevel, message: &str) -> LogEntry {
        let entry = LogEntry::new(session_id, level, message);

        let mut inner = self.lock();
        let delivered = match inner.connections.get(session_id) {
            Some(conn) => conn.tx.send(entry.clone()).is_ok(),
            None => return entry,
        };
        if !delivered {
            inner.connections.remove(session_id);
        }

        entry
    }

    pub fn active(&self) -> usize {
        self.lock().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_the_live_connection() {
        let broadcaster = LogBroadcaster::new();
        let mut conn = broadcaster.connect("s");

        broadcaster.send("s", LogLevel::Success, "done");

        let entry = conn.rx.recv().await.unwrap();
        assert_eq!(entry.message, "done");
        assert_eq!(entry.session_id, "s");
    }

    #[test]
    fn send_without_a_connection_still_returns_the_entry() {
        let broadcaster = LogBroadcaster::new();
        let entry = broadcaster.send("nobody", LogLevel::Info, "hello");
        assert_eq!(entry.message, "hello");
        assert_eq!(broadcaster.active(), 0);
    }

    #[test]
    fn closed_receiver_tears_down_the_registration() {
        let broadcaster = LogBroadcaster::new();
        let conn = broadcaster.connect("s");
        drop(conn);

        broadcaster.send("s", LogLevel::Info, "anyone there");
        assert_eq!(broadcaster.active(), 0);
    }

    #[tokio::test]
    async fn second_connect_overwrites_the_first() {
        let broadcaster = LogBroadcaster::new();
        let mut first = broadcaster.connect("s");
        let mut second = broadcaster.connect("s");

        assert_eq!(broadcaster.active(), 1);
        // The first connection's channel is closed by the overwrite.
        assert!(first.rx.recv().await.is_none());

        broadcaster.send("s", LogLevel::Info, "to the second");
        assert_eq!(second.rx.recv().await.unwrap().message, "to the second");
    }

    #[test]
    fn orphaned_connection_cleanup_cannot_evict_its_replacement() {
        let broadcaster = LogBroadcaster::new();
        let first = broadcaster.connect("s");
        let _second = broadcaster.connect("s");

        broadcaster.disconnect("s", first.conn_id);
        assert_eq!(broadcaster.active(), 1);
    }

    #[test]
    fn disconnect_removes_the_current_registration() {
        let broadcaster = LogBroadcaster::new();
        let conn = broadcaster.connect("s");
        broadcaster.disconnect("s", conn.conn_id);
        assert_eq!(broadcaster.active(), 0);
    }
}
