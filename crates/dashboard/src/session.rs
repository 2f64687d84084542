use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use datapilot_contracts::{LogEntry, PipelineStep, SessionState};

/// In-memory pipeline session registry. Records are created lazily on first
/// reference and live for the life of the process; there is no eviction, so
/// memory grows with the number of distinct session ids.
///
/// Concurrency discipline: one mutex around the whole map, held only for the
/// duration of a single read or append (never across an await point). Within
/// one session id, clients are expected to issue requests serially; two
/// concurrent stage calls for the same id interleave their appends in either
/// order and the step counter is last-writer-wins.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionState>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the session record, inserting a fresh one (step counter 0,
    /// empty step and log sequences) if the id is unknown. Any string is
    /// accepted as a key.
    pub fn get_or_create(&self, session_id: &str) -> SessionState {
        let mut inner = self.lock();
        inner
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
            .clone()
    }

    /// Appends a step to the session's sequence, creating the record first if
    /// needed. Ordering is never validated: a later stage can be recorded
    /// before an earlier one, and `current_step` is simply overwritten with
    /// the supplied value. `owner` is only recorded when this call creates
    /// the session.
    pub fn record_step(
        &self,
        session_id: &str,
        step: PipelineStep,
        current_step: u32,
        file_id: Option<String>,
        owner: Option<&str>,
    ) {
        let mut inner = self.lock();
        let state = inner.entry(session_id.to_string()).or_insert_with(|| {
            let mut state = SessionState::new(session_id);
            state.user_id = owner.map(str::to_string);
            state
        });

        state.steps.push(step);
        state.current_step = current_step;
        if let Some(file_id) = file_id {
            state.current_file_id = Some(file_id);
        }
    }

    /// Mirrors a broadcast log line into the session's log sequence. Unknown
    /// session ids are ignored; log lines do not create sessions.
    pub fn append_log(&self, session_id: &str, entry: LogEntry) {
        let mut inner = self.lock();
        if let Some(state) = inner.get_mut(session_id) {
            state.logs.push(entry);
        }
    }

    pub fn owner(&self, session_id: &str) -> Option<String> {
        self.lock()
            .get(session_id)
            .and_then(|state| state.user_id.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
