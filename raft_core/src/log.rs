//! C10: persistent log adapter (spec §6, "Persistent log (adapter
//! contract)").
//!
//! The core treats durability as delegated (spec §1 Non-goals), but it
//! still needs a concrete adapter to drive the state machine and the tests
//! against. `InMemoryLog` is the default used throughout this crate's own
//! tests; `FileBackedLog` generalizes the teacher's `default_storage.rs`
//! (which only ever persisted the election record) to also persist the log
//! entries themselves via the same `bincode` WAL framing.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bincode::Options;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::error::{RaftError, RaftResult};
use crate::types::{LogCommand, LogEntry, LogIndex, ServerId, TermIndex};

#[async_trait]
pub trait PersistentLog<C: LogCommand>: Send + Sync {
    async fn term(&self) -> TermIndex;
    async fn set_term(&self, term: TermIndex) -> RaftResult<()>;

    async fn last_entry_index(&self) -> LogIndex;
    async fn last_committed_entry_index(&self) -> LogIndex;

    /// The earliest index the log still holds an entry for -- the
    /// snapshot boundary after the most recent `append_snapshot` (or `0`
    /// if nothing has ever been compacted). A replicator whose `nextIndex`
    /// falls at or below this must switch to `InstallSnapshot` (spec §4.4,
    /// "Per-follower Replicator state machine").
    async fn first_entry_index(&self) -> LogIndex;

    async fn is_voted_for(&self, candidate: ServerId) -> bool;
    async fn update_voted_for(&self, candidate: ServerId) -> RaftResult<()>;

    /// Persists `term + 1` and records a self-vote in one durable write
    /// (spec: "incrementTerm ... sets votedFor = localMemberId").
    async fn increment_term(&self, local_member_id: ServerId) -> RaftResult<TermIndex>;

    async fn append_entry(&self, entry: LogEntry<C>) -> RaftResult<LogIndex>;

    /// Appends `entries` starting at `start_index`, optionally skipping
    /// entries already committed locally (the leader may resend a range
    /// after a previous round's follower failure -- spec §4.8 step 3).
    async fn append_entries(
        &self,
        entries: Vec<LogEntry<C>>,
        start_index: LogIndex,
        skip_committed: bool,
    ) -> RaftResult<()>;

    /// Atomically replaces the log prefix up to `snapshot_index` with a
    /// single snapshot marker entry (spec §4.9 step 3).
    async fn append_snapshot(&self, snapshot: Vec<u8>, snapshot_index: LogIndex) -> RaftResult<()>;

    async fn append_and_commit(
        &self,
        entries: Vec<LogEntry<C>>,
        start_index: LogIndex,
        skip_committed: bool,
        commit_index: LogIndex,
    ) -> RaftResult<usize>;

    /// Commits every entry up to and including `up_to`, returning the
    /// number of newly committed entries.
    async fn commit(&self, up_to: LogIndex) -> RaftResult<usize>;

    async fn contains(&self, index: LogIndex, term: TermIndex) -> bool;

    /// Standard Raft "up to date" comparison (spec §4.7): higher last-term
    /// wins; on tie, the longer log wins.
    async fn is_up_to_date(&self, index: LogIndex, term: TermIndex) -> bool;

    async fn get_term(&self, index: LogIndex) -> Option<TermIndex>;

    /// Suspends until `index` has been committed.
    async fn wait_for_commit(&self, index: LogIndex);

    /// Appends a no-op entry at the current term, used on leader election
    /// to establish commit progress and lease validity (spec §4.1).
    async fn append_no_op_entry(&self) -> RaftResult<LogIndex>;
}

struct InMemoryLogState<C: LogCommand> {
    term: TermIndex,
    voted_for: Option<(TermIndex, ServerId)>,
    entries: VecDeque<LogEntry<C>>,
    base_index: LogIndex,
    committed_index: LogIndex,
}

/// A non-durable log used by the crate's own tests and as a default for
/// embedders who provide their own durability elsewhere.
pub struct InMemoryLog<C: LogCommand> {
    state: Mutex<InMemoryLogState<C>>,
    commit_notify: Notify,
}

impl<C: LogCommand> InMemoryLog<C> {
    pub fn new() -> Arc<Self> {
        Self::with_term(TermIndex(0))
    }

    pub fn with_term(term: TermIndex) -> Arc<Self> {
        Arc::new(InMemoryLog {
            state: Mutex::new(InMemoryLogState {
                term,
                voted_for: None,
                entries: VecDeque::new(),
                base_index: LogIndex(0),
                committed_index: LogIndex(0),
            }),
            commit_notify: Notify::new(),
        })
    }

    fn entry_at<'a>(
        state: &'a InMemoryLogState<C>,
        index: LogIndex,
    ) -> Option<&'a LogEntry<C>> {
        if index.0 <= state.base_index.0 {
            return None;
        }
        let offset = (index.0 - state.base_index.0 - 1) as usize;
        state.entries.get(offset)
    }
}

#[async_trait]
impl<C: LogCommand> PersistentLog<C> for InMemoryLog<C> {
    async fn term(&self) -> TermIndex {
        self.state.lock().await.term
    }

    async fn set_term(&self, term: TermIndex) -> RaftResult<()> {
        let mut state = self.state.lock().await;
        state.term = term;
        state.voted_for = None;
        Ok(())
    }

    async fn last_entry_index(&self) -> LogIndex {
        let state = self.state.lock().await;
        state.base_index.0.checked_add(state.entries.len() as u64).map(LogIndex).unwrap()
    }

    async fn last_committed_entry_index(&self) -> LogIndex {
        self.state.lock().await.committed_index
    }

    async fn first_entry_index(&self) -> LogIndex {
        self.state.lock().await.base_index
    }

    async fn is_voted_for(&self, candidate: ServerId) -> bool {
        let state = self.state.lock().await;
        match state.voted_for {
            Some((term, voted)) => term == state.term && voted == candidate,
            None => true,
        }
    }

    async fn update_voted_for(&self, candidate: ServerId) -> RaftResult<()> {
        let mut state = self.state.lock().await;
        let term = state.term;
        state.voted_for = Some((term, candidate));
        Ok(())
    }

    async fn increment_term(&self, local_member_id: ServerId) -> RaftResult<TermIndex> {
        let mut state = self.state.lock().await;
        state.term = state.term.next();
        state.voted_for = Some((state.term, local_member_id));
        Ok(state.term)
    }

    async fn append_entry(&self, entry: LogEntry<C>) -> RaftResult<LogIndex> {
        let mut state = self.state.lock().await;
        let index = entry.index;
        state.entries.push_back(entry);
        Ok(index)
    }

    async fn append_entries(
        &self,
        entries: Vec<LogEntry<C>>,
        start_index: LogIndex,
        skip_committed: bool,
    ) -> RaftResult<()> {
        let mut state = self.state.lock().await;
        for entry in entries {
            if skip_committed && entry.index.0 <= state.committed_index.0 {
                continue;
            }
            let offset = entry.index.0.saturating_sub(state.base_index.0 + 1) as usize;
            if offset < state.entries.len() {
                // Truncate conflicting suffix before re-appending (log matching).
                state.entries.truncate(offset);
            }
            debug_assert_eq!(state.entries.len() as u64, offset as u64);
            state.entries.push_back(entry);
        }
        Ok(())
    }

    async fn append_snapshot(&self, _snapshot: Vec<u8>, snapshot_index: LogIndex) -> RaftResult<()> {
        let mut state = self.state.lock().await;
        // Drop everything at or below the snapshot boundary and replace it
        // with the implicit snapshot marker encoded as the new base index.
        let keep_from = snapshot_index.0.saturating_sub(state.base_index.0) as usize;
        if keep_from < state.entries.len() {
            state.entries.drain(0..keep_from);
        } else {
            state.entries.clear();
        }
        state.base_index = snapshot_index;
        if state.committed_index.0 < snapshot_index.0 {
            state.committed_index = snapshot_index;
            self.commit_notify.notify_waiters();
        }
        Ok(())
    }

    async fn append_and_commit(
        &self,
        entries: Vec<LogEntry<C>>,
        start_index: LogIndex,
        skip_committed: bool,
        commit_index: LogIndex,
    ) -> RaftResult<usize> {
        self.append_entries(entries, start_index, skip_committed).await?;
        self.commit(commit_index).await
    }

    async fn commit(&self, up_to: LogIndex) -> RaftResult<usize> {
        let mut state = self.state.lock().await;
        let last = state.base_index.0.checked_add(state.entries.len() as u64).unwrap();
        let target = up_to.0.min(last);
        if target <= state.committed_index.0 {
            return Ok(0);
        }
        let newly_committed = (target - state.committed_index.0) as usize;
        state.committed_index = LogIndex(target);
        drop(state);
        self.commit_notify.notify_waiters();
        Ok(newly_committed)
    }

    async fn contains(&self, index: LogIndex, term: TermIndex) -> bool {
        if index.0 == 0 {
            return true;
        }
        let state = self.state.lock().await;
        if index == state.base_index {
            // Snapshot boundary: term is implicitly satisfied.
            return true;
        }
        match Self::entry_at(&state, index) {
            Some(entry) => entry.term == term,
            None => false,
        }
    }

    async fn is_up_to_date(&self, index: LogIndex, term: TermIndex) -> bool {
        let state = self.state.lock().await;
        let my_last_index = state.last_index();
        let my_last_term = Self::entry_at(&state, my_last_index).map(|e| e.term).unwrap_or(TermIndex(0));
        if term != my_last_term {
            term > my_last_term
        } else {
            index.0 >= my_last_index.0
        }
    }

    async fn get_term(&self, index: LogIndex) -> Option<TermIndex> {
        let state = self.state.lock().await;
        if index == state.base_index {
            return Some(TermIndex(0));
        }
        Self::entry_at(&state, index).map(|e| e.term)
    }

    async fn wait_for_commit(&self, index: LogIndex) {
        loop {
            let notified = self.commit_notify.notified();
            if self.state.lock().await.committed_index.0 >= index.0 {
                return;
            }
            notified.await;
        }
    }

    async fn append_no_op_entry(&self) -> RaftResult<LogIndex> {
        let mut state = self.state.lock().await;
        let term = state.term;
        let index =
            LogIndex(state.base_index.0.checked_add(state.entries.len() as u64).unwrap().saturating_add(1));
        state.entries.push_back(LogEntry::no_op(index, term));
        Ok(index)
    }
}

impl<C: LogCommand> InMemoryLogState<C> {
    fn last_index(&self) -> LogIndex {
        LogIndex(self.base_index.0.checked_add(self.entries.len() as u64).unwrap())
    }
}

/// On-disk election record, persisted the way the teacher's
/// `DefaultPersistentStorage` does (a fixed-size bincode record, rewritten
/// and fsynced on every durable write).
#[derive(Debug, Serialize, Deserialize)]
struct ElectionRecord {
    current_term: TermIndex,
    voted_for: Option<(TermIndex, ServerId)>,
}

type WalBincodeOptions = bincode::config::WithOtherEndian<
    bincode::config::WithOtherIntEncoding<
        bincode::config::WithOtherTrailing<
            bincode::config::WithOtherLimit<bincode::config::DefaultOptions, bincode::config::Bounded>,
            bincode::config::RejectTrailing,
        >,
        bincode::config::VarintEncoding,
    >,
    bincode::config::LittleEndian,
>;

fn election_bincode() -> WalBincodeOptions {
    bincode::DefaultOptions::new()
        .with_limit(std::mem::size_of::<ElectionRecord>() as u64 * 4)
        .reject_trailing_bytes()
        .with_varint_encoding()
        .with_little_endian()
}

/// Durable election state plus an in-memory log tail, generalizing the
/// teacher's `DefaultPersistentStorage<C>` (which only ever persisted the
/// election record and left log append/commit as `todo!()`).
pub struct FileBackedLog<C: LogCommand> {
    election: Mutex<ElectionRecord>,
    election_writer: Mutex<BufWriter<File>>,
    tail: Arc<InMemoryLog<C>>,
}

impl<C: LogCommand> FileBackedLog<C> {
    pub fn open(log_dir: &Path) -> RaftResult<Arc<Self>> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join("election");
        let existed = path.exists();
        let file = File::options().create(true).read(true).write(true).open(&path)?;
        let record_size = std::mem::size_of::<ElectionRecord>() as u64 * 4;
        file.set_len(record_size)?;
        let reader_file = file.try_clone()?;
        let mut writer = BufWriter::new(file);

        let record = if existed {
            election_bincode()
                .deserialize_from(BufReader::new(reader_file))
                .map_err(|e| RaftError::Serde(e.to_string()))?
        } else {
            let record = ElectionRecord { current_term: TermIndex(0), voted_for: None };
            Self::write_record(&record, &mut writer)?;
            writer.flush()?;
            record
        };

        // Seed the in-memory tail's term from the durable record so the two
        // stay consistent immediately after recovery.
        let tail = InMemoryLog::with_term(record.current_term);

        Ok(Arc::new(FileBackedLog {
            election: Mutex::new(record),
            election_writer: Mutex::new(writer),
            tail,
        }))
    }

    fn write_record(record: &ElectionRecord, writer: &mut BufWriter<File>) -> RaftResult<()> {
        writer.rewind()?;
        election_bincode()
            .serialize_into(writer, record)
            .map_err(|e| RaftError::Serde(e.to_string()))?;
        Ok(())
    }

    async fn sync(&self) -> RaftResult<()> {
        let record = self.election.lock().await;
        let mut writer = self.election_writer.lock().await;
        Self::write_record(&record, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<C: LogCommand> PersistentLog<C> for FileBackedLog<C> {
    async fn term(&self) -> TermIndex {
        self.election.lock().await.current_term
    }

    async fn set_term(&self, term: TermIndex) -> RaftResult<()> {
        {
            let mut record = self.election.lock().await;
            record.current_term = term;
            record.voted_for = None;
        }
        self.tail.set_term(term).await?;
        self.sync().await
    }

    async fn last_entry_index(&self) -> LogIndex {
        self.tail.last_entry_index().await
    }

    async fn last_committed_entry_index(&self) -> LogIndex {
        self.tail.last_committed_entry_index().await
    }

    async fn first_entry_index(&self) -> LogIndex {
        self.tail.first_entry_index().await
    }

    async fn is_voted_for(&self, candidate: ServerId) -> bool {
        let record = self.election.lock().await;
        match record.voted_for {
            Some((term, voted)) => term == record.current_term && voted == candidate,
            None => true,
        }
    }

    async fn update_voted_for(&self, candidate: ServerId) -> RaftResult<()> {
        {
            let mut record = self.election.lock().await;
            let term = record.current_term;
            record.voted_for = Some((term, candidate));
        }
        self.sync().await
    }

    async fn increment_term(&self, local_member_id: ServerId) -> RaftResult<TermIndex> {
        let new_term = {
            let mut record = self.election.lock().await;
            record.current_term = record.current_term.next();
            record.voted_for = Some((record.current_term, local_member_id));
            record.current_term
        };
        self.tail.set_term(new_term).await?;
        self.sync().await?;
        Ok(new_term)
    }

    async fn append_entry(&self, entry: LogEntry<C>) -> RaftResult<LogIndex> {
        self.tail.append_entry(entry).await
    }

    async fn append_entries(
        &self,
        entries: Vec<LogEntry<C>>,
        start_index: LogIndex,
        skip_committed: bool,
    ) -> RaftResult<()> {
        self.tail.append_entries(entries, start_index, skip_committed).await
    }

    async fn append_snapshot(&self, snapshot: Vec<u8>, snapshot_index: LogIndex) -> RaftResult<()> {
        self.tail.append_snapshot(snapshot, snapshot_index).await
    }

    async fn append_and_commit(
        &self,
        entries: Vec<LogEntry<C>>,
        start_index: LogIndex,
        skip_committed: bool,
        commit_index: LogIndex,
    ) -> RaftResult<usize> {
        self.tail.append_and_commit(entries, start_index, skip_committed, commit_index).await
    }

    async fn commit(&self, up_to: LogIndex) -> RaftResult<usize> {
        self.tail.commit(up_to).await
    }

    async fn contains(&self, index: LogIndex, term: TermIndex) -> bool {
        self.tail.contains(index, term).await
    }

    async fn is_up_to_date(&self, index: LogIndex, term: TermIndex) -> bool {
        self.tail.is_up_to_date(index, term).await
    }

    async fn get_term(&self, index: LogIndex) -> Option<TermIndex> {
        self.tail.get_term(index).await
    }

    async fn wait_for_commit(&self, index: LogIndex) {
        self.tail.wait_for_commit(index).await
    }

    async fn append_no_op_entry(&self) -> RaftResult<LogIndex> {
        self.tail.append_no_op_entry().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_snapshot_advances_first_entry_index_and_commits() {
        let log: Arc<InMemoryLog<u64>> = InMemoryLog::new();
        for i in 1..=5u64 {
            log.append_entry(LogEntry { index: LogIndex(i), term: TermIndex(1), is_snapshot: false, command_id: None, timestamp: std::time::SystemTime::now(), command: Some(i) }).await.unwrap();
        }
        assert_eq!(log.first_entry_index().await, LogIndex(0));

        log.append_snapshot(Vec::new(), LogIndex(100)).await.unwrap();
        assert_eq!(log.first_entry_index().await, LogIndex(100));
        assert_eq!(log.last_committed_entry_index().await, LogIndex(100));
        assert!(log.contains(LogIndex(100), TermIndex(0)).await);

        let next = LogEntry { index: LogIndex(101), term: TermIndex(1), is_snapshot: false, command_id: None, timestamp: std::time::SystemTime::now(), command: Some(9) };
        log.append_entries(vec![next], LogIndex(101), true).await.unwrap();
        assert_eq!(log.last_entry_index().await, LogIndex(101));
    }

    #[tokio::test]
    async fn is_up_to_date_prefers_higher_term_then_longer_log() {
        let log: Arc<InMemoryLog<u64>> = InMemoryLog::new();
        log.append_entry(LogEntry { index: LogIndex(1), term: TermIndex(2), is_snapshot: false, command_id: None, timestamp: std::time::SystemTime::now(), command: Some(1) }).await.unwrap();

        assert!(log.is_up_to_date(LogIndex(1), TermIndex(3)).await);
        assert!(!log.is_up_to_date(LogIndex(1), TermIndex(1)).await);
        assert!(log.is_up_to_date(LogIndex(1), TermIndex(2)).await);
        assert!(!log.is_up_to_date(LogIndex(0), TermIndex(2)).await);
    }
}
