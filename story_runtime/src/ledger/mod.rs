//! # Ledger
//!
//! Owns the graph, the cursor and the append-only record stream.
//!
//! ## Core Components
//!
//! - **Record**: Numbered stream entry (snapshot, stack, patch, fragment, planning receipt)
//! - **Patch**: Event batch bound to a registry id and pre-batch state hash
//! - **Ledger**: Commits step outcomes, snapshots on a cadence, recovers and undoes
//!
//! In event-sourced mode the stream alone is enough to rebuild the graph and call
//! stack; the persisted document only carries a stub graph.

mod patch;
mod record;

pub use patch::Patch;
pub use record::{Record, RecordBody, CHANNEL_GRAPH, CHANNEL_JOURNAL, CHANNEL_PLANNING, CHANNEL_STACK};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use story_graph::{EntityId, Graph};

use crate::frame::{CallStack, Frame, StepOutcome};
use crate::journal::Fragment;
use crate::runtime::Runtime;
use crate::{Error, Result, RuntimeConfig, SCHEMA_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    pub last_snapshot_seq: Option<u64>,
    pub schema_version: u32,
}

/// Persisted form of a [`Ledger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub uid: EntityId,
    pub graph: Value,
    pub cursor_id: EntityId,
    pub step: u64,
    pub records: Vec<Record>,
    pub domain_names: Vec<String>,
    pub snapshot_cadence: u64,
    pub metadata: LedgerMetadata,
    #[serde(default)]
    pub event_sourced: bool,
    #[serde(default)]
    pub cursor_history: Vec<EntityId>,
    pub call_stack: CallStack,
}

/// State rebuilt from records.
#[derive(Debug, Clone)]
pub struct Replay {
    pub graph: Graph,
    pub call_stack: CallStack,
    pub cursor_id: EntityId,
    pub step: u64,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    uid: EntityId,
    graph: Graph,
    call_stack: CallStack,
    records: Vec<Record>,
    cursor_id: EntityId,
    step: u64,
    cursor_history: Vec<EntityId>,
    domain_names: Vec<String>,
    snapshot_cadence: u64,
    event_sourced: bool,
    last_snapshot_step: u64,
    last_snapshot_seq: Option<u64>,
}

impl Ledger {
    /// Start a ledger on `graph` with the cursor at `cursor`. Writes the initial snapshot.
    pub fn new(graph: Graph, cursor: EntityId, config: &RuntimeConfig) -> Self {
        let mut ledger = Self {
            uid: EntityId::new(),
            graph,
            call_stack: CallStack::new(),
            records: Vec::new(),
            cursor_id: cursor,
            step: 0,
            cursor_history: Vec::new(),
            domain_names: Vec::new(),
            snapshot_cadence: config.snapshot_cadence.max(1),
            event_sourced: config.event_sourced,
            last_snapshot_step: 0,
            last_snapshot_seq: None,
        };
        ledger.snapshot();
        ledger
    }

    /// Activate domain registries by name for every frame this ledger builds.
    pub fn with_domains<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn uid(&self) -> EntityId {
        self.uid
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn cursor(&self) -> EntityId {
        self.cursor_id
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn history(&self) -> &[EntityId] {
        &self.cursor_history
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn domain_names(&self) -> &[String] {
        &self.domain_names
    }

    pub fn is_event_sourced(&self) -> bool {
        self.event_sourced
    }

    /// A frame bound to this ledger's graph, cursor, step and call stack.
    pub fn frame<'r>(&'r mut self, runtime: &'r Runtime) -> Result<Frame<'r>> {
        Ok(Frame::new(runtime, &mut self.graph, self.cursor_id)?
            .with_step(self.step)
            .with_call_stack(self.call_stack.clone())?
            .with_domains(&self.domain_names)
            .event_sourced(self.event_sourced))
    }

    /// Enter the current cursor, e.g. to render the opening node.
    pub fn start(&mut self, runtime: &Runtime) -> Result<Vec<Fragment>> {
        let cursor = self.cursor_id;
        let outcome = self.frame(runtime)?.jump_to(cursor)?;
        self.commit_with_fragments(outcome)
    }

    /// Follow a player choice and commit the step.
    pub fn choose(&mut self, runtime: &Runtime, edge: EntityId) -> Result<Vec<Fragment>> {
        let outcome = self.frame(runtime)?.resolve_choice(edge)?;
        self.commit_with_fragments(outcome)
    }

    fn commit_with_fragments(&mut self, outcome: StepOutcome) -> Result<Vec<Fragment>> {
        let fragments = outcome.fragments().into_iter().cloned().collect();
        self.commit(outcome)?;
        Ok(fragments)
    }

    /// Fold a finished step into the ledger.
    pub fn commit(&mut self, outcome: StepOutcome) -> Result<()> {
        self.cursor_id = outcome.cursor;
        self.step = outcome.step;
        self.cursor_history.extend(outcome.history);
        self.call_stack = outcome.call_stack;
        for record in outcome.records {
            self.append(record);
        }
        tracing::info!(step = self.step, cursor = %self.cursor_id, records = self.records.len(), "step committed");

        if self.step.saturating_sub(self.last_snapshot_step) >= self.snapshot_cadence {
            self.snapshot();
        }
        Ok(())
    }

    fn append(&mut self, mut record: Record) -> u64 {
        let seq = self.records.last().map(|r| r.seq + 1).unwrap_or(0);
        record.seq = seq;
        self.records.push(record);
        seq
    }

    /// Append a graph snapshot and a stack snapshot at the current step.
    pub fn snapshot(&mut self) {
        self.write_snapshot(false);
    }

    fn write_snapshot(&mut self, rewind: bool) {
        let seq = self.append(Record::new(
            CHANNEL_GRAPH,
            self.step,
            RecordBody::Snapshot {
                graph: self.graph.clone(),
                cursor_id: self.cursor_id,
                rewind,
            },
        ));
        self.append(Record::new(
            CHANNEL_STACK,
            self.step,
            RecordBody::Stack {
                call_stack: self.call_stack.clone(),
            },
        ));
        self.last_snapshot_step = self.step;
        self.last_snapshot_seq = Some(seq);
        tracing::debug!(seq, step = self.step, rewind, "snapshot written");
    }

    /// Records that still describe the history leading to `seq`.
    ///
    /// An undo leaves the abandoned steps in the stream; walking back from `seq`,
    /// everything older than a rewind snapshot and later than its step is skipped.
    fn lineage(&self, seq: u64) -> Vec<&Record> {
        let mut ceiling = u64::MAX;
        let mut lineage: Vec<&Record> = Vec::new();
        for record in self.records.iter().rev().filter(|r| r.seq <= seq) {
            if record.step > ceiling {
                continue;
            }
            lineage.push(record);
            if record.is_rewind() {
                ceiling = ceiling.min(record.step);
            }
        }
        lineage.reverse();
        lineage
    }

    /// Rebuild from the latest snapshot in `records` at or before `max_step`, then
    /// apply the later patches.
    ///
    /// Without event sourcing no patches are written, so any step recorded after the
    /// chosen snapshot cannot be reconstructed and is reported as a missing snapshot.
    fn rebuild(&self, records: &[&Record], max_step: u64) -> Result<Replay> {
        let mut base = None;
        let mut stack_base = None;
        for record in records.iter().copied().filter(|r| r.step <= max_step) {
            match &record.body {
                RecordBody::Snapshot { graph, cursor_id, .. } => base = Some((record.seq, graph, *cursor_id, record.step)),
                RecordBody::Stack { call_stack } => stack_base = Some((record.seq, call_stack)),
                _ => {}
            }
        }
        let (graph_seq, graph, snapshot_cursor, snapshot_step) =
            base.ok_or_else(|| Error::MissingSnapshot(format!("step {}", max_step)))?;
        let (stack_seq, call_stack) =
            stack_base.ok_or_else(|| Error::MissingSnapshot(format!("stack at step {}", max_step)))?;

        let mut replay = Replay {
            graph: graph.clone(),
            call_stack: call_stack.clone(),
            cursor_id: snapshot_cursor,
            step: snapshot_step,
        };
        for record in records.iter().copied().filter(|r| r.step <= max_step) {
            if record.seq <= graph_seq.min(stack_seq) {
                continue;
            }
            if record.step > snapshot_step && !self.event_sourced {
                return Err(Error::MissingSnapshot(format!(
                    "step {} (latest snapshot is at step {} and no patches were recorded)",
                    record.step, snapshot_step
                )));
            }
            replay.step = replay.step.max(record.step);
            let Some(patch) = record.as_patch() else {
                continue;
            };
            match record.channel.as_str() {
                CHANNEL_STACK if record.seq > stack_seq => patch.apply_to_stack(&mut replay.call_stack)?,
                CHANNEL_GRAPH if record.seq > graph_seq => patch.apply(&mut replay.graph)?,
                _ => {}
            }
        }

        if replay.step > snapshot_step {
            replay.cursor_id = replay
                .step
                .checked_sub(1)
                .and_then(|index| self.cursor_history.get(index as usize))
                .copied()
                .unwrap_or(snapshot_cursor);
        }
        Ok(replay)
    }

    /// Rebuild the state as of record `seq` without touching the ledger.
    pub fn recover(&self, seq: u64) -> Result<Replay> {
        let lineage = self.lineage(seq);
        let replay = self.rebuild(&lineage, u64::MAX)?;
        tracing::info!(seq, step = replay.step, "recovered");
        Ok(replay)
    }

    /// Roll back to the state at the end of `step` and start a new lineage there.
    pub fn undo(&mut self, step: u64) -> Result<()> {
        let last = self.records.last().map(|r| r.seq).unwrap_or(0);
        let lineage = self.lineage(last);
        let replay = self.rebuild(&lineage, step)?;

        self.graph = replay.graph;
        self.call_stack = replay.call_stack;
        self.step = replay.step;
        self.cursor_history.truncate(self.step as usize);
        self.cursor_id = self.cursor_history.last().copied().unwrap_or(replay.cursor_id);
        self.write_snapshot(true);
        tracing::info!(step = self.step, cursor = %self.cursor_id, "undone");
        Ok(())
    }

    /// Number of turns: runs of consecutive identical cursors in the history.
    pub fn turn(&self) -> usize {
        count_turns(&self.cursor_history)
    }

    /// All journal fragments in stream order.
    pub fn fragments(&self) -> Vec<&Fragment> {
        self.records.iter().filter_map(Record::as_fragment).collect()
    }

    /// Journal fragments written for one step.
    pub fn fragments_at(&self, step: u64) -> Vec<&Fragment> {
        let last = self.records.last().map(|r| r.seq).unwrap_or(0);
        self.lineage(last)
            .into_iter()
            .filter(|r| r.step == step)
            .filter_map(Record::as_fragment)
            .collect()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn unstructure(&self) -> Result<LedgerDocument> {
        let graph = if self.event_sourced {
            json!({ "uid": self.graph.uid(), "label": self.graph.label() })
        } else {
            serde_json::to_value(&self.graph)?
        };
        Ok(LedgerDocument {
            uid: self.uid,
            graph,
            cursor_id: self.cursor_id,
            step: self.step,
            records: self.records.clone(),
            domain_names: self.domain_names.clone(),
            snapshot_cadence: self.snapshot_cadence,
            metadata: LedgerMetadata {
                last_snapshot_seq: self.last_snapshot_seq,
                schema_version: SCHEMA_VERSION,
            },
            event_sourced: self.event_sourced,
            cursor_history: self.cursor_history.clone(),
            call_stack: self.call_stack.clone(),
        })
    }

    pub fn structure(document: LedgerDocument) -> Result<Self> {
        if document.metadata.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "unsupported ledger schema version {}",
                document.metadata.schema_version
            )));
        }

        let last_snapshot_step = document
            .metadata
            .last_snapshot_seq
            .and_then(|seq| document.records.iter().find(|r| r.seq == seq))
            .map(|r| r.step)
            .unwrap_or(0);
        let mut ledger = Self {
            uid: document.uid,
            graph: Graph::new(""),
            call_stack: document.call_stack,
            records: document.records,
            cursor_id: document.cursor_id,
            step: document.step,
            cursor_history: document.cursor_history,
            domain_names: document.domain_names,
            snapshot_cadence: document.snapshot_cadence.max(1),
            event_sourced: document.event_sourced,
            last_snapshot_step,
            last_snapshot_seq: document.metadata.last_snapshot_seq,
        };

        if ledger.event_sourced {
            let last = ledger.records.last().map(|r| r.seq).unwrap_or(0);
            let replay = ledger.recover(last)?;
            ledger.graph = replay.graph;
            ledger.call_stack = replay.call_stack;
        } else {
            ledger.graph = serde_json::from_value(document.graph)?;
        }
        tracing::info!(step = ledger.step, records = ledger.records.len(), "ledger loaded");
        Ok(ledger)
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.unstructure()?)?)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        Self::structure(serde_json::from_value(value)?)
    }
}

fn count_turns(history: &[EntityId]) -> usize {
    let mut turns = 0;
    let mut previous = None;
    for cursor in history {
        if previous != Some(cursor) {
            turns += 1;
            previous = Some(cursor);
        }
    }
    turns
}
