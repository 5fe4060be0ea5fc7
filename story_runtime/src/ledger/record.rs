//! Entries of the append-only record stream.

use serde::{Deserialize, Serialize};
use story_graph::{EntityId, Graph};

use super::Patch;
use crate::frame::CallStack;
use crate::journal::Fragment;
use crate::provision::PlanningReceipt;

pub const CHANNEL_GRAPH: &str = "graph";
pub const CHANNEL_STACK: &str = "stack";
pub const CHANNEL_JOURNAL: &str = "journal";
pub const CHANNEL_PLANNING: &str = "planning";

/// One entry in the stream. `seq` is assigned by the ledger and strictly increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub seq: u64,
    pub channel: String,
    pub step: u64,
    #[serde(flatten)]
    pub body: RecordBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum RecordBody {
    /// Full copy of the graph.
    Snapshot {
        graph: Graph,
        cursor_id: EntityId,
        /// Written by an undo; records before it past its step are abandoned.
        #[serde(default)]
        rewind: bool,
    },
    /// Full copy of the call stack.
    Stack { call_stack: CallStack },
    Patch(Patch),
    Fragment(Fragment),
    PlanningReceipt(PlanningReceipt),
}

impl Record {
    /// A record waiting for the ledger to number it.
    pub fn new(channel: &str, step: u64, body: RecordBody) -> Self {
        Self {
            seq: 0,
            channel: channel.to_string(),
            step,
            body,
        }
    }

    pub fn record_type(&self) -> &'static str {
        match self.body {
            RecordBody::Snapshot { .. } => "snapshot",
            RecordBody::Stack { .. } => "stack",
            RecordBody::Patch(_) => "patch",
            RecordBody::Fragment(_) => "fragment",
            RecordBody::PlanningReceipt(_) => "planning_receipt",
        }
    }

    pub fn is_rewind(&self) -> bool {
        matches!(self.body, RecordBody::Snapshot { rewind: true, .. })
    }

    pub fn as_patch(&self) -> Option<&Patch> {
        match &self.body {
            RecordBody::Patch(patch) => Some(patch),
            _ => None,
        }
    }

    pub fn as_fragment(&self) -> Option<&Fragment> {
        match &self.body {
            RecordBody::Fragment(fragment) => Some(fragment),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_layout_is_flat_and_tagged() {
        let source = EntityId::new();
        let mut record = Record::new(
            CHANNEL_JOURNAL,
            3,
            RecordBody::Fragment(Fragment::text("Hello.", source)),
        );
        record.seq = 7;

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["record_type"], json!("fragment"));
        assert_eq!(value["seq"], json!(7));
        assert_eq!(value["fragment_type"], json!("content"));

        let back: Record = serde_json::from_value(value).unwrap();
        assert_eq!(back.record_type(), "fragment");
        assert_eq!(back.as_fragment().map(|f| f.source_id), Some(Some(source)));
    }
}
