//! Turn recording on top of the conversation log and session ledger.
//!
//! The agent runtime reports a *cumulative* session cost after each reply.
//! A turn snapshots the stored total when it begins and charges the
//! difference when it completes.

use crate::error::StoreResult;
use crate::memory_db::{ConversationStore, MemoryDatabase, Role, SessionLedger, StoredMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Wire shape of a tool message as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEnvelope {
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
    },
}

impl ToolEnvelope {
    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A stored message decoded for consumption. The log itself keeps tool
/// content as opaque text; decoding happens here.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEntry {
    User(String),
    Assistant(String),
    ToolUse { name: String, input: Value },
    ToolResult { content: Value },
    /// Tool message whose text is not a recognised envelope.
    UnparsedTool(String),
}

impl ConversationEntry {
    pub fn from_stored(message: &StoredMessage) -> Self {
        match message.role {
            Role::User => ConversationEntry::User(message.content.clone()),
            Role::Assistant => ConversationEntry::Assistant(message.content.clone()),
            Role::Tool => match serde_json::from_str::<ToolEnvelope>(&message.content) {
                Ok(ToolEnvelope::ToolUse { name, input }) => ConversationEntry::ToolUse { name, input },
                Ok(ToolEnvelope::ToolResult { content }) => ConversationEntry::ToolResult { content },
                Err(_) => ConversationEntry::UnparsedTool(message.content.clone()),
            },
        }
    }
}

/// Cost charged to a session for one turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostDelta(f64);

impl CostDelta {
    pub const ZERO: CostDelta = CostDelta(0.0);

    /// `reported_cumulative - previous_cumulative`, never negative.
    ///
    /// A negative result usually means the baseline was stale (a resumed
    /// session whose runtime counter restarted). It is clamped to zero and
    /// logged rather than allowed to shrink the stored total.
    pub fn between(previous_cumulative: f64, reported_cumulative: f64) -> Self {
        let delta = reported_cumulative - previous_cumulative;
        if !delta.is_finite() || delta < 0.0 {
            warn!(
                "Clamping cost delta to 0 (previous {:.6}, reported {:.6})",
                previous_cumulative, reported_cumulative
            );
            return CostDelta::ZERO;
        }
        CostDelta(delta)
    }

    pub fn usd(&self) -> f64 {
        self.0
    }
}

/// One in-flight turn. The user message is already committed; everything
/// else lands in a single transaction on [`PendingTurn::complete`]. Dropping
/// a pending turn leaves only the user message behind.
pub struct PendingTurn<'a> {
    db: &'a MemoryDatabase,
    session_id: String,
    baseline_cost: f64,
    tool_events: Vec<ToolEnvelope>,
}

/// What a completed turn wrote.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub tool_messages: usize,
    pub assistant_message: Option<StoredMessage>,
    pub cost_delta_usd: f64,
}

impl<'a> PendingTurn<'a> {
    pub(crate) fn begin(db: &'a MemoryDatabase, session_id: &str, user_text: &str) -> StoreResult<Self> {
        db.conversations.append(session_id, Role::User, user_text)?;
        let baseline_cost = db
            .sessions
            .get_stats(session_id)?
            .map(|stats| stats.total_cost_usd)
            .unwrap_or(0.0);
        debug!("Turn started for session {} at baseline ${:.6}", session_id, baseline_cost);

        Ok(Self {
            db,
            session_id: session_id.to_string(),
            baseline_cost,
            tool_events: Vec::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn baseline_cost(&self) -> f64 {
        self.baseline_cost
    }

    pub fn tool_event(&mut self, envelope: ToolEnvelope) {
        self.tool_events.push(envelope);
    }

    /// Commit tool messages, the assistant reply (skipped when empty) and the
    /// ledger update together. Without a reported cost the turn is charged
    /// nothing but still counts its two messages.
    pub fn complete(self, assistant_text: &str, reported_cumulative_cost: Option<f64>) -> StoreResult<TurnRecord> {
        let delta = reported_cumulative_cost
            .map(|reported| CostDelta::between(self.baseline_cost, reported))
            .unwrap_or(CostDelta::ZERO);

        let encoded = self
            .tool_events
            .iter()
            .map(ToolEnvelope::to_json)
            .collect::<StoreResult<Vec<_>>>()?;

        let session_id = self.session_id;
        let record = self.db.with_transaction(|tx| {
            for envelope in &encoded {
                ConversationStore::append_with_conn(tx, &session_id, Role::Tool, envelope)?;
            }
            let assistant_message = if assistant_text.is_empty() {
                None
            } else {
                Some(ConversationStore::append_with_conn(tx, &session_id, Role::Assistant, assistant_text)?)
            };
            SessionLedger::record_turn_with_conn(tx, &session_id, delta.usd(), 2)?;

            Ok(TurnRecord {
                session_id: session_id.clone(),
                tool_messages: encoded.len(),
                assistant_message,
                cost_delta_usd: delta.usd(),
            })
        })?;

        debug!(
            "Turn completed for session {}: {} tool messages, cost +{:.6}",
            record.session_id, record.tool_messages, record.cost_delta_usd
        );
        Ok(record)
    }
}
