//! Read-side helpers over one session's history: counts and Markdown export
use crate::memory_db::{MemoryDatabase, Role, StoredMessage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Upper bound on messages pulled for a whole-session export.
pub const FULL_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_messages: usize,
    /// Characters across user and assistant messages only.
    pub total_characters: usize,
}

pub fn conversation_stats(messages: &[StoredMessage]) -> ConversationStats {
    let mut stats = ConversationStats {
        total_messages: messages.len(),
        ..Default::default()
    };
    for message in messages {
        match message.role {
            Role::User => stats.user_messages += 1,
            Role::Assistant => stats.assistant_messages += 1,
            Role::Tool => stats.tool_messages += 1,
        }
        if message.role.is_conversational() {
            stats.total_characters += message.content.chars().count();
        }
    }
    stats
}

/// Markdown transcript of a session. Tool messages are counted in the header
/// but left out of the body.
pub fn render_markdown(session_id: &str, messages: &[StoredMessage], exported_at: DateTime<Utc>) -> String {
    let mut out = String::from("# Conversation Export\n\n");
    out.push_str(&format!("**Session ID:** {}\n", session_id));
    out.push_str(&format!("**Exported:** {}\n", exported_at.format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&format!("**Total Messages:** {}\n\n", messages.len()));
    out.push_str("---\n\n");

    for message in messages {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => continue,
        };
        out.push_str(&format!(
            "### {} ({})\n\n{}\n\n---\n\n",
            speaker,
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.content
        ));
    }
    out
}

pub fn default_export_path(export_dir: &Path) -> PathBuf {
    export_dir.join(format!("conversation_{}.md", Utc::now().format("%Y%m%d_%H%M%S")))
}

/// Write the session's full transcript to `output`, creating parent
/// directories as needed.
pub fn export_conversation(db: &MemoryDatabase, session_id: &str, output: &Path) -> Result<PathBuf> {
    let messages = db
        .conversations
        .read(session_id, FULL_HISTORY_LIMIT)
        .with_context(|| format!("Failed to read history for session {}", session_id))?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output, render_markdown(session_id, &messages, Utc::now()))
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Exported {} messages of session {} to {}", messages.len(), session_id, output.display());
    Ok(output.to_path_buf())
}
