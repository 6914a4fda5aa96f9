//! Command-line front end

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::history;
use crate::memory_db::{backup, DocumentFilter, MemoryDatabase};
use crate::turn::{ConversationEntry, ToolEnvelope};

#[derive(Debug, Parser)]
#[command(
    name = "assistant-memory",
    version,
    about = "Session ledger, conversation history and long-term memory for the assistant"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve,

    /// Create, resume and inspect sessions
    Session {
        #[command(subcommand)]
        action: SessionCommand,
    },

    /// Show a session's recent messages (defaults to the last active session)
    History {
        session_id: Option<String>,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Search user and assistant messages by substring
    Search {
        query: String,

        /// Only search within this session
        #[arg(long)]
        session: Option<String>,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Record one completed turn against a session
    Turn {
        session_id: String,

        #[arg(long)]
        user: String,

        #[arg(long, default_value = "")]
        assistant: String,

        /// Cumulative session cost reported by the agent runtime, in USD
        #[arg(long)]
        cost: Option<f64>,

        /// Tool envelope as JSON, e.g. '{"type":"tool_use","name":"web_search","input":{}}'
        #[arg(long = "tool-event")]
        tool_events: Vec<String>,
    },

    /// Write a session's transcript as Markdown
    ExportConversation {
        session_id: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Long-term memory facts
    Memory {
        #[command(subcommand)]
        action: MemoryCommand,
    },

    /// Saved research
    Research {
        #[command(subcommand)]
        action: ResearchCommand,
    },

    /// Generated document catalog
    Documents {
        #[command(subcommand)]
        action: DocumentsCommand,
    },

    /// JSON snapshot backup and restore
    Backup {
        #[command(subcommand)]
        action: BackupCommand,
    },

    /// Row counts and database size
    Status,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Start a new session
    New {
        /// Use this id instead of a generated UUID
        #[arg(long)]
        id: Option<String>,
    },
    /// Print the most recently active session
    Resume,
    /// Totals for one session
    Stats { session_id: String },
    /// Most recently active sessions
    List {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum MemoryCommand {
    Save {
        category: String,
        key: String,
        value: String,

        #[arg(long)]
        session: Option<String>,
    },
    List {
        #[arg(long)]
        category: Option<String>,
    },
    Delete { category: String, key: String },
    Summary,
}

#[derive(Debug, Subcommand)]
pub enum ResearchCommand {
    List {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum DocumentsCommand {
    List {
        #[arg(long = "type")]
        file_type: Option<String>,

        #[arg(long)]
        session: Option<String>,

        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    Export {
        /// File name inside the export directory
        #[arg(long)]
        filename: Option<String>,
    },
    Import { path: PathBuf },
    List,
}

pub async fn run(cli: Cli, cfg: Config) -> Result<()> {
    if let Commands::Serve = cli.command {
        return crate::server::run_server(cfg).await;
    }

    let db = MemoryDatabase::open(&cfg.db_path, &cfg.db_options())
        .with_context(|| format!("Cannot open database at {}", cfg.db_path.display()))?;
    run_command(&db, &cfg, cli.command)
}

fn run_command(db: &MemoryDatabase, cfg: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => anyhow::bail!("serve does not run against an already opened database"),
        Commands::Session { action } => session_command(db, action)?,
        Commands::History { session_id, limit } => {
            let session_id = match session_id {
                Some(id) => Some(id),
                None => db.sessions.resolve_last_session()?,
            };
            let Some(session_id) = session_id else {
                println!("No sessions yet.");
                return Ok(());
            };
            let messages = db.conversations.read(&session_id, limit.unwrap_or(cfg.history_limit))?;
            if messages.is_empty() {
                println!("No messages for session {}.", session_id);
            }
            for message in &messages {
                let when = message.timestamp.format("%Y-%m-%d %H:%M:%S");
                match ConversationEntry::from_stored(message) {
                    ConversationEntry::User(text) => println!("[{}] user: {}", when, text),
                    ConversationEntry::Assistant(text) => println!("[{}] assistant: {}", when, text),
                    ConversationEntry::ToolUse { name, .. } => println!("[{}] tool call: {}", when, name),
                    ConversationEntry::ToolResult { .. } => println!("[{}] tool result", when),
                    ConversationEntry::UnparsedTool(_) => println!("[{}] tool message", when),
                }
            }
        }
        Commands::Search { query, session, limit } => {
            let limit = limit.unwrap_or(cfg.search_limit);
            match session {
                Some(session_id) => {
                    for message in db.conversations.search_session(&session_id, &query, limit)? {
                        println!("[{}] {}: {}", message.timestamp.format("%Y-%m-%d %H:%M"), message.role, message.content);
                    }
                }
                None => {
                    let hits = db.conversations.search_all(&query, limit)?;
                    if hits.is_empty() {
                        println!("No matches for '{}'.", query);
                    }
                    for hit in hits {
                        println!(
                            "[{}] session {} (started {}): {}: {}",
                            hit.message.timestamp.format("%Y-%m-%d %H:%M"),
                            hit.message.session_id,
                            hit.session_started_at.format("%Y-%m-%d"),
                            hit.message.role,
                            hit.message.content
                        );
                    }
                }
            }
        }
        Commands::Turn { session_id, user, assistant, cost, tool_events } => {
            let envelopes = tool_events
                .iter()
                .map(|raw| serde_json::from_str::<ToolEnvelope>(raw).with_context(|| format!("Invalid tool event: {}", raw)))
                .collect::<Result<Vec<_>>>()?;
            if db.sessions.get_stats(&session_id)?.is_none() {
                println!("Session {} not found.", session_id);
                return Ok(());
            }
            let mut turn = db.begin_turn(&session_id, &user)?;
            for envelope in envelopes {
                turn.tool_event(envelope);
            }
            let record = turn.complete(&assistant, cost)?;
            println!(
                "Recorded turn: {} tool message(s), cost +${:.4}",
                record.tool_messages, record.cost_delta_usd
            );
        }
        Commands::ExportConversation { session_id, output } => {
            let output = output.unwrap_or_else(|| history::default_export_path(&cfg.export_dir));
            let path = history::export_conversation(db, &session_id, &output)?;
            println!("Exported to {}", path.display());
        }
        Commands::Memory { action } => memory_command(db, action)?,
        Commands::Research { action: ResearchCommand::List { limit } } => {
            for record in db.records.list_research(limit)? {
                println!("#{} [{}] {} ({} sources)", record.id, record.created_at.format("%Y-%m-%d"), record.query, record.sources.len());
            }
        }
        Commands::Documents { action: DocumentsCommand::List { file_type, session, limit } } => {
            let filter = DocumentFilter { file_type, session_id: session, limit };
            for doc in db.records.list_documents(&filter)? {
                println!("#{} {} [{}] {}", doc.id, doc.filename, doc.file_type, doc.file_path);
            }
        }
        Commands::Backup { action } => backup_command(db, cfg, action)?,
        Commands::Status => {
            let stats = db.stats()?;
            println!("Database: {}", cfg.db_path.display());
            println!("  sessions:  {}", stats.total_sessions);
            println!("  messages:  {}", stats.total_messages);
            println!("  research:  {}", stats.total_research);
            println!("  documents: {}", stats.total_documents);
            println!("  memories:  {}", stats.total_memories);
            println!("  size:      {:.1} KB", stats.database_size_bytes as f64 / 1024.0);
        }
    }
    Ok(())
}

fn session_command(db: &MemoryDatabase, action: SessionCommand) -> Result<()> {
    match action {
        SessionCommand::New { id } => {
            let id = match id {
                Some(id) => db.sessions.create_session_with_id(&id)?.id,
                None => db.sessions.create_session()?,
            };
            println!("{}", id);
        }
        SessionCommand::Resume => match db.sessions.resolve_last_session()? {
            Some(id) => println!("{}", id),
            None => println!("No previous session to resume."),
        },
        SessionCommand::Stats { session_id } => match db.sessions.get_stats(&session_id)? {
            Some(stats) => {
                let messages = db.conversations.read(&session_id, history::FULL_HISTORY_LIMIT)?;
                let counts = history::conversation_stats(&messages);
                println!("Session {}", stats.id);
                println!("  started:     {}", stats.started_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  last active: {}", stats.last_active_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  messages:    {} ({} user, {} assistant, {} tool)",
                    stats.message_count, counts.user_messages, counts.assistant_messages, counts.tool_messages);
                println!("  cost:        ${:.4}", stats.total_cost_usd);
            }
            None => println!("Session {} not found.", session_id),
        },
        SessionCommand::List { limit } => {
            for stats in db.sessions.list_sessions(limit)? {
                println!(
                    "{}  last active {}  {} messages  ${:.4}",
                    stats.id,
                    stats.last_active_at.format("%Y-%m-%d %H:%M"),
                    stats.message_count,
                    stats.total_cost_usd
                );
            }
        }
    }
    Ok(())
}

fn memory_command(db: &MemoryDatabase, action: MemoryCommand) -> Result<()> {
    match action {
        MemoryCommand::Save { category, key, value, session } => {
            let entry = db.memories.save(&category, &key, &value, session.as_deref())?;
            println!("Saved {}/{} = {}", entry.category, entry.key, entry.value);
        }
        MemoryCommand::List { category } => {
            let entries = db.memories.list(category.as_deref())?;
            if entries.is_empty() {
                println!("No memories stored.");
            }
            for entry in entries {
                println!("{}/{}: {}", entry.category, entry.key, entry.value);
            }
        }
        MemoryCommand::Delete { category, key } => {
            if db.memories.delete(&category, &key)? {
                println!("Deleted {}/{}", category, key);
            } else {
                println!("No memory stored under {}/{}.", category, key);
            }
        }
        MemoryCommand::Summary => {
            let summary = db.memories.formatted_summary()?;
            if summary.is_empty() {
                println!("No memories stored.");
            } else {
                println!("{}", summary);
            }
        }
    }
    Ok(())
}

fn backup_command(db: &MemoryDatabase, cfg: &Config, action: BackupCommand) -> Result<()> {
    match action {
        BackupCommand::Export { filename } => {
            let snapshot = db.export()?;
            let path = backup::write_snapshot(&snapshot, &cfg.export_dir, filename.as_deref())?;
            println!("Exported to {}", path.display());
            println!(
                "  {} research, {} sessions, {} documents, {} messages, {} memories",
                snapshot.research.len(),
                snapshot.sessions.len(),
                snapshot.documents.len(),
                snapshot.messages.len(),
                snapshot.memories.len()
            );
        }
        BackupCommand::Import { path } => {
            let Some(path) = resolve_snapshot_path(&path, &cfg.export_dir) else {
                println!("File not found: {}", path.display());
                return Ok(());
            };
            let report = db.import_value(&backup::read_snapshot(&path)?)?;
            println!("Imported from {}", path.display());
            for (table, counts) in [
                ("sessions", report.sessions),
                ("messages", report.messages),
                ("research", report.research),
                ("documents", report.documents),
                ("memories", report.memories),
            ] {
                println!(
                    "  {:<10} {} imported, {} skipped, {} failed",
                    table, counts.imported, counts.skipped, counts.failed
                );
            }
        }
        BackupCommand::List => {
            let files = backup::list_exports(&cfg.export_dir)?;
            if files.is_empty() {
                println!("No export files found in {}", cfg.export_dir.display());
            }
            for file in files {
                println!(
                    "{}  {:.1} KB  {}",
                    file.name,
                    file.size_bytes as f64 / 1024.0,
                    file.modified.format("%Y-%m-%d %H:%M")
                );
            }
        }
    }
    Ok(())
}

/// A path that does not exist is retried by file name inside the export
/// directory.
fn resolve_snapshot_path(path: &Path, export_dir: &Path) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }
    let fallback = export_dir.join(path.file_name()?);
    fallback.exists().then_some(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            db_path: dir.path().join("agent.db"),
            export_dir: dir.path().join("exports"),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_turn_command() {
        let cli = Cli::try_parse_from([
            "assistant-memory", "turn", "abc", "--user", "hi", "--assistant", "hello",
            "--cost", "0.02", "--tool-event", r#"{"type":"tool_result","content":"ok"}"#,
        ])
        .unwrap();
        match cli.command {
            Commands::Turn { session_id, cost, tool_events, .. } => {
                assert_eq!(session_id, "abc");
                assert_eq!(cost, Some(0.02));
                assert_eq!(tool_events.len(), 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_turn_and_backup_commands_against_file_db() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);
        let db = MemoryDatabase::open(&cfg.db_path, &cfg.db_options()).unwrap();
        let id = db.sessions.create_session().unwrap();

        run_command(&db, &cfg, Commands::Turn {
            session_id: id.clone(),
            user: "hello".into(),
            assistant: "hi".into(),
            cost: Some(0.01),
            tool_events: vec![],
        })
        .unwrap();
        assert_eq!(db.sessions.get_stats(&id).unwrap().unwrap().message_count, 2);

        run_command(&db, &cfg, Commands::Backup { action: BackupCommand::Export { filename: Some("nightly".into()) } }).unwrap();
        assert!(cfg.export_dir.join("nightly.json").exists());
        assert_eq!(
            resolve_snapshot_path(Path::new("elsewhere/nightly.json"), &cfg.export_dir),
            Some(cfg.export_dir.join("nightly.json"))
        );
    }

    #[test]
    fn test_invalid_tool_event_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);
        let db = MemoryDatabase::open(&cfg.db_path, &cfg.db_options()).unwrap();
        let id = db.sessions.create_session().unwrap();

        let result = run_command(&db, &cfg, Commands::Turn {
            session_id: id,
            user: "u".into(),
            assistant: String::new(),
            cost: None,
            tool_events: vec!["{not json".into()],
        });
        assert!(result.is_err());
    }
}
