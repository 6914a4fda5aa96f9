//! Write-once research and document catalog records
use crate::error::StoreResult;
use crate::memory_db::schema::*;
use crate::memory_db::{DbConnection, DbPool};
use chrono::Utc;
use rusqlite::{params, Row, ToSql};
use tracing::debug;

const RESEARCH_COLUMNS: &str = "id, query, sources, analysis, created_at, session_id";
const DOCUMENT_COLUMNS: &str = "id, filename, file_type, file_path, description, created_at, session_id";
const DEFAULT_DOCUMENT_LIMIT: usize = 20;

pub struct RecordStore {
    pool: DbPool,
}

impl RecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> StoreResult<DbConnection> {
        Ok(self.pool.get()?)
    }

    pub fn save_research(
        &self,
        query: &str,
        sources: &[String],
        analysis: Option<&str>,
        session_id: Option<&str>,
    ) -> StoreResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO research (query, sources, analysis, created_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                query,
                serde_json::to_string(sources)?,
                analysis,
                format_timestamp(&Utc::now()),
                session_id,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Saved research record {} for '{}'", id, query);
        Ok(id)
    }

    /// Newest first.
    pub fn list_research(&self, limit: usize) -> StoreResult<Vec<ResearchRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM research ORDER BY created_at DESC, id DESC LIMIT ?1",
            RESEARCH_COLUMNS
        ))?;
        let records = stmt
            .query_map([limit as i64], row_to_research)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn save_document(&self, doc: &NewDocument) -> StoreResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO documents (filename, file_type, file_path, description, created_at, session_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.filename,
                doc.file_type,
                doc.file_path,
                doc.description,
                format_timestamp(&Utc::now()),
                doc.session_id,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Registered document {} ({})", id, doc.file_path);
        Ok(id)
    }

    /// Newest first, optionally narrowed by file type and/or owning session.
    /// Only the unfiltered listing is capped by default; a filtered one
    /// returns every match unless `limit` is set.
    pub fn list_documents(&self, filter: &DocumentFilter) -> StoreResult<Vec<DocumentRecord>> {
        let conn = self.get_conn()?;

        let mut query = format!("SELECT {} FROM documents WHERE 1=1", DOCUMENT_COLUMNS);
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(file_type) = &filter.file_type {
            query.push_str(" AND file_type = ?");
            params.push(Box::new(file_type.clone()));
        }
        if let Some(session_id) = &filter.session_id {
            query.push_str(" AND session_id = ?");
            params.push(Box::new(session_id.clone()));
        }
        query.push_str(" ORDER BY created_at DESC, id DESC");
        let unfiltered = filter.file_type.is_none() && filter.session_id.is_none();
        let limit = filter.limit.or(if unfiltered { Some(DEFAULT_DOCUMENT_LIMIT) } else { None });
        if let Some(limit) = limit {
            query.push_str(" LIMIT ?");
            params.push(Box::new(limit as i64));
        }

        let mut stmt = conn.prepare(&query)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let documents = stmt
            .query_map(rusqlite::params_from_iter(param_refs), row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(documents)
    }
}

pub(crate) fn row_to_research(row: &Row<'_>) -> rusqlite::Result<ResearchRecord> {
    let raw_sources: String = row.get(2)?;
    let sources: Vec<String> = serde_json::from_str(&raw_sources).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ResearchRecord {
        id: row.get(0)?,
        query: row.get(1)?,
        sources,
        analysis: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
        session_id: row.get(5)?,
    })
}

pub(crate) fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        file_type: row.get(2)?,
        file_path: row.get(3)?,
        description: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
        session_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn doc(name: &str, file_type: &str, session_id: Option<&str>) -> NewDocument {
        NewDocument {
            filename: name.to_string(),
            file_type: file_type.to_string(),
            file_path: format!("storage/exports/{}", name),
            description: None,
            session_id: session_id.map(str::to_string),
        }
    }

    #[test]
    fn test_research_round_trips_sources() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        let sources = vec!["https://a.example".to_string(), "https://b.example".to_string()];
        let id = db.records.save_research("bakery margins", &sources, Some("thin"), None).unwrap();

        let records = db.records.list_research(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].sources, sources);
        assert_eq!(records[0].analysis.as_deref(), Some("thin"));
    }

    #[test]
    fn test_documents_filter_by_type_and_session() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.records.save_document(&doc("budget.xlsx", "xlsx", Some("s1"))).unwrap();
        db.records.save_document(&doc("leads.xlsx", "xlsx", Some("s2"))).unwrap();
        db.records.save_document(&doc("report.md", "md", Some("s1"))).unwrap();

        let xlsx = db.records.list_documents(&DocumentFilter {
            file_type: Some("xlsx".into()),
            ..Default::default()
        }).unwrap();
        assert_eq!(xlsx.len(), 2);
        assert_eq!(xlsx[0].filename, "leads.xlsx");

        let s1_xlsx = db.records.list_documents(&DocumentFilter {
            file_type: Some("xlsx".into()),
            session_id: Some("s1".into()),
            limit: None,
        }).unwrap();
        assert_eq!(s1_xlsx.len(), 1);
        assert_eq!(s1_xlsx[0].filename, "budget.xlsx");
    }

    #[test]
    fn test_unfiltered_document_listing_is_capped() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        for i in 0..25 {
            db.records.save_document(&doc(&format!("f{}.md", i), "md", None)).unwrap();
        }
        assert_eq!(db.records.list_documents(&DocumentFilter::default()).unwrap().len(), 20);
    }

    #[test]
    fn test_filtered_document_listing_returns_every_match() {
        let db = MemoryDatabase::new_in_memory().unwrap();
        for i in 0..25 {
            db.records.save_document(&doc(&format!("sheet{}.xlsx", i), "xlsx", Some("s1"))).unwrap();
        }
        db.records.save_document(&doc("notes.md", "md", Some("s1"))).unwrap();

        let by_type = DocumentFilter { file_type: Some("xlsx".into()), ..Default::default() };
        assert_eq!(db.records.list_documents(&by_type).unwrap().len(), 25);

        let by_session = DocumentFilter { session_id: Some("s1".into()), ..Default::default() };
        assert_eq!(db.records.list_documents(&by_session).unwrap().len(), 26);

        let capped = DocumentFilter { limit: Some(5), ..by_type };
        assert_eq!(db.records.list_documents(&capped).unwrap().len(), 5);
    }
}
