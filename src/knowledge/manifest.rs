//! 수집 매니페스트 - rusqlite 기반 내구성 장부
//!
//! 저장소가 어떤 임베딩 함수로 만들어졌는지, 토픽별로 어떤 콘텐츠가
//! 언제 수집되었는지를 기록합니다. 콘텐츠 해시 덕분에 변하지 않은
//! 토픽의 재수집은 값싼 no-op이 됩니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{KnowledgeError, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.vidya-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vidya-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 매니페스트의 토픽 엔트리
#[derive(Debug, Clone, Serialize)]
pub struct TopicEntry {
    pub topic: String,
    pub source_url: String,
    pub content_hash: String,
    pub passage_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// 매니페스트 통계
#[derive(Debug, Clone, Serialize)]
pub struct ManifestStats {
    pub topic_count: usize,
    pub passage_count: usize,
}

// ============================================================================
// Content Hash
// ============================================================================

/// 패시지 목록의 콘텐츠 해시 (SHA-256 hex)
///
/// 길이 프리픽스를 섞어 패시지 경계가 해시에 반영되도록 합니다.
pub fn content_hash(passages: &[String]) -> String {
    let mut hasher = Sha256::new();
    for passage in passages {
        hasher.update((passage.len() as u64).to_le_bytes());
        hasher.update(passage.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// IngestManifest
// ============================================================================

/// 수집 매니페스트
pub struct IngestManifest {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IngestManifest {
    /// 매니페스트 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| KnowledgeError::store("create manifest directory", e))?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let manifest = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        manifest.initialize()?;
        Ok(manifest)
    }

    /// 매니페스트 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KnowledgeError::store("manifest lock poisoned", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS topics (
                topic TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                passage_count INTEGER NOT NULL,
                ingested_at TEXT NOT NULL
            )",
            [],
        )?;

        tracing::debug!("Ingest manifest initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 기록된 임베딩 함수 식별자 조회
    pub fn embedder_identity(&self) -> Result<Option<String>> {
        let conn = self.lock()?;

        let identity = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedder'",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok();

        Ok(identity)
    }

    /// 임베딩 함수 식별자 기록
    pub fn record_embedder(&self, identity: &str) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('embedder', ?1)",
            params![identity],
        )?;

        Ok(())
    }

    /// 토픽의 기록된 콘텐츠 해시 조회
    pub fn topic_hash(&self, topic: &str) -> Result<Option<String>> {
        let conn = self.lock()?;

        let hash = conn
            .query_row(
                "SELECT content_hash FROM topics WHERE topic = ?1",
                params![topic],
                |row| row.get::<_, String>(0),
            )
            .ok();

        Ok(hash)
    }

    /// 토픽 수집 결과 기록 (같은 토픽이면 덮어쓰기)
    pub fn record_topic(
        &self,
        topic: &str,
        source_url: &str,
        hash: &str,
        passage_count: usize,
    ) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT OR REPLACE INTO topics
                 (topic, source_url, content_hash, passage_count, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![topic, source_url, hash, passage_count as i64, now],
        )?;

        Ok(())
    }

    /// 기록된 토픽 목록 (토픽 이름 순)
    pub fn topics(&self) -> Result<Vec<TopicEntry>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT topic, source_url, content_hash, passage_count, ingested_at
             FROM topics ORDER BY topic",
        )?;

        let entries = stmt
            .query_map([], |row| {
                Ok(TopicEntry {
                    topic: row.get(0)?,
                    source_url: row.get(1)?,
                    content_hash: row.get(2)?,
                    passage_count: row.get::<_, i64>(3)? as usize,
                    ingested_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// 매니페스트 통계
    pub fn stats(&self) -> Result<ManifestStats> {
        let conn = self.lock()?;

        let topic_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM topics", [], |row| row.get(0))
            .unwrap_or(0);

        let passage_count: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(passage_count), 0) FROM topics",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(ManifestStats {
            topic_count: topic_count as usize,
            passage_count: passage_count as usize,
        })
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_manifest() -> (TempDir, IngestManifest) {
        let dir = TempDir::new().unwrap();
        let manifest = IngestManifest::open(&dir.path().join("manifest.db")).unwrap();
        (dir, manifest)
    }

    #[test]
    fn test_embedder_identity_roundtrip() {
        let (_dir, manifest) = create_test_manifest();

        assert_eq!(manifest.embedder_identity().unwrap(), None);

        manifest.record_embedder("gemini-embedding-001/768").unwrap();
        assert_eq!(
            manifest.embedder_identity().unwrap(),
            Some("gemini-embedding-001/768".to_string())
        );
    }

    #[test]
    fn test_record_topic_overwrites() {
        let (_dir, manifest) = create_test_manifest();

        manifest
            .record_topic("Rigveda", "https://example.com", "aaa", 10)
            .unwrap();
        manifest
            .record_topic("Rigveda", "https://example.com", "bbb", 12)
            .unwrap();

        let topics = manifest.topics().unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].content_hash, "bbb");
        assert_eq!(topics[0].passage_count, 12);
    }

    #[test]
    fn test_topic_hash_lookup() {
        let (_dir, manifest) = create_test_manifest();

        assert_eq!(manifest.topic_hash("missing").unwrap(), None);

        manifest
            .record_topic("T", "https://example.com", "deadbeef", 3)
            .unwrap();
        assert_eq!(
            manifest.topic_hash("T").unwrap(),
            Some("deadbeef".to_string())
        );
    }

    #[test]
    fn test_stats() {
        let (_dir, manifest) = create_test_manifest();

        manifest
            .record_topic("A", "https://example.com/a", "h1", 4)
            .unwrap();
        manifest
            .record_topic("B", "https://example.com/b", "h2", 6)
            .unwrap();

        let stats = manifest.stats().unwrap();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.passage_count, 10);
    }

    #[test]
    fn test_content_hash_is_stable_and_boundary_aware() {
        let a = vec!["one".to_string(), "two".to_string()];
        let b = vec!["one".to_string(), "two".to_string()];
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);

        // 경계가 다르면 해시도 달라야 함
        let joined = vec!["onetwo".to_string()];
        assert_ne!(content_hash(&a), content_hash(&joined));

        let empty: Vec<String> = vec![];
        assert_ne!(content_hash(&a), content_hash(&empty));
    }

    #[test]
    fn test_reopen_preserves_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.db");

        {
            let manifest = IngestManifest::open(&path).unwrap();
            manifest.record_embedder("stub/8").unwrap();
            manifest
                .record_topic("T", "https://example.com", "hash", 2)
                .unwrap();
        }

        let reopened = IngestManifest::open(&path).unwrap();
        assert_eq!(
            reopened.embedder_identity().unwrap(),
            Some("stub/8".to_string())
        );
        assert_eq!(reopened.topics().unwrap().len(), 1);
    }
}
