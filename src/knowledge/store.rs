//! PassageStore - 패시지 수집/검색 파사드
//!
//! 매니페스트(rusqlite) + 벡터 인덱스(LanceDB) + 임베더를 묶어
//! 멱등 수집과 k-최근접 검색을 제공합니다. 임베더는 명시적으로
//! 주입되며, 저장소에 기록된 임베딩 함수와 다르면 열기 단계에서
//! 바로 실패합니다.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::embedding::EmbeddingProvider;
use crate::error::{KnowledgeError, Result};

use super::lance::LancePassageIndex;
use super::manifest::{content_hash, IngestManifest, TopicEntry};
use super::vector::{PassageId, PassageIndex, PassageRecord, RetrievalResult};

/// 매니페스트 파일 이름
const MANIFEST_FILE: &str = "manifest.db";
/// 벡터 인덱스 디렉토리 이름
const INDEX_DIR: &str = "passages.lance";

/// 데이터 디렉토리 내 매니페스트 경로
pub fn manifest_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join(MANIFEST_FILE)
}

/// 데이터 디렉토리 내 벡터 인덱스 경로
pub fn index_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join(INDEX_DIR)
}

// ============================================================================
// Types
// ============================================================================

/// 단일 토픽 수집 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// 저장된 패시지 수
    pub stored: usize,
    /// 임베딩 실패로 건너뛴 패시지 수
    pub skipped: usize,
    /// 콘텐츠가 변하지 않아 no-op으로 끝났는지 여부
    pub unchanged: bool,
}

impl IngestOutcome {
    fn unchanged_noop() -> Self {
        Self {
            stored: 0,
            skipped: 0,
            unchanged: true,
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// 매니페스트에 기록된 토픽 수
    pub topic_count: usize,
    /// 벡터 인덱스의 패시지 수
    pub passage_count: usize,
}

// ============================================================================
// PassageStore
// ============================================================================

/// 영속 패시지 저장소
pub struct PassageStore {
    manifest: IngestManifest,
    index: LancePassageIndex,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PassageStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// 첫 오픈 시 임베더 식별자를 매니페스트에 기록하고, 이후 오픈에서는
    /// 기록된 식별자와 현재 임베더가 일치하는지 검사합니다.
    pub async fn open(data_dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let manifest = IngestManifest::open(&manifest_path(data_dir))?;

        let current = embedder.identity();
        match manifest.embedder_identity()? {
            Some(stored) if stored != current => {
                return Err(KnowledgeError::EmbedderMismatch { stored, current });
            }
            Some(_) => {}
            None => manifest.record_embedder(&current)?,
        }

        let index =
            LancePassageIndex::open(&index_path(data_dir), embedder.dimension()).await?;

        Ok(Self {
            manifest,
            index,
            embedder,
        })
    }

    /// 토픽 패시지 수집
    ///
    /// 패시지별 임베딩 실패는 경고 후 건너뛰고 나머지를 계속 저장합니다.
    /// id가 (토픽, 순번)으로 결정적이므로 재수집은 덮어쓰기입니다:
    /// 기존 토픽 행을 지우고 새 배치를 넣습니다. 콘텐츠 해시가 기록과
    /// 같으면 (force가 아닌 한) 아무것도 하지 않습니다.
    pub async fn ingest(
        &self,
        topic: &str,
        source_url: &str,
        passages: &[String],
        force: bool,
    ) -> Result<IngestOutcome> {
        let hash = content_hash(passages);

        if !force && self.manifest.topic_hash(topic)?.as_deref() == Some(hash.as_str()) {
            tracing::info!("Topic '{}' unchanged, skipping re-embed", topic);
            return Ok(IngestOutcome::unchanged_noop());
        }

        let mut records = Vec::with_capacity(passages.len());
        let mut skipped = 0;

        for (i, text) in passages.iter().enumerate() {
            match self.embedder.embed_passage(text).await {
                Ok(embedding) => records.push(PassageRecord {
                    id: PassageId::new(topic, (i + 1) as u32),
                    text: text.clone(),
                    embedding,
                }),
                Err(e) => {
                    tracing::warn!("Skipping passage {}#{}: {}", topic, i + 1, e);
                    skipped += 1;
                }
            }
        }

        // 덮어쓰기: 기존 행 제거 후 삽입
        self.index.delete_topic(topic).await?;
        let stored = self.index.insert_batch(&records).await?;
        self.manifest.record_topic(topic, source_url, &hash, stored)?;

        tracing::info!(
            "Ingested topic '{}': {} stored, {} skipped",
            topic,
            stored,
            skipped
        );

        Ok(IngestOutcome {
            stored,
            skipped,
            unchanged: false,
        })
    }

    /// k-최근접 패시지 검색
    ///
    /// 빈 저장소에서는 빈 결과를 반환합니다 (에러 아님). 쿼리 임베딩
    /// 실패는 `Embedding` 에러로 전파됩니다.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if self.index.count().await? == 0 {
            return Ok(RetrievalResult::default());
        }

        let query_embedding = self.embedder.embed_query(query).await?;
        let passages = self.index.search(&query_embedding, k).await?;

        Ok(RetrievalResult { passages })
    }

    /// 매니페스트에 기록된 토픽 목록
    pub fn topics(&self) -> Result<Vec<TopicEntry>> {
        self.manifest.topics()
    }

    /// 저장소 통계
    pub async fn stats(&self) -> Result<StoreStats> {
        let manifest_stats = self.manifest.stats()?;
        let passage_count = self.index.count().await?;

        Ok(StoreStats {
            topic_count: manifest_stats.topic_count,
            passage_count,
        })
    }

    /// 주입된 임베더 식별자
    pub fn embedder_identity(&self) -> String {
        self.embedder.identity()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingTask;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tempfile::TempDir;

    const STUB_DIMENSION: usize = 32;

    /// 단어 바이트 합 기반의 결정적 스텁 임베더
    ///
    /// 단어가 겹치는 텍스트일수록 L2 거리가 가까워집니다.
    struct StubEmbedder {
        fail_on: HashSet<String>,
    }

    impl StubEmbedder {
        fn new() -> Self {
            Self {
                fail_on: HashSet::new(),
            }
        }

        fn failing_on(texts: &[&str]) -> Self {
            Self {
                fail_on: texts.iter().map(|t| t.to_string()).collect(),
            }
        }
    }

    fn stub_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; STUB_DIMENSION];
        for word in text.to_lowercase().split_whitespace() {
            let sum: u64 = word.bytes().map(|b| b as u64).sum();
            v[(sum % STUB_DIMENSION as u64) as usize] += 1.0;
        }
        v
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>> {
            if self.fail_on.contains(text) {
                return Err(KnowledgeError::Embedding(format!(
                    "stub failure for '{}'",
                    text
                )));
            }
            Ok(stub_vector(text))
        }

        fn dimension(&self) -> usize {
            STUB_DIMENSION
        }

        fn identity(&self) -> String {
            format!("stub/{}", STUB_DIMENSION)
        }
    }

    // 식별자만 다른 임베더 (불일치 검사용)
    struct OtherEmbedder;

    #[async_trait]
    impl EmbeddingProvider for OtherEmbedder {
        async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Vec<f32>> {
            Ok(stub_vector(text))
        }

        fn dimension(&self) -> usize {
            STUB_DIMENSION
        }

        fn identity(&self) -> String {
            "other/32".to_string()
        }
    }

    async fn open_test_store(dir: &TempDir) -> PassageStore {
        PassageStore::open(dir.path(), Arc::new(StubEmbedder::new()))
            .await
            .unwrap()
    }

    fn passages(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_ingest_then_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = open_test_store(&dir).await;

        let outcome = store
            .ingest(
                "TopicA",
                "https://example.com/a",
                &passages(&["Alpha text.", "Beta text."]),
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.stored, 2);
        assert_eq!(outcome.skipped, 0);
        assert!(!outcome.unchanged);

        let result = store.retrieve("alpha", 1).await.unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.passages[0].text.contains("Alpha text."));
        assert_eq!(result.passages[0].id, PassageId::new("TopicA", 1));
    }

    #[tokio::test]
    async fn test_double_ingest_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_test_store(&dir).await;

        let texts = passages(&["One passage here.", "Two passage here.", "Three passage."]);

        store
            .ingest("T", "https://example.com", &texts, false)
            .await
            .unwrap();

        // 같은 콘텐츠 재수집 → no-op
        let second = store
            .ingest("T", "https://example.com", &texts, false)
            .await
            .unwrap();
        assert!(second.unchanged);
        assert_eq!(store.stats().await.unwrap().passage_count, 3);

        // force 재수집도 중복을 만들지 않음 (덮어쓰기)
        let forced = store
            .ingest("T", "https://example.com", &texts, true)
            .await
            .unwrap();
        assert!(!forced.unchanged);
        assert_eq!(forced.stored, 3);
        assert_eq!(store.stats().await.unwrap().passage_count, 3);
    }

    #[tokio::test]
    async fn test_changed_content_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_test_store(&dir).await;

        store
            .ingest(
                "T",
                "https://example.com",
                &passages(&["Old first.", "Old second.", "Old third."]),
                false,
            )
            .await
            .unwrap();

        let outcome = store
            .ingest(
                "T",
                "https://example.com",
                &passages(&["New first.", "New second."]),
                false,
            )
            .await
            .unwrap();
        assert!(!outcome.unchanged);
        assert_eq!(outcome.stored, 2);

        // 이전 3개가 아니라 새 2개만 남아야 함
        assert_eq!(store.stats().await.unwrap().passage_count, 2);
    }

    #[tokio::test]
    async fn test_partial_embedding_failure_is_contained() {
        let dir = TempDir::new().unwrap();
        let texts: Vec<String> = (1..=10).map(|i| format!("Passage number {}.", i)).collect();

        let embedder = StubEmbedder::failing_on(&["Passage number 3."]);
        let store = PassageStore::open(dir.path(), Arc::new(embedder))
            .await
            .unwrap();

        let outcome = store
            .ingest("T", "https://example.com", &texts, false)
            .await
            .unwrap();

        assert_eq!(outcome.stored, 9);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.stats().await.unwrap().passage_count, 9);
    }

    #[tokio::test]
    async fn test_retrieve_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = open_test_store(&dir).await;

        let result = store.retrieve("anything", 5).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let store = open_test_store(&dir).await;

        store
            .ingest(
                "T",
                "https://example.com",
                &passages(&["River hymn verse.", "Fire ritual verse.", "Sky god verse."]),
                false,
            )
            .await
            .unwrap();

        let first = store.retrieve("fire ritual", 3).await.unwrap();
        let second = store.retrieve("fire ritual", 3).await.unwrap();

        assert_eq!(first.ids(), second.ids());
        assert_eq!(first.texts(), second.texts());
    }

    #[tokio::test]
    async fn test_embedder_mismatch_fails_open() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_test_store(&dir).await;
            store
                .ingest("T", "https://example.com", &passages(&["Some text."]), false)
                .await
                .unwrap();
        }

        let result = PassageStore::open(dir.path(), Arc::new(OtherEmbedder)).await;
        assert!(matches!(
            result.err(),
            Some(KnowledgeError::EmbedderMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_reopen_preserves_passages() {
        let dir = TempDir::new().unwrap();

        {
            let store = open_test_store(&dir).await;
            store
                .ingest(
                    "T",
                    "https://example.com",
                    &passages(&["Persistent passage text."]),
                    false,
                )
                .await
                .unwrap();
        }

        // 재오픈 후 재수집 없이 검색 가능해야 함
        let store = open_test_store(&dir).await;
        assert_eq!(store.stats().await.unwrap().passage_count, 1);

        let result = store.retrieve("persistent passage", 1).await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
