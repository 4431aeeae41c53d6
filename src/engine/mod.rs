//! KnowledgeEngine - RAG 파이프라인 오케스트레이터
//!
//! 카탈로그 → 스크랩 → 수집을 묶는 시작 단계와, 검색 → 2단계 합성을
//! 묶는 질의 단계를 제공합니다. 협력자(스크래퍼/저장소/합성기)는 전역이
//! 아니라 생성 시 명시적으로 주입됩니다.

use std::sync::Arc;

use futures::StreamExt;

use crate::catalog::SourceCatalog;
use crate::compose::AnswerComposer;
use crate::error::Result;
use crate::knowledge::{IngestOutcome, PassageId, PassageStore, DEFAULT_RETRIEVAL_K};
use crate::scraper::PassageSource;

/// 수집 워커 풀 상한 - 토픽별 fetch가 블로킹 네트워크 호출이므로
/// min(토픽 수, 8)개를 동시에 돌립니다.
const INGEST_CONCURRENCY: usize = 8;

// ============================================================================
// Types
// ============================================================================

/// 카탈로그 수집 리포트
///
/// 토픽 단위 실패는 격리되어 여기 집계될 뿐, 수집 전체를 중단시키지
/// 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// 새로 수집(재수집)된 토픽 수
    pub topics_ingested: usize,
    /// 콘텐츠가 그대로라 건너뛴 토픽 수
    pub topics_unchanged: usize,
    /// 실패한 토픽 수
    pub topics_failed: usize,
    /// 이번 실행에서 저장된 패시지 수
    pub passages_stored: usize,
}

/// 질의 결과
///
/// 검색 결과가 비었을 때는 실패가 아니라 별도의 `NoMatches`로
/// 구분됩니다. 답을 지어내지 않습니다.
#[derive(Debug, Clone)]
pub enum QueryResponse {
    /// 합성된 최종 답변과 근거 패시지 출처
    Answered {
        text: String,
        sources: Vec<PassageId>,
    },
    /// 관련 자료 없음
    NoMatches,
}

// ============================================================================
// KnowledgeEngine
// ============================================================================

/// RAG 파이프라인 엔진
pub struct KnowledgeEngine {
    catalog: SourceCatalog,
    source: Arc<dyn PassageSource>,
    store: Arc<PassageStore>,
    composer: AnswerComposer,
}

impl KnowledgeEngine {
    /// 의존성을 주입하여 엔진 생성
    pub fn new(
        catalog: SourceCatalog,
        source: Arc<dyn PassageSource>,
        store: Arc<PassageStore>,
        composer: AnswerComposer,
    ) -> Self {
        Self {
            catalog,
            source,
            store,
            composer,
        }
    }

    /// 카탈로그 전체 수집 (시작 단계)
    ///
    /// 토픽별 fetch+ingest를 바운디드 워커 풀로 병렬 실행합니다.
    /// 개별 토픽의 실패는 로그 후 건너뛰며 나머지 수집을 막지 않습니다.
    pub async fn initialize(&self, force: bool) -> IngestReport {
        let workers = INGEST_CONCURRENCY.min(self.catalog.len().max(1));

        let results: Vec<(String, Result<IngestOutcome>)> =
            futures::stream::iter(self.catalog.iter().map(|(topic, url)| {
                let topic = topic.to_string();
                let url = url.to_string();
                async move {
                    let outcome = self.ingest_topic(&topic, &url, force).await;
                    (topic, outcome)
                }
            }))
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut report = IngestReport::default();

        for (topic, outcome) in results {
            match outcome {
                Ok(o) if o.unchanged => report.topics_unchanged += 1,
                Ok(o) => {
                    report.topics_ingested += 1;
                    report.passages_stored += o.stored;
                }
                Err(e) => {
                    tracing::warn!("Topic '{}' failed, skipping: {}", topic, e);
                    report.topics_failed += 1;
                }
            }
        }

        tracing::info!(
            "Catalog ingest done: {} ingested, {} unchanged, {} failed, {} passages",
            report.topics_ingested,
            report.topics_unchanged,
            report.topics_failed,
            report.passages_stored
        );

        report
    }

    /// 단일 토픽 수집
    pub async fn ingest_topic(
        &self,
        topic: &str,
        url: &str,
        force: bool,
    ) -> Result<IngestOutcome> {
        let passages = self.source.fetch_passages(url).await?;
        self.store.ingest(topic, url, &passages, force).await
    }

    /// 질문에 대한 최종 답변 생성 (질의 단계)
    ///
    /// 검색이 비면 생성 호출 없이 `NoMatches`를 반환합니다.
    /// 질의 시점의 `Embedding`/`Generation`/`Store` 에러는 전파됩니다.
    pub async fn query(&self, question: &str) -> Result<QueryResponse> {
        let retrieved = self.store.retrieve(question, DEFAULT_RETRIEVAL_K).await?;

        if retrieved.is_empty() {
            tracing::info!("No relevant passages for query");
            return Ok(QueryResponse::NoMatches);
        }

        let sources = retrieved.ids();
        let text = self
            .composer
            .answer(question, &retrieved.texts())
            .await?;

        Ok(QueryResponse::Answered { text, sources })
    }

    /// 카탈로그 접근
    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    /// 내부 저장소 접근
    pub fn store(&self) -> &PassageStore {
        &self.store
    }
}

// ============================================================================
// Tests
// ============================================================================
