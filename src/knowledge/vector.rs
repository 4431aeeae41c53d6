//! 패시지 타입 및 벡터 인덱스 트레이트
//!
//! 저장/검색의 원자 단위인 패시지와, 그 위의 ANN 인덱스 인터페이스를
//! 정의합니다. 패시지 id는 (토픽, 순번)으로 결정적이어서 같은 토픽을
//! 다시 수집하면 중복이 아니라 덮어쓰기가 됩니다.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 검색 기본 k값
pub const DEFAULT_RETRIEVAL_K: usize = 5;

// ============================================================================
// Types
// ============================================================================

/// 패시지 식별자 - (토픽, 1부터 시작하는 순번)
///
/// 토픽과 순번에서 결정되므로 실행 간에 안정적입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassageId {
    /// 카탈로그 토픽 이름
    pub topic: String,
    /// 토픽 내 순번 (1-based)
    pub index: u32,
}

impl PassageId {
    pub fn new(topic: impl Into<String>, index: u32) -> Self {
        Self {
            topic: topic.into(),
            index,
        }
    }
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.index)
    }
}

/// 저장용 패시지 레코드
#[derive(Debug, Clone)]
pub struct PassageRecord {
    pub id: PassageId,
    /// 패시지 본문
    pub text: String,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색된 패시지
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub id: PassageId,
    pub text: String,
    /// 유사도 스코어 (높을수록 가까움)
    pub similarity: f32,
}

/// 검색 결과 - 유사도 내림차순으로 정렬된 최대 k개의 패시지
///
/// 빈 결과는 정상 상태입니다 ("관련 자료 없음"은 에러가 아님).
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub passages: Vec<RetrievedPassage>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// 패시지 본문만 추출 (순위 순서 유지)
    pub fn texts(&self) -> Vec<String> {
        self.passages.iter().map(|p| p.text.clone()).collect()
    }

    /// 출처 id 목록 (순위 순서 유지)
    pub fn ids(&self) -> Vec<PassageId> {
        self.passages.iter().map(|p| p.id.clone()).collect()
    }
}

// ============================================================================
// PassageIndex Trait
// ============================================================================

/// 패시지 벡터 인덱스 트레이트
///
/// 토픽 네임스페이스 단위로 쓰기가 격리되어, 서로 다른 토픽의
/// 동시 수집과 검색이 안전합니다.
#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// 패시지 배치 삽입
    async fn insert_batch(&self, records: &[PassageRecord]) -> Result<usize>;

    /// 토픽의 모든 패시지 삭제
    async fn delete_topic(&self, topic: &str) -> Result<usize>;

    /// 쿼리 임베딩으로 k-최근접 패시지 검색
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<RetrievedPassage>>;

    /// 전체 패시지 수
    async fn count(&self) -> Result<usize>;

    /// 특정 토픽의 패시지 수
    async fn topic_count(&self, topic: &str) -> Result<usize>;
}

// ============================================================================
// Tests
// ============================================================================
