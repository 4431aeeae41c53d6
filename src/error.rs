//! 에러 타입 정의
//!
//! RAG 파이프라인의 실패 분류입니다. 수집 단계 에러(Fetch/Parse/패시지별
//! Embedding)는 토픽/패시지 단위로 격리되고, 질의 단계 에러(Embedding/
//! Generation/Store)는 호출자에게 전파됩니다.

use thiserror::Error;

/// RAG 코어 에러 타입
#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// 네트워크/HTTP 실패
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// 파싱 불가능한 응답 (추출된 문단 없음 포함)
    #[error("no parseable content at {url}: {reason}")]
    Parse { url: String, reason: String },

    /// 임베딩 계산 실패 (패시지 또는 쿼리)
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// 답변 생성 실패
    #[error("generation failed: {0}")]
    Generation(String),

    /// 저장소 계층 실패
    #[error("store error: {0}")]
    Store(String),

    /// 저장소의 임베딩 함수와 현재 임베딩 함수 불일치
    ///
    /// 임베딩 공간이 섞이면 검색 품질이 조용히 무너지므로
    /// 저장소 오픈 시점에 즉시 실패합니다.
    #[error("embedder mismatch: store was built with '{stored}', current is '{current}'")]
    EmbedderMismatch { stored: String, current: String },
}

impl KnowledgeError {
    /// Store 에러 생성 헬퍼
    pub fn store(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Store(format!("{}: {}", context, err))
    }
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<lancedb::Error> for KnowledgeError {
    fn from(err: lancedb::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<arrow_schema::ArrowError> for KnowledgeError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        Self::Store(err.to_string())
    }
}

/// RAG 코어 Result 타입
pub type Result<T> = std::result::Result<T, KnowledgeError>;
