//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 패시지와 쿼리를 같은 벡터 공간으로 변환합니다. 수집과 검색이
//! 반드시 동일한 임베딩 함수를 쓰도록 `identity()`가 저장소 매니페스트에
//! 기록되고 오픈 시점에 대조됩니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{KnowledgeError, Result};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 용도 구분
///
/// Gemini API는 저장용 문서와 검색 쿼리에 서로 다른 task type을 받지만
/// 두 경우 모두 같은 벡터 공간을 공유합니다.
/// ref: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    /// 저장할 패시지 (RETRIEVAL_DOCUMENT)
    Passage,
    /// 검색 쿼리 (RETRIEVAL_QUERY)
    Query,
}

impl EmbeddingTask {
    fn as_api_str(&self) -> &'static str {
        match self {
            EmbeddingTask::Passage => "RETRIEVAL_DOCUMENT",
            EmbeddingTask::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 텍스트 임베딩
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>>;

    /// 패시지 임베딩 (수집 시)
    async fn embed_passage(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, EmbeddingTask::Passage).await
    }

    /// 쿼리 임베딩 (검색 시)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text, EmbeddingTask::Query).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 임베딩 함수 식별자 - 매니페스트에 기록되어 실행 간 일관성 검사에 사용
    fn identity(&self) -> String;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트
/// ref: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

const GEMINI_EMBED_MODEL: &str = "gemini-embedding-001";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// 호출 간 최소 딜레이 (무료 티어 60 RPM 준수)
const MIN_DELAY_MS: u64 = 1000;
/// 429/네트워크 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedder {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl GeminiEmbedder {
    /// 새 Gemini 임베더 생성
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> anyhow::Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            api_key,
            client,
            dimension,
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(get_api_key()?)
    }

    /// API 호출 간 최소 간격 유지 (버스트 방지)
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            let min_delay = Duration::from_millis(MIN_DELAY_MS);
            if elapsed < min_delay {
                tokio::time::sleep(min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Gemini embedContent 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>> {
        // 빈 텍스트는 영벡터로
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: format!("models/{}", GEMINI_EMBED_MODEL),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task.as_api_str().to_string(),
            output_dimensionality: self.dimension,
        };

        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding retry in {:?} (attempt {}/{}): {}",
                    backoff,
                    attempt,
                    MAX_RETRIES,
                    last_error
                );
                tokio::time::sleep(backoff).await;
            }

            self.pace().await;

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = format!("request failed: {}", e);
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| KnowledgeError::Embedding(format!("failed to read body: {}", e)))?;

            if status.is_success() {
                let parsed: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
                    KnowledgeError::Embedding(format!("failed to parse response: {}", e))
                })?;
                return Ok(parsed.embedding.values);
            }

            if status.as_u16() == 429 {
                last_error = "rate limit exceeded (429)".to_string();
                continue;
            }

            // 그 외 상태는 재시도 없이 실패
            return Err(KnowledgeError::Embedding(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        Err(KnowledgeError::Embedding(format!(
            "{} (after {} retries)",
            last_error, MAX_RETRIES
        )))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn identity(&self) -> String {
        format!("{}/{}", GEMINI_EMBED_MODEL, self.dimension)
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (GEMINI_API_KEY > GOOGLE_AI_API_KEY)
pub fn get_api_key() -> anyhow::Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================
