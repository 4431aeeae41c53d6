//! 생성 모듈 - Gemini API를 통한 답변 생성
//!
//! AnswerComposer의 두 단계가 공유하는 텍스트 생성 능력입니다.
//! 프롬프트 → 텍스트의 순수 요청/응답 호출이며 호출 간 상태가 없습니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::get_api_key;
use crate::error::{KnowledgeError, Result};

/// Gemini generateContent 엔드포인트 베이스
/// ref: https://ai.google.dev/gemini-api/docs/text-generation
const GEMINI_GENERATE_URL_BASE: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";

/// 기본 생성 모델
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.0-flash";

/// 생성 타임아웃 (초)
const GENERATION_TIMEOUT_SECS: u64 = 30;
/// 429/네트워크 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 텍스트 생성 프로바이더 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 프롬프트로부터 텍스트 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Generation
// ============================================================================

/// Google Gemini 생성 구현체
#[derive(Debug)]
pub struct GeminiGenerator {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl GeminiGenerator {
    /// 새 Gemini 생성기 생성
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Self::with_model(api_key, DEFAULT_GENERATION_MODEL)
    }

    /// 모델을 지정하여 생성
    pub fn with_model(api_key: String, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GENERATION_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            api_key,
            client,
            model: model.to_string(),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(get_api_key()?)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            GEMINI_GENERATE_URL_BASE, self.model
        )
    }
}

/// Gemini generateContent 요청 본문
#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl GenerationProvider for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Generation retry in {:?} (attempt {}/{}): {}",
                    backoff,
                    attempt,
                    MAX_RETRIES,
                    last_error
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(self.endpoint())
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
                .map_err(|e| KnowledgeError::Generation(format!("failed to read body: {}", e)))?;

            if status.is_success() {
                let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
                    KnowledgeError::Generation(format!("failed to parse response: {}", e))
                })?;

                let text: String = parsed
                    .candidates
                    .first()
                    .map(|c| {
                        c.content
                            .parts
                            .iter()
                            .map(|p| p.text.as_str())
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();

                if text.trim().is_empty() {
                    return Err(KnowledgeError::Generation(
                        "model returned no candidates".to_string(),
                    ));
                }

                return Ok(text.trim().to_string());
            }

            if status.as_u16() == 429 {
                last_error = "rate limit exceeded (429)".to_string();
                continue;
            }

            return Err(KnowledgeError::Generation(format!(
                "Gemini API error ({}): {}",
                status, body
            )));
        }

        Err(KnowledgeError::Generation(format!(
            "{} (after {} retries)",
            last_error, MAX_RETRIES
        )))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
