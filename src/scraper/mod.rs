//! 웹 스크래퍼 모듈 - 원문 URL에서 패시지 추출
//!
//! URL을 가져와 HTML에서 문단(`<p>`) 단위 패시지를 뽑아냅니다.
//! fetch와 저장은 분리되어 있습니다: 이 모듈은 저장소를 건드리지 않는
//! 순수 (URL) → 패시지 목록 변환입니다.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::error::{KnowledgeError, Result};

/// fetch 타임아웃 (초)
const FETCH_TIMEOUT_SECS: u64 = 10;
/// 일시적 실패 시 최대 시도 횟수
const MAX_ATTEMPTS: u32 = 3;
/// 재시도 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;

/// 패시지로 취급할 최소 문자 수 (네비게이션/캡션 등 잡음 제거)
const MIN_PASSAGE_CHARS: usize = 30;
/// 패시지 최대 문자 수 - 초과 시 문장 경계에서 분할
const MAX_PASSAGE_CHARS: usize = 1500;

// ============================================================================
// PassageSource Trait
// ============================================================================

/// 패시지 소스 트레이트
///
/// URL에서 순서 있는 패시지 목록을 얻는 인터페이스입니다.
/// 엔진은 이 심(seam)을 통해 실제 스크래퍼나 테스트 스텁을 주입받습니다.
#[async_trait]
pub trait PassageSource: Send + Sync {
    /// URL에서 패시지 추출
    async fn fetch_passages(&self, url: &str) -> Result<Vec<String>>;
}

// ============================================================================
// WebScraper
// ============================================================================

/// 웹 스크래퍼
pub struct WebScraper {
    client: reqwest::Client,
}

impl WebScraper {
    /// 새 스크래퍼 생성
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vidya-rag/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client })
    }

    /// URL 응답 본문 가져오기 (일시적 실패는 백오프 재시도)
    async fn fetch_html(&self, url: &str) -> Result<String> {
        let mut last_reason = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    url,
                    backoff,
                    attempt + 1,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self.client.get(url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    // 네트워크/타임아웃 - 재시도 대상
                    last_reason = e.to_string();
                    continue;
                }
            };

            let status = response.status();

            if status.is_success() {
                return response.text().await.map_err(|e| KnowledgeError::Fetch {
                    url: url.to_string(),
                    reason: format!("failed to read body: {}", e),
                });
            }

            // 429/5xx는 일시적일 수 있으므로 재시도, 그 외 상태는 즉시 실패
            if status.as_u16() == 429 || status.is_server_error() {
                last_reason = format!("HTTP {}", status);
                continue;
            }

            return Err(KnowledgeError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        Err(KnowledgeError::Fetch {
            url: url.to_string(),
            reason: format!("{} (after {} attempts)", last_reason, MAX_ATTEMPTS),
        })
    }
}

#[async_trait]
impl PassageSource for WebScraper {
    async fn fetch_passages(&self, url: &str) -> Result<Vec<String>> {
        tracing::info!("Scraping: {}", url);

        let html = self.fetch_html(url).await?;
        let passages = extract_passages(&html);

        if passages.is_empty() {
            return Err(KnowledgeError::Parse {
                url: url.to_string(),
                reason: "no paragraph content extracted".to_string(),
            });
        }

        tracing::debug!("Extracted {} passages from {}", passages.len(), url);
        Ok(passages)
    }
}

// ============================================================================
// Passage Extraction
// ============================================================================

/// HTML에서 문단 단위 패시지 추출
///
/// `<p>` 요소를 문서 순서대로 읽고, 공백을 정리하고, 잡음 수준의
/// 짧은 조각은 버리고, 지나치게 긴 문단은 문장 경계에서 나눕니다.
pub fn extract_passages(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    let mut passages = Vec::new();

    if let Ok(selector) = Selector::parse("p") {
        for element in document.select(&selector) {
            let text = normalize_whitespace(&element.text().collect::<String>());
            if text.chars().count() < MIN_PASSAGE_CHARS {
                continue;
            }

            for piece in split_long_passage(&text) {
                passages.push(piece);
            }
        }
    }

    passages
}

/// 연속 공백을 단일 공백으로 정리
fn normalize_whitespace(text: &str) -> String {
    if let Ok(re) = regex::Regex::new(r"\s+") {
        re.replace_all(text, " ").trim().to_string()
    } else {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// 긴 문단을 문장 경계에서 분할
///
/// 임베딩 입력 크기를 넘지 않도록 MAX_PASSAGE_CHARS를 상한으로
/// 문장을 누적합니다. 문장 하나가 상한을 넘으면 그대로 한 조각이 됩니다.
fn split_long_passage(text: &str) -> Vec<String> {
    if text.len() <= MAX_PASSAGE_CHARS {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if !current.is_empty() && current.len() + sentence.len() + 1 > MAX_PASSAGE_CHARS {
            pieces.push(current.trim().to_string());
            current = String::new();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }

    pieces
}

/// 문장 경계(". ", "! ", "? ") 기준 분할
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') && bytes.get(i + 1) == Some(&b' ') {
            sentences.push(text[start..=i].trim());
            start = i + 2;
        }
    }

    if start < text.len() {
        sentences.push(text[start..].trim());
    }

    sentences.retain(|s| !s.is_empty());
    sentences
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraper_creation() {
        let scraper = WebScraper::new();
        assert!(scraper.is_ok());
    }

    #[test]
    fn test_extract_passages_in_document_order() {
        let html = r#"
            <html><body>
                <p>First paragraph with enough characters to pass the filter.</p>
                <p>Second paragraph, also long enough to be kept as a passage.</p>
            </body></html>
        "#;

        let passages = extract_passages(html);
        assert_eq!(passages.len(), 2);
        assert!(passages[0].starts_with("First paragraph"));
        assert!(passages[1].starts_with("Second paragraph"));
    }

    #[test]
    fn test_extract_passages_drops_short_fragments() {
        let html = r#"
            <html><body>
                <p>Menu</p>
                <p>A real paragraph that is comfortably longer than the noise threshold.</p>
                <p>OK</p>
            </body></html>
        "#;

        let passages = extract_passages(html);
        assert_eq!(passages.len(), 1);
        assert!(passages[0].contains("real paragraph"));
    }

    #[test]
    fn test_extract_passages_normalizes_whitespace() {
        let html = "<html><body><p>Spread   across\n   several\t lines of markup, but still one passage.</p></body></html>";

        let passages = extract_passages(html);
        assert_eq!(passages.len(), 1);
        assert_eq!(
            passages[0],
            "Spread across several lines of markup, but still one passage."
        );
    }

    #[test]
    fn test_extract_passages_empty_document() {
        assert!(extract_passages("<html><body></body></html>").is_empty());
        assert!(extract_passages("not markup at all").is_empty());
    }

    #[test]
    fn test_split_long_passage() {
        let sentence = "This sentence is about forty chars long. ";
        let text = normalize_whitespace(&sentence.repeat(50));

        let pieces = split_long_passage(&text);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.len() <= MAX_PASSAGE_CHARS);
            assert!(!piece.is_empty());
        }
    }

    #[test]
    fn test_split_long_passage_short_input_unchanged() {
        let text = "Short enough to stay whole.";
        assert_eq!(split_long_passage(text), vec![text.to_string()]);
    }

    #[test]
    fn test_split_sentences() {
        let text = "One. Two! Three? Four";
        let sentences = split_sentences(text);
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }
}
