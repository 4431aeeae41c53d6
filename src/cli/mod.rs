//! CLI 모듈
//!
//! vidya-rag 명령어 정의 및 구현. RAG 코어의 호출자 표면이며,
//! 코어 로직은 전부 엔진/저장소 쪽에 있습니다.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::catalog::SourceCatalog;
use crate::compose::AnswerComposer;
use crate::embedding::{has_api_key, EmbeddingProvider, GeminiEmbedder};
use crate::engine::{KnowledgeEngine, QueryResponse};
use crate::generation::{GeminiGenerator, GenerationProvider};
use crate::knowledge::{
    get_data_dir, index_path, manifest_path, IngestManifest, LancePassageIndex, PassageIndex,
    PassageStore, DEFAULT_RETRIEVAL_K,
};
use crate::scraper::WebScraper;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "vidya-rag")]
#[command(version, about = "경전 지식베이스 RAG 어시스턴트", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 카탈로그의 원문을 수집하여 지식베이스 구축
    Ingest {
        /// 특정 토픽만 수집
        #[arg(short, long)]
        topic: Option<String>,

        /// 콘텐츠가 그대로여도 강제 재수집 (재임베딩)
        #[arg(long)]
        force: bool,
    },

    /// 질문에 대한 2단계 RAG 답변 생성
    Ask {
        /// 질문
        question: String,
    },

    /// 지식베이스 벡터 검색 (답변 생성 없음)
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value_t = DEFAULT_RETRIEVAL_K)]
        limit: usize,
    },

    /// 내장 카탈로그 토픽 목록
    Topics,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { topic, force } => cmd_ingest(topic, force).await,
        Commands::Ask { question } => cmd_ask(&question).await,
        Commands::Search { query, limit } => cmd_search(&query, limit).await,
        Commands::Topics => cmd_topics(),
        Commands::Status => cmd_status().await,
    }
}

/// 엔진 구성 (임베더/생성기/스크래퍼/저장소 주입)
async fn build_engine() -> Result<KnowledgeEngine> {
    let data_dir = get_data_dir();

    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedder::from_env().context("임베더 초기화 실패")?);
    let generator: Arc<dyn GenerationProvider> =
        Arc::new(GeminiGenerator::from_env().context("생성기 초기화 실패")?);

    let store = PassageStore::open(&data_dir, embedder)
        .await
        .context("PassageStore 열기 실패")?;
    let scraper = WebScraper::new().context("WebScraper 생성 실패")?;

    Ok(KnowledgeEngine::new(
        SourceCatalog::builtin(),
        Arc::new(scraper),
        Arc::new(store),
        AnswerComposer::new(generator),
    ))
}

/// API 키 사전 확인
fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
async fn cmd_ingest(topic: Option<String>, force: bool) -> Result<()> {
    require_api_key()?;

    let engine = build_engine().await?;

    if let Some(ref topic_name) = topic {
        // 단일 토픽 수집
        let url = engine
            .catalog()
            .get(topic_name)
            .with_context(|| format!("카탈로그에 없는 토픽: {}", topic_name))?
            .to_string();

        println!("[*] 토픽 수집 중: {} ({})", topic_name, url);

        let outcome = engine
            .ingest_topic(topic_name, &url, force)
            .await
            .with_context(|| format!("토픽 '{}' 수집 실패", topic_name))?;

        if outcome.unchanged {
            println!("[OK] 변경 없음 - 건너뜀");
        } else {
            println!(
                "[OK] 저장 {} 패시지, 건너뜀 {} 패시지",
                outcome.stored, outcome.skipped
            );
        }
        return Ok(());
    }

    // 카탈로그 전체 수집
    println!(
        "[*] 카탈로그 수집 중 ({} 토픽)...",
        engine.catalog().len()
    );

    let report = engine.initialize(force).await;

    println!();
    println!("[OK] 수집 완료:");
    println!("     수집된 토픽: {}", report.topics_ingested);
    println!("     변경 없음:   {}", report.topics_unchanged);
    println!("     실패:        {}", report.topics_failed);
    println!("     저장된 패시지: {}", report.passages_stored);

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(question: &str) -> Result<()> {
    require_api_key()?;

    println!("[*] 질문: \"{}\"", question);

    let engine = build_engine().await?;

    match engine.query(question).await.context("질의 실패")? {
        QueryResponse::Answered { text, sources } => {
            println!("\n{}\n", text);

            let source_list = sources
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            println!("[*] 출처: {}", source_list);
        }
        QueryResponse::NoMatches => {
            println!("\n[!] 관련 자료를 찾지 못했습니다. 먼저 `ingest`를 실행했는지 확인하세요.");
        }
    }

    Ok(())
}

/// 검색 명령어 (search) - 답변 생성 없이 검색 결과만 출력
async fn cmd_search(query: &str, limit: usize) -> Result<()> {
    require_api_key()?;

    println!("[*] 검색 중: \"{}\"", query);

    let data_dir = get_data_dir();
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::new(GeminiEmbedder::from_env().context("임베더 초기화 실패")?);
    let store = PassageStore::open(&data_dir, embedder)
        .await
        .context("PassageStore 열기 실패")?;

    let result = store.retrieve(query, limit).await.context("검색 실패")?;

    if result.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", result.len());

    for (i, passage) in result.passages.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] {}",
            i + 1,
            passage.similarity,
            passage.id
        );
        println!("   {}", truncate_text(&passage.text, 200));
        println!();
    }

    Ok(())
}

/// 토픽 목록 명령어 (topics)
fn cmd_topics() -> Result<()> {
    let catalog = SourceCatalog::builtin();

    println!("[OK] 내장 카탈로그 ({} 토픽):\n", catalog.len());

    for (i, (topic, url)) in catalog.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, topic);
        println!("      {}", url);
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("vidya-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    // 매니페스트 통계 (API 키 없이도 조회 가능)
    match IngestManifest::open(&manifest_path(&data_dir)) {
        Ok(manifest) => {
            match manifest.stats() {
                Ok(stats) => {
                    println!("[OK] 수집된 토픽: {} 건", stats.topic_count);
                    println!("     기록된 패시지: {} 건", stats.passage_count);
                }
                Err(e) => println!("[!] 매니페스트 통계 조회 실패: {}", e),
            }

            // 임베더 식별자와 벡터 인덱스 수
            if let Ok(Some(identity)) = manifest.embedder_identity() {
                println!("[OK] 임베딩 함수: {}", identity);

                // 식별자 뒤쪽이 차원 (name/dimension)
                if let Some(dimension) = identity
                    .rsplit('/')
                    .next()
                    .and_then(|d| d.parse::<usize>().ok())
                {
                    match LancePassageIndex::open(&index_path(&data_dir), dimension).await {
                        Ok(index) => match index.count().await {
                            Ok(count) => println!("[OK] 벡터 인덱스: {} 패시지", count),
                            Err(e) => tracing::debug!("벡터 인덱스 조회 실패: {}", e),
                        },
                        Err(e) => tracing::debug!("벡터 인덱스 열기 실패: {}", e),
                    }
                }
            }
        }
        Err(e) => println!("[!] 매니페스트 열기 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
