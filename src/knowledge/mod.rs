//! Knowledge 모듈 - 영속 패시지 저장소
//!
//! - Manifest (rusqlite): 임베더 식별자 + 토픽별 수집 장부
//! - LanceDB: 패시지 벡터 인덱스 (ANN)
//! - PassageStore: 멱등 수집과 k-최근접 검색 파사드

mod lance;
mod manifest;
mod store;
mod vector;

// Re-exports
pub use lance::LancePassageIndex;
pub use manifest::{content_hash, get_data_dir, IngestManifest, ManifestStats, TopicEntry};
pub use store::{index_path, manifest_path, IngestOutcome, PassageStore, StoreStats};
pub use vector::{
    PassageId, PassageIndex, PassageRecord, RetrievalResult, RetrievedPassage,
    DEFAULT_RETRIEVAL_K,
};
