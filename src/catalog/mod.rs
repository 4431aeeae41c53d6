//! 소스 카탈로그 - 토픽 → 원문 URL 고정 매핑
//!
//! 수집 대상을 정의하는 불변 카탈로그입니다. 빌드 타임에 고정되며
//! 저장된 모든 패시지의 출처(provenance) 단위가 됩니다.

use sha2::{Digest, Sha256};

// ============================================================================
// SourceCatalog
// ============================================================================

/// 토픽 이름과 원문 URL의 1:1 매핑
///
/// 삽입 순서를 유지하며, 같은 엔트리 집합은 항상 같은 다이제스트를 냅니다.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    entries: Vec<(String, String)>,
}

impl SourceCatalog {
    /// 내장 경전 카탈로그
    ///
    /// 공개 아카이브의 힌두 경전/고전 텍스트 소스 목록입니다.
    pub fn builtin() -> Self {
        Self::from_entries([
            // Vedas
            ("Rigveda", "https://vedicheritage.gov.in/samhitas/rigveda/"),
            ("Yajurveda", "https://vedicheritage.gov.in/samhitas/yajurveda/"),
            ("Samaveda", "https://vedicheritage.gov.in/samhitas/samaveda/"),
            ("Atharvaveda", "https://vedicheritage.gov.in/samhitas/atharvaveda/"),
            // Upanishads
            ("Isha Upanishad", "https://www.wisdomlib.org/hinduism/book/isha-upanishad"),
            ("Katha Upanishad", "https://www.wisdomlib.org/hinduism/book/katha-upanishad"),
            ("Mandukya Upanishad", "https://www.wisdomlib.org/hinduism/book/mandukya-upanishad"),
            ("Chandogya Upanishad", "https://www.wisdomlib.org/hinduism/book/chandogya-upanishad"),
            ("Brihadaranyaka Upanishad", "https://www.sacred-texts.com/hin/brih/index.htm"),
            // Itihasas
            ("Ramayana", "https://www.valmikiramayan.net/"),
            ("Mahabharata", "https://www.sacred-texts.com/hin/maha/index.htm"),
            ("Bhagavad Gita", "https://www.sacred-texts.com/hin/gita/index.htm"),
            // Puranas
            ("Vishnu Purana", "https://www.sacred-texts.com/hin/vp/index.htm"),
            ("Bhagavata Purana", "https://www.sacred-texts.com/hin/srimad/index.htm"),
            ("Shiva Purana", "https://www.wisdomlib.org/hinduism/book/shiva-purana-english"),
            // Shastras & sciences
            ("Arthashastra", "https://www.sacred-texts.com/hin/kautil/index.htm"),
            ("Yoga Sutras", "https://www.sacred-texts.com/hin/yogasutr.htm"),
            ("Charaka Samhita", "https://www.wisdomlib.org/hinduism/book/charaka-samhita-english"),
            ("Surya Siddhanta", "https://www.wisdomlib.org/hinduism/book/surya-siddhanta"),
            ("Aryabhatiya", "https://www.wisdomlib.org/hinduism/book/aryabhatiya"),
        ])
    }

    /// 엔트리 목록으로 카탈로그 생성 (테스트/도구용)
    pub fn from_entries<I, T, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(topic, url)| (topic.into(), url.into()))
                .collect(),
        }
    }

    /// 빈 카탈로그
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// 토픽의 소스 URL 조회
    pub fn get(&self, topic: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, url)| url.as_str())
    }

    /// 토픽 존재 여부
    pub fn contains(&self, topic: &str) -> bool {
        self.get(topic).is_some()
    }

    /// (토픽, URL) 순회 - 삽입 순서 유지
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(t, u)| (t.as_str(), u.as_str()))
    }

    /// 토픽 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 카탈로그가 비었는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 카탈로그 다이제스트 (SHA-256 hex)
    ///
    /// 같은 순서의 같은 엔트리 집합이면 실행 간에 동일합니다.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (topic, url) in &self.entries {
            hasher.update((topic.len() as u64).to_le_bytes());
            hasher.update(topic.as_bytes());
            hasher.update((url.len() as u64).to_le_bytes());
            hasher.update(url.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
