//! 답변 합성 모듈 - 2단계 생성
//!
//! 1단계(grounded): 검색된 패시지에 근거한 답변을 생성합니다.
//! 2단계(fusion): 같은 질문에 대한 자유 생성 답변을 따로 만들고,
//! 근거 답변과 융합해 최종 답변을 냅니다. 2단계는 1단계 결과가
//! 나오기 전에는 절대 시작되지 않습니다.

use std::sync::Arc;

use crate::error::Result;
use crate::generation::GenerationProvider;

// ============================================================================
// Prompt Construction
// ============================================================================

/// 1단계 프롬프트: 질문 + 번호 매긴 컨텍스트 패시지
fn grounded_prompt(question: &str, context_passages: &[String]) -> String {
    let mut prompt = String::from(
        "You are a knowledge assistant specializing in Hindu scriptures, history, \
         and philosophy. Answer the question using only the source passages below. \
         If the passages do not cover the question, say what they do cover.\n\n",
    );

    prompt.push_str(&format!("Question: {}\n\nSource passages:\n", question));

    for (i, passage) in context_passages.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", i + 1, passage));
    }

    prompt.push_str("\nWrite a clear, concise answer grounded in the passages.");
    prompt
}

/// 자유 생성 프롬프트: 컨텍스트 없이 같은 질문
fn free_prompt(question: &str) -> String {
    format!(
        "You are a knowledge assistant specializing in Hindu scriptures, history, \
         and philosophy. Answer the following question from your own knowledge, \
         concisely.\n\nQuestion: {}",
        question
    )
}

/// 2단계 프롬프트: 근거 답변 + 자유 답변 융합
fn fusion_prompt(grounded_answer: &str, free_answer: &str) -> String {
    format!(
        "Two draft answers to the same question are given below. The first is \
         grounded in source passages; the second is free-form. Merge them into \
         one coherent, well-structured answer. Prefer the grounded draft where \
         they disagree.\n\nGrounded draft:\n{}\n\nFree-form draft:\n{}\n\n\
         Final answer:",
        grounded_answer, free_answer
    )
}

// ============================================================================
// AnswerComposer
// ============================================================================

/// 2단계 답변 합성기
///
/// 두 단계 모두 같은 생성 능력을 다른 프롬프트로 호출합니다.
/// 호출 간 숨은 상태는 없습니다.
pub struct AnswerComposer {
    generator: Arc<dyn GenerationProvider>,
}

impl AnswerComposer {
    /// 새 합성기 생성
    pub fn new(generator: Arc<dyn GenerationProvider>) -> Self {
        Self { generator }
    }

    /// 질문과 컨텍스트 패시지로 최종 답변 생성
    ///
    /// 생성 실패(`Generation`)는 그대로 전파됩니다. 재시도 정책은
    /// 호출자 몫입니다.
    pub async fn answer(&self, question: &str, context_passages: &[String]) -> Result<String> {
        // 1단계: 근거 답변
        let grounded = self
            .generator
            .generate(&grounded_prompt(question, context_passages))
            .await?;
        tracing::debug!("Grounded answer: {} chars", grounded.len());

        // 2단계: 자유 답변 생성 후 융합 (1단계 완료 이후에만)
        let free = self.generator.generate(&free_prompt(question)).await?;
        tracing::debug!("Free-form answer: {} chars", free.len());

        let fused = self
            .generator
            .generate(&fusion_prompt(&grounded, &free))
            .await?;

        Ok(fused)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KnowledgeError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 프롬프트를 기록하고 준비된 응답을 차례로 돌려주는 스텁
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        responses: Vec<String>,
    }

    impl RecordingGenerator {
        fn new(responses: &[&str]) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                responses: responses.iter().map(|r| r.to_string()).collect(),
            }
        }

        fn recorded(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for RecordingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            let mut prompts = self.prompts.lock().unwrap();
            let call = prompts.len();
            prompts.push(prompt.to_string());
            Ok(self.responses[call].clone())
        }

        fn name(&self) -> &str {
            "recording-stub"
        }
    }

    /// 항상 실패하는 스텁
    struct FailingGenerator;

    #[async_trait]
    impl GenerationProvider for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(KnowledgeError::Generation("model unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "failing-stub"
        }
    }

    fn context(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_two_stage_call_order() {
        let generator = Arc::new(RecordingGenerator::new(&[
            "grounded draft",
            "free draft",
            "final answer",
        ]));
        let composer = AnswerComposer::new(generator.clone());

        let answer = composer
            .answer("What is dharma?", &context(&["Passage about dharma."]))
            .await
            .unwrap();
        assert_eq!(answer, "final answer");

        let prompts = generator.recorded();
        assert_eq!(prompts.len(), 3);

        // 1번째 호출: 근거 프롬프트 (질문 + 패시지)
        assert!(prompts[0].contains("What is dharma?"));
        assert!(prompts[0].contains("Passage about dharma."));

        // 2번째 호출: 자유 프롬프트 (패시지 없음)
        assert!(prompts[1].contains("What is dharma?"));
        assert!(!prompts[1].contains("Passage about dharma."));

        // 3번째 호출: 융합 프롬프트는 1단계 결과를 포함 → 1단계보다 앞설 수 없음
        assert!(prompts[2].contains("grounded draft"));
        assert!(prompts[2].contains("free draft"));
    }

    #[tokio::test]
    async fn test_generation_error_propagates() {
        let composer = AnswerComposer::new(Arc::new(FailingGenerator));

        let result = composer.answer("question", &context(&["passage"])).await;
        assert!(matches!(
            result.err(),
            Some(KnowledgeError::Generation(_))
        ));
    }

    #[test]
    fn test_grounded_prompt_numbers_passages() {
        let prompt = grounded_prompt("Q?", &context(&["first", "second"]));
        assert!(prompt.contains("[1] first"));
        assert!(prompt.contains("[2] second"));
        assert!(prompt.contains("Q?"));
    }

    #[test]
    fn test_fusion_prompt_contains_both_drafts() {
        let prompt = fusion_prompt("draft A", "draft B");
        assert!(prompt.contains("draft A"));
        assert!(prompt.contains("draft B"));
    }
}
