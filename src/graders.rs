//! Hallucination and Answer Graders
//!
//! Two independent checks run on every synthesized answer:
//! - grounding: is every claim supported by the evidence pool?
//! - quality: does the answer address the question?
//!
//! Each check has a deterministic implementation and an LLM-as-judge
//! implementation that falls back to the deterministic one. A failed
//! judge call never counts as a pass.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::TextGenerator;
use crate::state::{GroundingResult, QualityResult, Snippet};
use crate::text::{content_tokens, extract_json, is_refusal, split_claims, token_overlap, truncate};

/// Grounding check capability
#[async_trait]
pub trait GroundingGrader: Send + Sync {
    async fn check_grounding(&self, answer: &str, evidence: &[Snippet]) -> GroundingResult;
}

/// Answer quality capability
#[async_trait]
pub trait AnswerGrader: Send + Sync {
    async fn grade_quality(&self, query: &str, answer: &str) -> QualityResult;
}

// ============================================================================
// Lexical grounding
// ============================================================================

/// Claim-by-claim token overlap against each evidence passage
#[derive(Debug, Clone)]
pub struct LexicalGroundingGrader {
    support_ratio: f64,
}

impl LexicalGroundingGrader {
    pub fn new() -> Self {
        Self { support_ratio: 0.6 }
    }

    pub fn with_support_ratio(support_ratio: f64) -> Self {
        Self {
            support_ratio: support_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn check(&self, answer: &str, evidence: &[Snippet]) -> GroundingResult {
        let passages: Vec<_> = evidence.iter().map(|s| content_tokens(&s.text)).collect();

        let unsupported: Vec<String> = split_claims(answer)
            .into_iter()
            .filter(|claim| {
                let tokens = content_tokens(claim);
                !passages
                    .iter()
                    .any(|p| token_overlap(&tokens, p) >= self.support_ratio)
            })
            .collect();

        debug!(
            "Lexical grounding: {} unsupported claims against {} passages",
            unsupported.len(),
            passages.len()
        );
        GroundingResult::from_unsupported(unsupported)
    }
}

impl Default for LexicalGroundingGrader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroundingGrader for LexicalGroundingGrader {
    async fn check_grounding(&self, answer: &str, evidence: &[Snippet]) -> GroundingResult {
        self.check(answer, evidence)
    }
}

// ============================================================================
// LLM grounding judge
// ============================================================================

const GROUNDING_SYSTEM: &str = "You are a grader assessing whether a response is grounded in the \
    provided source documents. Reasonable inferences and general knowledge that do not contradict \
    the sources are acceptable. Flag only fabrications and unsupported specific claims.";

/// Total evidence bytes placed in a judge prompt
const MAX_EVIDENCE_BYTES: usize = 12000;

pub struct LlmGroundingGrader {
    generator: Arc<dyn TextGenerator>,
    fallback: LexicalGroundingGrader,
}

#[derive(Debug, Deserialize)]
struct GroundingVerdict {
    #[serde(default)]
    unsupported_claims: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

impl LlmGroundingGrader {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            fallback: LexicalGroundingGrader::new(),
        }
    }

    fn build_prompt(answer: &str, evidence: &[Snippet]) -> String {
        let mut documents = String::new();
        for (i, snippet) in evidence.iter().enumerate() {
            let entry = format!("[{}] ({}) {}\n\n", i + 1, snippet.source, snippet.text);
            if documents.len() + entry.len() > MAX_EVIDENCE_BYTES {
                break;
            }
            documents.push_str(&entry);
        }

        format!(
            r#"Source documents:
{}
Response to evaluate:
{}

Return JSON only:
{{"unsupported_claims": ["each unsupported claim, quoted exactly from the response"], "reasoning": "brief explanation"}}
Use an empty list when every claim is supported."#,
            documents,
            truncate(answer, 8000)
        )
    }

    fn parse_verdict(response: &str) -> anyhow::Result<GroundingVerdict> {
        let json = extract_json(response).ok_or_else(|| anyhow::anyhow!("No JSON in grounding verdict"))?;
        Ok(serde_json::from_str(json)?)
    }
}

#[async_trait]
impl GroundingGrader for LlmGroundingGrader {
    async fn check_grounding(&self, answer: &str, evidence: &[Snippet]) -> GroundingResult {
        let prompt = Self::build_prompt(answer, evidence);
        let verdict = self
            .generator
            .generate(GROUNDING_SYSTEM, &prompt, 800)
            .await
            .and_then(|response| Self::parse_verdict(&response));

        match verdict {
            Ok(v) => {
                debug!("Grounding verdict: {}", v.reasoning);
                let claims = v
                    .unsupported_claims
                    .into_iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                GroundingResult::from_unsupported(claims)
            }
            Err(e) => {
                warn!("Grounding judge failed: {}, using lexical check", e);
                self.fallback.check(answer, evidence)
            }
        }
    }
}

// ============================================================================
// Heuristic quality
// ============================================================================

/// Refusal detection, question coverage and length
#[derive(Debug, Clone)]
pub struct HeuristicAnswerGrader {
    /// Length at which the length factor saturates
    full_length_chars: usize,
}

impl HeuristicAnswerGrader {
    pub fn new(min_answer_chars: usize) -> Self {
        Self {
            full_length_chars: (min_answer_chars * 3).max(1),
        }
    }

    pub fn grade(&self, query: &str, answer: &str) -> QualityResult {
        if answer.trim().is_empty() || is_refusal(answer) {
            return QualityResult::new(
                0.0,
                "Answer is empty or declines to answer",
                vec!["a substantive answer to the question".to_string()],
            );
        }

        let question = content_tokens(query);
        let covered = content_tokens(answer);
        let mut missing: Vec<String> = question
            .iter()
            .filter(|t| !covered.contains(*t))
            .cloned()
            .collect();
        missing.sort();

        let coverage = if question.is_empty() {
            1.0
        } else {
            (question.len() - missing.len()) as f64 / question.len() as f64
        };
        let length = (answer.trim().chars().count() as f64 / self.full_length_chars as f64).min(1.0);
        let score = 0.7 * coverage + 0.3 * length;

        QualityResult::new(
            score,
            format!(
                "Covers {:.0}% of the question's terms; length factor {:.2}",
                coverage * 100.0,
                length
            ),
            missing,
        )
    }
}

#[async_trait]
impl AnswerGrader for HeuristicAnswerGrader {
    async fn grade_quality(&self, query: &str, answer: &str) -> QualityResult {
        self.grade(query, answer)
    }
}

// ============================================================================
// LLM quality judge
// ============================================================================

const QUALITY_SYSTEM: &str = "You are a grader assessing whether a response adequately addresses \
    the user's research question. A response need not be exhaustive but must meaningfully address \
    the core of the question.";

pub struct LlmAnswerGrader {
    generator: Arc<dyn TextGenerator>,
    fallback: HeuristicAnswerGrader,
}

#[derive(Debug, Deserialize)]
struct QualityVerdict {
    score: f64,
    #[serde(default)]
    missing_aspects: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

impl LlmAnswerGrader {
    pub fn new(generator: Arc<dyn TextGenerator>, min_answer_chars: usize) -> Self {
        Self {
            generator,
            fallback: HeuristicAnswerGrader::new(min_answer_chars),
        }
    }

    fn build_prompt(query: &str, answer: &str) -> String {
        format!(
            r#"Question: {}

Response:
{}

Rate how well the response addresses the question.
Return JSON only:
{{"score": <0-10>, "missing_aspects": ["aspects the response should have covered"], "reasoning": "brief explanation"}}"#,
            query,
            truncate(answer, 8000)
        )
    }

    fn parse_verdict(response: &str) -> anyhow::Result<QualityResult> {
        let json = extract_json(response).ok_or_else(|| anyhow::anyhow!("No JSON in quality verdict"))?;
        let v: QualityVerdict = serde_json::from_str(json)?;
        if !v.score.is_finite() {
            anyhow::bail!("Quality score is not a number");
        }
        Ok(QualityResult::new(v.score / 10.0, v.reasoning, v.missing_aspects))
    }
}

#[async_trait]
impl AnswerGrader for LlmAnswerGrader {
    async fn grade_quality(&self, query: &str, answer: &str) -> QualityResult {
        let prompt = Self::build_prompt(query, answer);
        let verdict = self
            .generator
            .generate(QUALITY_SYSTEM, &prompt, 500)
            .await
            .and_then(|response| Self::parse_verdict(&response));

        verdict.unwrap_or_else(|e| {
            warn!("Quality judge failed: {}, using heuristic grade", e);
            self.fallback.grade(query, answer)
        })
    }
}
