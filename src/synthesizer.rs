//! Answer Synthesizer
//!
//! Combines the successful domain answers (plus search evidence, when any)
//! into one answer. On retries the latest feedback is handed back so the
//! next attempt can drop unsupported claims and cover missing aspects.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::Domain;
use crate::llm::TextGenerator;
use crate::state::{DomainAnswer, FeedbackEntry, ResearchState, Snippet};
use crate::text::truncate;

/// Everything a synthesizer may read
#[derive(Debug, Clone)]
pub struct SynthesisInput<'a> {
    pub query: &'a str,
    /// Successful answers of the current routing, in routing order
    pub answers: Vec<(Domain, &'a DomainAnswer)>,
    pub search_evidence: &'a [Snippet],
    pub feedback_history: &'a [FeedbackEntry],
    /// Rendered conversation context (may be empty)
    pub conversation: &'a str,
}

impl<'a> SynthesisInput<'a> {
    pub fn from_state(state: &'a ResearchState, conversation: &'a str) -> Self {
        Self {
            query: state.query(),
            answers: state.successful_answers(),
            search_evidence: state.search_evidence(),
            feedback_history: state.feedback_history(),
            conversation,
        }
    }

    pub fn is_cross_domain(&self) -> bool {
        self.answers.len() > 1
    }

    pub fn latest_feedback(&self) -> Option<&'a FeedbackEntry> {
        self.feedback_history.last()
    }
}

/// Synthesis capability. Infallible: implementations degrade internally.
#[async_trait]
pub trait Synthesize: Send + Sync {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> String;
}

// ============================================================================
// Deterministic merge
// ============================================================================

/// Attributed concatenation of the inputs.
///
/// Never introduces text that is not present in its inputs, apart from
/// section headings.
#[derive(Debug, Clone, Default)]
pub struct MergeSynthesizer;

impl MergeSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Remove every flagged claim from `text`, dropping lines left empty
    fn strip_unsupported(text: &str, unsupported: &[String]) -> String {
        text.lines()
            .filter_map(|line| {
                let mut kept = line.to_string();
                for claim in unsupported.iter().filter(|c| !c.is_empty()) {
                    if kept.contains(claim.as_str()) {
                        kept = kept.replace(claim.as_str(), "");
                    }
                }
                if kept.trim().is_empty() && !line.trim().is_empty() {
                    None
                } else if kept == line {
                    Some(kept)
                } else {
                    Some(kept.split_whitespace().collect::<Vec<_>>().join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    pub fn merge(&self, input: &SynthesisInput<'_>) -> String {
        let unsupported: &[String] = input
            .latest_feedback()
            .map(|f| f.unsupported_claims.as_slice())
            .unwrap_or(&[]);

        let mut sections = Vec::new();

        for (domain, answer) in &input.answers {
            let text = Self::strip_unsupported(&answer.text, unsupported);
            if text.is_empty() {
                continue;
            }
            if input.is_cross_domain() {
                sections.push(format!("## {} perspective\n\n{}", domain.specialist_name(), text));
            } else {
                sections.push(text);
            }
        }

        if !input.search_evidence.is_empty() {
            let mut seen = HashSet::new();
            let items: Vec<String> = input
                .search_evidence
                .iter()
                .map(|s| Self::strip_unsupported(&s.text, unsupported))
                .filter(|t| !t.is_empty() && seen.insert(t.clone()))
                .map(|t| format!("- {}", t))
                .collect();
            if !items.is_empty() {
                sections.push(format!("## From the literature\n\n{}", items.join("\n")));
            }
        }

        if sections.is_empty() {
            return "No specialist answer or source material was available for this question.".to_string();
        }

        sections.join("\n\n")
    }
}

#[async_trait]
impl Synthesize for MergeSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> String {
        self.merge(input)
    }
}

// ============================================================================
// LLM synthesis
// ============================================================================

const SYNTHESIS_SYSTEM: &str = "You synthesize answers from domain experts into one coherent, \
    well-structured research answer. Use only the material you are given. Do not add facts, \
    numbers, names or citations that are not in the expert answers or sources.";

/// Longest expert answer or source passage placed in the prompt
const MAX_SECTION_BYTES: usize = 6000;

/// Synthesizer backed by a text generator, with the merge as fallback
pub struct LlmSynthesizer {
    generator: Arc<dyn TextGenerator>,
    fallback: MergeSynthesizer,
    max_tokens: usize,
}

impl LlmSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            fallback: MergeSynthesizer::new(),
            max_tokens: 3000,
        }
    }

    fn build_prompt(input: &SynthesisInput<'_>) -> String {
        let mut prompt = format!("## Original question\n\n{}\n\n", input.query);

        if !input.conversation.trim().is_empty() {
            prompt.push_str(&format!("## Conversation so far\n\n{}\n\n", input.conversation));
        }

        prompt.push_str("## Expert answers\n\n");
        for (domain, answer) in &input.answers {
            prompt.push_str(&format!(
                "### {} expert\n\n{}\n\n",
                domain.specialist_name(),
                truncate(&answer.text, MAX_SECTION_BYTES)
            ));
        }

        if !input.search_evidence.is_empty() {
            prompt.push_str("## Literature search results\n\n");
            for snippet in input.search_evidence {
                prompt.push_str(&format!(
                    "- {} ({})\n",
                    truncate(&snippet.text, MAX_SECTION_BYTES),
                    snippet.source
                ));
            }
            prompt.push('\n');
        }

        if let Some((latest, earlier)) = input.feedback_history.split_last() {
            prompt.push_str("## Problems with the previous attempt (fix all of these)\n\n");
            if !latest.unsupported_claims.is_empty() {
                prompt.push_str("Remove these claims, they are not supported by the sources:\n");
                for claim in &latest.unsupported_claims {
                    prompt.push_str(&format!("- {}\n", claim));
                }
            }
            if !latest.missing_aspects.is_empty() {
                prompt.push_str("Cover these missing aspects using the material above:\n");
                for aspect in &latest.missing_aspects {
                    prompt.push_str(&format!("- {}\n", aspect));
                }
            }
            if !latest.quality_accepted && !latest.quality_rationale.is_empty() {
                prompt.push_str(&format!("Reviewer note: {}\n", latest.quality_rationale));
            }
            for entry in earlier {
                prompt.push_str(&format!("Earlier: {}\n", entry.summary()));
            }
            prompt.push('\n');
        }

        if input.is_cross_domain() {
            prompt.push_str(
                "## Task\n\nWrite a unified answer that integrates the experts' insights, draws \
                 explicit connections between the domains, resolves contradictions and attributes \
                 key points to their domain.",
            );
        } else {
            prompt.push_str(
                "## Task\n\nRewrite the expert answer into a clear, coherent answer to the \
                 question. Keep its content and its citations.",
            );
        }

        prompt
    }
}

#[async_trait]
impl Synthesize for LlmSynthesizer {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> String {
        if input.answers.is_empty() && input.search_evidence.is_empty() {
            return self.fallback.merge(input);
        }

        let prompt = Self::build_prompt(input);
        match self
            .generator
            .generate(SYNTHESIS_SYSTEM, &prompt, self.max_tokens)
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                debug!("Synthesized {} chars with {}", text.len(), self.generator.name());
                text.trim().to_string()
            }
            Ok(_) => {
                warn!("Synthesis returned empty text, using merge");
                self.fallback.merge(input)
            }
            Err(e) => {
                warn!("Synthesis failed: {}, using merge", e);
                self.fallback.merge(input)
            }
        }
    }
}
