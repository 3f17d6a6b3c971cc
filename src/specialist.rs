//! Specialist Invocation Adapter
//!
//! A specialist answers a question for one domain and returns the text plus
//! the source snippets it relied on. The registry maps each `Domain` to the
//! handle that serves it.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::Domain;
use crate::llm::TextGenerator;
use crate::state::{EvidenceOrigin, Snippet};

/// Error types for specialist calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecialistError {
    #[error("Specialist timed out after {0:?}")]
    Timeout(Duration),

    #[error("No specialist registered for domain {0}")]
    NotRegistered(Domain),

    #[error("Specialist unavailable: {0}")]
    Unavailable(String),

    #[error("Specialist failed: {0}")]
    Failed(String),
}

/// Answer from one specialist
#[derive(Debug, Clone, Default)]
pub struct SpecialistReply {
    pub text: String,
    pub evidence: Vec<Snippet>,
}

/// Domain specialist capability. Must be safe to call concurrently for distinct domains.
#[async_trait]
pub trait Specialist: Send + Sync {
    async fn invoke(
        &self,
        domain: Domain,
        query: &str,
        context: &str,
    ) -> Result<SpecialistReply, SpecialistError>;
}

/// Mapping from domain label to specialist handle
#[derive(Clone, Default)]
pub struct SpecialistRegistry {
    specialists: HashMap<Domain, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve every domain with the same handle
    pub fn uniform(specialist: Arc<dyn Specialist>) -> Self {
        let mut registry = Self::new();
        for domain in Domain::ALL {
            registry.register(domain, Arc::clone(&specialist));
        }
        registry
    }

    pub fn register(&mut self, domain: Domain, specialist: Arc<dyn Specialist>) {
        self.specialists.insert(domain, specialist);
    }

    /// Builder-style register
    pub fn with(mut self, domain: Domain, specialist: Arc<dyn Specialist>) -> Self {
        self.register(domain, specialist);
        self
    }

    pub fn get(&self, domain: Domain) -> Option<Arc<dyn Specialist>> {
        self.specialists.get(&domain).cloned()
    }

    pub fn domains(&self) -> Vec<Domain> {
        let mut domains: Vec<_> = self.specialists.keys().copied().collect();
        domains.sort();
        domains
    }
}

// ============================================================================
// LLM-backed specialist
// ============================================================================

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>()\[\]"']+"#).expect("static regex")
});

static CITATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // "Rosenbaum & Rubin (1983)", "Angrist et al. (1996)"
    Regex::new(r"\b[A-Z][A-Za-z'-]+(?:\s+(?:&|and)\s+[A-Z][A-Za-z'-]+|\s+et al\.)?,?\s+\((?:19|20)\d{2}[a-z]?\)")
        .expect("static regex")
});

/// Specialist that answers through a text generator with a domain system prompt
pub struct LlmSpecialist {
    generator: Arc<dyn TextGenerator>,
    max_tokens: usize,
}

impl LlmSpecialist {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            max_tokens: 2048,
        }
    }

    fn build_prompt(query: &str, context: &str) -> String {
        let mut prompt = String::new();
        if !context.trim().is_empty() {
            prompt.push_str(&format!("## Conversation so far\n\n{}\n\n", context));
        }
        prompt.push_str(&format!("## Question\n\n{}\n\n", query));
        prompt.push_str(
            "Answer from your domain's perspective. Put each source on its own line \
             with its URL or an author-year citation.",
        );
        prompt
    }
}

/// Lines of `text` that carry a URL or an author-year citation
pub fn extract_evidence(text: &str, domain: Domain) -> Vec<Snippet> {
    let mut evidence: Vec<Snippet> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let source = URL_PATTERN
            .find(line)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
            .or_else(|| CITATION_PATTERN.find(line).map(|m| m.as_str().to_string()));

        if let Some(source) = source {
            if evidence.iter().any(|s| s.source == source) {
                continue;
            }
            evidence.push(Snippet::new(
                line.trim_start_matches(['-', '*', '•', ' ']),
                source,
                EvidenceOrigin::Specialist(domain),
            ));
        }
    }

    evidence
}

#[async_trait]
impl Specialist for LlmSpecialist {
    async fn invoke(
        &self,
        domain: Domain,
        query: &str,
        context: &str,
    ) -> Result<SpecialistReply, SpecialistError> {
        let prompt = Self::build_prompt(query, context);

        let text = self
            .generator
            .generate(domain.system_prompt(), &prompt, self.max_tokens)
            .await
            .map_err(|e| SpecialistError::Failed(e.to_string()))?;

        let evidence = extract_evidence(&text, domain);
        debug!(
            "{} specialist ({}): {} chars, {} sources",
            domain,
            self.generator.name(),
            text.len(),
            evidence.len()
        );

        Ok(SpecialistReply { text, evidence })
    }
}
