//! Domain Router
//!
//! Classifies a research question into one or more domains.
//! Supports both keyword-based scoring and LLM classification; the same
//! selection policy is applied to either set of scores:
//! - every domain at or above the acceptance threshold is selected
//! - every domain within the margin of the best score is selected too
//! - routing is never empty

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::WorkflowConfig;
use crate::conversation::ConversationContext;
use crate::domain::{self, Domain};
use crate::llm::TextGenerator;
use crate::state::FeedbackEntry;
use crate::text::{extract_json, truncate};

/// Weight of keyword hits found in feedback relative to the question itself
const FEEDBACK_HIT_WEIGHT: f64 = 0.5;

/// Keyword routing confident enough to skip LLM classification
const KEYWORD_CONFIDENCE_SKIP: f64 = 0.9;

static EXPLICIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@(statistics|stats|biology|psychology|philosophy|psychiatry|applications|product_manager|pm|writing)\b")
        .expect("static regex")
});

static SEARCH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(latest|recent|recently|currently|state[- ]of[- ]the[- ]art|papers?|publications?|preprints?|20[2-9]\d)\b")
        .expect("static regex")
});

/// Inputs besides the question that routing may consider
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    pub conversation: &'a ConversationContext,
    /// Prior grading failures; non-empty on retries
    pub feedback: &'a [FeedbackEntry],
}

/// Routing result
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    /// Selected domains, best first
    pub domains: Vec<Domain>,
    /// Confidence per domain, best first
    pub scores: Vec<(Domain, f64)>,
    /// The question asks for recent or specific literature
    pub needs_search: bool,
    pub reasoning: String,
}

impl RoutingDecision {
    pub fn is_cross_domain(&self) -> bool {
        self.domains.len() > 1
    }
}

/// Router with keyword scoring and optional LLM classification
pub struct DomainRouter {
    threshold: f64,
    margin: f64,
    default_domain: Domain,
    classifier: Option<Arc<dyn TextGenerator>>,
}

impl DomainRouter {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            threshold: config.route_threshold,
            margin: config.route_margin,
            default_domain: config.default_domain,
            classifier: None,
        }
    }

    /// Use a text generator for classification when keywords are not decisive
    pub fn with_classifier(mut self, classifier: Arc<dyn TextGenerator>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Route a question (async, may call the classifier)
    pub async fn route(&self, query: &str, ctx: RoutingContext<'_>) -> RoutingDecision {
        if let Some(decision) = self.check_explicit(query) {
            return decision;
        }

        let keyword = self.route_keywords(query, ctx);

        let classifier = match &self.classifier {
            Some(c) => c,
            None => return keyword,
        };

        if self.keyword_confidence(query, ctx) >= KEYWORD_CONFIDENCE_SKIP {
            return keyword;
        }

        match self.classify_with_llm(classifier.as_ref(), query, ctx).await {
            Ok((scores, llm_search)) => {
                let domains = self.select(&scores);
                debug!("LLM classified as {:?}", domains);
                RoutingDecision {
                    domains,
                    reasoning: format!("LLM classification ({})", classifier.name()),
                    scores,
                    needs_search: llm_search || keyword.needs_search,
                }
            }
            Err(e) => {
                debug!("LLM classification failed: {}, using keyword routing", e);
                keyword
            }
        }
    }

    /// Route with keyword scores only
    pub fn route_keywords(&self, query: &str, ctx: RoutingContext<'_>) -> RoutingDecision {
        if let Some(decision) = self.check_explicit(query) {
            return decision;
        }

        let scores = self.keyword_scores(query, ctx);
        let domains = self.select(&scores);

        let reasoning = if scores.first().map_or(true, |(_, s)| *s == 0.0) {
            format!("No domain keywords, defaulting to {}", self.default_domain)
        } else {
            format!(
                "Keyword scores: {}",
                scores
                    .iter()
                    .filter(|(_, s)| *s > 0.0)
                    .map(|(d, s)| format!("{} {:.2}", d, s))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };

        RoutingDecision {
            domains,
            scores,
            needs_search: Self::needs_search(query),
            reasoning,
        }
    }

    /// Apply the selection policy to a score table
    pub fn select(&self, scores: &[(Domain, f64)]) -> Vec<Domain> {
        let mut ranked = scores.to_vec();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let top = match ranked.first() {
            Some((_, s)) if *s > 0.0 => *s,
            _ => return vec![self.default_domain],
        };

        ranked
            .iter()
            .filter(|(_, s)| *s > 0.0 && (*s >= self.threshold || top - *s <= self.margin))
            .map(|(d, _)| *d)
            .collect()
    }

    /// Share of keyword hits per domain, best first
    fn keyword_scores(&self, query: &str, ctx: RoutingContext<'_>) -> Vec<(Domain, f64)> {
        let mut hits: HashMap<Domain, f64> = Domain::ALL
            .iter()
            .map(|d| (*d, d.keyword_hits(query) as f64))
            .collect();

        // Follow-up questions carry their topic in the previous user turn
        if hits.values().all(|h| *h == 0.0) {
            if let Some(turn) = ctx.conversation.last_user_turn() {
                for (domain, h) in hits.iter_mut() {
                    *h = domain.keyword_hits(&turn.content) as f64;
                }
            }
        }

        if let Some(latest) = ctx.feedback.last() {
            let missing = latest.missing_aspects.join(" ");
            for (domain, h) in hits.iter_mut() {
                *h += domain.keyword_hits(&missing) as f64 * FEEDBACK_HIT_WEIGHT;
            }
        }

        let total: f64 = hits.values().sum();
        let mut scores: Vec<(Domain, f64)> = Domain::ALL
            .iter()
            .map(|d| {
                let h = hits.get(d).copied().unwrap_or(0.0);
                (*d, if total > 0.0 { h / total } else { 0.0 })
            })
            .collect();
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }

    /// Top keyword share, damped when there are few hits overall
    fn keyword_confidence(&self, query: &str, ctx: RoutingContext<'_>) -> f64 {
        let total_hits: usize = Domain::ALL.iter().map(|d| d.keyword_hits(query)).sum();
        let top = self
            .keyword_scores(query, ctx)
            .first()
            .map_or(0.0, |(_, s)| *s);
        top * (total_hits as f64 / 3.0).min(1.0)
    }

    /// Check for explicit @domain mentions
    fn check_explicit(&self, query: &str) -> Option<RoutingDecision> {
        let mut domains: Vec<Domain> = Vec::new();
        for captures in EXPLICIT_PATTERN.captures_iter(query) {
            if let Ok(domain) = captures[1].parse::<Domain>() {
                if !domains.contains(&domain) {
                    domains.push(domain);
                }
            }
        }

        if domains.is_empty() {
            return None;
        }

        Some(RoutingDecision {
            scores: domains.iter().map(|d| (*d, 1.0)).collect(),
            reasoning: format!(
                "Explicit {}",
                domains
                    .iter()
                    .map(|d| format!("@{}", d))
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
            needs_search: Self::needs_search(query),
            domains,
        })
    }

    fn needs_search(query: &str) -> bool {
        SEARCH_PATTERN.is_match(query)
    }

    /// Classify with the configured text generator
    async fn classify_with_llm(
        &self,
        classifier: &dyn TextGenerator,
        query: &str,
        ctx: RoutingContext<'_>,
    ) -> anyhow::Result<(Vec<(Domain, f64)>, bool)> {
        let mut prompt = format!(
            r#"Classify this research question by domain. Score every domain from 0.0 to 1.0 for how much its specialist is needed.

Available domains:
{}

Question: {}
"#,
            domain::catalog(),
            query
        );

        if !ctx.conversation.is_empty() {
            prompt.push_str(&format!(
                "\nEarlier conversation:\n{}\n",
                truncate(&ctx.conversation.render(4), 1500)
            ));
        }

        if let Some(latest) = ctx.feedback.last() {
            prompt.push_str(&format!(
                "\nA previous answer was rejected: {}\nReconsider whether other domains are needed.\n",
                latest.summary()
            ));
        }

        prompt.push_str(
            r#"
Return JSON only:
{"scores": {"statistics": 0.9, "psychology": 0.7}, "needs_web_search": false, "reasoning": "..."}"#,
        );

        let response = classifier
            .generate("You are an expert at routing research questions to domain specialists.", &prompt, 300)
            .await?;

        Self::parse_classification(&response)
    }

    fn parse_classification(response: &str) -> anyhow::Result<(Vec<(Domain, f64)>, bool)> {
        #[derive(Deserialize)]
        struct Classification {
            #[serde(default)]
            scores: HashMap<String, f64>,
            #[serde(default)]
            needs_web_search: bool,
        }

        let json = extract_json(response).ok_or_else(|| anyhow::anyhow!("No JSON in classifier output"))?;
        let parsed: Classification = serde_json::from_str(json)?;

        let mut scores: Vec<(Domain, f64)> = parsed
            .scores
            .iter()
            .filter_map(|(label, s)| label.parse::<Domain>().ok().map(|d| (d, s.clamp(0.0, 1.0))))
            .collect();

        if scores.is_empty() {
            anyhow::bail!("Classifier returned no known domains");
        }

        scores.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        Ok((scores, parsed.needs_web_search))
    }
}
