//! Research Workflow
//!
//! The corrective control loop:
//!
//! ```text
//! ROUTE ─► DISPATCH ─► [SEARCH] ─► SYNTHESIZE ─► GROUND_CHECK ─► QUALITY_CHECK
//!   ▲          │                                                      │
//!   │          └──► FAIL (all sources failed before any answer)       │
//!   └──────────────── RETRY ◄── rejected, iteration < max ────────────┤
//!                              DONE ◄── accepted, or retries exhausted ┘
//! ```
//!
//! This module is the only place that moves the state between phases.

use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{Config, WorkflowConfig};
use crate::conversation::ConversationContext;
use crate::dispatcher::Dispatcher;
use crate::domain::Domain;
use crate::graders::{
    AnswerGrader, GroundingGrader, HeuristicAnswerGrader, LexicalGroundingGrader, LlmAnswerGrader,
    LlmGroundingGrader,
};
use crate::llm::{ClaudeClient, OllamaClient, TextGenerator};
use crate::router::{DomainRouter, RoutingContext};
use crate::search::{SearchProvider, TavilySearch};
use crate::specialist::{LlmSpecialist, SpecialistRegistry};
use crate::state::{
    FailureReport, FeedbackEntry, Phase, ResearchAnswer, ResearchState, StateError, Terminal,
};
use crate::synthesizer::{LlmSynthesizer, MergeSynthesizer, SynthesisInput, Synthesize};

/// Errors surfaced to callers of `run`
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("All sources failed: {}", .0.errors.join("; "))]
    AllSourcesFailed(FailureReport),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Self-correcting research workflow
pub struct ResearchWorkflow {
    config: WorkflowConfig,
    router: DomainRouter,
    dispatcher: Dispatcher,
    search: Option<Arc<dyn SearchProvider>>,
    synthesizer: Arc<dyn Synthesize>,
    grounding: Arc<dyn GroundingGrader>,
    quality: Arc<dyn AnswerGrader>,
}

impl ResearchWorkflow {
    /// Keyword routing, merge synthesis and lexical/heuristic graders; no search
    pub fn new(config: WorkflowConfig, registry: SpecialistRegistry) -> Self {
        Self {
            router: DomainRouter::new(&config),
            dispatcher: Dispatcher::new(registry, &config),
            search: None,
            synthesizer: Arc::new(MergeSynthesizer::new()),
            grounding: Arc::new(LexicalGroundingGrader::new()),
            quality: Arc::new(HeuristicAnswerGrader::new(config.min_answer_chars)),
            config,
        }
    }

    /// Wire up LLM-backed components from environment configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = config.workflow.specialist_timeout;

        let ollama: Option<Arc<dyn TextGenerator>> = match &config.ollama_url {
            Some(url) => {
                let client: Arc<dyn TextGenerator> =
                    Arc::new(OllamaClient::new(url, &config.llama_model, timeout)?);
                Some(client)
            }
            None => None,
        };

        let generator: Arc<dyn TextGenerator> = match (&config.anthropic_api_key, &ollama) {
            (Some(key), _) => Arc::new(ClaudeClient::new(key, &config.model, timeout)?),
            (None, Some(local)) => Arc::clone(local),
            (None, None) => {
                anyhow::bail!("No text generator configured: set ANTHROPIC_API_KEY or OLLAMA_URL")
            }
        };

        let registry =
            SpecialistRegistry::uniform(Arc::new(LlmSpecialist::new(Arc::clone(&generator))));

        // Local model classifies when available; otherwise keyword routing only
        let mut router = DomainRouter::new(&config.workflow);
        if let Some(local) = ollama {
            router = router.with_classifier(local);
        }

        let mut workflow = Self::new(config.workflow.clone(), registry)
            .with_router(router)
            .with_synthesizer(Arc::new(LlmSynthesizer::new(Arc::clone(&generator))))
            .with_grounding_grader(Arc::new(LlmGroundingGrader::new(Arc::clone(&generator))))
            .with_answer_grader(Arc::new(LlmAnswerGrader::new(
                Arc::clone(&generator),
                config.workflow.min_answer_chars,
            )));

        if let Some(key) = &config.tavily_api_key {
            workflow = workflow.with_search(Arc::new(TavilySearch::new(key, config.search_results)?));
        }

        info!(
            "Research workflow ready (generator: {}, search: {})",
            generator.name(),
            if workflow.search.is_some() { "tavily" } else { "off" }
        );

        Ok(workflow)
    }

    pub fn with_router(mut self, router: DomainRouter) -> Self {
        self.router = router;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesize>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_grounding_grader(mut self, grader: Arc<dyn GroundingGrader>) -> Self {
        self.grounding = grader;
        self
    }

    pub fn with_answer_grader(mut self, grader: Arc<dyn AnswerGrader>) -> Self {
        self.quality = grader;
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Domains that have a registered specialist
    pub fn domains(&self) -> Vec<Domain> {
        self.dispatcher.registry().domains()
    }

    /// Answer a research question
    pub async fn run(
        &self,
        query: &str,
        conversation: &ConversationContext,
    ) -> Result<ResearchAnswer, WorkflowError> {
        let state = self.run_traced(query, conversation).await?;
        match state.into_terminal()? {
            Terminal::Done(answer) => Ok(answer),
            Terminal::Failed(report) => Err(WorkflowError::AllSourcesFailed(report)),
        }
    }

    /// Run to a terminal phase and return the full state for inspection
    pub async fn run_traced(
        &self,
        query: &str,
        conversation: &ConversationContext,
    ) -> Result<ResearchState, WorkflowError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkflowError::EmptyQuery);
        }

        let mut state = ResearchState::new(query, self.config.max_iterations);
        let span = info_span!("research", run_id = %state.run_id());
        self.drive(&mut state, conversation).instrument(span).await?;
        Ok(state)
    }

    async fn drive(
        &self,
        state: &mut ResearchState,
        conversation: &ConversationContext,
    ) -> Result<(), StateError> {
        let context = conversation.render(self.config.history_turns);
        info!("Research started: {}", state.query());

        loop {
            // ROUTE
            state.enter(Phase::Route)?;
            let decision = self
                .router
                .route(
                    state.query(),
                    RoutingContext {
                        conversation,
                        feedback: state.feedback_history(),
                    },
                )
                .await;
            info!(
                "Iteration {}: routed to {:?} ({})",
                state.iteration(),
                decision.domains,
                decision.reasoning
            );
            state.set_routing(decision.domains, decision.needs_search)?;

            // DISPATCH
            state.enter(Phase::Dispatch)?;
            let answers = self
                .dispatcher
                .dispatch(state.routing(), state.query(), &context)
                .await;
            state.record_answers(answers)?;

            // SEARCH
            if self.wants_search(state) {
                self.run_search(state).await?;
            }

            if state.all_dispatch_failed() && state.search_evidence().is_empty() {
                if !state.synthesized_answer().trim().is_empty() {
                    warn!(
                        "Every specialist failed on iteration {}, keeping the previous answer",
                        state.iteration()
                    );
                    return self.finish(state, true);
                }

                let report = FailureReport {
                    domains: state.routing().to_vec(),
                    errors: state
                        .routed_answers()
                        .iter()
                        .map(|(d, a)| format!("{}: {}", d, a.error.as_deref().unwrap_or("unknown error")))
                        .collect(),
                    iterations_used: state.iteration(),
                };
                warn!("Research failed: {}", report.errors.join("; "));
                state.finalize(Terminal::Failed(report))?;
                return Ok(());
            }

            // SYNTHESIZE
            state.enter(Phase::Synthesize)?;
            let answer = {
                let input = SynthesisInput::from_state(state, &context);
                self.synthesizer.synthesize(&input).await
            };
            debug!("Synthesized {} chars", answer.len());
            state.set_synthesized_answer(answer)?;

            // GROUND_CHECK
            state.enter(Phase::GroundCheck)?;
            let pool = state.evidence_pool();
            let grounding = self
                .grounding
                .check_grounding(state.synthesized_answer(), &pool)
                .await;
            let grounded = grounding.is_grounded();
            info!(
                "Grounding: {} ({} unsupported claims)",
                if grounded { "pass" } else { "fail" },
                grounding.unsupported_claims().len()
            );
            state.set_grounding_result(grounding)?;

            // QUALITY_CHECK
            state.enter(Phase::QualityCheck)?;
            let quality = self
                .quality
                .grade_quality(state.query(), state.synthesized_answer())
                .await;
            let accepted = quality.meets(self.config.min_quality);
            info!(
                "Quality: {:.2} (min {:.2}) {}",
                quality.score,
                self.config.min_quality,
                if accepted { "accepted" } else { "rejected" }
            );
            state.set_quality_result(quality)?;

            if grounded && accepted {
                return self.finish(state, false);
            }

            if state.iteration() >= state.max_iterations() {
                warn!(
                    "Retries exhausted after {} iterations, returning best effort",
                    state.iteration()
                );
                return self.finish(state, true);
            }

            // RETRY
            state.enter(Phase::Retry)?;
            let feedback = Self::feedback_entry(state, accepted);
            info!("Retrying: {}", feedback.summary());
            state.begin_retry(feedback)?;
        }
    }

    /// Low-confidence or failed answers, a previous grounding failure, or the router asked for it
    fn wants_search(&self, state: &ResearchState) -> bool {
        let previous_ungrounded = state
            .feedback_history()
            .last()
            .map_or(false, |f| !f.grounded);
        state.any_low_confidence() || previous_ungrounded || state.search_requested()
    }

    async fn run_search(&self, state: &mut ResearchState) -> Result<(), StateError> {
        let provider = match &self.search {
            Some(p) => p,
            None => {
                debug!("Search wanted but no provider configured");
                return Ok(());
            }
        };

        state.enter(Phase::Search)?;
        let query = Self::search_query(state);
        debug!("Searching: {}", query);

        match tokio::time::timeout(self.config.search_timeout, provider.search(&query)).await {
            Ok(Ok(snippets)) => {
                let added = state.add_search_evidence(snippets)?;
                info!("Search added {} snippets", added);
            }
            Ok(Err(e)) => warn!("Search failed: {}", e),
            Err(_) => warn!("Search timed out after {:?}", self.config.search_timeout),
        }
        Ok(())
    }

    /// Original question, refined with the aspects the last grade found missing
    fn search_query(state: &ResearchState) -> String {
        match state.feedback_history().last() {
            Some(f) if !f.missing_aspects.is_empty() => {
                format!("{} {}", state.query(), f.missing_aspects.join(" "))
            }
            _ => state.query().to_string(),
        }
    }

    fn feedback_entry(state: &ResearchState, quality_accepted: bool) -> FeedbackEntry {
        let grounding = state.grounding_result().cloned().unwrap_or_default();
        let quality = state.quality_result().cloned().unwrap_or_default();
        FeedbackEntry {
            iteration: state.iteration(),
            grounded: grounding.is_grounded(),
            unsupported_claims: grounding.unsupported_claims().to_vec(),
            quality_score: quality.score,
            quality_accepted,
            quality_rationale: quality.rationale,
            missing_aspects: quality.missing_aspects,
        }
    }

    fn finish(&self, state: &mut ResearchState, degraded: bool) -> Result<(), StateError> {
        let sources = state.answer_sources().to_vec();
        let mut answer_text = state.synthesized_answer().trim().to_string();
        if !sources.is_empty() {
            answer_text.push_str("\n\n**Sources:**\n");
            for source in &sources {
                answer_text.push_str(&format!("- {}\n", source));
            }
        }

        let answer = ResearchAnswer {
            answer_text: answer_text.trim_end().to_string(),
            grounded: state.grounding_result().map_or(false, |g| g.is_grounded()),
            iterations_used: state.iteration(),
            domains_consulted: state.domain_answers().keys().copied().collect(),
            degraded,
            sources,
        };

        info!(
            "Research done after {} retries (grounded: {}, degraded: {})",
            answer.iterations_used, answer.grounded, answer.degraded
        );
        state.finalize(Terminal::Done(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specialist::{Specialist, SpecialistError, SpecialistReply};
    use crate::state::{EvidenceOrigin, Snippet};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Fixed(&'static str);

    #[async_trait]
    impl Specialist for Fixed {
        async fn invoke(&self, _d: Domain, _q: &str, _c: &str) -> Result<SpecialistReply, SpecialistError> {
            Ok(SpecialistReply {
                text: self.0.to_string(),
                evidence: vec![Snippet::new(
                    self.0,
                    "https://doi.org/10.1093/biomet/70.1.41",
                    EvidenceOrigin::Specialist(Domain::Statistics),
                )],
            })
        }
    }

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl SearchProvider for Recording {
        async fn search(&self, query: &str) -> Result<Vec<Snippet>, crate::search::SearchError> {
            self.0.lock().push(query.to_string());
            Ok(vec![])
        }
    }

    const ANSWER: &str = "Propensity score matching pairs treated and control units whose estimated \
                          probability of treatment is similar, balancing observed covariates.";

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let workflow = ResearchWorkflow::new(
            WorkflowConfig::default(),
            SpecialistRegistry::uniform(Arc::new(Fixed(ANSWER))),
        );
        let err = workflow.run("   ", &ConversationContext::empty()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyQuery));
    }

    #[tokio::test]
    async fn test_accepted_first_pass_lists_sources() {
        let workflow = ResearchWorkflow::new(
            WorkflowConfig::default(),
            SpecialistRegistry::uniform(Arc::new(Fixed(ANSWER))),
        );
        let answer = workflow
            .run("What is propensity score matching?", &ConversationContext::empty())
            .await
            .unwrap();
        assert!(answer.grounded);
        assert!(!answer.degraded);
        assert_eq!(answer.iterations_used, 0);
        assert_eq!(answer.domains_consulted, vec![Domain::Statistics]);
        assert!(answer.answer_text.ends_with("- https://doi.org/10.1093/biomet/70.1.41"));
    }

    #[tokio::test]
    async fn test_search_query_refined_on_retry() {
        let search = Arc::new(Recording(Mutex::new(Vec::new())));
        let workflow = ResearchWorkflow::new(
            WorkflowConfig {
                max_iterations: 1,
                ..WorkflowConfig::default()
            },
            SpecialistRegistry::uniform(Arc::new(Fixed(ANSWER))),
        )
        .with_search(search.clone())
        .with_answer_grader(Arc::new(FixedQuality));

        let state = workflow
            .run_traced("latest papers on propensity score matching", &ConversationContext::empty())
            .await
            .unwrap();
        assert!(state.final_answer().unwrap().degraded);

        let queries = search.0.lock().clone();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0], "latest papers on propensity score matching");
        assert_eq!(queries[1], "latest papers on propensity score matching caveats");
    }

    struct FixedQuality;

    #[async_trait]
    impl AnswerGrader for FixedQuality {
        async fn grade_quality(&self, _q: &str, _a: &str) -> crate::state::QualityResult {
            crate::state::QualityResult::new(0.5, "thin", vec!["caveats".to_string()])
        }
    }
}
