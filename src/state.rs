//! Research State
//!
//! The single mutable record threaded through one query lifecycle.
//! Each stage writes only the fields it owns; the workflow is the only
//! caller of the setters and the only reader of the terminal result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::Domain;

/// Errors raised when the lifecycle rules of the state are violated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Research state already finalized")]
    Finalized,

    #[error("Iteration limit reached ({0})")]
    IterationLimit(u32),

    #[error("Research state was never finalized")]
    NotFinalized,
}

/// Where a piece of evidence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceOrigin {
    Specialist(Domain),
    Search,
}

/// A source snippet in the evidence pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    /// URL, citation or adapter-specific identifier
    pub source: String,
    pub origin: EvidenceOrigin,
}

impl Snippet {
    pub fn new(text: impl Into<String>, source: impl Into<String>, origin: EvidenceOrigin) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            origin,
        }
    }
}

/// Outcome of one specialist call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainAnswer {
    pub text: String,
    pub evidence: Vec<Snippet>,
    pub success: bool,
    pub error: Option<String>,
    /// Empty, too short or refusal-like; triggers the search fallback
    pub low_confidence: bool,
    pub duration_ms: u64,
}

impl DomainAnswer {
    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            text: String::new(),
            evidence: Vec::new(),
            success: false,
            error: Some(error.into()),
            low_confidence: true,
            duration_ms,
        }
    }
}

/// Result of the hallucination check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingResult {
    grounded: bool,
    unsupported_claims: Vec<String>,
}

impl GroundingResult {
    /// `grounded` is derived from the claim list, never set independently
    pub fn from_unsupported(unsupported_claims: Vec<String>) -> Self {
        Self {
            grounded: unsupported_claims.is_empty(),
            unsupported_claims,
        }
    }

    pub fn grounded() -> Self {
        Self::from_unsupported(Vec::new())
    }

    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    pub fn unsupported_claims(&self) -> &[String] {
        &self.unsupported_claims
    }
}

/// Result of the answer-quality check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    /// 0.0 - 1.0
    pub score: f64,
    pub rationale: String,
    pub missing_aspects: Vec<String>,
}

impl QualityResult {
    pub fn new(score: f64, rationale: impl Into<String>, missing_aspects: Vec<String>) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            rationale: rationale.into(),
            missing_aspects,
        }
    }

    pub fn meets(&self, min_quality: f64) -> bool {
        self.score >= min_quality
    }
}

/// Summary of one rejected iteration, fed into the next attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub iteration: u32,
    pub grounded: bool,
    pub unsupported_claims: Vec<String>,
    pub quality_score: f64,
    pub quality_accepted: bool,
    pub quality_rationale: String,
    pub missing_aspects: Vec<String>,
}

impl FeedbackEntry {
    /// One-paragraph description of what went wrong
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.grounded {
            parts.push(format!(
                "Unsupported claims: {}",
                self.unsupported_claims.join("; ")
            ));
        }
        if !self.quality_accepted {
            parts.push(format!(
                "Quality {:.0}%: {}",
                self.quality_score * 100.0,
                self.quality_rationale
            ));
            if !self.missing_aspects.is_empty() {
                parts.push(format!("Missing: {}", self.missing_aspects.join(", ")));
            }
        }
        format!("Iteration {}: {}", self.iteration, parts.join(". "))
    }
}

/// Workflow phases; `Done` and `Fail` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Route,
    Dispatch,
    Search,
    Synthesize,
    GroundCheck,
    QualityCheck,
    Retry,
    Done,
    Fail,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Route => "ROUTE",
            Phase::Dispatch => "DISPATCH",
            Phase::Search => "SEARCH",
            Phase::Synthesize => "SYNTHESIZE",
            Phase::GroundCheck => "GROUND_CHECK",
            Phase::QualityCheck => "QUALITY_CHECK",
            Phase::Retry => "RETRY",
            Phase::Done => "DONE",
            Phase::Fail => "FAIL",
        };
        f.write_str(name)
    }
}

/// Answer returned to callers on DONE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchAnswer {
    pub answer_text: String,
    pub grounded: bool,
    pub iterations_used: u32,
    pub domains_consulted: Vec<Domain>,
    pub degraded: bool,
    pub sources: Vec<String>,
}

/// Report produced on FAIL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub domains: Vec<Domain>,
    pub errors: Vec<String>,
    pub iterations_used: u32,
}

/// Terminal value, set exactly once
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Terminal {
    Done(ResearchAnswer),
    Failed(FailureReport),
}

/// Mutable record for one research query
#[derive(Debug, Clone)]
pub struct ResearchState {
    run_id: String,
    query: String,
    max_iterations: u32,
    routing: Vec<Domain>,
    search_requested: bool,
    domain_answers: BTreeMap<Domain, DomainAnswer>,
    search_evidence: Vec<Snippet>,
    synthesized_answer: String,
    answer_sources: Vec<String>,
    grounding_result: Option<GroundingResult>,
    quality_result: Option<QualityResult>,
    iteration: u32,
    feedback_history: Vec<FeedbackEntry>,
    trace: Vec<(u32, Phase)>,
    terminal: Option<Terminal>,
}

impl ResearchState {
    pub fn new(query: &str, max_iterations: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            max_iterations,
            routing: Vec::new(),
            search_requested: false,
            domain_answers: BTreeMap::new(),
            search_evidence: Vec::new(),
            synthesized_answer: String::new(),
            answer_sources: Vec::new(),
            grounding_result: None,
            quality_result: None,
            iteration: 0,
            feedback_history: Vec::new(),
            trace: Vec::new(),
            terminal: None,
        }
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn routing(&self) -> &[Domain] {
        &self.routing
    }

    pub fn search_requested(&self) -> bool {
        self.search_requested
    }

    pub fn domain_answers(&self) -> &BTreeMap<Domain, DomainAnswer> {
        &self.domain_answers
    }

    /// Answers for the domains in the current routing, in routing order
    pub fn routed_answers(&self) -> Vec<(Domain, &DomainAnswer)> {
        self.routing
            .iter()
            .filter_map(|d| self.domain_answers.get(d).map(|a| (*d, a)))
            .collect()
    }

    pub fn search_evidence(&self) -> &[Snippet] {
        &self.search_evidence
    }

    pub fn synthesized_answer(&self) -> &str {
        &self.synthesized_answer
    }

    /// Sources that backed the current answer when it was synthesized
    pub fn answer_sources(&self) -> &[String] {
        &self.answer_sources
    }

    pub fn grounding_result(&self) -> Option<&GroundingResult> {
        self.grounding_result.as_ref()
    }

    pub fn quality_result(&self) -> Option<&QualityResult> {
        self.quality_result.as_ref()
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn feedback_history(&self) -> &[FeedbackEntry] {
        &self.feedback_history
    }

    pub fn trace(&self) -> &[(u32, Phase)] {
        &self.trace
    }

    pub fn is_final(&self) -> bool {
        self.terminal.is_some()
    }

    pub(crate) fn into_terminal(self) -> Result<Terminal, StateError> {
        self.terminal.ok_or(StateError::NotFinalized)
    }

    /// Final answer, once the run reached DONE
    pub fn final_answer(&self) -> Option<&ResearchAnswer> {
        match &self.terminal {
            Some(Terminal::Done(answer)) => Some(answer),
            _ => None,
        }
    }

    /// Failure report, once the run reached FAIL
    pub fn failure_report(&self) -> Option<&FailureReport> {
        match &self.terminal {
            Some(Terminal::Failed(report)) => Some(report),
            _ => None,
        }
    }

    /// Routed answers that succeeded
    pub fn successful_answers(&self) -> Vec<(Domain, &DomainAnswer)> {
        self.routed_answers()
            .into_iter()
            .filter(|(_, a)| a.success)
            .collect()
    }

    /// True when every routed specialist call failed
    pub fn all_dispatch_failed(&self) -> bool {
        self.routed_answers().iter().all(|(_, a)| !a.success)
    }

    pub fn any_low_confidence(&self) -> bool {
        self.routed_answers().iter().any(|(_, a)| a.low_confidence)
    }

    /// Domain answer text, specialist evidence and search evidence for the routed domains
    pub fn evidence_pool(&self) -> Vec<Snippet> {
        let mut pool = Vec::new();
        for (domain, answer) in self.successful_answers() {
            pool.push(Snippet::new(
                answer.text.clone(),
                format!("specialist:{}", domain),
                EvidenceOrigin::Specialist(domain),
            ));
            pool.extend(answer.evidence.iter().cloned());
        }
        pool.extend(self.search_evidence.iter().cloned());
        pool
    }

    /// Distinct external source identifiers, in first-seen order
    pub fn sources(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let specialist = self
            .successful_answers()
            .into_iter()
            .flat_map(|(_, a)| a.evidence.iter());
        for snippet in specialist.chain(self.search_evidence.iter()) {
            if !snippet.source.is_empty() && !seen.contains(&snippet.source) {
                seen.push(snippet.source.clone());
            }
        }
        seen
    }

    // ------------------------------------------------------------------
    // Writes (workflow only)
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.terminal.is_some() {
            Err(StateError::Finalized)
        } else {
            Ok(())
        }
    }

    pub(crate) fn enter(&mut self, phase: Phase) -> Result<(), StateError> {
        self.ensure_open()?;
        self.trace.push((self.iteration, phase));
        Ok(())
    }

    pub(crate) fn set_routing(&mut self, routing: Vec<Domain>, search_requested: bool) -> Result<(), StateError> {
        self.ensure_open()?;
        self.routing = routing;
        self.search_requested = search_requested;
        Ok(())
    }

    /// Insert or overwrite; entries are never removed
    pub(crate) fn record_answers(
        &mut self,
        answers: impl IntoIterator<Item = (Domain, DomainAnswer)>,
    ) -> Result<(), StateError> {
        self.ensure_open()?;
        self.domain_answers.extend(answers);
        Ok(())
    }

    /// Append search results, skipping snippets already collected
    pub(crate) fn add_search_evidence(&mut self, snippets: Vec<Snippet>) -> Result<usize, StateError> {
        self.ensure_open()?;
        let before = self.search_evidence.len();
        for snippet in snippets {
            let duplicate = self
                .search_evidence
                .iter()
                .any(|s| s.source == snippet.source && s.text == snippet.text);
            if !duplicate {
                self.search_evidence.push(snippet);
            }
        }
        Ok(self.search_evidence.len() - before)
    }

    /// New answer; clears grading results so they can never refer to a stale answer
    pub(crate) fn set_synthesized_answer(&mut self, answer: String) -> Result<(), StateError> {
        self.ensure_open()?;
        self.synthesized_answer = answer;
        self.answer_sources = self.sources();
        self.grounding_result = None;
        self.quality_result = None;
        Ok(())
    }

    pub(crate) fn set_grounding_result(&mut self, result: GroundingResult) -> Result<(), StateError> {
        self.ensure_open()?;
        self.grounding_result = Some(result);
        Ok(())
    }

    pub(crate) fn set_quality_result(&mut self, result: QualityResult) -> Result<(), StateError> {
        self.ensure_open()?;
        self.quality_result = Some(result);
        Ok(())
    }

    /// Record the failure of the current iteration and advance the counter
    pub(crate) fn begin_retry(&mut self, feedback: FeedbackEntry) -> Result<(), StateError> {
        self.ensure_open()?;
        if self.iteration >= self.max_iterations {
            return Err(StateError::IterationLimit(self.max_iterations));
        }
        self.feedback_history.push(feedback);
        self.iteration += 1;
        Ok(())
    }

    pub(crate) fn finalize(&mut self, terminal: Terminal) -> Result<(), StateError> {
        self.ensure_open()?;
        let phase = match terminal {
            Terminal::Done(_) => Phase::Done,
            Terminal::Failed(_) => Phase::Fail,
        };
        self.trace.push((self.iteration, phase));
        self.terminal = Some(terminal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str) -> DomainAnswer {
        DomainAnswer {
            text: text.to_string(),
            evidence: vec![Snippet::new(
                "snippet",
                "https://example.org/paper",
                EvidenceOrigin::Specialist(Domain::Statistics),
            )],
            success: true,
            error: None,
            low_confidence: false,
            duration_ms: 5,
        }
    }

    fn done() -> Terminal {
        Terminal::Done(ResearchAnswer {
            answer_text: "answer".to_string(),
            grounded: true,
            iterations_used: 0,
            domains_consulted: vec![Domain::Statistics],
            degraded: false,
            sources: vec![],
        })
    }

    #[test]
    fn test_grounded_derived_from_claims() {
        assert!(GroundingResult::from_unsupported(vec![]).is_grounded());
        let result = GroundingResult::from_unsupported(vec!["made up".to_string()]);
        assert!(!result.is_grounded());
        assert_eq!(result.unsupported_claims(), ["made up".to_string()]);
    }

    #[test]
    fn test_quality_score_clamped() {
        assert_eq!(QualityResult::new(1.7, "", vec![]).score, 1.0);
        assert_eq!(QualityResult::new(-0.2, "", vec![]).score, 0.0);
        assert!(QualityResult::new(0.6, "", vec![]).meets(0.6));
    }

    #[test]
    fn test_finalize_once_and_freeze() {
        let mut state = ResearchState::new("q", 3);
        state.finalize(done()).unwrap();
        assert!(state.is_final());
        assert_eq!(state.finalize(done()), Err(StateError::Finalized));
        assert_eq!(
            state.set_synthesized_answer("late".to_string()),
            Err(StateError::Finalized)
        );
        assert_eq!(state.trace().last(), Some(&(0, Phase::Done)));
    }

    #[test]
    fn test_retry_bounded_by_max_iterations() {
        let mut state = ResearchState::new("q", 1);
        let feedback = FeedbackEntry {
            iteration: 0,
            grounded: false,
            unsupported_claims: vec!["x".to_string()],
            quality_score: 0.9,
            quality_accepted: true,
            quality_rationale: String::new(),
            missing_aspects: vec![],
        };
        state.begin_retry(feedback.clone()).unwrap();
        assert_eq!(state.iteration(), 1);
        assert_eq!(
            state.begin_retry(feedback),
            Err(StateError::IterationLimit(1))
        );
        assert_eq!(state.feedback_history().len(), 1);
    }

    #[test]
    fn test_new_answer_clears_stale_grades() {
        let mut state = ResearchState::new("q", 3);
        state.set_synthesized_answer("first".to_string()).unwrap();
        state.set_grounding_result(GroundingResult::grounded()).unwrap();
        state.set_quality_result(QualityResult::new(0.9, "ok", vec![])).unwrap();
        state.set_synthesized_answer("second".to_string()).unwrap();
        assert!(state.grounding_result().is_none());
        assert!(state.quality_result().is_none());
    }

    #[test]
    fn test_answer_sources_survive_later_failures() {
        let mut state = ResearchState::new("q", 3);
        state.set_routing(vec![Domain::Statistics], false).unwrap();
        state.record_answers(vec![(Domain::Statistics, answer("stats text"))]).unwrap();
        state.set_synthesized_answer("stats text".to_string()).unwrap();

        state
            .record_answers(vec![(Domain::Statistics, DomainAnswer::failure("rate limited", 3))])
            .unwrap();
        assert!(state.sources().is_empty());
        assert_eq!(state.answer_sources(), ["https://example.org/paper".to_string()]);
    }

    #[test]
    fn test_answers_overwritten_not_removed() {
        let mut state = ResearchState::new("q", 3);
        state.set_routing(vec![Domain::Statistics, Domain::Psychology], false).unwrap();
        state
            .record_answers(vec![
                (Domain::Statistics, answer("stats v1")),
                (Domain::Psychology, DomainAnswer::failure("timeout", 10)),
            ])
            .unwrap();
        assert!(!state.all_dispatch_failed());
        assert!(state.any_low_confidence());

        state.set_routing(vec![Domain::Statistics], false).unwrap();
        state.record_answers(vec![(Domain::Statistics, answer("stats v2"))]).unwrap();
        assert_eq!(state.domain_answers().len(), 2);
        assert_eq!(state.routed_answers().len(), 1);
        assert_eq!(state.routed_answers()[0].1.text, "stats v2");
    }

    #[test]
    fn test_evidence_pool_and_sources() {
        let mut state = ResearchState::new("q", 3);
        state.set_routing(vec![Domain::Statistics], false).unwrap();
        state.record_answers(vec![(Domain::Statistics, answer("stats text"))]).unwrap();
        let added = state
            .add_search_evidence(vec![
                Snippet::new("web", "https://web.example", EvidenceOrigin::Search),
                Snippet::new("web", "https://web.example", EvidenceOrigin::Search),
            ])
            .unwrap();
        assert_eq!(added, 1);

        let pool = state.evidence_pool();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[0].text, "stats text");
        assert_eq!(
            state.sources(),
            vec!["https://example.org/paper".to_string(), "https://web.example".to_string()]
        );
    }

    #[test]
    fn test_feedback_summary() {
        let entry = FeedbackEntry {
            iteration: 1,
            grounded: false,
            unsupported_claims: vec!["Claim A".to_string()],
            quality_score: 0.4,
            quality_accepted: false,
            quality_rationale: "Too vague".to_string(),
            missing_aspects: vec!["assumptions".to_string()],
        };
        let summary = entry.summary();
        assert!(summary.starts_with("Iteration 1"));
        assert!(summary.contains("Claim A"));
        assert!(summary.contains("Too vague"));
        assert!(summary.contains("assumptions"));
    }
}
