//! Workflow behaviour with mock specialists, search and graders

use async_trait::async_trait;
use parking_lot::Mutex;
use research_agent::{
    AnswerGrader, ConversationContext, Domain, EvidenceOrigin, FeedbackEntry, GroundingGrader,
    GroundingResult,
    LexicalGroundingGrader, MergeSynthesizer, Phase, QualityResult, ResearchWorkflow, SearchError,
    SearchProvider, Snippet, Specialist, SpecialistError, SpecialistRegistry, SpecialistReply,
    SynthesisInput, Synthesize, WorkflowConfig, WorkflowError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Log = Arc<Mutex<Vec<String>>>;

const STATS: &str = "Propensity score matching pairs treated and control units with similar \
                     estimated probabilities of treatment, which balances observed covariates.";
const PSYCH: &str = "Psychology research uses randomized experiments and statistical methods such \
                     as analysis of variance to compare conditions across participants.";
const FABRICATED: &str = "Donald Rubin received the Fields Medal for inventing bootstrapping.";

// ============================================================================
// Mocks
// ============================================================================

/// Specialists with a scripted answer (or error) per domain
struct Panel {
    answers: HashMap<Domain, Result<&'static str, &'static str>>,
    log: Log,
}

#[async_trait]
impl Specialist for Panel {
    async fn invoke(&self, domain: Domain, _query: &str, _context: &str) -> Result<SpecialistReply, SpecialistError> {
        self.log.lock().push(format!("specialist:{}", domain));
        match self.answers.get(&domain) {
            Some(Ok(text)) => Ok(SpecialistReply {
                text: text.to_string(),
                evidence: vec![Snippet::new(
                    "Rosenbaum & Rubin (1983) introduced the propensity score.",
                    format!("https://papers.example/{}", domain),
                    EvidenceOrigin::Specialist(domain),
                )],
            }),
            Some(Err(e)) => Err(SpecialistError::Failed(e.to_string())),
            None => Err(SpecialistError::Unavailable("no answer scripted".to_string())),
        }
    }
}

/// Specialist that answers once, then reports itself unavailable
struct Flaky {
    calls: AtomicUsize,
}

#[async_trait]
impl Specialist for Flaky {
    async fn invoke(&self, domain: Domain, _query: &str, _context: &str) -> Result<SpecialistReply, SpecialistError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(SpecialistError::Unavailable("rate limited".to_string()));
        }
        Ok(SpecialistReply {
            text: STATS.to_string(),
            evidence: vec![Snippet::new(
                "Rosenbaum & Rubin (1983) introduced the propensity score.",
                format!("https://papers.example/{}", domain),
                EvidenceOrigin::Specialist(domain),
            )],
        })
    }
}

/// When the synthesizer appends an unsupported sentence
#[derive(Clone, Copy)]
enum Fabricate {
    Never,
    FirstPass,
    EveryPass,
}

/// Merge synthesis that logs each call and the latest feedback it was given
struct LoggingSynth {
    log: Log,
    seen: Arc<Mutex<Vec<Option<FeedbackEntry>>>>,
    fabricate: Fabricate,
}

#[async_trait]
impl Synthesize for LoggingSynth {
    async fn synthesize(&self, input: &SynthesisInput<'_>) -> String {
        self.log
            .lock()
            .push(format!("synthesize:{}", input.feedback_history.len()));
        self.seen.lock().push(input.feedback_history.last().cloned());

        let merged = MergeSynthesizer::new().merge(input);
        let fabricate = match self.fabricate {
            Fabricate::Never => false,
            Fabricate::FirstPass => input.feedback_history.is_empty(),
            Fabricate::EveryPass => true,
        };
        if fabricate {
            format!("{}\n{}", merged, FABRICATED)
        } else {
            merged
        }
    }
}

struct LoggingGrounding {
    log: Log,
}

#[async_trait]
impl GroundingGrader for LoggingGrounding {
    async fn check_grounding(&self, answer: &str, evidence: &[Snippet]) -> GroundingResult {
        self.log.lock().push("ground".to_string());
        LexicalGroundingGrader::new().check(answer, evidence)
    }
}

struct FixedQuality {
    log: Log,
    score: f64,
}

#[async_trait]
impl AnswerGrader for FixedQuality {
    async fn grade_quality(&self, _query: &str, _answer: &str) -> QualityResult {
        self.log.lock().push("quality".to_string());
        QualityResult::new(self.score, "scripted", vec!["limitations".to_string()])
    }
}

struct FixedSearch {
    snippets: Vec<Snippet>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, query: &str) -> Result<Vec<Snippet>, SearchError> {
        self.calls.lock().push(query.to_string());
        Ok(self.snippets.clone())
    }
}

struct Harness {
    workflow: ResearchWorkflow,
    log: Log,
    seen: Arc<Mutex<Vec<Option<FeedbackEntry>>>>,
}

fn harness(
    answers: Vec<(Domain, Result<&'static str, &'static str>)>,
    max_iterations: u32,
    quality: f64,
    fabricate: Fabricate,
) -> Harness {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let panel = Arc::new(Panel {
        answers: answers.into_iter().collect(),
        log: log.clone(),
    });
    let config = WorkflowConfig {
        max_iterations,
        ..WorkflowConfig::default()
    };
    let workflow = ResearchWorkflow::new(config, SpecialistRegistry::uniform(panel))
        .with_synthesizer(Arc::new(LoggingSynth {
            log: log.clone(),
            seen: seen.clone(),
            fabricate,
        }))
        .with_grounding_grader(Arc::new(LoggingGrounding { log: log.clone() }))
        .with_answer_grader(Arc::new(FixedQuality {
            log: log.clone(),
            score: quality,
        }));
    Harness { workflow, log, seen }
}

fn entries(log: &Log, prefix: &str) -> Vec<String> {
    log.lock()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

const PSM: &str = "What is propensity score matching?";

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_terminates_within_max_iterations() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 3, 0.1, Fabricate::Never);
    let state = h
        .workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();

    assert!(state.is_final());
    assert_eq!(state.iteration(), 3);
    let passes = state.trace().iter().filter(|(_, p)| *p == Phase::Synthesize).count();
    assert_eq!(passes, 4);
    assert_eq!(state.trace().last(), Some(&(3, Phase::Done)));

    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 0, 0.1, Fabricate::Never);
    let state = h
        .workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();
    assert_eq!(entries(&h.log, "synthesize").len(), 1);
    assert!(state.final_answer().unwrap().degraded);
}

#[tokio::test]
async fn test_grounding_runs_before_quality_every_pass() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 2, 0.1, Fabricate::Never);
    h.workflow
        .run(PSM, &ConversationContext::empty())
        .await
        .unwrap();

    let stages: Vec<String> = h
        .log
        .lock()
        .iter()
        .filter(|e| !e.starts_with("specialist"))
        .map(|e| e.split(':').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(stages.len(), 9);
    for pass in stages.chunks(3) {
        assert_eq!(pass, ["synthesize", "ground", "quality"]);
    }
}

#[tokio::test]
async fn test_all_specialists_failing_without_search_fails() {
    let h = harness(vec![(Domain::Statistics, Err("offline"))], 3, 0.9, Fabricate::Never);
    let state = h
        .workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();
    assert_eq!(state.trace().last(), Some(&(0, Phase::Fail)));
    assert!(state.trace().iter().all(|(_, p)| *p != Phase::Synthesize));
    assert!(entries(&h.log, "synthesize").is_empty());

    let err = h
        .workflow
        .run(PSM, &ConversationContext::empty())
        .await
        .unwrap_err();
    match err {
        WorkflowError::AllSourcesFailed(report) => {
            assert_eq!(report.domains, vec![Domain::Statistics]);
            assert!(report.errors[0].contains("offline"));
        }
        other => panic!("expected AllSourcesFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_search_evidence_rescues_failed_dispatch() {
    let search = Arc::new(FixedSearch {
        snippets: vec![Snippet::new(
            "Propensity score matching is a causal inference method that pairs units on estimated treatment probability.",
            "https://arxiv.org/abs/psm",
            EvidenceOrigin::Search,
        )],
        calls: Mutex::new(Vec::new()),
    });
    let h = harness(vec![(Domain::Statistics, Err("offline"))], 3, 0.9, Fabricate::Never);
    let workflow = h.workflow.with_search(search.clone());

    let answer = workflow.run(PSM, &ConversationContext::empty()).await.unwrap();
    assert!(answer.grounded);
    assert!(answer.answer_text.contains("causal inference method"));
    assert_eq!(answer.sources, vec!["https://arxiv.org/abs/psm".to_string()]);
    assert_eq!(search.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_low_confidence_answer_triggers_search() {
    let search = Arc::new(FixedSearch {
        snippets: vec![],
        calls: Mutex::new(Vec::new()),
    });
    let h = harness(vec![(Domain::Statistics, Ok("Too short."))], 3, 0.9, Fabricate::Never);
    let workflow = h.workflow.with_search(search.clone());

    let state = workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();
    assert!(state.trace().contains(&(0, Phase::Search)));
    assert_eq!(search.calls.lock().as_slice(), [PSM.to_string()]);
}

#[tokio::test]
async fn test_feedback_grows_one_entry_per_retry() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 3, 0.3, Fabricate::Never);
    let state = h
        .workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();

    let iterations: Vec<u32> = state.feedback_history().iter().map(|f| f.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2]);
    assert!(state
        .feedback_history()
        .iter()
        .all(|f| !f.quality_accepted && f.missing_aspects == ["limitations".to_string()]));
    // each pass sees every earlier rejection
    assert_eq!(
        entries(&h.log, "synthesize"),
        vec!["synthesize:0", "synthesize:1", "synthesize:2", "synthesize:3"]
    );

    // and the latest one is exactly what the previous pass produced
    let seen = h.seen.lock().clone();
    let history = state.feedback_history();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], None);
    for pass in 1..seen.len() {
        assert_eq!(seen[pass].as_ref(), Some(&history[pass - 1]));
    }
}

#[tokio::test]
async fn test_persistently_ungrounded_answer_exhausts_retries() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 3, 0.9, Fabricate::EveryPass);
    let state = h
        .workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();

    let answer = state.final_answer().unwrap();
    assert!(answer.degraded);
    assert!(!answer.grounded);
    assert_eq!(answer.iterations_used, 3);

    let history = state.feedback_history();
    assert_eq!(history.len(), 3);
    for (n, entry) in history.iter().enumerate() {
        assert_eq!(entry.iteration, n as u32);
        assert!(!entry.grounded);
        assert!(entry.quality_accepted);
        assert_eq!(entry.unsupported_claims, vec![FABRICATED.to_string()]);
    }

    let seen = h.seen.lock().clone();
    assert_eq!(seen[0], None);
    for pass in 1..seen.len() {
        let previous = seen[pass].as_ref().unwrap();
        assert_eq!(previous.iteration, pass as u32 - 1);
        assert_eq!(previous.unsupported_claims, vec![FABRICATED.to_string()]);
    }
}

#[tokio::test]
async fn test_specialist_outage_on_retry_keeps_previous_answer() {
    let flaky = Arc::new(Flaky {
        calls: AtomicUsize::new(0),
    });
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let workflow = ResearchWorkflow::new(WorkflowConfig::default(), SpecialistRegistry::uniform(flaky))
        .with_answer_grader(Arc::new(FixedQuality { log, score: 0.3 }));

    let state = workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();
    assert!(state.failure_report().is_none());
    assert_eq!(state.trace().last(), Some(&(1, Phase::Done)));

    let answer = state.final_answer().unwrap();
    assert!(answer.degraded);
    assert!(answer.grounded);
    assert_eq!(answer.iterations_used, 1);
    assert!(answer.answer_text.starts_with(STATS));
    assert_eq!(answer.sources, vec!["https://papers.example/statistics".to_string()]);
}

#[tokio::test]
async fn test_single_domain_question_routes_to_statistics() {
    let h = harness(
        vec![(Domain::Statistics, Ok(STATS)), (Domain::Psychology, Ok(PSYCH))],
        3,
        0.9,
        Fabricate::Never,
    );
    let answer = h.workflow.run(PSM, &ConversationContext::empty()).await.unwrap();

    assert_eq!(answer.domains_consulted, vec![Domain::Statistics]);
    assert_eq!(entries(&h.log, "specialist"), vec!["specialist:statistics"]);
    assert!(answer.answer_text.starts_with(STATS));
}

#[tokio::test]
async fn test_cross_domain_question_combines_both_answers() {
    let h = harness(
        vec![(Domain::Statistics, Ok(STATS)), (Domain::Psychology, Ok(PSYCH))],
        3,
        0.9,
        Fabricate::Never,
    );
    let state = h
        .workflow
        .run_traced(
            "How are statistical methods used in psychology research?",
            &ConversationContext::empty(),
        )
        .await
        .unwrap();

    assert!(state.routing().contains(&Domain::Statistics));
    assert!(state.routing().contains(&Domain::Psychology));

    let answer = state.final_answer().unwrap();
    assert!(answer.grounded);
    assert!(answer.answer_text.contains("## Statistics perspective"));
    assert!(answer.answer_text.contains("## Psychology perspective"));
    assert!(answer.answer_text.contains(STATS));
    assert!(answer.answer_text.contains(PSYCH));
    assert!(answer.sources.contains(&"https://papers.example/statistics".to_string()));
    assert!(answer.sources.contains(&"https://papers.example/psychology".to_string()));
}

#[tokio::test]
async fn test_unsupported_claim_is_flagged_then_removed() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 3, 0.9, Fabricate::FirstPass);
    let state = h
        .workflow
        .run_traced(PSM, &ConversationContext::empty())
        .await
        .unwrap();

    let first = &state.feedback_history()[0];
    assert!(!first.grounded);
    assert_eq!(first.unsupported_claims, vec![FABRICATED.to_string()]);

    let answer = state.final_answer().unwrap();
    assert!(answer.grounded);
    assert!(!answer.degraded);
    assert_eq!(answer.iterations_used, 1);
    assert!(!answer.answer_text.contains("Fields Medal"));
}

#[tokio::test]
async fn test_exhausted_retries_return_degraded_answer() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 3, 0.2, Fabricate::Never);
    let answer = h.workflow.run(PSM, &ConversationContext::empty()).await.unwrap();

    assert!(answer.degraded);
    assert_eq!(answer.iterations_used, 3);
    assert!(answer.grounded);
    assert!(answer.answer_text.starts_with(STATS));
}

#[tokio::test]
async fn test_follow_up_routes_from_conversation() {
    let h = harness(vec![(Domain::Statistics, Ok(STATS))], 3, 0.9, Fabricate::Never);
    let memory = research_agent::ConversationMemory::new();
    memory.add_exchange("s", PSM, STATS);

    let answer = h
        .workflow
        .run("And when does it fail?", &memory.context("s"))
        .await
        .unwrap();
    assert_eq!(answer.domains_consulted, vec![Domain::Statistics]);
}
