//! Research Agent
//!
//! Self-correcting multi-domain research workflow.
//!
//! # Features
//!
//! - **Domain Routing**: keyword scores or LLM classification, cross-domain aware
//! - **Parallel Specialists**: one call per routed domain, each under its own timeout
//! - **Search Fallback**: literature search when specialists fail or sound unsure
//! - **Grounding Check**: every claim must be supported by the collected evidence
//! - **Quality Check**: answers must address the question
//! - **Bounded Retries**: feedback from rejected attempts drives the next pass
//!
//! # Architecture
//!
//! ```text
//! CLI / MCP ──► ResearchWorkflow ──► Router ──► Dispatcher ──► Specialists
//!                     │                              │
//!                     │                              └── Search (Tavily)
//!                     ├── Synthesizer
//!                     ├── Grounding grader
//!                     └── Answer grader
//! ```

pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod domain;
pub mod graders;
pub mod llm;
pub mod mcp;
pub mod router;
pub mod search;
pub mod specialist;
pub mod state;
pub mod synthesizer;
pub mod text;
pub mod workflow;

pub use config::{Config, WorkflowConfig};
pub use conversation::{ConversationContext, ConversationMemory, ConversationTurn, Role};
pub use dispatcher::Dispatcher;
pub use domain::Domain;
pub use graders::{
    AnswerGrader, GroundingGrader, HeuristicAnswerGrader, LexicalGroundingGrader, LlmAnswerGrader,
    LlmGroundingGrader,
};
pub use llm::{ClaudeClient, OllamaClient, TextGenerator};
pub use mcp::{McpRequest, McpResponse, McpServer};
pub use router::{DomainRouter, RoutingContext, RoutingDecision};
pub use search::{SearchError, SearchProvider, TavilySearch};
pub use specialist::{LlmSpecialist, Specialist, SpecialistError, SpecialistRegistry, SpecialistReply};
pub use state::{
    DomainAnswer, EvidenceOrigin, FailureReport, FeedbackEntry, GroundingResult, Phase,
    QualityResult, ResearchAnswer, ResearchState, Snippet, StateError,
};
pub use synthesizer::{LlmSynthesizer, MergeSynthesizer, SynthesisInput, Synthesize};
pub use workflow::{ResearchWorkflow, WorkflowError};
