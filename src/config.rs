//! Configuration management

use anyhow::Result;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::Domain;

/// Tuning knobs consumed by the workflow core
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Minimum routing confidence for a domain to be selected
    pub route_threshold: f64,
    /// Domains scoring within this margin of the best one are also selected
    pub route_margin: f64,
    /// Retries after the first pass
    pub max_iterations: u32,
    /// Minimum quality score for acceptance (0.0 - 1.0)
    pub min_quality: f64,
    /// Answers shorter than this are flagged low-confidence
    pub min_answer_chars: usize,
    /// Per-specialist call timeout
    pub specialist_timeout: Duration,
    /// Search call timeout
    pub search_timeout: Duration,
    /// Domain used when routing finds no signal at all
    pub default_domain: Domain,
    /// Conversation turns rendered into specialist/synthesis context
    pub history_turns: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            route_threshold: 0.35,
            route_margin: 0.15,
            max_iterations: 3,
            min_quality: 0.6,
            min_answer_chars: 80,
            specialist_timeout: Duration::from_secs(120),
            search_timeout: Duration::from_secs(30),
            default_domain: Domain::Statistics,
            history_turns: 10,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key (preferred text generator)
    pub anthropic_api_key: Option<String>,

    /// Claude model hint (haiku, sonnet, opus) or full id
    pub model: String,

    /// Ollama URL, used when no Anthropic key is set
    pub ollama_url: Option<String>,

    /// Ollama model name
    pub llama_model: String,

    /// Tavily API key for the search fallback (optional)
    pub tavily_api_key: Option<String>,

    /// Results requested per search call
    pub search_results: usize,

    /// Workflow tuning
    pub workflow: WorkflowConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = WorkflowConfig::default();

        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        let ollama_url = std::env::var("OLLAMA_URL").ok().filter(|u| !u.is_empty());
        let tavily_api_key = std::env::var("TAVILY_API_KEY").ok().filter(|k| !k.is_empty());

        let model = std::env::var("RESEARCH_MODEL").unwrap_or_else(|_| "sonnet".to_string());
        let llama_model = std::env::var("LLAMA_MODEL").unwrap_or_else(|_| "llama3.2:3b".to_string());

        let workflow = WorkflowConfig {
            route_threshold: env_or("RESEARCH_ROUTE_THRESHOLD", defaults.route_threshold)?,
            route_margin: env_or("RESEARCH_ROUTE_MARGIN", defaults.route_margin)?,
            max_iterations: env_or("RESEARCH_MAX_RETRIES", defaults.max_iterations)?,
            min_quality: env_or("RESEARCH_MIN_QUALITY", defaults.min_quality)?,
            min_answer_chars: env_or("RESEARCH_MIN_ANSWER_CHARS", defaults.min_answer_chars)?,
            specialist_timeout: Duration::from_secs(env_or(
                "RESEARCH_SPECIALIST_TIMEOUT_SECS",
                defaults.specialist_timeout.as_secs(),
            )?),
            search_timeout: Duration::from_secs(env_or(
                "RESEARCH_SEARCH_TIMEOUT_SECS",
                defaults.search_timeout.as_secs(),
            )?),
            default_domain: env_or("RESEARCH_DEFAULT_DOMAIN", defaults.default_domain)?,
            history_turns: env_or("RESEARCH_HISTORY_TURNS", defaults.history_turns)?,
        };

        if !(0.0..=1.0).contains(&workflow.route_threshold) {
            anyhow::bail!("RESEARCH_ROUTE_THRESHOLD must be within 0.0..=1.0");
        }
        if !(0.0..=1.0).contains(&workflow.min_quality) {
            anyhow::bail!("RESEARCH_MIN_QUALITY must be within 0.0..=1.0");
        }

        let search_results = env_or("RESEARCH_SEARCH_RESULTS", 5)?;

        Ok(Self {
            anthropic_api_key,
            model,
            ollama_url,
            llama_model,
            tavily_api_key,
            search_results,
            workflow,
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        _ => Ok(default),
    }
}
