//! Search Fallback Adapter
//!
//! Given a query, returns a single ranked batch of short snippets with
//! provenance. `TavilySearch` talks to the Tavily search API and biases
//! results toward academic sources.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::state::{EvidenceOrigin, Snippet};
use crate::text::truncate;

const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// Longest snippet kept per result
const MAX_SNIPPET_BYTES: usize = 1200;

/// Sites preferred for research questions
const ACADEMIC_DOMAINS: &[&str] = &[
    "arxiv.org",
    "scholar.google.com",
    "pubmed.ncbi.nlm.nih.gov",
    "nature.com",
    "sciencedirect.com",
    "plato.stanford.edu",
];

/// Error types for search calls
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(String),

    #[error("Search provider returned {status}: {body}")]
    Provider { status: u16, body: String },
}

/// Search capability: one query in, one finite batch out
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Snippet>, SearchError>;
}

/// Tavily-backed search
pub struct TavilySearch {
    client: Client,
    api_key: String,
    max_results: usize,
    academic: bool,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_domains: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilySearch {
    pub fn new(api_key: &str, max_results: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            max_results: max_results.max(1),
            academic: true,
        })
    }

    /// Search the open web instead of academic sites
    pub fn general(mut self) -> Self {
        self.academic = false;
        self
    }

    fn request<'a>(&self, query: &'a str) -> TavilyRequest<'a> {
        TavilyRequest {
            query,
            max_results: self.max_results,
            search_depth: "advanced",
            include_domains: if self.academic {
                ACADEMIC_DOMAINS.to_vec()
            } else {
                Vec::new()
            },
        }
    }

    fn to_snippets(response: TavilyResponse) -> Vec<Snippet> {
        response
            .results
            .into_iter()
            .filter(|r| !r.content.trim().is_empty())
            .map(|r| {
                let content = truncate(r.content.trim(), MAX_SNIPPET_BYTES);
                let text = match r.title.trim() {
                    "" => content.to_string(),
                    title => format!("{}: {}", title, content),
                };
                Snippet::new(text, r.url, EvidenceOrigin::Search)
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<Snippet>, SearchError> {
        debug!("Tavily search: {}", query);

        let response = self
            .client
            .post(TAVILY_API_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request(query))
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Provider { status, body });
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let snippets = Self::to_snippets(parsed);
        info!("Search returned {} snippets", snippets.len());
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_includes_academic_domains() {
        let search = TavilySearch::new("key", 5).unwrap();
        let body = serde_json::to_value(search.request("propensity scores")).unwrap();
        assert_eq!(body["max_results"], 5);
        assert!(body["include_domains"]
            .as_array()
            .unwrap()
            .iter()
            .any(|d| d == "arxiv.org"));

        let general = TavilySearch::new("key", 5).unwrap().general();
        let body = serde_json::to_value(general.request("q")).unwrap();
        assert!(body.get("include_domains").is_none());
    }

    #[test]
    fn test_response_to_snippets() {
        let raw = r#"{"results": [
            {"title": "PSM review", "url": "https://arxiv.org/abs/1", "content": "Matching on the score."},
            {"title": "Empty", "url": "https://arxiv.org/abs/2", "content": "  "}
        ]}"#;
        let parsed: TavilyResponse = serde_json::from_str(raw).unwrap();
        let snippets = TavilySearch::to_snippets(parsed);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source, "https://arxiv.org/abs/1");
        assert_eq!(snippets[0].text, "PSM review: Matching on the score.");
        assert_eq!(snippets[0].origin, EvidenceOrigin::Search);
    }

    #[test]
    fn test_untitled_result_kept() {
        let raw = r#"{"results": [
            {"url": "https://arxiv.org/abs/3", "content": "Caliper matching limits distance."},
            {"title": "PSM review", "url": "https://arxiv.org/abs/1", "content": "Matching on the score."}
        ]}"#;
        let parsed: TavilyResponse = serde_json::from_str(raw).unwrap();
        let snippets = TavilySearch::to_snippets(parsed);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].text, "Caliper matching limits distance.");
        assert_eq!(snippets[1].text, "PSM review: Matching on the score.");
    }
}
