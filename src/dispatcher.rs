//! Specialist Dispatcher
//!
//! Invokes the specialist of every routed domain concurrently, each call
//! under its own timeout. A failing or slow specialist never blocks or
//! cancels its siblings; its failure is recorded in its `DomainAnswer`.

use futures_util::future::join_all;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::domain::Domain;
use crate::specialist::{SpecialistError, SpecialistRegistry};
use crate::state::DomainAnswer;
use crate::text::is_refusal;

pub struct Dispatcher {
    registry: SpecialistRegistry,
    timeout: Duration,
    min_answer_chars: usize,
}

impl Dispatcher {
    pub fn new(registry: SpecialistRegistry, config: &WorkflowConfig) -> Self {
        Self {
            registry,
            timeout: config.specialist_timeout,
            min_answer_chars: config.min_answer_chars,
        }
    }

    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    /// Run all routed specialists in parallel.
    ///
    /// Returns exactly one answer per distinct domain, in routing order.
    pub async fn dispatch(
        &self,
        domains: &[Domain],
        query: &str,
        context: &str,
    ) -> Vec<(Domain, DomainAnswer)> {
        let mut unique: Vec<Domain> = Vec::with_capacity(domains.len());
        for domain in domains {
            if !unique.contains(domain) {
                unique.push(*domain);
            }
        }

        let calls = unique
            .iter()
            .map(|domain| self.invoke_one(*domain, query, context));
        let answers = join_all(calls).await;

        let failed = answers.iter().filter(|a| !a.success).count();
        let slowest = answers.iter().map(|a| a.duration_ms).max().unwrap_or(0);
        info!(
            "Dispatched {} specialists ({} failed, slowest {}ms)",
            unique.len(),
            failed,
            slowest
        );

        unique.into_iter().zip(answers).collect()
    }

    async fn invoke_one(&self, domain: Domain, query: &str, context: &str) -> DomainAnswer {
        let start = Instant::now();

        let specialist = match self.registry.get(domain) {
            Some(s) => s,
            None => {
                warn!("No specialist registered for {}", domain);
                return DomainAnswer::failure(SpecialistError::NotRegistered(domain).to_string(), 0);
            }
        };

        let result = tokio::time::timeout(self.timeout, specialist.invoke(domain, query, context)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(reply)) => {
                let text = reply.text.trim().to_string();
                let low_confidence = text.chars().count() < self.min_answer_chars || is_refusal(&text);
                if low_confidence {
                    info!(
                        "{} answer is low-confidence ({} chars, {}ms)",
                        domain,
                        text.len(),
                        duration_ms
                    );
                } else {
                    debug!("{} answered in {}ms", domain, duration_ms);
                }
                DomainAnswer {
                    text,
                    evidence: reply.evidence,
                    success: true,
                    error: None,
                    low_confidence,
                    duration_ms,
                }
            }
            Ok(Err(e)) => {
                warn!("{} specialist failed after {}ms: {}", domain, duration_ms, e);
                DomainAnswer::failure(e.to_string(), duration_ms)
            }
            Err(_) => {
                warn!("{} specialist timed out after {:?}", domain, self.timeout);
                DomainAnswer::failure(SpecialistError::Timeout(self.timeout).to_string(), duration_ms)
            }
        }
    }
}
