//! Domain Catalog
//!
//! The fixed set of specialist domains a question can be routed to.
//! Each domain carries its label, a short description, the keyword set used
//! by the router, and the system prompt used by LLM-backed specialists.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Research specialty handled by one specialist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Statistics,
    Biology,
    Psychology,
    Philosophy,
    Psychiatry,
    Applications,
    ProductManager,
    Writing,
}

impl Domain {
    /// Every domain, in catalog order
    pub const ALL: [Domain; 8] = [
        Domain::Statistics,
        Domain::Biology,
        Domain::Psychology,
        Domain::Philosophy,
        Domain::Psychiatry,
        Domain::Applications,
        Domain::ProductManager,
        Domain::Writing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Statistics => "statistics",
            Self::Biology => "biology",
            Self::Psychology => "psychology",
            Self::Philosophy => "philosophy",
            Self::Psychiatry => "psychiatry",
            Self::Applications => "applications",
            Self::ProductManager => "product_manager",
            Self::Writing => "writing",
        }
    }

    /// Human-readable specialist name (used for attribution)
    pub fn specialist_name(&self) -> &'static str {
        match self {
            Self::Statistics => "Statistics",
            Self::Biology => "Biology",
            Self::Psychology => "Psychology",
            Self::Philosophy => "Philosophy",
            Self::Psychiatry => "Psychiatry",
            Self::Applications => "Applications",
            Self::ProductManager => "Product Management",
            Self::Writing => "Writing",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Statistics => "Statistical methodology, inference, causal methods, machine learning theory",
            Self::Biology => "Molecular biology, genetics, ecology, neurobiology",
            Self::Psychology => "Cognitive, social and clinical psychology research",
            Self::Philosophy => "Ethics, epistemology, philosophy of science and mind",
            Self::Psychiatry => "Mental disorders, psychopharmacology, clinical treatment research",
            Self::Applications => "Real-world use cases and industry implementations",
            Self::ProductManager => "Product strategy, user needs, research-to-product translation",
            Self::Writing => "PRDs, research papers, technical reports, white papers",
        }
    }

    /// System prompt for an LLM-backed specialist
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Statistics => {
                "You are a statistics research specialist. Cover inference and estimation, \
                 regression and modeling, causal methods (propensity scores, instrumental variables), \
                 high-dimensional and computational statistics. Name the methods precisely, \
                 state assumptions, and cite papers or textbooks with URLs where you can."
            }
            Self::Biology => {
                "You are a biology research specialist covering molecular biology, genetics, \
                 ecology, evolution and neurobiology. Distinguish established findings from \
                 open questions and cite primary literature with URLs where you can."
            }
            Self::Psychology => {
                "You are a psychology research specialist covering cognitive, social, \
                 developmental and clinical psychology. Describe study designs and effect \
                 sizes when relevant, note replication status, and cite sources with URLs."
            }
            Self::Philosophy => {
                "You are a philosophy specialist covering ethics, epistemology, philosophy of \
                 science and philosophy of mind. Present the main positions fairly, name their \
                 proponents, and cite primary texts or encyclopedia entries."
            }
            Self::Psychiatry => {
                "You are a psychiatry research specialist covering mental disorders, \
                 psychopharmacology and clinical treatment evidence. Separate trial evidence \
                 from clinical opinion and cite guidelines or trials with URLs where you can."
            }
            Self::Applications => {
                "You are an applied research specialist. Describe how methods are used in \
                 industry and real-world settings, name concrete organisations or systems, \
                 and link engineering write-ups or case studies."
            }
            Self::ProductManager => {
                "You are a product management specialist. Translate research into product \
                 opportunities: user needs, market fit, success metrics, risks and a \
                 pragmatic roadmap."
            }
            Self::Writing => {
                "You are a technical writing specialist. Structure documents such as PRDs, \
                 research papers, technical reports and white papers, keeping claims tied \
                 to their sources."
            }
        }
    }

    /// Router keywords. A trailing `*` allows any word suffix.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Statistics => &[
                "statistic*", "regression*", "propensity score*", "p-value*", "bayesian",
                "causal inference", "inference", "hypothesis test*", "confidence interval*",
                "varianc*", "sampling", "estimator*", "a/b test*", "mcmc", "bootstrap*",
                "quantitative", "machine learning", "probabilit*", "effect size*",
            ],
            Self::Biology => &[
                "biolog*", "gene", "genes", "genetic*", "genom*", "protein*", "cell", "cells",
                "cellular", "evolution*", "ecolog*", "molecular", "organism*", "dna", "rna",
                "species", "microbio*",
            ],
            Self::Psychology => &[
                "psycholog*", "cognitive", "cognition", "behavio*", "emotion*", "perception",
                "personality", "motivation", "cognitive bias*", "decision making",
            ],
            Self::Philosophy => &[
                "philosoph*", "ethic*", "epistemolog*", "moral*", "metaphysic*",
                "consciousness", "ontolog*", "free will", "phenomenolog*",
            ],
            Self::Psychiatry => &[
                "psychiatr*", "mental disorder*", "mental health", "depression", "depressive",
                "schizophreni*", "anxiety", "bipolar", "psychopharmacolog*", "antidepressant*",
                "ptsd", "adhd", "clinical trial*",
            ],
            Self::Applications => &[
                "application*", "real-world", "real world", "industry", "industrial",
                "use case*", "deploy*", "practical", "in production", "compan*",
            ],
            Self::ProductManager => &[
                "product*", "roadmap*", "user need*", "market fit", "market*", "stakeholder*",
                "customer*", "prd", "go-to-market", "monetiz*",
            ],
            Self::Writing => &[
                "write", "writing", "draft*", "documentation", "white paper*", "whitepaper*",
                "manuscript*", "technical report*", "essay*",
            ],
        }
    }

    /// Number of distinct keywords of this domain present in `text`
    pub fn keyword_hits(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        KEYWORD_PATTERNS
            .iter()
            .filter(|(domain, _)| domain == self)
            .flat_map(|(_, patterns)| patterns.iter())
            .filter(|re| re.is_match(&lower))
            .count()
    }
}

static KEYWORD_PATTERNS: Lazy<Vec<(Domain, Vec<Regex>)>> = Lazy::new(|| {
    Domain::ALL
        .iter()
        .map(|domain| {
            let patterns = domain
                .keywords()
                .iter()
                .filter_map(|kw| keyword_regex(kw))
                .collect();
            (*domain, patterns)
        })
        .collect()
});

fn keyword_regex(keyword: &str) -> Option<Regex> {
    let pattern = match keyword.strip_suffix('*') {
        Some(stem) => format!(r"\b{}\w*", regex::escape(stem)),
        None => format!(r"\b{}\b", regex::escape(keyword)),
    };
    Regex::new(&pattern).ok()
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "statistics" | "stats" => Ok(Self::Statistics),
            "biology" => Ok(Self::Biology),
            "psychology" => Ok(Self::Psychology),
            "philosophy" => Ok(Self::Philosophy),
            "psychiatry" => Ok(Self::Psychiatry),
            "applications" => Ok(Self::Applications),
            "product_manager" | "product" | "pm" => Ok(Self::ProductManager),
            "writing" => Ok(Self::Writing),
            other => Err(format!("Unknown domain: {}", other)),
        }
    }
}

/// Render the catalog for prompts and the `domains` command
pub fn catalog() -> String {
    Domain::ALL
        .iter()
        .map(|d| format!("- {}: {}", d.as_str(), d.description()))
        .collect::<Vec<_>>()
        .join("\n")
}
