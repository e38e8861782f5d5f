use crate::models::{JobDescription, QueryStrategy, SearchQuery};
use std::collections::HashSet;
use tracing::debug;

/// Skill taxonomy used to group mentioned skills into technology-stack
/// queries. Lookup is case-insensitive.
pub(crate) const SKILL_TAXONOMY: &[(&str, &[&str])] = &[
    (
        "programming languages",
        &[
            "python", "java", "javascript", "typescript", "c++", "c#", "go", "rust", "php",
            "ruby", "swift", "kotlin", "scala",
        ],
    ),
    (
        "web frameworks",
        &[
            "react", "angular", "vue", "node.js", "express", "django", "flask", "spring",
            "rails", "next.js",
        ],
    ),
    (
        "databases",
        &[
            "postgresql",
            "mysql",
            "mongodb",
            "redis",
            "elasticsearch",
            "cassandra",
            "dynamodb",
            "sqlite",
        ],
    ),
    (
        "cloud platforms",
        &["aws", "azure", "gcp", "google cloud", "heroku"],
    ),
    (
        "devops tools",
        &[
            "docker",
            "kubernetes",
            "terraform",
            "jenkins",
            "ansible",
            "ci/cd",
            "github actions",
        ],
    ),
    (
        "data science",
        &[
            "pandas",
            "numpy",
            "tensorflow",
            "pytorch",
            "scikit-learn",
            "spark",
            "hadoop",
        ],
    ),
];

const ACTION_VERBS: &[&str] = &[
    "develop", "developed", "design", "designed", "implement", "implemented", "build", "built",
    "create", "created", "manage", "managed", "lead", "led", "coordinate", "analyze", "optimize",
    "improve", "migrate", "maintain", "deploy", "automate",
];

const SENIORITY_INDICATORS: &[&str] = &[
    "senior",
    "staff",
    "principal",
    "lead",
    "junior",
    "entry-level",
    "entry level",
    "architect",
];

/// Derives a prioritized, deduplicated set of strategy-tagged search queries
/// from a job description. Pure and deterministic; performs no I/O.
#[derive(Debug, Clone, Copy)]
pub struct SearchQueryOptimizer {
    pub max_queries: usize,
}

impl Default for SearchQueryOptimizer {
    fn default() -> Self {
        Self { max_queries: 8 }
    }
}

impl SearchQueryOptimizer {
    pub fn generate(&self, job: &JobDescription) -> Vec<SearchQuery> {
        let mut queries = Vec::new();

        if let Some(query) = primary_skills_query(job) {
            queries.push(query);
        }
        queries.extend(technology_queries(job));
        if let Some(query) = responsibility_query(job) {
            queries.push(query);
        }
        if let Some(query) = requirements_query(job) {
            queries.push(query);
        }
        if let Some(query) = seniority_query(job) {
            queries.push(query);
        }

        // The generic summary query only diversifies an existing set; a job
        // with no retrievable signal must yield an empty plan.
        if !queries.is_empty() {
            if let Some(query) = summary_query(job) {
                queries.push(query);
            }
        }

        let ranked = rank_and_dedup(queries, self.max_queries);
        debug!(query_count = ranked.len(), job = %job.title, "generated search queries");
        ranked
    }
}

fn primary_skills_query(job: &JobDescription) -> Option<SearchQuery> {
    if job.skills_mentioned.is_empty() {
        return None;
    }

    let text = job
        .skills_mentioned
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");

    Some(SearchQuery {
        text,
        strategy: QueryStrategy::Skills,
        priority: 1.0,
    })
}

fn technology_queries(job: &JobDescription) -> Vec<SearchQuery> {
    let mut queries = Vec::new();

    for (category, members) in SKILL_TAXONOMY {
        let grouped: Vec<&String> = job
            .skills_mentioned
            .iter()
            .filter(|skill| members.contains(&skill.to_lowercase().as_str()))
            .collect();

        // A lone skill already surfaces through the primary query.
        if grouped.len() < 2 {
            continue;
        }

        let text = grouped
            .iter()
            .take(3)
            .map(|skill| skill.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        debug!(category, query = %text, "technology-stack query");
        queries.push(SearchQuery {
            text,
            strategy: QueryStrategy::Technology,
            priority: 0.9,
        });
    }

    queries
}

fn responsibility_query(job: &JobDescription) -> Option<SearchQuery> {
    let mut phrases = Vec::new();

    for responsibility in job.responsibilities.iter().take(3) {
        phrases.extend(action_phrases(responsibility));
        if phrases.len() >= 4 {
            break;
        }
    }

    phrases.truncate(4);
    if phrases.is_empty() {
        return None;
    }

    Some(SearchQuery {
        text: phrases.join(" "),
        strategy: QueryStrategy::Responsibility,
        priority: 0.8,
    })
}

fn requirements_query(job: &JobDescription) -> Option<SearchQuery> {
    if job.requirements.is_empty() {
        return None;
    }

    let terms: Vec<String> = job
        .requirements
        .iter()
        .flat_map(|requirement| significant_terms(requirement))
        .take(6)
        .collect();

    if terms.is_empty() {
        return None;
    }

    Some(SearchQuery {
        text: terms.join(" "),
        strategy: QueryStrategy::Skills,
        priority: 0.7,
    })
}

fn seniority_query(job: &JobDescription) -> Option<SearchQuery> {
    let lowered = job.full_text.to_lowercase();
    let indicator = SENIORITY_INDICATORS
        .iter()
        .find(|indicator| lowered.contains(*indicator))?;

    let top_skills = job
        .skills_mentioned
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>();
    if top_skills.is_empty() {
        return None;
    }

    Some(SearchQuery {
        text: format!("{indicator} {}", top_skills.join(" ")),
        strategy: QueryStrategy::Seniority,
        priority: 0.6,
    })
}

fn summary_query(job: &JobDescription) -> Option<SearchQuery> {
    let terms: Vec<String> = significant_terms(&job.summary).into_iter().take(6).collect();
    if terms.len() < 2 {
        return None;
    }

    Some(SearchQuery {
        text: terms.join(" "),
        strategy: QueryStrategy::Skills,
        priority: 0.4,
    })
}

/// Grabs "verb + object" fragments from responsibility text, e.g.
/// "design distributed pipelines" out of a longer bullet.
fn action_phrases(text: &str) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut phrases = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        let word = token
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if !ACTION_VERBS.contains(&word.as_str()) {
            continue;
        }

        let tail = tokens[index..]
            .iter()
            .take(4)
            .map(|part| part.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if tail.len() > word.len() {
            phrases.push(tail);
        }
    }

    phrases
}

fn significant_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric() && c != '+' && c != '#'))
        .filter(|token| token.len() > 3)
        .filter(|token| !is_stopword(token))
        .map(|token| token.to_string())
        .collect()
}

fn is_stopword(token: &str) -> bool {
    matches!(
        token.to_lowercase().as_str(),
        "with" | "have" | "must" | "should" | "years" | "experience" | "strong" | "ability"
            | "will" | "work" | "team" | "this" | "that" | "your" | "their" | "from" | "into"
    )
}

fn rank_and_dedup(mut queries: Vec<SearchQuery>, max_queries: usize) -> Vec<SearchQuery> {
    queries.sort_by(|left, right| right.priority.total_cmp(&left.priority));

    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for query in queries {
        let normalized = query
            .text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if normalized.is_empty() || !seen.insert(normalized) {
            continue;
        }

        unique.push(query);
        if unique.len() >= max_queries {
            break;
        }
    }

    unique
}
