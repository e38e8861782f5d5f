use crate::error::ExtractionError;
use crate::models::JobDescription;
use crate::optimizer::SKILL_TAXONOMY;
use crate::traits::{ContentExtractionService, ExtractedContent};
use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};
use url::Url;

const MAX_SECTION_ITEMS: usize = 12;
const MAX_KEYWORDS: usize = 15;
const SUMMARY_FALLBACK_CHARS: usize = 300;

/// Turns a job-posting URL (or pasted text) into a structured
/// `JobDescription`. Network work is delegated to the injected extraction
/// service; everything after that is pure parsing.
pub struct JobContentExtractor<C> {
    service: C,
    parser: ContentParser,
}

impl<C> JobContentExtractor<C>
where
    C: ContentExtractionService + Send + Sync,
{
    pub fn new(service: C) -> Result<Self, ExtractionError> {
        Ok(Self {
            service,
            parser: ContentParser::new()?,
        })
    }

    pub async fn extract_from_url(&self, url: &str) -> Result<JobDescription, ExtractionError> {
        let validated = validate_url(url)?;
        info!(url = %validated, "extracting job posting");

        let content = self.service.extract(&validated).await?;
        if content.text.trim().is_empty() {
            return Err(ExtractionError::Empty(validated));
        }

        Ok(self.parser.parse(&validated, &content))
    }

    /// Builds a job description from pasted text with no network call.
    pub fn from_manual_text(
        &self,
        title: &str,
        company: &str,
        text: &str,
    ) -> Result<JobDescription, ExtractionError> {
        self.parser.parse_manual(title, company, text)
    }
}

/// One-shot manual parse for callers that never fetch anything.
pub fn parse_manual_text(
    title: &str,
    company: &str,
    text: &str,
) -> Result<JobDescription, ExtractionError> {
    ContentParser::new()?.parse_manual(title, company, text)
}

struct ContentParser {
    requirements_heading: Regex,
    responsibilities_heading: Regex,
    any_heading: Regex,
    title_line: Regex,
    company_line: Regex,
    keyword: Regex,
}

impl ContentParser {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            requirements_heading: Regex::new(
                r"(?i)^\s*(requirements|qualifications|what you need|must[- ]haves?)\s*:?\s*$",
            )?,
            responsibilities_heading: Regex::new(
                r"(?i)^\s*(responsibilities|what you('|’)ll do|your role|duties)\s*:?\s*$",
            )?,
            any_heading: Regex::new(r"(?i)^\s*[a-z][a-z '’/-]{2,40}\s*:?\s*$")?,
            title_line: Regex::new(r"(?im)^\s*(?:job title|position|role)\s*:\s*(.+)$")?,
            company_line: Regex::new(r"(?im)^\s*(?:company|organization|employer)\s*:\s*(.+)$")?,
            keyword: Regex::new(r"\b(?:[A-Z]{2,6}|\w+\.\w+|\w+-\w+)\b")?,
        })
    }

    fn parse_manual(
        &self,
        title: &str,
        company: &str,
        text: &str,
    ) -> Result<JobDescription, ExtractionError> {
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty("manual input".to_string()));
        }

        let content = ExtractedContent {
            url: "manual-input".to_string(),
            title: title.to_string(),
            text: text.to_string(),
            summary: String::new(),
            highlights: Vec::new(),
        };

        let mut job = self.parse("manual-input", &content);
        if !company.trim().is_empty() {
            job.company = company.trim().to_string();
        }
        Ok(job)
    }

    fn parse(&self, url: &str, content: &ExtractedContent) -> JobDescription {
        let combined = combine_text_sources(content);

        let requirements = self.extract_section(&combined, &self.requirements_heading);
        let responsibilities = self.extract_section(&combined, &self.responsibilities_heading);
        let skills_mentioned = extract_skill_mentions(&combined);
        let extracted_keywords = self.extract_keywords(&combined, &skills_mentioned);

        let title = self.extract_title(content);
        let company = self.extract_company(content, url);
        let summary = if content.summary.trim().is_empty() {
            leading_summary(&content.text)
        } else {
            content.summary.trim().to_string()
        };

        debug!(
            requirements = requirements.len(),
            responsibilities = responsibilities.len(),
            skills = skills_mentioned.len(),
            "parsed job posting"
        );

        JobDescription {
            url: url.to_string(),
            title,
            company,
            full_text: content.text.clone(),
            requirements,
            skills_mentioned,
            responsibilities,
            extracted_keywords,
            summary,
            created_at: Utc::now(),
        }
    }

    /// Collects the bullet or plain lines that follow a section heading,
    /// stopping at the next heading or a blank gap.
    fn extract_section(&self, text: &str, heading: &Regex) -> Vec<String> {
        let mut items = Vec::new();
        let mut in_section = false;
        let mut blank_run = 0;

        for line in text.lines() {
            let trimmed = line.trim();

            if heading.is_match(trimmed) {
                in_section = true;
                blank_run = 0;
                continue;
            }
            if !in_section {
                continue;
            }

            if trimmed.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    break;
                }
                continue;
            }
            blank_run = 0;

            if self.any_heading.is_match(trimmed) && !is_bullet(trimmed) {
                break;
            }

            let item = strip_bullet(trimmed);
            if item.len() > 3 {
                items.push(item);
            }
            if items.len() >= MAX_SECTION_ITEMS {
                break;
            }
        }

        items
    }

    fn extract_keywords(&self, text: &str, skills: &[String]) -> Vec<String> {
        let mut seen: Vec<String> = skills.iter().map(|s| s.to_lowercase()).collect();
        let mut keywords = Vec::new();

        for capture in self.keyword.find_iter(text) {
            let term = capture.as_str();
            let lowered = term.to_lowercase();

            if term.len() < 2 || seen.contains(&lowered) || is_common_word(&lowered) {
                continue;
            }

            seen.push(lowered);
            keywords.push(term.to_string());
            if keywords.len() >= MAX_KEYWORDS {
                break;
            }
        }

        keywords
    }

    fn extract_title(&self, content: &ExtractedContent) -> String {
        let title = content.title.trim();
        if !title.is_empty() && !is_generic_title(title) {
            return clean_fragment(title);
        }

        if let Some(capture) = self.title_line.captures(&content.text) {
            let candidate = capture[1].trim();
            if !candidate.is_empty() && !is_generic_title(candidate) {
                return clean_fragment(candidate);
            }
        }

        "Unknown Position".to_string()
    }

    fn extract_company(&self, content: &ExtractedContent, url: &str) -> String {
        if let Some(capture) = self.company_line.captures(&content.text) {
            let candidate = capture[1].trim();
            if !candidate.is_empty() {
                return clean_fragment(candidate);
            }
        }

        if let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
        {
            if let Some(name) = company_from_host(&host) {
                return name;
            }
        }

        "Unknown Company".to_string()
    }
}

/// Normalizes a job-posting URL: default scheme, mandatory host.
pub fn validate_url(raw: &str) -> Result<String, ExtractionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::InvalidUrl("url is empty".to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&with_scheme)
        .map_err(|error| ExtractionError::InvalidUrl(format!("{trimmed}: {error}")))?;
    if parsed.host_str().is_none() {
        return Err(ExtractionError::InvalidUrl(format!(
            "url has no host: {trimmed}"
        )));
    }

    Ok(parsed.to_string())
}

fn combine_text_sources(content: &ExtractedContent) -> String {
    let mut combined = content.text.clone();
    for highlight in &content.highlights {
        combined.push('\n');
        combined.push_str(highlight);
    }
    combined
}

fn extract_skill_mentions(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut mentions = Vec::new();

    for (_, members) in SKILL_TAXONOMY {
        for term in *members {
            if let Some(position) = find_term(&lowered, term) {
                // Taxonomy terms are ASCII, so byte offsets into the
                // lowercased text line up with the original.
                let original = &text[position..position + term.len()];
                if !mentions
                    .iter()
                    .any(|existing: &String| existing.eq_ignore_ascii_case(original))
                {
                    mentions.push(original.to_string());
                }
            }
        }
    }

    mentions
}

/// Substring search with word boundaries, so "java" never matches inside
/// "javascript".
fn find_term(lowered: &str, term: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(offset) = lowered[start..].find(term) {
        let position = start + offset;
        let end = position + term.len();

        let boundary_before = position == 0
            || !lowered[..position]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphanumeric());
        let boundary_after = end == lowered.len()
            || !lowered[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric());

        if boundary_before && boundary_after {
            return Some(position);
        }
        start = position + 1;
    }
    None
}

fn leading_summary(text: &str) -> String {
    let condensed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if condensed.len() <= SUMMARY_FALLBACK_CHARS {
        return condensed;
    }

    let mut cut = SUMMARY_FALLBACK_CHARS;
    while !condensed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &condensed[..cut])
}

fn is_bullet(line: &str) -> bool {
    line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('•')
        || line
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() && line.contains('.'))
}

fn strip_bullet(line: &str) -> String {
    line.trim_start_matches(['-', '*', '•'])
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
        .trim()
        .to_string()
}

fn is_generic_title(title: &str) -> bool {
    let lowered = title.to_lowercase();
    lowered.contains("careers")
        || lowered.contains("job board")
        || lowered.contains("open positions")
        || lowered == "jobs"
}

fn clean_fragment(text: &str) -> String {
    text.split(&['|', '–'][..])
        .next()
        .unwrap_or(text)
        .trim()
        .to_string()
}

fn company_from_host(host: &str) -> Option<String> {
    let mut labels: Vec<&str> = host.split('.').collect();
    labels.retain(|label| {
        !matches!(
            *label,
            "www" | "jobs" | "careers" | "boards" | "com" | "org" | "net" | "io" | "co" | "ai"
        )
    });

    let label = labels.last()?;
    if label.len() < 2 {
        return None;
    }

    let mut chars = label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().collect::<String>() + chars.as_str())
}

fn is_common_word(term: &str) -> bool {
    matches!(
        term,
        "e.g" | "i.e" | "full-time" | "part-time" | "on-site" | "co-op" | "the" | "and"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionError;
    use crate::traits::{ContentExtractionService, ExtractedContent};
    use async_trait::async_trait;

    const POSTING: &str = "Role: Senior Backend Engineer\n\
Company: Initech\n\
\n\
We build billing infrastructure used by thousands of merchants.\n\
\n\
Responsibilities:\n\
- Design and operate high-volume payment services\n\
- Lead incident reviews and reliability work\n\
\n\
Requirements:\n\
- 5+ years working with Python and PostgreSQL\n\
- Production Kubernetes experience\n\
- Familiarity with CI/CD pipelines\n\
\n\
Benefits:\n\
- Remote friendly\n";

    struct FakeExtraction {
        content: ExtractedContent,
    }

    #[async_trait]
    impl ContentExtractionService for FakeExtraction {
        async fn extract(&self, _url: &str) -> Result<ExtractedContent, ExtractionError> {
            Ok(self.content.clone())
        }
    }

    fn content(text: &str, title: &str) -> ExtractedContent {
        ExtractedContent {
            url: "https://jobs.initech.example/42".to_string(),
            title: title.to_string(),
            text: text.to_string(),
            summary: String::new(),
            highlights: Vec::new(),
        }
    }

    #[tokio::test]
    async fn parses_sections_skills_and_title() {
        let extractor = JobContentExtractor::new(FakeExtraction {
            content: content(POSTING, "Senior Backend Engineer"),
        })
        .expect("patterns should compile");

        let job = extractor
            .extract_from_url("https://jobs.initech.example/42")
            .await
            .expect("extraction should succeed");

        assert_eq!(job.title, "Senior Backend Engineer");
        assert_eq!(job.requirements.len(), 3);
        assert!(job.requirements[0].contains("Python and PostgreSQL"));
        assert_eq!(job.responsibilities.len(), 2);
        assert!(job.skills_mentioned.iter().any(|s| s == "Python"));
        assert!(job.skills_mentioned.iter().any(|s| s == "Kubernetes"));
        // The benefits section must not leak into requirements.
        assert!(!job.requirements.iter().any(|r| r.contains("Remote")));
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let extractor = JobContentExtractor::new(FakeExtraction {
            content: content("   \n", "Engineer"),
        })
        .expect("patterns should compile");

        let result = extractor
            .extract_from_url("https://jobs.initech.example/42")
            .await;
        assert!(matches!(result, Err(ExtractionError::Empty(_))));
    }

    #[test]
    fn manual_text_skips_the_network() {
        let job = parse_manual_text("Data Engineer", "Globex", POSTING)
            .expect("manual parse should succeed");

        assert_eq!(job.url, "manual-input");
        assert_eq!(job.title, "Data Engineer");
        assert_eq!(job.company, "Globex");
        assert!(!job.requirements.is_empty());
    }

    #[test]
    fn manual_text_must_not_be_blank() {
        let result = parse_manual_text("Engineer", "Acme", "   ");
        assert!(matches!(result, Err(ExtractionError::Empty(_))));
    }

    #[test]
    fn url_validation_defaults_scheme_and_requires_host() {
        assert_eq!(
            validate_url("jobs.example.com/postings/1").expect("should validate"),
            "https://jobs.example.com/postings/1"
        );
        assert!(validate_url("   ").is_err());
        assert!(validate_url("https://").is_err());
    }

    #[test]
    fn company_falls_back_to_url_host() {
        let parser = ContentParser::new().expect("patterns should compile");
        let company = parser.extract_company(
            &content("no company line here", "Engineer"),
            "https://jobs.globex.com/1",
        );
        assert_eq!(company, "Globex");
    }

    #[test]
    fn skill_mentions_respect_word_boundaries() {
        let mentions = extract_skill_mentions("We use JavaScript and Go every day.");
        assert!(mentions.iter().any(|s| s == "JavaScript"));
        assert!(mentions.iter().any(|s| s == "Go"));
        assert!(!mentions.iter().any(|s| s.eq_ignore_ascii_case("java")));
    }

    #[test]
    fn keywords_capture_acronyms_and_compound_terms() {
        let parser = ContentParser::new().expect("patterns should compile");
        let keywords = parser.extract_keywords(POSTING, &[]);
        assert!(keywords
            .iter()
            .any(|k| k == "CI" || k == "CD" || k == "CI/CD"));
    }
}
