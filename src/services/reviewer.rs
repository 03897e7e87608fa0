use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::core::state::{BookDetails, ChapterSpec, Language, Outline, ReviewResult};
use crate::services::llm::{system_prompt, ChatRequest, LlmClient};

const REVIEW_TEMPERATURE: f32 = 0.3;
const QUICK_CHECK_TEMPERATURE: f32 = 0.2;
const REVIEW_SAMPLE_CHARS: usize = 3000;
const QUICK_CHECK_SAMPLE_CHARS: usize = 2000;

pub const DEFAULT_SCORE: f64 = 7.0;
pub const REVISION_THRESHOLD: f64 = 7.0;

pub const FICTION_CRITERIA: [&str; 5] = [
    "story_engagement",
    "character_development",
    "dialogue_quality",
    "pacing",
    "writing_style",
];

pub const NON_FICTION_CRITERIA: [&str; 5] = [
    "clarity",
    "information_quality",
    "structure",
    "actionability",
    "writing_style",
];

pub fn default_criteria(details: &BookDetails) -> Vec<String> {
    let names: &[&str] = match details {
        BookDetails::Fiction { .. } => &FICTION_CRITERIA,
        BookDetails::NonFiction { .. } => &NON_FICTION_CRITERIA,
    };
    names.iter().map(|c| c.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Grammar,
    Consistency,
    Flow,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Grammar => f.write_str("grammar"),
            CheckType::Consistency => f.write_str("consistency"),
            CheckType::Flow => f.write_str("flow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickCheckResult {
    pub check_type: CheckType,
    pub result: String,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScores {
    pub overall_score: f64,
    pub criteria_scores: BTreeMap<String, f64>,
}

pub struct Reviewer<'a> {
    llm: &'a dyn LlmClient,
    model: String,
    language: Language,
}

impl<'a> Reviewer<'a> {
    pub fn new(llm: &'a dyn LlmClient, model: &str, language: Language) -> Self {
        Self {
            llm,
            model: model.to_string(),
            language,
        }
    }

    /// Scores `content` against `criteria`, or the defaults for the book's
    /// variant when none are given.
    pub async fn review(
        &self,
        content: &str,
        spec: &ChapterSpec,
        outline: &Outline,
        criteria: Option<&[String]>,
    ) -> Result<ReviewResult> {
        log::info!("Reviewing chapter {}: {}", spec.number, spec.title);

        let criteria = match criteria {
            Some(c) => c.to_vec(),
            None => default_criteria(&outline.details),
        };

        let request = ChatRequest::new(
            &self.model,
            &self.review_system_prompt(),
            &self.review_prompt(content, spec, outline, &criteria),
            REVIEW_TEMPERATURE,
        );
        let feedback = self
            .llm
            .chat(&request)
            .await
            .with_context(|| format!("Failed to review chapter {}", spec.number))?;

        let scores = parse_scores(&feedback, &criteria);
        log::info!(
            "Chapter {} review score: {}/10",
            spec.number,
            scores.overall_score
        );

        Ok(ReviewResult {
            overall_score: scores.overall_score,
            needs_revision: needs_revision(scores.overall_score),
            criteria_scores: scores.criteria_scores,
            feedback,
        })
    }

    pub async fn quick_check(&self, content: &str, check_type: CheckType) -> Result<QuickCheckResult> {
        log::info!("Running {} check", check_type);

        let (instruction, system) = match self.language {
            Language::Indonesian => (
                match check_type {
                    CheckType::Grammar => {
                        "Check grammar, spelling, dan punctuation. List semua error yang ditemukan."
                    }
                    CheckType::Consistency => {
                        "Check konsistensi nama, tempat, timeline, dan fakta. List semua inkonsistensi."
                    }
                    CheckType::Flow => {
                        "Check flow dan coherence. Identifikasi bagian yang awkward atau tidak smooth."
                    }
                },
                format!("Tugasmu adalah melakukan {} check yang teliti.", check_type),
            ),
            Language::English => (
                match check_type {
                    CheckType::Grammar => {
                        "Check grammar, spelling and punctuation. List every error you find."
                    }
                    CheckType::Consistency => {
                        "Check consistency of names, places, timeline and facts. List every inconsistency."
                    }
                    CheckType::Flow => {
                        "Check flow and coherence. Point out passages that are awkward or not smooth."
                    }
                },
                format!("Your task is to perform a thorough {} check.", check_type),
            ),
        };

        let label = match self.language {
            Language::Indonesian => "KONTEN",
            Language::English => "CONTENT",
        };
        let user = format!(
            "{}\n\n\
            {}:\n{}\n\n\
            Format output:\n\
            ## Issues Found\n\
            - [Issue 1]\n\
            - [Issue 2]\n\n\
            ## Severity: [High/Medium/Low]\n\n\
            ## Suggestions\n\
            - [Suggestion 1]\n\
            - [Suggestion 2]\n",
            instruction,
            label,
            sample(content, QUICK_CHECK_SAMPLE_CHARS)
        );

        let request = ChatRequest::new(
            &self.model,
            &system_prompt(self.language, "Content Reviewer", &system),
            &user,
            QUICK_CHECK_TEMPERATURE,
        );
        let result = self
            .llm
            .chat(&request)
            .await
            .with_context(|| format!("{} check failed", check_type))?;

        let lower = result.to_lowercase();
        let passed = lower.contains("severity: low") || lower.contains("no issues");
        Ok(QuickCheckResult {
            check_type,
            result,
            passed,
        })
    }

    fn review_system_prompt(&self) -> String {
        let instructions = match self.language {
            Language::Indonesian => {
                "Kamu adalah seorang editor dan kritikus profesional. \
                Tugasmu adalah memberikan review yang konstruktif, objektif, dan actionable. \
                Berikan score berdasarkan kriteria yang jelas dan feedback yang specific."
            }
            Language::English => {
                "You are a professional editor and critic. \
                Your task is to give constructive, objective and actionable reviews. \
                Score against clear criteria and give specific feedback."
            }
        };
        system_prompt(self.language, "Content Reviewer", instructions)
    }

    fn review_prompt(
        &self,
        content: &str,
        spec: &ChapterSpec,
        outline: &Outline,
        criteria: &[String],
    ) -> String {
        let criteria_text = criteria
            .iter()
            .map(|c| format!("- {}", title_case(c)))
            .collect::<Vec<_>>()
            .join("\n");
        let score_lines = criteria
            .iter()
            .map(|c| format!("- {}: [score]/10", title_case(c)))
            .collect::<Vec<_>>()
            .join("\n");
        let content_sample = sample(content, REVIEW_SAMPLE_CHARS);

        let (intro, book, chapter, number, title, body, rubric, instructions, closing) =
            match self.language {
                Language::Indonesian => (
                    "Review chapter berikut dan berikan penilaian berdasarkan kriteria yang ditentukan.",
                    "INFORMASI BUKU",
                    "CHAPTER INFO",
                    "Nomor",
                    "Judul",
                    "KONTEN",
                    "KRITERIA REVIEW",
                    "INSTRUKSI:\nBerikan review dalam format berikut:",
                    "Berikan penilaian yang objektif dan konstruktif!",
                ),
                Language::English => (
                    "Review the following chapter and assess it against the given criteria.",
                    "BOOK INFORMATION",
                    "CHAPTER INFO",
                    "Number",
                    "Title",
                    "CONTENT",
                    "REVIEW CRITERIA",
                    "INSTRUCTIONS:\nGive your review in the following format:",
                    "Be objective and constructive!",
                ),
            };

        format!(
            "{intro}\n\n\
            {book}:\n\
            {title}: {book_title}\n\
            Genre: {genre}\n\n\
            {chapter}:\n\
            {number}: {chapter_number}\n\
            {title}: {chapter_title}\n\n\
            {body}:\n{content_sample}\n\n\
            {rubric}:\n{criteria_text}\n\n\
            {instructions}\n\n\
            ## Overall Assessment\n\
            [...]\n\n\
            ## Scores (1-10)\n\
            {score_lines}\n\
            - Overall Score: [score]/10\n\n\
            ## Strengths\n\
            - [Strength 1]\n\
            - [Strength 2]\n\
            - [Strength 3]\n\n\
            ## Areas for Improvement\n\
            - [Area 1]: [Specific suggestion]\n\
            - [Area 2]: [Specific suggestion]\n\n\
            ## Specific Feedback\n\
            [...]\n\n\
            ## Recommendations\n\
            - [Actionable recommendation 1]\n\
            - [Actionable recommendation 2]\n\n\
            {closing}\n",
            book_title = outline.title,
            genre = outline.genre,
            chapter_number = spec.number,
            chapter_title = spec.title,
        )
    }
}

pub fn needs_revision(overall_score: f64) -> bool {
    overall_score < REVISION_THRESHOLD
}

/// First `limit` characters, with `...` appended when anything was cut.
fn sample(content: &str, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

fn title_case(criterion: &str) -> String {
    criterion
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Extracts a 1-10 score from one line of review text, e.g.
/// `- Overall Score: 8.5/10`. Returns `None` when nothing numeric follows
/// the first colon.
pub fn parse_score_line(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once(':')?;

    let mut kept = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        // a minus only counts as a sign when it leads and touches a digit
        let sign = c == '-'
            && kept.is_empty()
            && chars.peek().is_some_and(|next| next.is_ascii_digit());
        if c.is_ascii_digit() || c == '.' || c == '/' || sign {
            kept.push(c);
        }
    }

    let head = kept.split('/').next()?;
    let score: f64 = head.parse().ok()?;
    if !score.is_finite() {
        return None;
    }
    Some(score.clamp(1.0, 10.0))
}

/// Scans the review line by line. For the overall score and for each
/// criterion, the last line that parses wins; lines that fail to parse are
/// ignored. The overall score defaults when no line parses.
pub fn parse_scores(feedback: &str, criteria: &[String]) -> ParsedScores {
    let mut overall = None;
    let mut criteria_scores = BTreeMap::new();
    let needles: Vec<(&String, String)> = criteria
        .iter()
        .map(|c| (c, c.replace('_', " ").to_lowercase()))
        .collect();

    for line in feedback.lines() {
        let lower = line.to_lowercase();

        if lower.contains("overall score") {
            if let Some(score) = parse_score_line(line) {
                overall = Some(score);
            }
        }

        for (criterion, needle) in &needles {
            if lower.contains(needle.as_str()) {
                if let Some(score) = parse_score_line(line) {
                    criteria_scores.insert((*criterion).clone(), score);
                }
            }
        }
    }

    ParsedScores {
        overall_score: overall.unwrap_or(DEFAULT_SCORE),
        criteria_scores,
    }
}
