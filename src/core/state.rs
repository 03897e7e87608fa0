use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BookType {
    Fiction,
    #[value(name = "non_fiction")]
    NonFiction,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Fiction => "fiction",
            BookType::NonFiction => "non_fiction",
        }
    }
}

impl fmt::Display for BookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Indonesian,
    English,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Indonesian => f.write_str("indonesian"),
            Language::English => f.write_str("english"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Character {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
}

/// Genre-specific part of an outline, fixed when the outline is built.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookDetails {
    Fiction {
        main_characters: Vec<Character>,
        setting: String,
        themes: Vec<String>,
    },
    NonFiction {
        category: String,
        key_takeaways: Vec<String>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterDetails {
    Fiction {
        key_events: Vec<String>,
        character_development: String,
    },
    NonFiction {
        key_points: Vec<String>,
        learning_objectives: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChapterSpec {
    pub number: u32,
    pub title: String,
    pub description: String,
    pub details: ChapterDetails,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Outline {
    pub title: String,
    /// Free-text genre label as the model wrote it. Branching uses `details`.
    pub genre: String,
    pub target_audience: String,
    pub synopsis: String,
    pub details: BookDetails,
    pub chapters: Vec<ChapterSpec>,
}

impl Outline {
    pub fn book_type(&self) -> BookType {
        match self.details {
            BookDetails::Fiction { .. } => BookType::Fiction,
            BookDetails::NonFiction { .. } => BookType::NonFiction,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReviewResult {
    pub overall_score: f64,
    pub criteria_scores: BTreeMap<String, f64>,
    pub feedback: String,
    pub needs_revision: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChapterResult {
    pub chapter_number: u32,
    pub chapter_title: String,
    pub content: String,
    pub word_count: usize,
    pub char_count: usize,
    pub review: Option<ReviewResult>,
    #[serde(default)]
    pub revised: bool,
}

impl ChapterResult {
    pub fn new(spec: &ChapterSpec, content: String) -> Self {
        let word_count = content.split_whitespace().count();
        let char_count = content.chars().count();
        Self {
            chapter_number: spec.number,
            chapter_title: spec.title.clone(),
            content,
            word_count,
            char_count,
            review: None,
            revised: false,
        }
    }

    pub fn review_score(&self) -> Option<f64> {
        self.review.as_ref().map(|r| r.overall_score)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CompletedChapter {
    pub number: u32,
    pub title: String,
    pub path: String,
    pub word_count: usize,
    pub score: Option<f64>,
    pub revised: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FailedChapter {
    pub number: u32,
    pub title: String,
    pub error: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub chapter_results: Vec<CompletedChapter>,
    pub failed_chapters: Vec<FailedChapter>,
    pub total_chapters: usize,
}

impl RunSummary {
    pub fn new(total_chapters: usize) -> Self {
        Self {
            total_chapters,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, result: &ChapterResult, path: String) {
        self.chapter_results.push(CompletedChapter {
            number: result.chapter_number,
            title: result.chapter_title.clone(),
            path,
            word_count: result.word_count,
            score: result.review_score(),
            revised: result.revised,
        });
    }

    pub fn record_failure(&mut self, spec: &ChapterSpec, error: &anyhow::Error) {
        self.failed_chapters.push(FailedChapter {
            number: spec.number,
            title: spec.title.clone(),
            error: format!("{:#}", error),
        });
    }

    pub fn completed_chapters(&self) -> usize {
        self.chapter_results.len()
    }

    pub fn total_words(&self) -> usize {
        self.chapter_results.iter().map(|c| c.word_count).sum()
    }

    /// Mean over chapters that carry a score; 0 when none do.
    pub fn average_review_score(&self) -> f64 {
        let scores: Vec<f64> = self.chapter_results.iter().filter_map(|c| c.score).collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BookMetadata {
    pub title: String,
    pub book_type: BookType,
    pub total_chapters: usize,
    pub completed_chapters: usize,
    pub failed_chapters: usize,
    pub total_words: usize,
    pub average_review_score: f64,
    pub target_audience: String,
    pub language: Language,
    pub writer_model: String,
    pub reviewer_model: String,
}

impl BookMetadata {
    /// Label/value pairs in display order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Title", self.title.clone()),
            ("Type", self.book_type.to_string()),
            ("Total Chapters", self.total_chapters.to_string()),
            ("Completed Chapters", self.completed_chapters.to_string()),
            ("Failed Chapters", self.failed_chapters.to_string()),
            ("Total Words", self.total_words.to_string()),
            ("Average Review Score", format!("{:.2}", self.average_review_score)),
            ("Target Audience", self.target_audience.clone()),
            ("Language", self.language.to_string()),
            ("Writer Model", self.writer_model.clone()),
            ("Reviewer Model", self.reviewer_model.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(number: u32) -> ChapterSpec {
        ChapterSpec {
            number,
            title: format!("Chapter {}", number),
            description: String::new(),
            details: ChapterDetails::Fiction {
                key_events: vec![],
                character_development: String::new(),
            },
        }
    }

    #[test]
    fn test_chapter_result_counts() {
        let result = ChapterResult::new(&spec(1), "Satu dua  tiga\nempat".to_string());
        assert_eq!(result.word_count, 4);
        assert_eq!(result.char_count, 20);
        assert!(result.review.is_none());
    }

    #[test]
    fn test_char_count_is_characters_not_bytes() {
        let result = ChapterResult::new(&spec(1), "café".to_string());
        assert_eq!(result.char_count, 4);
    }

    #[test]
    fn test_average_ignores_unscored_chapters() {
        let mut summary = RunSummary::new(3);
        let mut scored = ChapterResult::new(&spec(1), "a b".to_string());
        scored.review = Some(ReviewResult {
            overall_score: 8.0,
            criteria_scores: BTreeMap::new(),
            feedback: String::new(),
            needs_revision: false,
        });
        summary.record_success(&scored, "01.md".to_string());
        summary.record_success(&ChapterResult::new(&spec(2), "c d e".to_string()), "02.md".to_string());
        summary.record_failure(&spec(3), &anyhow::anyhow!("boom"));

        assert_eq!(summary.completed_chapters(), 2);
        assert_eq!(summary.total_words(), 5);
        assert_eq!(summary.average_review_score(), 8.0);
        assert_eq!(summary.failed_chapters[0].error, "boom");
    }

    #[test]
    fn test_average_is_zero_without_scores() {
        let summary = RunSummary::new(0);
        assert_eq!(summary.average_review_score(), 0.0);
    }

    #[test]
    fn test_outline_json_keeps_variant() -> anyhow::Result<()> {
        let outline = Outline {
            title: "T".to_string(),
            genre: "self-help".to_string(),
            target_audience: "general".to_string(),
            synopsis: String::new(),
            details: BookDetails::NonFiction {
                category: "business".to_string(),
                key_takeaways: vec!["one".to_string()],
            },
            chapters: vec![],
        };
        let json = serde_json::to_string(&outline)?;
        assert!(json.contains("\"kind\":\"non_fiction\""));
        let back: Outline = serde_json::from_str(&json)?;
        assert_eq!(back.book_type(), BookType::NonFiction);
        Ok(())
    }
}
