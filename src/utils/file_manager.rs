use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use std::path::Path;
use std::sync::Arc;

use crate::core::io::Storage;
use crate::core::state::{BookDetails, BookMetadata, ChapterResult, Outline};

pub const OUTLINE_MARKDOWN: &str = "00_outline.md";
pub const OUTLINE_JSON: &str = "outline.json";
pub const METADATA_FILE: &str = "metadata.md";

/// Lays out one book per directory under `output_dir` and writes every
/// artifact as Markdown through the injected storage.
pub struct FileManager {
    storage: Arc<dyn Storage>,
    output_dir: String,
}

impl FileManager {
    pub fn new(storage: Arc<dyn Storage>, output_dir: &str) -> Self {
        Self {
            storage,
            output_dir: output_dir.to_string(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn create_book_directory(&self, title: &str) -> Result<String> {
        let name = book_dir_name(title, Local::now().naive_local());
        let dir = join(&self.output_dir, &name);
        self.storage.create_dir(&dir).await?;
        Ok(dir)
    }

    /// Writes the readable outline plus `outline.json` so single chapters
    /// can be written later from the same outline.
    pub async fn save_outline(&self, book_dir: &str, outline: &Outline) -> Result<String> {
        let path = join(book_dir, OUTLINE_MARKDOWN);
        self.storage
            .write(&path, render_outline(outline).as_bytes())
            .await?;

        let json = serde_json::to_string_pretty(outline).context("Failed to serialize outline")?;
        self.storage
            .write(&join(book_dir, OUTLINE_JSON), json.as_bytes())
            .await?;
        Ok(path)
    }

    pub async fn load_outline(&self, path: &str) -> Result<Outline> {
        if !self.storage.exists(path).await? {
            bail!("Outline not found: {} (run `outline` first)", path);
        }
        let content = self.storage.read_string(path).await?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse outline {}", path))
    }

    pub async fn save_chapter(&self, book_dir: &str, chapter: &ChapterResult) -> Result<String> {
        let path = join(book_dir, &chapter_file_name(chapter.chapter_number, &chapter.chapter_title));
        self.storage
            .write(&path, render_chapter(chapter).as_bytes())
            .await?;
        Ok(path)
    }

    /// Concatenates every `.md` file whose name starts with a digit, ordered
    /// by that leading number, into `{Title}_full.md`.
    pub async fn save_full_book(&self, book_dir: &str, title: &str) -> Result<String> {
        let output_name = full_book_file_name(title);
        let path = join(book_dir, &output_name);

        let mut parts: Vec<(u64, String, String)> = self
            .storage
            .list(book_dir)
            .await?
            .into_iter()
            .filter_map(|entry| {
                let name = Path::new(&entry).file_name()?.to_string_lossy().to_string();
                if name == output_name || !name.ends_with(".md") {
                    return None;
                }
                leading_number(&name).map(|n| (n, name, entry))
            })
            .collect();
        parts.sort();

        let mut book = format!(
            "# {}\n\n_Generated on {}_\n\n---\n\n",
            title,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        for (_, name, entry) in &parts {
            log::debug!("Assembling {}", name);
            book.push_str(&self.storage.read_string(entry).await?);
            book.push_str("\n\n---\n\n");
        }

        self.storage.write(&path, book.as_bytes()).await?;
        Ok(path)
    }

    pub async fn save_metadata(&self, book_dir: &str, metadata: &BookMetadata) -> Result<String> {
        let path = join(book_dir, METADATA_FILE);
        let mut content = String::from("# Book Metadata\n\n");
        for (label, value) in metadata.entries() {
            content.push_str(&format!("**{}:** {}\n\n", label, value));
        }
        self.storage.write(&path, content.as_bytes()).await?;
        Ok(path)
    }
}

fn join(dir: &str, name: &str) -> String {
    Path::new(dir).join(name).to_string_lossy().to_string()
}

/// Keeps alphanumerics, space, `-` and `_`, then turns spaces into
/// underscores.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim_end()
        .replace(' ', "_")
}

pub fn book_dir_name(title: &str, now: NaiveDateTime) -> String {
    format!("{}_{}", sanitize_title(title), now.format("%Y%m%d_%H%M%S"))
}

fn path_safe(title: &str) -> String {
    title.replace(' ', "_").replace(['/', '\\'], "-")
}

pub fn chapter_file_name(number: u32, title: &str) -> String {
    format!("{:02}_{}.md", number, path_safe(title))
}

pub fn full_book_file_name(title: &str) -> String {
    format!("{}_full.md", path_safe(title))
}

fn leading_number(name: &str) -> Option<u64> {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// `7` renders as `7.0`, fractional scores as they are.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.1}", score)
    } else {
        format!("{}", score)
    }
}

fn render_chapter(chapter: &ChapterResult) -> String {
    let score = chapter
        .review_score()
        .map(format_score)
        .unwrap_or_else(|| "N/A".to_string());
    format!(
        "# Chapter {}: {}\n\n---\n**Word Count:** {}\n**Review Score:** {}\n---\n\n{}",
        chapter.chapter_number, chapter.chapter_title, chapter.word_count, score, chapter.content
    )
}

fn render_outline(outline: &Outline) -> String {
    let mut content = format!(
        "# Outline: {}\n\n**Genre:** {}\n\n**Target Audience:** {}\n\n",
        outline.title, outline.genre, outline.target_audience
    );

    if !outline.synopsis.is_empty() {
        content.push_str(&format!("## Synopsis\n\n{}\n\n", outline.synopsis));
    }

    match &outline.details {
        BookDetails::Fiction {
            main_characters,
            setting,
            themes,
        } => {
            if !setting.is_empty() {
                content.push_str(&format!("**Setting:** {}\n\n", setting));
            }
            if !themes.is_empty() {
                content.push_str(&format!("**Themes:** {}\n\n", themes.join(", ")));
            }
            if !main_characters.is_empty() {
                content.push_str("## Main Characters\n\n");
                for c in main_characters {
                    content.push_str(&format!("- **{}** ({}): {}\n", c.name, c.role, c.description));
                }
                content.push('\n');
            }
        }
        BookDetails::NonFiction {
            category,
            key_takeaways,
        } => {
            if !category.is_empty() {
                content.push_str(&format!("**Category:** {}\n\n", category));
            }
            if !key_takeaways.is_empty() {
                content.push_str("## Key Takeaways\n\n");
                for t in key_takeaways {
                    content.push_str(&format!("- {}\n", t));
                }
                content.push('\n');
            }
        }
    }

    content.push_str("## Chapters\n\n");
    for chapter in &outline.chapters {
        content.push_str(&format!(
            "### Chapter {}: {}\n\n{}\n\n",
            chapter.number, chapter.title, chapter.description
        ));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::ReviewResult;
    use crate::services::mock::{fiction_outline, non_fiction_outline};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn manager(root: &Path) -> FileManager {
        FileManager::new(Arc::new(NativeStorage::new()), &root.to_string_lossy())
    }

    fn chapter(number: u32, title: &str, content: &str) -> ChapterResult {
        let mut outline = fiction_outline(number);
        let mut spec = outline.chapters.remove(number as usize - 1);
        spec.title = title.to_string();
        ChapterResult::new(&spec, content.to_string())
    }

    #[test]
    fn test_book_dir_name() {
        let now = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap();
        assert_eq!(
            book_dir_name("Laut: Kisah Pelaut!", now),
            "Laut_Kisah_Pelaut_20250309_140507"
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(chapter_file_name(3, "The Storm Breaks"), "03_The_Storm_Breaks.md");
        assert_eq!(chapter_file_name(12, "Either/Or"), "12_Either-Or.md");
        assert_eq!(full_book_file_name("My Book"), "My_Book_full.md");
        assert_eq!(format_score(7.0), "7.0");
        assert_eq!(format_score(8.5), "8.5");
    }

    #[tokio::test]
    async fn test_save_chapter_renders_header_and_metadata() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fm = manager(dir.path());
        let book_dir = fm.create_book_directory("Buku").await?;

        let mut result = chapter(1, "Awal", "Isi bab.");
        let path = fm.save_chapter(&book_dir, &result).await?;
        let text = std::fs::read_to_string(&path)?;
        assert!(path.ends_with("01_Awal.md"));
        assert!(text.starts_with("# Chapter 1: Awal\n\n---\n**Word Count:** 2\n**Review Score:** N/A\n---\n\nIsi bab."));

        result.review = Some(ReviewResult {
            overall_score: 8.0,
            criteria_scores: BTreeMap::new(),
            feedback: String::new(),
            needs_revision: false,
        });
        fm.save_chapter(&book_dir, &result).await?;
        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("**Review Score:** 8.0"));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_book_orders_numerically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fm = manager(dir.path());
        let book_dir = fm.create_book_directory("Urutan").await?;

        for n in [10u32, 2, 1] {
            fm.save_chapter(&book_dir, &chapter(n, &format!("Bab {}", n), &format!("isi-{}", n)))
                .await?;
        }
        std::fs::write(Path::new(&book_dir).join("9_interlude.md"), "isi-9")?;
        std::fs::write(Path::new(&book_dir).join("notes.md"), "ignored")?;
        std::fs::write(Path::new(&book_dir).join("3_draft.txt"), "ignored")?;

        let path = fm.save_full_book(&book_dir, "Urutan").await?;
        let book = std::fs::read_to_string(&path)?;

        assert!(book.starts_with("# Urutan\n\n_Generated on "));
        let p1 = book.find("isi-1").unwrap();
        let p2 = book.find("isi-2").unwrap();
        let p9 = book.find("isi-9").unwrap();
        let p10 = book.find("isi-10").unwrap();
        assert!(p1 < p2 && p2 < p9 && p9 < p10);
        assert!(!book.contains("ignored"));
        assert_eq!(book.matches("\n\n---\n\n").count(), 4);

        // re-assembly does not swallow the previous output
        let again = fm.save_full_book(&book_dir, "Urutan").await?;
        assert_eq!(std::fs::read_to_string(&again)?.matches("# Urutan").count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_outline_saved_as_markdown_and_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fm = manager(dir.path());
        let book_dir = fm.create_book_directory("Uang").await?;
        let outline = non_fiction_outline(2);

        let path = fm.save_outline(&book_dir, &outline).await?;
        let md = std::fs::read_to_string(&path)?;
        assert!(md.starts_with(&format!("# Outline: {}\n\n**Genre:** ", outline.title)));
        assert!(md.contains("### Chapter 2: "));

        let loaded = fm.load_outline(&join(&book_dir, OUTLINE_JSON)).await?;
        assert_eq!(loaded, outline);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_outline_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fm = manager(dir.path());
        let missing = dir.path().join("nope").join(OUTLINE_JSON);

        let err = fm.load_outline(&missing.to_string_lossy()).await.unwrap_err();
        assert!(err.to_string().contains("Outline not found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_metadata_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fm = manager(dir.path());
        let book_dir = fm.create_book_directory("Meta").await?;
        let metadata = BookMetadata {
            title: "Meta".to_string(),
            book_type: crate::core::state::BookType::Fiction,
            total_chapters: 3,
            completed_chapters: 2,
            failed_chapters: 1,
            total_words: 4200,
            average_review_score: 7.4567,
            target_audience: "general".to_string(),
            language: crate::core::state::Language::Indonesian,
            writer_model: "qwen2.5:3b".to_string(),
            reviewer_model: "kimi-k2:1t-cloud".to_string(),
        };
        let path = fm.save_metadata(&book_dir, &metadata).await?;
        let text = std::fs::read_to_string(path)?;
        assert!(text.starts_with("# Book Metadata\n\n**Title:** Meta\n\n"));
        assert!(text.contains("**Average Review Score:** 7.46\n"));
        assert!(text.contains("**Failed Chapters:** 1\n"));
        Ok(())
    }
}
