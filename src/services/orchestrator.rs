use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::state::{
    BookMetadata, BookType, ChapterResult, ChapterSpec, Language, Outline, RunSummary,
};
use crate::services::llm::LlmClient;
use crate::services::planner::{OutlineRequest, Planner};
use crate::services::reviewer::{CheckType, QuickCheckResult, Reviewer};
use crate::services::stream::{FragmentSink, NullSink, StdoutSink};
use crate::services::writer::{Writer, WritingOptions, REVISION_TEMPERATURE};
use crate::utils::file_manager::FileManager;

#[derive(Debug, Clone)]
pub struct BookRequest {
    pub topic: String,
    pub book_type: BookType,
    pub num_chapters: u32,
    pub target_audience: String,
    pub additional_info: String,
    pub language: Language,
    pub style: String,
    pub min_words: u32,
    pub enable_review: bool,
    pub auto_revise: bool,
    pub streaming: bool,
}

impl BookRequest {
    pub fn new(topic: &str, book_type: BookType, num_chapters: u32) -> Self {
        Self {
            topic: topic.to_string(),
            book_type,
            num_chapters,
            target_audience: "general".to_string(),
            additional_info: String::new(),
            language: Language::default(),
            style: "engaging".to_string(),
            min_words: 1500,
            enable_review: true,
            auto_revise: false,
            streaming: false,
        }
    }

    pub fn outline_request(&self) -> OutlineRequest {
        OutlineRequest {
            topic: self.topic.clone(),
            book_type: self.book_type,
            num_chapters: self.num_chapters,
            target_audience: self.target_audience.clone(),
            additional_info: self.additional_info.clone(),
            language: self.language,
        }
    }

    pub fn writing_options(&self) -> WritingOptions {
        WritingOptions {
            style: self.style.clone(),
            min_words: self.min_words,
            language: self.language,
            streaming: self.streaming,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookReport {
    pub title: String,
    pub book_dir: String,
    pub outline_path: String,
    pub full_book_path: String,
    pub metadata_path: String,
    pub summary: RunSummary,
    pub metadata: BookMetadata,
}

#[derive(Debug, Clone)]
pub struct OutlineReport {
    pub outline: Outline,
    pub outline_path: String,
    pub book_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Outlining,
    WritingChapter(u32),
    Reviewing(u32),
    Revising(u32),
    Persisting(u32),
    Assembling,
    Done,
}

/// Drives outline, chapters, review, revision and assembly strictly in
/// sequence. A failing chapter is recorded and skipped; outline and
/// assembly failures end the run.
pub struct BookOrchestrator {
    config: Config,
    llm: Box<dyn LlmClient>,
    files: FileManager,
    phase: RunPhase,
}

impl BookOrchestrator {
    pub fn new(config: Config, llm: Box<dyn LlmClient>, storage: Arc<dyn Storage>) -> Self {
        let files = FileManager::new(storage, &config.output_folder);
        Self {
            config,
            llm,
            files,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    fn enter(&mut self, phase: RunPhase) {
        log::debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub async fn create_book(&mut self, request: &BookRequest) -> Result<BookReport> {
        println!("Starting book: {}", request.topic);
        println!("Type: {} | Chapters: {}", request.book_type, request.num_chapters);

        println!("\nStep 1: Creating outline");
        let outline = self.generate_outline(request).await?;
        let book_dir = self.files.create_book_directory(&outline.title).await?;
        let outline_path = self.files.save_outline(&book_dir, &outline).await?;
        println!("✓ Outline saved: {}", outline_path);

        println!("\nStep 2: Writing chapters");
        let pb = if request.streaming {
            // fragments go to stdout, a bar would interleave with them
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(outline.chapters.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );
            pb
        };

        let mut summary = RunSummary::new(outline.chapters.len());
        for spec in &outline.chapters {
            pb.set_message(format!("Chapter {}", spec.number));
            match self.run_chapter(spec, &outline, &book_dir, request).await {
                Ok((result, path)) => {
                    report(&pb, &format!("✓ Chapter {} done ({} words)", spec.number, result.word_count));
                    summary.record_success(&result, path);
                }
                Err(e) => {
                    log::warn!("Chapter {} failed: {:#}", spec.number, e);
                    report(&pb, &format!("✗ Error on Chapter {}: {:#}", spec.number, e));
                    summary.record_failure(spec, &e);
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("Chapters complete");

        println!("\nStep 3: Assembling full book");
        self.enter(RunPhase::Assembling);
        let full_book_path = self.files.save_full_book(&book_dir, &outline.title).await?;
        println!("✓ Full book saved: {}", full_book_path);

        let metadata = BookMetadata {
            title: outline.title.clone(),
            book_type: request.book_type,
            total_chapters: summary.total_chapters,
            completed_chapters: summary.completed_chapters(),
            failed_chapters: summary.failed_chapters.len(),
            total_words: summary.total_words(),
            average_review_score: (summary.average_review_score() * 100.0).round() / 100.0,
            target_audience: request.target_audience.clone(),
            language: request.language,
            writer_model: self.config.models.writer.clone(),
            reviewer_model: self.config.models.reviewer.clone(),
        };
        let metadata_path = self.files.save_metadata(&book_dir, &metadata).await?;
        self.enter(RunPhase::Done);

        print_summary(&outline.title, &book_dir, &summary);

        Ok(BookReport {
            title: outline.title,
            book_dir,
            outline_path,
            full_book_path,
            metadata_path,
            summary,
            metadata,
        })
    }

    pub async fn create_outline_only(&mut self, request: &BookRequest) -> Result<OutlineReport> {
        println!("Creating book outline...");
        let outline = self.generate_outline(request).await?;
        let book_dir = self.files.create_book_directory(&outline.title).await?;
        let outline_path = self.files.save_outline(&book_dir, &outline).await?;
        self.enter(RunPhase::Done);
        println!("✓ Outline saved: {}", outline_path);

        Ok(OutlineReport {
            outline,
            outline_path,
            book_dir,
        })
    }

    /// Writes (and optionally reviews) one chapter of an existing outline.
    /// With `output_path` the bare chapter text is written there.
    pub async fn write_single_chapter(
        &mut self,
        outline: &Outline,
        chapter_number: u32,
        options: &WritingOptions,
        enable_review: bool,
        output_path: Option<&str>,
    ) -> Result<ChapterResult> {
        let spec = outline
            .chapters
            .iter()
            .find(|c| c.number == chapter_number)
            .ok_or_else(|| {
                anyhow!(
                    "Chapter {} not in outline (1-{})",
                    chapter_number,
                    outline.chapters.len()
                )
            })?;
        println!("Writing Chapter {}: {}", spec.number, spec.title);

        let mut result = self.write_chapter(spec, outline, options).await?;
        if enable_review {
            self.enter(RunPhase::Reviewing(spec.number));
            let review = self
                .reviewer(options.language)
                .review(&result.content, spec, outline, None)
                .await?;
            result.review = Some(review);
        }

        if let Some(path) = output_path {
            self.enter(RunPhase::Persisting(spec.number));
            self.files
                .storage()
                .write(path, result.content.as_bytes())
                .await?;
            println!("✓ Chapter saved: {}", path);
        }
        self.enter(RunPhase::Done);
        Ok(result)
    }

    pub async fn quick_check(&self, content: &str, check_type: CheckType) -> Result<QuickCheckResult> {
        self.reviewer(self.config.language)
            .quick_check(content, check_type)
            .await
    }

    pub async fn expand_section(&self, original: &str, section: &str, context: &str) -> Result<String> {
        Writer::new(self.llm.as_ref(), &self.config.models.writer)
            .expand_section(original, section, context, self.config.language)
            .await
    }

    async fn generate_outline(&mut self, request: &BookRequest) -> Result<Outline> {
        self.enter(RunPhase::Outlining);
        Planner::new(self.llm.as_ref(), &self.config.models.planner)
            .generate(&request.outline_request())
            .await
    }

    fn reviewer(&self, language: Language) -> Reviewer<'_> {
        Reviewer::new(self.llm.as_ref(), &self.config.models.reviewer, language)
    }

    /// Everything that can fail for one chapter, so the caller can record
    /// the failure and move on.
    async fn run_chapter(
        &mut self,
        spec: &ChapterSpec,
        outline: &Outline,
        book_dir: &str,
        request: &BookRequest,
    ) -> Result<(ChapterResult, String)> {
        let options = request.writing_options();
        let mut result = self.write_chapter(spec, outline, &options).await?;

        if request.enable_review {
            self.enter(RunPhase::Reviewing(spec.number));
            let review = self
                .reviewer(request.language)
                .review(&result.content, spec, outline, None)
                .await?;
            let revise = request.auto_revise && review.needs_revision;
            result.review = Some(review);

            if revise {
                println!("Chapter {} needs revision, rewriting...", spec.number);
                result = self.revise_chapter(spec, outline, &options).await?;
            }
        }

        self.enter(RunPhase::Persisting(spec.number));
        let path = self.files.save_chapter(book_dir, &result).await?;
        Ok((result, path))
    }

    async fn write_chapter(
        &mut self,
        spec: &ChapterSpec,
        outline: &Outline,
        options: &WritingOptions,
    ) -> Result<ChapterResult> {
        self.enter(RunPhase::WritingChapter(spec.number));
        let mut sink = sink_for(options);
        Writer::new(self.llm.as_ref(), &self.config.models.writer)
            .write(spec, outline, options, sink.as_mut())
            .await
    }

    /// Rewrites the chapter from scratch with a hotter writer. The review
    /// that triggered it is not fed back and not carried over.
    async fn revise_chapter(
        &mut self,
        spec: &ChapterSpec,
        outline: &Outline,
        options: &WritingOptions,
    ) -> Result<ChapterResult> {
        self.enter(RunPhase::Revising(spec.number));
        let mut sink = sink_for(options);
        let mut revised = Writer::new(self.llm.as_ref(), &self.config.models.writer)
            .with_temperature(REVISION_TEMPERATURE)
            .write(spec, outline, options, sink.as_mut())
            .await?;
        revised.revised = true;
        Ok(revised)
    }
}

fn sink_for(options: &WritingOptions) -> Box<dyn FragmentSink> {
    if options.streaming {
        Box::new(StdoutSink)
    } else {
        Box::new(NullSink)
    }
}

fn report(pb: &ProgressBar, line: &str) {
    if pb.is_hidden() {
        println!("{}", line);
    } else {
        pb.println(line);
    }
}

fn print_summary(title: &str, book_dir: &str, summary: &RunSummary) {
    println!("\nBook complete!");
    println!("Title: {}", title);
    println!(
        "Chapters: {}/{}",
        summary.completed_chapters(),
        summary.total_chapters
    );
    println!("Total Words: {}", summary.total_words());
    println!("Average Score: {:.1}/10", summary.average_review_score());
    println!("Location: {}", book_dir);

    if !summary.failed_chapters.is_empty() {
        println!("\nFailed chapters:");
        for failed in &summary.failed_chapters {
            println!("  - Chapter {}: {} ({})", failed.number, failed.title, failed.error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::services::llm::ChatRequest;
    use crate::services::mock::ScriptedLlm;
    use std::fs;
    use std::path::Path;

    const OUTLINE_JSON: &str = r#"{
        "title": "Tiga Pulau",
        "genre": "adventure",
        "synopsis": "Perjalanan ke tiga pulau.",
        "chapters": [
            {"number": 1, "title": "Pulau Pertama", "description": "a"},
            {"number": 2, "title": "Pulau Kedua", "description": "b"},
            {"number": 3, "title": "Pulau Ketiga", "description": "c"}
        ]
    }"#;

    fn config(root: &Path) -> Config {
        Config {
            output_folder: root.to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    fn orchestrator(root: &Path, llm: ScriptedLlm) -> BookOrchestrator {
        BookOrchestrator::new(config(root), Box::new(llm), Arc::new(NativeStorage::new()))
    }

    /// Routes by agent: planner gets the outline, reviewer a fixed score,
    /// writer echoes the chapter number unless told to fail it.
    fn pipeline(review: &'static str, failing_chapter: Option<u32>) -> ScriptedLlm {
        ScriptedLlm::with_handler(move |req: &ChatRequest| {
            if req.system().contains("Book Planner") {
                return Ok(OUTLINE_JSON.to_string());
            }
            if req.system().contains("Content Reviewer") {
                return Ok(review.to_string());
            }
            for n in 1..=3u32 {
                if req.user().starts_with(&format!("Tulis Chapter {} ", n)) {
                    if failing_chapter == Some(n) {
                        return Err(anyhow!("writer crashed on {}", n));
                    }
                    return Ok(format!("Isi bab nomor {} di sini.", n));
                }
            }
            Err(anyhow!("unexpected request"))
        })
    }

    fn writer_calls(calls: &[ChatRequest]) -> Vec<&ChatRequest> {
        calls
            .iter()
            .filter(|c| c.system().contains("Content Writer"))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_chapter_is_isolated() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut orch = orchestrator(dir.path(), pipeline("Overall Score: 8/10", Some(2)));
        let request = BookRequest::new("tiga pulau", BookType::Fiction, 3);

        let report = orch.create_book(&request).await?;

        let done: Vec<u32> = report.summary.chapter_results.iter().map(|c| c.number).collect();
        assert_eq!(done, vec![1, 3]);
        assert_eq!(report.summary.failed_chapters.len(), 1);
        assert_eq!(report.summary.failed_chapters[0].number, 2);
        assert!(report.summary.failed_chapters[0].error.contains("writer crashed on 2"));
        assert_eq!(report.summary.completed_chapters(), 2);
        assert_eq!(report.metadata.failed_chapters, 1);
        assert_eq!(report.metadata.average_review_score, 8.0);
        assert_eq!(orch.phase(), RunPhase::Done);

        let book_dir = Path::new(&report.book_dir);
        assert!(book_dir.join("01_Pulau_Pertama.md").exists());
        assert!(!book_dir.join("02_Pulau_Kedua.md").exists());
        assert!(book_dir.join("03_Pulau_Ketiga.md").exists());
        assert!(book_dir.join("outline.json").exists());

        let full = fs::read_to_string(&report.full_book_path)?;
        assert!(full.contains("Isi bab nomor 1"));
        assert!(full.contains("Isi bab nomor 3"));
        assert!(full.find("# Outline: Tiga Pulau").unwrap() < full.find("Isi bab nomor 1").unwrap());

        let metadata = fs::read_to_string(&report.metadata_path)?;
        assert!(metadata.contains("**Completed Chapters:** 2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_low_score_triggers_revision() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = pipeline("- Overall Score: 5/10", None);
        let mut orch = orchestrator(dir.path(), llm);
        let mut request = BookRequest::new("tiga pulau", BookType::Fiction, 3);
        request.auto_revise = true;

        let report = orch.create_book(&request).await?;
        assert_eq!(report.summary.completed_chapters(), 3);
        for chapter in &report.summary.chapter_results {
            assert!(chapter.revised);
            assert_eq!(chapter.score, None);
        }
        // the revised chapter carries no score
        assert_eq!(report.metadata.average_review_score, 0.0);

        let text = fs::read_to_string(&report.summary.chapter_results[0].path)?;
        assert!(text.contains("**Review Score:** N/A"));
        Ok(())
    }

    #[tokio::test]
    async fn test_revision_uses_hotter_writer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(pipeline("Overall Score: 6.5/10", None));
        let mut orch = BookOrchestrator::new(
            config(dir.path()),
            Box::new(SharedLlm(llm.clone())),
            Arc::new(NativeStorage::new()),
        );
        let mut request = BookRequest::new("tiga pulau", BookType::Fiction, 1);
        request.auto_revise = true;
        orch.create_book(&request).await?;

        let calls = llm.calls();
        let writes = writer_calls(&calls);
        assert_eq!(writes.len(), 2);
        assert!((writes[0].temperature - 0.85).abs() < f32::EPSILON);
        assert!((writes[1].temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(writes[0].user(), writes[1].user(), "critique is not fed back");
        Ok(())
    }

    #[tokio::test]
    async fn test_passing_score_skips_revision() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(pipeline("Overall Score: 7/10", None));
        let mut orch = BookOrchestrator::new(
            config(dir.path()),
            Box::new(SharedLlm(llm.clone())),
            Arc::new(NativeStorage::new()),
        );
        let mut request = BookRequest::new("tiga pulau", BookType::Fiction, 3);
        request.auto_revise = true;

        let report = orch.create_book(&request).await?;
        assert!(report.summary.chapter_results.iter().all(|c| !c.revised));
        assert_eq!(writer_calls(&llm.calls()).len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_review_disabled() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = Arc::new(pipeline("Overall Score: 2/10", None));
        let mut orch = BookOrchestrator::new(
            config(dir.path()),
            Box::new(SharedLlm(llm.clone())),
            Arc::new(NativeStorage::new()),
        );
        let mut request = BookRequest::new("tiga pulau", BookType::Fiction, 3);
        request.enable_review = false;
        request.auto_revise = true;

        let report = orch.create_book(&request).await?;
        assert!(llm
            .calls()
            .iter()
            .all(|c| !c.system().contains("Content Reviewer")));
        assert!(report.summary.chapter_results.iter().all(|c| c.score.is_none()));
        Ok(())
    }

    #[tokio::test]
    async fn test_review_failure_is_a_chapter_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let llm = ScriptedLlm::with_handler(|req: &ChatRequest| {
            if req.system().contains("Book Planner") {
                Ok(OUTLINE_JSON.to_string())
            } else if req.system().contains("Content Reviewer") {
                Err(anyhow!("reviewer offline"))
            } else {
                Ok("isi".to_string())
            }
        });
        let mut orch = orchestrator(dir.path(), llm);
        let report = orch
            .create_book(&BookRequest::new("tiga pulau", BookType::Fiction, 3))
            .await?;

        assert_eq!(report.summary.completed_chapters(), 0);
        assert_eq!(report.summary.failed_chapters.len(), 3);
        assert!(Path::new(&report.full_book_path).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_planner_transport_error_ends_run() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut orch = orchestrator(dir.path(), ScriptedLlm::failing("connection refused"));
        let result = orch
            .create_book(&BookRequest::new("apa saja", BookType::NonFiction, 2))
            .await;
        assert!(result.is_err());
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_outline_only_then_single_chapter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut orch = orchestrator(dir.path(), pipeline("Overall Score: 9/10", None));
        let request = BookRequest::new("tiga pulau", BookType::Fiction, 3);

        let report = orch.create_outline_only(&request).await?;
        assert_eq!(report.outline.chapters.len(), 3);
        assert!(Path::new(&report.outline_path).exists());

        let json_path = Path::new(&report.book_dir).join("outline.json");
        let outline = orch.files().load_outline(&json_path.to_string_lossy()).await?;
        assert_eq!(outline, report.outline);

        let out = dir.path().join("bab3.md").to_string_lossy().to_string();
        let chapter = orch
            .write_single_chapter(&outline, 3, &request.writing_options(), true, Some(out.as_str()))
            .await?;
        assert_eq!(chapter.review_score(), Some(9.0));
        assert_eq!(fs::read_to_string(&out)?, "Isi bab nomor 3 di sini.");

        assert!(orch
            .write_single_chapter(&outline, 7, &request.writing_options(), false, None)
            .await
            .is_err());
        Ok(())
    }

    /// Lets a test keep a handle on the mock after handing it over.
    #[derive(Debug)]
    struct SharedLlm(Arc<ScriptedLlm>);

    #[async_trait::async_trait]
    impl LlmClient for SharedLlm {
        async fn chat(&self, request: &ChatRequest) -> Result<String> {
            self.0.chat(request).await
        }
    }
}
