use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::state::{BookType, Language};
use crate::services::models::AgentRole;
use crate::services::orchestrator::BookRequest;
use crate::services::reviewer::CheckType;
use crate::services::writer::WritingOptions;

/// Outline, write, review and assemble whole books with local or hosted LLMs.
#[derive(Parser, Debug)]
#[command(name = "writebook", version, about, long_about = None)]
pub struct Cli {
    /// Config file to load (created by add-model/select-model if missing)
    #[arg(long, global = true, default_value = "config.yml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a complete book
    Create {
        #[command(flatten)]
        book: BookArgs,

        #[command(flatten)]
        writing: WritingArgs,

        /// Rewrite chapters that score below 7.0
        #[arg(long)]
        auto_revise: bool,
    },

    /// Generate only the outline
    Outline {
        #[command(flatten)]
        book: BookArgs,
    },

    /// Write one chapter from a saved outline.json
    Chapter {
        /// Path to outline.json
        outline: PathBuf,

        /// Chapter number to write
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        number: u32,

        /// Write the bare chapter text here instead of the book directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Writing language (defaults to the configured one)
        #[arg(long, value_enum)]
        language: Option<Language>,

        #[command(flatten)]
        writing: WritingArgs,
    },

    /// Run a quick grammar, consistency or flow check on a text file
    Check {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value_t = CheckType::Grammar)]
        kind: CheckType,
    },

    /// Expand one section of a text file
    Expand {
        file: PathBuf,

        /// Section to expand
        #[arg(short, long)]
        section: String,

        /// Extra guidance for the expansion
        #[arg(short, long, default_value = "")]
        context: String,
    },

    /// List recommended models and whether they are installed
    Models {
        /// Only show models for this role
        #[arg(short, long, value_enum)]
        role: Option<AgentRole>,
    },

    /// Register a custom model for a role
    AddModel {
        name: String,

        #[arg(short, long, value_enum)]
        role: AgentRole,

        #[arg(long, default_value = "Unknown")]
        size: String,

        #[arg(long, default_value = "Unknown")]
        speed: String,

        #[arg(long, default_value = "Unknown")]
        quality: String,
    },

    /// Choose the model used for a role
    SelectModel {
        #[arg(value_enum)]
        role: AgentRole,

        /// Model name; omit to pick from the registry
        name: Option<String>,
    },

    /// Guided book creation
    Interactive,

    /// Show usage notes
    Info,
}

#[derive(Args, Debug, Clone)]
pub struct BookArgs {
    /// Book topic or title
    pub topic: String,

    #[arg(short = 't', long = "type", value_enum, default_value_t = BookType::Fiction)]
    pub book_type: BookType,

    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub chapters: u32,

    #[arg(short, long, default_value = "general")]
    pub audience: String,

    /// Extra information for the planner
    #[arg(short, long, default_value = "")]
    pub info: String,

    /// Writing language (defaults to the configured one)
    #[arg(long, value_enum)]
    pub language: Option<Language>,
}

#[derive(Args, Debug, Clone)]
pub struct WritingArgs {
    #[arg(short = 'w', long, default_value_t = 1500)]
    pub min_words: u32,

    #[arg(long, default_value = "engaging")]
    pub style: String,

    /// Review every chapter (on unless --no-review)
    #[arg(long, overrides_with = "no_review")]
    pub review: bool,

    #[arg(long, overrides_with = "review")]
    pub no_review: bool,

    /// Print chapter text as it is generated
    #[arg(long)]
    pub stream: bool,
}

impl WritingArgs {
    pub fn review_enabled(&self) -> bool {
        !self.no_review
    }

    /// Copies the writing flags onto a book request.
    pub fn apply(&self, request: &mut BookRequest) {
        request.min_words = self.min_words;
        request.style = self.style.clone();
        request.enable_review = self.review_enabled();
        request.streaming = self.stream;
    }

    pub fn options(&self, language: Language) -> WritingOptions {
        WritingOptions {
            style: self.style.clone(),
            min_words: self.min_words,
            language,
            streaming: self.stream,
        }
    }
}

impl BookArgs {
    /// Builds the orchestrator request, falling back to `default_language`.
    pub fn request(&self, default_language: Language) -> BookRequest {
        let mut request = BookRequest::new(&self.topic, self.book_type, self.chapters);
        request.target_audience = self.audience.clone();
        request.additional_info = self.info.clone();
        request.language = self.language.unwrap_or(default_language);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("writebook").chain(args.iter().copied()))
    }

    #[test]
    fn test_create_defaults() {
        let cli = parse(&["create", "Petualangan di Laut"]).unwrap();
        let Commands::Create {
            book,
            writing,
            auto_revise,
        } = cli.command
        else {
            panic!("expected create");
        };

        assert_eq!(book.topic, "Petualangan di Laut");
        assert_eq!(book.book_type, BookType::Fiction);
        assert_eq!(book.chapters, 10);
        assert_eq!(book.audience, "general");
        assert_eq!(writing.min_words, 1500);
        assert!(writing.review_enabled());
        assert!(!writing.stream);
        assert!(!auto_revise);
        assert_eq!(cli.config, PathBuf::from("config.yml"));

        let request = book.request(Language::English);
        assert_eq!(request.language, Language::English);
        assert_eq!(request.num_chapters, 10);
    }

    #[test]
    fn test_create_flags() {
        let cli = parse(&[
            "create",
            "Belajar Python",
            "-t",
            "non_fiction",
            "-c",
            "6",
            "-w",
            "800",
            "--no-review",
            "--stream",
            "--language",
            "english",
        ])
        .unwrap();
        let Commands::Create { book, writing, .. } = cli.command else {
            panic!("expected create");
        };

        assert_eq!(book.book_type, BookType::NonFiction);
        assert_eq!(book.chapters, 6);
        assert_eq!(book.language, Some(Language::English));

        let mut request = book.request(Language::Indonesian);
        writing.apply(&mut request);
        assert!(!request.enable_review);
        assert!(request.streaming);
        assert_eq!(request.min_words, 800);
        assert_eq!(request.language, Language::English);
    }

    #[test]
    fn test_last_review_flag_wins() {
        let cli = parse(&["create", "x", "--no-review", "--review"]).unwrap();
        let Commands::Create { writing, .. } = cli.command else {
            panic!("expected create");
        };
        assert!(writing.review_enabled());
    }

    #[test]
    fn test_zero_chapters_is_a_usage_error() {
        assert!(parse(&["create", "x", "-c", "0"]).is_err());
        assert!(parse(&["chapter", "outline.json", "0"]).is_err());
    }

    #[test]
    fn test_chapter_and_model_commands() {
        let cli = parse(&["chapter", "out/outline.json", "3", "-o", "ch3.md"]).unwrap();
        let Commands::Chapter {
            outline,
            number,
            output,
            ..
        } = cli.command
        else {
            panic!("expected chapter");
        };
        assert_eq!(outline, PathBuf::from("out/outline.json"));
        assert_eq!(number, 3);
        assert_eq!(output, Some(PathBuf::from("ch3.md")));

        let cli = parse(&["add-model", "mistral:7b", "--role", "writer", "--size", "4.1GB"]).unwrap();
        let Commands::AddModel {
            name, role, size, speed, ..
        } = cli.command
        else {
            panic!("expected add-model");
        };
        assert_eq!(name, "mistral:7b");
        assert_eq!(role, AgentRole::Writer);
        assert_eq!(size, "4.1GB");
        assert_eq!(speed, "Unknown");

        let cli = parse(&["select-model", "reviewer"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::SelectModel {
                role: AgentRole::Reviewer,
                name: None
            }
        ));
    }

    #[test]
    fn test_check_kind() {
        let cli = parse(&["check", "draft.md", "--kind", "flow"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Check {
                kind: CheckType::Flow,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_command_fails() {
        assert!(parse(&["publish"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
