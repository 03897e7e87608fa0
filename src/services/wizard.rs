use anyhow::Result;
use inquire::{Confirm, CustomType, Select, Text};

use crate::core::config::{
    default_planner_model, default_reviewer_model, default_writer_model, ModelsConfig,
};
use crate::core::state::{BookType, Language};
use crate::services::llm::LlmClient;
use crate::services::models::{AgentRole, ModelRegistry};
use crate::services::orchestrator::BookRequest;

pub struct GenreTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub examples: &'static str,
    pub recommended_chapters: u32,
}

const FICTION_GENRES: &[GenreTemplate] = &[
    GenreTemplate {
        key: "fantasy",
        name: "Fantasy",
        description: "Magic, invented worlds and mythical creatures",
        examples: "Harry Potter, Lord of the Rings",
        recommended_chapters: 15,
    },
    GenreTemplate {
        key: "sci-fi",
        name: "Science Fiction",
        description: "Futuristic stories with advanced technology and space exploration",
        examples: "Dune, Foundation",
        recommended_chapters: 12,
    },
    GenreTemplate {
        key: "mystery",
        name: "Mystery/Detective",
        description: "Investigations and plot twists",
        examples: "Sherlock Holmes, Agatha Christie novels",
        recommended_chapters: 10,
    },
    GenreTemplate {
        key: "romance",
        name: "Romance",
        description: "Love stories with strong character development",
        examples: "Pride and Prejudice, The Notebook",
        recommended_chapters: 12,
    },
    GenreTemplate {
        key: "thriller",
        name: "Thriller/Suspense",
        description: "Constant suspense and tension",
        examples: "Gone Girl, The Girl with the Dragon Tattoo",
        recommended_chapters: 14,
    },
    GenreTemplate {
        key: "adventure",
        name: "Adventure",
        description: "Action and exploration",
        examples: "Indiana Jones, Treasure Island",
        recommended_chapters: 13,
    },
];

const NON_FICTION_GENRES: &[GenreTemplate] = &[
    GenreTemplate {
        key: "self-help",
        name: "Self-Help/Personal Development",
        description: "Personal growth and motivation",
        examples: "Atomic Habits, The 7 Habits",
        recommended_chapters: 10,
    },
    GenreTemplate {
        key: "business",
        name: "Business/Entrepreneurship",
        description: "Strategy, management and startups",
        examples: "Good to Great, The Lean Startup",
        recommended_chapters: 12,
    },
    GenreTemplate {
        key: "technical",
        name: "Technical/Programming",
        description: "Technical tutorials, coding and technology",
        examples: "Clean Code, Design Patterns",
        recommended_chapters: 15,
    },
    GenreTemplate {
        key: "education",
        name: "Educational/Tutorial",
        description: "Learning material and practical guides",
        examples: "Learning How to Learn",
        recommended_chapters: 12,
    },
    GenreTemplate {
        key: "health",
        name: "Health & Wellness",
        description: "Health, fitness, nutrition and mental health",
        examples: "Why We Sleep, The Body Keeps the Score",
        recommended_chapters: 10,
    },
];

pub fn genre_templates(book_type: BookType) -> &'static [GenreTemplate] {
    match book_type {
        BookType::Fiction => FICTION_GENRES,
        BookType::NonFiction => NON_FICTION_GENRES,
    }
}

const AUDIENCES: [(&str, &str); 5] = [
    ("General", "general"),
    ("Young Adult", "young_adult"),
    ("Children", "children"),
    ("Professional", "professional"),
    ("Academic", "academic"),
];

/// Everything the wizard collected, ready for the orchestrator.
#[derive(Debug, Clone)]
pub struct WizardOutcome {
    pub request: BookRequest,
    pub models: ModelsConfig,
    pub genre: String,
}

/// Folds the chosen genre into the free-text info the planner receives.
pub fn compose_additional_info(genre: &str, info: &str) -> String {
    let info = info.trim();
    if info.is_empty() {
        format!("Genre: {}", genre)
    } else {
        format!("Genre: {}. {}", genre, info)
    }
}

/// Walks the user through every book option. `None` means the user
/// declined at the final confirmation.
pub async fn run_wizard(
    defaults: &ModelsConfig,
    registry: &ModelRegistry,
    llm: &dyn LlmClient,
) -> Result<Option<WizardOutcome>> {
    println!("Book Writing Agent - Interactive Mode\n");

    // 1. book type
    let book_type = Select::new("Book type:", vec!["Fiction", "Non-Fiction"]).raw_prompt()?;
    let book_type = if book_type.index == 0 {
        BookType::Fiction
    } else {
        BookType::NonFiction
    };

    // 2. genre
    let templates = genre_templates(book_type);
    let genre_options: Vec<String> = templates
        .iter()
        .map(|g| format!("{} - {} (e.g. {})", g.name, g.description, g.examples))
        .collect();
    let genre = &templates[Select::new("Genre:", genre_options).raw_prompt()?.index];
    println!("✓ Selected: {}", genre.name);

    // 3. details
    let topic = Text::new("Book title or topic:")
        .with_default("Petualangan Seru")
        .prompt()?;
    let info = Text::new("Additional information (optional):")
        .with_help_message("Setting, characters, tone, ...")
        .prompt()?;

    // 4. chapters
    let num_chapters = CustomType::<u32>::new("Number of chapters:")
        .with_default(genre.recommended_chapters)
        .with_help_message(&format!(
            "Recommended for this genre: {}",
            genre.recommended_chapters
        ))
        .with_validator(|n: &u32| {
            Ok(if *n >= 1 {
                inquire::validator::Validation::Valid
            } else {
                inquire::validator::Validation::Invalid("At least one chapter".into())
            })
        })
        .prompt()?;
    let min_words = CustomType::<u32>::new("Minimum words per chapter:")
        .with_default(1500)
        .prompt()?;

    // 5. audience
    let mut audience_options: Vec<&str> = AUDIENCES.iter().map(|(label, _)| *label).collect();
    audience_options.push("Custom");
    let audience = Select::new("Target audience:", audience_options).raw_prompt()?;
    let target_audience = match AUDIENCES.get(audience.index) {
        Some((_, key)) => key.to_string(),
        None => Text::new("Target audience:").prompt()?,
    };

    // 6. models
    let models = choose_models(defaults, registry, llm).await?;

    // 7. options
    let language = Select::new("Writing language:", vec!["Bahasa Indonesia", "English"]).raw_prompt()?;
    let language = if language.index == 0 {
        Language::Indonesian
    } else {
        Language::English
    };
    let enable_review = Confirm::new("Review every chapter?")
        .with_default(true)
        .prompt()?;
    let auto_revise = enable_review
        && Confirm::new("Auto-revise chapters with a low score?")
            .with_default(false)
            .prompt()?;
    let streaming = Confirm::new("Stream output while writing?")
        .with_default(true)
        .prompt()?;

    let request = BookRequest {
        topic,
        book_type,
        num_chapters,
        target_audience,
        additional_info: compose_additional_info(genre.name, &info),
        language,
        style: "engaging".to_string(),
        min_words,
        enable_review,
        auto_revise,
        streaming,
    };

    // 8. summary
    println!("\nConfiguration summary:");
    println!("  Book type:         {}", request.book_type);
    println!("  Genre:             {}", genre.name);
    println!("  Title:             {}", request.topic);
    println!("  Chapters:          {}", request.num_chapters);
    println!("  Min words/chapter: {}", request.min_words);
    println!("  Target audience:   {}", request.target_audience);
    println!("  Language:          {}", request.language);
    println!("  Review enabled:    {}", yes_no(request.enable_review));
    println!("  Auto revise:       {}", yes_no(request.auto_revise));
    println!("  Streaming:         {}", yes_no(request.streaming));
    println!(
        "  Models:            planner={} writer={} reviewer={}",
        models.planner, models.writer, models.reviewer
    );

    if !Confirm::new("Start writing the book?")
        .with_default(true)
        .prompt()?
    {
        println!("Cancelled.");
        return Ok(None);
    }

    Ok(Some(WizardOutcome {
        request,
        models,
        genre: genre.key.to_string(),
    }))
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

async fn choose_models(
    defaults: &ModelsConfig,
    registry: &ModelRegistry,
    llm: &dyn LlmClient,
) -> Result<ModelsConfig> {
    let mode = Select::new(
        "Models:",
        vec![
            "Use configured models (recommended)",
            "Pick from recommendations",
            "Enter model names manually",
        ],
    )
    .raw_prompt()?;

    match mode.index {
        0 => Ok(defaults.clone()),
        1 => {
            let installed = match llm.list_models().await {
                Ok(models) => models,
                Err(e) => {
                    log::warn!("Could not list installed models: {:#}", e);
                    Vec::new()
                }
            };
            let mut models = defaults.clone();
            for role in AgentRole::ALL {
                if let Some(name) = select_model(registry, role, &installed)? {
                    models.set_role(role, name);
                }
            }
            Ok(models)
        }
        _ => Ok(ModelsConfig {
            planner: Text::new("Planner model:")
                .with_default(&default_planner_model())
                .prompt()?,
            writer: Text::new("Writer model:")
                .with_default(&default_writer_model())
                .prompt()?,
            reviewer: Text::new("Reviewer model:")
                .with_default(&default_reviewer_model())
                .prompt()?,
        }),
    }
}

/// Offers the registry entries for `role`. Picking a model that is not
/// installed needs an extra confirmation; `None` keeps the current one.
pub fn select_model(
    registry: &ModelRegistry,
    role: AgentRole,
    installed: &[String],
) -> Result<Option<String>> {
    let models = registry.models_for(role);
    let mut options: Vec<String> = models
        .iter()
        .map(|m| {
            let status = if installed.iter().any(|i| i == &m.name) {
                "✓ Ready"
            } else {
                "✗ Not installed"
            };
            format!("{} | {} | {} | {} | {}", m.name, m.size, m.speed, m.quality, status)
        })
        .collect();
    options.push("Skip".to_string());

    let choice = Select::new(&format!("Model for {}:", role), options).raw_prompt()?;
    let Some(selected) = models.get(choice.index) else {
        return Ok(None);
    };

    if !installed.iter().any(|i| i == &selected.name) {
        println!("Model {} is not installed (ollama pull {})", selected.name, selected.name);
        if !Confirm::new("Use it anyway?").with_default(false).prompt()? {
            return Ok(None);
        }
    }
    println!("✓ Selected: {}", selected.name);
    Ok(Some(selected.name.clone()))
}
