use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

use writebook::cli::{Cli, Commands};
use writebook::core::config::Config;
use writebook::core::io::NativeStorage;
use writebook::services::llm::{create_llm, LlmClient};
use writebook::services::models::{AgentRole, ModelDescriptor, ModelRegistry};
use writebook::services::orchestrator::BookOrchestrator;
use writebook::services::wizard;

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Info = cli.command {
        print_info();
        return Ok(());
    }

    let mut config = Config::load_from(&cli.config)?;
    config.ensure_directories()?;
    let registry = ModelRegistry::from_config(&config);
    let llm = create_llm(&config)?;

    match cli.command {
        Commands::Create {
            book,
            writing,
            auto_revise,
        } => {
            let mut request = book.request(config.language);
            writing.apply(&mut request);
            request.auto_revise = auto_revise;

            let mut orchestrator = orchestrator(config, llm);
            orchestrator.create_book(&request).await?;
        }
        Commands::Outline { book } => {
            let request = book.request(config.language);
            let mut orchestrator = orchestrator(config, llm);
            let report = orchestrator.create_outline_only(&request).await?;

            println!("\nOutline: {}", report.outline.title);
            println!("{}", report.outline.synopsis);
            for chapter in &report.outline.chapters {
                println!("  {}. {}", chapter.number, chapter.title);
            }
            println!("\nSaved to {}", report.outline_path);
        }
        Commands::Chapter {
            outline,
            number,
            output,
            language,
            writing,
        } => {
            let outline_path = outline.to_string_lossy().into_owned();
            let options = writing.options(language.unwrap_or(config.language));
            let output = output.map(|p| p.to_string_lossy().into_owned());

            let mut orchestrator = orchestrator(config, llm);
            let outline = orchestrator.files().load_outline(&outline_path).await?;
            let result = orchestrator
                .write_single_chapter(
                    &outline,
                    number,
                    &options,
                    writing.review_enabled(),
                    output.as_deref(),
                )
                .await?;

            if output.is_none() {
                let book_dir = Path::new(&outline_path)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let path = orchestrator.files().save_chapter(&book_dir, &result).await?;
                println!("✓ Chapter saved: {}", path);
            }
            println!("Words: {}", result.word_count);
            if let Some(score) = result.review_score() {
                println!("Review score: {:.1}/10", score);
            }
        }
        Commands::Check { file, kind } => {
            let orchestrator = orchestrator(config, llm);
            let content = read_text(&orchestrator, &file).await?;
            let check = orchestrator.quick_check(&content, kind).await?;

            println!("{}", check.result);
            println!(
                "\n{} check: {}",
                check.check_type,
                if check.passed { "PASSED" } else { "NEEDS ATTENTION" }
            );
        }
        Commands::Expand {
            file,
            section,
            context,
        } => {
            let orchestrator = orchestrator(config, llm);
            let content = read_text(&orchestrator, &file).await?;
            let expanded = orchestrator
                .expand_section(&content, &section, &context)
                .await?;
            println!("{}", expanded);
        }
        Commands::Models { role } => {
            let installed = installed_models(llm.as_ref()).await;
            let roles: Vec<AgentRole> = match role {
                Some(role) => vec![role],
                None => AgentRole::ALL.to_vec(),
            };

            for role in roles {
                println!("\n{} (current: {})", role, config.models.for_role(role));
                for model in registry.models_for(role) {
                    let status = match &installed {
                        Some(list) if list.contains(&model.name) => "✓ Ready",
                        Some(_) => "✗ Not installed",
                        None => "? Unknown",
                    };
                    println!(
                        "  {:<28} {:<8} {:<10} {:<12} {}",
                        model.name, model.size, model.speed, model.quality, status
                    );
                }
            }
        }
        Commands::AddModel {
            name,
            role,
            size,
            speed,
            quality,
        } => {
            let descriptor = ModelDescriptor {
                name,
                size,
                speed,
                quality,
            };
            let mut registry = registry;
            registry.register(role, descriptor.clone())?;

            config
                .custom_models
                .entry(role)
                .or_default()
                .push(descriptor.clone());
            config.save()?;
            println!("✓ Added {} for {}", descriptor.name, role);
        }
        Commands::SelectModel { role, name } => {
            let installed = installed_models(llm.as_ref()).await.unwrap_or_default();
            let name = match name {
                Some(name) => {
                    if !registry.roles_for(&name).contains(&role) {
                        log::warn!("{} is not a registered {} model", name, role);
                    }
                    if !installed.is_empty() && !installed.contains(&name) {
                        println!("Model {} is not installed (ollama pull {})", name, name);
                        if let Some(alt) = registry.suggest_alternative(role, &name, &installed) {
                            println!("Installed alternative: {}", alt);
                        }
                    }
                    Some(name)
                }
                None => wizard::select_model(&registry, role, &installed)?,
            };

            match name {
                Some(name) => {
                    config.models.set_role(role, name.clone());
                    config.save()?;
                    println!("✓ {} model set to {}", role, name);
                }
                None => println!("Keeping {} model {}", role, config.models.for_role(role)),
            }
        }
        Commands::Interactive => {
            let Some(outcome) = wizard::run_wizard(&config.models, &registry, llm.as_ref()).await?
            else {
                return Ok(());
            };
            log::info!("Wizard finished with genre {}", outcome.genre);

            config.models = outcome.models;
            let mut orchestrator = orchestrator(config, llm);
            orchestrator.create_book(&outcome.request).await?;
        }
        Commands::Info => print_info(),
    }

    Ok(())
}

fn orchestrator(config: Config, llm: Box<dyn LlmClient>) -> BookOrchestrator {
    BookOrchestrator::new(config, llm, Arc::new(NativeStorage::new()))
}

async fn read_text(orchestrator: &BookOrchestrator, path: &Path) -> Result<String> {
    let path = path.to_string_lossy();
    orchestrator
        .files()
        .storage()
        .read_string(&path)
        .await
        .with_context(|| format!("Cannot open {}", path))
}

/// `None` when the provider cannot be reached.
async fn installed_models(llm: &dyn LlmClient) -> Option<Vec<String>> {
    match llm.list_models().await {
        Ok(models) => Some(models),
        Err(e) => {
            log::warn!("Could not list installed models: {:#}", e);
            None
        }
    }
}

fn print_info() {
    println!("writebook {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Writes a book in three steps:");
    println!("  1. planner model drafts an outline (outline.json + 00_outline.md)");
    println!("  2. writer model writes each chapter, reviewer model scores it");
    println!("  3. chapters are stitched into one markdown file with metadata.md");
    println!();
    println!("Chapters scoring below 7.0 are rewritten when --auto-revise is set.");
    println!("Models and the LLM provider are read from config.yml.");
    println!();
    println!("Examples:");
    println!("  writebook create \"Petualangan di Laut\" -t fiction -c 12");
    println!("  writebook outline \"Belajar Rust\" -t non_fiction --language english");
    println!("  writebook chapter output/Belajar_Rust_20240101_120000/outline.json 3");
    println!("  writebook select-model writer qwen2.5:7b");
}
