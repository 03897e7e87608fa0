use anyhow::{anyhow, Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::core::state::{
    BookDetails, BookType, Character, ChapterDetails, ChapterSpec, Language, Outline,
};
use crate::services::llm::{system_prompt, ChatRequest, LlmClient};

const PLANNER_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct OutlineRequest {
    pub topic: String,
    pub book_type: BookType,
    pub num_chapters: u32,
    pub target_audience: String,
    pub additional_info: String,
    pub language: Language,
}

/// Builds book outlines. Parse problems never fail a run: they fall back to
/// a placeholder outline with the requested number of chapters.
pub struct Planner<'a> {
    llm: &'a dyn LlmClient,
    model: String,
}

impl<'a> Planner<'a> {
    pub fn new(llm: &'a dyn LlmClient, model: &str) -> Self {
        Self {
            llm,
            model: model.to_string(),
        }
    }

    pub async fn generate(&self, request: &OutlineRequest) -> Result<Outline> {
        if request.num_chapters == 0 {
            return Err(anyhow!("An outline needs at least one chapter"));
        }
        log::info!(
            "Planning {} outline for '{}' ({} chapters)",
            request.book_type,
            request.topic,
            request.num_chapters
        );

        let chat = ChatRequest::new(
            &self.model,
            &planner_system_prompt(request.book_type, request.language),
            &outline_prompt(request),
            PLANNER_TEMPERATURE,
        );
        let content = self
            .llm
            .chat(&chat)
            .await
            .context("Outline generation failed")?;

        match parse_outline(&content, request) {
            Ok(outline) => Ok(outline),
            Err(e) => {
                log::warn!("Could not parse outline JSON ({:#}), using default structure", e);
                Ok(fallback_outline(request))
            }
        }
    }
}

/// Slice between the first `{` and the last `}`, if both exist in order.
pub fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

// Models drift from the requested shape: strings arrive as lists, lists as
// single strings, anything may be null. Only invalid JSON is rejected.
#[derive(Deserialize, Default)]
#[serde(default)]
struct RawOutline {
    #[serde(deserialize_with = "loose_text")]
    title: String,
    #[serde(deserialize_with = "loose_text")]
    genre: String,
    #[serde(deserialize_with = "loose_text")]
    target_audience: String,
    #[serde(deserialize_with = "loose_text")]
    synopsis: String,
    #[serde(deserialize_with = "loose_characters")]
    main_characters: Vec<Character>,
    #[serde(deserialize_with = "loose_text")]
    setting: String,
    #[serde(deserialize_with = "loose_list")]
    themes: Vec<String>,
    #[serde(deserialize_with = "loose_text")]
    category: String,
    #[serde(deserialize_with = "loose_list")]
    key_takeaways: Vec<String>,
    #[serde(deserialize_with = "loose_chapters")]
    chapters: Vec<RawChapter>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawChapter {
    #[serde(deserialize_with = "loose_text")]
    title: String,
    #[serde(deserialize_with = "loose_text")]
    description: String,
    #[serde(deserialize_with = "loose_list")]
    key_events: Vec<String>,
    #[serde(deserialize_with = "loose_text")]
    character_development: String,
    #[serde(deserialize_with = "loose_list")]
    key_points: Vec<String>,
    #[serde(deserialize_with = "loose_text")]
    learning_objectives: String,
}

/// Flattens any JSON value to text. Lists are joined with `", "`, null is
/// empty and objects keep their JSON form.
fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn value_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect(),
        other => {
            let text = value_text(other);
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        }
    }
}

fn loose_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(value_text(Value::deserialize(deserializer)?))
}

fn loose_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    Ok(value_list(Value::deserialize(deserializer)?))
}

fn loose_characters<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<Character>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(mut fields) => {
                let mut take = |key: &str| fields.remove(key).map(value_text).unwrap_or_default();
                Some(Character {
                    name: take("name"),
                    role: take("role"),
                    description: take("description"),
                })
            }
            other => {
                let name = value_text(other);
                (!name.is_empty()).then(|| Character {
                    name,
                    ..Character::default()
                })
            }
        })
        .collect())
}

fn loose_chapters<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<RawChapter>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(_) => serde_json::from_value(item).map_err(D::Error::custom),
            other => Ok(RawChapter {
                title: value_text(other),
                ..RawChapter::default()
            }),
        })
        .collect()
}

/// Parses the model reply into an outline whose variant follows the
/// requested book type and whose chapters are numbered `1..=num_chapters`.
pub fn parse_outline(content: &str, request: &OutlineRequest) -> Result<Outline> {
    let json = extract_json(content).ok_or_else(|| anyhow!("no JSON object in response"))?;
    let raw: RawOutline = serde_json::from_str(json).context("malformed outline JSON")?;

    let details = match request.book_type {
        BookType::Fiction => BookDetails::Fiction {
            main_characters: raw.main_characters,
            setting: raw.setting,
            themes: raw.themes,
        },
        BookType::NonFiction => BookDetails::NonFiction {
            category: raw.category,
            key_takeaways: raw.key_takeaways,
        },
    };

    let mut chapters: Vec<ChapterSpec> = raw
        .chapters
        .into_iter()
        .take(request.num_chapters as usize)
        .enumerate()
        .map(|(i, ch)| {
            let number = i as u32 + 1;
            let title = if ch.title.trim().is_empty() {
                placeholder_title(request, number)
            } else {
                ch.title
            };
            let details = match request.book_type {
                BookType::Fiction => ChapterDetails::Fiction {
                    key_events: ch.key_events,
                    character_development: ch.character_development,
                },
                BookType::NonFiction => ChapterDetails::NonFiction {
                    key_points: ch.key_points,
                    learning_objectives: ch.learning_objectives,
                },
            };
            ChapterSpec {
                number,
                title,
                description: ch.description,
                details,
            }
        })
        .collect();

    if chapters.len() < request.num_chapters as usize {
        log::warn!(
            "Outline has {} of {} chapters, padding with placeholders",
            chapters.len(),
            request.num_chapters
        );
        for number in chapters.len() as u32 + 1..=request.num_chapters {
            chapters.push(placeholder_chapter(request, number));
        }
    }

    let title = if raw.title.trim().is_empty() {
        request.topic.clone()
    } else {
        raw.title
    };
    let target_audience = if raw.target_audience.trim().is_empty() {
        request.target_audience.clone()
    } else {
        raw.target_audience
    };

    Ok(Outline {
        title,
        genre: raw.genre,
        target_audience,
        synopsis: raw.synopsis,
        details,
        chapters,
    })
}

pub fn fallback_outline(request: &OutlineRequest) -> Outline {
    let topic = &request.topic;
    let chapters = (1..=request.num_chapters)
        .map(|number| placeholder_chapter(request, number))
        .collect();

    let (genre, synopsis, details) = match request.book_type {
        BookType::Fiction => (
            "fiction",
            match request.language {
                Language::Indonesian => format!("Sebuah cerita tentang {}", topic),
                Language::English => format!("A story about {}", topic),
            },
            BookDetails::Fiction {
                main_characters: Vec::new(),
                setting: String::new(),
                themes: Vec::new(),
            },
        ),
        BookType::NonFiction => (
            "non-fiction",
            match request.language {
                Language::Indonesian => format!("Buku ini membahas tentang {}", topic),
                Language::English => format!("This book covers {}", topic),
            },
            BookDetails::NonFiction {
                category: "general".to_string(),
                key_takeaways: Vec::new(),
            },
        ),
    };

    Outline {
        title: topic.clone(),
        genre: genre.to_string(),
        target_audience: request.target_audience.clone(),
        synopsis,
        details,
        chapters,
    }
}

fn placeholder_title(request: &OutlineRequest, number: u32) -> String {
    match request.book_type {
        BookType::Fiction => format!("Chapter {}", number),
        BookType::NonFiction => format!("Chapter {}: {}", number, request.topic),
    }
}

fn placeholder_chapter(request: &OutlineRequest, number: u32) -> ChapterSpec {
    let topic = &request.topic;
    let (description, details) = match (request.book_type, request.language) {
        (BookType::Fiction, lang) => (
            match lang {
                Language::Indonesian => format!("Chapter {} tentang {}", number, topic),
                Language::English => format!("Chapter {} about {}", number, topic),
            },
            ChapterDetails::Fiction {
                key_events: Vec::new(),
                character_development: String::new(),
            },
        ),
        (BookType::NonFiction, lang) => (
            match lang {
                Language::Indonesian => {
                    format!("Pembahasan tentang aspek {} dari {}", number, topic)
                }
                Language::English => format!("Discussion of aspect {} of {}", number, topic),
            },
            ChapterDetails::NonFiction {
                key_points: Vec::new(),
                learning_objectives: String::new(),
            },
        ),
    };

    ChapterSpec {
        number,
        title: placeholder_title(request, number),
        description,
        details,
    }
}

fn planner_system_prompt(book_type: BookType, language: Language) -> String {
    let instructions = match (book_type, language) {
        (BookType::Fiction, Language::Indonesian) => {
            "Kamu adalah seorang penulis fiksi berpengalaman. \
            Tugasmu adalah membuat outline cerita yang menarik dengan \
            plot yang solid, karakter yang kuat, dan pacing yang baik."
        }
        (BookType::Fiction, Language::English) => {
            "You are an experienced fiction author. \
            Your task is to create a compelling story outline with \
            a solid plot, strong characters and good pacing."
        }
        (BookType::NonFiction, Language::Indonesian) => {
            "Kamu adalah seorang penulis non-fiksi berpengalaman. \
            Tugasmu adalah membuat outline buku yang terstruktur dengan baik, \
            informatif, dan mudah dipahami."
        }
        (BookType::NonFiction, Language::English) => {
            "You are an experienced non-fiction author. \
            Your task is to create a well-structured, informative \
            and easy to follow book outline."
        }
    };
    system_prompt(language, "Book Planner", instructions)
}

fn outline_prompt(request: &OutlineRequest) -> String {
    let OutlineRequest {
        topic,
        num_chapters,
        target_audience,
        additional_info,
        ..
    } = request;

    match (request.book_type, request.language) {
        (BookType::Fiction, Language::Indonesian) => format!(
            "Buat outline lengkap untuk sebuah novel fiksi dengan detail berikut:\n\n\
            Topik/Tema: {topic}\n\
            Jumlah Chapter: {num_chapters}\n\
            Target Pembaca: {target_audience}\n\
            Informasi Tambahan: {additional_info}\n\n\
            Output harus dalam format JSON dengan struktur:\n\
            {{\n\
            \x20   \"title\": \"Judul Buku yang Menarik\",\n\
            \x20   \"genre\": \"Genre cerita\",\n\
            \x20   \"target_audience\": \"{target_audience}\",\n\
            \x20   \"synopsis\": \"Synopsis cerita (2-3 paragraf)\",\n\
            \x20   \"main_characters\": [\n\
            \x20       {{\"name\": \"Nama\", \"role\": \"Role\", \"description\": \"Deskripsi karakter\"}}\n\
            \x20   ],\n\
            \x20   \"setting\": \"Setting utama cerita\",\n\
            \x20   \"themes\": [\"tema1\", \"tema2\"],\n\
            \x20   \"chapters\": [\n\
            \x20       {{\n\
            \x20           \"number\": 1,\n\
            \x20           \"title\": \"Judul Chapter\",\n\
            \x20           \"description\": \"Apa yang terjadi di chapter ini\",\n\
            \x20           \"key_events\": [\"event1\", \"event2\"],\n\
            \x20           \"character_development\": \"Perkembangan karakter\"\n\
            \x20       }}\n\
            \x20   ]\n\
            }}\n\n\
            Pastikan outline memiliki:\n\
            1. Beginning yang engaging\n\
            2. Middle dengan conflict dan tension\n\
            3. Climax yang powerful\n\
            4. Resolution yang satisfying\n\
            5. Character arc yang jelas\n"
        ),
        (BookType::Fiction, Language::English) => format!(
            "Create a complete outline for a novel with the following details:\n\n\
            Topic/Theme: {topic}\n\
            Number of Chapters: {num_chapters}\n\
            Target Audience: {target_audience}\n\
            Additional Information: {additional_info}\n\n\
            The output must be JSON with this structure:\n\
            {{\n\
            \x20   \"title\": \"A Compelling Book Title\",\n\
            \x20   \"genre\": \"Story genre\",\n\
            \x20   \"target_audience\": \"{target_audience}\",\n\
            \x20   \"synopsis\": \"Story synopsis (2-3 paragraphs)\",\n\
            \x20   \"main_characters\": [\n\
            \x20       {{\"name\": \"Name\", \"role\": \"Role\", \"description\": \"Character description\"}}\n\
            \x20   ],\n\
            \x20   \"setting\": \"Main setting of the story\",\n\
            \x20   \"themes\": [\"theme1\", \"theme2\"],\n\
            \x20   \"chapters\": [\n\
            \x20       {{\n\
            \x20           \"number\": 1,\n\
            \x20           \"title\": \"Chapter Title\",\n\
            \x20           \"description\": \"What happens in this chapter\",\n\
            \x20           \"key_events\": [\"event1\", \"event2\"],\n\
            \x20           \"character_development\": \"Character development\"\n\
            \x20       }}\n\
            \x20   ]\n\
            }}\n\n\
            Make sure the outline has:\n\
            1. An engaging beginning\n\
            2. A middle with conflict and tension\n\
            3. A powerful climax\n\
            4. A satisfying resolution\n\
            5. Clear character arcs\n"
        ),
        (BookType::NonFiction, Language::Indonesian) => format!(
            "Buat outline lengkap untuk sebuah buku non-fiksi dengan detail berikut:\n\n\
            Topik: {topic}\n\
            Jumlah Chapter: {num_chapters}\n\
            Target Pembaca: {target_audience}\n\
            Informasi Tambahan: {additional_info}\n\n\
            Output harus dalam format JSON dengan struktur:\n\
            {{\n\
            \x20   \"title\": \"Judul Buku yang Informatif\",\n\
            \x20   \"genre\": \"non-fiction\",\n\
            \x20   \"category\": \"Kategori buku (self-help, business, education, dll)\",\n\
            \x20   \"target_audience\": \"{target_audience}\",\n\
            \x20   \"synopsis\": \"Deskripsi buku dan apa yang akan dipelajari pembaca\",\n\
            \x20   \"key_takeaways\": [\"Takeaway 1\", \"Takeaway 2\", \"Takeaway 3\"],\n\
            \x20   \"chapters\": [\n\
            \x20       {{\n\
            \x20           \"number\": 1,\n\
            \x20           \"title\": \"Judul Chapter\",\n\
            \x20           \"description\": \"Apa yang dibahas di chapter ini\",\n\
            \x20           \"key_points\": [\"poin1\", \"poin2\", \"poin3\"],\n\
            \x20           \"learning_objectives\": \"Apa yang akan dipelajari\"\n\
            \x20       }}\n\
            \x20   ]\n\
            }}\n\n\
            Pastikan outline:\n\
            1. Terstruktur secara logis dari basic ke advanced\n\
            2. Setiap chapter membangun pengetahuan dari chapter sebelumnya\n\
            3. Ada contoh praktis atau case study\n\
            4. Ada actionable insights\n\
            5. Conclusion yang merangkum semua\n"
        ),
        (BookType::NonFiction, Language::English) => format!(
            "Create a complete outline for a non-fiction book with the following details:\n\n\
            Topic: {topic}\n\
            Number of Chapters: {num_chapters}\n\
            Target Audience: {target_audience}\n\
            Additional Information: {additional_info}\n\n\
            The output must be JSON with this structure:\n\
            {{\n\
            \x20   \"title\": \"An Informative Book Title\",\n\
            \x20   \"genre\": \"non-fiction\",\n\
            \x20   \"category\": \"Book category (self-help, business, education, etc.)\",\n\
            \x20   \"target_audience\": \"{target_audience}\",\n\
            \x20   \"synopsis\": \"What the book covers and what readers will learn\",\n\
            \x20   \"key_takeaways\": [\"Takeaway 1\", \"Takeaway 2\", \"Takeaway 3\"],\n\
            \x20   \"chapters\": [\n\
            \x20       {{\n\
            \x20           \"number\": 1,\n\
            \x20           \"title\": \"Chapter Title\",\n\
            \x20           \"description\": \"What this chapter covers\",\n\
            \x20           \"key_points\": [\"point1\", \"point2\", \"point3\"],\n\
            \x20           \"learning_objectives\": \"What the reader will learn\"\n\
            \x20       }}\n\
            \x20   ]\n\
            }}\n\n\
            Make sure the outline:\n\
            1. Progresses logically from basic to advanced\n\
            2. Builds each chapter on the previous ones\n\
            3. Includes practical examples or case studies\n\
            4. Offers actionable insights\n\
            5. Ends with a conclusion that ties everything together\n"
        ),
    }
}
