use anyhow::{Context, Result};

use crate::core::state::{BookDetails, ChapterDetails, ChapterResult, ChapterSpec, Language, Outline};
use crate::services::llm::{system_prompt, ChatRequest, LlmClient};
use crate::services::stream::{collect_stream, FragmentSink, NullSink};

const FICTION_TEMPERATURE: f32 = 0.85;
const NON_FICTION_TEMPERATURE: f32 = 0.8;
pub const REVISION_TEMPERATURE: f32 = 0.9;
const MAX_PROMPT_CHARACTERS: usize = 3;
const EXPAND_CONTEXT_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct WritingOptions {
    pub style: String,
    pub min_words: u32,
    pub language: Language,
    pub streaming: bool,
}

impl Default for WritingOptions {
    fn default() -> Self {
        Self {
            style: "engaging".to_string(),
            min_words: 1500,
            language: Language::default(),
            streaming: false,
        }
    }
}

pub struct Writer<'a> {
    llm: &'a dyn LlmClient,
    model: String,
    temperature_override: Option<f32>,
}

impl<'a> Writer<'a> {
    pub fn new(llm: &'a dyn LlmClient, model: &str) -> Self {
        Self {
            llm,
            model: model.to_string(),
            temperature_override: None,
        }
    }

    /// Replaces the per-genre temperature for every call this writer makes.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature_override = Some(temperature);
        self
    }

    fn temperature_for(&self, details: &BookDetails) -> f32 {
        self.temperature_override.unwrap_or(match details {
            BookDetails::Fiction { .. } => FICTION_TEMPERATURE,
            BookDetails::NonFiction { .. } => NON_FICTION_TEMPERATURE,
        })
    }

    pub async fn write(
        &self,
        spec: &ChapterSpec,
        outline: &Outline,
        options: &WritingOptions,
        sink: &mut dyn FragmentSink,
    ) -> Result<ChapterResult> {
        log::info!("Writing chapter {}: {}", spec.number, spec.title);

        let (system, user) = chapter_prompts(spec, outline, options);
        let request = ChatRequest::new(
            &self.model,
            &system,
            &user,
            self.temperature_for(&outline.details),
        );

        let content = self
            .complete(&request, options.streaming, sink)
            .await
            .with_context(|| format!("Failed to write chapter {}", spec.number))?;

        let result = ChapterResult::new(spec, content.trim().to_string());
        log::info!(
            "Chapter {} written ({} words)",
            result.chapter_number,
            result.word_count
        );
        Ok(result)
    }

    /// Streams when asked; any streaming failure gets exactly one
    /// non-streamed retry whose error is returned as is.
    async fn complete(
        &self,
        request: &ChatRequest,
        streaming: bool,
        sink: &mut dyn FragmentSink,
    ) -> Result<String> {
        if streaming {
            match self.stream_into(request, sink).await {
                Ok(text) => return Ok(text),
                Err(e) => log::warn!("Streaming failed ({:#}), retrying without streaming", e),
            }
        }
        self.llm.chat(request).await
    }

    async fn stream_into(&self, request: &ChatRequest, sink: &mut dyn FragmentSink) -> Result<String> {
        let stream = self.llm.chat_stream(request).await?;
        collect_stream(stream, sink).await
    }

    pub async fn expand_section(
        &self,
        original: &str,
        section: &str,
        context: &str,
        language: Language,
    ) -> Result<String> {
        let excerpt: String = original.chars().take(EXPAND_CONTEXT_CHARS).collect();
        let (instructions, user) = match language {
            Language::Indonesian => (
                "Tugasmu adalah memperluas dan memperkaya bagian tertentu dari teks \
                sambil menjaga konsistensi dengan keseluruhan konten.",
                format!(
                    "KONTEN ORIGINAL:\n{}...\n\n\
                    BAGIAN YANG PERLU DIPERLUAS:\n{}\n\n\
                    CONTEXT TAMBAHAN:\n{}\n\n\
                    Tulis versi yang lebih detail dan kaya dari bagian tersebut.\n\
                    Jaga konsistensi tone dan style dengan konten original.\n",
                    excerpt, section, context
                ),
            ),
            Language::English => (
                "Your task is to expand and enrich a specific part of a text \
                while staying consistent with the rest of the content.",
                format!(
                    "ORIGINAL CONTENT:\n{}...\n\n\
                    SECTION TO EXPAND:\n{}\n\n\
                    ADDITIONAL CONTEXT:\n{}\n\n\
                    Write a more detailed and richer version of that section.\n\
                    Keep the tone and style consistent with the original.\n",
                    excerpt, section, context
                ),
            ),
        };

        let request = ChatRequest::new(
            &self.model,
            &system_prompt(language, "Content Writer", instructions),
            &user,
            self.temperature_override.unwrap_or(FICTION_TEMPERATURE),
        );
        let mut sink = NullSink;
        let content = self.complete(&request, false, &mut sink).await?;
        Ok(content.trim().to_string())
    }
}

fn chapter_prompts(spec: &ChapterSpec, outline: &Outline, options: &WritingOptions) -> (String, String) {
    match &outline.details {
        BookDetails::Fiction {
            main_characters,
            setting,
            ..
        } => {
            let key_events = chapter_key_events(&spec.details);
            let characters: Vec<String> = main_characters
                .iter()
                .take(MAX_PROMPT_CHARACTERS)
                .map(|c| format!("- {}: {}", c.name, c.description))
                .collect();
            fiction_prompts(spec, outline, setting, &characters, &key_events, options)
        }
        BookDetails::NonFiction { category, .. } => {
            let (key_points, objectives) = non_fiction_fields(&spec.details);
            non_fiction_prompts(spec, outline, category, &key_points, objectives, options)
        }
    }
}

fn chapter_key_events(details: &ChapterDetails) -> Vec<String> {
    match details {
        ChapterDetails::Fiction { key_events, .. } => key_events.clone(),
        ChapterDetails::NonFiction { .. } => Vec::new(),
    }
}

fn non_fiction_fields(details: &ChapterDetails) -> (Vec<String>, &str) {
    match details {
        ChapterDetails::NonFiction {
            key_points,
            learning_objectives,
        } => (key_points.clone(), learning_objectives.as_str()),
        ChapterDetails::Fiction { .. } => (Vec::new(), ""),
    }
}

fn joined_or(items: &[String], fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.join(", ")
    }
}

fn fiction_prompts(
    spec: &ChapterSpec,
    outline: &Outline,
    setting: &str,
    characters: &[String],
    key_events: &[String],
    options: &WritingOptions,
) -> (String, String) {
    let style = &options.style;
    let min_words = options.min_words;
    match options.language {
        Language::Indonesian => {
            let char_info = if characters.is_empty() {
                String::new()
            } else {
                format!("\nKarakter Utama:\n{}\n", characters.join("\n"))
            };
            let system = system_prompt(
                Language::Indonesian,
                "Content Writer",
                &format!(
                    "Kamu adalah seorang novelis berbakat dengan {} writing style. \
                    Tugasmu adalah menulis chapter yang immersive dengan dialog yang natural, \
                    deskripsi yang vivid, dan pacing yang baik. \
                    Gunakan 'show, don't tell' dan buat pembaca terlibat secara emosional.",
                    style
                ),
            );
            let user = format!(
                "Tulis Chapter {} dari novel berikut:\n\n\
                INFORMASI BUKU:\n\
                Judul: {}\n\
                Synopsis: {}\n\
                Setting: {}\n\
                {}\n\
                CHAPTER INFO:\n\
                Judul Chapter: {}\n\
                Deskripsi: {}\n\
                Key Events: {}\n\n\
                INSTRUKSI PENULISAN:\n\
                1. Tulis minimal {} kata\n\
                2. Gunakan {} style\n\
                3. Buat dialog yang natural dan meaningful\n\
                4. Deskripsi yang vivid tapi tidak berlebihan\n\
                5. Maintain pacing yang baik\n\
                6. Tunjukkan emosi karakter melalui actions dan dialog\n\
                7. End dengan hook yang membuat pembaca ingin lanjut ke chapter berikutnya\n\n\
                Jangan menulis \"Chapter X:\" atau judul chapter di awal - langsung mulai cerita.\n\
                Tulis dalam bahasa Indonesia yang baik dan menarik.\n",
                spec.number,
                outline.title,
                outline.synopsis,
                setting,
                char_info,
                spec.title,
                spec.description,
                joined_or(key_events, "Dikembangkan sesuai alur cerita"),
                min_words,
                style
            );
            (system, user)
        }
        Language::English => {
            let char_info = if characters.is_empty() {
                String::new()
            } else {
                format!("\nMain Characters:\n{}\n", characters.join("\n"))
            };
            let system = system_prompt(
                Language::English,
                "Content Writer",
                &format!(
                    "You are a talented novelist with a {} writing style. \
                    Your task is to write an immersive chapter with natural dialogue, \
                    vivid description and good pacing. \
                    Show, don't tell, and keep the reader emotionally engaged.",
                    style
                ),
            );
            let user = format!(
                "Write Chapter {} of the following novel:\n\n\
                BOOK INFORMATION:\n\
                Title: {}\n\
                Synopsis: {}\n\
                Setting: {}\n\
                {}\n\
                CHAPTER INFO:\n\
                Chapter Title: {}\n\
                Description: {}\n\
                Key Events: {}\n\n\
                WRITING INSTRUCTIONS:\n\
                1. Write at least {} words\n\
                2. Use a {} style\n\
                3. Make the dialogue natural and meaningful\n\
                4. Keep descriptions vivid but not excessive\n\
                5. Maintain good pacing\n\
                6. Show character emotion through actions and dialogue\n\
                7. End with a hook that makes the reader want the next chapter\n\n\
                Do not write \"Chapter X:\" or the chapter title at the start - begin the story directly.\n\
                Write in good, engaging English.\n",
                spec.number,
                outline.title,
                outline.synopsis,
                setting,
                char_info,
                spec.title,
                spec.description,
                joined_or(key_events, "Develop according to the storyline"),
                min_words,
                style
            );
            (system, user)
        }
    }
}

fn non_fiction_prompts(
    spec: &ChapterSpec,
    outline: &Outline,
    category: &str,
    key_points: &[String],
    objectives: &str,
    options: &WritingOptions,
) -> (String, String) {
    let style = &options.style;
    let min_words = options.min_words;
    match options.language {
        Language::Indonesian => {
            let system = system_prompt(
                Language::Indonesian,
                "Content Writer",
                &format!(
                    "Kamu adalah seorang penulis non-fiksi berpengalaman dengan {} writing style. \
                    Tugasmu adalah menulis konten yang informatif, jelas, terstruktur dengan baik, \
                    dan mudah dipahami. Gunakan contoh konkret dan actionable insights.",
                    style
                ),
            );
            let user = format!(
                "Tulis Chapter {} dari buku non-fiksi berikut:\n\n\
                INFORMASI BUKU:\n\
                Judul: {}\n\
                Kategori: {}\n\
                Tentang: {}\n\n\
                CHAPTER INFO:\n\
                Judul Chapter: {}\n\
                Deskripsi: {}\n\
                Key Points: {}\n\
                Learning Objectives: {}\n\n\
                INSTRUKSI PENULISAN:\n\
                1. Tulis minimal {} kata\n\
                2. Gunakan {} style\n\
                3. Struktur yang jelas dengan sub-headings jika perlu\n\
                4. Berikan contoh konkret dan real-world applications\n\
                5. Gunakan bullets atau numbered lists untuk clarity\n\
                6. Sertakan actionable takeaways\n\
                7. Mulai dengan opening yang menarik perhatian\n\
                8. Akhiri dengan summary atau call-to-action\n\n\
                Format:\n\
                - Gunakan markdown untuk formatting (##, ###, **, -, dll)\n\
                - Jangan menulis \"Chapter X:\" atau judul chapter di awal - langsung mulai konten\n\
                - Tulis dalam bahasa Indonesia yang profesional namun mudah dipahami\n\n\
                Tulis konten yang valuable dan implementable!\n",
                spec.number,
                outline.title,
                category,
                outline.synopsis,
                spec.title,
                spec.description,
                joined_or(key_points, "Dikembangkan sesuai topik"),
                objectives,
                min_words,
                style
            );
            (system, user)
        }
        Language::English => {
            let system = system_prompt(
                Language::English,
                "Content Writer",
                &format!(
                    "You are an experienced non-fiction author with a {} writing style. \
                    Your task is to write informative, clear, well-structured content \
                    that is easy to understand. Use concrete examples and actionable insights.",
                    style
                ),
            );
            let user = format!(
                "Write Chapter {} of the following non-fiction book:\n\n\
                BOOK INFORMATION:\n\
                Title: {}\n\
                Category: {}\n\
                About: {}\n\n\
                CHAPTER INFO:\n\
                Chapter Title: {}\n\
                Description: {}\n\
                Key Points: {}\n\
                Learning Objectives: {}\n\n\
                WRITING INSTRUCTIONS:\n\
                1. Write at least {} words\n\
                2. Use a {} style\n\
                3. Use a clear structure with sub-headings where useful\n\
                4. Give concrete examples and real-world applications\n\
                5. Use bullets or numbered lists for clarity\n\
                6. Include actionable takeaways\n\
                7. Open with something that grabs attention\n\
                8. Close with a summary or call-to-action\n\n\
                Format:\n\
                - Use markdown for formatting (##, ###, **, -, etc.)\n\
                - Do not write \"Chapter X:\" or the chapter title at the start - begin the content directly\n\
                - Write in professional but accessible English\n\n\
                Write content that is valuable and actionable!\n",
                spec.number,
                outline.title,
                category,
                outline.synopsis,
                spec.title,
                spec.description,
                joined_or(key_points, "Develop according to the topic"),
                objectives,
                min_words,
                style
            );
            (system, user)
        }
    }
}
