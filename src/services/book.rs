use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{
    Book, BookMetadata, BookSpec, Chapter, ChapterOutline, ContentType, GenerationRequest, ProviderKind,
};
use crate::services::manager::ProviderManager;

#[derive(Debug, Clone)]
pub struct BookSettings {
    pub chapter_pause: Duration,
    pub context_window_chars: usize,
    pub context_tail_chars: usize,
    pub max_retries: u32,
}

impl BookSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chapter_pause: config.chapter_pause,
            context_window_chars: config.context_window_chars,
            context_tail_chars: config.context_tail_chars,
            max_retries: config.max_retries,
        }
    }
}

/// Generates a book chapter by chapter. Chapters run strictly in outline order and a
/// failed chapter is recorded as a placeholder instead of aborting the book.
pub struct BookOrchestrator {
    manager: Arc<ProviderManager>,
    settings: BookSettings,
}

impl BookOrchestrator {
    pub fn new(manager: Arc<ProviderManager>, settings: BookSettings) -> Self {
        Self { manager, settings }
    }

    pub async fn generate_book(&self, spec: &BookSpec, outline: &[ChapterOutline]) -> Book {
        let started_at = Utc::now();
        let mut chapters: Vec<Chapter> = Vec::with_capacity(outline.len());
        let mut context = String::new();

        tracing::info!("generating \"{}\" with {} chapters", spec.title, outline.len());

        for (index, entry) in outline.iter().enumerate() {
            let number = index + 1;
            let prompt = build_chapter_prompt(
                spec,
                entry,
                number,
                outline.len(),
                tail_chars(&context, self.settings.context_window_chars),
            );
            let request = GenerationRequest::new(prompt)
                .content_type(ContentType::Chapter)
                .max_retries(self.settings.max_retries)
                .consistent_with(context.clone());

            match self.manager.generate_content(&request).await {
                Ok(result) => {
                    tracing::info!(
                        "chapter {}/{} \"{}\" done by {} ({} words)",
                        number,
                        outline.len(),
                        entry.title,
                        result.provider,
                        result.word_count
                    );
                    chapters.push(Chapter {
                        number,
                        title: entry.title.clone(),
                        content: result.content,
                        provider: Some(result.provider),
                        word_count: result.word_count,
                        quality_score: result.quality_score,
                        consistency_score: result.consistency_score,
                        generated_at: result.timestamp,
                        error: None,
                    });
                    context = rolling_context(&chapters, self.settings.context_tail_chars);
                }
                Err(err) => {
                    tracing::error!("chapter {} \"{}\" failed: {}", number, entry.title, err);
                    chapters.push(Chapter {
                        number,
                        title: entry.title.clone(),
                        content: String::new(),
                        provider: None,
                        word_count: 0,
                        quality_score: 0.0,
                        consistency_score: None,
                        generated_at: Utc::now(),
                        error: Some(err.to_string()),
                    });
                }
            }

            if number < outline.len() && !self.settings.chapter_pause.is_zero() {
                tokio::time::sleep(self.settings.chapter_pause).await;
            }
        }

        let metadata = summarize(&chapters, started_at);
        tracing::info!(
            "book \"{}\" finished: {}/{} chapters, {} words",
            spec.title,
            metadata.successful_chapters,
            metadata.total_chapters,
            metadata.total_words
        );

        Book {
            id: Uuid::new_v4(),
            title: spec.title.clone(),
            genre: spec.genre.clone(),
            style: spec.style.clone(),
            audience: spec.audience.clone(),
            chapters,
            metadata,
        }
    }
}

pub fn build_chapter_prompt(
    spec: &BookSpec,
    entry: &ChapterOutline,
    number: usize,
    total: usize,
    previous_context: &str,
) -> String {
    let mut prompt = format!(
        "You are writing the book \"{}\".\nGenre: {}\nStyle: {}\nTarget audience: {}\n\n",
        spec.title, spec.genre, spec.style, spec.audience
    );

    if !previous_context.trim().is_empty() {
        prompt.push_str("The story so far ends with:\n");
        prompt.push_str(previous_context.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!("Write chapter {number} of {total}: \"{}\".\n", entry.title));
    if !entry.summary.trim().is_empty() {
        prompt.push_str(&format!("Chapter outline: {}\n", entry.summary.trim()));
    }
    if !entry.key_points.is_empty() {
        prompt.push_str("Key points to cover:\n");
        for point in &entry.key_points {
            prompt.push_str(&format!("- {}\n", point.trim()));
        }
    }
    prompt.push_str(
        "\nKeep continuity with earlier chapters, use paragraphs and natural transitions, \
         and write at least 800 words.",
    );
    prompt
}

/// Last `max_chars` characters of `text`, cut on a character boundary.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    text.char_indices()
        .nth(count - max_chars)
        .map_or("", |(offset, _)| &text[offset..])
}

/// Tails of the last two successful chapters, oldest first.
fn rolling_context(chapters: &[Chapter], tail: usize) -> String {
    let mut recent: Vec<&str> = chapters
        .iter()
        .rev()
        .filter(|c| c.is_successful())
        .take(2)
        .map(|c| tail_chars(&c.content, tail))
        .collect();
    recent.reverse();
    recent.join("\n\n")
}

fn summarize(chapters: &[Chapter], started_at: chrono::DateTime<Utc>) -> BookMetadata {
    let successful: Vec<&Chapter> = chapters.iter().filter(|c| c.is_successful()).collect();
    let average_quality = if successful.is_empty() {
        0.0
    } else {
        successful.iter().map(|c| c.quality_score).sum::<f64>() / successful.len() as f64
    };

    let mut providers_used: Vec<ProviderKind> = Vec::new();
    for provider in successful.iter().filter_map(|c| c.provider) {
        if !providers_used.contains(&provider) {
            providers_used.push(provider);
        }
    }

    BookMetadata {
        total_chapters: chapters.len(),
        successful_chapters: successful.len(),
        total_words: chapters.iter().map(|c| c.word_count).sum(),
        average_quality,
        providers_used,
        started_at,
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{ScriptedProvider, fast_settings, sample_chapter};

    fn settings() -> BookSettings {
        BookSettings {
            chapter_pause: Duration::from_secs(2),
            context_window_chars: 1500,
            context_tail_chars: 800,
            max_retries: 3,
        }
    }

    fn outline(titles: &[&str]) -> Vec<ChapterOutline> {
        titles.iter().map(|t| ChapterOutline::titled(*t)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn all_chapters_succeed() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, &sample_chapter("harbor"));
        let manager = Arc::new(ProviderManager::new(fast_settings()).with_provider(openai.clone()));
        let orchestrator = BookOrchestrator::new(manager, settings());

        let book = orchestrator
            .generate_book(&BookSpec::new("Tides"), &outline(&["Intro", "Body", "End"]))
            .await;

        assert_eq!(book.chapters.len(), 3);
        assert_eq!(book.metadata.successful_chapters, 3);
        assert!(book.chapters.iter().all(|c| c.provider == Some(ProviderKind::OpenAi)));
        assert_eq!(
            book.chapters.iter().map(|c| c.number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(book.chapters[0].consistency_score.is_none());
        assert!(book.chapters[1].consistency_score.unwrap() >= 0.7);
        assert_eq!(book.metadata.total_words, book.chapters.iter().map(|c| c.word_count).sum::<usize>());
        assert_eq!(book.metadata.providers_used, vec![ProviderKind::OpenAi]);
        assert_eq!(openai.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chapter_becomes_a_placeholder() {
        let text = sample_chapter("harbor");
        let script = move |prompt: &str| {
            if prompt.contains("\"Body\"") {
                Err("content filter triggered".to_string())
            } else {
                Ok(text.clone())
            }
        };
        let manager = Arc::new(
            ProviderManager::new(fast_settings())
                .with_provider(ScriptedProvider::scripted(ProviderKind::OpenAi, script.clone()))
                .with_provider(ScriptedProvider::scripted(ProviderKind::Gemini, script)),
        );
        let orchestrator = BookOrchestrator::new(manager, settings());

        let book = orchestrator
            .generate_book(&BookSpec::new("Tides"), &outline(&["Intro", "Body", "End"]))
            .await;

        assert_eq!(book.chapters.len(), 3);
        assert_eq!(book.metadata.successful_chapters, 2);

        let failed = &book.chapters[1];
        assert_eq!(failed.word_count, 0);
        assert!(failed.provider.is_none());
        assert!(failed.error.as_deref().unwrap().contains("content filter triggered"));
        assert!(book.chapters[2].is_successful());
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_between_chapters_but_not_after_the_last() {
        let openai = ScriptedProvider::always(ProviderKind::OpenAi, &sample_chapter("harbor"));
        let manager = Arc::new(ProviderManager::new(fast_settings()).with_provider(openai));
        let orchestrator = BookOrchestrator::new(manager, settings());

        let started = tokio::time::Instant::now();
        orchestrator
            .generate_book(&BookSpec::new("Tides"), &outline(&["One", "Two", "Three"]))
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn average_quality_ignores_failed_chapters() {
        let manager = Arc::new(
            ProviderManager::new(fast_settings())
                .with_provider(ScriptedProvider::failing(ProviderKind::Claude, "down")),
        );
        let orchestrator = BookOrchestrator::new(manager, settings());

        let book = orchestrator
            .generate_book(&BookSpec::new("Empty"), &outline(&["Only"]))
            .await;
        assert_eq!(book.metadata.successful_chapters, 0);
        assert_eq!(book.metadata.average_quality, 0.0);
        assert_eq!(book.metadata.total_words, 0);
    }

    #[test]
    fn prompt_embeds_book_details_and_outline() {
        let spec = BookSpec {
            title: "Tides".to_string(),
            genre: "mystery".to_string(),
            style: "terse".to_string(),
            audience: "adults".to_string(),
        };
        let entry = ChapterOutline {
            title: "The Wreck".to_string(),
            summary: "Divers find the hull".to_string(),
            key_points: vec!["a missing bell".to_string()],
        };
        let prompt = build_chapter_prompt(&spec, &entry, 2, 5, "the storm ended");

        assert!(prompt.contains("\"Tides\""));
        assert!(prompt.contains("Genre: mystery"));
        assert!(prompt.contains("Target audience: adults"));
        assert!(prompt.contains("the storm ended"));
        assert!(prompt.contains("chapter 2 of 5: \"The Wreck\""));
        assert!(prompt.contains("Divers find the hull"));
        assert!(prompt.contains("- a missing bell"));
    }

    #[test]
    fn first_chapter_prompt_has_no_context_section() {
        let prompt = build_chapter_prompt(&BookSpec::new("Tides"), &ChapterOutline::titled("Intro"), 1, 1, "");
        assert!(!prompt.contains("story so far"));
    }

    #[test]
    fn tail_respects_character_boundaries() {
        assert_eq!(tail_chars("hello", 10), "hello");
        assert_eq!(tail_chars("hello", 3), "llo");
        assert_eq!(tail_chars("第一章开始", 2), "开始");
        assert_eq!(tail_chars("abc", 0), "");
    }

    #[test]
    fn rolling_context_uses_last_two_successful_chapters() {
        let chapter = |number: usize, content: &str, error: Option<&str>| Chapter {
            number,
            title: format!("Chapter {number}"),
            content: content.to_string(),
            provider: error.is_none().then_some(ProviderKind::OpenAi),
            word_count: content.split_whitespace().count(),
            quality_score: 1.0,
            consistency_score: None,
            generated_at: Utc::now(),
            error: error.map(str::to_string),
        };
        let chapters = vec![
            chapter(1, "first chapter text", None),
            chapter(2, "second chapter text", None),
            chapter(3, "", Some("failed")),
            chapter(4, "fourth chapter text", None),
        ];

        assert_eq!(rolling_context(&chapters, 4), "text\n\ntext");
        assert_eq!(
            rolling_context(&chapters, 100),
            "second chapter text\n\nfourth chapter text"
        );
    }
}
