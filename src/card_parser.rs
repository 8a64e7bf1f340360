use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::models::{Difficulty, GeneratedCard};

/// Cards kept from a plain-text generation request.
pub const TEXT_CARD_LIMIT: usize = 1;
/// Cards kept from URL and file generation requests.
pub const DOCUMENT_CARD_LIMIT: usize = 8;

const FALLBACK_TITLE_CHARS: usize = 30;

lazy_static! {
    static ref QA_LABEL: Regex = Regex::new(
        r"\*\*\s*(Title|标题|Question|Q|问题|Answer|A|答案)\s*[:：]?\s*\*\*\s*[:：]?"
    )
    .unwrap();
}

/// Centralized JSON response parser with robust extraction logic
#[derive(Clone)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    /// Extract JSON from LLM responses that might be wrapped in markdown or other formatting
    pub fn extract_json_from_response(content: &str) -> String {
        // Try to find JSON within markdown code blocks
        if let Some(start) = content.find("```json") {
            if let Some(end) = content[start + 7..].find("```") {
                let json_start = start + 7;
                let json_end = json_start + end;
                return content[json_start..json_end].trim().to_string();
            }
        }

        // Try to find JSON within plain code blocks
        if let Some(start) = content.find("```") {
            if let Some(end) = content[start + 3..].find("```") {
                let json_start = start + 3;
                let json_end = json_start + end;
                let potential_json = content[json_start..json_end].trim();
                if potential_json.starts_with('{') || potential_json.starts_with('[') {
                    return potential_json.to_string();
                }
            }
        }

        let object = content.find('{').zip(content.rfind('}')).filter(|(s, e)| e > s);
        let array = content.find('[').zip(content.rfind(']')).filter(|(s, e)| e > s);

        // Whichever opens first is the outermost payload
        match (object, array) {
            (Some((os, _)), Some((as_, ae))) if as_ < os => return content[as_..=ae].to_string(),
            (Some((os, oe)), _) => return content[os..=oe].to_string(),
            (None, Some((as_, ae))) => return content[as_..=ae].to_string(),
            (None, None) => {}
        }

        content.trim().to_string()
    }

    /// Parse JSON response into a specific type with error handling
    pub fn parse_json_response<T>(&self, content: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let json_content = Self::extract_json_from_response(content);
        serde_json::from_str::<T>(&json_content)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON response: {}", e))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCard {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPayload {
    Wrapped { cards: Vec<RawCard> },
    Bare(Vec<RawCard>),
}

/// Turn a model reply into flashcards, trying JSON first and then the
/// plain-text layouts models tend to fall back to.
pub fn parse_cards(reply: &str) -> Result<Vec<GeneratedCard>, ApiError> {
    let json_error = match JsonResponseParser.parse_json_response::<RawPayload>(reply) {
        Ok(RawPayload::Wrapped { cards }) | Ok(RawPayload::Bare(cards)) => {
            return validate_cards(cards).map_err(ApiError::InvalidAiResponse);
        }
        Err(e) => e,
    };

    debug!(error = %json_error, "Reply is not JSON, trying structured text");
    let structured = parse_structured_text(reply);
    if !structured.is_empty() {
        return validate_cards(structured).map_err(ApiError::InvalidAiResponse);
    }

    let qa = parse_markdown_qa(reply);
    if !qa.is_empty() {
        return validate_cards(qa).map_err(ApiError::InvalidAiResponse);
    }

    Err(ApiError::InvalidAiResponse(format!(
        "could not parse AI response as JSON or structured text ({})",
        json_error
    )))
}

fn validate_cards(raw: Vec<RawCard>) -> Result<Vec<GeneratedCard>, String> {
    if raw.is_empty() {
        return Err("cards must contain at least one card".to_string());
    }

    raw.into_iter()
        .enumerate()
        .map(|(i, card)| {
            let title = non_empty(card.title)
                .ok_or_else(|| format!("cards[{}].title is required", i))?;
            let content = non_empty(card.content)
                .ok_or_else(|| format!("cards[{}].content is required", i))?;
            let difficulty = match card.difficulty.as_deref() {
                None | Some("") => Difficulty::default(),
                Some(value) => Difficulty::parse(value).ok_or_else(|| {
                    format!("cards[{}].difficulty must be one of easy, medium, hard", i)
                })?,
            };

            Ok(GeneratedCard {
                title,
                content,
                question: card.question.unwrap_or_default().trim().to_string(),
                answer: card.answer.unwrap_or_default().trim().to_string(),
                tags: clean_tags(card.tags.unwrap_or_default()),
                difficulty,
            })
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !cleaned.contains(&tag) {
            cleaned.push(tag);
        }
    }
    cleaned
}

/// `title:` / `content:` / `tags:` lines in blank-line separated blocks.
/// Only the first complete card is returned.
fn parse_structured_text(text: &str) -> Vec<RawCard> {
    let normalized = text.replace("\r\n", "\n");

    for block in normalized.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let mut card = RawCard::default();

        for line in block.lines() {
            let line = line.trim();
            let line = line.strip_prefix("- ").unwrap_or(line);
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();

            match key.trim().to_lowercase().as_str() {
                "title" => card.title = Some(value),
                "content" => card.content = Some(value),
                "question" => card.question = Some(value),
                "answer" => card.answer = Some(value),
                "difficulty" => card.difficulty = Some(value),
                "tags" => card.tags = Some(parse_tag_list(&value)),
                _ => {}
            }
        }

        let filled = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        if !(filled(&card.title) && filled(&card.content)) {
            debug!("Structured block missing title or content, skipping");
            continue;
        }

        return vec![card];
    }

    Vec::new()
}

fn parse_tag_list(value: &str) -> Vec<String> {
    match value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        Some(inner) => inner
            .split(',')
            .map(|t| t.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        None if value.is_empty() => Vec::new(),
        None => vec![value.to_string()],
    }
}

#[derive(Default)]
struct QaDraft {
    title: Option<String>,
    question: Option<String>,
    answer: Option<String>,
}

impl QaDraft {
    fn finish(self) -> Option<RawCard> {
        let question = non_empty(self.question)?;
        let answer = non_empty(self.answer)?;
        let title = non_empty(self.title)
            .unwrap_or_else(|| question.chars().take(FALLBACK_TITLE_CHARS).collect());

        Some(RawCard {
            title: Some(title),
            content: Some(answer.clone()),
            question: Some(question),
            answer: Some(answer),
            ..RawCard::default()
        })
    }
}

/// `**Question:** ... **Answer:** ...` blocks, optionally preceded by `**Title:**`.
fn parse_markdown_qa(text: &str) -> Vec<RawCard> {
    let labels: Vec<_> = QA_LABEL.captures_iter(text).collect();
    let mut cards = Vec::new();
    let mut draft = QaDraft::default();

    for (i, caps) in labels.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value_end = labels
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let value = text[whole.end()..value_end]
            .trim()
            .trim_end_matches(|c: char| c == '-' || c == '#' || c.is_whitespace())
            .to_string();

        match label.as_str() {
            "Title" | "标题" => {
                if draft.question.is_some() || draft.title.is_some() {
                    cards.extend(std::mem::take(&mut draft).finish());
                }
                draft.title = Some(value);
            }
            "Question" | "Q" | "问题" => {
                if draft.question.is_some() {
                    cards.extend(std::mem::take(&mut draft).finish());
                }
                draft.question = Some(value);
            }
            _ => draft.answer = Some(value),
        }
    }
    cards.extend(draft.finish());
    cards
}

/// Cap the number of cards and merge user tags into each one.
pub fn finalize_cards(
    mut cards: Vec<GeneratedCard>,
    limit: usize,
    custom_tags: &[String],
) -> Vec<GeneratedCard> {
    if cards.len() > limit {
        warn!(
            generated = cards.len(),
            limit = limit,
            "Model returned more cards than allowed, truncating"
        );
        cards.truncate(limit);
    }

    for card in &mut cards {
        for tag in custom_tags {
            let tag = tag.trim();
            if !tag.is_empty() && !card.tags.iter().any(|t| t == tag) {
                card.tags.push(tag.to_string());
            }
        }
    }
    cards
}
