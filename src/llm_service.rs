use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::card_parser::{self, JsonResponseParser, DOCUMENT_CARD_LIMIT, TEXT_CARD_LIMIT};
use crate::config::LLMConfig;
use crate::content_extractor::FileKind;
use crate::errors::{ApiError, ApiResult};
use crate::llm_providers::{LLMMessage, LLMProvider, LLMProviderFactory, MoonshotProvider};
use crate::models::{GeneratedCard, GenerationMode, QuizAnalysis, QuizQuestion, WebPage};
use crate::{log_llm_operation, log_validation};

const CARD_JSON_FORMAT: &str = r#"Respond with JSON only, in exactly this shape:
{
  "cards": [
    {
      "title": "short card title",
      "content": "the knowledge point",
      "question": "a test question",
      "answer": "the standard answer",
      "tags": ["tag1", "tag2"],
      "difficulty": "easy | medium | hard"
    }
  ]
}"#;

const SINGLE_CARD_PROMPT: &str = "You are a professional study assistant. From the study material the user provides, pick the single most important core idea and turn it into ONE knowledge card.

Requirements:
1. Generate exactly one card for the most central idea
2. Keep the title short and precise (at most 15 words)
3. The content must be accurate and complete (50-150 words)
4. Write one related test question with a standard answer
5. Set the difficulty (easy/medium/hard) by the complexity of the idea
6. Add 2-4 fitting tags";

const SINGLE_QA_PROMPT: &str = "You are a professional study assistant. From the study material the user provides, produce ONE question-and-answer knowledge card.

Requirements:
1. Generate exactly one card for the idea best suited to a question
2. The question should be challenging and practical
3. The answer must be accurate and complete, with the necessary explanation (50-150 words)
4. The title is a short summary of the question
5. Set the difficulty (easy/medium/hard) by how hard the question is
6. Add 2-4 fitting tags";

const MULTI_CARD_PROMPT: &str = "You are a professional study assistant. Turn the document the user provides into structured knowledge cards.

Requirements:
1. Extract 3-8 core knowledge points depending on the length of the content
2. One card per knowledge point
3. Titles are short and capture the core of the point
4. Content is accurate and complete, including key details
5. Each card has a probing test question and its answer
6. Add fitting tags
7. For technical material include code examples or formulas; for theory include definitions and applications";

const MULTI_QA_PROMPT: &str = "You are a professional study assistant. Turn the document the user provides into question-and-answer knowledge cards.

Requirements:
1. Focus on knowledge points that make good questions
2. Generate 3-8 Q&A cards depending on the complexity of the content
3. Questions are challenging and practical and cover different difficulty levels
4. Answers are accurate and complete with the necessary explanation
5. Add fitting tags
6. Vary the question types: understanding, application, comparison";

const MOONSHOT_SYSTEM_PROMPT: &str = "You are Kimi, an AI assistant provided by Moonshot AI. You are fluent in Chinese and English and give safe, helpful and accurate answers. Generate study cards from the uploaded file.";

const QUIZ_SYSTEM_PROMPT: &str = r#"You are an expert learning assessor. Analyse the student's quiz objectively and in detail, and give useful feedback.

Return strict JSON with exactly these fields:
{
  "overallScore": number (0-100),
  "totalQuestions": number,
  "correctAnswers": number,
  "analysis": [
    {
      "questionNumber": number,
      "title": "string",
      "question": "string",
      "userAnswer": "string",
      "standardAnswer": "string",
      "isCorrect": boolean,
      "score": number (0-10),
      "feedback": "string",
      "keyPoints": ["string"],
      "suggestions": "string (optional)"
    }
  ],
  "overallFeedback": "string",
  "strengths": ["string"],
  "weaknesses": ["string"],
  "recommendations": ["string"]
}

Do not use Markdown. Return JSON only."#;

/// Uploaded document ready to be prompted with.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub file_name: String,
    pub kind: FileKind,
    pub size_bytes: usize,
    pub text: String,
}

#[derive(Clone)]
pub struct LLMService {
    provider: LLMProvider,
    moonshot: MoonshotProvider,
    json_parser: JsonResponseParser,
}

impl LLMService {
    pub fn new(config: &LLMConfig) -> Self {
        Self::with_providers(
            LLMProviderFactory::create_provider(config),
            LLMProviderFactory::moonshot(&config.moonshot),
        )
    }

    pub fn with_providers(provider: LLMProvider, moonshot: MoonshotProvider) -> Self {
        Self {
            provider,
            moonshot,
            json_parser: JsonResponseParser,
        }
    }

    /// Get the provider name for logging and testing
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    async fn request(&self, operation: &str, system_message: &str, prompt: &str) -> ApiResult<String> {
        log_llm_operation!(
            start,
            operation,
            provider = self.provider_name(),
            input_chars = prompt.chars().count()
        );

        let response = self
            .provider
            .make_request(Some(system_message), prompt)
            .await
            .map_err(|e| {
                log_llm_operation!(error, operation, provider = self.provider_name(), error = e);
                ApiError::LLMError(e.to_string())
            })?;

        debug!(
            operation = operation,
            response_content = %response,
            "Raw LLM response"
        );
        Ok(response)
    }

    fn cards_from_reply(
        &self,
        operation: &str,
        reply: &str,
        limit: usize,
        custom_tags: &[String],
        started: Instant,
    ) -> ApiResult<Vec<GeneratedCard>> {
        debug!(
            operation = operation,
            extracted_json = %JsonResponseParser::extract_json_from_response(reply),
            "Extracted JSON from LLM response"
        );

        let cards = card_parser::parse_cards(reply).map_err(|e| {
            log_validation!(failure, "ai_response", error = e);
            e
        })?;
        let cards = card_parser::finalize_cards(cards, limit, custom_tags);

        log_llm_operation!(
            success,
            operation,
            provider = self.provider_name(),
            duration_ms = started.elapsed().as_millis() as u64,
            card_count = cards.len()
        );
        Ok(cards)
    }

    /// One card from pasted study material.
    pub async fn generate_cards(
        &self,
        text: &str,
        mode: GenerationMode,
        custom_tags: &[String],
    ) -> ApiResult<Vec<GeneratedCard>> {
        let started = Instant::now();
        let system_message = match mode {
            GenerationMode::Cards => SINGLE_CARD_PROMPT,
            GenerationMode::Qa => SINGLE_QA_PROMPT,
        };
        let system_message = format!("{}\n\n{}", system_message, CARD_JSON_FORMAT);

        let prompt = format!(
            "Study material:\n{}\n\n{}Generate the knowledge card.",
            text,
            tags_line(custom_tags)
        );

        let reply = self.request("generate_cards", &system_message, &prompt).await?;
        self.cards_from_reply("generate_cards", &reply, TEXT_CARD_LIMIT, custom_tags, started)
    }

    /// 3-8 cards from a fetched web page.
    pub async fn generate_cards_from_page(
        &self,
        page: &WebPage,
        mode: GenerationMode,
        custom_tags: &[String],
    ) -> ApiResult<Vec<GeneratedCard>> {
        let started = Instant::now();
        let system_message = format!("{}\n\n{}", multi_prompt(mode), CARD_JSON_FORMAT);

        let prompt = format!(
            "Page title: {}\nURL: {}\n\nPage content:\n{}\n\n{}Generate high-quality knowledge cards from this page.",
            page.title,
            page.url,
            page.content,
            tags_line(custom_tags)
        );

        let reply = self
            .request("generate_cards_from_url", &system_message, &prompt)
            .await?;
        let cards = self.cards_from_reply(
            "generate_cards_from_url",
            &reply,
            DOCUMENT_CARD_LIMIT,
            custom_tags,
            started,
        )?;

        if cards.is_empty() {
            return Err(ApiError::InternalError(
                "The AI did not produce any cards for this page".to_string(),
            ));
        }
        Ok(cards)
    }

    /// 3-8 cards from an uploaded document's extracted text.
    pub async fn generate_cards_from_document(
        &self,
        document: &DocumentInput,
        mode: GenerationMode,
        custom_tags: &[String],
    ) -> ApiResult<Vec<GeneratedCard>> {
        let started = Instant::now();
        let system_message = format!("{}\n\n{}", multi_prompt(mode), CARD_JSON_FORMAT);

        let prompt = format!(
            "File name: {}\nFile type: {}\nFile size: {:.2} KB\n\nFile content:\n{}\n\n{}Generate high-quality knowledge cards from this file.",
            document.file_name,
            document.kind.as_str(),
            document.size_bytes as f64 / 1024.0,
            document.text,
            tags_line(custom_tags)
        );

        let reply = self
            .request("generate_cards_from_file", &system_message, &prompt)
            .await?;
        self.cards_from_reply(
            "generate_cards_from_file",
            &reply,
            DOCUMENT_CARD_LIMIT,
            custom_tags,
            started,
        )
    }

    /// PDF text through Moonshot's file extraction, for files without a local text layer.
    pub async fn extract_pdf_text(&self, file_name: &str, bytes: Vec<u8>) -> ApiResult<String> {
        self.moonshot
            .extract_text(file_name, bytes)
            .await
            .map_err(|e| {
                log_llm_operation!(error, "extract_pdf_text", provider = self.moonshot.provider_name(), error = e);
                ApiError::LLMError(e.to_string())
            })
    }

    /// Upload the file to Moonshot, cache it, and let Kimi write the cards.
    pub async fn generate_cards_with_moonshot(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        custom_tags: &[String],
    ) -> ApiResult<Vec<GeneratedCard>> {
        let started = Instant::now();
        let provider = self.moonshot.provider_name();
        let to_llm_error = |e: anyhow::Error| {
            log_llm_operation!(error, "generate_cards_moonshot", provider = provider, error = e);
            ApiError::LLMError(e.to_string())
        };

        log_llm_operation!(
            start,
            "generate_cards_moonshot",
            provider = provider,
            input_chars = bytes.len()
        );

        let file_id = self.moonshot.upload_file(file_name, bytes).await.map_err(to_llm_error)?;
        let content = self.moonshot.file_content(&file_id).await.map_err(to_llm_error)?;
        let file_message = vec![LLMMessage::new("system", content)];

        let tag = format!("upload_{}", Utc::now().timestamp_millis());
        let mut messages = match self.moonshot.create_cache(&file_message, &tag).await {
            Ok(reference) => vec![reference],
            Err(e) => {
                warn!(error = %e, tag = %tag, "Context cache unavailable, sending file content inline");
                file_message
            }
        };

        messages.push(LLMMessage::new("system", MOONSHOT_SYSTEM_PROMPT));
        messages.push(LLMMessage::new(
            "user",
            format!(
                "Generate 3-8 high-quality study cards from the file content. Each card has a title, content, question, answer, tags and difficulty (easy/medium/hard).\n\n{}{}",
                tags_line(custom_tags),
                CARD_JSON_FORMAT
            ),
        ));

        let reply = self.moonshot.chat(&messages).await.map_err(to_llm_error)?;
        debug!(response_content = %reply, "Raw Moonshot response");

        let cards = card_parser::parse_cards(&reply)?;
        let cards = card_parser::finalize_cards(cards, DOCUMENT_CARD_LIMIT, custom_tags);
        log_llm_operation!(
            success,
            "generate_cards_moonshot",
            provider = provider,
            duration_ms = started.elapsed().as_millis() as u64,
            card_count = cards.len()
        );
        Ok(cards)
    }

    /// Grade free-text quiz answers against the standard answers.
    pub async fn analyze_quiz(&self, questions: &[QuizQuestion]) -> ApiResult<QuizAnalysis> {
        let started = Instant::now();
        let listing = questions
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let answer = if q.user_answer.trim().is_empty() {
                    "(no answer)"
                } else {
                    q.user_answer.as_str()
                };
                format!(
                    "Question {} (questionNumber {}):\nTitle: {}\nQuestion: {}\nStandard answer: {}\nUser answer: {}\nDifficulty: {}\n",
                    i + 1,
                    q.question_number,
                    q.title,
                    q.question,
                    q.standard_answer,
                    answer,
                    q.difficulty.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"Analyse the results of this memory quiz by comparing the user's answers with the standard answers. The user answered from memory, so keep the feedback encouraging.

Questions and answers:
{}

Requirements:
1. Judge each answer carefully:
   - If the answer contains the core points of the standard answer, even in different words, mark it correct (isCorrect: true)
   - If it is partly right or related, give partial credit but mark it not fully correct (isCorrect: false)
   - If it is wrong or missing, mark it incorrect (isCorrect: false)
2. Be generous with scores but accurate about correctness
3. Give encouraging feedback and constructive suggestions
4. Highlight what the user has already mastered

Return strict JSON and nothing else."#,
            listing
        );

        let reply = self.request("analyze_quiz", QUIZ_SYSTEM_PROMPT, &prompt).await?;

        let analysis = match self.json_parser.parse_json_response::<QuizAnalysis>(&reply) {
            Ok(analysis) => analysis,
            Err(e) => {
                error!(
                    error = %e,
                    json_content = %JsonResponseParser::extract_json_from_response(&reply),
                    "Failed to parse quiz analysis JSON response"
                );
                return Err(ApiError::InvalidAiResponse(e.to_string()));
            }
        };

        validate_analysis(&analysis).map_err(ApiError::InvalidAiResponse)?;

        info!(
            question_count = analysis.analysis.len(),
            overall_score = analysis.overall_score,
            duration_ms = started.elapsed().as_millis() as u64,
            "Quiz analysis completed"
        );
        Ok(analysis)
    }
}

fn multi_prompt(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Cards => MULTI_CARD_PROMPT,
        GenerationMode::Qa => MULTI_QA_PROMPT,
    }
}

fn tags_line(custom_tags: &[String]) -> String {
    if custom_tags.is_empty() {
        String::new()
    } else {
        format!("User-specified tags: {}\n\n", custom_tags.join(", "))
    }
}

/// Range checks serde cannot express.
pub fn validate_analysis(analysis: &QuizAnalysis) -> Result<(), String> {
    if !(0.0..=100.0).contains(&analysis.overall_score) {
        return Err(format!(
            "overallScore must be between 0 and 100, got {}",
            analysis.overall_score
        ));
    }

    for item in &analysis.analysis {
        if !(0.0..=10.0).contains(&item.score) {
            return Err(format!(
                "analysis[questionNumber={}].score must be between 0 and 10, got {}",
                item.question_number, item.score
            ));
        }
    }

    Ok(())
}
