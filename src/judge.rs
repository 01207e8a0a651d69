//! LLM-as-judge scoring.
//!
//! The judge asks the chat model to grade an answer from 0 to 5 against a
//! category-specific rubric and reply with `{"score": int, "reason": str}`
//! in JSON mode. Parsing is lenient about surrounding prose but never fails:
//! unusable output scores 0 with a diagnostic reason.
//!
//! Trap questions (out-of-domain) get one extra rule applied locally: an
//! answer that is a refusal scores 5 whatever the model said. A hedge that
//! goes on to answer anyway keeps the model's score.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::gateway::{ChatRequest, ModelGateway};
use crate::models::QuestionCategory;
use crate::rag::{NO_DOCUMENTS, REFUSAL_SENTENCE};

pub const PARSE_ERROR_REASON: &str = "JSON parse error";
const MAX_REASON_CHARS: usize = 100;

/// Lowercased openings that mark an answer as a refusal.
const DECLINE_OPENINGS: &[&str] = &[
    "i don't have enough information",
    "i do not have enough information",
    "i don't know",
    "i do not know",
    "i cannot answer",
    "i can't answer",
    "i'm unable to answer",
    "i am unable to answer",
    "i'm not able to answer",
    "i am not able to answer",
    "i must decline",
    "i'm sorry, but i can't",
    "i'm sorry, but i cannot",
    "sorry, i can't",
    "sorry, i cannot",
];

/// Lowercased markers of an answer carrying on past its refusal.
const CONTINUATIONS: &[&str] = &[" but ", "however", "that said", "nevertheless"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Within `0..=5`.
    pub score: u8,
    /// At most 100 characters.
    pub reason: String,
}

impl Verdict {
    fn new(score: i64, reason: &str) -> Self {
        Self {
            score: score.clamp(0, 5) as u8,
            reason: truncate_chars(reason, MAX_REASON_CHARS),
        }
    }

    fn parse_error() -> Self {
        Self::new(0, PARSE_ERROR_REASON)
    }
}

pub struct Judge {
    gateway: Arc<dyn ModelGateway>,
    model: String,
    domain: String,
}

impl Judge {
    pub fn new(gateway: Arc<dyn ModelGateway>, model: &str, domain: &str) -> Self {
        Self {
            gateway,
            model: model.to_string(),
            domain: domain.to_string(),
        }
    }

    /// Score `answer` to `question`. Never fails.
    pub async fn judge(
        &self,
        question: &str,
        answer: &str,
        category: QuestionCategory,
        expected: &str,
    ) -> Verdict {
        let prompt = judge_prompt(&self.domain, question, answer, category, expected);
        let request = ChatRequest::new(&self.model)
            .user(prompt)
            .temperature(0.0)
            .json_format();

        let verdict = match self.gateway.generate(&request).await {
            Ok(Some(raw)) => parse_verdict(&raw),
            Ok(None) => {
                debug!("judge reply had no content");
                Verdict::parse_error()
            }
            Err(e) => {
                warn!(error = %e, "judge call failed");
                Verdict::new(0, &format!("Judge error: {}", e))
            }
        };

        apply_trap_rule(category, answer, verdict)
    }
}

/// Read a verdict out of raw model output.
///
/// The text is parsed as JSON directly; failing that, the span from the first
/// `{` to the last `}` is tried. `score` may be an integer, a float or a
/// numeric string and is clamped to `[0, 5]`. A missing `score` or `reason`
/// is a parse error.
pub fn parse_verdict(raw: &str) -> Verdict {
    let Some(json) = parse_object(raw) else {
        debug!(raw = %truncate_chars(raw, 200), "judge output is not JSON");
        return Verdict::parse_error();
    };

    let score = json.get("score").and_then(score_value);
    let reason = json.get("reason").and_then(|r| match r {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    });

    match (score, reason) {
        (Some(score), Some(reason)) => Verdict::new(score, &reason),
        _ => Verdict::parse_error(),
    }
}

fn parse_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn score_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
        }
        _ => None,
    }
}

/// Whether `answer` is a refusal: it opens with the refusal sentence,
/// `No documents found.` or a decline phrase, and does not go on to answer
/// anyway.
pub fn is_decline(answer: &str) -> bool {
    let lower = answer.trim().to_lowercase();
    let refusal = REFUSAL_SENTENCE.to_lowercase();
    let no_documents = NO_DOCUMENTS.to_lowercase();

    let opening = [refusal.as_str(), no_documents.as_str()]
        .into_iter()
        .chain(DECLINE_OPENINGS.iter().copied())
        .find(|p| lower.starts_with(p));

    match opening {
        Some(p) => {
            let rest = &lower[p.len()..];
            !CONTINUATIONS.iter().any(|c| rest.contains(c))
        }
        None => false,
    }
}

fn apply_trap_rule(category: QuestionCategory, answer: &str, verdict: Verdict) -> Verdict {
    if category == QuestionCategory::Trap && verdict.score < 5 && is_decline(answer) {
        return Verdict::new(5, "Declined an out-of-domain question");
    }
    verdict
}

fn category_guidance(category: QuestionCategory) -> &'static str {
    match category {
        QuestionCategory::Trap => "The bot MUST decline to answer or say it lacks information (score 5 if it declines, 0 if it invents an answer)",
        QuestionCategory::Basic => "Answer should be clear and accurate",
        QuestionCategory::Code => "Answer should include relevant code examples",
        QuestionCategory::Advanced => "Answer should be technically precise",
        QuestionCategory::Security | QuestionCategory::Testing => {
            "Answer should address the specific domain"
        }
    }
}

/// Rubric prompt sent to the judge model.
pub fn judge_prompt(
    domain: &str,
    question: &str,
    answer: &str,
    category: QuestionCategory,
    expected: &str,
) -> String {
    format!(
        "Act as an impartial technical judge evaluating a chatbot specialized in {domain}.\n\
         \n\
         QUESTION: \"{question}\"\n\
         QUESTION CATEGORY: \"{category}\"\n\
         EXPECTED BEHAVIOR: \"{expected}\"\n\
         BOT RESPONSE: \"{answer}\"\n\
         \n\
         EVALUATION CONTEXT:\n\
         - {guidance}\n\
         - A trap question scores 5 only if the bot declines or admits it lacks information, and 0 if it invents an answer\n\
         \n\
         SCORING RULES:\n\
         - 5: Perfect answer, follows expected behavior exactly\n\
         - 4: Good answer with minor imperfections\n\
         - 3: Partial answer, missing some important details\n\
         - 2: Weak answer, significant gaps or minor hallucinations\n\
         - 1: Poor answer, mostly incorrect or irrelevant\n\
         - 0: Complete failure, hallucination, or answering trap questions\n\
         \n\
         Give me a JSON with:\n\
         - \"score\": integer from 0 to 5\n\
         - \"reason\": short explanation in English (max 20 words)\n\
         \n\
         Reply ONLY with the JSON.",
        domain = domain,
        question = question,
        category = category,
        expected = expected,
        answer = answer,
        guidance = category_guidance(category),
    )
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
