//! Retrieval-augmented answering.
//!
//! [`RagService::answer`] embeds the question, takes the `top_k` nearest
//! chunks of the chosen collection, and asks the chat model to answer using
//! only that context. It never fails: oracle and storage errors come back as
//! a `"Technical error: ..."` answer so a benchmark run always completes.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use futures::{stream, StreamExt};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::OracleError;
use crate::gateway::{ChatRequest, ModelGateway, OllamaGateway, TokenStream};
use crate::models::Collection;
use crate::store::{SqliteStore, VectorStore};

/// Answer returned when retrieval finds nothing.
pub const NO_DOCUMENTS: &str = "No documents found.";
/// Answer returned when the chat model replies without content.
pub const GENERATION_ERROR: &str = "Generation error";
/// Prefix of answers produced from a caught failure.
pub const TECHNICAL_ERROR_PREFIX: &str = "Technical error: ";
/// Sentence the assistant is told to use when the context lacks the answer.
pub const REFUSAL_SENTENCE: &str =
    "I don't have enough information in the documentation to answer this question.";

const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub chat_model: String,
    pub temperature: f32,
    pub top_k: usize,
    pub domain: String,
}

impl RagSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_model: config.ollama.chat_model.clone(),
            temperature: config.ollama.temperature,
            top_k: config.retrieval.top_k,
            domain: config.assistant.domain.clone(),
        }
    }
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chat_model: "mistral".to_string(),
            temperature: 0.0,
            top_k: 3,
            domain: "API Platform and Symfony".to_string(),
        }
    }
}

pub struct RagService {
    gateway: Arc<dyn ModelGateway>,
    store: Arc<dyn VectorStore>,
    settings: RagSettings,
}

impl RagService {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        store: Arc<dyn VectorStore>,
        settings: RagSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Answer `question` from the `source` collection. Never fails.
    pub async fn answer(&self, question: &str, source: Collection) -> String {
        match self.try_answer(question, source).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(source = %source, error = %e, "answer failed");
                format!("{}{}", TECHNICAL_ERROR_PREFIX, e)
            }
        }
    }

    async fn try_answer(&self, question: &str, source: Collection) -> Result<String> {
        let Some(context) = self.retrieve_context(question, source).await? else {
            return Ok(NO_DOCUMENTS.to_string());
        };

        let request = self.chat_request(question, &context);
        let content = self.gateway.generate(&request).await?;
        Ok(content.unwrap_or_else(|| GENERATION_ERROR.to_string()))
    }

    /// Streaming variant of [`answer`](Self::answer).
    ///
    /// Empty retrieval and setup failures yield a single-item stream carrying
    /// the sentinel text. Errors raised mid-stream are passed through.
    pub async fn answer_stream(&self, question: &str, source: Collection) -> TokenStream {
        let context = match self.retrieve_context(question, source).await {
            Ok(Some(context)) => context,
            Ok(None) => return single(NO_DOCUMENTS.to_string()),
            Err(e) => {
                warn!(source = %source, error = %e, "streamed answer failed");
                return single(format!("{}{}", TECHNICAL_ERROR_PREFIX, e));
            }
        };

        let request = self.chat_request(question, &context);
        match self.gateway.generate_stream(&request).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(source = %source, error = %e, "stream setup failed");
                single(format!("{}{}", TECHNICAL_ERROR_PREFIX, e))
            }
        }
    }

    /// Embed arbitrary text with the configured embedding model.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
        self.gateway.embed(text).await
    }

    async fn retrieve_context(&self, question: &str, source: Collection) -> Result<Option<String>> {
        let vector = self.gateway.embed(question).await?;
        let rows = self
            .store
            .nearest_neighbors(source, &vector, self.settings.top_k)
            .await?;
        debug!(source = %source, hits = rows.len(), "retrieved context");

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows.join(CONTEXT_SEPARATOR)))
    }

    fn chat_request(&self, question: &str, context: &str) -> ChatRequest {
        ChatRequest::new(&self.settings.chat_model)
            .system(system_prompt(&self.settings.domain, context))
            .user(question)
            .temperature(self.settings.temperature)
    }
}

fn single(text: String) -> TokenStream {
    Box::pin(stream::iter(vec![Ok(text)]))
}

/// Grounding prompt restricting the assistant to `context`.
pub fn system_prompt(domain: &str, context: &str) -> String {
    format!(
        "You are an expert AI assistant specialized in {domain}.\n\
         \n\
         STRICT RULES:\n\
         1. Answer ONLY based on the provided context below\n\
         2. If the context doesn't contain the answer, respond: \"{refusal}\"\n\
         3. Do NOT invent or hallucinate information\n\
         4. Provide code examples when available in the context\n\
         5. Be concise and technical\n\
         6. If asked about topics unrelated to {domain}, politely decline\n\
         \n\
         CONTEXT:\n\
         {context}",
        domain = domain,
        refusal = REFUSAL_SENTENCE,
        context = context,
    )
}

/// `ragbench ask`: answer one question, optionally streaming tokens to stdout.
pub async fn run_ask(config: &Config, question: &str, source: &str, stream: bool) -> Result<()> {
    let source: Collection = source.parse()?;
    let gateway: Arc<dyn ModelGateway> = Arc::new(OllamaGateway::new(&config.ollama)?);
    let store = Arc::new(SqliteStore::open(config).await?);
    let rag = RagService::new(gateway, store.clone(), RagSettings::from_config(config));

    if stream {
        let mut tokens = rag.answer_stream(question, source).await;
        let mut out = std::io::stdout();
        while let Some(token) = tokens.next().await {
            match token {
                Ok(text) => {
                    out.write_all(text.as_bytes())?;
                    out.flush()?;
                }
                Err(e) => {
                    warn!(error = %e, "stream interrupted");
                    break;
                }
            }
        }
        println!();
    } else {
        println!("{}", rag.answer(question, source).await);
    }

    store.close().await;
    Ok(())
}
