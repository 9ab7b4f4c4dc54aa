//! Retrieval-augmented chat session.
//!
//! A [`ChatSession`] owns one conversation: the memory buffer (and with it
//! the transcript) plus the fixed system-instruction prefix. The LLM client
//! and retriever are shared handles.
//!
//! Each [`ChatSession::chat`] call sends:
//!
//! ```text
//! system:    <first instruction>\n<context template filled with top-K nodes>
//! system:    <remaining instructions…>
//! user/asst: <memory window…>
//! user:      <new text>
//! ```
//!
//! and commits the user/assistant pair to memory only once the model has
//! answered.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::ChatConfig;
use crate::memory::{estimate_message_tokens, ChatMemoryBuffer};
use crate::models::{ChatMessage, ChatResponse, MessageRole, RetrievedNode};
use crate::traits::{ChatModel, Retriever};

pub const DEFAULT_CONTEXT_TEMPLATE: &str =
    "Use the context information below to assist the user.\n--------------------\n{context}\n--------------------\n";

pub struct ChatSession {
    llm: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    memory: ChatMemoryBuffer,
    prefix_messages: Vec<ChatMessage>,
    context_template: String,
}

impl ChatSession {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        retriever: Arc<dyn Retriever>,
        memory: ChatMemoryBuffer,
        prefix_messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            llm,
            retriever,
            memory,
            prefix_messages,
            context_template: DEFAULT_CONTEXT_TEMPLATE.to_string(),
        }
    }

    /// Session configured from `[chat]`: every configured prompt becomes a
    /// system message, in order.
    pub fn from_config(
        llm: Arc<dyn ChatModel>,
        retriever: Arc<dyn Retriever>,
        config: &ChatConfig,
    ) -> Self {
        let prefix = config
            .system_prompts
            .iter()
            .map(ChatMessage::system)
            .collect();
        Self::new(
            llm,
            retriever,
            ChatMemoryBuffer::new(config.memory_token_limit),
            prefix,
        )
        .with_context_template(config.context_template.clone())
    }

    /// Replace the context template. `{context}` marks where retrieved
    /// node contents go.
    pub fn with_context_template(mut self, template: String) -> Self {
        self.context_template = template;
        self
    }

    /// Ordered transcript of every committed turn.
    pub fn history(&self) -> &[ChatMessage] {
        self.memory.all()
    }

    /// Run one retrieval-augmented turn.
    ///
    /// # Errors
    ///
    /// Retrieval or LLM failures propagate; the transcript is left exactly
    /// as it was.
    pub async fn chat(&mut self, text: &str) -> Result<ChatResponse> {
        let nodes = self
            .retriever
            .retrieve(text)
            .await
            .context("Retrieval failed")?;

        let messages = self.compose_messages(text, &nodes);

        let response = self
            .llm
            .complete(&messages)
            .await
            .with_context(|| format!("LLM request to {} failed", self.llm.model_name()))?;

        self.memory.put(ChatMessage::user(text));
        self.memory.put(ChatMessage::assistant(response.clone()));

        tracing::debug!(
            top_k = self.retriever.top_k(),
            sources = nodes.len(),
            history = self.memory.len(),
            "chat turn complete"
        );

        Ok(ChatResponse {
            response,
            sources: nodes,
        })
    }

    /// Full message list sent to the LLM for `text` given retrieved `nodes`.
    pub fn compose_messages(&self, text: &str, nodes: &[RetrievedNode]) -> Vec<ChatMessage> {
        let context_str = nodes
            .iter()
            .map(RetrievedNode::llm_content)
            .collect::<Vec<_>>()
            .join("\n\n");
        let context_block = self.context_template.replace("{context}", &context_str);

        let mut messages = Vec::with_capacity(self.prefix_messages.len() + self.memory.len() + 2);
        match self.prefix_messages.split_first() {
            Some((first, rest)) if first.role == MessageRole::System => {
                messages.push(ChatMessage::system(format!(
                    "{}\n{}",
                    first.content.trim(),
                    context_block
                )));
                messages.extend(rest.iter().cloned());
            }
            _ => {
                messages.push(ChatMessage::system(context_block));
                messages.extend(self.prefix_messages.iter().cloned());
            }
        }

        let user = ChatMessage::user(text);
        let initial_tokens = estimate_message_tokens(&messages)
            + estimate_message_tokens(std::slice::from_ref(&user));
        messages.extend(self.memory.window(initial_tokens));
        messages.push(user);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedRetriever;

    #[async_trait]
    impl Retriever for FixedRetriever {
        fn top_k(&self) -> usize {
            2
        }

        async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedNode>> {
            Ok(vec![
                RetrievedNode::new("n1", "Cancer is uncontrolled cell growth.", 0.9),
                RetrievedNode::new("n2", "Tumors can be benign or malignant.", 0.7),
            ])
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            Ok("Cancer is a disease of abnormal cell growth.".to_string())
        }
    }

    struct DownModel;

    #[async_trait]
    impl ChatModel for DownModel {
        fn model_name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            bail!("503 Service Unavailable")
        }
    }

    fn prefix() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are kind."),
            ChatMessage::system("Keep it short."),
        ]
    }

    #[tokio::test]
    async fn chat_appends_user_then_assistant() {
        let llm = Arc::new(RecordingModel::default());
        let mut session = ChatSession::new(
            llm.clone(),
            Arc::new(FixedRetriever),
            ChatMemoryBuffer::new(3000),
            prefix(),
        );

        let answer = session.chat("What is cancer?").await.unwrap();
        assert_eq!(answer.response, "Cancer is a disease of abnormal cell growth.");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(
            session.history(),
            &[
                ChatMessage::user("What is cancer?"),
                ChatMessage::assistant("Cancer is a disease of abnormal cell growth."),
            ]
        );

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let sent = &requests[0];
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].role, MessageRole::System);
        assert!(sent[0].content.starts_with("You are kind.\nUse the context information"));
        assert!(sent[0]
            .content
            .contains("Cancer is uncontrolled cell growth.\n\nTumors can be benign or malignant."));
        assert_eq!(sent[1], ChatMessage::system("Keep it short."));
        assert_eq!(sent[2], ChatMessage::user("What is cancer?"));
    }

    #[tokio::test]
    async fn memory_carries_into_next_turn() {
        let llm = Arc::new(RecordingModel::default());
        let mut session = ChatSession::new(
            llm.clone(),
            Arc::new(FixedRetriever),
            ChatMemoryBuffer::new(3000),
            prefix(),
        );

        session.chat("What is cancer?").await.unwrap();
        session.chat("Is it inherited?").await.unwrap();

        let requests = llm.requests.lock().unwrap();
        let second = &requests[1];
        let tail: Vec<&str> = second[2..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            tail,
            vec![
                "What is cancer?",
                "Cancer is a disease of abnormal cell growth.",
                "Is it inherited?"
            ]
        );
        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn failed_call_leaves_transcript_unchanged() {
        let mut session = ChatSession::new(
            Arc::new(DownModel),
            Arc::new(FixedRetriever),
            ChatMemoryBuffer::new(3000),
            prefix(),
        );

        let err = session.chat("What is cancer?").await.unwrap_err();
        assert!(format!("{:#}", err).contains("503"));
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn oversized_context_drops_history_but_keeps_request() {
        let llm = Arc::new(RecordingModel::default());
        let mut session = ChatSession::new(
            llm.clone(),
            Arc::new(FixedRetriever),
            ChatMemoryBuffer::new(200),
            prefix(),
        );
        session.chat("What is cancer?").await.unwrap();

        let small = [RetrievedNode::new("n1", "Short fact.", 0.9)];
        let messages = session.compose_messages("Is it inherited?", &small);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2], ChatMessage::user("What is cancer?"));

        // 1200 chars is roughly 300 tokens, over the 200-token limit on its own.
        let large = [RetrievedNode::new("big", "x".repeat(1200), 0.9)];
        let messages = session.compose_messages("Is it inherited?", &large);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains(&"x".repeat(1200)));
        assert_eq!(messages[1], ChatMessage::system("Keep it short."));
        assert_eq!(messages[2], ChatMessage::user("Is it inherited?"));
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn without_system_prefix_context_stands_alone() {
        let session = ChatSession::new(
            Arc::new(DownModel),
            Arc::new(FixedRetriever),
            ChatMemoryBuffer::new(3000),
            Vec::new(),
        )
        .with_context_template("CTX[{context}]".to_string());

        let messages = session.compose_messages("hi", &[RetrievedNode::new("n", "facts", 1.0)]);
        assert_eq!(
            messages,
            vec![ChatMessage::system("CTX[facts]"), ChatMessage::user("hi")]
        );
    }

    #[test]
    fn from_config_uses_all_prompts() {
        let config = ChatConfig::default();
        let session =
            ChatSession::from_config(Arc::new(DownModel), Arc::new(FixedRetriever), &config);
        let messages = session.compose_messages("q", &[]);
        // one merged context message + the two remaining prompts + user
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.starts_with("You are a kind and helpful chatbot"));
        assert_eq!(messages[3], ChatMessage::user("q"));
    }
}
