//! Mock implementations for testing
//!
//! These mocks enable end-to-end turn tests without network I/O. Storage is
//! the real database opened in memory.

use super::traits::*;
use crate::db::{ConversationDetail, DbError, DbResult, Message, Role};
use crate::llm::{LlmError, LlmRequest, LlmResponse, DEFAULT_MODEL_ID};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock Completion Client
// ============================================================================

/// Mock completion client that returns queued responses
pub struct MockCompletionClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    known_models: Vec<String>,
    delay: Option<Duration>,
    /// Record of all requests made, with the model they targeted
    pub requests: Mutex<Vec<(String, LlmRequest)>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            known_models: vec![DEFAULT_MODEL_ID.to_string()],
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.known_models = models.iter().map(|m| (*m).to_string()).collect();
        self
    }

    /// Sleep before answering, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful text response
    pub fn queue_reply(&self, text: &str) {
        self.queue_response(LlmResponse::text(text));
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<(String, LlmRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    fn resolve_model(&self, requested: &str) -> String {
        if self.known_models.iter().any(|m| m == requested) {
            requested.to_string()
        } else {
            self.known_models[0].clone()
        }
    }

    async fn complete(&self, model_id: &str, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((model_id.to_string(), request.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

// ============================================================================
// Mock Transcriber
// ============================================================================

pub struct MockTranscriber {
    results: Mutex<VecDeque<Result<String, LlmError>>>,
    /// (file name, media type, byte count) per call
    pub calls: Mutex<Vec<(String, String, usize)>>,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_text(&self, text: &str) {
        self.results.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_calls(&self) -> Vec<(String, String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, file_name: &str, media_type: &str, audio: &[u8]) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((file_name.to_string(), media_type.to_string(), audio.len()));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock transcription queued")))
    }
}

// ============================================================================
// Failing Store
// ============================================================================

/// Database-backed store that rejects appends of one role
pub struct FailingStore {
    inner: DatabaseStorage,
    fail_role: Role,
}

impl FailingStore {
    pub fn new(inner: DatabaseStorage, fail_role: Role) -> Self {
        Self { inner, fail_role }
    }
}

#[async_trait]
impl ConversationStore for FailingStore {
    async fn create_conversation(&self, assistant_id: &str) -> DbResult<ConversationDetail> {
        self.inner.create_conversation(assistant_id).await
    }

    async fn get_conversation(&self, conversation_id: &str) -> DbResult<ConversationDetail> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> DbResult<Message> {
        if role == self.fail_role {
            return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                Some("database or disk is full".to_string()),
            )));
        }
        self.inner.append_message(conversation_id, role, content).await
    }

    async fn clear_conversation(&self, conversation_id: &str) -> DbResult<Message> {
        self.inner.clear_conversation(conversation_id).await
    }

    async fn record_turn_failure(
        &self,
        conversation_id: &str,
        message_id: &str,
        kind: &str,
        detail: &str,
    ) -> DbResult<()> {
        self.inner
            .record_turn_failure(conversation_id, message_id, kind, detail)
            .await
    }
}

// ============================================================================
// End-to-end turn tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Assistant, Database, DeliveryStatus, NewAssistant};
    use crate::extract::Artifact;
    use crate::llm::MessageRole;
    use crate::runtime::{TurnOutcome, TurnRequest, TurnRuntime, TurnTarget};
    use crate::state_machine::{TurnContext, TurnErrorKind, FALLBACK_REPLY};
    use std::sync::Arc;

    type TestRuntime = TurnRuntime<DatabaseStorage, Arc<MockCompletionClient>, Arc<MockTranscriber>>;

    struct Harness {
        db: Database,
        llm: Arc<MockCompletionClient>,
        transcriber: Arc<MockTranscriber>,
        runtime: Arc<TestRuntime>,
        assistant: Assistant,
    }

    fn harness_with(llm: MockCompletionClient) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let assistant = db
            .create_assistant(&NewAssistant {
                name: "Helper".to_string(),
                model: DEFAULT_MODEL_ID.to_string(),
                personality: "friendly".to_string(),
                instructions: "You are a helpful assistant.".to_string(),
                channel_address: None,
            })
            .unwrap();
        let llm = Arc::new(llm);
        let transcriber = Arc::new(MockTranscriber::new());
        let runtime = Arc::new(TurnRuntime::new(
            DatabaseStorage::new(db.clone()),
            Arc::clone(&llm),
            Arc::clone(&transcriber),
            TurnContext::default(),
        ));
        Harness {
            db,
            llm,
            transcriber,
            runtime,
            assistant,
        }
    }

    fn harness() -> Harness {
        harness_with(MockCompletionClient::new())
    }

    fn replied(outcome: TurnOutcome) -> (String, String) {
        match outcome {
            TurnOutcome::Replied { conversation_id, reply } => (conversation_id, reply),
            other @ TurnOutcome::History { .. } => panic!("expected reply, got {other:?}"),
        }
    }

    fn file_request(conversation_id: &str, artifact: Artifact) -> TurnRequest {
        TurnRequest::new(Some(conversation_id.to_string()), None, None, Some(artifact)).unwrap()
    }

    #[tokio::test]
    async fn test_assistant_turn_creates_conversation_and_exchange() {
        let h = harness();
        h.llm.queue_reply("Hello! How can I help?");

        let outcome = h
            .runtime
            .run_turn(TurnRequest::text(TurnTarget::Assistant(h.assistant.id.clone()), "Hello"))
            .await
            .unwrap();
        let (conv_id, reply) = replied(outcome);
        assert_eq!(reply, "Hello! How can I help?");

        let conversations = h.db.list_conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].conversation.id, conv_id);

        let messages = h.db.get_messages(&conv_id).unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(messages[0].content, "You are a helpful assistant.");
        assert_eq!(messages[1].content, "Hello");

        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        let (model, request) = &requests[0];
        assert_eq!(model, DEFAULT_MODEL_ID);
        assert_eq!(request.system, "You are a helpful assistant.");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.final_entry(), Some("Hello"));
        assert_eq!(request.max_tokens, Some(1_000));
    }

    #[tokio::test]
    async fn test_prompt_includes_prior_turns_in_order() {
        let h = harness();
        h.llm.queue_reply("It is sunny.");
        h.llm.queue_reply("Take sunglasses.");

        let (conv_id, _) = replied(
            h.runtime
                .run_turn(TurnRequest::text(TurnTarget::Assistant(h.assistant.id.clone()), "Weather?"))
                .await
                .unwrap(),
        );
        h.runtime
            .run_turn(TurnRequest::text(TurnTarget::Conversation(conv_id.clone()), "Advice?"))
            .await
            .unwrap();

        let requests = h.llm.recorded_requests();
        let (_, second) = &requests[1];
        let entries: Vec<_> = second
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![
                (MessageRole::User, "Weather?"),
                (MessageRole::Assistant, "It is sunny."),
                (MessageRole::User, "Advice?"),
            ]
        );
        assert_eq!(h.db.get_messages(&conv_id).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_multiline_message_within_budget_is_kept_verbatim() {
        let h = harness();
        h.llm.queue_reply("Noted.");
        let text = "Shopping list:\n- eggs\n- milk\n\n  Thanks!";

        let outcome = h
            .runtime
            .run_turn(TurnRequest::text(TurnTarget::Assistant(h.assistant.id.clone()), text))
            .await
            .unwrap();
        let (conv_id, _) = replied(outcome);

        assert_eq!(h.db.get_messages(&conv_id).unwrap()[1].content, text);
        let (_, request) = &h.llm.recorded_requests()[0];
        assert_eq!(request.final_entry(), Some(text));
    }

    #[tokio::test]
    async fn test_fetch_mode_returns_visible_history_without_writes() {
        let h = harness();
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;
        h.db.append_message(&conv.id, Role::User, "Hi").unwrap();
        h.db.append_message(&conv.id, Role::Assistant, "Hello").unwrap();

        let outcome = h
            .runtime
            .run_turn(TurnRequest::new(Some(conv.id.clone()), None, None, None).unwrap())
            .await
            .unwrap();

        match outcome {
            TurnOutcome::History { conversation_id, messages } => {
                assert_eq!(conversation_id, conv.id);
                let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, vec!["Hi", "Hello"]);
            }
            other @ TurnOutcome::Replied { .. } => panic!("expected history, got {other:?}"),
        }
        assert_eq!(h.db.get_messages(&conv.id).unwrap().len(), 3);
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_conversation_is_not_found_without_side_effects() {
        let h = harness();
        let err = h
            .runtime
            .run_turn(TurnRequest::text(TurnTarget::Conversation("C1".into()), "Hello"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, TurnErrorKind::NotFound);
        assert!(h.db.list_conversations().unwrap().is_empty());
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_assistant_is_not_found() {
        let h = harness();
        let err = h
            .runtime
            .run_turn(TurnRequest::text(TurnTarget::Assistant("nope".into()), "Hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TurnErrorKind::NotFound);
        assert!(h.db.list_conversations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_text_file_is_truncated_to_budget() {
        let h = harness();
        h.llm.queue_reply("Summary.");
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;

        let body = (0..40_000).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let artifact = Artifact::new("big.txt", Some("text/plain".into()), body.into_bytes());
        h.runtime.run_turn(file_request(&conv.id, artifact)).await.unwrap();

        let messages = h.db.get_messages(&conv.id).unwrap();
        let stored = &messages[1].content;
        let header = "Uploaded file: big.txt\n\nFile content:\n";
        let content = stored.strip_prefix(header).unwrap();
        assert_eq!(content.split_whitespace().count(), 32_000);

        let (_, request) = &h.llm.recorded_requests()[0];
        let final_entry = request.final_entry().unwrap();
        let prefix = "Please analyze the following file content:\n\n";
        let content = final_entry.strip_prefix(prefix).unwrap();
        assert_eq!(content.split_whitespace().count(), 32_000);
        assert!(final_entry.ends_with("word31999"));
    }

    #[tokio::test]
    async fn test_large_text_message_is_truncated_to_budget() {
        let h = harness();
        h.llm.queue_reply("ok");
        let text = vec!["w"; 33_000].join(" ");

        let (conv_id, _) = replied(
            h.runtime
                .run_turn(TurnRequest::text(TurnTarget::Assistant(h.assistant.id.clone()), text))
                .await
                .unwrap(),
        );

        let stored = &h.db.get_messages(&conv_id).unwrap()[1].content;
        assert_eq!(stored.split_whitespace().count(), 32_000);
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_user_message_and_marks_it_failed() {
        let h = harness();
        h.llm.queue_error(LlmError::server_error("Server error: upstream unavailable"));
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;

        let err = h
            .runtime
            .run_turn(TurnRequest::text(TurnTarget::Conversation(conv.id.clone()), "Hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TurnErrorKind::ProviderError);

        let messages = h.db.get_messages(&conv.id).unwrap();
        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);

        let public = h.db.get_public_messages(&conv.id).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].status, Some(DeliveryStatus::Failed));
        assert!(public[0].failure.as_deref().unwrap().contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn test_resubmitting_after_failure_answers_new_message() {
        let h = harness();
        h.llm.queue_error(LlmError::network("timeout"));
        h.llm.queue_reply("Back online.");
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;
        let target = TurnTarget::Conversation(conv.id.clone());

        assert!(h.runtime.run_turn(TurnRequest::text(target.clone(), "Hello")).await.is_err());
        h.runtime.run_turn(TurnRequest::text(target, "Hello")).await.unwrap();

        let statuses: Vec<_> = h
            .db
            .get_public_messages(&conv.id)
            .unwrap()
            .into_iter()
            .map(|m| m.status)
            .collect();
        assert_eq!(
            statuses,
            vec![Some(DeliveryStatus::Failed), Some(DeliveryStatus::Answered), None]
        );
    }

    #[tokio::test]
    async fn test_empty_reply_is_replaced_by_fallback() {
        let h = harness();
        h.llm.queue_response(LlmResponse::default());

        let (conv_id, reply) = replied(
            h.runtime
                .run_turn(TurnRequest::text(TurnTarget::Assistant(h.assistant.id.clone()), "Hi"))
                .await
                .unwrap(),
        );
        assert_eq!(reply, FALLBACK_REPLY);
        let messages = h.db.get_messages(&conv_id).unwrap();
        assert_eq!(messages[2].content, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_audio_file_is_transcribed() {
        let h = harness();
        h.transcriber.queue_text("please summarize the meeting");
        h.llm.queue_reply("Meeting summary.");
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;

        let artifact = Artifact::new("meeting.mp3", Some("audio/mpeg".into()), vec![0u8; 64]);
        h.runtime.run_turn(file_request(&conv.id, artifact)).await.unwrap();

        assert_eq!(
            h.transcriber.recorded_calls(),
            vec![("meeting.mp3".to_string(), "audio/mpeg".to_string(), 64)]
        );
        let messages = h.db.get_messages(&conv.id).unwrap();
        assert_eq!(
            messages[1].content,
            "Uploaded file: meeting.mp3\n\nFile content:\nplease summarize the meeting"
        );
    }

    #[tokio::test]
    async fn test_transcription_failure_is_extraction_error_without_writes() {
        let h = harness();
        h.transcriber.queue_error(LlmError::auth("bad key"));
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;

        let artifact = Artifact::new("memo.wav", None, vec![1, 2, 3]);
        let err = h.runtime.run_turn(file_request(&conv.id, artifact)).await.unwrap_err();

        assert_eq!(err.kind, TurnErrorKind::ExtractionError);
        assert_eq!(h.db.get_messages(&conv.id).unwrap().len(), 1);
        assert!(h.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_file_is_rejected_without_writes() {
        let h = harness();
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;

        let artifact = Artifact::new("paper.pdf", Some("application/pdf".into()), b"%PDF".to_vec());
        let err = h.runtime.run_turn(file_request(&conv.id, artifact)).await.unwrap_err();

        assert_eq!(err.kind, TurnErrorKind::UnsupportedFormat);
        assert_eq!(h.db.get_messages(&conv.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assistant_model_used_when_available() {
        let h = harness_with(MockCompletionClient::new().with_models(&[DEFAULT_MODEL_ID, "gpt-4o"]));
        let custom = h
            .db
            .create_assistant(&NewAssistant {
                name: "Analyst".into(),
                model: "gpt-4o".into(),
                personality: "precise".into(),
                instructions: "Answer with numbers.".into(),
                channel_address: None,
            })
            .unwrap();
        let unknown = h
            .db
            .create_assistant(&NewAssistant {
                name: "Legacy".into(),
                model: "mixtral-8x7b".into(),
                personality: "calm".into(),
                instructions: "Be calm.".into(),
                channel_address: None,
            })
            .unwrap();
        h.llm.queue_reply("42");
        h.llm.queue_reply("Relax.");

        for assistant in [&custom, &unknown] {
            h.runtime
                .run_turn(TurnRequest::text(TurnTarget::Assistant(assistant.id.clone()), "Go"))
                .await
                .unwrap();
        }

        let models: Vec<_> = h.llm.recorded_requests().into_iter().map(|(m, _)| m).collect();
        assert_eq!(models, vec!["gpt-4o".to_string(), DEFAULT_MODEL_ID.to_string()]);
    }

    #[tokio::test]
    async fn test_clear_leaves_only_seed() {
        let h = harness();
        h.llm.queue_reply("Hi!");
        let (conv_id, _) = replied(
            h.runtime
                .run_turn(TurnRequest::text(TurnTarget::Assistant(h.assistant.id.clone()), "Hello"))
                .await
                .unwrap(),
        );

        let seed = h.runtime.clear(&conv_id).await.unwrap();

        let messages = h.db.get_messages(&conv_id).unwrap();
        assert_eq!(messages, vec![seed]);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            h.runtime.clear("missing").await.unwrap_err().kind,
            TurnErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_conversation_do_not_interleave() {
        let h = harness_with(MockCompletionClient::new().with_delay(Duration::from_millis(5)));
        let conv = h.db.create_conversation(&h.assistant.id).unwrap().conversation;
        for i in 0..6 {
            h.llm.queue_reply(&format!("reply {i}"));
        }

        let mut handles = Vec::new();
        for i in 0..6 {
            let runtime = Arc::clone(&h.runtime);
            let target = TurnTarget::Conversation(conv.id.clone());
            handles.push(tokio::spawn(async move {
                runtime.run_turn(TurnRequest::text(target, format!("question {i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let messages = h.db.get_messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 13);
        for (idx, message) in messages.iter().enumerate().skip(1) {
            let expected = if idx % 2 == 1 { Role::User } else { Role::Assistant };
            assert_eq!(message.role, expected, "message {idx} out of order");
        }
        for pair in messages.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_reply_storage_failure_is_storage_error_and_marks_message() {
        let db = Database::open_in_memory().unwrap();
        let assistant = db
            .create_assistant(&NewAssistant {
                name: "n".into(),
                model: DEFAULT_MODEL_ID.into(),
                personality: "p".into(),
                instructions: "i".into(),
                channel_address: None,
            })
            .unwrap();
        let conv = db.create_conversation(&assistant.id).unwrap().conversation;
        let llm = MockCompletionClient::new();
        llm.queue_reply("lost reply");
        let runtime = TurnRuntime::new(
            FailingStore::new(DatabaseStorage::new(db.clone()), Role::Assistant),
            llm,
            MockTranscriber::new(),
            TurnContext::default(),
        );

        let err = runtime
            .run_turn(TurnRequest::text(TurnTarget::Conversation(conv.id.clone()), "Hi"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, TurnErrorKind::StorageError);
        let public = db.get_public_messages(&conv.id).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].status, Some(DeliveryStatus::Failed));
    }
}
