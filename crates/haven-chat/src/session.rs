//! Chat session: drives streamed turns over a conversation

use futures::StreamExt;
use haven_ai::Message;
use haven_search::SearchBackend;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    backend::ModelBackend,
    conversation::Conversation,
    error::Result,
    events::SessionEvent,
    prompt::SYSTEM_PROMPT,
    tool::{StateNotifier, ToolRegistry},
    tools::document_tools,
};

/// How a submitted turn ended
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The stream finished; carries the finalized assistant message
    Completed(Message),
    /// The turn was cancelled or superseded by a newer one
    Cancelled,
}

/// One chat session: transcript, tools, and at most one streaming turn.
///
/// Methods take `&self` so a session can be shared (e.g. in an `Arc`) between
/// the task driving a turn and the code that cancels it.
pub struct ChatSession {
    id: Uuid,
    backend: Arc<dyn ModelBackend>,
    search: Arc<dyn SearchBackend>,
    system_prompt: String,
    state: Mutex<Conversation>,
    tools: Mutex<Arc<ToolRegistry>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Create an initialized session using the default system prompt
    pub fn new(backend: Arc<dyn ModelBackend>, search: Arc<dyn SearchBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let session = Self {
            id: Uuid::new_v4(),
            backend,
            search,
            system_prompt: SYSTEM_PROMPT.to_string(),
            state: Mutex::new(Conversation::default()),
            tools: Mutex::new(Arc::new(ToolRegistry::new())),
            event_tx,
        };
        session.initialize();
        session
    }

    /// Replace the system prompt and reinitialize
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self.initialize();
        self
    }

    /// Unique id of this session, used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    /// Reset the transcript to the system prompt and register the tools.
    /// A turn still streaming is cancelled first.
    pub fn initialize(&self) {
        self.cancel_current();
        self.state.lock().initialize(&self.system_prompt);
        let notifier = StateNotifier::new(self.event_tx.clone());
        *self.tools.lock() = Arc::new(document_tools(self.search.clone(), notifier));
    }

    /// Snapshot of the finalized transcript
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages().to_vec()
    }

    /// Snapshot of the assistant message currently streaming
    pub fn pending_message(&self) -> Option<Message> {
        self.state.lock().pending().cloned()
    }

    pub fn resend_from(&self) -> usize {
        self.state.lock().resend_from()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.state.lock().conversation_id().map(str::to_string)
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().is_streaming()
    }

    /// Names of the registered tools
    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .lock()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Submit a user message and stream the assistant's reply.
    ///
    /// Any turn already streaming is cancelled first, keeping its partial
    /// output. Returns [`TurnOutcome::Cancelled`] if this turn is itself
    /// cancelled before the stream ends. On a backend error the partial
    /// reply is kept only if it has meaningful content, and the error is
    /// returned.
    pub async fn submit_user_message(&self, message: Message) -> Result<TurnOutcome> {
        self.cancel_current();

        let turn = self.state.lock().begin_turn(message);
        let tools = self.tools.lock().clone();
        tracing::debug!(
            "Session {} turn {} started, sending {} message(s)",
            self.id,
            turn.id,
            turn.messages.len()
        );

        let stream = self
            .backend
            .stream(turn.messages, tools, turn.options, turn.cancel.clone())
            .await;
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => return self.fail_turn(turn.id, e.into()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Err(e)) => return self.fail_turn(turn.id, e.into()),
                Some(Ok(update)) => {
                    let snapshot = self.state.lock().apply_update(turn.id, &update);
                    match snapshot {
                        Some(message) => self.emit(SessionEvent::MessageStreamed { message }),
                        None => return Ok(TurnOutcome::Cancelled),
                    }
                }
            }
        }

        let completed = self.state.lock().complete_turn(turn.id);
        match completed {
            Some(message) => {
                tracing::debug!("Session {} turn {} completed", self.id, turn.id);
                self.emit(SessionEvent::TurnCompleted {
                    message: message.clone(),
                });
                Ok(TurnOutcome::Completed(message))
            }
            None => Ok(TurnOutcome::Cancelled),
        }
    }

    /// Convenience wrapper around [`submit_user_message`](Self::submit_user_message)
    pub async fn submit_text(&self, text: &str) -> Result<TurnOutcome> {
        self.submit_user_message(Message::user(text)).await
    }

    fn fail_turn(&self, turn_id: u64, error: crate::Error) -> Result<TurnOutcome> {
        {
            let mut state = self.state.lock();
            if !state.is_current(turn_id) {
                return Ok(TurnOutcome::Cancelled);
            }
            state.fail_turn(turn_id);
        }
        tracing::warn!("Session {} turn {} failed: {}", self.id, turn_id, error);
        self.emit(SessionEvent::TurnFailed {
            error: error.to_string(),
        });
        Err(error)
    }

    /// Finalize the partial reply of the streaming turn, if any, and cancel
    /// it. No-op when nothing is streaming.
    pub fn cancel_current(&self) -> Option<Message> {
        let (was_streaming, finalized) = {
            let mut state = self.state.lock();
            let was_streaming = state.is_streaming();
            (was_streaming, state.cancel_pending())
        };
        if was_streaming {
            tracing::debug!("Cancelled streaming turn");
            self.emit(SessionEvent::TurnCancelled);
        }
        finalized
    }

    /// Cancel, forget the server-side conversation, and reinitialize
    pub fn reset(&self) {
        self.cancel_current();
        self.state.lock().reset(&self.system_prompt);
        self.initialize();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.state.get_mut().cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FunctionInvokingBackend, RetryConfig, TurnOptions};
    use async_stream::stream;
    use async_trait::async_trait;
    use haven_ai::{
        ChatClient, ChatRequest, ChatUpdate, ChatUpdateStream, Content, Role,
    };
    use haven_search::SearchHit;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    type UpdateSender = mpsc::UnboundedSender<haven_ai::Result<ChatUpdate>>;

    /// Each turn streams whatever the test pushes into its channel
    #[derive(Default)]
    struct ChannelBackend {
        turns: Mutex<VecDeque<mpsc::UnboundedReceiver<haven_ai::Result<ChatUpdate>>>>,
        calls: Mutex<Vec<(Vec<Message>, TurnOptions, CancellationToken)>>,
    }

    impl ChannelBackend {
        fn push_turn(&self) -> UpdateSender {
            let (tx, rx) = mpsc::unbounded_channel();
            self.turns.lock().push_back(rx);
            tx
        }

        /// Queue a turn that streams `updates` and ends
        fn script_turn(&self, updates: Vec<ChatUpdate>) {
            let tx = self.push_turn();
            for update in updates {
                tx.send(Ok(update)).unwrap();
            }
        }
    }

    #[async_trait]
    impl ModelBackend for ChannelBackend {
        async fn stream(
            &self,
            messages: Vec<Message>,
            _tools: Arc<ToolRegistry>,
            options: TurnOptions,
            cancel: CancellationToken,
        ) -> haven_ai::Result<ChatUpdateStream> {
            self.calls.lock().push((messages, options, cancel));
            let rx = self.turns.lock().pop_front();
            Ok(Box::pin(stream! {
                if let Some(mut rx) = rx {
                    while let Some(item) = rx.recv().await {
                        yield item;
                    }
                }
            }))
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchBackend for NoSearch {
        async fn load_documents(&self) -> haven_search::Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _phrase: &str,
            _filename_filter: Option<&str>,
            _max_results: usize,
        ) -> haven_search::Result<Vec<SearchHit>> {
            Ok(vec![])
        }
    }

    fn session() -> (Arc<ChatSession>, Arc<ChannelBackend>) {
        let backend = Arc::new(ChannelBackend::default());
        let session = ChatSession::new(backend.clone(), Arc::new(NoSearch));
        (Arc::new(session), backend)
    }

    async fn wait_for_streamed(rx: &mut broadcast::Receiver<SessionEvent>, count: usize) {
        let mut seen = 0;
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen < count {
                if let SessionEvent::MessageStreamed { .. } = rx.recv().await.unwrap() {
                    seen += 1;
                }
            }
        })
        .await
        .expect("timed out waiting for stream updates");
    }

    fn texts(session: &ChatSession) -> Vec<String> {
        session.messages().iter().map(|m| m.text()).collect()
    }

    #[test]
    fn test_initialized_with_system_prompt_and_tools() {
        let (session, _) = session();
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].text(), SYSTEM_PROMPT);
        assert_eq!(session.resend_from(), 0);
        assert_eq!(session.tool_names(), vec!["LoadDocuments", "Search"]);
    }

    #[tokio::test]
    async fn test_turn_without_conversation_id_resends_everything() {
        let (session, backend) = session();
        backend.script_turn(vec![ChatUpdate::text_delta("Hi "), ChatUpdate::text_delta("there")]);
        backend.script_turn(vec![ChatUpdate::text_delta("Again")]);

        let outcome = session.submit_text("hello").await.unwrap();
        match outcome {
            TurnOutcome::Completed(message) => assert_eq!(message.text(), "Hi there"),
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(session.resend_from(), 0);

        session.submit_text("more").await.unwrap();

        let calls = backend.calls.lock();
        assert_eq!(calls[0].0.len(), 2);
        assert_eq!(calls[1].0.len(), 4);
        assert!(calls[1].1.conversation_id.is_none());
        assert_eq!(session.resend_from(), 0);
        assert_eq!(session.messages().len(), 5);
    }

    #[tokio::test]
    async fn test_conversation_id_limits_resend() {
        let (session, backend) = session();
        backend.script_turn(vec![
            ChatUpdate::text_delta("first").with_conversation_id("conv1"),
            ChatUpdate::text_delta("!"),
        ]);
        backend.script_turn(vec![ChatUpdate::text_delta("second")]);

        session.submit_text("one").await.unwrap();
        assert_eq!(session.resend_from(), session.messages().len());
        assert_eq!(session.conversation_id().as_deref(), Some("conv1"));

        session.submit_text("two").await.unwrap();

        let calls = backend.calls.lock();
        let second = &calls[1].0;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].text(), "two");
        assert_eq!(calls[1].1.conversation_id.as_deref(), Some("conv1"));
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_keeps_partial_text() {
        let (session, backend) = session();
        let tx = backend.push_turn();
        let mut events = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("tell me").await }
        });

        for delta in ["Hel", "lo ", "world"] {
            tx.send(Ok(ChatUpdate::text_delta(delta))).unwrap();
        }
        wait_for_streamed(&mut events, 3).await;

        let finalized = session.cancel_current().unwrap();
        assert_eq!(finalized.text(), "Hello world");

        let _ = tx.send(Ok(ChatUpdate::text_delta(" late")));
        assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Cancelled);

        let last = session.messages().last().cloned().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), "Hello world");
        assert!(session.pending_message().is_none());
        assert!(!session.is_streaming());
        assert!(backend.calls.lock()[0].2.is_cancelled());
    }

    #[tokio::test]
    async fn test_new_message_supersedes_streaming_turn() {
        let (session, backend) = session();
        let tx_a = backend.push_turn();
        let tx_b = backend.push_turn();
        let mut events = session.subscribe();

        let task_a = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("A").await }
        });
        tx_a.send(Ok(ChatUpdate::text_delta("partial A"))).unwrap();
        wait_for_streamed(&mut events, 1).await;

        let task_b = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("B").await }
        });
        assert_eq!(task_a.await.unwrap().unwrap(), TurnOutcome::Cancelled);

        tx_b.send(Ok(ChatUpdate::text_delta("answer B"))).unwrap();
        drop(tx_b);
        let outcome = task_b.await.unwrap().unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed(ref m) if m.text() == "answer B"));

        assert_eq!(texts(&session)[1..], ["A", "partial A", "B", "answer B"]);
        let calls = backend.calls.lock();
        assert!(calls[0].2.is_cancelled());
        assert!(!calls[1].2.is_cancelled());
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_and_keeps_partial() {
        let (session, backend) = session();
        let tx = backend.push_turn();
        tx.send(Ok(ChatUpdate::text_delta("partial"))).unwrap();
        tx.send(Err(haven_ai::Error::Sse("connection reset".into())))
            .unwrap();
        let mut events = session.subscribe();

        let result = session.submit_text("q").await;

        assert!(result.is_err());
        assert_eq!(texts(&session)[1..], ["q", "partial"]);
        assert!(session.pending_message().is_none());
        assert!(!session.is_streaming());
        assert_eq!(session.resend_from(), 0);

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, SessionEvent::TurnFailed { .. });
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn test_tool_calls_are_recorded_in_transcript() {
        let (session, backend) = session();
        let call = ChatUpdate::with_contents(
            Role::Assistant,
            vec![Content::tool_call("c1", "Search", serde_json::json!({}))],
        );
        let result = ChatUpdate::with_contents(
            Role::Tool,
            vec![Content::tool_result("c1", "[]", false)],
        );
        backend.script_turn(vec![call, result, ChatUpdate::text_delta("Nothing found.")]);

        session.submit_text("search").await.unwrap();

        let messages = session.messages();
        assert_eq!(messages.len(), 5);
        assert!(messages[2].content[0].is_tool_call());
        assert_eq!(messages[3].role, Role::Tool);
        assert_eq!(messages[4].text(), "Nothing found.");
    }

    #[tokio::test]
    async fn test_reset_matches_fresh_session() {
        let (session, backend) = session();
        backend.script_turn(vec![ChatUpdate::text_delta("x").with_conversation_id("conv1")]);
        session.submit_text("q").await.unwrap();

        session.reset();

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.resend_from(), 0);
        assert!(session.conversation_id().is_none());
        assert_eq!(session.tool_names().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_without_stream_is_noop() {
        let (session, _) = session();
        let mut events = session.subscribe();
        assert!(session.cancel_current().is_none());
        assert_eq!(session.messages().len(), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels_active_turn() {
        let backend = Arc::new(ChannelBackend::default());
        let tx = backend.push_turn();
        let session = Arc::new(ChatSession::new(backend.clone(), Arc::new(NoSearch)));
        let mut events = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("q").await.map(|_| ()) }
        });
        tx.send(Ok(ChatUpdate::text_delta("."))).unwrap();
        wait_for_streamed(&mut events, 1).await;

        task.abort();
        let _ = task.await;
        drop(session);

        assert!(backend.calls.lock()[0].2.is_cancelled());
    }

    // End-to-end through the function-invoking backend and the real tools

    struct ScriptedClient {
        responses: Mutex<VecDeque<Vec<ChatUpdate>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Vec<ChatUpdate>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from(responses)),
                requests: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn stream(&self, request: &ChatRequest) -> haven_ai::Result<ChatUpdateStream> {
            self.requests.lock().push(request.clone());
            let updates = self.responses.lock().pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(updates.into_iter().map(Ok))))
        }
    }

    struct GuideSearch;

    #[async_trait]
    impl SearchBackend for GuideSearch {
        async fn load_documents(&self) -> haven_search::Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _phrase: &str,
            _filename_filter: Option<&str>,
            _max_results: usize,
        ) -> haven_search::Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                document_id: "guide.md".into(),
                text: "The flood shelter is the school.".into(),
                score: 0.9,
            }])
        }
    }

    #[tokio::test]
    async fn test_state_changed_once_per_tool_invocation() {
        let client = ScriptedClient::new(vec![
                vec![ChatUpdate::with_contents(
                    Role::Assistant,
                    vec![Content::tool_call("c1", "LoadDocuments", serde_json::json!({}))],
                )],
                vec![ChatUpdate::with_contents(
                    Role::Assistant,
                    vec![Content::tool_call(
                        "c2",
                        "Search",
                        serde_json::json!({"searchPhrase": "flood shelter"}),
                    )],
                )],
                vec![ChatUpdate::text_delta(
                    "Go to the school.\n<citation filename='guide.md'>flood shelter is the school</citation>",
                )],
            ]);
        let backend = FunctionInvokingBackend::new(client, "m").with_retry_config(RetryConfig::none());
        let session = ChatSession::new(Arc::new(backend), Arc::new(GuideSearch));
        let mut events = session.subscribe();

        let outcome = session.submit_text("Where is the flood shelter?").await.unwrap();

        let mut tools_notified = vec![];
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::StateChanged { tool } = event {
                tools_notified.push(tool);
            }
        }
        assert_eq!(tools_notified, vec!["LoadDocuments", "Search"]);

        let TurnOutcome::Completed(message) = outcome else {
            panic!("expected completion");
        };
        let (prose, citations) = crate::citation::split_citations(&message.text());
        assert_eq!(prose, "Go to the school.");
        assert_eq!(citations[0].filename, "guide.md");

        // user, call, result, call, result, answer
        let messages = session.messages();
        assert_eq!(messages.len(), 7);
        match &messages[5].content[0] {
            Content::ToolResult { output, is_error, .. } => {
                assert!(!is_error);
                assert!(output.contains("<result filename=\\\"guide.md\\\">"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    /// Ingestion that never finishes
    struct StuckSearch;

    #[async_trait]
    impl SearchBackend for StuckSearch {
        async fn load_documents(&self) -> haven_search::Result<()> {
            std::future::pending().await
        }
        async fn search(
            &self,
            _phrase: &str,
            _filename_filter: Option<&str>,
            _max_results: usize,
        ) -> haven_search::Result<Vec<SearchHit>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_cancel_during_tool_keeps_transcript_resendable() {
        let client = ScriptedClient::new(vec![
            vec![ChatUpdate::with_contents(
                Role::Assistant,
                vec![Content::tool_call("c1", "LoadDocuments", serde_json::json!({}))],
            )],
            vec![ChatUpdate::text_delta("ok")],
        ]);
        let backend = FunctionInvokingBackend::new(client.clone(), "m")
            .with_retry_config(RetryConfig::none());
        let session = Arc::new(ChatSession::new(Arc::new(backend), Arc::new(StuckSearch)));
        let mut events = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("q1").await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(events.recv().await.unwrap(), SessionEvent::StateChanged { .. }) {}
        })
        .await
        .expect("timed out waiting for the tool to start");

        session.cancel_current();
        assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Cancelled);

        session.submit_text("q2").await.unwrap();

        let requests = client.requests.lock();
        let sent = &requests.last().unwrap().messages;
        let call_at = sent
            .iter()
            .position(|m| !m.tool_calls().is_empty())
            .expect("tool call was resent");
        assert_eq!(sent[call_at + 1].role, Role::Tool);
        assert_eq!(
            sent[call_at + 1].content,
            vec![Content::tool_result("c1", "Cancelled", true)]
        );
        assert_eq!(sent.last().unwrap().text(), "q2");
    }

    #[tokio::test]
    async fn test_initialize_cancels_streaming_turn() {
        let (session, backend) = session();
        let tx = backend.push_turn();
        let mut events = session.subscribe();

        let task = tokio::spawn({
            let session = session.clone();
            async move { session.submit_text("q").await }
        });
        tx.send(Ok(ChatUpdate::text_delta("partial"))).unwrap();
        wait_for_streamed(&mut events, 1).await;

        session.initialize();
        let _ = tx.send(Ok(ChatUpdate::text_delta(" late")));
        drop(tx);

        assert_eq!(task.await.unwrap().unwrap(), TurnOutcome::Cancelled);
        assert_eq!(session.messages().len(), 1);
        assert!(!session.is_streaming());
        assert!(backend.calls.lock()[0].2.is_cancelled());
    }
}
