//! Chat session: streams turns, applies the active profile, and manages history

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use mate_ai::{
    ChatMessage, ChunkStream, ClientConfig, ContextTokens, GenerateChunk, GenerateRequest,
    InferenceProvider, ResponseAccumulator, Role,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    compaction,
    conversation::{SessionState, TurnState},
    error::{Error, Result},
    events::SessionEvent,
    handle::SessionHandle,
    persistence::Conversation,
    store::SharedRuleStore,
};

/// Appended to the partial response when a turn is stopped
pub const STOPPED_MARKER: &str = "\n\n⏹ [Stopped]";

/// Terminal state of a turn that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Aborted,
}

/// What a finished turn produced
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Id of the assistant message
    pub message_id: u64,
    pub outcome: TurnOutcome,
    /// Final assistant content as stored in history
    pub content: String,
    pub chunk_count: u32,
    /// Tokens generated, as reported by the server's final chunk
    pub eval_count: Option<u32>,
    pub duration_ms: u64,
    /// Whether the active profile changed the response
    pub post_processed: bool,
    /// Context after the turn; `None` when aborted
    pub context_snapshot: Option<ContextTokens>,
}

/// How consuming a chunk stream ended
pub(crate) enum StreamEnd {
    Completed,
    Aborted,
    Failed(mate_ai::Error),
}

/// Issue the request unless the token fires first
pub(crate) async fn open_stream(
    provider: &dyn InferenceProvider,
    request: GenerateRequest,
    cancel: &CancellationToken,
) -> std::result::Result<ChunkStream, StreamEnd> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamEnd::Aborted),
        result = provider.stream_generate(request) => result.map_err(StreamEnd::Failed),
    }
}

/// Drain `stream` into `acc`, calling `on_chunk` with each chunk and its text delta
pub(crate) async fn consume_stream(
    mut stream: ChunkStream,
    cancel: &CancellationToken,
    acc: &mut ResponseAccumulator,
    mut on_chunk: impl FnMut(&GenerateChunk, Option<&str>),
) -> StreamEnd {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Aborted,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let delta = acc.process(&chunk);
                on_chunk(&chunk, delta);
                if chunk.done {
                    return StreamEnd::Completed;
                }
            }
            Some(Err(e)) => return StreamEnd::Failed(e),
            None => {
                tracing::debug!("Stream ended without a final chunk");
                return StreamEnd::Completed;
            }
        }
    }
}

/// A single chat session against one inference server
pub struct Session {
    config: ClientConfig,
    state: SessionState,
    provider: Arc<dyn InferenceProvider>,
    rules: SharedRuleStore,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl Session {
    /// Create a new session
    pub fn new(
        config: ClientConfig,
        provider: Arc<dyn InferenceProvider>,
        rules: SharedRuleStore,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            state: SessionState::default(),
            provider,
            rules,
            event_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for stopping turns from another task
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Stop the in-flight turn, if any
    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.state.history
    }

    pub fn context(&self) -> &[i64] {
        &self.state.context
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Switch models for subsequent turns
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    pub fn rules(&self) -> &SharedRuleStore {
        &self.rules
    }

    /// Id of the saved conversation this session was restored from
    pub fn current_conversation_id(&self) -> Option<&str> {
        self.state.current_conversation_id.as_deref()
    }

    /// Remember which saved conversation this session now corresponds to
    pub fn set_current_conversation_id(&mut self, id: Option<String>) {
        self.state.current_conversation_id = id;
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_context_info(&self) {
        self.emit(SessionEvent::ContextInfoChanged {
            context_size: self.state.context.len(),
            message_count: self.state.history.len(),
        });
    }

    /// Send a user message and stream the reply.
    ///
    /// A stopped turn returns `Ok` with [`TurnOutcome::Aborted`]. A transport
    /// failure keeps the partial reply in history and returns the error.
    pub async fn submit(&mut self, text: &str) -> Result<TurnReport> {
        let (_guard, cancel) = self.handle.begin()?;
        let started = Instant::now();

        let user_id = self.state.next_message_id();
        self.state.history.push(ChatMessage::user(text));
        self.emit(SessionEvent::MessageAdded {
            id: user_id,
            role: Role::User,
            content: text.to_string(),
        });

        let message_id = self.state.next_message_id();
        self.emit(SessionEvent::MessageAdded {
            id: message_id,
            role: Role::Assistant,
            content: String::new(),
        });

        self.state.turn = TurnState::Sending;
        let request = self
            .config
            .request(text)
            .with_context(&self.state.context);

        let mut acc = ResponseAccumulator::new();
        let end = match open_stream(self.provider.as_ref(), request, &cancel).await {
            Ok(stream) => {
                self.state.turn = TurnState::Streaming;
                let state = &mut self.state;
                let event_tx = &self.event_tx;
                consume_stream(stream, &cancel, &mut acc, |chunk, delta| {
                    if let Some(delta) = delta {
                        let _ = event_tx.send(SessionEvent::MessageUpdated {
                            id: message_id,
                            content: delta.to_string(),
                            append: true,
                        });
                    }
                    if let Some(ref context) = chunk.context {
                        state.context = context.clone();
                    }
                })
                .await
            }
            Err(end) => end,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match end {
            StreamEnd::Completed => Ok(self.finish_completed(message_id, acc, duration_ms)),
            StreamEnd::Aborted => {
                tracing::info!(
                    "Turn stopped after {} chunks ({} ms)",
                    acc.chunk_count(),
                    duration_ms
                );
                let content = self.finish_interrupted(
                    message_id,
                    acc.text(),
                    STOPPED_MARKER,
                    duration_ms,
                    TurnState::Aborted,
                );
                Ok(TurnReport {
                    message_id,
                    outcome: TurnOutcome::Aborted,
                    content,
                    chunk_count: acc.chunk_count(),
                    eval_count: acc.eval_count(),
                    duration_ms,
                    post_processed: false,
                    context_snapshot: None,
                })
            }
            StreamEnd::Failed(e) => {
                tracing::warn!("Turn failed: {}", e);
                let marker = format!("\n\n⚠️ Error: {}", e);
                self.finish_interrupted(
                    message_id,
                    acc.text(),
                    &marker,
                    duration_ms,
                    TurnState::Failed,
                );
                Err(Error::Ai(e))
            }
        }
    }

    fn finish_completed(
        &mut self,
        message_id: u64,
        acc: ResponseAccumulator,
        duration_ms: u64,
    ) -> TurnReport {
        let chunk_count = acc.chunk_count();
        let eval_count = acc.eval_count();
        let (raw, _) = acc.into_parts();

        let mut content = raw;
        let mut post_processed = false;
        if let Some((processed, profile_id)) = self.post_process(&content) {
            if processed != content {
                tracing::debug!("Profile {} rewrote message {}", profile_id, message_id);
                self.emit(SessionEvent::MessageUpdated {
                    id: message_id,
                    content: processed.clone(),
                    append: false,
                });
                self.emit(SessionEvent::PostProcessed {
                    id: message_id,
                    profile_id,
                });
                content = processed;
                post_processed = true;
            }
        }

        let mut message = ChatMessage::assistant(content.clone());
        message.token_count = Some(chunk_count);
        message.duration_ms = Some(duration_ms);
        self.state.history.push(message);
        self.state.turn = TurnState::Completed;

        match eval_count {
            Some(tokens) => tracing::debug!(
                "Turn complete: {} chunks, {} tokens in {} ms",
                chunk_count,
                tokens,
                duration_ms
            ),
            None => tracing::debug!("Turn complete: {} chunks in {} ms", chunk_count, duration_ms),
        }

        let snapshot = self.state.context.clone();
        self.emit_context_info();
        self.emit(SessionEvent::TurnComplete {
            id: message_id,
            chunk_count: Some(chunk_count),
            duration_ms,
            context_snapshot: Some(snapshot.clone()),
        });

        TurnReport {
            message_id,
            outcome: TurnOutcome::Completed,
            content,
            chunk_count,
            eval_count,
            duration_ms,
            post_processed,
            context_snapshot: Some(snapshot),
        }
    }

    /// Keep the partial reply plus `marker` in history and close the turn
    fn finish_interrupted(
        &mut self,
        message_id: u64,
        partial: &str,
        marker: &str,
        duration_ms: u64,
        turn: TurnState,
    ) -> String {
        self.emit(SessionEvent::MessageUpdated {
            id: message_id,
            content: marker.to_string(),
            append: true,
        });

        let content = format!("{}{}", partial, marker);
        let mut message = ChatMessage::assistant(content.clone());
        message.duration_ms = Some(duration_ms);
        self.state.history.push(message);
        self.state.turn = turn;

        self.emit_context_info();
        self.emit(SessionEvent::TurnComplete {
            id: message_id,
            chunk_count: None,
            duration_ms,
            context_snapshot: None,
        });
        content
    }

    /// Run the active profile; returns the output and the profile id
    fn post_process(&self, raw: &str) -> Option<(String, String)> {
        let store = self.rules.read();
        let profile = store.active_profile()?;
        let output = profile.run(&store.registry(), raw);
        Some((output, profile.id.clone()))
    }

    /// Forget the transcript and context
    pub fn clear(&mut self) -> Result<()> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        self.state.reset();
        self.emit(SessionEvent::ChatCleared);
        self.emit_context_info();
        Ok(())
    }

    /// Summarize the history into a single system message and restart the context.
    ///
    /// On failure (including a stop) the history and context are left as they were.
    pub async fn compress(&mut self) -> Result<String> {
        let (_guard, cancel) = self.handle.begin()?;
        if self.state.history.is_empty() {
            return Err(Error::EmptyHistory);
        }

        let notice_id = self.state.next_message_id();
        self.emit(SessionEvent::MessageAdded {
            id: notice_id,
            role: Role::System,
            content: compaction::COMPRESSING_NOTICE.to_string(),
        });

        let result = compaction::summarize(
            self.provider.as_ref(),
            &self.config,
            &self.state.history,
            &cancel,
        )
        .await;

        match result {
            Ok(summary) => {
                let before = self.state.history.len();
                self.state.history = vec![compaction::compressed_message(&summary.text)];
                self.state.context = summary.context;
                tracing::info!(
                    "Compressed {} messages, new context size {}",
                    before,
                    self.state.context.len()
                );

                self.emit(SessionEvent::MessageUpdated {
                    id: notice_id,
                    content: format!("✅ Context compressed:\n\n{}", summary.text),
                    append: false,
                });
                self.emit_context_info();
                Ok(summary.text)
            }
            Err(e) => {
                tracing::warn!("Compression failed: {}", e);
                self.emit(SessionEvent::MessageUpdated {
                    id: notice_id,
                    content: format!("❌ Compression failed: {}", e),
                    append: false,
                });
                Err(Error::Ai(e))
            }
        }
    }

    /// Replace the session with `messages` and a context snapshot.
    ///
    /// Saved conversations are not touched; the session is no longer tied to one.
    pub fn fork(&mut self, context: ContextTokens, messages: &[ChatMessage]) -> Result<()> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        self.state.replace(context, messages);
        self.state.current_conversation_id = None;
        self.replay();
        Ok(())
    }

    /// Load a saved conversation into the session
    pub fn restore(&mut self, conversation: &Conversation) -> Result<()> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        self.state
            .replace(conversation.context.clone(), &conversation.messages);
        self.state.current_conversation_id = Some(conversation.id.clone());
        tracing::debug!(
            "Restored conversation {} ({} messages)",
            conversation.id,
            conversation.messages.len()
        );
        self.replay();
        Ok(())
    }

    fn replay(&self) {
        self.emit(SessionEvent::ChatCleared);
        for (i, message) in self.state.history.iter().enumerate() {
            self.emit(SessionEvent::MessageAdded {
                id: i as u64 + 1,
                role: message.role,
                content: message.content.clone(),
            });
        }
        self.emit_context_info();
    }

    /// Build a record of the live session for saving
    pub fn to_conversation(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Conversation {
        Conversation {
            id: id.into(),
            name: name.into(),
            created_at,
            updated_at: chrono::Utc::now(),
            messages: self.state.history.clone(),
            context: self.state.context.clone(),
            model: Some(self.config.model.clone()),
            last_context_size: Some(self.state.context.len()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rules::RuleKind;
    use crate::settings::MemorySettings;
    use crate::store::{NewProfile, NewRule, RuleStore};
    use async_trait::async_trait;
    use mate_ai::{GenerateResponse, ModelInfo, ModelTag};
    use parking_lot::Mutex;

    /// One scripted reply from [`ScriptedProvider`]
    pub(crate) enum Reply {
        /// Yield these items, then end
        Chunks(Vec<mate_ai::Result<GenerateChunk>>),
        /// Yield these chunks, then never finish
        Hang(Vec<GenerateChunk>),
        /// Fail before any chunk
        Refuse(u16, &'static str),
    }

    pub(crate) struct ScriptedProvider {
        replies: Mutex<Vec<Reply>>,
        pub(crate) requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        async fn stream_generate(&self, request: GenerateRequest) -> mate_ai::Result<ChunkStream> {
            self.requests.lock().push(request);
            let reply = {
                let mut replies = self.replies.lock();
                if replies.is_empty() {
                    Reply::Chunks(vec![Ok(GenerateChunk::done(vec![]))])
                } else {
                    replies.remove(0)
                }
            };

            match reply {
                Reply::Chunks(items) => Ok(Box::pin(async_stream::stream! {
                    for item in items {
                        yield item;
                    }
                })),
                Reply::Hang(chunks) => Ok(Box::pin(async_stream::stream! {
                    for chunk in chunks {
                        yield Ok::<_, mate_ai::Error>(chunk);
                    }
                    std::future::pending::<()>().await;
                })),
                Reply::Refuse(status, message) => Err(mate_ai::Error::api(status, message)),
            }
        }

        async fn generate(&self, _request: GenerateRequest) -> mate_ai::Result<GenerateResponse> {
            Err(mate_ai::Error::UnexpectedResponse("not scripted".into()))
        }

        async fn list_models(&self) -> mate_ai::Result<Vec<ModelTag>> {
            Ok(vec![])
        }

        async fn model_info(&self, name: &str) -> mate_ai::Result<ModelInfo> {
            Err(mate_ai::Error::ModelNotFound(name.to_string()))
        }
    }

    pub(crate) fn text(s: &str) -> mate_ai::Result<GenerateChunk> {
        Ok(GenerateChunk::text(s))
    }

    pub(crate) fn done(context: Vec<i64>) -> mate_ai::Result<GenerateChunk> {
        Ok(GenerateChunk::done(context))
    }

    fn empty_rules() -> SharedRuleStore {
        RuleStore::open(MemorySettings::new()).unwrap().into_shared()
    }

    fn session(provider: Arc<ScriptedProvider>) -> Session {
        Session::new(ClientConfig::default(), provider, empty_rules())
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_completed_turn() {
        let provider = ScriptedProvider::new(vec![Reply::Chunks(vec![
            text("Hel"),
            text("lo"),
            done(vec![4, 5, 6]),
        ])]);
        let mut session = session(Arc::clone(&provider));
        let mut rx = session.subscribe();

        let report = session.submit("hi").await.unwrap();
        assert_eq!(report.outcome, TurnOutcome::Completed);
        assert_eq!(report.content, "Hello");
        assert_eq!(report.chunk_count, 2);
        assert_eq!(report.message_id, 2);
        assert_eq!(session.context(), &[4, 5, 6]);
        assert!(!session.is_running());
        assert_eq!(session.state().turn, TurnState::Completed);

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("hi"));
        assert_eq!(history[1].content, "Hello");
        assert_eq!(history[1].token_count, Some(2));

        let events = drain(&mut rx);
        let deltas: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::MessageUpdated {
                    content,
                    append: true,
                    ..
                } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::TurnComplete {
                chunk_count: Some(2),
                context_snapshot: Some(ctx),
                ..
            }) if ctx == &vec![4, 5, 6]
        ));
    }

    #[tokio::test]
    async fn test_server_token_count_reported() {
        let mut last = GenerateChunk::done(vec![1]);
        last.eval_count = Some(17);
        let provider = ScriptedProvider::new(vec![
            Reply::Chunks(vec![text("a"), Ok(last)]),
            Reply::Chunks(vec![text("b"), done(vec![2])]),
        ]);
        let mut session = session(provider);

        let report = session.submit("one").await.unwrap();
        assert_eq!(report.eval_count, Some(17));
        assert_eq!(report.chunk_count, 1);

        let report = session.submit("two").await.unwrap();
        assert_eq!(report.eval_count, None);
    }

    #[tokio::test]
    async fn test_context_threaded_into_next_request() {
        let provider = ScriptedProvider::new(vec![
            Reply::Chunks(vec![text("a"), done(vec![1, 2])]),
            Reply::Chunks(vec![text("b"), done(vec![1, 2, 3])]),
        ]);
        let mut session = session(Arc::clone(&provider));

        session.submit("first").await.unwrap();
        session.submit("second").await.unwrap();

        let requests = provider.requests.lock();
        assert_eq!(requests[0].context, None);
        assert_eq!(requests[1].context, Some(vec![1, 2]));
        assert_eq!(requests[1].prompt, "second");
        assert_eq!(session.context(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_active_profile_rewrites_reply() {
        let provider = ScriptedProvider::new(vec![Reply::Chunks(vec![
            text("answer   "),
            done(vec![9]),
        ])]);
        let rules = empty_rules();
        let profile_id = {
            let mut store = rules.write();
            let trim = store
                .create_rule(NewRule::new(
                    "trim",
                    RuleKind::RegexReplace {
                        pattern: r"\s+$".into(),
                        replacement: None,
                    },
                ))
                .unwrap();
            let sign = store
                .create_rule(NewRule::new(
                    "sign",
                    RuleKind::AddSuffix {
                        suffix: "!".into(),
                    },
                ))
                .unwrap();
            let profile = store
                .create_profile(NewProfile::new("tidy", vec![trim.id, sign.id]))
                .unwrap();
            store.set_active_profile(Some(profile.id.as_str())).unwrap();
            profile.id
        };

        let mut session = Session::new(ClientConfig::default(), provider, rules);
        let mut rx = session.subscribe();
        let report = session.submit("q").await.unwrap();

        assert!(report.post_processed);
        assert_eq!(report.content, "answer!");
        assert_eq!(session.history()[1].content, "answer!");

        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::MessageUpdated {
            id: 2,
            content: "answer!".into(),
            append: false,
        }));
        assert!(events.contains(&SessionEvent::PostProcessed { id: 2, profile_id }));
    }

    #[tokio::test]
    async fn test_stop_keeps_partial_text() {
        let provider = ScriptedProvider::new(vec![Reply::Hang(vec![GenerateChunk::text(
            "partial",
        )])]);
        let mut session = session(provider);
        let handle = session.handle();
        let mut rx = session.subscribe();

        let stopper = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if matches!(event, SessionEvent::MessageUpdated { append: true, .. }) {
                    handle.stop();
                    break;
                }
            }
            rx
        });

        let report = session.submit("go").await.unwrap();
        assert_eq!(report.outcome, TurnOutcome::Aborted);
        assert_eq!(report.content, format!("partial{}", STOPPED_MARKER));
        assert_eq!(session.history()[1].content, report.content);
        assert_eq!(session.state().turn, TurnState::Aborted);
        assert!(!session.is_running());

        let mut rx = stopper.await.unwrap();
        let completes: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.is_terminal())
            .collect();
        assert_eq!(
            completes,
            vec![SessionEvent::TurnComplete {
                id: 2,
                chunk_count: None,
                duration_ms: report.duration_ms,
                context_snapshot: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let provider = ScriptedProvider::new(vec![Reply::Chunks(vec![text("ok"), done(vec![])])]);
        let mut session = session(provider);
        session.stop();
        let report = session.submit("hi").await.unwrap();
        assert_eq!(report.outcome, TurnOutcome::Completed);
    }

    #[tokio::test]
    async fn test_mid_stream_failure() {
        let provider = ScriptedProvider::new(vec![
            Reply::Chunks(vec![
                text("half"),
                Err(mate_ai::Error::UnexpectedResponse("connection reset".into())),
            ]),
            Reply::Chunks(vec![text("again"), done(vec![3])]),
        ]);
        let mut session = session(provider);
        let mut rx = session.subscribe();

        let err = session.submit("q").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(session.state().turn, TurnState::Failed);
        assert!(session.history()[1].content.starts_with("half\n\n⚠️ Error:"));
        assert!(session.history()[1].content.contains("connection reset"));
        assert_eq!(drain(&mut rx).iter().filter(|e| e.is_terminal()).count(), 1);

        // The session accepts the next turn
        let report = session.submit("retry").await.unwrap();
        assert_eq!(report.content, "again");
        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn test_request_refused() {
        let provider = ScriptedProvider::new(vec![Reply::Refuse(404, "model not found")]);
        let mut session = session(provider);

        let err = session.submit("q").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Ai(mate_ai::Error::Api { status: 404, .. })
        ));
        assert_eq!(session.history().len(), 2);
        assert!(session.history()[1].content.contains("model not found"));
        assert!(session.context().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let provider = ScriptedProvider::new(vec![Reply::Chunks(vec![text("x"), done(vec![1])])]);
        let mut session = session(provider);
        session.submit("hi").await.unwrap();
        let mut rx = session.subscribe();

        session.clear().unwrap();
        assert!(session.history().is_empty());
        assert!(session.context().is_empty());
        assert_eq!(session.state().message_counter, 0);
        assert_eq!(drain(&mut rx)[0], SessionEvent::ChatCleared);
    }

    #[tokio::test]
    async fn test_compress_replaces_history() {
        let provider = ScriptedProvider::new(vec![
            Reply::Chunks(vec![text("hello back"), done(vec![1, 2, 3, 4])]),
            Reply::Chunks(vec![text("User greeted."), done(vec![42])]),
        ]);
        let mut session = session(Arc::clone(&provider));
        session.submit("hello").await.unwrap();

        let summary = session.compress().await.unwrap();
        assert_eq!(summary, "User greeted.");
        assert_eq!(
            session.history(),
            &[ChatMessage::system("[Compressed: User greeted.]")]
        );
        assert_eq!(session.context(), &[42]);

        let requests = provider.requests.lock();
        let summarize = &requests[1];
        assert_eq!(summarize.context, None);
        assert_eq!(summarize.system.as_deref(), Some(compaction::SUMMARY_SYSTEM_PROMPT));
        assert!(summarize.prompt.contains("User: hello..."));
    }

    #[tokio::test]
    async fn test_compress_twice() {
        let provider = ScriptedProvider::new(vec![
            Reply::Chunks(vec![text("hi there"), done(vec![1, 2, 3])]),
            Reply::Chunks(vec![text("S1"), done(vec![10])]),
            Reply::Chunks(vec![text("S2"), done(vec![20])]),
        ]);
        let mut session = session(Arc::clone(&provider));
        session.submit("hello").await.unwrap();

        session.compress().await.unwrap();
        assert_eq!(session.history().len(), 1);

        let summary = session.compress().await.unwrap();
        assert_eq!(summary, "S2");
        assert_eq!(
            session.history(),
            &[ChatMessage::system("[Compressed: S2]")]
        );
        assert_eq!(session.context(), &[20]);
        assert!(provider.requests.lock()[2].prompt.contains("[Compressed: S1]"));
    }

    #[tokio::test]
    async fn test_compress_failure_leaves_state() {
        let provider = ScriptedProvider::new(vec![
            Reply::Chunks(vec![text("reply"), done(vec![7])]),
            Reply::Refuse(500, "out of memory"),
        ]);
        let mut session = session(provider);
        session.submit("hello").await.unwrap();

        assert!(session.compress().await.is_err());
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.context(), &[7]);
    }

    #[tokio::test]
    async fn test_compress_empty_history() {
        let mut session = session(ScriptedProvider::new(vec![]));
        assert!(matches!(session.compress().await, Err(Error::EmptyHistory)));
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_fork_sets_counter() {
        let mut session = session(ScriptedProvider::new(vec![]));
        session.set_current_conversation_id(Some("conv-1".into()));
        let mut rx = session.subscribe();

        let mut reply = ChatMessage::assistant("a");
        reply.duration_ms = Some(10);
        session
            .fork(vec![5, 6], &[ChatMessage::user("q"), reply])
            .unwrap();

        assert_eq!(session.state().message_counter, 2);
        assert_eq!(session.context(), &[5, 6]);
        assert!(session.history()[1].duration_ms.is_none());
        assert!(session.current_conversation_id().is_none());

        let events = drain(&mut rx);
        assert_eq!(events[0], SessionEvent::ChatCleared);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::MessageAdded { .. }))
                .count(),
            2
        );
        assert!(matches!(
            events.last(),
            Some(SessionEvent::ContextInfoChanged {
                context_size: 2,
                message_count: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_restore_and_snapshot() {
        let mut session = session(ScriptedProvider::new(vec![]));
        session.set_model("llama3");

        let created = chrono::Utc::now();
        let conversation = Conversation {
            id: "conv-1".into(),
            name: "Saved".into(),
            created_at: created,
            updated_at: created,
            messages: vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
            context: vec![1, 2, 3],
            model: Some("mistral".into()),
            last_context_size: Some(3),
        };
        session.restore(&conversation).unwrap();
        assert_eq!(session.current_conversation_id(), Some("conv-1"));

        let record = session.to_conversation("conv-1", "Saved", created);
        assert_eq!(record.messages, conversation.messages);
        assert_eq!(record.context, vec![1, 2, 3]);
        assert_eq!(record.model.as_deref(), Some("llama3"));
        assert_eq!(record.last_context_size, Some(3));
    }
}
