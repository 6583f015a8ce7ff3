//! The conversation service.
//!
//! `converse` runs one request/response cycle for a room: it opens the
//! session on a start token, sends the whole transcript plus the new
//! prompt to the completion provider, records the exchange and closes the
//! session when the reply carries an end marker.

use crate::error::{ConversationError, StoreError};
use crate::listing::{self, RoomSummary};
use crate::message::ChatTurn;
use crate::policy::{PromptSignal, ReplySignal, SessionPolicy};
use crate::store::TranscriptStore;
use aichat_ai::{LlmBackend, LlmError, LlmRequest};
use aichat_core::{Result, RoomId};
use chrono::Utc;
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default bound on a single provider call.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs conversations against a completion provider.
pub struct ConversationService {
    store: Arc<TranscriptStore>,
    backend: Arc<dyn LlmBackend>,
    policy: SessionPolicy,
    system_prompt: Option<String>,
    reply_timeout: Duration,
}

impl ConversationService {
    /// Creates a service over a store and a backend.
    #[must_use]
    pub fn new(
        store: Arc<TranscriptStore>,
        backend: Arc<dyn LlmBackend>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            policy,
            system_prompt: None,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Sets a system prompt sent ahead of every transcript. It is never
    /// recorded in the transcript.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Sets the bound on a single provider call.
    #[must_use]
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Returns the transcript store the service writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    /// Returns the start/end policy.
    #[must_use]
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Sends a prompt to a room and returns the provider's reply.
    ///
    /// A failed or cancelled cycle leaves the store as it was: a session
    /// opened by this call is closed again, and no turn is recorded.
    ///
    /// # Errors
    ///
    /// - `SessionNotStarted` if the room has no session and the prompt is
    ///   not a start token
    /// - `CapacityExceeded` if a new session would exceed the room bound
    /// - `ProviderFailed` if the provider call fails or times out
    #[instrument(skip(self, room_id, prompt), fields(%room_id, prompt_len = prompt.len()))]
    pub async fn converse(&self, room_id: RoomId, prompt: &str) -> Result<String, ConversationError> {
        let mut room = self.store.lock_room(room_id).await;

        let opened = if room.is_active() {
            false
        } else {
            match self.policy.classify_prompt(prompt) {
                PromptSignal::Start => {
                    room.start().map_err(|e| store_failure(room_id, e))?;
                    info!("session started");
                    true
                }
                PromptSignal::Message => {
                    debug!("prompt sent to a room without a session");
                    return Err(ConversationError::SessionNotStarted { room_id }.into());
                }
            }
        };

        let user_turn = ChatTurn::user(prompt);
        let mut messages = room
            .transcript()
            .map(|transcript| transcript.to_llm_messages())
            .unwrap_or_default();
        messages.push(user_turn.to_llm_message());

        let mut request = LlmRequest::new(messages);
        if let Some(system) = &self.system_prompt {
            request = request.with_system(system.clone());
        }

        let reply = match self.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, provider = self.backend.provider(), "completion failed");
                if opened {
                    room.end();
                }
                return Err(Report::new(e).context(ConversationError::ProviderFailed { room_id }));
            }
        };

        room.record_exchange(user_turn, ChatTurn::assistant(reply.clone()))
            .map_err(|e| store_failure(room_id, e))?;

        if self.policy.classify_reply(&reply) == ReplySignal::End {
            room.end();
            info!("session ended by reply");
        }

        Ok(reply)
    }

    /// Lists every room with an active session.
    #[must_use]
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        listing::list_rooms(&self.store)
    }

    /// Ends sessions idle for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<RoomId> {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_idle)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let evicted = self.store.evict_idle(cutoff);
        if !evicted.is_empty() {
            info!(count = evicted.len(), rooms = ?evicted, "evicted idle sessions");
        }
        evicted
    }

    async fn complete(&self, request: &LlmRequest) -> std::result::Result<String, LlmError> {
        let started = std::time::Instant::now();
        let response = tokio::time::timeout(self.reply_timeout, self.backend.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                after_secs: self.reply_timeout.as_secs(),
            })??;
        debug!(
            model = %response.model,
            latency_ms = started.elapsed().as_millis() as u64,
            total_tokens = response.usage.total(),
            "reply received"
        );
        Ok(response.content)
    }
}

fn store_failure(room_id: RoomId, error: StoreError) -> Report<ConversationError> {
    let context = match &error {
        StoreError::CapacityExceeded { max_rooms } => ConversationError::CapacityExceeded {
            max_rooms: *max_rooms,
        },
        StoreError::NotFound { .. } | StoreError::AlreadyExists { .. } => {
            ConversationError::Store { room_id }
        }
    };
    Report::new(error).context(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aichat_ai::{LlmMessage, LlmResponse, MessageRole};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Replays queued replies and records every request it sees.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<std::result::Result<String, LlmError>>>,
        requests: Mutex<Vec<LlmRequest>>,
        delay: Option<Duration>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedBackend {
        fn replying<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                ..Self::default()
            }
        }

        fn push(&self, reply: std::result::Result<String, LlmError>) {
            self.replies.lock().expect("lock").push_back(reply);
        }

        fn requests(&self) -> Vec<LlmRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn complete(
            &self,
            request: &LlmRequest,
        ) -> std::result::Result<LlmResponse, LlmError> {
            self.requests.lock().expect("lock").push(request.clone());
            let last = request.messages.last().map(|m| m.content.clone());
            if let Some(gate) = &self.gate {
                if last.as_deref() == Some("slow") {
                    gate.notified().await;
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let reply = self
                .replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok("是".to_string()))?;
            Ok(LlmResponse::text(reply, "scripted"))
        }

        fn provider(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn service(backend: Arc<ScriptedBackend>) -> ConversationService {
        ConversationService::new(
            Arc::new(TranscriptStore::new()),
            backend,
            SessionPolicy::default(),
        )
    }

    fn contents(service: &ConversationService, room_id: RoomId) -> Vec<(MessageRole, String)> {
        service
            .store()
            .get(room_id)
            .expect("transcript")
            .to_llm_messages()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect()
    }

    #[tokio::test]
    async fn start_creates_two_turn_transcript() {
        let backend = Arc::new(ScriptedBackend::replying(["题目：海龟汤"]));
        let service = service(Arc::clone(&backend));
        let room = RoomId::new(1);

        let reply = service.converse(room, "开始").await.expect("converse");

        assert_eq!(reply, "题目：海龟汤");
        assert_eq!(
            contents(&service, room),
            vec![
                (MessageRole::User, "开始".to_string()),
                (MessageRole::Assistant, "题目：海龟汤".to_string()),
            ]
        );
        assert_eq!(backend.requests()[0].messages, vec![LlmMessage::user("开始")]);
    }

    #[tokio::test]
    async fn full_game_scenario() {
        let backend = Arc::new(ScriptedBackend::replying([
            "题目：一个男人喝了一口海龟汤就离开了。",
            "是。",
            "游戏结束，答案是：他以前吃的不是海龟。",
        ]));
        let service = service(Arc::clone(&backend));
        let room = RoomId::new(7);

        service.converse(room, "开始").await.expect("start");
        assert_eq!(service.store().get(room).expect("get").len(), 2);

        service.converse(room, "线索一").await.expect("clue");
        assert_eq!(
            contents(&service, room),
            vec![
                (MessageRole::User, "开始".to_string()),
                (MessageRole::Assistant, "题目：一个男人喝了一口海龟汤就离开了。".to_string()),
                (MessageRole::User, "线索一".to_string()),
                (MessageRole::Assistant, "是。".to_string()),
            ]
        );

        let last = service.converse(room, "告诉我答案").await.expect("finish");
        assert_eq!(last, "游戏结束，答案是：他以前吃的不是海龟。");
        assert!(!service.store().exists(room));
        assert!(service.list_rooms().is_empty());

        // The provider saw the whole transcript on the final call.
        let requests = backend.requests();
        assert_eq!(requests[2].messages.len(), 5);
        assert_eq!(requests[2].messages[4], LlmMessage::user("告诉我答案"));
    }

    #[tokio::test]
    async fn prompt_without_session_is_not_found() {
        let backend = Arc::new(ScriptedBackend::default());
        let service = service(Arc::clone(&backend));
        let room = RoomId::new(99);

        let err = service.converse(room, "随便问").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &ConversationError::SessionNotStarted { room_id: room }
        );
        assert!(!service.store().exists(room));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn padded_start_token_does_not_open_a_session() {
        let backend = Arc::new(ScriptedBackend::default());
        let service = service(Arc::clone(&backend));
        let room = RoomId::new(99);

        let err = service.converse(room, " 开始\n").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &ConversationError::SessionNotStarted { room_id: room }
        );
        assert!(!service.store().exists(room));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn cancelled_start_opens_no_session() {
        let backend = Arc::new(ScriptedBackend {
            delay: Some(Duration::from_secs(10)),
            ..ScriptedBackend::default()
        });
        let store = Arc::new(TranscriptStore::with_max_rooms(1));
        let service = Arc::new(ConversationService::new(
            Arc::clone(&store),
            backend,
            SessionPolicy::default(),
        ));
        let room = RoomId::new(7);

        let task = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.converse(room, "开始").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.exists(room));

        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());

        assert!(!store.exists(room));
        assert_eq!(store.len(), 0);
        assert!(service.list_rooms().is_empty());
    }

    #[tokio::test]
    async fn cancelled_turn_keeps_existing_transcript() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedBackend::default()
        });
        let service = Arc::new(service(backend));
        let room = RoomId::new(8);
        service.converse(room, "开始").await.expect("start");

        let task = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.converse(room, "slow").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());

        assert_eq!(service.store().get(room).expect("get").len(), 2);
    }

    #[tokio::test]
    async fn start_token_inside_session_is_an_ordinary_turn() {
        let backend = Arc::new(ScriptedBackend::default());
        let service = service(backend);
        let room = RoomId::new(2);

        service.converse(room, "开始").await.expect("start");
        service.converse(room, "开始").await.expect("again");

        assert_eq!(service.store().get(room).expect("get").len(), 4);
    }

    #[tokio::test]
    async fn end_marker_in_first_reply_ends_immediately() {
        let backend = Arc::new(ScriptedBackend::replying(["session ended"]));
        let service = service(backend);
        let room = RoomId::new(3);

        let reply = service.converse(room, "start").await.expect("converse");

        assert_eq!(reply, "session ended");
        assert!(!service.store().exists(room));
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn provider_failure_leaves_transcript_unchanged() {
        let backend = Arc::new(ScriptedBackend::default());
        let service = service(Arc::clone(&backend));
        let room = RoomId::new(4);

        service.converse(room, "开始").await.expect("start");
        backend.push(Err(LlmError::RequestFailed {
            reason: "connection reset".to_string(),
        }));

        let err = service.converse(room, "线索").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &ConversationError::ProviderFailed { room_id: room }
        );
        assert!(err.to_string().contains("completion provider failed"));
        assert_eq!(service.store().get(room).expect("get").len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_on_start_opens_no_session() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Err(LlmError::EmptyResponse));
        let service = service(backend);
        let room = RoomId::new(5);

        assert!(service.converse(room, "开始").await.is_err());
        assert!(!service.store().exists(room));
        assert!(service.store().is_empty());
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let backend = Arc::new(ScriptedBackend {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedBackend::default()
        });
        let service = service(backend).with_reply_timeout(Duration::from_millis(50));
        let room = RoomId::new(6);

        let err = service.converse(room, "开始").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &ConversationError::ProviderFailed { room_id: room }
        );
        assert!(!service.store().exists(room));
    }

    #[tokio::test]
    async fn system_prompt_is_sent_but_not_recorded() {
        let backend = Arc::new(ScriptedBackend::default());
        let service = service(Arc::clone(&backend)).with_system_prompt("你是一位脑筋急转弯游戏主持人");
        let room = RoomId::new(8);

        service.converse(room, "开始").await.expect("start");

        let request = &backend.requests()[0];
        assert_eq!(request.system.as_deref(), Some("你是一位脑筋急转弯游戏主持人"));
        assert_eq!(service.store().get(room).expect("get").len(), 2);
    }

    #[tokio::test]
    async fn capacity_bound_rejects_new_sessions() {
        let backend = Arc::new(ScriptedBackend::default());
        let service = ConversationService::new(
            Arc::new(TranscriptStore::with_max_rooms(1)),
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            SessionPolicy::default(),
        );

        service.converse(RoomId::new(1), "开始").await.expect("first");
        let err = service.converse(RoomId::new(2), "开始").await.unwrap_err();

        assert_eq!(
            err.current_context(),
            &ConversationError::CapacityExceeded { max_rooms: 1 }
        );
        assert_eq!(backend.requests().len(), 1);

        // Existing sessions keep working.
        service.converse(RoomId::new(1), "线索").await.expect("existing");
    }

    #[tokio::test]
    async fn concurrent_starts_open_one_session() {
        let backend = Arc::new(ScriptedBackend {
            delay: Some(Duration::from_millis(20)),
            ..ScriptedBackend::default()
        });
        let service = Arc::new(service(backend));
        let room = RoomId::new(10);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.converse(room, "开始").await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("converse");
        }

        assert_eq!(service.store().len(), 1);
        assert_eq!(service.store().get(room).expect("get").len(), 4);
    }

    #[tokio::test]
    async fn slow_room_does_not_block_other_rooms() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend {
            gate: Some(Arc::clone(&gate)),
            ..ScriptedBackend::default()
        });
        let service = Arc::new(service(backend));

        service.converse(RoomId::new(1), "开始").await.expect("start 1");
        let slow = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.converse(RoomId::new(1), "slow").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), service.converse(RoomId::new(2), "开始"))
            .await
            .expect("room 2 is not blocked")
            .expect("converse 2");

        // The pending cycle is not visible yet.
        assert_eq!(service.store().get(RoomId::new(1)).expect("get").len(), 2);
        assert_eq!(service.list_rooms().len(), 2);

        gate.notify_one();
        slow.await.expect("join").expect("slow converse");
        assert_eq!(service.store().get(RoomId::new(1)).expect("get").len(), 4);
    }

    #[tokio::test]
    async fn listing_matches_accumulated_turns() {
        let backend = Arc::new(ScriptedBackend::replying(["A1", "B1", "A2"]));
        let service = service(backend);

        service.converse(RoomId::new(1), "开始").await.expect("a");
        service.converse(RoomId::new(2), "开始").await.expect("b");
        service.converse(RoomId::new(1), "问题").await.expect("a2");

        let rooms = service.list_rooms();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room_id, RoomId::new(1));
        let turns: Vec<_> = rooms[0].chat_messages.iter().map(ChatTurn::content).collect();
        assert_eq!(turns, vec!["开始", "A1", "问题", "A2"]);
        assert_eq!(rooms[1].chat_messages.len(), 2);

        assert_eq!(service.list_rooms(), rooms);
    }

    #[tokio::test]
    async fn evict_idle_ends_stale_sessions() {
        let service = service(Arc::new(ScriptedBackend::default()));
        service.converse(RoomId::new(1), "开始").await.expect("start");

        assert!(service.evict_idle(Duration::from_secs(3600)).is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.evict_idle(Duration::from_millis(1)), vec![RoomId::new(1)]);

        let err = service.converse(RoomId::new(1), "线索").await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &ConversationError::SessionNotStarted { room_id: RoomId::new(1) }
        );
    }
}
