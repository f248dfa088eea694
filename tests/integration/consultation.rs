use super::*;
use async_trait::async_trait;
use macau_law_kb::{
    models::internal::{Conversation, ConversationMessage, MessageRole, SaveConversation, UserRole},
    orchestrator::{CompletionSummary, EventSink, StreamEvent},
    services::llm::{ChatPart, ChatResponse, ChatRole, LlmError, ToolCall},
    storage::{
        entities::usage_logs, ConversationStore, RepositoryError, SeaOrmRepository, UserStore,
    },
};
use mockall::mock;
use sea_orm::EntityTrait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mock! {
    pub Store {}

    #[async_trait]
    impl ConversationStore for Store {
        async fn save_conversation(&self, save: SaveConversation) -> Result<String, RepositoryError>;
        async fn record_token_usage(&self, user_id: &str, tokens: u64) -> Result<(), RepositoryError>;
        async fn log_usage(&self, user_id: &str, feature: &str, tokens: u64) -> Result<(), RepositoryError>;
        async fn list_conversations(&self, user_id: &str, limit: u64) -> Result<Vec<Conversation>, RepositoryError>;
        async fn find_conversation(&self, user_id: &str, conversation_id: &str) -> Result<Option<Conversation>, RepositoryError>;
    }
}

fn completion(events: &[StreamEvent]) -> &CompletionSummary {
    match events.last() {
        Some(StreamEvent::Completion(summary)) => summary,
        other => panic!("expected completion as the final event, got {other:?}"),
    }
}

fn assert_single_terminal(events: &[StreamEvent]) {
    let completions = events.iter().filter(|e| e.is_completion()).count();
    match events.last() {
        Some(StreamEvent::Completion(_)) => assert_eq!(completions, 1),
        Some(StreamEvent::Error(_)) => assert_eq!(completions, 0),
        other => panic!("stream did not end with a terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn test_plain_answer_emits_steps_chunk_and_completion() {
    let repo = memory_repo().await;
    repo.find_or_create_profile("u1", None).await.unwrap();

    let chat = Arc::new(ScriptedChat::new(vec![text_response("hi", 10)]));
    let orch = orchestrator(
        chat.clone(),
        Arc::new(FixedEmbeddings::new(3)),
        Arc::new(FixedSearch::new(vec![])),
        repo.clone(),
    );

    let events = collect(orch.start(turn(
        user("u1", UserRole::Member, 5000),
        "Can I sublet?",
    )))
    .await;

    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], StreamEvent::Step(_)));
    assert!(matches!(events[1], StreamEvent::Step(_)));
    assert_eq!(events[2], StreamEvent::ResponseChunk("hi".to_string()));
    let summary = completion(&events);
    assert_eq!(summary.tokens_used, 10);
    assert_eq!(summary.remaining_tokens, 4990);
    assert!(!summary.conversation_id.starts_with("temp-"));

    let saved = repo
        .find_conversation("u1", &summary.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.title, "Can I sublet?");
    assert_eq!(saved.total_tokens, 10);
    assert_eq!(saved.model_name, "gemini-2.5-flash");
    assert_eq!(saved.messages.len(), 2);
    assert_eq!(saved.messages[1].role, MessageRole::Assistant);
    assert_eq!(saved.messages[1].tokens_used, Some(10));

    let profile = repo.find_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.tokens_used, 10);

    let logs = usage_logs::Entity::find().all(repo.get_db()).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].feature, "ai_consultation");
    assert_eq!(logs[0].tokens_used, 10);
}

#[tokio::test]
async fn test_tool_round_searches_and_extends_the_conversation() {
    let repo = memory_repo().await;
    let chat = Arc::new(ScriptedChat::new(vec![
        tool_response("X", 30),
        text_response("answer", 50),
    ]));
    let embeddings = Arc::new(FixedEmbeddings::new(6));
    let search = Arc::new(FixedSearch::new(vec![
        legal_doc("doc-1", "Civil Code"),
        legal_doc("doc-2", "Commercial Code"),
    ]));
    let orch = orchestrator(chat.clone(), embeddings.clone(), search.clone(), repo.clone());

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "question"))).await;

    assert_eq!(*embeddings.texts.lock().unwrap(), vec!["X".to_string()]);
    assert_eq!(*search.requested_k.lock().unwrap(), vec![20]);
    assert_eq!(chat.calls(), 2);

    let requests = chat.requests.lock().unwrap();
    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].role, ChatRole::Model);
    assert!(second[1].has_tool_call());
    assert_eq!(second[2].role, ChatRole::User);
    assert!(second[2].has_tool_response());
    match &second[2].parts[0] {
        ChatPart::ToolResponse { name, content } => {
            assert_eq!(name, "search_legal_knowledge_base");
            assert!(content.contains("Found 2 relevant legal documents"));
            assert!(content.contains("Civil Code"));
        }
        other => panic!("unexpected part: {other:?}"),
    }
    // every call offers the knowledge base tool
    assert!(requests.iter().all(|r| r.tools.len() == 1));
    drop(requests);

    assert!(events.contains(&StreamEvent::ResponseChunk("answer".to_string())));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Step(s) if s.contains("Searching legal documents"))));

    let summary = completion(&events);
    assert_eq!(summary.tokens_used, 30 + 6 + 50);

    let saved = repo
        .find_conversation("u1", &summary.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        saved.messages[1].document_ids,
        Some(vec!["doc-1".to_string(), "doc-2".to_string()])
    );
}

#[tokio::test]
async fn test_interim_text_is_narrated_before_tool_results() {
    let chat = Arc::new(ScriptedChat::new(vec![
        ChatResponse::from_parts(
            vec![
                ChatPart::Text("Let me check the statutes.".to_string()),
                ChatPart::ToolCall(ToolCall {
                    name: "search_legal_knowledge_base".to_string(),
                    args: json!({ "keywords": "lease" }),
                }),
            ],
            5,
        ),
        text_response("done", 5),
    ]));
    let orch = orchestrator(
        chat,
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![legal_doc("d", "Lease Law")])),
        memory_repo().await,
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "lease?"))).await;
    let chunks: Vec<&StreamEvent> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::ResponseChunk(_)))
        .collect();
    assert_eq!(
        chunks,
        vec![
            &StreamEvent::ResponseChunk("Let me check the statutes.".to_string()),
            &StreamEvent::ResponseChunk("done".to_string()),
        ]
    );
    assert_single_terminal(&events);
}

#[tokio::test]
async fn test_zero_hits_is_advisory_and_leaves_provenance_empty() {
    let repo = memory_repo().await;
    let chat = Arc::new(ScriptedChat::new(vec![
        tool_response("obscure", 10),
        text_response("Nothing specific found.", 10),
    ]));
    let orch = orchestrator(
        chat.clone(),
        Arc::new(FixedEmbeddings::new(2)),
        Arc::new(FixedSearch::new(vec![])),
        repo.clone(),
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "obscure?"))).await;

    assert!(events.contains(&StreamEvent::Error(
        "No relevant legal documents found for \"obscure\"".to_string()
    )));
    assert_single_terminal(&events);
    let summary = completion(&events);
    assert_eq!(summary.tokens_used, 22);

    let requests = chat.requests.lock().unwrap();
    assert_eq!(
        requests[1].messages[2].parts,
        vec![ChatPart::ToolResponse {
            name: "search_legal_knowledge_base".to_string(),
            content: String::new(),
        }]
    );
    drop(requests);

    let saved = repo
        .find_conversation("u1", &summary.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.messages[1].document_ids, Some(vec![]));
}

#[tokio::test]
async fn test_pro_model_applies_surcharge() {
    let repo = memory_repo().await;
    let chat = Arc::new(ScriptedChat::new(vec![text_response("hi", 10)]));
    let orch = orchestrator(
        chat.clone(),
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        repo.clone(),
    );

    let mut pro_turn = turn(user("vip", UserRole::Vip, 1000), "question");
    pro_turn.use_pro_model = true;
    let events = collect(orch.start(pro_turn)).await;

    let summary = completion(&events);
    assert_eq!(summary.tokens_used, 20);
    assert_eq!(summary.remaining_tokens, 980);
    assert!(chat.requests.lock().unwrap()[0].use_pro_model);

    let saved = repo
        .find_conversation("vip", &summary.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.model_name, "gemini-2.5-pro");
}

#[tokio::test]
async fn test_persistence_failure_falls_back_to_temporary_ids() {
    let mut store = MockStore::new();
    store
        .expect_record_token_usage()
        .returning(|_, _| Ok(()));
    store.expect_save_conversation().returning(|_| {
        Err(RepositoryError::DbError(sea_orm::DbErr::Custom(
            "disk full".to_string(),
        )))
    });
    store
        .expect_log_usage()
        .returning(|_, _, _| Err(RepositoryError::NotFound("usage_logs".to_string())));

    let chat = Arc::new(ScriptedChat::new(vec![
        text_response("first", 5),
        text_response("second", 5),
    ]));
    let orch = orchestrator(
        chat,
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        Arc::new(store),
    );

    let mut ids = Vec::new();
    for _ in 0..2 {
        let mut t = turn(user("u1", UserRole::Member, 5000), "question");
        t.conversation_id = Some("existing-id".to_string());
        let events = collect(orch.start(t)).await;
        let summary = completion(&events);
        assert_eq!(summary.tokens_used, 5);
        ids.push(summary.conversation_id.clone());
    }

    assert!(ids.iter().all(|id| id.starts_with("temp-")));
    assert!(ids.iter().all(|id| id != "existing-id"));
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_save_receives_turn_messages_and_title() {
    let mut store = MockStore::new();
    store.expect_record_token_usage().returning(|_, _| Ok(()));
    store
        .expect_save_conversation()
        .withf(|save| {
            save.user_id == "u1"
                && save.conversation_id.is_none()
                && save.new_messages.len() == 2
                && save.new_messages[0].role == MessageRole::User
                && save.new_messages[1].content == "hi"
                && save.title.as_deref() == Some("question")
                && save.tokens_used == 10
        })
        .times(1)
        .returning(|_| Ok("conv-1".to_string()));
    store
        .expect_log_usage()
        .withf(|user, feature, tokens| {
            user == "u1" && feature == "ai_consultation" && *tokens == 10
        })
        .times(1)
        .returning(|_, _, _| Ok(()));

    let mut t = turn(user("u1", UserRole::Member, 5000), "question");
    t.history = vec![
        ConversationMessage::user("earlier"),
        ConversationMessage::assistant("earlier answer", vec![], 3),
    ];

    let chat = Arc::new(ScriptedChat::new(vec![text_response("hi", 10)]));
    let orch = orchestrator(
        chat.clone(),
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        Arc::new(store),
    );

    let events = collect(orch.start(t)).await;
    assert_eq!(completion(&events).conversation_id, "conv-1");

    // caller history is forwarded with relabelled roles
    let requests = chat.requests.lock().unwrap();
    let roles: Vec<ChatRole> = requests[0].messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![ChatRole::User, ChatRole::Model, ChatRole::User]);
}

#[tokio::test]
async fn test_follow_up_turn_appends_to_existing_conversation() {
    let repo = memory_repo().await;
    let chat = Arc::new(ScriptedChat::new(vec![
        text_response("a1", 10),
        text_response("a2", 15),
    ]));
    let orch = orchestrator(
        chat,
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        repo.clone(),
    );

    let first = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "q1"))).await;
    let id = completion(&first).conversation_id.clone();

    let mut follow_up = turn(user("u1", UserRole::Member, 4990), "q2");
    follow_up.conversation_id = Some(id.clone());
    let second = collect(orch.start(follow_up)).await;
    assert_eq!(completion(&second).conversation_id, id);

    let saved = repo.find_conversation("u1", &id).await.unwrap().unwrap();
    assert_eq!(saved.messages.len(), 4);
    assert_eq!(saved.total_tokens, 25);
    assert_eq!(saved.title, "q1");
}

#[tokio::test]
async fn test_endless_tool_calls_are_bounded() {
    // no expectations: any persistence call would panic the turn
    let store = MockStore::new();
    let chat = Arc::new(ScriptedChat::repeating(tool_response("again", 1)));
    let orch = orchestrator(
        chat.clone(),
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![legal_doc("d", "Law")])),
        Arc::new(store),
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "loop"))).await;

    match events.last() {
        Some(StreamEvent::Error(message)) => assert!(message.contains("more than 5")),
        other => panic!("expected a fatal error, got {other:?}"),
    }
    assert_single_terminal(&events);
    assert_eq!(chat.calls(), 6);
}

#[tokio::test]
async fn test_empty_model_response_is_fatal() {
    let chat = Arc::new(ScriptedChat::new(vec![text_response("   ", 4)]));
    let orch = orchestrator(
        chat,
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        Arc::new(MockStore::new()),
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "q"))).await;

    assert!(matches!(events.last(), Some(StreamEvent::Error(_))));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::ResponseChunk(_))));
    assert_single_terminal(&events);
}

#[tokio::test]
async fn test_tool_signal_without_parts_is_fatal() {
    let malformed = ChatResponse {
        text: None,
        tool_calls: vec![ToolCall {
            name: "search_legal_knowledge_base".to_string(),
            args: json!({ "keywords": "x" }),
        }],
        parts: vec![],
        total_tokens: 3,
    };
    let chat = Arc::new(ScriptedChat::new(vec![malformed]));
    let embeddings = Arc::new(FixedEmbeddings::new(1));
    let orch = orchestrator(
        chat,
        embeddings.clone(),
        Arc::new(FixedSearch::new(vec![])),
        Arc::new(MockStore::new()),
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "q"))).await;

    assert!(matches!(events.last(), Some(StreamEvent::Error(_))));
    assert!(embeddings.texts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_yields_generic_error() {
    let chat = Arc::new(ScriptedChat::failing(LlmError::ApiError {
        status: 500,
        message: "internal stack trace".to_string(),
    }));
    let orch = orchestrator(
        chat,
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        Arc::new(MockStore::new()),
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "q"))).await;

    match events.last() {
        Some(StreamEvent::Error(message)) => {
            assert!(!message.contains("stack trace"));
            assert!(message.contains("try again"));
        }
        other => panic!("expected an error event, got {other:?}"),
    }
    assert!(matches!(events[0], StreamEvent::Step(_)));
}

#[tokio::test]
async fn test_unknown_tool_gets_an_explanatory_response() {
    let chat = Arc::new(ScriptedChat::new(vec![
        ChatResponse::from_parts(
            vec![ChatPart::ToolCall(ToolCall {
                name: "lookup_weather".to_string(),
                args: json!({}),
            })],
            2,
        ),
        text_response("ok", 2),
    ]));
    let embeddings = Arc::new(FixedEmbeddings::new(1));
    let orch = orchestrator(
        chat.clone(),
        embeddings.clone(),
        Arc::new(FixedSearch::new(vec![])),
        memory_repo().await,
    );

    let events = collect(orch.start(turn(user("u1", UserRole::Member, 5000), "q"))).await;
    assert_eq!(completion(&events).tokens_used, 4);
    assert!(embeddings.texts.lock().unwrap().is_empty());

    let requests = chat.requests.lock().unwrap();
    match &requests[1].messages[2].parts[0] {
        ChatPart::ToolResponse { name, content } => {
            assert_eq!(name, "lookup_weather");
            assert!(content.contains("not available"));
        }
        other => panic!("unexpected part: {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnected_consumer_abandons_the_turn() {
    let repo = memory_repo().await;
    let chat = Arc::new(ScriptedChat::new(vec![text_response("hi", 10)]));
    let orch = orchestrator(
        chat.clone(),
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        repo.clone(),
    );

    let (sink, receiver) = EventSink::channel(8);
    drop(receiver);
    orch.run(turn(user("u1", UserRole::Member, 5000), "q"), sink)
        .await;

    assert_eq!(chat.calls(), 0);
    assert!(repo.list_conversations("u1", 10).await.unwrap().is_empty());
}

/// Repository whose ledger update is slow enough for a client to leave mid-persist.
struct SlowLedgerStore {
    inner: Arc<SeaOrmRepository>,
    charged: AtomicUsize,
}

#[async_trait]
impl ConversationStore for SlowLedgerStore {
    async fn save_conversation(&self, save: SaveConversation) -> Result<String, RepositoryError> {
        self.inner.save_conversation(save).await
    }

    async fn record_token_usage(&self, user_id: &str, tokens: u64) -> Result<(), RepositoryError> {
        self.charged.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.inner.record_token_usage(user_id, tokens).await
    }

    async fn log_usage(
        &self,
        user_id: &str,
        feature: &str,
        tokens: u64,
    ) -> Result<(), RepositoryError> {
        self.inner.log_usage(user_id, feature, tokens).await
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        self.inner.list_conversations(user_id, limit).await
    }

    async fn find_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        self.inner.find_conversation(user_id, conversation_id).await
    }
}

#[tokio::test]
async fn test_delivered_answer_is_saved_after_client_leaves() {
    let repo = memory_repo().await;
    repo.find_or_create_profile("u1", None).await.unwrap();
    let store = Arc::new(SlowLedgerStore {
        inner: repo.clone(),
        charged: AtomicUsize::new(0),
    });

    let orch = orchestrator(
        Arc::new(ScriptedChat::new(vec![text_response("You may.", 10)])),
        Arc::new(FixedEmbeddings::new(1)),
        Arc::new(FixedSearch::new(vec![])),
        store.clone(),
    );

    let (sink, mut receiver) = EventSink::channel(8);
    let consumer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if matches!(event, StreamEvent::ResponseChunk(_)) {
                return true;
            }
        }
        false
    });

    orch.run(turn(user("u1", UserRole::Member, 5000), "Can I sublet?"), sink)
        .await;
    assert!(consumer.await.unwrap(), "answer was never delivered");

    assert_eq!(store.charged.load(Ordering::SeqCst), 1);
    let saved = repo.list_conversations("u1", 10).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].messages[1].content, "You may.");

    let profile = repo.find_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.tokens_used, 10);
    let logs = usage_logs::Entity::find().all(repo.get_db()).await.unwrap();
    assert_eq!(logs.len(), 1);
}
