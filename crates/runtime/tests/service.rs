//! End-to-end chat submissions with a shell worker and an in-memory store.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lantern_config::ChatConfig;
use lantern_context::{ContextBudgetManager, ContextLimits};
use lantern_core::message::ContentPart;
use lantern_core::store::{ChatId, ConversationStore};
use lantern_engine::{ChatTemplate, HeuristicTokenizer};
use lantern_runtime::{
    ChatError, ChatOutcome, ChatRequest, ChatService, NewUserMessage, Scheduler, WorkerCommand,
};
use lantern_store::InMemoryStore;

/// Answers "remembered" when the request carries earlier history, sleeps on
/// "slow", and otherwise answers "fresh".
const ENGINE: &str = r#"
if grep -q slow "$2"; then exec sleep 30; fi
if grep -q 'first question' "$2" && grep -q 'first answer' "$2"; then
  printf '{"status":"success","text":"remembered"}' > "$4"
elif grep -q 'first question' "$2"; then
  printf '{"status":"success","text":"first answer","metadata":{"prompt_tokens":5,"duration_ms":3}}' > "$4"
else
  printf '{"status":"success","text":"fresh"}' > "$4"
fi
"#;

fn service(dir: &Path) -> (ChatService, Arc<InMemoryStore>) {
    let command = WorkerCommand::new("sh", vec!["-c".into(), ENGINE.into(), "worker".into()]);
    let scheduler = Arc::new(Scheduler::new(command, dir, Duration::from_secs(2)));
    let budget = ContextBudgetManager::new(
        Arc::new(HeuristicTokenizer::new(ChatTemplate::ChatML)),
        ContextLimits::default(),
    );
    let store = Arc::new(InMemoryStore::new());
    let service = ChatService::new(scheduler, budget, store.clone(), ChatConfig::default(), 8000);
    (service, store)
}

fn ask(chat_id: Option<ChatId>, text: &str) -> ChatRequest {
    ChatRequest {
        chat_id,
        message: NewUserMessage::text(text),
        system_prompt: None,
    }
}

#[tokio::test]
async fn reply_is_stored_and_history_is_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = service(dir.path());

    let first = match service.submit_chat(ask(None, "first question")).await.unwrap() {
        ChatOutcome::Reply(reply) => reply,
        ChatOutcome::Stopped => panic!("unexpected stop"),
    };
    assert_eq!(first.reply, "first answer");
    assert_eq!(first.metadata.prompt_tokens, Some(5));
    assert_eq!(first.conversation.len(), 1);
    assert_eq!(first.budget.output_tokens, 8000);
    assert!(first.budget.input.system > 0);

    let second = match service
        .submit_chat(ask(Some(first.chat_id.clone()), "follow up"))
        .await
        .unwrap()
    {
        ChatOutcome::Reply(reply) => reply,
        ChatOutcome::Stopped => panic!("unexpected stop"),
    };
    assert_eq!(second.reply, "remembered");
    assert_eq!(second.chat_id, first.chat_id);
    assert_eq!(second.conversation.len(), 2);
    assert_eq!(second.conversation[1].question, "follow up");

    let chats = store.load_all().await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unknown_chat_id_starts_that_chat() {
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = service(dir.path());
    let id = ChatId::from("from-the-ui");

    let outcome = service.submit_chat(ask(Some(id.clone()), "hello")).await.unwrap();
    assert!(matches!(outcome, ChatOutcome::Reply(ref r) if r.chat_id == id && r.reply == "fresh"));
    assert!(store.lookup(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn image_turns_are_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = service(dir.path());

    let request = ChatRequest {
        chat_id: None,
        message: NewUserMessage {
            text: "what is this".into(),
            attachments: vec![ContentPart::Image {
                data: "iVBORw0KGgo=".into(),
            }],
        },
        system_prompt: Some("Describe images.".into()),
    };
    let ChatOutcome::Reply(reply) = service.submit_chat(request).await.unwrap() else {
        panic!("unexpected stop");
    };
    let stored = store.lookup(&reply.chat_id).await.unwrap().unwrap();
    assert!(stored.conversation[0].has_image);
    assert_eq!(stored.conversation[0].image_data.as_deref(), Some("iVBORw0KGgo="));
    assert_eq!(reply.conversation[0].image_data.as_deref(), Some("iVBORw0KGgo="));
}

#[tokio::test]
async fn cancelled_request_is_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = service(dir.path());
    let service = Arc::new(service);

    let pending = tokio::spawn({
        let service = service.clone();
        async move { service.submit_chat(ask(None, "slow please")).await }
    });
    for _ in 0..500 {
        if service.scheduler().in_flight().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(service.cancel_current().await);
    assert!(matches!(pending.await.unwrap().unwrap(), ChatOutcome::Stopped));
    assert!(store.load_all().await.unwrap().is_empty());
    assert!(!service.cancel_current().await);
}

#[tokio::test]
async fn empty_message_is_rejected_before_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _store) = service(dir.path());

    let err = service.submit_chat(ask(None, "   ")).await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
    assert!(service.scheduler().in_flight().await.is_none());
}

#[tokio::test]
async fn newer_message_wins_and_only_it_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let (service, store) = service(dir.path());
    let service = Arc::new(service);

    let first = tokio::spawn({
        let service = service.clone();
        async move { service.submit_chat(ask(None, "slow please")).await }
    });
    for _ in 0..500 {
        if service.scheduler().in_flight().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let second = service.submit_chat(ask(None, "quick one")).await.unwrap();
    let ChatOutcome::Reply(reply) = second else {
        panic!("newer message was stopped");
    };
    assert_eq!(reply.reply, "fresh");
    assert!(matches!(first.await.unwrap().unwrap(), ChatOutcome::Stopped));

    let chats = store.load_all().await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, reply.chat_id);
    assert_eq!(chats[0].conversation.len(), 1);
    assert_eq!(chats[0].conversation[0].question, "quick one");
    assert_eq!(chats[0].conversation[0].response, "fresh");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
