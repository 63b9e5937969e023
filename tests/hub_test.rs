// End-to-end hub scenarios driven through the dispatcher, the same path
// the websocket transport uses.

use std::sync::Arc;

use tokio::sync::mpsc;
use warp::ws::Message;

use classhub::auth::identity::{Role, VerifiedIdentity};
use classhub::auth::verifier::StaticTokenVerifier;
use classhub::core::dispatcher::Dispatcher;
use classhub::core::hub::{Collaborators, Hub, HubOptions, SharedHub};
use classhub::core::message::{Envelope, MessageType};
use classhub::safety::classifier::ScriptedClassifier;
use classhub::services::locale::StaticLocaleLookup;
use classhub::services::translation::IdentityTranslator;
use classhub::session::classroom::SessionState;
use classhub::session::manager::EndAuthority;

struct TestHub {
    hub: SharedHub,
    dispatcher: Dispatcher,
    verifier: Arc<StaticTokenVerifier>,
}

fn build_hub(options: HubOptions) -> TestHub {
    let verifier = Arc::new(StaticTokenVerifier::new());
    let hub = Hub::new(
        options,
        Collaborators {
            verifier: verifier.clone(),
            classifier: Arc::new(ScriptedClassifier::new()),
            translator: Arc::new(IdentityTranslator),
            locale: Arc::new(StaticLocaleLookup::default()),
        },
    );
    let dispatcher = Dispatcher::new(hub.clone());
    TestHub {
        hub,
        dispatcher,
        verifier,
    }
}

fn identity(user_id: &str, role: Role, parent_id: Option<&str>) -> VerifiedIdentity {
    VerifiedIdentity::new(
        user_id.to_string(),
        role,
        parent_id.map(str::to_string),
        chrono::Utc::now().timestamp() + 3600,
    )
}

fn raw_envelope(kind: &str, data: serde_json::Value) -> String {
    serde_json::json!({
        "message_id": uuid::Uuid::new_v4(),
        "type": kind,
        "timestamp": chrono::Utc::now(),
        "data": data,
    })
    .to_string()
}

async fn connect(hub: &SharedHub) -> (String, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = hub.register_connection(tx).await;
    (id, rx)
}

async fn authenticate(env: &TestHub, connection_id: &str, token: &str) {
    env.dispatcher
        .handle_message(
            connection_id,
            &raw_envelope("AUTH_REQUEST", serde_json::json!({ "token": token })),
        )
        .await
        .expect("auth request should be accepted");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Envelope> {
    let mut envelopes = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Ok(text) = msg.to_str() {
            if let Ok(envelope) = Envelope::parse(text) {
                envelopes.push(envelope);
            }
        }
    }
    envelopes
}

fn count_kind(envelopes: &[Envelope], kind: MessageType) -> usize {
    envelopes.iter().filter(|e| e.kind == kind).count()
}

#[tokio::test]
async fn test_full_classroom_scenario() {
    let env = build_hub(HubOptions::default());

    env.verifier
        .insert("tok-t", identity("teacher-1", Role::Teacher, None))
        .await;
    env.verifier
        .insert("tok-a", identity("student-a", Role::Student, Some("parent-a")))
        .await;
    env.verifier
        .insert("tok-b", identity("student-b", Role::Student, Some("parent-b")))
        .await;

    // Teacher creates the classroom through the management surface
    let classroom_id = env
        .hub
        .sessions()
        .create_classroom("teacher-1", "astronomy", Some(10), false)
        .await;
    let status = env.hub.sessions().get_session_status(&classroom_id).await.unwrap();
    assert_eq!(status.state, SessionState::Initializing);

    // Student A joins: the classroom activates
    let (conn_a, mut rx_a) = connect(&env.hub).await;
    authenticate(&env, &conn_a, "tok-a").await;
    env.dispatcher
        .handle_message(
            &conn_a,
            &raw_envelope(
                "JOIN_CLASSROOM",
                serde_json::json!({ "classroom_id": classroom_id, "platform": "quest" }),
            ),
        )
        .await
        .unwrap();
    let status = env.hub.sessions().get_session_status(&classroom_id).await.unwrap();
    assert_eq!(status.state, SessionState::Active);

    // Student B joins: two participants, and A sees the join broadcast
    let (conn_b, mut rx_b) = connect(&env.hub).await;
    authenticate(&env, &conn_b, "tok-b").await;
    env.dispatcher
        .handle_message(
            &conn_b,
            &raw_envelope(
                "JOIN_CLASSROOM",
                serde_json::json!({ "classroom_id": classroom_id, "platform": "quest" }),
            ),
        )
        .await
        .unwrap();
    let status = env.hub.sessions().get_session_status(&classroom_id).await.unwrap();
    assert_eq!(status.participant_count, 2);

    let a_inbox = drain(&mut rx_a);
    assert_eq!(count_kind(&a_inbox, MessageType::UserJoined), 1);
    // B joined after A's broadcast, so B saw no USER_JOINED for itself
    let b_inbox = drain(&mut rx_b);
    assert_eq!(count_kind(&b_inbox, MessageType::UserJoined), 0);

    // A broadcasts an interaction: B receives exactly one, A none
    env.dispatcher
        .handle_message(
            &conn_a,
            &raw_envelope(
                "INTERACTION",
                serde_json::json!({ "content": "look at saturn" }),
            ),
        )
        .await
        .unwrap();

    let b_inbox = drain(&mut rx_b);
    assert_eq!(count_kind(&b_inbox, MessageType::Interaction), 1);
    let interaction = b_inbox
        .iter()
        .find(|e| e.kind == MessageType::Interaction)
        .unwrap();
    assert_eq!(interaction.sender_id.as_deref(), Some("student-a"));
    let a_inbox = drain(&mut rx_a);
    assert_eq!(count_kind(&a_inbox, MessageType::Interaction), 0);

    // Teacher ends the session: both students are notified and removed,
    // and the classroom reaches ENDED with a report.
    let report = env
        .hub
        .sessions()
        .end_classroom_session(&classroom_id, EndAuthority::Teacher("teacher-1".to_string()))
        .await
        .unwrap();
    assert_eq!(report.participant_count, 2);

    let status = env.hub.sessions().get_session_status(&classroom_id).await.unwrap();
    assert_eq!(status.state, SessionState::Ended);
    assert_eq!(status.participant_count, 0);

    for rx in [&mut rx_a, &mut rx_b] {
        let inbox = drain(rx);
        assert_eq!(
            count_kind(&inbox, MessageType::Notification),
            1,
            "each participant gets the session-ending notice"
        );
    }
    assert_eq!(env.hub.rooms().member_count(&classroom_id).await, 0);
}

#[tokio::test]
async fn test_unauthenticated_messages_rejected() {
    let env = build_hub(HubOptions::default());
    let (conn, mut rx) = connect(&env.hub).await;

    // Heartbeat is always allowed
    env.dispatcher
        .handle_message(&conn, &raw_envelope("HEARTBEAT", serde_json::json!({})))
        .await
        .unwrap();

    // Anything else bounces with a protocol error
    let result = env
        .dispatcher
        .handle_message(
            &conn,
            &raw_envelope("INTERACTION", serde_json::json!({ "content": "hi" })),
        )
        .await;
    assert!(result.is_err());

    let inbox = drain(&mut rx);
    assert_eq!(count_kind(&inbox, MessageType::Error), 1);
}

#[tokio::test]
async fn test_auth_failure_allows_retry() {
    let env = build_hub(HubOptions::default());
    env.verifier
        .insert("tok-good", identity("user-1", Role::Student, Some("p-1")))
        .await;

    let (conn, mut rx) = connect(&env.hub).await;

    authenticate(&env, &conn, "tok-bad").await;
    let inbox = drain(&mut rx);
    assert_eq!(count_kind(&inbox, MessageType::AuthFailed), 1);

    // The connection stayed open and may retry with a valid token
    authenticate(&env, &conn, "tok-good").await;
    let inbox = drain(&mut rx);
    assert_eq!(count_kind(&inbox, MessageType::AuthSuccess), 1);
}

#[tokio::test]
async fn test_reauthentication_keeps_first_identity() {
    let env = build_hub(HubOptions::default());
    env.verifier
        .insert("tok-1", identity("user-1", Role::Student, Some("p-1")))
        .await;
    env.verifier
        .insert("tok-2", identity("user-2", Role::Student, Some("p-2")))
        .await;

    let (conn, mut rx) = connect(&env.hub).await;
    authenticate(&env, &conn, "tok-1").await;
    authenticate(&env, &conn, "tok-2").await;

    let inbox = drain(&mut rx);
    assert_eq!(count_kind(&inbox, MessageType::AuthSuccess), 2);

    let registry = env.hub.registry().read().await;
    assert_eq!(registry.identity(&conn).unwrap().user_id, "user-1");
}

#[tokio::test]
async fn test_rate_limit_drops_message_but_keeps_connection() {
    let mut options = HubOptions::default();
    options.rate_limit_max_messages = 2;
    let env = build_hub(options);

    env.verifier
        .insert("tok-a", identity("student-a", Role::Student, Some("p-a")))
        .await;
    env.verifier
        .insert("tok-b", identity("student-b", Role::Student, Some("p-b")))
        .await;

    let classroom_id = env
        .hub
        .sessions()
        .create_classroom("teacher-1", "math", None, false)
        .await;

    let (conn_a, mut rx_a) = connect(&env.hub).await;
    authenticate(&env, &conn_a, "tok-a").await;
    let (conn_b, mut rx_b) = connect(&env.hub).await;
    authenticate(&env, &conn_b, "tok-b").await;

    // Join consumes one budget slot each
    for conn in [&conn_a, &conn_b] {
        env.dispatcher
            .handle_message(
                conn,
                &raw_envelope(
                    "JOIN_CLASSROOM",
                    serde_json::json!({ "classroom_id": classroom_id, "platform": "quest" }),
                ),
            )
            .await
            .unwrap();
    }
    drain(&mut rx_a);
    drain(&mut rx_b);

    // Second message fits the window, third is dropped
    env.dispatcher
        .handle_message(
            &conn_a,
            &raw_envelope("INTERACTION", serde_json::json!({ "content": "one" })),
        )
        .await
        .unwrap();
    let result = env
        .dispatcher
        .handle_message(
            &conn_a,
            &raw_envelope("INTERACTION", serde_json::json!({ "content": "two" })),
        )
        .await;
    assert!(result.is_err());

    // B received only the first interaction; A got a rate_limited error
    // and remains connected.
    let b_inbox = drain(&mut rx_b);
    assert_eq!(count_kind(&b_inbox, MessageType::Interaction), 1);
    let a_inbox = drain(&mut rx_a);
    assert!(a_inbox.iter().any(|e| {
        e.kind == MessageType::Error
            && e.data["code"].as_str() == Some("rate_limited")
    }));
    assert!(env.hub.registry().read().await.get(&conn_a).is_some());
}

#[tokio::test]
async fn test_sender_fifo_ordering_preserved() {
    let env = build_hub(HubOptions::default());
    env.verifier
        .insert("tok-a", identity("student-a", Role::Student, Some("p-a")))
        .await;
    env.verifier
        .insert("tok-b", identity("student-b", Role::Student, Some("p-b")))
        .await;

    let classroom_id = env
        .hub
        .sessions()
        .create_classroom("teacher-1", "music", None, false)
        .await;

    let (conn_a, _rx_a) = connect(&env.hub).await;
    authenticate(&env, &conn_a, "tok-a").await;
    let (conn_b, mut rx_b) = connect(&env.hub).await;
    authenticate(&env, &conn_b, "tok-b").await;

    for conn in [&conn_a, &conn_b] {
        env.dispatcher
            .handle_message(
                conn,
                &raw_envelope(
                    "JOIN_CLASSROOM",
                    serde_json::json!({ "classroom_id": classroom_id, "platform": "quest" }),
                ),
            )
            .await
            .unwrap();
    }
    drain(&mut rx_b);

    for i in 0..5 {
        env.dispatcher
            .handle_message(
                &conn_a,
                &raw_envelope(
                    "INTERACTION",
                    serde_json::json!({ "content": format!("msg-{}", i) }),
                ),
            )
            .await
            .unwrap();
    }

    let received: Vec<String> = drain(&mut rx_b)
        .into_iter()
        .filter(|e| e.kind == MessageType::Interaction)
        .map(|e| e.data["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(received, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
}

#[tokio::test]
async fn test_translation_fail_open() {
    struct FailingTranslator;

    #[async_trait::async_trait]
    impl classhub::services::translation::Translator for FailingTranslator {
        async fn translate(
            &self,
            _text: &str,
            _source: &str,
            _target: &str,
        ) -> classhub::error::Result<String> {
            Err(classhub::error::ClassHubError::DependencyError(
                "translation engine down".to_string(),
            ))
        }
    }

    let verifier = Arc::new(StaticTokenVerifier::new());
    let hub = Hub::new(
        HubOptions::default(),
        Collaborators {
            verifier: verifier.clone(),
            classifier: Arc::new(ScriptedClassifier::new()),
            translator: Arc::new(FailingTranslator),
            locale: Arc::new(StaticLocaleLookup::default()),
        },
    );
    let dispatcher = Dispatcher::new(hub.clone());
    let env = TestHub {
        hub,
        dispatcher,
        verifier,
    };

    env.verifier
        .insert("tok", identity("user-1", Role::Student, Some("p-1")))
        .await;
    let (conn, mut rx) = connect(&env.hub).await;
    authenticate(&env, &conn, "tok").await;

    env.dispatcher
        .handle_message(
            &conn,
            &raw_envelope(
                "TRANSLATION_REQUEST",
                serde_json::json!({
                    "text": "hello",
                    "source_language": "en",
                    "target_language": "fr",
                }),
            ),
        )
        .await
        .unwrap();

    let inbox = drain(&mut rx);
    let response = inbox
        .iter()
        .find(|e| e.kind == MessageType::TranslationResponse)
        .expect("translation response must still arrive");
    assert_eq!(response.data["translated"].as_str(), Some("hello"));
    assert_eq!(response.data["degraded"].as_bool(), Some(true));
}
