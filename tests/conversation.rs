//! Conversation store tests

use parley_gateway::conversation::{ConversationStore, Role, HISTORY_WINDOW, PROMPT_WINDOW};

#[tokio::test]
async fn append_creates_conversation_lazily() {
    let store = ConversationStore::new();
    assert_eq!(store.stats().await.conversation_count, 0);

    store.append("u1", Role::User, "hello").await;
    let stats = store.stats().await;
    assert_eq!(stats.conversation_count, 1);
    assert_eq!(stats.total_turns, 1);
}

#[tokio::test]
async fn window_returns_last_n_in_arrival_order() {
    let store = ConversationStore::new();
    for i in 0..30 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        store.append("u1", role, &format!("turn {i}")).await;
    }

    let window = store.window("u1", PROMPT_WINDOW).await;
    assert_eq!(window.len(), PROMPT_WINDOW);
    assert_eq!(window[0].content, "turn 20");
    assert_eq!(window[9].content, "turn 29");

    let window = store.window("u1", HISTORY_WINDOW).await;
    assert_eq!(window.len(), HISTORY_WINDOW);
    assert_eq!(window[0].content, "turn 10");

    // asking for more than exists returns everything
    let window = store.window("u1", 100).await;
    assert_eq!(window.len(), 30);
}

#[tokio::test]
async fn window_for_unknown_user_is_empty() {
    let store = ConversationStore::new();
    assert!(store.window("nobody", 10).await.is_empty());
}

#[tokio::test]
async fn clear_removes_only_that_user() {
    let store = ConversationStore::new();
    store.append("u1", Role::User, "hi").await;
    store.append("u2", Role::User, "hey").await;

    assert!(store.clear("u1").await);
    assert!(!store.clear("u1").await);

    let stats = store.stats().await;
    assert_eq!(stats.conversation_count, 1);
    assert_eq!(stats.total_turns, 1);
    assert!(store.window("u1", 10).await.is_empty());
    assert_eq!(store.window("u2", 10).await.len(), 1);
}

#[tokio::test]
async fn users_are_independent() {
    let store = ConversationStore::new();
    store.append("u1", Role::User, "apple").await;
    store.append("u2", Role::User, "banana").await;
    store.append("u1", Role::Assistant, "about apples").await;

    let u1 = store.window("u1", 10).await;
    assert_eq!(u1.len(), 2);
    assert!(u1.iter().all(|t| !t.content.contains("banana")));
}

#[tokio::test]
async fn concurrent_appends_are_all_recorded() {
    let store = ConversationStore::new();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for j in 0..50 {
                store
                    .append(&format!("user{i}"), Role::User, &format!("m{j}"))
                    .await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = store.stats().await;
    assert_eq!(stats.conversation_count, 8);
    assert_eq!(stats.total_turns, 400);

    // per-user ordering is preserved
    let window = store.window("user0", 50).await;
    assert_eq!(window[0].content, "m0");
    assert_eq!(window[49].content, "m49");
}
