/// Typing indicator tests - expiry, refresh and explicit stop
mod common;

use chatsync_core::ConnectionState;
use common::{harness, settle, test_config, Harness};
use std::time::Duration;
use tokio::time::sleep;

const TYPING: &str = "/user/queue/typing";

async fn connected() -> Harness {
    let h = harness(test_config());
    assert_eq!(h.engine.init().await, ConnectionState::Connected);
    h
}

fn typing(h: &Harness, user: &str, is_typing: bool) {
    h.transport.push_frame(
        TYPING,
        &format!(
            r#"{{"conversationId":"c1","userId":"{}","isTyping":{}}}"#,
            user, is_typing
        ),
    );
}

#[tokio::test(start_paused = true)]
async fn test_typing_expires_after_ttl() {
    let h = connected().await;
    typing(&h, "bob", true);
    settle().await;
    assert_eq!(h.engine.store().typing_users("c1"), vec!["bob"]);

    sleep(Duration::from_millis(2900)).await;
    assert_eq!(h.engine.store().typing_users("c1"), vec!["bob"]);

    sleep(Duration::from_millis(200)).await;
    assert!(h.engine.store().typing_users("c1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_extends_typing() {
    let h = connected().await;
    typing(&h, "bob", true);
    settle().await;

    sleep(Duration::from_millis(2000)).await;
    typing(&h, "bob", true);
    settle().await;

    sleep(Duration::from_millis(2000)).await;
    assert_eq!(h.engine.store().typing_users("c1"), vec!["bob"]);

    sleep(Duration::from_millis(1100)).await;
    assert!(h.engine.store().typing_users("c1").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_immediately() {
    let h = connected().await;
    typing(&h, "bob", true);
    typing(&h, "carol", true);
    settle().await;
    assert_eq!(h.engine.store().typing_users("c1"), vec!["bob", "carol"]);

    typing(&h, "bob", false);
    settle().await;
    assert_eq!(h.engine.store().typing_users("c1"), vec!["carol"]);
}

#[tokio::test(start_paused = true)]
async fn test_own_typing_echo_is_ignored() {
    let h = connected().await;
    typing(&h, "me", true);
    settle().await;
    assert!(h.engine.store().typing_users("c1").is_empty());
}
