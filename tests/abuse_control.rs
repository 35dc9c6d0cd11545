//! Flood, clone and routing abuse scenarios.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};

#[tokio::test]
async fn per_connection_chat_flood_drops_excess() {
    let extra = r#"
[flood.chat]
period = 10
limit = 2
action = "drop"
"#;
    let server = TestServer::spawn(17421, extra).await.expect("spawn server");

    let mut alice = TestClient::connect(&server.address()).await.unwrap();
    alice.login("alice", "NoHello", 'A', 0).await.unwrap();

    let mut bob = TestClient::connect(&server.address()).await.unwrap();
    bob.login("bob", "NoHello", 'A', 0).await.unwrap();

    // Messages must differ or the equal-as-last gate eats them first.
    for i in 0..3 {
        alice.send(&format!("<alice> hello {i}")).await.unwrap();
    }

    bob.expect("hello 0", Duration::from_secs(5)).await.unwrap();
    bob.expect("hello 1", Duration::from_secs(5)).await.unwrap();
    bob.expect_silence("hello 2", Duration::from_millis(700))
        .await
        .expect("third chat within the window must be dropped");
}

#[tokio::test]
async fn repeated_message_is_rejected() {
    let server = TestServer::spawn(17422, "").await.expect("spawn server");

    let mut alice = TestClient::connect(&server.address()).await.unwrap();
    alice.login("alice", "NoHello", 'A', 0).await.unwrap();

    let mut bob = TestClient::connect(&server.address()).await.unwrap();
    bob.login("bob", "NoHello", 'A', 0).await.unwrap();

    alice.send("<alice> same thing").await.unwrap();
    alice.send("<alice> same thing").await.unwrap();

    alice
        .expect("equals your previous message", Duration::from_secs(5))
        .await
        .expect("sender is told about the duplicate");

    bob.expect("same thing", Duration::from_secs(5)).await.unwrap();
    bob.expect_silence("same thing", Duration::from_millis(700))
        .await
        .expect("duplicate is not broadcast");
}

#[tokio::test]
async fn passive_to_passive_rctm_is_refused() {
    let server = TestServer::spawn(17423, "").await.expect("spawn server");

    let mut carol = TestClient::connect(&server.address()).await.unwrap();
    carol.login("carol", "NoHello", 'P', 1024).await.unwrap();

    let mut dave = TestClient::connect(&server.address()).await.unwrap();
    dave.login("dave", "NoHello", 'P', 1024).await.unwrap();

    // Drain dave's login traffic so silence below is meaningful.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while dave.recv(Duration::from_millis(50)).await.is_ok() {}

    carol.send("$RevConnectToMe carol dave").await.unwrap();

    carol
        .expect("also in passive mode", Duration::from_secs(5))
        .await
        .expect("carol gets the instructional line");
    dave.expect_silence("$RevConnectToMe", Duration::from_millis(700))
        .await
        .expect("nothing reaches dave");
}

#[tokio::test]
async fn active_rctm_is_forwarded_verbatim() {
    let server = TestServer::spawn(17424, "").await.expect("spawn server");

    let mut carol = TestClient::connect(&server.address()).await.unwrap();
    carol.login("carol", "NoHello", 'P', 1024).await.unwrap();

    let mut erin = TestClient::connect(&server.address()).await.unwrap();
    erin.login("erin", "NoHello", 'A', 1024).await.unwrap();

    carol.send("$RevConnectToMe carol erin").await.unwrap();

    let frame = erin
        .expect("$RevConnectToMe carol erin", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(frame, "$RevConnectToMe carol erin");
}

#[tokio::test]
async fn clone_sessions_are_banned() {
    let extra = r#"
[bans.clone]
detect_count = 2
tban_time = 3600
"#;
    let server = TestServer::spawn(17425, extra).await.expect("spawn server");

    let mut eve1 = TestClient::connect(&server.address()).await.unwrap();
    eve1.login("eve1", "NoHello", 'A', 5000).await.unwrap();

    // Same box, same client, different hub counts and mode: still the
    // same MyINFO after normalization.
    let mut eve2 = TestClient::connect(&server.address()).await.unwrap();
    eve2.handshake("NoHello").await.unwrap();
    eve2.send("$ValidateNick eve2").await.unwrap();
    eve2.expect("$Hello eve2", Duration::from_secs(5)).await.unwrap();
    eve2.send("$MyINFO $ALL eve2 testing <++ V:0.868,M:P,H:9/1/0,S:3>$ $100\u{1}$$5000$")
        .await
        .unwrap();

    eve2.expect("already in the hub using another nick", Duration::from_secs(5))
        .await
        .expect("clone is told about the first session");

    // The nick is temp-banned now.
    let mut eve2_again = TestClient::connect(&server.address()).await.unwrap();
    eve2_again.handshake("NoHello").await.unwrap();
    eve2_again.send("$ValidateNick eve2").await.unwrap();
    eve2_again
        .expect("temporarily prohibited", Duration::from_secs(5))
        .await
        .expect("banned nick is refused");
}

#[tokio::test]
async fn nick_spoofing_closes_the_connection() {
    let server = TestServer::spawn(17426, "").await.expect("spawn server");

    let mut mallory = TestClient::connect(&server.address()).await.unwrap();
    mallory.login("mallory", "NoHello", 'A', 0).await.unwrap();

    let mut victim = TestClient::connect(&server.address()).await.unwrap();
    victim.login("victim", "NoHello", 'A', 0).await.unwrap();

    mallory.send("<victim> I said nothing").await.unwrap();

    mallory
        .expect("nick that isn't yours", Duration::from_secs(5))
        .await
        .expect("spoof is called out before the close");
    victim
        .expect_silence("I said nothing", Duration::from_millis(700))
        .await
        .expect("the forged line is never delivered");
}
