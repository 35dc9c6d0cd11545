//! End-to-end login pipeline tests.

mod common;

use std::time::Duration;

use common::{client, TestClient, TestServer};

#[tokio::test]
async fn successful_login_and_presentation() {
    let server = TestServer::spawn(17411, "").await.expect("spawn server");

    let mut alice = TestClient::connect(&server.address()).await.unwrap();
    alice
        .login("alice", "NoHello NoGetINFO TTHS UserIP2", 'A', 10_737_418_240)
        .await
        .expect("login failed");

    // A second user shows up; alice sees the broadcast sequence.
    let mut bob = TestClient::connect(&server.address()).await.unwrap();
    bob.login("bob", "NoHello NoGetINFO", 'A', 1024)
        .await
        .expect("second login failed");

    let frame = alice
        .expect("$MyINFO $ALL bob ", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(frame.contains("$1024$"), "share survives byte-exact: {frame}");
}

#[tokio::test]
async fn supports_echo_and_nick_rule() {
    let server = TestServer::spawn(17412, "").await.expect("spawn server");

    let mut client = TestClient::connect(&server.address()).await.unwrap();
    client.handshake("NoHello NickRule TTHS").await.unwrap();

    let echo = client.expect("$Supports ", Duration::from_secs(5)).await.unwrap();
    assert!(echo.contains("NoHello"));
    assert!(echo.contains("TTHS"));
    assert!(echo.contains("NickRule"));

    let rule = client.expect("$NickRule ", Duration::from_secs(5)).await.unwrap();
    assert!(rule.contains("Min 3$$"));
    assert!(rule.contains("Max 32$$"));
    assert!(rule.contains("Char "));
}

#[tokio::test]
async fn short_nick_gets_structured_rejection() {
    let server = TestServer::spawn(17413, "").await.expect("spawn server");

    let mut client = TestClient::connect(&server.address()).await.unwrap();
    client.handshake("NickRule").await.unwrap();
    client.send("$ValidateNick ab").await.unwrap();

    let reply = client.expect("$BadNick ", Duration::from_secs(5)).await.unwrap();
    assert_eq!(reply, "$BadNick Min 3");
}

#[tokio::test]
async fn nick_collision_is_denied() {
    let server = TestServer::spawn(17414, "").await.expect("spawn server");

    let mut first = TestClient::connect(&server.address()).await.unwrap();
    first.login("carol", "NoHello", 'A', 0).await.unwrap();

    let mut second = TestClient::connect(&server.address()).await.unwrap();
    second.handshake("NoHello").await.unwrap();
    second.send("$ValidateNick carol").await.unwrap();

    let reply = second
        .expect("$ValidateDenide carol", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reply, "$ValidateDenide carol");
}

#[tokio::test]
async fn wrong_password_temp_bans_the_address() {
    let extra = r#"
[[registered]]
nick = "bob"
class = 2
password_plain = "hunter2"
"#;
    let server = TestServer::spawn(17415, extra).await.expect("spawn server");

    let mut bob = TestClient::connect(&server.address()).await.unwrap();
    bob.handshake("NoHello").await.unwrap();
    bob.send("$ValidateNick bob").await.unwrap();
    bob.expect("$GetPass", Duration::from_secs(5)).await.unwrap();
    bob.send("$MyPass badpw").await.unwrap();

    bob.expect("temporarily banned", Duration::from_secs(5))
        .await
        .expect("explanation line before the disconnect frame");
    bob.expect("$BadPass", Duration::from_secs(5)).await.unwrap();

    // The reconnect within the window is refused with the ban line.
    let mut again = TestClient::connect(&server.address()).await.unwrap();
    let line = again
        .expect("temporarily prohibited", Duration::from_secs(5))
        .await
        .expect("temp-banned reconnect should be refused");
    assert!(line.contains("<"), "refusal arrives as a chat line: {line}");
}

#[tokio::test]
async fn correct_password_logs_in_and_ops_get_loggedin() {
    let extra = r#"
[[registered]]
nick = "root"
class = 7
password_plain = "s3cret"
"#;
    let server = TestServer::spawn(17416, extra).await.expect("spawn server");

    let mut root = TestClient::connect(&server.address()).await.unwrap();
    root.handshake("NoHello UserIP2").await.unwrap();
    root.send("$ValidateNick root").await.unwrap();
    root.expect("$GetPass", Duration::from_secs(5)).await.unwrap();
    root.send("$MyPass s3cret").await.unwrap();
    root.expect("$Hello root", Duration::from_secs(5)).await.unwrap();
    root.expect("$LogedIn root", Duration::from_secs(5)).await.unwrap();

    root.send(&client::my_info("root", 'A', 0)).await.unwrap();
    root.expect("$MyINFO $ALL root ", Duration::from_secs(5))
        .await
        .unwrap();

    // Operators appear in the short op list.
    root.expect("$OpList root$$", Duration::from_secs(5))
        .await
        .unwrap();
}

#[tokio::test]
async fn pinger_gets_hubinfo_and_stays_unlisted() {
    let server = TestServer::spawn(17417, "").await.expect("spawn server");

    let mut pinger = TestClient::connect(&server.address()).await.unwrap();
    pinger.handshake("BotINFO").await.unwrap();

    // BotINFO is answered with HubINFO in the supports echo.
    pinger.expect("HubINFO", Duration::from_secs(5)).await.unwrap();

    pinger.send("$ValidateNick crawler").await.unwrap();
    pinger
        .expect("$Hello crawler", Duration::from_secs(5))
        .await
        .unwrap();
    pinger.send("$BotINFO the.hublist.example").await.unwrap();

    let info = pinger.expect("$HubINFO ", Duration::from_secs(5)).await.unwrap();
    assert!(info.contains("test.hub"), "hub name in HubINFO: {info}");

    // The pinger is never shown to users.
    let mut alice = TestClient::connect(&server.address()).await.unwrap();
    alice.login("alice", "NoHello", 'A', 0).await.unwrap();
    alice
        .expect_silence("$MyINFO $ALL crawler", Duration::from_millis(500))
        .await
        .unwrap();
}
