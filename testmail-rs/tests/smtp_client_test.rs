//! Relay client tests against a scripted downstream server

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use testmail_rs::error::MailError;
use testmail_rs::security::Credentials;
use testmail_rs::smtp::{Relay, RelayMessage, SmtpRelay, Transfer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, answer each command with the reply its verb maps
/// to, and return every line received.
async fn fake_relay(
    rcpt_reply: &'static str,
    rset_reply: &'static str,
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut received = Vec::new();
        let mut in_data = false;

        write.write_all(b"220 relay.test ESMTP\r\n").await.unwrap();

        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end_matches("\r\n").to_string();
            received.push(line.clone());

            if in_data {
                if line == "." {
                    in_data = false;
                    write.write_all(b"250 2.0.0 queued\r\n").await.unwrap();
                }
                continue;
            }

            let verb = line.split_whitespace().next().unwrap_or("").to_uppercase();
            let reply = match verb.as_str() {
                "EHLO" => "250-relay.test\r\n250-AUTH PLAIN\r\n250 SIZE 1000\r\n",
                "AUTH" => "235 2.7.0 ok\r\n",
                "MAIL" => "250 ok\r\n",
                "RCPT" if line.contains("<reject@") => "550 no such user\r\n",
                "RCPT" => rcpt_reply,
                "DATA" => {
                    in_data = true;
                    "354 go ahead\r\n"
                }
                "RSET" => rset_reply,
                "QUIT" => {
                    write.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                }
                _ => "500 what\r\n",
            };
            write.write_all(reply.as_bytes()).await.unwrap();
        }
        received
    });

    (addr, handle)
}

fn message() -> RelayMessage {
    RelayMessage::from_raw(b"Subject: hi\r\n\r\n.dotted\r\nbody\r\n").unwrap()
}

#[tokio::test]
async fn test_relay_session_with_forwarded_credentials() {
    let (addr, server) = fake_relay("250 ok\r\n", "250 reset\r\n").await;

    let relay = SmtpRelay::new(addr);
    let mut transfer = relay.open(Some(Credentials::new("bob", "pw")));
    transfer.connect("a@b").await.unwrap();
    transfer.send("a@b", "c@d", &message()).await.unwrap();
    transfer.disconnect().await.unwrap();

    let received = server.await.unwrap();
    assert!(received[0].starts_with("EHLO "));
    assert_eq!(
        received[1],
        format!("AUTH PLAIN {}", BASE64.encode("\0bob\0pw"))
    );
    assert_eq!(
        received[2..],
        [
            "MAIL FROM:<a@b>",
            "RCPT TO:<c@d>",
            "DATA",
            "Subject: hi",
            "",
            "..dotted",
            "body",
            ".",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn test_relay_without_credentials_skips_auth() {
    let (addr, server) = fake_relay("251 forwarding\r\n", "250 reset\r\n").await;

    let mut transfer = SmtpRelay::new(addr).open(None);
    transfer.connect("a@b").await.unwrap();
    // 251 is accepted for RCPT
    transfer.send("a@b", "c@d", &message()).await.unwrap();
    transfer.disconnect().await.unwrap();

    let received = server.await.unwrap();
    assert!(!received.iter().any(|line| line.starts_with("AUTH")));
    assert_eq!(received[1], "MAIL FROM:<a@b>");
}

#[tokio::test]
async fn test_rejected_recipient_resets_and_continues() {
    let (addr, server) = fake_relay("250 ok\r\n", "250 reset\r\n").await;

    let mut transfer = SmtpRelay::new(addr).open(None);
    transfer.connect("a@b").await.unwrap();

    let result = transfer.send("a@b", "reject@x", &message()).await;
    assert!(matches!(result, Err(MailError::Relay(_))));

    transfer.send("a@b", "c@d", &message()).await.unwrap();
    transfer.disconnect().await.unwrap();

    let received = server.await.unwrap();
    let commands: Vec<&str> = received
        .iter()
        .map(String::as_str)
        .filter(|line| {
            ["MAIL", "RCPT", "RSET", "DATA", "QUIT"]
                .iter()
                .any(|verb| line.starts_with(verb))
        })
        .collect();
    assert_eq!(
        commands,
        [
            "MAIL FROM:<a@b>",
            "RCPT TO:<reject@x>",
            "RSET",
            "MAIL FROM:<a@b>",
            "RCPT TO:<c@d>",
            "DATA",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn test_failed_rset_keeps_recipient_error() {
    let (addr, server) = fake_relay("250 ok\r\n", "500 no reset\r\n").await;

    let mut transfer = SmtpRelay::new(addr).open(None);
    transfer.connect("a@b").await.unwrap();

    match transfer.send("a@b", "reject@x", &message()).await {
        Err(MailError::Relay(msg)) => assert!(msg.contains("550"), "{}", msg),
        other => panic!("unexpected result: {:?}", other),
    }
    transfer.send("a@b", "c@d", &message()).await.unwrap();
    transfer.disconnect().await.unwrap();

    let received = server.await.unwrap();
    assert!(received.iter().any(|line| line == "RSET"));
    assert_eq!(received.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_connect_refused_is_relay_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let mut transfer = SmtpRelay::new(addr).open(None);
    let result = transfer.connect("a@b").await;
    assert!(matches!(result, Err(MailError::Relay(_))));
}
