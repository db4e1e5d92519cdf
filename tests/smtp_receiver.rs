//! The SMTP listener over real loopback sockets.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::TEXT_MAIL;
use mail2chat::mail::{FallbackConfig, MailHandler, SecondaryRelay, SmtpConfig, SmtpRelay, SmtpServer};
use mail2chat::relay::{DEFAULT_SUPPRESS_PHRASE, IntakeHandler, per_destination};
use mail2chat::routing::{DestinationId, DestinationRegistry};

type Received = (String, Vec<String>, Vec<u8>);

struct Capture(mpsc::UnboundedSender<Received>);

#[async_trait]
impl MailHandler for Capture {
    async fn handle(&self, _origin: SocketAddr, from: String, recipients: Vec<String>, raw: Vec<u8>) {
        let _ = self.0.send((from, recipients, raw));
    }
}

fn config() -> SmtpConfig {
    SmtpConfig {
        listen: "127.0.0.1:0".into(),
        name: "relay.test".into(),
        max_message_bytes: 64 * 1024,
        idle_timeout: Duration::from_secs(5),
    }
}

async fn start(handler: Arc<dyn MailHandler>) -> SocketAddr {
    let server = SmtpServer::bind(config(), handler).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer,
        };
        let greeting = client.reply().await;
        assert!(greeting.starts_with("220 relay.test"), "{greeting}");
        client
    }

    /// Read one full (possibly multi-line) reply.
    async fn reply(&mut self) -> String {
        let mut all = String::new();
        loop {
            let mut line = String::new();
            timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
                .await
                .expect("server reply timed out")
                .unwrap();
            all.push_str(&line);
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return all;
            }
        }
    }

    async fn cmd(&mut self, line: &str) -> String {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
        self.reply().await
    }
}

#[tokio::test]
async fn full_transaction_reaches_handler() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let addr = start(Arc::new(Capture(tx))).await;
    let mut client = Client::connect(addr).await;

    let ehlo = client.cmd("EHLO client.test").await;
    assert!(ehlo.contains("250 SIZE 65536"), "{ehlo}");
    assert!(client.cmd("MAIL FROM:<alice@x.com> BODY=8BITMIME").await.starts_with("250"));
    assert!(client.cmd("RCPT TO:<r@y.com>").await.starts_with("250"));
    assert!(client.cmd("DATA").await.starts_with("354"));
    let done = client
        .cmd("Subject: hi\r\n\r\n..starts with a dot\r\nbody\r\n.")
        .await;
    assert!(done.starts_with("250"), "{done}");
    assert!(client.cmd("QUIT").await.starts_with("221"));

    let (from, recipients, raw) = rx.recv().await.unwrap();
    assert_eq!(from, "alice@x.com");
    assert_eq!(recipients, vec!["<r@y.com>"]);
    assert_eq!(raw, b"Subject: hi\r\n\r\n.starts with a dot\r\nbody\r\n");
}

#[tokio::test]
async fn out_of_order_commands_are_refused() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let addr = start(Arc::new(Capture(tx))).await;
    let mut client = Client::connect(addr).await;

    assert!(client.cmd("MAIL FROM:<a@x.com>").await.starts_with("503"));
    assert!(client.cmd("HELO client.test").await.starts_with("250"));
    assert!(client.cmd("RCPT TO:<r@y.com>").await.starts_with("503"));
    assert!(client.cmd("DATA").await.starts_with("503"));
    assert!(client.cmd("STARTTLS").await.starts_with("502"));
    assert!(client.cmd("NOOP").await.starts_with("250"));
}

#[tokio::test]
async fn declared_oversize_is_rejected() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let addr = start(Arc::new(Capture(tx))).await;
    let mut client = Client::connect(addr).await;

    client.cmd("EHLO client.test").await;
    let reply = client.cmd("MAIL FROM:<a@x.com> SIZE=999999999").await;
    assert!(reply.starts_with("552"), "{reply}");
}

#[tokio::test]
async fn socket_delivery_is_queued_for_the_sender() {
    let registry = Arc::new(
        DestinationRegistry::from_pairs([("alice@x.com", "111"), ("*", "999")], "test").unwrap(),
    );
    let (queues, mut drain) = per_destination(registry.destinations(), 4);
    let intake = IntakeHandler::new(registry, queues, DEFAULT_SUPPRESS_PHRASE.to_string());
    let addr = start(Arc::new(intake)).await;

    let mut client = Client::connect(addr).await;
    client.cmd("HELO client.test").await;
    client.cmd("MAIL FROM:<Alice+pin@X.com>").await;
    client.cmd("RCPT TO:<r@y.com>").await;
    client.cmd("DATA").await;
    let body = String::from_utf8(TEXT_MAIL.to_vec()).unwrap();
    assert!(client.cmd(&format!("{body}.")).await.starts_with("250"));

    // The 250 is sent only after intake finished, so the item is already queued.
    let (destination, item) = drain.try_dequeue(0).unwrap();
    assert_eq!(destination, DestinationId(111));
    assert_eq!(item.from, "alice@x.com");
    assert!(item.is_pinned);
    assert_eq!(item.recipients, vec!["r@y.com"]);
    assert_eq!(item.raw, TEXT_MAIL);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fallback_relay_speaks_to_a_real_smtp_server() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let addr = start(Arc::new(Capture(tx))).await;

    let relay = SmtpRelay::new(FallbackConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        username: None,
        password: None,
        starttls: false,
    });
    relay
        .send("alice@x.com", &["<r@y.com>".into()], TEXT_MAIL)
        .await
        .unwrap();

    let (from, recipients, raw) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, "alice@x.com");
    assert_eq!(recipients, vec!["<r@y.com>"]);
    assert!(raw.starts_with(TEXT_MAIL));
}
