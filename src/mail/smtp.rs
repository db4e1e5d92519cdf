//! Minimal inbound SMTP server.
//!
//! Accepts one transaction at a time per session and hands every completed
//! DATA payload to a [`MailHandler`]. The handler is awaited before the final
//! `250` so that a slow consumer slows the sending client down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, warn};

/// Application name announced in the greeting.
const APP_NAME: &str = "mail2chat";

/// Longest command line accepted, CRLF included (RFC 5321 §4.5.3.1.4 allows 512).
const MAX_COMMAND_LINE: u64 = 4096;

/// Longest DATA line accepted before the message is treated as oversized.
const MAX_DATA_LINE: u64 = 64 * 1024;

const MAX_RECIPIENTS: usize = 100;

/// Default DATA size limit.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 25 * 1024 * 1024;

/// Default idle timeout between client commands.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Inbound SMTP server configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Address to listen on, e.g. `0.0.0.0:2525`.
    pub listen: String,
    /// Host name announced in the greeting and EHLO reply.
    pub name: String,
    pub max_message_bytes: usize,
    pub idle_timeout: Duration,
}

/// Receives each accepted message. Called once per completed DATA.
#[async_trait]
pub trait MailHandler: Send + Sync {
    async fn handle(&self, origin: SocketAddr, from: String, recipients: Vec<String>, raw: Vec<u8>);
}

/// A bound SMTP listener.
pub struct SmtpServer {
    listener: TcpListener,
    config: Arc<SmtpConfig>,
    handler: Arc<dyn MailHandler>,
}

impl SmtpServer {
    pub async fn bind(config: SmtpConfig, handler: Arc<dyn MailHandler>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            handler,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept sessions forever, one task each.
    pub async fn run(self) -> std::io::Result<()> {
        info!(addr = %self.local_addr()?, name = %self.config.name, "SMTP server listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("SMTP accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let config = Arc::clone(&self.config);
            let handler = Arc::clone(&self.handler);
            let span = tracing::info_span!("smtp_session", %peer);
            tokio::spawn(
                async move {
                    debug!("Session opened");
                    if let Err(e) = run_session(stream, peer, &config, handler.as_ref()).await {
                        debug!("Session ended with error: {e}");
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// Envelope of the transaction in progress.
#[derive(Debug, Default)]
struct Transaction {
    from: Option<String>,
    recipients: Vec<String>,
}

impl Transaction {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Drive one SMTP session over any byte stream.
pub async fn run_session<S>(
    stream: S,
    peer: SocketAddr,
    config: &SmtpConfig,
    handler: &dyn MailHandler,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut greeted = false;
    let mut tx = Transaction::default();
    let mut line = Vec::new();

    reply(&mut stream, &format!("220 {} ESMTP {APP_NAME}", config.name)).await?;

    loop {
        let read = tokio::time::timeout(
            config.idle_timeout,
            read_line(&mut stream, &mut line, MAX_COMMAND_LINE),
        )
        .await;

        let n = match read {
            Ok(result) => result?,
            Err(_) => {
                reply(&mut stream, &format!("421 {} Idle timeout, closing connection", config.name)).await?;
                return Ok(());
            }
        };
        if n == 0 {
            debug!("Client disconnected");
            return Ok(());
        }
        if !line.ends_with(b"\n") && n as u64 >= MAX_COMMAND_LINE {
            reply(&mut stream, "500 Line too long").await?;
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        let command = text.trim_end_matches(['\r', '\n']);
        let (verb, arg) = match command.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
            None => (command.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "HELO" => {
                greeted = true;
                tx.reset();
                reply(&mut stream, &format!("250 {}", config.name)).await?;
            }
            "EHLO" => {
                greeted = true;
                tx.reset();
                let ehlo = format!(
                    "250-{} greets {}\r\n250-8BITMIME\r\n250 SIZE {}",
                    config.name,
                    if arg.is_empty() { "client" } else { arg },
                    config.max_message_bytes
                );
                reply(&mut stream, &ehlo).await?;
            }
            "MAIL" => {
                if !greeted {
                    reply(&mut stream, "503 Send HELO/EHLO first").await?;
                } else if tx.from.is_some() {
                    reply(&mut stream, "503 Nested MAIL command").await?;
                } else {
                    match parse_path(arg, "FROM:") {
                        Some((path, params)) => {
                            if declared_size(params).is_some_and(|s| s > config.max_message_bytes) {
                                reply(&mut stream, "552 Message size exceeds fixed maximum").await?;
                            } else {
                                tx.from = Some(path.trim_matches(['<', '>']).to_string());
                                reply(&mut stream, "250 OK").await?;
                            }
                        }
                        None => reply(&mut stream, "501 Syntax: MAIL FROM:<address>").await?,
                    }
                }
            }
            "RCPT" => {
                if tx.from.is_none() {
                    reply(&mut stream, "503 Need MAIL before RCPT").await?;
                } else if tx.recipients.len() >= MAX_RECIPIENTS {
                    reply(&mut stream, "452 Too many recipients").await?;
                } else {
                    match parse_path(arg, "TO:") {
                        Some((path, _)) if path != "<>" && !path.is_empty() => {
                            tx.recipients.push(path.to_string());
                            reply(&mut stream, "250 OK").await?;
                        }
                        _ => reply(&mut stream, "501 Syntax: RCPT TO:<address>").await?,
                    }
                }
            }
            "DATA" => {
                if tx.from.is_none() {
                    reply(&mut stream, "503 Need MAIL command").await?;
                } else if tx.recipients.is_empty() {
                    reply(&mut stream, "503 Need RCPT command").await?;
                } else {
                    reply(&mut stream, "354 Start mail input; end with <CRLF>.<CRLF>").await?;
                    let data = read_data(&mut stream, config).await?;
                    let envelope = std::mem::take(&mut tx);
                    match data {
                        Some(raw) => {
                            let from = envelope.from.unwrap_or_default();
                            info!(from = %from, recipients = envelope.recipients.len(), bytes = raw.len(), "Message accepted");
                            handler.handle(peer, from, envelope.recipients, raw).await;
                            reply(&mut stream, "250 OK: queued").await?;
                        }
                        None => {
                            warn!("Rejected oversized message");
                            reply(&mut stream, "552 Message size exceeds fixed maximum").await?;
                        }
                    }
                }
            }
            "RSET" => {
                tx.reset();
                reply(&mut stream, "250 OK").await?;
            }
            "NOOP" => reply(&mut stream, "250 OK").await?,
            "VRFY" => reply(&mut stream, "252 Cannot VRFY user, but will accept message").await?,
            "QUIT" => {
                reply(&mut stream, &format!("221 {} Bye", config.name)).await?;
                return Ok(());
            }
            "" => reply(&mut stream, "500 Empty command").await?,
            _ => reply(&mut stream, "502 Command not implemented").await?,
        }
    }
}

/// Read the DATA section up to the lone `.` line, undoing dot-stuffing.
///
/// Returns `None` when the message exceeds the size limit or carries a line
/// longer than [`MAX_DATA_LINE`]; the rest of the payload is still consumed
/// so the session stays in sync.
async fn read_data<R>(reader: &mut R, config: &SmtpConfig) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut data = Vec::new();
    let mut line = Vec::new();
    let mut oversized = false;
    let mut at_line_start = true;

    loop {
        let n = tokio::time::timeout(config.idle_timeout, read_line(reader, &mut line, MAX_DATA_LINE))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "DATA timed out"))??;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            ));
        }

        // The terminator and dot-stuffing only apply at the start of a line.
        let line_start = at_line_start;
        at_line_start = line.ends_with(b"\n");

        if line_start && (line == b".\r\n" || line == b".\n") {
            break;
        }

        if !at_line_start && !oversized {
            warn!(limit = MAX_DATA_LINE, "DATA line too long");
            oversized = true;
            data = Vec::new();
        }

        let content = if line_start {
            line.strip_prefix(b".").unwrap_or(&line)
        } else {
            &line
        };
        if !oversized {
            if data.len() + content.len() > config.max_message_bytes {
                oversized = true;
                data = Vec::new();
            } else {
                data.extend_from_slice(content);
            }
        }
    }

    Ok((!oversized).then_some(data))
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: u64) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    (&mut *reader).take(limit).read_until(b'\n', buf).await
}

async fn reply<W>(stream: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(text.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await.inspect_err(|e| error!("Failed to write SMTP reply: {e}"))
}

/// Split `FROM:<path> PARAMS` into the path and the ESMTP parameters.
fn parse_path<'a>(arg: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let head = arg.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = arg[keyword.len()..].trim_start();

    if rest.starts_with('<') {
        let end = rest.find('>')?;
        Some((&rest[..=end], rest[end + 1..].trim()))
    } else {
        match rest.split_once(char::is_whitespace) {
            Some((path, params)) => Some((path, params.trim())),
            None if !rest.is_empty() => Some((rest, "")),
            None => None,
        }
    }
}

/// Value of a `SIZE=` MAIL parameter, if present.
fn declared_size(params: &str) -> Option<usize> {
    params.split_whitespace().find_map(|p| {
        let (key, value) = p.split_once('=')?;
        key.eq_ignore_ascii_case("SIZE").then(|| value.parse().ok()).flatten()
    })
}
