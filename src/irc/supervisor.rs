//! Connection supervisor — endpoint failover and the bot's run loop.
//!
//! Owns the single live [`Connection`]. Acquisition tries the primary
//! endpoint a fixed number of times, then the backup once. During the run
//! loop only a read timeout leads to a fresh acquisition; every other
//! disconnect ends the bot.
use std::io;
use std::sync::Arc;

use tracing::{error, info, warn};

use super::codec::CodecError;
use super::dispatch::Dispatcher;
use super::message::Outbound;
use super::session::{Session, Step};
use super::transport::{Connection, Dialer, ReadError};
use crate::config::{BotConfig, Endpoint};

/// Fatal outcomes of running the bot.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: Endpoint,
        #[source]
        source: CodecError,
    },
    #[error("no data from {endpoint} within {timeout:?}")]
    ReadTimeout {
        endpoint: Endpoint,
        timeout: std::time::Duration,
    },
    #[error("{endpoint} closed the connection")]
    StreamClosed { endpoint: Endpoint },
    #[error("error reading from {endpoint}: {source}")]
    Read {
        endpoint: Endpoint,
        #[source]
        source: CodecError,
    },
    #[error("all endpoints exhausted after {attempts} connection attempts")]
    AllEndpointsExhausted {
        attempts: u32,
        #[source]
        last: Box<BotError>,
    },
}

impl BotError {
    fn from_read(endpoint: &Endpoint, err: ReadError) -> Self {
        let endpoint = endpoint.clone();
        match err {
            ReadError::Timeout(timeout) => BotError::ReadTimeout { endpoint, timeout },
            ReadError::Closed => BotError::StreamClosed { endpoint },
            ReadError::Codec(source) => BotError::Read { endpoint, source },
        }
    }
}

/// Why a run ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    /// A user asked the bot to quit.
    Quit { reason: String },
}

/// Drives the bot: acquire a connection, handshake, read until something
/// ends the session.
pub struct Supervisor<D> {
    config: Arc<BotConfig>,
    dispatcher: Arc<Dispatcher>,
    dialer: D,
}

impl<D: Dialer> Supervisor<D> {
    pub fn new(config: BotConfig, dispatcher: Dispatcher, dialer: D) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            dialer,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Open a connection, failing over from primary to backup.
    pub async fn acquire_connection(&self) -> Result<Connection, BotError> {
        let policy = self.config.retry;
        let primary = &self.config.primary;
        let mut attempts = 0;
        let mut last = None;

        for attempt in 1..=policy.primary_attempts {
            attempts += 1;
            info!(endpoint = %primary, attempt, "connecting");
            match Connection::open(&self.dialer, primary).await {
                Ok(conn) => {
                    info!(endpoint = %primary, "connected");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(endpoint = %primary, attempt, "connect failed, retrying: {e}");
                    last = Some(BotError::Connect {
                        endpoint: primary.clone(),
                        source: e,
                    });
                    tokio::time::sleep(policy.retry_delay).await;
                }
            }
        }

        if let Some(backup) = &self.config.backup {
            attempts += 1;
            info!(endpoint = %backup, "connecting to backup server");
            match Connection::open(&self.dialer, backup).await {
                Ok(conn) => {
                    info!(endpoint = %backup, "connected");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(endpoint = %backup, "backup connect failed: {e}");
                    last = Some(BotError::Connect {
                        endpoint: backup.clone(),
                        source: e,
                    });
                }
            }
        }

        let last = last.unwrap_or_else(|| BotError::Connect {
            endpoint: primary.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "no connection attempts allowed"),
        });
        Err(BotError::AllEndpointsExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// Run until a quit command or a fatal error.
    pub async fn run(&self) -> Result<Shutdown, BotError> {
        let mut session = Session::new(Arc::clone(&self.config), Arc::clone(&self.dispatcher));
        let mut reconnecting = false;

        loop {
            let mut conn = match self.acquire_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    if reconnecting {
                        error!("reconnection failed: {e}");
                    }
                    return Err(e);
                }
            };
            let result = self.drive(&mut conn, &mut session).await;
            session.disconnect();
            conn.close().await;
            // The old connection must be gone before the next dial.
            drop(conn);

            match result {
                Ok(shutdown) => return Ok(shutdown),
                Err(BotError::ReadTimeout { endpoint, timeout }) => {
                    warn!(%endpoint, ?timeout, "timeout occurred, reconnecting");
                    reconnecting = true;
                }
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
            }
        }
    }

    /// Handshake on `conn`, then process lines until the session ends.
    async fn drive(
        &self,
        conn: &mut Connection,
        session: &mut Session,
    ) -> Result<Shutdown, BotError> {
        for msg in session.begin_handshake() {
            let sent = conn.send(msg).await;
            if let Err(source) = sent {
                session.disconnect();
                return Err(BotError::Handshake {
                    endpoint: conn.endpoint().clone(),
                    source,
                });
            }
        }
        info!(endpoint = %conn.endpoint(), "registration sent, waiting for 001");

        loop {
            let read = conn.read_line(session.read_deadline()).await;
            let line = match read {
                Ok(line) => line,
                Err(e) => return Err(BotError::from_read(conn.endpoint(), e)),
            };
            info!("received: {line}");

            match session.on_line(&line) {
                Step::Idle => {}
                Step::Send(msg) => {
                    // A dead socket shows up on the next read.
                    let sent = conn.send(msg).await;
                    if let Err(e) = sent {
                        warn!(endpoint = %conn.endpoint(), "error sending to server: {e}");
                    }
                }
                Step::Terminate { reason } => {
                    let farewell = Outbound::Quit {
                        reason: reason.clone(),
                    };
                    let sent = conn.send(farewell).await;
                    if let Err(e) = sent {
                        warn!(endpoint = %conn.endpoint(), "error sending farewell: {e}");
                    }
                    return Ok(Shutdown::Quit { reason });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

    use crate::irc::transport::BotStream;

    /// Hands out scripted dial results and records which endpoints were tried.
    #[derive(Default)]
    struct ScriptedDialer {
        script: Mutex<VecDeque<io::Result<BotStream>>>,
        dialled: Mutex<Vec<Endpoint>>,
    }

    impl ScriptedDialer {
        fn push_failure(&self) {
            self.script
                .lock()
                .unwrap()
                .push_back(Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")));
        }

        /// Queue a successful dial; returns the server end of the pipe.
        fn push_success(&self) -> DuplexStream {
            let (client, server) = tokio::io::duplex(4096);
            self.script.lock().unwrap().push_back(Ok(Box::new(client)));
            server
        }

        fn dialled(&self) -> Vec<Endpoint> {
            self.dialled.lock().unwrap().clone()
        }
    }

    impl Dialer for &ScriptedDialer {
        fn dial(&self, endpoint: &Endpoint) -> impl Future<Output = io::Result<BotStream>> + Send {
            self.dialled.lock().unwrap().push(endpoint.clone());
            let next = self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "script exhausted"))
            });
            async move { next }
        }
    }

    fn config(backup: &str) -> BotConfig {
        BotConfig::new("primary.lagun.co", backup, 6667, "GOnzo", "gonzo", "#lagoon")
    }

    fn supervisor<'a>(backup: &str, dialer: &'a ScriptedDialer) -> Supervisor<&'a ScriptedDialer> {
        Supervisor::new(config(backup), Dispatcher::with_defaults(), dialer)
    }

    fn primary() -> Endpoint {
        Endpoint::new("primary.lagun.co", 6667)
    }

    fn backup() -> Endpoint {
        Endpoint::new("backup.lagun.co", 6667)
    }

    // ── Acquisition ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn primary_first_try() {
        let dialer = ScriptedDialer::default();
        let _server = dialer.push_success();
        let sup = supervisor("backup.lagun.co", &dialer);

        let conn = sup.acquire_connection().await.unwrap();
        assert_eq!(conn.endpoint(), &primary());
        assert_eq!(dialer.dialled(), vec![primary()]);
    }

    #[tokio::test(start_paused = true)]
    async fn primary_retries_with_delay() {
        let dialer = ScriptedDialer::default();
        dialer.push_failure();
        let _server = dialer.push_success();
        let sup = supervisor("", &dialer);

        let started = tokio::time::Instant::now();
        let conn = sup.acquire_connection().await.unwrap();
        assert_eq!(conn.endpoint(), &primary());
        assert_eq!(dialer.dialled().len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_to_backup_after_three_attempts() {
        let dialer = ScriptedDialer::default();
        for _ in 0..3 {
            dialer.push_failure();
        }
        let _server = dialer.push_success();
        let sup = supervisor("backup.lagun.co", &dialer);

        let conn = sup.acquire_connection().await.unwrap();
        assert_eq!(conn.endpoint(), &backup());
        assert_eq!(
            dialer.dialled(),
            vec![primary(), primary(), primary(), backup()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_backup_means_three_attempts() {
        let dialer = ScriptedDialer::default();
        for _ in 0..3 {
            dialer.push_failure();
        }
        // Would succeed if anybody asked a fourth time.
        let _server = dialer.push_success();
        let sup = supervisor("", &dialer);

        let err = sup.acquire_connection().await.err().unwrap();
        assert!(matches!(err, BotError::AllEndpointsExhausted { attempts: 3, .. }));
        assert_eq!(dialer.dialled(), vec![primary(), primary(), primary()]);
    }

    #[tokio::test(start_paused = true)]
    async fn backup_is_tried_exactly_once() {
        let dialer = ScriptedDialer::default();
        for _ in 0..4 {
            dialer.push_failure();
        }
        let sup = supervisor("backup.lagun.co", &dialer);

        let err = sup.acquire_connection().await.err().unwrap();
        match err {
            BotError::AllEndpointsExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, BotError::Connect { ref endpoint, .. } if *endpoint == backup()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dialer.dialled().len(), 4);
    }

    // ── Run loop ─────────────────────────────────────────────────

    async fn expect_line<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>, expected: &str) {
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, expected);
    }

    #[tokio::test]
    async fn handshake_join_ping_and_quit() {
        let dialer = ScriptedDialer::default();
        let server = dialer.push_success();
        let sup = supervisor("", &dialer);

        let script = async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            expect_line(&mut lines, "NICK GOnzo").await;
            expect_line(&mut lines, "USER gonzo 8 * :GOnzo").await;

            write.write_all(b"PING :abc123\r\n").await.unwrap();
            expect_line(&mut lines, "PONG :abc123").await;

            write.write_all(b":srv 001 GOnzo :Welcome\r\n").await.unwrap();
            expect_line(&mut lines, "JOIN #lagoon").await;

            write
                .write_all(b":nick!user@host PRIVMSG #lagoon :!ping\r\n")
                .await
                .unwrap();
            expect_line(&mut lines, "PRIVMSG #lagoon :nick: Pong!").await;

            write
                .write_all(b":nick!user@host PRIVMSG #lagoon :!quit\r\n")
                .await
                .unwrap();
            expect_line(&mut lines, "QUIT: Quit command issued").await;
        };

        let (outcome, ()) = tokio::join!(sup.run(), script);
        assert_eq!(
            outcome.unwrap(),
            Shutdown::Quit {
                reason: "Quit command issued".into()
            }
        );
        assert_eq!(dialer.dialled(), vec![primary()]);
    }

    #[tokio::test]
    async fn stream_close_is_not_retried() {
        let dialer = ScriptedDialer::default();
        let server = dialer.push_success();
        // A second connection is available but must never be used.
        let _spare = dialer.push_success();
        let sup = supervisor("", &dialer);

        let script = async move {
            let mut lines = BufReader::new(server).lines();
            expect_line(&mut lines, "NICK GOnzo").await;
            expect_line(&mut lines, "USER gonzo 8 * :GOnzo").await;
            drop(lines);
        };

        let (outcome, ()) = tokio::join!(sup.run(), script);
        assert!(matches!(outcome, Err(BotError::StreamClosed { .. })));
        assert_eq!(dialer.dialled().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reruns_full_acquisition() {
        let dialer = ScriptedDialer::default();
        let silent = dialer.push_success();
        // Reconnect: primary fails three times, backup succeeds.
        for _ in 0..3 {
            dialer.push_failure();
        }
        let second = dialer.push_success();
        let sup = supervisor("backup.lagun.co", &dialer);

        let script = async move {
            // First server never answers, so the handshake deadline expires.
            let _silent = silent;
            let (read, mut write) = tokio::io::split(second);
            let mut lines = BufReader::new(read).lines();
            expect_line(&mut lines, "NICK GOnzo").await;
            expect_line(&mut lines, "USER gonzo 8 * :GOnzo").await;
            write.write_all(b":srv 001 GOnzo :Welcome\r\n").await.unwrap();
            expect_line(&mut lines, "JOIN #lagoon").await;
            write
                .write_all(b":op PRIVMSG #lagoon :!quit\r\n")
                .await
                .unwrap();
            expect_line(&mut lines, "QUIT: Quit command issued").await;
        };

        let (outcome, ()) = tokio::join!(sup.run(), script);
        assert!(outcome.is_ok());
        assert_eq!(
            dialer.dialled(),
            vec![primary(), primary(), primary(), primary(), backup()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_ends_the_run() {
        let dialer = ScriptedDialer::default();
        let silent = dialer.push_success();
        let sup = supervisor("", &dialer);

        let outcome = sup.run().await;
        drop(silent);
        assert!(matches!(
            outcome,
            Err(BotError::AllEndpointsExhausted { attempts: 3, .. })
        ));
        assert_eq!(dialer.dialled().len(), 4);
    }

    /// Hands out one silent connection, then refuses every dial. On the
    /// first refusal it writes to the old connection's server end and
    /// records whether anybody was still there to read it.
    struct HandoffDialer {
        client: Mutex<Option<DuplexStream>>,
        server: Mutex<Option<DuplexStream>>,
        old_still_open: Arc<Mutex<Option<bool>>>,
    }

    impl HandoffDialer {
        fn new() -> Self {
            let (client, server) = tokio::io::duplex(4096);
            Self {
                client: Mutex::new(Some(client)),
                server: Mutex::new(Some(server)),
                old_still_open: Arc::default(),
            }
        }
    }

    impl Dialer for &HandoffDialer {
        fn dial(&self, _endpoint: &Endpoint) -> impl Future<Output = io::Result<BotStream>> + Send {
            let client = self.client.lock().unwrap().take();
            let server = match client {
                Some(_) => None,
                None => self.server.lock().unwrap().take(),
            };
            let old_still_open = Arc::clone(&self.old_still_open);
            async move {
                if let Some(client) = client {
                    return Ok(Box::new(client) as BotStream);
                }
                if let Some(mut server) = server {
                    let delivered = server.write_all(b"PING :anyone\r\n").await.is_ok();
                    *old_still_open.lock().unwrap() = Some(delivered);
                }
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_connection_released_before_redial() {
        let dialer = HandoffDialer::new();
        let sup = Supervisor::new(config(""), Dispatcher::with_defaults(), &dialer);

        let outcome = sup.run().await;
        assert!(matches!(
            outcome,
            Err(BotError::AllEndpointsExhausted { attempts: 3, .. })
        ));
        assert_eq!(*dialer.old_still_open.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn handshake_failure_is_fatal() {
        let dialer = ScriptedDialer::default();
        let server = dialer.push_success();
        drop(server);
        let _spare = dialer.push_success();
        let sup = supervisor("", &dialer);

        let outcome = sup.run().await;
        assert!(matches!(outcome, Err(BotError::Handshake { .. })));
        assert_eq!(dialer.dialled().len(), 1);
    }
}
