//! Protocol state machine for a single connection.
//!
//! [`Session`] does no I/O. The supervisor feeds it inbound lines and writes
//! whatever it asks for, which keeps handshake sequencing, line
//! classification and command dispatch testable without sockets.
//!
//! ```text
//! Disconnected ──handshake──▶ Handshaking ──001──▶ Joined
//!       ▲                          │                  │
//!       └──── send failure / read failure / quit ─────┘
//! ```
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::dispatch::{Action, Command, Context, Dispatcher};
use super::message::{ChatMessage, Outbound};
use crate::config::BotConfig;

/// Keyword that opens a keep-alive probe.
const PING: &str = "PING";
/// Numeric reply the server sends once registration succeeds.
const RPL_WELCOME: &str = "001";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Handshaking,
    Joined,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Disconnected => "disconnected",
            State::Handshaking => "handshaking",
            State::Joined => "joined",
        })
    }
}

/// How an inbound line was understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Keep-alive probe with the payload to echo back.
    Ping { payload: String },
    /// Registration accepted.
    Welcome,
    /// A chat message.
    Chat(ChatMessage),
    /// Nothing we act on.
    Ignored,
}

/// Classify a raw line in the context of `state`.
///
/// Precedence: keep-alive probe, then welcome (only while handshaking), then
/// chat message, then ignored.
pub fn classify(line: &str, state: State) -> Inbound {
    if let Some(rest) = line.strip_prefix(PING) {
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        return Inbound::Ping {
            payload: payload.to_owned(),
        };
    }
    if state == State::Handshaking && line.contains(RPL_WELCOME) {
        return Inbound::Welcome;
    }
    match ChatMessage::parse(line) {
        Some(chat) => Inbound::Chat(chat),
        None => Inbound::Ignored,
    }
}

/// What the caller should do after feeding a line to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to send.
    Idle,
    /// Send this line and keep reading.
    Send(Outbound),
    /// Say goodbye with `reason`, then shut down.
    Terminate { reason: String },
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct Session {
    config: Arc<BotConfig>,
    dispatcher: Arc<Dispatcher>,
    state: State,
}

impl Session {
    pub fn new(config: Arc<BotConfig>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            state: State::Disconnected,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Start registration on a fresh connection.
    ///
    /// Returns the identity announcement, `NICK` first, then `USER`.
    pub fn begin_handshake(&mut self) -> [Outbound; 2] {
        self.state = State::Handshaking;
        let identity = &self.config.identity;
        [
            Outbound::Nick {
                nickname: identity.nickname.clone(),
            },
            Outbound::User {
                username: identity.username.clone(),
                realname: identity.nickname.clone(),
            },
        ]
    }

    /// The connection is gone (or the handshake failed).
    pub fn disconnect(&mut self) {
        self.state = State::Disconnected;
    }

    /// Read deadline for the next line in the current state.
    pub fn read_deadline(&self) -> Duration {
        match self.state {
            State::Joined => self.config.timeouts.idle,
            State::Disconnected | State::Handshaking => self.config.timeouts.handshake,
        }
    }

    /// React to one inbound line.
    pub fn on_line(&mut self, line: &str) -> Step {
        match classify(line, self.state) {
            Inbound::Ping { payload } => Step::Send(Outbound::Pong { payload }),
            Inbound::Welcome => {
                self.state = State::Joined;
                let channel = self.config.channel.name.clone();
                info!(%channel, "registered, joining");
                Step::Send(Outbound::Join { channel })
            }
            Inbound::Chat(chat) if self.state == State::Joined => self.on_chat(chat),
            Inbound::Chat(_) | Inbound::Ignored => {
                debug!(state = %self.state, "ignored: {line}");
                Step::Idle
            }
        }
    }

    fn on_chat(&mut self, chat: ChatMessage) -> Step {
        let command = Command::from_body(&chat.body);
        let ctx = Context {
            target: &chat.target,
            sender: &chat.sender,
        };
        match self.dispatcher.dispatch(command, &ctx) {
            Action::Reply { target, text } => Step::Send(Outbound::Privmsg { target, text }),
            Action::Terminate { reason } => {
                info!(sender = %chat.sender, "quit requested: {reason}");
                self.state = State::Disconnected;
                Step::Terminate { reason }
            }
            Action::Noop => Step::Idle,
        }
    }
}
