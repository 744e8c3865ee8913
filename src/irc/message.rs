/// IRC line formats spoken by the bot.
///
/// Outbound lines are rendered verbatim by [`Outbound::to_wire`]; inbound
/// chat lines are recognised with the permissive token split in
/// [`ChatMessage::parse`]:
///   `:`sender[`!`user`@`host] SPACE `PRIVMSG` SPACE target SPACE `:`body
///
/// Neither side includes the `\r\n` terminator; that belongs to the codec.
use std::fmt;

/// Command word marking a chat message in the second token of a line.
pub const PRIVMSG: &str = "PRIVMSG";

/// A line the bot sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// `NICK <nickname>`
    Nick { nickname: String },
    /// `USER <username> 8 * :<realname>`
    User { username: String, realname: String },
    /// `PONG <payload>` — payload is echoed exactly as the probe carried it.
    Pong { payload: String },
    /// `JOIN <channel>`
    Join { channel: String },
    /// `PRIVMSG <target> :<text>`
    Privmsg { target: String, text: String },
    /// `QUIT: <reason>`
    Quit { reason: String },
}

impl Outbound {
    /// Serialize to the wire format (without trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        match self {
            Outbound::Nick { nickname } => format!("NICK {nickname}"),
            // Mode 8 requests invisible; `*` is the unused server field.
            Outbound::User { username, realname } => format!("USER {username} 8 * :{realname}"),
            Outbound::Pong { payload } => format!("PONG {payload}"),
            Outbound::Join { channel } => format!("JOIN {channel}"),
            Outbound::Privmsg { target, text } => format!("{PRIVMSG} {target} :{text}"),
            Outbound::Quit { reason } => format!("QUIT: {reason}"),
        }
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// A chat message pulled out of an inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Nick of the sender, without the `:` sigil or `!user@host` tail.
    pub sender: String,
    /// Channel or nick the message was addressed to.
    pub target: String,
    /// Message text with the trailing-parameter `:` removed.
    pub body: String,
}

impl ChatMessage {
    /// Recognise a chat message line.
    ///
    /// Needs at least four space-separated tokens with `PRIVMSG` second.
    /// Anything else is simply not a chat message and yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let tokens: Vec<&str> = line.split(' ').collect();
        if tokens.len() < 4 || tokens[1] != PRIVMSG {
            return None;
        }

        let origin = tokens[0].split('!').next().unwrap_or_default();
        let sender = origin.strip_prefix(':').unwrap_or(origin);

        let body = tokens[3..].join(" ");
        let body = body.strip_prefix(':').unwrap_or(&body);

        Some(ChatMessage {
            sender: sender.to_owned(),
            target: tokens[2].to_owned(),
            body: body.to_owned(),
        })
    }

    /// Render as a server would relay it (without trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        format!(":{} {PRIVMSG} {} :{}", self.sender, self.target, self.body)
    }
}
