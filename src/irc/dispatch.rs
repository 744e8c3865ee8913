//! Chat command dispatch.
//!
//! A chat body like `!ping` becomes a [`Command`]; the [`Dispatcher`] looks
//! the command up in its handler table and returns the [`Action`] the run
//! loop should carry out. Handlers never touch the connection themselves,
//! and nothing here ends the process: [`Action::Terminate`] is only a
//! request that the caller honours.
use std::collections::HashMap;

/// Commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `!ping` — liveness self-test.
    Ping,
    /// `!quit` — leave the network and stop.
    Quit,
    /// Anything else.
    Noop,
}

impl Command {
    /// Recognise a command in a chat body. The whole body must be the trigger.
    pub fn from_body(body: &str) -> Self {
        match body {
            "!ping" => Command::Ping,
            "!quit" => Command::Quit,
            _ => Command::Noop,
        }
    }
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context<'a> {
    /// Channel (or nick) the command was sent to.
    pub target: &'a str,
    /// Nick of whoever issued it.
    pub sender: &'a str,
}

/// What the run loop should do in response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `text` to `target`.
    Reply { target: String, text: String },
    /// Send a farewell with `reason`, then stop the bot.
    Terminate { reason: String },
    /// Nothing to do.
    Noop,
}

/// Something that can answer a command.
pub trait Handler: Send + Sync {
    fn handle(&self, ctx: &Context<'_>) -> Action;
}

impl<F> Handler for F
where
    F: Fn(&Context<'_>) -> Action + Send + Sync,
{
    fn handle(&self, ctx: &Context<'_>) -> Action {
        self(ctx)
    }
}

/// Replies `<sender>: Pong!` in the channel the ping came from.
#[derive(Debug, Default)]
pub struct PingHandler;

impl Handler for PingHandler {
    fn handle(&self, ctx: &Context<'_>) -> Action {
        Action::Reply {
            target: ctx.target.to_string(),
            text: format!("{}: Pong!", ctx.sender),
        }
    }
}

/// Asks the bot to quit.
#[derive(Debug, Default)]
pub struct QuitHandler;

impl Handler for QuitHandler {
    fn handle(&self, _ctx: &Context<'_>) -> Action {
        Action::Terminate {
            reason: "Quit command issued".into(),
        }
    }
}

/// Command → handler table.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<Command, Box<dyn Handler>>,
}

impl Dispatcher {
    /// A dispatcher with no handlers: every command is a no-op.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard `!ping` / `!quit` command set.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with(Command::Ping, PingHandler)
            .with(Command::Quit, QuitHandler)
    }

    /// Register (or replace) the handler for `command`.
    pub fn with(mut self, command: Command, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(command, Box::new(handler));
        self
    }

    pub fn dispatch(&self, command: Command, ctx: &Context<'_>) -> Action {
        self.handlers
            .get(&command)
            .map_or(Action::Noop, |handler| handler.handle(ctx))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
