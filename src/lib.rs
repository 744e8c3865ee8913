//! lagoon-bot — a single-channel IRC bot.
//!
//! Connects to a primary server (falling back to an optional backup),
//! registers, joins one channel, keeps the link alive by answering `PING`,
//! and responds to a couple of chat commands (`!ping`, `!quit`).
//!
//! ```no_run
//! use lagoon_bot::config::BotConfig;
//! use lagoon_bot::irc::dispatch::Dispatcher;
//! use lagoon_bot::irc::supervisor::Supervisor;
//! use lagoon_bot::irc::transport::TcpDialer;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BotConfig::new("irc.lagun.co", "", 6667, "wings", "wings", "#lagoon");
//! let dialer = TcpDialer::new(config.timeouts.connect);
//! Supervisor::new(config, Dispatcher::with_defaults(), dialer).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod irc;
