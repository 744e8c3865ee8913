use tracing::{error, info};

use lagoon_bot::config::BotConfig;
use lagoon_bot::irc::dispatch::Dispatcher;
use lagoon_bot::irc::supervisor::{Shutdown, Supervisor};
use lagoon_bot::irc::transport::TcpDialer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("lagoon-bot starting");

    let config = BotConfig::from_env()?;
    let dialer = TcpDialer::new(config.timeouts.connect);
    let supervisor = Supervisor::new(config, Dispatcher::with_defaults(), dialer);

    match supervisor.run().await {
        Ok(Shutdown::Quit { reason }) => {
            info!("shutting down: {reason}");
            Ok(())
        }
        Err(e) => {
            error!("lagoon-bot stopped: {e}");
            Err(e.into())
        }
    }
}
