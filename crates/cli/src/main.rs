mod app;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

#[derive(Parser)]
#[command(name = "wiregate", about = "Wiregate, a multi-tenant messaging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// WebSocket URL of the protocol host process.
    #[arg(long, global = true, env = "WIREGATE_PROTOCOL_HOST")]
    protocol_host: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default when no subcommand is provided).
    Run,
    /// Create an account and print its API key.
    CreateAccount {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Rotate an account's API key and print the new one.
    RotateKey {
        #[arg(long)]
        account_id: String,
    },
    /// List accounts with their status.
    Accounts,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    if cli.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "wiregate starting");

    let config = wiregate_config::GatewayConfig::from_env();

    match cli.command {
        None | Some(Commands::Run) => app::run(config, cli.protocol_host).await,

        Some(Commands::CreateAccount { name, description }) => {
            let pool = wiregate_store::open_pool(&config.store.database_url).await?;
            let accounts = wiregate_store::AccountStore::with_pool(pool);
            let account = accounts.create(&name, &description).await?;
            println!("{}\t{}", account.id, account.api_key);
            Ok(())
        },

        Some(Commands::RotateKey { account_id }) => {
            let pool = wiregate_store::open_pool(&config.store.database_url).await?;
            let accounts = wiregate_store::AccountStore::with_pool(pool);
            let api_key = accounts.rotate_api_key(&account_id).await?;
            println!("{api_key}");
            Ok(())
        },

        Some(Commands::Accounts) => {
            let pool = wiregate_store::open_pool(&config.store.database_url).await?;
            let accounts = wiregate_store::AccountStore::with_pool(pool);
            for account in accounts.list().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    account.id,
                    account.status,
                    account.phone_number.as_deref().unwrap_or("-"),
                    account.name
                );
            }
            Ok(())
        },
    }
}
