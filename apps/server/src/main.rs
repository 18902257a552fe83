use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use chatrelay_config::load as load_config;
use chatrelay_database::{ConversationRepository, UserRepository};
use chatrelay_realtime::{create_router, RealtimeState};
use chatrelay_runtime::{telemetry, BackendServices};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "chatrelay realtime backend (serve by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the realtime server (default)
    Serve,
    /// Register a user and print its public id
    CreateUser { username: String, password: String },
    /// Record a mutual friendship between two users (public ids)
    AddFriend { user: String, friend: String },
    /// Create a conversation between users (public ids)
    CreateConversation { participants: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::CreateUser { username, password } => create_user(&username, &password).await,
        Commands::AddFriend { user, friend } => add_friend(&user, &friend).await,
        Commands::CreateConversation { participants } => create_conversation(&participants).await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    info!("starting chatrelay backend");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let state = RealtimeState::new(
        services.db_pool.clone(),
        services.authenticator.clone(),
        config.websocket.clone(),
    );
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "realtime server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(chatrelay_runtime::shutdown_signal())
        .await
        .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn create_user(username: &str, password: &str) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let user = services
        .authenticator
        .register(username, password)
        .await
        .context("failed to register user")?;

    println!("{}", user.public_id);
    Ok(())
}

async fn add_friend(user: &str, friend: &str) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let users = UserRepository::new(services.db_pool.clone());
    users
        .add_friendship(user, friend)
        .await
        .context("failed to record friendship")?;

    println!("friendship recorded: {user} <-> {friend}");
    Ok(())
}

async fn create_conversation(participants: &[String]) -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise tracing")?;

    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let conversations = ConversationRepository::new(services.db_pool.clone());
    let ids: Vec<&str> = participants.iter().map(String::as_str).collect();
    let conversation = conversations
        .create(&ids)
        .await
        .context("failed to create conversation")?;

    println!("{}", conversation.public_id);
    Ok(())
}
