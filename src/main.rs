use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use loyalty_client::{
    ApiClient, ApiRequest, AuthApi, ClientConfig, ClientError, ConfigError, FileStore, KeyValueStore, MemoryStore,
    Registration, SessionEvent, SessionEvents, TokenStore,
};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0} ({code})", code = .0.error_code())]
    Client(#[from] ClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("not signed in")]
    NotSignedIn,
}

#[derive(Parser, Debug)]
#[command(name = "loyalty-cli", about = "Loyalty API client with persistent session")]
struct Cli {
    #[arg(long, env = "API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "API_TOKEN_FILE", help = "Token file; sessions are in-memory when unset")]
    token_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "API_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    Whoami,
    /// Authenticated GET; prints the response body.
    Get {
        path: String,
    },
    /// Authenticated POST with a JSON body.
    Post {
        path: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "API_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long)]
    phone: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = match cli.base_url.as_deref() {
        Some(url) => ClientConfig::new(url)?,
        None => ClientConfig::from_env()?,
    };
    if let Some(path) = cli.token_file {
        config = config.with_token_file(path);
    }

    let backend: Arc<dyn KeyValueStore> = match &config.token_file {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let events = SessionEvents::new();
    let _signed_out = spawn_sign_out_logger(&events);
    let client = ApiClient::with_events(config, TokenStore::new(backend), events)?;
    let auth = AuthApi::new(client.clone());

    match cli.command {
        Command::Login { email, password } => {
            let session = auth.login(&email, &password).await?;
            print_json(&serde_json::to_value(&session.user)?)?;
        }
        Command::Register(args) => {
            let registration =
                Registration { name: args.name, email: args.email, password: args.password, phone: args.phone };
            let session = auth.register(&registration).await?;
            print_json(&serde_json::to_value(&session.user)?)?;
        }
        Command::Logout => {
            auth.logout().await;
            println!("signed out");
        }
        Command::Whoami => {
            if auth.restore().await.is_none() {
                return Err(CliError::NotSignedIn);
            }
            let user = auth.me().await?;
            print_json(&serde_json::to_value(&user)?)?;
        }
        Command::Get { path } => {
            let response = client.send(ApiRequest::get(path)).await?;
            print_body(&response.body)?;
        }
        Command::Post { path, data } => {
            let body: Value = serde_json::from_str(&data)?;
            let response = client.send(ApiRequest::post(path).with_json(body)).await?;
            print_body(&response.body)?;
        }
    }
    Ok(())
}

fn spawn_sign_out_logger(events: &SessionEvents) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let SessionEvent::SignedOut { reason } = event {
                tracing::warn!(?reason, "session ended");
            }
        }
    })
}

fn print_body(body: &str) -> Result<(), CliError> {
    if body.is_empty() {
        return Ok(());
    }
    match serde_json::from_str::<Value>(body) {
        Ok(json) => print_json(&json),
        Err(_) => {
            println!("{body}");
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
