use anyhow::Result;
use clap::Parser;
use ictdesk::api::{Endpoint, NewUser, RefreshFailed, Role};
use ictdesk::commands::{self, config::Config};
use ictdesk::http::is_unauthorized;
use ictdesk::runtime::RealRuntime;
use std::path::PathBuf;

/// ictdesk - School ICT helpdesk client
///
/// Sign in to the ICT lab support platform and work with equipment, tickets,
/// reports and analytics from the command line.
///
/// Expired access tokens are renewed automatically using the stored refresh
/// token.
///
/// Examples:
///   ictdesk login -u amina          # Sign in (password from ICTDESK_PASSWORD)
///   ictdesk fetch tickets           # List tickets
///   ictdesk fetch equipment --id 3  # Show one equipment record
#[derive(Parser, Debug)]
#[command(author, version = env!("ICTDESK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Helpdesk API URL (defaults to http://127.0.0.1:8000)
    #[arg(long = "api-url", env = "ICTDESK_API_URL", value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Session file holding the stored tokens (overrides the default location)
    #[arg(long = "session", env = "ICTDESK_SESSION", value_name = "PATH", global = true)]
    pub session: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Sign in and store the session tokens
    Login(LoginArgs),

    /// Forget the stored session
    Logout,

    /// Show the signed-in user's profile
    Whoami,

    /// Create a new user account
    Register(RegisterArgs),

    /// Fetch a resource, report or analytics view
    Fetch(FetchArgs),

    /// Send a raw authenticated request
    Request(RequestArgs),
}

#[derive(clap::Args, Debug)]
pub struct LoginArgs {
    #[arg(long, short = 'u')]
    pub username: String,

    /// Password (falls back to ICTDESK_PASSWORD)
    #[arg(long, short = 'p')]
    pub password: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct RegisterArgs {
    #[arg(long, short = 'u')]
    pub username: String,

    #[arg(long, short = 'e')]
    pub email: String,

    /// Password (falls back to ICTDESK_PASSWORD)
    #[arg(long, short = 'p')]
    pub password: Option<String>,

    #[arg(long, value_enum, default_value_t = Role::User)]
    pub role: Role,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    #[arg(value_enum)]
    pub endpoint: Endpoint,

    /// Record id, for equipment, tickets, comments and users
    #[arg(long)]
    pub id: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct RequestArgs {
    /// HTTP method, e.g. GET, POST, PATCH
    pub method: String,

    /// Path relative to the API URL, e.g. /api/tickets/7/
    pub path: String,

    /// JSON request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = &result {
        if needs_login_hint(e) {
            eprintln!("Log in again with `ictdesk login`.");
        }
    }
    result
}

/// A 401 the client could not recover from. Failed refreshes already told the
/// user through the session listener.
fn needs_login_hint(error: &anyhow::Error) -> bool {
    is_unauthorized(error) && error.downcast_ref::<RefreshFailed>().is_none()
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = RealRuntime;

    let password = match &cli.command {
        Commands::Login(args) => Some(commands::resolve_password(&runtime, args.password.clone())?),
        Commands::Register(args) => {
            Some(commands::resolve_password(&runtime, args.password.clone())?)
        }
        _ => None,
    };

    let config = Config::new(runtime, cli.api_url, cli.session)?;
    let client = &config.client;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Login(args) => {
            let password = password.unwrap_or_default();
            commands::login(client, &args.username, &password, &mut out).await?
        }
        Commands::Logout => commands::logout(client, &mut out)?,
        Commands::Whoami => commands::whoami(client, &mut out).await?,
        Commands::Register(args) => {
            let user = NewUser {
                username: args.username,
                email: args.email,
                password: password.unwrap_or_default(),
                role: args.role,
            };
            commands::register(client, &user, &mut out).await?
        }
        Commands::Fetch(args) => commands::fetch(client, args.endpoint, args.id, &mut out).await?,
        Commands::Request(args) => {
            commands::request(
                client,
                &args.method,
                &args.path,
                args.data.as_deref(),
                &mut out,
            )
            .await?
        }
    }
    Ok(())
}
