use std::io::{self, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ketal_core::auth::{
    AuthError, IndicatorKind, ManualBrowserProvider, OidcClientConfig, OidcEndpoints,
    OidcTokenService, SignInCoordinator, SignInParameters, SignInResult, SignOutCoordinator,
    SignOutOutcome, UserIndicator, UserIndicatorController,
};
use ketal_core::config::{AppConfig, ConfigLocator};
use ketal_core::discovery::{normalize_homeserver, DiscoveryResolver, ProviderMetadata};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Matrix OIDC sign-in from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authentication related commands
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Sign in through the homeserver's OIDC provider
    Login(LoginArgs),
    /// End the provider-side session for a homeserver
    Logout(LogoutArgs),
    /// Show the OIDC provider a homeserver delegates to
    Discover(DiscoverArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Homeserver domain or URL
    #[arg(long)]
    homeserver: String,
    /// OAuth client id registered with the provider
    #[arg(long = "client-id")]
    client_id: Option<String>,
    /// Override the redirect URI sent to the provider
    #[arg(long = "redirect-uri")]
    redirect_uri: Option<String>,
    /// Print the URL instead of launching a browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Args, Debug)]
struct LogoutArgs {
    /// Homeserver domain or URL
    #[arg(long)]
    homeserver: String,
    /// Print the URL instead of launching a browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Args, Debug)]
struct DiscoverArgs {
    /// Homeserver domain or URL
    #[arg(long)]
    homeserver: String,
    /// Output raw JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config()?;
    match cli.command {
        Commands::Auth(cmd) => match cmd {
            AuthCommand::Login(args) => auth_login(config, args).await?,
            AuthCommand::Logout(args) => auth_logout(config, args).await?,
            AuthCommand::Discover(args) => auth_discover(config, args).await?,
        },
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KETAL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config() -> Result<AppConfig> {
    let locator = ConfigLocator::new().context("unable to locate configuration directory")?;
    debug!(path = %locator.config_file().display(), "loading configuration");
    AppConfig::load(&locator).context("failed to load configuration")
}

async fn auth_login(mut config: AppConfig, args: LoginArgs) -> Result<()> {
    if let Some(client_id) = args.client_id {
        config.client_id = Some(client_id);
    }
    if let Some(redirect_uri) = args.redirect_uri {
        config.default_redirect_uri = redirect_uri;
    }

    let client = OidcClientConfig::from_app_config(&config)
        .context("pass --client-id or set KETAL_CLIENT_ID")?;
    let metadata = discover(&config, &args.homeserver).await?;
    let endpoints = OidcEndpoints::from_metadata(&metadata).ok_or_else(|| {
        anyhow!(
            "provider {} does not advertise authorization and token endpoints",
            metadata.issuer
        )
    })?;

    let user_agent = config.ascii_user_agent();
    let service = Arc::new(
        OidcTokenService::new(client, endpoints, &user_agent)
            .context("failed to build token client")?,
    );
    let attempt = service.start_authorization();

    let browser = ManualBrowserProvider::new(
        !args.no_browser && ManualBrowserProvider::browser_available(),
        print_authorization_url,
        prompt_for_redirect,
    );
    let coordinator = SignInCoordinator::new(SignInParameters {
        attempt,
        service,
        browser: Arc::new(browser),
        indicators: Arc::new(TerminalIndicators),
        user_agent,
    });

    match coordinator.run().await {
        SignInResult::Success(session) => {
            println!("Signed in to {}.", normalize_homeserver(&args.homeserver));
            if let Some(expires_at) = session.expires_at {
                println!("Access token expires at {expires_at}.");
            }
            if !session.scope.is_empty() {
                println!("Granted scopes: {}", session.scope.join(" "));
            }
            Ok(())
        }
        SignInResult::Cancelled => Err(anyhow!(
            "sign-in did not complete; set KETAL_LOG=info for details"
        )),
    }
}

async fn auth_logout(config: AppConfig, args: LogoutArgs) -> Result<()> {
    let resolver = DiscoveryResolver::new(&config).context("failed to build HTTP client")?;
    let scheme = config.sign_out_callback_scheme.clone();
    let browser = ManualBrowserProvider::new(
        !args.no_browser && ManualBrowserProvider::browser_available(),
        print_logout_url,
        move || confirm_logout(scheme.clone()),
    );
    let coordinator =
        SignOutCoordinator::new(&args.homeserver, resolver, Arc::new(browser), &config);

    match coordinator.run().await {
        SignOutOutcome::SignedOut => {
            println!(
                "Signed out of {}. Local session data can now be removed.",
                normalize_homeserver(&args.homeserver)
            );
            Ok(())
        }
        SignOutOutcome::Cancelled => Err(anyhow!("sign-out cancelled")),
        SignOutOutcome::Failed(failure) => Err(anyhow::Error::new(failure)
            .context(format!("sign-out from {} failed", args.homeserver))),
    }
}

async fn auth_discover(config: AppConfig, args: DiscoverArgs) -> Result<()> {
    let metadata = discover(&config, &args.homeserver).await?;

    if args.json {
        let value = json!({
            "homeserver": normalize_homeserver(&args.homeserver),
            "issuer": metadata.issuer,
            "authorization_endpoint": metadata.authorization_endpoint.as_ref().map(Url::as_str),
            "token_endpoint": metadata.token_endpoint.as_ref().map(Url::as_str),
            "end_session_endpoint": metadata.end_session_endpoint.as_ref().map(Url::as_str),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Issuer: {}", metadata.issuer);
    print_endpoint("Authorization", metadata.authorization_endpoint.as_ref());
    print_endpoint("Token", metadata.token_endpoint.as_ref());
    print_endpoint("End session", metadata.end_session_endpoint.as_ref());
    Ok(())
}

async fn discover(config: &AppConfig, homeserver: &str) -> Result<ProviderMetadata> {
    let resolver = DiscoveryResolver::new(config).context("failed to build HTTP client")?;
    resolver
        .resolve_provider(homeserver)
        .await
        .with_context(|| format!("OIDC discovery failed for {homeserver}"))
}

fn print_endpoint(label: &str, endpoint: Option<&Url>) {
    match endpoint {
        Some(url) => println!("{label}: {url}"),
        None => println!("{label}: (not advertised)"),
    }
}

fn print_authorization_url(url: &Url) {
    println!("\nSign in by visiting:\n  {}\n", url);
}

fn print_logout_url(url: &Url) {
    println!("\nEnd the provider session by visiting:\n  {}\n", url);
}

async fn prompt_for_redirect() -> Result<String, AuthError> {
    read_line("Paste the URL you were redirected to (empty to cancel): ").await
}

/// The provider's logout page has no way back into a terminal, so the user
/// confirms by hand and the confirmation stands in for the callback.
async fn confirm_logout(scheme: String) -> Result<String, AuthError> {
    let answer =
        read_line("Press Enter once the provider confirms sign-out (type 'cancel' to abort): ")
            .await?;
    if answer.eq_ignore_ascii_case("cancel") {
        Ok(String::new())
    } else {
        Ok(format!("{scheme}:/logout"))
    }
}

async fn read_line(prompt: &'static str) -> Result<String, AuthError> {
    read_line_with(prompt, |input| io::stdin().read_line(input)).await
}

/// Runs `read` on a detached thread, so a prompt abandoned by a timeout or
/// cancellation never holds up runtime shutdown.
async fn read_line_with<F>(prompt: &'static str, read: F) -> Result<String, AuthError>
where
    F: FnOnce(&mut String) -> io::Result<usize> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        let _ = tx.send(prompt_blocking(prompt, read));
    });
    rx.await.map_err(|_| AuthError::InputClosed)?
}

fn prompt_blocking<F>(prompt: &str, read: F) -> Result<String, AuthError>
where
    F: FnOnce(&mut String) -> io::Result<usize>,
{
    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    if read(&mut input)? == 0 {
        return Err(AuthError::InputClosed);
    }
    Ok(input.trim().to_owned())
}

/// Writes indicator titles to stderr so they stay out of piped output.
struct TerminalIndicators;

impl UserIndicatorController for TerminalIndicators {
    fn submit_indicator(&self, indicator: UserIndicator) {
        if indicator.kind == IndicatorKind::Modal {
            eprintln!("{}", indicator.title);
        }
    }

    fn retract_indicator_with_id(&self, id: &str) {
        debug!(id, "indicator retracted");
    }
}
