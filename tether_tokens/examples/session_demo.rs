use std::time::Duration;

use clap::Parser;
use tether_tokens::{
    issuance::HttpIssuance, stores::FileCredentialStore, AuthSession, LoginId, Password,
    SessionConfig,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The issuing authority's base URL, under which `login` and `refresh` live
    #[clap(short, long, env)]
    auth_url: reqwest::Url,

    /// The identifier to log in with when no session is stored
    #[clap(short, long, env)]
    login_id: LoginId,

    /// The password to log in with when no session is stored
    #[clap(short, long, env, hide_env_values = true)]
    password: Password,

    /// The local file used to persist credentials
    #[clap(
        short = 'f',
        long,
        env,
        value_name = "FILE",
        default_value = ".credentials.json"
    )]
    credentials_file: std::path::PathBuf,

    /// How long before expiry the access token is renewed, in seconds
    #[clap(long, env, default_value_t = 10)]
    renewal_skew: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let issuance = HttpIssuance::new(reqwest::Client::new(), opts.auth_url);
    let store = FileCredentialStore::new(opts.credentials_file);
    let config = SessionConfig::default().with_renewal_skew(Duration::from_secs(opts.renewal_skew));

    let session = AuthSession::new(store, issuance, config);

    if session.is_authenticated() {
        tracing::info!(
            subject = session.subject().as_deref().map(|s| s.as_str()),
            "resumed stored session"
        );
    } else {
        session.login(opts.login_id, opts.password).await?;
    }

    tracing::info!(
        token = format_args!("{:#?}", session.access_token()),
        "first access token"
    );

    let mut watcher = session.watch();
    tokio::spawn(async move {
        while let Ok(snapshot) = watcher.changed().await {
            tracing::info!(
                authenticated = snapshot.is_authenticated(),
                subject = snapshot.subject().map(|s| s.as_str()),
                "session changed"
            );
        }
    });

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        if session.is_authenticated() {
            tracing::debug!(
                renewal_at = session.renewal_scheduled_at().map(|t| t.0),
                renewing = session.is_renewing(),
                "session active"
            );
        } else {
            tracing::error!("session ended");
            break;
        }
    }

    Ok(())
}
