//! Binary entry point: profile selection, client bootstrap, and the
//! controller loop. The terminal frontend attaches through the action and
//! view channels.

use clap::Parser;
use tokio::sync::mpsc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use backchat::config::Config;
use backchat::controller::{Controller, NullNotifier, NullSettingsDecoder};
use backchat::gateway::{Gateway, GatewayConfig};
use backchat::profile;
use backchat::rest::{RestClient, RestConfig, RestError};

#[derive(Debug, Parser)]
#[command(name = "backchat", version, about = "Terminal chat client engine")]
struct Args {
    /// Profile to use instead of the selected one.
    #[arg(short, long)]
    profile: Option<String>,

    /// Open the profile manager even when a profile is selected.
    #[arg(long)]
    force_profile_manager: bool,

    /// Custom API host (self-hosted instances).
    #[arg(long)]
    host: Option<String>,

    /// Override the external media player binary.
    #[arg(long)]
    media_player: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    std::process::exit(match run(args).await {
        Ok(()) => 0,
        Err(message) => {
            error!(message, "fatal");
            eprintln!("{}", message);
            1
        }
    });
}

async fn run(args: Args) -> Result<(), String> {
    let profiles = profile::load_profiles();
    if args.force_profile_manager {
        return Err("profile manager requested; run the frontend to manage profiles".to_owned());
    }
    let entry = match &args.profile {
        Some(name) => profiles.profiles.iter().find(|p| &p.name == name),
        None => profiles.selected_entry(),
    };
    let Some(entry) = entry else {
        return Err("no profile configured".to_owned());
    };
    if entry.token.is_empty() {
        return Err("profile has no token".to_owned());
    }

    let config = Config {
        host: args.host,
        media_player: args.media_player,
        ..Config::default()
    }
    .clamped();

    // identity bootstrap; an invalid token exits immediately
    let (rest, my_id) = RestClient::new(
        entry.token.clone(),
        RestConfig {
            host: config.host.clone(),
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            super_properties: config.super_properties.clone(),
        },
    )
    .await
    .map_err(|err| match err {
        RestError::Unauthorized => "unauthorized: invalid token".to_owned(),
        RestError::Network => "no internet connection".to_owned(),
        other => format!("could not reach the service: {}", other),
    })?;
    tracing::info!(%my_id, "logged in");

    let (gateway, queues) = Gateway::connect(GatewayConfig {
        token: entry.token.clone(),
        host: config.gateway_host.clone(),
        os: std::env::consts::OS.to_owned(),
        browser: "backchat".to_owned(),
        device: "backchat".to_owned(),
    });

    // the frontend owns the other ends of these channels
    let (_actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (views_tx, mut views_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        // drain view updates until a frontend is attached
        while views_rx.recv().await.is_some() {}
    });

    let controller = Controller::new(
        config,
        rest,
        gateway,
        queues,
        actions_rx,
        views_tx,
        Box::new(NullNotifier),
        Box::new(NullSettingsDecoder),
        profile::ProfileStore::for_profile(&entry.name),
    );
    controller.run().await.map_err(|err| err.to_string())
}
