use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use portal::{
    HistoryNavigator, Navigator, PortalConfig, PortalContext, Redirect, RestoreOutcome,
    navigation::post_login_destination,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Pages visited once the session is settled
const TOUR: [&str; 5] = [
    "/dashboard",
    "/students/profile",
    "/formations/add",
    "/administration/documents",
    "/register",
];

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting UCHK portal");

    let config = PortalConfig::load(Some(Path::new("portal.toml")))?;
    let navigator = Arc::new(HistoryNavigator::new("/login?returnUrl=%2Fstudents%2Fprofile"));
    let portal = PortalContext::new(config, navigator.clone())?;

    match portal.session.restore() {
        RestoreOutcome::Restored { username } => info!("Welcome back, {}", username),
        outcome => {
            info!("No usable session ({:?})", outcome);
            login_from_env(&portal).await;
        }
    }

    if portal.session.is_logged_in() {
        match portal.auth.validate().await {
            Ok(answer) if answer.valid => info!("Backend accepted the session"),
            Ok(answer) => warn!("Backend rejected the session: {:?}", answer.message),
            Err(e) => warn!("Session validation failed: {}", e.user_message()),
        }
    }

    for url in TOUR {
        let verdict = portal.guard.can_activate(url);
        if verdict.is_allowed() {
            navigator.visit(url);
        }
        info!("{} -> {}", url, navigator.current_url());
    }

    info!("Portal session tour finished");

    Ok(())
}

async fn login_from_env(portal: &PortalContext) {
    let (Ok(username), Ok(password)) = (
        std::env::var("UCHK_USERNAME"),
        std::env::var("UCHK_PASSWORD"),
    ) else {
        info!("Set UCHK_USERNAME and UCHK_PASSWORD to log in");
        return;
    };

    match portal.auth.login(&username, &password).await {
        Ok(response) => {
            info!("Logged in as {} ({})", response.username, response.role);
            let destination = post_login_destination(
                &portal.navigator.current_url(),
                &portal.config.landing_path,
            );
            info!("Continuing to {}", destination);
            portal.navigator.navigate(&Redirect::parse(&destination));
        }
        Err(e) => warn!("Login failed: {}", e.user_message()),
    }
}
