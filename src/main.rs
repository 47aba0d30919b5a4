use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tgfeed::cli::{Cli, Commands};
use tgfeed::error::AppError;
use tgfeed::model::FeedState;
use tgfeed::rules::LuaRuleSet;
use tgfeed::settings::Settings;
use tgfeed::store::{LocalStore, RemoteStore, Store};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dry = matches!(cli.command, Commands::Run { dry: true });

    let settings = match Settings::from_env(dry) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    #[cfg(unix)]
    if let Err(e) = ensure_state_directory(&settings.state_directory) {
        tracing::warn!(error = %e, "failed to prepare state directory");
    }

    let result = dispatch(&cli, &settings).await;

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(code) = e.exit_code() {
                eprintln!("error: {e}");
                std::process::exit(code);
            }
            Err(e.into())
        }
    }
}

async fn dispatch(cli: &Cli, settings: &Settings) -> Result<(), AppError> {
    match &cli.command {
        Commands::Run { dry } => {
            let stats = tgfeed::orchestrator::run(settings, *dry, CancellationToken::new()).await?;
            tracing::info!(
                feeds_total = stats.feeds_total,
                feeds_fetched = stats.feeds_fetched,
                feeds_failed = stats.feeds_failed,
                messages_sent = stats.messages_sent,
                duration_ms = stats.duration_ms,
                "run finished"
            );
            Ok(())
        }
        Commands::Edit => edit(cli, settings).await,
        Commands::Feeds => feeds(cli, settings).await,
        Commands::Reenable { url } => reenable(cli, settings, url).await,
        Commands::Admin => serve_admin(settings).await,
    }
}

fn store_for(cli: &Cli, settings: &Settings) -> Arc<dyn Store> {
    match &cli.remote {
        Some(base_url) => Arc::new(RemoteStore::new(base_url.clone())),
        None => Arc::new(LocalStore::new(&settings.state_directory, settings.backup_count)),
    }
}

async fn edit(cli: &Cli, settings: &Settings) -> Result<(), AppError> {
    let store = store_for(cli, settings);
    let current = store.load_config().await?;

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let tmp = std::env::temp_dir().join(format!("tgfeed-edit-{}.lua", std::process::id()));
    std::fs::write(&tmp, &current).map_err(AppError::Io)?;

    let status = std::process::Command::new(&editor)
        .arg(&tmp)
        .status()
        .map_err(AppError::Io)?;
    if !status.success() {
        std::fs::remove_file(&tmp).ok();
        return Err(AppError::BadRequest(format!("{editor} exited with {status}")));
    }

    let edited = std::fs::read_to_string(&tmp).map_err(AppError::Io)?;
    std::fs::remove_file(&tmp).ok();

    if edited == current {
        println!("no changes");
        return Ok(());
    }

    LuaRuleSet::load(&edited).map_err(|e| AppError::BadRequest(e.to_string()))?;
    store.save_config(&edited).await?;
    println!("saved");
    Ok(())
}

async fn feeds(cli: &Cli, settings: &Settings) -> Result<(), AppError> {
    let store = store_for(cli, settings);
    let snapshot = store.load_snapshot().await?;
    let rules = LuaRuleSet::load(&snapshot.config_source).map_err(|e| AppError::Other(e.into()))?;

    for feed in tgfeed::rules::RuleSet::feeds(&rules) {
        let state = snapshot.state.get(&feed.url).cloned().unwrap_or_default();
        println!(
            "{}\tdisabled={}\terror_count={}\tlast_updated={}",
            feed.url, state.disabled, state.error_count, state.last_updated
        );
    }
    Ok(())
}

async fn reenable(cli: &Cli, settings: &Settings, url: &str) -> Result<(), AppError> {
    let store = store_for(cli, settings);
    let mut state = store.load_state().await?;
    match state.get_mut(url) {
        Some(feed_state) => {
            feed_state.reenable();
        }
        None => {
            state.insert(url.to_string(), FeedState::default());
        }
    }
    store.save_state(&state).await?;
    println!("reenabled {url}");
    Ok(())
}

async fn serve_admin(settings: &Settings) -> Result<(), AppError> {
    let addr = settings
        .admin_addr
        .clone()
        .ok_or_else(|| AppError::BadRequest("ADMIN_ADDR not set".to_string()))?;

    let store: Arc<dyn Store> = Arc::new(LocalStore::new(&settings.state_directory, settings.backup_count));
    let state = tgfeed::admin::AdminState {
        store,
        lock_path: settings.state_directory.join(".run.lock"),
        state_directory: settings.state_directory.clone(),
    };
    let app = tgfeed::admin::router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    if Settings::admin_addr_is_unix_socket(&addr) {
        std::fs::remove_file(&addr).ok();
        let listener = tokio::net::UnixListener::bind(&addr).map_err(AppError::Io)?;
        tracing::info!(socket = %addr, "admin server listening");
        axum::serve(listener, app).await.map_err(AppError::Io)?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(AppError::Io)?;
        tracing::info!(%addr, "admin server listening");
        axum::serve(listener, app).await.map_err(AppError::Io)?;
    }
    Ok(())
}

#[cfg(unix)]
fn ensure_state_directory(dir: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(dir).context("failed to create state directory")?;
    let mut perms = std::fs::metadata(dir)?.permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(dir, perms).context("failed to set state directory permissions")?;
    Ok(())
}
