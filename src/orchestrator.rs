//! Drives one run: acquires the run lock, loads the snapshot, fetches every
//! feed over a bounded pool, decides and renders each feed's items, and
//! pushes ready messages onto a channel that a second bounded pool drains
//! concurrently with the fetches still in flight, before persisting stats.
//! Mirrors the teacher's `refresh_all` shape at a higher level — one
//! mutex-guarded map, one bounded fetch pool — but adds the
//! decide/render/send stages and the run-lock/stats bookends a periodic
//! pipeline needs that a standalone feed reader doesn't.

use crate::decide::{decide, Outcome};
use crate::error::AppError;
use crate::fetch::{fetch_one, FetchOutcome, GithubAdapter};
use crate::feedset::FeedSet;
use crate::lock::{Lock, LockError};
use crate::model::{FeedConfig, Item};
use crate::render::{render, RenderedMessage};
use crate::rules::{LuaRuleSet, RuleSet};
use crate::send::{Sender, Target};
use crate::settings::Settings;
use crate::stats::RunStats;
use crate::store::{LocalStore, Store};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

pub async fn run(settings: &Settings, dry: bool, cancel: CancellationToken) -> Result<RunStats, AppError> {
    let started_at = Utc::now();
    let lock_path = settings.state_directory.join(".run.lock");

    let lock = if dry {
        None
    } else {
        match Lock::acquire(&lock_path, format!("pid={}\n", std::process::id()).as_bytes()) {
            Ok(lock) => Some(lock),
            Err(LockError::AlreadyLocked) => return Err(AppError::AlreadyRunning),
            Err(LockError::Io(e)) => return Err(AppError::Io(e)),
        }
    };

    let store: Arc<dyn Store> = Arc::new(LocalStore::new(&settings.state_directory, settings.backup_count));
    let snapshot = store.load_snapshot().await.map_err(|e| AppError::Other(e.into()))?;
    let error_template = snapshot.error_template.clone();
    let rules: Arc<dyn RuleSet> =
        Arc::new(LuaRuleSet::load(&snapshot.config_source).map_err(|e| AppError::Other(e.into()))?);

    let feed_store: Arc<dyn Store> = if dry { Arc::new(NullWriteStore(store)) } else { store };
    let feed_set = FeedSet::new(feed_store, snapshot.state);
    let keep: HashSet<String> = rules.feeds().iter().map(|f| f.url.clone()).collect();
    feed_set.prune_missing(&keep).await.map_err(|e| AppError::Other(e.into()))?;

    let client = reqwest::Client::new();
    let github = settings
        .github_token
        .as_ref()
        .map(|token| Arc::new(GithubAdapter::new(client.clone(), token.clone())));

    let sender = settings
        .telegram_token
        .as_ref()
        .map(|token| Arc::new(Sender::new(client.clone(), token, settings.message_rune_cap, settings.send_retry_limit)));

    let mut stats = RunStats { started_at: Some(started_at), feeds_total: rules.feeds().len(), ..Default::default() };

    // Sends are pipelined with fetches, not gated behind them: each feed
    // task pushes its rendered messages onto this channel as soon as they
    // are ready, and the pump below drains it concurrently over a bounded
    // pool of send permits, so one feed's rate-limit retries never delay
    // delivery for another feed's already-ready messages.
    let send_permits = Arc::new(Semaphore::new(settings.send_concurrency_limit.max(1)));
    let messages_sent = Arc::new(AtomicU64::new(0));
    let send_channel = if !dry {
        sender.clone().map(|sender| {
            let (tx, rx) = mpsc::channel::<SendJob>(settings.send_concurrency_limit.max(1) * 4);
            let pump = spawn_send_pump(rx, sender, send_permits.clone(), messages_sent.clone());
            (tx, pump)
        })
    } else {
        None
    };
    let send_tx = send_channel.as_ref().map(|(tx, _)| tx.clone());

    let fetch_permits = Arc::new(Semaphore::new(settings.fetch_concurrency_limit.max(1)));
    let mut fetch_handles = Vec::with_capacity(rules.feeds().len());

    for feed in rules.feeds().iter().cloned() {
        let feed_set = feed_set.clone();
        let client = client.clone();
        let github = github.clone();
        let permits = fetch_permits.clone();
        let cancel = cancel.clone();
        let settings = settings.clone();
        let rules = rules.clone();
        let send_tx = send_tx.clone();
        let error_template = error_template.clone();

        fetch_handles.push(tokio::spawn(async move {
            let _permit = permits.acquire().await;
            process_feed(
                &feed,
                &feed_set,
                &client,
                github.as_deref(),
                &settings,
                rules.as_ref(),
                &cancel,
                send_tx.as_ref(),
                &error_template,
            )
            .await
        }));
    }

    for handle in fetch_handles {
        match handle.await {
            Ok(Ok(outcome)) => {
                stats.feeds_not_modified += outcome.not_modified as usize;
                stats.feeds_fetched += outcome.fetched as usize;
                stats.feeds_failed += outcome.failed as usize;
                stats.feeds_disabled += outcome.disabled as usize;
                stats.items_processed += outcome.items_processed;
                stats.items_skipped += outcome.items_skipped;
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "feed processing failed"),
            Err(e) => tracing::warn!(error = %e, "feed processing task panicked"),
        }
    }

    // Every per-feed task's `send_tx` clone was dropped when that task
    // finished; dropping this last clone closes the channel so the pump's
    // `recv()` loop terminates once it has drained what's left.
    if let Some((tx, pump)) = send_channel {
        drop(tx);
        if let Err(e) = pump.await {
            tracing::warn!(error = %e, "send pump panicked");
        }
    }
    stats.messages_sent = messages_sent.load(Ordering::Relaxed) as usize;

    let finished_at = Utc::now();
    stats.finished_at = Some(finished_at);
    stats.duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
    stats.rss_bytes = crate::stats::current_rss_bytes();

    if !dry {
        if let Err(e) = crate::stats::record(&settings.state_directory, &stats, finished_at) {
            tracing::warn!(error = %e, "failed to record run stats");
        }
    }

    drop(lock);
    Ok(stats)
}

/// Wraps a [`Store`] so writes are discarded — backs `-dry`'s "no side
/// effects" guarantee without threading a conditional through every
/// [`FeedSet::update`] call site.
struct NullWriteStore(Arc<dyn Store>);

#[async_trait::async_trait]
impl Store for NullWriteStore {
    async fn load_config(&self) -> Result<String, crate::store::StoreError> {
        self.0.load_config().await
    }
    async fn load_state(&self) -> Result<crate::store::StateMap, crate::store::StoreError> {
        self.0.load_state().await
    }
    async fn load_error_template(&self) -> Result<String, crate::store::StoreError> {
        self.0.load_error_template().await
    }
    async fn save_config(&self, _source: &str) -> Result<(), crate::store::StoreError> {
        Ok(())
    }
    async fn save_state(&self, _state: &crate::store::StateMap) -> Result<(), crate::store::StoreError> {
        Ok(())
    }
    async fn save_state_json(&self, _raw: &str) -> Result<(), crate::store::StoreError> {
        Ok(())
    }
    async fn save_error_template(&self, _template: &str) -> Result<(), crate::store::StoreError> {
        Ok(())
    }
}

/// One message queued for delivery, carrying everything the send pump needs
/// without borrowing back into the feed task that produced it.
struct SendJob {
    target: Target,
    message: RenderedMessage,
    cancel: CancellationToken,
}

/// Drains `rx`, fanning sends out over `permits` concurrently with
/// production, so a slow feed's messages never block a fast feed's.
fn spawn_send_pump(
    mut rx: mpsc::Receiver<SendJob>,
    sender: Arc<Sender>,
    permits: Arc<Semaphore>,
    messages_sent: Arc<AtomicU64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut handles = Vec::new();
        while let Some(job) = rx.recv().await {
            let sender = sender.clone();
            let permits = permits.clone();
            let messages_sent = messages_sent.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire().await;
                match sender.send(&job.target, &job.message, &job.cancel).await {
                    Ok(()) => {
                        messages_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to deliver message"),
                }
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "send task panicked");
            }
        }
    })
}

struct FeedOutcome {
    not_modified: bool,
    fetched: bool,
    failed: bool,
    disabled: bool,
    items_processed: usize,
    items_skipped: usize,
}

impl Default for FeedOutcome {
    fn default() -> Self {
        Self {
            not_modified: false,
            fetched: false,
            failed: false,
            disabled: false,
            items_processed: 0,
            items_skipped: 0,
        }
    }
}

/// One feed's full lifecycle for this run: optional seen-items priming,
/// conditional fetch with rate-limit retries, per-item decisions, and a
/// single commit of the resulting state back through [`FeedSet`].
async fn process_feed(
    feed: &FeedConfig,
    feed_set: &FeedSet,
    client: &reqwest::Client,
    github: Option<&GithubAdapter>,
    settings: &Settings,
    rules: &dyn RuleSet,
    cancel: &CancellationToken,
    send_tx: Option<&mpsc::Sender<SendJob>>,
    error_template: &str,
) -> Result<FeedOutcome, AppError> {
    let now = Utc::now();
    let mut outcome = FeedOutcome::default();

    if let Some(state) = feed_set.read(&feed.url).await {
        if state.disabled {
            return Ok(outcome);
        }
    }
    let existed_before = feed_set.read(&feed.url).await.is_some();

    let cleanup_period = chrono::Duration::from_std(settings.cleanup_period).unwrap_or_else(|_| chrono::Duration::days(28));
    let just_enabled = if feed.always_send_new_items {
        feed_set
            .update(&feed.url, |state, _exists| {
                let just_enabled = state.prepare_seen_items(now, cleanup_period);
                (true, Ok::<bool, AppError>(just_enabled))
            })
            .await?
    } else {
        false
    };

    let mut working_state = feed_set.read(&feed.url).await.unwrap_or_default();

    let mut retry_count = 0;
    let fetch_outcome = loop {
        let result = fetch_one(client, github, feed, &working_state, cancel).await;
        match result {
            FetchOutcome::RateLimited { retry_after } if retry_count < settings.retry_limit => {
                retry_count += 1;
                let sleep = tokio::time::sleep(retry_after.to_std().unwrap_or(std::time::Duration::from_secs(1)));
                tokio::select! {
                    _ = sleep => continue,
                    _ = cancel.cancelled() => break FetchOutcome::Failed { message: "cancelled during rate-limit backoff".to_string() },
                }
            }
            FetchOutcome::RateLimited { .. } => {
                break FetchOutcome::Failed { message: "rate limited past retry limit".to_string() }
            }
            other => break other,
        }
    };

    match fetch_outcome {
        FetchOutcome::NotModified => {
            feed_set
                .update(&feed.url, |state, _exists| {
                    state.mark_not_modified(now);
                    (true, Ok::<(), AppError>(()))
                })
                .await?;
            outcome.not_modified = true;
        }
        FetchOutcome::Failed { message } => {
            let disabled_transition = feed_set
                .update(&feed.url, |state, _exists| {
                    let transitioned = state.mark_fetch_failure(&message, settings.disable_threshold);
                    (true, Ok::<bool, AppError>(transitioned))
                })
                .await?;
            outcome.failed = true;
            if disabled_transition {
                outcome.disabled = true;
                if let Some(tx) = send_tx {
                    let body = error_template.replacen("%v", &format!("{}: {message}", feed.display_title()), 1);
                    let target = Target { chat_id: settings.chat_id.unwrap_or_default(), topic: settings.error_thread_id };
                    let rendered = RenderedMessage { body, keyboard: None, suppress_link_preview: false };
                    let _ = tx.send(SendJob { target, message: rendered, cancel: cancel.clone() }).await;
                }
            }
        }
        FetchOutcome::RateLimited { .. } => unreachable!("resolved by the retry loop above"),
        FetchOutcome::Fetched { items, etag, last_modified } => {
            let lookback = chrono::Duration::from_std(settings.lookback_period).unwrap_or_else(|_| chrono::Duration::days(14));
            let mut digest_bucket: Vec<Item> = Vec::new();

            for item in items {
                let decision = decide(feed, &working_state, &item, existed_before, just_enabled, now, lookback, rules);
                match decision {
                    Outcome::Skip => outcome.items_skipped += 1,
                    Outcome::MarkSeenOnly { guid } => {
                        working_state.mark_seen(&guid, now);
                        outcome.items_skipped += 1;
                    }
                    Outcome::Process { mark_seen } => {
                        if let Some(guid) = mark_seen {
                            working_state.mark_seen(&guid, now);
                        }
                        outcome.items_processed += 1;
                        let rendered = render(feed, std::slice::from_ref(&item), rules);
                        if let Some(tx) = send_tx {
                            let target = Target { chat_id: settings.chat_id.unwrap_or_default(), topic: feed.topic };
                            let _ = tx.send(SendJob { target, message: rendered, cancel: cancel.clone() }).await;
                        }
                    }
                    Outcome::Digest { mark_seen } => {
                        if let Some(guid) = mark_seen {
                            working_state.mark_seen(&guid, now);
                        }
                        outcome.items_processed += 1;
                        digest_bucket.push(item);
                    }
                }
            }

            if !digest_bucket.is_empty() {
                let rendered = render(feed, &digest_bucket, rules);
                if let Some(tx) = send_tx {
                    let target = Target { chat_id: settings.chat_id.unwrap_or_default(), topic: feed.topic };
                    let _ = tx.send(SendJob { target, message: rendered, cancel: cancel.clone() }).await;
                }
            }

            let final_seen = working_state.seen_items.clone();
            feed_set
                .update(&feed.url, |state, _exists| {
                    state.update_cache_headers(etag.as_deref().unwrap_or(""), last_modified.as_deref().unwrap_or(""));
                    state.mark_fetch_success(now);
                    state.seen_items = final_seen;
                    (true, Ok::<(), AppError>(()))
                })
                .await?;
            outcome.fetched = true;
        }
    }

    Ok(outcome)
}
