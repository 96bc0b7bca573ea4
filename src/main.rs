//! Application entry point: the voice assistant CLI.
//!
//! Each line on stdin is treated as a final transcript from the speech
//! recogniser, so a session looks like:
//!
//! ```text
//! $ voice-assistant
//! hey abby
//! show patients
//! hey abby
//! which patients are overdue for a colonoscopy?
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging and load `.env`.
//! 2. Load [`AppConfig`] (defaults on first run) and apply env overrides.
//! 3. Build the shared cache and its expiry sweeper.
//! 4. Build the task queue, security guard, rate limiter, brain and voice.
//! 5. Spawn the recognition service over stdin.
//! 6. Run the orchestrator until stdin closes or Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use voice_assistant::{
    brain::Brain,
    cache::{BoundedCache, CacheLimits},
    config::{AppConfig, AppPaths},
    pipeline::{mirror_recognition, new_shared_state, Orchestrator},
    prefs::PreferenceStore,
    queue::TaskQueue,
    recognition::{CommandTable, LineRecognizer, RecognitionMachine, RecognitionService},
    security::{PatternGuard, RateLimiter, SecurityGuard},
    voice::{SpoolOutput, Voice},
};

/// How often idle rate-limit keys are forgotten.
const RATE_LIMIT_CLEANUP: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging and .env
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = dotenvy::dotenv() {
        log::debug!("no .env loaded: {e}");
    }
    log::info!("voice assistant starting up");

    // 2. Configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    config.apply_env_overrides();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let result = rt.block_on(run(config));
    // The stdin reader sits on a blocking thread that never returns on its own.
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(mut config: AppConfig) -> anyhow::Result<()> {
    let paths = AppPaths::new();

    let prefs = match PreferenceStore::open(&paths.preferences_file) {
        Ok(store) => store.voice_preferences(),
        Err(e) => {
            log::warn!("Failed to load preferences ({e:#}); using defaults");
            Default::default()
        }
    };
    if !prefs.enabled {
        log::info!("voice input is disabled in preferences; exiting");
        return Ok(());
    }
    prefs.apply_to(&mut config);

    // 3. Cache
    let cache = Arc::new(BoundedCache::new(CacheLimits::from(&config.cache)));
    let mut sweeper = cache.spawn_sweeper(config.cache.sweep_interval());

    // 4. Queue, security, brain, voice
    let queue = TaskQueue::from_config(&config.queue);
    let guard: Arc<dyn SecurityGuard> = Arc::new(PatternGuard::new(&config.security));
    let limiter = Arc::new(RateLimiter::from_config(&config.security));
    let brain = Arc::new(Brain::from_config(&config, guard, Arc::clone(&cache)));
    let voice = Arc::new(Voice::from_config(
        &config,
        Arc::new(SpoolOutput::new(&paths.audio_dir)),
        Arc::clone(&cache),
    ));

    let limiter_cleanup = {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_CLEANUP);
            loop {
                ticker.tick().await;
                limiter.retain_recent();
                log::debug!("rate limiter tracking {} keys", limiter.tracked_keys());
            }
        })
    };

    // 5. Recognition over stdin
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let recognizer = LineRecognizer::new(BufReader::new(tokio::io::stdin()), events_tx);
    let input_closed = recognizer.closed();

    let machine = RecognitionMachine::new(
        config.recognition.clone(),
        CommandTable::new(&config.commands, &config.responses),
        config.responses.clone(),
    );
    let (recognition, commands) = RecognitionService::spawn(machine, recognizer, events_rx);

    let state = new_shared_state();
    let mirror = mirror_recognition(Arc::clone(&state), recognition.subscribe());

    // 6. Orchestrator
    let orchestrator = Orchestrator::new(
        state,
        brain,
        Arc::clone(&voice),
        queue.clone(),
        limiter,
        &config,
    );
    let orchestrator_task = tokio::spawn(orchestrator.run(commands));

    recognition.start();
    log::info!(
        "listening on stdin; say one of {:?} to begin",
        config.recognition.wake_phrases()
    );

    tokio::select! {
        _ = input_closed.cancelled() => {
            log::info!("input closed");
            // Let a trailing command window elapse so the last utterance is dispatched.
            tokio::time::sleep(config.recognition.command_window() + Duration::from_millis(100)).await;
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                log::warn!("failed to listen for Ctrl-C: {e}");
            }
            log::info!("interrupted");
        }
    }

    // Shutdown: recognition first so no new commands arrive, then let the
    // orchestrator finish what is in flight.
    recognition.shutdown().await;
    if let Err(e) = orchestrator_task.await {
        log::warn!("orchestrator ended abnormally: {e}");
    }
    voice.stop();
    queue.shutdown();
    sweeper.stop();
    limiter_cleanup.abort();
    mirror.abort();

    let stats = cache.stats();
    log::info!(
        "voice assistant stopped ({} cached entries, {} voice bytes)",
        stats.total_entries,
        stats.voice_bytes
    );
    Ok(())
}
