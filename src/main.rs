use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use note_assist::classify::{Classifier, LlmClassifier};
use note_assist::config::Config;
use note_assist::diagnose;
use note_assist::notify::{LogNotifier, Notifier, OsaScriptNotifier};
use note_assist::pipeline::Pipeline;
use note_assist::source::{ChatDbSource, MessageSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = std::env::args().nth(1).unwrap_or_else(|| "once".to_string());

    let config_path = std::env::var("NOTE_ASSIST_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./config.json"));

    let config = if config_path.exists() {
        Config::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Daemon mode logs to a daily-rolling file as well as stderr.
    let _guard = init_tracing(&config, command == "run");

    match command.as_str() {
        "diagnose" => {
            if !diagnose::run(&config).await {
                std::process::exit(1);
            }
            Ok(())
        }
        "once" => {
            let pipeline = build_pipeline(config)?;
            pipeline.run_cycle().await;
            Ok(())
        }
        "run" => {
            let interval_secs = config.poll_interval_secs;
            let pipeline = build_pipeline(config)?;

            eprintln!("note-assist v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Cycle every {interval_secs}s. Ctrl-C to stop.");

            let mut tick = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            // Cycles never overlap: a long cycle delays the next tick.
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                pipeline.run_cycle().await;
            }
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!("Usage: note-assist [once|run|diagnose]");
            std::process::exit(2);
        }
    }
}

fn build_pipeline(config: Config) -> anyhow::Result<Pipeline> {
    config.validate().context("invalid configuration")?;

    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: ANTHROPIC_API_KEY not set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    });

    let classifier: Arc<dyn Classifier> = Arc::new(
        LlmClassifier::new(
            &secrecy::SecretString::from(api_key),
            &config.classifier.model,
        )
        .context("creating classifier")?,
    );

    let source: Arc<dyn MessageSource> = Arc::new(ChatDbSource::new(
        &config.message_db,
        config.handles.clone(),
    ));

    let notifier: Arc<dyn Notifier> = if cfg!(target_os = "macos") {
        Arc::new(OsaScriptNotifier::new())
    } else {
        Arc::new(LogNotifier)
    };

    Pipeline::new(config, source, classifier, notifier).context("wiring pipeline")
}

/// Initialize tracing; returns the file appender guard for daemon mode.
fn init_tracing(
    config: &Config,
    with_file: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if with_file {
        let file_appender =
            tracing_appender::rolling::daily(config.state_dir.join("logs"), "note-assist.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(writer)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        None
    }
}
