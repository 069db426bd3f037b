// =============================================================================
// Signal Fusion — Command-line entry point
// =============================================================================
//
// Usage: signal-fusion <frame.json> <target> [external.json]
//
//   frame.json     {"assets": [...], "prices": [[...], ...]} (rows = periods)
//   target         asset to evaluate
//   external.json  optional {"<phase>": {"signal": s, "confidence": c}},
//                  s in [-1, 1] and c in [0, 1]
//
// The decision is printed to stdout as JSON; logs go to stderr.  The config
// file is read from FUSION_CONFIG (default `fusion_config.json`); a missing
// file falls back to the built-in defaults, an invalid one aborts.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use signal_fusion::{FusionConfig, FusionEngine, MarketFrame, PhaseSignal};

const DEFAULT_CONFIG_PATH: &str = "fusion_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── 2. Arguments ─────────────────────────────────────────────────────
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        bail!("usage: signal-fusion <frame.json> <target> [external.json]");
    }
    let frame_path = &args[0];
    let target = args[1].trim().to_string();

    // ── 3. Config ────────────────────────────────────────────────────────
    let config_path =
        std::env::var("FUSION_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = FusionConfig::load_or_default(&config_path)?;

    // ── 4. Inputs ────────────────────────────────────────────────────────
    let frame = MarketFrame::load(frame_path)?;
    info!(
        assets = frame.n_assets(),
        periods = frame.len(),
        target = %target,
        "Market frame loaded"
    );

    let external: BTreeMap<String, PhaseSignal> = match args.get(2) {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read external signals from {path}"))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse external signals from {path}"))?
        }
        None => BTreeMap::new(),
    };

    // ── 5. Evaluate ──────────────────────────────────────────────────────
    let concurrent = config.concurrent;
    let engine = Arc::new(FusionEngine::new(config)?);
    let decision = if concurrent {
        engine
            .evaluate_concurrent(Arc::new(frame), target, external)
            .await?
    } else {
        engine.evaluate(&frame, &target, &external)?
    };

    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}
