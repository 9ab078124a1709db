//! Headless quest generation runner.
//!
//! Loads a state snapshot, runs one generation cycle for a character, and
//! optionally one memory compression batch, then saves the snapshot.
//!
//! ```bash
//! cargo run -p questline -- --character Mira --state mira.json --compress
//! ```

mod args;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use questline_core::{
    Character, CharacterId, ClaudeProvider, CompressionJob, GenerationClient, GenerationOutcome,
    KeywordRelevance, LoreBook, MemoryManager, ProviderLorekeeper, QuestService, QuestlineConfig,
    StatBlock, Store, StoreSnapshot, StoredQuest, Summarizer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{parse_config_from_args, print_help};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let run = parse_config_from_args(&args);
    if run.help {
        print_help();
        return Ok(());
    }

    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let config = QuestlineConfig::from_env()?;
    let store = Arc::new(load_store(&run.state_path).await?);
    let character_id = ensure_character(&store, &run.character).await;

    let lore = match &run.lore_path {
        Some(path) => LoreBook::load_json(path).await?,
        None => LoreBook::default(),
    };

    let client = Arc::new(GenerationClient::new(
        Arc::new(ClaudeProvider::from_env()?),
        config.generation.clone(),
    ));
    let memory = Arc::new(MemoryManager::new(
        store.clone(),
        Summarizer::new(client.clone(), config.memory.summary_word_cap),
        Arc::new(KeywordRelevance::default()),
        config.memory.clone(),
    ));
    let service = QuestService::new(
        store.clone(),
        client.clone(),
        memory.clone(),
        Arc::new(lore),
        Arc::new(ProviderLorekeeper::new(client.clone())),
        &config,
    )?;

    let expired = service.expire_stale(Utc::now()).await?;
    if !expired.is_empty() {
        println!("{} stale quest(s) expired", expired.len());
    }

    // Save whatever was committed before reporting a generation failure.
    let generated = service.generate_for(character_id).await;
    match &generated {
        Ok(GenerationOutcome::Stored(stored)) => print_quest(stored),
        Ok(GenerationOutcome::NoContent { decision, .. }) => {
            println!("No new quest: {}", decision.reasoning);
        }
        Err(e) => eprintln!("Generation failed: {e}"),
    }

    if run.compress {
        let report = CompressionJob::new(memory.clone()).run(Utc::now()).await;
        println!(
            "Compression: {} character(s), {} episode(s), {} failure(s)",
            report.results.len(),
            report.episodes().count(),
            report.failed()
        );
    }

    StoreSnapshot::capture(&store)
        .await
        .save_json(&run.state_path)
        .await?;
    let stats = client.stats();
    info!(
        path = %run.state_path.display(),
        provider_calls = stats.provider_calls,
        cache_hits = stats.cache_hits,
        total_cost = stats.total_cost,
        "state saved"
    );

    generated?;
    Ok(())
}

async fn load_store(path: &Path) -> Result<Store, Box<dyn std::error::Error>> {
    if tokio::fs::try_exists(path).await? {
        let snapshot = StoreSnapshot::load_json(path).await?;
        info!(path = %path.display(), saved_at = %snapshot.saved_at, "state loaded");
        Ok(snapshot.into_store())
    } else {
        info!(path = %path.display(), "no state file, starting fresh");
        Ok(Store::new())
    }
}

async fn ensure_character(store: &Store, name: &str) -> CharacterId {
    if let Some(existing) = store.read(|s| s.character_by_name(name).cloned()).await {
        return existing.id;
    }
    let character = Character::new(name.trim(), StatBlock::new([10; 6]));
    let id = character.id;
    store.upsert_character(character).await;
    info!(character_id = %id, name, "character created");
    id
}

fn print_quest(stored: &StoredQuest) {
    let quest = &stored.bundle.quest;
    println!("=== {} ===", quest.title);
    println!(
        "{} / {} (score {:.2}, {} attempt(s){})",
        quest.content_type.name(),
        quest.difficulty.name(),
        quest.validation_score,
        stored.ai_attempts,
        if stored.used_fallback { ", fallback" } else { "" }
    );
    println!();
    println!("{}", quest.description);
    println!();
    for objective in &stored.bundle.objectives {
        println!(
            "  [{}] {} (+{} XP {})",
            objective.position + 1,
            objective.description,
            objective.reward_xp,
            objective.reward_stat.code()
        );
    }
    if !stored.issues.is_empty() {
        println!();
        println!("Notes:");
        for issue in &stored.issues {
            println!("  - {issue}");
        }
    }
}
