// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic catalog usage example.
//!
//! Demonstrates:
//! 1. Starting a coordinator on a throwaway SQLite file
//! 2. Adding compounds, a blend and a frequency
//! 3. A rejected delete that would orphan the blend
//! 4. Reading history back and revoking a revision
//! 5. Displaying cache stats and metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::time::Duration;

use dose_catalog::{
    BlendName, BlendValue, CatalogConfig, CatalogCoordinator, CatalogEntries, CompoundInfo,
    CompoundName, DeleteRequest, DeleteTarget, FrequencyName, FrequencyValue,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let config = CatalogConfig {
        sql_url: Some(format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("catalog.db").display()
        )),
        ..Default::default()
    };

    println!("═══════════════════════════════════════════════════════════");
    println!("  Dose catalog - basic usage");
    println!("═══════════════════════════════════════════════════════════\n");

    let mut coordinator = CatalogCoordinator::new(config);
    coordinator.start().await?;
    println!("✓ Coordinator {} (head: {:?})\n", coordinator.state(), coordinator.head_revision());

    // Two esters and a blend of both
    let mut entries = CatalogEntries::default();
    entries.compounds.insert(
        CompoundName::parse_wire("testosterone=enanthate")?,
        CompoundInfo::new(HOUR * 108, 0.7, "")?,
    );
    entries.compounds.insert(
        CompoundName::parse_wire("testosterone=cypionate")?,
        CompoundInfo::new(HOUR * 192, 0.69, "")?,
    );
    let outcome = coordinator.put_bulk(entries).await?;
    println!("→ compounds: revision {:?} ({})", outcome.revision, outcome.summary);

    let mix = BlendValue::from_pairs([
        ("testosterone=enanthate", 1.0),
        ("testosterone=cypionate", 1.0),
    ])?;
    let outcome = coordinator.put_blend(BlendName::new("mix")?, mix).await?;
    println!("→ blend:     revision {:?} ({})", outcome.revision, outcome.summary);

    let outcome = coordinator
        .put_frequency(FrequencyName::new("weekly")?, FrequencyValue::every(HOUR * 168)?)
        .await?;
    println!("→ frequency: revision {:?} ({})\n", outcome.revision, outcome.summary);

    // The blend still needs its compounds
    let request = DeleteRequest {
        compounds: DeleteTarget::subset([CompoundName::parse_wire("testosterone=enanthate")?]),
        ..Default::default()
    };
    match coordinator.delete_bulk(request).await {
        Ok(_) => println!("✗ delete unexpectedly succeeded"),
        Err(e) => println!("✓ delete rejected: {e}\n"),
    }

    for revision in coordinator.revisions(0, None).await? {
        println!(
            "  r{} parent={:?} {}",
            revision.revision,
            revision.parent,
            revision.diff.summarize()
        );
    }

    coordinator.revoke(3).await?;
    println!(
        "\n✓ Revoked r3: head {:?}, frequencies {:?}",
        coordinator.head_revision(),
        coordinator.frequency_names().await?
    );
    println!(
        "  blends at r2: {:?}\n",
        coordinator.snapshot_at(2).await?.blends.keys().collect::<Vec<_>>()
    );

    println!("Cache stats:");
    for (name, stats) in coordinator.cache_stats() {
        println!(
            "  {name:16} hits={} misses={} loads={} hit_rate={:.2}",
            stats.hits, stats.misses, stats.loads, stats.hit_rate
        );
    }

    println!("\nMetrics:");
    for (key, _, _, value) in snapshotter.snapshot().into_vec() {
        let value = match value {
            DebugValue::Counter(v) => v.to_string(),
            DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
            DebugValue::Histogram(v) => format!("{} samples", v.len()),
        };
        println!("  {} = {}", key.key().name(), value);
    }

    Ok(())
}
