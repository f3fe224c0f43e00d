#![deny(warnings)]

//! Headless CLI: applies an overlay pack onto a catalog snapshot.

use anyhow::{Context, Result};
use catalog_core::Catalog;
use std::fs;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

fn parse_args() -> (Option<String>, Option<String>, Option<String>) {
    let mut catalog: Option<String> = None;
    let mut pack: Option<String> = None;
    let mut out: Option<String> = None;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--catalog" => catalog = it.next(),
            "--pack" => pack = it.next(),
            "--out" => out = it.next(),
            _ => {}
        }
    }
    (catalog, pack, out)
}

fn run(catalog_path: &str, pack_dir: &str, out: Option<&str>) -> Result<()> {
    let text = fs::read_to_string(catalog_path)
        .with_context(|| format!("reading catalog snapshot {catalog_path}"))?;
    let mut catalog: Catalog = serde_json::from_str(&text)
        .with_context(|| format!("parsing catalog snapshot {catalog_path}"))?;
    let loaded = overlay_loader::load_pack(pack_dir)
        .with_context(|| format!("loading overlay pack {pack_dir}"))?;
    info!(pack = %loaded.meta.name, version = %loaded.meta.version, "applying overlay pack");

    let summary = overlay_engine::apply_pack(&mut catalog, &loaded.pack);
    println!(
        "Overlay OK | entities: +{} ~{} !{} | ref lists: {} | conflict lists: {} | traders: {} | fixups: {}/{}",
        summary.entities_added,
        summary.entities_skipped,
        summary.entities_failed,
        summary.reference_lists_patched,
        summary.conflict_lists_patched,
        summary.traders_merged,
        summary.mastering_groups_patched,
        summary.quest_conditions_patched
    );

    if let Some(out) = out {
        fs::write(out, serde_json::to_string_pretty(&catalog)?)
            .with_context(|| format!("writing snapshot {out}"))?;
        info!(path = %out, "mutated snapshot written");
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let (catalog, pack, out) = parse_args();
    info!(sha = env!("GIT_SHA"), ?catalog, ?pack, "starting overlay CLI");
    let (catalog, pack) = match (catalog, pack) {
        (Some(catalog), Some(pack)) => (catalog, pack),
        _ => {
            eprintln!("usage: cli --catalog <snapshot.json> --pack <dir> [--out <snapshot.json>]");
            return Ok(());
        }
    };

    // A failed pass is logged; host startup continues without the content.
    if let Err(err) = run(&catalog, &pack, out.as_deref()) {
        error!("overlay pass aborted: {err:#}");
    }
    Ok(())
}
