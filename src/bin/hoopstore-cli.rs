//! Command-line driver: loads a delimited games file into the heap+index,
//! reports Task 1 (heap) and Task 2 (index) statistics, then runs Task 3 —
//! a demonstration range delete at threshold 0.9 with an index-vs-brute-
//! force comparison.
//!
//! Usage: `hoopstore-cli <data_file> <database_file> [index_file]`
//!
//! Argv is matched directly (no parsing crate), the way the teacher's own
//! `motedb-cli` does.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use hoopstore::{Engine, EngineConfig, Result};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("usage: {} <data_file> <database_file> [index_file]", args.first().map(String::as_str).unwrap_or("hoopstore-cli"));
        std::process::exit(1);
    }
    let data_file = PathBuf::from(&args[1]);
    let database_file = PathBuf::from(&args[2]);
    let index_file = args.get(3).map(PathBuf::from).unwrap_or_else(|| database_file.with_extension("idx"));

    println!("Creating database from {}", data_file.display());
    let text = std::fs::read_to_string(&data_file)?;

    let config = EngineConfig::default();
    let mut engine = Engine::open(&database_file, &index_file, &config)?;

    let load_stats = engine.load(&text)?;
    println!();
    println!("=== Task 1 ===");
    println!("Size of Record: {} bytes", hoopstore::record::RECORD_SIZE);
    let (records, blocks) = engine.heap_stats();
    println!("Total No. of Records: {records}");
    println!("Total No. of Blocks: {blocks}");
    println!("Rows skipped (malformed): {}", load_stats.rows_skipped);
    println!("Time to load data (ms): {}", load_stats.elapsed_ms);

    println!();
    println!("=== Task 2 ===");
    println!("Building B+-tree on ft_pct...");
    let tree_stats = engine.tree_stats();
    println!("Tree order: {}", config.order);
    println!("Distinct keys: {}", tree_stats.distinct_keys);
    println!("Total nodes: {} ({} internal, {} leaf)", tree_stats.total_nodes, tree_stats.internal_nodes, tree_stats.leaf_nodes);
    println!("Tree height: {}", tree_stats.height);
    engine.save_index()?;
    println!("Index checkpoint written to {}", index_file.display());

    println!();
    println!("=== Task 3 ===");
    let threshold = 0.9f32;
    println!("Demonstration range delete: ft_pct > {threshold}");

    let (brute_matches, brute_blocks) = engine.brute_scan_gt(threshold)?;
    println!("Brute-force scan: {brute_matches} matching records, {brute_blocks} blocks scanned");

    let delete_stats = engine.delete_range_gt(threshold)?;
    println!("Index-assisted delete: {} records removed", delete_stats.records_touched);
    println!("Internal nodes touched: {}", delete_stats.internal_nodes_touched);
    println!("Leaf nodes touched: {}", delete_stats.leaf_nodes_touched);
    println!("Blocks rewritten: {}", delete_stats.blocks_touched);
    if delete_stats.records_touched > 0 {
        println!("Average ft_pct of deleted records: {:.4}", delete_stats.average_key_of_deleted);
    }
    println!("Time to delete (ms): {}", delete_stats.elapsed_ms);

    if delete_stats.records_touched != brute_matches {
        eprintln!(
            "warning: index-assisted delete count ({}) disagrees with brute-force count ({})",
            delete_stats.records_touched, brute_matches
        );
    }

    engine.save_index()?;
    Ok(())
}
