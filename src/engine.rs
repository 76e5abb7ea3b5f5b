//! Composes [`HeapFile`] and [`BPlusTree`] into the four operations spec.md
//! §4.4 names: bulk load, point search, range search, range delete.
//!
//! Holds a `parking_lot::Mutex<()>` at the boundary (§5: "implementations
//! MAY take an exclusive lock at the engine boundary") the way the teacher
//! takes locks throughout its own index layer — advisory bookkeeping, since
//! nothing here is actually reentrant or multi-threaded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::index::{btree, serializer, BPlusTree};
use crate::parser;
use crate::record::{key_of, Record};
use crate::storage::{HeapFile, Locator};

/// Stats for [`Engine::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadStats {
    pub records_loaded: usize,
    pub rows_skipped: usize,
    pub blocks_touched: u32,
    pub elapsed_ms: u128,
}

/// Stats for [`Engine::find`] and [`Engine::range_gt`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryStats {
    pub records_touched: usize,
    pub internal_nodes_touched: usize,
    pub leaf_nodes_touched: usize,
    pub elapsed_ms: u128,
}

/// Stats for [`Engine::delete_range_gt`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DeleteStats {
    pub records_touched: usize,
    pub blocks_touched: u32,
    pub internal_nodes_touched: usize,
    pub leaf_nodes_touched: usize,
    pub average_key_of_deleted: f64,
    pub elapsed_ms: u128,
}

/// The engine instance: owns the heap file and index for their lifetime
/// (§5), exclusively — no other process may write to either while this
/// instance holds them.
pub struct Engine {
    heap: HeapFile,
    tree: BPlusTree,
    index_path: PathBuf,
    guard: Mutex<()>,
}

impl Engine {
    /// Open (or create) the heap at `heap_path`. If `index_path` already
    /// holds a checkpoint, load it; otherwise start with an empty tree of
    /// `config.order`.
    pub fn open(heap_path: impl AsRef<Path>, index_path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let heap = HeapFile::open(heap_path, config.block_size)?;
        let index_path = index_path.as_ref().to_path_buf();
        let tree = if index_path.exists() {
            serializer::load(&index_path)?
        } else {
            BPlusTree::new(config.order)
        };
        Ok(Self { heap, tree, index_path, guard: Mutex::new(()) })
    }

    /// Persist the current index to its checkpoint file (§5: "the on-disk
    /// image is a periodic checkpoint", written on demand rather than after
    /// every mutation).
    pub fn save_index(&self) -> Result<()> {
        let _lock = self.guard.lock();
        serializer::save(&self.tree, &self.index_path)
    }

    pub fn heap_stats(&self) -> (usize, u32) {
        self.heap.count()
    }

    pub fn tree_stats(&self) -> btree::TreeStats {
        self.tree.stats()
    }

    /// Parse `text`, append every record to the heap, and bulk-load the
    /// resulting `(ft_pct, locator)` pairs into the index. Malformed rows
    /// are skipped and counted, never fatal (§7 `ParseError` policy).
    pub fn load(&mut self, text: &str) -> Result<LoadStats> {
        let _lock = self.guard.lock();
        let start = Instant::now();

        let outcome = parser::parse_source(text);
        let mut pairs = Vec::with_capacity(outcome.records.len());
        for record in &outcome.records {
            let locator = self.heap.append(record)?;
            pairs.push((key_of(record), locator));
        }
        let records_loaded = pairs.len();
        self.tree.bulk_load(pairs)?;

        let (_, blocks_touched) = self.heap.count();
        Ok(LoadStats {
            records_loaded,
            rows_skipped: outcome.rows_skipped,
            blocks_touched,
            elapsed_ms: start.elapsed().as_millis(),
        })
    }

    /// Equality lookup: every record whose `ft_pct` equals `key`.
    pub fn find(&mut self, key: f32) -> Result<(Vec<Record>, QueryStats)> {
        let _lock = self.guard.lock();
        let start = Instant::now();

        let (locators, range_stats) = self.tree.search_with_stats(key)?;
        let mut records = Vec::with_capacity(locators.len());
        for locator in locators {
            records.push(self.heap.read(locator)?);
        }
        let stats = QueryStats {
            records_touched: records.len(),
            internal_nodes_touched: range_stats.internal_nodes_touched,
            leaf_nodes_touched: range_stats.leaf_nodes_touched,
            elapsed_ms: start.elapsed().as_millis(),
        };
        Ok((records, stats))
    }

    /// Half-open range lookup: every record with `ft_pct > threshold`, in
    /// ascending key order (ties in insertion order).
    pub fn range_gt(&mut self, threshold: f32) -> Result<(Vec<Record>, QueryStats)> {
        let _lock = self.guard.lock();
        let start = Instant::now();

        let (locators, range_stats) = self.tree.range_gt(threshold)?;
        let mut records = Vec::with_capacity(locators.len());
        for locator in locators {
            records.push(self.heap.read(locator)?);
        }
        let stats = QueryStats {
            records_touched: records.len(),
            internal_nodes_touched: range_stats.internal_nodes_touched,
            leaf_nodes_touched: range_stats.leaf_nodes_touched,
            elapsed_ms: start.elapsed().as_millis(),
        };
        Ok((records, stats))
    }

    /// The four-step protocol of §4.3 "Range delete integrated with
    /// HeapFile": locate victims in the index and remove them from it in
    /// one leaf-chain pass, compact the heap, then rebuild the index from a
    /// fresh heap scan so it never references a locator the heap has
    /// compacted away (canonical strategy: snapshot-and-rebuild, §4.2).
    pub fn delete_range_gt(&mut self, threshold: f32) -> Result<DeleteStats> {
        let _lock = self.guard.lock();
        let start = Instant::now();

        // `BPlusTree::delete_range_gt` collects the victim locators and
        // removes the range from the index in a single leaf-chain walk, so
        // this call's stats are the only descent/walk this delete pays for.
        let (victims, range_stats) = self.tree.delete_range_gt(threshold)?;
        let victim_set: HashSet<Locator> = victims.into_iter().collect();

        let (deleted, blocks_touched, key_sum) = self.heap.delete_by_locators(&victim_set)?;

        // Step (4): the compaction just invalidated every remaining
        // locator, not only the deleted ones (any record after the first
        // gap moved). Rebuild the index by re-scanning the compacted heap.
        let order = self.tree.order();
        let mut rebuilt = BPlusTree::new(order);
        let pairs: Vec<(f32, Locator)> =
            self.heap.scan()?.into_iter().map(|(loc, rec)| (key_of(&rec), loc)).collect();
        rebuilt.bulk_load(pairs)?;
        self.tree = rebuilt;

        let average_key_of_deleted = if deleted > 0 { key_sum / deleted as f64 } else { 0.0 };
        Ok(DeleteStats {
            records_touched: deleted,
            blocks_touched,
            internal_nodes_touched: range_stats.internal_nodes_touched,
            leaf_nodes_touched: range_stats.leaf_nodes_touched,
            average_key_of_deleted,
            elapsed_ms: start.elapsed().as_millis(),
        })
    }

    /// Linear scan baseline used for the CLI's demonstration comparison.
    pub fn brute_scan_gt(&mut self, threshold: f32) -> Result<(usize, u32)> {
        let _lock = self.guard.lock();
        self.heap.brute_scan_gt(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_text() -> String {
        // S1 from spec.md §8: five rows, ft_pct [0.80, 0.50, 0.90, 0.65, 0.75]
        let rows = [
            ("01/01/2000", 1, 100, 0.40, 0.80, 0.30, 20, 40, 1),
            ("02/01/2000", 2, 90, 0.35, 0.50, 0.25, 18, 38, 0),
            ("03/01/2000", 3, 120, 0.45, 0.90, 0.35, 22, 42, 1),
            ("04/01/2000", 4, 95, 0.38, 0.65, 0.28, 19, 39, 0),
            ("05/01/2000", 5, 105, 0.42, 0.75, 0.32, 21, 41, 1),
        ];
        let mut text = String::from("date\tteam_id\tpts\tfg_pct\tft_pct\tfg3_pct\tast\treb\thome_wins\n");
        for (date, team, pts, fg, ft, fg3, ast, reb, hw) in rows {
            text.push_str(&format!("{date}\t{team}\t{pts}\t{fg}\t{ft}\t{fg3}\t{ast}\t{reb}\t{hw}\n"));
        }
        text
    }

    fn open_engine(dir: &TempDir) -> Engine {
        let config = EngineConfig { order: 4, ..EngineConfig::default() };
        Engine::open(dir.path().join("heap.db"), dir.path().join("index.db"), &config).unwrap()
    }

    #[test]
    fn s1_load_find_and_range_gt() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        let stats = engine.load(&sample_text()).unwrap();
        assert_eq!(stats.records_loaded, 5);
        assert_eq!(stats.rows_skipped, 0);

        let (found, _) = engine.find(0.80).unwrap();
        assert_eq!(found.len(), 1);

        let (none, _) = engine.find(0.99).unwrap();
        assert!(none.is_empty());

        let (range, _) = engine.range_gt(0.70).unwrap();
        let keys: Vec<f32> = range.iter().map(|r| r.ft_pct).collect();
        assert_eq!(keys, vec![0.75, 0.80, 0.90]);
    }

    #[test]
    fn delete_range_gt_then_search_is_consistent() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        engine.load(&sample_text()).unwrap();

        let stats = engine.delete_range_gt(0.70).unwrap();
        assert_eq!(stats.records_touched, 3); // 0.75, 0.80, 0.90

        let (none, _) = engine.range_gt(0.70).unwrap();
        assert!(none.is_empty());

        let (kept, _) = engine.find(0.50).unwrap();
        assert_eq!(kept.len(), 1);
        let (kept2, _) = engine.find(0.65).unwrap();
        assert_eq!(kept2.len(), 1);

        let (records, blocks) = engine.heap_stats();
        assert_eq!(records, 2);
        assert_eq!(blocks, 1);
    }

    #[test]
    fn save_and_reopen_index_round_trips() {
        let dir = TempDir::new().unwrap();
        let heap_path = dir.path().join("heap.db");
        let index_path = dir.path().join("index.db");
        let config = EngineConfig { order: 4, ..EngineConfig::default() };

        {
            let mut engine = Engine::open(&heap_path, &index_path, &config).unwrap();
            engine.load(&sample_text()).unwrap();
            engine.save_index().unwrap();
        }

        let mut reopened = Engine::open(&heap_path, &index_path, &config).unwrap();
        let (found, _) = reopened.find(0.80).unwrap();
        assert_eq!(found.len(), 1);
        let (range, _) = reopened.range_gt(0.70).unwrap();
        assert_eq!(range.len(), 3);
    }

    #[test]
    fn malformed_rows_are_skipped_and_counted() {
        let dir = TempDir::new().unwrap();
        let mut engine = open_engine(&dir);
        let text = "date\tteam\tpts\tfg\tft\tfg3\tast\treb\twin\n\
                    garbage\n\
                    01/01/2000\t1\t100\t0.4\t0.7\t0.3\t20\t40\t1\n";
        let stats = engine.load(text).unwrap();
        assert_eq!(stats.records_loaded, 1);
        assert_eq!(stats.rows_skipped, 1);
    }
}
