//! Block-packed heap file: fixed-size records over a sequence of fixed-size
//! blocks, with compacting batch delete.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};
use crate::record::{Record, RECORD_SIZE};
use crate::storage::locator::Locator;

/// Persistent, block-packed storage of fixed-size [`Record`]s.
///
/// The file holds no in-file directory (per the on-disk format): the
/// records-per-block count and the tail block's fill level are recovered by
/// scanning on open, the way a reader distinguishes padding from data — an
/// all-zero record is "no record" only when it appears in the last block.
pub struct HeapFile {
    file: File,
    path: PathBuf,
    block_size: usize,
    records_per_block: usize,
    /// Number of full blocks on disk, not counting an in-memory tail buffer
    /// that hasn't been flushed yet. In this implementation the tail is
    /// flushed after every append, so this always equals the on-disk block
    /// count.
    block_count: u32,
    /// Records filled in the tail block (0 when the heap is empty).
    tail_count: usize,
    /// The tail block's bytes, mirrored in memory so append doesn't need to
    /// re-read it from disk.
    tail_buf: Vec<u8>,
}

impl HeapFile {
    /// Open an existing heap file or create a new one, recovering block/tail
    /// state by scanning the tail block.
    pub fn open(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records_per_block = block_size / RECORD_SIZE;
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;

        let len = file.metadata()?.len();
        if len % block_size as u64 != 0 {
            return Err(StorageError::CorruptHeap(format!(
                "file length {len} is not a multiple of block size {block_size}"
            )));
        }
        let block_count = (len / block_size as u64) as u32;

        let (tail_buf, tail_count) = if block_count == 0 {
            (vec![0u8; block_size], 0)
        } else {
            let mut buf = vec![0u8; block_size];
            file.seek(SeekFrom::Start((block_count as u64 - 1) * block_size as u64))?;
            file.read_exact(&mut buf)?;
            let count = Self::count_filled(&buf, records_per_block)?;
            (buf, count)
        };

        Ok(Self { file, path, block_size, records_per_block, block_count, tail_count, tail_buf })
    }

    /// Scan a block's slots front-to-back, stopping at the first all-zero
    /// record; everything from there to the end of the block is assumed
    /// padding.
    fn count_filled(block: &[u8], records_per_block: usize) -> Result<usize> {
        for i in 0..records_per_block {
            let start = i * RECORD_SIZE;
            let rec = Record::decode_slice(&block[start..start + RECORD_SIZE])?;
            if rec.is_zeroed() {
                return Ok(i);
            }
        }
        Ok(records_per_block)
    }

    fn tail_block_id(&self) -> u32 {
        self.block_count.saturating_sub(1)
    }

    fn records_in_block(&self, block_id: u32) -> usize {
        if self.block_count == 0 {
            0
        } else if block_id == self.tail_block_id() {
            self.tail_count
        } else {
            self.records_per_block
        }
    }

    /// Append a record, allocating a new tail block if the current one is
    /// full. Returns the [`Locator`] addressing the new record.
    pub fn append(&mut self, record: &Record) -> Result<Locator> {
        if self.block_count == 0 || self.tail_count == self.records_per_block {
            self.block_count += 1;
            self.tail_count = 0;
            self.tail_buf = vec![0u8; self.block_size];
        }

        let slot = self.tail_count;
        let offset = slot * RECORD_SIZE;
        self.tail_buf[offset..offset + RECORD_SIZE].copy_from_slice(&record.encode());
        self.tail_count += 1;

        let block_id = self.tail_block_id();
        self.file.seek(SeekFrom::Start(block_id as u64 * self.block_size as u64))?;
        self.file.write_all(&self.tail_buf)?;

        Ok(Locator::new(block_id, slot as u16))
    }

    /// Read the record at `locator`, failing with [`StorageError::OutOfRange`]
    /// if it addresses a non-existent position.
    pub fn read(&mut self, locator: Locator) -> Result<Record> {
        if locator.block_id >= self.block_count {
            return Err(StorageError::OutOfRange(format!(
                "block {} >= block count {}",
                locator.block_id, self.block_count
            )));
        }
        let filled = self.records_in_block(locator.block_id);
        if locator.slot as usize >= filled {
            return Err(StorageError::OutOfRange(format!(
                "slot {} >= {filled} records in block {}",
                locator.slot, locator.block_id
            )));
        }

        if locator.block_id == self.tail_block_id() {
            let start = locator.slot as usize * RECORD_SIZE;
            return Record::decode_slice(&self.tail_buf[start..start + RECORD_SIZE]);
        }

        let mut buf = [0u8; RECORD_SIZE];
        let offset = locator.block_id as u64 * self.block_size as u64 + locator.slot as u64 * RECORD_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Record::decode_slice(&buf)
    }

    /// Total `(records, blocks)` currently stored.
    pub fn count(&self) -> (usize, u32) {
        let records = if self.block_count == 0 {
            0
        } else {
            (self.block_count as usize - 1) * self.records_per_block + self.tail_count
        };
        (records, self.block_count)
    }

    pub fn records_per_block(&self) -> usize {
        self.records_per_block
    }

    /// Read every `(locator, record)` pair, in block/slot ascending order.
    pub fn scan(&mut self) -> Result<Vec<(Locator, Record)>> {
        let mut out = Vec::with_capacity(self.count().0);
        for block_id in 0..self.block_count {
            let filled = self.records_in_block(block_id);
            if block_id == self.tail_block_id() {
                for slot in 0..filled {
                    let start = slot * RECORD_SIZE;
                    let rec = Record::decode_slice(&self.tail_buf[start..start + RECORD_SIZE])?;
                    out.push((Locator::new(block_id, slot as u16), rec));
                }
                continue;
            }
            let mut buf = vec![0u8; self.block_size];
            self.file.seek(SeekFrom::Start(block_id as u64 * self.block_size as u64))?;
            self.file.read_exact(&mut buf)?;
            for slot in 0..filled {
                let start = slot * RECORD_SIZE;
                let rec = Record::decode_slice(&buf[start..start + RECORD_SIZE])?;
                out.push((Locator::new(block_id, slot as u16), rec));
            }
        }
        Ok(out)
    }

    /// Linear scan baseline: count records whose `ft_pct` exceeds `threshold`
    /// without consulting any index. Returns `(matches, blocks_scanned)`.
    pub fn brute_scan_gt(&mut self, threshold: f32) -> Result<(usize, u32)> {
        let mut matches = 0;
        for (_, rec) in self.scan()? {
            if rec.ft_pct > threshold {
                matches += 1;
            }
        }
        Ok((matches, self.block_count))
    }

    /// Compacting rewrite: drop every record whose locator is in `victims`,
    /// rewrite the file as packed blocks. Returns `(deleted, blocks_touched,
    /// sum_of_key_over_deleted)`.
    ///
    /// Writes to a sibling path and renames over the original so a crash
    /// mid-rewrite never leaves a half-written heap in place of a good one.
    pub fn delete_by_locators(&mut self, victims: &HashSet<Locator>) -> Result<(usize, u32, f64)> {
        let all = self.scan()?;
        let blocks_touched = self.block_count;

        let mut deleted = 0usize;
        let mut key_sum = 0.0f64;
        let mut survivors = Vec::with_capacity(all.len());
        for (loc, rec) in all {
            if victims.contains(&loc) {
                deleted += 1;
                key_sum += rec.ft_pct as f64;
            } else {
                survivors.push(rec);
            }
        }

        let sibling = sibling_path(&self.path);
        {
            let mut tmp = OpenOptions::new().write(true).create(true).truncate(true).open(&sibling)?;
            let mut block = vec![0u8; self.block_size];
            let mut filled_in_block = 0usize;
            for rec in &survivors {
                let start = filled_in_block * RECORD_SIZE;
                block[start..start + RECORD_SIZE].copy_from_slice(&rec.encode());
                filled_in_block += 1;
                if filled_in_block == self.records_per_block {
                    tmp.write_all(&block)?;
                    block = vec![0u8; self.block_size];
                    filled_in_block = 0;
                }
            }
            if filled_in_block > 0 {
                tmp.write_all(&block)?;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&sibling, &self.path)?;

        // Reopen against the replaced file and recompute in-memory state.
        let reopened = Self::open(&self.path, self.block_size)?;
        *self = reopened;

        Ok((deleted, blocks_touched, key_sum))
    }
}

fn sibling_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_owned()).unwrap_or_default();
    name.push(".compact");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(ft_pct: f32) -> Record {
        Record { fg_pct: 0.5, ft_pct, fg3_pct: 0.3, team_id: 1, game_date: 100, pts: 10, ast: 2, reb: 3, home_wins: 1 }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut heap = HeapFile::open(dir.path().join("h.db"), 4096).unwrap();
        let rec = sample(0.8);
        let loc = heap.append(&rec).unwrap();
        assert_eq!(heap.read(loc).unwrap(), rec);
    }

    #[test]
    fn read_out_of_range_fails() {
        let dir = TempDir::new().unwrap();
        let mut heap = HeapFile::open(dir.path().join("h.db"), 4096).unwrap();
        heap.append(&sample(0.5)).unwrap();
        assert!(heap.read(Locator::new(5, 0)).is_err());
        assert!(heap.read(Locator::new(0, 9)).is_err());
    }

    #[test]
    fn block_boundary_allocates_new_block() {
        let dir = TempDir::new().unwrap();
        let rpb = 4096 / RECORD_SIZE;
        let mut heap = HeapFile::open(dir.path().join("h.db"), 4096).unwrap();
        for i in 0..rpb + 1 {
            heap.append(&sample(i as f32 / 1000.0)).unwrap();
        }
        let (records, blocks) = heap.count();
        assert_eq!(records, rpb + 1);
        assert_eq!(blocks, 2);
    }

    #[test]
    fn reopen_recovers_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.db");
        {
            let mut heap = HeapFile::open(&path, 4096).unwrap();
            for i in 0..10 {
                heap.append(&sample(i as f32 / 10.0)).unwrap();
            }
        }
        let mut reopened = HeapFile::open(&path, 4096).unwrap();
        assert_eq!(reopened.count(), (10, 1));
        assert_eq!(reopened.read(Locator::new(0, 3)).unwrap().ft_pct, 0.3);
    }

    #[test]
    fn delete_by_locators_compacts_and_reports_stats() {
        let dir = TempDir::new().unwrap();
        let mut heap = HeapFile::open(dir.path().join("h.db"), 4096).unwrap();
        let mut locs = vec![];
        for i in 0..20 {
            locs.push(heap.append(&sample(i as f32 / 20.0)).unwrap());
        }
        let victims: HashSet<Locator> = locs[10..].iter().copied().collect();
        let (deleted, blocks_touched, key_sum) = heap.delete_by_locators(&victims).unwrap();
        assert_eq!(deleted, 10);
        assert_eq!(blocks_touched, 1);
        assert!(key_sum > 0.0);
        assert_eq!(heap.count().0, 10);
        // Old locators for deleted records can no longer be trusted; fresh
        // locators for survivors must still resolve.
        let (_, rec) = heap.scan().unwrap().into_iter().next().unwrap();
        assert_eq!(rec.ft_pct, 0.0);
    }

    #[test]
    fn brute_scan_gt_counts_without_index() {
        let dir = TempDir::new().unwrap();
        let mut heap = HeapFile::open(dir.path().join("h.db"), 4096).unwrap();
        for i in 0..10 {
            heap.append(&sample(i as f32 / 10.0)).unwrap();
        }
        let (matches, blocks_scanned) = heap.brute_scan_gt(0.5).unwrap();
        assert_eq!(matches, 4); // 0.6, 0.7, 0.8, 0.9
        assert_eq!(blocks_scanned, 1);
    }
}
