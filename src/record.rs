//! The fixed-size game record and its packed on-disk layout.

use crate::error::{Result, StorageError};

/// Packed size of a [`Record`] on disk, in bytes. No padding.
///
/// `4 (fg_pct) + 4 (ft_pct) + 4 (fg3_pct) + 4 (team_id) + 2 (game_date) + 1
/// (pts) + 1 (ast) + 1 (reb) + 1 (home_wins) = 22`.
pub const RECORD_SIZE: usize = 22;

/// A single game row, packed field-for-field with no intra-record padding.
///
/// Field order is the on-disk order: `fg_pct, ft_pct, fg3_pct, team_id,
/// game_date, pts, ast, reb, home_wins`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub fg_pct: f32,
    pub ft_pct: f32,
    pub fg3_pct: f32,
    pub team_id: u32,
    /// Days since 2000-01-01, one-based (day 1 of the epoch year is `1`).
    pub game_date: u16,
    pub pts: u8,
    pub ast: u8,
    pub reb: u8,
    pub home_wins: u8,
}

impl Record {
    /// Encode into exactly [`RECORD_SIZE`] bytes.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.fg_pct.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ft_pct.to_le_bytes());
        buf[8..12].copy_from_slice(&self.fg3_pct.to_le_bytes());
        buf[12..16].copy_from_slice(&self.team_id.to_le_bytes());
        buf[16..18].copy_from_slice(&self.game_date.to_le_bytes());
        buf[18] = self.pts;
        buf[19] = self.ast;
        buf[20] = self.reb;
        buf[21] = self.home_wins;
        buf
    }

    /// Decode from exactly [`RECORD_SIZE`] bytes.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        Self {
            fg_pct: f32::from_le_bytes(buf[0..4].try_into().unwrap()),
            ft_pct: f32::from_le_bytes(buf[4..8].try_into().unwrap()),
            fg3_pct: f32::from_le_bytes(buf[8..12].try_into().unwrap()),
            team_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            game_date: u16::from_le_bytes(buf[16..18].try_into().unwrap()),
            pts: buf[18],
            ast: buf[19],
            reb: buf[20],
            home_wins: buf[21],
        }
    }

    /// Decode a slice, failing with [`StorageError::CorruptHeap`] if short.
    pub fn decode_slice(buf: &[u8]) -> Result<Self> {
        let arr: [u8; RECORD_SIZE] = buf
            .try_into()
            .map_err(|_| StorageError::CorruptHeap(format!("expected {RECORD_SIZE} bytes, got {}", buf.len())))?;
        Ok(Self::decode(&arr))
    }

    /// Whether this is an all-zero "no record" tail slot.
    pub fn is_zeroed(&self) -> bool {
        self.fg_pct == 0.0
            && self.ft_pct == 0.0
            && self.fg3_pct == 0.0
            && self.team_id == 0
            && self.game_date == 0
            && self.pts == 0
            && self.ast == 0
            && self.reb == 0
            && self.home_wins == 0
    }
}

/// Projects the indexed attribute (`ft_pct`) from a record.
pub fn key_of(record: &Record) -> f32 {
    record.ft_pct
}
