//! Parses the delimited text source into [`Record`]s.
//!
//! Grounded on `original_source/Project1/src/loader.cpp`'s
//! `loadCSVData`/`parseFloatOrZero`/`parseIntOrZero`: malformed numeric
//! fields default to zero rather than aborting the row, while a missing or
//! unparseable date skips the row outright. The delimiter itself is
//! auto-detected from the header line (spec.md §6 allows either tab- or
//! comma-delimited input; `original_source` only ever sees tab, so tab wins
//! ties).

use crate::record::Record;

/// Day count base, matching `original_source/include/constants.h`'s
/// `EPOCH_YEAR`.
const EPOCH_YEAR: i32 = 2000;

/// Outcome of parsing a whole text source: the records that parsed cleanly,
/// plus a count of rows skipped for being short or carrying a malformed
/// date. Numeric fields that fail to parse do NOT count here — they are
/// silently defaulted to zero, per `original_source`.
#[derive(Debug, Default, Clone)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    pub rows_skipped: usize,
}

/// Parse a whole delimited-text source: first line is a header (skipped,
/// but used to detect the delimiter), every subsequent line is one row.
pub fn parse_source(text: &str) -> ParseOutcome {
    let mut lines = text.lines();
    let header = match lines.next() {
        Some(h) => h,
        None => return ParseOutcome::default(),
    };
    let delimiter = detect_delimiter(header);

    let mut outcome = ParseOutcome::default();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        match parse_row(line, delimiter) {
            Some(record) => outcome.records.push(record),
            None => outcome.rows_skipped += 1,
        }
    }
    outcome
}

/// Count of `\t` vs `,` in the header line; tab wins a tie.
fn detect_delimiter(header: &str) -> char {
    let tabs = header.matches('\t').count();
    let commas = header.matches(',').count();
    if commas > tabs { ',' } else { '\t' }
}

/// Field order in the source row: `date, team_id, pts, fg_pct, ft_pct,
/// fg3_pct, ast, reb, home_wins` — distinct from [`Record`]'s on-disk field
/// order (spec.md §6).
fn parse_row(line: &str, delimiter: char) -> Option<Record> {
    let fields: Vec<&str> = line.split(delimiter).collect();
    if fields.len() < 9 {
        return None;
    }

    let game_date = days_since_epoch(fields[0])?;
    let team_id = parse_u32_or_zero(fields[1]);
    let pts = parse_u8_or_zero(fields[2]);
    let fg_pct = parse_float_or_zero(fields[3]);
    let ft_pct = parse_float_or_zero(fields[4]);
    let fg3_pct = parse_float_or_zero(fields[5]);
    let ast = parse_u8_or_zero(fields[6]);
    let reb = parse_u8_or_zero(fields[7]);
    let home_wins = if fields[8].trim() == "1" { 1 } else { 0 };

    Some(Record { fg_pct, ft_pct, fg3_pct, team_id, game_date, pts, ast, reb, home_wins })
}

/// Mirrors `parseFloatOrZero`: an empty or unparseable field is zero, never
/// a row-killing error.
fn parse_float_or_zero(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}

/// Mirrors `parseIntOrZero<uint32_t>`: an empty or unparseable field is
/// zero.
fn parse_u32_or_zero(s: &str) -> u32 {
    s.trim().parse::<u32>().unwrap_or(0)
}

/// Mirrors `parseIntOrZero<uint8_t>`: an empty or unparseable field is
/// zero; a value that parses but overflows `u8` saturates rather than
/// wrapping, since the source's `static_cast` truncation isn't a behavior
/// worth reproducing.
fn parse_u8_or_zero(s: &str) -> u8 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0;
    }
    trimmed.parse::<u32>().map(|v| v.min(u8::MAX as u32) as u8).unwrap_or(0)
}

/// `DD/MM/YYYY` to days-since-epoch, matching
/// `original_source/src/utils.cpp`'s `dateToInt_2Byte`: day 1 of January of
/// [`EPOCH_YEAR`] encodes as `1`, not `0`. Returns `None` (row skipped) for
/// an empty field, a field missing a `/`-separated component, or a
/// component that isn't an integer.
fn days_since_epoch(s: &str) -> Option<u16> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut parts = s.splitn(3, '/');
    let day: i32 = parts.next()?.parse().ok()?;
    let month: i32 = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return None;
    }

    let mut total_days = 0i64;
    for y in EPOCH_YEAR..year {
        total_days += if is_leap_year(y) { 366 } else { 365 };
    }
    let mut days_in_month = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if is_leap_year(year) {
        days_in_month[1] = 29;
    }
    for m in days_in_month.iter().take((month - 1) as usize) {
        total_days += *m as i64;
    }
    total_days += day as i64;

    u16::try_from(total_days).ok()
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_day_of_epoch_year_encodes_as_one() {
        assert_eq!(days_since_epoch("01/01/2000"), Some(1));
    }

    #[test]
    fn one_year_later_adds_366_for_the_2000_leap_year() {
        assert_eq!(days_since_epoch("01/01/2001"), Some(367));
    }

    #[test]
    fn malformed_date_is_rejected() {
        assert!(days_since_epoch("").is_none());
        assert!(days_since_epoch("not-a-date").is_none());
        assert!(days_since_epoch("31/13/2000").is_none());
    }

    #[test]
    fn detects_tab_delimiter_by_default() {
        assert_eq!(detect_delimiter("a\tb\tc"), '\t');
        assert_eq!(detect_delimiter("a,b,c,d"), ',');
        assert_eq!(detect_delimiter("a\tb,c"), '\t'); // tie goes to tab
    }

    #[test]
    fn parses_a_well_formed_row() {
        let row = "01/01/2000\t1610612737\t112\t0.471\t0.823\t0.355\t24\t44\t1";
        let rec = parse_row(row, '\t').unwrap();
        assert_eq!(rec.game_date, 1);
        assert_eq!(rec.team_id, 1610612737);
        assert_eq!(rec.pts, 112);
        assert_eq!(rec.ft_pct, 0.823);
        assert_eq!(rec.ast, 24);
        assert_eq!(rec.reb, 44);
        assert_eq!(rec.home_wins, 1);
    }

    #[test]
    fn empty_numeric_fields_default_to_zero_without_skipping_the_row() {
        let row = "01/01/2000\t\t\t\t0.5\t\t\t\t0";
        let rec = parse_row(row, '\t').unwrap();
        assert_eq!(rec.team_id, 0);
        assert_eq!(rec.pts, 0);
        assert_eq!(rec.fg_pct, 0.0);
        assert_eq!(rec.ft_pct, 0.5);
    }

    #[test]
    fn row_with_too_few_fields_is_skipped() {
        assert!(parse_row("01/01/2000\t1\t2", '\t').is_none());
    }

    #[test]
    fn row_with_malformed_date_is_skipped() {
        assert!(parse_row("not-a-date\t1\t2\t0.1\t0.2\t0.3\t4\t5\t1", '\t').is_none());
    }

    #[test]
    fn parse_source_skips_header_and_counts_bad_rows() {
        let text = "date\tteam\tpts\tfg\tft\tfg3\tast\treb\twin\n\
                    01/01/2000\t1\t100\t0.4\t0.7\t0.3\t20\t40\t1\n\
                    garbage\trow\n\
                    02/01/2000\t2\t110\t0.5\t0.8\t0.4\t22\t42\t0\n";
        let outcome = parse_source(text);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.rows_skipped, 1);
    }
}
