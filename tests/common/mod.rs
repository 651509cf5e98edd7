//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::Duration;

/// Header used by every test log
pub const HEADER: &str = "date_time,value1,value2";

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// A data row as the ingest pipeline writes it, `i` seconds after the epoch
pub fn row(i: u64) -> String {
    let secs = i % 60;
    let mins = (i / 60) % 60;
    format!("01/01/70 00:{:02}:{:02},{}.50,{}.25", mins, secs, 20 + i % 10, 40 + i % 7)
}

/// Header plus `rows` data rows, newline terminated
pub fn csv_with_rows(rows: u64) -> String {
    let mut csv = format!("{}\n", HEADER);
    for i in 0..rows {
        csv.push_str(&row(i));
        csv.push('\n');
    }
    csv
}
