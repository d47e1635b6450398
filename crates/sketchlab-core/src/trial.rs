use crate::error::FormatError;
use serde::{Deserialize, Serialize};

/// Column order of every persisted measurement row.
pub const FIELDS: [&str; 5] = ["time", "estimate", "bitsize", "compressCount", "rebaseCount"];

/// Measurements of one repetition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    pub time: f64,
    pub estimate: f64,
    pub bitsize: f64,
    pub compress_count: f64,
    pub rebase_count: f64,
}

impl TrialRecord {
    pub fn to_row(&self) -> [f64; 5] {
        [
            self.time,
            self.estimate,
            self.bitsize,
            self.compress_count,
            self.rebase_count,
        ]
    }

    pub fn from_row(row: [f64; 5]) -> Self {
        Self {
            time: row[0],
            estimate: row[1],
            bitsize: row[2],
            compress_count: row[3],
            rebase_count: row[4],
        }
    }
}

/// Parses `key value` pairs from trial stdout.
///
/// Pairs may share one line or sit one per line; the measurement binaries
/// print one per line. Keys outside [`FIELDS`] are ignored.
pub fn parse_trial_output(stdout: &str) -> Result<TrialRecord, FormatError> {
    let mut tokens = stdout.split_whitespace();
    let mut row: [Option<f64>; 5] = [None; 5];
    let mut saw_any = false;
    while let Some(key) = tokens.next() {
        saw_any = true;
        let value = tokens
            .next()
            .ok_or_else(|| FormatError::DanglingKey(key.to_string()))?;
        let parsed = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| FormatError::NotNumeric {
                key: key.to_string(),
                value: value.to_string(),
            })?;
        if let Some(idx) = FIELDS.iter().position(|f| *f == key) {
            if row[idx].is_some() {
                return Err(FormatError::DuplicateField(key.to_string()));
            }
            row[idx] = Some(parsed);
        }
    }
    if !saw_any {
        return Err(FormatError::Empty);
    }
    let mut out = [0.0; 5];
    for (idx, value) in row.iter().enumerate() {
        out[idx] = value.ok_or(FormatError::MissingField(FIELDS[idx]))?;
    }
    Ok(TrialRecord::from_row(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_output() {
        let record =
            parse_trial_output("time 1.5 estimate 1000.0 bitsize 64 compressCount 2 rebaseCount 1")
                .expect("valid output");
        assert_eq!(
            record,
            TrialRecord {
                time: 1.5,
                estimate: 1000.0,
                bitsize: 64.0,
                compress_count: 2.0,
                rebase_count: 1.0,
            }
        );
    }

    #[test]
    fn parses_one_pair_per_line() {
        let stdout = "time 0.000123\nestimate 998.412\nbitsize 4096\ncompressCount -1\nrebaseCount -1\n";
        let record = parse_trial_output(stdout).expect("valid output");
        assert_eq!(record.bitsize, 4096.0);
        assert_eq!(record.compress_count, -1.0);
    }

    #[test]
    fn rejects_empty_output() {
        assert_eq!(parse_trial_output(""), Err(FormatError::Empty));
        assert_eq!(parse_trial_output("  \n\n"), Err(FormatError::Empty));
    }

    #[test]
    fn rejects_missing_field() {
        let err = parse_trial_output("time 1 estimate 2 bitsize 3 compressCount 4")
            .expect_err("rebaseCount missing");
        assert_eq!(err, FormatError::MissingField("rebaseCount"));
    }

    #[test]
    fn rejects_non_numeric_and_dangling_values() {
        assert!(matches!(
            parse_trial_output("time fast estimate 1 bitsize 1 compressCount 0 rebaseCount 0"),
            Err(FormatError::NotNumeric { .. })
        ));
        assert!(matches!(
            parse_trial_output("time nan estimate 1 bitsize 1 compressCount 0 rebaseCount 0"),
            Err(FormatError::NotNumeric { .. })
        ));
        assert_eq!(
            parse_trial_output("time 1 estimate"),
            Err(FormatError::DanglingKey("estimate".to_string()))
        );
    }

    #[test]
    fn rejects_duplicates_and_ignores_unknown_keys() {
        assert_eq!(
            parse_trial_output("time 1 time 2"),
            Err(FormatError::DuplicateField("time".to_string()))
        );
        let record = parse_trial_output(
            "time 1 estimate 2 bitsize 3 compressCount 4 rebaseCount 5 peakRss 77",
        )
        .expect("extra key ignored");
        assert_eq!(record.to_row(), [1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
