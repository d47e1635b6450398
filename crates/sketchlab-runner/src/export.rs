//! Flattens stored records into one CSV row per (instance, repetition).

use crate::store::ResultStore;
use anyhow::{Context, Result};
use serde::Serialize;
use sketchlab_core::FIELDS;
use std::io::Write;

pub const INSTANCE_COLUMNS: [&str; 6] = ["mode", "algorithm", "datatype", "m", "n", "repetition"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub records: usize,
    pub rows: usize,
}

pub fn export_csv<W: Write>(store: &ResultStore, out: W) -> Result<ExportSummary> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(INSTANCE_COLUMNS.iter().chain(FIELDS.iter()))?;

    let mut summary = ExportSummary::default();
    for record in store.read_all() {
        let record = record.context("reading stored records")?;
        summary.records += 1;
        let mode = record.mode.to_string();
        let algorithm = record.algorithm.to_string();
        let datatype = record.datatype.to_string();
        let m = record.m.to_string();
        let n = record.n.to_string();
        for (repetition, row) in record.measurements.iter().enumerate() {
            let mut line = vec![
                mode.clone(),
                algorithm.clone(),
                datatype.clone(),
                m.clone(),
                n.clone(),
                repetition.to_string(),
            ];
            line.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&line)?;
            summary.rows += 1;
        }
    }
    writer.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResultRecord;
    use chrono::Utc;
    use sketchlab_core::{Algorithm, Datatype, Instance, Mode, TrialRecord};

    #[test]
    fn one_row_per_repetition_with_shared_metadata() {
        let root = std::env::temp_dir().join(format!(
            "sketchlab_export_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let store = ResultStore::open(&root).expect("store");
        let instance = Instance {
            mode: Mode::Merge,
            algorithm: Algorithm::ApacheHll4,
            datatype: Datatype::RandomString,
            m: 32,
            n: 45,
        };
        let trials = [
            TrialRecord {
                time: 1.5,
                estimate: 44.0,
                bitsize: 160.0,
                compress_count: 0.0,
                rebase_count: 2.0,
            },
            TrialRecord {
                time: 1.25,
                estimate: 46.0,
                bitsize: 160.0,
                compress_count: 1.0,
                rebase_count: 3.0,
            },
        ];
        let record = ResultRecord::new(&instance, 1, vec![10, 11], &trials, "local", "host");
        store.write(&record).expect("write");

        let mut out = Vec::new();
        let summary = export_csv(&store, &mut out).expect("export");
        assert_eq!(summary, ExportSummary { records: 1, rows: 2 });

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "mode,algorithm,datatype,m,n,repetition,time,estimate,bitsize,compressCount,rebaseCount",
                "merge,apache-hll4,str,32,45,0,1.5,44,160,0,2",
                "merge,apache-hll4,str,32,45,1,1.25,46,160,1,3",
            ]
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn empty_store_exports_only_the_header() {
        let root = std::env::temp_dir().join(format!(
            "sketchlab_export_empty_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let store = ResultStore::open(&root).expect("store");
        let mut out = Vec::new();
        let summary = export_csv(&store, &mut out).expect("export");
        assert_eq!(summary.rows, 0);
        assert_eq!(String::from_utf8(out).expect("utf8").lines().count(), 1);
        let _ = std::fs::remove_dir_all(root);
    }
}
