// src/coverage/mod.rs
//! Line-coverage gate for CI. Reads an LCOV tracefile, totals line coverage
//! across all source records, and fails the build when the percentage drops
//! below the configured floor.

use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("cannot read coverage report {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("coverage report contains no line data")]
    Empty,

    #[error("malformed coverage report at line {line_no}: '{line}'")]
    Malformed { line_no: usize, line: String },

    #[error("coverage {percent:.2}% is below the required {min_percent:.2}%")]
    BelowThreshold { percent: f64, min_percent: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoverageSummary {
    pub lines_found: u64,
    pub lines_hit: u64,
}

impl CoverageSummary {
    pub fn percent(&self) -> f64 {
        if self.lines_found == 0 {
            return 0.0;
        }
        self.lines_hit as f64 * 100.0 / self.lines_found as f64
    }
}

/// Parse an LCOV tracefile. `LF`/`LH` totals are preferred per record; when a
/// record carries only `DA` lines the totals are reconstructed from those.
/// Unknown directives (function and branch data) are skipped.
pub fn parse_lcov(content: &str) -> Result<CoverageSummary, CoverageError> {
    let mut summary = CoverageSummary::default();

    // Per-record state, flushed at end_of_record (or EOF for sloppy writers).
    let mut in_record = false;
    let mut lf: Option<u64> = None;
    let mut lh: Option<u64> = None;
    let mut da_found: u64 = 0;
    let mut da_hit: u64 = 0;

    let mut flush = |lf: &mut Option<u64>, lh: &mut Option<u64>, da_found: &mut u64, da_hit: &mut u64| {
        summary.lines_found += lf.take().unwrap_or(*da_found);
        summary.lines_hit += lh.take().unwrap_or(*da_hit);
        *da_found = 0;
        *da_hit = 0;
    };

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim_end_matches('\r').trim();
        let malformed = || CoverageError::Malformed {
            line_no: idx + 1,
            line: line.to_string(),
        };

        if let Some(rest) = line.strip_prefix("SF:") {
            if in_record {
                flush(&mut lf, &mut lh, &mut da_found, &mut da_hit);
            }
            in_record = true;
            if rest.is_empty() {
                return Err(malformed());
            }
        } else if let Some(rest) = line.strip_prefix("LF:") {
            lf = Some(rest.parse().map_err(|_| malformed())?);
        } else if let Some(rest) = line.strip_prefix("LH:") {
            lh = Some(rest.parse().map_err(|_| malformed())?);
        } else if let Some(rest) = line.strip_prefix("DA:") {
            let (line_no, count) = rest.split_once(',').ok_or_else(malformed)?;
            let _: u64 = line_no.parse().map_err(|_| malformed())?;
            // Some writers emit a trailing checksum: DA:<line>,<count>,<cksum>
            let count = count.split(',').next().unwrap_or(count);
            let count: u64 = count.parse().map_err(|_| malformed())?;
            da_found += 1;
            if count > 0 {
                da_hit += 1;
            }
        } else if line == "end_of_record" {
            flush(&mut lf, &mut lh, &mut da_found, &mut da_hit);
            in_record = false;
        }
        // TN:, FN:, FNDA:, BRDA: and friends are irrelevant to line totals.
    }

    if in_record {
        flush(&mut lf, &mut lh, &mut da_found, &mut da_hit);
    }

    Ok(summary)
}

#[derive(Debug, Clone, Copy)]
pub struct CoverageGate {
    min_percent: f64,
}

impl CoverageGate {
    pub fn new(min_percent: f64) -> Self {
        Self { min_percent }
    }

    /// Pass or fail a summary. Exactly at the floor passes; the gate bounds
    /// regressions, it does not demand improvement.
    pub fn evaluate(&self, summary: &CoverageSummary) -> Result<f64, CoverageError> {
        if summary.lines_found == 0 {
            return Err(CoverageError::Empty);
        }
        let percent = summary.percent();
        if percent < self.min_percent {
            return Err(CoverageError::BelowThreshold {
                percent,
                min_percent: self.min_percent,
            });
        }
        Ok(percent)
    }
}

/// CLI entry point: read, parse, gate.
pub async fn run_gate(report: &Path, min_percent: f64) -> Result<f64, CoverageError> {
    let content = tokio::fs::read_to_string(report)
        .await
        .map_err(|e| CoverageError::Read {
            path: report.display().to_string(),
            reason: e.to_string(),
        })?;
    let summary = parse_lcov(&content)?;
    let percent = CoverageGate::new(min_percent).evaluate(&summary)?;
    info!(
        "Coverage {:.2}% ({}/{} lines) meets the {:.2}% floor",
        percent, summary.lines_hit, summary.lines_found, min_percent
    );
    Ok(percent)
}
