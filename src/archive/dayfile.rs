//! Binary day-file codec and trace merging
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────┐
//! │ HEADER (16 bytes)            │
//! │   magic: [u8; 4] = "SARC"    │
//! │   version: u16               │
//! │   encoding: u8               │
//! │   reserved: u8               │
//! │   body_len: u32              │
//! │   body_crc: u32              │
//! ├──────────────────────────────┤
//! │ BODY (bincode, maybe LZ4)    │
//! └──────────────────────────────┘
//! ```
//!
//! The preferred encoding is LZ4-compressed bincode; when compression does
//! not pay for itself the body is stored as plain bincode instead, flagged
//! in the header.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use super::{ArchiveError, ArchiveResult};
use crate::model::Trace;

const MAGIC: [u8; 4] = *b"SARC";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Encoding {
    Plain = 0,
    Lz4 = 1,
}

impl TryFrom<u8> for Encoding {
    type Error = ArchiveError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encoding::Plain),
            1 => Ok(Encoding::Lz4),
            _ => Err(ArchiveError::Codec(format!("unknown encoding: {}", value))),
        }
    }
}

/// Write `traces` as one day file, replacing any existing file atomically.
pub fn write_day_file(path: &Path, traces: &[Trace]) -> ArchiveResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let raw = bincode::serialize(&traces.to_vec())
        .map_err(|e| ArchiveError::Codec(e.to_string()))?;
    let compressed = lz4_flex::compress_prepend_size(&raw);
    let (encoding, body) = if compressed.len() < raw.len() {
        (Encoding::Lz4, compressed)
    } else {
        (Encoding::Plain, raw)
    };

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = encoding as u8;
    header[8..12].copy_from_slice(&(body.len() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&crc32fast::hash(&body).to_le_bytes());

    // Write to a sibling temp file then rename so readers never see a
    // half-written day.
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&header)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read every trace from a day file, verifying magic, version, and CRC.
pub fn read_day_file(path: &Path) -> ArchiveResult<Vec<Trace>> {
    let data = fs::read(path)?;
    let corrupt = |detail: &str| ArchiveError::Corrupt {
        path: path.display().to_string(),
        detail: detail.to_string(),
    };

    if data.len() < HEADER_SIZE {
        return Err(corrupt("truncated header"));
    }
    if data[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > VERSION {
        return Err(corrupt(&format!("unsupported version {}", version)));
    }
    let encoding = Encoding::try_from(data[6])?;
    let body_len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let stored_crc = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);

    let body = &data[HEADER_SIZE..];
    if body.len() != body_len {
        return Err(corrupt("body length mismatch"));
    }
    if crc32fast::hash(body) != stored_crc {
        return Err(corrupt("checksum mismatch"));
    }

    let raw = match encoding {
        Encoding::Plain => body.to_vec(),
        Encoding::Lz4 => lz4_flex::decompress_size_prepended(body)
            .map_err(|e| ArchiveError::Codec(format!("lz4: {}", e)))?,
    };
    bincode::deserialize(&raw).map_err(|e| ArchiveError::Codec(e.to_string()))
}

/// Merge traces of the same stream into maximal contiguous runs.
///
/// Input order matters: where two traces overlap, samples from the later
/// trace in the slice win. Empty traces are dropped. Traces of different
/// streams or sample rates never merge, and samples off the shared grid
/// are snapped to it.
pub fn merge_traces(traces: &[Trace]) -> Vec<Trace> {
    // (stream, sample period) -> traces in input order
    let mut groups: BTreeMap<(String, i64), Vec<&Trace>> = BTreeMap::new();
    for trace in traces {
        if trace.is_empty() {
            continue;
        }
        let delta_us = trace.delta().num_microseconds().unwrap_or(1).max(1);
        groups
            .entry((trace.nslc.label(), delta_us))
            .or_default()
            .push(trace);
    }

    let mut merged = Vec::new();
    for ((_, delta_us), group) in groups {
        let base = group
            .iter()
            .map(|t| t.start)
            .min()
            .unwrap_or_else(chrono::Utc::now);

        // Grid index -> sample; later inserts overwrite earlier ones.
        let mut grid: BTreeMap<i64, f64> = BTreeMap::new();
        for trace in &group {
            let offset_us = (trace.start - base).num_microseconds().unwrap_or(0);
            let first = (offset_us + delta_us / 2) / delta_us;
            for (i, sample) in trace.samples.iter().enumerate() {
                grid.insert(first + i as i64, *sample);
            }
        }

        // Split the grid into contiguous runs.
        let nslc = group[0].nslc.clone();
        let sample_rate = group[0].sample_rate;
        let mut run_start: Option<i64> = None;
        let mut prev: i64 = 0;
        let mut samples: Vec<f64> = Vec::new();
        for (idx, sample) in grid {
            match run_start {
                Some(_) if idx == prev + 1 => samples.push(sample),
                Some(start) => {
                    merged.push(run_to_trace(&nslc, sample_rate, base, delta_us, start, &samples));
                    samples = vec![sample];
                    run_start = Some(idx);
                }
                None => {
                    samples.push(sample);
                    run_start = Some(idx);
                }
            }
            prev = idx;
        }
        if let Some(start) = run_start {
            merged.push(run_to_trace(&nslc, sample_rate, base, delta_us, start, &samples));
        }
    }

    merged.sort_by(|a, b| (a.nslc.label(), a.start).cmp(&(b.nslc.label(), b.start)));
    merged
}

fn run_to_trace(
    nslc: &crate::model::Nslc,
    sample_rate: f64,
    base: chrono::DateTime<chrono::Utc>,
    delta_us: i64,
    first_idx: i64,
    samples: &[f64],
) -> Trace {
    Trace::new(
        nslc.clone(),
        base + chrono::Duration::microseconds(first_idx * delta_us),
        sample_rate,
        samples.to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Nslc;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn bhz() -> Nslc {
        Nslc::new("IU", "ANMO", "00", "BHZ")
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn trace(offset_secs: i64, samples: Vec<f64>) -> Trace {
        Trace::new(bhz(), t0() + Duration::seconds(offset_secs), 1.0, samples)
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("IU.ANMO.00.BHZ.D.2020.001");
        let traces = vec![trace(0, (0..3600).map(|i| (i as f64).sin()).collect())];

        write_day_file(&path, &traces).unwrap();
        let back = read_day_file(&path).unwrap();
        assert_eq!(back, traces);
    }

    #[test]
    fn test_roundtrip_small_plain_body() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("day");
        let traces = vec![trace(0, vec![1.0])];
        write_day_file(&path, &traces).unwrap();
        assert_eq!(read_day_file(&path).unwrap(), traces);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("day");
        write_day_file(&path, &[trace(0, vec![1.0, 2.0, 3.0])]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_day_file(&path),
            Err(ArchiveError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("day");
        std::fs::write(&path, b"NOPE................").unwrap();
        assert!(matches!(
            read_day_file(&path),
            Err(ArchiveError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_merge_abutting_runs() {
        let merged = merge_traces(&[trace(0, vec![1.0, 2.0]), trace(2, vec![3.0, 4.0])]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(merged[0].start, t0());
    }

    #[test]
    fn test_merge_overlap_later_wins() {
        let merged = merge_traces(&[
            trace(0, vec![1.0, 1.0, 1.0, 1.0]),
            trace(2, vec![9.0, 9.0]),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].samples, vec![1.0, 1.0, 9.0, 9.0]);
    }

    #[test]
    fn test_merge_keeps_gaps_apart() {
        let merged = merge_traces(&[trace(0, vec![1.0, 2.0]), trace(10, vec![3.0])]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].start, t0() + Duration::seconds(10));
    }

    #[test]
    fn test_merge_drops_empty_and_separates_streams() {
        let other = Trace::new(
            Nslc::new("IU", "ANMO", "00", "BHN"),
            t0(),
            1.0,
            vec![5.0],
        );
        let merged = merge_traces(&[trace(0, vec![]), trace(0, vec![1.0]), other.clone()]);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|t| t.nslc == other.nslc));
    }
}
