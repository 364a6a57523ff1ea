//! File naming, compression and retention for rotated audit logs.
//!
//! Active file:  `auditlogs-{YYYYMMDD}.log`
//! Backup:       `auditlogs-{YYYYMMDD}-{YYYYMMDDTHHMMSS.fff}[-n].log[.gz]`
//!
//! The backup timestamp is the rotation time; retention by age uses it.
//! A day file left behind by a day switch becomes a backup stamped with the
//! last moment of its day.

use super::AuditError;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const PREFIX: &str = "auditlogs-";
const ROTATED_AT_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";
// Length of a formatted ROTATED_AT_FORMAT value
const ROTATED_AT_LEN: usize = 19;

pub(crate) fn active_path(dir: &Path, day: &str) -> PathBuf {
    dir.join(format!("{}{}.log", PREFIX, day))
}

/// Picks an unused backup path for the active file of `day`.
pub(crate) fn backup_path(dir: &Path, day: &str, rotated_at: NaiveDateTime) -> PathBuf {
    let stamp = rotated_at.format(ROTATED_AT_FORMAT);
    let mut n = 0;
    loop {
        let stem = if n == 0 {
            format!("{}{}-{}", PREFIX, day, stamp)
        } else {
            format!("{}{}-{}-{}", PREFIX, day, stamp, n)
        };
        let plain = dir.join(format!("{}.log", stem));
        let gz = dir.join(format!("{}.log.gz", stem));
        if !plain.exists() && !gz.exists() {
            return plain;
        }
        n += 1;
    }
}

/// Extracts the day from an active file name.
fn parse_active_name(name: &str) -> Option<&str> {
    let day = name.strip_prefix(PREFIX)?.strip_suffix(".log")?;
    (day.len() == 8 && day.bytes().all(|b| b.is_ascii_digit())).then_some(day)
}

/// Active files of days before `current_day`, oldest first.
pub(crate) fn past_day_files(dir: &Path, current_day: &str) -> Result<Vec<(String, PathBuf)>, AuditError> {
    let entries = fs::read_dir(dir).map_err(AuditError::io(dir))?;

    let mut days = Vec::new();
    for entry in entries {
        let entry = entry.map_err(AuditError::io(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let day = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_active_name)
            .map(str::to_string);
        // Fixed-width digits, so string order is date order
        if let Some(day) = day.filter(|d| d.as_str() < current_day) {
            days.push((day, path));
        }
    }

    days.sort();
    Ok(days)
}

/// Last millisecond of `day` (`YYYYMMDD`).
pub(crate) fn end_of_day(day: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(day, "%Y%m%d")
        .ok()?
        .and_hms_milli_opt(23, 59, 59, 999)
}

/// A rotated file found on disk
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Backup {
    pub path: PathBuf,
    pub rotated_at: NaiveDateTime,
}

/// Extracts the rotation time from a backup file name.
///
/// Returns `None` for active files and anything not written by the trail.
pub(crate) fn parse_backup_name(name: &str) -> Option<NaiveDateTime> {
    let rest = name.strip_prefix(PREFIX)?;
    let rest = rest
        .strip_suffix(".log.gz")
        .or_else(|| rest.strip_suffix(".log"))?;

    // {day}-{rotated_at}[-n]
    let (day, rest) = rest.split_once('-')?;
    if day.len() != 8 || !day.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stamp = rest.get(..ROTATED_AT_LEN)?;
    let suffix = &rest[ROTATED_AT_LEN..];
    if !suffix.is_empty() {
        let n = suffix.strip_prefix('-')?;
        if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    NaiveDateTime::parse_from_str(stamp, ROTATED_AT_FORMAT).ok()
}

/// Gzips `path` into `path.gz` and removes the original.
///
/// Writes to a temporary file first and renames, so a crash never leaves a
/// truncated `.gz` behind.
pub(crate) fn compress(path: &Path) -> Result<PathBuf, AuditError> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);
    let tmp_path = gz_path.with_extension("gz.tmp");

    {
        let mut source = File::open(path).map_err(AuditError::io(path))?;
        let tmp_file = File::create(&tmp_path).map_err(AuditError::io(&tmp_path))?;

        let mut encoder = GzEncoder::new(tmp_file, Compression::default());
        io::copy(&mut source, &mut encoder).map_err(AuditError::io(&tmp_path))?;

        let file = encoder.finish().map_err(AuditError::io(&tmp_path))?;
        file.sync_all().map_err(AuditError::io(&tmp_path))?;
    }

    fs::rename(&tmp_path, &gz_path).map_err(AuditError::io(&gz_path))?;
    fs::remove_file(path).map_err(AuditError::io(path))?;

    Ok(gz_path)
}

/// Lists rotated backups in `dir`, in no particular order.
pub(crate) fn list_backups(dir: &Path) -> Result<Vec<Backup>, AuditError> {
    let entries = fs::read_dir(dir).map_err(AuditError::io(dir))?;

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(AuditError::io(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let rotated_at = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_backup_name);
        if let Some(rotated_at) = rotated_at {
            backups.push(Backup { path, rotated_at });
        }
    }

    Ok(backups)
}

/// Enforces both retention bounds and returns the removed paths.
///
/// Backups older than `max_age_days` go first, then the oldest of the
/// remainder beyond `max_backups`. A zero bound is not enforced.
pub(crate) fn prune(
    dir: &Path,
    now: NaiveDateTime,
    max_backups: usize,
    max_age_days: u64,
) -> Result<Vec<PathBuf>, AuditError> {
    let mut backups = list_backups(dir)?;

    // Newest first
    backups.sort_by(|a, b| {
        b.rotated_at
            .cmp(&a.rotated_at)
            .then_with(|| b.path.cmp(&a.path))
    });

    let mut expired = Vec::new();
    // An age too large to represent means nothing can be that old
    let cutoff = (max_age_days > 0)
        .then(|| i64::try_from(max_age_days).ok())
        .flatten()
        .and_then(Duration::try_days)
        .and_then(|age| now.checked_sub_signed(age));
    if let Some(cutoff) = cutoff {
        let (keep, old): (Vec<Backup>, Vec<Backup>) =
            backups.into_iter().partition(|b| b.rotated_at >= cutoff);
        backups = keep;
        expired = old;
    }

    if max_backups > 0 && backups.len() > max_backups {
        expired.extend(backups.split_off(max_backups));
    }

    let mut removed = Vec::with_capacity(expired.len());
    for backup in expired {
        match fs::remove_file(&backup.path) {
            Ok(()) => {
                info!(path = %backup.path.display(), "Deleted old audit log backup");
                removed.push(backup.path);
            }
            // Another process may have pruned it already
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(error = %e, path = %backup.path.display(), "Failed to delete old audit log backup");
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_milli_opt(hour, 30, 15, 250)
            .unwrap()
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_active_path_format() {
        let path = active_path(Path::new("/var/log/audit"), "20240101");
        assert_eq!(path, PathBuf::from("/var/log/audit/auditlogs-20240101.log"));
    }

    #[test]
    fn test_parse_backup_names() {
        assert_eq!(
            parse_backup_name("auditlogs-20240101-20240101T103015.250.log.gz"),
            Some(at(1, 10))
        );
        assert_eq!(
            parse_backup_name("auditlogs-20240101-20240101T103015.250.log"),
            Some(at(1, 10))
        );
        assert_eq!(
            parse_backup_name("auditlogs-20240101-20240101T103015.250-2.log.gz"),
            Some(at(1, 10))
        );

        assert_eq!(parse_backup_name("auditlogs-20240101.log"), None);
        assert_eq!(parse_backup_name("auditlogs-20240101-garbage.log.gz"), None);
        assert_eq!(parse_backup_name("auditlogs-20240101-20240101T103015.250-x.log"), None);
        assert_eq!(parse_backup_name("other-20240101-20240101T103015.250.log"), None);
        assert_eq!(parse_backup_name("auditlogs-20240101-20240101T103015.250.log.gz.tmp"), None);
    }

    #[test]
    fn test_past_day_files_skips_current_and_backups() {
        let dir = TempDir::new().unwrap();
        let jan2 = touch(dir.path(), "auditlogs-20240102.log");
        let jan1 = touch(dir.path(), "auditlogs-20240101.log");
        touch(dir.path(), "auditlogs-20240103.log");
        touch(dir.path(), "auditlogs-20240101-20240101T103015.250.log.gz");
        touch(dir.path(), "auditlogs-2024010.log");

        let days = past_day_files(dir.path(), "20240103").unwrap();
        assert_eq!(
            days,
            vec![("20240101".to_string(), jan1), ("20240102".to_string(), jan2)]
        );
    }

    #[test]
    fn test_end_of_day() {
        assert_eq!(
            end_of_day("20240101"),
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_milli_opt(23, 59, 59, 999)
        );
        assert_eq!(end_of_day("20241301"), None);
    }

    #[test]
    fn test_backup_path_avoids_collisions() {
        let dir = TempDir::new().unwrap();
        let first = backup_path(dir.path(), "20240101", at(1, 10));
        assert_eq!(
            first.file_name().unwrap().to_str().unwrap(),
            "auditlogs-20240101-20240101T103015.250.log"
        );

        // A compressed backup with the same stamp also counts as taken
        fs::write(dir.path().join("auditlogs-20240101-20240101T103015.250.log.gz"), b"x").unwrap();
        let second = backup_path(dir.path(), "20240101", at(1, 10));
        assert_eq!(
            second.file_name().unwrap().to_str().unwrap(),
            "auditlogs-20240101-20240101T103015.250-1.log"
        );
        assert_eq!(parse_backup_name(second.file_name().unwrap().to_str().unwrap()), Some(at(1, 10)));
    }

    #[test]
    fn test_compress_replaces_original() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auditlogs-20240101-20240101T103015.250.log");
        fs::write(&path, "time=\"t\" level=info msg=\"save id=X\"\n").unwrap();

        let gz_path = compress(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(
            gz_path.file_name().unwrap().to_str().unwrap(),
            "auditlogs-20240101-20240101T103015.250.log.gz"
        );

        let mut decoded = String::new();
        GzDecoder::new(File::open(&gz_path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "time=\"t\" level=info msg=\"save id=X\"\n");
    }

    #[test]
    fn test_prune_by_count_keeps_newest() {
        let dir = TempDir::new().unwrap();
        for hour in 1..=5 {
            touch(dir.path(), &format!("auditlogs-20240101-20240101T{:02}3015.250.log.gz", hour));
        }
        let active = touch(dir.path(), "auditlogs-20240101.log");

        let removed = prune(dir.path(), at(1, 6), 2, 0).unwrap();
        assert_eq!(removed.len(), 3);

        let mut left: Vec<String> = list_backups(dir.path())
            .unwrap()
            .into_iter()
            .map(|b| b.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "auditlogs-20240101-20240101T043015.250.log.gz",
                "auditlogs-20240101-20240101T053015.250.log.gz",
            ]
        );
        assert!(active.exists());
    }

    #[test]
    fn test_prune_by_age_regardless_of_count() {
        let dir = TempDir::new().unwrap();
        let old = touch(dir.path(), "auditlogs-20240101-20240101T103015.250.log.gz");
        let recent = touch(dir.path(), "auditlogs-20240109-20240109T103015.250.log.gz");

        // Count bound alone would keep both
        let removed = prune(dir.path(), at(10, 10), 10, 7).unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_prune_unbounded() {
        let dir = TempDir::new().unwrap();
        for hour in 1..=3 {
            touch(dir.path(), &format!("auditlogs-20240101-20240101T{:02}3015.250.log.gz", hour));
        }
        assert!(prune(dir.path(), at(30, 0), 0, 0).unwrap().is_empty());
        assert_eq!(list_backups(dir.path()).unwrap().len(), 3);
    }
}
