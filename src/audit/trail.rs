use super::rotation;
use super::{AuditConfig, AuditError, AuditLevel, AuditSink};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{error, info};

/// The file currently receiving events
struct ActiveFile {
    day: String,
    file: File,
    size: u64,
}

/// Day-partitioned, size-rotated audit log.
///
/// One line per event, logrus text style:
///
/// ```text
/// time="2024-01-01T10:00:00+09:00" level=info msg="save_connection id=..."
/// ```
///
/// The open handle, its size and its day live behind a single mutex, so
/// concurrent writers never interleave partial lines or race a rotation
/// or a day switch.
pub struct AuditTrail {
    config: AuditConfig,
    active: Mutex<Option<ActiveFile>>,
}

impl AuditTrail {
    /// Creates the directory and makes sure today's file exists.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        fs::create_dir_all(&config.directory).map_err(AuditError::io(&config.directory))?;

        let trail = Self {
            config,
            active: Mutex::new(None),
        };

        let now = trail.now();
        let today = day_of(&now);
        let path = trail.ensure_day_file(&today)?;
        // Day files left by an earlier run
        trail.archive_past_days(&today, &now);
        info!(
            path = %path.display(),
            max_size_bytes = trail.config.max_size_bytes,
            max_backups = trail.config.max_backups,
            max_age_days = trail.config.max_age_days,
            compress = trail.config.compress,
            "Audit trail ready"
        );

        Ok(trail)
    }

    /// Path of the file that receives today's events.
    pub fn current_file(&self) -> PathBuf {
        rotation::active_path(&self.config.directory, &day_of(&self.now()))
    }

    /// Creates an empty file for `day` unless it already exists.
    ///
    /// Safe against a concurrent creator: opening with `create` never fails
    /// because the file appeared in the meantime.
    fn ensure_day_file(&self, day: &str) -> Result<PathBuf, AuditError> {
        let path = rotation::active_path(&self.config.directory, day);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(AuditError::io(&path))?;
        Ok(path)
    }

    fn open_active(&self, day: &str) -> Result<ActiveFile, AuditError> {
        let path = rotation::active_path(&self.config.directory, day);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(AuditError::io(&path))?;
        let size = file.metadata().map_err(AuditError::io(&path))?.len();

        Ok(ActiveFile {
            day: day.to_string(),
            file,
            size,
        })
    }

    fn now(&self) -> DateTime<FixedOffset> {
        if self.config.utc {
            Utc::now().fixed_offset()
        } else {
            Local::now().fixed_offset()
        }
    }

    pub(crate) fn record_at(
        &self,
        at: DateTime<FixedOffset>,
        level: AuditLevel,
        message: &str,
    ) -> Result<(), AuditError> {
        let line = format_line(&at, level, message);
        let day = day_of(&at);

        let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        // Taken out so a failed write leaves nothing half-open; the next
        // event reopens the file.
        let mut active = match guard.take() {
            Some(active) if active.day == day => active,
            previous => {
                let switched = previous.is_some();
                drop(previous);
                let fresh = self.open_active(&day)?;
                if switched {
                    self.archive_past_days(&day, &at);
                }
                fresh
            }
        };

        let len = line.len() as u64;
        let max = self.config.max_size_bytes;
        if max > 0 && active.size > 0 && active.size + len > max {
            active = self.rotate(active, &at)?;
        }

        let path = rotation::active_path(&self.config.directory, &day);
        active
            .file
            .write_all(line.as_bytes())
            .map_err(AuditError::io(&path))?;
        active.size += len;

        *guard = Some(active);
        Ok(())
    }

    /// Moves the active file aside and opens a fresh one for the same day.
    ///
    /// Compression and pruning failures are logged but do not fail the
    /// write that triggered the rotation; the backup is still on disk.
    fn rotate(&self, active: ActiveFile, at: &DateTime<FixedOffset>) -> Result<ActiveFile, AuditError> {
        let ActiveFile { day, file, .. } = active;
        let current = rotation::active_path(&self.config.directory, &day);
        file.sync_all().map_err(AuditError::io(&current))?;
        drop(file);

        let rotated_at = at.naive_local();
        let backup = rotation::backup_path(&self.config.directory, &day, rotated_at);
        fs::rename(&current, &backup).map_err(AuditError::io(&current))?;
        info!(path = %backup.display(), "Rotated audit log");

        let fresh = self.open_active(&day)?;

        self.compress_backup(&backup);
        self.prune_backups(rotated_at);

        Ok(fresh)
    }

    /// Turns the files of days before `current_day` into backups, then
    /// enforces retention. Failures are logged only.
    fn archive_past_days(&self, current_day: &str, at: &DateTime<FixedOffset>) {
        let dir = &self.config.directory;
        let now = at.naive_local();

        let days = match rotation::past_day_files(dir, current_day) {
            Ok(days) => days,
            Err(e) => {
                error!(error = %e, "Failed to list past audit day files");
                return;
            }
        };

        for (day, path) in days {
            let rotated_at = rotation::end_of_day(&day).map_or(now, |end| end.min(now));
            let backup = rotation::backup_path(dir, &day, rotated_at);
            if let Err(e) = fs::rename(&path, &backup) {
                error!(error = %e, path = %path.display(), "Failed to archive past audit day file");
                continue;
            }
            info!(path = %backup.display(), "Archived audit log of a past day");
            self.compress_backup(&backup);
        }

        self.prune_backups(now);
    }

    fn compress_backup(&self, backup: &Path) {
        if !self.config.compress {
            return;
        }
        if let Err(e) = rotation::compress(backup) {
            error!(error = %e, path = %backup.display(), "Failed to compress rotated audit log");
        }
    }

    fn prune_backups(&self, now: NaiveDateTime) {
        if let Err(e) = rotation::prune(
            &self.config.directory,
            now,
            self.config.max_backups,
            self.config.max_age_days,
        ) {
            error!(error = %e, "Failed to prune audit log backups");
        }
    }
}

impl AuditSink for AuditTrail {
    fn record(&self, level: AuditLevel, message: &str) -> Result<(), AuditError> {
        self.record_at(self.now(), level, message)
    }
}

fn day_of(at: &DateTime<FixedOffset>) -> String {
    at.format("%Y%m%d").to_string()
}

fn format_line(at: &DateTime<FixedOffset>, level: AuditLevel, message: &str) -> String {
    format!(
        "time=\"{}\" level={} msg=\"{}\"\n",
        at.to_rfc3339_opts(SecondsFormat::Secs, false),
        level,
        escape(message)
    )
}

fn escape(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}
