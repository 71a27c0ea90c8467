//! Boot-loop detection and recovery flagging.
//!
//! Runs before anything else at startup: counts boots inside a short window
//! and, once the count crosses the threshold, raises a persistent recovery
//! flag so the next start drops into recovery mode instead of crashing
//! again. All persistence errors here are swallowed; the guard must never
//! be the thing that prevents a boot.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const BOOT_LOOP_THRESHOLD: u32 = 3;
pub const BOOT_LOOP_WINDOW_SECS: u64 = 60;
const MAX_CRASH_LOG_BYTES: u64 = 10 * 1024;

const BOOT_RECORD_FILE: &str = "boot_count.json";
const RECOVERY_FLAG_FILE: &str = "failsafe.flag";
const CRASH_LOG_FILE: &str = "failsafe.log";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BootRecord {
    count: u32,
    first_boot: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryFlag {
    pub reason: String,
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootDecision {
    /// Proceed with a normal boot; `boot_number` is the count within the
    /// current window.
    Normal { boot_number: u32 },
    /// Too many boots in the window; the recovery flag has been raised and
    /// the counter cleared.
    Recovery,
}

pub struct BootGuard {
    record_path: PathBuf,
    flag_path: PathBuf,
    log_path: PathBuf,
}

impl BootGuard {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            record_path: dir.join(BOOT_RECORD_FILE),
            flag_path: dir.join(RECOVERY_FLAG_FILE),
            log_path: dir.join(CRASH_LOG_FILE),
        }
    }

    /// Count this boot against the window and decide whether to boot
    /// normally. Crossing the threshold raises the recovery flag and resets
    /// the counter so a post-recovery boot starts fresh.
    pub fn check_and_record_boot(&self, now_secs: u64) -> BootDecision {
        let mut record = self.load_record(now_secs);

        let since_first = now_secs.saturating_sub(record.first_boot);
        if since_first > BOOT_LOOP_WINDOW_SECS {
            record = BootRecord {
                count: 1,
                first_boot: now_secs,
            };
        } else {
            record.count = record.count.saturating_add(1);
        }

        self.save_record(&record);

        if record.count >= BOOT_LOOP_THRESHOLD {
            warn!(
                "boot loop detected: {} boots in {since_first}s",
                record.count
            );
            self.set_recovery_flag("boot_loop", now_secs);
            self.clear_boot_record();
            return BootDecision::Recovery;
        }

        info!("boot #{} in window", record.count);
        BootDecision::Normal {
            boot_number: record.count,
        }
    }

    pub fn recovery_flag(&self) -> Option<RecoveryFlag> {
        let bytes = fs::read(&self.flag_path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(flag) => Some(flag),
            // An unreadable flag still means something went wrong.
            Err(_) => Some(RecoveryFlag {
                reason: "unknown".to_owned(),
                timestamp: 0,
            }),
        }
    }

    pub fn set_recovery_flag(&self, reason: &str, now_secs: u64) {
        let flag = RecoveryFlag {
            reason: reason.to_owned(),
            timestamp: now_secs,
        };
        match serde_json::to_vec(&flag) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&self.flag_path, bytes) {
                    warn!("failed to write recovery flag: {err}");
                }
            }
            Err(err) => warn!("failed to encode recovery flag: {err}"),
        }
    }

    pub fn clear_boot_record(&self) {
        if self.record_path.exists() {
            let _ = fs::remove_file(&self.record_path);
        }
    }

    /// Clear both the boot counter and the recovery flag, returning the
    /// device to a clean slate.
    pub fn clear(&self) {
        self.clear_boot_record();
        if self.flag_path.exists() {
            let _ = fs::remove_file(&self.flag_path);
        }
    }

    /// Append a line to the crash log, trimming the oldest content once the
    /// file outgrows its cap.
    pub fn log_crash(&self, message: &str, now_secs: u64) {
        let stamp = Utc
            .timestamp_opt(now_secs as i64, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| now_secs.to_string());
        let line = format!("[{stamp}] {message}\n");

        if let Ok(meta) = fs::metadata(&self.log_path) {
            if meta.len() + line.len() as u64 > MAX_CRASH_LOG_BYTES {
                self.trim_log();
            }
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            warn!("failed to append crash log: {err}");
        }
    }

    pub fn crash_log(&self) -> String {
        fs::read_to_string(&self.log_path).unwrap_or_default()
    }

    fn trim_log(&self) {
        let Ok(content) = fs::read_to_string(&self.log_path) else {
            return;
        };
        // Keep the newest half, aligned to a line boundary.
        let keep_from = content.len() / 2;
        let aligned = content[keep_from..]
            .find('\n')
            .map(|i| keep_from + i + 1)
            .unwrap_or(keep_from);
        let _ = fs::write(&self.log_path, &content[aligned..]);
    }

    fn load_record(&self, now_secs: u64) -> BootRecord {
        let fallback = BootRecord {
            count: 0,
            first_boot: now_secs,
        };
        let Ok(bytes) = fs::read(&self.record_path) else {
            return fallback;
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!("boot record malformed, starting fresh: {err}");
                fallback
            }
        }
    }

    fn save_record(&self, record: &BootRecord) {
        match serde_json::to_vec(record) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&self.record_path, bytes) {
                    warn!("failed to write boot record: {err}");
                }
            }
            Err(err) => warn!("failed to encode boot record: {err}"),
        }
    }
}
