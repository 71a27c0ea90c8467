use hearth_device::failsafe::{BootDecision, BootGuard, BOOT_LOOP_WINDOW_SECS};
use tempfile::TempDir;

#[test]
fn three_rapid_boots_trigger_recovery_and_reset_the_counter() {
    let dir = TempDir::new().unwrap();
    let guard = BootGuard::new(dir.path());

    assert_eq!(
        guard.check_and_record_boot(1_000),
        BootDecision::Normal { boot_number: 1 }
    );
    assert_eq!(
        guard.check_and_record_boot(1_010),
        BootDecision::Normal { boot_number: 2 }
    );
    assert_eq!(guard.check_and_record_boot(1_020), BootDecision::Recovery);

    let flag = guard.recovery_flag().unwrap();
    assert_eq!(flag.reason, "boot_loop");
    assert_eq!(flag.timestamp, 1_020);

    // The counter was cleared, so after recovery the count starts over.
    assert_eq!(
        guard.check_and_record_boot(1_030),
        BootDecision::Normal { boot_number: 1 }
    );
}

#[test]
fn boot_outside_the_window_resets_the_counter() {
    let dir = TempDir::new().unwrap();
    let guard = BootGuard::new(dir.path());

    guard.check_and_record_boot(1_000);
    guard.check_and_record_boot(1_030);
    // Past the window: the streak starts over instead of tripping.
    assert_eq!(
        guard.check_and_record_boot(1_000 + BOOT_LOOP_WINDOW_SECS + 1),
        BootDecision::Normal { boot_number: 1 }
    );
}

#[test]
fn corrupt_boot_record_starts_fresh() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("boot_count.json"), b"{ nope").unwrap();

    let guard = BootGuard::new(dir.path());
    assert_eq!(
        guard.check_and_record_boot(1_000),
        BootDecision::Normal { boot_number: 1 }
    );
}

#[test]
fn clear_removes_flag_and_counter() {
    let dir = TempDir::new().unwrap();
    let guard = BootGuard::new(dir.path());

    guard.check_and_record_boot(1_000);
    guard.set_recovery_flag("test", 1_000);
    assert!(guard.recovery_flag().is_some());

    guard.clear();
    assert!(guard.recovery_flag().is_none());
    assert_eq!(
        guard.check_and_record_boot(1_010),
        BootDecision::Normal { boot_number: 1 }
    );
}

#[test]
fn crash_log_appends_and_stays_bounded() {
    let dir = TempDir::new().unwrap();
    let guard = BootGuard::new(dir.path());

    guard.log_crash("init failed: sensor timeout", 1_700_000_000);
    let log = guard.crash_log();
    assert!(log.contains("init failed: sensor timeout"));
    assert!(log.starts_with('['));

    // Flood past the cap; the newest entry must survive and the file must
    // not grow without bound.
    for i in 0..400 {
        guard.log_crash(&format!("crash number {i} with some padding text"), 1_700_000_000 + i);
    }
    let log = guard.crash_log();
    assert!(log.len() <= 11 * 1024);
    assert!(log.contains("crash number 399"));
    assert!(!log.contains("crash number 0 "));
}
