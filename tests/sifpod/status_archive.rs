use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tempfile::TempDir;

use sifpod::sifpod::instance::{self, status};
use sifpod::sifpod::test_support::scratch_layout;

fn nanos_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

#[test]
fn writers_refuse_without_an_instance_record() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let err = status::add_created_file(&layout, "ghost").unwrap_err();
    assert!(err.to_string().contains("ghost"), "{}", err);

    let err = status::add_exit_code_file(&layout, "ghost", 0).unwrap_err();
    assert!(err.to_string().contains("failed to fetch instance"), "{}", err);
}

#[test]
fn timestamps_land_in_the_test_window() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);
    instance::register(&layout, "c1", "", 1, json!({})).unwrap();

    let before = nanos_now();
    status::add_created_file(&layout, "c1").unwrap();
    status::add_started_file(&layout, "c1").unwrap();
    status::add_finished_file(&layout, "c1").unwrap();
    let after = nanos_now();

    let info = status::get_info(&layout, "c1").unwrap();
    assert!(info.created_at >= before && info.created_at <= after);
    assert!(info.started_at >= info.created_at);
    assert!(info.finished_at >= info.started_at);
    assert_eq!(info.exit_code, 0);
}

#[test]
fn files_are_newline_terminated_decimals() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);
    instance::register(&layout, "c1", "", 1, json!({})).unwrap();

    status::add_exit_code_file(&layout, "c1", 42).unwrap();
    let raw = fs::read_to_string(layout.info_dir("c1").join("exit")).unwrap();
    assert_eq!(raw, "42\n");

    status::add_created_file(&layout, "c1").unwrap();
    let raw = fs::read_to_string(layout.info_dir("c1").join("created")).unwrap();
    assert!(raw.ends_with('\n'));
    raw.trim().parse::<i64>().expect("decimal timestamp");
}

#[test]
fn missing_files_read_as_zero() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);
    instance::register(&layout, "c1", "", 1, json!({})).unwrap();
    status::add_created_file(&layout, "c1").unwrap();

    let info = status::get_info(&layout, "c1").unwrap();
    assert!(info.created_at > 0);
    assert_eq!(info.started_at, 0);
    assert_eq!(info.finished_at, 0);
    assert_eq!(info.exit_code, 0);
}

#[test]
fn exit_codes_cover_the_full_byte_range() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);
    instance::register(&layout, "c1", "", 1, json!({})).unwrap();

    status::add_exit_code_file(&layout, "c1", 255).unwrap();
    let info = status::get_info(&layout, "c1").unwrap();
    assert_eq!(info.exit_code, 255);
}
