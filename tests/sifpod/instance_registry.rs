use std::fs;

use nix::unistd::getpid;
use serde_json::json;
use tempfile::TempDir;

use sifpod::sifpod::engine::pod::PodEngine;
use sifpod::sifpod::instance::{self, status};
use sifpod::sifpod::test_support::scratch_layout;

use crate::support::pod_config;

#[test]
fn add_get_delete_round_trip() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let mut record = instance::add(&layout, "p1_default_uid-1_0", false).unwrap();
    record.pid = 4321;
    record.image = "/images/app.sif".to_string();
    instance::update(&record).unwrap();

    let read = instance::get(&layout, "p1_default_uid-1_0").unwrap();
    assert_eq!(read.pid, 4321);
    assert_eq!(read.image, "/images/app.sif");
    assert_eq!(read.ppid, getpid().as_raw());
    assert!(!read.user.is_empty());

    instance::delete(&read).unwrap();
    let err = instance::get(&layout, "p1_default_uid-1_0").unwrap_err();
    assert!(instance::is_not_found(&err), "expected NotFound, got {}", err);
}

#[test]
fn add_refuses_duplicate_ids() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    instance::add(&layout, "c1", false).unwrap();
    let err = instance::add(&layout, "c1", false).unwrap_err();
    assert!(err.to_string().contains("already exists"), "{}", err);
}

#[test]
fn get_on_missing_id_is_not_found() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let err = instance::get(&layout, "nope").unwrap_err();
    assert!(instance::is_not_found(&err));
}

#[test]
fn list_skips_the_info_directory() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    instance::register(&layout, "a", "", 1, json!({})).unwrap();
    instance::register(&layout, "b", "/images/b.sif", 2, json!({})).unwrap();

    let records = instance::list(&layout).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn register_links_the_status_archive_to_the_record() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let record = instance::register(&layout, "c1", "/images/c1.sif", 77, json!({"x": 1})).unwrap();
    assert_eq!(record.image, "/images/c1.sif");

    let link = layout.info_dir("c1").join("info");
    let target = fs::read_link(&link).expect("info symlink exists");
    assert_eq!(target, record.path);

    let read = instance::get(&layout, "c1").unwrap();
    assert_eq!(read.config, json!({"x": 1}));
}

#[test]
fn cleanup_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    instance::register(&layout, "c1", "", 1, json!({})).unwrap();
    status::add_created_file(&layout, "c1").unwrap();

    instance::cleanup(&layout, "c1").unwrap();
    assert!(!layout.instance_file("c1").exists());
    assert!(!layout.info_dir("c1").exists());

    // A second cleanup finds nothing and still succeeds.
    instance::cleanup(&layout, "c1").unwrap();
}

#[test]
fn pod_cleanup_from_a_foreign_process_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let layout = scratch_layout(&dir);

    let mut engine = PodEngine::new(pod_config("p1", ""));
    let mut record = instance::register(&layout, engine.id(), "", 11, json!({})).unwrap();
    status::add_created_file(&layout, engine.id()).unwrap();

    // Pretend some other process created the record.
    record.ppid = 1;
    instance::update(&record).unwrap();

    engine.cleanup_container(&layout).unwrap();
    assert!(
        layout.instance_file(engine.id()).exists(),
        "record must survive cleanup from a non-creator"
    );
    assert!(layout.info_dir(engine.id()).exists());

    // The rightful creator removes both.
    record.ppid = getpid().as_raw();
    instance::update(&record).unwrap();
    engine.cleanup_container(&layout).unwrap();
    assert!(!layout.instance_file(engine.id()).exists());
    assert!(!layout.info_dir(engine.id()).exists());
}
