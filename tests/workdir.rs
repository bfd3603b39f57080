use std::fs;

use layer_lapse::workdir::{WorkingDir, frame_file_name, sanitize_jobname};
use tempfile::TempDir;

#[test]
fn test_frame_file_name() {
    assert_eq!(frame_file_name("Camera1", 42), "Camera1_00000042.jpeg");
    assert_eq!(frame_file_name("Camera2", 123456789), "Camera2_123456789.jpeg");
}

#[test]
fn test_sanitize_jobname() {
    assert_eq!(sanitize_jobname("0:/gcodes/Benchy.gcode"), "Benchy");
    assert_eq!(sanitize_jobname("gcodes/my part (v2).gcode"), "my_part_v2");
    assert_eq!(sanitize_jobname("a: b.gcode"), "a_b");
    assert_eq!(sanitize_jobname(""), "");
}

#[test]
fn test_directory_is_created_lazily_and_named_once() {
    let base = TempDir::new().unwrap();
    let mut workdir = WorkingDir::new(base.path(), "192.168.1.20").unwrap();
    assert!(base.path().join("192-168-1-20").is_dir());
    assert!(workdir.path().is_none());

    // No directory yet, nothing to rename.
    workdir.apply_jobname("early.gcode").unwrap();
    assert!(!workdir.is_named());

    let created = workdir.ensure().unwrap().to_path_buf();
    assert!(created.is_dir());
    assert_eq!(
        created.file_name().unwrap().to_string_lossy(),
        format!("{}_0", std::process::id())
    );

    workdir.apply_jobname("").unwrap();
    assert!(!workdir.is_named());

    workdir.apply_jobname("0:/gcodes/cube.gcode").unwrap();
    assert!(workdir.is_named());
    let named = workdir.path().unwrap().to_path_buf();
    assert!(named.to_string_lossy().ends_with("_0_cube"));
    assert!(named.is_dir());
    assert!(!created.exists());
    assert_eq!(
        workdir.frame_path("Camera1", 1),
        Some(named.join("Camera1_00000001.jpeg"))
    );
}

#[test]
fn test_existing_directories_are_not_reused() {
    let base = TempDir::new().unwrap();
    let top = base.path().join("printer");
    fs::create_dir_all(top.join(format!("{}_0", std::process::id()))).unwrap();

    let mut workdir = WorkingDir::new(base.path(), "printer").unwrap();
    let dir = workdir.ensure().unwrap().to_path_buf();
    assert!(dir.ends_with(format!("{}_1", std::process::id())));
}

#[test]
fn test_delete_own_leaves_other_directories() {
    let base = TempDir::new().unwrap();
    let mut workdir = WorkingDir::new(base.path(), "printer").unwrap();
    let other = base.path().join("printer").join("99999999_0_other");
    fs::create_dir_all(&other).unwrap();

    let first = workdir.ensure().unwrap().to_path_buf();
    workdir.start_new();
    let second = workdir.ensure().unwrap().to_path_buf();
    assert_ne!(first, second);

    workdir.delete_own();

    assert!(!first.exists());
    assert!(!second.exists());
    assert!(other.is_dir());
    assert!(workdir.path().is_none());
}
