//! Filesystem tests
//!
//! Exercises the in-memory file table: create/replace/delete, capacity
//! and size limits, and format. Runs as part of `selftest`.

use crate::config::{FS_DATA_LEN, FS_MAX_FILES, FS_NAME_LEN};
use crate::fs::{self, FsError};
use crate::println;

/// Run all filesystem tests.
pub fn run_all_tests() {
    println!("[fs tests] starting");

    let mut passed = 0;
    let mut failed = 0;

    macro_rules! run_test {
        ($test_fn:expr, $name:expr) => {
            println!("[test] {}", $name);
            if $test_fn() {
                passed += 1;
            } else {
                failed += 1;
                println!("  - FAILED: {}", $name);
            }
        };
    }

    run_test!(test_write_read_roundtrip, "fs_write_read_roundtrip");
    run_test!(test_overwrite_replaces, "fs_overwrite_replaces");
    run_test!(test_remove, "fs_remove");
    run_test!(test_capacity, "fs_capacity");
    run_test!(test_size_limits, "fs_size_limits");
    run_test!(test_format_empties, "fs_format_empties");

    println!("[fs tests] complete: {} passed, {} failed", passed, failed);
}

fn test_write_read_roundtrip() -> bool {
    if fs::write("note.txt", b"hello fs").is_err() {
        return false;
    }
    let ok = matches!(fs::read("note.txt"), Ok(data) if data.as_slice() == b"hello fs");
    let _ = fs::remove("note.txt");
    ok
}

fn test_overwrite_replaces() -> bool {
    if fs::write("twice", b"first").is_err() || fs::write("twice", b"second").is_err() {
        return false;
    }
    let ok = matches!(fs::read("twice"), Ok(data) if data.as_slice() == b"second");
    let _ = fs::remove("twice");
    ok
}

fn test_remove() -> bool {
    if fs::write("gone", b"x").is_err() {
        return false;
    }
    fs::remove("gone").is_ok()
        && fs::read("gone") == Err(FsError::NotFound)
        && fs::remove("gone") == Err(FsError::NotFound)
}

fn test_capacity() -> bool {
    fs::format();
    let names = [
        "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
        "f13", "f14", "f15",
    ];
    for name in names.iter().take(FS_MAX_FILES) {
        if fs::write(name, b"data").is_err() {
            fs::format();
            return false;
        }
    }
    let overflow = fs::write("onemore", b"data");
    fs::format();
    overflow == Err(FsError::NoSpace)
}

fn test_size_limits() -> bool {
    // One byte over each limit must be rejected with no partial state
    let long_name = "a-name-well-over-sixteen-bytes";
    debug_assert!(long_name.len() > FS_NAME_LEN);
    if fs::write(long_name, b"x") != Err(FsError::NameTooLong) {
        return false;
    }
    let big = [b'x'; FS_DATA_LEN + 1];
    fs::write("big", &big) == Err(FsError::TooLarge) && fs::read("big") == Err(FsError::NotFound)
}

fn test_format_empties() -> bool {
    if fs::write("keepsake", b"data").is_err() {
        return false;
    }
    fs::format();
    fs::read("keepsake") == Err(FsError::NotFound)
}
