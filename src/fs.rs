//! In-memory filesystem
//!
//! A flat table of fixed-size name/data slots with linear scan lookup.
//! Nothing persists; `format` runs at boot and empties the table.

use core::fmt;

use heapless::{String, Vec};
use spinning_top::Spinlock;

use crate::config::{FS_DATA_LEN, FS_MAX_FILES, FS_NAME_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// No file with the given name.
    NotFound,
    /// Every file slot is occupied.
    NoSpace,
    /// Name exceeds [`FS_NAME_LEN`] bytes.
    NameTooLong,
    /// Data exceeds [`FS_DATA_LEN`] bytes.
    TooLarge,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "not found"),
            FsError::NoSpace => write!(f, "no space"),
            FsError::NameTooLong => write!(f, "name too long"),
            FsError::TooLarge => write!(f, "data too large"),
        }
    }
}

struct FileSlot {
    used: bool,
    name: String<FS_NAME_LEN>,
    data: Vec<u8, FS_DATA_LEN>,
}

impl FileSlot {
    const fn free() -> Self {
        Self {
            used: false,
            name: String::new(),
            data: Vec::new(),
        }
    }
}

static FILES: Spinlock<[FileSlot; FS_MAX_FILES]> =
    Spinlock::new([const { FileSlot::free() }; FS_MAX_FILES]);

fn find(table: &[FileSlot; FS_MAX_FILES], name: &str) -> Option<usize> {
    table
        .iter()
        .position(|f| f.used && f.name.as_str() == name)
}

/// Empty the table.
pub fn format() {
    let mut table = FILES.lock();
    for slot in table.iter_mut() {
        slot.used = false;
        slot.name.clear();
        slot.data.clear();
    }
}

/// Create or replace a file. Oversized names or data are rejected, not
/// truncated.
pub fn write(name: &str, data: &[u8]) -> Result<(), FsError> {
    if name.len() > FS_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    if data.len() > FS_DATA_LEN {
        return Err(FsError::TooLarge);
    }
    let mut table = FILES.lock();
    let idx = match find(&table, name) {
        Some(idx) => idx,
        None => table
            .iter()
            .position(|f| !f.used)
            .ok_or(FsError::NoSpace)?,
    };
    let slot = &mut table[idx];
    slot.used = true;
    slot.name.clear();
    let _ = slot.name.push_str(name); // length checked above
    slot.data.clear();
    let _ = slot.data.extend_from_slice(data);
    Ok(())
}

/// Copy a file's contents out.
pub fn read(name: &str) -> Result<Vec<u8, FS_DATA_LEN>, FsError> {
    let table = FILES.lock();
    let idx = find(&table, name).ok_or(FsError::NotFound)?;
    Ok(table[idx].data.clone())
}

/// Delete a file.
pub fn remove(name: &str) -> Result<(), FsError> {
    let mut table = FILES.lock();
    let idx = find(&table, name).ok_or(FsError::NotFound)?;
    table[idx].used = false;
    table[idx].name.clear();
    table[idx].data.clear();
    Ok(())
}

/// Print the file table on the console (the shell `fs ls` command).
pub fn list() {
    let table = FILES.lock();
    crate::println!("fs:");
    for slot in table.iter().filter(|f| f.used) {
        crate::println!(" - {} ({}b)", slot.name, slot.data.len());
    }
}
