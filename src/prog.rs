//! Scripted programs
//!
//! A fixed store of named scripts, each tagged with a capability mask,
//! and the interpreter that runs a script on its own thread. Every
//! privileged verb checks the program's capabilities before any side
//! effect; a denial skips the rest of the statement and execution
//! continues at the next `;`.
//!
//! Script grammar: statements separated by `;`, each a verb followed by
//! whitespace-separated arguments. `print` and `write` take the rest of
//! the statement as a single argument with embedded spaces preserved.

use core::fmt;

use bitflags::bitflags;
use heapless::String;
use spinning_top::Spinlock;

use crate::config::{PROG_MAX, PROG_NAME_LEN, PROG_SCRIPT_LEN};
use crate::threading::{self, ThreadError, Tid};
use crate::{apps, fs, println};

bitflags! {
    /// Capability bits authorizing classes of side effects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Caps: u8 {
        const UART = 1;
        const FS_R = 2;
        const FS_W = 4;
        const SPAWN = 8;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgError {
    /// No program with the given name.
    NotFound,
    /// Every program slot is occupied.
    TableFull,
    /// Name exceeds [`PROG_NAME_LEN`] bytes.
    NameTooLong,
    /// Script exceeds [`PROG_SCRIPT_LEN`] bytes.
    ScriptTooLong,
    /// Script bytes are not UTF-8.
    BadScript,
    /// Filesystem failure while loading or saving.
    File(fs::FsError),
    /// Thread table full while launching.
    Spawn(ThreadError),
}

impl fmt::Display for ProgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgError::NotFound => write!(f, "no such prog"),
            ProgError::TableFull => write!(f, "prog table full"),
            ProgError::NameTooLong => write!(f, "name too long"),
            ProgError::ScriptTooLong => write!(f, "script too long"),
            ProgError::BadScript => write!(f, "script is not utf-8"),
            ProgError::File(e) => write!(f, "fs: {}", e),
            ProgError::Spawn(e) => write!(f, "{}", e),
        }
    }
}

struct Program {
    used: bool,
    name: String<PROG_NAME_LEN>,
    script: String<PROG_SCRIPT_LEN>,
    caps: Caps,
}

impl Program {
    const fn free() -> Self {
        Self {
            used: false,
            name: String::new(),
            script: String::new(),
            caps: Caps::empty(),
        }
    }
}

static PROGS: Spinlock<[Program; PROG_MAX]> =
    Spinlock::new([const { Program::free() }; PROG_MAX]);

fn find(table: &[Program; PROG_MAX], name: &str) -> Option<usize> {
    table
        .iter()
        .position(|p| p.used && p.name.as_str() == name)
}

/// Install a script, overwriting an existing entry with the same name or
/// taking a free slot.
pub fn load(name: &str, script: &str, caps: Caps) -> Result<(), ProgError> {
    if name.len() > PROG_NAME_LEN {
        return Err(ProgError::NameTooLong);
    }
    if script.len() > PROG_SCRIPT_LEN {
        return Err(ProgError::ScriptTooLong);
    }
    let mut table = PROGS.lock();
    let idx = match find(&table, name) {
        Some(idx) => idx,
        None => table
            .iter()
            .position(|p| !p.used)
            .ok_or(ProgError::TableFull)?,
    };
    let slot = &mut table[idx];
    slot.used = true;
    slot.name.clear();
    let _ = slot.name.push_str(name); // length checked above
    slot.script.clear();
    let _ = slot.script.push_str(script);
    slot.caps = caps;
    Ok(())
}

/// Read a script from the filesystem and install it.
pub fn load_file(name: &str, file: &str, caps: Caps) -> Result<(), ProgError> {
    let data = fs::read(file).map_err(ProgError::File)?;
    let script = core::str::from_utf8(&data).map_err(|_| ProgError::BadScript)?;
    load(name, script, caps)
}

/// Remove a program from the store. Interpreter threads already running
/// work on a snapshot of the slot and are unaffected.
pub fn remove(name: &str) -> Result<(), ProgError> {
    let mut table = PROGS.lock();
    let idx = find(&table, name).ok_or(ProgError::NotFound)?;
    table[idx].used = false;
    table[idx].name.clear();
    table[idx].script.clear();
    table[idx].caps = Caps::empty();
    Ok(())
}

/// Write a program's script bytes to a file.
pub fn save(name: &str, file: &str) -> Result<(), ProgError> {
    let script: String<PROG_SCRIPT_LEN> = {
        let table = PROGS.lock();
        let idx = find(&table, name).ok_or(ProgError::NotFound)?;
        table[idx].script.clone()
    };
    fs::write(file, script.as_bytes()).map_err(ProgError::File)
}

/// Print the program table on the console (the shell `prog ls` command).
pub fn list() {
    let table = PROGS.lock();
    println!("user progs:");
    for slot in table.iter().filter(|p| p.used) {
        println!(" - {} caps:{}", slot.name, slot.caps.bits());
    }
}

/// Launch a program on a fresh thread.
pub fn run(name: &str) -> Result<Tid, ProgError> {
    let idx = {
        let table = PROGS.lock();
        find(&table, name).ok_or(ProgError::NotFound)?
    };
    threading::spawn(prog_thread, idx, name).map_err(ProgError::Spawn)
}

/// Launch every stored program; returns how many threads were started.
pub fn run_all() -> usize {
    let mut started = 0;
    for idx in 0..PROG_MAX {
        let name: Option<String<PROG_NAME_LEN>> = {
            let table = PROGS.lock();
            table[idx].used.then(|| table[idx].name.clone())
        };
        if let Some(name) = name {
            if threading::spawn(prog_thread, idx, &name).is_ok() {
                started += 1;
            }
        }
    }
    started
}

// ============================================================================
// Interpreter
// ============================================================================

/// Entry of an interpreter thread. The argument is the store slot index;
/// the slot is snapshotted once so the store may be mutated (or the entry
/// dropped) while the script runs.
extern "C" fn prog_thread(slot: usize) {
    let snapshot = {
        let table = PROGS.lock();
        let p = &table[slot];
        p.used
            .then(|| (p.name.clone(), p.script.clone(), p.caps))
    };
    let Some((name, script, caps)) = snapshot else {
        return;
    };
    interpret(&name, &script, caps);
}

fn interpret(name: &str, script: &str, caps: Caps) {
    println!("[prog:{}] start", name);
    let bytes = script.as_bytes();
    let mut pos = 0;

    loop {
        skip_ws(bytes, &mut pos);
        if pos >= bytes.len() {
            break;
        }

        let verb = take_word(bytes, &mut pos);
        let needs = match verb {
            b"print" => Caps::UART,
            b"spawn" => Caps::SPAWN,
            b"write" => Caps::FS_W,
            b"read" => Caps::FS_R,
            _ => Caps::empty(),
        };

        if !caps.contains(needs) {
            // Denied: report and drop the verb's arguments so they are
            // not reparsed as statements of their own
            println!("[deny] {}", as_str(verb));
            skip_stmt(bytes, &mut pos);
        } else {
            match verb {
                b"print" => {
                    skip_ws(bytes, &mut pos);
                    let text = take_rest(bytes, &mut pos);
                    println!("[prog:{}] {}", name, as_str(text));
                }
                b"yield" => threading::yield_now(),
                b"sleep" => {
                    skip_ws(bytes, &mut pos);
                    let word = take_word(bytes, &mut pos);
                    let mut ticks = parse_decimal(word) as i32;
                    if ticks <= 0 {
                        ticks = 1;
                    }
                    threading::sleep(ticks);
                }
                b"spawn" => {
                    skip_ws(bytes, &mut pos);
                    let app = take_word(bytes, &mut pos);
                    let _ = apps::spawn(as_str(app));
                }
                b"write" => {
                    skip_ws(bytes, &mut pos);
                    let file = take_word(bytes, &mut pos);
                    skip_ws(bytes, &mut pos);
                    let data = take_rest(bytes, &mut pos);
                    match fs::write(as_str(file), data) {
                        Ok(()) => println!("[prog:{}] wrote {}", name, as_str(file)),
                        Err(_) => println!("[prog:{}] write fail", name),
                    }
                }
                b"read" => {
                    skip_ws(bytes, &mut pos);
                    let file = take_word(bytes, &mut pos);
                    match fs::read(as_str(file)) {
                        Ok(data) => {
                            println!("[prog:{}] {}", name, as_str(&data));
                        }
                        Err(_) => println!("[prog:{}] read fail", name),
                    }
                }
                b"exit" => break,
                _ => {
                    println!("[prog:{}] unknown cmd", name);
                    skip_stmt(bytes, &mut pos);
                }
            }
        }

        while pos < bytes.len() && bytes[pos] == b';' {
            pos += 1;
        }
    }

    println!("[prog:{}] exit", name);
}

// ============================================================================
// Tokenizer
// ============================================================================

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn skip_ws(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() && is_ws(bytes[*pos]) {
        *pos += 1;
    }
}

/// Maximal run of bytes that are neither whitespace nor `;`.
fn take_word<'a>(bytes: &'a [u8], pos: &mut usize) -> &'a [u8] {
    let start = *pos;
    while *pos < bytes.len() && !is_ws(bytes[*pos]) && bytes[*pos] != b';' {
        *pos += 1;
    }
    &bytes[start..*pos]
}

/// Everything up to the next `;` or end of input, spaces included.
fn take_rest<'a>(bytes: &'a [u8], pos: &mut usize) -> &'a [u8] {
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos] != b';' {
        *pos += 1;
    }
    &bytes[start..*pos]
}

/// Advance past the remainder of the current statement.
fn skip_stmt(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() && bytes[*pos] != b';' {
        *pos += 1;
    }
}

/// Leading decimal digits of `word`, 0 if there are none.
fn parse_decimal(word: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &b in word {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.wrapping_mul(10).wrapping_add((b - b'0') as u32);
    }
    value
}

fn as_str(bytes: &[u8]) -> &str {
    // Scripts are stored as str and sliced at ASCII delimiters, so this
    // cannot fail for interpreter input
    core::str::from_utf8(bytes).unwrap_or("")
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_word_stops_at_separator() {
        let bytes = b"print hello;yield";
        let mut pos = 0;
        assert_eq!(take_word(bytes, &mut pos), b"print");
        skip_ws(bytes, &mut pos);
        assert_eq!(take_rest(bytes, &mut pos), b"hello");
        assert_eq!(bytes[pos], b';');
    }

    #[test]
    fn take_rest_preserves_embedded_spaces() {
        let bytes = b"one two  three;tail";
        let mut pos = 0;
        assert_eq!(take_rest(bytes, &mut pos), b"one two  three");
    }

    #[test]
    fn parse_decimal_ignores_trailing_junk() {
        assert_eq!(parse_decimal(b"42x"), 42);
        assert_eq!(parse_decimal(b""), 0);
        assert_eq!(parse_decimal(b"abc"), 0);
    }
}
