//! Interactive shell
//!
//! A line-buffered command dispatcher on the UART. This is the host
//! context: while no input is pending the loop pumps the scheduler, so
//! background threads make progress whenever the console is idle.

use crate::config::SHELL_LINE_LEN;
use crate::threading::Tid;
use crate::{apps, boot, console, fs, println, prog, tests, threading};

/// Run the shell forever. Only `stop` leaves, via [`boot::park`].
pub fn run() -> ! {
    println!("kodama-shell: type 'help' or 'stop'");
    let mut buf = [0u8; SHELL_LINE_LEN];
    let mut pos = 0;
    crate::print!("$ ");

    loop {
        // Idle: let background threads run
        while !console::has_char() {
            threading::sched_tick();
        }

        let mut c = console::getc();
        if c == b'\r' {
            c = b'\n';
        }
        if c == b'\n' {
            println!();
            if pos > 0 {
                if let Ok(line) = core::str::from_utf8(&buf[..pos]) {
                    dispatch(line);
                }
            }
            pos = 0;
            crate::print!("$ ");
        } else if c == 0x08 || c == 0x7f {
            // backspace
            if pos > 0 {
                pos -= 1;
                console::print("\x08 \x08");
            }
        } else if pos < buf.len() {
            buf[pos] = c;
            pos += 1;
            console::putc(c);
        }
    }
}

fn dispatch(line: &str) {
    let (cmd, args) = split_first_word(line);
    match cmd {
        "help" => cmd_help(),
        "ps" => threading::ps(),
        "ls" | "apps" => apps::list(),
        "run" => cmd_run(args),
        "kill" => cmd_kill(args),
        "fs" => cmd_fs(args),
        "prog" => cmd_prog(args),
        "selftest" => tests::run_all(),
        "stop" => {
            println!("stopping kernel, halting now.");
            boot::park();
        }
        "" => {}
        _ => println!("unknown"),
    }
}

fn cmd_help() {
    println!("commands: help stop ls run <app> ps kill <tid> selftest");
    println!("          fs ... (ls/read/write/rm/format)");
    println!("          prog ... (ls/runall/load/loadfile/save/run/drop)");
}

fn cmd_run(args: &str) {
    let (name, _) = split_first_word(args);
    if let Err(e) = apps::spawn(name) {
        println!("{}", e);
    }
}

fn cmd_kill(args: &str) {
    match args.trim().parse::<u32>() {
        Ok(tid) if threading::kill(Tid(tid)).is_ok() => {}
        _ => println!("no such tid"),
    }
}

fn cmd_fs(args: &str) {
    let (sub, rest) = split_first_word(args);
    match sub {
        "ls" => fs::list(),
        "format" => {
            fs::format();
            println!("fs formatted");
        }
        "read" => {
            let (name, _) = split_first_word(rest);
            match fs::read(name) {
                Ok(data) => {
                    println!("{}", core::str::from_utf8(&data).unwrap_or(""));
                }
                Err(_) => println!("fs read failed"),
            }
        }
        "write" => {
            let (name, data) = split_first_word(rest);
            match fs::write(name, data.as_bytes()) {
                Ok(()) => println!("fs wrote {}", name),
                Err(_) => println!("fs write failed"),
            }
        }
        "rm" => {
            let (name, _) = split_first_word(rest);
            match fs::remove(name) {
                Ok(()) => println!("fs removed"),
                Err(_) => println!("fs rm failed"),
            }
        }
        _ => println!("fs usage: fs ls|format|read <f>|write <f> <data>|rm <f>"),
    }
}

fn cmd_prog(args: &str) {
    let (sub, rest) = split_first_word(args);
    match sub {
        "ls" => prog::list(),
        "runall" => {
            if prog::run_all() == 0 {
                println!("no progs");
            }
        }
        "run" => {
            let (name, _) = split_first_word(rest);
            if let Err(e) = prog::run(name) {
                println!("{}", e);
            }
        }
        "drop" => {
            let (name, _) = split_first_word(rest);
            match prog::remove(name) {
                Ok(()) => println!("prog dropped"),
                Err(_) => println!("prog drop failed"),
            }
        }
        "load" => {
            let (name, rest) = split_first_word(rest);
            let (caps, script) = split_first_word(rest);
            match prog::load(name, script, parse_caps(caps)) {
                Ok(()) => println!("prog loaded"),
                Err(e) => println!("prog load failed: {}", e),
            }
        }
        "loadfile" => {
            let (name, rest) = split_first_word(rest);
            let (caps, rest) = split_first_word(rest);
            let (file, _) = split_first_word(rest);
            match prog::load_file(name, file, parse_caps(caps)) {
                Ok(()) => println!("prog loaded from file"),
                Err(e) => println!("prog loadfile failed: {}", e),
            }
        }
        "save" => {
            let (name, rest) = split_first_word(rest);
            let (file, _) = split_first_word(rest);
            match prog::save(name, file) {
                Ok(()) => println!("prog saved"),
                Err(e) => println!("prog save failed: {}", e),
            }
        }
        _ => println!(
            "prog usage: prog ls|runall|load <name> <caps> <script>|loadfile <name> <caps> <file>|run <name>|drop <name>|save <name> <file>"
        ),
    }
}

/// `CAPS` is a decimal bitmask: UART=1, FS_R=2, FS_W=4, SPAWN=8.
fn parse_caps(word: &str) -> prog::Caps {
    prog::Caps::from_bits_truncate(word.parse::<u8>().unwrap_or(0))
}

/// Split off the first space-delimited word; the remainder has its
/// leading spaces stripped.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim_start_matches(' ');
    match s.find(' ') {
        Some(i) => (&s[..i], s[i + 1..].trim_start_matches(' ')),
        None => (s, ""),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn split_first_word_basic() {
        assert_eq!(split_first_word("run pinger"), ("run", "pinger"));
        assert_eq!(split_first_word("  ps"), ("ps", ""));
        assert_eq!(split_first_word(""), ("", ""));
    }

    #[test]
    fn split_first_word_keeps_rest_spaces() {
        let (cmd, rest) = split_first_word("write f.txt hello  world");
        assert_eq!(cmd, "write");
        assert_eq!(rest, "f.txt hello  world");
    }
}
