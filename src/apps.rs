//! Built-in apps
//!
//! A static registry of demonstration programs. Each app is an ordinary
//! thread entry; the shell's `run` command and the script `spawn` verb
//! launch them by name.

use core::fmt;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::sync::{Barrier, Mutex, Semaphore};
use crate::threading::{self, ThreadError, Tid};
use crate::{fs, println, prog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    /// No app with the given name.
    NotFound,
    /// Thread table full while launching.
    Spawn(ThreadError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound => write!(f, "no such app"),
            AppError::Spawn(e) => write!(f, "{}", e),
        }
    }
}

struct App {
    name: &'static str,
    entry: threading::ThreadFn,
}

static APPS: &[App] = &[
    App { name: "hello", entry: app_hello },
    App { name: "echo", entry: app_echo },
    App { name: "sum", entry: app_sum },
    App { name: "pinger", entry: app_pinger },
    App { name: "counter", entry: app_counter },
    App { name: "sync", entry: app_syncdemo },
    App { name: "fs-demo", entry: app_fs_demo },
    App { name: "prog-demo", entry: app_prog_demo },
    App { name: "sleepers", entry: app_sleepers },
    App { name: "barrier", entry: app_barrier_demo },
    App { name: "prog-file", entry: app_prog_file_demo },
];

/// Launch an app as a new cooperative thread.
pub fn spawn(name: &str) -> Result<Tid, AppError> {
    let app = APPS
        .iter()
        .find(|a| a.name == name)
        .ok_or(AppError::NotFound)?;
    let tid = threading::spawn(app.entry, 0, name).map_err(AppError::Spawn)?;
    println!("spawned {} tid:{}", name, tid);
    Ok(tid)
}

/// Print the registry on the console (the shell `ls` command).
pub fn list() {
    println!("apps:");
    for app in APPS {
        println!(" - {}", app.name);
    }
}

// ============================================================================
// Simple apps
// ============================================================================

extern "C" fn app_hello(_arg: usize) {
    println!("[app:hello] Hello from built-in app!");
}

extern "C" fn app_echo(_arg: usize) {
    println!("[app:echo] echoing... done");
}

extern "C" fn app_sum(_arg: usize) {
    let s: u32 = (1..=10).sum();
    println!("sum={}", s);
}

extern "C" fn app_pinger(_arg: usize) {
    for _ in 0..20 {
        println!("[app:pinger] ping");
        threading::yield_now();
    }
    println!("[app:pinger] done");
}

extern "C" fn app_counter(_arg: usize) {
    for i in 1..=20 {
        println!("[app:counter] {}", i);
        threading::yield_now();
    }
    println!("[app:counter] done");
}

// ============================================================================
// Producer/consumer over a 4-slot ring
// ============================================================================

struct PcState {
    lock: Mutex,
    items: Semaphore,
    spaces: Semaphore,
    slots: [AtomicU8; 4],
    head: AtomicUsize,
    tail: AtomicUsize,
}

static PC: PcState = PcState {
    lock: Mutex::new(),
    items: Semaphore::new(0),
    spaces: Semaphore::new(4),
    slots: [const { AtomicU8::new(0) }; 4],
    head: AtomicUsize::new(0),
    tail: AtomicUsize::new(0),
};

extern "C" fn producer(_arg: usize) {
    for payload in [b'A', b'B', b'C', b'D', b'E', b'F'] {
        PC.spaces.wait();
        PC.lock.lock();
        let tail = PC.tail.load(Ordering::Relaxed);
        PC.slots[tail].store(payload, Ordering::Relaxed);
        PC.tail.store((tail + 1) % 4, Ordering::Relaxed);
        PC.lock.unlock();
        PC.items.post();
        println!("[producer] queued item");
        threading::yield_now();
    }
    println!("[producer] done");
}

extern "C" fn consumer(_arg: usize) {
    for _ in 0..6 {
        PC.items.wait();
        PC.lock.lock();
        let head = PC.head.load(Ordering::Relaxed);
        let item = PC.slots[head].load(Ordering::Relaxed);
        PC.head.store((head + 1) % 4, Ordering::Relaxed);
        PC.lock.unlock();
        PC.spaces.post();
        println!("[consumer] got {}", item as char);
        threading::yield_now();
    }
    println!("[consumer] done");
}

extern "C" fn app_syncdemo(_arg: usize) {
    PC.head.store(0, Ordering::Relaxed);
    PC.tail.store(0, Ordering::Relaxed);
    let _ = threading::spawn(producer, 0, "producer");
    let _ = threading::spawn(consumer, 0, "consumer");
    println!("[app:syncdemo] spawned producer/consumer");
}

// ============================================================================
// Filesystem and program demos
// ============================================================================

extern "C" fn app_fs_demo(_arg: usize) {
    let _ = fs::write("hello.txt", b"hi-from-fs");
    if let Ok(data) = fs::read("hello.txt") {
        println!(
            "[app:fs] read back: {}",
            core::str::from_utf8(&data).unwrap_or("")
        );
    }
}

extern "C" fn app_prog_demo(_arg: usize) {
    let script = "print script boot;write note hi!;read note;spawn pinger;yield;print bye;exit";
    let _ = prog::load("script1", script, prog::Caps::all());
    let _ = prog::run("script1");
}

extern "C" fn app_prog_file_demo(_arg: usize) {
    let _ = fs::write(
        "fileprog.txt",
        b"print from-file;yield;spawn counter;exit",
    );
    let _ = prog::load_file(
        "fileprog",
        "fileprog.txt",
        prog::Caps::UART | prog::Caps::SPAWN,
    );
    let _ = prog::run("fileprog");
}

// ============================================================================
// Sleep and barrier demos
// ============================================================================

extern "C" fn sleepy_worker(id: usize) {
    for round in 0..3 {
        println!("[sleepy {}] round {}", id, round);
        // Stagger sleeps with different durations
        threading::sleep(1 + id as i32);
    }
    println!("[sleepy] done");
}

extern "C" fn app_sleepers(_arg: usize) {
    for id in 0..3 {
        let _ = threading::spawn(sleepy_worker, id, "sleepy");
    }
    println!("[app:sleepers] spawned sleepy threads");
}

static STEP_BARRIER: Barrier = Barrier::new(3);

extern "C" fn barrier_worker(id: usize) {
    for step in 0..3 {
        println!("[barrier worker {}] step {}", id, step);
        STEP_BARRIER.wait();
        threading::sleep(1 + id as i32);
    }
    println!("[barrier worker] done");
}

extern "C" fn app_barrier_demo(_arg: usize) {
    let names = ["bar0", "bar1", "bar2"];
    for (id, name) in names.iter().enumerate() {
        let _ = threading::spawn(barrier_worker, id, name);
    }
    println!("[app:barrier] 3 workers waiting on barrier");
}
