//! Kernel self tests
//!
//! Scheduler and sync scenarios, run from the shell `selftest` command.
//! The test functions execute in the host context and drive the scheduler
//! themselves, so every scenario is deterministic: a test spawns its
//! threads, pumps `sched_tick` until the table drains, then checks what
//! the threads recorded (shared event logs and the console transcript
//! ring).

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::Vec;
use spinning_top::Spinlock;

use crate::config::{CONSOLE_RING_SIZE, MAX_THREADS, SELFTEST_TICK_LIMIT};
use crate::sync::{Barrier, Mutex, Semaphore};
use crate::threading::{self, ThreadState};
use crate::{console, fs_tests, println, prog_tests};

// ============================================================================
// Test Runner
// ============================================================================

/// Run every suite: scheduler/sync (this file), filesystem, programs.
pub fn run_all() {
    println!();
    println!("========== kodama self tests ==========");

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

    run_test!(test_spawn_runs_entry_once, "spawn_runs_entry_once");
    run_test!(test_spawn_table_full, "spawn_table_full");
    run_test!(test_finished_slot_reaped, "finished_slot_reaped");
    run_test!(test_yield_interleave, "yield_interleave");
    run_test!(test_yield_from_host, "yield_from_host");
    run_test!(test_solo_yield_completes, "solo_yield_completes");
    run_test!(test_sleep_zero_is_yield, "sleep_zero_is_yield");
    run_test!(test_sleep_marks_sleeping, "sleep_marks_sleeping");
    run_test!(test_sleep_ordering, "sleep_ordering");
    run_test!(test_kill_removes_thread, "kill_removes_thread");
    run_test!(test_mutex_basics, "mutex_basics");
    run_test!(test_mutex_excludes_across_yield, "mutex_excludes_across_yield");
    run_test!(test_sem_post_then_wait, "sem_post_then_wait");
    run_test!(test_producer_consumer, "producer_consumer");
    run_test!(test_barrier_of_three, "barrier_of_three");

    println!("[tests] scheduler/sync: {} passed, {} failed", passed, failed);

    fs_tests::run_all_tests();
    prog_tests::run_all_tests();
}

// ============================================================================
// Helpers shared by the suites
// ============================================================================

/// Pump the scheduler until the thread table drains. Returns false if the
/// tick budget runs out first.
pub(crate) fn drive_until_idle() -> bool {
    let mut ticks: u64 = 0;
    while threading::active_threads() > 0 {
        threading::sched_tick();
        ticks += 1;
        if ticks > SELFTEST_TICK_LIMIT {
            return false;
        }
    }
    true
}

/// Console output captured since a ring mark.
pub(crate) struct Transcript {
    buf: [u8; CONSOLE_RING_SIZE],
    len: usize,
}

impl Transcript {
    pub(crate) fn since(mark: u64) -> Self {
        let mut buf = [0u8; CONSOLE_RING_SIZE];
        let len = console::ring_since(mark, &mut buf);
        Self { buf, len }
    }

    fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        let hay = &self.buf[..self.len];
        let needle = needle.as_bytes();
        if needle.is_empty() || from >= hay.len() {
            return None;
        }
        hay[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| p + from)
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.find_from(0, needle).is_some()
    }

    pub(crate) fn count_of(&self, needle: &str) -> usize {
        let mut n = 0;
        let mut from = 0;
        while let Some(at) = self.find_from(from, needle) {
            n += 1;
            from = at + needle.len();
        }
        n
    }

    /// True if every needle occurs, each strictly after the previous one.
    pub(crate) fn expect_in_order(&self, needles: &[&str]) -> bool {
        let mut from = 0;
        for needle in needles {
            match self.find_from(from, needle) {
                Some(at) => from = at + needle.len(),
                None => return false,
            }
        }
        true
    }
}

// Event log the scenario threads record into.
static EVENTS: Spinlock<Vec<u32, 64>> = Spinlock::new(Vec::new());

fn event_reset() {
    EVENTS.lock().clear();
}

fn event_push(v: u32) {
    let _ = EVENTS.lock().push(v);
}

fn events() -> Vec<u32, 64> {
    EVENTS.lock().clone()
}

// ============================================================================
// Thread lifecycle
// ============================================================================

static ENTRY_RUNS: AtomicU32 = AtomicU32::new(0);

extern "C" fn entry_add_arg(arg: usize) {
    ENTRY_RUNS.fetch_add(arg as u32, Ordering::Relaxed);
}

extern "C" fn entry_noop(_arg: usize) {}

fn test_spawn_runs_entry_once() -> bool {
    ENTRY_RUNS.store(0, Ordering::Relaxed);
    if threading::spawn(entry_add_arg, 7, "once").is_err() {
        return false;
    }
    if !drive_until_idle() {
        return false;
    }
    // Entry ran exactly once, with the argument it was spawned with
    ENTRY_RUNS.load(Ordering::Relaxed) == 7
}

fn test_spawn_table_full() -> bool {
    let mut spawned = 0;
    for _ in 0..MAX_THREADS {
        if threading::spawn(entry_noop, 0, "filler").is_ok() {
            spawned += 1;
        }
    }
    let overflow = threading::spawn(entry_noop, 0, "overflow");
    let full = matches!(overflow, Err(threading::ThreadError::TableFull));
    let drained = drive_until_idle();
    spawned == MAX_THREADS && full && drained
}

fn test_finished_slot_reaped() -> bool {
    if threading::spawn(entry_noop, 0, "reapme").is_err() {
        return false;
    }
    // First tick runs the thread to completion; the slot stays occupied
    // until a tick observes it with nothing running
    threading::sched_tick();
    let lingering = threading::active_threads();
    threading::sched_tick();
    lingering == 1 && threading::active_threads() == 0
}

// ============================================================================
// Yield and sleep
// ============================================================================

extern "C" fn ping_three(_arg: usize) {
    for _ in 0..3 {
        println!("[ping]");
        threading::yield_now();
    }
}

extern "C" fn count_three(_arg: usize) {
    for i in 1..=3 {
        println!("[count] {}", i);
        threading::yield_now();
    }
}

fn test_yield_interleave() -> bool {
    let mark = console::ring_mark();
    if threading::spawn(ping_three, 0, "ping").is_err()
        || threading::spawn(count_three, 0, "count").is_err()
    {
        return false;
    }
    if !drive_until_idle() {
        return false;
    }
    let t = Transcript::since(mark);
    t.count_of("[ping]") == 3
        && t.expect_in_order(&[
            "[ping]", "[count] 1", "[ping]", "[count] 2", "[ping]", "[count] 3",
        ])
}

extern "C" fn two_step(_arg: usize) {
    event_push(1);
    threading::yield_now();
    event_push(2);
}

fn test_yield_from_host() -> bool {
    event_reset();
    if threading::spawn(two_step, 0, "twostep").is_err() {
        return false;
    }
    // Yielding from the host suspends it into the ready thread; the
    // thread's first yield with nobody else ready hands control back
    threading::yield_now();
    let after_host_yield = events();
    if !drive_until_idle() {
        return false;
    }
    after_host_yield.as_slice() == &[1][..] && events().as_slice() == &[1, 2][..]
}

extern "C" fn yield_thrice(_arg: usize) {
    for _ in 0..3 {
        event_push(9);
        threading::yield_now();
    }
}

fn test_solo_yield_completes() -> bool {
    event_reset();
    if threading::spawn(yield_thrice, 0, "solo").is_err() {
        return false;
    }
    drive_until_idle() && events().as_slice() == &[9, 9, 9][..]
}

extern "C" fn sleep_zero(_arg: usize) {
    threading::sleep(0);
    event_push(1);
}

fn test_sleep_zero_is_yield() -> bool {
    event_reset();
    let Ok(tid) = threading::spawn(sleep_zero, 0, "s0") else {
        return false;
    };
    // One tick: the thread runs, sleep(0) degrades to a yield, so the
    // thread must be Ready afterwards, never Sleeping
    threading::sched_tick();
    let state = threading::state_of(tid);
    drive_until_idle() && state == Some(ThreadState::Ready) && events().as_slice() == &[1][..]
}

extern "C" fn sleep_two(_arg: usize) {
    threading::sleep(2);
}

fn test_sleep_marks_sleeping() -> bool {
    let Ok(tid) = threading::spawn(sleep_two, 0, "s2") else {
        return false;
    };
    threading::sched_tick();
    let state = threading::state_of(tid);
    drive_until_idle() && state == Some(ThreadState::Sleeping)
}

extern "C" fn staggered_sleeper(id: usize) {
    let before = threading::tick_count();
    threading::sleep(1 + id as i32);
    let delta = (threading::tick_count() - before) as u32;
    event_push(id as u32 * 100 + delta);
}

fn test_sleep_ordering() -> bool {
    event_reset();
    for id in 0..3 {
        if threading::spawn(staggered_sleeper, id, "stagger").is_err() {
            return false;
        }
    }
    if !drive_until_idle() {
        return false;
    }
    // Worker i sleeps 1+i ticks: wake order 0, 1, 2 with exact deadlines
    events().as_slice() == &[1, 102, 203][..]
}

extern "C" fn yield_fifty(_arg: usize) {
    for _ in 0..50 {
        threading::yield_now();
    }
}

fn test_kill_removes_thread() -> bool {
    let Ok(tid) = threading::spawn(yield_fifty, 0, "victim") else {
        return false;
    };
    // Let it start and yield back, then remove it mid-flight
    threading::sched_tick();
    if threading::kill(tid).is_err() {
        return false;
    }
    let gone = threading::active_threads() == 0;
    let again = threading::kill(tid);
    gone && matches!(again, Err(threading::ThreadError::NoSuchThread))
}

// ============================================================================
// Sync primitives
// ============================================================================

static BASIC_MUTEX: Mutex = Mutex::new();

fn test_mutex_basics() -> bool {
    if BASIC_MUTEX.try_lock().is_err() {
        return false;
    }
    let second = BASIC_MUTEX.try_lock();
    BASIC_MUTEX.unlock();
    if second.is_ok() {
        return false;
    }
    BASIC_MUTEX.lock();
    let held = BASIC_MUTEX.is_locked();
    BASIC_MUTEX.unlock();
    held && !BASIC_MUTEX.is_locked()
}

static YIELD_MUTEX: Mutex = Mutex::new();

// Event codes: 10+id on entering the critical section, 20+id on leaving.
extern "C" fn critical_worker(id: usize) {
    for _ in 0..3 {
        YIELD_MUTEX.lock();
        event_push(10 + id as u32);
        // Hold the lock across a suspension point to force contention
        threading::yield_now();
        event_push(20 + id as u32);
        YIELD_MUTEX.unlock();
        threading::yield_now();
    }
}

fn test_mutex_excludes_across_yield() -> bool {
    event_reset();
    for id in 0..2 {
        if threading::spawn(critical_worker, id, "crit").is_err() {
            return false;
        }
    }
    if !drive_until_idle() {
        return false;
    }
    // Enter/leave events must pair up with no overlap
    let mut holder: Option<u32> = None;
    for &ev in events().iter() {
        match ev {
            10..=19 => {
                if holder.is_some() {
                    return false;
                }
                holder = Some(ev - 10);
            }
            20..=29 => {
                if holder != Some(ev - 20) {
                    return false;
                }
                holder = None;
            }
            _ => return false,
        }
    }
    holder.is_none()
}

fn test_sem_post_then_wait() -> bool {
    let sem = Semaphore::new(2);
    sem.post();
    sem.wait();
    // post;wait is a no-op on a positive semaphore
    sem.count() == 2
}

// Producer/consumer ring for the semaphore scenario.
struct TestRing {
    slots: [u8; 4],
    head: usize,
    tail: usize,
}

static RING: Spinlock<TestRing> = Spinlock::new(TestRing {
    slots: [0; 4],
    head: 0,
    tail: 0,
});
static ITEMS: Semaphore = Semaphore::new(0);
static SPACES: Semaphore = Semaphore::new(4);
static CONSUMED: Spinlock<Vec<u8, 8>> = Spinlock::new(Vec::new());

extern "C" fn ring_producer(_arg: usize) {
    for payload in [b'A', b'B', b'C', b'D', b'E', b'F'] {
        SPACES.wait();
        {
            let mut ring = RING.lock();
            let tail = ring.tail;
            ring.slots[tail] = payload;
            ring.tail = (tail + 1) % 4;
        }
        ITEMS.post();
        threading::yield_now();
    }
}

extern "C" fn ring_consumer(_arg: usize) {
    for _ in 0..6 {
        ITEMS.wait();
        let item = {
            let mut ring = RING.lock();
            let head = ring.head;
            let item = ring.slots[head];
            ring.head = (head + 1) % 4;
            item
        };
        SPACES.post();
        let _ = CONSUMED.lock().push(item);
        threading::yield_now();
    }
}

fn test_producer_consumer() -> bool {
    {
        let mut ring = RING.lock();
        ring.head = 0;
        ring.tail = 0;
    }
    CONSUMED.lock().clear();
    if threading::spawn(ring_producer, 0, "producer").is_err()
        || threading::spawn(ring_consumer, 0, "consumer").is_err()
    {
        return false;
    }
    if !drive_until_idle() {
        return false;
    }
    CONSUMED.lock().as_slice() == &b"ABCDEF"[..]
}

static STEP_BARRIER: Barrier = Barrier::new(3);

extern "C" fn lockstep_worker(id: usize) {
    for step in 0..3u32 {
        event_push(step * 10 + id as u32);
        STEP_BARRIER.wait();
    }
}

fn test_barrier_of_three() -> bool {
    event_reset();
    let gen_before = STEP_BARRIER.generation();
    for id in 0..3 {
        if threading::spawn(lockstep_worker, id, "step").is_err() {
            return false;
        }
    }
    if !drive_until_idle() {
        return false;
    }
    // Three full rendezvous, one generation each
    if STEP_BARRIER.generation() - gen_before != 3 {
        return false;
    }
    let log = events();
    if log.len() != 9 {
        return false;
    }
    // All arrivals for step k must precede every arrival for step k+1
    for k in 0..2u32 {
        let last_k = log.iter().rposition(|&e| e / 10 == k);
        let first_next = log.iter().position(|&e| e / 10 == k + 1);
        match (last_k, first_next) {
            (Some(last), Some(first)) if last < first => {}
            _ => return false,
        }
    }
    true
}
