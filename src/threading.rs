//! Cooperative threading
//!
//! A fixed table of threads multiplexed onto the single hardware thread.
//! There is no preemption: a thread runs until it yields, sleeps, blocks
//! in a sync primitive, or returns from its entry function. The host
//! context (the shell loop) drives everything by calling [`sched_tick`]
//! while the UART is idle.
//!
//! `switch_context` is the only place where the flow of control moves
//! between stacks; every other function observes a switch as an ordinary
//! function returning later.

use core::arch::global_asm;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use heapless::{String, Vec};
use spinning_top::Spinlock;

use crate::boot;
use crate::config::{MAX_THREADS, THREAD_NAME_LEN, THREAD_STACK_SIZE};

// Assembly context switch and thread trampoline
global_asm!(
    r#"
.section .text
.global switch_context
.global thread_start

// void switch_context(Context *old, const Context *new)
// x0 = context to save into, x1 = context to load from
switch_context:
    stp x19, x20, [x0, #0]
    stp x21, x22, [x0, #16]
    stp x23, x24, [x0, #32]
    stp x25, x26, [x0, #48]
    stp x27, x28, [x0, #64]
    stp x29, x30, [x0, #80]
    mov x9, sp
    str x9, [x0, #96]

    ldp x19, x20, [x1, #0]
    ldp x21, x22, [x1, #16]
    ldp x23, x24, [x1, #32]
    ldp x25, x26, [x1, #48]
    ldp x27, x28, [x1, #64]
    ldp x29, x30, [x1, #80]
    ldr x9, [x1, #96]
    mov sp, x9

    // Returns into whatever x30 now holds: either a suspended call site
    // or, for a fresh thread, the thread_start trampoline below
    ret

// First landing point of a new thread. spawn() seeds x19 with the entry
// function and x20 with its argument.
thread_start:
    mov x0, x20
    blr x19
    // Entry returned: route through the exit path, which never returns
    bl thread_exit
1:  wfi
    b 1b
"#
);

unsafe extern "C" {
    fn switch_context(old: *mut Context, new: *const Context);
    fn thread_start();
}

/// Thread entry function. The argument is opaque to the scheduler.
pub type ThreadFn = extern "C" fn(usize);

/// Saved CPU context: the aarch64 callee-saved set plus the stack
/// pointer. Only meaningful while the owning thread is not running.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Context {
    x19: u64,
    x20: u64,
    x21: u64,
    x22: u64,
    x23: u64,
    x24: u64,
    x25: u64,
    x26: u64,
    x27: u64,
    x28: u64,
    x29: u64, // frame pointer
    x30: u64, // link register
    sp: u64,
}

impl Context {
    const fn zero() -> Self {
        Self {
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x29: 0,
            x30: 0,
            sp: 0,
        }
    }
}

/// Thread identifier. Handed out monotonically starting at 1 and never
/// reused for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Sleeping,
    Finished,
}

impl ThreadState {
    fn label(self) -> &'static str {
        match self {
            ThreadState::Ready => "ready",
            ThreadState::Running => "run",
            ThreadState::Sleeping => "sleep",
            ThreadState::Finished => "fin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// All thread slots are occupied.
    TableFull,
    /// No live thread has the given id.
    NoSuchThread,
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::TableFull => write!(f, "thread table full"),
            ThreadError::NoSuchThread => write!(f, "no such thread"),
        }
    }
}

struct Slot {
    used: bool,
    id: Tid,
    name: String<THREAD_NAME_LEN>,
    state: ThreadState,
    ctx: Context,
    sleep_ticks: u32,
}

impl Slot {
    const fn free() -> Self {
        Self {
            used: false,
            id: Tid(0),
            name: String::new(),
            state: ThreadState::Finished,
            ctx: Context::zero(),
            sleep_ticks: 0,
        }
    }
}

// ============================================================================
// Static stacks
// ============================================================================

#[repr(C, align(16))]
struct ThreadStack([u8; THREAD_STACK_SIZE]);

// Stacks live outside the scheduler lock: the running thread executes on
// its stack while other code briefly holds the lock.
struct StackPool(UnsafeCell<[ThreadStack; MAX_THREADS]>);

unsafe impl Sync for StackPool {}

static STACKS: StackPool = StackPool(UnsafeCell::new(
    [const { ThreadStack([0; THREAD_STACK_SIZE]) }; MAX_THREADS],
));

fn stack_top(idx: usize) -> u64 {
    let base = STACKS.0.get() as *mut ThreadStack;
    // Top of the slot's stack, 16-byte aligned per the AAPCS64
    (unsafe { base.add(idx + 1) } as u64) & !0xf
}

// ============================================================================
// Scheduler state
// ============================================================================

struct Scheduler {
    slots: [Slot; MAX_THREADS],
    /// Index of the running thread, `None` while the host context runs.
    current: Option<usize>,
    next_tid: u32,
    /// Saved host context; valid iff `main_saved`.
    main_ctx: Context,
    main_saved: bool,
}

/// A context switch decided under the lock and performed after it is
/// released.
enum Switch {
    None,
    /// Save into `old`, resume `new`.
    Pair {
        old: *mut Context,
        new: *const Context,
    },
    /// Resume `new`, discarding the current register state (the host has
    /// already been saved elsewhere).
    Scratch { new: *const Context },
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            slots: [const { Slot::free() }; MAX_THREADS],
            current: None,
            next_tid: 1,
            main_ctx: Context::zero(),
            main_saved: false,
        }
    }

    /// Round-robin: first used+Ready slot strictly after `from`, wrapping
    /// once around the table. `from = None` scans from slot 0.
    fn next_ready_after(&self, from: Option<usize>) -> Option<usize> {
        let base = from.map(|i| i as isize).unwrap_or(-1);
        for step in 1..=MAX_THREADS as isize {
            let idx = (base + step).rem_euclid(MAX_THREADS as isize) as usize;
            if self.slots[idx].used && self.slots[idx].state == ThreadState::Ready {
                return Some(idx);
            }
        }
        None
    }

    fn first_ready(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.used && s.state == ThreadState::Ready)
    }

    fn find(&self, tid: Tid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.used && s.id == tid)
    }

    fn free_slot(&mut self, idx: usize) {
        self.slots[idx].used = false;
        self.slots[idx].name.clear();
        self.slots[idx].sleep_ticks = 0;
    }

    fn plan_yield(&mut self) -> Switch {
        let old = self.current;
        match (self.next_ready_after(old), old) {
            (Some(next), None) => {
                // Host yields into a thread
                self.slots[next].state = ThreadState::Running;
                self.current = Some(next);
                self.main_saved = true;
                let old_ptr = &mut self.main_ctx as *mut Context;
                let new_ptr = &self.slots[next].ctx as *const Context;
                Switch::Pair {
                    old: old_ptr,
                    new: new_ptr,
                }
            }
            (Some(next), Some(prev)) => {
                // Sleep marks the caller before yielding; do not undo it
                if self.slots[prev].state == ThreadState::Running {
                    self.slots[prev].state = ThreadState::Ready;
                }
                self.slots[next].state = ThreadState::Running;
                self.current = Some(next);
                let old_ptr = &mut self.slots[prev].ctx as *mut Context;
                let new_ptr = &self.slots[next].ctx as *const Context;
                Switch::Pair {
                    old: old_ptr,
                    new: new_ptr,
                }
            }
            (None, Some(prev)) => {
                // Nothing else to run: hand control back to the host if it
                // is waiting, otherwise the yield is a no-op
                if self.slots[prev].state == ThreadState::Running {
                    self.slots[prev].state = ThreadState::Ready;
                }
                self.current = None;
                if self.main_saved {
                    self.main_saved = false;
                    let old_ptr = &mut self.slots[prev].ctx as *mut Context;
                    let new_ptr = &self.main_ctx as *const Context;
                    Switch::Pair {
                        old: old_ptr,
                        new: new_ptr,
                    }
                } else {
                    Switch::None
                }
            }
            (None, None) => Switch::None,
        }
    }

    fn plan_tick(&mut self) -> Switch {
        // Wake sleepers whose deadline expires this tick
        for slot in self.slots.iter_mut() {
            if slot.used && slot.state == ThreadState::Sleeping {
                if slot.sleep_ticks > 0 {
                    slot.sleep_ticks -= 1;
                }
                if slot.sleep_ticks == 0 {
                    slot.state = ThreadState::Ready;
                }
            }
        }

        // Reap threads that exited while other threads kept running; their
        // saved context will never be restored
        for idx in 0..MAX_THREADS {
            if self.slots[idx].used
                && self.slots[idx].state == ThreadState::Finished
                && self.current != Some(idx)
            {
                self.free_slot(idx);
            }
        }

        match self.current {
            None => match self.first_ready() {
                Some(idx) => {
                    self.slots[idx].state = ThreadState::Running;
                    self.current = Some(idx);
                    if !self.main_saved {
                        self.main_saved = true;
                        let old_ptr = &mut self.main_ctx as *mut Context;
                        let new_ptr = &self.slots[idx].ctx as *const Context;
                        Switch::Pair {
                            old: old_ptr,
                            new: new_ptr,
                        }
                    } else {
                        let new_ptr = &self.slots[idx].ctx as *const Context;
                        Switch::Scratch { new: new_ptr }
                    }
                }
                None => Switch::None,
            },
            Some(cur) => {
                // A tick can only observe a Finished current slot if the
                // host was resumed without the slot being cleaned up
                if self.slots[cur].state == ThreadState::Finished {
                    let old_ptr = &mut self.slots[cur].ctx as *mut Context;
                    self.free_slot(cur);
                    self.current = None;
                    if self.main_saved {
                        self.main_saved = false;
                        let new_ptr = &self.main_ctx as *const Context;
                        Switch::Pair {
                            old: old_ptr,
                            new: new_ptr,
                        }
                    } else {
                        Switch::None
                    }
                } else {
                    Switch::None
                }
            }
        }
    }

    fn plan_exit(&mut self, cur: usize) -> Switch {
        self.slots[cur].state = ThreadState::Finished;
        match self.next_ready_after(Some(cur)) {
            Some(next) => {
                self.slots[next].state = ThreadState::Running;
                self.current = Some(next);
                let old_ptr = &mut self.slots[cur].ctx as *mut Context;
                let new_ptr = &self.slots[next].ctx as *const Context;
                Switch::Pair {
                    old: old_ptr,
                    new: new_ptr,
                }
            }
            None => {
                self.current = None;
                if self.main_saved {
                    self.main_saved = false;
                    let old_ptr = &mut self.slots[cur].ctx as *mut Context;
                    let new_ptr = &self.main_ctx as *const Context;
                    Switch::Pair {
                        old: old_ptr,
                        new: new_ptr,
                    }
                } else {
                    Switch::None
                }
            }
        }
    }
}

static SCHED: Spinlock<Scheduler> = Spinlock::new(Scheduler::new());

/// Ticks elapsed since boot (one per [`sched_tick`] call).
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Perform a planned switch. The scheduler lock must already be released.
///
/// SAFETY: single core, no interrupts. The pointers target the static
/// scheduler tables (or the caller's stack for scratch saves) and stay
/// valid across the switch; nobody mutates a suspended context until it
/// is switched back in.
fn perform(switch: Switch) {
    match switch {
        Switch::None => {}
        Switch::Pair { old, new } => unsafe { switch_context(old, new) },
        Switch::Scratch { new } => {
            let mut scratch = Context::zero();
            unsafe { switch_context(&mut scratch, new) }
        }
    }
}

// ============================================================================
// Public contract
// ============================================================================

/// Create a thread. The entry function runs with `arg` the first time the
/// scheduler elects the new thread; returning from it ends the thread.
pub fn spawn(entry: ThreadFn, arg: usize, name: &str) -> Result<Tid, ThreadError> {
    let mut sched = SCHED.lock();
    let idx = sched
        .slots
        .iter()
        .position(|s| !s.used)
        .ok_or(ThreadError::TableFull)?;

    let id = Tid(sched.next_tid);
    sched.next_tid += 1;

    let slot = &mut sched.slots[idx];
    slot.used = true;
    slot.id = id;
    slot.state = ThreadState::Ready;
    slot.sleep_ticks = 0;
    slot.name.clear();
    for ch in name.chars() {
        if slot.name.push(ch).is_err() {
            break;
        }
    }

    // First restore lands in the trampoline with entry/arg in x19/x20
    slot.ctx = Context::zero();
    slot.ctx.x19 = entry as usize as u64;
    slot.ctx.x20 = arg as u64;
    slot.ctx.x30 = thread_start as usize as u64;
    slot.ctx.sp = stack_top(idx);

    Ok(id)
}

/// Give up the CPU. Rotates to the next ready thread after the caller's
/// slot; with no other ready thread, control returns to the host if it is
/// suspended, otherwise the call returns immediately.
pub fn yield_now() {
    let switch = SCHED.lock().plan_yield();
    perform(switch);
}

/// Sleep for `ticks` scheduler ticks. `ticks <= 0` degenerates to
/// [`yield_now`]. From the host context a positive sleep is a no-op.
pub fn sleep(ticks: i32) {
    if ticks <= 0 {
        yield_now();
        return;
    }
    {
        let mut sched = SCHED.lock();
        let Some(cur) = sched.current else { return };
        sched.slots[cur].state = ThreadState::Sleeping;
        sched.slots[cur].sleep_ticks = ticks as u32;
    }
    yield_now();
}

/// One scheduler tick, called by the host loop while the UART is idle.
/// Wakes expired sleepers, reaps finished slots, and if no thread is
/// running elects the first ready one and switches into it. Returns once
/// control comes back to the host.
///
/// Deliberately not inlined: the host context is saved inside the switch
/// below, and its return address must point into this frame, which stays
/// live on the host stack until the host is resumed.
#[inline(never)]
pub fn sched_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let switch = SCHED.lock().plan_tick();
    perform(switch);
}

/// Ticks elapsed since boot.
pub fn tick_count() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Remove a thread outright. The victim's stack is forgotten and any
/// locks it holds stay locked; this is a blunt diagnostic tool, not a
/// cancellation mechanism.
pub fn kill(tid: Tid) -> Result<(), ThreadError> {
    let mut sched = SCHED.lock();
    let idx = sched.find(tid).ok_or(ThreadError::NoSuchThread)?;
    sched.free_slot(idx);
    if sched.current == Some(idx) {
        sched.current = None;
    }
    Ok(())
}

/// Exit path for the running thread. Reached when an entry function
/// returns (via the trampoline) or when a thread ends itself early.
#[unsafe(no_mangle)]
pub extern "C" fn thread_exit() -> ! {
    let switch = {
        let mut sched = SCHED.lock();
        match sched.current {
            Some(cur) => sched.plan_exit(cur),
            None => {
                drop(sched);
                log::error!("thread_exit with no current thread");
                boot::park();
            }
        }
    };
    match switch {
        Switch::None => {
            // No ready thread and no suspended host: nothing left to run
            log::info!("last thread exited, parking");
            boot::park();
        }
        other => {
            perform(other);
            // The finished context must never be restored
            log::error!("finished thread was resumed");
            boot::park();
        }
    }
}

/// Id of the running thread, `None` in the host context.
pub fn current_tid() -> Option<Tid> {
    let sched = SCHED.lock();
    sched.current.map(|i| sched.slots[i].id)
}

/// State of a live thread, `None` if the id is unknown.
pub fn state_of(tid: Tid) -> Option<ThreadState> {
    let sched = SCHED.lock();
    sched.find(tid).map(|i| sched.slots[i].state)
}

/// Number of occupied thread slots (any state).
pub fn active_threads() -> usize {
    SCHED.lock().slots.iter().filter(|s| s.used).count()
}

struct PsLine {
    id: Tid,
    name: String<THREAD_NAME_LEN>,
    state: ThreadState,
    sleep_ticks: u32,
}

/// Print the thread table on the console (the shell `ps` command).
pub fn ps() {
    let lines: Vec<PsLine, MAX_THREADS> = {
        let sched = SCHED.lock();
        sched
            .slots
            .iter()
            .filter(|s| s.used)
            .map(|s| PsLine {
                id: s.id,
                name: s.name.clone(),
                state: s.state,
                sleep_ticks: s.sleep_ticks,
            })
            .collect()
    };

    crate::println!("threads:");
    for line in &lines {
        crate::print!(
            " id:{} name:{} state:{}",
            line.id,
            line.name,
            line.state.label()
        );
        if line.state == ThreadState::Sleeping {
            crate::print!(" ticks:{}", line.sleep_ticks);
        }
        crate::println!();
    }
}
