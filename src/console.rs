//! PL011 UART console
//!
//! Byte-level MMIO driver for the single UART on the QEMU virt machine,
//! plus the `print!`/`println!` macros and a small transcript ring that
//! records recent output for diagnostics and the self-tests.

use spinning_top::Spinlock;

use crate::config::CONSOLE_RING_SIZE;

const UART0_BASE: usize = 0x0900_0000;
const UART0_DR: *mut u8 = UART0_BASE as *mut u8; // Data register (offset 0x00)
const UART0_FR: *const u32 = (UART0_BASE + 0x18) as *const u32; // Flag register (offset 0x18)
const RXFE: u32 = 1 << 4; // Receive FIFO empty
const TXFF: u32 = 1 << 5; // Transmit FIFO full

fn tx_byte(c: u8) {
    unsafe {
        while UART0_FR.read_volatile() & TXFF != 0 {}
        UART0_DR.write_volatile(c);
    }
}

/// Write one byte, blocking until the transmitter accepts it.
/// `'\n'` is emitted as CR+LF.
pub fn putc(c: u8) {
    ring_record(c);
    if c == b'\n' {
        tx_byte(b'\r');
    }
    tx_byte(c);
}

/// Non-blocking poll for pending input.
pub fn has_char() -> bool {
    unsafe { UART0_FR.read_volatile() & RXFE == 0 }
}

/// Blocking read of one byte.
pub fn getc() -> u8 {
    while !has_char() {}
    unsafe { UART0_DR.read_volatile() }
}

pub fn print(s: &str) {
    for c in s.bytes() {
        putc(c);
    }
}

/// Zero-sized `fmt::Write` adapter for the print macros.
pub struct Uart;

impl core::fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        print(s);
        Ok(())
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = core::write!($crate::console::Uart, $($arg)*);
    });
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}

// ============================================================================
// Transcript ring
// ============================================================================

/// Fixed ring of recent console output. `written` counts every byte ever
/// recorded, so a caller can mark a position and later collect the bytes
/// emitted since the mark. Stores the logical stream (before CR+LF
/// translation).
struct TranscriptRing {
    buf: [u8; CONSOLE_RING_SIZE],
    written: u64,
}

static RING: Spinlock<TranscriptRing> = Spinlock::new(TranscriptRing {
    buf: [0; CONSOLE_RING_SIZE],
    written: 0,
});

fn ring_record(c: u8) {
    let mut ring = RING.lock();
    let at = (ring.written % CONSOLE_RING_SIZE as u64) as usize;
    ring.buf[at] = c;
    ring.written += 1;
}

/// Current position of the transcript cursor.
pub fn ring_mark() -> u64 {
    RING.lock().written
}

/// Copy the bytes recorded since `mark` into `out`, returning the count.
/// Bytes older than the ring capacity are lost; the copy is clamped to
/// both the ring and `out`.
pub fn ring_since(mark: u64, out: &mut [u8]) -> usize {
    let ring = RING.lock();
    let lost_before = ring.written.saturating_sub(CONSOLE_RING_SIZE as u64);
    let start = mark.max(lost_before);
    let avail = (ring.written - start) as usize;
    let n = avail.min(out.len());
    for (i, slot) in out.iter_mut().enumerate().take(n) {
        let pos = ((start + i as u64) % CONSOLE_RING_SIZE as u64) as usize;
        *slot = ring.buf[pos];
    }
    n
}
