//! Boot code for AArch64
//!
//! Early boot sequence for the QEMU virt machine:
//! 1. Mask interrupts and enable FPU/SIMD access
//! 2. Install the boot stack
//! 3. Zero .bss
//! 4. Continue to `rust_start`
//!
//! The kernel runs at EL1 with the MMU off; QEMU loads the raw image at
//! 0x40080000 (see kernel.ld).

use core::arch::global_asm;

global_asm!(
    r#"
.section .text._boot
.global _boot

_boot:
    // No interrupt sources are consumed by this kernel; keep them masked
    msr daifset, #0xf

    // Enable FPU/SIMD (the compiler may emit NEON for memcpy and friends)
    mov x0, #(3 << 20)
    msr cpacr_el1, x0
    isb

    // Boot stack, provided by the linker script
    ldr x0, =__stack_top
    mov sp, x0

    // Zero .bss
    ldr x0, =__bss_start
    ldr x1, =__bss_end
1:  cmp x0, x1
    b.hs 2f
    str xzr, [x0], #8
    b 1b

2:  bl rust_start

    // rust_start does not return
hang:
    wfe
    b hang
"#
);

/// Halt the core forever. The terminal state for `stop` and for fatal
/// scheduler conditions.
pub fn park() -> ! {
    loop {
        unsafe { core::arch::asm!("wfi") };
    }
}
