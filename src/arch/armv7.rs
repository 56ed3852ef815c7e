//! ARMv7-A with security extensions (Cortex-A8 class cores).

use core::arch::asm;

use memory_addr::VirtAddr;

use crate::state::VmState;
use crate::trustzone::{Par, World};

extern "C" {
    /// Switches to monitor mode, restores the guest context from `state` and
    /// returns to the non-secure world. `stack` is the kernel stack used on
    /// the next trap.
    fn monitor_mode_enter_normal_world(state: *mut VmState, stack: *mut u8) -> !;
}

/// Translates `va` with a stage 1 PL1 read translation of `world` and reads `PAR`.
pub fn translate_va_to_pa(va: VirtAddr, world: World) -> Par {
    let par: usize;
    unsafe {
        match world {
            // ATS1CPR
            World::Secure => asm!(
                "mcr p15, 0, {0}, c7, c8, 0",
                "isb",
                in(reg) va.as_usize(),
                options(nostack, preserves_flags)
            ),
            // ATS12NSOPR
            World::NonSecure => asm!(
                "mcr p15, 0, {0}, c7, c8, 4",
                "isb",
                in(reg) va.as_usize(),
                options(nostack, preserves_flags)
            ),
        }
        asm!("mrc p15, 0, {0}, c7, c4, 0", out(reg) par, options(nomem, nostack, preserves_flags));
    }
    Par(par)
}

/// Reads `DFAR`.
pub fn read_dfar() -> usize {
    let dfar: usize;
    unsafe {
        asm!("mrc p15, 0, {0}, c6, c0, 0", out(reg) dfar, options(nomem, nostack, preserves_flags));
    }
    dfar
}

/// `DCCISW`: clean and invalidate a data cache line by set/way.
pub fn clean_invalidate_by_set_way(set_way: u32) {
    unsafe {
        asm!("mcr p15, 0, {0}, c7, c14, 2", in(reg) set_way, options(nostack, preserves_flags));
    }
}

/// Full-system data synchronization barrier.
pub fn dsb() {
    unsafe {
        asm!("dsb", options(nostack, preserves_flags));
    }
}

/// Writes the L2 cache lockdown register.
pub fn l2_lockdown_write(mask: u32) {
    unsafe {
        asm!("mcr p15, 1, {0}, c9, c0, 0", in(reg) mask, options(nostack, preserves_flags));
    }
}

/// Stores `sentinel` to every byte of `[base, base + len)`, last byte first.
///
/// # Safety
/// The range must be mapped writable in the current address space.
pub unsafe fn write_allocate(base: VirtAddr, len: usize, sentinel: u8) {
    let base = base.as_usize() as *mut u8;
    for offset in (0..len).rev() {
        core::ptr::write_volatile(base.add(offset), sentinel);
    }
}

/// Masks IRQ and FIQ, returning the previous `CPSR`.
pub fn local_irq_save() -> usize {
    let cpsr: usize;
    unsafe {
        asm!("mrs {0}, cpsr", "cpsid if", out(reg) cpsr, options(nostack, preserves_flags));
    }
    cpsr
}

/// Restores the control bits of `CPSR` saved by [`local_irq_save`].
pub fn local_irq_restore(cpsr: usize) {
    unsafe {
        asm!("msr cpsr_c, {0}", in(reg) cpsr, options(nostack, preserves_flags));
    }
}

/// Enters the guest whose context is saved in `state`.
///
/// # Safety
/// `state` must be a valid control block and `stack_start` the top of this
/// CPU's kernel stack.
pub unsafe fn enter_normal_world(state: *mut VmState, stack_start: usize) -> ! {
    monitor_mode_enter_normal_world(state, stack_start as *mut u8)
}
