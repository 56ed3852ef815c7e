use memory_addr::VirtAddr;

use crate::lockdown::{L1_GEOMETRY, L2_GEOMETRY};
use crate::state::VmState;
use crate::trustzone::{Par, World};

/// The interrupt controller capability consumed when injecting interrupts.
pub trait InterruptController {
    /// Whether `irq` is assigned to the secure world.
    fn secure(&self, irq: usize) -> bool;

    /// Raises `irq` so that the guest takes it once it runs again.
    fn trigger(&mut self, irq: usize);
}

/// A signal channel to the VMM.
pub trait SignalContext {
    /// Submits `count` signals.
    fn submit(&self, count: usize);
}

/// The interfaces which the underlying kernel must implement.
///
/// This is the only place where architecture-specific instructions are
/// reached. [`crate::arch`] provides the ARMv7 instruction sequences that
/// an implementation can forward to.
pub trait TzVmHal {
    /// The interrupt controller of the platform.
    type Pic: InterruptController;

    /// Returns the interrupt controller.
    fn pic(&mut self) -> &mut Self::Pic;

    /// Dispatches the pending host interrupt on `cpu_id` to its handler.
    fn irq_handler(&mut self, cpu_id: usize);

    /// Reads the data fault address register.
    fn read_fault_address(&self) -> usize;

    /// Translates `va` in the context of `world` and returns the raw result register.
    fn translate_va_to_pa(&mut self, va: VirtAddr, world: World) -> Par;

    /// Cleans and invalidates one data cache line, addressed by set/way.
    fn clean_invalidate_by_set_way(&mut self, set_way: u32);

    /// Cleans and invalidates the level 1 and level 2 data caches entirely.
    fn cache_clean_invalidate_all(&mut self) {
        for geometry in [L1_GEOMETRY, L2_GEOMETRY] {
            for set_way in geometry.set_way_operands() {
                self.clean_invalidate_by_set_way(set_way);
            }
        }
    }

    /// Issues a data synchronization barrier.
    fn data_sync_barrier(&mut self);

    /// Writes the cache lockdown register. Set bits lock the corresponding ways.
    fn cache_lockdown_write(&mut self, mask: u32);

    /// Stores `sentinel` to every byte of `[base, base + len)`.
    ///
    /// Only stores are issued so that lines are allocated on write.
    fn write_allocate(&mut self, base: VirtAddr, len: usize, sentinel: u8);

    /// Masks IRQ and FIQ on the current CPU and returns the previous state.
    fn irq_save_disable(&mut self) -> usize;

    /// Restores the interrupt mask returned by [`TzVmHal::irq_save_disable`].
    fn irq_restore(&mut self, flags: usize);

    /// Enters the guest context in `state`, using `stack_start` as the kernel stack.
    ///
    /// Real implementations do not return: the next time the kernel runs on
    /// behalf of this guest is through a trap.
    fn enter_normal_world(&mut self, state: *mut VmState, stack_start: usize);
}
