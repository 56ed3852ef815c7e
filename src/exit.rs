use memory_addr::VirtAddr;

use crate::state::{CpuException, VmState};

/// The value of `r0` that selects the cache lockdown hypercall.
pub const HYPERCALL_CACHE_LOCK: usize = 4;

/// A hypercall request decoded from the guest registers.
///
/// Registers are read once, when the request is decoded, and never again
/// while it is serviced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hypercall {
    /// Pin the page range starting at `va` into the cache ways in `way_mask`.
    CacheLock {
        /// Guest virtual address of the range (`r1`).
        va: VirtAddr,
        /// Way selector (`r2`). Set bits are locked once the range is loaded.
        way_mask: u32,
        /// Length of the range in bytes (`r3`).
        len: usize,
    },
}

impl Hypercall {
    /// Decodes the hypercall held in `r0`..`r3`, if any.
    pub fn decode(state: &VmState) -> Option<Self> {
        match state.gpr(0) {
            HYPERCALL_CACHE_LOCK => Some(Self::CacheLock {
                va: VirtAddr::from(state.gpr(1)),
                way_mask: state.gpr(2) as u32,
                len: state.gpr(3),
            }),
            _ => None,
        }
    }
}

/// The reason the guest stopped and control returned to the kernel.
#[derive(Debug, PartialEq, Eq)]
pub enum TzVmExitReason {
    /// A host IRQ or FIQ arrived while the guest was running.
    ///
    /// The guest is unaffected and resumes transparently.
    HostInterrupt {
        /// Whether it was a fast interrupt.
        fast: bool,
    },
    /// The guest faulted on a data access.
    DataAbort {
        /// The value of the data fault address register.
        fault_addr: usize,
        /// The decoded hypercall request, serviced like any other trap.
        hypercall: Option<Hypercall>,
    },
    /// Any other trap, with the hypercall it carries, if any.
    ///
    /// `cause` is `None` for exception codes this kernel does not know.
    Trap {
        /// The decoded exception cause.
        cause: Option<CpuException>,
        /// The decoded hypercall request.
        hypercall: Option<Hypercall>,
    },
}

/// What the dispatcher does after handling an exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapAction {
    /// Keep the job scheduled, the guest continues where it stopped.
    Resume,
    /// Remove the job from scheduling and signal the VMM.
    PauseAndNotify,
}
