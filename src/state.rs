/// Exception causes recorded by the monitor in [`VmState::cpu_exception`].
///
/// The numeric values are part of the control block contract with the VMM.
#[repr(usize)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuException {
    /// Reset.
    Reset = 1,
    /// Undefined instruction.
    UndefinedInstruction = 2,
    /// Supervisor call (`svc`/`smc` forwarded by the monitor).
    SupervisorCall = 3,
    /// Prefetch abort.
    PrefetchAbort = 4,
    /// Data abort. The fault address is captured into [`VmState::dfar`].
    DataAbort = 5,
    /// Host IRQ latched while the guest was running.
    InterruptRequest = 6,
    /// Host FIQ latched while the guest was running.
    FastInterruptRequest = 7,
}

impl CpuException {
    /// Decodes a raw exception code. Unknown codes yield `None`.
    pub const fn from_raw(raw: usize) -> Option<Self> {
        Some(match raw {
            1 => Self::Reset,
            2 => Self::UndefinedInstruction,
            3 => Self::SupervisorCall,
            4 => Self::PrefetchAbort,
            5 => Self::DataAbort,
            6 => Self::InterruptRequest,
            7 => Self::FastInterruptRequest,
            _ => return None,
        })
    }

    /// Whether this cause is a host interrupt that the guest never sees.
    pub const fn is_interrupt(self) -> bool {
        matches!(self, Self::InterruptRequest | Self::FastInterruptRequest)
    }
}

/// The control block of a guest VM.
///
/// It is allocated by the VMM and shared with it, so the layout is fixed:
/// one machine word per field, in declaration order. The monitor saves the
/// guest context into the leading fields on every trap and restores it from
/// them on [`crate::TzVmHal::enter_normal_world`].
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmState {
    /// General purpose registers `r0`..`r12`.
    pub r: [usize; 13],
    /// Banked stack pointer.
    pub sp: usize,
    /// Banked link register.
    pub lr: usize,
    /// Guest program counter.
    pub ip: usize,
    /// Saved program status.
    pub cpsr: usize,
    /// Raw [`CpuException`] code of the last trap.
    pub cpu_exception: usize,
    /// Data fault address, valid after a data abort.
    pub dfar: usize,
    /// IRQ id to inject on the next resume, `0` if none.
    pub irq_injection: usize,
}

impl VmState {
    /// Creates a zeroed control block.
    pub const fn new() -> Self {
        Self {
            r: [0; 13],
            sp: 0,
            lr: 0,
            ip: 0,
            cpsr: 0,
            cpu_exception: 0,
            dfar: 0,
            irq_injection: 0,
        }
    }

    /// The decoded cause of the last trap.
    pub const fn exception(&self) -> Option<CpuException> {
        CpuException::from_raw(self.cpu_exception)
    }

    /// Reads general purpose register `r<idx>`.
    pub fn gpr(&self, idx: usize) -> usize {
        self.r[idx]
    }
}
