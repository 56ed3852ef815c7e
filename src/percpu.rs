use axerrno::{ax_err, AxResult};

use crate::state::VmState;

/// Host per-CPU state needed to run a guest.
///
/// Recommended usage:
/// - Define a per-CPU state in the kernel:
///
///   ```ignore
///   #[percpu::def_percpu]
///   pub static TZVM_PER_CPU: TzPerCpu = TzPerCpu::new_uninit();
///   ```
///
/// - Then initialize it on each CPU during boot, once the kernel stack is known:
///
///   ```ignore
///   let percpu = unsafe { TZVM_PER_CPU.current_ref_mut_raw() };
///   percpu.init(cpu_id, stack_top).expect("Failed to initialize percpu state");
///   ```
#[derive(Debug)]
pub struct TzPerCpu {
    /// The id of the CPU. It's also used to check whether the per-CPU state is initialized.
    cpu_id: Option<usize>,
    /// Top of the kernel stack the monitor switches to on a trap.
    stack_start: usize,
}

impl TzPerCpu {
    /// Create a new, uninitialized per-CPU state.
    pub const fn new_uninit() -> Self {
        Self {
            cpu_id: None,
            stack_start: 0,
        }
    }

    /// Initialize the per-CPU state.
    pub fn init(&mut self, cpu_id: usize, stack_start: usize) -> AxResult {
        if self.cpu_id.is_some() {
            ax_err!(BadState, "per-CPU state is already initialized")
        } else {
            self.cpu_id = Some(cpu_id);
            self.stack_start = stack_start;
            Ok(())
        }
    }

    /// Whether [`TzPerCpu::init`] has been called.
    pub fn is_initialized(&self) -> bool {
        self.cpu_id.is_some()
    }

    /// The id of this CPU. Panics if the per-CPU state is not initialized.
    pub fn id(&self) -> usize {
        match self.cpu_id {
            Some(id) => id,
            None => panic!("per-CPU state is not initialized"),
        }
    }

    /// Top of the kernel stack of this CPU. Panics if the per-CPU state is not initialized.
    pub fn stack_start(&self) -> usize {
        assert!(self.cpu_id.is_some(), "per-CPU state is not initialized");
        self.stack_start
    }
}

/// The job that last entered the guest on a CPU, and its control block.
///
/// The control block identifies the job: unlike the job itself it never moves.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CurrentVm {
    pub job: *mut u8,
    pub vm_state: *mut VmState,
}

#[percpu::def_percpu]
static mut CURRENT_VM: Option<CurrentVm> = None;

/// Get the job that last entered the guest on the current physical CPU.
pub(crate) fn current_vm() -> Option<CurrentVm> {
    unsafe { CURRENT_VM.current_ref_raw().as_ref().copied() }
}

/// Set the current VM on the current physical CPU.
///
/// # Safety
/// `vm.job` must stay valid until it is cleared with [`clear_current_vm`].
pub(crate) unsafe fn set_current_vm(vm: CurrentVm) {
    CURRENT_VM.current_ref_mut_raw().replace(vm);
}

/// Clear the current VM on the current physical CPU.
///
/// # Safety
/// Must not race with a trap being dispatched on this CPU.
pub(crate) unsafe fn clear_current_vm() {
    CURRENT_VM.current_ref_mut_raw().take();
}
