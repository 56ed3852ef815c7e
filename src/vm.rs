use core::ptr::NonNull;

use axerrno::{ax_err, AxResult};

use crate::exit::{Hypercall, TrapAction, TzVmExitReason};
use crate::hal::{InterruptController, SignalContext, TzVmHal};
use crate::lockdown;
use crate::percpu::{self, CurrentVm, TzPerCpu};
use crate::state::{CpuException, VmState};
use crate::trustzone::TrustZoneLayout;

/// Scheduling priority of a CPU job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpuPriority(pub u8);

impl CpuPriority {
    /// The lowest priority. Guests only run when nothing else is ready.
    pub const MIN: Self = Self(0);
}

/// The state of a VM job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmJobState {
    /// An invalid state.
    Invalid = 0,
    /// The job is scheduled and will enter the guest when picked.
    Ready = 1,
    /// The guest is executing.
    Running = 2,
    /// The job waits for the VMM to inspect the control block and resume it.
    Paused = 3,
}

/// Creation parameters of a [`TzVm`].
#[derive(Clone, Copy, Debug)]
pub struct TzVmConfig {
    /// The CPU the job is pinned to.
    pub cpu_id: usize,
    /// Memory layout used to authorize lockdown requests.
    pub layout: TrustZoneLayout,
}

impl Default for TzVmConfig {
    fn default() -> Self {
        Self {
            cpu_id: 0,
            layout: TrustZoneLayout::PLATFORM,
        }
    }
}

/// The constant part of `TzVm`.
struct TzVmInnerConst {
    /// The CPU this job runs on. Never changes.
    cpu_id: usize,
    priority: CpuPriority,
    layout: TrustZoneLayout,
}

/// A guest VM running in the non-secure world, scheduled as a CPU job.
///
/// The job handles the traps of its guest ([`TzVm::exception`]) and enters it
/// again ([`TzVm::proceed`]). The control block is owned by the VMM, which
/// is notified through `S` whenever the guest stops for a reason other than
/// a host interrupt.
///
/// Once [`TzVm::run`] has been called, the job must not be moved until the
/// next trap has been dispatched: the CPU keeps a pointer to it.
pub struct TzVm<H: TzVmHal, S: SignalContext> {
    inner_const: TzVmInnerConst,
    state: VmJobState,
    vm_state: NonNull<VmState>,
    context: S,
    hal: H,
}

impl<H: TzVmHal, S: SignalContext> TzVm<H, S> {
    /// Create a new [`TzVm`] on the control block `vm_state`.
    ///
    /// The job is ready to run at [`CpuPriority::MIN`] on `config.cpu_id`.
    ///
    /// # Safety
    /// `vm_state` must stay valid for the whole lifetime of the job. It is
    /// never freed by the job.
    pub unsafe fn new(vm_state: NonNull<VmState>, context: S, hal: H, config: TzVmConfig) -> Self {
        debug!("vm job created on cpu {}", config.cpu_id);
        Self {
            inner_const: TzVmInnerConst {
                cpu_id: config.cpu_id,
                priority: CpuPriority::MIN,
                layout: config.layout,
            },
            state: VmJobState::Ready,
            vm_state,
            context,
            hal,
        }
    }

    /// Tear the job down. The control block is left to the VMM.
    pub fn destroy(self) {
        debug!("vm job on cpu {} destroyed", self.inner_const.cpu_id);
    }

    /// Get the id of the CPU the job is pinned to.
    pub const fn cpu_id(&self) -> usize {
        self.inner_const.cpu_id
    }

    /// Get the scheduling priority of the job.
    pub const fn priority(&self) -> CpuPriority {
        self.inner_const.priority
    }

    /// Get the memory layout lockdown requests are checked against.
    pub const fn layout(&self) -> &TrustZoneLayout {
        &self.inner_const.layout
    }

    /// Get the state of the job.
    pub fn state(&self) -> VmJobState {
        self.state
    }

    /// Whether the scheduler may pick this job.
    pub fn is_runnable(&self) -> bool {
        self.state == VmJobState::Ready
    }

    /// Get the control block.
    pub fn vm_state(&self) -> &VmState {
        unsafe { self.vm_state.as_ref() }
    }

    fn vm_state_mut(&mut self) -> &mut VmState {
        unsafe { self.vm_state.as_mut() }
    }

    /// Get the hardware abstraction layer mutably.
    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    /// Execute a block with the state of the job transitioned from `from` to `to`. If the current state is not `from`, return an error.
    ///
    /// The state will be set to [`VmJobState::Invalid`] if an error occurs (including the case that the current state is not `from`).
    pub fn with_state_transition<F, T>(&mut self, from: VmJobState, to: VmJobState, f: F) -> AxResult<T>
    where
        F: FnOnce(&mut Self) -> AxResult<T>,
    {
        if self.state != from {
            let actual = self.state;
            self.state = VmJobState::Invalid;
            warn!("vm job state is not {:?}, but {:?}", from, actual);
            ax_err!(BadState, "unexpected vm job state")
        } else {
            let result = f(self);
            self.state = if result.is_err() {
                VmJobState::Invalid
            } else {
                to
            };
            result
        }
    }

    /// Transition the state of the job. If the current state is not `from`, return an error.
    pub fn transition_state(&mut self, from: VmJobState, to: VmJobState) -> AxResult {
        self.with_state_transition(from, to, |_| Ok(()))
    }

    /// Put a paused job back on the scheduler. Called once the VMM has
    /// handled the notification.
    ///
    /// A job that is already scheduled or inside the guest is left as is.
    pub fn resume(&mut self) -> AxResult {
        match self.state {
            VmJobState::Ready | VmJobState::Running => {
                debug!("vm job is already {:?}, nothing to resume", self.state);
                Ok(())
            }
            _ => self.transition_state(VmJobState::Paused, VmJobState::Ready),
        }
    }

    /// Remove the job from scheduling until [`TzVm::resume`].
    fn pause(&mut self) {
        if self.state == VmJobState::Invalid {
            warn!("pausing a vm job in invalid state");
        }
        self.state = VmJobState::Paused;
    }

    /// Decode why the guest stopped.
    pub fn classify(&self) -> TzVmExitReason {
        let state = self.vm_state();
        match state.exception() {
            Some(cause) if cause.is_interrupt() => TzVmExitReason::HostInterrupt {
                fast: cause == CpuException::FastInterruptRequest,
            },
            Some(CpuException::DataAbort) => TzVmExitReason::DataAbort {
                fault_addr: self.hal.read_fault_address(),
                hypercall: Hypercall::decode(state),
            },
            cause => TzVmExitReason::Trap {
                cause,
                hypercall: Hypercall::decode(state),
            },
        }
    }

    /// Handle a trap of the guest on `cpu`.
    ///
    /// Host interrupts are forwarded and the guest stays scheduled. Every
    /// other trap pauses the job, services a pending hypercall and signals
    /// the VMM exactly once.
    pub fn exception(&mut self, cpu: &TzPerCpu) -> TrapAction {
        if self.state == VmJobState::Running {
            self.state = VmJobState::Ready;
        }

        let reason = self.classify();
        trace!("vm trap on cpu {}: {:?}", cpu.id(), reason);
        match reason {
            TzVmExitReason::HostInterrupt { .. } => self.handle_host_interrupt(cpu.id()),
            TzVmExitReason::DataAbort {
                fault_addr,
                hypercall,
            } => {
                self.vm_state_mut().dfar = fault_addr;
                self.handle_trap(hypercall)
            }
            TzVmExitReason::Trap { hypercall, .. } => self.handle_trap(hypercall),
        }
    }

    fn handle_host_interrupt(&mut self, cpu_id: usize) -> TrapAction {
        self.hal.irq_handler(cpu_id);
        TrapAction::Resume
    }

    fn handle_trap(&mut self, hypercall: Option<Hypercall>) -> TrapAction {
        self.pause();
        if let Some(hypercall) = hypercall {
            self.handle_hypercall(hypercall);
        }
        self.context.submit(1);
        TrapAction::PauseAndNotify
    }

    fn handle_hypercall(&mut self, hypercall: Hypercall) {
        match hypercall {
            Hypercall::CacheLock { va, way_mask, len } => {
                let layout = self.inner_const.layout;
                if let Err(err) = lockdown::cache_lock(&mut self.hal, &layout, va, way_mask, len) {
                    warn!("cache lockdown of {:#x} refused: {:?}", va, err);
                }
            }
        }
    }

    /// Inject the pending interrupt of the control block, if any.
    ///
    /// Secure interrupts are never injected. A refused interrupt stays in
    /// the control block so the VMM can see that it was not delivered.
    fn inject_pending_irq(&mut self) {
        let irq = self.vm_state().irq_injection;
        if irq == 0 {
            return;
        }
        let pic = self.hal.pic();
        if pic.secure(irq) {
            warn!("refuse to inject secure IRQ {} into VM", irq);
        } else {
            pic.trigger(irq);
            self.vm_state_mut().irq_injection = 0;
        }
    }

    /// Inject the pending interrupt and enter the guest on `cpu`.
    ///
    /// Nothing happens if the job is not ready or `cpu` is not the one the
    /// job is pinned to.
    pub fn proceed(&mut self, cpu: &TzPerCpu) {
        if cpu.id() != self.inner_const.cpu_id {
            error!(
                "vm job of cpu {} must not run on cpu {}",
                self.inner_const.cpu_id,
                cpu.id()
            );
            return;
        }
        if self.state != VmJobState::Ready {
            error!("refuse to enter a vm job in state {:?}", self.state);
            return;
        }

        self.inject_pending_irq();
        self.state = VmJobState::Running;
        let vm_state = self.vm_state.as_ptr();
        self.hal.enter_normal_world(vm_state, cpu.stack_start());
    }

    /// Make this job the current one of `cpu` and enter the guest.
    ///
    /// The next trap on `cpu` can then be dispatched with [`handle_current_trap`].
    pub fn run(&mut self, cpu: &TzPerCpu) {
        unsafe {
            percpu::set_current_vm(CurrentVm {
                job: self as *mut Self as *mut u8,
                vm_state: self.vm_state.as_ptr(),
            });
        }
        self.proceed(cpu);
    }

    fn is_current(&self) -> bool {
        percpu::current_vm().is_some_and(|current| current.vm_state == self.vm_state.as_ptr())
    }
}

impl<H: TzVmHal, S: SignalContext> Drop for TzVm<H, S> {
    fn drop(&mut self) {
        if self.is_current() {
            unsafe {
                percpu::clear_current_vm();
            }
        }
    }
}

/// Get the job that last entered the guest on the current physical CPU.
///
/// # Safety
/// The current job must be a `TzVm<H, S>`, and no other reference to it may
/// be alive.
pub unsafe fn get_current_vm<'a, H: TzVmHal, S: SignalContext>() -> Option<&'a mut TzVm<H, S>> {
    percpu::current_vm().and_then(|current| (current.job as *mut TzVm<H, S>).as_mut())
}

/// Dispatch a trap of the guest that last entered on `cpu`.
///
/// This is the entry point of the monitor's exception vector. Returns `None`
/// if no job has entered a guest on this CPU.
///
/// # Safety
/// Same as [`get_current_vm`].
pub unsafe fn handle_current_trap<H: TzVmHal, S: SignalContext>(
    cpu: &TzPerCpu,
) -> Option<TrapAction> {
    get_current_vm::<H, S>().map(|vm| vm.exception(cpu))
}
