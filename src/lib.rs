// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TzVm - Kernel backend for a guest VM in the TrustZone normal world.
//!
//! This crate implements the trap-and-resume loop of a thin hypervisor that
//! runs one guest in the non-secure world of an ARM core. The kernel runs in
//! the secure world and regains control whenever the guest traps.
//!
//! # Features
//!
//! - Classification of guest exits (host interrupts, data aborts, other traps)
//! - Guest-requested cache lockdown, authorized against the non-secure RAM window
//! - Injection of pending non-secure interrupts and world switch into the guest
//! - VM job lifecycle pinned to one CPU at minimum priority
//!
//! # Limitations
//!
//! Lockdown sequences are serialized inside this crate only. Other code
//! maintaining the shared L2 cache by set/way concurrently is not excluded.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

// Core modules
pub mod arch; // Architecture-specific instruction sequences
mod exit; // Trap causes and hypercall decoding
mod hal; // Hardware abstraction layer interfaces
pub mod lockdown; // Cache lockdown protocol
mod percpu; // Per-CPU state management
mod state; // The control block shared with the VMM
mod trustzone; // Secure/non-secure memory layout
mod vm; // VM job implementation

// Public API exports
pub use exit::{Hypercall, TrapAction, TzVmExitReason, HYPERCALL_CACHE_LOCK};
pub use hal::{InterruptController, SignalContext, TzVmHal};
pub use percpu::TzPerCpu;
pub use state::{CpuException, VmState};
pub use trustzone::*;
pub use vm::*;
