// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the portable core and the out-of-scope architecture
//! layer (GDT/IDT/paging setup, context-switch assembly, I/O-port helpers).
//!
//! This plays the same role as the teacher's `arch::SavedState` /
//! `ArchState` split: the core is written once against these traits, and a
//! concrete x86 implementation (not part of this crate) supplies them.

/// Backs the object-header spinlock's "disable interrupts, remember how"
/// step. A concrete implementation on real hardware is a thin wrapper around
/// `pushfd`/`cli`/`popfd`; it is out of scope here.
pub trait InterruptControl {
    /// Disables interrupts on the calling core and returns an opaque token
    /// that must be passed back to `restore` to undo exactly this disable.
    fn disable_save() -> u32;

    /// Restores the interrupt state captured by a matching `disable_save`.
    ///
    /// # Safety
    /// `saved` must be a token produced by a `disable_save` call that has not
    /// already been restored; restoring out of order can re-enable
    /// interrupts inside someone else's critical section.
    unsafe fn restore(saved: u32);
}

/// Backs timestamps consumed by the RP/DPC/scheduler code, without requiring
/// a concrete PIT/TSC/APIC-timer driver to exist in this crate.
pub trait TickSource {
    /// Monotonic tick count since boot. The tick's duration is a platform
    /// policy the core does not need to know.
    fn now_ticks() -> u64;
}

/// Backs the actual CPU context switch. The scheduler calls through this
/// once it has picked a task; everything about *how* registers are restored
/// is out of scope for the core.
pub trait ContextSwitch {
    fn switch_to(tcb_id: abi::TaskId) -> !;
}
