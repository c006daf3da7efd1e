// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Request Packet engine (C8): create/fill/send/finalize, per-device RP
//! queues with the "at most one in-flight" policy, and cooperative
//! cancellation.
//!
//! An RP's payload is a tagged union over the inner operation codes listed
//! in §4.7; we model that directly as a Rust enum (`RpPayload`) rather than
//! the C-style `{code, union}` pair the source used, since nothing here
//! needs to interpret the bytes without already knowing the tag.

use alloc::boxed::Box;
use alloc::collections::VecDeque;

pub use abi::RpCode;
use abi::{DiskControlOp, FilesystemControlOp, Status, StorageControlOp, TaskId, TerminalControlOp};

use crate::device::DeviceId;

ringbuf!(RP_RINGBUF, RpEvent, 32, RpEvent::Idle);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RpEvent {
    Idle,
    Finalized(DeviceId, Status),
    Queued(DeviceId),
    Cancelled(DeviceId),
    DoubleFinalize(DeviceId),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u32);

/// Tagged-union payload, one variant per RP code. `Ioctl` carries the three
/// control-op families from §4.7 as nested enums rather than flattening them,
/// since a driver dispatches on `RpCode` first and only then needs to know
/// which control op it's holding.
pub enum RpPayload {
    Open { path: alloc::string::String, flags: abi::OpenFlags, mode: abi::OpenMode },
    Close,
    Read { offset: u64, len: usize, buf: Box<[u8]> },
    Write { offset: u64, buf: Box<[u8]> },
    DiskControl(DiskControlOp),
    StorageControl(StorageControlOp),
    FilesystemControl(FilesystemControlOp),
    TerminalControl(TerminalControlOp),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RpLifecycle {
    Filled,
    Queued,
    InFlight,
    Finalized,
}

type CompletionFn = fn(&mut Rp);
type CancelFn = fn(&mut Rp);

/// A single in-flight (or about-to-be) unit of I/O work. Caller-allocated,
/// per §3: this crate never frees one on the caller's behalf.
pub struct Rp {
    pub code: RpCode,
    pub status: Status,
    pub device: DeviceId,
    pub payload: Option<RpPayload>,
    lifecycle: RpLifecycle,
    completion: Option<CompletionFn>,
    cancel: Option<CancelFn>,
    /// Task parked in `wait_for_completion`, if any.
    waiter: Option<TaskId>,

    /// `FS_GET_NODE`/`FS_GET_NODE_CHILDREN` exchange a detached node (or a
    /// list of them) by value rather than by wire-format bytes — this is an
    /// in-kernel pointer handoff between the VFS and a filesystem driver, not
    /// a user-facing ABI payload, so it rides alongside `payload` in its own
    /// field instead of being shoehorned into the tagged union.
    pub fs_node_request: Option<crate::vfs::FsNodeRequest>,
    pub fs_node_result: Option<crate::vfs::FsNodeResult>,
    pub fs_children_result: Option<alloc::vec::Vec<crate::vfs::FsNodeResult>>,
}

impl Rp {
    pub fn new(code: RpCode, device: DeviceId) -> Self {
        Rp {
            code,
            status: Status::Ok,
            device,
            payload: None,
            lifecycle: RpLifecycle::Filled,
            completion: None,
            cancel: None,
            waiter: None,
            fs_node_request: None,
            fs_node_result: None,
            fs_children_result: None,
        }
    }

    pub fn fill(&mut self, payload: RpPayload) {
        self.payload = Some(payload);
    }

    pub fn set_completion(&mut self, f: CompletionFn) {
        self.completion = Some(f);
    }

    pub fn set_cancel(&mut self, f: CancelFn) {
        self.cancel = Some(f);
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.lifecycle, RpLifecycle::Finalized)
    }

    /// Marks the calling task as waiting on this RP's completion. The
    /// scheduler-side transition (RUNNING -> WAITING, yield) is the caller's
    /// job; this just records who to wake.
    pub fn wait_for_completion(&mut self, task: TaskId) {
        self.waiter = Some(task);
    }

    /// Finalizes the RP: marks it finalized, runs the completion callback if
    /// any, and returns the waiter (if any) that the scheduler should move
    /// back to READY. Double-finalize is a fatal bug (testable property 6).
    pub fn finalize(&mut self) -> Option<TaskId> {
        if self.is_finalized() {
            ringbuf_entry!(RP_RINGBUF, RpEvent::DoubleFinalize(self.device));
            crate::fail::die(abi::PanicCode::UnexpectedFault, "RP finalized twice");
        }
        self.lifecycle = RpLifecycle::Finalized;
        ringbuf_entry!(RP_RINGBUF, RpEvent::Finalized(self.device, self.status));
        if let Some(f) = self.completion {
            f(self);
        }
        self.waiter.take()
    }
}

/// A per-device RP queue: FIFO within the queue, at most one RP in flight
/// unless the driver marks the queue re-entrant (§4.7).
pub struct RpQueue {
    pending: VecDeque<Rp>,
    in_flight: bool,
    reentrant: bool,
}

impl RpQueue {
    pub const fn new(reentrant: bool) -> Self {
        RpQueue {
            pending: VecDeque::new(),
            in_flight: false,
            reentrant,
        }
    }

    /// §4.7 `startRp`: enqueues `rp` and, if nothing is currently in flight
    /// (or the queue is re-entrant), lets the caller know it should invoke
    /// the driver-provided `initiator` immediately by returning `true`.
    pub fn start(&mut self, rp: Rp) -> bool {
        let should_start = self.reentrant || !self.in_flight;
        self.pending.push_back(rp);
        if should_start {
            self.in_flight = true;
            ringbuf_entry!(RP_RINGBUF, RpEvent::Queued(self.pending.back().unwrap().device));
        }
        should_start
    }

    /// Called once the in-flight head RP finalizes. Drops it from the queue
    /// and reports whether there's a next RP the caller must start (by
    /// invoking its `initiator`), per "finalize of the head is immediately
    /// followed by initiator call for the next" (testable property 3).
    pub fn advance(&mut self) -> Option<&mut Rp> {
        let popped = matches!(self.pending.front(), Some(front) if front.is_finalized());
        if popped {
            self.pending.pop_front();
        }
        if self.pending.is_empty() {
            self.in_flight = false;
            return None;
        }
        if self.reentrant {
            // Every entry already started at enqueue time; nothing left to kick.
            return None;
        }
        if !popped {
            // The head hasn't finalized yet; the one in-flight slot is still occupied.
            return None;
        }
        self.in_flight = true;
        self.pending.front_mut()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Synchronous integration point used by [`crate::syscall`]: submits
    /// `rp` through this queue's admission policy and, if admitted,
    /// dispatches it via `dispatch` before handing it back by value.
    ///
    /// Queuing here is admission control, not custody — `Rp` is
    /// caller-allocated (§3) and every driver this kernel loads finalizes
    /// inside `dispatch` itself, so `pending` is always empty again by the
    /// time this call returns. A driver that left `rp` unfinalized would
    /// instead see the *next* `dispatch_sync` on this queue rejected with
    /// `OutOfResources` until the stuck entry's own caller finalizes it.
    pub fn dispatch_sync(&mut self, rp: Rp, dispatch: impl FnOnce(&mut Rp) -> Status) -> Rp {
        let should_start = self.start(rp);
        let mut slot = self.pending.pop_back().expect("dispatch_sync just pushed this entry");
        if should_start {
            let status = dispatch(&mut slot);
            if !slot.is_finalized() {
                slot.status = status;
                slot.finalize();
            }
        } else {
            slot.status = Status::OutOfResources;
            if !slot.is_finalized() {
                slot.finalize();
            }
        }
        if self.pending.is_empty() {
            self.in_flight = false;
        }
        slot
    }

    /// §4.7 cancellation: invokes the registered `cancelCallback` under the
    /// queue's lock (the caller is expected to hold `ObjectHeader::lock` on
    /// the owning device around this call — this function only runs the
    /// driver hook). Returns `CancelNotSupported` if the RP never registered
    /// one.
    pub fn cancel(&mut self, index: usize) -> Status {
        match self.pending.get_mut(index) {
            Some(rp) => match rp.cancel {
                Some(f) => {
                    f(rp);
                    ringbuf_entry!(RP_RINGBUF, RpEvent::Cancelled(rp.device));
                    Status::Ok
                }
                None => Status::CancelNotSupported,
            },
            None => Status::NullPointer,
        }
    }
}
