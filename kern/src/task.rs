// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Task Control Block: identity, the scheduling state machine, the
//! two-level priority, and the per-task open-file table.
//!
//! A `Tcb` never decides *when* it runs — that's [`crate::sched::Scheduler`]'s
//! job. This module only owns the data and the legal state transitions, the
//! same split the teacher draws between `Task` (data + invariants) and the
//! scheduling functions that operate over a `&mut [Task]`.

use alloc::string::String;
use alloc::vec::Vec;

use abi::{MajorPriority, MinorPriority, Status, TaskId, TaskState};

/// A task's open-file table entry. `vfs::NodeId` is an opaque handle into the
/// VFS node arena; we don't embed a `&VfsNode` here because tasks can outlive
/// (or be outlived by) any particular node's cache lifetime.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OpenFile {
    pub node: crate::vfs::NodeId,
    pub device: crate::device::DeviceId,
    pub offset: u64,
}

/// Upper bound on a task's display name, matching the teacher's preference
/// for fixed-size identity fields over heap strings where the field is purely
/// cosmetic.
pub const MAX_NAME_LEN: usize = 32;

pub struct Tcb {
    pub id: TaskId,
    pub pid: u32,
    pub parent: Option<TaskId>,
    pub name: String,
    pub image_path: String,

    pub major_priority: MajorPriority,
    pub minor_priority: MinorPriority,
    state: TaskState,
    requested_state: Option<TaskState>,

    open_files: Vec<Option<OpenFile>>,
}

impl Tcb {
    pub fn new(id: TaskId, pid: u32, parent: Option<TaskId>, name: &str, image_path: &str) -> Self {
        let mut truncated = String::from(name);
        truncated.truncate(MAX_NAME_LEN);
        Tcb {
            id,
            pid,
            parent,
            name: truncated,
            image_path: String::from(image_path),
            major_priority: MajorPriority::default(),
            minor_priority: MinorPriority::default(),
            state: TaskState::Uninitialized,
            requested_state: None,
            open_files: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Ready)
    }

    /// Applies a state transition. Only the transitions listed in §4.3 are
    /// legal; anything else is a kernel bug (we'd rather catch it here than
    /// let the scheduler silently run a terminated task).
    pub fn transition(&mut self, to: TaskState) -> Status {
        use TaskState::*;
        let legal = matches!(
            (self.state, to),
            (Uninitialized, Ready)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Waiting)
                | (Waiting, Ready)
                | (Running, Terminated)
                | (Ready, Terminated)
                | (Waiting, Terminated)
        );
        if !legal {
            return Status::BadType;
        }
        self.state = to;
        Status::Ok
    }

    /// Records a transition the caller would like to happen once the current
    /// critical section clears, mirroring `requestedState` in §3. Used when a
    /// wake needs to be deferred past a spinlock that's currently held.
    pub fn request_state(&mut self, to: TaskState) {
        self.requested_state = Some(to);
    }

    pub fn take_requested_state(&mut self) -> Option<TaskState> {
        self.requested_state.take()
    }

    /// Adds an open file, returning the handle (index) the syscall layer
    /// hands back to user code. Reuses the lowest free slot rather than
    /// always growing, so a long-lived task that cycles through many opens
    /// doesn't leak table entries.
    pub fn open_file_add(&mut self, file: OpenFile) -> usize {
        if let Some(slot) = self.open_files.iter().position(|f| f.is_none()) {
            self.open_files[slot] = Some(file);
            slot
        } else {
            self.open_files.push(Some(file));
            self.open_files.len() - 1
        }
    }

    pub fn open_file_get(&self, handle: usize) -> Option<&OpenFile> {
        self.open_files.get(handle).and_then(|f| f.as_ref())
    }

    pub fn open_file_remove(&mut self, handle: usize) -> Option<OpenFile> {
        self.open_files.get_mut(handle).and_then(|f| f.take())
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.iter().filter(|f| f.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb() -> Tcb {
        Tcb::new(TaskId::new(0, 0), 1, None, "init", "/sbin/init")
    }

    #[test]
    fn legal_transitions_succeed() {
        let mut t = tcb();
        assert_eq!(t.transition(TaskState::Ready), Status::Ok);
        assert_eq!(t.transition(TaskState::Running), Status::Ok);
        assert_eq!(t.transition(TaskState::Waiting), Status::Ok);
        assert_eq!(t.transition(TaskState::Ready), Status::Ok);
        assert_eq!(t.transition(TaskState::Terminated), Status::Ok);
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut t = tcb();
        // Can't go straight from Uninitialized to Running.
        assert_eq!(t.transition(TaskState::Running), Status::BadType);
        assert_eq!(t.state(), TaskState::Uninitialized);
    }

    #[test]
    fn open_file_table_round_trips() {
        let mut t = tcb();
        let h = t.open_file_add(OpenFile {
            node: crate::vfs::NodeId(1),
            device: crate::device::DeviceId(2),
            offset: 0,
        });
        assert_eq!(t.open_file_count(), 1);
        assert!(t.open_file_get(h).is_some());
        let removed = t.open_file_remove(h);
        assert!(removed.is_some());
        assert_eq!(t.open_file_count(), 0);
    }

    #[test]
    fn open_file_reuses_freed_slot() {
        let mut t = tcb();
        let f = OpenFile {
            node: crate::vfs::NodeId(1),
            device: crate::device::DeviceId(1),
            offset: 0,
        };
        let h0 = t.open_file_add(f);
        t.open_file_remove(h0);
        let h1 = t.open_file_add(f);
        assert_eq!(h0, h1);
    }
}
