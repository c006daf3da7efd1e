// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Global kernel state and its single init step (§9 "Global mutable state":
//! driver list, volume list, VFS root, DPC queues, each a singleton with a
//! well-defined init step and a single owning lock).
//!
//! [`Kernel`] bundles every singleton the rest of the core needs. It is not
//! itself behind a lock — ownership of the whole struct (a single `&mut
//! Kernel` threaded through dispatch) is the "single owning lock" for the
//! collection, the same way the teacher's `with_task_table` closure is the
//! only path to the task array.

use alloc::vec::Vec;

use crate::device::DeviceTable;
use crate::dpc::DpcQueue;
use crate::driver::DriverRegistry;
use crate::rp::{QueueId, RpQueue};
use crate::sched::Scheduler;
use crate::vfs::Vfs;
use crate::volume::VolumeManager;

pub struct Kernel {
    pub scheduler: Scheduler,
    pub devices: DeviceTable,
    pub drivers: DriverRegistry,
    pub volumes: VolumeManager,
    pub vfs: Vfs,
    pub dpc: DpcQueue,
    /// One [`RpQueue`] per device, indexed by [`QueueId`] (§4.7). A device is
    /// only routable through [`crate::syscall`] once its queue has been
    /// registered here via [`Kernel::create_rp_queue`] and the resulting id
    /// handed to [`DeviceTable::create`]. `pub` (rather than behind an
    /// accessor) so callers can borrow it independently of `devices`/
    /// `drivers` the way [`crate::syscall`] needs to.
    pub rp_queues: Vec<Option<RpQueue>>,
}

impl Kernel {
    /// Brings up every singleton in dependency order: the VFS needs nothing
    /// but itself (it seeds `/` and `/dev`); the scheduler, device table,
    /// driver registry and volume manager start empty and are populated by
    /// the boot sequence's driver-loading pass (out of scope here — see
    /// §4.5's external config-blob consultation).
    pub fn new() -> Self {
        Kernel {
            scheduler: Scheduler::new(),
            devices: DeviceTable::new(),
            drivers: DriverRegistry::new(),
            volumes: VolumeManager::new(),
            vfs: Vfs::new(),
            dpc: DpcQueue::new(),
            rp_queues: Vec::new(),
        }
    }

    /// Registers a new per-device RP queue (§4.7) and returns the id to pass
    /// to [`DeviceTable::create`] for the device it backs.
    pub fn create_rp_queue(&mut self, reentrant: bool) -> QueueId {
        let id = QueueId(self.rp_queues.len() as u32);
        self.rp_queues.push(Some(RpQueue::new(reentrant)));
        id
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_kernel_has_seeded_vfs_and_empty_tables() {
        let k = Kernel::new();
        assert!(k.vfs.get(k.vfs.root()).is_some());
        assert!(k.vfs.get(k.vfs.dev()).is_some());
        assert!(k.scheduler.current().is_none());
    }
}
