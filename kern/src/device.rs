// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device object graph (C7): types, flags, block/alignment constraints,
//! and explicit top-to-bottom stacking of devices (PDO below, FSDO/volume
//! devices above).

use alloc::vec::Vec;

use abi::{DeviceFlags, DeviceType, Status};

use crate::driver::DriverId;
use crate::object::ObjectHeader;

/// Opaque handle into the device arena, handed out by [`DeviceTable::create`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

pub struct Device {
    header: ObjectHeader,
    pub ty: DeviceType,
    pub flags: DeviceFlags,
    pub block_size: u32,
    pub alignment: u32,
    pub driver: DriverId,
    /// The device immediately below this one in the stack, if any (e.g. an
    /// FSDO's `stacked_on` is the disk PDO it reads through).
    pub stacked_on: Option<DeviceId>,
    pub volume: Option<crate::volume::VolumeId>,
    pub rp_queue: crate::rp::QueueId,
    private_data: usize,
}

impl Device {
    fn new(ty: DeviceType, flags: DeviceFlags, driver: DriverId, rp_queue: crate::rp::QueueId) -> Self {
        Device {
            header: ObjectHeader::new(),
            ty,
            flags,
            block_size: 1,
            alignment: 1,
            driver,
            stacked_on: None,
            volume: None,
            rp_queue,
            private_data: 0,
        }
    }

    pub fn lock(&self) -> crate::sync::SpinlockGuard<'_> {
        self.header.lock()
    }

    /// Opaque slot for driver-private state (a pointer-sized value the
    /// driver alone interprets). Mirrors `privateData` in §3; kept untyped
    /// here since the core never reads it.
    pub fn private_data(&self) -> usize {
        self.private_data
    }

    pub fn set_private_data(&mut self, value: usize) {
        self.private_data = value;
    }

    /// True when `offset`/`len` already satisfy this device's block size and
    /// alignment, i.e. a direct (unbounced) transfer is legal.
    pub fn satisfies_direct_io(&self, offset: u64, len: usize, buf_addr: usize) -> bool {
        let block = self.block_size as u64;
        let align = self.alignment as usize;
        offset % block == 0 && (len as u64) % block == 0 && buf_addr % align == 0
    }
}

/// Owns every live device object. One instance is the system's device graph
/// singleton (see [`crate::startup`]).
pub struct DeviceTable {
    devices: Vec<Option<Device>>,
}

impl DeviceTable {
    pub const fn new() -> Self {
        DeviceTable { devices: Vec::new() }
    }

    pub fn create(
        &mut self,
        ty: DeviceType,
        flags: DeviceFlags,
        driver: DriverId,
        rp_queue: crate::rp::QueueId,
    ) -> DeviceId {
        let dev = Device::new(ty, flags, driver, rp_queue);
        let id = self.devices.len() as u32;
        self.devices.push(Some(dev));
        DeviceId(id)
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0 as usize).and_then(|d| d.as_ref())
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id.0 as usize).and_then(|d| d.as_mut())
    }

    /// Stacks `upper` directly on top of `lower`. Ordered and explicit, per
    /// §4.6 — there's no implicit attach-to-default-device behavior.
    pub fn stack(&mut self, upper: DeviceId, lower: DeviceId) -> Status {
        if self.get(lower).is_none() {
            return Status::NullPointer;
        }
        match self.get_mut(upper) {
            Some(dev) => {
                dev.stacked_on = Some(lower);
                Status::Ok
            }
            None => Status::NullPointer,
        }
    }

    pub fn destroy(&mut self, id: DeviceId) -> Status {
        match self.devices.get_mut(id.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Status::Ok
            }
            _ => Status::NullPointer,
        }
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_one() -> (DeviceTable, DeviceId) {
        let mut t = DeviceTable::new();
        let id = t.create(
            DeviceType::Disk,
            DeviceFlags::empty(),
            DriverId(0),
            crate::rp::QueueId(0),
        );
        (t, id)
    }

    #[test]
    fn create_and_lookup() {
        let (t, id) = table_with_one();
        assert!(t.get(id).is_some());
        assert_eq!(t.get(id).unwrap().ty, DeviceType::Disk);
    }

    #[test]
    fn stack_links_lower_device() {
        let (mut t, pdo) = table_with_one();
        let fsdo = t.create(
            DeviceType::Fs,
            DeviceFlags::empty(),
            DriverId(1),
            crate::rp::QueueId(1),
        );
        assert_eq!(t.stack(fsdo, pdo), Status::Ok);
        assert_eq!(t.get(fsdo).unwrap().stacked_on, Some(pdo));
    }

    #[test]
    fn stack_on_missing_lower_fails() {
        let (mut t, fsdo) = table_with_one();
        assert_eq!(t.stack(fsdo, DeviceId(99)), Status::NullPointer);
    }

    #[test]
    fn direct_io_alignment_check() {
        let mut t = DeviceTable::new();
        let id = t.create(
            DeviceType::Disk,
            DeviceFlags::empty(),
            DriverId(0),
            crate::rp::QueueId(0),
        );
        let dev = t.get_mut(id).unwrap();
        dev.block_size = 512;
        dev.alignment = 16;
        assert!(dev.satisfies_direct_io(512, 512, 0x1000));
        assert!(!dev.satisfies_direct_io(100, 512, 0x1000));
        assert!(!dev.satisfies_direct_io(512, 512, 0x1001));
    }

    #[test]
    fn destroy_then_lookup_misses() {
        let (mut t, id) = table_with_one();
        assert_eq!(t.destroy(id), Status::Ok);
        assert!(t.get(id).is_none());
    }
}
