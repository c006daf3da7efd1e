// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Volume manager (C10): associates disk devices with volumes and drives
//! filesystem probing/mounting to completion.

use alloc::string::String;
use alloc::vec::Vec;

use abi::{DeviceType, Status};

use crate::device::{DeviceId, DeviceTable};
use crate::driver::{DriverId, DriverRegistry};
use crate::vfs::NodeId;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub u32);

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct VolumeFlags: u32 {
        const MOUNTED = 1 << 0;
    }
}

pub struct Volume {
    pub label: String,
    pub flags: VolumeFlags,
    pub physical_dev: DeviceId,
    pub fs_dev: Option<DeviceId>,
    pub fs_driver: Option<DriverId>,
    pub mount_point: Option<NodeId>,
    pub serial: u32,
}

/// The volume list singleton (see [`crate::startup`]), guarded in the
/// original design by a single `volumeListLock`; here the table owns that
/// invariant by construction (one `&mut` at a time through normal borrowing).
pub struct VolumeManager {
    volumes: Vec<Option<Volume>>,
}

impl VolumeManager {
    pub const fn new() -> Self {
        VolumeManager { volumes: Vec::new() }
    }

    /// §4.9: requires `dev.type == DISK` and no existing association.
    /// Creates the volume node, appends it to the list, and records the
    /// association back on the device so a second `register_volume` against
    /// the same disk is actually rejected.
    pub fn register_volume(
        &mut self,
        devices: &mut DeviceTable,
        dev: DeviceId,
        label: &str,
        serial: u32,
    ) -> Result<VolumeId, Status> {
        let device = devices.get(dev).ok_or(Status::NullPointer)?;
        if device.ty != DeviceType::Disk {
            return Err(Status::BadType);
        }
        if device.volume.is_some() {
            return Err(Status::VolumeAlreadyExists);
        }
        let volume = Volume {
            label: String::from(label),
            flags: VolumeFlags::empty(),
            physical_dev: dev,
            fs_dev: None,
            fs_driver: None,
            mount_point: None,
            serial,
        };
        let id = VolumeId(self.volumes.len() as u32);
        self.volumes.push(Some(volume));
        devices.get_mut(dev).unwrap().volume = Some(id);
        Ok(id)
    }

    pub fn get(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes.get(id.0 as usize).and_then(|v| v.as_ref())
    }

    pub fn get_mut(&mut self, id: VolumeId) -> Option<&mut Volume> {
        self.volumes.get_mut(id.0 as usize).and_then(|v| v.as_mut())
    }

    /// Runs §4.5 step 3 against the registered filesystem drivers, then
    /// links the winner into the volume and invokes its `mount` entry point.
    pub fn mount(
        &mut self,
        drivers: &mut DriverRegistry,
        volume: VolumeId,
        fs_dev: DeviceId,
    ) -> Status {
        let Some(vol) = self.get(volume) else {
            return Status::NullPointer;
        };
        let disk = vol.physical_dev;
        let Some(driver_id) = drivers.probe_filesystem(disk) else {
            return Status::NotCompatible;
        };
        let Some(driver) = drivers.get_mut(driver_id) else {
            return Status::DriverNotFound;
        };
        let status = driver.mount(disk);
        if status.is_ok() {
            let vol = self.get_mut(volume).unwrap();
            vol.fs_dev = Some(fs_dev);
            vol.fs_driver = Some(driver_id);
            vol.flags.insert(VolumeFlags::MOUNTED);
        }
        status
    }

    pub fn unregister_volume(&mut self, devices: &mut DeviceTable, id: VolumeId) -> Status {
        let Some(vol) = self.volumes.get_mut(id.0 as usize) else {
            return Status::NullPointer;
        };
        let Some(v) = vol.take() else {
            return Status::NullPointer;
        };
        if let Some(dev) = devices.get_mut(v.physical_dev) {
            dev.volume = None;
        }
        Status::Ok
    }
}

impl Default for VolumeManager {
    fn default() -> Self {
        Self::new()
    }
}
