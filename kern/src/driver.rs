// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver registry (C6): the loaded-driver list, lookup by device/compatible
//! ID against the build-time [`abi::DriverMatch`] table, and filesystem
//! probing.
//!
//! A driver's behavior is a capability set: only `dispatch` is mandatory
//! (§9), the rest (`init`, `unload`, `add_device`, `verify_fs`, `mount`) are
//! optional entry points a driver image may or may not populate. Since the
//! concrete images (ELF loading, symbol resolution) are out of scope, a
//! `Driver` here is the vtable plus bookkeeping the core needs, not the
//! loader.

use alloc::vec::Vec;

use abi::{DriverFlags, Status};

use crate::device::DeviceId;
use crate::object::ObjectHeader;
use crate::rp::Rp;

ringbuf!(DRIVER_RINGBUF, DriverEvent, 16, DriverEvent::Idle);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DriverEvent {
    Idle,
    Loaded(DriverId),
    LoadFailed,
    FsProbeRejected(DriverId),
    FsProbeAccepted(DriverId),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DriverId(pub u32);

/// The entry-point capability set a driver image exports through
/// `DriverEntry`. Only `dispatch` is required; everything else may be left
/// `None`.
pub trait DriverOps {
    fn init(&mut self) -> Status {
        Status::Ok
    }

    fn unload(&mut self) {}

    fn dispatch(&mut self, rp: &mut Rp) -> Status;

    fn add_device(&mut self, _base: DeviceId) -> Status {
        Status::RpProcessingFailed
    }

    /// Returns `Ok` if `disk` is a volume this filesystem driver recognizes.
    fn verify_fs(&mut self, _disk: DeviceId) -> Status {
        Status::NotCompatible
    }

    fn mount(&mut self, _disk: DeviceId) -> Status {
        Status::RpProcessingFailed
    }
}

pub struct Driver {
    header: ObjectHeader,
    pub image: &'static str,
    pub flags: DriverFlags,
    devices: Vec<DeviceId>,
    ops: alloc::boxed::Box<dyn DriverOps>,
}

impl Driver {
    pub fn lock(&self) -> crate::sync::SpinlockGuard<'_> {
        self.header.lock()
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn dispatch(&mut self, rp: &mut Rp) -> Status {
        self.ops.dispatch(rp)
    }

    pub fn verify_fs(&mut self, disk: DeviceId) -> Status {
        self.ops.verify_fs(disk)
    }

    pub fn mount(&mut self, disk: DeviceId) -> Status {
        self.ops.mount(disk)
    }
}

/// The loaded-driver list. One instance is the system's driver-registry
/// singleton (see [`crate::startup`]).
pub struct DriverRegistry {
    drivers: Vec<Option<Driver>>,
}

impl DriverRegistry {
    pub const fn new() -> Self {
        DriverRegistry { drivers: Vec::new() }
    }

    /// Registers an already-constructed driver (standing in for "load the
    /// image, resolve symbols, call `DriverEntry`", which is out of scope
    /// here — the loader hands us a ready `DriverOps` impl). Calls `init` and
    /// rolls back on failure.
    pub fn register(
        &mut self,
        image: &'static str,
        flags: DriverFlags,
        mut ops: alloc::boxed::Box<dyn DriverOps>,
    ) -> Result<DriverId, Status> {
        let status = ops.init();
        if !status.is_ok() {
            ringbuf_entry!(DRIVER_RINGBUF, DriverEvent::LoadFailed);
            return Err(Status::DriverInitFailed);
        }
        let driver = Driver {
            header: ObjectHeader::new(),
            image,
            flags,
            devices: Vec::new(),
            ops,
        };
        let id = DriverId(self.drivers.len() as u32);
        self.drivers.push(Some(driver));
        ringbuf_entry!(DRIVER_RINGBUF, DriverEvent::Loaded(id));
        Ok(id)
    }

    pub fn get_mut(&mut self, id: DriverId) -> Option<&mut Driver> {
        self.drivers.get_mut(id.0 as usize).and_then(|d| d.as_mut())
    }

    pub fn get(&self, id: DriverId) -> Option<&Driver> {
        self.drivers.get(id.0 as usize).and_then(|d| d.as_ref())
    }

    pub fn attach_device(&mut self, driver: DriverId, device: DeviceId) -> Status {
        match self.get_mut(driver) {
            Some(d) => {
                d.devices.push(device);
                Status::Ok
            }
            None => Status::NullPointer,
        }
    }

    /// Looks up every driver registered for `device_id`/`compatible_ids`
    /// against `table`, per §4.5 step 1. Returns the matching rows; the
    /// caller (typically [`crate::startup`]) is responsible for actually
    /// constructing and registering each one, since that step needs the
    /// image loader this crate does not have.
    ///
    /// Enforces "at most one flagged `isMain`" over the returned set — a
    /// config blob with two `is_main` rows for the same device is a build-time
    /// bug, surfaced as `DriverInitFailed` rather than silently picking one.
    pub fn match_device<'t>(
        table: &'t [abi::DriverMatch],
        device_id: &str,
        compatible_ids: &[&str],
    ) -> Result<Vec<&'t abi::DriverMatch>, Status> {
        let matches: Vec<&abi::DriverMatch> = table
            .iter()
            .filter(|row| {
                row.device_id == device_id || row.compatible_ids.iter().any(|c| compatible_ids.contains(c))
            })
            .collect();
        if matches.iter().filter(|row| row.is_main).count() > 1 {
            return Err(Status::DriverInitFailed);
        }
        Ok(matches)
    }

    /// §4.5 step 3: iterate every driver flagged `FILESYSTEM`, asking each
    /// `verify_fs(disk)` in registration order, and return the first `Ok`.
    pub fn probe_filesystem(&mut self, disk: DeviceId) -> Option<DriverId> {
        for (idx, slot) in self.drivers.iter_mut().enumerate() {
            let Some(driver) = slot else { continue };
            if !driver.flags.contains(DriverFlags::FILESYSTEM) {
                continue;
            }
            let id = DriverId(idx as u32);
            if driver.verify_fs(disk).is_ok() {
                ringbuf_entry!(DRIVER_RINGBUF, DriverEvent::FsProbeAccepted(id));
                return Some(id);
            }
            ringbuf_entry!(DRIVER_RINGBUF, DriverEvent::FsProbeRejected(id));
        }
        None
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rp::RpCode;
    use alloc::boxed::Box;

    struct NullOps;
    impl DriverOps for NullOps {
        fn dispatch(&mut self, rp: &mut Rp) -> Status {
            rp.status = Status::Ok;
            Status::Ok
        }
    }

    struct FsOps {
        accepts: DeviceId,
    }
    impl DriverOps for FsOps {
        fn dispatch(&mut self, rp: &mut Rp) -> Status {
            rp.status = Status::Ok;
            Status::Ok
        }
        fn verify_fs(&mut self, disk: DeviceId) -> Status {
            if disk == self.accepts {
                Status::Ok
            } else {
                Status::NotCompatible
            }
        }
    }

    #[test]
    fn register_then_dispatch() {
        let mut reg = DriverRegistry::new();
        let id = reg
            .register("null.drv", DriverFlags::empty(), Box::new(NullOps))
            .unwrap();
        let mut rp = Rp::new(RpCode::Read, DeviceId(0));
        assert_eq!(reg.get_mut(id).unwrap().dispatch(&mut rp), Status::Ok);
    }

    #[test]
    fn attach_device_tracks_ownership() {
        let mut reg = DriverRegistry::new();
        let id = reg
            .register("null.drv", DriverFlags::empty(), Box::new(NullOps))
            .unwrap();
        assert_eq!(reg.attach_device(id, DeviceId(3)), Status::Ok);
        assert_eq!(reg.get(id).unwrap().devices(), &[DeviceId(3)]);
    }

    #[test]
    fn probe_filesystem_finds_first_match() {
        let mut reg = DriverRegistry::new();
        reg.register(
            "fs1.drv",
            DriverFlags::FILESYSTEM,
            Box::new(FsOps { accepts: DeviceId(9) }),
        )
        .unwrap();
        let second = reg
            .register(
                "fs2.drv",
                DriverFlags::FILESYSTEM,
                Box::new(FsOps { accepts: DeviceId(1) }),
            )
            .unwrap();
        assert_eq!(reg.probe_filesystem(DeviceId(1)), Some(second));
    }

    #[test]
    fn probe_filesystem_no_match_returns_none() {
        let mut reg = DriverRegistry::new();
        reg.register(
            "fs1.drv",
            DriverFlags::FILESYSTEM,
            Box::new(FsOps { accepts: DeviceId(9) }),
        )
        .unwrap();
        assert_eq!(reg.probe_filesystem(DeviceId(42)), None);
    }

    struct TtyOps {
        vt_active: bool,
    }
    impl DriverOps for TtyOps {
        fn dispatch(&mut self, rp: &mut Rp) -> Status {
            match &rp.payload {
                Some(crate::rp::RpPayload::TerminalControl(abi::TerminalControlOp::CreateVt)) => {
                    rp.status = Status::Ok;
                }
                Some(crate::rp::RpPayload::TerminalControl(abi::TerminalControlOp::ActivateVt)) => {
                    self.vt_active = true;
                    rp.status = Status::Ok;
                }
                Some(crate::rp::RpPayload::Write { .. }) => {
                    rp.status = if self.vt_active {
                        Status::Ok
                    } else {
                        Status::DeviceNotAvailable
                    };
                }
                _ => rp.status = Status::IoctlUnknown,
            }
            Status::Ok
        }
    }

    #[test]
    fn tty_ioctl_create_then_activate_gates_write() {
        let mut tty = TtyOps { vt_active: false };
        let dev = DeviceId(4);

        let mut create = Rp::new(RpCode::TerminalControl, dev);
        create.fill(crate::rp::RpPayload::TerminalControl(abi::TerminalControlOp::CreateVt));
        tty.dispatch(&mut create);
        assert_eq!(create.status, Status::Ok);

        let mut write_before = Rp::new(RpCode::Write, dev);
        write_before.fill(crate::rp::RpPayload::Write { offset: 0, buf: alloc::boxed::Box::from(&b"x"[..]) });
        tty.dispatch(&mut write_before);
        assert_eq!(write_before.status, Status::DeviceNotAvailable);

        let mut activate = Rp::new(RpCode::TerminalControl, dev);
        activate.fill(crate::rp::RpPayload::TerminalControl(abi::TerminalControlOp::ActivateVt));
        tty.dispatch(&mut activate);
        assert_eq!(activate.status, Status::Ok);

        let mut write_after = Rp::new(RpCode::Write, dev);
        write_after.fill(crate::rp::RpPayload::Write { offset: 0, buf: alloc::boxed::Box::from(&b"x"[..]) });
        tty.dispatch(&mut write_after);
        assert_eq!(write_after.status, Status::Ok);
    }

    #[test]
    fn match_device_filters_by_id() {
        static TABLE: &[abi::DriverMatch] = &[
            abi::DriverMatch {
                device_id: "pci:1234",
                compatible_ids: &["generic-disk"],
                image: "disk.drv",
                is_filesystem: false,
                is_main: true,
            },
            abi::DriverMatch {
                device_id: "pci:5678",
                compatible_ids: &[],
                image: "other.drv",
                is_filesystem: false,
                is_main: true,
            },
        ];
        let matches = DriverRegistry::match_device(TABLE, "pci:1234", &[]).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].image, "disk.drv");
    }

    #[test]
    fn match_device_rejects_more_than_one_main() {
        static TABLE: &[abi::DriverMatch] = &[
            abi::DriverMatch {
                device_id: "pci:dup",
                compatible_ids: &["generic-disk"],
                image: "disk.drv",
                is_filesystem: false,
                is_main: true,
            },
            abi::DriverMatch {
                device_id: "pci:dup",
                compatible_ids: &[],
                image: "other.drv",
                is_filesystem: false,
                is_main: true,
            },
        ];
        assert_eq!(
            DriverRegistry::match_device(TABLE, "pci:dup", &[]),
            Err(Status::DriverInitFailed)
        );
    }
}
