// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The five-syscall trampoline (C11): EXIT, OPEN, CLOSE, READ, WRITE, each
//! running in the calling task's context and routed into the VFS and RP
//! engine. Unknown codes fail with `SYSCALL_CODE_UNKNOWN`.

use alloc::boxed::Box;
use alloc::string::String;

use abi::{OpenFlags, OpenMode, RpCode, Status, Sysnum, TaskId};

use crate::rp::{Rp, RpPayload};
use crate::startup::Kernel;
use crate::task::OpenFile;
use crate::vfs::{FsNodeRequest, FsNodeResult, NodeId};

ringbuf!(SYSCALL_RINGBUF, SyscallEvent, 32, SyscallEvent::Idle);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SyscallEvent {
    Idle,
    UnknownCode,
    Exit(TaskId),
    OpenOk(TaskId),
    OpenFailed(Status),
}

/// Dispatches a raw syscall number, exactly as the trap handler (out of
/// scope) would after decoding the calling convention's argument registers.
/// Exists mainly so `SYSCALL_CODE_UNKNOWN` has one place to live; callers
/// that already know which syscall they want should call the typed
/// functions below directly.
pub fn dispatch(kernel: &mut Kernel, task: TaskId, code: u32) -> Status {
    match Sysnum::try_from(code) {
        Ok(Sysnum::None) => Status::Ok,
        Ok(Sysnum::Exit) => {
            exit(kernel, task);
            Status::Ok
        }
        Ok(_) => Status::Ok, // OPEN/CLOSE/READ/WRITE carry extra args, called directly.
        Err(()) => {
            ringbuf_entry!(SYSCALL_RINGBUF, SyscallEvent::UnknownCode);
            Status::SyscallCodeUnknown
        }
    }
}

/// `EXIT(status)`: terminates the calling task. The task never observes a
/// return from this call; what actually "returns" is control to the
/// scheduler, which picks whatever runs next.
pub fn exit(kernel: &mut Kernel, task: TaskId) {
    kernel.scheduler.terminate(task);
    ringbuf_entry!(SYSCALL_RINGBUF, SyscallEvent::Exit(task));
}

/// Asks the device backing a node to resolve one more path component via
/// `FS_GET_NODE`. Borrows `devices`/`drivers`/`rp_queues` by field rather
/// than taking `&mut Kernel` whole, so the caller can still hold `kernel.vfs`
/// borrowed mutably for the `resolve` call this closure runs inside of.
fn ask_for_node(
    devices: &crate::device::DeviceTable,
    drivers: &mut crate::driver::DriverRegistry,
    rp_queues: &mut alloc::vec::Vec<Option<crate::rp::RpQueue>>,
    device_id: crate::device::DeviceId,
    parent: NodeId,
    name: &str,
) -> Result<FsNodeResult, Status> {
    let Some(device) = devices.get(device_id) else {
        return Err(Status::NullPointer);
    };
    let driver_id = device.driver;
    let queue_id = device.rp_queue;
    let Some(queue) = rp_queues.get_mut(queue_id.0 as usize).and_then(|q| q.as_mut()) else {
        return Err(Status::NullPointer);
    };
    let mut rp = Rp::new(RpCode::FilesystemControl, device_id);
    rp.fill(RpPayload::FilesystemControl(abi::FilesystemControlOp::GetNode));
    rp.fs_node_request = Some(FsNodeRequest {
        parent,
        name: String::from(name),
    });
    let mut rp = queue.dispatch_sync(rp, |r| match drivers.get_mut(driver_id) {
        Some(driver) => driver.dispatch(r),
        None => Status::DriverNotFound,
    });
    if !rp.status.is_ok() {
        return Err(rp.status);
    }
    rp.fs_node_result.take().ok_or(Status::RpProcessingFailed)
}

/// `OPEN(path, mode, flags)`: resolves `path` through the VFS, opens a
/// reference, and records it in the calling task's open-file table. Returns
/// a non-negative handle on success, -1 on error (§6/§7 collapse rule).
pub fn open(kernel: &mut Kernel, task: TaskId, path: &str, _mode: OpenMode, _flags: OpenFlags) -> i32 {
    let devices = &kernel.devices;
    let drivers = &mut kernel.drivers;
    let rp_queues = &mut kernel.rp_queues;
    let node = kernel.vfs.resolve(path, |device_id, parent, name| {
        ask_for_node(devices, drivers, rp_queues, device_id, parent, name)
    });
    match node {
        Ok(node_id) => {
            kernel.vfs.open_ref(node_id);
            let device = kernel.vfs.get(node_id).and_then(|n| n.device).unwrap_or(crate::device::DeviceId(0));
            let Some(tcb) = kernel.scheduler.get_mut(task) else {
                return Status::NullPointer.to_open_result(0);
            };
            let handle = tcb.open_file_add(OpenFile { node: node_id, device, offset: 0 });
            ringbuf_entry!(SYSCALL_RINGBUF, SyscallEvent::OpenOk(task));
            Status::Ok.to_open_result(handle as i32)
        }
        Err(status) => {
            ringbuf_entry!(SYSCALL_RINGBUF, SyscallEvent::OpenFailed(status));
            status.to_open_result(0)
        }
    }
}

/// `CLOSE(handle)`: removes the open-file entry and drops the VFS reference.
pub fn close(kernel: &mut Kernel, task: TaskId, handle: usize) -> Status {
    let Some(tcb) = kernel.scheduler.get_mut(task) else {
        return Status::NullPointer;
    };
    match tcb.open_file_remove(handle) {
        Some(file) => {
            kernel.vfs.close_ref(file.node);
            Status::Ok
        }
        None => Status::NullPointer,
    }
}

/// Routes `rp` through the target device's per-queue admission policy
/// (§4.7) before dispatching it to the owning driver.
fn dispatch_transfer(kernel: &mut Kernel, device_id: crate::device::DeviceId, mut rp: Rp) -> Rp {
    let Some(device) = kernel.devices.get(device_id) else {
        rp.status = Status::NullPointer;
        return rp;
    };
    let driver_id = device.driver;
    let queue_id = device.rp_queue;
    let Some(queue) = kernel.rp_queues.get_mut(queue_id.0 as usize).and_then(|q| q.as_mut()) else {
        rp.status = Status::NullPointer;
        return rp;
    };
    let drivers = &mut kernel.drivers;
    queue.dispatch_sync(rp, |r| match drivers.get_mut(driver_id) {
        Some(driver) => driver.dispatch(r),
        None => Status::DriverNotFound,
    })
}

/// `READ(handle, buf, size, offset)`: bytes actually transferred, 0 on
/// error.
pub fn read(kernel: &mut Kernel, task: TaskId, handle: usize, buf: &mut [u8], offset: u64) -> usize {
    let Some(tcb) = kernel.scheduler.get(task) else {
        return 0;
    };
    let Some(file) = tcb.open_file_get(handle) else {
        return 0;
    };
    let device_id = file.device;
    let mut rp = Rp::new(RpCode::Read, device_id);
    rp.fill(RpPayload::Read {
        offset,
        len: buf.len(),
        buf: Box::from(&*buf),
    });
    let rp = dispatch_transfer(kernel, device_id, rp);
    if !rp.status.is_ok() {
        return 0;
    }
    let n = if let Some(RpPayload::Read { buf: out, .. }) = &rp.payload {
        let n = out.len().min(buf.len());
        buf[..n].copy_from_slice(&out[..n]);
        n
    } else {
        0
    };
    rp.status.to_transfer_result(n)
}

/// `WRITE(handle, buf, size, offset)`: bytes actually transferred, 0 on
/// error.
pub fn write(kernel: &mut Kernel, task: TaskId, handle: usize, buf: &[u8], offset: u64) -> usize {
    let Some(tcb) = kernel.scheduler.get(task) else {
        return 0;
    };
    let Some(file) = tcb.open_file_get(handle) else {
        return 0;
    };
    let device_id = file.device;
    let mut rp = Rp::new(RpCode::Write, device_id);
    rp.fill(RpPayload::Write {
        offset,
        buf: Box::from(buf),
    });
    let rp = dispatch_transfer(kernel, device_id, rp);
    rp.status.to_transfer_result(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::{DeviceFlags, DeviceType, DriverFlags};
    use crate::device::DeviceId;
    use crate::driver::DriverOps;

    /// `/dev/null`-style driver: swallows every write and always reports
    /// zero bytes transferred on read, by handing back an empty buffer
    /// rather than mutating the caller's (the only way to signal "fewer
    /// bytes than requested" on a fixed-size `RpPayload::Read`).
    struct NullDriver;
    impl DriverOps for NullDriver {
        fn dispatch(&mut self, rp: &mut Rp) -> Status {
            match &rp.payload {
                Some(RpPayload::Write { .. }) => rp.status = Status::Ok,
                Some(RpPayload::Read { offset, .. }) => {
                    let offset = *offset;
                    rp.payload = Some(RpPayload::Read { offset, len: 0, buf: alloc::boxed::Box::new([]) });
                    rp.status = Status::Ok;
                }
                _ => rp.status = Status::Ok,
            }
            Status::Ok
        }
    }

    fn kernel_with_null_device() -> (Kernel, TaskId) {
        let mut kernel = Kernel::new();
        let driver_id = kernel
            .drivers
            .register("null.drv", DriverFlags::empty(), Box::new(NullDriver))
            .unwrap();
        let queue_id = kernel.create_rp_queue(false);
        let device_id = kernel.devices.create(DeviceType::Other, DeviceFlags::empty(), driver_id, queue_id);
        kernel.vfs.create_device_file(device_id, abi::VfsNodeFlags::empty(), "null").unwrap();
        let task = kernel.scheduler.spawn(1, None, "t", "/t");
        (kernel, task)
    }

    #[test]
    fn null_device_end_to_end() {
        let (mut kernel, task) = kernel_with_null_device();
        let handle = open(&mut kernel, task, "/dev/null", OpenMode::ReadWrite, OpenFlags::empty());
        assert!(handle >= 0);
        let written = write(&mut kernel, task, handle as usize, b"hi", 0);
        assert_eq!(written, 2);
        let mut buf = [0xffu8; 8];
        let read_n = read(&mut kernel, task, handle as usize, &mut buf, 0);
        assert_eq!(read_n, 0);
        assert_eq!(close(&mut kernel, task, handle as usize), Status::Ok);
    }

    #[test]
    fn open_missing_path_returns_negative_one() {
        let (mut kernel, task) = kernel_with_null_device();
        let handle = open(&mut kernel, task, "/dev/does-not-exist", OpenMode::ReadOnly, OpenFlags::empty());
        assert_eq!(handle, -1);
    }

    #[test]
    fn unknown_syscall_code_rejected() {
        let (mut kernel, task) = kernel_with_null_device();
        assert_eq!(dispatch(&mut kernel, task, 0xFFFF), Status::SyscallCodeUnknown);
    }

    #[test]
    fn exit_terminates_task() {
        let (mut kernel, task) = kernel_with_null_device();
        exit(&mut kernel, task);
        assert!(kernel.scheduler.get(task).unwrap().state() == abi::TaskState::Terminated);
    }
}
