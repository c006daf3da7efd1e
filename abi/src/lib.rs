// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel core and the drivers,
//! filesystems and tasks that sit on the other side of its interfaces.
//!
//! None of the types here know how to do anything; they just give the various
//! pieces of the system a common vocabulary so that a `Status` returned by the
//! VFS means the same thing as a `Status` returned by a driver's `dispatch`.

#![no_std]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Magic value stamped into every object header (§1 C1). A `lock()` call that
/// finds anything else at this offset has been handed a pointer to the wrong
/// kind of object, or to garbage, and treats that as a fatal bug rather than
/// silently acquiring whatever bit pattern happens to be there.
pub const OBJECT_HEADER_MAGIC: u32 = 0x4B4F_424A; // "KOBJ"

/// Number of minor-priority levels available within a major priority class.
pub const MINOR_PRIORITY_LEVELS: u8 = 16;

// ---------------------------------------------------------------------
// Status / error taxonomy (§7)
// ---------------------------------------------------------------------

/// The result code returned by every fallible core API.
///
/// This plays the role the teacher's kernel gives `UserError`: a single,
/// cheap-to-copy, cheap-to-log value that every layer of the system agrees on,
/// rather than each subsystem inventing its own error enum that has to be
/// translated at every boundary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Ok,

    // Argument errors
    NullPointer,
    BadType,
    PathSyntax,

    // Resource errors
    OutOfResources,
    FileNotFound,
    AlreadyExists,
    VolumeAlreadyExists,

    // State errors
    DeviceNotAvailable,
    NotCompatible,
    RpProcessingFailed,
    IoctlUnknown,
    SyscallCodeUnknown,

    // Driver loading (§4.5)
    DriverNotFound,
    DriverInitFailed,

    // RP-specific (§4.7)
    CancelNotSupported,
    Cancelled,

    // Sync-primitive misuse (§4.2); these are recoverable at the Status level
    // but the caller is expected to route them to the fatal path instead of
    // ignoring them, since they indicate a kernel bug, not a user error.
    UnacquiredMutexReleased,
    BusyMutexAcquired,

    /// Catch-all for a driver-specific I/O failure carried verbatim on the RP.
    IoError,
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// Collapses a `Status` into the syscall-level return convention described in
/// §7: most calls fold failure to a single sentinel integer and don't expose
/// the taxonomy to user code.
impl Status {
    /// Used by OPEN: a non-negative handle on success, -1 on any error.
    pub fn to_open_result(self, handle: i32) -> i32 {
        if self.is_ok() {
            handle
        } else {
            -1
        }
    }

    /// Used by READ/WRITE: bytes transferred on success, 0 on any error.
    pub fn to_transfer_result(self, bytes: usize) -> usize {
        if self.is_ok() {
            bytes
        } else {
            0
        }
    }
}

// ---------------------------------------------------------------------
// Panic codes (§6, stable)
// ---------------------------------------------------------------------

/// Stable panic codes. These are part of the external interface: a debugger
/// or postmortem tool keys off the numeric value, so the variants must not be
/// reordered once shipped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum PanicCode {
    NonMaskableInterrupt = 0,
    DivisionByZero = 1,
    InvalidOpcode = 2,
    DoubleFault = 3,
    GeneralProtectionFault = 4,
    BootFailure = 5,
    NoExecutableTask = 6,
    UnacquiredMutexReleased = 7,
    BusyMutexAcquired = 8,
    PageFault = 9,
    MachineCheckFault = 10,
    UnexpectedFault = 11,
}

// ---------------------------------------------------------------------
// Priority (§3, §4.3)
// ---------------------------------------------------------------------

/// Major scheduling class. Numerically lower is more important, mirroring the
/// teacher's `Priority` newtype convention (and for the same reason: it keeps
/// `is_more_important_than` legible instead of quietly flipping `<` and `>`
/// depending on which way round "better" happens to sort).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum MajorPriority {
    Highest = 0,
    Interactive = 1,
    Normal = 2,
    Background = 3,
    Lowest = 4,
}

impl MajorPriority {
    /// Checks if `self` is strictly more important than `other`. Deliberately
    /// spelled out instead of leaning on `Ord`, so call sites read as
    /// scheduling decisions rather than raw integer comparisons.
    pub fn is_more_important_than(self, other: Self) -> bool {
        (self as u8) < (other as u8)
    }
}

impl Default for MajorPriority {
    fn default() -> Self {
        MajorPriority::Normal
    }
}

/// Fine-grained tie-break within a `MajorPriority` class, `0..MINOR_PRIORITY_LEVELS`.
/// Higher values are chosen first among runnable tasks of the same major
/// class.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct MinorPriority(pub u8);

impl MinorPriority {
    pub fn clamped(v: u8) -> Self {
        MinorPriority(v.min(MINOR_PRIORITY_LEVELS - 1))
    }
}

// ---------------------------------------------------------------------
// Task / scheduler state (§3, §4.3)
// ---------------------------------------------------------------------

/// Scheduling state of a task. This is intentionally *not* `Copy`-only-bits:
/// scheduler logic keys off this and nothing else to decide whether a task is
/// a candidate for the ready queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TaskState {
    #[default]
    Uninitialized,
    Ready,
    Running,
    Waiting,
    Terminated,
}

/// Unique, wrapping identity for a task, analogous to the teacher's `TaskId`:
/// pairs a table index with a generation so that a handle captured before a
/// task was reaped can be told apart from a freshly (re)started task
/// occupying the same slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TaskId {
    pub index: u16,
    pub generation: u16,
}

impl TaskId {
    pub const fn new(index: u16, generation: u16) -> Self {
        TaskId { index, generation }
    }
}

// ---------------------------------------------------------------------
// Device object graph (§3, §4.6)
// ---------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum DeviceType {
    #[default]
    None,
    Disk,
    Storage,
    Fs,
    Terminal,
    Other,
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct DeviceFlags: u32 {
        const HIDDEN      = 1 << 0;
        const DIRECT_IO   = 1 << 1;
        const BUFFERED_IO = 1 << 2;
        const STANDALONE  = 1 << 3;
        const PERSISTENT  = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Flags accepted by driver registration (§4.5); `FILESYSTEM` is the one
    /// the probing algorithm actually branches on.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct DriverFlags: u32 {
        const FILESYSTEM = 1 << 0;
        const IS_MAIN    = 1 << 1;
    }
}

// ---------------------------------------------------------------------
// VFS node flags and type (§3, §4.8)
// ---------------------------------------------------------------------

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct VfsNodeFlags: u32 {
        const READ_ONLY   = 1 << 0;
        const LOCKED      = 1 << 1;
        const NO_CACHE    = 1 << 2;
        const VIRTUAL     = 1 << 3;
        const VFS_DIRECTORY = 1 << 4;
        const MOUNT_POINT = 1 << 5;
        const PERSISTENT  = 1 << 6;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum VfsNodeType {
    #[default]
    File,
    Directory,
    Device,
    Mount,
}

// ---------------------------------------------------------------------
// Request Packet codes and inner operation codes (§4.7, §6)
// ---------------------------------------------------------------------

/// Outer RP discriminator. Carried as a plain field rather than folded into
/// the payload enum so a driver can match on `rp.code` before it has
/// committed to decoding the rest of the packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RpCode {
    Open,
    Close,
    Read,
    Write,
    Ioctl,
    DiskControl,
    StorageControl,
    FilesystemControl,
    TerminalControl,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiskControlOp {
    GetSignature,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StorageControlOp {
    GetGeometry,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FilesystemControlOp {
    GetNode,
    GetNodeChildren,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TerminalControlOp {
    CreateVt,
    ActivateVt,
}

/// Disk geometry as returned by `StorageControlOp::GetGeometry`. `FromBytes`/
/// `IntoBytes` so a driver can hand this back as a raw byte buffer without a
/// serialization pass, the same way the teacher's ABI types cross the
/// kernel/task boundary as POD structs rather than serde payloads.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct DiskGeometry {
    pub block_size: u32,
    pub block_count: u64,
    pub alignment: u32,
}

// ---------------------------------------------------------------------
// Syscall surface (§6, §4.10)
// ---------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Sysnum {
    None = 0,
    Exit = 1,
    Open = 2,
    Close = 3,
    Read = 4,
    Write = 5,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::None),
            1 => Ok(Self::Exit),
            2 => Ok(Self::Open),
            3 => Ok(Self::Close),
            4 => Ok(Self::Read),
            5 => Ok(Self::Write),
            _ => Err(()),
        }
    }
}

bitflags::bitflags! {
    /// Flags accepted by the OPEN syscall (mode is a separate small enum, see
    /// `OpenMode`).
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
    pub struct OpenFlags: u32 {
        const CREATE = 1 << 0;
        const TRUNCATE = 1 << 1;
        const NO_CACHE = 1 << 2;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum OpenMode {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

// ---------------------------------------------------------------------
// Driver registry config table (§4.5, ambient: the build-time database)
// ---------------------------------------------------------------------

/// One row of the static driver database consulted by
/// `load_drivers_for_device`. In a full build this table is generated from an
/// external config blob; here it is simply a `&'static` slice baked into the
/// kernel image, which is all the core's contract actually requires.
#[derive(Copy, Clone, Debug)]
pub struct DriverMatch {
    pub device_id: &'static str,
    pub compatible_ids: &'static [&'static str],
    pub image: &'static str,
    pub is_filesystem: bool,
    pub is_main: bool,
}
