// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Object header: the `{magic, spinlock}` pair every kernel object starts
//! with, and the generic, type-erased `lock`/`unlock` built on top of it.
//!
//! Every other component (TCB, driver object, device object, VFS node, RP)
//! embeds an `ObjectHeader` as its first field and forwards `lock`/`unlock`
//! to it. A `magic` mismatch is never a recoverable condition: it means
//! someone followed a dangling or mistyped pointer, so it goes straight to
//! the fatal path.

use abi::{PanicCode, OBJECT_HEADER_MAGIC};

use crate::fail::die;
use crate::sync::Spinlock;

/// Fixed-layout header embedded at a fixed offset (always first) in every
/// lockable kernel object.
pub struct ObjectHeader {
    magic: u32,
    spinlock: Spinlock,
}

impl ObjectHeader {
    pub const fn new() -> Self {
        ObjectHeader {
            magic: OBJECT_HEADER_MAGIC,
            spinlock: Spinlock::new(),
        }
    }

    fn check_magic(&self) {
        if self.magic != OBJECT_HEADER_MAGIC {
            die(
                PanicCode::UnexpectedFault,
                "object header magic mismatch: corrupt or wrong-typed pointer",
            );
        }
    }

    /// Acquires the embedded spinlock after verifying `magic`. Returns a
    /// guard that releases on drop, the same RAII discipline `Spinlock`
    /// itself uses.
    pub fn lock(&self) -> crate::sync::SpinlockGuard<'_> {
        self.check_magic();
        self.spinlock.acquire()
    }
}

impl Default for ObjectHeader {
    fn default() -> Self {
        Self::new()
    }
}
