// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel failures such that they can be found by
//! tooling, and the single entry point the rest of the core uses to turn a
//! bug (double-finalize, unbalanced lock, unacquired-mutex-release, a panic
//! code from §6) into a halted, inspectable machine.
//!
//! This defines the following binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`, cleared before entry to the
//!   kernel, set to `true` the first time `die` runs.
//! - `kern::fail::KERNEL_EPITAPH` is a fixed `[u8; EPITAPH_LEN]` buffer;
//!   `die` writes as much of the failure reason into it as fits, trimming
//!   trailing NULs when printed.

use core::fmt::{Display, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use abi::PanicCode;

#[cfg(not(test))]
#[used]
static KERNEL_HAS_FAILED: AtomicBool = AtomicBool::new(false);

#[cfg(not(test))]
const EPITAPH_LEN: usize = 128;

#[cfg(not(test))]
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

#[cfg(not(test))]
struct Eulogist {
    dest: &'static mut [u8],
}

#[cfg(not(test))]
impl Write for Eulogist {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftover) = core::mem::take(&mut self.dest).split_at_mut(n);
        dest.copy_from_slice(&s[..n]);
        self.dest = leftover;
        Ok(())
    }
}

/// Halts the kernel after recording `msg` as the epitaph. Never returns.
///
/// Called for anything in §6's stable panic-code list, and for the core's
/// own invariant violations (double-finalize, unbalanced lock release, a
/// `magic` mismatch in the object header).
#[inline(never)]
pub fn die(code: PanicCode, msg: impl Display) -> ! {
    // Under the host test harness there is no freestanding "halt forever"
    // available (and we want `#[should_panic]` tests to actually unwind), so
    // route through a real Rust panic instead of spinning.
    #[cfg(test)]
    {
        panic!("panic {:?}: {}", code, msg);
    }

    #[cfg(not(test))]
    {
        if KERNEL_HAS_FAILED.swap(true, Ordering::SeqCst) {
            // Recursive failure while already dying. Don't make it worse by
            // trying to format anything else.
            loop {
                core::sync::atomic::fence(Ordering::SeqCst);
            }
        }

        // Safety: the swap above guarantees we are the only caller that
        // reaches this point, so taking `&mut` to the epitaph buffer cannot
        // alias.
        let buf = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) };
        let mut writer = Eulogist { dest: buf };
        let _ = write!(writer, "panic {:?}: {}", code, msg);

        loop {
            core::sync::atomic::fence(Ordering::SeqCst);
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(PanicCode::UnexpectedFault, info)
}
