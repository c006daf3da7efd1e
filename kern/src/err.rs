// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error-handling glue: the propagation policy from §7 says errors are
//! returned, not recovered, inside the core — except the handful of
//! `Status` values that are really a kernel bug wearing a `Status`'s
//! clothing (`UnacquiredMutexReleased`, `BusyMutexAcquired`), which must
//! escalate to the fatal path unconditionally rather than be handed back to
//! a caller that might paper over them.

use abi::{PanicCode, Status};

use crate::fail::die;

/// Extension point for the "is this actually fatal?" check, analogous to the
/// teacher's `UserError`/fault escalation split at the syscall boundary.
pub trait StatusExt {
    /// Routes the sync-primitive misuse classes to [`crate::fail::die`];
    /// passes every other `Status` through unchanged. `context` becomes part
    /// of the epitaph if this call doesn't return.
    fn or_fatal(self, context: &str) -> Status;
}

impl StatusExt for Status {
    fn or_fatal(self, context: &str) -> Status {
        match self {
            Status::UnacquiredMutexReleased => die(PanicCode::UnacquiredMutexReleased, context),
            Status::BusyMutexAcquired => die(PanicCode::BusyMutexAcquired, context),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_status_passes_through() {
        assert_eq!(Status::FileNotFound.or_fatal("lookup"), Status::FileNotFound);
        assert_eq!(Status::Ok.or_fatal("lookup"), Status::Ok);
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn unacquired_mutex_released_is_fatal() {
        Status::UnacquiredMutexReleased.or_fatal("double release");
    }

    #[test]
    #[should_panic(expected = "recursive acquire")]
    fn busy_mutex_acquired_is_fatal() {
        Status::BusyMutexAcquired.or_fatal("recursive acquire");
    }
}
