// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring-buffer diagnostics, in the spirit of the teacher's own `ringbuf`
//! crate: a fixed-size, `Copy + PartialEq` log of recent events per
//! subsystem, meant to be read back by an external debugger rather than
//! printed through a (out-of-scope) syslog sink.
//!
//! We don't pull in the teacher's `ringbuf` crate directly because it is
//! built against `userlib`'s `StaticCell`, which belongs to the userspace
//! side of that system and has no reason to appear in the kernel core. The
//! ring buffer itself and its macros are reimplemented here against
//! `critical_section` instead.

use core::cell::UnsafeCell;

/// A single entry in a ring buffer. Repeated identical entries (same source
/// line, same payload) coalesce into a `count` bump instead of eating a new
/// slot, so a tight retry loop doesn't evict older, more interesting history.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u32,
    pub generation: u32,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of parameterized type and size. Instantiated through the
/// [`ringbuf!`] macro; `entry` is the only thing callers should ever invoke
/// directly.
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Ringbuf {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u32, payload: T) {
        let ndx = match self.last {
            None => 0,
            Some(last) => {
                let ent = &mut self.buffer[last];
                if ent.line == line && ent.payload == payload {
                    if let Some(new_count) = ent.count.checked_add(1) {
                        ent.count = new_count;
                        return;
                    }
                }
                if last + 1 >= self.buffer.len() {
                    0
                } else {
                    last + 1
                }
            }
        };

        let ent = &mut self.buffer[ndx];
        ent.line = line;
        ent.payload = payload;
        ent.count = 1;
        ent.generation = ent.generation.wrapping_add(1);
        self.last = Some(ndx);
    }
}

/// A `static`-friendly cell that hands out `&mut` access to its contents
/// under a `critical_section`, since a ring buffer entry can legitimately be
/// written from interrupt context.
pub struct RingbufCell<T>(UnsafeCell<T>);

// Safety: all access goes through `with_mut`, which holds a critical section
// for the duration of the borrow.
unsafe impl<T> Sync for RingbufCell<T> {}

impl<T> RingbufCell<T> {
    pub const fn new(value: T) -> Self {
        RingbufCell(UnsafeCell::new(value))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|_| {
            // Safety: the critical section excludes any other holder of this
            // reference, on this core, for its duration.
            let r = unsafe { &mut *self.0.get() };
            f(r)
        })
    }
}

/// Declares a named ring buffer of `$t` payloads with `$n` slots, initialized
/// to `$init`.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::diag::RingbufCell<$crate::diag::Ringbuf<$t, $n>> =
            $crate::diag::RingbufCell::new($crate::diag::Ringbuf::new($init));
    };
}

/// Appends `$payload` to the named ring buffer.
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:expr, $payload:expr) => {{
        let payload = $payload;
        $name.with_mut(|rb| rb.entry(line!(), payload));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    enum Event {
        A,
        B(u32),
    }

    ringbuf!(TEST_RINGBUF, Event, 4, Event::A);

    #[test]
    fn repeated_entries_coalesce() {
        ringbuf_entry!(TEST_RINGBUF, Event::B(1));
        ringbuf_entry!(TEST_RINGBUF, Event::B(1));
        ringbuf_entry!(TEST_RINGBUF, Event::B(1));
        TEST_RINGBUF.with_mut(|rb| {
            let last = rb.buffer[rb.last.unwrap()];
            assert_eq!(last.payload, Event::B(1));
            assert_eq!(last.count, 3);
        });
    }

    #[test]
    fn distinct_entries_advance() {
        ringbuf_entry!(TEST_RINGBUF, Event::A);
        ringbuf_entry!(TEST_RINGBUF, Event::B(2));
        TEST_RINGBUF.with_mut(|rb| {
            let last = rb.buffer[rb.last.unwrap()];
            assert_eq!(last.payload, Event::B(2));
            assert_eq!(last.count, 1);
        });
    }
}
