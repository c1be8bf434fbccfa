// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::cell::RefCell;
use critical_section::Mutex;

/// A single value reachable from both the main loop and interrupt handlers.
///
/// Every access runs inside a critical section, so a handler can never see
/// the value halfway through an update. The transport is installed once at
/// startup and then reached from each entry point:
///
/// ```ignore
/// static TRANSPORT: Shared<Link> = Shared::new();
///
/// fn main_loop() -> ! {
///     loop {
///         TRANSPORT.with(|t| t.pump());
///     }
/// }
///
/// fn spi_irq(event: SpiEvent) {
///     TRANSPORT.with(|t| t.on_spi_event(event));
/// }
///
/// fn boundary_falling_irq() {
///     TRANSPORT.with(|t| t.on_boundary_falling());
/// }
/// ```
pub struct Shared<T> {
    cell: Mutex<RefCell<Option<T>>>,
}

impl<T> Shared<T> {
    pub const fn new() -> Self {
        Self {
            cell: Mutex::new(RefCell::new(None)),
        }
    }

    /// Installs `value`. Hands it back if something is already installed.
    pub fn install(&self, value: T) -> Result<(), T> {
        critical_section::with(|cs| {
            let mut slot = self.cell.borrow_ref_mut(cs);
            if slot.is_some() {
                return Err(value);
            }
            *slot = Some(value);
            Ok(())
        })
    }

    /// Runs `f` on the installed value inside a critical section. Returns
    /// `None` if nothing is installed yet, or if the value is already being
    /// accessed further up the stack.
    ///
    /// The transport calls into its core from inside `f`, so those
    /// callbacks must not come back through here; they should only signal
    /// the main loop, which then calls `read_data` in a fresh `with`.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        critical_section::with(|cs| {
            let mut slot = self.cell.borrow(cs).try_borrow_mut().ok()?;
            slot.as_mut().map(f)
        })
    }

    /// Removes and returns the installed value.
    pub fn take(&self) -> Option<T> {
        critical_section::with(|cs| self.cell.borrow_ref_mut(cs).take())
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_installed() {
        let shared = Shared::<u32>::new();
        assert_eq!(shared.with(|v| *v), None);

        assert_eq!(shared.install(5), Ok(()));
        assert_eq!(shared.install(6), Err(6));

        assert_eq!(shared.with(|v| {
            *v += 1;
            *v
        }), Some(6));
        assert_eq!(shared.take(), Some(6));
        assert_eq!(shared.with(|v| *v), None);
    }

    #[test]
    fn reachable_from_another_thread() {
        static SHARED: Shared<u32> = Shared::new();
        assert_eq!(SHARED.install(0), Ok(()));

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        SHARED.with(|v| *v += 1);
                    }
                });
            }
        });

        assert_eq!(SHARED.with(|v| *v), Some(400));
    }

    #[test]
    fn nested_access_is_refused() {
        let shared = Shared::<u32>::new();
        assert_eq!(shared.install(1), Ok(()));

        let inner = shared.with(|v| {
            *v += 1;
            shared.with(|v| *v += 10)
        });
        assert_eq!(inner, Some(None));
        assert_eq!(shared.with(|v| *v), Some(2));
    }
}
