//! Cooperative shutdown.
//!
//! A [`StopSource`] broadcasts a shutdown request to every registered
//! [`StopToken`]. Resources register themselves (usually through a
//! [`StopGuard`]) when they are created on a thread context; stopping
//! the context cancels them all, which completes their pending
//! operations with `Err(Aborted)` and thereby unblocks every suspended
//! fiber through the normal completion path.

use std::cell::{Cell, RefCell};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ops::Deref;
use std::rc::{Rc, Weak};

/// How insistently a resource should shut down.
///
/// `Smooth` is advisory: a user token may interpret it as "let the
/// current operation finish". The built-in resources treat every mode
/// as `Force`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StopMode {
    Force,
    Smooth,
}

/// A resource that can be asked to shut down.
///
/// Built-in resources implement this with their best teardown
/// operation (`cancel` for timers and signal sets, `close` for
/// sockets). Layered wrappers, such as a TLS stream over a TCP
/// stream, implement it by delegating to their inner layer.
pub trait StopToken {
    /// Request shutdown. Returns whether the request was honoured.
    fn stop(&self, mode: StopMode) -> bool;
}

struct TokenEntry {
    id: u64,
    token: Weak<dyn StopToken>,
}

type TokenList = RefCell<Vec<TokenEntry>>;

/// A broadcast list of stop tokens.
///
/// Tokens are stopped in registration (FIFO) order, each exactly once;
/// the list is cleared by the broadcast. Registrations unlink
/// themselves when dropped, so a token never outlives its entry.
pub struct StopSource {
    tokens: Rc<TokenList>,
    next_id: Cell<u64>,
}

impl StopSource {
    pub fn new() -> Self {
        Self {
            tokens: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }

    /// Append a token. Constant time; order of registration is the
    /// order of shutdown.
    pub fn add(&self, token: Rc<dyn StopToken>) -> StopRegistration {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        self.tokens.borrow_mut().push(TokenEntry {
            id,
            token: Rc::downgrade(&token),
        });

        StopRegistration {
            list: Rc::downgrade(&self.tokens),
            id,
        }
    }

    /// Stop every registered token in FIFO order and clear the list.
    ///
    /// The list is detached before iterating, so tokens that unlink
    /// themselves (or register new tokens) during their own stop call
    /// cannot disturb the traversal. Panics from token callbacks are
    /// contained: shutdown must reach every resource.
    pub fn stop(&self, mode: StopMode) {
        let entries = mem::take(&mut *self.tokens.borrow_mut());
        if entries.is_empty() {
            return;
        }

        tracing::debug!(count = entries.len(), ?mode, "stopping registered tokens");

        for entry in entries {
            let Some(token) = entry.token.upgrade() else {
                continue;
            };

            if panic::catch_unwind(AssertUnwindSafe(|| token.stop(mode))).is_err() {
                tracing::warn!("stop token panicked during shutdown");
            }
        }
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StopSource {
    fn drop(&mut self) {
        self.stop(StopMode::Force);
    }
}

/// Link between a token and the source it is registered with.
///
/// Dropping the registration unlinks the token without stopping it.
pub struct StopRegistration {
    list: Weak<TokenList>,
    id: u64,
}

impl StopRegistration {
    /// Remove the entry from the source. Returns whether it was still
    /// linked (false after the source already stopped or dropped it).
    pub fn unlink(&self) -> bool {
        let Some(list) = self.list.upgrade() else {
            return false;
        };

        let mut list = list.borrow_mut();
        let before = list.len();
        list.retain(|entry| entry.id != self.id);
        before != list.len()
    }

    pub fn is_linked(&self) -> bool {
        self.list
            .upgrade()
            .is_some_and(|list| list.borrow().iter().any(|entry| entry.id == self.id))
    }
}

impl Drop for StopRegistration {
    fn drop(&mut self) {
        self.unlink();
    }
}

/// A stop token made from a closure.
pub struct FnStopToken<F> {
    f: F,
}

impl<F> StopToken for FnStopToken<F>
where
    F: Fn(StopMode) -> bool,
{
    fn stop(&self, mode: StopMode) -> bool {
        (self.f)(mode)
    }
}

/// Wrap a closure as a stop token, ready to register with a source.
pub fn stop_fn<F>(f: F) -> Rc<FnStopToken<F>>
where
    F: Fn(StopMode) -> bool + 'static,
{
    Rc::new(FnStopToken { f })
}

/// Owns a resource and registers it for shutdown broadcast.
///
/// The guard derefs to the resource. On drop, if the registration is
/// still linked (the source has not already stopped it), the resource
/// is stopped with `Force`, so a guarded resource is always torn down
/// exactly once.
pub struct StopGuard<R: StopToken + 'static> {
    resource: Rc<R>,
    registration: StopRegistration,
}

impl<R: StopToken + 'static> StopGuard<R> {
    /// Guard `resource` on the current thread context's stop source.
    ///
    /// # Panics
    ///
    /// Panics if no thread context is installed on this thread.
    pub fn new(resource: R) -> Self {
        let ctx = crate::current_thread_context()
            .expect("no thread context installed on this thread");
        let source = ctx.stop_source();
        Self::with_source(source, resource)
    }

    /// Guard `resource` on an explicit stop source.
    pub fn with_source(source: &StopSource, resource: R) -> Self {
        let resource = Rc::new(resource);
        let registration = source.add(resource.clone());

        Self {
            resource,
            registration,
        }
    }
}

impl<R: StopToken + 'static> Deref for StopGuard<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: StopToken + 'static> Drop for StopGuard<R> {
    fn drop(&mut self) {
        if self.registration.unlink() {
            self.resource.stop(StopMode::Force);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_stop_in_fifo_order_exactly_once() {
        let source = StopSource::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let tokens: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                stop_fn(move |_| {
                    order.borrow_mut().push(i);
                    true
                })
            })
            .collect();

        let registrations: Vec<_> = tokens
            .iter()
            .map(|t| source.add(t.clone() as Rc<dyn StopToken>))
            .collect();

        source.stop(StopMode::Force);
        source.stop(StopMode::Force);

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert!(registrations.iter().all(|r| !r.is_linked()));
    }

    #[test]
    fn unlinked_tokens_are_skipped() {
        let source = StopSource::new();
        let fired = Rc::new(Cell::new(false));

        let fired2 = fired.clone();
        let token = stop_fn(move |_| {
            fired2.set(true);
            true
        });

        let registration = source.add(token.clone() as Rc<dyn StopToken>);
        assert!(registration.unlink());
        assert!(!registration.unlink());

        source.stop(StopMode::Force);
        assert!(!fired.get());
    }

    #[test]
    fn dropping_the_source_stops_tokens() {
        let fired = Rc::new(Cell::new(0));

        let fired2 = fired.clone();
        let token = stop_fn(move |_| {
            fired2.set(fired2.get() + 1);
            true
        });

        {
            let source = StopSource::new();
            let registration = source.add(token.clone() as Rc<dyn StopToken>);
            // Keep the entry linked so the source's destructor fires it.
            mem::forget(registration);
        }

        assert_eq!(fired.get(), 1);
    }
}
