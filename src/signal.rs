//! A minimal synchronous signal/listener mechanism.
//!
//! The original library this crate is modelled on uses scoped, blockable,
//! one-shot signal connections from a signal/slot library. Rust has no
//! direct equivalent, so this module re-expresses the same three
//! properties with explicit handles: a [`Signal`] holds a set of boxed
//! closures; [`Signal::connect`] returns a [`ListenerToken`] that
//! disconnects the closure when dropped; one-shot semantics comes from a
//! slot flagged for removal after its first dispatch
//! ([`Signal::connect_once`]); "blocked" is a `Cell<bool>` flag checked by
//! [`Signal::fire`], not a distinct connection state
//! ([`Signal::connect_blockable`]).

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type BoxedListener<Args> = Box<dyn FnMut(&Args)>;

struct Slot<Args> {
    id: u64,
    once: bool,
    blocked: Rc<Cell<bool>>,
    callback: BoxedListener<Args>,
}

/// A fan-out point for events of type `Args`, dispatched synchronously to
/// every connected, non-blocked listener in registration order.
pub struct Signal<Args> {
    slots: Rc<RefCell<Vec<Slot<Args>>>>,
    next_id: Cell<u64>,
}

impl<Args> Default for Signal<Args> {
    fn default() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }
}

impl<Args> Signal<Args> {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn token_for(&self, id: u64) -> ListenerToken {
        ListenerToken {
            id,
            slots: Rc::downgrade(&self.slots) as Weak<RefCell<dyn ErasedSlots>>,
        }
    }

    /// Registers `callback`, returning a token that disconnects it on drop.
    pub fn connect(&self, callback: impl FnMut(&Args) + 'static) -> ListenerToken {
        let id = self.allocate_id();
        self.slots.borrow_mut().push(Slot {
            id,
            once: false,
            blocked: Rc::new(Cell::new(false)),
            callback: Box::new(callback),
        });
        self.token_for(id)
    }

    /// Like [`Signal::connect`], but also returns a [`BlockHandle`] the
    /// caller can use to temporarily suppress this one listener without
    /// disconnecting it — the mechanism the DDP-backed collection uses to
    /// swallow echoes of its own mutations.
    pub fn connect_blockable(
        &self,
        callback: impl FnMut(&Args) + 'static,
    ) -> (ListenerToken, BlockHandle) {
        let id = self.allocate_id();
        let blocked = Rc::new(Cell::new(false));
        self.slots.borrow_mut().push(Slot {
            id,
            once: false,
            blocked: blocked.clone(),
            callback: Box::new(callback),
        });
        (self.token_for(id), BlockHandle { blocked })
    }

    /// Registers a listener that disconnects itself after its first
    /// (non-blocked) dispatch.
    pub fn connect_once(&self, callback: impl FnMut(&Args) + 'static) -> ListenerToken {
        let id = self.allocate_id();
        self.slots.borrow_mut().push(Slot {
            id,
            once: true,
            blocked: Rc::new(Cell::new(false)),
            callback: Box::new(callback),
        });
        self.token_for(id)
    }

    /// Dispatches `args` to every non-blocked connected listener.
    pub fn fire(&self, args: &Args) {
        let mut fired_once = Vec::new();
        {
            let mut slots = self.slots.borrow_mut();
            for slot in slots.iter_mut() {
                if slot.blocked.get() {
                    continue;
                }
                (slot.callback)(args);
                if slot.once {
                    fired_once.push(slot.id);
                }
            }
        }
        if !fired_once.is_empty() {
            self.slots
                .borrow_mut()
                .retain(|s| !fired_once.contains(&s.id));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

/// A handle that temporarily suppresses one listener's dispatch without
/// disconnecting it.
#[derive(Clone)]
pub struct BlockHandle {
    blocked: Rc<Cell<bool>>,
}

impl BlockHandle {
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.set(blocked);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.get()
    }

    /// Runs `f` with this listener blocked, restoring the previous state
    /// afterwards even if `f` panics.
    pub fn with_blocked<R>(&self, f: impl FnOnce() -> R) -> R {
        let previous = self.blocked.get();
        self.blocked.set(true);
        struct Restore<'a>(&'a Cell<bool>, bool);
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.0.set(self.1);
            }
        }
        let _restore = Restore(&self.blocked, previous);
        f()
    }
}

trait ErasedSlots {
    fn disconnect(&self, id: u64);
}

impl<Args> ErasedSlots for RefCell<Vec<Slot<Args>>> {
    fn disconnect(&self, id: u64) {
        self.borrow_mut().retain(|s| s.id != id);
    }
}

/// A handle to a listener registration. Dropping it disconnects the
/// listener from its signal.
pub struct ListenerToken {
    id: u64,
    slots: Weak<RefCell<dyn ErasedSlots>>,
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            slots.disconnect(self.id);
        }
    }
}
