//! Typed event dispatchers the server publishes UI state changes through.
//! Listeners fire in subscription order; a listener unsubscribes itself by
//! returning `false`, which takes effect once the current fire completes.
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::protocol::network::control_function::CfHandle;

/// Listener callback; return `false` to unsubscribe.
pub type EventCallback<T> = Box<dyn FnMut(&T) -> bool>;

struct Listener<T> {
    id: usize,
    callback: EventCallback<T>,
}

/// Ordered list of listeners for one event type.
pub struct EventDispatcher<T> {
    listeners: Vec<Listener<T>>,
    next_id: usize,
}

impl<T> EventDispatcher<T> {
    /// Create a dispatcher with no listeners.
    pub fn new() -> Self {
        Self { listeners: Vec::new(), next_id: 0 }
    }

    /// Subscribe a listener. The returned ID can be passed to
    /// [`remove_listener`](Self::remove_listener).
    pub fn add_listener(&mut self, callback: EventCallback<T>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push(Listener { id, callback });
        id
    }

    /// Unsubscribe a listener by ID.
    pub fn remove_listener(&mut self, id: usize) {
        self.listeners.retain(|listener| listener.id != id);
    }

    /// Number of subscribed listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver an event to every listener in subscription order, then drop
    /// the listeners that asked to unsubscribe.
    pub fn invoke(&mut self, event: &T) {
        let mut unsubscribed: Vec<usize> = Vec::new();
        for listener in &mut self.listeners {
            if !(listener.callback)(event) {
                unsubscribed.push(listener.id);
            }
        }
        if !unsubscribed.is_empty() {
            self.listeners.retain(|listener| !unsubscribed.contains(&listener.id));
        }
    }
}

impl<T> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

//==================================================================================Event payloads

#[derive(Clone, Copy, Debug)]
/// Anything visible changed in a working set.
pub struct RepaintEvent {
    /// Client whose UI needs repainting.
    pub working_set: CfHandle,
}

#[derive(Clone, Copy, Debug)]
/// The active mask of a working set changed.
pub struct ActiveMaskChangedEvent {
    pub working_set: CfHandle,
    pub working_set_object_id: u16,
    pub new_mask_object_id: u16,
}

#[derive(Clone, Copy, Debug)]
/// A container was hidden or shown.
pub struct HideShowEvent {
    pub working_set: CfHandle,
    pub object_id: u16,
    pub hidden: bool,
}

#[derive(Clone, Copy, Debug)]
/// An input object or button was enabled or disabled.
pub struct EnableDisableEvent {
    pub working_set: CfHandle,
    pub object_id: u16,
    pub enabled: bool,
}

#[derive(Clone, Copy, Debug)]
/// A numeric-valued object received a new value.
pub struct NumericValueChangedEvent {
    pub working_set: CfHandle,
    pub object_id: u16,
    pub value: u32,
}

#[derive(Clone, Debug)]
/// A string-valued object received a new value.
pub struct StringValueChangedEvent {
    pub working_set: CfHandle,
    pub object_id: u16,
    pub value: String,
}

#[derive(Clone, Copy, Debug)]
/// Child objects moved by a relative offset.
pub struct ChildLocationChangedEvent {
    pub working_set: CfHandle,
    pub parent_object_id: u16,
    pub object_id: u16,
    pub x_offset: i8,
    pub y_offset: i8,
}

#[derive(Clone, Copy, Debug)]
/// Child objects moved to an absolute position.
pub struct ChildPositionChangedEvent {
    pub working_set: CfHandle,
    pub parent_object_id: u16,
    pub object_id: u16,
    pub x: u16,
    pub y: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    #[test]
    /// Listeners fire in subscription order.
    fn test_insertion_order_firing() {
        let order: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher: EventDispatcher<RepaintEvent> = EventDispatcher::new();

        for tag in [1u8, 2, 3] {
            let order = order.clone();
            dispatcher.add_listener(Box::new(move |_| {
                order.borrow_mut().push(tag);
                true
            }));
        }

        dispatcher.invoke(&RepaintEvent { working_set: CfHandle(0) });
        assert_eq!(*order.borrow(), alloc::vec![1, 2, 3]);
    }

    #[test]
    /// A listener returning false still receives the current event but none
    /// after it.
    fn test_unsubscribe_during_fire() {
        let hits: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
        let mut dispatcher: EventDispatcher<RepaintEvent> = EventDispatcher::new();

        let hits_in_listener = hits.clone();
        dispatcher.add_listener(Box::new(move |_| {
            *hits_in_listener.borrow_mut() += 1;
            false // one-shot listener
        }));

        let event = RepaintEvent { working_set: CfHandle(0) };
        dispatcher.invoke(&event);
        dispatcher.invoke(&event);

        assert_eq!(*hits.borrow(), 1);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    /// Explicit removal by ID.
    fn test_remove_listener() {
        let mut dispatcher: EventDispatcher<RepaintEvent> = EventDispatcher::new();
        let id = dispatcher.add_listener(Box::new(|_| true));
        dispatcher.add_listener(Box::new(|_| true));

        dispatcher.remove_listener(id);
        assert_eq!(dispatcher.listener_count(), 1);
    }
}
