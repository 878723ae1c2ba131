/// Change notifications raised by tables, schemas and derived collections.
///
/// Handlers run synchronously on the stack of the mutation that raised the
/// event, after the mutation has completed. A handler may itself mutate the
/// table; the handler list is snapshotted before dispatch so subscribing or
/// unsubscribing from inside a handler is allowed.

use crate::column::Column;
use crate::relation::ChildRelation;
use crate::row::Row;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Notifications raised by a `Table`, `FilteredTable` or `ChildRowCollection`.
#[derive(Debug, Clone)]
pub enum TableEvent {
    /// A row was inserted at the given position.
    RowAdded { row: Row, index: usize },

    /// A row was removed from the given position.
    RowRemoved { row: Row, index: usize },

    /// A column value changed (or a calculated value was invalidated).
    ValueChanged { row: Row, column: Column },

    /// A bulk-load scope ended; consumers should resynchronize.
    LoadCompleted,
}

impl TableEvent {
    /// The row this event concerns, if any.
    pub fn row(&self) -> Option<&Row> {
        match self {
            TableEvent::RowAdded { row, .. }
            | TableEvent::RowRemoved { row, .. }
            | TableEvent::ValueChanged { row, .. } => Some(row),
            TableEvent::LoadCompleted => None,
        }
    }
}

/// Notifications raised by a `TableSchema`; exactly one per mutation.
#[derive(Debug, Clone)]
pub enum SchemaEvent {
    ColumnAdded(Column),
    ColumnRemoved(Column),
    ColumnRenamed { column: Column, old_name: String },
    /// A column's constraints changed (nullability, uniqueness, index, default).
    ColumnChanged(Column),
    RelationAdded(ChildRelation),
    RelationRemoved(ChildRelation),
    PrimaryKeyChanged(Option<Column>),
}

type Handler<E> = Rc<dyn Fn(&E)>;

/// An ordered list of event handlers.
pub struct EventHandlers<E> {
    next_id: Cell<u64>,
    handlers: RefCell<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> Default for EventHandlers<E> {
    fn default() -> Self {
        EventHandlers {
            next_id: Cell::new(1),
            handlers: RefCell::new(Vec::new()),
        }
    }
}

impl<E> EventHandlers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, Rc::new(handler)));
        id
    }

    /// Returns false if the subscription was not found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.borrow().is_empty()
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}

impl<E> fmt::Debug for EventHandlers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHandlers {{ count: {} }}", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let handlers: EventHandlers<u32> = EventHandlers::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let id = handlers.subscribe(move |v| sink.borrow_mut().push(*v));
        handlers.emit(&1);
        assert!(handlers.unsubscribe(id));
        assert!(!handlers.unsubscribe(id));
        handlers.emit(&2);

        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let handlers: Rc<EventHandlers<u32>> = Rc::new(EventHandlers::new());
        let inner = handlers.clone();
        handlers.subscribe(move |_| {
            inner.subscribe(|_| {});
        });
        handlers.emit(&0);
        assert_eq!(handlers.len(), 2);
    }
}
