//! Event handling.

use crate::event::Event;

/// Trait for consuming events in simulation components.
pub trait EventHandler {
    /// Processes event.
    ///
    /// The simulation clock already equals `event.time` when this method is called.
    fn on(&mut self, event: Event);
}

/// Enables the use of pattern matching syntax for processing different types of events
/// by downcasting the event payload from [`EventData`](crate::event::EventData) to user-defined types.
///
/// Match arms need not be exhaustive. If the event payload does not match any of specified arms,
/// the event is logged as unhandled under `ERROR` level.
///
/// ```ignore
/// cast!(match event.data {
///     VmCreateRequest { vm } => {
///         self.on_vm_create_request(vm, event.src);
///     }
///     UpdateProcessing {} => {
///         self.update_processing();
///     }
/// })
/// ```
#[macro_export]
macro_rules! cast {
    ( match $event:ident.data { $( $type:ident { $($tt:tt)* } => { $($expr:tt)* } )+ } ) => {
        $(
            if $event.data.is::<$type>() {
                if let Ok(__value) = $event.data.downcast::<$type>() {
                    let $type { $($tt)* } = *__value;
                    $($expr)*
                }
            } else
        )*
        {
            $crate::log::log_unhandled_event($event);
        }
    }
}

/// Specifies which pending events are cancelled on event handler removal.
pub enum EventCancellationPolicy {
    /// Cancel events destined to the component.
    Incoming,
    /// Cancel events produced by the component.
    Outgoing,
    /// Cancel all events related to the component.
    All,
    /// Do not cancel events.
    None,
}
