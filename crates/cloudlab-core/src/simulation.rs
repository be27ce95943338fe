//! Simulation configuration and execution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::Level::Trace;
use log::{debug, log_enabled, trace};
use rand::distributions::uniform::{SampleRange, SampleUniform};
use serde_json::json;

use crate::component::Id;
use crate::context::SimulationContext;
use crate::event::Event;
use crate::handler::{EventCancellationPolicy, EventHandler};
use crate::log::{event_details, get_colored, log_undelivered_event};
use crate::state::SimulationState;

/// Represents a simulation, provides methods for its configuration and execution.
///
/// The simulation is strictly single-threaded: components never run concurrently, and an event handler
/// always runs to completion before the next event is taken from the queue.
pub struct Simulation {
    sim_state: Rc<RefCell<SimulationState>>,
    name_to_id: HashMap<String, Id>,
    names: Rc<RefCell<Vec<String>>>,
    handlers: Vec<Option<Rc<RefCell<dyn EventHandler>>>>,
}

impl Simulation {
    /// Creates a new simulation with specified random seed.
    pub fn new(seed: u64) -> Self {
        Self {
            sim_state: Rc::new(RefCell::new(SimulationState::new(seed))),
            name_to_id: HashMap::new(),
            names: Rc::new(RefCell::new(Vec::new())),
            handlers: Vec::new(),
        }
    }

    fn register(&mut self, name: &str) -> Id {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.name_to_id.len() as Id;
        self.name_to_id.insert(name.to_owned(), id);
        self.names.borrow_mut().push(name.to_owned());
        self.handlers.push(None);
        id
    }

    /// Returns the identifier of component by its name.
    ///
    /// Panics if component with such name does not exist.
    pub fn lookup_id(&self, name: &str) -> Id {
        *self
            .name_to_id
            .get(name)
            .unwrap_or_else(|| panic!("Component {} does not exist", name))
    }

    /// Returns the name of component by its identifier.
    ///
    /// Panics if component with such Id does not exist.
    pub fn lookup_name(&self, id: Id) -> String {
        self.names.borrow()[id as usize].clone()
    }

    /// Creates a new simulation context with specified name.
    ///
    /// Component ids are assigned sequentially starting from 0.
    /// Creating a context for an already registered name reuses its id.
    pub fn create_context<S>(&mut self, name: S) -> SimulationContext
    where
        S: AsRef<str>,
    {
        let ctx = SimulationContext::new(
            self.register(name.as_ref()),
            name.as_ref(),
            self.sim_state.clone(),
            self.names.clone(),
        );
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Created context: {}",
            self.time(),
            get_colored("DEBUG", colored::Color::Blue),
            json!({"name": ctx.name(), "id": ctx.id()})
        );
        ctx
    }

    /// Registers the event handler implementation for component with specified name, returns the component Id.
    pub fn add_handler<S>(&mut self, name: S, handler: Rc<RefCell<dyn EventHandler>>) -> Id
    where
        S: AsRef<str>,
    {
        let id = self.register(name.as_ref());
        self.handlers[id as usize] = Some(handler);
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Added handler: {}",
            self.time(),
            get_colored("DEBUG", colored::Color::Blue),
            json!({"name": name.as_ref(), "id": id})
        );
        id
    }

    /// Removes the event handler for component with specified name
    /// and cancels its pending events according to the specified policy.
    ///
    /// Events destined for this component which are not cancelled will be logged as undelivered.
    pub fn remove_handler<S>(&mut self, name: S, cancel_policy: EventCancellationPolicy)
    where
        S: AsRef<str>,
    {
        let id = self.lookup_id(name.as_ref());
        self.handlers[id as usize] = None;
        let mut state = self.sim_state.borrow_mut();
        match cancel_policy {
            EventCancellationPolicy::Incoming => state.cancel_events(|e| e.dst == id),
            EventCancellationPolicy::Outgoing => state.cancel_events(|e| e.src == id),
            EventCancellationPolicy::All => state.cancel_events(|e| e.src == id || e.dst == id),
            EventCancellationPolicy::None => 0,
        };
        debug!(
            target: "simulation",
            "[{:.3} {} simulation] Removed handler: {}",
            state.time(),
            get_colored("DEBUG", colored::Color::Blue),
            json!({"name": name.as_ref(), "id": id})
        );
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim_state.borrow().time()
    }

    /// Performs a single step through the simulation.
    ///
    /// Takes the next event from the queue, advances the simulation time to event time and tries to process it
    /// by invoking the [`EventHandler::on()`](crate::EventHandler::on()) method of the corresponding event handler.
    /// If there is no handler registered for component with Id `event.dst`, logs the undelivered event and discards it.
    ///
    /// Returns `true` if some pending event was found (no matter was it properly processed or not) and `false`
    /// otherwise.
    pub fn step(&mut self) -> bool {
        let next = self.sim_state.borrow_mut().next_event();
        let Some(event) = next else {
            return false;
        };
        if log_enabled!(Trace) {
            let src_name = self.lookup_name(event.src);
            let dst_name = self.lookup_name(event.dst);
            trace!(
                target: &dst_name,
                "[{:.3} {} {}] {}",
                event.time,
                get_colored("EVENT", colored::Color::BrightBlack),
                dst_name,
                event_details(&event, &src_name)
            );
        }
        match self.handlers.get(event.dst as usize) {
            Some(Some(handler)) => handler.clone().borrow_mut().on(event),
            _ => log_undelivered_event(event),
        }
        true
    }

    /// Performs the specified number of steps through the simulation.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn steps(&mut self, step_count: u64) -> bool {
        for _ in 0..step_count {
            if !self.step() {
                return false;
            }
        }
        true
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Steps through the simulation with duration limit.
    ///
    /// Processes events until the next event time is above `current_time + duration`
    /// or there are no pending events left.
    ///
    /// Returns `true` if there could be more pending events and `false` otherwise.
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        let end_time = self.time() + duration;
        self.step_until_time(end_time)
    }

    /// Steps through the simulation until the specified stop time.
    ///
    /// All events with time not greater than `time` are processed, later events stay pending.
    /// When the method returns, the simulation time equals `time` (unless it was already greater).
    ///
    /// Returns `true` if there are more pending events and `false` otherwise.
    pub fn step_until_time(&mut self, time: f64) -> bool {
        loop {
            let next_time = self.sim_state.borrow_mut().peek_event().map(|e| e.time);
            match next_time {
                Some(t) if t <= time => {
                    self.step();
                }
                Some(_) => {
                    self.sim_state.borrow_mut().advance_time(time);
                    return true;
                }
                None => {
                    self.sim_state.borrow_mut().advance_time(time);
                    return false;
                }
            }
        }
    }

    /// Returns a random float in the range _[0, 1)_
    /// using the simulation-wide random number generator.
    pub fn rand(&mut self) -> f64 {
        self.sim_state.borrow_mut().rand()
    }

    /// Returns a random number in the specified range
    /// using the simulation-wide random number generator.
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.sim_state.borrow_mut().gen_range(range)
    }

    /// Returns the total number of created events.
    ///
    /// Note that cancelled events are also counted here.
    pub fn event_count(&self) -> u64 {
        self.sim_state.borrow().event_count()
    }

    /// Returns the number of events which are scheduled but not yet delivered or cancelled.
    pub fn pending_event_count(&self) -> usize {
        self.sim_state.borrow().pending_event_count()
    }

    /// Cancels events that satisfy the given predicate function, returns the number of cancelled events.
    ///
    /// Note that already processed events cannot be cancelled.
    pub fn cancel_events<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        self.sim_state.borrow_mut().cancel_events(pred)
    }

    /// Stops the simulation, all pending events are cancelled.
    pub fn stop(&mut self) {
        self.sim_state.borrow_mut().stop();
    }

    /// Returns `true` if the simulation was stopped.
    pub fn is_stopped(&self) -> bool {
        self.sim_state.borrow().is_stopped()
    }

    /// Returns a copy of pending events in the order of their delivery.
    pub fn dump_events(&self) -> Vec<Event> {
        self.sim_state.borrow().dump_events()
    }
}
