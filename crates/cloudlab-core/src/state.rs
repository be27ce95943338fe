use std::collections::{BinaryHeap, HashSet};

use rand::distributions::uniform::{SampleRange, SampleUniform};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::component::Id;
use crate::event::{Event, EventData, EventId};
use crate::log::log_incorrect_event;

/// Epsilon to compare floating point values for equality.
pub const EPSILON: f64 = 1e-12;

pub struct SimulationState {
    clock: f64,
    rand: Pcg64,
    events: BinaryHeap<Event>,
    canceled_events: HashSet<EventId>,
    event_count: u64,
    stopped: bool,
}

impl SimulationState {
    pub fn new(seed: u64) -> Self {
        Self {
            clock: 0.0,
            rand: Pcg64::seed_from_u64(seed),
            events: BinaryHeap::new(),
            canceled_events: HashSet::new(),
            event_count: 0,
            stopped: false,
        }
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn advance_time(&mut self, time: f64) {
        if time > self.clock {
            self.clock = time;
        }
    }

    pub fn rand(&mut self) -> f64 {
        self.rand.gen_range(0.0..1.0)
    }

    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: SampleUniform,
        R: SampleRange<T>,
    {
        self.rand.gen_range(range)
    }

    pub fn add_event<T>(&mut self, data: T, src: Id, dst: Id, delay: f64) -> EventId
    where
        T: EventData,
    {
        if delay < -EPSILON {
            let event = self.make_event(data, src, dst, self.clock + delay);
            log_incorrect_event(event, &format!("negative delay {}", delay));
            panic!("Causality violation: event delay is negative, events from the past are not allowed");
        }
        let time = self.clock + delay.max(0.);
        self.push_event(data, src, dst, time)
    }

    pub fn add_event_at<T>(&mut self, data: T, src: Id, dst: Id, time: f64) -> EventId
    where
        T: EventData,
    {
        if time < self.clock - EPSILON {
            let event = self.make_event(data, src, dst, time);
            log_incorrect_event(event, &format!("time {} is before current time {}", time, self.clock));
            panic!("Causality violation: event time is before the current simulation time");
        }
        let time = time.max(self.clock);
        self.push_event(data, src, dst, time)
    }

    fn make_event<T: EventData>(&self, data: T, src: Id, dst: Id, time: f64) -> Event {
        Event {
            id: self.event_count,
            time,
            src,
            dst,
            data: Box::new(data),
        }
    }

    fn push_event<T: EventData>(&mut self, data: T, src: Id, dst: Id, time: f64) -> EventId {
        let event = self.make_event(data, src, dst, time);
        let event_id = event.id;
        if self.stopped {
            // a stopped simulation never delivers anything, the event is born cancelled
            self.canceled_events.insert(event_id);
        }
        self.events.push(event);
        self.event_count += 1;
        event_id
    }

    pub fn next_event(&mut self) -> Option<Event> {
        while let Some(event) = self.events.pop() {
            if !self.canceled_events.remove(&event.id) {
                self.clock = event.time;
                return Some(event);
            }
        }
        None
    }

    pub fn peek_event(&mut self) -> Option<&Event> {
        loop {
            let head_id = self.events.peek()?.id;
            if self.canceled_events.remove(&head_id) {
                self.events.pop();
            } else {
                return self.events.peek();
            }
        }
    }

    pub fn cancel_event(&mut self, id: EventId) {
        if self.events.iter().any(|e| e.id == id) {
            self.canceled_events.insert(id);
        }
    }

    pub fn cancel_events<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        let mut cancelled = 0;
        for event in self.events.iter() {
            if pred(event) && self.canceled_events.insert(event.id) {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        self.cancel_events(|_| true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn pending_event_count(&self) -> usize {
        self.events.len() - self.canceled_events.len()
    }

    pub fn dump_events(&self) -> Vec<Event> {
        let mut output = self
            .events
            .iter()
            .filter(|e| !self.canceled_events.contains(&e.id))
            .cloned()
            .collect::<Vec<_>>();
        output.sort();
        // the event order is inverted for BinaryHeap
        output.reverse();
        output
    }
}
