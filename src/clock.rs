use std::collections::VecDeque;

/// Default virtual clock rate: one tick per microsecond
pub const DEFAULT_CLOCK_HZ: u64 = 1_000_000;

/// Event types that can be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// Next edge of a drive's index pulse
    IndexPulse { drive: usize },
}

/// Identifies one scheduled event so it can be cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Scheduled event with timing information
#[derive(Debug)]
struct ScheduledEvent {
    cycle: u64,
    handle: TimerHandle,
    event: ClockEvent,
}

/// Deterministic virtual clock. Nothing here touches wall time: the owner
/// advances it explicitly and receives the events that came due.
#[derive(Debug)]
pub struct Clock {
    /// Tick rate in Hz
    hz: u64,

    /// Total ticks elapsed
    total_cycles: u64,

    /// Pending events, ordered by cycle then by scheduling order
    events: VecDeque<ScheduledEvent>,

    next_handle: u64,
}

impl Clock {
    pub fn new(hz: u64) -> Self {
        Self {
            hz: hz.max(1),
            total_cycles: 0,
            events: VecDeque::new(),
            next_handle: 0,
        }
    }

    /// Reset the clock to initial state, dropping every pending event
    pub fn reset(&mut self) {
        self.total_cycles = 0;
        self.events.clear();
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }

    /// Get total ticks
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// Convert a duration in seconds to ticks, never less than one tick
    pub fn cycles_from_secs(&self, secs: f64) -> u64 {
        ((secs * self.hz as f64).round() as u64).max(1)
    }

    /// Schedule `event` to fire `delay` ticks from now
    pub fn schedule_in(&mut self, delay: u64, event: ClockEvent) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;

        let cycle = self.total_cycles.saturating_add(delay);
        let pos = self
            .events
            .iter()
            .position(|scheduled| scheduled.cycle > cycle)
            .unwrap_or(self.events.len());
        self.events.insert(
            pos,
            ScheduledEvent {
                cycle,
                handle,
                event,
            },
        );

        handle
    }

    /// Cancel a pending event. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.events.iter().position(|e| e.handle == handle) {
            Some(pos) => {
                self.events.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.events.iter().any(|e| e.handle == handle)
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Ticks until the next pending event
    pub fn cycles_until_next_event(&self) -> Option<u64> {
        self.events
            .front()
            .map(|e| e.cycle.saturating_sub(self.total_cycles))
    }

    /// Pop the earliest event due at or before `deadline`, moving the clock to
    /// the event's time. Events scheduled while handling it are seen by the
    /// next call.
    pub fn pop_due(&mut self, deadline: u64) -> Option<(TimerHandle, ClockEvent)> {
        match self.events.front() {
            Some(event) if event.cycle <= deadline => {
                let scheduled = self.events.pop_front()?;
                self.total_cycles = self.total_cycles.max(scheduled.cycle);
                Some((scheduled.handle, scheduled.event))
            }
            _ => None,
        }
    }

    /// Move the clock forward to `deadline` without firing anything
    pub fn advance_to(&mut self, deadline: u64) {
        self.total_cycles = self.total_cycles.max(deadline);
    }

    /// Advance the clock by the specified number of ticks, returning the
    /// events that came due in firing order
    pub fn tick(&mut self, cycles: u64) -> Vec<(TimerHandle, ClockEvent)> {
        let deadline = self.total_cycles.saturating_add(cycles);
        let mut triggered_events = Vec::new();

        while let Some(event) = self.pop_due(deadline) {
            triggered_events.push(event);
        }
        self.advance_to(deadline);

        triggered_events
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_HZ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PULSE: ClockEvent = ClockEvent::IndexPulse { drive: 0 };

    #[test]
    fn test_events_fire_in_order() {
        let mut clock = Clock::default();
        clock.schedule_in(300, ClockEvent::IndexPulse { drive: 1 });
        clock.schedule_in(100, ClockEvent::IndexPulse { drive: 0 });
        clock.schedule_in(300, ClockEvent::IndexPulse { drive: 2 });

        let events: Vec<ClockEvent> = clock.tick(1000).into_iter().map(|(_, e)| e).collect();

        assert_eq!(
            events,
            vec![
                ClockEvent::IndexPulse { drive: 0 },
                ClockEvent::IndexPulse { drive: 1 },
                ClockEvent::IndexPulse { drive: 2 },
            ]
        );
        assert_eq!(clock.total_cycles(), 1000);
    }

    #[test]
    fn test_cancel() {
        let mut clock = Clock::default();
        let handle = clock.schedule_in(50, PULSE);

        assert!(clock.is_pending(handle));
        assert!(clock.cancel(handle));
        assert!(!clock.cancel(handle));
        assert!(clock.tick(100).is_empty());
    }

    #[test]
    fn test_pop_due_moves_clock_to_event() {
        let mut clock = Clock::default();
        clock.schedule_in(40, PULSE);

        assert!(clock.pop_due(39).is_none());
        assert!(clock.pop_due(100).is_some());
        assert_eq!(clock.total_cycles(), 40);
        assert_eq!(clock.cycles_until_next_event(), None);
    }

    #[test]
    fn test_cycles_from_secs() {
        let clock = Clock::new(1_000_000);
        assert_eq!(clock.cycles_from_secs(0.2), 200_000);
        assert_eq!(clock.cycles_from_secs(0.0), 1);
    }
}
