/// Single-flight guard for connection attempts.
///
/// Every entry gets a fresh generation. Async work captures its generation and
/// checks `is_current` before applying results, so a retry can abandon an
/// attempt without waiting for its pending futures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptGuard {
    generation: u64,
    in_flight: bool,
}

impl AttemptGuard {
    /// Enter a new attempt unless one is already in flight.
    pub fn try_enter(&mut self) -> Option<u64> {
        if self.in_flight {
            return None;
        }
        Some(self.begin())
    }

    /// Enter a new attempt, abandoning whichever one is in flight.
    pub fn force_enter(&mut self) -> u64 {
        self.begin()
    }

    /// Release the guard if `generation` still owns it.
    pub fn release(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.in_flight = false;
            true
        } else {
            false
        }
    }

    /// Invalidate the current attempt without starting another.
    pub fn abandon(&mut self) {
        self.generation = self.generation.saturating_add(1);
        self.in_flight = false;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn begin(&mut self) -> u64 {
        self.generation = self.generation.saturating_add(1);
        self.in_flight = true;
        self.generation
    }
}
