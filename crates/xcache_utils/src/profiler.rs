use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PhaseTiming {
    pub name: String,
    pub duration: Duration,
}

/// Records wall-clock durations of named phases in order.
#[derive(Debug, Default)]
pub struct Profiler {
    phases: Vec<PhaseTiming>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_phase<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.push_phase(name, start.elapsed());
        value
    }

    pub fn push_phase(&mut self, name: &str, duration: Duration) {
        self.phases.push(PhaseTiming {
            name: name.to_string(),
            duration,
        });
    }

    pub fn phases(&self) -> &[PhaseTiming] {
        &self.phases
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|phase| phase.duration).sum()
    }
}
