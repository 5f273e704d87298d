use parking_lot::Mutex;
use std::collections::VecDeque;

/// Source of process memory readings, in bytes.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> u64;
}

/// Resident memory of the current process, via `sysinfo`.
pub struct ProcessMemorySampler {
    system: Mutex<sysinfo::System>,
    pid: Option<sysinfo::Pid>,
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::warn!("Current process id unavailable; memory deltas will read as 0");
        }
        Self {
            system: Mutex::new(sysinfo::System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Replays a fixed sequence of readings; the last one repeats.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    readings: Mutex<VecDeque<u64>>,
    last: Mutex<u64>,
}

impl ScriptedSampler {
    pub fn new(readings: impl IntoIterator<Item = u64>) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
            last: Mutex::new(0),
        }
    }
}

impl MemorySampler for ScriptedSampler {
    fn sample(&self) -> u64 {
        let mut last = self.last.lock();
        if let Some(next) = self.readings.lock().pop_front() {
            *last = next;
        }
        *last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_sequence() {
        let sampler = ScriptedSampler::new([300, 100]);
        assert_eq!(sampler.sample(), 300);
        assert_eq!(sampler.sample(), 100);
        assert_eq!(sampler.sample(), 100);
    }

    #[test]
    fn test_process_sampler_reads_something() {
        let sampler = ProcessMemorySampler::new();
        let _buffer = vec![0u8; 1 << 20];
        assert!(sampler.sample() > 0);
    }
}
