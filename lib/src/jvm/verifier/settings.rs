/// Knobs for a verification run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Ceiling on the number of blocks the analyzer processes, per block and per frame slot
    ///
    /// A lattice of finite height means every block can only change a bounded number of times,
    /// so the full ceiling is `iteration_factor * blocks * (max_stack + max_locals + 1)`. Hitting
    /// it is reported as an internal fault rather than looping forever.
    pub iteration_factor: usize,

    /// Log (at `warn` level) blocks that are not reachable from the method entry
    pub log_dead_code: bool,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            iteration_factor: 8,
            log_dead_code: true,
        }
    }

    /// Maximum number of block visits for a method
    pub fn iteration_limit(&self, block_count: usize, frame_slots: usize) -> usize {
        self.iteration_factor
            .saturating_mul(block_count)
            .saturating_mul(frame_slots + 1)
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
