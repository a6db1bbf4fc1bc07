use serde::{Deserialize, Serialize};

/// What to do when a local block is requested that was not prepared for the current element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StaleBlockPolicy {
    /// Hand out an empty block and log a warning.
    #[default]
    Warn,
    /// Fail the checked (`try_*`) block requests.
    Error,
}

/// Options of an assembly and the loops driving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyOptions {
    /// Volume quadrature order. `None` uses twice the highest variable order (at least 1).
    pub quadrature_order: Option<usize>,
    /// Face quadrature order. `None` uses the volume order.
    pub face_quadrature_order: Option<usize>,
    /// Number of elements (or mortar segments) between drains of the contribution cache.
    pub cache_flush_interval: usize,
    /// Mortar segments with a smaller measure are skipped.
    pub mortar_segment_tolerance: f64,
    pub stale_block_policy: StaleBlockPolicy,
    /// Accumulate `|contribution|` into the absolute residual vector when one is provided.
    pub compute_absolute_residual: bool,
    /// Reject out-of-order reinit/prepare/accumulate calls.
    pub check_transitions: bool,
    /// Worker threads for threaded loops. `None` uses the global rayon pool.
    pub num_threads: Option<usize>,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            quadrature_order: None,
            face_quadrature_order: None,
            cache_flush_interval: 20,
            mortar_segment_tolerance: 1e-8,
            stale_block_policy: StaleBlockPolicy::Warn,
            compute_absolute_residual: false,
            check_transitions: true,
            num_threads: None,
        }
    }
}

impl AssemblyOptions {
    pub fn with_quadrature_order(mut self, order: usize) -> Self {
        self.quadrature_order = Some(order);
        self
    }

    pub fn with_face_quadrature_order(mut self, order: usize) -> Self {
        self.face_quadrature_order = Some(order);
        self
    }

    pub fn with_cache_flush_interval(mut self, interval: usize) -> Self {
        self.cache_flush_interval = interval.max(1);
        self
    }

    pub fn with_mortar_segment_tolerance(mut self, tolerance: f64) -> Self {
        self.mortar_segment_tolerance = tolerance;
        self
    }

    pub fn with_stale_block_policy(mut self, policy: StaleBlockPolicy) -> Self {
        self.stale_block_policy = policy;
        self
    }

    pub fn with_absolute_residual(mut self, enabled: bool) -> Self {
        self.compute_absolute_residual = enabled;
        self
    }

    pub fn with_transition_checks(mut self, enabled: bool) -> Self {
        self.check_transitions = enabled;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Volume quadrature order for variables of at most `max_order`.
    pub fn volume_order(&self, max_order: usize) -> usize {
        self.quadrature_order
            .unwrap_or_else(|| (2 * max_order).max(1))
    }

    pub fn face_order(&self, max_order: usize) -> usize {
        self.face_quadrature_order
            .unwrap_or_else(|| self.volume_order(max_order))
    }

    /// The flush interval, never zero.
    pub fn flush_interval(&self) -> usize {
        self.cache_flush_interval.max(1)
    }
}
