#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IngestLimits {
    pub max_line_bytes: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        // Taps routinely emit wide records; keep this generous.
        Self {
            max_line_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    pub limits: IngestLimits,
    /// Attach the raw line to records whose parse failed so callers can log it.
    pub capture_failed_lines: bool,
}

impl IngestConfig {
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.limits.max_line_bytes = max_line_bytes;
        self
    }

    pub fn capture_failed_lines(mut self, capture: bool) -> Self {
        self.capture_failed_lines = capture;
        self
    }
}
