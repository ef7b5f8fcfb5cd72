// ABOUTME: Resource limits and runtime constants for sandboxed execution

/// Hard limits enforced on one evaluation. Hosts may raise or lower any of
/// them per call through `RunOptions`.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Wall-clock deadline for the whole program, milliseconds.
    pub timeout_ms: u64,
    /// Approximate heap budget charged against value construction.
    pub max_heap_bytes: usize,
    /// Distinct symbols + keywords allowed in the source, checked before
    /// execution begins.
    pub max_symbols: usize,
    /// Per-line truncation for `println` output.
    pub max_print_length: usize,
    /// `recur` re-entries allowed per loop/fn frame.
    pub max_iterations: u32,
    /// Non-tail call depth bound.
    pub max_recursion_depth: u32,
    /// Optional secondary deadline per pmap/pcalls branch, milliseconds.
    pub pmap_timeout_ms: Option<u64>,
    /// Concurrent OS threads per parallel fan-out.
    pub pmap_max_workers: usize,
    /// Branches a single pmap/pcalls may spawn in total.
    pub pmap_max_branches: usize,
    /// Truncation threshold for each entry of `*1`/`*2`/`*3`.
    pub turn_history_bytes: usize,
    /// How many previous turn results are addressable.
    pub turn_history_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            timeout_ms: 1_000,
            max_heap_bytes: 10 * 1024 * 1024,
            max_symbols: 10_000,
            max_print_length: 2_000,
            max_iterations: 1_000,
            max_recursion_depth: 200,
            pmap_timeout_ms: None,
            pmap_max_workers: 32,
            pmap_max_branches: 4_096,
            turn_history_bytes: 1_024,
            turn_history_len: 3,
        }
    }
}

/// Regex patterns longer than this are rejected before compilation.
pub const REGEX_MAX_PATTERN_BYTES: usize = 256;

/// Regex scans see at most this many leading bytes of the input.
pub const REGEX_MAX_INPUT_BYTES: usize = 32 * 1024;

/// Compiled-program size cap handed to the regex engine; the linear-time
/// engine cannot backtrack, so the spec's step budget becomes a size bound.
pub const REGEX_SIZE_LIMIT: usize = 100_000;

/// `(range ...)` refuses to build more elements than this.
pub const MAX_RANGE_LEN: i64 = 100_000;

/// Pretty-printer recursion bound; deeper structure renders as `...`.
pub const MAX_PRINT_DEPTH: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults() {
        let limits = Limits::default();
        assert_eq!(limits.timeout_ms, 1_000);
        assert_eq!(limits.max_heap_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.max_symbols, 10_000);
        assert_eq!(limits.max_print_length, 2_000);
        assert_eq!(limits.max_iterations, 1_000);
        assert_eq!(limits.turn_history_bytes, 1_024);
    }
}
