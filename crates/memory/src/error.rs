//! Standalone error types for foundation-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Only hard-fail operations construct a [`MemoryError`]. The composable
//! `try_*` family reports failure through `Option`/`bool` and never reaches
//! this module.

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::warn;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Exhaustion ---
    #[error("{allocator}: out of memory, failed to allocate {amount} bytes")]
    OutOfMemory {
        allocator: &'static str,
        amount: usize,
    },

    #[error("{allocator}: fixed memory exhausted, failed to allocate {amount} bytes")]
    OutOfFixedMemory {
        allocator: &'static str,
        amount: usize,
    },

    // --- Bad allocation size ---
    #[error("{allocator}: node size {passed} exceeds supported maximum {supported}")]
    BadNodeSize {
        allocator: &'static str,
        passed: usize,
        supported: usize,
    },

    #[error("{allocator}: array size {passed} exceeds supported maximum {supported}")]
    BadArraySize {
        allocator: &'static str,
        passed: usize,
        supported: usize,
    },

    #[error("{allocator}: alignment {passed} exceeds supported maximum {supported}")]
    BadAlignment {
        allocator: &'static str,
        passed: usize,
        supported: usize,
    },

    // --- Configuration ---
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl MemoryError {
    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "MEM:ALLOC:OOM",
            Self::OutOfFixedMemory { .. } => "MEM:ALLOC:FIXED",
            Self::BadNodeSize { .. } => "MEM:SIZE:NODE",
            Self::BadArraySize { .. } => "MEM:SIZE:ARRAY",
            Self::BadAlignment { .. } => "MEM:SIZE:ALIGN",
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
        }
    }

    /// Whether the allocator ran out of memory (as opposed to a bad request)
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory { .. } | Self::OutOfFixedMemory { .. }
        )
    }

    /// Whether the request itself was too big or too strictly aligned
    #[must_use]
    pub fn is_bad_allocation_size(&self) -> bool {
        matches!(
            self,
            Self::BadNodeSize { .. } | Self::BadArraySize { .. } | Self::BadAlignment { .. }
        )
    }

    /// Name of the allocator that produced the error, if any
    #[must_use]
    pub fn allocator(&self) -> Option<&'static str> {
        match self {
            Self::OutOfMemory { allocator, .. }
            | Self::OutOfFixedMemory { allocator, .. }
            | Self::BadNodeSize { allocator, .. }
            | Self::BadArraySize { allocator, .. }
            | Self::BadAlignment { allocator, .. } => Some(allocator),
            Self::InvalidConfig { .. } => None,
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create out of memory error
    pub fn out_of_memory(allocator: &'static str, amount: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(allocator, amount, "allocator out of memory");

        Self::OutOfMemory { allocator, amount }
    }

    /// Create fixed memory exhausted error
    pub fn out_of_fixed_memory(allocator: &'static str, amount: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(allocator, amount, "fixed allocator exhausted");

        Self::OutOfFixedMemory { allocator, amount }
    }

    /// Create bad node size error
    pub fn bad_node_size(allocator: &'static str, passed: usize, supported: usize) -> Self {
        Self::BadNodeSize {
            allocator,
            passed,
            supported,
        }
    }

    /// Create bad array size error
    pub fn bad_array_size(allocator: &'static str, passed: usize, supported: usize) -> Self {
        Self::BadArraySize {
            allocator,
            passed,
            supported,
        }
    }

    /// Create bad alignment error
    pub fn bad_alignment(allocator: &'static str, passed: usize, supported: usize) -> Self {
        Self::BadAlignment {
            allocator,
            passed,
            supported,
        }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_message() {
        let error = MemoryError::out_of_memory("heap", 1024);
        assert!(error.to_string().contains("1024"));
        assert!(error.to_string().contains("heap"));
        assert!(error.is_out_of_memory());
        assert!(!error.is_bad_allocation_size());
    }

    #[test]
    fn test_bad_size_errors() {
        let node = MemoryError::bad_node_size("pool", 64, 16);
        let array = MemoryError::bad_array_size("pool", 4096, 1024);
        let align = MemoryError::bad_alignment("pool", 64, 16);

        for error in [&node, &array, &align] {
            assert!(error.is_bad_allocation_size());
            assert_eq!(error.allocator(), Some("pool"));
        }
        assert!(align.to_string().contains("alignment"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MemoryError::out_of_memory("a", 1).code(), "MEM:ALLOC:OOM");
        assert_eq!(
            MemoryError::out_of_fixed_memory("a", 1).code(),
            "MEM:ALLOC:FIXED"
        );
        assert_eq!(
            MemoryError::invalid_config("zero node size").code(),
            "MEM:CONFIG:INVALID"
        );
    }
}
