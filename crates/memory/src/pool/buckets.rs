//! Size class mappings for pool lists

use crate::utils::ilog2_ceil;

/// Maps node sizes to pool list buckets
///
/// A bucket serves every size up to `size_from_index(index)`.
pub trait BucketType {
    /// Number of buckets needed to serve sizes up to `max_node_size`
    fn bucket_count(max_node_size: usize) -> usize;

    /// Bucket serving `size`
    fn index_from_size(size: usize) -> usize;

    /// Largest size served by bucket `index`
    fn size_from_index(index: usize) -> usize;
}

/// One bucket per exact size
///
/// No memory is wasted, but the bucket count grows linearly with the
/// maximum node size.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityBuckets;

impl BucketType for IdentityBuckets {
    fn bucket_count(max_node_size: usize) -> usize {
        max_node_size.max(1)
    }

    fn index_from_size(size: usize) -> usize {
        size.max(1) - 1
    }

    fn size_from_index(index: usize) -> usize {
        index + 1
    }
}

/// One bucket per power of two
///
/// Wastes up to half of each node but needs only a logarithmic number of
/// buckets.
#[derive(Debug, Clone, Copy, Default)]
pub struct Log2Buckets;

impl BucketType for Log2Buckets {
    fn bucket_count(max_node_size: usize) -> usize {
        ilog2_ceil(max_node_size.max(1)) + 1
    }

    fn index_from_size(size: usize) -> usize {
        ilog2_ceil(size.max(1))
    }

    fn size_from_index(index: usize) -> usize {
        1 << index
    }
}
