use crate::error::{PricerError, Result};

/// Splits `items` into contiguous chunks of at most `max_size`, preserving order.
///
/// Only the last chunk may be shorter; an empty input yields no chunks.
///
/// # Errors
/// Returns [`PricerError::InvalidArgument`] when `max_size` is zero.
pub fn split_into_batches<T: Clone>(items: &[T], max_size: usize) -> Result<Vec<Vec<T>>> {
    if max_size == 0 {
        return Err(PricerError::InvalidArgument(
            "batch size must be positive".to_string(),
        ));
    }

    Ok(items.chunks(max_size).map(<[T]>::to_vec).collect())
}
