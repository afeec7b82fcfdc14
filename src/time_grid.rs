//! Sample timestamp generation.

use std::time::Duration;

use crate::error::FramecastError;

/// Smallest accepted sampling interval. Finer grids would collapse onto the
/// same nanosecond timestamps and break strict ordering.
pub const MIN_INTERVAL_SECS: f64 = 0.001;

/// Compute the timestamps at which frames are sampled.
///
/// Returns `0, interval, 2 * interval, ...` truncated strictly before
/// `duration_secs`. Each timestamp is computed as `k * interval` rather than
/// by repeated addition so long videos do not accumulate rounding drift.
///
/// # Errors
///
/// Returns [`FramecastError::InvalidInput`] if `interval_secs` is not a
/// finite number of at least [`MIN_INTERVAL_SECS`], or if `duration_secs`
/// is not a positive finite number.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// let grid = framecast::time_grid(17.0, 5.0).unwrap();
/// assert_eq!(grid, vec![
///     Duration::ZERO,
///     Duration::from_secs(5),
///     Duration::from_secs(10),
///     Duration::from_secs(15),
/// ]);
/// ```
pub fn time_grid(duration_secs: f64, interval_secs: f64) -> Result<Vec<Duration>, FramecastError> {
    if !interval_secs.is_finite() || interval_secs < MIN_INTERVAL_SECS {
        return Err(FramecastError::InvalidInput(format!(
            "interval must be at least {MIN_INTERVAL_SECS} seconds, got {interval_secs}"
        )));
    }
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(FramecastError::InvalidInput(format!(
            "media duration must be a positive number of seconds, got {duration_secs}"
        )));
    }

    let mut grid = Vec::with_capacity((duration_secs / interval_secs).ceil() as usize);
    let mut step: u64 = 0;
    loop {
        let seconds = step as f64 * interval_secs;
        if seconds >= duration_secs {
            break;
        }
        grid.push(Duration::from_secs_f64(seconds));
        step += 1;
    }

    Ok(grid)
}
