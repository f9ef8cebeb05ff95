//! # Probability Checks

/// Check that a value is a probability.
///
/// # Returns
///
/// `Ok(prob)` when `prob` is in ``[0.0, 1.0]``, otherwise an error.
pub fn try_probability(prob: f64) -> anyhow::Result<f64> {
    if (0.0..=1.0).contains(&prob) {
        Ok(prob)
    } else {
        anyhow::bail!("Expected a probability in [0.0, 1.0], got {prob}")
    }
}

/// Check that a value is a probability.
///
/// This is the ``panic``-ing variant of [`try_probability`].
///
/// # Panics
///
/// If `prob` is not in ``[0.0, 1.0]``.
pub fn expect_probability(prob: f64) -> f64 {
    match try_probability(prob) {
        Ok(p) => p,
        Err(e) => panic!("{}", e),
    }
}
