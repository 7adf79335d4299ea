//! Load-adjusted energy estimate.
//!
//! The platform reports a base energy figure that knows nothing about the
//! pack on the user's back. The estimate adds an hourly burn proportional to
//! the carried load and never goes below the base figure.

/// Extra kilocalories per kilogram of carried load per hour of active time.
pub const LOAD_BURN_MULTIPLIER: f64 = 3.5;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Fraction of body weight being carried.
///
/// Returns 0 when the body weight is unknown (zero, negative or non-finite)
/// or the load itself is not a usable number.
pub fn load_fraction(load_kg: f64, body_weight_kg: f64) -> f64 {
    if !body_weight_kg.is_finite() || body_weight_kg <= 0.0 {
        return 0.0;
    }
    if !load_kg.is_finite() || load_kg <= 0.0 {
        return 0.0;
    }
    load_kg / body_weight_kg
}

/// Adjust a base energy figure for carried load.
///
/// `elapsed_secs` is active (unpaused) time. The result is always
/// `>= base_kcal` once the base is normalised: a negative or non-finite base
/// counts as zero.
pub fn estimate(base_kcal: f64, load_kg: f64, body_weight_kg: f64, elapsed_secs: f64) -> f64 {
    let base = if base_kcal.is_finite() && base_kcal > 0.0 {
        base_kcal
    } else {
        0.0
    };
    let elapsed = if elapsed_secs.is_finite() && elapsed_secs > 0.0 {
        elapsed_secs
    } else {
        0.0
    };

    let fraction = load_fraction(load_kg, body_weight_kg);
    let additional_rate = LOAD_BURN_MULTIPLIER * body_weight_kg * fraction;
    let additional = additional_rate * (elapsed / SECONDS_PER_HOUR);

    let adjusted = base + additional;
    if adjusted.is_finite() && adjusted > base {
        adjusted
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn no_load_returns_base() {
        assert_eq!(estimate(120.0, 0.0, 80.0, 600.0), 120.0);
    }

    #[test]
    fn one_hour_with_load_adds_multiplier_times_load() {
        let kcal = estimate(300.0, 10.0, 80.0, 3600.0);
        assert!((kcal - (300.0 + LOAD_BURN_MULTIPLIER * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn unknown_body_weight_disables_adjustment() {
        assert_eq!(load_fraction(9.0, 0.0), 0.0);
        assert_eq!(estimate(120.0, 9.0, 0.0, 600.0), 120.0);
        assert_eq!(estimate(120.0, 9.0, f64::NAN, 600.0), 120.0);
    }

    #[test]
    fn negative_base_is_treated_as_zero() {
        assert_eq!(estimate(-5.0, 0.0, 80.0, 600.0), 0.0);
        assert_eq!(estimate(f64::NAN, 0.0, 80.0, 600.0), 0.0);
    }

    #[test]
    fn scenario_ten_minutes_nine_kilos() {
        let kcal = estimate(120.0, 9.0, 80.0, 600.0);
        assert!(kcal > 120.0);
        assert!((kcal - 125.25).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn never_below_base(
            base in 0.0f64..5_000.0,
            load in 0.0f64..100.0,
            weight in 0.0f64..200.0,
            elapsed in 0.0f64..86_400.0,
        ) {
            prop_assert!(estimate(base, load, weight, elapsed) >= base);
        }

        #[test]
        fn monotonic_in_elapsed_time(
            base in 0.0f64..1_000.0,
            load in 0.0f64..50.0,
            weight in 1.0f64..150.0,
            a in 0.0f64..10_000.0,
            b in 0.0f64..10_000.0,
        ) {
            let (short, long) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(estimate(base, load, weight, short) <= estimate(base, load, weight, long));
        }
    }
}
