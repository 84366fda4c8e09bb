//! Humanization layer: bounded randomized perturbation of nominal block
//! parameters. Every function here is pure given the generator state, so a
//! fixed seed reproduces identical output (required for testing; production
//! runs draw a fresh seed per execution).

use std::f64::consts::TAU;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{HumanizationProfile, Rect};

/// Smallest adjusted duration; jitter never produces zero/negative delays.
pub const MIN_DURATION: Duration = Duration::from_millis(1);

/// Curvature applied when a curved path is requested but the profile does
/// not configure one. A curved request must never degenerate to a straight
/// line.
const FALLBACK_CURVATURE: f64 = 0.12;

/// Pixels of travel per synthesized waypoint.
const PIXELS_PER_WAYPOINT: f64 = 12.0;

/// Build the generator for one run: pinned when the profile carries a seed,
/// otherwise seeded from the OS.
pub fn rng_for(profile: &HumanizationProfile) -> StdRng {
    match profile.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Jitter a nominal duration by ±`delay_jitter` and clamp to [`MIN_DURATION`].
pub fn jitter_duration(
    nominal: Duration,
    profile: &HumanizationProfile,
    rng: &mut impl Rng,
) -> Duration {
    let jitter = profile.delay_jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return nominal.max(MIN_DURATION);
    }
    let factor = 1.0 + rng.random_range(-jitter..=jitter);
    let ms = (nominal.as_millis() as f64 * factor).round() as u64;
    Duration::from_millis(ms).max(MIN_DURATION)
}

/// Offset a point target within a disc of radius `wobble_px`, clamped to
/// stay inside `bounds` when given.
pub fn wobble_point(
    target: (i32, i32),
    profile: &HumanizationProfile,
    rng: &mut impl Rng,
    bounds: Option<Rect>,
) -> (i32, i32) {
    let (x, y) = if profile.wobble_px > 0.0 {
        // Uniform over the disc: sqrt keeps density even across radii.
        let angle = rng.random_range(0.0..TAU);
        let radius = profile.wobble_px * rng.random::<f64>().sqrt();
        (
            target.0 + (radius * angle.cos()).round() as i32,
            target.1 + (radius * angle.sin()).round() as i32,
        )
    } else {
        target
    };

    match bounds {
        Some(r) => (
            x.clamp(r.x, r.x + r.width.saturating_sub(1) as i32),
            y.clamp(r.y, r.y + r.height.saturating_sub(1) as i32),
        ),
        None => (x, y),
    }
}

/// Synthesize cursor waypoints from `from` to `to` along a randomized
/// quadratic Bezier-like curve. The waypoint count scales with path length;
/// each intermediate waypoint gets a smaller wobble of its own. The final
/// waypoint is exactly `to`.
pub fn curved_path(
    from: (i32, i32),
    to: (i32, i32),
    profile: &HumanizationProfile,
    rng: &mut impl Rng,
) -> Vec<(i32, i32)> {
    let dx = (to.0 - from.0) as f64;
    let dy = (to.1 - from.1) as f64;
    let dist = dx.hypot(dy);
    let steps = ((dist / PIXELS_PER_WAYPOINT).ceil() as usize).clamp(2, 64);

    let curvature = if profile.curvature > 0.0 {
        profile.curvature.min(1.0)
    } else {
        FALLBACK_CURVATURE
    };

    // Control point: the segment midpoint pushed out along the normal by a
    // randomized, curvature-scaled fraction of the path length.
    let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
    let bend = (dist * curvature * rng.random_range(0.25..=1.0)).max(1.0) * sign;
    let (nx, ny) = if dist > 0.0 {
        (-dy / dist, dx / dist)
    } else {
        (0.0, -1.0)
    };
    let cx = (from.0 as f64 + to.0 as f64) / 2.0 + nx * bend;
    let cy = (from.1 as f64 + to.1 as f64) / 2.0 + ny * bend;

    let waypoint_wobble = HumanizationProfile {
        wobble_px: (profile.wobble_px * 0.25).min(2.0),
        ..HumanizationProfile::default()
    };

    let mut points = Vec::with_capacity(steps);
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let mt = 1.0 - t;
        let bx = mt * mt * from.0 as f64 + 2.0 * mt * t * cx + t * t * to.0 as f64;
        let by = mt * mt * from.1 as f64 + 2.0 * mt * t * cy + t * t * to.1 as f64;
        let point = (bx.round() as i32, by.round() as i32);
        if i == steps {
            points.push(to);
        } else {
            points.push(wobble_point(point, &waypoint_wobble, rng, None));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(jitter: f64, wobble: f64, curvature: f64) -> HumanizationProfile {
        HumanizationProfile {
            delay_jitter: jitter,
            wobble_px: wobble,
            curvature,
            seed: None,
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let profile = profile(0.3, 0.0, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let nominal = Duration::from_millis(200);
        for _ in 0..1000 {
            let d = jitter_duration(nominal, &profile, &mut rng);
            assert!(d >= Duration::from_millis(140), "below bound: {d:?}");
            assert!(d <= Duration::from_millis(260), "above bound: {d:?}");
            assert!(d >= MIN_DURATION);
        }
    }

    #[test]
    fn jitter_clamps_to_minimum() {
        let full = profile(1.0, 0.0, 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let d = jitter_duration(Duration::from_millis(1), &full, &mut rng);
            assert!(d >= MIN_DURATION);
        }
        assert_eq!(
            jitter_duration(Duration::ZERO, &profile(0.0, 0.0, 0.0), &mut rng),
            MIN_DURATION
        );
    }

    #[test]
    fn jitter_is_deterministic_for_equal_seeds() {
        let profile = profile(0.25, 0.0, 0.0);
        let sample = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..100)
                .map(|_| jitter_duration(Duration::from_millis(500), &profile, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(sample(42), sample(42));
        assert_ne!(sample(42), sample(43));
    }

    #[test]
    fn wobble_stays_within_radius_and_bounds() {
        let profile = profile(0.0, 5.0, 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let (x, y) = wobble_point((100, 100), &profile, &mut rng, None);
            let dist = (((x - 100).pow(2) + (y - 100).pow(2)) as f64).sqrt();
            // Rounding can push one component out by half a pixel.
            assert!(dist <= 5.0 + 1.0, "outside disc: ({x}, {y})");
        }

        let bounds = Rect {
            x: 0,
            y: 0,
            width: 101,
            height: 101,
        };
        for _ in 0..1000 {
            let (x, y) = wobble_point((100, 100), &profile, &mut rng, Some(bounds));
            assert!(x <= 100 && y <= 100);
        }
    }

    #[test]
    fn curved_path_ends_at_target_and_bends() {
        let profile = profile(0.0, 2.0, 0.4);
        let mut rng = StdRng::seed_from_u64(11);
        let from = (0, 0);
        let to = (300, 0);
        let points = curved_path(from, to, &profile, &mut rng);
        assert!(points.len() >= 2);
        assert_eq!(*points.last().unwrap(), to);
        // A curved request must not be a straight line: some waypoint has to
        // leave the segment (here: y == 0).
        assert!(points.iter().any(|&(_, y)| y != 0));
    }

    #[test]
    fn curved_path_bends_even_with_zero_curvature() {
        let profile = profile(0.0, 0.0, 0.0);
        let mut rng = StdRng::seed_from_u64(5);
        let points = curved_path((0, 0), (200, 0), &profile, &mut rng);
        assert!(points.iter().any(|&(_, y)| y != 0));
    }

    #[test]
    fn curved_path_is_deterministic_for_equal_seeds() {
        let profile = profile(0.1, 3.0, 0.5);
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            curved_path((10, 20), (400, 350), &profile, &mut rng)
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn waypoint_count_scales_with_length() {
        let profile = profile(0.0, 0.0, 0.2);
        let mut rng = StdRng::seed_from_u64(2);
        let short = curved_path((0, 0), (20, 0), &profile, &mut rng).len();
        let long = curved_path((0, 0), (600, 0), &profile, &mut rng).len();
        assert!(long > short);
    }
}
