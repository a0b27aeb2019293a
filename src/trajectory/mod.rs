//! Human-like pointer trajectory synthesis
//!
//! Turns a start point, an end point and a device profile into a
//! time-stamped list of intermediate pointer positions. Motion follows an
//! easing curve, carries Gaussian jitter that settles towards the target,
//! occasionally overshoots and corrects, and pauses now and then the way a
//! hand on a mouse (or a thumb on glass) does.
//!
//! The synthesizer is pure: given a seed, identical requests produce
//! identical plans.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Lower bound on base samples per movement
pub const MIN_STEPS: usize = 20;
/// Upper bound on base samples per movement
pub const MAX_STEPS: usize = 120;
/// Hard cap on samples including an overshoot or hover insertion
pub const MAX_SAMPLES: usize = MAX_STEPS + 1;

const HOVER_PROBABILITY: f64 = 0.3;
/// Jitter is truncated at this many standard deviations.
const JITTER_SIGMA_CAP: f64 = 3.0;
/// Fraction of the jitter left at the very end of the path.
const SETTLED_JITTER: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const DESKTOP: Self = Self {
        width: 1920,
        height: 1080,
    };
    pub const MOBILE: Self = Self {
        width: 375,
        height: 667,
    };

    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }

    fn clamp(self, point: Point) -> Point {
        Point::new(
            point.x.clamp(0.0, f64::from(self.width.saturating_sub(1))),
            point.y.clamp(0.0, f64::from(self.height.saturating_sub(1))),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

/// Maps linear progress in `0..=1` onto eased progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Easing {
    Linear,
    #[default]
    EaseInOutQuad,
    EaseInOutCubic,
}

impl Easing {
    pub fn apply(self, t: f64) -> f64 {
        match self {
            Self::Linear => t,
            Self::EaseInOutQuad => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Self::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    (t - 1.0) * (2.0 * t - 2.0) * (2.0 * t - 2.0) + 1.0
                }
            }
        }
    }
}

/// Tunables for one movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementParams {
    pub duration_range_ms: (u64, u64),
    pub steps_per_100px: f64,
    pub jitter_px: f64,
    pub overshoot_px: f64,
    pub overshoot_prob: f64,
    pub pause_prob: f64,
    pub pause_duration_range_ms: (u64, u64),
    pub hover_after_ms: (u64, u64),
    pub easing: Easing,
}

impl Default for MovementParams {
    fn default() -> Self {
        Self {
            duration_range_ms: (400, 1200),
            steps_per_100px: 12.0,
            jitter_px: 1.5,
            overshoot_px: 8.0,
            overshoot_prob: 0.15,
            pause_prob: 0.18,
            pause_duration_range_ms: (30, 260),
            hover_after_ms: (80, 420),
            easing: Easing::EaseInOutQuad,
        }
    }
}

impl MovementParams {
    /// Touch input is coarser: fewer samples, less jitter, smaller and rarer
    /// overshoot, more hesitation.
    #[must_use]
    pub fn for_device(mut self, device: DeviceClass) -> Self {
        if device == DeviceClass::Mobile {
            self.steps_per_100px = (self.steps_per_100px - 4.0).max(8.0);
            self.jitter_px *= 0.8;
            self.overshoot_px *= 0.6;
            self.overshoot_prob *= 0.7;
            self.pause_prob = (self.pause_prob * 1.2).min(1.0);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementRequest {
    pub start: Point,
    pub end: Point,
    pub viewport: Viewport,
    pub device: DeviceClass,
    pub params: Option<MovementParams>,
    pub seed: Option<u64>,
}

impl MovementRequest {
    pub fn new(start: Point, end: Point, viewport: Viewport, device: DeviceClass) -> Self {
        Self {
            start,
            end,
            viewport,
            device,
            params: None,
            seed: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: MovementParams) -> Self {
        self.params = Some(params);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleKind {
    Path,
    Overshoot,
    Hover,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSample {
    pub x: f64,
    pub y: f64,
    /// Milliseconds since the start of the movement
    pub elapsed_ms: u64,
    pub kind: SampleKind,
}

impl MovementSample {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// An immutable, time-ordered movement. Consumed by value when executed.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementPlan {
    samples: Vec<MovementSample>,
    distance_px: f64,
    device: DeviceClass,
}

impl MovementPlan {
    pub fn samples(&self) -> &[MovementSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.samples.last().map_or(0, |s| s.elapsed_ms)
    }

    pub fn distance_px(&self) -> f64 {
        self.distance_px
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    /// Last sample that is part of the path proper (hover excluded).
    pub fn final_path_sample(&self) -> Option<&MovementSample> {
        self.samples.iter().rev().find(|s| s.kind != SampleKind::Hover)
    }
}

impl IntoIterator for MovementPlan {
    type Item = MovementSample;
    type IntoIter = std::vec::IntoIter<MovementSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

/// Synthesizes a plan, seeding from the request or the thread RNG.
pub fn synthesize(request: &MovementRequest) -> MovementPlan {
    match request.seed {
        Some(seed) => synthesize_with(request, &mut StdRng::seed_from_u64(seed)),
        None => synthesize_with(request, &mut rand::thread_rng()),
    }
}

/// Synthesizes a plan drawing randomness from `rng`. The request's seed is
/// ignored here; callers that own an RNG pass it directly.
pub fn synthesize_with<R: Rng + ?Sized>(request: &MovementRequest, rng: &mut R) -> MovementPlan {
    let params = request
        .params
        .clone()
        .unwrap_or_default()
        .for_device(request.device);
    let start = request.viewport.clamp(request.start);
    let end = request.viewport.clamp(request.end);
    let distance = start.distance_to(end);

    if distance < f64::EPSILON {
        return degenerate_plan(start, request.device, &params, rng);
    }

    let duration_ms = movement_duration(distance, &params, rng);
    let step_count = step_count(distance, &params, rng);

    let mut path: Vec<(Point, SampleKind)> = (0..step_count)
        .map(|i| {
            let t = progress(i, step_count);
            let eased = params.easing.apply(t);
            let base = Point::new(
                start.x + (end.x - start.x) * eased,
                start.y + (end.y - start.y) * eased,
            );
            let sigma = params.jitter_px * (1.0 - t * (1.0 - SETTLED_JITTER));
            let jittered = Point::new(
                base.x + truncated_gaussian(rng, sigma),
                base.y + truncated_gaussian(rng, sigma),
            );
            (request.viewport.clamp(jittered), SampleKind::Path)
        })
        .collect();

    if rng.gen_bool(params.overshoot_prob.clamp(0.0, 1.0)) {
        insert_overshoot(&mut path, params.overshoot_px, request.viewport, rng);
    }

    let mut samples = assign_timings(&path, duration_ms, &params, rng);

    if samples.len() < MAX_SAMPLES && rng.gen_bool(HOVER_PROBABILITY) {
        let last = samples.last().map_or(0, |s| s.elapsed_ms);
        samples.push(MovementSample {
            x: end.x,
            y: end.y,
            elapsed_ms: last + uniform_ms(rng, params.hover_after_ms),
            kind: SampleKind::Hover,
        });
    }

    MovementPlan {
        samples,
        distance_px: distance,
        device: request.device,
    }
}

fn degenerate_plan<R: Rng + ?Sized>(
    at: Point,
    device: DeviceClass,
    params: &MovementParams,
    rng: &mut R,
) -> MovementPlan {
    let path = vec![(at, SampleKind::Path); MIN_STEPS];
    let duration_ms = uniform_ms(rng, params.duration_range_ms);
    MovementPlan {
        samples: assign_timings(&path, duration_ms, params, rng),
        distance_px: 0.0,
        device,
    }
}

fn progress(i: usize, count: usize) -> f64 {
    if count > 1 {
        i as f64 / (count - 1) as f64
    } else {
        0.0
    }
}

/// Base duration from the configured range, stretched up to 1.5x for long
/// travel.
fn movement_duration<R: Rng + ?Sized>(distance: f64, params: &MovementParams, rng: &mut R) -> u64 {
    let base = uniform_ms(rng, params.duration_range_ms) as f64;
    let stretch = 1.0 + (distance / 1000.0).min(1.0) * 0.5;
    (base * stretch).round() as u64
}

fn step_count<R: Rng + ?Sized>(distance: f64, params: &MovementParams, rng: &mut R) -> usize {
    let density = (distance / 100.0 * params.steps_per_100px) as i64;
    let base = density.max(MIN_STEPS as i64);
    let variation = rng.gen_range(-5..=10);
    (base + variation).clamp(MIN_STEPS as i64, MAX_STEPS as i64) as usize
}

fn insert_overshoot<R: Rng + ?Sized>(
    path: &mut Vec<(Point, SampleKind)>,
    overshoot_px: f64,
    viewport: Viewport,
    rng: &mut R,
) {
    if path.len() < 3 {
        return;
    }
    let index = ((path.len() as f64 * rng.gen_range(0.8..0.9)) as usize).clamp(1, path.len() - 2);
    let (here, _) = path[index];
    let (before, _) = path[index - 1];
    let (dx, dy) = (here.x - before.x, here.y - before.y);
    let length = dx.hypot(dy);
    if length <= f64::EPSILON {
        return;
    }
    let overshoot = viewport.clamp(Point::new(
        here.x + dx / length * overshoot_px,
        here.y + dy / length * overshoot_px,
    ));
    path.insert(index + 1, (overshoot, SampleKind::Overshoot));
}

/// Spreads `duration_ms` across the samples. Offsets are cumulative so they
/// never decrease.
fn assign_timings<R: Rng + ?Sized>(
    path: &[(Point, SampleKind)],
    duration_ms: u64,
    params: &MovementParams,
    rng: &mut R,
) -> Vec<MovementSample> {
    let base_delay = duration_ms as f64 / path.len().max(1) as f64;
    let pause_prob = params.pause_prob.clamp(0.0, 1.0);
    let mut clock = 0.0_f64;

    path.iter()
        .map(|&(point, kind)| {
            let sample = MovementSample {
                x: point.x,
                y: point.y,
                elapsed_ms: clock.round() as u64,
                kind,
            };
            clock += if rng.gen_bool(pause_prob) {
                base_delay + uniform_ms(rng, params.pause_duration_range_ms) as f64
            } else {
                base_delay * rng.gen_range(0.8..=1.2)
            };
            sample
        })
        .collect()
}

fn uniform_ms<R: Rng + ?Sized>(rng: &mut R, (low, high): (u64, u64)) -> u64 {
    if high <= low {
        low
    } else {
        rng.gen_range(low..=high)
    }
}

/// Box-Muller sample from N(0, sigma), truncated at `JITTER_SIGMA_CAP` sigma.
fn truncated_gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.r#gen();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    z.clamp(-JITTER_SIGMA_CAP, JITTER_SIGMA_CAP) * sigma
}
