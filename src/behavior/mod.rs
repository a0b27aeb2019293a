//! Human-like pointer and scroll activity on a live page

use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::browser::{FetchSession, Rect};
use crate::trajectory::{MovementParams, MovementRequest, Point, synthesize_with};

/// Keeps random targets away from the viewport edges
const EDGE_MARGIN: f64 = 50.0;
const SCROLL_PROBABILITY: f64 = 0.3;
/// Click lands within this fraction of the element size around its center
const CLICK_SPREAD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Site home page visited to warm the session up
    Landing,
    Product,
}

impl PageKind {
    /// How many movements to make and with which tunables
    fn profile(self) -> (RangeInclusive<u32>, MovementParams) {
        match self {
            Self::Landing => (
                2..=4,
                MovementParams {
                    duration_range_ms: (200, 600),
                    steps_per_100px: 8.0,
                    jitter_px: 1.0,
                    overshoot_px: 4.0,
                    overshoot_prob: 0.1,
                    pause_prob: 0.15,
                    ..MovementParams::default()
                },
            ),
            Self::Product => (
                3..=6,
                MovementParams {
                    duration_range_ms: (400, 1000),
                    steps_per_100px: 12.0,
                    jitter_px: 1.5,
                    overshoot_px: 6.0,
                    overshoot_prob: 0.15,
                    pause_prob: 0.2,
                    ..MovementParams::default()
                },
            ),
        }
    }
}

/// Drives pointer movements, pauses and scrolls through a [`FetchSession`].
/// Failures are logged and swallowed.
#[derive(Debug)]
pub struct HumanBehaviorSimulator {
    rng: StdRng,
}

impl Default for HumanBehaviorSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanBehaviorSimulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub async fn simulate(&mut self, session: &mut FetchSession, kind: PageKind) {
        let (movements, params) = kind.profile();
        let count = self.rng.gen_range(movements);
        debug!(?kind, movements = count, "simulating visitor activity");

        for _ in 0..count {
            let target = self.random_target(session);
            if let Err(e) = self.move_to(session, target, &params).await {
                warn!(error = %e, "pointer movement failed");
            }

            let pause = self.rng.gen_range(500..=2000);
            tokio::time::sleep(Duration::from_millis(pause)).await;

            if self.rng.gen_bool(SCROLL_PROBABILITY) {
                if let Err(e) = self.scroll(session).await {
                    warn!(error = %e, "scroll failed");
                }
                let pause = self.rng.gen_range(300..=1000);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }
    }

    fn random_target(&mut self, session: &FetchSession) -> Point {
        let viewport = session.viewport();
        let axis = |rng: &mut StdRng, size: u32| {
            let size = f64::from(size);
            if size <= EDGE_MARGIN * 2.0 {
                size / 2.0
            } else {
                rng.gen_range(EDGE_MARGIN..=size - EDGE_MARGIN).round()
            }
        };
        Point::new(
            axis(&mut self.rng, viewport.width),
            axis(&mut self.rng, viewport.height),
        )
    }

    /// Replays a synthesized plan, sleeping between samples as the plan's
    /// timestamps dictate. The session pointer tracks the last sample sent.
    async fn move_to(
        &mut self,
        session: &mut FetchSession,
        target: Point,
        params: &MovementParams,
    ) -> Result<()> {
        let request = MovementRequest::new(
            session.pointer(),
            target,
            session.viewport(),
            session.device(),
        )
        .with_params(params.clone());
        let plan = synthesize_with(&request, &mut self.rng);
        debug!(
            samples = plan.len(),
            duration_ms = plan.total_duration_ms(),
            device = ?plan.device(),
            "replaying pointer movement"
        );

        let mut elapsed = 0;
        for sample in plan {
            let wait = sample.elapsed_ms.saturating_sub(elapsed);
            if wait > 0 {
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
            elapsed = sample.elapsed_ms;
            session.surface().move_pointer(sample.point()).await?;
            session.set_pointer(sample.point());
        }
        Ok(())
    }

    /// Moves the pointer onto `rect` near its center, hesitates briefly and
    /// clicks with the real mouse.
    pub async fn click_element(&mut self, session: &mut FetchSession, rect: Rect) -> Result<()> {
        let center = rect.center();
        let offset_x = rect.width * CLICK_SPREAD * (0.5 - self.rng.r#gen::<f64>());
        let offset_y = rect.height * CLICK_SPREAD * (0.5 - self.rng.r#gen::<f64>());
        let target = Point::new(
            (center.x + offset_x).round().clamp(rect.x, rect.x + rect.width),
            (center.y + offset_y).round().clamp(rect.y, rect.y + rect.height),
        );

        self.move_to(session, target, &MovementParams::default()).await?;
        // the plan may end a pixel or two off after jitter or a hover
        session.surface().move_pointer(target).await?;
        session.set_pointer(target);

        let hesitation = self.rng.gen_range(100..=300);
        tokio::time::sleep(Duration::from_millis(hesitation)).await;

        session.surface().click(target).await?;
        debug!(x = target.x, y = target.y, "clicked");
        Ok(())
    }

    /// Brings the pointer to one side of the viewport center, wheels, then
    /// carries on past the center in the scroll direction.
    async fn scroll(&mut self, session: &mut FetchSession) -> Result<()> {
        let distance = f64::from(self.rng.gen_range(100..=300u32));
        let delta = if self.rng.gen_bool(0.5) { distance } else { -distance };
        let center = session.viewport().center();
        let start = Point::new(center.x, center.y - delta / 2.0);
        let end = Point::new(center.x, center.y + delta / 2.0);
        let (_, params) = PageKind::Landing.profile();

        self.move_to(session, start, &params).await?;
        session.surface().scroll(session.pointer(), delta).await?;
        self.move_to(session, end, &params).await?;
        debug!(delta, "scrolled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::browser::LaunchProfile;
    use crate::browser::fake::ScriptedBrowser;
    use crate::trajectory::{DeviceClass, Viewport};

    async fn session(browser: &ScriptedBrowser) -> FetchSession {
        FetchSession::launch(
            browser,
            LaunchProfile {
                user_agent: "UA".into(),
                viewport: Viewport::DESKTOP,
                device: DeviceClass::Desktop,
                proxy: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn product_pages_get_several_movements_inside_viewport() {
        let browser = ScriptedBrowser::new();
        let mut session = session(&browser).await;
        let started = Instant::now();

        HumanBehaviorSimulator::with_seed(11)
            .simulate(&mut session, PageKind::Product)
            .await;

        let log = browser.log.lock().unwrap();
        // at least three movements of at least 20 samples each
        assert!(log.pointer_moves.len() >= 60);
        assert!(log.pointer_moves.iter().all(|p| {
            (0.0..1920.0).contains(&p.x) && (0.0..1080.0).contains(&p.y)
        }));
        assert_eq!(session.pointer(), *log.pointer_moves.last().unwrap());
        // three inter-movement pauses of at least half a second
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(log.scrolls.iter().all(|d| (100.0..=300.0).contains(&d.abs())));
    }

    #[tokio::test(start_paused = true)]
    async fn movement_failures_do_not_abort_simulation() {
        let browser = ScriptedBrowser::new();
        browser.log.lock().unwrap().fail_pointer = true;
        let mut session = session(&browser).await;
        let start = session.pointer();

        HumanBehaviorSimulator::with_seed(5)
            .simulate(&mut session, PageKind::Landing)
            .await;

        assert!(browser.log.lock().unwrap().pointer_moves.is_empty());
        assert_eq!(session.pointer(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn clicks_travel_to_the_element_first() {
        let browser = ScriptedBrowser::new();
        let mut session = session(&browser).await;
        let button = Rect {
            x: 1500.0,
            y: 900.0,
            width: 120.0,
            height: 40.0,
        };

        HumanBehaviorSimulator::with_seed(3)
            .click_element(&mut session, button)
            .await
            .unwrap();

        let log = browser.log.lock().unwrap();
        assert_eq!(log.clicks.len(), 1);
        let (at, moves_before) = log.clicks[0];
        assert!(button.contains(at));
        // a whole synthesized path, not a jump
        assert!(moves_before >= 20);
        assert_eq!(log.pointer_moves[moves_before - 1], at);
        assert!(button.contains(log.pointer_moves[moves_before - 1]));
        assert_eq!(session.pointer(), at);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pointer_travel_skips_the_click() {
        let browser = ScriptedBrowser::new();
        browser.log.lock().unwrap().fail_pointer = true;
        let mut session = session(&browser).await;
        let button = Rect {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 20.0,
        };

        let result = HumanBehaviorSimulator::with_seed(3)
            .click_element(&mut session, button)
            .await;
        assert!(result.is_err());
        assert!(browser.log.lock().unwrap().clicks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scrolls_move_the_pointer_around_the_wheel() {
        let browser = ScriptedBrowser::new();
        let mut session = session(&browser).await;

        HumanBehaviorSimulator::with_seed(9)
            .scroll(&mut session)
            .await
            .unwrap();

        let log = browser.log.lock().unwrap();
        assert_eq!(log.scrolls.len(), 1);
        let delta = log.scrolls[0];
        let center = Viewport::DESKTOP.center();
        // ends past the center in the scroll direction
        let end = session.pointer();
        assert!((end.y - center.y) * delta > 0.0);
        assert!(log.pointer_moves.len() >= 40);
    }

    #[test]
    fn landing_profile_is_lighter_than_product_profile() {
        let (landing_count, landing) = PageKind::Landing.profile();
        let (product_count, product) = PageKind::Product.profile();
        assert!(landing_count.end() < product_count.end());
        assert!(landing.duration_range_ms.1 < product.duration_range_ms.1);
        assert!(landing.steps_per_100px < product.steps_per_100px);
    }
}
