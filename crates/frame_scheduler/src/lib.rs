use std::cell::Cell;
use std::time::{Duration, Instant};

pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(14);
pub const FRAME_TIMER_SAMPLES: usize = 32;

/// Monotonic time source, injectable for tests.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced only by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Rendering,
    BudgetExceeded,
    Complete,
}

/// What the shell knows about the surface at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInput {
    pub surface_available: bool,
    pub context_ready: bool,
    pub pixel_scale: f32,
    pub physical_width: u32,
    pub physical_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPlan {
    /// No surface to draw into; nothing happens this tick.
    Skip,
    /// Device pixel scale changed. Tear the context down and render on the
    /// next tick.
    Teardown,
    Render { initialize: bool, resize: bool },
}

#[derive(Debug, Clone)]
pub struct FrameScheduler {
    state: FrameState,
    budget: Duration,
    last_pixel_scale: Option<f32>,
    last_size: Option<(u32, u32)>,
    frames_rendered: u64,
}

impl FrameScheduler {
    pub fn new(budget: Duration) -> Self {
        Self {
            state: FrameState::Idle,
            budget,
            last_pixel_scale: None,
            last_size: None,
            frames_rendered: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn set_budget(&mut self, budget: Duration) {
        self.budget = budget;
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn plan_tick(&mut self, input: TickInput) -> TickPlan {
        self.state = FrameState::Idle;
        if !input.surface_available || input.physical_width == 0 || input.physical_height == 0 {
            return TickPlan::Skip;
        }

        if input.context_ready
            && let Some(previous) = self.last_pixel_scale
            && (previous - input.pixel_scale).abs() > f32::EPSILON
        {
            tracing::debug!(
                previous,
                current = input.pixel_scale,
                "pixel scale changed, tearing down render context"
            );
            self.last_pixel_scale = Some(input.pixel_scale);
            self.last_size = None;
            return TickPlan::Teardown;
        }
        self.last_pixel_scale = Some(input.pixel_scale);

        let size = (input.physical_width, input.physical_height);
        let resize = self.last_size != Some(size) || !input.context_ready;
        self.last_size = Some(size);
        self.state = FrameState::Rendering;
        TickPlan::Render {
            initialize: !input.context_ready,
            resize,
        }
    }

    /// Starts the frame budget; call right after [`FrameScheduler::plan_tick`]
    /// returned [`TickPlan::Render`].
    pub fn begin_budget<C: Clock>(&self, clock: &C) -> FrameBudget {
        FrameBudget {
            started: clock.now(),
            budget: self.budget,
        }
    }

    pub fn finish_tick(&mut self, budget_exceeded: bool) -> FrameState {
        if self.state != FrameState::Rendering {
            return self.state;
        }
        self.frames_rendered += 1;
        self.state = if budget_exceeded {
            FrameState::BudgetExceeded
        } else {
            FrameState::Complete
        };
        self.state
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_BUDGET)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudget {
    started: Duration,
    budget: Duration,
}

impl FrameBudget {
    pub fn elapsed<C: Clock>(&self, clock: &C) -> Duration {
        clock.now().saturating_sub(self.started)
    }

    pub fn remaining<C: Clock>(&self, clock: &C) -> Duration {
        self.budget.saturating_sub(self.elapsed(clock))
    }

    pub fn is_exceeded<C: Clock>(&self, clock: &C) -> bool {
        self.elapsed(clock) >= self.budget
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetOutcome {
    pub processed: usize,
    pub exhausted: bool,
}

/// Runs `work` over `items` until they run out or the budget is spent.
///
/// The budget is checked before each item, so the loop overshoots by at most
/// the duration of one item. Items not reached are left to the caller to
/// retry next tick.
pub fn run_budgeted<C, T>(
    clock: &C,
    budget: &FrameBudget,
    items: impl IntoIterator<Item = T>,
    mut work: impl FnMut(T),
) -> BudgetOutcome
where
    C: Clock,
{
    let mut processed = 0;
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        if budget.is_exceeded(clock) {
            return BudgetOutcome {
                processed,
                exhausted: true,
            };
        }
        if let Some(item) = items.next() {
            work(item);
            processed += 1;
        }
    }
    BudgetOutcome {
        processed,
        exhausted: false,
    }
}

/// Rolling average of the last [`FRAME_TIMER_SAMPLES`] frame intervals.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    samples: [Duration; FRAME_TIMER_SAMPLES],
    next: usize,
    filled: usize,
    last_frame: Option<Duration>,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self {
            samples: [Duration::ZERO; FRAME_TIMER_SAMPLES],
            next: 0,
            filled: 0,
            last_frame: None,
        }
    }
}

impl FrameTimer {
    /// Records a frame presented at `now`.
    pub fn add_frame(&mut self, now: Duration) {
        if let Some(previous) = self.last_frame {
            self.add_sample(now.saturating_sub(previous));
        }
        self.last_frame = Some(now);
    }

    pub fn add_sample(&mut self, frame_time: Duration) {
        self.samples[self.next] = frame_time;
        self.next = (self.next + 1) % FRAME_TIMER_SAMPLES;
        self.filled = (self.filled + 1).min(FRAME_TIMER_SAMPLES);
    }

    pub fn average(&self) -> Option<Duration> {
        if self.filled == 0 {
            return None;
        }
        let total: Duration = self.samples[..self.filled].iter().sum();
        Some(total / self.filled as u32)
    }

    pub fn frames_per_second(&self) -> Option<f32> {
        let average = self.average()?.as_secs_f32();
        (average > 0.0).then(|| 1.0 / average)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(pixel_scale: f32, width: u32, context_ready: bool) -> TickInput {
        TickInput {
            surface_available: true,
            context_ready,
            pixel_scale,
            physical_width: width,
            physical_height: 100,
        }
    }

    #[test]
    fn skips_without_surface() {
        let mut scheduler = FrameScheduler::default();
        let plan = scheduler.plan_tick(TickInput {
            surface_available: false,
            ..input(1.0, 100, true)
        });
        assert_eq!(plan, TickPlan::Skip);
        assert_eq!(scheduler.state(), FrameState::Idle);
    }

    #[test]
    fn first_tick_initializes_and_resizes() {
        let mut scheduler = FrameScheduler::default();
        assert_eq!(
            scheduler.plan_tick(input(1.0, 100, false)),
            TickPlan::Render {
                initialize: true,
                resize: true
            }
        );
        assert_eq!(scheduler.state(), FrameState::Rendering);
        assert_eq!(scheduler.finish_tick(false), FrameState::Complete);
        assert_eq!(
            scheduler.plan_tick(input(1.0, 100, true)),
            TickPlan::Render {
                initialize: false,
                resize: false
            }
        );
    }

    #[test]
    fn size_change_requests_resize() {
        let mut scheduler = FrameScheduler::default();
        scheduler.plan_tick(input(1.0, 100, false));
        assert_eq!(
            scheduler.plan_tick(input(1.0, 120, true)),
            TickPlan::Render {
                initialize: false,
                resize: true
            }
        );
    }

    #[test]
    fn scale_change_tears_down_then_reinitializes() {
        let mut scheduler = FrameScheduler::default();
        scheduler.plan_tick(input(1.0, 100, false));
        assert_eq!(scheduler.plan_tick(input(2.0, 200, true)), TickPlan::Teardown);
        assert_eq!(scheduler.state(), FrameState::Idle);
        assert_eq!(
            scheduler.plan_tick(input(2.0, 200, false)),
            TickPlan::Render {
                initialize: true,
                resize: true
            }
        );
    }

    #[test]
    fn budgeted_loop_overshoots_by_at_most_one_item() {
        let clock = ManualClock::new();
        let scheduler = FrameScheduler::new(Duration::from_millis(10));
        let budget = scheduler.begin_budget(&clock);
        let outcome = run_budgeted(&clock, &budget, 0..100, |_| {
            clock.advance(Duration::from_millis(3));
        });
        assert!(outcome.exhausted);
        assert_eq!(outcome.processed, 4);
        assert!(budget.elapsed(&clock) < Duration::from_millis(10 + 3));
        assert_eq!(budget.remaining(&clock), Duration::ZERO);
    }

    #[test]
    fn budgeted_loop_completes_when_work_fits() {
        let clock = ManualClock::new();
        let budget = FrameScheduler::default().begin_budget(&clock);
        let mut seen = Vec::new();
        let outcome = run_budgeted(&clock, &budget, [1, 2, 3], |item| seen.push(item));
        assert_eq!(
            outcome,
            BudgetOutcome {
                processed: 3,
                exhausted: false
            }
        );
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn frame_timer_averages_last_samples() {
        let mut timer = FrameTimer::default();
        assert_eq!(timer.average(), None);
        for _ in 0..FRAME_TIMER_SAMPLES {
            timer.add_sample(Duration::from_millis(100));
        }
        for _ in 0..FRAME_TIMER_SAMPLES {
            timer.add_sample(Duration::from_millis(20));
        }
        assert_eq!(timer.average(), Some(Duration::from_millis(20)));
        let fps = timer.frames_per_second().expect("fps");
        assert!((fps - 50.0).abs() < 0.01);
    }

    #[test]
    fn frame_timer_measures_intervals() {
        let mut timer = FrameTimer::default();
        timer.add_frame(Duration::from_millis(5));
        timer.add_frame(Duration::from_millis(21));
        assert_eq!(timer.average(), Some(Duration::from_millis(16)));
    }
}
