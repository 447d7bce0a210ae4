/// Posting pipeline
///
/// Connects the pieces for a single scheduled run: gatekeeper, holiday
/// override or content selection, image generation, compositing, publishing,
/// and finally the state updates that only happen after a successful upload.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use rand::Rng;

use crate::compose::{Compositor, TextCompositor};
use crate::config::{Config, Credentials};
use crate::gatekeeper::{self, GateRejection, RuntimeGate};
use crate::holiday::{self, Holiday};
use crate::publish::{DryRunPublisher, FacebookPublisher, Publisher};
use crate::render::{DryRunImageGenerator, ImageGenerator, OpenAIImageGenerator};
use crate::selector::{build_scene_prompt, styled_prompt, ContentSelector};
use crate::state::{month_key, EngagementRecord, PostStatus, StateStores};

/// Exit code for configuration and state errors
pub const EXIT_FATAL: i32 = 2;
/// Exit code for health, generation, compositing and publishing failures
pub const EXIT_FAILED: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Health,
    Generate,
    Compose,
    Publish,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Health => "health",
            FailureStage::Generate => "generate",
            FailureStage::Compose => "compose",
            FailureStage::Publish => "publish",
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Posted {
        post_id: String,
        quote: String,
        scene: String,
        holiday: Option<&'static str>,
    },
    DryRun {
        quote: String,
        scene: String,
        holiday: Option<&'static str>,
    },
    Skipped(GateRejection),
    Failed {
        stage: FailureStage,
        error: anyhow::Error,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Posted { .. } | RunOutcome::DryRun { .. } | RunOutcome::Skipped(_) => 0,
            RunOutcome::Failed { .. } => EXIT_FAILED,
        }
    }
}

/// What this run is going to post
#[derive(Debug, Clone)]
struct PostPlan {
    quote: String,
    /// Scene name for regular posts, `holiday:<name>` for holiday posts
    scene_label: String,
    scene_key: Option<&'static str>,
    holiday: Option<&'static Holiday>,
    prompt: String,
}

pub struct Bot {
    config: Config,
    stores: StateStores,
    selector: ContentSelector,
    generator: Box<dyn ImageGenerator>,
    compositor: Box<dyn Compositor>,
    publisher: Box<dyn Publisher>,
}

impl Bot {
    pub fn new(
        config: Config,
        stores: StateStores,
        generator: Box<dyn ImageGenerator>,
        compositor: Box<dyn Compositor>,
        publisher: Box<dyn Publisher>,
    ) -> Self {
        let selector = ContentSelector::new(config.quote_cooldown_days, config.scene_cooldown_days);
        Self {
            config,
            stores,
            selector,
            generator,
            compositor,
            publisher,
        }
    }

    /// Build the real clients, or their offline stand-ins in dry-run mode
    pub fn from_config(config: Config, stores: StateStores, credentials: &Credentials) -> Result<Self> {
        let compositor = Box::new(TextCompositor::from_config(&config)?);

        let (generator, publisher): (Box<dyn ImageGenerator>, Box<dyn Publisher>) = if config.dry_run {
            (
                Box::new(DryRunImageGenerator::from_size(&config.image_size)),
                Box::new(DryRunPublisher::new(config.dry_run_output.clone())),
            )
        } else {
            (
                Box::new(OpenAIImageGenerator::new(&config, &credentials.openai_api_key)?),
                Box::new(FacebookPublisher::new(&config, credentials)?),
            )
        };

        Ok(Self::new(config, stores, generator, compositor, publisher))
    }

    /// Run the pipeline once at `now`
    ///
    /// # Errors
    /// Only state-store failures are returned as errors; gate rejections and
    /// render/publish failures are reported through `RunOutcome`.
    pub async fn run<R: Rng + ?Sized>(&self, now: DateTime<Tz>, rng: &mut R) -> Result<RunOutcome> {
        if let Some(rejection) = gatekeeper::kill_switch_rejection(&self.stores)? {
            log::warn!("Not posting: {}", rejection);
            return Ok(RunOutcome::Skipped(rejection));
        }

        match gatekeeper::check_runtime(&self.config, &self.stores, self.publisher.as_ref(), now).await? {
            RuntimeGate::Proceed => {}
            RuntimeGate::Rejected(rejection) => {
                log::info!("Not posting: {}", rejection);
                return Ok(RunOutcome::Skipped(rejection));
            }
            RuntimeGate::HealthFailed(error) => {
                return Ok(RunOutcome::Failed {
                    stage: FailureStage::Health,
                    error,
                });
            }
        }

        let today = now.date_naive();
        let plan = self.plan(today, rng)?;
        log::info!("Quote: {}", plan.quote);
        log::info!("Scene: {}", plan.scene_label);
        log::debug!("Prompt: {}", plan.prompt);

        let image = match self.generator.generate(&plan.prompt).await {
            Ok(image) => image,
            Err(error) => return self.fail(now, &plan, FailureStage::Generate, error),
        };

        let composed = match self.compositor.compose(&image, &plan.quote) {
            Ok(composed) => composed,
            Err(error) => return self.fail(now, &plan, FailureStage::Compose, error),
        };

        let post_id = match self.publisher.publish(composed, &plan.quote).await {
            Ok(post_id) => post_id,
            Err(error) => return self.fail(now, &plan, FailureStage::Publish, error),
        };

        let holiday = plan.holiday.map(|h| h.name);
        if self.config.dry_run {
            log::info!("Dry run complete; no state was changed");
            return Ok(RunOutcome::DryRun {
                quote: plan.quote,
                scene: plan.scene_label,
                holiday,
            });
        }

        self.record_success(now, &plan)?;
        Ok(RunOutcome::Posted {
            post_id,
            quote: plan.quote,
            scene: plan.scene_label,
            holiday,
        })
    }

    /// Holiday override if one applies today, otherwise regular selection
    fn plan<R: Rng + ?Sized>(&self, today: NaiveDate, rng: &mut R) -> Result<PostPlan> {
        let holiday_usage = self.stores.holiday_history.load()?;

        if let Some(holiday) = holiday::todays_holiday(today, &holiday_usage) {
            log::info!("Holiday post: {}", holiday.name);
            return Ok(PostPlan {
                quote: holiday.quote.to_string(),
                scene_label: format!("holiday:{}", holiday.name),
                scene_key: None,
                holiday: Some(holiday),
                prompt: styled_prompt(holiday.scene, today.month()),
            });
        }

        let quote_history = self.stores.quote_history.load()?;
        let scene_history = self.stores.scene_history.load()?;
        let selection = self.selector.select(today, &quote_history, &scene_history, rng)?;

        Ok(PostPlan {
            quote: selection.quote.text.to_string(),
            scene_label: selection.scene.name.to_string(),
            scene_key: Some(selection.scene.name),
            holiday: None,
            prompt: build_scene_prompt(&selection.scene, today.month(), rng),
        })
    }

    /// Log a failed attempt; upload failures also trip the kill switch
    fn fail(
        &self,
        now: DateTime<Tz>,
        plan: &PostPlan,
        stage: FailureStage,
        error: anyhow::Error,
    ) -> Result<RunOutcome> {
        let detail = format!("{:#}", error);
        log::error!("{} failed: {}", stage.as_str(), detail);

        if self.config.dry_run {
            return Ok(RunOutcome::Failed { stage, error });
        }

        let at = now.with_timezone(&Utc);
        // The switch must be set even if the log writes below fail.
        if stage == FailureStage::Publish {
            self.stores
                .trip_kill_switch(&format!("publish failed: {}", detail), at)?;
        }

        self.stores.engagement_log.append(&EngagementRecord {
            at: now,
            scene: plan.scene_label.clone(),
            quote: plan.quote.clone(),
            status: PostStatus::Failed,
        })?;
        self.stores.error_log.append(
            at,
            stage.as_str(),
            &format!("scene={} quote={:?}: {}", plan.scene_label, plan.quote, detail),
        )?;

        Ok(RunOutcome::Failed { stage, error })
    }

    fn record_success(&self, now: DateTime<Tz>, plan: &PostPlan) -> Result<()> {
        let today = now.date_naive();

        let mut usage = self.stores.monthly_usage.load()?;
        let month = month_key(today);
        let count = usage.increment(&month);
        self.stores.monthly_usage.save(&usage)?;
        log::info!("Posts this month ({}): {}/{}", month, count, self.config.monthly_cap);

        self.stores.last_post.save(today)?;

        match (plan.holiday, plan.scene_key) {
            (Some(holiday), _) => {
                let mut used = self.stores.holiday_history.load()?;
                used.mark_used(today.year(), holiday.name);
                self.stores.holiday_history.save(&used)?;
            }
            (None, Some(scene)) => {
                let mut quotes = self.stores.quote_history.load()?;
                quotes.record(&plan.quote, today);
                self.stores.quote_history.save(&quotes)?;

                let mut scenes = self.stores.scene_history.load()?;
                scenes.record(scene, today);
                self.stores.scene_history.save(&scenes)?;
            }
            (None, None) => {}
        }

        self.stores.engagement_log.append(&EngagementRecord {
            at: now,
            scene: plan.scene_label.clone(),
            quote: plan.quote.clone(),
            status: PostStatus::Success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::state::MonthlyUsage;
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Calls {
        generate: Arc<AtomicUsize>,
        publish: Arc<AtomicUsize>,
    }

    impl Calls {
        fn generated(&self) -> usize {
            self.generate.load(Ordering::SeqCst)
        }

        fn published(&self) -> usize {
            self.publish.load(Ordering::SeqCst)
        }
    }

    struct FakeGenerator {
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl ImageGenerator for FakeGenerator {
        async fn generate(&self, _prompt: &str) -> Result<Vec<u8>> {
            self.calls.generate.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("content policy violation");
            }
            Ok(b"image".to_vec())
        }
    }

    struct PassThrough;

    impl Compositor for PassThrough {
        fn compose(&self, image: &[u8], quote: &str) -> Result<Vec<u8>> {
            let mut out = image.to_vec();
            out.extend_from_slice(quote.as_bytes());
            Ok(out)
        }
    }

    struct FakePublisher {
        calls: Calls,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn check_health(&self) -> Result<()> {
            Ok(())
        }

        async fn publish(&self, _image: Vec<u8>, _caption: &str) -> Result<String> {
            self.calls.publish.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("Graph API upload failed (status 500)");
            }
            Ok("page_1".to_string())
        }
    }

    struct Harness {
        dir: TempDir,
        calls: Calls,
        bot: Bot,
    }

    impl Harness {
        fn stores(&self) -> StateStores {
            StateStores::in_dir(self.dir.path())
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.dir.path().join(name)).unwrap_or_default()
        }
    }

    fn harness_with(configure: impl FnOnce(&mut Config), fail_generate: bool, fail_publish: bool) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        configure(&mut config);
        let calls = Calls::default();
        let bot = Bot::new(
            config,
            StateStores::in_dir(dir.path()),
            Box::new(FakeGenerator {
                calls: calls.clone(),
                fail: fail_generate,
            }),
            Box::new(PassThrough),
            Box::new(FakePublisher {
                calls: calls.clone(),
                fail: fail_publish,
            }),
        );
        Harness { dir, calls, bot }
    }

    fn harness() -> Harness {
        harness_with(|_| {}, false, false)
    }

    fn evening(y: i32, m: u32, d: u32) -> DateTime<Tz> {
        chrono_tz::Asia::Manila
            .with_ymd_and_hms(y, m, d, 19, 45, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn successful_post_updates_every_store() {
        let h = harness();
        let mut rng = StdRng::seed_from_u64(1);
        let now = evening(2025, 3, 3);

        let outcome = h.bot.run(now, &mut rng).await.unwrap();

        let RunOutcome::Posted { quote, scene, holiday, post_id } = outcome else {
            panic!("expected a post");
        };
        assert_eq!(post_id, "page_1");
        assert!(holiday.is_none());

        let stores = h.stores();
        let today = now.date_naive();
        assert_eq!(stores.last_post.load().unwrap(), Some(today));
        assert_eq!(stores.monthly_usage.load().unwrap().count("2025-03"), 1);
        assert_eq!(stores.quote_history.load().unwrap().last_used(&quote), Some(today));
        assert_eq!(stores.scene_history.load().unwrap().last_used(&scene), Some(today));

        let log = h.read("engagement_log.csv");
        assert!(log.lines().nth(1).unwrap().ends_with(",SUCCESS"));
    }

    #[tokio::test]
    async fn christmas_uses_holiday_content_once_per_year() {
        let h = harness();
        let mut rng = StdRng::seed_from_u64(2);

        let outcome = h.bot.run(evening(2025, 12, 25), &mut rng).await.unwrap();

        let RunOutcome::Posted { quote, scene, holiday, .. } = outcome else {
            panic!("expected a post");
        };
        assert_eq!(holiday, Some("christmas"));
        assert_eq!(quote, "Hope often arrives quietly, not loudly.");
        assert_eq!(scene, "holiday:christmas");

        let stores = h.stores();
        assert!(stores.holiday_history.load().unwrap().is_used(2025, "christmas"));
        // Selector was bypassed: no cooldown entries were written.
        assert!(stores.quote_history.load().unwrap().is_empty());
        assert!(stores.scene_history.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn used_holiday_falls_through_to_rotation() {
        let h = harness();
        let mut used = crate::state::HolidayUsage::default();
        used.mark_used(2025, "christmas");
        h.stores().holiday_history.save(&used).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let outcome = h.bot.run(evening(2025, 12, 25), &mut rng).await.unwrap();

        let RunOutcome::Posted { holiday, quote, .. } = outcome else {
            panic!("expected a post");
        };
        assert!(holiday.is_none());
        assert_ne!(quote, "Hope often arrives quietly, not loudly.");
    }

    #[tokio::test]
    async fn cap_reached_makes_no_paid_calls() {
        let h = harness();
        let mut usage = MonthlyUsage::default();
        for _ in 0..30 {
            usage.increment("2025-03");
        }
        h.stores().monthly_usage.save(&usage).unwrap();
        let mut rng = StdRng::seed_from_u64(4);

        let outcome = h.bot.run(evening(2025, 3, 10), &mut rng).await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Skipped(GateRejection::MonthlyCapReached { .. })
        ));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(h.calls.generated(), 0);
        assert_eq!(h.calls.published(), 0);
    }

    #[tokio::test]
    async fn publish_failure_trips_kill_switch_and_blocks_later_runs() {
        let h = harness_with(|_| {}, false, true);
        let mut rng = StdRng::seed_from_u64(5);

        let outcome = h.bot.run(evening(2025, 3, 3), &mut rng).await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Failed { stage: FailureStage::Publish, .. }
        ));
        let log = h.read("engagement_log.csv");
        let row = log.lines().nth(1).expect("a FAILED row");
        assert!(row.starts_with("2025-03-03,19:45:00,"));
        assert!(row.ends_with(",FAILED"));
        assert_ne!(outcome.exit_code(), 0);
        assert!(h.stores().kill_switch.load().unwrap().is_disabled());
        assert!(h.read("error_log.txt").contains("[publish]"));

        let stores = h.stores();
        assert_eq!(stores.monthly_usage.load().unwrap().count("2025-03"), 0);
        assert!(stores.quote_history.load().unwrap().is_empty());
        assert_eq!(stores.last_post.load().unwrap(), None);

        for day in [4, 5] {
            let next = h.bot.run(evening(2025, 3, day), &mut rng).await.unwrap();
            assert!(matches!(
                next,
                RunOutcome::Skipped(GateRejection::KillSwitchActive { .. })
            ));
        }
        assert_eq!(h.calls.published(), 1);
        assert_eq!(h.calls.generated(), 1);
    }

    #[tokio::test]
    async fn publish_failure_trips_kill_switch_even_when_logs_are_unwritable() {
        let h = harness_with(|_| {}, false, true);
        fs::create_dir(h.dir.path().join("engagement_log.csv")).unwrap();
        let mut rng = StdRng::seed_from_u64(13);

        let result = h.bot.run(evening(2025, 3, 3), &mut rng).await;

        assert!(result.is_err());
        assert!(h.stores().kill_switch.load().unwrap().is_disabled());

        let next = h.bot.run(evening(2025, 3, 4), &mut rng).await.unwrap();
        assert!(matches!(
            next,
            RunOutcome::Skipped(GateRejection::KillSwitchActive { .. })
        ));
        assert_eq!(h.calls.published(), 1);
        assert_eq!(h.calls.generated(), 1);
    }

    #[tokio::test]
    async fn generation_failure_is_logged_without_tripping_kill_switch() {
        let h = harness_with(|_| {}, true, false);
        let mut rng = StdRng::seed_from_u64(6);

        let outcome = h.bot.run(evening(2025, 3, 3), &mut rng).await.unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Failed { stage: FailureStage::Generate, .. }
        ));
        assert_eq!(outcome.exit_code(), EXIT_FAILED);
        assert!(!h.stores().kill_switch.load().unwrap().is_disabled());
        assert!(h.read("engagement_log.csv").contains(",FAILED"));
        assert!(h.read("error_log.txt").contains("content policy violation"));
        assert_eq!(h.calls.published(), 0);
        assert_eq!(h.stores().monthly_usage.load().unwrap().count("2025-03"), 0);
    }

    #[tokio::test]
    async fn only_one_post_per_day() {
        let h = harness();
        let mut rng = StdRng::seed_from_u64(7);

        let first = h.bot.run(evening(2025, 3, 3), &mut rng).await.unwrap();
        let second = h.bot.run(evening(2025, 3, 3), &mut rng).await.unwrap();

        assert!(matches!(first, RunOutcome::Posted { .. }));
        assert!(matches!(
            second,
            RunOutcome::Skipped(GateRejection::AlreadyPostedToday)
        ));
        assert_eq!(h.calls.published(), 1);
    }

    #[tokio::test]
    async fn monthly_cap_holds_across_repeated_runs() {
        let h = harness_with(|c| c.monthly_cap = 3, false, false);
        let mut rng = StdRng::seed_from_u64(8);

        let mut posted = 0;
        for day in 1..=10 {
            for _ in 0..2 {
                if let RunOutcome::Posted { .. } = h.bot.run(evening(2025, 4, day), &mut rng).await.unwrap() {
                    posted += 1;
                }
            }
        }

        assert_eq!(posted, 3);
        assert_eq!(h.stores().monthly_usage.load().unwrap().count("2025-04"), 3);
    }

    #[tokio::test]
    async fn quote_cooldown_holds_across_daily_runs() {
        let h = harness();
        let mut rng = StdRng::seed_from_u64(9);
        let mut seen = std::collections::HashMap::new();

        for day in 1..=20 {
            let now = evening(2025, 5, day);
            if let RunOutcome::Posted { quote, .. } = h.bot.run(now, &mut rng).await.unwrap() {
                assert!(
                    seen.insert(quote.clone(), day).is_none(),
                    "quote repeated within cooldown: {}",
                    quote
                );
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn dry_run_exercises_pipeline_without_touching_state() {
        let h = harness_with(|c| c.dry_run = true, false, false);
        h.stores().last_post.save(evening(2025, 3, 3).date_naive()).unwrap();
        let before = h.read("last_post.txt");
        let mut rng = StdRng::seed_from_u64(10);
        let midnight = chrono_tz::Asia::Manila
            .with_ymd_and_hms(2025, 3, 3, 0, 5, 0)
            .unwrap();

        let outcome = h.bot.run(midnight, &mut rng).await.unwrap();

        assert!(matches!(outcome, RunOutcome::DryRun { .. }));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(h.read("last_post.txt"), before);
        assert!(!h.dir.path().join("monthly_usage.json").exists());
        assert!(!h.dir.path().join("quote_history.json").exists());
        assert!(!h.dir.path().join("engagement_log.csv").exists());
        assert_eq!(h.calls.generated(), 1);
    }

    #[tokio::test]
    async fn dry_run_still_honours_kill_switch() {
        let h = harness_with(|c| c.dry_run = true, false, false);
        h.stores().trip_kill_switch("manual", Utc::now()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        let outcome = h.bot.run(evening(2025, 3, 3), &mut rng).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Skipped(GateRejection::KillSwitchActive { .. })));
        assert_eq!(h.calls.generated(), 0);
    }

    #[tokio::test]
    async fn malformed_state_aborts_before_paid_calls() {
        let h = harness();
        fs::write(h.dir.path().join("quote_history.json"), "[oops").unwrap();
        let mut rng = StdRng::seed_from_u64(12);

        let result = h.bot.run(evening(2025, 3, 3), &mut rng).await;

        assert!(result.is_err());
        assert_eq!(h.calls.generated(), 0);
    }
}
