/// Content selection module
///
/// Picks the quote and scene for a regular (non-holiday) run:
/// - items used inside their cooldown window are excluded
/// - if every item is cooling down the whole pool is used instead
/// - quotes are narrowed to the month's preferred categories when possible
/// - scene prompts are varied with random season, lighting, atmosphere and mood

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::content::{self, Quote, Scene};
use crate::state::CooldownHistory;

/// Candidates left after applying a cooldown
#[derive(Debug)]
pub struct Eligible<'a, T> {
    pub items: Vec<&'a T>,
    /// Every item was cooling down, so the full pool was returned
    pub exhausted: bool,
}

/// Keep the items that are not cooling down, or the whole pool if none are
pub fn eligible_or_all<'a, T, F>(pool: &'a [T], is_cooling: F) -> Eligible<'a, T>
where
    F: Fn(&T) -> bool,
{
    let items: Vec<&T> = pool.iter().filter(|item| !is_cooling(*item)).collect();

    if items.is_empty() {
        Eligible {
            items: pool.iter().collect(),
            exhausted: true,
        }
    } else {
        Eligible {
            items,
            exhausted: false,
        }
    }
}

/// Quote and scene chosen for a run
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    pub quote: Quote,
    pub scene: Scene,
    pub quote_pool_exhausted: bool,
    pub scene_pool_exhausted: bool,
}

pub struct ContentSelector {
    quotes: &'static [Quote],
    scenes: &'static [Scene],
    quote_cooldown_days: u32,
    scene_cooldown_days: u32,
}

impl ContentSelector {
    pub fn new(quote_cooldown_days: u32, scene_cooldown_days: u32) -> Self {
        Self::with_catalog(
            content::QUOTES,
            content::SCENES,
            quote_cooldown_days,
            scene_cooldown_days,
        )
    }

    pub fn with_catalog(
        quotes: &'static [Quote],
        scenes: &'static [Scene],
        quote_cooldown_days: u32,
        scene_cooldown_days: u32,
    ) -> Self {
        Self {
            quotes,
            scenes,
            quote_cooldown_days,
            scene_cooldown_days,
        }
    }

    /// Choose a quote and a scene independently
    pub fn select<R: Rng + ?Sized>(
        &self,
        today: NaiveDate,
        quote_history: &CooldownHistory,
        scene_history: &CooldownHistory,
        rng: &mut R,
    ) -> Result<Selection> {
        if self.quotes.is_empty() || self.scenes.is_empty() {
            bail!("Quote and scene catalogs must not be empty");
        }

        let quotes = eligible_or_all(self.quotes, |q| {
            quote_history.is_cooling(q.text, today, self.quote_cooldown_days)
        });

        let mut quote_pool = quotes.items;
        if quotes.exhausted {
            log::warn!("Every quote is on cooldown; choosing from the full set");
        } else {
            let preferred = content::preferred_categories(today.month());
            let seasonal: Vec<&Quote> = quote_pool
                .iter()
                .copied()
                .filter(|q| preferred.contains(&q.category))
                .collect();

            if !seasonal.is_empty() {
                log::debug!(
                    "Narrowed {} eligible quotes to {} seasonal ones",
                    quote_pool.len(),
                    seasonal.len()
                );
                quote_pool = seasonal;
            }
        }

        let scenes = eligible_or_all(self.scenes, |s| {
            scene_history.is_cooling(s.name, today, self.scene_cooldown_days)
        });
        if scenes.exhausted {
            log::warn!("Every scene is on cooldown; ignoring scene cooldown for this run");
        }

        // Pools are never empty here: both catalogs were checked above.
        let (Some(quote), Some(scene)) = (quote_pool.choose(rng), scenes.items.choose(rng)) else {
            bail!("No selectable quote or scene");
        };

        Ok(Selection {
            quote: **quote,
            scene: **scene,
            quote_pool_exhausted: quotes.exhausted,
            scene_pool_exhausted: scenes.exhausted,
        })
    }
}

/// Append the fixed art style and the month's visual theme to a subject
pub fn styled_prompt(subject: &str, month: u32) -> String {
    let mut prompt = format!("{}. {}", subject.trim_end_matches('.'), content::ART_STYLE);

    let theme = content::monthly_theme(month);
    if !theme.is_empty() {
        prompt.push(' ');
        prompt.push_str(theme);
    }

    prompt.push_str(" No text, letters or watermarks in the image.");
    prompt
}

/// Full image prompt for a regular run
pub fn build_scene_prompt<R: Rng + ?Sized>(scene: &Scene, month: u32, rng: &mut R) -> String {
    let mut subject = scene.description.to_string();

    for fragments in [content::SEASONS, content::LIGHTING, content::ATMOSPHERES] {
        if let Some(fragment) = fragments.choose(rng) {
            subject.push_str(", ");
            subject.push_str(fragment);
        }
    }

    if let Some(mood) = content::MOODS.choose(rng) {
        subject.push_str(&format!(", {} mood", mood));
    }

    styled_prompt(&subject, month)
}
