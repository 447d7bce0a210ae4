/// Curated content catalogs
///
/// Quotes, scenes, prompt fragments and the month-keyed preferences are fixed
/// at build time. Nothing here is ever mutated; usage history lives in `state`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Theme tag attached to every quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Growth,
    Faith,
    Love,
    Healing,
    Hope,
    Peace,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Growth => "growth",
            Category::Faith => "faith",
            Category::Love => "love",
            Category::Healing => "healing",
            Category::Hope => "hope",
            Category::Peace => "peace",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub text: &'static str,
    pub category: Category,
}

/// A curated visual setting; `name` doubles as its cooldown key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scene {
    pub name: &'static str,
    pub description: &'static str,
}

const fn quote(text: &'static str, category: Category) -> Quote {
    Quote { text, category }
}

pub const QUOTES: &[Quote] = &[
    quote("Growth is quiet when no one is watching.", Category::Growth),
    quote("Not everything that’s slow is lost.", Category::Growth),
    quote("I stayed long enough to hear myself think.", Category::Growth),
    quote("The road teaches patience.", Category::Growth),
    quote("I didn’t know where I was going, only that I had to keep walking.", Category::Growth),
    quote("Some nights, faith is the only shelter.", Category::Faith),
    quote("I whispered prayers I didn’t know how to say out loud.", Category::Faith),
    quote("God hears you, even in the rain.", Category::Faith),
    quote("Faith sometimes looks like the next step.", Category::Faith),
    quote("God has a plan. Trust, wait, and believe.", Category::Faith),
    quote("Love is the quiet decision to stay kind.", Category::Love),
    quote("The people who stay through your storms are your sunlight.", Category::Love),
    quote("Being loved gently changes how you love yourself.", Category::Love),
    quote("Some hearts feel like home the moment you meet them.", Category::Love),
    quote("I let go of what I could no longer carry.", Category::Healing),
    quote("Healing is not linear, and that is okay.", Category::Healing),
    quote("You are allowed to rest before you are whole.", Category::Healing),
    quote("Some wounds close quietly, one ordinary day at a time.", Category::Healing),
    quote("Even here, I was not forgotten.", Category::Hope),
    quote("The stars stayed with me.", Category::Hope),
    quote("Morning always finds its way back.", Category::Hope),
    quote("What is meant for you will not pass you by.", Category::Hope),
    quote("Still waters teach louder lessons.", Category::Peace),
    quote("Some answers arrive gently.", Category::Peace),
    quote("Peace is not the absence of noise, but the presence of trust.", Category::Peace),
    quote("Breathe. You do not have to solve everything tonight.", Category::Peace),
];

pub const SCENES: &[Scene] = &[
    Scene { name: "rain", description: "night rain, umbrella, wet pavement, soft streetlights" },
    Scene { name: "forest", description: "quiet forest clearing, moonlight through trees" },
    Scene { name: "road", description: "empty road at dusk, long shadows, distant horizon" },
    Scene { name: "water", description: "calm lake at night, stars reflected on water" },
    Scene { name: "night", description: "open night sky, gentle starlight, peaceful stillness" },
    Scene { name: "window", description: "person by a rain-streaked window, warm lamp inside" },
    Scene { name: "hillside", description: "lone tree on a grassy hillside, wind in the grass" },
    Scene { name: "station", description: "small countryside train station, empty platform" },
    Scene { name: "seaside", description: "quiet shoreline, gentle waves, footprints in the sand" },
    Scene { name: "rooftop", description: "rooftop garden above a sleeping town, string lights" },
];

pub const SEASONS: &[&str] = &[
    "early spring, fresh green leaves",
    "late summer, tall grass and warm air",
    "autumn, falling amber leaves",
    "winter, light snow on the ground",
    "clear sky with scattered stars",
    "soft overcast sky",
];

pub const LIGHTING: &[&str] = &[
    "golden hour glow",
    "blue hour twilight",
    "soft moonlight",
    "warm lantern light",
    "diffused morning light",
];

pub const ATMOSPHERES: &[&str] = &[
    "light mist drifting",
    "gentle breeze",
    "fireflies in the air",
    "faint fog on the horizon",
    "quiet stillness",
];

pub const MOODS: &[&str] = &[
    "hopeful",
    "reflective",
    "tender",
    "calm",
    "nostalgic",
];

pub const ART_STYLE: &str = "Studio Ghibli inspired illustration with realistic cinematic lighting. \
    Soft bloom, natural shadows, gentle atmospheric depth. \
    Painterly textures, restrained line work, nostalgic mood.";

/// Visual theme sentence for a calendar month (1-12)
pub fn monthly_theme(month: u32) -> &'static str {
    match month {
        1 => "Cool blue tones, quiet beginnings, minimal contrast.",
        2 => "Warm highlights, soft shadows, longing and memory.",
        3 => "Balanced neutral light, sense of becoming.",
        4 => "Bright diffused light, hopeful softness.",
        5 => "Clear light, grounded stillness.",
        6 => "Golden hour warmth, nostalgic glow.",
        7 => "Cool night tones, silence and depth.",
        8 => "Muted warmth, waiting and pause.",
        9 => "Soft desaturation, letting go.",
        10 => "Higher contrast, cinematic depth.",
        11 => "Warm interior glow, gratitude.",
        12 => "Cold nights with small warm lights, quiet hope.",
        _ => "",
    }
}

/// Categories favoured in a given month; empty means no preference
pub fn preferred_categories(month: u32) -> &'static [Category] {
    match month {
        1 => &[Category::Growth, Category::Hope],
        2 => &[Category::Love],
        4 => &[Category::Hope, Category::Growth],
        9 => &[Category::Healing, Category::Peace],
        11 => &[Category::Faith, Category::Peace],
        12 => &[Category::Hope, Category::Faith],
        _ => &[],
    }
}
