/// Holiday posts
///
/// Exact-date, once-per-year content. When today's date matches a holiday that
/// has not been posted this year, its fixed quote and scene replace normal
/// selection and bypass every cooldown.

use chrono::{Datelike, NaiveDate};

use crate::state::HolidayUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holiday {
    pub month: u32,
    pub day: u32,
    pub name: &'static str,
    pub quote: &'static str,
    pub scene: &'static str,
}

pub const HOLIDAYS: &[Holiday] = &[
    Holiday {
        month: 1,
        day: 1,
        name: "new_year",
        quote: "This year, I’m learning to walk slower and trust God more.",
        scene: "quiet lakeside at dawn",
    },
    Holiday {
        month: 2,
        day: 14,
        name: "valentines",
        quote: "Love is choosing patience when it would be easier to leave.",
        scene: "evening street lights, two figures walking",
    },
    Holiday {
        month: 3,
        day: 8,
        name: "womens_day",
        quote: "Strong women don’t always speak loudly. Sometimes they endure quietly.",
        scene: "woman by window, morning light",
    },
    Holiday {
        month: 4,
        day: 1,
        name: "april_fools",
        quote: "Not everything that looks like failure is the end of the story.",
        scene: "winding road, light through clouds",
    },
    Holiday {
        month: 5,
        day: 1,
        name: "labor_may",
        quote: "The work you do in silence still matters.",
        scene: "worker resting at sunset",
    },
    Holiday {
        month: 6,
        day: 1,
        name: "pride",
        quote: "You are allowed to exist without explaining yourself.",
        scene: "person standing in open field at sunrise",
    },
    Holiday {
        month: 7,
        day: 4,
        name: "independence",
        quote: "Freedom begins when fear no longer decides for you.",
        scene: "open road under wide sky",
    },
    Holiday {
        month: 8,
        day: 4,
        name: "friendship",
        quote: "Some friendships are answers to prayers we never said out loud.",
        scene: "two silhouettes at golden hour",
    },
    Holiday {
        month: 9,
        day: 1,
        name: "labor_sep",
        quote: "Rest is not quitting. It’s preparation.",
        scene: "empty park bench, late afternoon",
    },
    Holiday {
        month: 10,
        day: 31,
        name: "halloween",
        quote: "Not everything hidden is dangerous. Some things are healing.",
        scene: "foggy forest path, lantern glow",
    },
    Holiday {
        month: 11,
        day: 28,
        name: "thanksgiving",
        quote: "Gratitude doesn’t erase pain, but it softens the weight.",
        scene: "table by window, autumn light",
    },
    Holiday {
        month: 12,
        day: 25,
        name: "christmas",
        quote: "Hope often arrives quietly, not loudly.",
        scene: "snowy street at night, warm windows",
    },
];

/// Holiday configured for a calendar date, regardless of usage
pub fn holiday_on(date: NaiveDate) -> Option<&'static Holiday> {
    HOLIDAYS
        .iter()
        .find(|h| h.month == date.month() && h.day == date.day())
}

/// Holiday to post today, or `None` if there is none or it was already used this year
pub fn todays_holiday(today: NaiveDate, usage: &HolidayUsage) -> Option<&'static Holiday> {
    let holiday = holiday_on(today)?;

    if usage.is_used(today.year(), holiday.name) {
        log::info!(
            "Holiday '{}' already posted in {}; using regular rotation",
            holiday.name,
            today.year()
        );
        return None;
    }

    Some(holiday)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn christmas_is_offered_when_unused() {
        let holiday = todays_holiday(date(2025, 12, 25), &HolidayUsage::default()).unwrap();

        assert_eq!(holiday.name, "christmas");
        assert_eq!(holiday.quote, "Hope often arrives quietly, not loudly.");
    }

    #[test]
    fn used_holiday_declines_until_next_year() {
        let mut usage = HolidayUsage::default();
        usage.mark_used(2025, "christmas");

        assert!(todays_holiday(date(2025, 12, 25), &usage).is_none());
        assert!(todays_holiday(date(2026, 12, 25), &usage).is_some());
    }

    #[test]
    fn ordinary_days_have_no_holiday() {
        assert!(todays_holiday(date(2025, 12, 24), &HolidayUsage::default()).is_none());
        assert!(holiday_on(date(2025, 3, 9)).is_none());
    }

    #[test]
    fn holiday_dates_and_names_are_unique() {
        let mut dates: Vec<_> = HOLIDAYS.iter().map(|h| (h.month, h.day)).collect();
        let mut names: Vec<_> = HOLIDAYS.iter().map(|h| h.name).collect();
        dates.sort();
        dates.dedup();
        names.sort();
        names.dedup();

        assert_eq!(dates.len(), HOLIDAYS.len());
        assert_eq!(names.len(), HOLIDAYS.len());
    }
}
