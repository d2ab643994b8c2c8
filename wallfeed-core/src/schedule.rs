use chrono::{NaiveTime, Timelike};
use log::{debug, warn};

use crate::settings::{ScheduleRule, Settings};

pub fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Parses `HH:MM` (24h) into minutes since midnight.
pub fn parse_clock(value: &str) -> Option<u32> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

impl ScheduleRule {
    /// `[start, end)`; when `end < start` the window wraps past midnight.
    /// Rules with unparseable times never match.
    pub fn matches(&self, now_minutes: u32) -> bool {
        let (Some(start), Some(end)) = (parse_clock(&self.start_time), parse_clock(&self.end_time)) else {
            warn!(
                "Ignoring schedule rule with invalid times {}-{}",
                self.start_time, self.end_time
            );
            return false;
        };
        if end < start {
            now_minutes >= start || now_minutes < end
        } else {
            now_minutes >= start && now_minutes < end
        }
    }
}

/// The source list to query at `now`: the first matching schedule rule's
/// source, or the configured default list.
pub fn resolve_source(settings: &Settings, now: NaiveTime) -> String {
    if !settings.scheduled_enabled || settings.schedules.is_empty() {
        return settings.subreddit.clone();
    }

    let now_minutes = minutes_since_midnight(now);
    match settings
        .schedules
        .iter()
        .find(|rule| !rule.source.trim().is_empty() && rule.matches(now_minutes))
    {
        Some(rule) => {
            debug!("Schedule {}-{} selects {}", rule.start_time, rule.end_time, rule.source);
            rule.source.clone()
        }
        None => settings.subreddit.clone(),
    }
}
