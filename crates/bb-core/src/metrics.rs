//! Battery and counter formulas. Every battery change is clamped to `[0, 100]`.

use std::time::Duration;

use crate::document::{Period, StorageDocument};

pub const BATTERY_MIN: f64 = 0.0;
pub const BATTERY_MAX: f64 = 100.0;

pub const SCROLL_DRAIN: f64 = 0.2;
pub const TIME_DRAIN_PER_MINUTE: f64 = 1.0;
pub const COMPLETION_CHARGE: f64 = 0.5;
pub const RECHARGE_PER_MINUTE: f64 = 0.5;

pub const FAST_CLICK_WINDOW: Duration = Duration::from_secs(3);
pub const FAST_CLICK_REWARD: f64 = 2.0;
pub const SLOW_CLICK_REWARD: f64 = 1.0;

pub fn clamp_battery(value: f64) -> f64 {
    if value.is_nan() {
        return BATTERY_MIN;
    }
    value.clamp(BATTERY_MIN, BATTERY_MAX)
}

/// Cheap gate used before even trying for a lease.
pub fn battery_depleted(battery: f64) -> bool {
    battery <= BATTERY_MIN
}

fn adjust(doc: &mut StorageDocument, delta: f64) -> f64 {
    doc.brain_battery = clamp_battery(doc.brain_battery + delta);
    doc.brain_battery
}

pub fn apply_scroll(doc: &mut StorageDocument, period: Period) -> f64 {
    doc.today.period_mut(period).scroll_count += 1;
    adjust(doc, -SCROLL_DRAIN)
}

pub fn apply_time_wasted(doc: &mut StorageDocument, period: Period, seconds: u64) -> f64 {
    let slot = doc.today.period_mut(period);
    slot.time_wasted = slot.time_wasted.saturating_add(seconds);
    adjust(doc, -(seconds as f64 / 60.0) * TIME_DRAIN_PER_MINUTE)
}

/// Lesson or task completion.
pub fn apply_completion(doc: &mut StorageDocument, period: Period) -> f64 {
    doc.today.period_mut(period).lesson_count += 1;
    adjust(doc, COMPLETION_CHARGE)
}

/// Time spent away from tracked sites.
pub fn apply_recharge(doc: &mut StorageDocument, seconds: u64) -> f64 {
    adjust(doc, (seconds as f64 / 60.0) * RECHARGE_PER_MINUTE)
}

pub fn link_click_reward(since_reveal: Duration) -> f64 {
    if since_reveal <= FAST_CLICK_WINDOW {
        FAST_CLICK_REWARD
    } else {
        SLOW_CLICK_REWARD
    }
}

pub fn apply_link_click(doc: &mut StorageDocument, since_reveal: Duration) -> f64 {
    adjust(doc, link_click_reward(since_reveal))
}
