use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimerTick {
    pub session_id: String,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub urgency: Urgency,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeExpired {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// How close the deadline is, for UI styling.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    Low,
    Critical,
}

impl Urgency {
    pub fn from_remaining(remaining_seconds: u32) -> Self {
        match remaining_seconds {
            0..=10 => Urgency::Critical,
            11..=60 => Urgency::Low,
            _ => Urgency::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_thresholds() {
        assert_eq!(Urgency::from_remaining(3600), Urgency::Normal);
        assert_eq!(Urgency::from_remaining(61), Urgency::Normal);
        assert_eq!(Urgency::from_remaining(60), Urgency::Low);
        assert_eq!(Urgency::from_remaining(10), Urgency::Critical);
        assert_eq!(Urgency::from_remaining(0), Urgency::Critical);
    }

    #[test]
    fn tick_serializes_with_kebab_tag() {
        let event = TimerEvent::TimerTick(TimerTick {
            session_id: "s1".to_string(),
            remaining_seconds: 5,
            elapsed_seconds: 55,
            total_seconds: 60,
            urgency: Urgency::Critical,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "timer-tick");
        assert_eq!(json["urgency"], "critical");
    }
}
