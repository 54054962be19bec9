//! Alarm evaluation, run once per tick.
//!
//! Level-triggered: every tick tests each enabled alarm afresh. A breach
//! notifies only when the previous notification is older than the alarm's
//! cooldown. `last_triggered_at` is stamped whether or not delivery later
//! succeeds.

use crate::domain::{AlarmRule, Breach};
use crate::notify::{Notification, Outbound};
use crate::readings::ValueSource;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Tick timestamps: `now_ms` is monotonic and drives cooldowns, `unix_ms`
/// is wall-clock time written into payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTime {
    pub now_ms: u64,
    pub unix_ms: u64,
}

impl TickTime {
    /// Current tick time, monotonic relative to `started`.
    pub fn since(started: Instant) -> Self {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            now_ms: started.elapsed().as_millis() as u64,
            unix_ms,
        }
    }

    pub fn at(now_ms: u64) -> Self {
        Self { now_ms, unix_ms: now_ms }
    }
}

fn cooldown_elapsed(alarm: &AlarmRule, now_ms: u64) -> bool {
    match alarm.last_triggered_at {
        None => true,
        Some(last) => now_ms.saturating_sub(last) > alarm.cooldown_ms,
    }
}

fn describe(alarm: &AlarmRule, breach: Breach, value: f64) -> String {
    match breach {
        Breach::Below { threshold } => format!(
            "{}: {} {:.2} is below minimum {:.2}",
            alarm.name, alarm.sensor_ref, value, threshold
        ),
        Breach::Above { threshold } => format!(
            "{}: {} {:.2} is above maximum {:.2}",
            alarm.name, alarm.sensor_ref, value, threshold
        ),
    }
}

/// Evaluate `alarms` against `source` and return the notifications to send.
pub fn evaluate(
    alarms: &mut [AlarmRule],
    source: &dyn ValueSource,
    device: &str,
    at: TickTime,
) -> Vec<Outbound> {
    let mut outbound = Vec::new();

    for alarm in alarms.iter_mut().filter(|a| a.enabled) {
        let Some(value) = source.sample(alarm.sensor_kind, &alarm.sensor_ref) else {
            debug!("Alarm {}: {} unavailable, skipped", alarm.id, alarm.sensor_ref);
            continue;
        };
        let Some(breach) = alarm.check(value) else {
            continue;
        };
        if !cooldown_elapsed(alarm, at.now_ms) {
            debug!("Alarm {} still cooling down", alarm.id);
            continue;
        }

        let message = describe(alarm, breach, value);
        info!("[ALARM] {}", message);
        alarm.last_triggered_at = Some(at.now_ms);
        outbound.push(Outbound {
            url: alarm.webhook_url.clone(),
            payload: Notification::AlarmTriggered {
                message,
                sensor_id: alarm.sensor_ref.clone(),
                value,
                device: device.to_string(),
                timestamp: at.unix_ms,
            },
        });
    }

    outbound
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlarmPatch, SensorKind, MAX_DISABLED, MIN_DISABLED};
    use std::collections::HashMap;

    /// Fixed value per sensor ref; missing refs are unavailable.
    struct Fixed(HashMap<String, f64>);

    impl Fixed {
        fn one(sensor_ref: &str, value: f64) -> Self {
            Self(HashMap::from([(sensor_ref.to_string(), value)]))
        }
    }

    impl ValueSource for Fixed {
        fn sample(&self, _kind: SensorKind, sensor_ref: &str) -> Option<f64> {
            self.0.get(sensor_ref).copied()
        }
    }

    fn pool_alarm(min: f64, max: f64) -> AlarmRule {
        AlarmPatch {
            sensor_kind: Some(SensorKind::Ds18b20),
            sensor_ref: Some("pool_temp".into()),
            min_value: Some(min),
            max_value: Some(max),
            webhook_url: Some("http://hooks/pool".into()),
            cooldown_ms: Some(60_000),
            ..Default::default()
        }
        .into_alarm("pool_high")
        .unwrap()
    }

    #[test]
    fn test_cooldown_window() {
        let mut alarms = vec![pool_alarm(MIN_DISABLED, 30.0)];
        let hot = Fixed::one("pool_temp", 31.0);

        assert_eq!(evaluate(&mut alarms, &hot, "hub", TickTime::at(0)).len(), 1);
        assert!(evaluate(&mut alarms, &hot, "hub", TickTime::at(30_000)).is_empty());
        assert!(evaluate(&mut alarms, &hot, "hub", TickTime::at(60_000)).is_empty());
        assert_eq!(evaluate(&mut alarms, &hot, "hub", TickTime::at(60_001)).len(), 1);
        assert_eq!(alarms[0].last_triggered_at, Some(60_001));
    }

    #[test]
    fn test_sentinel_bounds() {
        let mut alarms = vec![pool_alarm(MIN_DISABLED, 30.0)];
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", 31.0), "hub", TickTime::at(0));
        assert_eq!(out.len(), 1);

        let mut alarms = vec![pool_alarm(MIN_DISABLED, 30.0)];
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", -1000.0), "hub", TickTime::at(0));
        assert!(out.is_empty());

        let mut alarms = vec![pool_alarm(10.0, MAX_DISABLED)];
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", 1000.0), "hub", TickTime::at(0));
        assert!(out.is_empty());
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", 9.0), "hub", TickTime::at(0));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_unavailable_skips_without_touching_cooldown() {
        let mut alarms = vec![pool_alarm(MIN_DISABLED, 30.0)];
        let out = evaluate(&mut alarms, &Fixed(HashMap::new()), "hub", TickTime::at(0));
        assert!(out.is_empty());
        assert_eq!(alarms[0].last_triggered_at, None);
    }

    #[test]
    fn test_disabled_alarm_is_ignored() {
        let mut alarms = vec![pool_alarm(MIN_DISABLED, 30.0)];
        alarms[0].enabled = false;
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", 99.0), "hub", TickTime::at(0));
        assert!(out.is_empty());
        assert_eq!(alarms[0].last_triggered_at, None);
    }

    #[test]
    fn test_payload_contents() {
        let mut alarms = vec![pool_alarm(MIN_DISABLED, 30.0)];
        let at = TickTime { now_ms: 5, unix_ms: 1_700_000_000_000 };
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", 31.2), "greenhouse", at);

        assert_eq!(out[0].url, "http://hooks/pool");
        match &out[0].payload {
            Notification::AlarmTriggered { message, sensor_id, value, device, timestamp } => {
                assert_eq!(sensor_id, "pool_temp");
                assert_eq!(*value, 31.2);
                assert_eq!(device, "greenhouse");
                assert_eq!(*timestamp, 1_700_000_000_000);
                assert!(message.contains("above maximum 30.00"));
                assert!(message.contains("31.20"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_within_window_is_quiet() {
        let mut alarms = vec![pool_alarm(20.0, 30.0)];
        let out = evaluate(&mut alarms, &Fixed::one("pool_temp", 25.0), "hub", TickTime::at(0));
        assert!(out.is_empty());
    }
}
