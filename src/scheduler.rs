//! Scheduled webhook dispatch, run once per tick after alarm evaluation.
//!
//! An enabled webhook with a nonzero interval is due when it has never sent
//! or its interval has fully elapsed. `last_sent_at` is stamped on every
//! attempt, independent of delivery.

use crate::alarms::TickTime;
use crate::domain::ScheduledWebhook;
use crate::notify::{Notification, Outbound};
use crate::readings::{bus_values, ReadingView};
use tracing::debug;

fn is_due(webhook: &ScheduledWebhook, now_ms: u64) -> bool {
    if !webhook.enabled || webhook.update_interval_ms == 0 {
        return false;
    }
    match webhook.last_sent_at {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= webhook.update_interval_ms,
    }
}

/// Full snapshot payload for one webhook.
pub fn snapshot_payload(webhook: &ScheduledWebhook, view: &ReadingView<'_>, at: TickTime) -> Notification {
    Notification::ScheduledUpdate {
        webhook_name: webhook.name.clone(),
        timestamp: at.unix_ms,
        channels: view.channels().clone(),
        ds18b20_sensors: bus_values(view.sensors()),
    }
}

pub fn dispatch(webhooks: &mut [ScheduledWebhook], view: &ReadingView<'_>, at: TickTime) -> Vec<Outbound> {
    let mut outbound = Vec::new();
    for webhook in webhooks.iter_mut() {
        if !is_due(webhook, at.now_ms) {
            continue;
        }
        debug!("Webhook {} due", webhook.id);
        webhook.last_sent_at = Some(at.now_ms);
        outbound.push(Outbound {
            url: webhook.url.clone(),
            payload: snapshot_payload(webhook, view, at),
        });
    }
    outbound
}
