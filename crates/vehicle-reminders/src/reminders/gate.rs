//! Plan gate: which channels an owner may be reached on.

use super::channel::Channel;
use super::domain::{PlanStatus, UserNotificationProfile};

/// Email and push follow the profile toggles; SMS additionally needs an active pro plan and a
/// phone number on file.
pub fn is_channel_eligible(
    channel: Channel,
    plan: &PlanStatus,
    profile: &UserNotificationProfile,
) -> bool {
    match channel {
        Channel::Email => profile.email_enabled,
        Channel::Push => profile.push_enabled,
        Channel::Sms => profile.sms_enabled && plan.is_active_pro() && profile.has_phone(),
    }
}

/// Eligible channels in fixed email, push, sms order.
pub fn eligible_channels(plan: &PlanStatus, profile: &UserNotificationProfile) -> Vec<Channel> {
    Channel::ALL
        .into_iter()
        .filter(|channel| is_channel_eligible(*channel, plan, profile))
        .collect()
}
