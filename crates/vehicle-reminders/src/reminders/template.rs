use super::channel::{Channel, ChannelMessage};
use super::domain::{Document, UserNotificationProfile, Vehicle};

const FALLBACK_VEHICLE: &str = "your vehicle";

/// Fields the reminder copy is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct ReminderContext<'a> {
    pub document: &'a Document,
    pub vehicle: Option<&'a Vehicle>,
    pub profile: &'a UserNotificationProfile,
    /// Whole days left until expiry at send time.
    pub days_left: i64,
}

impl ReminderContext<'_> {
    fn vehicle_name(&self) -> String {
        self.vehicle
            .map(Vehicle::display_name)
            .unwrap_or_else(|| FALLBACK_VEHICLE.to_string())
    }

    fn expiry_label(&self) -> String {
        self.document
            .expiry_date
            .map(|date| date.format("%B %d, %Y").to_string())
            .unwrap_or_else(|| "an unknown date".to_string())
    }

    fn lead_time(&self) -> String {
        lead_phrase(self.days_left)
    }

    fn greeting_name(&self) -> &str {
        let name = self.profile.full_name.trim();
        if name.is_empty() {
            "there"
        } else {
            name
        }
    }
}

/// Lead time phrase from the real day count, which can be shorter than the milestone that fired.
pub fn lead_phrase(days_left: i64) -> String {
    match days_left {
        i64::MIN..=0 => "today".to_string(),
        1 => "tomorrow".to_string(),
        7 => "in 1 week".to_string(),
        days if days % 7 == 0 => format!("in {} weeks", days / 7),
        days => format!("in {days} days"),
    }
}

pub fn render(channel: Channel, ctx: &ReminderContext<'_>) -> ChannelMessage {
    match channel {
        Channel::Email => render_email(ctx),
        Channel::Push => render_push(ctx),
        Channel::Sms => render_sms(ctx),
    }
}

fn render_email(ctx: &ReminderContext<'_>) -> ChannelMessage {
    let kind = ctx.document.document_type.label();
    let vehicle = ctx.vehicle_name();
    let expiry = ctx.expiry_label();

    let lead = ctx.lead_time();

    let subject = match ctx.days_left {
        i64::MIN..=1 => format!("Urgent: your {kind} for {vehicle} expires {lead}"),
        2..=7 => format!("Action needed: your {kind} for {vehicle} expires {lead}"),
        _ => format!("Reminder: your {kind} for {vehicle} expires {lead}"),
    };

    let call_to_action = match ctx.days_left {
        i64::MIN..=1 => {
            "Renew it today to avoid driving with expired paperwork and possible fines."
        }
        2..=7 => "There is less than a week left, now is a good time to book the renewal.",
        _ => "Plan the renewal early so nothing lapses.",
    };

    let body = format!(
        "Hello {name},\n\n\
         \"{title}\" ({kind}) for {vehicle} expires on {expiry}, {lead}.\n\n\
         {call_to_action}\n\n\
         You are receiving this because email reminders are enabled in your notification settings.",
        name = ctx.greeting_name(),
        title = ctx.document.title,
    );

    ChannelMessage::Email { subject, body }
}

fn render_push(ctx: &ReminderContext<'_>) -> ChannelMessage {
    let kind = ctx.document.document_type.label();
    let title = format!("Your {kind} expires {}", ctx.lead_time());
    let body = format!(
        "{} for {} expires on {}.",
        ctx.document.title,
        ctx.vehicle_name(),
        ctx.expiry_label()
    );
    ChannelMessage::Push { title, body }
}

fn render_sms(ctx: &ReminderContext<'_>) -> ChannelMessage {
    let body = format!(
        "Reminder: {} ({}) for {} expires {} on {}.",
        ctx.document.title,
        ctx.document.document_type.label(),
        ctx.vehicle_name(),
        ctx.lead_time(),
        ctx.expiry_label()
    );
    ChannelMessage::Sms { body }
}
