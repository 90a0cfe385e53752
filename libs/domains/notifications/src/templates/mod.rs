//! Email template rendering engine.
//!
//! Handlebars templates for each notification kind. HTML bodies are
//! rendered into a shared layout; text bodies render without HTML escaping.

use crate::config::NotificationServiceConfig;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    NotificationKind, PaymentActionRequiredData, PaymentFailedData,
    SubscriptionCancellationScheduledData, SubscriptionCanceledData, SubscriptionPausedData,
    SubscriptionResumedData, SubscriptionUpgradedData, TrialEndedData,
};
use handlebars::Handlebars;
use serde_json::{Value, json};
use tracing::debug;

/// Rendered email content.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Template engine for rendering email templates.
pub struct TemplateEngine {
    html: Handlebars<'static>,
    text: Handlebars<'static>,
    config: NotificationServiceConfig,
}

const TEMPLATES: [(NotificationKind, &str, &str); 10] = [
    (NotificationKind::VerificationCode, VERIFICATION_HTML, VERIFICATION_TEXT),
    (NotificationKind::Welcome, WELCOME_HTML, WELCOME_TEXT),
    (NotificationKind::PaymentFailed, PAYMENT_FAILED_HTML, PAYMENT_FAILED_TEXT),
    (
        NotificationKind::PaymentActionRequired,
        PAYMENT_ACTION_HTML,
        PAYMENT_ACTION_TEXT,
    ),
    (NotificationKind::TrialEnded, TRIAL_ENDED_HTML, TRIAL_ENDED_TEXT),
    (NotificationKind::SubscriptionCanceled, CANCELED_HTML, CANCELED_TEXT),
    (NotificationKind::SubscriptionPaused, PAUSED_HTML, PAUSED_TEXT),
    (NotificationKind::SubscriptionResumed, RESUMED_HTML, RESUMED_TEXT),
    (NotificationKind::SubscriptionUpgraded, UPGRADED_HTML, UPGRADED_TEXT),
    (
        NotificationKind::SubscriptionCancellationScheduled,
        CANCEL_SCHEDULED_HTML,
        CANCEL_SCHEDULED_TEXT,
    ),
];

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new(config: NotificationServiceConfig) -> NotificationResult<Self> {
        let mut html = Handlebars::new();
        let mut text = Handlebars::new();
        text.register_escape_fn(handlebars::no_escape);

        register(&mut html, "layout", LAYOUT_HTML)?;
        register(&mut text, "layout", LAYOUT_TEXT)?;
        for (kind, html_source, text_source) in TEMPLATES {
            register(&mut html, &kind.to_string(), html_source)?;
            register(&mut text, &kind.to_string(), text_source)?;
        }

        Ok(Self { html, text, config })
    }

    pub fn config(&self) -> &NotificationServiceConfig {
        &self.config
    }

    pub fn render_verification_code(&self, code: &str) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::VerificationCode,
            format!("Your {} verification code", self.config.app_name),
            json!({
                "code": code,
                "ttl_minutes": self.config.verification_code_ttl_minutes,
            }),
        )
    }

    pub fn render_welcome(&self, display_name: &str) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::Welcome,
            format!("Welcome to {}, {}!", self.config.app_name, display_name),
            json!({
                "display_name": display_name,
                "dashboard_url": format!("{}/dashboard", self.config.frontend_url),
            }),
        )
    }

    pub fn render_payment_failed(&self, data: &PaymentFailedData) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::PaymentFailed,
            format!("Payment of {} failed", data.amount),
            self.with_billing_url(data)?,
        )
    }

    pub fn render_payment_action_required(
        &self,
        data: &PaymentActionRequiredData,
    ) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::PaymentActionRequired,
            format!("Action required to complete your {} payment", data.amount),
            serde_json::to_value(data)?,
        )
    }

    pub fn render_trial_ended(&self, data: &TrialEndedData) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::TrialEnded,
            format!("Your {} trial has ended", data.plan_name),
            self.with_billing_url(data)?,
        )
    }

    pub fn render_subscription_canceled(
        &self,
        data: &SubscriptionCanceledData,
    ) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::SubscriptionCanceled,
            format!("Your {} subscription has been canceled", data.plan_name),
            self.with_billing_url(data)?,
        )
    }

    pub fn render_subscription_paused(
        &self,
        data: &SubscriptionPausedData,
    ) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::SubscriptionPaused,
            format!("Your {} subscription is paused", data.plan_name),
            self.with_billing_url(data)?,
        )
    }

    pub fn render_subscription_resumed(
        &self,
        data: &SubscriptionResumedData,
    ) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::SubscriptionResumed,
            format!("Your {} subscription has resumed", data.plan_name),
            self.with_billing_url(data)?,
        )
    }

    pub fn render_subscription_upgraded(
        &self,
        data: &SubscriptionUpgradedData,
    ) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::SubscriptionUpgraded,
            format!("You're now on {}", data.new_plan),
            self.with_billing_url(data)?,
        )
    }

    pub fn render_subscription_cancellation_scheduled(
        &self,
        data: &SubscriptionCancellationScheduledData,
    ) -> NotificationResult<RenderedEmail> {
        self.render(
            NotificationKind::SubscriptionCancellationScheduled,
            format!("Your {} subscription ends on {}", data.plan_name, data.cancel_at),
            self.with_billing_url(data)?,
        )
    }

    /// Payload plus a default `billing_url` when the payload has none.
    fn with_billing_url<T: serde::Serialize>(&self, data: &T) -> NotificationResult<Value> {
        let mut value = serde_json::to_value(data)?;
        if let Value::Object(map) = &mut value {
            if map.get("billing_url").is_none_or(Value::is_null) {
                map.insert(
                    "billing_url".to_string(),
                    Value::String(format!("{}/settings/billing", self.config.frontend_url)),
                );
            }
        }
        Ok(value)
    }

    fn render(
        &self,
        kind: NotificationKind,
        subject: String,
        mut data: Value,
    ) -> NotificationResult<RenderedEmail> {
        debug!(kind = %kind, "Rendering email");

        if let Value::Object(map) = &mut data {
            map.insert("app_name".to_string(), json!(self.config.app_name));
            map.insert("support_email".to_string(), json!(self.config.support_email));
            map.insert("subject".to_string(), json!(subject));
        }

        let name = kind.to_string();
        let html_content = self.html.render(&name, &data)?;
        let text_content = self.text.render(&name, &data)?;

        let html = self.html.render("layout", &with_content(&data, html_content))?;
        let text = self.text.render("layout", &with_content(&data, text_content))?;

        Ok(RenderedEmail {
            subject,
            html,
            text,
        })
    }
}

fn register(registry: &mut Handlebars<'static>, name: &str, source: &str) -> NotificationResult<()> {
    registry
        .register_template_string(name, source)
        .map_err(|e| NotificationError::Template(format!("Failed to register {}: {}", name, e)))
}

fn with_content(data: &Value, content: String) -> Value {
    let mut data = data.clone();
    if let Value::Object(map) = &mut data {
        map.insert("content".to_string(), Value::String(content));
    }
    data
}

// ============================================================================
// Email Templates
// ============================================================================

const LAYOUT_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{{subject}}</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background-color: #f4f4f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; border-radius: 8px; padding: 40px;">
        {{{content}}}
      </td>
    </tr>
    <tr>
      <td style="color: #a1a1aa; font-size: 12px; text-align: center; padding-top: 24px;">
        {{app_name}}{{#if support_email}} &middot; <a href="mailto:{{support_email}}" style="color: #a1a1aa;">{{support_email}}</a>{{/if}}
      </td>
    </tr>
  </table>
</body>
</html>"#;

const LAYOUT_TEXT: &str = r#"{{content}}

--
{{app_name}}{{#if support_email}} · {{support_email}}{{/if}}
"#;

const VERIFICATION_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Verify your email</h1>
<p style="color: #52525b; font-size: 16px;">Enter this code to finish signing up for {{app_name}}:</p>
<p style="font-size: 32px; font-weight: 700; letter-spacing: 8px; text-align: center; color: #18181b;">{{code}}</p>
<p style="color: #71717a; font-size: 13px;">The code expires in {{ttl_minutes}} minutes. If you didn't request it, you can ignore this email.</p>"#;

const VERIFICATION_TEXT: &str = r#"Your {{app_name}} verification code is: {{code}}

The code expires in {{ttl_minutes}} minutes. If you didn't request it, you can ignore this email."#;

const WELCOME_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Welcome, {{display_name}}!</h1>
<p style="color: #52525b; font-size: 16px;">Your {{app_name}} account is ready.</p>
<p style="text-align: center;"><a href="{{dashboard_url}}" style="display: inline-block; background-color: #18181b; color: #ffffff; padding: 12px 32px; text-decoration: none; border-radius: 6px;">Go to Dashboard</a></p>"#;

const WELCOME_TEXT: &str = r#"Welcome, {{display_name}}!

Your {{app_name}} account is ready: {{dashboard_url}}"#;

const PAYMENT_FAILED_HTML: &str = r#"<h1 style="color: #b91c1c; font-size: 22px; margin: 0 0 16px 0;">Payment failed</h1>
<p style="color: #52525b; font-size: 16px;">{{#if customer_name}}Hi {{customer_name}}, w{{else}}W{{/if}}e couldn't collect your payment of <strong>{{amount}}</strong>.</p>
{{#if next_retry_date}}<p style="color: #52525b;">We'll try again on {{next_retry_date}}.</p>{{/if}}
{{#if invoice_url}}<p><a href="{{invoice_url}}">View invoice</a></p>{{/if}}
<p><a href="{{billing_url}}">Update payment method</a></p>"#;

const PAYMENT_FAILED_TEXT: &str = r#"{{#if customer_name}}Hi {{customer_name}}, w{{else}}W{{/if}}e couldn't collect your payment of {{amount}}.
{{#if next_retry_date}}We'll try again on {{next_retry_date}}.
{{/if}}{{#if invoice_url}}Invoice: {{invoice_url}}
{{/if}}Update your payment method: {{billing_url}}"#;

const PAYMENT_ACTION_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Confirm your payment</h1>
<p style="color: #52525b; font-size: 16px;">Your bank needs you to confirm the payment of <strong>{{amount}}</strong>.</p>
<p style="text-align: center;"><a href="{{action_url}}" style="display: inline-block; background-color: #2563eb; color: #ffffff; padding: 12px 32px; text-decoration: none; border-radius: 6px;">Confirm payment</a></p>"#;

const PAYMENT_ACTION_TEXT: &str = r#"Your bank needs you to confirm the payment of {{amount}}.

Confirm here: {{action_url}}"#;

const TRIAL_ENDED_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Your trial has ended</h1>
<p style="color: #52525b; font-size: 16px;">Your {{plan_name}} trial is over. Choose a plan to keep using {{app_name}}.</p>
<p><a href="{{billing_url}}">Choose a plan</a></p>"#;

const TRIAL_ENDED_TEXT: &str = r#"Your {{plan_name}} trial is over. Choose a plan to keep using {{app_name}}: {{billing_url}}"#;

const CANCELED_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Subscription canceled</h1>
<p style="color: #52525b; font-size: 16px;">Your {{plan_name}} subscription has been canceled.{{#if access_until}} You keep access until {{access_until}}.{{/if}}</p>
<p><a href="{{billing_url}}">Resubscribe</a></p>"#;

const CANCELED_TEXT: &str = r#"Your {{plan_name}} subscription has been canceled.{{#if access_until}} You keep access until {{access_until}}.{{/if}}

Resubscribe: {{billing_url}}"#;

const PAUSED_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Subscription paused</h1>
<p style="color: #52525b; font-size: 16px;">Your {{plan_name}} subscription is paused{{#if resumes_at}} until {{resumes_at}}{{/if}}.</p>
<p><a href="{{billing_url}}">Manage subscription</a></p>"#;

const PAUSED_TEXT: &str = r#"Your {{plan_name}} subscription is paused{{#if resumes_at}} until {{resumes_at}}{{/if}}.

Manage subscription: {{billing_url}}"#;

const RESUMED_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Welcome back</h1>
<p style="color: #52525b; font-size: 16px;">Your {{plan_name}} subscription is active again.{{#if next_billing_date}} Next billing date: {{next_billing_date}}.{{/if}}</p>"#;

const RESUMED_TEXT: &str = r#"Your {{plan_name}} subscription is active again.{{#if next_billing_date}} Next billing date: {{next_billing_date}}.{{/if}}"#;

const UPGRADED_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Plan upgraded</h1>
<p style="color: #52525b; font-size: 16px;">You moved from {{previous_plan}} to <strong>{{new_plan}}</strong>{{#if new_amount}} at {{new_amount}}{{/if}}.</p>
<p><a href="{{billing_url}}">View billing</a></p>"#;

const UPGRADED_TEXT: &str = r#"You moved from {{previous_plan}} to {{new_plan}}{{#if new_amount}} at {{new_amount}}{{/if}}.

View billing: {{billing_url}}"#;

const CANCEL_SCHEDULED_HTML: &str = r#"<h1 style="color: #18181b; font-size: 22px; margin: 0 0 16px 0;">Cancellation scheduled</h1>
<p style="color: #52525b; font-size: 16px;">Your {{plan_name}} subscription will end on {{cancel_at}}.</p>
{{#if reactivate_url}}<p><a href="{{reactivate_url}}">Keep my subscription</a></p>{{else}}<p><a href="{{billing_url}}">Keep my subscription</a></p>{{/if}}"#;

const CANCEL_SCHEDULED_TEXT: &str = r#"Your {{plan_name}} subscription will end on {{cancel_at}}.

Keep your subscription: {{#if reactivate_url}}{{reactivate_url}}{{else}}{{billing_url}}{{/if}}"#;
