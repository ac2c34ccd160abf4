use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tera::{Context, Tera};

use faultdesk_core::config::NotifyConfig;
use faultdesk_core::notify::{EmailRequest, Notification, Notifier, NotifyError};

/// Stand-in when `notify.enabled = false`: deliveries are dropped, not
/// errors, so workflow code never branches on the transport.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::debug!(
            event_name = "notify.dropped",
            user_id = %notification.user_id,
            "notification transport disabled"
        );
        Ok(())
    }

    async fn email(&self, email: EmailRequest) -> Result<(), NotifyError> {
        tracing::debug!(
            event_name = "notify.email_dropped",
            user_id = %email.to_user_id,
            template = %email.template,
            "email transport disabled"
        );
        Ok(())
    }
}

const ACTION_ASSIGNED_TEMPLATE: &str = "\
A fault ticket has been routed to you.

Site:   {{ site_code }}
Issue:  {{ issue_type }}
Ticket: {{ action_id }}

Open your active items to acknowledge it.";

const GENERIC_TEMPLATE: &str = "\
You have a new Faultdesk notification.
{% for key, value in data %}{{ key }}: {{ value }}
{% endfor %}";

/// Delivers notifications and rendered emails to the external gateway as
/// JSON webhooks. Best-effort by contract: callers log failures and move
/// on.
#[derive(Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: SecretString,
    email_from: String,
    templates: Tera,
}

impl WebhookNotifier {
    pub fn from_config(config: &NotifyConfig) -> Result<Self, String> {
        let url = config
            .webhook_url
            .clone()
            .ok_or_else(|| "notify.webhook_url is required".to_string())?;
        let token = config
            .webhook_token
            .clone()
            .ok_or_else(|| "notify.webhook_token is required".to_string())?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| format!("failed to build http client: {e}"))?;

        let mut templates = Tera::default();
        templates
            .add_raw_template("action_assigned", ACTION_ASSIGNED_TEMPLATE)
            .map_err(|e| format!("bad action_assigned template: {e}"))?;
        templates
            .add_raw_template("generic", GENERIC_TEMPLATE)
            .map_err(|e| format!("bad generic template: {e}"))?;

        Ok(Self { client, url, token, email_from: config.email_from.clone(), templates })
    }

    fn render_email(&self, request: &EmailRequest) -> Result<String, NotifyError> {
        let template = if self.templates.get_template_names().any(|n| n == request.template) {
            request.template.clone()
        } else {
            "generic".to_string()
        };

        let mut context = Context::new();
        for (key, value) in &request.data {
            context.insert(key, value);
        }
        if template == "generic" {
            context.insert("data", &request.data);
        }

        self.templates
            .render(&template, &context)
            .map_err(|e| NotifyError(format!("template render failed: {e}")))
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError(format!("gateway returned {}", response.status())));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.post(json!({
            "kind": "notification",
            "user_id": notification.user_id,
            "message": notification.message,
            "link": notification.link,
            "metadata": notification.metadata,
        }))
        .await
    }

    async fn email(&self, email: EmailRequest) -> Result<(), NotifyError> {
        let body = self.render_email(&email)?;
        self.post(json!({
            "kind": "email",
            "from": self.email_from,
            "to_user_id": email.to_user_id,
            "template": email.template,
            "body": body,
        }))
        .await
    }
}
