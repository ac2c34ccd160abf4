use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// In-app notification payload handed to the delivery collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub message: String,
    pub link: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Email payload: template name plus substitution data; rendering and
/// transport are the delivery side's concern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to_user_id: String,
    pub template: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification delivery failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Best-effort delivery capability. Callers must treat failures as
/// secondary effects: log them, never let them mask a committed write.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
    async fn email(&self, email: EmailRequest) -> Result<(), NotifyError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    notifications: Arc<Mutex<Vec<Notification>>>,
    emails: Arc<Mutex<Vec<EmailRequest>>>,
}

impl InMemoryNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn emails(&self) -> Vec<EmailRequest> {
        match self.emails.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        match self.notifications.lock() {
            Ok(mut items) => items.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }

    async fn email(&self, email: EmailRequest) -> Result<(), NotifyError> {
        match self.emails.lock() {
            Ok(mut items) => items.push(email),
            Err(poisoned) => poisoned.into_inner().push(email),
        }
        Ok(())
    }
}

/// Notifier that always fails; used to assert delivery failures never
/// mask the primary mutation.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
        Err(NotifyError("notify transport down".to_string()))
    }

    async fn email(&self, _email: EmailRequest) -> Result<(), NotifyError> {
        Err(NotifyError("email transport down".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{InMemoryNotifier, Notification, Notifier};

    #[tokio::test]
    async fn in_memory_notifier_records_deliveries() {
        let notifier = InMemoryNotifier::default();
        notifier
            .notify(Notification {
                user_id: "u-tech".to_string(),
                message: "New fault routed to you".to_string(),
                link: Some("/actions/ACT-1".to_string()),
                metadata: BTreeMap::new(),
            })
            .await
            .expect("in-memory delivery always succeeds");

        let sent = notifier.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "u-tech");
    }
}
