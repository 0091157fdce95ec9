/// Post-commit email notifications
///
/// Each scheduled notification runs as its own detached tokio task. Delivery is
/// at-most-once: on success the entity's `email_sent` flag is set, on failure the
/// error is logged and the flag stays false. Outcomes are observable through the
/// returned `JoinHandle` and the broadcast channel from `subscribe`.

use crate::{
    mailer::{EmailFactory, EmailMessage, EmailSender},
    error::IdentityResult,
    metrics,
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Confirmation,
    Invitation,
    PasswordReset,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Confirmation => "confirmation",
            NotificationKind::Invitation => "invitation",
            NotificationKind::PasswordReset => "password_reset",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            NotificationKind::Confirmation => "confirmations",
            NotificationKind::Invitation => "invitations",
            NotificationKind::PasswordReset => "password_resets",
        }
    }
}

/// Everything needed to render and deliver one email
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Id of the confirmation, invitation or password reset row
    pub entity_id: String,
    pub reference: String,
    pub to: String,
    pub first_name: Option<String>,
    /// Inviter's display name, invitations only
    pub invited_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub kind: NotificationKind,
    pub entity_id: String,
    pub outcome: DeliveryOutcome,
}

#[derive(Clone)]
pub struct Notifier {
    db: SqlitePool,
    sender: Arc<dyn EmailSender>,
    factory: EmailFactory,
    reports: broadcast::Sender<DeliveryReport>,
}

impl Notifier {
    pub fn new(db: SqlitePool, sender: Arc<dyn EmailSender>, factory: EmailFactory) -> Self {
        let (reports, _) = broadcast::channel(64);
        Self {
            db,
            sender,
            factory,
            reports,
        }
    }

    /// Receive a report for every delivery attempted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reports.subscribe()
    }

    /// Spawn the delivery task; dropping the handle detaches it
    pub fn schedule(&self, notification: Notification) -> JoinHandle<DeliveryOutcome> {
        let notifier = self.clone();
        tokio::spawn(async move { notifier.deliver(notification).await })
    }

    async fn deliver(&self, notification: Notification) -> DeliveryOutcome {
        let kind = notification.kind;

        let outcome = match self.attempt(&notification).await {
            Ok(()) => {
                if let Err(e) = self.mark_email_sent(kind, &notification.entity_id).await {
                    // Email went out; only the bookkeeping is lost
                    tracing::warn!(
                        kind = kind.as_str(),
                        entity_id = %notification.entity_id,
                        "Failed to record email delivery: {}",
                        e
                    );
                }
                tracing::info!(kind = kind.as_str(), entity_id = %notification.entity_id, "Email delivered");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                tracing::error!(
                    kind = kind.as_str(),
                    entity_id = %notification.entity_id,
                    "Email delivery failed: {}",
                    e
                );
                DeliveryOutcome::Failed(e.to_string())
            }
        };

        metrics::record_email_delivery(kind.as_str(), outcome == DeliveryOutcome::Sent);

        // No subscribers is the normal case outside tests
        let _ = self.reports.send(DeliveryReport {
            kind,
            entity_id: notification.entity_id.clone(),
            outcome: outcome.clone(),
        });

        outcome
    }

    async fn attempt(&self, notification: &Notification) -> IdentityResult<()> {
        let message = self.render(notification)?;
        self.sender.send(&message).await
    }

    fn render(&self, n: &Notification) -> IdentityResult<EmailMessage> {
        match n.kind {
            NotificationKind::Confirmation => {
                self.factory
                    .new_confirmation_email(&n.to, n.first_name.as_deref(), &n.reference)
            }
            NotificationKind::Invitation => self.factory.new_invitation_email(
                &n.to,
                n.invited_by.as_deref().unwrap_or("A colleague"),
                &n.reference,
            ),
            NotificationKind::PasswordReset => {
                self.factory
                    .new_password_reset_email(&n.to, n.first_name.as_deref(), &n.reference)
            }
        }
    }

    /// Column-only update, outside any workflow transaction
    async fn mark_email_sent(&self, kind: NotificationKind, entity_id: &str) -> IdentityResult<()> {
        let query = format!(
            "UPDATE {} SET email_sent = 1, email_sent_at = ?1 WHERE id = ?2",
            kind.table()
        );

        sqlx::query(&query)
            .bind(Utc::now())
            .bind(entity_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, mailer::testing::RecordingSender};
    use chrono::Duration;

    async fn insert_reset(pool: &SqlitePool) -> String {
        // Minimal graph so the foreign keys hold
        sqlx::query("INSERT INTO oauth_clients (id, key, secret, redirect_uri, created_at) VALUES ('c1', 'k', 's', 'r', ?1)")
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO accounts (id, oauth_client_id, name, created_at) VALUES ('a1', 'c1', 'acme', ?1)")
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO oauth_users (id, username, created_at) VALUES ('o1', 'john@example.com', ?1)")
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO users (id, account_id, oauth_user_id, role_id, created_at, updated_at) VALUES ('u1', 'a1', 'o1', 'user', ?1, ?1)")
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO password_resets (id, reference, user_id, expires_at, created_at) VALUES ('p1', 'ref-1', 'u1', ?1, ?2)")
            .bind(Utc::now() + Duration::hours(1))
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        "p1".to_string()
    }

    fn reset_notification(entity_id: &str) -> Notification {
        Notification {
            kind: NotificationKind::PasswordReset,
            entity_id: entity_id.to_string(),
            reference: "ref-1".to_string(),
            to: "john@example.com".to_string(),
            first_name: Some("John".to_string()),
            invited_by: None,
        }
    }

    async fn email_sent(pool: &SqlitePool, id: &str) -> bool {
        sqlx::query_scalar("SELECT email_sent FROM password_resets WHERE id = ?1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_delivery_marks_email_sent() {
        let (_dir, pool) = db::test_pool().await;
        let id = insert_reset(&pool).await;
        let sender = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(pool.clone(), sender.clone(), EmailFactory::new("http://localhost"));
        let mut reports = notifier.subscribe();

        let outcome = notifier.schedule(reset_notification(&id)).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Sent);

        let report = reports.recv().await.unwrap();
        assert_eq!(report.entity_id, id);
        assert_eq!(report.kind, NotificationKind::PasswordReset);

        assert_eq!(sender.sent().len(), 1);
        assert!(sender.sent()[0].body.contains("ref-1"));
        assert!(email_sent(&pool, &id).await);
    }

    #[tokio::test]
    async fn test_failed_delivery_leaves_flag_unset() {
        let (_dir, pool) = db::test_pool().await;
        let id = insert_reset(&pool).await;
        let notifier = Notifier::new(
            pool.clone(),
            Arc::new(RecordingSender::failing()),
            EmailFactory::new("http://localhost"),
        );

        let outcome = notifier.schedule(reset_notification(&id)).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert!(!email_sent(&pool, &id).await);
    }

    #[tokio::test]
    async fn test_render_failure_is_a_delivery_failure() {
        let (_dir, pool) = db::test_pool().await;
        let id = insert_reset(&pool).await;
        let sender = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(pool.clone(), sender.clone(), EmailFactory::new("http://localhost"));

        let mut notification = reset_notification(&id);
        notification.to = "not-an-address".to_string();

        let outcome = notifier.schedule(notification).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert!(sender.sent().is_empty());
    }
}
