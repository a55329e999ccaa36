//! MailDeliverer - composer と mailer を組み合わせた Deliverer

use async_trait::async_trait;

use super::composer::MessageComposer;
use crate::domain::{DeliveryError, Task, TaskKind};
use crate::ports::{Deliverer, Mailer, OutboundMessage};

pub struct MailDeliverer<M> {
    from: String,
    composer: MessageComposer,
    mailer: M,
}

impl<M: Mailer> MailDeliverer<M> {
    pub fn new(from: impl Into<String>, composer: MessageComposer, mailer: M) -> Self {
        Self {
            from: from.into(),
            composer,
            mailer,
        }
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }
}

#[async_trait]
impl<M: Mailer> Deliverer for MailDeliverer<M> {
    fn supports(&self, kind: TaskKind) -> bool {
        self.composer.supports(kind)
    }

    async fn deliver(&self, task: &Task) -> Result<(), DeliveryError> {
        let composed = self.composer.compose(task)?;
        let message = OutboundMessage {
            from: self.from.clone(),
            to: task.recipient().address.clone(),
            subject: composed.subject,
            body: composed.body,
        };
        self.mailer.send(message).await?;
        tracing::debug!(task_id = task.log_id(), to = %task.recipient().address, "mail handed to transport");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::Recipient;
    use crate::impls::InMemoryMailer;

    fn deliverer(mailer: InMemoryMailer) -> MailDeliverer<InMemoryMailer> {
        MailDeliverer::new("noreply@moktob.example", MessageComposer::new("Moktob"), mailer)
    }

    #[tokio::test]
    async fn sends_composed_message_from_configured_address() {
        let deliverer = deliverer(InMemoryMailer::new());
        let task = Task::new(TaskKind::WelcomeMessage, Recipient::named("a@example.org", "Ali"));

        deliverer.deliver(&task).await.unwrap();

        let outbox = deliverer.mailer().outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].from, "noreply@moktob.example");
        assert_eq!(outbox[0].to, "a@example.org");
        assert_eq!(outbox[0].subject, "Welcome to Moktob");
    }

    #[tokio::test]
    async fn transport_failure_is_transient() {
        let deliverer = deliverer(InMemoryMailer::new().fail_next(1));
        let task = Task::new(TaskKind::WelcomeMessage, Recipient::new("a@example.org"));

        let err = deliverer.deliver(&task).await.unwrap_err();

        assert!(!err.is_permanent());
        assert!(deliverer.mailer().outbox().is_empty());
    }

    #[tokio::test]
    async fn unrenderable_task_never_reaches_the_mailer() {
        let deliverer = deliverer(InMemoryMailer::new());
        let task = Task::new(TaskKind::PasswordReset, Recipient::new("a@example.org"));

        let err = deliverer.deliver(&task).await.unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(deliverer.mailer().attempts(), 0);
    }

    #[tokio::test]
    async fn retried_task_is_delivered_through_the_dispatcher() {
        use crate::app::DispatcherBuilder;
        use crate::config::DispatchConfig;
        use crate::impls::RecordingEventSink;

        let mailer = InMemoryMailer::new().fail_next(1);
        let deliverer = Arc::new(deliverer(mailer));
        let events = Arc::new(RecordingEventSink::new());
        let dispatcher = DispatcherBuilder::new(deliverer.clone())
            .config(DispatchConfig {
                poll_interval_ms: 5,
                ..DispatchConfig::default()
            })
            .event_sink(events.clone())
            .expect_kinds(&TaskKind::ALL)
            .build()
            .unwrap();
        dispatcher.start();

        let task = Task::credentials(
            TaskKind::StudentCredentials,
            Recipient::new("s@example.org"),
            "student1",
            "tmp-pass",
        );
        assert!(dispatcher.submit(task).await.is_accepted());

        for _ in 0..200 {
            if !events.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        dispatcher.stop().await;

        assert_eq!(events.sent()[0].retry_count(), 1);
        assert_eq!(deliverer.mailer().attempts(), 2);
        assert!(deliverer.mailer().outbox()[0].body.contains("Username: student1"));
    }
}
