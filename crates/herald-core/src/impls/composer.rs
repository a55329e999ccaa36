//! MessageComposer - TaskKind ごとの件名・本文の組み立て
//!
//! A task whose payload lacks what its kind needs cannot be rendered no
//! matter how often it is retried, so those cases come back as
//! `DeliveryError::UnsupportedKind` (permanent).

use std::collections::HashSet;

use crate::domain::{DeliveryError, Task, TaskKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct MessageComposer {
    product_name: String,
    login_url: Option<String>,
    disabled: HashSet<TaskKind>,
}

impl MessageComposer {
    pub fn new(product_name: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            login_url: None,
            disabled: HashSet::new(),
        }
    }

    /// Shown in credentials notices.
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = Some(url.into());
        self
    }

    /// Stop rendering `kind`; tasks of that kind fail permanently.
    pub fn without_kind(mut self, kind: TaskKind) -> Self {
        self.disabled.insert(kind);
        self
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        !self.disabled.contains(&kind)
    }

    pub fn compose(&self, task: &Task) -> Result<ComposedMessage, DeliveryError> {
        let kind = task.kind();
        if !self.supports(kind) {
            return Err(DeliveryError::unsupported(kind, "disabled in composer"));
        }

        let payload = task.payload();
        // 件名と本文が両方指定されていればそのまま使う
        if let (Some(subject), Some(body)) = (&payload.subject, &payload.body) {
            return Ok(ComposedMessage {
                subject: subject.clone(),
                body: body.clone(),
            });
        }

        let name = task.recipient().display_name();
        let product = &self.product_name;
        let message = match kind {
            TaskKind::StudentCredentials | TaskKind::TeacherCredentials => {
                let role = if kind == TaskKind::StudentCredentials {
                    "student"
                } else {
                    "teacher"
                };
                let username = required(kind, payload.username.as_deref(), "username")?;
                let secret = required(kind, payload.temporary_secret.as_deref(), "temporary_secret")?;
                let mut body = format!(
                    "Dear {name},\n\n\
                     A {role} account has been created for you in {product}.\n\n\
                     Username: {username}\n\
                     Temporary Password: {secret}\n\n\
                     Please log in and change your password immediately after first login.\n"
                );
                if let Some(url) = &self.login_url {
                    body.push_str(&format!("\nLogin URL: {url}\n"));
                }
                ComposedMessage {
                    subject: format!("{product} - Your {role} account details"),
                    body,
                }
            }
            TaskKind::WelcomeMessage => ComposedMessage {
                subject: format!("Welcome to {product}"),
                body: format!("Dear {name},\n\nWelcome to {product}! We are glad to have you.\n"),
            },
            TaskKind::PasswordReset => {
                let link = required(kind, payload.link.as_deref(), "link")?;
                ComposedMessage {
                    subject: format!("{product} - Password reset"),
                    body: format!(
                        "Dear {name},\n\n\
                         A password reset was requested for your account.\n\
                         Use the link below to choose a new password:\n\n{link}\n\n\
                         If you did not request this, you can ignore this message.\n"
                    ),
                }
            }
            TaskKind::Verification => {
                let link = required(kind, payload.link.as_deref(), "link")?;
                ComposedMessage {
                    subject: format!("{product} - Verify your email address"),
                    body: format!(
                        "Dear {name},\n\nPlease confirm your email address:\n\n{link}\n"
                    ),
                }
            }
        };

        Ok(ComposedMessage {
            subject: payload.subject.clone().unwrap_or(message.subject),
            body: payload.body.clone().unwrap_or(message.body),
        })
    }
}

fn required<'a>(
    kind: TaskKind,
    value: Option<&'a str>,
    field: &str,
) -> Result<&'a str, DeliveryError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DeliveryError::unsupported(kind, format!("missing {field}")))
}
