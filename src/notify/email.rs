// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{Notifier, OperatorAlert};

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} missing"))
}

impl EmailSender {
    /// `Ok(None)` when `SMTP_HOST` is unset. Once the host is given, the rest
    /// of the SMTP settings are required.
    pub fn from_env() -> Result<Option<Self>> {
        let host = match std::env::var("SMTP_HOST") {
            Ok(h) if !h.trim().is_empty() => h,
            _ => return Ok(None),
        };
        let user = required("SMTP_USER")?;
        let pass = required("SMTP_PASS")?;
        let from: Mailbox = required("NOTIFY_EMAIL_FROM")?
            .parse()
            .context("invalid NOTIFY_EMAIL_FROM")?;
        let to: Mailbox = required("NOTIFY_EMAIL_TO")?
            .parse()
            .context("invalid NOTIFY_EMAIL_TO")?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(Credentials::new(user, pass))
            .build();

        Ok(Some(Self { mailer, from, to }))
    }
}

#[async_trait::async_trait]
impl Notifier for EmailSender {
    async fn send(&self, alert: &OperatorAlert) -> Result<()> {
        let body = format!("{}\n\nTimestamp: {}\n", alert.detail, alert.ts.to_rfc3339());
        let msg = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(alert.title.clone())
            .header(header::ContentType::TEXT_PLAIN)
            .body(body)
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
