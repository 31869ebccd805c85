use anyhow::Context;
use axum::async_trait;
use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::SmtpConfig;

/// Outbound mail collaborator. Delivery is best-effort; callers decide
/// whether a failure is fatal to their operation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: lettre::message::Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .context("smtp relay")?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .port(config.port)
            .build();

        let from = format!("Signet <{}>", config.from)
            .parse()
            .context("parse smtp from address")?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("parse recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .context("build email")?;

        self.transport.send(message).await.context("smtp send")?;
        Ok(())
    }
}

pub fn verification_email(base_url: &str, token: &str) -> (String, String) {
    let url = format!("{}/verify/{}", base_url, token);
    (
        "Verify your email for Signet".to_string(),
        format!(
            r#"<p>Please verify your email by clicking on this link: <a href="{}">{}</a></p>"#,
            url, url
        ),
    )
}

pub fn password_reset_email(base_url: &str, token: &str) -> (String, String) {
    let url = format!("{}/reset-password/{}", base_url, token);
    (
        "Password Reset Request for Signet".to_string(),
        format!(
            r#"<p>You requested a password reset. Please click on this link: <a href="{}">{}</a></p>"#,
            url, url
        ),
    )
}
