//! OTP delivery seam.
//!
//! The core never returns plaintext codes to callers; delivery goes through
//! a [`Notifier`]. A failed delivery is logged and the challenge stands.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    transport::smtp::authentication::Credentials,
};
use tokio::sync::Mutex;

use crate::config::SmtpConfig;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp_code(&self, email: &str, code: &str) -> Result<(), anyhow::Error>;
}

/// Development notifier: writes the code to the log instead of sending it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_otp_code(&self, email: &str, code: &str) -> Result<(), anyhow::Error> {
        tracing::info!(email = %email, code = %code, "OTP issued (log delivery)");
        Ok(())
    }
}

/// SMTP notifier backed by lettre.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_otp_code(&self, email: &str, code: &str) -> Result<(), anyhow::Error> {
        let message = Message::builder()
            .from(self.from.parse()?)
            .to(email.parse()?)
            .subject("Your verification code")
            .body(format!(
                "Your verification code is {}. It expires in 10 minutes.",
                code
            ))?;

        self.transport.send(message).await?;
        Ok(())
    }
}

/// Test notifier that records every delivery.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last code delivered to the given address.
    pub async fn last_code_for(&self, email: &str) -> Option<String> {
        let sent = self.sent.lock().await;
        sent.iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_otp_code(&self, email: &str, code: &str) -> Result<(), anyhow::Error> {
        let mut sent = self.sent.lock().await;
        sent.push((email.to_string(), code.to_string()));
        Ok(())
    }
}
