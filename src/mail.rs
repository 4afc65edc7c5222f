use std::borrow::Cow;

use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailKind {
    Welcome,
    PasswordReset,
}

#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub first_name: String,
    pub kind: EmailKind,
    pub url: String,
}

impl Email {
    pub fn new(to: &str, full_name: &str, kind: EmailKind, url: String) -> Self {
        let first_name = full_name
            .split_whitespace()
            .next()
            .unwrap_or(full_name)
            .to_string();
        Self {
            to: to.to_string(),
            first_name,
            kind,
            url,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self.kind {
            EmailKind::Welcome => "Welcome to the Tourbook family!",
            EmailKind::PasswordReset => "Your password reset token (valid for only 10 minutes)",
        }
    }

    /// The url with any bearer secret replaced, for info-level logs.
    pub fn loggable_url(&self) -> Cow<'_, str> {
        match self.kind {
            EmailKind::Welcome => Cow::Borrowed(&self.url),
            EmailKind::PasswordReset => match self.url.rsplit_once('/') {
                Some((base, _secret)) => Cow::Owned(format!("{base}/[redacted]")),
                None => Cow::Borrowed("[redacted]"),
            },
        }
    }
}

/// Outbound notification channel.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(
            to = %email.to,
            subject = email.subject(),
            url = %email.loggable_url(),
            "email sent"
        );
        debug!(to = %email.to, url = %email.url, "email link");
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use super::*;

    /// Keeps every message; can be switched to fail delivery.
    #[derive(Default)]
    pub struct RecordingMailer {
        sent: Mutex<Vec<Email>>,
        failing: AtomicBool,
    }

    impl RecordingMailer {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Email> {
            self.sent.lock().unwrap().clone()
        }

        pub fn last_url(&self, kind: EmailKind) -> Option<String> {
            self.sent()
                .into_iter()
                .rev()
                .find(|e| e.kind == kind)
                .map(|e| e.url)
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: Email) -> anyhow::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("smtp connection refused");
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_name_is_used_for_greeting() {
        let email = Email::new("a@x.com", "Jonas Schmedtmann", EmailKind::Welcome, "u".into());
        assert_eq!(email.first_name, "Jonas");
        assert_eq!(email.subject(), "Welcome to the Tourbook family!");
    }

    #[test]
    fn reset_link_is_redacted_for_info_logs() {
        let url = "http://tours.test/api/v1/users/resetPassword/0f3a9c".to_string();
        let email = Email::new("a@x.com", "A", EmailKind::PasswordReset, url.clone());
        let logged = email.loggable_url();
        assert_eq!(logged, "http://tours.test/api/v1/users/resetPassword/[redacted]");
        assert!(!logged.contains("0f3a9c"));
        assert_eq!(email.url, url);

        let welcome = Email::new("a@x.com", "A", EmailKind::Welcome, "http://tours.test/me".into());
        assert_eq!(welcome.loggable_url(), "http://tours.test/me");
    }

    #[tokio::test]
    async fn log_mailer_accepts_every_kind() {
        let email = Email::new("a@x.com", "A", EmailKind::PasswordReset, "http://x/t".into());
        assert!(LogMailer.send(email).await.is_ok());
    }
}
