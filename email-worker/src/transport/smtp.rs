//! SMTP mail transport using lettre's pooled async transport.

use lettre::{
    message::{
        header::{ContentType, Header, HeaderName, HeaderValue},
        Mailbox,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use super::{headers::PriorityHeaders, MailTransport, OutgoingEmail, SendReceipt, TransportError};

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Upgrade the connection with STARTTLS
    pub use_tls: bool,
}

/// Free-form text header with a fixed name.
macro_rules! text_header {
    ($ty:ident, $name:expr) => {
        #[derive(Debug, Clone)]
        struct $ty(String);

        impl Header for $ty {
            fn name() -> HeaderName {
                HeaderName::new_from_ascii_str($name)
            }

            fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                Ok(Self(s.to_owned()))
            }

            fn display(&self) -> HeaderValue {
                HeaderValue::new(Self::name(), self.0.clone())
            }
        }
    };
}

text_header!(XPriority, PriorityHeaders::X_PRIORITY);
text_header!(XMsMailPriority, PriorityHeaders::MS_MAIL_PRIORITY);
text_header!(Importance, PriorityHeaders::IMPORTANCE);

pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, TransportError> {
        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| TransportError::Build(format!("invalid SMTP relay: {e}")))?
        } else {
            // Plain connection, for local catch-all servers like Mailpit
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.clone())
        };

        let mut builder = builder.port(settings.port);
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        info!(
            host = %settings.host,
            port = settings.port,
            tls = settings.use_tls,
            authenticated = !settings.username.is_empty(),
            "smtp_transport_configured"
        );

        Ok(Self {
            transport: builder.build(),
            host: settings.host.clone(),
        })
    }

    /// Build the MIME message, including the priority headers.
    pub fn build_message(email: &OutgoingEmail) -> Result<Message, TransportError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
                field: "from",
                message: e.to_string(),
            })?;

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
                field: "to",
                message: e.to_string(),
            })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .header(XPriority(email.headers.x_priority.to_string()))
            .header(XMsMailPriority(email.headers.ms_mail_priority.to_string()))
            .header(Importance(email.headers.importance.to_string()))
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| TransportError::Build(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, TransportError> {
        let message = Self::build_message(email)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| TransportError::Rejected {
                permanent: e.is_permanent(),
                message: e.to_string(),
            })?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| response.code().to_string());

        info!(
            host = %self.host,
            to = %email.to,
            subject = %email.subject,
            "smtp_message_accepted"
        );

        Ok(SendReceipt { message_id })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
