//! Mock transport for tests and dry runs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{MailTransport, OutgoingEmail, SendReceipt, TransportError};

/// Records every delivered email and fails on a script.
pub struct MockTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    attempts: AtomicU32,
    failures_remaining: AtomicU32,
}

impl MockTransport {
    /// A transport that accepts everything.
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    /// A transport that rejects the first `failures` sends, then accepts.
    pub fn failing_first(failures: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            failures_remaining: AtomicU32::new(failures),
        }
    }

    /// A transport that rejects every send.
    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Number of times `send` was called, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent_emails(&self) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn was_sent_to(&self, address: &str) -> bool {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|e| e.to == address)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        if should_fail {
            return Err(TransportError::Rejected {
                permanent: false,
                message: format!("421 service not available (attempt {attempt})"),
            });
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.clone());

        Ok(SendReceipt {
            message_id: format!("mock-{attempt}"),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Priority;
    use crate::transport::PriorityHeaders;

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            from: "noreply@example.com".to_string(),
            to: "user@example.com".to_string(),
            subject: "Test".to_string(),
            html: "<p>Body</p>".to_string(),
            priority: Priority::Normal,
            headers: PriorityHeaders::for_priority(Priority::Normal),
        }
    }

    #[tokio::test]
    async fn test_mock_transport_records_email() {
        let transport = MockTransport::new();
        transport.send(&email()).await.unwrap();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(transport.sent_count(), 1);
        assert!(transport.was_sent_to("user@example.com"));
        assert!(!transport.was_sent_to("other@example.com"));
    }

    #[tokio::test]
    async fn test_failing_first_then_succeeds() {
        let transport = MockTransport::failing_first(2);

        assert!(transport.send(&email()).await.is_err());
        assert!(transport.send(&email()).await.is_err());
        assert!(transport.send(&email()).await.is_ok());

        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_always_failing() {
        let transport = MockTransport::always_failing();
        for _ in 0..5 {
            let err = transport.send(&email()).await.unwrap_err();
            assert!(matches!(err, TransportError::Rejected { permanent: false, .. }));
        }
        assert_eq!(transport.sent_count(), 0);
    }
}
