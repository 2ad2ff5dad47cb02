//! Priority header mapping.

use crate::queue::Priority;

/// Header values that signal urgency to mail clients.
///
/// `X-MSMail-Priority` only distinguishes `High` from `Normal`, so low
/// priority mail is marked `Normal` there and `5` in `X-Priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityHeaders {
    pub x_priority: &'static str,
    pub ms_mail_priority: &'static str,
    pub importance: &'static str,
}

impl PriorityHeaders {
    pub const X_PRIORITY: &'static str = "X-Priority";
    pub const MS_MAIL_PRIORITY: &'static str = "X-MSMail-Priority";
    pub const IMPORTANCE: &'static str = "Importance";

    pub fn for_priority(priority: Priority) -> Self {
        let (x_priority, ms_mail_priority) = match priority {
            Priority::High => ("1", "High"),
            Priority::Normal => ("3", "Normal"),
            Priority::Low => ("5", "Normal"),
        };

        Self {
            x_priority,
            ms_mail_priority,
            importance: priority.as_str(),
        }
    }
}
