//! Request status transition table.
//!
//! The table is pure data; `RequestService` turns each entry into a guarded
//! `UPDATE ... WHERE status IN (sources)` so the database enforces it too.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::RequestStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Activate,
    MarkSmsSent,
    RequestAdditionalSms,
    SubmitSmsCode,
    Complete,
}

impl Transition {
    /// Statuses from which the transition may start.
    pub fn sources(self) -> &'static [RequestStatus] {
        use RequestStatus::*;
        match self {
            Transition::Activate => &[Pending],
            Transition::MarkSmsSent => &[Activated],
            Transition::RequestAdditionalSms => &[WaitingForAdditionalSms, SmsSent],
            // 操作员随时可以推送新的验证码，包括已完成的请求
            Transition::SubmitSmsCode => &[
                Activated,
                SmsSent,
                SmsRequested,
                WaitingForAdditionalSms,
                Completed,
            ],
            Transition::Complete => &[WaitingForAdditionalSms],
        }
    }

    pub fn target(self) -> RequestStatus {
        match self {
            Transition::Activate => RequestStatus::Activated,
            Transition::MarkSmsSent => RequestStatus::SmsSent,
            Transition::RequestAdditionalSms => RequestStatus::SmsRequested,
            Transition::SubmitSmsCode => RequestStatus::WaitingForAdditionalSms,
            Transition::Complete => RequestStatus::Completed,
        }
    }

    pub fn accepts(self, from: RequestStatus) -> bool {
        self.sources().contains(&from)
    }

    /// Re-applying `activate` to an activated request succeeds without a write.
    pub fn is_noop(self, current: RequestStatus) -> bool {
        matches!(
            (self, current),
            (Transition::Activate, RequestStatus::Activated)
        )
    }

    pub fn next(self, from: RequestStatus) -> Option<RequestStatus> {
        self.accepts(from).then(|| self.target())
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Activate => write!(f, "activate"),
            Transition::MarkSmsSent => write!(f, "mark_sms_sent"),
            Transition::RequestAdditionalSms => write!(f, "request_additional_sms"),
            Transition::SubmitSmsCode => write!(f, "submit_sms_code"),
            Transition::Complete => write!(f, "complete"),
        }
    }
}
