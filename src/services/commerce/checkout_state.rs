//! Checkout status transitions driven by verified gateway notifications.
//!
//! `pending` is the only non-terminal state. The single transition out of a terminal state is
//! `succeeded -> refunded`.

use crate::entities::commerce::CheckoutStatus;
use crate::gateway::NotificationKind;

/// What a notification means for a checkout in a given status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Conditionally move `from -> to`
    Apply {
        from: CheckoutStatus,
        to: CheckoutStatus,
    },
    /// The checkout already sits in the state this event leads to
    Duplicate,
    /// Not a valid move from the current state
    Ignore,
}

/// Status a notification kind drives a checkout towards
pub fn target_status(kind: NotificationKind) -> CheckoutStatus {
    match kind {
        NotificationKind::SessionCompleted | NotificationKind::AsyncPaymentSucceeded => {
            CheckoutStatus::Succeeded
        }
        NotificationKind::AsyncPaymentFailed => CheckoutStatus::Failed,
        NotificationKind::SessionExpired => CheckoutStatus::Cancelled,
        NotificationKind::ChargeRefunded => CheckoutStatus::Refunded,
    }
}

pub fn next(current: CheckoutStatus, kind: NotificationKind) -> Transition {
    let to = target_status(kind);

    let allowed = matches!(
        (current, to),
        (
            CheckoutStatus::Pending,
            CheckoutStatus::Succeeded | CheckoutStatus::Failed | CheckoutStatus::Cancelled
        ) | (CheckoutStatus::Succeeded, CheckoutStatus::Refunded)
    );

    if allowed {
        Transition::Apply { from: current, to }
    } else if current == to {
        Transition::Duplicate
    } else {
        Transition::Ignore
    }
}
