//! Plan and channel policy.
//!
//! The plan→channel table lives here and nowhere else. Route layers and the
//! HTTP-free [`AdmissionPipeline`](crate::service::AdmissionPipeline) both go
//! through [`CapabilityGate`].

use crate::domain::claims::Claims;
use crate::domain::error::Rejection;

/// Sentinel plan of an account without an active subscription
pub const PLAN_NONE: &str = "none";
pub const PLAN_SMS: &str = "sms";

pub const CHANNEL_SMS: &str = "sms";

/// Channels a plan includes. Unknown plans include none.
pub fn plan_channels(plan: &str) -> &'static [&'static str] {
    match plan {
        PLAN_SMS => &[CHANNEL_SMS],
        _ => &[],
    }
}

/// Stateless capability checks over verified claims
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityGate;

impl CapabilityGate {
    /// True unless the caller is on the "none" plan.
    pub fn require_plan(claims: &Claims) -> bool {
        claims.plan() != PLAN_NONE
    }

    /// True iff the caller's plan includes `channel`.
    pub fn require_channel(claims: &Claims, channel: &str) -> bool {
        plan_channels(claims.plan()).contains(&channel)
    }

    pub fn check_plan(claims: &Claims) -> Result<(), Rejection> {
        if Self::require_plan(claims) {
            Ok(())
        } else {
            Err(Rejection::PlanRequired)
        }
    }

    pub fn check_channel(claims: &Claims, channel: &str) -> Result<(), Rejection> {
        if Self::require_channel(claims, channel) {
            Ok(())
        } else {
            Err(Rejection::ChannelNotInPlan {
                channel: channel.to_string(),
            })
        }
    }
}
