use thiserror::Error;

use crate::{do_api::ApiError, models::LBStatus};

pub type LBControllerResult<T> = Result<T, LBControllerError>;

#[derive(Debug, Error)]
pub enum LBControllerError {
    #[error("Invalid load-balancer configuration: {0}")]
    Validation(String),
    #[error("Load-balancer not found")]
    LoadBalancerNotFound,
    #[error("Load-balancer is not yet active (current status: {0})")]
    NotYetActive(LBStatus),
    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: ApiError,
    },
    #[error("Kube error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Service has no {0}")]
    MissingObjectKey(&'static str),
    #[error("Service was skipped")]
    SkipService,
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<LBControllerError>),
}

impl LBControllerError {
    /// Wrap a remote API failure with a short description of the call.
    pub fn api(context: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            context: context.into(),
            source,
        }
    }

    /// Combine the outcome of an operation with a follow-up failure,
    /// keeping both.
    #[must_use]
    pub fn combine(primary: Option<Self>, secondary: Self) -> Self {
        match primary {
            None => secondary,
            Some(Self::Aggregate(mut errors)) => {
                errors.push(secondary);
                Self::Aggregate(errors)
            }
            Some(primary) => Self::Aggregate(vec![primary, secondary]),
        }
    }

    /// Whether the load balancer was still provisioning, possibly alongside
    /// a failed annotation patch.
    #[must_use]
    pub fn is_not_yet_active(&self) -> bool {
        match self {
            Self::NotYetActive(_) => true,
            Self::Aggregate(errors) => errors.iter().any(Self::is_not_yet_active),
            _ => false,
        }
    }
}

fn join_errors(errors: &[LBControllerError]) -> String {
    let messages = errors.iter().map(ToString::to_string).collect::<Vec<_>>();
    if messages.len() == 1 {
        return messages.join("");
    }
    format!("[{}]", messages.join(", "))
}
