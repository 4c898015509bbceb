use crate::{
    domain::models::{LedgerErr, UserId},
    inbound::axum::api_types::ErrorResponse,
};
use axum::{
    Json, async_trait,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

/// The header the upstream gateway stores the authenticated user id in
pub const USER_ID_HEADER: &str = "x-user-id";

const INTERNAL_ERROR: &str = "An internal server error has occurred";

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { message })).into_response()
}

impl IntoResponse for LedgerErr {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerErr::Allocation(_) | LedgerErr::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            LedgerErr::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerErr::DuplicateAffiliate
            | LedgerErr::DuplicateReferral
            | LedgerErr::AlreadyProcessed(_)
            | LedgerErr::ConcurrencyConflict => StatusCode::CONFLICT,
            LedgerErr::Expired { .. } => StatusCode::GONE,
            LedgerErr::BelowMinimum { .. }
            | LedgerErr::AffiliateInactive(_)
            | LedgerErr::SelfReferral => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerErr::RewardCreditFailed { .. } => StatusCode::BAD_GATEWAY,
            LedgerErr::Storage(e) => {
                tracing::error!(error = ?e, "ledger storage failure");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR.to_string(),
                );
            }
        };

        error_response(status, self.to_string())
    }
}

/// The authenticated user making the request
#[derive(Debug, Clone, Copy)]
pub struct UserIdentity(pub UserId);

#[derive(Debug, Error)]
pub enum IdentityErr {
    #[error("missing {USER_ID_HEADER} header")]
    Missing,
    #[error("{USER_ID_HEADER} header is not a valid user id")]
    Invalid,
}

impl IntoResponse for IdentityErr {
    fn into_response(self) -> Response {
        error_response(StatusCode::UNAUTHORIZED, self.to_string())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for UserIdentity {
    type Rejection = IdentityErr;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or(IdentityErr::Missing)?;
        let user_id = header
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(IdentityErr::Invalid)?;
        Ok(UserIdentity(UserId(user_id)))
    }
}
