use crate::{
    domain::{
        allocation::Allocation,
        models::{
            AffiliateId, CompleteReferralRequest, LedgerErr, Money, OrderId, PageRequest,
            PayoutId, ReferralCode, ReferralId, UserId,
        },
        ports::AffiliateProgram,
    },
    inbound::axum::{
        api_types::{
            ApiAffiliate, ApiCompletedReferral, ApiDashboard, ApiEarningsReport,
            ApiMonthlyEarnings, ApiPaymentDetails, ApiPayout, ApiPayoutMethod, ApiPayoutReceipt,
            ApiReferral, ApiReferralPage, CompleteReferralBody,
            CreateAffiliateRequest, CreateReferralRequest, ErrorResponse, ReasonBody,
            ReferralsQuery, SetStatusRequest, UpdateAllocationRequest,
        },
        axum_impls::UserIdentity,
    },
    paths,
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use std::sync::Arc;
use uuid::Uuid;

/// The shared state of the ledger router
pub struct LedgerState<T> {
    inner: Arc<T>,
}

impl<T> Clone for LedgerState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LedgerState<T>
where
    T: AffiliateProgram,
{
    pub fn new(service: T) -> Self {
        Self {
            inner: Arc::new(service),
        }
    }
}

/// The affiliate facing routes under `/affiliates` and the collaborator callbacks under `/internal`
pub fn router<S, T>(state: LedgerState<T>) -> Router<S>
where
    S: Send + Sync,
    T: AffiliateProgram,
{
    Router::new()
        .route(paths::AFFILIATES, post(create_affiliate_handler))
        .route(paths::DASHBOARD, get(dashboard_handler))
        .route(paths::REFERRALS, get(list_referrals_handler))
        .route(paths::EARNINGS, get(earnings_handler))
        .route(paths::ALLOCATION, put(update_allocation_handler))
        .route(paths::PAYOUT_METHOD, put(set_payout_method_handler))
        .route(
            paths::PAYOUTS,
            post(request_payout_handler).get(list_payouts_handler),
        )
        .route("/internal/affiliates/:id/status", put(set_status_handler))
        .route(paths::INTERNAL_REFERRALS, post(create_referral_handler))
        .route(
            "/internal/referrals/:id/complete",
            post(complete_referral_handler),
        )
        .route(
            "/internal/referrals/:id/cancel",
            post(cancel_referral_handler),
        )
        .route(
            "/internal/referrals/:id/retry-reward",
            post(retry_reward_handler),
        )
        .route(
            "/internal/payouts/:id/processing",
            post(mark_processing_handler),
        )
        .route(
            "/internal/payouts/:id/complete",
            post(complete_payout_handler),
        )
        .route("/internal/payouts/:id/fail", post(fail_payout_handler))
        .with_state(state)
}

async fn my_affiliate<T: AffiliateProgram>(
    service: &LedgerState<T>,
    user_id: UserId,
) -> Result<AffiliateId, LedgerErr> {
    Ok(service.inner.affiliate_for_user(user_id).await?.id)
}

/// Enroll the requesting user as an affiliate
#[utoipa::path(
    post,
    tag = "Affiliates",
    path = paths::AFFILIATES,
    operation_id = "create_affiliate",
    request_body = CreateAffiliateRequest,
    responses(
        (status = 201, body = ApiAffiliate),
        (status = 400, body = ErrorResponse),
        (status = 401, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service, req), fields(user_id = %user_id.0))]
async fn create_affiliate_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
    Json(req): Json<CreateAffiliateRequest>,
) -> Result<(StatusCode, Json<ApiAffiliate>), LedgerErr> {
    let allocation = match req.customer_discount {
        Some(customer_discount) => Allocation::from_customer_discount(customer_discount)?,
        None => Allocation::DEFAULT,
    };
    let affiliate = service
        .inner
        .create_affiliate(user_id.0, allocation)
        .await?;
    Ok((StatusCode::CREATED, Json(affiliate.into())))
}

/// Get the requesting affiliate's dashboard
#[utoipa::path(
    get,
    tag = "Affiliates",
    path = paths::DASHBOARD,
    operation_id = "get_affiliate_dashboard",
    responses(
        (status = 200, body = ApiDashboard),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service), fields(user_id = %user_id.0))]
async fn dashboard_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
) -> Result<Json<ApiDashboard>, LedgerErr> {
    Ok(Json(service.inner.dashboard(user_id.0).await?.into()))
}

/// List the requesting affiliate's referrals, newest first
#[utoipa::path(
    get,
    tag = "Affiliates",
    path = paths::REFERRALS,
    operation_id = "list_affiliate_referrals",
    params(ReferralsQuery),
    responses(
        (status = 200, body = ApiReferralPage),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service), fields(user_id = %user_id.0))]
async fn list_referrals_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
    Query(params): Query<ReferralsQuery>,
) -> Result<Json<ApiReferralPage>, LedgerErr> {
    let page = PageRequest::new(params.page, PageRequest::REFERRALS_PER_PAGE);
    Ok(Json(
        service.inner.list_referrals(user_id.0, page).await?.into(),
    ))
}

/// The requesting affiliate's earnings per calendar month
#[utoipa::path(
    get,
    tag = "Affiliates",
    path = paths::EARNINGS,
    operation_id = "get_affiliate_earnings",
    responses(
        (status = 200, body = ApiEarningsReport),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service), fields(user_id = %user_id.0))]
async fn earnings_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
) -> Result<Json<ApiEarningsReport>, LedgerErr> {
    let (affiliate, months) = tokio::try_join!(
        service.inner.affiliate_for_user(user_id.0),
        service.inner.monthly_earnings(user_id.0)
    )?;
    Ok(Json(ApiEarningsReport {
        total_earnings: affiliate.total_earnings.cents(),
        months: months.into_iter().map(ApiMonthlyEarnings::from).collect(),
    }))
}

/// Change how the 15% pool is split between the customer and the affiliate
#[utoipa::path(
    put,
    tag = "Affiliates",
    path = paths::ALLOCATION,
    operation_id = "update_affiliate_allocation",
    request_body = UpdateAllocationRequest,
    responses(
        (status = 200, body = ApiAffiliate),
        (status = 400, body = ErrorResponse),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service), fields(user_id = %user_id.0))]
async fn update_allocation_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
    Json(req): Json<UpdateAllocationRequest>,
) -> Result<Json<ApiAffiliate>, LedgerErr> {
    let id = my_affiliate(&service, user_id.0).await?;
    Ok(Json(
        service
            .inner
            .update_allocation(id, req.customer_discount)
            .await?
            .into(),
    ))
}

#[utoipa::path(
    put,
    tag = "Affiliates",
    path = paths::PAYOUT_METHOD,
    operation_id = "set_affiliate_payout_method",
    request_body = ApiPayoutMethod,
    responses(
        (status = 200, body = ApiAffiliate),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service, req), fields(user_id = %user_id.0))]
async fn set_payout_method_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
    Json(req): Json<ApiPayoutMethod>,
) -> Result<Json<ApiAffiliate>, LedgerErr> {
    let id = my_affiliate(&service, user_id.0).await?;
    Ok(Json(
        service.inner.set_payout_method(id, req.into()).await?.into(),
    ))
}

/// Withdraw the whole available balance
#[utoipa::path(
    post,
    tag = "Payouts",
    path = paths::PAYOUTS,
    operation_id = "request_payout",
    responses(
        (status = 201, body = ApiPayoutReceipt),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 422, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service), fields(user_id = %user_id.0))]
async fn request_payout_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
) -> Result<(StatusCode, Json<ApiPayoutReceipt>), LedgerErr> {
    let id = my_affiliate(&service, user_id.0).await?;
    let receipt = service.inner.request_payout(id).await?;
    Ok((StatusCode::CREATED, Json(receipt.into())))
}

#[utoipa::path(
    get,
    tag = "Payouts",
    path = paths::PAYOUTS,
    operation_id = "list_payouts",
    responses(
        (status = 200, body = Vec<ApiPayout>),
        (status = 401, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service), fields(user_id = %user_id.0))]
async fn list_payouts_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    user_id: UserIdentity,
) -> Result<Json<Vec<ApiPayout>>, LedgerErr> {
    let id = my_affiliate(&service, user_id.0).await?;
    let payouts = service.inner.list_payouts(id).await?;
    Ok(Json(payouts.into_iter().map(ApiPayout::from).collect()))
}

#[utoipa::path(
    put,
    tag = "Internal",
    path = "/internal/affiliates/{id}/status",
    operation_id = "set_affiliate_status",
    params(("id" = Uuid, Path, description = "the affiliate id")),
    request_body = SetStatusRequest,
    responses(
        (status = 200, body = ApiAffiliate),
        (status = 404, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service))]
async fn set_status_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<ApiAffiliate>, LedgerErr> {
    Ok(Json(
        service
            .inner
            .set_status(AffiliateId(id), req.status)
            .await?
            .into(),
    ))
}

/// Attribute a new user to the affiliate owning the referral code
#[utoipa::path(
    post,
    tag = "Internal",
    path = paths::INTERNAL_REFERRALS,
    operation_id = "create_referral",
    request_body = CreateReferralRequest,
    responses(
        (status = 201, body = ApiReferral),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 422, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service, req), fields(referred_user_id = %req.referred_user_id))]
async fn create_referral_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Json(req): Json<CreateReferralRequest>,
) -> Result<(StatusCode, Json<ApiReferral>), LedgerErr> {
    let referral = service
        .inner
        .create_referral_by_code(
            ReferralCode(req.referral_code),
            UserId(req.referred_user_id),
            req.metadata.into(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(referral.into())))
}

/// Report the referred user's first qualifying order
#[utoipa::path(
    post,
    tag = "Internal",
    path = "/internal/referrals/{id}/complete",
    operation_id = "complete_referral",
    params(("id" = Uuid, Path, description = "the referral id")),
    request_body = CompleteReferralBody,
    responses(
        (status = 200, body = ApiCompletedReferral),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 410, body = ErrorResponse),
        (status = 502, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service))]
async fn complete_referral_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteReferralBody>,
) -> Result<Json<ApiCompletedReferral>, LedgerErr> {
    let completed = service
        .inner
        .complete_referral(CompleteReferralRequest {
            referral_id: ReferralId(id),
            order_id: OrderId(req.order_id),
            discount_eligible_amount: Money::from_cents(req.discount_eligible_amount),
        })
        .await?;
    Ok(Json(completed.into()))
}

#[utoipa::path(
    post,
    tag = "Internal",
    path = "/internal/referrals/{id}/cancel",
    operation_id = "cancel_referral",
    params(("id" = Uuid, Path, description = "the referral id")),
    request_body = ReasonBody,
    responses(
        (status = 200, body = ApiReferral),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service))]
async fn cancel_referral_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonBody>,
) -> Result<Json<ApiReferral>, LedgerErr> {
    Ok(Json(
        service
            .inner
            .cancel_referral(ReferralId(id), req.reason)
            .await?
            .into(),
    ))
}

/// Credit the reward of a completed referral whose crediting failed
#[utoipa::path(
    post,
    tag = "Internal",
    path = "/internal/referrals/{id}/retry-reward",
    operation_id = "retry_referral_reward",
    params(("id" = Uuid, Path, description = "the referral id")),
    responses(
        (status = 200, body = ApiReferral),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 502, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service))]
async fn retry_reward_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiReferral>, LedgerErr> {
    Ok(Json(service.inner.retry_reward(ReferralId(id)).await?.into()))
}

#[utoipa::path(
    post,
    tag = "Internal",
    path = "/internal/payouts/{id}/processing",
    operation_id = "mark_payout_processing",
    params(("id" = Uuid, Path, description = "the payout id")),
    request_body = ApiPaymentDetails,
    responses(
        (status = 200, body = ApiPayout),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service, req))]
async fn mark_processing_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApiPaymentDetails>,
) -> Result<Json<ApiPayout>, LedgerErr> {
    Ok(Json(
        service
            .inner
            .mark_processing(PayoutId(id), req.into())
            .await?
            .into(),
    ))
}

#[utoipa::path(
    post,
    tag = "Internal",
    path = "/internal/payouts/{id}/complete",
    operation_id = "complete_payout",
    params(("id" = Uuid, Path, description = "the payout id")),
    request_body = ApiPaymentDetails,
    responses(
        (status = 200, body = ApiPayout),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service, req))]
async fn complete_payout_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApiPaymentDetails>,
) -> Result<Json<ApiPayout>, LedgerErr> {
    Ok(Json(
        service
            .inner
            .complete_payout(PayoutId(id), req.into())
            .await?
            .into(),
    ))
}

/// The payout amount is returned to the affiliate's available balance
#[utoipa::path(
    post,
    tag = "Internal",
    path = "/internal/payouts/{id}/fail",
    operation_id = "fail_payout",
    params(("id" = Uuid, Path, description = "the payout id")),
    request_body = ReasonBody,
    responses(
        (status = 200, body = ApiPayout),
        (status = 404, body = ErrorResponse),
        (status = 409, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
#[tracing::instrument(skip(service))]
async fn fail_payout_handler<T: AffiliateProgram>(
    State(service): State<LedgerState<T>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReasonBody>,
) -> Result<Json<ApiPayout>, LedgerErr> {
    Ok(Json(
        service
            .inner
            .fail_payout(PayoutId(id), req.reason)
            .await?
            .into(),
    ))
}

/// The openapi description of [router]
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        create_affiliate_handler,
        dashboard_handler,
        list_referrals_handler,
        earnings_handler,
        update_allocation_handler,
        set_payout_method_handler,
        request_payout_handler,
        list_payouts_handler,
        set_status_handler,
        create_referral_handler,
        complete_referral_handler,
        cancel_referral_handler,
        retry_reward_handler,
        mark_processing_handler,
        complete_payout_handler,
        fail_payout_handler,
    ),
    components(schemas(
        ApiAffiliate,
        ApiCompletedReferral,
        ApiDashboard,
        ApiEarningsReport,
        ApiMonthlyEarnings,
        ApiPaymentDetails,
        ApiPayout,
        ApiPayoutMethod,
        ApiPayoutReceipt,
        ApiReferral,
        ApiReferralPage,
        CompleteReferralBody,
        CreateAffiliateRequest,
        CreateReferralRequest,
        ErrorResponse,
        ReasonBody,
        SetStatusRequest,
        UpdateAllocationRequest,
    )),
    tags(
        (name = "Affiliates", description = "Enrollment, allocation and dashboard of the requesting affiliate"),
        (name = "Payouts", description = "Withdrawals of the requesting affiliate"),
        (name = "Internal", description = "Callbacks for the signup, billing and payment gateway collaborators"),
    )
)]
pub struct LedgerApiDoc;
