use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::error;
use ts_rs::TS;

use crate::auth::{AdminUser, OwnerUser};
use crate::stripe_connected_accounts_repo::StripeConnectedAccountsRepository;
use crate::web::AppState;
use crate::withdrawal_service::PayoutError;
use crate::withdrawals::{Withdrawal, WithdrawalError};
use crate::withdrawals_repo::WithdrawalsRepository;

use super::{DataListResponse, DataResponse, json_error, page_limit};

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../web/src/lib/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawalRequest {
    pub amount_cents: i32,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalListQuery {
    pub limit: Option<i64>,
}

fn withdrawal_error_status(e: &WithdrawalError) -> StatusCode {
    match e {
        WithdrawalError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WithdrawalError::InvalidAmount
        | WithdrawalError::BelowMinimum
        | WithdrawalError::NotConnected
        | WithdrawalError::PayoutsDisabled => StatusCode::BAD_REQUEST,
    }
}

fn withdrawal_error_response(e: WithdrawalError) -> axum::response::Response {
    json_error(withdrawal_error_status(&e), &e.to_string()).into_response()
}

/// POST /owner/withdrawals
pub async fn create_withdrawal(
    owner: OwnerUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateWithdrawalRequest>,
) -> impl IntoResponse {
    if state.stripe_config.is_none() {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "Stripe is not configured")
            .into_response();
    }
    let owner_id = owner.0.id;

    let accounts_repo = StripeConnectedAccountsRepository::new(state.pool.clone());
    let account = match accounts_repo.get_by_owner_id(owner_id).await {
        Ok(Some(account)) if account.can_receive_transfers() => account,
        Ok(Some(_)) => return withdrawal_error_response(WithdrawalError::PayoutsDisabled),
        Ok(None) => return withdrawal_error_response(WithdrawalError::NotConnected),
        Err(e) => {
            error!(owner_id = %owner_id, error = %e, "Failed to get Stripe account");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create withdrawal",
            )
            .into_response();
        }
    };

    let withdrawals_repo = WithdrawalsRepository::new(state.pool.clone());
    let withdrawal = match withdrawals_repo
        .create_pending(owner_id, payload.amount_cents, state.config.currency.clone())
        .await
    {
        Ok(withdrawal) => withdrawal,
        Err(e) => match e.downcast::<WithdrawalError>() {
            Ok(withdrawal_error) => return withdrawal_error_response(withdrawal_error),
            Err(e) => {
                error!(owner_id = %owner_id, error = %e, "Failed to create withdrawal");
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to create withdrawal",
                )
                .into_response();
            }
        },
    };

    match state
        .withdrawal_service()
        .pay_out(&withdrawal, &account.stripe_account_id)
        .await
    {
        Ok(paid) => (StatusCode::CREATED, Json(DataResponse { data: paid })).into_response(),
        Err(e) => payout_error_response(&withdrawal, e),
    }
}

fn payout_error_status(e: &PayoutError) -> StatusCode {
    match e {
        PayoutError::Rejected(_) | PayoutError::Unconfirmed(_) => StatusCode::BAD_GATEWAY,
        PayoutError::NotPending => StatusCode::CONFLICT,
        PayoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn payout_error_response(withdrawal: &Withdrawal, e: PayoutError) -> axum::response::Response {
    let message = match &e {
        PayoutError::Rejected(_) => "Stripe transfer failed",
        PayoutError::Unconfirmed(_) => {
            "Stripe transfer could not be confirmed, the withdrawal stays pending"
        }
        PayoutError::NotPending => "Withdrawal is no longer pending",
        PayoutError::Internal(e) => {
            error!(withdrawal_id = %withdrawal.id, error = %e, "Failed to record paid withdrawal");
            "Withdrawal sent but could not be recorded"
        }
    };
    json_error(payout_error_status(&e), message).into_response()
}

/// GET /owner/withdrawals
pub async fn get_my_withdrawals(
    owner: OwnerUser,
    State(state): State<AppState>,
    Query(params): Query<WithdrawalListQuery>,
) -> impl IntoResponse {
    let withdrawals_repo = WithdrawalsRepository::new(state.pool);
    match withdrawals_repo
        .list(Some(owner.0.id), page_limit(params.limit))
        .await
    {
        Ok(withdrawals) => Json(DataListResponse { data: withdrawals }).into_response(),
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to get withdrawals");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get withdrawals")
                .into_response()
        }
    }
}

/// GET /owner/balance
pub async fn get_balance(owner: OwnerUser, State(state): State<AppState>) -> impl IntoResponse {
    let withdrawals_repo = WithdrawalsRepository::new(state.pool);
    match withdrawals_repo.balance(owner.0.id).await {
        Ok(balance) => Json(DataResponse { data: balance }).into_response(),
        Err(e) => {
            error!(owner_id = %owner.0.id, error = %e, "Failed to get balance");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get balance").into_response()
        }
    }
}

/// GET /admin/withdrawals
pub async fn get_all_withdrawals(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<WithdrawalListQuery>,
) -> impl IntoResponse {
    let withdrawals_repo = WithdrawalsRepository::new(state.pool);
    match withdrawals_repo.list(None, page_limit(params.limit)).await {
        Ok(withdrawals) => Json(DataListResponse { data: withdrawals }).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list withdrawals");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get withdrawals")
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_error_status() {
        assert_eq!(
            withdrawal_error_status(&WithdrawalError::InsufficientBalance {
                available_cents: 500
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            withdrawal_error_status(&WithdrawalError::BelowMinimum),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            withdrawal_error_status(&WithdrawalError::PayoutsDisabled),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_payout_error_status() {
        assert_eq!(
            payout_error_status(&PayoutError::Unconfirmed("timeout".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            payout_error_status(&PayoutError::Rejected("account closed".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            payout_error_status(&PayoutError::NotPending),
            StatusCode::CONFLICT
        );
    }
}
