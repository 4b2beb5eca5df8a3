use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    entities::TicketStatus,
    errors::ServiceError,
    services::ledger::{NewRepairTicket, RepairTicketView, UsedPart},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Default)]
pub struct RepairListQuery {
    pub status: Option<TicketStatus>,
    /// Case-insensitive match on customer name or phone
    pub customer: Option<String>,
}

/// Ticket fields plus the parts consumed by the repair.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRepairRequest {
    #[serde(flatten)]
    pub ticket: NewRepairTicket,
    #[serde(default)]
    pub used_parts: Vec<UsedPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRepairStatusRequest {
    pub status: TicketStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRepairPartsRequest {
    #[serde(default)]
    pub used_parts: Vec<UsedPart>,
}

/// Tickets, newest first.
pub async fn list_repairs(
    State(state): State<AppState>,
    Query(query): Query<RepairListQuery>,
) -> ApiResult<Vec<RepairTicketView>> {
    let customer = query
        .customer
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_lowercase);

    let mut repairs: Vec<RepairTicketView> = state
        .services
        .ledger
        .list_tickets()
        .await?
        .into_iter()
        .filter(|view| query.status.map_or(true, |s| view.ticket.status == s))
        .filter(|view| match &customer {
            Some(term) => {
                view.ticket.customer_name.to_lowercase().contains(term)
                    || view.ticket.customer_phone.contains(term.as_str())
            }
            None => true,
        })
        .collect();
    repairs.reverse();
    Ok(Json(ApiResponse::success(repairs)))
}

pub async fn get_repair(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<RepairTicketView> {
    let repair = state.services.ledger.get_ticket(id).await?;
    Ok(Json(ApiResponse::success(repair)))
}

pub async fn create_repair(
    State(state): State<AppState>,
    Json(payload): Json<CreateRepairRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RepairTicketView>>), ServiceError> {
    let repair = state
        .services
        .ledger
        .create_ticket(payload.ticket, payload.used_parts)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(repair))))
}

pub async fn update_repair_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRepairStatusRequest>,
) -> ApiResult<RepairTicketView> {
    let repair = state
        .services
        .ledger
        .update_ticket_status(id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(repair)))
}

pub async fn update_repair_parts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRepairPartsRequest>,
) -> ApiResult<RepairTicketView> {
    let repair = state
        .services
        .ledger
        .update_ticket_parts(id, payload.used_parts)
        .await?;
    Ok(Json(ApiResponse::success(repair)))
}

pub async fn delete_repair(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.ledger.delete_ticket(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
