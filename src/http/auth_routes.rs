//! `/auth/*` handlers. Every endpoint except the OAuth callback authenticates
//! via `Authorization: Bearer <session_token>`; owner-only checks read the
//! caller's membership row and map absence to 404, never 403, so a non-member
//! cannot distinguish "not owner" from "room doesn't exist".

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::credentials::{issue_otp_secret, issue_worker_api_key, otp_uri, OAuthClient};
use crate::error::{AppError, AppResult};
use crate::models::{MembershipRole, Room, RoomMembership, User, WorkerToken};
use crate::state::AppState;
use crate::util::now_epoch;

async fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthenticated)?;
    let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthenticated)?;
    let claims = state.session_tokens.verify(token)?;
    Ok(claims.sub)
}

fn new_room_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn new_user_id(provider_user_id: &str) -> String {
    format!("gh_{provider_user_id}")
}

#[derive(Deserialize)]
pub struct OAuthCallbackRequest {
    pub code: String,
    pub redirect_uri: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub session_token: String,
    pub user_id: String,
    pub username: String,
}

pub async fn github_callback(
    State(state): State<AppState>,
    Json(req): Json<OAuthCallbackRequest>,
) -> AppResult<Json<LoginResponse>> {
    let profile = state.oauth_client.exchange_code(&req.code, &req.redirect_uri).await?;
    let user_id = new_user_id(&profile.provider_user_id);
    let now = now_epoch();

    let user = User {
        user_id: user_id.clone(),
        username: profile.username.clone(),
        email: profile.email,
        avatar_url: profile.avatar_url,
        created_at: now,
        last_login: now,
    };
    state.store.upsert_user(&user)?;

    let session_token = state.session_tokens.issue(&user_id, &user.username, now)?;
    Ok(Json(LoginResponse {
        session_token,
        user_id,
        username: user.username,
    }))
}

#[derive(Deserialize, Validate)]
pub struct CreateWorkerTokenRequest {
    pub room_id: String,
    #[validate(length(min = 1, max = 64))]
    pub worker_name: String,
    pub expires_in_days: Option<i64>,
}

#[derive(Serialize)]
pub struct WorkerTokenResponse {
    pub token_id: String,
    pub room_id: String,
    pub worker_name: String,
    pub expires_at: Option<i64>,
}

pub async fn create_worker_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkerTokenRequest>,
) -> AppResult<Json<WorkerTokenResponse>> {
    req.validate().map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    let user_id = authenticate(&state, &headers).await?;
    let now = now_epoch();

    if state.store.get_membership(&user_id, &req.room_id)?.is_none() {
        return Err(AppError::Forbidden);
    }

    let token_id = issue_worker_api_key();
    let expires_at = req.expires_in_days.map(|days| now + days * 86_400);
    let token = WorkerToken {
        token_id: token_id.clone(),
        user_id,
        room_id: req.room_id.clone(),
        worker_name: req.worker_name.clone(),
        created_at: now,
        expires_at,
        revoked_at: None,
    };
    state.store.put_worker_token(&token)?;

    Ok(Json(WorkerTokenResponse {
        token_id,
        room_id: req.room_id,
        worker_name: req.worker_name,
        expires_at,
    }))
}

pub async fn list_worker_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<WorkerTokenResponse>>> {
    let user_id = authenticate(&state, &headers).await?;
    let tokens = state.store.query_tokens_by_user(&user_id)?;
    Ok(Json(
        tokens
            .into_iter()
            .map(|t| WorkerTokenResponse {
                token_id: t.token_id,
                room_id: t.room_id,
                worker_name: t.worker_name,
                expires_at: t.expires_at,
            })
            .collect(),
    ))
}

pub async fn revoke_worker_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<()> {
    let user_id = authenticate(&state, &headers).await?;
    let now = now_epoch();
    let token = state.store.get_worker_token(&id)?.ok_or(AppError::NotFound)?;
    if token.user_id != user_id {
        // A token that isn't the caller's is indistinguishable from absent.
        return Err(AppError::NotFound);
    }
    // Idempotent: revoking an already-revoked token of the caller's still
    // reports success even though the update touches zero rows.
    state.store.revoke_worker_token(&id, &user_id, now)?;
    Ok(())
}

#[derive(Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub role: MembershipRole,
    pub name: Option<String>,
    pub expires_at: i64,
}

pub async fn list_rooms(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Vec<RoomSummary>>> {
    let user_id = authenticate(&state, &headers).await?;
    let memberships = state.store.query_memberships_by_user(&user_id)?;
    let mut rooms = Vec::with_capacity(memberships.len());
    for m in memberships {
        if let Some(room) = state.store.get_room(&m.room_id)? {
            rooms.push(RoomSummary {
                room_id: room.room_id,
                role: m.role,
                name: room.name,
                expires_at: room.expires_at,
            });
        }
    }
    Ok(Json(rooms))
}

#[derive(Deserialize)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub ttl_days: Option<i64>,
}

#[derive(Serialize)]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub password: String,
    pub otp_secret: String,
    pub otp_uri: String,
    pub expires_at: i64,
}

const DEFAULT_ROOM_TTL_DAYS: i64 = 30;

pub async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<Json<CreateRoomResponse>> {
    let user_id = authenticate(&state, &headers).await?;
    let now = now_epoch();

    let room_id = new_room_id();
    let password = issue_worker_api_key();
    let otp_secret = issue_otp_secret();
    let ttl_days = req.ttl_days.unwrap_or(DEFAULT_ROOM_TTL_DAYS);
    let expires_at = now + ttl_days * 86_400;

    let room = Room {
        room_id: room_id.clone(),
        created_by: user_id.clone(),
        password: password.clone(),
        otp_secret: otp_secret.clone(),
        expires_at,
        name: req.name,
    };
    state.store.put_room(&room)?;
    state.store.put_membership(&RoomMembership {
        user_id,
        room_id: room_id.clone(),
        role: MembershipRole::Owner,
        invited_by: None,
        joined_at: now,
    })?;
    state.metrics.record_room_created();

    let uri = otp_uri(crate::config::Config::service_name(), &room_id, &otp_secret);
    Ok(Json(CreateRoomResponse {
        room_id,
        password,
        otp_secret,
        otp_uri: uri,
        expires_at,
    }))
}

pub async fn delete_room(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> AppResult<()> {
    let user_id = authenticate(&state, &headers).await?;
    let membership = state.store.get_membership(&user_id, &id)?.ok_or(AppError::NotFound)?;
    if membership.role != MembershipRole::Owner {
        return Err(AppError::NotFound);
    }
    state.store.delete_room_cascade(&id)?;
    Ok(())
}

#[derive(Serialize)]
pub struct InviteResponse {
    pub invite_code: String,
    pub expires_at: i64,
}

pub async fn create_invite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<InviteResponse>> {
    let user_id = authenticate(&state, &headers).await?;
    let membership = state.store.get_membership(&user_id, &id)?.ok_or(AppError::NotFound)?;
    if membership.role != MembershipRole::Owner {
        return Err(AppError::NotFound);
    }
    let now = now_epoch();
    let invite = state.invites.issue(&id, &user_id, now);
    Ok(Json(InviteResponse {
        invite_code: invite.invite_code,
        expires_at: invite.expires_at,
    }))
}

#[derive(Deserialize, Validate)]
pub struct JoinRoomRequest {
    #[validate(length(equal = 8))]
    pub invite_code: String,
}

#[derive(Serialize)]
pub struct JoinRoomResponse {
    pub room_id: String,
}

pub async fn join_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JoinRoomRequest>,
) -> AppResult<Json<JoinRoomResponse>> {
    req.validate().map_err(|e| AppError::InvalidRequest(e.to_string()))?;
    let user_id = authenticate(&state, &headers).await?;
    let now = now_epoch();
    let room_id = state.invites.redeem(&req.invite_code, now)?;

    // Idempotent: already a member is not an error.
    if state.store.get_membership(&user_id, &room_id)?.is_none() {
        state.store.put_membership(&RoomMembership {
            user_id,
            room_id: room_id.clone(),
            role: MembershipRole::Member,
            invited_by: None,
            joined_at: now,
        })?;
    }

    Ok(Json(JoinRoomResponse { room_id }))
}
