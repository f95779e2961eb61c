use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, CookieJar, SameSite},
    WithRejection,
};
use time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            AdminUpdateUserRequest, AuthResponse, ForgotPasswordRequest, LoginRequest,
            MessageResponse, PublicUser, ResetPasswordRequest, SignupRequest,
            UpdateMeRequest, UpdatePasswordRequest, UserData, UserResponse, UsersData,
            UsersResponse,
        },
        guard::{self, CurrentUser},
        services::{self, Session},
    },
    config::AppConfig,
    error::{AuthError, AuthResult},
    state::AppState,
    users::{Role, User},
};

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Extractors whose rejections are reported in the usual error envelope.
type JsonBody<T> = WithRejection<Json<T>, AuthError>;
type PathParam<T> = WithRejection<Path<T>, AuthError>;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
}

/// Routes behind `protect`; the admin subset is further restricted by role.
pub fn protected_routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/", get(list_users))
        .route("/:id", get(get_user).patch(update_user))
        .route_layer(middleware::from_fn(|req: Request, next: Next| {
            guard::restrict_to(ADMIN_ONLY, req, next)
        }));

    Router::new()
        .route("/updateMyPassword", patch(update_password))
        .route("/me", get(get_me))
        .route("/updateMe", patch(update_me))
        .route("/deleteMe", patch(delete_me))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state, guard::protect))
}

/// `jwt` cookie carrying the bearer token. `Secure` only in production.
fn session_cookie(config: &AppConfig, token: String) -> Cookie<'static> {
    Cookie::build(("jwt", token))
        .path("/")
        .max_age(Duration::minutes(config.jwt.cookie_ttl_minutes))
        .http_only(true)
        .secure(config.is_production())
        .same_site(SameSite::Lax)
        .build()
}

fn send_session(state: &AppState, status: StatusCode, session: Session) -> Response {
    let jar = CookieJar::new().add(session_cookie(&state.config, session.token.clone()));
    let body = AuthResponse {
        status: "success",
        token: session.token,
        data: UserData {
            user: PublicUser::from(&session.user),
        },
    };
    (status, jar, Json(body)).into_response()
}

fn user_response(user: &User) -> Json<UserResponse> {
    Json(UserResponse {
        status: "success",
        data: UserData {
            user: PublicUser::from(user),
        },
    })
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<SignupRequest>,
) -> AuthResult<Response> {
    let session = services::signup(&state, payload).await?;
    Ok(send_session(&state, StatusCode::CREATED, session))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<LoginRequest>,
) -> AuthResult<Response> {
    let session = services::login(&state, payload.email, payload.password).await?;
    Ok(send_session(&state, StatusCode::OK, session))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): JsonBody<ForgotPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    services::forgot_password(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Token sent to email!".into(),
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    WithRejection(Path(token), _): PathParam<String>,
    WithRejection(Json(payload), _): JsonBody<ResetPasswordRequest>,
) -> AuthResult<Response> {
    let session =
        services::reset_password(&state, &token, &payload.password, &payload.password_confirm)
            .await?;
    Ok(send_session(&state, StatusCode::OK, session))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(payload), _): JsonBody<UpdatePasswordRequest>,
) -> AuthResult<Response> {
    let session = services::update_password(
        &state,
        &user,
        &payload.password_current,
        &payload.password,
        &payload.password_confirm,
    )
    .await?;
    Ok(send_session(&state, StatusCode::OK, session))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    user_response(&user)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    WithRejection(Json(payload), _): JsonBody<UpdateMeRequest>,
) -> AuthResult<Json<UserResponse>> {
    let user = services::update_me(&state, &user, payload).await?;
    Ok(user_response(&user))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AuthResult<StatusCode> {
    services::deactivate(&state, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> AuthResult<Json<UsersResponse>> {
    let users: Vec<PublicUser> = services::list_users(&state)
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(UsersResponse {
        status: "success",
        results: users.len(),
        data: UsersData { users },
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    WithRejection(Path(id), _): PathParam<Uuid>,
) -> AuthResult<Json<UserResponse>> {
    let user = services::get_user(&state, id).await?;
    Ok(user_response(&user))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    WithRejection(Path(id), _): PathParam<Uuid>,
    WithRejection(Json(payload), _): JsonBody<AdminUpdateUserRequest>,
) -> AuthResult<Json<UserResponse>> {
    let user = services::update_user(&state, id, payload).await?;
    Ok(user_response(&user))
}
