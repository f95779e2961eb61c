use time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AdminUpdateUserRequest, SignupRequest, UpdateMeRequest},
        password::{hash_password, verify_password},
        reset,
    },
    error::{AuthError, AuthResult, Unauthenticated},
    mail::Email,
    state::AppState,
    users::{password_change_stamp, validation, NewUser, SaveOptions, User, UserQuery},
};

/// A user together with a freshly signed bearer token.
pub struct Session {
    pub user: User,
    pub token: String,
}

fn start_session(state: &AppState, user: User) -> AuthResult<Session> {
    let token = state
        .keys
        .issue(user.id, state.clock.now())
        .map_err(|e| AuthError::Internal(e.into()))?;
    Ok(Session { user, token })
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_new_password(password: &str, confirm: &str) -> AuthResult<String> {
    validation::validate_password_pair(password, confirm).map_err(AuthError::BadRequest)?;
    Ok(hash_password(password)?)
}

#[instrument(skip(state, req), fields(email = %req.email))]
pub async fn signup(state: &AppState, req: SignupRequest) -> AuthResult<Session> {
    let name = req.name.trim().to_string();
    let email = normalize_email(&req.email);

    validation::validate_name(&name).map_err(AuthError::BadRequest)?;
    validation::validate_email(&email).map_err(AuthError::BadRequest)?;
    validation::validate_password_pair(&req.password, &req.password_confirm)
        .map_err(AuthError::BadRequest)?;

    // Ensure email is not taken, deactivated accounts included
    if state
        .users
        .find(&UserQuery::by_email(&email).include_inactive())
        .await?
        .is_some()
    {
        warn!("email already registered");
        return Err(AuthError::Conflict("Email already registered".into()));
    }

    let password_hash = hash_password(&req.password)?;
    let user = state
        .users
        .insert(NewUser {
            name,
            email,
            password_hash,
        })
        .await?;

    info!(user_id = %user.id, "user registered");
    start_session(state, user)
}

#[instrument(skip(state, email, password))]
pub async fn login(
    state: &AppState,
    email: Option<String>,
    password: Option<String>,
) -> AuthResult<Session> {
    let (email, password) = match (email, password) {
        (Some(e), Some(p)) if !e.trim().is_empty() && !p.is_empty() => (e, p),
        _ => {
            return Err(AuthError::BadRequest(
                "Please provide email and password!".into(),
            ))
        }
    };

    let user = state
        .users
        .find_by_email(&email)
        .await?
        .filter(|u| verify_password(&password, &u.password_hash))
        .ok_or_else(|| {
            warn!(email = %normalize_email(&email), "login failed");
            Unauthenticated::BadCredentials
        })?;

    info!(user_id = %user.id, "user logged in");
    start_session(state, user)
}

/// Issues a reset secret and mails it. The stored digest and expiry are
/// withdrawn again if the mail cannot be delivered, unless something else has
/// replaced or consumed them in the meantime.
#[instrument(skip(state, email))]
pub async fn forgot_password(state: &AppState, email: &str) -> AuthResult<()> {
    let user = state.users.find_by_email(email).await?.ok_or_else(|| {
        AuthError::NotFound("There is no user with that email address.".into())
    })?;

    let ttl = Duration::minutes(state.config.reset.ttl_minutes);
    let token = reset::generate(state.clock.now(), ttl);
    state
        .users
        .set_reset_token(user.id, &token.digest, token.expires_at)
        .await?;

    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{}",
        state.config.reset.public_base_url, token.secret
    );
    let email = Email {
        to: user.email.clone(),
        subject: format!(
            "Your password reset token (valid for {} min)",
            state.config.reset.ttl_minutes
        ),
        body: format!(
            "Forgot your password? Submit a PATCH request with your new password and \
             passwordConfirm to: {reset_url}.\nIf you didn't forget your password, \
             please ignore this email!"
        ),
    };

    if let Err(e) = state.mailer.send(email).await {
        error!(user_id = %user.id, error = %e, "reset email failed; withdrawing token");
        match state.users.clear_reset_token(user.id, &token.digest).await {
            Ok(true) => {}
            Ok(false) => warn!(user_id = %user.id, "reset token already replaced or used"),
            Err(rollback) => {
                error!(user_id = %user.id, error = %rollback, "failed to withdraw reset token")
            }
        }
        return Err(AuthError::DeliveryFailed);
    }

    info!(user_id = %user.id, "password reset email sent");
    Ok(())
}

#[instrument(skip_all)]
pub async fn reset_password(
    state: &AppState,
    secret: &str,
    password: &str,
    password_confirm: &str,
) -> AuthResult<Session> {
    let digest = reset::digest_secret(secret);
    let now = state.clock.now();
    if state
        .users
        .find_by_reset_digest(&digest, now)
        .await?
        .is_none()
    {
        return Err(AuthError::InvalidOrExpiredToken);
    }

    let hash = hash_new_password(password, password_confirm)?;
    // a concurrent reset may have taken the secret since the lookup
    let user = state
        .users
        .consume_reset_token(&digest, now, &hash, password_change_stamp(now))
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;

    info!(user_id = %user.id, "password reset");
    start_session(state, user)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_password(
    state: &AppState,
    user: &User,
    current: &str,
    password: &str,
    password_confirm: &str,
) -> AuthResult<Session> {
    if !verify_password(current, &user.password_hash) {
        warn!("current password mismatch");
        return Err(Unauthenticated::WrongPassword.into());
    }

    let hash = hash_new_password(password, password_confirm)?;
    let user = state
        .users
        .set_password(user.id, &hash, password_change_stamp(state.clock.now()))
        .await?;

    info!("password updated");
    start_session(state, user)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(state: &AppState, user: &User, req: UpdateMeRequest) -> AuthResult<User> {
    if req.password.is_some() || req.password_confirm.is_some() {
        return Err(AuthError::BadRequest(
            "This route is not for password updates. Please use /updateMyPassword.".into(),
        ));
    }

    let mut user = user.clone();
    if let Some(name) = req.name {
        user.name = name.trim().to_string();
    }
    if let Some(email) = req.email {
        user.email = normalize_email(&email);
    }
    let user = state.users.save(&user, SaveOptions::default()).await?;
    info!("profile updated");
    Ok(user)
}

/// Soft delete: the account stays in the store but every lookup skips it.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn deactivate(state: &AppState, user: &User) -> AuthResult<()> {
    let mut user = user.clone();
    user.active = false;
    state
        .users
        .save(&user, SaveOptions::skip_validation())
        .await?;
    info!("account deactivated");
    Ok(())
}

pub async fn list_users(state: &AppState) -> AuthResult<Vec<User>> {
    Ok(state.users.list(&UserQuery::active()).await?)
}

pub async fn get_user(state: &AppState, id: Uuid) -> AuthResult<User> {
    state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AuthError::NotFound("No user found with that ID".into()))
}

#[instrument(skip(state, req))]
pub async fn update_user(
    state: &AppState,
    id: Uuid,
    req: AdminUpdateUserRequest,
) -> AuthResult<User> {
    let mut user = get_user(state, id).await?;
    if let Some(name) = req.name {
        user.name = name.trim().to_string();
    }
    if let Some(email) = req.email {
        user.email = normalize_email(&email);
    }
    if let Some(role) = req.role {
        user.role = role;
    }
    let user = state.users.save(&user, SaveOptions::default()).await?;
    info!(user_id = %user.id, role = ?user.role, "user updated by admin");
    Ok(user)
}
