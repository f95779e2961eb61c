use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::{
    error::{AuthError, AuthResult, Unauthenticated},
    state::AppState,
    users::{Role, User},
};

/// The admitted user, placed in request extensions by [`protect`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Returns the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves the caller behind a bearer token.
///
/// Rejects, in order: no token, a token that fails verification, a token whose
/// user is gone or deactivated, and a token issued before the last password
/// change.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> AuthResult<User> {
    let token = bearer_token(headers).ok_or(Unauthenticated::NotLoggedIn)?;

    let claims = state
        .keys
        .verify(token, state.clock.now())
        .map_err(|_| Unauthenticated::InvalidToken)?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for missing user");
            Unauthenticated::UserGone
        })?;

    if user.changed_password_after(claims.iat) {
        debug!(user_id = %user.id, "token predates password change");
        return Err(Unauthenticated::PasswordChanged.into());
    }

    Ok(user)
}

/// Middleware admitting only authenticated requests.
pub async fn protect(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

pub fn authorize(user: &User, allowed: &[Role]) -> AuthResult<()> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        debug!(user_id = %user.id, role = ?user.role, "role not permitted");
        Err(AuthError::Forbidden)
    }
}

/// Middleware restricting a route to `allowed` roles. Must be layered inside
/// [`protect`].
pub async fn restrict_to(
    allowed: &'static [Role],
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let CurrentUser(user) = req
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .ok_or(Unauthenticated::NotLoggedIn)?;
    authorize(&user, allowed)?;
    Ok(next.run(req).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::Unauthenticated(Unauthenticated::NotLoggedIn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::clock::Clock;
    use crate::testing::Harness;
    use crate::users::{password_change_stamp, SaveOptions, UserStore};
    use axum::http::HeaderValue;
    use time::Duration;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn unauth(err: AuthError) -> Unauthenticated {
        match err {
            AuthError::Unauthenticated(reason) => reason,
            other => panic!("expected 401, got {other:?}"),
        }
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&headers_with("Bearerabc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn missing_header_is_not_logged_in() {
        let h = Harness::new();
        let err = authenticate(&h.state, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(unauth(err), Unauthenticated::NotLoggedIn);
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let h = Harness::new();
        let err = authenticate(&h.state, &headers_with("Bearer nonsense"))
            .await
            .unwrap_err();
        assert_eq!(unauth(err), Unauthenticated::InvalidToken);
    }

    #[tokio::test]
    async fn valid_token_admits_the_right_user() {
        let h = Harness::new();
        let user = h.seed_user("ann@example.com", Role::User).await;
        let token = h.token_for(&user);
        let admitted = authenticate(&h.state, &headers_with(&format!("Bearer {token}")))
            .await
            .expect("admitted");
        assert_eq!(admitted.id, user.id);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let h = Harness::new();
        let user = h.seed_user("ann@example.com", Role::User).await;
        let token = h.token_for(&user);
        h.clock
            .advance(Duration::minutes(h.state.config.jwt.ttl_minutes) + Duration::seconds(1));
        let err = authenticate(&h.state, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert_eq!(unauth(err), Unauthenticated::InvalidToken);
    }

    #[tokio::test]
    async fn vanished_or_deactivated_user_is_rejected() {
        let h = Harness::new();
        let mut user = h.seed_user("ann@example.com", Role::User).await;
        let token = h.token_for(&user);

        user.active = false;
        h.users
            .save(&user, SaveOptions::default())
            .await
            .expect("deactivate");

        let err = authenticate(&h.state, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert_eq!(unauth(err), Unauthenticated::UserGone);
    }

    #[tokio::test]
    async fn token_from_before_password_change_is_superseded() {
        let h = Harness::new();
        let user = h.seed_user("ann@example.com", Role::User).await;
        let token = h.token_for(&user);

        h.clock.advance(Duration::seconds(30));
        h.users
            .set_password(
                user.id,
                &hash_password("Newpass1!").unwrap(),
                password_change_stamp(h.clock.now()),
            )
            .await
            .expect("set password");

        let err = authenticate(&h.state, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert_eq!(unauth(err), Unauthenticated::PasswordChanged);

        // a token issued after the change is fine
        let fresh = h.token_for(&user);
        assert!(authenticate(&h.state, &headers_with(&format!("Bearer {fresh}")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn change_stamped_at_issue_time_supersedes() {
        let h = Harness::new();
        let user = h.seed_user("ann@example.com", Role::User).await;
        let token = h.token_for(&user);

        h.users
            .set_password(user.id, &user.password_hash, h.clock.now())
            .await
            .expect("set password");

        let err = authenticate(&h.state, &headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert_eq!(unauth(err), Unauthenticated::PasswordChanged);
    }

    #[tokio::test]
    async fn authorize_checks_role_membership() {
        let h = Harness::new();
        let guide = h.seed_user("guide@example.com", Role::Guide).await;
        assert!(authorize(&guide, &[Role::Admin, Role::LeadGuide, Role::Guide]).is_ok());
        assert!(matches!(
            authorize(&guide, &[Role::Admin]),
            Err(AuthError::Forbidden)
        ));
    }
}
