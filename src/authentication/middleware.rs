use std::convert::Infallible;

use warp::{reject::Rejection, Filter};

use crate::constants::SESSION_COOKIE;

use super::jwt::{verify_session_token, Session};

pub fn with_session() -> impl Filter<Extract = (Session,), Error = Rejection> + Copy {
    warp::cookie::<String>(SESSION_COOKIE).and_then(|token: String| async move {
        match verify_session_token(&token) {
            Ok(claims) => Ok(Session::from(claims)),
            Err(e) => Err(warp::reject::custom(e)),
        }
    })
}

/// Like [`with_session`], but anonymous requests pass through as `None`
/// instead of being rejected. Read endpoints use this for the viewer-scoped
/// projections.
pub fn with_possible_session(
) -> impl Filter<Extract = (Option<Session>,), Error = Infallible> + Copy {
    warp::cookie::optional::<String>(SESSION_COOKIE).map(|token: Option<String>| {
        token
            .and_then(|token| verify_session_token(&token).ok())
            .map(Session::from)
    })
}
