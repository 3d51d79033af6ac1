//! Caller identity
//!
//! Authentication happens upstream. The authenticating proxy forwards the
//! verified identity in `x-berth-*` headers; requests without them are
//! refused.

use axum::http::HeaderMap;
use berth_deploy::Actor;

use crate::error::Error;

/// Stable user id header
pub const USER_ID_HEADER: &str = "x-berth-user-id";
/// Login name header
pub const USERNAME_HEADER: &str = "x-berth-username";
/// Platform admin flag header, `true` or `false`
pub const ADMIN_HEADER: &str = "x-berth-admin";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, Error> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| Error::Unauthorized(format!("{name} is not valid text")))
        })
        .transpose()
}

/// Read the caller from identity headers
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Error> {
    let user_id = header(headers, USER_ID_HEADER)?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Unauthorized(format!("missing {USER_ID_HEADER}")))?;
    let username = header(headers, USERNAME_HEADER)?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Unauthorized(format!("missing {USERNAME_HEADER}")))?;
    let is_admin = match header(headers, ADMIN_HEADER)? {
        None | Some("") | Some("false") => false,
        Some("true") => true,
        Some(other) => {
            return Err(Error::Unauthorized(format!(
                "{ADMIN_HEADER} must be true or false, got '{other}'"
            )))
        }
    };

    Ok(Actor {
        user_id: user_id.to_string(),
        username: username.to_string(),
        is_admin,
    })
}
