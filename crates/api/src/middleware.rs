use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use fulfillment_core::{Caller, Role, UserId};
use fulfillment_infra::rpc::{USER_ID_HEADER, USER_NAME_HEADER, USER_ROLE_HEADER};

use crate::app::errors;
use crate::context::CallerContext;

/// Turn the gateway identity headers into a [`CallerContext`].
///
/// The gateway has already authenticated the caller; a request that reaches
/// a service without a usable identity is rejected with 401.
pub async fn identity_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let caller = caller_from_headers(req.headers())
        .map_err(|msg| errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", msg))?;

    req.extensions_mut().insert(CallerContext::new(caller));

    Ok(next.run(req).await)
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, String> {
    let user_id: UserId = header(headers, USER_ID_HEADER)?
        .parse()
        .map_err(|_| format!("{USER_ID_HEADER} must be a positive integer"))?;
    let role: Role = header(headers, USER_ROLE_HEADER)?
        .parse()
        .map_err(|e| format!("{USER_ROLE_HEADER}: {e}"))?;

    let caller = Caller::new(user_id, role);
    Ok(match header(headers, USER_NAME_HEADER) {
        Ok(name) => caller.with_display_name(name),
        Err(_) => caller,
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, String> {
    let value = headers
        .get(name)
        .ok_or_else(|| format!("missing {name} header"))?
        .to_str()
        .map_err(|_| format!("{name} is not valid text"))?
        .trim();
    if value.is_empty() {
        return Err(format!("empty {name} header"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn full_identity_is_read() {
        let caller = caller_from_headers(&headers(&[
            ("x-user-id", "12"),
            ("x-user-role", "Courier"),
            ("x-user-name", "Ana"),
        ]))
        .unwrap();
        assert_eq!(caller.user_id, UserId::new(12));
        assert_eq!(caller.role, Role::Courier);
        assert_eq!(caller.display_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn name_is_optional() {
        let caller = caller_from_headers(&headers(&[("x-user-id", "3"), ("x-user-role", "client")])).unwrap();
        assert_eq!(caller.display_name, None);
    }

    #[test]
    fn missing_or_malformed_identity_is_refused() {
        assert!(caller_from_headers(&headers(&[("x-user-role", "client")])).is_err());
        assert!(caller_from_headers(&headers(&[("x-user-id", "abc"), ("x-user-role", "client")])).is_err());
        assert!(caller_from_headers(&headers(&[("x-user-id", "0"), ("x-user-role", "client")])).is_err());
        assert!(caller_from_headers(&headers(&[("x-user-id", "5"), ("x-user-role", "chef")])).is_err());
    }
}
