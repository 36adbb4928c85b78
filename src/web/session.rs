use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use cookie::time::Duration as CookieDuration;

use crate::workspace::SessionId;

pub const SESSION_COOKIE: &str = "converter_session";

/// Return the browser's session, issuing a fresh cookie if it has none.
///
/// The cookie has no max-age, so it ends with the browser session; the
/// workspace behind it is left to the sweep.
pub fn resolve_session(jar: CookieJar) -> (CookieJar, SessionId) {
    if let Some(session) = existing_session(&jar) {
        return (jar, session);
    }

    let session = SessionId::new();
    let mut cookie = Cookie::new(SESSION_COOKIE, session.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);

    (jar.add(cookie), session)
}

pub fn existing_session(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| SessionId::parse(cookie.value()))
}

pub fn clear_session(jar: CookieJar) -> CookieJar {
    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    jar.remove(removal)
}
