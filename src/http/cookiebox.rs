use cookie::{Cookie, CookieJar};
use http::header::{HeaderValue, SET_COOKIE};
use http::HeaderMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cookie state carried by one session.
///
/// Clones share the same jar, so the response task of a session can store
/// cookies the session sends on its next exchange.
#[derive(Clone, Default)]
pub struct CookieBox {
    jar: Arc<Mutex<CookieJar>>,
}

impl CookieBox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CookieJar> {
        self.jar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store every `Set-Cookie` header. Cookies that are already expired
    /// remove the stored cookie of the same name. Returns how many headers
    /// were applied.
    pub fn store_from_headers(&self, headers: &HeaderMap) -> usize {
        let mut jar = self.lock();
        let mut applied = 0;
        for val in headers.get_all(SET_COOKIE) {
            let Ok(s) = val.to_str() else { continue };
            let Ok(cookie) = Cookie::parse(s.to_owned()) else {
                tracing::trace!(header = s, "ignoring malformed Set-Cookie");
                continue;
            };
            let expired = cookie.max_age().is_some_and(|age| age.is_zero() || age.is_negative());
            if expired {
                jar.remove(Cookie::new(cookie.name().to_owned(), ""));
            } else {
                jar.add(cookie);
            }
            applied += 1;
        }
        applied
    }

    /// The `Cookie` request header for the stored cookies, if any.
    pub fn header_value(&self) -> Option<HeaderValue> {
        let jar = self.lock();
        let mut pairs: Vec<String> = jar.iter().map(|c| format!("{}={}", c.name(), c.value())).collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort();
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }

    pub fn add(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().add(Cookie::new(name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).map(|c| c.value().to_owned())
    }

    /// Copy every cookie of `other` into this box.
    pub fn copy_from(&self, other: &CookieBox) {
        if Arc::ptr_eq(&self.jar, &other.jar) {
            return;
        }
        let cookies: Vec<Cookie<'static>> = other.lock().iter().cloned().collect();
        let mut jar = self.lock();
        for cookie in cookies {
            jar.add(cookie);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CookieBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieBox").field("len", &self.len()).finish()
    }
}
