//! REST route templates and rate-limit bucket keys.
//!
//! A [`Route`] pairs a static path template with the arguments needed to
//! render a concrete endpoint. The bucket key derived from a route decides
//! which quota bucket a request is admitted through: two requests share a
//! bucket iff their keys are equal.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Route parameters the platform's quota system partitions on.
///
/// Arguments with these names are folded into the bucket key; all other
/// arguments only affect the rendered endpoint path.
pub const MAJOR_PARAMS: [&str; 3] = ["channel_id", "guild_id", "webhook_id"];

/// HTTP method of a REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Returns the method as the uppercase wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical REST call: a static path template plus its arguments.
///
/// Templates use `{name}` placeholders, e.g.
/// `/channels/{channel_id}/messages/{message_id}`.
///
/// # Example
///
/// ```
/// use corvid_core::route::{Method, Route};
///
/// let route = Route::new(Method::Get, "/channels/{channel_id}/messages/{message_id}")
///     .arg("channel_id", 42u64)
///     .arg("message_id", 7u64);
///
/// assert_eq!(route.endpoint().unwrap(), "/channels/42/messages/7");
/// ```
#[derive(Debug, Clone)]
pub struct Route {
    method: Method,
    template: &'static str,
    args: Vec<(&'static str, String)>,
}

impl Route {
    /// Creates a route from a method and path template.
    pub fn new(method: Method, template: &'static str) -> Self {
        Self {
            method,
            template,
            args: Vec::new(),
        }
    }

    /// Adds a route argument, filling the `{name}` placeholder.
    pub fn arg(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.args.push((name, value.to_string()));
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the raw path template.
    pub fn template(&self) -> &'static str {
        self.template
    }

    /// Renders the concrete endpoint path.
    ///
    /// # Errors
    ///
    /// `CoreError::MissingRouteArg` if a placeholder has no argument.
    pub fn endpoint(&self) -> CoreResult<String> {
        let mut path = self.template.to_string();
        for (name, value) in &self.args {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        if let Some(start) = path.find('{') {
            let rest = path.get(start + 1..).unwrap_or("");
            let name = rest.split('}').next().unwrap_or(rest).to_string();
            return Err(CoreError::MissingRouteArg {
                template: self.template,
                name,
            });
        }
        Ok(path)
    }

    /// Computes the rate-limit bucket key for this route.
    ///
    /// The key is the method and template joined with the values of all
    /// major arguments, in the order they were supplied. Non-major
    /// arguments never appear in the key, so e.g. fetching two different
    /// messages in the same channel shares one bucket, while the same
    /// route against two channels never does.
    pub fn bucket_key(&self) -> String {
        let mut key = format!("{}:{}", self.method, self.template);
        for (name, value) in &self.args {
            if MAJOR_PARAMS.contains(name) {
                key.push(':');
                key.push_str(value);
            }
        }
        key
    }
}

// ============================================================================
// Route catalog
// ============================================================================
//
// A handful of common routes showing the template idiom. The full set is
// owned by the domain layer; anything not listed here is built with
// Route::new directly.

impl Route {
    /// POST /channels/{channel_id}/messages
    pub fn create_message(channel_id: u64) -> Self {
        Route::new(Method::Post, "/channels/{channel_id}/messages").arg("channel_id", channel_id)
    }

    /// GET /channels/{channel_id}/messages/{message_id}
    pub fn get_message(channel_id: u64, message_id: u64) -> Self {
        Route::new(Method::Get, "/channels/{channel_id}/messages/{message_id}")
            .arg("channel_id", channel_id)
            .arg("message_id", message_id)
    }

    /// GET /guilds/{guild_id}/members/{user_id}
    pub fn get_guild_member(guild_id: u64, user_id: u64) -> Self {
        Route::new(Method::Get, "/guilds/{guild_id}/members/{user_id}")
            .arg("guild_id", guild_id)
            .arg("user_id", user_id)
    }

    /// POST /webhooks/{webhook_id}/{webhook_token}
    pub fn execute_webhook(webhook_id: u64, token: &str) -> Self {
        Route::new(Method::Post, "/webhooks/{webhook_id}/{webhook_token}")
            .arg("webhook_id", webhook_id)
            .arg("webhook_token", token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_rendering() {
        let route = Route::get_message(100, 200);
        assert_eq!(route.endpoint().unwrap(), "/channels/100/messages/200");
    }

    #[test]
    fn test_endpoint_missing_arg() {
        let route = Route::new(Method::Get, "/channels/{channel_id}");
        let err = route.endpoint().unwrap_err();
        assert!(matches!(err, CoreError::MissingRouteArg { name, .. } if name == "channel_id"));
    }

    #[test]
    fn test_bucket_key_ignores_minor_args() {
        // Same channel, different messages: one bucket.
        let a = Route::get_message(5, 1).bucket_key();
        let b = Route::get_message(5, 2).bucket_key();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bucket_key_splits_on_major_args() {
        // Same route, different channels: different buckets.
        let a = Route::get_message(5, 1).bucket_key();
        let b = Route::get_message(6, 1).bucket_key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_bucket_key_splits_on_method() {
        let get = Route::new(Method::Get, "/channels/{channel_id}/messages")
            .arg("channel_id", 5u64)
            .bucket_key();
        let post = Route::create_message(5).bucket_key();
        assert_ne!(get, post);
    }

    #[test]
    fn test_webhook_token_is_not_major() {
        let a = Route::execute_webhook(9, "token-a").bucket_key();
        let b = Route::execute_webhook(9, "token-b").bucket_key();
        assert_eq!(a, b);
    }
}
