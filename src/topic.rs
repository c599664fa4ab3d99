//! Topic naming conventions.
//!
//! Topics are plain strings. Interactive users address topics relative to
//! their own namespace, so `builds` typed by `alice` becomes `alice/builds`.
//! Public topics live under `public/`, and admins may address any raw topic
//! by prefixing it with `/`.

/// Topic carrying newline-terminated surrogate keys for cache invalidation.
pub const CACHE_DRAIN: &str = "cache-drain";

/// Cache-drain sentinel asking consumers to purge everything.
pub const PURGE_ALL: &str = "*";

/// Prefix of topics anyone may subscribe to.
pub const PUBLIC_PREFIX: &str = "public";

/// Scope `topic` to `user`.
pub fn user_topic(user: &str, topic: &str) -> String {
    format!("{user}/{topic}")
}

/// Place `topic` in the public namespace.
pub fn public_topic(topic: &str) -> String {
    format!("{PUBLIC_PREFIX}/{topic}")
}

/// Resolve a topic typed by a user to the topic name used on the broker.
///
/// - Admins may prefix a topic with `/` to address it verbatim.
/// - `public` topics are placed under `public/`.
/// - Otherwise the topic is scoped to the user.
///
/// With no user, the topic is used verbatim.
pub fn resolve(user: Option<&str>, topic: &str, public: bool, admin: bool) -> String {
    if admin {
        if let Some(raw) = topic.strip_prefix('/') {
            return raw.to_owned();
        }
    }
    match user {
        _ if public => public_topic(topic),
        Some(user) => user_topic(user, topic),
        None => topic.to_owned(),
    }
}

/// Topic carrying push notifications for an image in a user's registry.
pub fn registry_topic(user: &str, resource: &str, tag: &str) -> String {
    format!("{user}@{resource}:{tag}")
}

/// Surrogate key grouping every cached response of a user's project.
pub fn surrogate_key(user: &str, project: &str) -> String {
    format!("{user}-{project}")
}
