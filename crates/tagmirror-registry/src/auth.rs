//! Registry authentication: `WWW-Authenticate` challenges and token caching

use std::collections::HashMap;
use std::sync::RwLock;

/// What a registry asked for in a 401 response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Token exchange at `realm`
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    /// Plain HTTP basic auth
    Basic,
}

/// Parse a `WWW-Authenticate` header value
///
/// Handles quoted parameters with embedded commas, as in
/// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/centos:pull,push"`.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params = parse_params(rest);
    let realm = params.get("realm")?.clone();
    Some(Challenge::Bearer {
        realm,
        service: params.get("service").cloned(),
        scope: params.get("scope").cloned(),
    })
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut escaped = false;
            for c in chars.by_ref() {
                match c {
                    _ if escaped => {
                        value.push(c);
                        escaped = false;
                    }
                    '\\' => escaped = true,
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.insert(key, value);
    }

    params
}

/// Scope string for repository access
pub fn repository_scope(repository: &str, push: bool) -> String {
    if push {
        format!("repository:{}:pull,push", repository)
    } else {
        format!("repository:{}:pull", repository)
    }
}

/// Bearer tokens keyed by registry, scope and identity
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(registry: &str, scope: &str, identity: &str) -> String {
        format!("{}|{}|{}", registry, scope, identity)
    }

    pub fn get(&self, registry: &str, scope: &str, identity: &str) -> Option<String> {
        let tokens = match self.tokens.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens.get(&Self::key(registry, scope, identity)).cloned()
    }

    pub fn insert(&self, registry: &str, scope: &str, identity: &str, token: String) {
        let mut tokens = match self.tokens.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens.insert(Self::key(registry, scope, identity), token);
    }

    /// Drop a token the registry no longer accepts
    pub fn invalidate(&self, registry: &str, scope: &str, identity: &str) {
        let mut tokens = match self.tokens.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tokens.remove(&Self::key(registry, scope, identity));
    }
}
