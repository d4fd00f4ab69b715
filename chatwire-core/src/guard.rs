use regex::Regex;

use crate::config::{RouteCfg, RouteRule};
use crate::credentials::Credentials;
use crate::error::{ChatClientError, CoreResult};

/// Compiled route rule
#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    requires_auth: bool,
}

/// Outcome of a navigation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    Redirect(String),
}

/// Decides whether a route may be entered with the current credentials.
/// Rules are checked in order; the first match wins and unmatched paths are public.
#[derive(Debug)]
pub struct RouteGuard {
    rules: Vec<CompiledRule>,
    login_path: String,
    home_path: String,
}

impl RouteGuard {
    /// Build a guard by compiling regexes from config.
    pub fn new(cfg: &RouteCfg) -> CoreResult<Self> {
        let mut rules = Vec::new();
        for RouteRule {
            pattern,
            requires_auth,
        } in &cfg.rules
        {
            let regex = Regex::new(pattern).map_err(|e| {
                ChatClientError::Validation(format!("invalid route regex '{pattern}': {e}"))
            })?;
            rules.push(CompiledRule {
                regex,
                requires_auth: *requires_auth,
            });
        }
        Ok(Self {
            rules,
            login_path: cfg.login_path.clone(),
            home_path: cfg.home_path.clone(),
        })
    }

    fn requires_auth(&self, path: &str) -> bool {
        self.rules
            .iter()
            .find(|r| r.regex.is_match(path))
            .is_some_and(|r| r.requires_auth)
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn check(&self, path: &str, creds: &Credentials) -> Navigation {
        let authed = creds.is_authenticated();
        if !authed && self.requires_auth(path) {
            tracing::debug!(path, "unauthenticated access to protected route");
            Navigation::Redirect(self.login_path.clone())
        } else if authed && path == self.login_path {
            Navigation::Redirect(self.home_path.clone())
        } else {
            Navigation::Proceed
        }
    }
}
