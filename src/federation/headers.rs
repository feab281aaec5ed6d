//! Case-preserving header list for outgoing requests
//!
//! `http::HeaderMap` lower-cases names, but outgoing federation requests
//! keep the caller's spelling. `HeaderList` keeps the first-seen spelling
//! and looks names up case-insensitively.

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::AppError;

/// Content type for ActivityPub payloads
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pairs; later pairs whose name was already seen (in any
    /// case) are dropped.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut list = Self::new();
        for (name, value) in pairs {
            list.insert_if_absent(name, value);
        }
        list
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Add a header unless one with the same name already exists.
    /// Returns whether it was added.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, value.into()));
        true
    }

    /// Set a header value, keeping the existing spelling of the name
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value.into(),
            None => self.entries.push((name, value.into())),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert to an `http::HeaderMap` for sending
    pub fn to_header_map(&self) -> Result<HeaderMap, AppError> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Validation(format!("Invalid header name {}: {}", name, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Validation(format!("Invalid header value for {}: {}", name, e)))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

/// Fill in default headers for an outgoing request.
///
/// `User-Agent` is always synthesized when missing; `Content-Type` only
/// when a body is sent. Synthesized names use canonical capitalization.
pub fn reconstruct_headers(headers: &HeaderList, user_agent: &str, has_body: bool) -> HeaderList {
    let mut list = headers.clone();
    list.insert_if_absent("User-Agent", user_agent);
    if has_body {
        list.insert_if_absent("Content-Type", ACTIVITY_JSON);
    }
    list
}
