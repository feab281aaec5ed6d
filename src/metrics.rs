//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Signing Metrics
    pub static ref SIGNATURES_APPLIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisig_signatures_applied_total", "Signature schemes applied or skipped on outgoing requests"),
        &["scheme", "result"]
    ).expect("metric can be created");

    // Verification Metrics
    pub static ref VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisig_verifications_total", "Inbox verification outcomes"),
        &["outcome"]
    ).expect("metric can be created");

    // Cache Metrics
    pub static ref KEY_CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisig_key_cache_lookups_total", "Actor key cache lookups"),
        &["result"]
    ).expect("metric can be created");

    // Inbox Metrics
    pub static ref INBOX_ACTIVITIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisig_inbox_activities_total", "Verified activities dispatched from the inbox"),
        &["activity_type"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisig_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(SIGNATURES_APPLIED_TOTAL.clone()))
        .expect("SIGNATURES_APPLIED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(VERIFICATIONS_TOTAL.clone()))
        .expect("VERIFICATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(KEY_CACHE_LOOKUPS_TOTAL.clone()))
        .expect("KEY_CACHE_LOOKUPS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(INBOX_ACTIVITIES_TOTAL.clone()))
        .expect("INBOX_ACTIVITIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
