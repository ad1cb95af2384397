//! Configuration for caseguard
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::core::CoreConfig;
use crate::realtime::Backoff;

/// Caseguard - access control, audit trail and notifications for case work
#[derive(Parser, Debug, Clone)]
#[command(name = "caseguard")]
#[command(about = "Access control, audit trail and realtime notifications for case management")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory store, fallback JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI. Must point at a replica set: mutations use
    /// multi-document transactions.
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "caseguard")]
    pub mongodb_db: String,

    /// JWT secret for token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// How long a push may wait on a full session queue
    #[arg(long, env = "PUSH_TIMEOUT_MS", default_value = "2000")]
    pub push_timeout_ms: u64,

    /// Frames buffered per realtime connection
    #[arg(long, env = "SESSION_BUFFER", default_value = "64")]
    pub session_buffer: usize,

    /// Days to keep audit entries; unset keeps them forever
    #[arg(long, env = "AUDIT_RETENTION_DAYS")]
    pub audit_retention_days: Option<u32>,

    /// Also audit allowed reads of legal and psychological content
    #[arg(long, env = "AUDIT_SENSITIVE_READS", default_value = "false")]
    pub audit_sensitive_reads: bool,

    /// Connection attempts to MongoDB before giving up
    #[arg(long, env = "MONGODB_CONNECT_ATTEMPTS", default_value = "3")]
    pub mongodb_connect_attempts: u32,

    /// Times a mutation is retried after a write conflict
    #[arg(long, env = "MUTATION_RETRIES", default_value = "3")]
    pub mutation_retries: u32,
}

impl Args {
    /// JWT secret, falling back to an insecure one in dev mode
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-only-insecure-secret-for-local-runs".to_string()),
            (None, false) => None,
        }
    }

    /// Schedule for MongoDB connection retries
    pub fn mongodb_backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(500), Duration::from_secs(5))
            .with_max_attempts(self.mongodb_connect_attempts.saturating_sub(1))
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            audit_retention: self
                .audit_retention_days
                .map(|days| chrono::Duration::days(i64::from(days))),
            audit_sensitive_reads: self.audit_sensitive_reads,
            push_timeout: Duration::from_millis(self.push_timeout_ms),
            session_buffer: self.session_buffer,
            mutation_retries: self.mutation_retries,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.push_timeout_ms == 0 {
            return Err("PUSH_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.session_buffer == 0 {
            return Err("SESSION_BUFFER must be greater than zero".to_string());
        }

        if self.audit_retention_days == Some(0) {
            return Err("AUDIT_RETENTION_DAYS must be greater than zero when set".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["caseguard"];
        argv.extend_from_slice(args);
        Args::parse_from(argv)
    }

    #[test]
    fn test_production_requires_secret() {
        let args = parse(&["--jwt-secret", "0123456789abcdef0123456789abcdef"]);
        assert!(args.validate().is_ok());

        let args = parse(&["--dev-mode"]);
        assert!(args.validate().is_ok());
        assert!(args.jwt_secret().is_some());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let args = parse(&["--dev-mode", "--session-buffer", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_core_config_mapping() {
        let args = parse(&[
            "--dev-mode",
            "--audit-retention-days",
            "90",
            "--audit-sensitive-reads",
            "--push-timeout-ms",
            "500",
        ]);
        let config = args.core_config();
        assert_eq!(config.audit_retention, Some(chrono::Duration::days(90)));
        assert!(config.audit_sensitive_reads);
        assert_eq!(config.push_timeout, Duration::from_millis(500));
        assert_eq!(config.mutation_retries, 3);
    }

    #[test]
    fn test_single_connect_attempt_never_retries() {
        let args = parse(&["--dev-mode", "--mongodb-connect-attempts", "1"]);
        assert!(args.mongodb_backoff().next_delay().is_none());

        let mut backoff = parse(&["--dev-mode"]).mongodb_backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }
}
