//! Audit trail, system event log and compliance reports.

use crate::db::{AuditLog, ComplianceReport, LogLevel, ReportStatus, SystemLog, TradeStatus, User, UserRole};
use crate::error::ApiError;
use crate::models::{AuditLogQuery, ComplianceReportRequest, SystemLogQuery, clamp_limit};
use crate::store::Store;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Audited action names.
pub mod actions {
    pub const REGISTER: &str = "register";
    pub const LOGIN: &str = "login";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const ACCOUNT_UNLOCKED: &str = "account_unlocked";
    pub const LOGOUT: &str = "logout";
    pub const API_KEY_GENERATED: &str = "api_key_generated";
    pub const PROFILE_UPDATED: &str = "profile_updated";
    pub const STRATEGY_CREATED: &str = "strategy_created";
    pub const STRATEGY_UPDATED: &str = "strategy_updated";
    pub const STRATEGY_STATUS_CHANGED: &str = "strategy_status_changed";
    pub const STRATEGY_ARCHIVED: &str = "strategy_archived";
    pub const TRADE_PLACED: &str = "trade_placed";
    pub const TRADE_REJECTED: &str = "trade_rejected";
    pub const POSITION_CLOSED: &str = "position_closed";
    pub const RISK_SETTINGS_UPDATED: &str = "risk_settings_updated";
    pub const ALERT_ACKNOWLEDGED: &str = "alert_acknowledged";
    pub const SETTINGS_UPDATED: &str = "settings_updated";
    pub const SETTINGS_RESET: &str = "settings_reset";
    pub const REPORT_GENERATED: &str = "compliance_report_generated";
}

/// Audit entry under construction.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    user_id: Option<Uuid>,
    action: &'static str,
    resource_type: &'static str,
    resource_id: Option<String>,
    details: Value,
    ip_address: Option<String>,
}

impl AuditEvent {
    /// Starts an entry for `action` on a `resource_type`.
    #[must_use]
    pub fn new(action: &'static str, resource_type: &'static str) -> Self {
        Self {
            user_id: None,
            action,
            resource_type,
            resource_id: None,
            details: Value::Null,
            ip_address: None,
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    fn into_log(self) -> AuditLog {
        AuditLog {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            action: self.action.to_string(),
            resource_type: self.resource_type.to_string(),
            resource_id: self.resource_id,
            details: self.details,
            ip_address: self.ip_address,
            created_at: Utc::now(),
        }
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or_default()
}

/// Builds a report from the trades and alert count of a period.
#[must_use]
pub fn build_report(
    user_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    trades: &[crate::db::Trade],
    risk_alerts: usize,
) -> ComplianceReport {
    let filled: Vec<_> = trades
        .iter()
        .filter(|t| t.status == TradeStatus::Filled)
        .collect();
    let traded_value: Decimal = filled
        .iter()
        .filter_map(|t| t.fill_price.map(|p| p * t.quantity))
        .sum();

    ComplianceReport {
        id: Uuid::new_v4(),
        user_id,
        period_start,
        period_end,
        total_trades: trades.len() as i64,
        filled_trades: filled.len() as i64,
        rejected_trades: trades
            .iter()
            .filter(|t| t.status == TradeStatus::Rejected)
            .count() as i64,
        traded_value,
        risk_alerts: risk_alerts as i64,
        status: ReportStatus::Generated,
        generated_at: Utc::now(),
    }
}

/// Audit service.
pub struct AuditTrail {
    store: Arc<Store>,
}

impl AuditTrail {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Records an audit entry.
    pub async fn record(&self, event: AuditEvent) {
        let entry = event.into_log();
        debug!(action = %entry.action, user_id = ?entry.user_id, "Audit");
        self.store.push_audit(entry).await;
    }

    /// Records a service event and mirrors it to the tracing output.
    pub async fn system(&self, level: LogLevel, component: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(component, "{message}"),
            LogLevel::Info => info!(component, "{message}"),
            LogLevel::Warn => warn!(component, "{message}"),
            LogLevel::Error => error!(component, "{message}"),
        }
        self.store
            .push_system_log(SystemLog {
                id: Uuid::new_v4(),
                level,
                component: component.to_string(),
                message,
                created_at: Utc::now(),
            })
            .await;
    }

    /// Audit entries visible to `actor`.
    ///
    /// Traders only see their own entries; admins see everything unless
    /// they filter by user.
    ///
    /// # Errors
    /// Returns `Forbidden` when a trader asks for another user's entries.
    pub async fn logs(&self, actor: &User, query: &AuditLogQuery) -> Result<Vec<AuditLog>, ApiError> {
        let user_id = match (actor.role, query.user_id) {
            (UserRole::Admin, filter) => filter,
            (_, Some(id)) if id != actor.id => {
                return Err(ApiError::Forbidden(
                    "audit logs of other users require admin".to_string(),
                ));
            }
            _ => Some(actor.id),
        };
        self.store
            .audit_logs(user_id, query.action.as_deref(), clamp_limit(query.limit))
            .await
    }

    /// System log entries, newest first.
    #[must_use]
    pub fn system_logs(&self, query: &SystemLogQuery) -> Vec<SystemLog> {
        self.store
            .system_logs(query.level, query.component.as_deref(), clamp_limit(query.limit))
    }

    /// Generates and stores a compliance report.
    ///
    /// # Errors
    /// Returns `Validation` for an inverted period, `Forbidden` when a
    /// trader reports on another user, `UserNotFound` for unknown users.
    pub async fn generate_report(
        &self,
        actor: &User,
        request: &ComplianceReportRequest,
    ) -> Result<ComplianceReport, ApiError> {
        if request.period_end < request.period_start {
            return Err(ApiError::field("period_end", "must not precede period_start"));
        }
        let user_id = request.user_id.unwrap_or(actor.id);
        if user_id != actor.id {
            if actor.role != UserRole::Admin {
                return Err(ApiError::Forbidden(
                    "reports on other users require admin".to_string(),
                ));
            }
            if self.store.user(user_id).is_none() {
                return Err(ApiError::UserNotFound(user_id.to_string()));
            }
        }

        let from = day_start(request.period_start);
        let to = day_start(request.period_end) + Duration::days(1);
        let trades = self.store.trades_between(user_id, from, to);
        let alerts = self.store.alert_count_between(user_id, from, to);
        let report = build_report(user_id, request.period_start, request.period_end, &trades, alerts);
        self.store.save_report(report.clone()).await?;

        info!(
            user_id = %user_id,
            period_start = %report.period_start,
            period_end = %report.period_end,
            total_trades = report.total_trades,
            "Compliance report generated"
        );
        Ok(report)
    }

    /// Reports visible to `actor`, newest first.
    #[must_use]
    pub fn reports(&self, actor: &User) -> Vec<ComplianceReport> {
        match actor.role {
            UserRole::Admin => self.store.reports(None),
            _ => self.store.reports(Some(actor.id)),
        }
    }
}
