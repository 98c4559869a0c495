use crate::audit::AuditQuery;
use crate::error::GatewayError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::{Validate, ValidationError, ValidationErrors};

/// Body of `POST /api/v1/orders/sheets`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OrderSheetRequest {
    #[validate(required(message = "order and staff are required"))]
    pub order: Option<Value>,
    #[validate(required(message = "order and staff are required"))]
    pub staff: Option<Value>,
}

impl OrderSheetRequest {
    /// Audit payload for the append.
    pub fn audit_payload(&self) -> Value {
        json!({ "order": self.order, "staff": self.staff })
    }
}

/// Body of `POST /api/v1/requests/sheets`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RequestSheetRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank", message = "request_text is required"))]
    pub request_text: String,
    #[validate(required(message = "staff is required"))]
    pub staff: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl RequestSheetRequest {
    pub fn audit_payload(&self, created_at: &str) -> Value {
        json!({
            "requestText": self.request_text,
            "staff": self.staff,
            "createdAt": created_at,
        })
    }
}

/// Query string of `GET /api/v1/audit-logs/search`, kept as raw strings so
/// malformed numbers fall back to defaults instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSearchParams {
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub success: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate_order_request(body: Value) -> Result<OrderSheetRequest, GatewayError> {
        let request: OrderSheetRequest = Self::parse(body)?;
        request
            .validate()
            .map_err(|e| Self::first_error(&e, &["order", "staff"]))?;
        Ok(request)
    }

    /// The returned request has `request_text` trimmed.
    pub fn validate_sheet_request(body: Value) -> Result<RequestSheetRequest, GatewayError> {
        let mut request: RequestSheetRequest = Self::parse(body)?;
        request
            .validate()
            .map_err(|e| Self::first_error(&e, &["request_text", "staff"]))?;
        request.request_text = request.request_text.trim().to_string();
        Ok(request)
    }

    pub fn validate_audit_search(params: AuditSearchParams) -> Result<AuditQuery, GatewayError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Ok(AuditQuery {
            action: non_empty(params.action),
            user_id: non_empty(params.user_id),
            start: Self::parse_date("startDate", params.start_date.as_deref(), false)?,
            end: Self::parse_date("endDate", params.end_date.as_deref(), true)?,
            success: match params.success.as_deref() {
                Some("true") => Some(true),
                Some("false") => Some(false),
                _ => None,
            },
            page: params.page.and_then(|p| p.trim().parse().ok()),
            limit: params.limit.and_then(|l| l.trim().parse().ok()),
        })
    }

    /// RFC 3339 timestamp or a bare `YYYY-MM-DD`. A bare date used as an
    /// upper bound covers the whole day.
    fn parse_date(
        name: &str,
        value: Option<&str>,
        end_of_day: bool,
    ) -> Result<Option<DateTime<Utc>>, GatewayError> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            GatewayError::Validation(format!("{} is not a valid date: {}", name, raw))
        })?;
        let time = if end_of_day {
            date.and_hms_milli_opt(23, 59, 59, 999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        Ok(time.map(|t| t.and_utc()))
    }

    fn parse<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, GatewayError> {
        if !body.is_object() {
            return Err(GatewayError::Validation(
                "Request body must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(body)
            .map_err(|e| GatewayError::Validation(format!("Invalid request body: {}", e)))
    }

    /// First failing field in `order`, as a validation error
    fn first_error(errors: &ValidationErrors, order: &[&str]) -> GatewayError {
        let fields = errors.field_errors();
        let message = order
            .iter()
            .filter_map(|field| fields.get(*field))
            .filter_map(|errs| errs.first())
            .find_map(|err| err.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| errors.to_string());
        GatewayError::Validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff() -> Value {
        json!({ "display_name": "Tanaka", "district_code": "511", "department_code": "7" })
    }

    #[test]
    fn test_validate_order_request() {
        let body = json!({ "order": { "reception_date": "2025-08-09" }, "staff": staff() });
        let request = RequestValidator::validate_order_request(body).unwrap();
        assert_eq!(request.order.unwrap()["reception_date"], "2025-08-09");
    }

    #[test]
    fn test_order_request_requires_both_fields() {
        let err =
            RequestValidator::validate_order_request(json!({ "staff": staff() })).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("order and staff are required"));

        let err =
            RequestValidator::validate_order_request(json!({ "order": null, "staff": staff() }))
                .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn test_sheet_request_trims_text() {
        let body = json!({ "request_text": "  shorten schedule  ", "staff": staff() });
        let request = RequestValidator::validate_sheet_request(body).unwrap();
        assert_eq!(request.request_text, "shorten schedule");
        assert!(request.created_at.is_none());
    }

    #[test]
    fn test_blank_request_text_is_rejected_before_staff() {
        let err =
            RequestValidator::validate_sheet_request(json!({ "request_text": "   " })).unwrap_err();
        assert!(err.to_string().contains("request_text is required"));

        let err =
            RequestValidator::validate_sheet_request(json!({ "request_text": "hi" })).unwrap_err();
        assert!(err.to_string().contains("staff is required"));
    }

    #[test]
    fn test_audit_search_params() {
        let params = AuditSearchParams {
            action: Some("orders.append".to_string()),
            user_id: Some(String::new()),
            start_date: Some("2025-08-09".to_string()),
            end_date: Some("2025-08-10T12:00:00+09:00".to_string()),
            success: Some("false".to_string()),
            page: Some("abc".to_string()),
            limit: Some("5000".to_string()),
        };
        let query = RequestValidator::validate_audit_search(params).unwrap();
        assert_eq!(query.action.as_deref(), Some("orders.append"));
        assert!(query.user_id.is_none());
        assert_eq!(query.start.unwrap().to_rfc3339(), "2025-08-09T00:00:00+00:00");
        assert_eq!(query.end.unwrap().to_rfc3339(), "2025-08-10T03:00:00+00:00");
        assert_eq!(query.success, Some(false));
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), 1000);
    }

    #[test]
    fn test_audit_search_rejects_bad_date() {
        let params = AuditSearchParams {
            start_date: Some("yesterday".to_string()),
            ..AuditSearchParams::default()
        };
        let err = RequestValidator::validate_audit_search(params).unwrap_err();
        assert!(err.to_string().contains("startDate"));
    }

    #[test]
    fn test_non_object_body() {
        assert!(RequestValidator::validate_order_request(json!([1, 2])).is_err());
        assert!(RequestValidator::validate_sheet_request(json!({ "request_text": 5 })).is_err());
    }
}
