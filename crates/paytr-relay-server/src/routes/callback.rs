//! The two PayTR channels: the signed server-to-server notification (POST)
//! and the browser redirect (GET).
//!
//! The POST always answers `200 OK` with body `OK`. PayTR retries any other
//! answer, and by the time a response is written the outcome is either
//! recorded or deliberately ignored, so a retry would gain nothing.

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};

use paytr::{
    CallbackNotification, Decision, OriginHint, RawNotification, RedirectQuery, RedirectRequest,
    RelayError,
};

use crate::metrics;
use crate::state::AppState;

/// Body PayTR expects on every notification response.
pub const ACK_BODY: &str = "OK";

fn ack() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(ACK_BODY)
}

/// Decode the notification body as JSON or as a urlencoded form, depending
/// on the declared content type.
fn parse_notification(req: &HttpRequest, body: &[u8]) -> Result<RawNotification, RelayError> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        Ok(serde_json::from_slice(body)?)
    } else {
        let text = std::str::from_utf8(body)
            .map_err(|e| RelayError::MalformedInput(format!("body is not UTF-8: {e}")))?;
        web::Query::<RawNotification>::from_query(text)
            .map(web::Query::into_inner)
            .map_err(|e| RelayError::MalformedInput(e.to_string()))
    }
}

/// POST /paytr-callback - gateway notification
pub async fn notification(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let raw = match parse_notification(&req, &body) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable notification body, acknowledging");
            metrics::MALFORMED_NOTIFICATIONS
                .with_label_values(&["body"])
                .inc();
            return ack();
        }
    };

    let notification = match CallbackNotification::try_from(raw) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "incomplete notification, acknowledging");
            metrics::MALFORMED_NOTIFICATIONS
                .with_label_values(&["fields"])
                .inc();
            return ack();
        }
    };

    let checked = notification.verify(&state.config.merchant_key, &state.config.merchant_salt);
    let n = &checked.notification;

    if checked.verified {
        metrics::SIGNATURE_CHECKS.with_label_values(&["valid"]).inc();
    } else {
        metrics::SIGNATURE_CHECKS
            .with_label_values(&["mismatch"])
            .inc();
        tracing::warn!(
            order = %n.order_reference,
            status = %n.status_token,
            error = %RelayError::SignatureMismatch(n.order_reference.clone()),
            "notification signature did not verify"
        );
        if state.config.require_valid_signature {
            return ack();
        }
    }

    state
        .store
        .record(&n.order_reference, n.outcome, n.amount_minor_units);
    metrics::NOTIFICATIONS
        .with_label_values(&[n.outcome.order_status()])
        .inc();

    match &n.failure_detail {
        Some(detail) => tracing::info!(
            order = %n.order_reference,
            outcome = ?n.outcome,
            amount_minor = n.amount_minor_units,
            verified = checked.verified,
            detail = %detail,
            "notification recorded"
        ),
        None => tracing::info!(
            order = %n.order_reference,
            outcome = ?n.outcome,
            amount_minor = n.amount_minor_units,
            verified = checked.verified,
            "notification recorded"
        ),
    }

    if !state
        .notifier
        .notify(&n.order_reference, n.outcome, n.amount_major_units())
    {
        metrics::ORDER_FORWARDS.with_label_values(&["dropped"]).inc();
    }

    ack()
}

/// Build the result-page URL for a decision.
pub fn redirect_location(site_base_url: &str, decision: &Decision) -> String {
    match decision {
        Decision::Success {
            order_reference,
            amount_major_units,
        } => format!(
            "{site_base_url}/payment/success?order={}&amount={amount_major_units}",
            urlencoding::encode(order_reference)
        ),
        Decision::Failure {
            order_reference,
            reason_code,
        } => format!(
            "{site_base_url}/payment/failure?order={}&status={}",
            urlencoding::encode(order_reference),
            urlencoding::encode(reason_code)
        ),
        Decision::Pending => format!(
            "{site_base_url}/payment/failure?order={}&status={}",
            paytr::resolver::UNKNOWN_REFERENCE,
            Decision::PENDING_REASON
        ),
    }
}

/// GET /paytr-callback - browser redirect from the hosted payment page
pub async fn redirect(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let query = web::Query::<RedirectQuery>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_else(|e| {
            tracing::debug!(error = %e, "unparseable redirect query, treating as empty");
            RedirectQuery::default()
        });

    let referrer = req
        .headers()
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok());
    let origin = OriginHint::from_referrer(referrer, &state.config.gateway_referrer_hosts);
    let request = RedirectRequest::from_query(query, origin);

    let start = std::time::Instant::now();
    let resolution = state.resolver.resolve(&request).await;
    let kind = resolution.decision.kind();

    metrics::REDIRECT_LATENCY
        .with_label_values(&[kind])
        .observe(start.elapsed().as_secs_f64());
    metrics::REDIRECTS
        .with_label_values(&[kind, resolution.basis.as_str()])
        .inc();

    if let Some(entry) = resolution.unforwarded_entry() {
        if !state.notifier.notify(
            &entry.order_reference,
            entry.outcome,
            entry.amount_major_units(),
        ) {
            metrics::ORDER_FORWARDS.with_label_values(&["dropped"]).inc();
        }
    }

    let location = redirect_location(&state.config.site_base_url, &resolution.decision);
    tracing::info!(
        decision = kind,
        basis = resolution.basis.as_str(),
        origin = ?origin,
        location = %location,
        "redirecting browser"
    );

    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    for path in ["/paytr-callback", "/callback"] {
        cfg.route(path, web::post().to(notification))
            .route(path, web::get().to(redirect));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://shop.example.com";

    #[test]
    fn test_success_location() {
        let d = Decision::Success {
            order_reference: "ORD1".to_string(),
            amount_major_units: 299,
        };
        assert_eq!(
            redirect_location(SITE, &d),
            "https://shop.example.com/payment/success?order=ORD1&amount=299"
        );
    }

    #[test]
    fn test_failure_location_encodes() {
        let d = Decision::Failure {
            order_reference: "A B&C".to_string(),
            reason_code: "failed".to_string(),
        };
        assert_eq!(
            redirect_location(SITE, &d),
            "https://shop.example.com/payment/failure?order=A%20B%26C&status=failed"
        );
    }

    #[test]
    fn test_pending_location() {
        assert_eq!(
            redirect_location(SITE, &Decision::Pending),
            "https://shop.example.com/payment/failure?order=UNKNOWN&status=processing"
        );
    }
}
