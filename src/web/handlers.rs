//! HTTP request handlers.

use super::response::{ApiError, MessageResponse, ResultResponse};
use super::AppState;
use crate::db::{BadGuest, Node};
use crate::monitor::{
    rel_time, Lifecycle, LifecycleError, PairRequest, ReservationRequest, ReservationStatus, SnoozeRequest,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::Method,
    response::{Html, Json},
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

// ============================================================================
// Shared plumbing
// ============================================================================

/// Run a lifecycle operation on the blocking pool.
async fn with_lifecycle<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Lifecycle) -> Result<T, LifecycleError> + Send + 'static,
{
    let lifecycle = state.lifecycle.clone();
    Ok(tokio::task::spawn_blocking(move || op(&lifecycle)).await??)
}

/// Decode a JSON body, then validate and persist it through `op`.
///
/// `op` returns the success message sent back to the caller.
async fn run_write<T, F>(state: &AppState, body: Bytes, op: F) -> Result<Json<MessageResponse>, ApiError>
where
    T: DeserializeOwned + Send + 'static,
    F: FnOnce(&Lifecycle, T, DateTime<Utc>) -> Result<String, LifecycleError> + Send + 'static,
{
    let req: T = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Unable to decode request body: {}", e);
        ApiError::BadRequest(format!("Unable to decode request: {}", e))
    })?;

    let message = with_lifecycle(state, move |lifecycle| op(lifecycle, req, Utc::now())).await?;
    Ok(Json(MessageResponse::ok(message)))
}

pub async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse::ok("A-OK!"))
}

pub async fn handle_invalid_method(method: Method) -> ApiError {
    ApiError::BadRequest(format!("Invalid method {}", method))
}

// ============================================================================
// API: writes
// ============================================================================

pub async fn handle_create_reservation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageResponse>, ApiError> {
    run_write(&state, body, |lifecycle, req: ReservationRequest, now| {
        let res = lifecycle.create_reservation(req, now)?;
        Ok(format!("Reservation stored [{}/{}]", res.app, res.component))
    })
    .await
}

pub async fn handle_checkin(State(state): State<AppState>, body: Bytes) -> Result<Json<MessageResponse>, ApiError> {
    run_write(&state, body, |lifecycle, req: PairRequest, now| {
        let res = lifecycle.apply_checkin(req, now)?;
        Ok(format!("Application checked in: {}", res.app))
    })
    .await
}

pub async fn handle_snooze(State(state): State<AppState>, body: Bytes) -> Result<Json<MessageResponse>, ApiError> {
    run_write(&state, body, |lifecycle, req: SnoozeRequest, now| {
        let snooze = lifecycle.apply_snooze(req, now)?;
        Ok(format!("Application alerting paused: {}", snooze.app))
    })
    .await
}

pub async fn handle_checkout(State(state): State<AppState>, body: Bytes) -> Result<Json<MessageResponse>, ApiError> {
    run_write(&state, body, |lifecycle, req: PairRequest, _now| {
        let message = format!("Application Removed [{}/{}]", req.app, req.component);
        lifecycle.checkout(req)?;
        Ok(message)
    })
    .await
}

// ============================================================================
// API: reads
// ============================================================================

pub async fn handle_list_reservations(
    State(state): State<AppState>,
) -> Result<Json<ResultResponse<Vec<ReservationStatus>>>, ApiError> {
    let reservations = with_lifecycle(&state, |lifecycle| lifecycle.list_reservations(Utc::now())).await?;
    Ok(Json(ResultResponse::ok(reservations)))
}

pub async fn handle_get_reservation(
    State(state): State<AppState>,
    Path((app, component)): Path<(String, String)>,
) -> Result<Json<ResultResponse<ReservationStatus>>, ApiError> {
    let status = with_lifecycle(&state, move |lifecycle| {
        lifecycle.reservation_status(&app, &component, Utc::now())
    })
    .await?;
    Ok(Json(ResultResponse::ok(status)))
}

pub async fn handle_is_coordinator(State(state): State<AppState>) -> Json<bool> {
    Json(state.discovery.is_coordinator_self())
}

pub async fn handle_api_nodes(State(state): State<AppState>) -> Result<Json<ResultResponse<Vec<Node>>>, ApiError> {
    let nodes = state
        .discovery
        .list_nodes_with_status(state.lifecycle.store().clone())
        .await?;
    Ok(Json(ResultResponse::ok(nodes)))
}

pub async fn handle_api_bad_guests(
    State(state): State<AppState>,
) -> Result<Json<ResultResponse<Vec<BadGuest>>>, ApiError> {
    let guests = with_lifecycle(&state, |lifecycle| lifecycle.bad_guests()).await?;
    Ok(Json(ResultResponse::ok(guests)))
}

// ============================================================================
// Pages
// ============================================================================

pub async fn handle_status_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let now = Utc::now();
    let reservations = with_lifecycle(&state, move |lifecycle| lifecycle.list_reservations(now)).await?;

    let rows: String = reservations
        .iter()
        .map(|s| {
            let r = &s.reservation;
            let state_cell = match s.snoozed_until.and_then(|t| DateTime::from_timestamp(t, 0)) {
                Some(until) => format!("<td class=\"snoozed\">SNOOZED (ends {})</td>", rel_time(until, now)),
                None if s.failing_sla => "<td class=\"failing\">FAILING</td>".to_string(),
                None => "<td class=\"ok\">OK</td>".to_string(),
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{} {}</td><td>{}</td><td>{}</td><td>{}</td>{}</tr>",
                escape_html(&r.app),
                escape_html(&r.component),
                escape_html(&r.owner),
                escape_html(&r.notify),
                r.frequency,
                r.time_units,
                s.last_checkin_str,
                s.time_since_last_checkin,
                r.num_checkins,
                state_cell
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = table(
        &[
            "App", "Component", "Owner", "Notify", "Frequency", "Last Checkin", "Since", "Checkins", "State",
        ],
        &rows,
    );
    Ok(render_page("Vigil Status", &content))
}

pub async fn handle_nodes_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let nodes = state
        .discovery
        .list_nodes_with_status(state.lifecycle.store().clone())
        .await?;

    let rows: String = nodes
        .iter()
        .map(|n| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                n.id,
                escape_html(&n.ip_address),
                n.node_id,
                if n.is_coordinator { "yes" } else { "no" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = table(&["ID", "Address", "Node", "Coordinator"], &rows);
    Ok(render_page("Vigil Nodes", &content))
}

pub async fn handle_bad_guests_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let guests = with_lifecycle(&state, |lifecycle| lifecycle.bad_guests()).await?;

    let rows: String = guests
        .iter()
        .map(|g| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&g.app),
                escape_html(&g.component),
                g.num_fails
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = table(&["App", "Component", "Alerts"], &rows);
    Ok(render_page("Vigil Bad Guests", &content))
}

fn table(headers: &[&str], rows: &str) -> String {
    let head: String = headers.iter().map(|h| format!("<th>{}</th>", h)).collect();
    format!("<table>\n<tr>{}</tr>\n{}\n</table>", head, rows)
}

fn render_page(title: &str, content: &str) -> Html<String> {
    Html(
        LAYOUT_TEMPLATE
            .replace("{{title}}", title)
            .replace("{{content}}", content),
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"a\" & 'b'</b>"), "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_render_page() {
        let Html(page) = render_page("Nodes", &table(&["A"], "<tr><td>1</td></tr>"));
        assert!(page.contains("<title>Nodes</title>"));
        assert!(page.contains("<th>A</th>"));
    }
}
