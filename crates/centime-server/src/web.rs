//! The local web UI.
//!
//! Server-rendered HTML over a handful of routes; every mutation is a
//! form POST or a link that redirects back to where the user came from.
//! Amounts cross the wire in decimal major units and are stored as cents.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use centime_net::PeerManager;
use centime_shared::Envelope;
use centime_store::Database;

use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Database>,
    pub pm: Arc<PeerManager>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/details", get(details))
        .route("/update", post(update))
        .route("/delete", get(delete))
        .route("/spread", get(spread))
        .route("/tx", get(tx_form).post(tx_submit))
        .route("/debug", get(debug_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

#[derive(Deserialize)]
struct UpdateForm {
    #[serde(rename = "env-id")]
    id: String,
    #[serde(rename = "env-name")]
    name: String,
    #[serde(rename = "env-target")]
    target: String,
    #[serde(rename = "env-monthtarget")]
    month_target: String,
    #[serde(rename = "env-return", default)]
    return_to: String,
}

#[derive(Deserialize)]
struct TxQuery {
    id: String,
    dir: String,
}

#[derive(Deserialize)]
struct TxForm {
    amount: String,
    #[serde(default)]
    destination: String,
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, ServerError> {
    let mut envelopes = state.store.all_envelopes()?;
    envelopes.sort_by(|a, b| a.name.cmp(&b.name));

    let total_balance: i64 = envelopes.iter().map(|e| e.balance).sum();
    let total_target: i64 = envelopes.iter().map(|e| e.target).sum();
    let total_delta = total_balance - total_target;

    let mut rows = String::new();
    for e in &envelopes {
        let delta = e.balance - e.target;
        rows.push_str(&format!(
            "<tr><td><a href=\"/details?id={id}\">{name}</a></td>\
             <td class=\"num\">{balance}</td>\
             <td class=\"num\">{target}</td>\
             <td class=\"num {cls}\">{delta}</td>\
             <td class=\"num\">{month_delta} / {month_target}</td>\
             <td><a href=\"/tx?id={id}&amp;dir=in\">in</a> \
                 <a href=\"/tx?id={id}&amp;dir=out\">out</a> \
                 <a href=\"/tx?id={id}&amp;dir=inout\">move</a> \
                 <a href=\"/spread?id={id}\">spread</a> \
                 <a href=\"/delete?id={id}\">delete</a></td></tr>\n",
            id = e.id,
            name = escape(display_name(e)),
            balance = fmt_cents(e.balance),
            target = fmt_cents(e.target),
            cls = delta_class(delta),
            delta = fmt_cents(delta),
            month_delta = fmt_cents(e.month_delta),
            month_target = fmt_cents(e.month_target),
        ));
    }

    let body = format!(
        "<h1>Envelopes</h1>\
         <table>\
         <tr><th>Name</th><th>Balance</th><th>Target</th><th>Delta</th>\
             <th>This month</th><th></th></tr>\n\
         {rows}\
         <tr class=\"total\"><td>Total</td>\
             <td class=\"num\">{total_balance}</td>\
             <td class=\"num\">{total_target}</td>\
             <td class=\"num {total_cls}\">{total_delta}</td><td></td><td></td></tr>\
         </table>\
         <h2>New envelope</h2>\
         <form method=\"post\" action=\"/update\">\
         <input type=\"hidden\" name=\"env-id\" value=\"{fresh_id}\">\
         <label>Name <input name=\"env-name\"></label>\
         <label>Target <input name=\"env-target\" value=\"0\"></label>\
         <label>Monthly target <input name=\"env-monthtarget\" value=\"0\"></label>\
         <button type=\"submit\">Create</button>\
         </form>\
         <p><a href=\"/debug\">peer status</a></p>",
        rows = rows,
        total_balance = fmt_cents(total_balance),
        total_target = fmt_cents(total_target),
        total_cls = delta_class(total_delta),
        total_delta = fmt_cents(total_delta),
        fresh_id = Uuid::new_v4(),
    );

    Ok(Html(page("Envelopes", &body)))
}

async fn details(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Html<String>, ServerError> {
    let id = parse_id(&query.id)?;
    let (envelope, events) = state.store.envelope_with_history(id)?;

    let mut rows = String::new();
    for e in events.iter().rev() {
        let date = e
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        rows.push_str(&format!(
            "<tr><td>{date}</td><td>{comment}</td>\
             <td class=\"num\">{balance}</td>\
             <td class=\"num\">{target}</td>\
             <td class=\"num\">{month_target}</td>\
             <td>{note}</td></tr>\n",
            date = date,
            comment = escape(&e.comment),
            balance = fmt_cents(e.balance),
            target = fmt_cents(e.target),
            month_target = fmt_cents(e.month_target),
            note = if e.deleted { "deleted" } else { "" },
        ));
    }

    let body = format!(
        "<h1>{name}</h1>\
         <p>Balance {balance}, target {target}, monthly target {month_target}.</p>\
         <form method=\"post\" action=\"/update\">\
         <input type=\"hidden\" name=\"env-id\" value=\"{id}\">\
         <input type=\"hidden\" name=\"env-return\" value=\"/details?id={id}\">\
         <label>Name <input name=\"env-name\" value=\"{name}\"></label>\
         <label>Target <input name=\"env-target\" value=\"{target_major}\"></label>\
         <label>Monthly target <input name=\"env-monthtarget\" value=\"{month_target_major}\"></label>\
         <button type=\"submit\">Update</button>\
         </form>\
         <p><a href=\"/tx?id={id}&amp;dir=in\">pay in</a> \
            <a href=\"/tx?id={id}&amp;dir=out\">pay out</a> \
            <a href=\"/tx?id={id}&amp;dir=inout\">move</a> \
            <a href=\"/\">back</a></p>\
         <h2>History</h2>\
         <table>\
         <tr><th>Date</th><th>Comment</th><th>Balance</th><th>Target</th>\
             <th>Monthly</th><th></th></tr>\n\
         {rows}\
         </table>",
        id = envelope.id,
        name = escape(display_name(&envelope)),
        balance = fmt_cents(envelope.balance),
        target = fmt_cents(envelope.target),
        month_target = fmt_cents(envelope.month_target),
        target_major = fmt_cents(envelope.target),
        month_target_major = fmt_cents(envelope.month_target),
        rows = rows,
    );

    Ok(Html(page("Envelope", &body)))
}

async fn update(
    State(state): State<AppState>,
    Form(form): Form<UpdateForm>,
) -> Result<Redirect, ServerError> {
    let id = parse_id(&form.id)?;
    let target = parse_major_units(&form.target)?;
    let month_target = parse_major_units(&form.month_target)?;

    state
        .store
        .apply_meta_change(id, form.name.trim(), target, month_target)?;

    Ok(redirect_back(&form.return_to))
}

async fn delete(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Redirect, ServerError> {
    let id = parse_id(&query.id)?;
    state.store.apply_delete(id)?;
    Ok(Redirect::to("/"))
}

async fn spread(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<Redirect, ServerError> {
    let id = parse_id(&query.id)?;
    state.store.spread(id)?;
    Ok(Redirect::to("/"))
}

async fn tx_form(
    State(state): State<AppState>,
    Query(query): Query<TxQuery>,
) -> Result<Html<String>, ServerError> {
    let id = parse_id(&query.id)?;
    let envelope = state.store.envelope(id)?;

    let title = match query.dir.as_str() {
        "in" => "Pay in",
        "out" => "Pay out",
        "inout" => "Move",
        other => {
            return Err(ServerError::BadRequest(format!(
                "unknown transaction direction: {other}"
            )))
        }
    };

    let destination_field = if query.dir == "inout" {
        let mut options = String::new();
        for e in state.store.all_envelopes()? {
            if e.id == id {
                continue;
            }
            options.push_str(&format!(
                "<option value=\"{}\">{}</option>",
                e.id,
                escape(display_name(&e))
            ));
        }
        format!("<label>To <select name=\"destination\">{options}</select></label>")
    } else {
        String::new()
    };

    let body = format!(
        "<h1>{title}: {name}</h1>\
         <p>Balance {balance}.</p>\
         <form method=\"post\" action=\"/tx?id={id}&amp;dir={dir}\">\
         <label>Amount <input name=\"amount\" autofocus></label>\
         {destination_field}\
         <button type=\"submit\">{title}</button>\
         </form>\
         <p><a href=\"/details?id={id}\">back</a></p>",
        title = title,
        name = escape(display_name(&envelope)),
        balance = fmt_cents(envelope.balance),
        id = id,
        dir = query.dir,
        destination_field = destination_field,
    );

    Ok(Html(page(title, &body)))
}

async fn tx_submit(
    State(state): State<AppState>,
    Query(query): Query<TxQuery>,
    Form(form): Form<TxForm>,
) -> Result<Redirect, ServerError> {
    let id = parse_id(&query.id)?;
    let cents = parse_major_units(&form.amount)?;

    match query.dir.as_str() {
        "in" => state.store.apply_balance_change(id, cents, "")?,
        "out" => state.store.apply_balance_change(id, -cents, "")?,
        "inout" => {
            let destination = parse_id(&form.destination)?;
            let source = state.store.envelope(id)?;
            let dest = state.store.envelope(destination)?;

            state.store.apply_balance_change(
                destination,
                cents,
                &format!("Transfer from {}", display_name(&source)),
            )?;
            state.store.apply_balance_change(
                id,
                -cents,
                &format!("Transfer to {}", display_name(&dest)),
            )?;
        }
        other => {
            return Err(ServerError::BadRequest(format!(
                "unknown transaction direction: {other}"
            )))
        }
    }

    Ok(Redirect::to(&format!("/details?id={id}")))
}

async fn debug_report(State(state): State<AppState>) -> impl IntoResponse {
    state.pm.status_report()
}

/// Follow the form's return target, but only to our own paths.
fn redirect_back(to: &str) -> Redirect {
    if to.starts_with('/') {
        Redirect::to(to)
    } else {
        Redirect::to("/")
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <title>{title} - centime</title>\
         <style>\
         body {{ font-family: sans-serif; margin: 2em; }}\
         table {{ border-collapse: collapse; }}\
         td, th {{ padding: 0.3em 0.8em; border-bottom: 1px solid #ddd; text-align: left; }}\
         td.num {{ text-align: right; font-variant-numeric: tabular-nums; }}\
         tr.total td {{ font-weight: bold; }}\
         .delta-warn {{ color: #b00; }}\
         .delta-ok {{ color: #070; }}\
         label {{ display: block; margin: 0.4em 0; }}\
         </style></head><body>{body}</body></html>"
    )
}

fn display_name(envelope: &Envelope) -> &str {
    if envelope.name.is_empty() {
        "(unnamed)"
    } else {
        &envelope.name
    }
}

fn delta_class(delta: i64) -> &'static str {
    if delta < 0 {
        "delta-warn"
    } else {
        "delta-ok"
    }
}

/// Cents to decimal major units for display and form prefill.
fn fmt_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

fn parse_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw.trim())
        .map_err(|e| ServerError::BadRequest(format!("invalid envelope id {raw:?}: {e}")))
}

/// Form amounts are decimal major units; storage is integer cents.
fn parse_major_units(raw: &str) -> Result<i64, ServerError> {
    raw.trim()
        .parse::<f64>()
        .map(|units| (units * 100.0).round() as i64)
        .map_err(|e| ServerError::BadRequest(format!("invalid amount {raw:?}: {e}")))
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
