//! CSV report exports.
//!
//! RFC 4180 output: CRLF record separators, fields quoted when they
//! contain a comma, quote, or newline, quotes doubled inside quoted
//! fields.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReportQuery {
    pub user_id: Option<Uuid>,
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn build_csv(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut out = String::new();
    out.push_str(&header.join(","));
    out.push_str("\r\n");
    for row in rows {
        let escaped: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&escaped.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_response(filename: &str, csv: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        csv,
    )
        .into_response()
}

#[derive(Debug, sqlx::FromRow)]
struct LeadReportRow {
    title: String,
    contact_name: String,
    contact_email: String,
    contact_phone: Option<String>,
    company: Option<String>,
    location: Option<String>,
    price_coins: i64,
    views: i64,
    created_at: OffsetDateTime,
}

/// Full lead catalog with unlock counts.
pub async fn leads_csv(State(state): State<AppState>) -> ApiResult<Response> {
    let rows: Vec<LeadReportRow> = sqlx::query_as(
        r#"
        SELECT l.title, l.contact_name, l.contact_email, l.contact_phone,
               l.company, l.location, l.price_coins,
               COUNT(v.lead_id) AS views,
               l.created_at
        FROM leads l
        LEFT JOIN lead_views v ON v.lead_id = l.id
        WHERE l.active = TRUE
        GROUP BY l.id
        ORDER BY l.created_at DESC
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let csv = build_csv(
        &[
            "title",
            "contact_name",
            "contact_email",
            "contact_phone",
            "company",
            "location",
            "price_coins",
            "views",
            "created_at",
        ],
        rows.into_iter()
            .map(|r| {
                vec![
                    r.title,
                    r.contact_name,
                    r.contact_email,
                    r.contact_phone.unwrap_or_default(),
                    r.company.unwrap_or_default(),
                    r.location.unwrap_or_default(),
                    r.price_coins.to_string(),
                    r.views.to_string(),
                    r.created_at.to_string(),
                ]
            })
            .collect(),
    );

    Ok(csv_response("leads.csv", csv))
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionReportRow {
    email: String,
    kind: String,
    amount: i64,
    balance_after: i64,
    reference: Option<String>,
    created_at: OffsetDateTime,
}

/// Coin ledger export, optionally for one user.
pub async fn transactions_csv(
    State(state): State<AppState>,
    Query(query): Query<TransactionReportQuery>,
) -> ApiResult<Response> {
    let rows: Vec<TransactionReportRow> = sqlx::query_as(
        r#"
        SELECT u.email, ct.kind::TEXT AS kind, ct.amount, ct.balance_after,
               ct.reference, ct.created_at
        FROM coin_transactions ct
        JOIN users u ON u.id = ct.user_id
        WHERE ($1::UUID IS NULL OR ct.user_id = $1)
        ORDER BY ct.created_at DESC
        LIMIT 10000
        "#,
    )
    .bind(query.user_id)
    .fetch_all(&state.pool)
    .await?;

    let csv = build_csv(
        &[
            "email",
            "kind",
            "amount",
            "balance_after",
            "reference",
            "created_at",
        ],
        rows.into_iter()
            .map(|r| {
                vec![
                    r.email,
                    r.kind,
                    r.amount.to_string(),
                    r.balance_after.to_string(),
                    r.reference.unwrap_or_default(),
                    r.created_at.to_string(),
                ]
            })
            .collect(),
    );

    Ok(csv_response("transactions.csv", csv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fields_unquoted() {
        assert_eq!(csv_escape("Acme Corp"), "Acme Corp");
        assert_eq!(csv_escape(""), "");
    }

    #[test]
    fn test_comma_forces_quotes() {
        assert_eq!(csv_escape("Austin, TX"), "\"Austin, TX\"");
    }

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(csv_escape("the \"big\" deal"), "\"the \"\"big\"\" deal\"");
    }

    #[test]
    fn test_newline_forces_quotes() {
        assert_eq!(csv_escape("line1\nline2"), "\"line1\nline2\"");
    }

    #[test]
    fn test_build_csv_shape() {
        let csv = build_csv(
            &["name", "note"],
            vec![
                vec!["Ada".to_string(), "first, always".to_string()],
                vec!["Grace".to_string(), "plain".to_string()],
            ],
        );
        assert_eq!(
            csv,
            "name,note\r\nAda,\"first, always\"\r\nGrace,plain\r\n"
        );
    }
}
