// ═══════════════════════════════════════════════════════════════════
// Backend Tests — envelope normalization, HttpBackend, InMemoryBackend
// ═══════════════════════════════════════════════════════════════════

use chrono::NaiveDate;
use mockito::{Matcher, Server};
use serde_json::json;
use std::collections::HashMap;

use exchange_dashboard_core::backend::envelope::{
    error_message, is_failure, normalize_portfolio_list, unwrap_data,
};
use exchange_dashboard_core::backend::http::HttpBackend;
use exchange_dashboard_core::backend::memory::{InMemoryBackend, PortfolioData};
use exchange_dashboard_core::backend::traits::{DashboardBackend, SeriesQuery};
use exchange_dashboard_core::errors::{CoreError, GENERIC_REMOTE_MESSAGE};
use exchange_dashboard_core::models::metrics::{FeeTotals, Period};
use exchange_dashboard_core::models::portfolio::{NewPortfolio, PortfolioUpdate};
use exchange_dashboard_core::models::series::EquityPoint;
use exchange_dashboard_core::models::settings::ClientSettings;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

fn backend_for(server: &Server) -> HttpBackend {
    HttpBackend::new(&ClientSettings::default().with_base_url(server.url()))
}

// ═══════════════════════════════════════════════════════════════════
// Envelope normalization
// ═══════════════════════════════════════════════════════════════════

mod envelope {
    use super::*;

    fn ids(body: serde_json::Value) -> Vec<String> {
        normalize_portfolio_list(body)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    #[test]
    fn bare_list() {
        assert_eq!(ids(json!([{ "id": "a" }, { "id": 2 }])), vec!["a", "2"]);
    }

    #[test]
    fn data_wrapped_list() {
        assert_eq!(ids(json!({ "success": true, "data": [{ "id": "a" }] })), vec!["a"]);
    }

    #[test]
    fn credentials_wrapped_list() {
        assert_eq!(ids(json!({ "credentials": [{ "id": "b" }] })), vec!["b"]);
    }

    #[test]
    fn nested_credentials_list() {
        assert_eq!(
            ids(json!({ "data": { "credentials": [{ "id": "c" }, { "id": "d" }] } })),
            vec!["c", "d"]
        );
    }

    #[test]
    fn empty_list_in_any_shape() {
        assert!(ids(json!([])).is_empty());
        assert!(ids(json!({ "data": [] })).is_empty());
        assert!(ids(json!({ "data": { "credentials": [] } })).is_empty());
    }

    #[test]
    fn unknown_shape_is_deserialization_error() {
        let err = normalize_portfolio_list(json!({ "items": [] })).unwrap_err();
        assert!(matches!(err, CoreError::Deserialization(_)));

        let err = normalize_portfolio_list(json!("nope")).unwrap_err();
        assert!(matches!(err, CoreError::Deserialization(_)));
    }

    #[test]
    fn error_message_lookup_order() {
        assert_eq!(
            error_message(&json!({ "error": "bad key", "message": "ignored" })).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            error_message(&json!({ "message": "nope" })).as_deref(),
            Some("nope")
        );
        assert_eq!(
            error_message(&json!({ "detail": "Not authenticated" })).as_deref(),
            Some("Not authenticated")
        );
        assert_eq!(
            error_message(&json!({ "error": { "message": "nested" } })).as_deref(),
            Some("nested")
        );
        assert_eq!(error_message(&json!({ "error": "" })), None);
        assert_eq!(error_message(&json!([1, 2])), None);
    }

    #[test]
    fn failure_flag() {
        assert!(is_failure(&json!({ "success": false })));
        assert!(!is_failure(&json!({ "success": true })));
        assert!(!is_failure(&json!({})));
    }

    #[test]
    fn unwrap_data_with_and_without_wrapper() {
        let wrapped: Vec<u32> = unwrap_data(json!({ "data": [1, 2] })).unwrap();
        let bare: Vec<u32> = unwrap_data(json!([3])).unwrap();
        assert_eq!(wrapped, vec![1, 2]);
        assert_eq!(bare, vec![3]);
    }
}

// ═══════════════════════════════════════════════════════════════════
// HttpBackend — wire behavior against a mock server
// ═══════════════════════════════════════════════════════════════════

mod http_auth {
    use super::*;

    #[tokio::test]
    async fn login_posts_credentials_and_unwraps_grant() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/auth/login")
            .match_body(Matcher::Json(json!({ "email": "a@b.c", "password": "pw" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "success": true,
                    "data": { "token": "tok-1", "user": { "id": 5, "email": "a@b.c" } }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let grant = backend_for(&server).login("a@b.c", "pw").await.unwrap();

        mock.assert_async().await;
        assert_eq!(grant.token, "tok-1");
        assert_eq!(grant.user.id, "5");
    }

    #[tokio::test]
    async fn login_401_is_remote_with_backend_message() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/auth/login")
            .with_status(401)
            .with_body(json!({ "error": "Invalid email or password" }).to_string())
            .create_async()
            .await;

        let err = backend_for(&server).login("a@b.c", "bad").await.unwrap_err();

        assert_eq!(
            err,
            CoreError::remote(Some(401), Some("Invalid email or password".into()))
        );
    }

    #[tokio::test]
    async fn register_conflict_passes_message_through() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/auth/register")
            .with_status(409)
            .with_body(json!({ "detail": "Email already registered" }).to_string())
            .create_async()
            .await;

        let err = backend_for(&server)
            .register("a@b.c", "pw")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Email already registered");
    }

    #[tokio::test]
    async fn me_accepts_nested_user() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body(json!({ "data": { "user": { "id": "u1", "email": "a@b.c" } } }).to_string())
            .create_async()
            .await;

        let user = backend_for(&server).current_user("tok-1").await.unwrap();

        assert_eq!(user.id, "u1");
    }

    #[tokio::test]
    async fn me_accepts_flat_user() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/auth/me")
            .with_status(200)
            .with_body(json!({ "id": 9, "email": "z@b.c" }).to_string())
            .create_async()
            .await;

        let user = backend_for(&server).current_user("tok").await.unwrap();

        assert_eq!(user.id, "9");
        assert_eq!(user.email, "z@b.c");
    }

    #[tokio::test]
    async fn authenticated_401_is_session_expired() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/auth/me")
            .with_status(401)
            .with_body(json!({ "detail": "Token expired" }).to_string())
            .create_async()
            .await;

        let err = backend_for(&server).current_user("old").await.unwrap_err();

        assert_eq!(err, CoreError::SessionExpired);
    }
}

mod http_portfolios {
    use super::*;

    #[tokio::test]
    async fn list_sends_bearer_and_normalizes() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/credentials")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body(
                json!({ "data": { "credentials": [
                    { "id": 1, "label": "Main", "exchange": "binance" },
                    { "id": 2, "label": "Alt", "exchange": "bybit" }
                ] } })
                .to_string(),
            )
            .create_async()
            .await;

        let list = backend_for(&server).list_portfolios("tok-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "1");
        assert_eq!(list[1].exchange, "bybit");
    }

    #[tokio::test]
    async fn create_posts_new_portfolio() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/credentials")
            .match_body(Matcher::PartialJson(json!({
                "label": "Main",
                "api_key": "key",
                "secret": "secret",
                "exchange": "binance"
            })))
            .with_status(201)
            .with_body(json!({ "success": true }).to_string())
            .create_async()
            .await;

        backend_for(&server)
            .create_portfolio("tok", &NewPortfolio::new("Main", "key", "secret", "binance"))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_rejection_without_message_is_generic() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/credentials")
            .with_status(500)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let err = backend_for(&server)
            .create_portfolio("tok", &NewPortfolio::new("Main", "key", "secret", "binance"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), GENERIC_REMOTE_MESSAGE);
        assert!(matches!(err, CoreError::Remote { status: Some(500), .. }));
    }

    #[tokio::test]
    async fn success_false_is_remote_error() {
        let mut server = Server::new_async().await;
        server
            .mock("PATCH", "/api/credentials/7")
            .match_body(Matcher::Json(json!({ "label": "Renamed" })))
            .with_status(200)
            .with_body(json!({ "success": false, "error": "Label taken" }).to_string())
            .create_async()
            .await;

        let err = backend_for(&server)
            .update_portfolio("tok", "7", &PortfolioUpdate::label("Renamed"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Label taken");
    }

    #[tokio::test]
    async fn delete_hits_item_route() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/credentials/7")
            .with_status(204)
            .create_async()
            .await;

        backend_for(&server).delete_portfolio("tok", "7").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sync_reports_timestamp_when_present() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/credentials/7/sync")
            .with_status(200)
            .with_body(json!({ "data": { "last_sync_at": "2025-03-04T05:06:07Z" } }).to_string())
            .create_async()
            .await;

        let at = backend_for(&server).sync_portfolio("tok", "7").await.unwrap();

        assert_eq!(at.unwrap().to_rfc3339(), "2025-03-04T05:06:07+00:00");
    }

    #[tokio::test]
    async fn sync_with_unexpected_body_still_succeeds() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/credentials/7/sync")
            .with_status(202)
            .with_body(json!({ "message": "queued" }).to_string())
            .create_async()
            .await;

        let at = backend_for(&server).sync_portfolio("tok", "7").await.unwrap();

        assert!(at.is_none());
    }
}

mod http_series {
    use super::*;

    #[tokio::test]
    async fn equity_scoped_query_params() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/equity/daily")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("credential_id".into(), "p1".into()),
                Matcher::UrlEncoded("days".into(), "7".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({ "data": [
                    { "date": "2025-03-01", "equity_usd": "100.5", "equity_btc": "0.001" },
                    { "date": "2025-03-02", "equity_usd": 101, "equity_btc": 0.001 }
                ] })
                .to_string(),
            )
            .create_async()
            .await;

        let query = SeriesQuery::new(Some("p1".into()), Period::Week);
        let points = backend_for(&server)
            .equity_series("tok", &query)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].equity_usd, 100.5);
        assert_eq!(points[1].date, d(2));
    }

    #[tokio::test]
    async fn wrapped_daily_series_unwrapped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/funding/daily")
            .with_status(200)
            .with_body(json!({ "daily": [{ "date": "2025-03-01", "paid": 1, "received": 2 }] }).to_string())
            .create_async()
            .await;

        let query = SeriesQuery::new(None, Period::All);
        let points = backend_for(&server)
            .funding_series("tok", &query)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(points[0].net(), 1.0);
    }

    #[tokio::test]
    async fn null_data_is_empty_series() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/btc/daily")
            .with_status(200)
            .with_body(json!({ "success": true, "data": null }).to_string())
            .create_async()
            .await;

        let points = backend_for(&server)
            .btc_series("tok", &SeriesQuery::new(None, Period::All))
            .await
            .unwrap();

        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn fee_summary_parses_decimal_strings() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/fees/summary")
            .match_query(Matcher::UrlEncoded("credential_id".into(), "p1".into()))
            .with_status(200)
            .with_body(
                json!({ "data": {
                    "maker_total": "30.00",
                    "taker_total": "70.00",
                    "maker_percent": 30.0,
                    "taker_percent": 70.0
                } })
                .to_string(),
            )
            .create_async()
            .await;

        let totals = backend_for(&server)
            .fee_summary("tok", Some("p1"))
            .await
            .unwrap();

        assert_eq!(
            totals,
            FeeTotals {
                maker_total: 30.0,
                taker_total: 70.0,
                maker_percent: 30.0,
                taker_percent: 70.0,
            }
        );
    }

    #[tokio::test]
    async fn fee_summary_rejects_malformed_totals() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/fees/summary")
            .with_status(200)
            .with_body(json!({ "maker_total": "n/a", "taker_total": "1" }).to_string())
            .create_async()
            .await;

        let err = backend_for(&server).fee_summary("tok", None).await.unwrap_err();

        assert!(matches!(err, CoreError::Deserialization(_)));
    }

    #[tokio::test]
    async fn period_fees_sends_period() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/fees/period")
            .match_query(Matcher::UrlEncoded("period".into(), "month".into()))
            .with_status(200)
            .with_body(json!({ "data": { "total_fees": "20.00" } }).to_string())
            .create_async()
            .await;

        let total = backend_for(&server)
            .period_fees("tok", None, Period::Month)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(total, 20.0);
    }

    #[tokio::test]
    async fn funding_totals_per_window() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/funding/summary")
            .with_status(200)
            .with_body(
                json!({ "data": {
                    "today": { "paid": "0.5", "received": "1.0" },
                    "all": { "paid": 10, "received": 25 }
                } })
                .to_string(),
            )
            .create_async()
            .await;

        let totals = backend_for(&server)
            .funding_totals("tok", None)
            .await
            .unwrap();

        assert_eq!(totals.get(Period::Today).net(), 0.5);
        assert_eq!(totals.get(Period::All).net(), 15.0);
        assert_eq!(totals.get(Period::Week).net(), 0.0);
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let backend =
            HttpBackend::new(&ClientSettings::default().with_base_url("http://127.0.0.1:1"));
        let err = backend.list_portfolios("tok").await.unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let settings = ClientSettings {
            base_url: "http://example.com/".into(),
            ..ClientSettings::default()
        };
        assert_eq!(HttpBackend::new(&settings).base_url(), "http://example.com");
    }
}

// ═══════════════════════════════════════════════════════════════════
// InMemoryBackend
// ═══════════════════════════════════════════════════════════════════

mod memory_backend {
    use super::*;

    async fn signed_up(backend: &InMemoryBackend) -> String {
        backend.register("a@b.c", "pw").await.unwrap().token
    }

    #[tokio::test]
    async fn register_then_login() {
        let backend = InMemoryBackend::new();
        let first = signed_up(&backend).await;

        let grant = backend.login("a@b.c", "pw").await.unwrap();

        assert_ne!(grant.token, first);
        assert_eq!(grant.user.email, "a@b.c");
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let backend = InMemoryBackend::new();
        signed_up(&backend).await;

        let err = backend.login("a@b.c", "nope").await.unwrap_err();

        assert_eq!(err.to_string(), "Invalid email or password");
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let backend = InMemoryBackend::new();
        signed_up(&backend).await;

        let err = backend.register("a@b.c", "pw").await.unwrap_err();

        assert!(matches!(err, CoreError::Remote { status: Some(409), .. }));
    }

    #[tokio::test]
    async fn unknown_token_is_session_expired() {
        let backend = InMemoryBackend::new();
        let token = signed_up(&backend).await;
        backend.revoke_token(&token);

        assert_eq!(
            backend.list_portfolios(&token).await.unwrap_err(),
            CoreError::SessionExpired
        );
    }

    #[tokio::test]
    async fn create_assigns_id_and_masks_key() {
        let backend = InMemoryBackend::new();
        let token = signed_up(&backend).await;

        backend
            .create_portfolio(
                &token,
                &NewPortfolio::new("Main", "abcd1234efgh5678", "s", "binance"),
            )
            .await
            .unwrap();
        let list = backend.list_portfolios(&token).await.unwrap();

        assert_eq!(list.len(), 1);
        assert!(!list[0].id.is_empty());
        assert_eq!(list[0].masked_api_key.as_deref(), Some("abcd****5678"));
    }

    #[tokio::test]
    async fn same_key_twice_rejected() {
        let backend = InMemoryBackend::new();
        let token = signed_up(&backend).await;
        let new = NewPortfolio::new("Main", "abcd1234efgh5678", "s", "binance");
        backend.create_portfolio(&token, &new).await.unwrap();

        let err = backend.create_portfolio(&token, &new).await.unwrap_err();

        assert_eq!(err.to_string(), "This API key is already linked");
    }

    #[tokio::test]
    async fn update_and_delete_unknown_id() {
        let backend = InMemoryBackend::new();
        let token = signed_up(&backend).await;

        let update = backend
            .update_portfolio(&token, "ghost", &PortfolioUpdate::label("x"))
            .await;
        let delete = backend.delete_portfolio(&token, "ghost").await;

        assert!(matches!(update, Err(CoreError::Remote { status: Some(404), .. })));
        assert!(matches!(delete, Err(CoreError::Remote { status: Some(404), .. })));
    }

    #[tokio::test]
    async fn series_filtered_by_period_window() {
        let backend = InMemoryBackend::new();
        let token = signed_up(&backend).await;
        backend
            .create_portfolio(&token, &NewPortfolio::new("Main", "k1", "s", "binance"))
            .await
            .unwrap();
        let id = backend.list_portfolios(&token).await.unwrap()[0].id.clone();
        let equity: Vec<EquityPoint> = (1..=10)
            .map(|day| EquityPoint {
                date: d(day),
                equity_usd: f64::from(day),
                equity_btc: 0.0,
            })
            .collect();
        backend.set_data(
            &id,
            PortfolioData {
                equity,
                period_fees: HashMap::from([(Period::Week, 4.0)]),
                ..PortfolioData::default()
            },
        );

        let week = backend
            .equity_series(&token, &SeriesQuery::new(Some(id.clone()), Period::Week))
            .await
            .unwrap();
        let all = backend
            .equity_series(&token, &SeriesQuery::new(None, Period::All))
            .await
            .unwrap();
        let fees = backend
            .period_fees(&token, Some(&id), Period::Week)
            .await
            .unwrap();

        assert_eq!(week.len(), 7);
        assert_eq!(week[0].date, d(4));
        assert_eq!(all.len(), 10);
        assert_eq!(fees, 4.0);
    }

    #[tokio::test]
    async fn foreign_portfolio_not_found() {
        let backend = InMemoryBackend::new();
        let token = signed_up(&backend).await;

        let err = backend
            .fee_summary(&token, Some("someone-elses"))
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Remote { status: Some(404), .. }));
    }
}
