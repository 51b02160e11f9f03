use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use levy_auth::{JwtClaims, PrincipalId, Role};
use levy_infra::{BillingConfig, BillingServices};
use reqwest::StatusCode;
use serde_json::{Value, json};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let billing = Arc::new(BillingServices::new(BillingConfig::default()));
        let app = levy_api::app::build_app(SECRET.to_string(), billing);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/v1"),
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap();
        read(res).await
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url(path)).bearer_auth(token).json(&body).send().await.unwrap();
        read(res).await
    }

    async fn put(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.put(self.url(path)).bearer_auth(token).json(&body).send().await.unwrap();
        read(res).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read(res: reqwest::Response) -> (StatusCode, Value) {
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn mint_jwt(roles: Vec<Role>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: PrincipalId::new(),
        roles,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn admin() -> String {
    mint_jwt(vec![Role::ADMIN])
}

fn annual_fee(period: u32) -> Value {
    json!({
        "year": 2024,
        "period": period,
        "kind": "ANNUAL_FEE",
        "description": "Annual fee 2024",
        "fee": { "kind": "FLAT", "amount": "1200.00" },
        "issue_date": "2024-01-02",
        "due_date": "2024-02-01",
    })
}

/// Association, one owner with email, and `count` properties.
async fn seed(srv: &TestServer, token: &str, count: u32) {
    let (status, _) = srv
        .put(
            token,
            "/association",
            json!({ "name": "Ängens samfällighetsförening", "bankgiro": "123-4567", "reminder_fee": "60" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, owner) = srv
        .post(token, "/owners", json!({ "name": "Anna Berg", "email": "anna@example.org" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let owner_id = owner["owner_id"].as_str().unwrap().to_string();

    for number in 1..=count {
        let (status, body) = srv
            .post(
                token,
                "/properties",
                json!({
                    "number": number,
                    "designation": format!("Ängen 1:{number}"),
                    "share_ratio": "1",
                    "owner_id": owner_id,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "property {number}: {body}");
    }
}

/// Seed and generate period 1; returns the invoices.
async fn generated(srv: &TestServer, token: &str, count: u32) -> Vec<Value> {
    seed(srv, token, count).await;
    let (status, billing) = srv.post(token, "/billings?generateInvoices=true", annual_fee(1)).await;
    assert_eq!(status, StatusCode::CREATED, "{billing}");
    billing["invoices"].as_array().unwrap().clone()
}

async fn pay(srv: &TestServer, token: &str, invoice_id: &str, amount: &str) -> Value {
    let (status, body) = srv
        .post(
            token,
            &format!("/invoices/{invoice_id}/payments"),
            json!({ "amount": amount, "type": "BANKGIRO", "payment_date": "2024-01-20" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["invoice"].clone()
}

#[tokio::test]
async fn health_is_public_and_v1_requires_a_token() {
    let srv = TestServer::spawn().await;

    let health = srv
        .client
        .get(srv.base_url.trim_end_matches("/v1").to_string() + "/health")
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = srv.client.get(srv.url("/invoices")).bearer_auth("not-a-jwt").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let (status, body) = srv.get(&mint_jwt(vec![Role::TREASURER]), "/whoami").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r == "treasurer"));
}

#[tokio::test]
async fn annual_fee_is_generated_paid_and_not_swept() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 1).await;

    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice["status"], "CREATED");
    assert_eq!(invoice["total_amount"], "1200.00");
    assert_eq!(invoice["invoice_number"], "2024-1");
    let ocr = invoice["ocr"].as_str().unwrap();
    assert!(levy_billing::ocr::is_valid(ocr));

    let id = invoice["id"].as_str().unwrap();
    let paid = pay(&srv, &token, id, "1200.00").await;
    assert_eq!(paid["status"], "PAID");
    assert_eq!(paid["paid_amount"], "1200.00");

    let (status, sweep) = srv.post(&token, "/invoices/mark-overdue?date=2024-03-01", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sweep["count"], 0);

    let (status, by_ocr) = srv.get(&token, &format!("/invoices/by-ocr/{ocr}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_ocr["id"], invoice["id"]);
}

#[tokio::test]
async fn partial_payment_goes_overdue_then_paid() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 1).await;
    let id = invoices[0]["id"].as_str().unwrap();

    assert_eq!(pay(&srv, &token, id, "500.00").await["status"], "PARTIALLY_PAID");

    let (_, sweep) = srv.post(&token, "/invoices/mark-overdue?date=2024-03-01", json!({})).await;
    assert_eq!(sweep["count"], 1);
    let (_, invoice) = srv.get(&token, &format!("/invoices/{id}")).await;
    assert_eq!(invoice["status"], "OVERDUE");

    let (_, second) = srv.post(&token, "/invoices/mark-overdue?date=2024-03-02", json!({})).await;
    assert_eq!(second["count"], 0);

    assert_eq!(pay(&srv, &token, id, "700.00").await["status"], "PAID");

    let (_, payments) = srv.get(&token, &format!("/invoices/{id}/payments")).await;
    assert_eq!(payments["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_payments_and_repeated_generation_are_rejected() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 1).await;
    let id = invoices[0]["id"].as_str().unwrap();

    let (status, body) = srv
        .post(&token, &format!("/invoices/{id}/payments"), json!({ "amount": "0" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = srv.post(&token, "/billings", annual_fee(1)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (_, billings) = srv.get(&token, "/billings").await;
    let billing_id = billings["items"][0]["id"].as_str().unwrap();
    let (status, _) = srv
        .post(&token, &format!("/billings/{billing_id}/generate-invoices"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = srv.get(&token, &format!("/invoices/{}", uuid::Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn reminders_skip_cancelled_invoices() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 2).await;
    let open = invoices[0]["id"].as_str().unwrap();
    let cancelled = invoices[1]["id"].as_str().unwrap();

    let (status, body) = srv
        .post(&token, &format!("/invoices/{cancelled}/cancel"), json!({ "reason": "duplicate" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");

    let (status, report) = srv
        .post(
            &token,
            "/invoices/send-reminders",
            json!({ "invoice_ids": [open, cancelled], "batch_id": "reminders-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["batch_id"], "reminders-1");
    assert_eq!(report["sent"], json!([open]));
    assert_eq!(report["skipped"], json!([cancelled]));
    assert_eq!(report["failed"], json!([]));

    // The batch is deregistered once the request completes.
    let (status, _) = srv.post(&token, "/invoices/batches/reminders-1/cancel", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_returns_a_bundle_with_the_report_header() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 2).await;
    let ids: Vec<&str> = invoices.iter().map(|i| i["id"].as_str().unwrap()).collect();

    let res = srv
        .client
        .post(srv.url("/invoices/export-pdf"))
        .bearer_auth(&token)
        .json(&json!({ "invoice_ids": ids }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let report: Value =
        serde_json::from_str(res.headers()["x-levy-batch-report"].to_str().unwrap()).unwrap();
    assert_eq!(report["exported"].as_array().unwrap().len(), 2);

    let bytes = res.bytes().await.unwrap();
    assert!(!bytes.is_empty());
}

#[tokio::test]
async fn bank_file_import_reports_each_row() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 1).await;
    let ocr = invoices[0]["ocr"].as_str().unwrap();

    let file = format!("ocr;amount;date\n{ocr};1 200,00;2024-01-25\n99999999999;10,00;2024-01-25\n");
    let form = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::text(file).file_name("bank.csv"));
    let res = srv
        .client
        .post(srv.url("/payments/import"))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    let (status, report) = read(res).await;

    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["total"], 2);
    assert_eq!(report["accepted"].as_array().unwrap().len(), 1);
    assert_eq!(report["rejected"][0]["line"], 3);

    let (_, invoice) = srv.get(&token, &format!("/invoices/by-ocr/{ocr}")).await;
    assert_eq!(invoice["status"], "PAID");

    let (_, payments) = srv.get(&token, "/payments?from=2024-01-01&to=2024-01-31&type=BANKGIRO").await;
    assert_eq!(payments["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn roles_limit_what_a_caller_may_do() {
    let srv = TestServer::spawn().await;
    let invoices = generated(&srv, &admin(), 1).await;
    let id = invoices[0]["id"].as_str().unwrap();

    let member = mint_jwt(vec![Role::MEMBER]);
    let (status, _) = srv.get(&member, "/invoices").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = srv
        .post(&member, &format!("/invoices/{id}/payments"), json!({ "amount": "100.00" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let treasurer = mint_jwt(vec![Role::TREASURER]);
    assert_eq!(pay(&srv, &treasurer, id, "100.00").await["status"], "PARTIALLY_PAID");
    let (status, _) = srv.post(&treasurer, "/billings", annual_fee(2)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn derived_statuses_cannot_be_set_directly() {
    let srv = TestServer::spawn().await;
    let token = admin();
    let invoices = generated(&srv, &token, 1).await;
    let id = invoices[0]["id"].as_str().unwrap();

    let (status, body) = srv.put(&token, &format!("/invoices/{id}/status"), json!({ "status": "PAID" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (status, body) = srv.put(&token, &format!("/invoices/{id}/status"), json!({ "status": "SENT" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], true);
}
