use crate::errors::Result;
use crate::middleware::TokenAuth;
use crate::models::{parse_body, BalanceQuery, BalanceResponse, DataRequest};
use actix_web::{web, HttpResponse};
use ledger_core::{Ledger, Transaction, TransactionOutcome};
use serde_json::json;

pub fn configure_routes(cfg: &mut web::ServiceConfig, auth: TokenAuth) {
    cfg.route("/ping", web::get().to(ping))
        .route("/metrics", web::get().to(metrics_endpoint))
        .service(
            web::scope("/v1")
                .wrap(auth)
                // Accounts
                .service(
                    web::resource("/accounts")
                        .route(web::post().to(create_account))
                        .route(web::get().to(search_accounts))
                        .route(web::put().to(update_account)),
                )
                .service(web::resource("/accounts/_search").route(web::post().to(search_accounts)))
                .service(web::resource("/accounts/{id}/balance").route(web::get().to(get_balance)))
                .service(web::resource("/accounts/{id}").route(web::get().to(get_account)))
                // Transactions
                .service(
                    web::resource("/transactions")
                        .route(web::post().to(make_transaction))
                        .route(web::get().to(search_transactions))
                        .route(web::put().to(update_transaction)),
                )
                .service(
                    web::resource("/transactions/_search")
                        .route(web::post().to(search_transactions)),
                ),
        );
}

async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ping": "pong" }))
}

async fn metrics_endpoint(ledger: web::Data<Ledger>) -> Result<HttpResponse> {
    let body = match ledger.metrics() {
        Some(metrics) => metrics
            .render()
            .map_err(|e| ledger_core::Error::Internal(format!("Failed to encode metrics: {}", e)))?,
        None => String::new(),
    };

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

// Accounts

async fn create_account(ledger: web::Data<Ledger>, body: web::Bytes) -> Result<HttpResponse> {
    let request: DataRequest = parse_body(&body)?;
    ledger.create_account(&request.id, request.data).await?;
    Ok(HttpResponse::Created().finish())
}

async fn update_account(ledger: web::Data<Ledger>, body: web::Bytes) -> Result<HttpResponse> {
    let request: DataRequest = parse_body(&body)?;
    ledger.update_account(&request.id, request.data).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn get_account(ledger: web::Data<Ledger>, path: web::Path<String>) -> Result<HttpResponse> {
    let account = ledger.get_account(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(account))
}

async fn get_balance(
    ledger: web::Data<Ledger>,
    path: web::Path<String>,
    query: web::Query<BalanceQuery>,
) -> Result<HttpResponse> {
    let account_id = path.into_inner();
    let on = query.cutoff()?;
    let balance = ledger.get_balance_on_time(&account_id, on).await?;

    Ok(HttpResponse::Ok().json(BalanceResponse {
        account_id,
        on,
        balance,
    }))
}

async fn search_accounts(ledger: web::Data<Ledger>, body: web::Bytes) -> Result<HttpResponse> {
    search(&ledger, "accounts", &body).await
}

// Transactions

async fn make_transaction(ledger: web::Data<Ledger>, body: web::Bytes) -> Result<HttpResponse> {
    let txn: Transaction = parse_body(&body)?;

    Ok(match ledger.make_transaction(txn).await? {
        TransactionOutcome::Created => HttpResponse::Created().finish(),
        TransactionOutcome::Duplicate => HttpResponse::Accepted().finish(),
        TransactionOutcome::Conflict => HttpResponse::Conflict().finish(),
    })
}

async fn update_transaction(ledger: web::Data<Ledger>, body: web::Bytes) -> Result<HttpResponse> {
    let request: DataRequest = parse_body(&body)?;
    ledger.update_transaction(&request.id, request.data).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn search_transactions(ledger: web::Data<Ledger>, body: web::Bytes) -> Result<HttpResponse> {
    search(&ledger, "transactions", &body).await
}

async fn search(ledger: &Ledger, namespace: &str, body: &[u8]) -> Result<HttpResponse> {
    let raw = std::str::from_utf8(body)
        .map_err(|e| ledger_core::Error::InvalidQuery(format!("Query is not UTF-8: {}", e)))?;

    let results = ledger.search(namespace)?.query(raw).await?;
    Ok(HttpResponse::Ok().json(results))
}
