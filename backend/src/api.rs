use crate::db;
use crate::errors::{internal, ApiError};
use crate::program;
use crate::relayer;
use crate::state::AppState;
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use payroll_core::devnet::{paths, AccountBalance, CompanyEmployees, EncryptedView, FaucetRequest, API_KEY_HEADER};
use payroll_core::types::{
    Address, CompanyInfo, EmployeeInfo, EncryptRequest, EncryptResponse, NetworkInfo, TxHash, TxReceipt,
    TxSubmission, TxSubmitted,
};
use tower_http::cors::{Any, CorsLayer};

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(paths::ENCRYPT, post(encrypt))
        .route(paths::TRANSACTIONS, post(submit_transaction))
        .route(paths::FAUCET, post(faucet))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route(paths::HEALTH, get(|| async { "ok" }))
        .route(paths::NETWORK, get(network))
        .route("/api/v1/transactions/:hash", get(get_transaction))
        .route("/api/v1/accounts/:address", get(get_account))
        .route("/api/v1/companies/:company", get(get_company))
        .route("/api/v1/companies/:company/payroll", get(get_company_payroll))
        .route("/api/v1/companies/:company/employees", get(list_employees))
        .route("/api/v1/companies/:company/employees/:employee", get(get_employee))
        .route("/api/v1/companies/:company/employees/:employee/salary", get(get_employee_salary))
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(provided_key) = headers.get(API_KEY_HEADER) {
        if provided_key.as_bytes() == state.api_key.as_bytes() {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!(path = %request.uri().path(), "unauthorized access attempt");
    Err(StatusCode::UNAUTHORIZED)
}

fn address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid address '{raw}': {e}")))
}

async fn network(State(state): State<AppState>) -> Json<NetworkInfo> {
    Json(state.network.clone())
}

async fn encrypt(State(state): State<AppState>, Json(req): Json<EncryptRequest>) -> Result<Json<EncryptResponse>, ApiError> {
    relayer::encrypt(&state, req).await.map(Json)
}

async fn submit_transaction(
    State(state): State<AppState>,
    Json(req): Json<TxSubmission>,
) -> Result<Json<TxSubmitted>, ApiError> {
    let receipt = program::mine(&state, req).await?;
    Ok(Json(TxSubmitted { tx_hash: receipt.tx_hash }))
}

async fn get_transaction(State(state): State<AppState>, Path(hash): Path<String>) -> Result<Json<TxReceipt>, ApiError> {
    let tx_hash: TxHash = hash
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid tx hash: {e}")))?;

    db::transaction(&state.db, &tx_hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("transaction not found".to_string()))
}

async fn faucet(State(state): State<AppState>, Json(req): Json<FaucetRequest>) -> Result<Json<AccountBalance>, ApiError> {
    let _writer = state.writer.lock().await;

    let current = db::balance(&state.db, &req.address).await?;
    let balance = current
        .checked_add(req.amount)
        .ok_or_else(|| ApiError::BadRequest("balance overflow".to_string()))?;
    db::set_balance(&state.db, &req.address, balance).await?;

    tracing::info!(address = %req.address, amount = req.amount, balance, "account funded");
    Ok(Json(AccountBalance { address: req.address, balance }))
}

async fn get_account(State(state): State<AppState>, Path(raw): Path<String>) -> Result<Json<AccountBalance>, ApiError> {
    let address = address(&raw)?;
    let balance = db::balance(&state.db, &address).await?;
    Ok(Json(AccountBalance { address, balance }))
}

async fn get_company(State(state): State<AppState>, Path(raw): Path<String>) -> Result<Json<CompanyInfo>, ApiError> {
    let company = address(&raw)?;
    let Some(row) = db::company(&state.db, &company).await? else {
        return Err(ApiError::NotFound("company not registered".to_string()));
    };

    Ok(Json(CompanyInfo {
        name: row.name,
        employee_count: row.employee_count,
    }))
}

/// Handle of the encrypted running total; only the company can decrypt it.
async fn get_company_payroll(State(state): State<AppState>, Path(raw): Path<String>) -> Result<Json<EncryptedView>, ApiError> {
    let company = address(&raw)?;
    let Some(row) = db::company(&state.db, &company).await? else {
        return Err(ApiError::NotFound("company not registered".to_string()));
    };

    Ok(Json(EncryptedView { handle: row.payroll_handle }))
}

async fn list_employees(State(state): State<AppState>, Path(raw): Path<String>) -> Result<Json<CompanyEmployees>, ApiError> {
    let company = address(&raw)?;
    if db::company(&state.db, &company).await?.is_none() {
        return Err(ApiError::NotFound("company not registered".to_string()));
    }

    let employees = db::company_employees(&state.db, &company).await?;
    Ok(Json(CompanyEmployees { company, employees }))
}

async fn get_employee(
    State(state): State<AppState>,
    Path((company, employee)): Path<(String, String)>,
) -> Result<Json<EmployeeInfo>, ApiError> {
    let company = address(&company)?;
    let employee = address(&employee)?;

    let Some(row) = db::employee(&state.db, &company, &employee).await? else {
        return Err(ApiError::NotFound("employee not found".to_string()));
    };

    Ok(Json(EmployeeInfo {
        address: employee,
        is_active: row.is_active,
        last_payment_date: row.last_payment_date,
    }))
}

async fn get_employee_salary(
    State(state): State<AppState>,
    Path((company, employee)): Path<(String, String)>,
) -> Result<Json<EncryptedView>, ApiError> {
    let company = address(&company)?;
    let employee = address(&employee)?;

    let Some(row) = db::employee(&state.db, &company, &employee).await? else {
        return Err(ApiError::NotFound("employee not found".to_string()));
    };

    Ok(Json(EncryptedView { handle: row.salary_handle() }))
}

/// Bind and serve until ctrl-c.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<(), ApiError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(internal)
}
