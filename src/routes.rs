//! HTTP routes over the ledger, wallets and the heuristic modules.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::anomaly::{self, Assessment};
use crate::forecast::{self, ShortfallReport, TrendReport};
use crate::ledger::{now_unix, AnnotatedEntry, EntryDraft, LedgerError};
use crate::risk::{self, Action};
use crate::store::{Debt, Expense, IncomeSource, WalletError};
use crate::AppState;

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}

fn ledger_status(e: LedgerError) -> (StatusCode, String) {
    match e {
        // Retryable: the nonce budget ran out before the difficulty was met.
        LedgerError::MiningExhausted { .. } => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        LedgerError::Serialize(_) => internal(e),
    }
}

fn wallet_status(e: WalletError) -> (StatusCode, String) {
    match e {
        WalletError::AlreadyExists(_)
        | WalletError::NonPositiveAmount
        | WalletError::InsufficientBalance { .. } => (StatusCode::BAD_REQUEST, e.to_string()),
        WalletError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// POST /ledger/transaction
#[derive(Deserialize)]
pub struct RecordTransactionInput {
    pub from: String,
    pub to: String,
    pub amount: f64,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>, // allow client-provided, else server fills
}

#[derive(Serialize)]
pub struct RecordTransactionOutput {
    pub blockchain_hash: String,
    pub pending_count: usize,
    pub message: &'static str,
}

pub async fn record_transaction(
    State(state): State<AppState>,
    Json(payload): Json<RecordTransactionInput>,
) -> Result<(StatusCode, Json<RecordTransactionOutput>), (StatusCode, String)> {
    let draft = EntryDraft {
        from: payload.from,
        to: payload.to,
        amount: payload.amount,
        timestamp: payload.timestamp.unwrap_or_else(now_unix),
        memo: payload.memo,
    };

    let mut chain = state.chain.lock().unwrap();
    let hash = chain.create_transaction(draft).map_err(ledger_status)?;
    let pending_count = chain.pending().len();

    Ok((
        StatusCode::CREATED,
        Json(RecordTransactionOutput {
            blockchain_hash: hash,
            pending_count,
            message: "transaction recorded",
        }),
    ))
}

/// POST /ledger/mine
#[derive(Deserialize)]
pub struct MineInput {
    pub miner_address: String,
}

#[derive(Serialize)]
pub struct MineOutput {
    pub block_hash: String,
    pub chain_length: usize,
}

pub async fn mine(
    State(state): State<AppState>,
    Json(payload): Json<MineInput>,
) -> Result<(StatusCode, Json<MineOutput>), (StatusCode, String)> {
    // Seal -> mine -> append -> reseed happens under one exclusive lock.
    let mut chain = state.chain.lock().unwrap();
    let block_hash = chain
        .mine_pending_transactions(&payload.miner_address)
        .map_err(ledger_status)?;

    if let Err(e) = crate::storage::save_block(&state.data_dir, chain.tip()) {
        tracing::error!(error = %e, "failed to persist mined block");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "persist failed".into()));
    }

    Ok((
        StatusCode::CREATED,
        Json(MineOutput {
            block_hash,
            chain_length: chain.len(),
        }),
    ))
}

/// GET /ledger/info
#[derive(Serialize)]
pub struct LedgerInfo {
    pub chain_length: usize,
    pub difficulty: usize,
    pub is_valid: bool,
    pub network_status: &'static str,
}

pub async fn ledger_info(State(state): State<AppState>) -> Json<LedgerInfo> {
    let chain = state.chain.lock().unwrap();
    Json(LedgerInfo {
        chain_length: chain.len(),
        difficulty: chain.difficulty(),
        is_valid: chain.is_valid(),
        network_status: "Simulated Local Testnet",
    })
}

/// GET /ledger/validate: recheck every digest and linkage; returns { ok, errors[] }
#[derive(Serialize)]
pub struct ValidateResp {
    pub ok: bool,
    pub errors: Vec<String>,
}

pub async fn validate_chain(State(state): State<AppState>) -> Json<ValidateResp> {
    let chain = state.chain.lock().unwrap();
    let errors = chain.validate();
    Json(ValidateResp {
        ok: errors.is_empty(),
        errors,
    })
}

/// GET /ledger/balance/:address
#[derive(Serialize)]
pub struct BalanceResp {
    pub address: String,
    pub balance: f64,
}

pub async fn balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<BalanceResp> {
    let chain = state.chain.lock().unwrap();
    let balance = chain.balance_of(&address);
    Json(BalanceResp { address, balance })
}

/// GET /ledger/history/:address
#[derive(Serialize)]
pub struct HistoryResp {
    pub transactions: Vec<AnnotatedEntry>,
    pub blockchain_valid: bool,
}

pub async fn history(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<HistoryResp> {
    let chain = state.chain.lock().unwrap();
    Json(HistoryResp {
        transactions: chain.history_of(&address),
        blockchain_valid: chain.is_valid(),
    })
}

/// POST /wallet
#[derive(Deserialize)]
pub struct CreateWalletInput {
    pub user_id: String,
}

#[derive(Serialize)]
pub struct CreateWalletOutput {
    pub wallet_address: String,
    pub balance: f64,
}

pub async fn create_wallet(
    State(state): State<AppState>,
    Json(payload): Json<CreateWalletInput>,
) -> Result<(StatusCode, Json<CreateWalletOutput>), (StatusCode, String)> {
    let mut wallets = state.wallets.lock().unwrap();
    let wallet = wallets.create(&payload.user_id).map_err(wallet_status)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateWalletOutput {
            wallet_address: wallet.address.clone(),
            balance: wallet.balance,
        }),
    ))
}

/// GET /wallet/:address
#[derive(Serialize)]
pub struct WalletInfo {
    pub user_id: String,
    pub address: String,
    pub balance: f64,
    pub transaction_history: Vec<AnnotatedEntry>,
}

pub async fn wallet_info(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<WalletInfo>, (StatusCode, String)> {
    let wallets = state.wallets.lock().unwrap();
    let wallet = wallets
        .get(&address)
        .ok_or((StatusCode::NOT_FOUND, "wallet not found".to_string()))?;

    let chain = state.chain.lock().unwrap();
    Ok(Json(WalletInfo {
        user_id: wallet.user_id.clone(),
        address: wallet.address.clone(),
        balance: wallet.balance,
        transaction_history: chain.history_of(&address),
    }))
}

/// POST /wallet/transfer
#[derive(Deserialize)]
pub struct TransferInput {
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct TransferOutput {
    pub status: &'static str,
    pub from_balance: f64,
    pub to_balance: f64,
    pub blockchain_hash: String,
}

pub async fn transfer(
    State(state): State<AppState>,
    Json(payload): Json<TransferInput>,
) -> Result<Response, (StatusCode, String)> {
    if payload.amount <= 0.0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "amount must be greater than 0".into(),
        ));
    }

    // 1) Risk-check against the sender's balance and spending history.
    let decision = {
        let wallets = state.wallets.lock().unwrap();
        let from_wallet = wallets
            .get(&payload.from_address)
            .ok_or((StatusCode::NOT_FOUND, "your wallet not found".to_string()))?;

        let records = state.records.lock().unwrap();
        risk::evaluate(
            from_wallet.balance,
            payload.amount,
            "transfer",
            records.expenses_of(&from_wallet.user_id),
            now_unix(),
        )
    };

    match decision.action {
        Action::Block => {
            tracing::warn!(from = %payload.from_address, amount = payload.amount, "transfer blocked");
            return Err((StatusCode::FORBIDDEN, decision.reason));
        }
        Action::VerifyViaEmail => {
            return Ok((StatusCode::ACCEPTED, Json(decision)).into_response());
        }
        Action::Allow => {}
    }

    // 2) Move the balance; conservation is enforced here, not by the ledger.
    let (from_balance, to_balance) = {
        let mut wallets = state.wallets.lock().unwrap();
        wallets
            .transfer(&payload.from_address, &payload.to_address, payload.amount)
            .map_err(wallet_status)?
    };

    // 3) Record the transfer as an audit entry.
    let draft = EntryDraft {
        from: payload.from_address,
        to: payload.to_address,
        amount: payload.amount,
        timestamp: now_unix(),
        memo: Some(
            payload
                .description
                .unwrap_or_else(|| "P2P Transfer".to_string()),
        ),
    };
    let blockchain_hash = {
        let mut chain = state.chain.lock().unwrap();
        chain.create_transaction(draft).map_err(ledger_status)?
    };

    Ok((
        StatusCode::CREATED,
        Json(TransferOutput {
            status: "Transfer successful",
            from_balance,
            to_balance,
            blockchain_hash,
        }),
    )
        .into_response())
}

/// POST /expenses
#[derive(Deserialize)]
pub struct AddExpenseInput {
    pub user_id: String,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

pub async fn add_expense(
    State(state): State<AppState>,
    Json(payload): Json<AddExpenseInput>,
) -> (StatusCode, Json<Expense>) {
    let expense = Expense {
        amount: payload.amount,
        category: payload.category,
        timestamp: payload.timestamp.unwrap_or_else(now_unix),
    };
    let mut records = state.records.lock().unwrap();
    records.add_expense(&payload.user_id, expense.clone());
    (StatusCode::CREATED, Json(expense))
}

/// GET /expenses/:user_id
pub async fn list_expenses(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<Expense>> {
    let records = state.records.lock().unwrap();
    Json(records.expenses_of(&user_id).to_vec())
}

/// POST /income
#[derive(Deserialize)]
pub struct AddIncomeInput {
    pub user_id: String,
    #[serde(flatten)]
    pub income: IncomeSource,
}

pub async fn add_income(
    State(state): State<AppState>,
    Json(payload): Json<AddIncomeInput>,
) -> (StatusCode, Json<IncomeSource>) {
    let mut records = state.records.lock().unwrap();
    records.add_income(&payload.user_id, payload.income.clone());
    (StatusCode::CREATED, Json(payload.income))
}

/// POST /debts
#[derive(Deserialize)]
pub struct AddDebtInput {
    pub user_id: String,
    #[serde(flatten)]
    pub debt: Debt,
}

pub async fn add_debt(
    State(state): State<AppState>,
    Json(payload): Json<AddDebtInput>,
) -> (StatusCode, Json<Debt>) {
    let mut records = state.records.lock().unwrap();
    records.add_debt(&payload.user_id, payload.debt.clone());
    (StatusCode::CREATED, Json(payload.debt))
}

/// POST /fraud/evaluate
#[derive(Deserialize)]
pub struct EvaluateFraudInput {
    pub user_id: String,
    pub amount: f64,
    pub category: String,
}

pub async fn evaluate_fraud(
    State(state): State<AppState>,
    Json(payload): Json<EvaluateFraudInput>,
) -> Json<Assessment> {
    let records = state.records.lock().unwrap();
    let assessment = anomaly::detect(
        records.expenses_of(&payload.user_id),
        payload.amount,
        &payload.category,
        now_unix(),
    );
    Json(assessment)
}

/// GET /prediction/shortfall/:user_id
pub async fn shortfall(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<ShortfallReport> {
    let records = state.records.lock().unwrap();
    Json(forecast::predict(
        records.incomes_of(&user_id),
        records.debts_of(&user_id),
        records.expenses_of(&user_id),
        now_unix(),
    ))
}

/// GET /prediction/trend/:user_id?months=3
#[derive(Deserialize)]
pub struct TrendParams {
    #[serde(default)]
    pub months: Option<u32>,
}

pub async fn trend(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<TrendParams>,
) -> Json<TrendReport> {
    let months = params.months.unwrap_or(3).clamp(1, 12);
    let baseline = {
        let records = state.records.lock().unwrap();
        forecast::predict(
            records.incomes_of(&user_id),
            records.debts_of(&user_id),
            records.expenses_of(&user_id),
            now_unix(),
        )
    };
    Json(forecast::trend(baseline, months))
}

/// GET /health
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET /version
#[derive(Serialize)]
pub struct Version {
    pub version: &'static str,
    pub git_sha: Option<&'static str>,
}

pub async fn version() -> Json<Version> {
    Json(Version {
        version: env!("CARGO_PKG_VERSION"),
        git_sha: option_env!("GIT_SHA"),
    })
}
