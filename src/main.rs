//! Application entrypoint and state wiring.

mod anomaly;
mod forecast;
mod ledger;
mod risk;
mod routes;
mod storage;
mod store;

use axum::{
    routing::{get, post},
    Router,
};
use ledger::Blockchain;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use store::{RecordStore, WalletStore};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Shared application state passed to Axum handlers.
///
/// The chain is owned process-wide for the whole lifetime of the service;
/// handlers serialize every mutation through the mutex.
#[derive(Clone)]
pub struct AppState {
    pub chain: Arc<Mutex<Blockchain>>,
    pub wallets: Arc<Mutex<WalletStore>>,
    pub records: Arc<Mutex<RecordStore>>,
    pub data_dir: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // 0) dirs
    let data_dir = PathBuf::from(
        env::var("FINLEDGER_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
    );
    storage::ensure_dir(&data_dir).expect("create data dir");

    let difficulty = env::var("FINLEDGER_DIFFICULTY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(ledger::DEFAULT_DIFFICULTY);

    // 1) reload the chain from disk (or start fresh and persist genesis)
    let blocks = storage::load_blocks(&data_dir).expect("load blocks");
    let chain = if blocks.is_empty() {
        let chain = Blockchain::new(difficulty).expect("create genesis block");
        storage::save_block(&data_dir, chain.tip()).expect("persist genesis block");
        tracing::info!("initialized a new chain");
        chain
    } else {
        let chain = Blockchain::with_blocks(blocks, difficulty).expect("rebuild chain");
        let findings = chain.validate();
        if findings.is_empty() {
            tracing::info!(blocks = chain.len(), "chain reloaded from disk");
        } else {
            // The chain is an audit trail, not funds custody: keep serving,
            // but make the tampering loudly visible.
            for finding in &findings {
                tracing::warn!(%finding, "chain validation finding on reload");
            }
        }
        chain
    };

    // 2) shared state
    let state = AppState {
        chain: Arc::new(Mutex::new(chain)),
        wallets: Arc::new(Mutex::new(WalletStore::default())),
        records: Arc::new(Mutex::new(RecordStore::default())),
        data_dir,
    };

    // 3) router
    let app = Router::new()
        .route("/ledger/transaction", post(routes::record_transaction))
        .route("/ledger/mine", post(routes::mine))
        .route("/ledger/info", get(routes::ledger_info))
        .route("/ledger/validate", get(routes::validate_chain))
        .route("/ledger/balance/:address", get(routes::balance))
        .route("/ledger/history/:address", get(routes::history))
        .route("/wallet", post(routes::create_wallet))
        .route("/wallet/transfer", post(routes::transfer))
        .route("/wallet/:address", get(routes::wallet_info))
        .route("/expenses", post(routes::add_expense))
        .route("/expenses/:user_id", get(routes::list_expenses))
        .route("/income", post(routes::add_income))
        .route("/debts", post(routes::add_debt))
        .route("/fraud/evaluate", post(routes::evaluate_fraud))
        .route("/prediction/shortfall/:user_id", get(routes::shortfall))
        .route("/prediction/trend/:user_id", get(routes::trend))
        .route("/health", get(routes::health))
        .route("/version", get(routes::version))
        .with_state(state);

    // 4) serve
    let addr: SocketAddr = env::var("FINLEDGER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()
        .expect("parse bind address");
    tracing::info!(%addr, "listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await.unwrap(), app)
        .await
        .unwrap();
}
