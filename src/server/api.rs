//! HTTP handlers and request DTOs.
//!
//! Monetary amounts travel as decimal strings. `symbol_path` segments accept
//! the slash, dashed, and canonical shapes (see `domain::symbol`).

use std::{str::FromStr, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    domain::{
        EngineKind, MarketClass, Side,
        order::{Order, OrderType},
        pool::LiquidityEvent,
        symbol::SymbolConfig,
    },
    engine::{
        book::DepthSnapshot,
        clob::PlaceRequest,
        router::{
            ClobQuoteView, LiquidityResult, MarketView, NewSymbol, SwapQuoteView, TradeResult,
            TradeView,
        },
    },
    error::ValidationError,
    events::{BalanceView, LpPositionView},
    server::{ApiError, ApiResponse, ApiResult, AppState},
    server::auth::{AdminUser, AuthUser},
};

/// Optional per-request deadline from the `x-deadline-ms` header, honored by
/// symbol-lock acquisition.
fn deadline(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("x-deadline-ms")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

// ================================================================================================
// AMM
// ================================================================================================

#[derive(Debug, Deserialize)]
pub struct SwapBody {
    pub symbol: String,
    pub side: i16,
    pub amount_in: Decimal,
    pub min_amount_out: Option<Decimal>,
}

pub async fn swap(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    axum::Json(body): axum::Json<SwapBody>,
) -> ApiResult<TradeResult> {
    let side = Side::from_code(body.side)?;
    let result = state
        .router
        .swap(
            &user.id,
            &body.symbol,
            side,
            body.amount_in,
            body.min_amount_out,
            deadline(&headers),
        )
        .await?;
    Ok(ApiResponse::ok(result))
}

#[derive(Debug, Deserialize)]
pub struct PoolQuoteQuery {
    pub side: i16,
    pub quantity: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
}

/// `GET /api/pool/quote/{symbol_path}` — swap quote from the pool snapshot.
pub async fn pool_quote(
    State(state): State<AppState>,
    Path(symbol_path): Path<String>,
    Query(query): Query<PoolQuoteQuery>,
) -> ApiResult<SwapQuoteView> {
    let side = Side::from_code(query.side)?;
    let view = state
        .router
        .quote_swap(&symbol_path, side, query.quantity, query.quote_amount)
        .await?;
    Ok(ApiResponse::ok(view))
}

#[derive(Debug, Deserialize)]
pub struct AddLiquidityBody {
    pub symbol: String,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
}

pub async fn add_liquidity(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    axum::Json(body): axum::Json<AddLiquidityBody>,
) -> ApiResult<LiquidityResult> {
    let result = state
        .router
        .add_liquidity(
            &user.id,
            &body.symbol,
            body.base_amount,
            body.quote_amount,
            deadline(&headers),
        )
        .await?;
    Ok(ApiResponse::ok(result))
}

#[derive(Debug, Deserialize)]
pub struct RemoveLiquidityBody {
    pub symbol: String,
    pub lp_shares: Decimal,
}

pub async fn remove_liquidity(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    axum::Json(body): axum::Json<RemoveLiquidityBody>,
) -> ApiResult<LiquidityResult> {
    let result = state
        .router
        .remove_liquidity(&user.id, &body.symbol, body.lp_shares, deadline(&headers))
        .await?;
    Ok(ApiResponse::ok(result))
}

#[derive(Debug, Deserialize)]
pub struct LiquidityQuoteQuery {
    pub base_amount: Option<Decimal>,
    pub quote_amount: Option<Decimal>,
}

#[derive(Debug, serde::Serialize)]
pub struct LiquidityQuoteView {
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
}

/// Required counterpart for a one-sided deposit at the current pool ratio.
pub async fn quote_liquidity(
    State(state): State<AppState>,
    Path(symbol_path): Path<String>,
    Query(query): Query<LiquidityQuoteQuery>,
) -> ApiResult<LiquidityQuoteView> {
    let (base_amount, quote_amount) = state
        .router
        .quote_liquidity(&symbol_path, query.base_amount, query.quote_amount)
        .await?;
    Ok(ApiResponse::ok(LiquidityQuoteView {
        base_amount,
        quote_amount,
    }))
}

pub async fn lp_position(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(symbol_path): Path<String>,
) -> ApiResult<Option<LpPositionView>> {
    let view = state.router.lp_position(&user.id, &symbol_path).await?;
    Ok(ApiResponse::ok(view))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub async fn lp_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(symbol_path): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<LiquidityEvent>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let events = state
        .router
        .lp_history(&user.id, &symbol_path, limit)
        .await?;
    Ok(ApiResponse::ok(events))
}

// ================================================================================================
// CLOB
// ================================================================================================

#[derive(Debug, Deserialize)]
pub struct PlaceOrderBody {
    pub symbol: String,
    pub side: i16,
    pub order_type: i16,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

pub async fn place_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    axum::Json(body): axum::Json<PlaceOrderBody>,
) -> ApiResult<TradeResult> {
    let req = PlaceRequest {
        user_id: user.id,
        side: Side::from_code(body.side)?,
        order_type: OrderType::from_code(body.order_type)?,
        quantity: body.quantity,
        price: body.price,
    };
    let result = state
        .router
        .place_order(&body.symbol, req, deadline(&headers))
        .await?;
    Ok(ApiResponse::ok(result))
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderBody {
    pub symbol: String,
    pub order_id: i64,
}

pub async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    axum::Json(body): axum::Json<CancelOrderBody>,
) -> ApiResult<Order> {
    let order = state
        .router
        .cancel_order(&user.id, &body.symbol, body.order_id, deadline(&headers))
        .await?;
    Ok(ApiResponse::ok(order))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub levels: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
pub struct DepthView {
    pub symbol: String,
    #[serde(flatten)]
    pub depth: DepthSnapshot,
}

pub async fn depth(
    State(state): State<AppState>,
    Path(symbol_path): Path<String>,
    Query(query): Query<DepthQuery>,
) -> ApiResult<DepthView> {
    let levels = query.levels.unwrap_or(20).clamp(1, 200);
    let (symbol, depth) = state.router.depth(&symbol_path, levels).await?;
    Ok(ApiResponse::ok(DepthView { symbol, depth }))
}

#[derive(Debug, Deserialize)]
pub struct ClobQuoteQuery {
    pub side: i16,
    pub quantity: Decimal,
}

pub async fn quote_clob(
    State(state): State<AppState>,
    Path(symbol_path): Path<String>,
    Query(query): Query<ClobQuoteQuery>,
) -> ApiResult<ClobQuoteView> {
    let side = Side::from_code(query.side)?;
    let view = state
        .router
        .quote_clob(&symbol_path, side, query.quantity)
        .await?;
    Ok(ApiResponse::ok(view))
}

// ================================================================================================
// Market metadata
// ================================================================================================

pub async fn list_markets(State(state): State<AppState>) -> ApiResult<Vec<SymbolConfig>> {
    Ok(ApiResponse::ok(state.router.list_markets().await?))
}

pub async fn get_market(
    State(state): State<AppState>,
    Path(symbol_path): Path<String>,
) -> ApiResult<MarketView> {
    Ok(ApiResponse::ok(state.router.market(&symbol_path).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateMarketBody {
    pub base: String,
    pub quote: String,
    pub settle: String,
    pub market: String,
    pub engine: String,
    pub price_precision: u32,
    pub qty_precision: u32,
    pub min_trade_amount: Decimal,
    pub max_trade_amount: Decimal,
    pub fee_rate: Decimal,
    #[serde(default)]
    pub engine_params: serde_json::Value,
    pub settle_at: Option<DateTime<Utc>>,
}

pub async fn create_market(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    axum::Json(body): axum::Json<CreateMarketBody>,
) -> ApiResult<SymbolConfig> {
    let market = MarketClass::from_str(&body.market.to_lowercase())
        .map_err(|_| ApiError::from(ValidationError::InvalidSymbolPath(body.market.clone())))?;
    let engine = EngineKind::from_str(&body.engine.to_lowercase())
        .map_err(|_| ApiError::from(ValidationError::InvalidSymbolPath(body.engine.clone())))?;

    tracing::info!(admin = %admin.id, base = %body.base, quote = %body.quote, "Creating symbol");
    let cfg = state
        .router
        .create_symbol(NewSymbol {
            base: body.base,
            quote: body.quote,
            settle: body.settle,
            market,
            engine,
            price_precision: body.price_precision,
            qty_precision: body.qty_precision,
            min_trade_amount: body.min_trade_amount,
            max_trade_amount: body.max_trade_amount,
            fee_rate: body.fee_rate,
            engine_params: body.engine_params,
            settle_at: body.settle_at,
        })
        .await?;
    Ok(ApiResponse::ok(cfg))
}

// ================================================================================================
// User
// ================================================================================================

#[derive(Debug, Deserialize)]
pub struct UserTradesQuery {
    pub symbol: Option<String>,
    pub engine_type: Option<String>,
    pub limit: Option<i64>,
}

pub async fn user_trades(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<UserTradesQuery>,
) -> ApiResult<Vec<TradeView>> {
    let engine = match &query.engine_type {
        Some(raw) => Some(
            EngineKind::from_str(&raw.to_lowercase())
                .map_err(|_| ApiError::from(ValidationError::InvalidSymbolPath(raw.clone())))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let trades = state
        .router
        .user_trades(&user.id, query.symbol.as_deref(), engine, limit)
        .await?;
    Ok(ApiResponse::ok(trades))
}

pub async fn user_balances(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Vec<BalanceView>> {
    Ok(ApiResponse::ok(state.router.user_balances(&user.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct TransferBody {
    pub to_user: String,
    pub currency: String,
    pub amount: Decimal,
}

/// Internal balance transfer between two simulated accounts.
pub async fn transfer(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    axum::Json(body): axum::Json<TransferBody>,
) -> ApiResult<Vec<BalanceView>> {
    let balances = state
        .router
        .transfer(&user.id, &body.to_user, &body.currency, body.amount)
        .await?;
    Ok(ApiResponse::ok(balances))
}
