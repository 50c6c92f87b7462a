//! Option chain handlers.

use crate::api::extract::AuthUser;
use crate::error::ApiError;
use crate::models::{ChainFilterRequest, ChainQuery, ChainRequest, OiAnalysisQuery};
use crate::option_chain::{
    ChainAnalysis, FilterCriteria, MaxPainResult, OiAnalysis, OptionChain, PcrResult,
    UnderlyingInfo, analyze, filter_chain, max_pain, oi_analysis, pcr,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use std::sync::Arc;

const DEFAULT_TOP_N: usize = 5;

// ============================================================================
// Chains
// ============================================================================

/// Underlyings with a spot price or a cached chain.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/underlyings",
    responses(
        (status = 200, description = "Available underlyings", body = Vec<UnderlyingInfo>)
    ),
    tag = "Option Chain"
)]
pub async fn list_underlyings(State(state): State<Arc<AppState>>) -> Json<Vec<UnderlyingInfo>> {
    Json(state.chains.underlyings())
}

/// Option chain of an underlying.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/{underlying}",
    params(
        ("underlying" = String, Path, description = "Underlying symbol"),
        ChainQuery
    ),
    responses(
        (status = 200, description = "Option chain", body = OptionChain),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn get_chain(
    State(state): State<Arc<AppState>>,
    Path(underlying): Path<String>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<OptionChain>, ApiError> {
    let chain = state.chains.fetch(&underlying, query.expiry, query.refresh)?;
    Ok(Json(OptionChain::clone(&chain)))
}

/// Option chain selected in the request body.
#[utoipa::path(
    post,
    path = "/api/v1/option-chain/fetch",
    request_body = ChainRequest,
    responses(
        (status = 200, description = "Option chain", body = OptionChain),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn fetch_chain(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChainRequest>,
) -> Result<Json<OptionChain>, ApiError> {
    let chain = state
        .chains
        .fetch(&request.underlying, request.expiry, request.refresh)?;
    Ok(Json(OptionChain::clone(&chain)))
}

/// Replace the cached chain with externally supplied data (admin only).
///
/// The underlying of the path wins over the one in the body.
#[utoipa::path(
    put,
    path = "/api/v1/option-chain/{underlying}",
    params(
        ("underlying" = String, Path, description = "Underlying symbol")
    ),
    request_body = OptionChain,
    responses(
        (status = 200, description = "Stored chain with computed greeks", body = OptionChain),
        (status = 400, description = "Invalid strikes"),
        (status = 403, description = "Admin role required")
    ),
    tag = "Option Chain"
)]
pub async fn ingest_chain(
    State(state): State<Arc<AppState>>,
    admin: AuthUser,
    Path(underlying): Path<String>,
    Json(mut chain): Json<OptionChain>,
) -> Result<Json<OptionChain>, ApiError> {
    admin.require_admin()?;
    chain.underlying = underlying;
    let chain = state.chains.ingest(chain)?;
    Ok(Json(OptionChain::clone(&chain)))
}

// ============================================================================
// Analytics
// ============================================================================

/// Combined analysis of a chain.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/{underlying}/analysis",
    params(
        ("underlying" = String, Path, description = "Underlying symbol"),
        ChainQuery
    ),
    responses(
        (status = 200, description = "Chain analysis", body = ChainAnalysis),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(underlying): Path<String>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<ChainAnalysis>, ApiError> {
    let chain = state.chains.fetch(&underlying, query.expiry, query.refresh)?;
    Ok(Json(analyze(&chain, &state.chains.pricer())))
}

/// Combined analysis of the chain selected in the request body.
#[utoipa::path(
    post,
    path = "/api/v1/option-chain/analysis",
    request_body = ChainRequest,
    responses(
        (status = 200, description = "Chain analysis", body = ChainAnalysis),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn post_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChainRequest>,
) -> Result<Json<ChainAnalysis>, ApiError> {
    let chain = state
        .chains
        .fetch(&request.underlying, request.expiry, request.refresh)?;
    Ok(Json(analyze(&chain, &state.chains.pricer())))
}

/// Chain narrowed by query criteria.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/{underlying}/filter",
    params(
        ("underlying" = String, Path, description = "Underlying symbol"),
        ChainQuery,
        FilterCriteria
    ),
    responses(
        (status = 200, description = "Filtered chain", body = OptionChain),
        (status = 400, description = "Inconsistent criteria"),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn get_filtered(
    State(state): State<Arc<AppState>>,
    Path(underlying): Path<String>,
    Query(query): Query<ChainQuery>,
    Query(criteria): Query<FilterCriteria>,
) -> Result<Json<OptionChain>, ApiError> {
    let chain = state.chains.fetch(&underlying, query.expiry, query.refresh)?;
    filter_chain(&chain, &criteria).map(Json)
}

/// Chain narrowed by body criteria.
#[utoipa::path(
    post,
    path = "/api/v1/option-chain/filter",
    request_body = ChainFilterRequest,
    responses(
        (status = 200, description = "Filtered chain", body = OptionChain),
        (status = 400, description = "Inconsistent criteria"),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn post_filter(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChainFilterRequest>,
) -> Result<Json<OptionChain>, ApiError> {
    let chain = state.chains.fetch(&request.underlying, request.expiry, false)?;
    filter_chain(&chain, &request.criteria).map(Json)
}

/// Put/call ratios and sentiment.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/{underlying}/pcr",
    params(
        ("underlying" = String, Path, description = "Underlying symbol"),
        ChainQuery
    ),
    responses(
        (status = 200, description = "Put/call ratios", body = PcrResult),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn get_pcr(
    State(state): State<Arc<AppState>>,
    Path(underlying): Path<String>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<PcrResult>, ApiError> {
    let chain = state.chains.fetch(&underlying, query.expiry, query.refresh)?;
    Ok(Json(pcr(&chain)))
}

/// Max pain strike and payout curve.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/{underlying}/max-pain",
    params(
        ("underlying" = String, Path, description = "Underlying symbol"),
        ChainQuery
    ),
    responses(
        (status = 200, description = "Max pain", body = MaxPainResult),
        (status = 400, description = "Chain has no strikes"),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn get_max_pain(
    State(state): State<Arc<AppState>>,
    Path(underlying): Path<String>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<MaxPainResult>, ApiError> {
    let chain = state.chains.fetch(&underlying, query.expiry, query.refresh)?;
    max_pain(&chain).map(Json)
}

/// Open interest breakdown with support, resistance and buildups.
#[utoipa::path(
    get,
    path = "/api/v1/option-chain/{underlying}/oi-analysis",
    params(
        ("underlying" = String, Path, description = "Underlying symbol"),
        OiAnalysisQuery
    ),
    responses(
        (status = 200, description = "Open interest analysis", body = OiAnalysis),
        (status = 404, description = "No chain for the underlying")
    ),
    tag = "Option Chain"
)]
pub async fn get_oi_analysis(
    State(state): State<Arc<AppState>>,
    Path(underlying): Path<String>,
    Query(query): Query<OiAnalysisQuery>,
) -> Result<Json<OiAnalysis>, ApiError> {
    let chain = state.chains.fetch(&underlying, query.expiry, false)?;
    Ok(Json(oi_analysis(
        &chain,
        query.top_n.unwrap_or(DEFAULT_TOP_N),
    )))
}
