//! API Handlers

use std::path::PathBuf;

use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyzer::{analyze_site, UsageReport};
use crate::config::AppState;
use crate::critical::{assemble, filter_critical_rules, CriticalCss, Viewport, ViewportSection};
use crate::error::AppError;
use crate::inliner::{inline_critical_css, inline_directory, inline_linked_stylesheets, InlineOutcome};
use crate::pruner::{PruneStats, Pruner};
use crate::snapshot::{PageSnapshot, SnapshotPage};
use crate::token_extractor::{collect_site_tokens, Extractor, TokenSets};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    auth_enabled: bool,
    extractor: Extractor,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        auth_enabled: state.api_key.is_some(),
        extractor: state.extractor,
    })
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(ref key) = state.api_key else {
        tracing::error!("Security Error: No API Key configured on server");
        return Err(AppError::Internal("Server misconfiguration: API_KEY must be set".to_string()));
    };

    let auth_header = headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if auth_header != format!("Bearer {}", key) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// Run CPU and file-system work off the async runtime, inside a request span
async fn run_blocking<T, F>(operation: &'static str, work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", operation, %request_id);
    tokio::task::spawn_blocking(move || span.in_scope(work)).await?
}

/// Site analysis request
#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub site_dir: PathBuf,
    #[serde(default)]
    pub extractor: Option<Extractor>,
}

/// Analyze used vs unused selectors in a site directory
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<UsageReport>, AppError> {
    authorize(&state, &headers)?;

    let extractor = req.extractor.unwrap_or(state.extractor);
    let matcher = state.matcher.clone();

    let report = run_blocking("analyze", move || {
        tracing::info!("Analyzing: {} ({} extractor)", req.site_dir.display(), extractor.as_str());
        Ok(analyze_site(&req.site_dir, extractor, &matcher)?)
    })
    .await?;

    Ok(Json(report))
}

/// File-based prune request
#[derive(Deserialize)]
pub struct PruneRequest {
    pub site_dir: PathBuf,
    pub css_input: PathBuf,
    pub css_output: PathBuf,
    #[serde(default)]
    pub extractor: Option<Extractor>,
}

#[derive(Serialize)]
pub struct PruneResponse {
    #[serde(flatten)]
    pub stats: PruneStats,
    pub classes_found: usize,
    pub ids_found: usize,
}

/// Prune a stylesheet on disk against a site directory
pub async fn prune(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, AppError> {
    authorize(&state, &headers)?;

    let extractor = req.extractor.unwrap_or(state.extractor);
    let matcher = state.matcher.clone();

    let response = run_blocking("prune", move || {
        if !req.css_input.exists() {
            return Err(AppError::NotFound(format!(
                "CSS input {} does not exist",
                req.css_input.display()
            )));
        }

        let scan = collect_site_tokens(&req.site_dir, extractor)?;
        let stats = Pruner::new(&matcher).prune_file(&req.css_input, &req.css_output, &scan.tokens)?;

        tracing::info!(
            "Pruned: {} -> {} bytes ({:.1}% reduction)",
            stats.original_size,
            stats.pruned_size,
            stats.reduction_percentage
        );

        Ok(PruneResponse {
            stats,
            classes_found: scan.tokens.classes.len(),
            ids_found: scan.tokens.ids.len(),
        })
    })
    .await?;

    Ok(Json(response))
}

/// In-memory prune request
#[derive(Deserialize)]
pub struct PruneInlineRequest {
    pub documents: Vec<String>,
    pub css: String,
    #[serde(default)]
    pub extractor: Option<Extractor>,
}

#[derive(Serialize)]
pub struct PruneInlineResponse {
    pub css: String,
    pub stats: PruneStats,
}

/// Prune CSS text against documents sent in the request body
pub async fn prune_inline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PruneInlineRequest>,
) -> Result<Json<PruneInlineResponse>, AppError> {
    authorize(&state, &headers)?;

    let extractor = req.extractor.unwrap_or(state.extractor);
    let matcher = state.matcher.clone();

    let response = run_blocking("prune_inline", move || {
        let mut used = TokenSets::new();
        for document in &req.documents {
            used.merge(extractor.extract(document));
        }

        let output = Pruner::new(&matcher).prune(&req.css, &used);
        Ok(PruneInlineResponse {
            css: output.css,
            stats: output.stats,
        })
    })
    .await?;

    Ok(Json(response))
}

/// A viewport given inline or by preset name
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ViewportSpec {
    Preset(String),
    Custom(Viewport),
}

impl Default for ViewportSpec {
    fn default() -> Self {
        ViewportSpec::Custom(Viewport::desktop())
    }
}

impl ViewportSpec {
    fn resolve(self) -> Result<Viewport, AppError> {
        match self {
            ViewportSpec::Custom(viewport) => Ok(viewport),
            ViewportSpec::Preset(name) => Viewport::preset(&name)
                .ok_or_else(|| AppError::BadRequest(format!("Unknown viewport preset `{}`", name))),
        }
    }
}

#[derive(Deserialize)]
pub struct ViewportSnapshot {
    #[serde(default)]
    pub viewport: ViewportSpec,
    pub snapshot: PageSnapshot,
}

/// Critical CSS request, one snapshot per viewport
#[derive(Deserialize)]
pub struct CriticalRequest {
    pub snapshots: Vec<ViewportSnapshot>,
    #[serde(default)]
    pub minify: bool,
}

/// Extract critical CSS from rendered page snapshots
pub async fn critical(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CriticalRequest>,
) -> Result<Json<CriticalCss>, AppError> {
    authorize(&state, &headers)?;

    if req.snapshots.is_empty() {
        return Err(AppError::BadRequest("At least one snapshot is required".to_string()));
    }

    let entries = req
        .snapshots
        .into_iter()
        .map(|entry| Ok((entry.viewport.resolve()?, entry.snapshot)))
        .collect::<Result<Vec<_>, AppError>>()?;

    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("request", operation = "critical", %request_id);

    // Viewport passes are independent; run them side by side
    let passes = entries.into_iter().map(|(viewport, snapshot)| {
        let span = span.clone();
        tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                tracing::info!(
                    "Critical CSS: {} at {}x{}",
                    viewport.label,
                    viewport.width,
                    viewport.height
                );
                let page = SnapshotPage::new(snapshot);
                let rules = filter_critical_rules(&page, &viewport);
                ViewportSection { viewport, rules }
            })
        })
    });
    let sections = try_join_all(passes).await?;

    let minify = req.minify;
    let budget = state.critical_budget;
    let result = tokio::task::spawn_blocking(move || span.in_scope(|| assemble(&sections, minify, budget))).await?;

    Ok(Json(result))
}

/// Critical CSS inlining request
#[derive(Deserialize)]
pub struct CriticalInlineRequest {
    pub html: String,
    pub critical_css: String,
}

/// Inline critical CSS into a document and defer its stylesheets
pub async fn critical_inline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CriticalInlineRequest>,
) -> Result<Json<InlineOutcome>, AppError> {
    authorize(&state, &headers)?;

    if req.html.is_empty() {
        return Err(AppError::BadRequest("HTML is required".to_string()));
    }

    let outcome = run_blocking("critical_inline", move || Ok(inline_critical_css(&req.html, &req.critical_css))).await?;
    Ok(Json(outcome))
}

/// Site-wide critical CSS inlining request
#[derive(Deserialize)]
pub struct CriticalInlineSiteRequest {
    pub html_dir: PathBuf,
    pub output_dir: PathBuf,
    pub critical_css: String,
}

#[derive(Serialize)]
pub struct CriticalInlineSiteResponse {
    pub files_processed: usize,
}

/// Inline critical CSS into every HTML file of a directory tree
pub async fn critical_inline_site(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CriticalInlineSiteRequest>,
) -> Result<Json<CriticalInlineSiteResponse>, AppError> {
    authorize(&state, &headers)?;

    let files_processed = run_blocking("critical_inline_site", move || {
        Ok(inline_directory(&req.html_dir, &req.critical_css, &req.output_dir)?)
    })
    .await?;

    Ok(Json(CriticalInlineSiteResponse { files_processed }))
}

/// Stylesheet inlining request for a page on disk
#[derive(Deserialize)]
pub struct InlineStylesheetsRequest {
    pub html_path: PathBuf,
}

#[derive(Serialize)]
pub struct InlineStylesheetsResponse {
    pub html: String,
}

/// Inline a page's local stylesheets so it can be rendered and snapshotted
pub async fn inline_stylesheets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InlineStylesheetsRequest>,
) -> Result<Json<InlineStylesheetsResponse>, AppError> {
    authorize(&state, &headers)?;

    let html = run_blocking("inline_stylesheets", move || Ok(inline_linked_stylesheets(&req.html_path)?)).await?;
    Ok(Json(InlineStylesheetsResponse { html }))
}
