use actix_web::{get, web, HttpRequest, HttpResponse, Responder, Scope};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::collector::{CollectOutcome, Collector};
use crate::config::Config;
use crate::database::Database;
use crate::error::ApiError;
use crate::hazemon::{build_range_url, HazemonClient, HazemonUrls, RangeQuery};
use crate::service::{HistoryAnswer, HistoryRequest, QueryService, SeriesRequest};

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

type ApiResult = Result<HttpResponse, ApiError>;

/// Numeric query parameter: truncated toward zero, `None` when empty or not
/// a finite number.
fn number(raw: &Option<String>) -> Option<i64> {
    let value = raw.as_deref()?.trim();
    if value.is_empty() {
        return None;
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

fn text(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn flag(raw: &Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

#[derive(Serialize)]
struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn success<T: Serialize>(body: T) -> HttpResponse {
    HttpResponse::Ok().json(Success { success: true, body })
}

#[get("/status")]
pub async fn status() -> impl Responder {
    HttpResponse::Ok().body("Server is up and running!")
}

pub async fn not_found() -> ApiResult {
    Err(ApiError::NotFound("Not found".to_string()))
}

pub async fn method_not_allowed() -> ApiResult {
    Err(ApiError::MethodNotAllowed)
}

/// Routes under `/api/pm25`. Every resource answers 405 for other methods.
pub fn scope<D: Database + Clone + Send + 'static>() -> Scope {
    web::scope("/api/pm25")
        .service(web::resource("/latest")
            .route(web::get().to(latest))
            .default_service(web::to(method_not_allowed))
        )
        .service(web::resource("/history")
            .route(web::get().to(history))
            .default_service(web::to(method_not_allowed))
        )
        .service(web::resource("/timeseries")
            .route(web::get().to(timeseries))
            .default_service(web::to(method_not_allowed))
        )
        .service(web::resource("/collect")
            .route(web::get().to(collect::<D>))
            .route(web::post().to(collect::<D>))
            .default_service(web::to(method_not_allowed))
        )
        .service(web::resource("/upstream")
            .route(web::get().to(upstream))
            .default_service(web::to(method_not_allowed))
        )
        .default_service(web::route().to(not_found))
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    node: Option<String>,
}

//#[get("/latest")]
pub async fn latest(query: web::Query<LatestQuery>, service: web::Data<QueryService>) -> ApiResult {
    let node = text(&query.node);
    let answer = service.get_latest(node.as_deref()).await?;
    Ok(success(json!({ "source": answer.source, "latest": answer.data })))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    days: Option<String>,
    months: Option<String>,
    node: Option<String>,
    aggr: Option<String>,
    debug: Option<String>,
}

#[derive(Serialize)]
struct HistoryBody {
    #[serde(flatten)]
    answer: HistoryAnswer,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_urls: Option<Vec<String>>,
}

//#[get("/history")]
pub async fn history(query: web::Query<HistoryQuery>, service: web::Data<QueryService>) -> ApiResult {
    let request = HistoryRequest {
        days: number(&query.days),
        months: number(&query.months),
        node: text(&query.node),
        aggr_minutes: number(&query.aggr),
    };

    let answer = service.get_history(&request, Utc::now()).await?;
    let upstream_urls = if flag(&query.debug) {
        Some(answer.upstream_urls.clone())
    } else {
        None
    };

    Ok(success(HistoryBody { answer, upstream_urls }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    from: Option<String>,
    to: Option<String>,
    hours: Option<String>,
    step: Option<String>,
    limit: Option<String>,
    node: Option<String>,
    aggr: Option<String>,
}

//#[get("/timeseries")]
pub async fn timeseries(query: web::Query<SeriesQuery>, service: web::Data<QueryService>) -> ApiResult {
    let request = SeriesRequest {
        from: number(&query.from),
        to: number(&query.to),
        hours: number(&query.hours),
        step: number(&query.step),
        limit: number(&query.limit),
        node: text(&query.node),
        aggr_minutes: number(&query.aggr),
    };

    let answer = service.get_timeseries(&request, Utc::now()).await?;
    Ok(success(answer))
}

#[derive(Debug, Default, Deserialize)]
pub struct SecretQuery {
    secret: Option<String>,
}

fn authorize(req: &HttpRequest, query: &SecretQuery, config: &Config) -> Result<(), ApiError> {
    let unauthorized = || ApiError::Unauthorized {
        hint: format!("Provide ?secret=<CRON_SECRET> or the {} header", CRON_SECRET_HEADER),
    };

    let expected = config.cron_secret.as_deref().ok_or_else(|| {
        warn!("Collect called but CRON_SECRET is not configured");
        unauthorized()
    })?;

    let header = req
        .headers()
        .get(CRON_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    // Header or query, whichever matches
    if header == Some(expected) || query.secret.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(unauthorized())
    }
}

//#[route("/collect", method = "GET", method = "POST")]
pub async fn collect<D: Database + Clone + Send + 'static>(
    req: HttpRequest,
    query: web::Query<SecretQuery>,
    config: web::Data<Config>,
    collector: web::Data<Collector<D>>,
) -> ApiResult {
    authorize(&req, &query, &config)?;

    match collector.collect().await? {
        CollectOutcome::Saved(reading) => Ok(success(json!({ "saved": true, "latest": reading }))),
        CollectOutcome::Duplicate(_) => Ok(success(json!({ "saved": false, "duplicate": true }))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpstreamQuery {
    from: Option<String>,
    to: Option<String>,
    node: Option<String>,
    aggr: Option<String>,
}

/// Raw Hazemon passthrough for diagnosing node URLs and range order.
//#[get("/upstream")]
pub async fn upstream(
    query: web::Query<UpstreamQuery>,
    config: web::Data<Config>,
    client: web::Data<HazemonClient>,
) -> ApiResult {
    let hazemon = &config.hazemon;
    let node = text(&query.node);
    let base = HazemonUrls::new(hazemon).base_url(node.as_deref());

    let url = match (number(&query.from), number(&query.to)) {
        (Some(from), Some(to)) => build_range_url(
            &base,
            &RangeQuery {
                before: from.max(to),
                after: from.min(to),
                aggr_minutes: number(&query.aggr).or(hazemon.aggr_minutes),
                order: hazemon.range_order,
            },
        ),
        (None, None) => base,
        _ => {
            return Err(ApiError::BadRequest {
                message: "Provide both from and to".to_string(),
                hint: Some("?from=<epoch_seconds>&to=<epoch_seconds>".to_string()),
            })
        }
    };

    let response = client
        .fetch(&url, hazemon.fetch_timeout)
        .await
        .map_err(ApiError::internal)?;

    if !response.ok {
        info!("Upstream proxy got HTTP {} from {}", response.status, url);
        return Err(ApiError::BadGateway {
            status: Some(response.status),
            upstream_url: Some(url),
        });
    }

    Ok(success(json!({ "upstream_url": url, "json": response.body })))
}
