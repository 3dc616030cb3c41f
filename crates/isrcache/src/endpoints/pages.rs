use axum::body::Body;
use axum::extract;
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;

use isrcache_service::caching::CacheKey;
use isrcache_service::services::Served;
use isrcache_service::types::{
    CACHE_STATUS_HEADER, GENERATION_HEADER, PURPOSE_HEADER, RequestIntent, Revalidate,
};

use super::{AppState, ResponseError};

/// Artifacts that never expire are still revalidated by shared caches once a year.
const NEVER_REVALIDATE_SECS: u64 = 31_536_000;

fn request_intent(headers: &HeaderMap) -> RequestIntent {
    let purpose = [PURPOSE_HEADER, "sec-purpose", "x-purpose"]
        .into_iter()
        .find_map(|name| headers.get(name))
        .and_then(|value| value.to_str().ok());
    RequestIntent::from_purpose(purpose)
}

fn requested_generation(headers: &HeaderMap) -> Result<Option<u64>, ResponseError> {
    let Some(value) = headers.get(GENERATION_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "invalid generation header").into())
}

fn cache_control(served: &Served) -> String {
    let max_age = match served.record.revalidate {
        Revalidate::Never => NEVER_REVALIDATE_SECS,
        Revalidate::After(interval) => interval.as_secs(),
    };
    format!("s-maxage={max_age}, stale-while-revalidate")
}

async fn load_page(
    state: &AppState,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<Response<Body>, ResponseError> {
    state
        .service
        .check_generation(requested_generation(headers)?)?;

    let key = CacheKey::from_uri_parts(path, query);
    let intent = request_intent(headers);
    tracing::trace!(%key, ?intent, "serving page");

    let served = state.service.get_or_regenerate(&key, intent).await?;
    let payload = &served.record.payload;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, payload.content_type())
        .header(header::CACHE_CONTROL, cache_control(&served))
        .header(header::AGE, served.age.as_secs())
        .header(CACHE_STATUS_HEADER, served.status.as_header())
        .body(Body::from(payload.to_bytes()))?;
    Ok(response)
}

/// Serves the artifact for a route, with the query as parameters.
///
/// Every response, including errors, reports the generation currently served in the
/// `x-isr-generation` header.
pub async fn get_page(
    extract::State(state): extract::State<AppState>,
    extract::Path(path): extract::Path<String>,
    extract::RawQuery(query): extract::RawQuery,
    headers: HeaderMap,
) -> Response<Body> {
    sentry::configure_scope(|scope| {
        scope.set_transaction(Some("GET /pages"));
    });

    let mut response = match load_page(&state, &path, query.as_deref(), &headers).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    response.headers_mut().insert(
        GENERATION_HEADER,
        HeaderValue::from(state.service.generation()),
    );
    response
}
