//! Liveness endpoints. Neither touches the media store, so they answer even when the provider
//! is unreachable or misconfigured.

// GET /ping - plain-text liveness check kept for existing clients
#[utoipa::path(
    get,
    path = "/ping",
    tag = "probes",
    summary = "Ping",
    responses((status = 200, description = "Always `pong`", body = String, content_type = "text/plain"))
)]
pub async fn ping() -> &'static str {
    "pong"
}

// GET /healthz - health check used by orchestrators
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "probes",
    summary = "Health check",
    responses((status = 200, description = "Service is up", body = String, content_type = "text/plain"))
)]
pub async fn healthz() -> &'static str {
    "OK"
}
