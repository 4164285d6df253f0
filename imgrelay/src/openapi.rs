//! OpenAPI documentation for the relay, served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::api;
use crate::errors::ErrorBody;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "imgrelay",
        description = "Uploads an image to the configured media store and deletes the image it replaces."
    ),
    paths(
        api::handlers::images::upload_new_image,
        api::handlers::probes::ping,
        api::handlers::probes::healthz,
    ),
    components(schemas(
        api::models::images::ReplaceImageForm,
        api::models::images::ReplaceImageResponse,
        ErrorBody,
    )),
    tags(
        (name = "images", description = "Image replacement"),
        (name = "probes", description = "Liveness checks"),
    )
)]
pub struct ApiDoc;
