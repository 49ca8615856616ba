use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

const DEFAULT_ORIGINS: &str = "http://localhost:3000";

/// Build a CORS layer from the `PHYSIO_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`)
/// - Methods: GET, POST, DELETE, OPTIONS
/// - Headers: Authorization, Content-Type
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let origins_str =
        std::env::var("PHYSIO_CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_ORIGINS.to_string());
    cors_layer_for(&parse_origins(&origins_str))
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    let mut seen: Vec<String> = Vec::new();
    for origin in raw
        .split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
    {
        if !seen.iter().any(|o| o.eq_ignore_ascii_case(origin)) {
            seen.push(origin.to_string());
        }
    }
    seen.into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

fn cors_layer_for(origins: &[HeaderValue]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins.to_vec())
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::{cors_layer_for, parse_origins};

    #[test]
    fn parse_origins_dedupes_and_trims() {
        let origins = parse_origins(" https://praxis.example/ , ,https://PRAXIS.example/,http://localhost:5173");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://praxis.example");
        assert_eq!(origins[1], "http://localhost:5173");
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed() {
        let app = Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .layer(cors_layer_for(&parse_origins("https://praxis.example")));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://praxis.example")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .expect("allow-origin header should exist"),
            "https://praxis.example"
        );
    }
}
