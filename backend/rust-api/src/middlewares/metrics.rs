use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per method, route and status.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Collapses id-like segments so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if is_uuid_like(segment) || is_numeric_id(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_routes_keep_their_shape() {
        assert_eq!(normalize_path("/api/v1/tasks/answers"), "/api/v1/tasks/answers");
        assert_eq!(
            normalize_path("/api/v1/tasks/recommended"),
            "/api/v1/tasks/recommended"
        );
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn id_segments_are_collapsed() {
        assert_eq!(
            normalize_path("/api/v1/tasks/550e8400-e29b-41d4-a716-446655440000"),
            "/api/v1/tasks/{id}"
        );
        assert_eq!(normalize_path("/api/v1/users/42/badges"), "/api/v1/users/{id}/badges");
    }

    #[test]
    fn id_detection() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(is_numeric_id("999"));
        assert!(!is_numeric_id(""));
    }
}
