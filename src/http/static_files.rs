//! Static file serving for the frontend service.
//!
//! Serves the prebuilt site directory as-is. Directory requests resolve to
//! their `index.html`; anything else missing is a plain 404.

use tower_http::services::ServeDir;

use crate::config::StaticSiteConfig;

/// Create the static file service rooted at the configured site directory.
pub fn create_static_service(site: &StaticSiteConfig) -> ServeDir {
    ServeDir::new(&site.root).append_index_html_on_directories(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_static_service_missing_root() {
        let site = StaticSiteConfig {
            root: "/nonexistent/frontdoor/site".to_string(),
        };
        // Serving from a missing root is a 404 per request, not a startup failure
        let _service = create_static_service(&site);
    }
}
