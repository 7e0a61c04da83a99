//! Development server with live reload

pub mod reload;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use lazy_static::lazy_static;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::net::SocketAddr;
use std::path::Component;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::generator::Generator;
use crate::Sitewright;
use reload::{ChangeNotifier, ReloadHub};

/// Path the client script is served under
pub const RELOADER_PATH: &str = "/__reloader__.js";

lazy_static! {
    static ref HEAD_CLOSE_RE: Regex = Regex::new(r"(?i)</head>").unwrap();
}

/// Options of the `serve` command
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub ip: String,
    pub port: u16,
    pub reload_port: u16,
    /// Watch the site and push reloads to the browser
    pub watch: bool,
}

/// Server state
struct ServerState {
    app: Sitewright,
    generator: Generator,
    client_script: String,
    live_reload: bool,
}

impl ServerState {
    fn new(app: &Sitewright, options: &ServeOptions) -> Self {
        Self {
            app: app.clone(),
            generator: Generator::new(app),
            client_script: reload::client_script(options.reload_port),
            live_reload: options.watch,
        }
    }

    fn finish_html(&self, html: String) -> Response {
        if self.live_reload {
            Html(inject_reload_script(&html)).into_response()
        } else {
            Html(html).into_response()
        }
    }
}

/// Start the development server
pub async fn start(app: &Sitewright, options: &ServeOptions) -> Result<()> {
    let state = Arc::new(ServerState::new(app, options));

    let router = Router::new()
        .route(RELOADER_PATH, get(reloader_script))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr = socket_addr(&options.ip, options.port)?;

    // Keeps the watcher alive for the lifetime of the server
    let _debouncer = if options.watch {
        let hub = Arc::new(ReloadHub::new());
        let mut ignore = app.config.watch.ignore.clone();
        ignore.push(format!("{}/**", app.config.public_dir));
        let notifier = ChangeNotifier::new(app.base_dir.clone(), &ignore, hub.clone());
        let debouncer = reload::watch(notifier)?;

        let reload_router = Router::new()
            .route("/", get(reload::ws_handler))
            .with_state(hub);
        let reload_addr = socket_addr(&options.ip, options.reload_port)?;
        let reload_listener = tokio::net::TcpListener::bind(reload_addr)
            .await
            .with_context(|| format!("Failed to bind reload channel on {}", reload_addr))?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(reload_listener, reload_router).await {
                tracing::error!("Reload channel error: {}", e);
            }
        });

        tracing::info!("Live reload on port {}", options.reload_port);
        Some(debouncer)
    } else {
        None
    };

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    println!("Server running at http://{}:{}", options.ip, options.port);
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, router).await?;

    Ok(())
}

fn socket_addr(ip: &str, port: u16) -> Result<SocketAddr> {
    let bind_ip = if ip == "localhost" { "127.0.0.1" } else { ip };
    format!("{}:{}", bind_ip, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", ip, port))
}

async fn reloader_script(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        state.client_script.clone(),
    )
}

/// Trailing slash redirect, then rendered content, then static files
async fn fallback_handler(
    State(state): State<Arc<ServerState>>,
    request: Request<Body>,
) -> Response {
    let raw_path = request.uri().path().to_string();

    let Some(path) = decode_path(&raw_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if path.ends_with('/') {
        return Redirect::to(&format!("{}index.html", raw_path)).into_response();
    }

    let render_state = state.clone();
    let render_path = path.clone();
    let rendered =
        tokio::task::spawn_blocking(move || render_state.generator.render_path(&render_path))
            .await;

    match rendered {
        Ok(Ok(Some(html))) => return state.finish_html(html),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            tracing::error!("Failed to render {}: {:#}", path, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)).into_response();
        }
        Err(e) => {
            tracing::error!("Render task for {} failed: {}", path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let file = state.app.static_dir.join(path.trim_start_matches('/'));
    if state.live_reload && is_html(&file) && file.is_file() {
        return match tokio::fs::read_to_string(&file).await {
            Ok(content) => state.finish_html(content),
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let mut service = ServeDir::new(&state.app.static_dir);
    match service.try_call(request).await {
        Ok(response) => response.into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Server error").into_response(),
    }
}

/// Percent-decode a request path; `None` if it escapes the site
fn decode_path(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let escapes = Path::new(decoded.as_ref())
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if escapes {
        None
    } else {
        Some(decoded.into_owned())
    }
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
        .unwrap_or(false)
}

/// Insert the reload client before the first closing head tag
pub fn inject_reload_script(html: &str) -> String {
    let tag = format!("<script src=\"{}\"></script></head>", RELOADER_PATH);
    HEAD_CLOSE_RE.replace(html, tag.as_str()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Sitewright) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("pages/docs")).unwrap();
        fs::create_dir_all(root.join("layouts")).unwrap();
        fs::create_dir_all(root.join("static/css")).unwrap();

        fs::write(
            root.join("layouts/base.html"),
            "<html><HEAD><title>{{name}}</title></HEAD><body>{{{content}}}</body></html>",
        )
        .unwrap();
        fs::write(root.join("pages/hello-world.md"), "---\nlayout: base\n---\n# Hi\n").unwrap();
        fs::write(root.join("pages/docs/index.html"), "<p>docs</p>").unwrap();
        fs::write(
            root.join("pages/broken.html"),
            "---\nlayout: missing\n---\nbody",
        )
        .unwrap();
        fs::write(root.join("static/css/site.css"), "body {}").unwrap();
        fs::write(root.join("static/plain.html"), "<head></head>static").unwrap();

        let app = Sitewright::new(root).unwrap();
        (tmp, app)
    }

    fn state(app: &Sitewright, watch: bool) -> Arc<ServerState> {
        Arc::new(ServerState::new(
            app,
            &ServeOptions {
                ip: "localhost".to_string(),
                port: 3000,
                reload_port: 3001,
                watch,
            },
        ))
    }

    async fn get(state: Arc<ServerState>, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = fallback_handler(State(state), request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[test]
    fn test_inject_before_first_head_close() {
        let html = "<html><Head></HEAD><body></head></body></html>";
        assert_eq!(
            inject_reload_script(html),
            "<html><Head><script src=\"/__reloader__.js\"></script></head><body></head></body></html>"
        );
        assert_eq!(inject_reload_script("<p>no head</p>"), "<p>no head</p>");
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/hello%20world.html").as_deref(), Some("/hello world.html"));
        assert_eq!(decode_path("/a/../secret"), None);
        assert_eq!(decode_path("/%2e%2e/secret"), None);
        assert_eq!(decode_path("/docs/").as_deref(), Some("/docs/"));
    }

    #[tokio::test]
    async fn test_serves_rendered_page_with_reload_script() {
        let (_tmp, app) = setup();
        let (status, body) = get(state(&app, true), "/hello-world.html").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<title>hello world</title>"));
        assert!(body.contains("<h1>Hi</h1>"));
        assert!(body.contains("<script src=\"/__reloader__.js\"></script></head>"));
    }

    #[tokio::test]
    async fn test_no_injection_without_watch() {
        let (_tmp, app) = setup();
        let (status, body) = get(state(&app, false), "/hello-world.html").await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains(RELOADER_PATH));
    }

    #[tokio::test]
    async fn test_trailing_slash_redirects() {
        let (_tmp, app) = setup();
        let request = Request::builder().uri("/docs/").body(Body::empty()).unwrap();
        let response = fallback_handler(State(state(&app, true)), request).await;

        assert!(response.status().is_redirection());
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/docs/index.html"
        );
    }

    #[tokio::test]
    async fn test_static_files_and_not_found() {
        let (_tmp, app) = setup();
        let state = state(&app, true);

        let (status, body) = get(state.clone(), "/css/site.css").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "body {}");

        let (status, body) = get(state.clone(), "/plain.html").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<head><script"));

        let (status, _) = get(state.clone(), "/nope.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(state, "/../_config.yml").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_render_failure_is_server_error() {
        let (_tmp, app) = setup();
        let (status, body) = get(state(&app, true), "/broken.html").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("missing"));
    }
}
