use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;

use crate::error::ServeError;

/// Static file server running on its own single-threaded tokio runtime.
pub(crate) struct HttpServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<std::io::Result<()>>>,
}

impl HttpServer {
    /// Binds right away, so a taken port is reported to the caller.
    pub fn start(root: Utf8PathBuf, addr: SocketAddr, snippet: String) -> Result<Self, ServeError> {
        let listener = std::net::TcpListener::bind(addr).map_err(|e| ServeError::Bind(addr, e))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let (tx, rx) = oneshot::channel();

        let thread = thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(serve(listener, root, snippet.into(), rx))
        });

        Ok(Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits for open ones to finish.
    pub fn stop(&mut self) -> Result<(), ServeError> {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }

        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(result)) => Ok(result?),
            Some(Err(_)) => Err(ServeError::Runtime(std::io::Error::other(
                "preview server thread panicked",
            ))),
            None => Ok(()),
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("{e}");
        }
    }
}

async fn serve(
    listener: std::net::TcpListener,
    root: Utf8PathBuf,
    snippet: Arc<str>,
    shutdown: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let router = Router::new()
        .fallback_service(ServeDir::new(root))
        .layer(axum::middleware::map_response_with_state(snippet, inject));

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            shutdown.await.ok();
        })
        .await
}

async fn inject(State(snippet): State<Arc<str>>, response: Response) -> Response {
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(inject_snippet(&bytes, &snippet)))
}

/// Places `snippet` right before the closing body tag, or at the end.
pub(crate) fn inject_snippet(html: &[u8], snippet: &str) -> Vec<u8> {
    let lower = html.to_ascii_lowercase();
    let at = lower
        .windows(b"</body>".len())
        .rposition(|w| w == b"</body>")
        .unwrap_or(html.len());

    let mut out = Vec::with_capacity(html.len() + snippet.len());
    out.extend_from_slice(&html[..at]);
    out.extend_from_slice(snippet.as_bytes());
    out.extend_from_slice(&html[at..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_goes_before_the_closing_tag() {
        let out = inject_snippet(b"<html><BODY><p>hi</p></BODY></html>", "<script></script>");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<html><BODY><p>hi</p><script></script></BODY></html>"
        );
    }

    #[test]
    fn fragments_get_it_appended() {
        let out = inject_snippet(b"<p>partial</p>", "<script></script>");
        assert_eq!(out, b"<p>partial</p><script></script>");
    }

    #[test]
    fn bind_errors_name_the_address() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let err = HttpServer::start(".".into(), addr, String::new())
            .err()
            .unwrap();
        assert!(matches!(err, ServeError::Bind(a, _) if a == addr));
    }
}
