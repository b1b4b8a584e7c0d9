//! Live preview of the output directory.
//!
//! Files are served over plain HTTP. Every HTML page gets a small client
//! script that connects to a WebSocket on a second port and listens for
//! either `"reload"` (reload the page) or `"css"` (re-fetch stylesheets in
//! place).

mod http;
mod live;

use std::net::{IpAddr, SocketAddr};

use camino::Utf8PathBuf;
use console::style;

use self::http::HttpServer;
use self::live::LiveServer;
use crate::error::ServeError;

/// What connected browsers should do after a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// Reload the whole page.
    Full,
    /// Swap stylesheets without reloading.
    Css,
}

impl ReloadKind {
    pub fn message(self) -> &'static str {
        match self {
            ReloadKind::Full => "reload",
            ReloadKind::Css => "css",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub host: IpAddr,
    /// HTTP port; `0` picks a free one.
    pub port: u16,
    /// Preferred WebSocket port. A free one is picked if it's taken.
    pub live_port: u16,
}

impl From<&crate::config::Server> for ServerOptions {
    fn from(config: &crate::config::Server) -> Self {
        Self {
            host: config.host,
            port: config.port,
            live_port: config.live_port,
        }
    }
}

pub struct PreviewServer {
    live: LiveServer,
    http: HttpServer,
}

impl PreviewServer {
    pub fn start(root: impl Into<Utf8PathBuf>, options: &ServerOptions) -> Result<Self, ServeError> {
        let root = root.into();

        let live = LiveServer::start(options.host, options.live_port)?;
        let snippet = client_snippet(live.addr().port());
        let http = HttpServer::start(root.clone(), SocketAddr::new(options.host, options.port), snippet)?;

        let server = Self { live, http };
        tracing::info!(
            url = %style(server.url()).yellow(),
            %root,
            live = %server.live.addr(),
            "serving preview"
        );

        Ok(server)
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.http.addr())
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http.addr()
    }

    pub fn live_addr(&self) -> SocketAddr {
        self.live.addr()
    }

    /// Asks every connected browser to refresh. Never blocks; a request
    /// replaces one that hasn't been sent yet.
    pub fn reload(&self, kind: ReloadKind) {
        self.live.reload(kind);
    }

    pub fn connected_clients(&self) -> usize {
        self.live.clients()
    }

    /// Shuts down both listeners and releases their ports.
    pub fn stop(mut self) -> Result<(), ServeError> {
        self.live.stop();
        self.http.stop()
    }
}

fn client_snippet(port: u16) -> String {
    format!(
        r#"<script>
(() => {{
    const socket = new WebSocket("ws://" + location.hostname + ":{port}");
    socket.addEventListener("message", event => {{
        if (event.data === "css") {{
            for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {{
                const url = new URL(link.href);
                url.searchParams.set("fude", Date.now());
                link.href = url.href;
            }}
        }} else {{
            window.location.reload();
        }}
    }});
}})();
</script>
"#
    )
}
