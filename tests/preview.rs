use std::fs;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use fude::{PreviewServer, ReloadKind, ServerOptions};

fn options() -> ServerOptions {
    ServerOptions {
        host: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        live_port: 0,
    }
}

fn site() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    fs::write(
        root.join("index.html"),
        "<html><body><h1>Hello</h1></body></html>",
    )
    .unwrap();
    fs::create_dir_all(root.join("css")).unwrap();
    fs::write(root.join("css/main.css"), "body{color:red}").unwrap();
    (dir, root)
}

/// Minimal HTTP/1.1 GET, returns the status line and the body.
fn get(addr: SocketAddr, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"
    )
    .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head.lines().next().unwrap().to_string();
    (status, body.to_string())
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn html_gets_the_client_and_other_files_do_not() {
    let (_dir, root) = site();
    let server = PreviewServer::start(&root, &options()).unwrap();

    let (status, body) = get(server.http_addr(), "/index.html");
    assert!(status.contains("200"), "{status}");
    let script = body.find("<script>").expect("client script missing");
    let close = body.find("</body>").unwrap();
    assert!(script < close);
    assert!(body.contains(&format!(":{}", server.live_addr().port())));

    let (status, body) = get(server.http_addr(), "/css/main.css");
    assert!(status.contains("200"), "{status}");
    assert_eq!(body, "body{color:red}");

    let (status, _) = get(server.http_addr(), "/missing.html");
    assert!(status.contains("404"), "{status}");

    server.stop().unwrap();
}

#[test]
fn connected_browsers_receive_reloads() {
    let (_dir, root) = site();
    let server = PreviewServer::start(&root, &options()).unwrap();

    let url = format!("ws://{}", server.live_addr());
    let (mut socket, _) = tungstenite::connect(url.as_str()).unwrap();
    wait_for(|| server.connected_clients() == 1);

    server.reload(ReloadKind::Css);
    assert_eq!(socket.read().unwrap().into_text().unwrap().as_str(), "css");

    server.reload(ReloadKind::Full);
    assert_eq!(socket.read().unwrap().into_text().unwrap().as_str(), "reload");

    server.stop().unwrap();
}

#[test]
fn stopping_releases_both_ports() {
    let (_dir, root) = site();
    let server = PreviewServer::start(&root, &options()).unwrap();
    let http = server.http_addr();
    let live = server.live_addr();

    server.stop().unwrap();

    TcpListener::bind(http).unwrap();
    TcpListener::bind(live).unwrap();
}
