//! The `fude.toml` configuration file. Every field is optional; a missing
//! file is the same as an empty one.

use std::fs;
use std::net::IpAddr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_PATH: &str = "fude.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the sources.
    pub src: Utf8PathBuf,
    /// Output directory of the develop profile.
    pub dest: Utf8PathBuf,
    /// Output directory of the publish profile.
    pub publish: Utf8PathBuf,
    /// Scratch space for persisted build state.
    pub cache: Utf8PathBuf,
    pub paths: Paths,
    pub watch: Watch,
    pub server: Server,
    pub styles: Styles,
    pub scripts: Scripts,
    pub images: Images,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            src: "src".into(),
            dest: "dist".into(),
            publish: "publish".into(),
            cache: ".cache".into(),
            paths: Paths::default(),
            watch: Watch::default(),
            server: Server::default(),
            styles: Styles::default(),
            scripts: Scripts::default(),
            images: Images::default(),
        }
    }
}

impl Config {
    /// Reads the config at `path`, falling back to defaults if it doesn't exist.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(%path, "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(path.to_path_buf(), e)),
        };

        Self::parse(path, &text)
    }

    pub fn parse(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}

/// Source globs, relative to `src`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub sass: Vec<String>,
    /// Style sources that are only ever imported.
    pub sass_ignore: Vec<String>,
    pub html: Vec<String>,
    pub images: Vec<String>,
    pub js: Vec<String>,
    pub fonts: Vec<String>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            sass: strings(["sass/*.scss"]),
            sass_ignore: strings(["**/_*"]),
            html: strings(["*.html"]),
            images: strings(["**/*.{png,jpg,jpeg,svg,webp}"]),
            js: strings(["js/*.js"]),
            fonts: strings(["fonts/*.*"]),
        }
    }
}

/// Watch globs, relative to `src`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Watch {
    pub debounce_ms: u64,
    pub sass: Vec<String>,
    pub html: Vec<String>,
    pub images: Vec<String>,
    pub js: Vec<String>,
    pub fonts: Vec<String>,
}

impl Watch {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for Watch {
    fn default() -> Self {
        let paths = Paths::default();
        Self {
            debounce_ms: 200,
            sass: strings(["sass/**/*.{scss,sass}", "components/**/*.scss"]),
            html: strings(["**/*.html"]),
            images: paths.images,
            js: paths.js,
            fonts: paths.fonts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    pub host: IpAddr,
    /// HTTP port of the preview.
    pub port: u16,
    /// WebSocket port used to push reloads.
    pub live_port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            live_port: 35729,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Styles {
    /// Browserslist queries the compiled CSS is prefixed and lowered for.
    pub browsers: Vec<String>,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            browsers: strings(["defaults"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scripts {
    /// The `esbuild` executable.
    pub esbuild: String,
    /// Pipe scripts through esbuild. When off they're copied as they are.
    pub transpile: bool,
    pub target: String,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            esbuild: "esbuild".into(),
            transpile: true,
            target: "es2015".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessMode {
    /// Compare modification times.
    #[default]
    Mtime,
    /// Compare content digests recorded under the cache directory.
    Digest,
    /// Always rebuild.
    Off,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Images {
    pub freshness: FreshnessMode,
    pub jpeg_quality: u8,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            freshness: FreshnessMode::Mtime,
            jpeg_quality: 80,
        }
    }
}

fn strings<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("fude.toml".into(), "").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.watch.debounce(), Duration::from_millis(200));
        assert_eq!(config.paths.sass, vec!["sass/*.scss"]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            "fude.toml".into(),
            r#"
            dest = "out"

            [server]
            port = 8080

            [styles]
            browsers = ["last 2 versions"]

            [images]
            freshness = "digest"
            "#,
        )
        .unwrap();

        assert_eq!(config.dest, "out");
        assert_eq!(config.src, "src");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.live_port, 35729);
        assert_eq!(config.images.freshness, FreshnessMode::Digest);
        assert_eq!(config.images.jpeg_quality, 80);
        assert_eq!(config.styles.browsers, vec!["last 2 versions"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::parse("fude.toml".into(), "destination = 'x'").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("fude.toml")).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
