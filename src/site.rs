//! The built-in site: clean, build and rebuild tasks for styles, markup,
//! images, fonts and scripts, plus the watch bindings of the dev session.

use std::fmt::{self, Display};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{Config, FreshnessMode};
use crate::error::ConfigError;
use crate::globs::Globs;
use crate::plugin::{Autoprefix, CssMinify, Esbuild, HtmlMinify, ImageOptimize, Passthrough, Sass, WebP};
use crate::registry::Registry;
use crate::server::ReloadKind;
use crate::stage::{AlwaysStale, ContentDigest, Freshness, ModifiedTime, PathSpec, Stage, Transform};

const DIR_CSS: &str = "css";
const DIR_JS: &str = "js";
const DIR_IMG: &str = "img";
const DIR_FONTS: &str = "fonts";

/// Which flavour of output to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Readable output in `dest`.
    Develop,
    /// Output in `publish`, with minified copies and WebP conversions added.
    Publish,
}

impl Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Develop => f.write_str("develop"),
            Profile::Publish => f.write_str("publish"),
        }
    }
}

/// The transforms the site is built with.
#[derive(Clone)]
pub struct Toolchain {
    pub sass: Arc<dyn Transform>,
    pub css_post: Arc<dyn Transform>,
    pub css_minify: Arc<dyn Transform>,
    pub script: Arc<dyn Transform>,
    pub script_minify: Arc<dyn Transform>,
    pub html: Arc<dyn Transform>,
    pub image: Arc<dyn Transform>,
    pub webp: Arc<dyn Transform>,
}

impl Toolchain {
    pub fn native(config: &Config) -> Self {
        let scripts = &config.scripts;
        let (script, script_minify): (Arc<dyn Transform>, Arc<dyn Transform>) = if scripts.transpile
        {
            let esbuild = Esbuild::new(&scripts.esbuild).target(&scripts.target);
            (Arc::new(esbuild.clone()), Arc::new(esbuild.minify(true)))
        } else {
            (Arc::new(Passthrough), Arc::new(Passthrough))
        };

        Self {
            sass: Arc::new(Sass),
            css_post: Arc::new(Autoprefix::new(&config.styles.browsers)),
            css_minify: Arc::new(CssMinify),
            script,
            script_minify,
            html: Arc::new(HtmlMinify),
            image: Arc::new(ImageOptimize::new(config.images.jpeg_quality)),
            webp: Arc::new(WebP),
        }
    }
}

/// A watch binding of the dev session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub patterns: Vec<String>,
    pub task: &'static str,
    pub reload: ReloadKind,
}

pub struct Site {
    config: Config,
    profile: Profile,
    toolchain: Toolchain,
}

impl Site {
    pub fn new(config: Config, profile: Profile) -> Self {
        let toolchain = Toolchain::native(&config);
        Self::with_toolchain(config, profile, toolchain)
    }

    pub fn with_toolchain(config: Config, profile: Profile, toolchain: Toolchain) -> Self {
        Self {
            config,
            profile,
            toolchain,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// The directory this profile writes to.
    pub fn output(&self) -> &Utf8Path {
        match self.profile {
            Profile::Develop => &self.config.dest,
            Profile::Publish => &self.config.publish,
        }
    }

    fn out(&self, dir: &str) -> Utf8PathBuf {
        self.output().join(dir)
    }

    fn paths<S: AsRef<str>>(&self, patterns: &[S], dest: Utf8PathBuf) -> Result<PathSpec, ConfigError> {
        PathSpec::new(&self.config.src, patterns, dest)
    }

    pub fn registry(&self) -> Result<Registry, ConfigError> {
        let mut registry = Registry::new();

        self.register_clean(&mut registry)?;
        registry.parallel(
            "clean",
            ["clean:html", "clean:style", "clean:img", "clean:fonts", "clean:js"],
        )?;

        for stage in [
            self.stage_html()?,
            self.stage_style()?,
            self.stage_img()?,
            self.stage_fonts()?,
            self.stage_js()?,
        ] {
            stage.register(&mut registry)?;
        }
        registry.parallel(
            "build",
            ["build:html", "build:style", "build:img", "build:fonts", "build:js"],
        )?;

        registry.series("rebuild:img", ["clean:img", "build:img"])?;
        registry.series("rebuild:fonts", ["clean:fonts", "build:fonts"])?;
        registry.series("default", ["clean", "build"])?;

        Ok(registry)
    }

    /// Which tasks re-run when sources change, and how browsers are told.
    pub fn bindings(&self) -> Vec<Binding> {
        let watch = &self.config.watch;
        vec![
            Binding {
                patterns: watch.sass.clone(),
                task: "build:style",
                reload: ReloadKind::Css,
            },
            Binding {
                patterns: watch.html.clone(),
                task: "build:html",
                reload: ReloadKind::Full,
            },
            Binding {
                patterns: watch.images.clone(),
                task: "rebuild:img",
                reload: ReloadKind::Full,
            },
            Binding {
                patterns: watch.fonts.clone(),
                task: "rebuild:fonts",
                reload: ReloadKind::Full,
            },
            Binding {
                patterns: watch.js.clone(),
                task: "build:js",
                reload: ReloadKind::Full,
            },
        ]
    }

    fn register_clean(&self, registry: &mut Registry) -> Result<(), ConfigError> {
        for (name, dir) in [
            ("clean:style", DIR_CSS),
            ("clean:img", DIR_IMG),
            ("clean:fonts", DIR_FONTS),
            ("clean:js", DIR_JS),
        ] {
            let path = self.out(dir);
            registry.leaf(name, move || {
                tracing::debug!(%path, "removing");
                crate::io::remove(&path)?;
                Ok(())
            })?;
        }

        let output = self.output().to_path_buf();
        let html = Globs::new(&self.config.paths.html)?;
        registry.leaf("clean:html", move || {
            let removed = crate::io::remove_matching(&output, &html)?;
            tracing::debug!(removed = removed.len(), "removed markup");
            Ok(())
        })
    }

    fn stage_style(&self) -> Result<Stage, ConfigError> {
        let paths = self
            .paths(&self.config.paths.sass, self.out(DIR_CSS))?
            .ignore(&self.config.paths.sass_ignore)?;

        let stage = Stage::new("build:style", paths)
            .then(self.toolchain.sass.clone())
            .then(self.toolchain.css_post.clone())
            .write();

        Ok(match self.profile {
            Profile::Develop => stage,
            Profile::Publish => stage
                .then(self.toolchain.css_minify.clone())
                .rename("min")
                .write(),
        })
    }

    fn stage_html(&self) -> Result<Stage, ConfigError> {
        let paths = self.paths(&self.config.paths.html, self.output().to_path_buf())?;

        Ok(Stage::new("build:html", paths)
            .then(self.toolchain.html.clone())
            .write())
    }

    fn stage_img(&self) -> Result<Stage, ConfigError> {
        let paths = self.paths(&self.config.paths.images, self.output().to_path_buf())?;

        let stage = Stage::new("build:img", paths)
            .newer(self.freshness())
            .then(self.toolchain.image.clone())
            .write();

        Ok(match self.profile {
            Profile::Develop => stage,
            Profile::Publish => stage.then(self.toolchain.webp.clone()).write(),
        })
    }

    fn stage_fonts(&self) -> Result<Stage, ConfigError> {
        let paths = self.paths(&self.config.paths.fonts, self.out(DIR_FONTS))?;
        Ok(Stage::new("build:fonts", paths).write())
    }

    fn stage_js(&self) -> Result<Stage, ConfigError> {
        let paths = self.paths(&self.config.paths.js, self.out(DIR_JS))?;

        let stage = Stage::new("build:js", paths)
            .then(self.toolchain.script.clone())
            .write();

        Ok(match self.profile {
            Profile::Develop => stage,
            Profile::Publish => stage
                .then(self.toolchain.script_minify.clone())
                .rename("min")
                .write(),
        })
    }

    fn freshness(&self) -> Arc<dyn Freshness> {
        match self.config.images.freshness {
            FreshnessMode::Mtime => Arc::new(ModifiedTime::new()),
            FreshnessMode::Digest => Arc::new(ContentDigest::open(
                self.config.cache.join(format!("{}-img.cbor", self.profile)),
            )),
            FreshnessMode::Off => Arc::new(AlwaysStale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_every_task_and_validates() {
        let site = Site::new(Config::default(), Profile::Develop);
        let registry = site.registry().unwrap();

        assert_eq!(
            registry.names(),
            vec![
                "build",
                "build:fonts",
                "build:html",
                "build:img",
                "build:js",
                "build:style",
                "clean",
                "clean:fonts",
                "clean:html",
                "clean:img",
                "clean:js",
                "clean:style",
                "default",
                "rebuild:fonts",
                "rebuild:img",
            ]
        );
        registry.validate().unwrap();
    }

    #[test]
    fn default_cleans_then_builds() {
        let site = Site::new(Config::default(), Profile::Develop);
        let tree = site.registry().unwrap().render_tree("default").unwrap();

        assert!(tree.starts_with("default <series>\n├── clean <parallel>\n"));
        assert!(tree.contains("└── build <parallel>\n"));
        assert!(tree.ends_with("    └── build:js\n"));
    }

    #[test]
    fn publish_writes_elsewhere() {
        let config = Config::default();
        assert_eq!(Site::new(config.clone(), Profile::Develop).output(), "dist");
        assert_eq!(Site::new(config, Profile::Publish).output(), "publish");
    }

    #[test]
    fn styles_inject_and_everything_else_reloads() {
        let site = Site::new(Config::default(), Profile::Develop);
        let registry = site.registry().unwrap();

        for binding in site.bindings() {
            assert!(registry.contains(binding.task), "{}", binding.task);
            let expected = if binding.task == "build:style" {
                ReloadKind::Css
            } else {
                ReloadKind::Full
            };
            assert_eq!(binding.reload, expected);
        }
    }

    #[test]
    fn styles_are_post_processed_in_both_profiles() {
        let site = Site::new(Config::default(), Profile::Develop);
        let steps: Vec<_> = site
            .stage_style()
            .unwrap()
            .steps()
            .iter()
            .map(|s| format!("{s:?}"))
            .collect();
        assert_eq!(steps, vec!["Apply(sass)", "Apply(autoprefix)", "Write"]);
    }

    #[test]
    fn publish_adds_minified_copies() {
        let site = Site::new(Config::default(), Profile::Publish);
        let steps: Vec<_> = site
            .stage_style()
            .unwrap()
            .steps()
            .iter()
            .map(|s| format!("{s:?}"))
            .collect();
        assert_eq!(
            steps,
            vec!["Apply(sass)", "Apply(autoprefix)", "Write", "Apply(css-minify)", "Rename(min)", "Write"]
        );
    }
}
