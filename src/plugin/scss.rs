use std::sync::OnceLock;

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use thiserror::Error;

use crate::stage::{Asset, Transform};

#[derive(Debug, Error)]
pub enum StyleError {
    #[error("Stylesheet is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("Invalid browser query '{0}': {1}")]
    Browsers(String, String),

    #[error("CSS post-processing error: {0}")]
    Post(String),
}

/// Compiles Sass and SCSS to expanded CSS. Imports are resolved relative to
/// the directory of the source file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sass;

impl Transform for Sass {
    fn name(&self) -> &str {
        "sass"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let css = compile(&asset)?;
        Ok(Some(asset.with_data(css).with_extension("css")))
    }
}

fn compile(asset: &Asset) -> Result<String, StyleError> {
    let input = std::str::from_utf8(&asset.data)?.to_string();

    let syntax = match asset.source.extension() {
        Some("sass") => grass::InputSyntax::Sass,
        Some("css") => grass::InputSyntax::Css,
        _ => grass::InputSyntax::Scss,
    };

    let mut options = grass::Options::default()
        .style(grass::OutputStyle::Expanded)
        .input_syntax(syntax);

    if let Some(dir) = asset.source.parent() {
        options = options.load_path(dir);
    }

    Ok(grass::from_string(input, &options)?)
}

/// Rewrites compiled CSS for a set of browsers: adds vendor prefixes and
/// lowers syntax the targets don't understand yet.
#[derive(Debug, Default)]
pub struct Autoprefix {
    queries: Vec<String>,
    browsers: OnceLock<Result<Option<Browsers>, String>>,
}

impl Autoprefix {
    /// `queries` are browserslist queries, e.g. `["defaults"]`.
    pub fn new<I, S>(queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queries: queries.into_iter().map(Into::into).collect(),
            browsers: OnceLock::new(),
        }
    }

    fn targets(&self) -> Result<Targets, StyleError> {
        let browsers = self
            .browsers
            .get_or_init(|| Browsers::from_browserslist(&self.queries).map_err(|e| e.to_string()));

        match browsers {
            Ok(browsers) => Ok(Targets {
                browsers: *browsers,
                ..Targets::default()
            }),
            Err(e) => Err(StyleError::Browsers(self.queries.join(", "), e.clone())),
        }
    }

    fn process(&self, css: &str, filename: &str) -> Result<String, StyleError> {
        let targets = self.targets()?;

        let options = ParserOptions {
            filename: filename.to_string(),
            ..ParserOptions::default()
        };
        let mut sheet =
            StyleSheet::parse(css, options).map_err(|e| StyleError::Post(e.to_string()))?;

        sheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::Post(e.to_string()))?;

        let out = sheet
            .to_css(PrinterOptions {
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::Post(e.to_string()))?;

        Ok(out.code)
    }
}

impl Transform for Autoprefix {
    fn name(&self) -> &str {
        "autoprefix"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let css = std::str::from_utf8(&asset.data).map_err(StyleError::from)?;
        let css = self.process(css, asset.source.as_str())?;
        Ok(Some(asset.with_data(css)))
    }
}

/// Minifies CSS by re-emitting it in compressed style.
#[derive(Debug, Default, Clone, Copy)]
pub struct CssMinify;

impl Transform for CssMinify {
    fn name(&self) -> &str {
        "css-minify"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let input = std::str::from_utf8(&asset.data)
            .map_err(StyleError::from)?
            .to_string();
        let options = grass::Options::default()
            .style(grass::OutputStyle::Compressed)
            .input_syntax(grass::InputSyntax::Scss);
        let css = grass::from_string(input, &options).map_err(StyleError::from)?;

        Ok(Some(asset.with_data(css)))
    }
}
