use std::sync::LazyLock;

use regex::Regex;

use crate::stage::{Asset, Transform};

static RE_VERBATIM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>")
        .expect("Invalid verbatim regex")
});

static RE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Invalid comment regex"));

static RE_BLANK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("Invalid blank regex"));

static RE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*\n\s*").expect("Invalid line break regex"));

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)[^>]*?(/?)>").expect("Invalid tag regex")
});

/// Elements that never have a closing tag.
const VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const INDENT: &str = "  ";

/// Conservative HTML minifier. Drops comments, collapses runs of spaces and
/// keeps one line break wherever the source had any, then re-indents every
/// line by two spaces per level of nesting. `<pre>` and `<textarea>` blocks
/// are copied verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMinify;

impl Transform for HtmlMinify {
    fn name(&self) -> &str {
        "html-minify"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let html = minify(asset.text()?);
        Ok(Some(asset.with_data(html)))
    }
}

pub(crate) fn minify(html: &str) -> String {
    let mut out = Indenter::default();
    let mut last = 0;

    for block in RE_VERBATIM.find_iter(html) {
        out.markup(&collapse(&html[last..block.start()]));
        out.verbatim(block.as_str());
        last = block.end();
    }
    out.markup(&collapse(&html[last..]));

    out.out.trim().to_string()
}

fn collapse(text: &str) -> String {
    let text = RE_COMMENT.replace_all(text, "");
    let text = RE_BREAK.replace_all(&text, "\n");
    RE_BLANK.replace_all(&text, " ").into_owned()
}

#[derive(Default)]
struct Indenter {
    out: String,
    depth: usize,
}

impl Indenter {
    fn at_line_start(&self) -> bool {
        self.out.is_empty() || self.out.ends_with('\n')
    }

    fn pad(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
    }

    fn markup(&mut self, text: &str) {
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.out.push('\n');
            }
            if line.is_empty() {
                continue;
            }

            let tags = Tags::count(line);
            if self.at_line_start() {
                self.pad(self.depth.saturating_sub(tags.leading_closes));
            }
            self.out.push_str(line);
            self.depth = (self.depth + tags.opens).saturating_sub(tags.closes);
        }
    }

    fn verbatim(&mut self, block: &str) {
        if self.at_line_start() {
            self.pad(self.depth);
        }
        self.out.push_str(block);
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tags {
    opens: usize,
    closes: usize,
    /// Closing tags before the first opening one, e.g. 2 for `</p></div>`.
    leading_closes: usize,
}

impl Tags {
    fn count(line: &str) -> Self {
        let mut tags = Tags::default();

        for caps in RE_TAG.captures_iter(line) {
            if !caps[1].is_empty() {
                tags.closes += 1;
                if tags.opens == 0 {
                    tags.leading_closes += 1;
                }
                continue;
            }

            let name = caps[2].to_ascii_lowercase();
            if caps[3].is_empty() && !VOID.contains(&name.as_str()) {
                tags.opens += 1;
            }
        }

        tags
    }
}
