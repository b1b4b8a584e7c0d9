use std::io::Write;
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::stage::{Asset, Transform};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Couldn't run '{0}': {1}")]
    Spawn(String, std::io::Error),

    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),
}

/// Transpiles and optionally minifies JavaScript by piping it through the
/// `esbuild` executable.
#[derive(Debug, Clone)]
pub struct Esbuild {
    program: String,
    target: Option<String>,
    minify: bool,
}

impl Esbuild {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            target: None,
            minify: false,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    fn args(&self, asset: &Asset) -> Vec<String> {
        let mut args = vec![
            String::from("--loader=js"),
            format!("--sourcefile={}", asset.source),
        ];
        if let Some(target) = &self.target {
            args.push(format!("--target={target}"));
        }
        if self.minify {
            args.push(String::from("--minify"));
        }
        args
    }

    fn compile(&self, asset: &Asset) -> Result<Vec<u8>, ScriptError> {
        let spawn = |e| ScriptError::Spawn(self.program.clone(), e);

        let mut child = Command::new(&self.program)
            .args(self.args(asset))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn)?;

        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            scope.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // A failed write shows up as a failed exit status.
                    let _ = stdin.write_all(&asset.data);
                }
            });
            child.wait_with_output()
        })
        .map_err(spawn)?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output.stdout)
    }
}

impl Transform for Esbuild {
    fn name(&self) -> &str {
        "esbuild"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let data = self.compile(&asset)?;
        Ok(Some(asset.with_data(data)))
    }
}

/// Leaves the asset as it is.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        Ok(Some(asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> Asset {
        Asset {
            source: "src/js/app.js".into(),
            path: "app.js".into(),
            data: b"const a = () => 1;".to_vec(),
        }
    }

    #[test]
    fn arguments_follow_options() {
        let esbuild = Esbuild::new("esbuild").target("es2015").minify(true);
        assert_eq!(
            esbuild.args(&asset()),
            vec![
                "--loader=js",
                "--sourcefile=src/js/app.js",
                "--target=es2015",
                "--minify"
            ]
        );

        let plain = Esbuild::new("esbuild");
        assert_eq!(plain.args(&asset()).len(), 2);
    }

    #[test]
    fn missing_executable_is_a_transform_error() {
        let err = Esbuild::new("fude-no-such-esbuild")
            .apply(asset())
            .unwrap_err();
        assert!(err.to_string().starts_with("Couldn't run 'fude-no-such-esbuild'"));
    }

    #[test]
    fn passthrough_keeps_everything() {
        assert_eq!(Passthrough.apply(asset()).unwrap(), Some(asset()));
    }
}
