use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use fude::{
    Config, Executor, FudeError, PreviewServer, Profile, Registry, ServerOptions, Site, Watcher,
};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "fude",
    version,
    about = "Build static site assets and preview them with live reload."
)]
struct Cli {
    /// Path to the config file (TOML). Defaults apply when it's missing.
    #[arg(long, global = true, value_name = "PATH", default_value = fude::config::DEFAULT_PATH)]
    config: Utf8PathBuf,

    /// Port of the preview server, overrides the config file.
    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true, value_enum, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// What to do; `dev` when omitted.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Build everything into the develop output.
    Build,
    /// Clean and build everything into the publish output.
    Publish,
    /// Build, then serve the output and rebuild on changes.
    Dev,
    /// Remove generated files from the develop output.
    Clean,
    /// Run a single task by name.
    Run {
        task: String,
        /// Use the publish profile.
        #[arg(long)]
        publish: bool,
    },
    /// List the registered tasks.
    Tasks {
        /// Print the task graph as a Mermaid flowchart instead.
        #[arg(long)]
        mermaid: bool,
        #[arg(long)]
        publish: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = fude::logging::init(cli.log_level.into()) {
        eprintln!("{}", FudeError::Logging(e));
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every task that ran succeeded.
fn run(cli: Cli) -> Result<bool, FudeError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Dev) {
        Command::Build => run_task(&Site::new(config, Profile::Develop), "build"),
        Command::Publish => run_task(&Site::new(config, Profile::Publish), "default"),
        Command::Clean => run_task(&Site::new(config, Profile::Develop), "clean"),
        Command::Run { task, publish } => run_task(&Site::new(config, profile(publish)), &task),
        Command::Tasks { mermaid, publish } => {
            tasks(&Site::new(config, profile(publish)), mermaid)?;
            Ok(true)
        }
        Command::Dev => dev(Site::new(config, Profile::Develop)),
    }
}

fn profile(publish: bool) -> Profile {
    if publish {
        Profile::Publish
    } else {
        Profile::Develop
    }
}

fn run_task(site: &Site, name: &str) -> Result<bool, FudeError> {
    let registry = site.registry()?;
    let run = Executor::new(&registry).run(name)?;
    print!("{}", run.report());
    Ok(run.is_success())
}

fn tasks(site: &Site, mermaid: bool) -> Result<(), FudeError> {
    let registry = site.registry()?;
    registry.validate()?;

    if mermaid {
        println!("{registry}");
        return Ok(());
    }

    for root in registry.roots() {
        print!("{}", registry.render_tree(root)?);
    }
    Ok(())
}

fn dev(site: Site) -> Result<bool, FudeError> {
    let registry = Arc::new(site.registry()?);
    let config = site.config();

    // A broken source shouldn't keep the preview from starting.
    let run = Executor::new(&registry).run("default")?;
    print!("{}", run.report());

    let server = Arc::new(PreviewServer::start(
        site.output(),
        &ServerOptions::from(&config.server),
    )?);

    let mut watcher = Watcher::new(&config.src);
    for binding in site.bindings() {
        registry.resolve(binding.task)?;

        let registry = registry.clone();
        let server = server.clone();
        watcher.bind(&binding.patterns, config.watch.debounce(), move || {
            rebuild(&registry, &server, binding.task, binding.reload)
        })?;
    }

    watcher.start()?.wait();
    Ok(true)
}

fn rebuild(
    registry: &Registry,
    server: &PreviewServer,
    task: &str,
    reload: fude::ReloadKind,
) -> fude::TaskResult {
    let run = Executor::new(registry).run(task)?;
    print!("{}", run.report());

    if !run.is_success() {
        anyhow::bail!("{task} failed, browsers were not reloaded");
    }

    server.reload(reload);
    Ok(())
}
