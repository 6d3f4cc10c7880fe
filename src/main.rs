use std::path::PathBuf;
use std::process::ExitCode;

use cvaudit::config::{AuditConfig, APP_NAME, APP_VERSION};
use cvaudit::models::ExitStatus;
use cvaudit::Auditor;

const USAGE: &str = "\
usage: cvaudit <root> [options]

  --config <file>       JSON config; flags below override it
  --enable <a,b,..>     run only these units
  --disable <a,b,..>    never run these units
  --workers <n>         worker pool size (0 = available parallelism)
  --sample-limit <k>    max samples per heavy unit
  --report <path>       write a JSON report
  --persist-cache       reuse computed facts across runs
  -h, --help            show this help
  -V, --version         show the version";

/// Command line, before it is merged into an `AuditConfig`.
#[derive(Debug, Default, PartialEq)]
struct Args {
    root: Option<PathBuf>,
    config: Option<PathBuf>,
    enable: Option<Vec<String>>,
    disable: Vec<String>,
    workers: Option<usize>,
    sample_limit: Option<usize>,
    report: Option<PathBuf>,
    persist_cache: bool,
    help: bool,
    version: bool,
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Args {
    fn parse_from(args: &[String]) -> Result<Self, String> {
        let mut result = Args::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("{flag} requires a value"))
            };
            match arg.as_str() {
                "-h" | "--help" => result.help = true,
                "-V" | "--version" => result.version = true,
                "--persist-cache" => result.persist_cache = true,
                "--config" => result.config = Some(PathBuf::from(value(arg)?)),
                "--enable" => result.enable = Some(split_names(&value(arg)?)),
                "--disable" => result.disable.extend(split_names(&value(arg)?)),
                "--workers" => {
                    let raw = value(arg)?;
                    result.workers =
                        Some(raw.parse().map_err(|_| format!("invalid --workers: {raw}"))?);
                }
                "--sample-limit" => {
                    let raw = value(arg)?;
                    result.sample_limit =
                        Some(raw.parse().map_err(|_| format!("invalid --sample-limit: {raw}"))?);
                }
                "--report" => result.report = Some(PathBuf::from(value(arg)?)),
                flag if flag.starts_with('-') => return Err(format!("unknown option: {flag}")),
                path => {
                    if result.root.is_some() {
                        return Err(format!("unexpected argument: {path}"));
                    }
                    result.root = Some(PathBuf::from(path));
                }
            }
        }
        Ok(result)
    }

    fn into_config(self) -> Result<AuditConfig, String> {
        let mut config = match &self.config {
            Some(path) => AuditConfig::from_file(path).map_err(|e| e.to_string())?,
            None => AuditConfig::default(),
        };
        match self.root {
            Some(root) => config.root = root,
            None if self.config.is_none() => return Err("missing dataset root".to_string()),
            None => {}
        }
        if let Some(enable) = self.enable {
            config.enabled = Some(enable);
        }
        config.disabled.extend(self.disable);
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.sample_limit.is_some() {
            config.sample_limit = self.sample_limit;
        }
        if self.report.is_some() {
            config.report_path = self.report;
        }
        config.persist_cache |= self.persist_cache;
        Ok(config)
    }
}

fn exit_with(status: ExitStatus) -> ExitCode {
    ExitCode::from(status.code() as u8)
}

fn main() -> ExitCode {
    cvaudit::init_tracing();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match Args::parse_from(&raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{APP_NAME}: {e}\n\n{USAGE}");
            return exit_with(ExitStatus::Failure);
        }
    };
    if args.help {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    if args.version {
        println!("{APP_NAME} {APP_VERSION}");
        return ExitCode::SUCCESS;
    }

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{APP_NAME}: {e}");
            return exit_with(ExitStatus::Failure);
        }
    };

    let outcome = Auditor::new(config).and_then(|mut auditor| auditor.run());
    match outcome {
        Ok(outcome) => {
            match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!(error = %e, "Failed to serialize outcome"),
            }
            exit_with(outcome.status)
        }
        Err(e) => {
            let failure = serde_json::json!({
                "status": ExitStatus::Failure,
                "state": cvaudit::models::AuditState::Failed,
                "error": e.to_string(),
            });
            println!("{failure:#}");
            exit_with(ExitStatus::Failure)
        }
    }
}
