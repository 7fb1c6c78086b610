use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, Context, Result};
use clap::{builder::BoolishValueParser, Parser};
use smokepit::{
    auth::acquire_credentials,
    config::{load_config, Overrides, SettingsBuilder},
    evaluator::Strictness,
    executor::{build_client, ExecutionContext},
    report,
    runner::run_suite,
    suite::Suite,
};

#[derive(Parser, Debug)]
#[command(
    name = "smokepit",
    version,
    about = "Endpoint smoke-test runner",
    disable_help_subcommand = true
)]
struct Cli {
    /// Suite file (JSON); the built-in suite is used when omitted
    #[arg(short, long, env = "SMOKEPIT_SUITE", value_name = "FILE")]
    suite: Option<PathBuf>,

    /// Directory or file containing smokepit.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Select a profile from smokepit.json
    #[arg(short = 'P', long, env = "SMOKEPIT_PROFILE")]
    profile: Option<String>,

    /// Env file with template variables, relative to the config directory
    #[arg(short, long)]
    env: Option<PathBuf>,

    /// Base URL of the target
    #[arg(short, long, env = "SMOKEPIT_BASE_URL")]
    base_url: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(
        long,
        env = "SMOKEPIT_INSECURE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    insecure: Option<bool>,

    /// What a `"success": false` body does to an accepted response
    #[arg(long, value_enum, env = "SMOKEPIT_STRICTNESS")]
    strictness: Option<Strictness>,

    /// Per-request timeout
    #[arg(long, env = "SMOKEPIT_TIMEOUT", value_name = "SECS")]
    timeout: Option<u64>,

    /// Path placeholder value, e.g. --set id=42 (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    placeholders: Vec<(String, String)>,

    /// Telegram id of the test user
    #[arg(long, env = "SMOKEPIT_TELEGRAM_ID")]
    telegram_id: Option<String>,

    /// Admin login email
    #[arg(long, env = "SMOKEPIT_ADMIN_EMAIL")]
    admin_email: Option<String>,

    /// Admin login password
    #[arg(long, env = "SMOKEPIT_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Run only endpoints whose name contains this text
    #[arg(long, value_name = "TEXT")]
    only: Option<String>,

    /// Write a JSON report to this file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Print the endpoints that would run and exit
    #[arg(long)]
    list: bool,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "SMOKEPIT_LOG", default_value = "warn")]
    log_level: String,

    /// Override base directory used for resolving paths
    #[arg(long)]
    cwd: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    smokepit::init_logging(&cli.log_level);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let base_dir = cli
        .cwd
        .as_ref()
        .map(|p| resolve_path(p))
        .transpose()?
        .unwrap_or(std::env::current_dir()?);

    let config_target = cli
        .config
        .as_ref()
        .map(|p| resolve_relative(&base_dir, p))
        .unwrap_or_else(|| base_dir.clone());

    let cfg = load_config(&config_target).context("loading configuration")?;
    let config_dir = cfg.as_ref().map(|c| c.dir.clone()).unwrap_or_else(|| {
        if config_target.is_dir() {
            config_target.clone()
        } else {
            config_target
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| config_target.clone())
        }
    });

    let overrides = Overrides {
        base_url: cli.base_url.clone(),
        insecure: cli.insecure,
        strictness: cli.strictness,
        timeout_secs: cli.timeout,
        suite: cli.suite.as_ref().map(|p| resolve_relative(&base_dir, p)),
        env_file: cli.env.as_ref().map(|p| resolve_relative(&config_dir, p)),
        placeholders: cli.placeholders.clone(),
        telegram_id: cli.telegram_id.clone(),
        admin_email: cli.admin_email.clone(),
        admin_password: cli.admin_password.clone(),
    };
    let settings =
        SettingsBuilder::new(config_dir, cfg, cli.profile.clone(), overrides).build()?;
    if let Some(profile) = &settings.profile_name {
        tracing::info!(profile = %profile, "using profile");
    }

    let mut suite = match &settings.suite_path {
        Some(path) => Suite::load(path).await,
        None => Suite::builtin(),
    }
    .context("loading endpoint suite")?;

    if let Some(needle) = &cli.only {
        suite.retain_matching(needle);
        if suite.is_empty() {
            bail!("no endpoints match `{}`", needle);
        }
    }

    if cli.list {
        report::print_descriptor_list(&suite, &settings.placeholders);
        return Ok(ExitCode::SUCCESS);
    }

    let client = build_client(settings.timeout, settings.insecure)?;
    report::print_header(settings.base_url.as_str(), suite.len(), settings.strictness);

    let credentials = acquire_credentials(
        &client,
        &settings.base_url,
        settings.user_login.as_ref(),
        settings.admin_login.as_ref(),
    )
    .await;
    report::print_credentials(credentials.availability());

    let context = ExecutionContext::new(client, settings.base_url.clone(), credentials)
        .with_placeholders(settings.placeholders.clone())
        .with_strictness(settings.strictness)
        .with_admin_cookie(settings.admin_cookie.clone());

    let run = run_suite(&context, &suite, report::print_record).await;
    report::print_summary(&run.summary);

    if let Some(path) = &cli.report {
        let path = resolve_relative(&base_dir, path);
        run.write_json(&path)?;
        println!("Report written to {}", path.display());
    }

    Ok(if run.summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim().trim_start_matches(':');
    if key.is_empty() {
        return Err(format!("placeholder name is empty in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
