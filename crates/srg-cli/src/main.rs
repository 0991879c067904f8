// crates/srg-cli/src/main.rs
// ============================================================================
// Module: Gateway CLI Entry Point
// Description: Command dispatcher for serving the gateway and running its
//              offline audit/webhook maintenance operations.
// Purpose: One binary that loads `SRG_*` configuration once and either
//          serves HTTP traffic or runs a standalone operational task
//          against the same audit log / dead-letter store the server uses.
// Dependencies: clap, tokio, srg-config, srg-gateway, srg-audit, srg-webhook
// ============================================================================

//! ## Overview
//! [`Commands::Serve`] builds a full [`srg_gateway::AppState`] via
//! [`startup::build_app_state`] and serves [`srg_gateway::build_router`]
//! over `axum-server`. [`Commands::VerifyAudit`] and
//! [`Commands::ExportBundle`] re-derive facts from the audit log without
//! starting a server. [`Commands::ReplayDeadLetters`] re-attempts delivery
//! of every webhook the dispatcher gave up on.

mod startup;

use std::io::Write as _;
use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use srg_config::ContractSchemas;
use srg_config::GatewayConfig;

/// Sovereign RAG Gateway command-line interface.
#[derive(Parser, Debug)]
#[command(name = "srg-gateway", about = "Sovereign RAG Gateway server and operational tooling")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Starts the HTTP server.
    Serve(ServeArgs),
    /// Walks the audit log's hash chain and reports whether it is intact.
    VerifyAudit(VerifyAuditArgs),
    /// Exports a standalone, schema-validated evidence bundle for one
    /// request id.
    ExportBundle(ExportBundleArgs),
    /// Re-attempts delivery of every dead-lettered webhook.
    ReplayDeadLetters,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
    /// Allow binding to a non-loopback address. Absent this flag, `serve`
    /// refuses any `--bind` address that is not loopback, matching the
    /// gateway's default posture of never exposing itself to a network
    /// without an explicit operator decision.
    #[arg(long)]
    allow_non_loopback: bool,
}

#[derive(Args, Debug)]
struct VerifyAuditArgs {
    /// Overrides `SRG_AUDIT_LOG_PATH` for this run.
    #[arg(long)]
    log_path: Option<std::path::PathBuf>,
}

#[derive(Args, Debug)]
struct ExportBundleArgs {
    /// Request id to export a bundle for.
    #[arg(long)]
    request_id: String,
    /// Overrides `SRG_AUDIT_LOG_PATH` for this run.
    #[arg(long)]
    log_path: Option<std::path::PathBuf>,
    /// Walk the full chain rather than only this event's link to its
    /// predecessor.
    #[arg(long)]
    full_chain_verify: bool,
}

/// A CLI-level failure, rendered to stderr before exit.
#[derive(Debug)]
struct CliError {
    /// Human-readable failure description.
    message: String,
}

impl CliError {
    /// Builds a [`CliError`] from any displayable failure.
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Result alias for fallible CLI operations.
type CliResult<T> = Result<T, CliError>;

/// Process entry point.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.message),
    }
}

/// Parses arguments, loads configuration, and dispatches to the requested
/// subcommand.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = GatewayConfig::load().map_err(|err| CliError::new(err.to_string()))?;
    init_logging(&config.log_level);

    match cli.command {
        Commands::Serve(args) => command_serve(config, args).await,
        Commands::VerifyAudit(args) => command_verify_audit(config, args),
        Commands::ExportBundle(args) => command_export_bundle(config, args),
        Commands::ReplayDeadLetters => command_replay_dead_letters(config).await,
    }
}

/// Installs a JSON-formatted `tracing` subscriber filtered at `log_level`,
/// falling back to `info` on an unparseable filter.
fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level).unwrap_or_else(|_err| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
}

/// Builds the full [`srg_gateway::AppState`] and serves it over `bind`.
async fn command_serve(config: GatewayConfig, args: ServeArgs) -> CliResult<ExitCode> {
    if !args.allow_non_loopback && !args.bind.ip().is_loopback() {
        return Err(CliError::new(format!(
            "refusing to bind non-loopback address {} without --allow-non-loopback",
            args.bind
        )));
    }

    let bind = args.bind;
    let state = startup::build_app_state(config).map_err(|err| CliError::new(err.to_string()))?;
    let router = srg_gateway::build_router(std::sync::Arc::new(state));

    tracing::info!(%bind, "starting sovereign rag gateway");
    axum_server::bind(bind)
        .serve(router.into_make_service())
        .await
        .map_err(|err| CliError::new(format!("server exited: {err}")))?;

    Ok(ExitCode::SUCCESS)
}

/// Walks the configured (or overridden) audit log's hash chain and prints
/// a JSON verification summary.
fn command_verify_audit(config: GatewayConfig, args: VerifyAuditArgs) -> CliResult<ExitCode> {
    let log_path = args.log_path.unwrap_or(config.audit.log_path);
    let report = srg_audit::verify_chain(&log_path).map_err(|err| CliError::new(format!("failed to read {}: {err}", log_path.display())))?;

    let summary = serde_json::json!({
        "lines_checked": report.lines_checked,
        "trailing_line_skipped": report.trailing_line_skipped,
        "intact": report.is_intact(),
        "mismatches": report.mismatches.iter().map(|mismatch| serde_json::json!({
            "line_number": mismatch.line_number,
            "reason": mismatch.reason,
        })).collect::<Vec<_>>(),
    });
    write_stdout_line(&summary.to_string());

    if report.is_intact() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Projects one request's last audit event into a schema-validated
/// evidence bundle and prints it.
fn command_export_bundle(config: GatewayConfig, args: ExportBundleArgs) -> CliResult<ExitCode> {
    let log_path = args.log_path.unwrap_or(config.audit.log_path);
    let schemas = ContractSchemas::load(&config.contracts_dir).map_err(|err| CliError::new(err.to_string()))?;

    let bundle = srg_audit::generate_bundle(&args.request_id, &log_path, &schemas.evidence_bundle, args.full_chain_verify)
        .map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line(&bundle.to_string());
    Ok(ExitCode::SUCCESS)
}

/// Loads every dead-lettered webhook delivery and re-attempts it once,
/// without consulting the original delivery's retry/backoff policy.
async fn command_replay_dead_letters(config: GatewayConfig) -> CliResult<ExitCode> {
    let Some(store) = startup::build_dead_letter_store(&config).map_err(|err| CliError::new(err.to_string()))? else {
        write_stdout_line(r#"{"replayed":0,"failed":0,"note":"no dead-letter store configured"}"#);
        return Ok(ExitCode::SUCCESS);
    };

    let records = store.load().await.map_err(|err| CliError::new(err.to_string()))?;
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs_f64(config.webhook.timeout_s))
        .build()
        .map_err(|err| CliError::new(err.to_string()))?;

    let mut replayed = 0u32;
    let mut failed = 0u32;
    for record in &records {
        let outcome = client
            .post(&record.endpoint_url)
            .header("x-srg-idempotency-key", &record.idempotency_key)
            .json(&record.body)
            .send()
            .await;
        match outcome {
            Ok(response) if response.status().is_success() => replayed += 1,
            _ => failed += 1,
        }
    }

    write_stdout_line(&serde_json::json!({"replayed": replayed, "failed": failed, "total": records.len()}).to_string());
    Ok(ExitCode::SUCCESS)
}

/// Writes one line to stdout, discarding any write failure rather than
/// panicking (a closed stdout is not this process's problem to solve).
fn write_stdout_line(message: &str) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(&mut stdout, "{message}");
}

/// Writes `message` to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "error: {message}");
    ExitCode::FAILURE
}
