use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use relaysh::cli::{Cli, ParseOutcome, USAGE_EXIT_CODE};
use relaysh::config::Config;
use relaysh::init_logging;
use relaysh::remote::ssh::{self, PtyRequest, SshOptions};
use relaysh::remote::{Credential, Target};
use relaysh::session::{Interrupts, Multiplexer, MultiplexerOptions};
use relaysh::ui::{self, Console};

/// Environment variable that supplies the password non-interactively
const PASSWORD_ENV: &str = "RELAYSH_PASSWORD";

fn main() -> ExitCode {
    let cli = match Cli::parse_args() {
        ParseOutcome::Run(cli) => cli,
        ParseOutcome::Informational(info) => {
            let _ = info.print();
            return ExitCode::SUCCESS;
        }
        ParseOutcome::Usage(err) => {
            let _ = err.print();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            warn!("Exiting with error: {:#}", err);
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    };

    // Stdin reads cannot be cancelled; do not wait for a pending one.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> Result<()> {
    let (config, config_error) = Config::load_or_default(&cli.config_file);

    let _log_guard = init_logging(
        &cli.effective_log_level(&config.log_level),
        &config.log.file_path,
    )?;

    info!("relaysh starting");
    debug!("CLI arguments: {:?}", cli);
    if let Some(err) = config_error {
        warn!("Failed to load config: {:#}, using defaults", err);
    }

    let target = Target::parse(
        &cli.target,
        &config.connection.resolve_default_user(),
        config.connection.default_port,
    )?;

    let mut local = BufReader::new(tokio::io::stdin());
    let credential = read_credential(&target, &mut local).await?;

    let pty = cli.tty.then(|| {
        let (cols, rows) = ui::terminal_dimensions(&config.terminal);
        PtyRequest {
            term: config.terminal.term.clone(),
            cols: u32::from(cols),
            rows: u32::from(rows),
        }
    });
    let options = SshOptions {
        connect_timeout: config.connection.connect_timeout(),
        keepalive: config.connection.keepalive(),
        pty,
    };

    let session = ssh::connect(&target, &credential, &options).await?;

    let mut multiplexer = Multiplexer::new(
        Console::stdio(),
        MultiplexerOptions::from_config(&config.session, cli.tty),
    );
    let summary = multiplexer.run(session, local, Interrupts::Process).await?;

    info!(
        "Session with {} ended (local eof: {}, drain expired: {}, read failures: {})",
        target, summary.local_eof, summary.drain_expired, summary.stats.read_failures
    );
    Ok(())
}

/// Password from the environment, or prompted for on the terminal
async fn read_credential<R>(target: &Target, local: &mut R) -> Result<Credential>
where
    R: AsyncBufRead + Unpin,
{
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        debug!("Using password from {}", PASSWORD_ENV);
        return Ok(Credential::new(password));
    }

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("Password for {}: ", target).as_bytes())
        .await?;
    stdout.flush().await?;

    let mut password = String::new();
    let read = local
        .read_line(&mut password)
        .await
        .context("Failed to read password")?;
    if read == 0 {
        anyhow::bail!("No password entered");
    }

    Ok(Credential::new(password.trim_end_matches(['\r', '\n'])))
}
