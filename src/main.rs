use std::env;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rust_barrage::client::warn_insecure_settings;
use rust_barrage::config::{print_config_help, Config};
use rust_barrage::controller::{RunController, RunOutput, RunReport};
use rust_barrage::errors::RunError;
use rust_barrage::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use rust_barrage::report::{render_stream_footer, render_summary};

/// Logs go to stderr so stdout carries only the report or CSV rows.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() {
    init_tracing();

    // Load configuration from environment variables
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(threads) = config.worker_threads {
        runtime.worker_threads(threads);
    }
    let runtime = match runtime.build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(config));
    std::process::exit(code);
}

async fn run(config: Config) -> i32 {
    if let Err(e) = register_metrics() {
        warn!(error = %e, "Failed to register metrics");
    }
    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));

    if let Some(port) = config.metrics_port {
        let registry = registry_arc.clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    config.log_summary();

    let controller = match config
        .to_template()
        .map_err(RunError::from)
        .and_then(|template| {
            warn_insecure_settings(&template);
            RunController::new(template, config.to_run_config())
        }) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            return 1;
        }
    };

    // Ctrl-C stops the run; everything already sent is still reported.
    let handle = controller.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            handle.stop();
        }
    });

    let result = controller.run().await;

    debug!(metrics = %gather_metrics_string(&registry_arc), "Final metrics");

    match result {
        Ok(output) => {
            print_output(&output);
            0
        }
        Err(e) => {
            error!(error = %e, "Load run failed");
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn print_output(output: &RunOutput) {
    match output.report {
        RunReport::Summary(ref stats) => {
            let mut stdout = io::stdout().lock();
            if let Err(e) = stdout
                .write_all(render_summary(stats).as_bytes())
                .and_then(|_| stdout.flush())
            {
                error!(error = %e, "Failed to write summary");
            }
        }
        RunReport::Streamed {
            records,
            errors,
            ref latency,
            ref connections,
        } => {
            // Stdout carries the rows; the closing summary goes to stderr.
            eprint!(
                "{}",
                render_stream_footer(
                    records,
                    errors,
                    latency.as_ref(),
                    connections,
                    output.wall_time
                )
            );
        }
    }

    if let Some(reason) = output.stop_reason {
        debug!(reason = %reason, "Run stop reason");
    }
}
