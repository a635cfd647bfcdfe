//! Bench command implementation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::output::{format_results, print_info, print_success, print_warning};
use cm_client::bench::{BenchError, TestSuite};
use cm_client::viewer::HeadlessRenderer;
use cm_client::{ConnectionManager, HttpBackend, SessionCoordinator, TestOrchestrator, WsDialer};
use cm_core::config::ClientConfig;
use cm_core::traits::Backend;
use cm_core::ExpectationKind;

/// Options of `cm2 bench`
#[derive(Debug, Clone, Default)]
pub struct BenchOptions {
    pub cases: Option<PathBuf>,
    pub case: Option<String>,
    pub ground_truth: bool,
    pub output: Option<PathBuf>,
}

/// Load the suite from `--cases`, the configured path, or the built-in set
pub fn load_suite(config: &ClientConfig, cases: Option<&PathBuf>) -> Result<TestSuite> {
    let default_timeout = config.bench.default_case_timeout;
    match cases.or(config.bench.cases_path.as_ref()) {
        Some(path) => TestSuite::load(path, default_timeout)
            .with_context(|| format!("Failed to load cases from {:?}", path)),
        None => Ok(TestSuite::builtin(default_timeout)),
    }
}

/// Run the benchmark
pub async fn bench_command(config: &ClientConfig, options: BenchOptions) -> Result<()> {
    let suite = load_suite(config, options.cases.as_ref())?;
    let kind = if options.ground_truth {
        ExpectationKind::GroundTruth
    } else {
        ExpectationKind::Llm
    };

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(config)?);
    let dialer = Arc::new(WsDialer::new(config.clone()));
    let connection = Arc::new(ConnectionManager::new(dialer, config.reconnect.clone()));

    // Ground truth runs over the side channel only
    let coordinator = match kind {
        ExpectationKind::Llm => {
            let coordinator =
                SessionCoordinator::start(backend.clone(), connection.clone(), config)
                    .await
                    .context("Failed to start session")?;
            connection
                .wait_until_connected(Duration::from_secs(10))
                .await
                .context("Channel did not open")?;
            print_success(&format!(
                "Session {} connected",
                coordinator.session_id().short()
            ));
            Some(coordinator)
        }
        ExpectationKind::GroundTruth => None,
    };

    let orchestrator = Arc::new(TestOrchestrator::new(
        connection.clone(),
        backend,
        HeadlessRenderer::new(),
        config.bench.inter_case_delay,
    ));

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        })
    };

    let run = match &options.case {
        Some(id) => {
            print_info(&format!("Running case '{}' ({})", id, kind));
            orchestrator
                .run_named(&suite, id, kind)
                .await
                .map(|status| vec![(id.clone(), status)])
        }
        None => {
            print_info(&format!("Running {} cases ({})", suite.len(), kind));
            orchestrator.run_sequential(&suite, kind).await
        }
    };
    interrupt.abort();

    match run {
        Ok(_) => {}
        Err(BenchError::Cancelled) => print_warning("Run cancelled, partial results follow"),
        Err(e) => return Err(e.into()),
    }

    println!("{}", format_results(&orchestrator.results()));

    if let Some(path) = &options.output {
        let json = orchestrator.export_results()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {:?}", path))?;
        print_success(&format!("Results written to {:?}", path));
    }

    match coordinator {
        Some(coordinator) => coordinator.close().await,
        None => connection.disconnect().await,
    }
    Ok(())
}
