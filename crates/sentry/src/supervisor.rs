//! Process orchestration.
//!
//! Startup is ordered: the metadata cache, realtime bus, notification sink,
//! ledgers and RPC health tracker come up first and live for the whole
//! process. The stage group (Prover, InputGenerator, StatusSurface) runs
//! under a rest-for-one policy: if any member terminates abnormally, the
//! whole group is torn down and restarted in order, while everything started
//! before it is preserved. Downstream stages hold handles into the worker
//! substrate, so a partial restart would leave them pointing at a dead
//! generation.

use std::{sync::Arc, time::Duration};

use ethproofs_api::EthProofsClient;
use tokio::{sync::watch, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    block_meta::BlockMetadataCache,
    config::Settings,
    events::EventBus,
    input_builder::{CombinedJsonInputBuilder, InputBuilder},
    input_generator::{GeneratorConfig, InputGenerator},
    ledger::{missed::MissedLedger, proved::ProvedLedger, store::LedgerStore},
    notifier::NotificationSink,
    prover::{Prover, ProverConfig},
    rpc::{ChainClient, EthRpcClient},
    rpc_health::RpcHealthService,
    status::{self, StatusState},
    submitter::Submitter,
};

/// Pause between stage group restarts, so a crash loop cannot spin hot.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Run the sentry until `shutdown` fires.
pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    // Long-lived substrate, in dependency order. None of this restarts.
    let block_meta = BlockMetadataCache::new();
    let bus = EventBus::new();

    let (sink, notifier) = NotificationSink::new(settings.slack_webhook.clone(), block_meta.clone());
    tokio::spawn(sink.run(shutdown.clone()));

    let store = LedgerStore::open(&settings.db_path)?;
    let proved = ProvedLedger::load(store.clone(), bus.clone())?;
    let missed = MissedLedger::load(store, bus.clone())?;
    info!(
        proved = proved.count().await,
        missed = missed.count().await,
        db = %settings.db_path.display(),
        "Ledgers loaded"
    );

    let (health_service, health_tx) =
        RpcHealthService::new(settings.eth_rpc_url.to_string(), notifier.clone());
    tokio::spawn(health_service.run(shutdown.clone()));

    let chain = ChainClient::Http(EthRpcClient::new(settings.eth_rpc_url.clone(), health_tx));
    let output_root = settings.data_dir.join("output");

    let submitter = Arc::new(match &settings.ethproofs {
        Some(api) => Submitter::api(
            EthProofsClient::new(api.base_url.clone(), api.api_key.clone()),
            api.cluster_id,
            notifier.clone(),
            output_root.clone(),
        ),
        None => Submitter::dev(notifier.clone(), output_root.clone()),
    });

    let builder: Arc<dyn InputBuilder> =
        Arc::new(CombinedJsonInputBuilder::new(&settings.data_dir));

    let prover_config = ProverConfig {
        program: "cargo-zisk".to_string(),
        elf_path: settings.elf_path.clone(),
        output_root,
        dev: settings.dev,
    };
    let generator_config = GeneratorConfig::new(&settings.data_dir);

    let (task_host_tx, task_host_rx) = watch::channel(false);

    // Rest-for-one: one generation of the stage group per loop iteration.
    loop {
        let generation = shutdown.child_token();
        let mut group: JoinSet<&'static str> = JoinSet::new();

        let (prover, prover_handle, prover_status) = Prover::new(
            prover_config.clone(),
            submitter.clone(),
            proved.clone(),
            missed.clone(),
            notifier.clone(),
            bus.clone(),
        );
        let token = generation.clone();
        group.spawn(async move {
            prover.run(token).await;
            "prover"
        });

        let (generator, _generator_handle, generator_status) = InputGenerator::new(
            generator_config.clone(),
            chain.clone(),
            builder.clone(),
            block_meta.clone(),
            missed.clone(),
            notifier.clone(),
            prover_handle,
        );
        let token = generation.clone();
        group.spawn(async move {
            generator.run(token).await;
            "input_generator"
        });

        let state = Arc::new(StatusState::new(
            prover_status,
            generator_status,
            task_host_rx.clone(),
            settings.prover_stuck_threshold_seconds,
        ));
        let token = generation.clone();
        let port = settings.health_port;
        group.spawn(async move {
            if let Err(e) = status::serve(state, port, token).await {
                error!(error = %e, "Status surface failed");
            }
            "status_surface"
        });

        let _ = task_host_tx.send(true);
        info!("Stage group started");

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Supervisor received shutdown signal");
                generation.cancel();
                while group.join_next().await.is_some() {}
                return Ok(());
            }

            Some(result) = group.join_next() => {
                let component = match result {
                    Ok(name) => name,
                    Err(e) if e.is_panic() => {
                        error!(error = ?e, "Stage panicked");
                        "unknown"
                    }
                    Err(_) => "unknown",
                };
                warn!(component = component, "Stage terminated, restarting stage group");

                let _ = task_host_tx.send(false);
                generation.cancel();
                while group.join_next().await.is_some() {}

                tokio::time::sleep(RESTART_BACKOFF).await;
            }
        }
    }
}
