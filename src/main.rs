use std::sync::{Arc, Mutex};

use flowcentive_indexer::{api, config, db, indexer, logging};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    logging::init();

    let cfg = config::load()?;
    info!(
        "Flowcentive indexer: rpc={} db={} port={} confirmations={}",
        cfg.rpc_http_url, cfg.db_path, cfg.port, cfg.confirmations
    );

    // Schema first, on its own connection, so the WAL file exists before
    // the API and indexer share one.
    db::run_migrations(&db::connect(&cfg.db_path)?)?;
    let conn = Arc::new(Mutex::new(db::connect(&cfg.db_path)?));

    let api_task = tokio::spawn(api::serve(cfg.clone(), Arc::clone(&conn)));
    let indexer_task = tokio::spawn(indexer::run(cfg, conn));

    // Either task ending takes the service down with it.
    tokio::select! {
        res = api_task => match res {
            Ok(Ok(())) => info!("Read API stopped"),
            Ok(Err(e)) => error!("Read API failed: {:?}", e),
            Err(e) => error!("Read API task panicked: {:?}", e),
        },
        res = indexer_task => match res {
            Ok(Ok(())) => info!("Flow indexer stopped"),
            Ok(Err(e)) => error!("Flow indexer failed: {:?}", e),
            Err(e) => error!("Flow indexer task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => info!("Ctrl-C received"),
    }

    info!("Flowcentive indexer shut down");
    Ok(())
}
