pub mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;

use cli::{Cli, Command, PoolArgs, parse_code_list};
use common::logger::init_tracing;
use waybill::{
    WaybillService,
    config::AppConfig,
    db::Db,
    pool::{
        Allocator, Reconciler,
        model::{NewWaybill, PoolKey},
        repository_sqlx::SqlxWaybillRepository,
    },
    submission::types::{Manifest, SubmitOptions},
};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn pool_key(args: PoolArgs, cfg: &AppConfig) -> PoolKey {
    PoolKey::new(
        args.vendor.unwrap_or_else(|| cfg.pool.vendor.clone()),
        args.series.unwrap_or_else(|| cfg.pool.series.clone()),
    )
}

async fn run(cli: Cli, cfg: AppConfig) -> anyhow::Result<ExitCode> {
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections)
        .await
        .with_context(|| format!("connect to {}", cfg.database_url))?;
    db.migrate().await?;

    let repo = Arc::new(SqlxWaybillRepository::new(db.pool.clone()));
    let allocator = Allocator::new(repo.clone());
    let vendor_or_default = |v: Option<String>| v.unwrap_or_else(|| cfg.pool.vendor.clone());

    match cli.command {
        Command::Migrate => {
            tracing::info!(database_url = %cfg.database_url, "schema is up to date");
        }

        Command::Provision {
            pool,
            from_file,
            test,
            mut codes,
        } => {
            if let Some(path) = from_file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?;
                codes.extend(parse_code_list(&text));
            }

            let key = pool_key(pool, &cfg);
            let batch: Vec<NewWaybill> = codes
                .into_iter()
                .map(|c| if test { NewWaybill::test(c) } else { NewWaybill::live(c) })
                .collect();

            let inserted = allocator.provision(&key, &batch).await?;
            print_json(&serde_json::json!({
                "pool": key.to_string(),
                "requested": batch.len(),
                "inserted": inserted,
            }))?;
        }

        Command::Allocate { pool } => {
            let key = pool_key(pool, &cfg);
            print_json(&allocator.take(&key).await?)?;
        }

        Command::Release { code, vendor } => {
            let outcome = allocator.release(&code, &vendor_or_default(vendor)).await?;
            print_json(&serde_json::json!({ "code": code, "outcome": outcome }))?;
        }

        Command::MarkConsumed { code, vendor } => {
            let reconciler = Reconciler::new(repo.clone());
            let outcome = reconciler
                .mark_consumed(&code, &vendor_or_default(vendor))
                .await?;
            print_json(&serde_json::json!({ "code": code, "outcome": outcome }))?;
        }

        Command::Check { code, vendor } => {
            let status = allocator
                .check_availability(&code, &vendor_or_default(vendor))
                .await?;
            print_json(&status)?;
        }

        Command::Stats { pool } => {
            let key = pool_key(pool, &cfg);
            print_json(&allocator.stats(&key).await?)?;
        }

        Command::Submit { manifest, waybill } => {
            let raw = std::fs::read(&manifest)
                .with_context(|| format!("read {}", manifest.display()))?;
            let manifest: Manifest =
                serde_json::from_slice(&raw).context("manifest is not valid JSON")?;

            let service = WaybillService::from_config(&db, &cfg)?;
            let opts = SubmitOptions {
                custom_waybill: waybill,
            };

            match service.submit(&manifest, opts).await {
                Ok(receipt) => print_json(&receipt)?,
                Err(e) => {
                    print_json(&e.payload())?;
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env();

    init_tracing(cfg.json_logs);

    run(cli, cfg).await
}
