//! ledgerd - ledger operator tool
//!
//! ```text
//! ledgerd [--env dev] migrate
//! ledgerd [--env dev] open-account <owner> <balance> <currency>
//! ledgerd [--env dev] account <id>
//! ledgerd [--env dev] transfer <from> <to> <amount>
//! ```
//!
//! Config comes from `config/<env>.yaml`; results are printed as JSON.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;

use simple_ledger::config::AppConfig;
use simple_ledger::db::Database;
use simple_ledger::ledger::{CreateAccountParams, PgStore, Store, TransferEngine};
use simple_ledger::logging::init_logging;

const USAGE: &str = "usage: ledgerd [--env <env>] \
    (migrate | open-account <owner> <balance> <currency> | account <id> | transfer <from> <to> <amount>)";

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Command words, with the program name and `--env <value>` removed
fn get_command() -> Vec<String> {
    let mut command = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--env" || arg == "-e" {
            args.next();
        } else {
            command.push(arg);
        }
    }
    command
}

fn parse<T: FromStr>(name: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid {}: {}", name, value))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);

    let command = get_command();
    let command: Vec<&str> = command.iter().map(String::as_str).collect();
    if command.is_empty() {
        bail!(USAGE);
    }

    let db = Database::connect(&config.database)
        .await
        .context("cannot connect to db")?;
    let store = Arc::new(PgStore::new(db.pool().clone()));

    match command.as_slice() {
        ["migrate"] => {
            db.migrate().await.context("migration failed")?;
            tracing::info!(env = %env, "Migration complete");
        }
        ["open-account", owner, balance, currency] => {
            let params = CreateAccountParams::new(*owner, parse("balance", balance)?, *currency);
            print_json(&store.create_account(&params).await?)?;
        }
        ["account", id] => {
            print_json(&store.get_account(parse("id", id)?).await?)?;
        }
        ["transfer", from, to, amount] => {
            let engine = TransferEngine::from_config(store, &config.ledger);
            let result = engine
                .execute_transfer(
                    parse("from", from)?,
                    parse("to", to)?,
                    parse("amount", amount)?,
                )
                .await?;
            print_json(&result)?;
        }
        _ => bail!(USAGE),
    }

    Ok(())
}
