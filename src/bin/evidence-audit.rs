use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::{error, info};

use evidence_trail::anchor::{AnchorService, TrustTier, WitnessInput, WitnessRegistry};
use evidence_trail::chain::EventRecorder;
use evidence_trail::config::AppConfig;
use evidence_trail::database::Database;
use evidence_trail::merkle::{verify_proof_path, ProofPath};
use evidence_trail::EvidenceError;

fn database_arg() -> Arg {
    Arg::new("database")
        .short('d')
        .long("database")
        .value_name("URL")
        .help("Database URL (defaults to the configured database_url)")
}

fn cli() -> Command {
    Command::new("evidence-audit")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Independently verify an evidence trail")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .subcommand(
            Command::new("verify-chain")
                .about("Recompute every payload hash and link in the event chain")
                .arg(database_arg()),
        )
        .subcommand(
            Command::new("verify-proof")
                .about("Check a Merkle inclusion proof against a root")
                .arg(
                    Arg::new("leaf")
                        .long("leaf")
                        .value_name("HASH")
                        .required(true)
                        .help("Payload hash of the event"),
                )
                .arg(
                    Arg::new("sibling")
                        .long("sibling")
                        .value_name("HASH")
                        .action(ArgAction::Append)
                        .help("Sibling hash, leaf level first; repeat per level"),
                )
                .arg(
                    Arg::new("position")
                        .long("position")
                        .value_name("left|right")
                        .action(ArgAction::Append)
                        .help("Side of the matching sibling; repeat per level"),
                )
                .arg(
                    Arg::new("root")
                        .long("root")
                        .value_name("HASH")
                        .required(true)
                        .help("Anchored Merkle root"),
                ),
        )
        .subcommand(
            Command::new("anchor")
                .about("Anchor a closed window manually")
                .arg(database_arg())
                .arg(
                    Arg::new("start")
                        .long("start")
                        .value_name("RFC3339")
                        .required(true),
                )
                .arg(Arg::new("end").long("end").value_name("RFC3339").required(true)),
        )
        .subcommand(
            Command::new("prove")
                .about("Print the inclusion proof of an event in an anchor")
                .arg(database_arg())
                .arg(Arg::new("anchor").long("anchor").value_name("ID").required(true))
                .arg(Arg::new("event").long("event").value_name("ID").required(true)),
        )
        .subcommand(
            Command::new("witness")
                .about("Record an external attestation of an anchor")
                .arg(database_arg())
                .arg(Arg::new("anchor").long("anchor").value_name("ID").required(true))
                .arg(Arg::new("provider").long("provider").required(true))
                .arg(Arg::new("target").long("target").required(true))
                .arg(Arg::new("proof").long("proof").required(true))
                .arg(
                    Arg::new("timestamp")
                        .long("timestamp")
                        .value_name("RFC3339")
                        .help("Attestation time (defaults to now)"),
                )
                .arg(
                    Arg::new("tier")
                        .long("tier")
                        .help("local_timestamp, timestamp_authority or distributed_ledger"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let level = if matches.get_flag("verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match matches.subcommand() {
        Some(("verify-chain", sub)) => verify_chain(sub).await,
        Some(("verify-proof", sub)) => verify_proof(sub),
        Some(("anchor", sub)) => anchor(sub).await,
        Some(("prove", sub)) => prove(sub).await,
        Some(("witness", sub)) => witness(sub).await,
        _ => Err(anyhow!("no subcommand given")),
    }
}

async fn open_database(matches: &ArgMatches) -> Result<Database> {
    let url = match matches.get_one::<String>("database") {
        Some(url) => url.clone(),
        None => AppConfig::load()?.database_url,
    };
    info!("Opening {}", url);
    let database = Database::new(&url)
        .await
        .with_context(|| format!("failed to open {}", url))?;
    database.run_migrations().await?;
    Ok(database)
}

fn parse_time(matches: &ArgMatches, name: &str) -> Result<DateTime<Utc>> {
    let raw = matches
        .get_one::<String>(name)
        .ok_or_else(|| anyhow!("--{} is required", name))?;
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("--{} is not an RFC 3339 timestamp: {}", name, raw))?
        .with_timezone(&Utc))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("--{} is required", name))
}

async fn verify_chain(matches: &ArgMatches) -> Result<()> {
    let database = open_database(matches).await?;
    let recorder = EventRecorder::new(database, 1);

    match recorder.verify_stored_chain().await {
        Ok(status) => {
            println!("✓ {}", status.summary());
            Ok(())
        }
        Err(EvidenceError::ChainIntegrityViolation {
            sequence_number,
            event_id,
            kind,
        }) => {
            error!("Chain verification failed at sequence {}", sequence_number);
            println!(
                "✗ Chain broken at sequence {} (event {}): {}",
                sequence_number, event_id, kind
            );
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn verify_proof(matches: &ArgMatches) -> Result<()> {
    let strings = |name: &str| -> Vec<String> {
        matches
            .get_many::<String>(name)
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    };
    let path = ProofPath {
        siblings: strings("sibling"),
        positions: strings("position"),
    };

    match verify_proof_path(required(matches, "leaf")?, &path, required(matches, "root")?) {
        Ok(true) => {
            println!("valid");
            Ok(())
        }
        Ok(false) => {
            println!("invalid");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("malformed proof: {}", e);
            std::process::exit(2);
        }
    }
}

async fn anchor(matches: &ArgMatches) -> Result<()> {
    let start = parse_time(matches, "start")?;
    let end = parse_time(matches, "end")?;
    let service = AnchorService::new(open_database(matches).await?);

    let outcome = service.create_anchor(start, end).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn prove(matches: &ArgMatches) -> Result<()> {
    let service = AnchorService::new(open_database(matches).await?);
    let anchor_id = required(matches, "anchor")?;
    let event_id = required(matches, "event")?;

    let proof = service.generate_proof(anchor_id, event_id).await?;
    let path = proof.to_path();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "anchorId": anchor_id,
            "eventId": event_id,
            "leafHash": proof.leaf_hash,
            "root": proof.root,
            "siblings": path.siblings,
            "positions": path.positions,
        }))?
    );
    Ok(())
}

async fn witness(matches: &ArgMatches) -> Result<()> {
    let timestamp = match matches.get_one::<String>("timestamp") {
        Some(_) => parse_time(matches, "timestamp")?,
        None => Utc::now(),
    };
    let trust_tier = matches
        .get_one::<String>("tier")
        .map(|tier| tier.parse::<TrustTier>())
        .transpose()?;

    let input = WitnessInput {
        target: required(matches, "target")?.to_string(),
        timestamp,
        proof: required(matches, "proof")?.to_string(),
        provider: required(matches, "provider")?.to_string(),
        trust_tier,
    };

    let anchor_id = required(matches, "anchor")?;
    let registry = WitnessRegistry::new(open_database(matches).await?);
    let witness = registry.add_witness(anchor_id, input).await?;
    let status = registry.integrity_status(anchor_id).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "witness": witness,
            "integrity": status,
        }))?
    );
    Ok(())
}
