use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use attest_crypto::{EcdsaSigner, Ed25519Signer, RsaModulus, RsaSigner, Side, Signer};
use attest_ledger::{AppendRequest, BatchProcessor, Entry, Ledger, VerificationReport, VerifyOptions};
use attest_store::{FileBackend, ZstdCompressor};
use attest_types::{Digest, Value};
use colored::Colorize;
use serde_json::json;
use tracing::info;

use crate::cli::*;
use crate::settings::{KeyAlgorithm, Settings};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    if let Command::Keygen(args) = cli.command {
        return cmd_keygen(args);
    }

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(path) = cli.ledger {
        settings.storage.path = path;
    }
    let ledger = open_ledger(&settings)?;

    let result = match cli.command {
        Command::Append(args) => cmd_append(&ledger, args, format),
        Command::Import(args) => cmd_import(&ledger, args, format),
        Command::Log(args) => cmd_log(&ledger, args, format),
        Command::Show(args) => cmd_show(&ledger, args, format),
        Command::Verify(args) => cmd_verify(&ledger, args, format),
        Command::Stats => cmd_stats(&ledger, format),
        Command::Proof(args) => cmd_proof(&ledger, args, format),
        Command::Keygen(_) => Ok(()),
    };
    ledger.close()?;
    result
}

fn open_ledger(settings: &Settings) -> anyhow::Result<Ledger> {
    let storage = &settings.storage;
    let backend = FileBackend::open(&storage.path, storage.backend.clone())
        .with_context(|| format!("opening ledger {}", storage.path.display()))?;

    let mut builder = Ledger::builder(Arc::new(backend)).config(settings.ledger.clone());
    if storage.compression {
        builder = builder.compression(Arc::new(ZstdCompressor::new(storage.zstd_level)));
    }
    if let Some(signer) = settings.signer()? {
        builder = builder.signer(signer);
    }
    Ok(builder.open()?)
}

fn parse_json(text: &str, what: &str) -> anyhow::Result<Value> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("{what} is not valid JSON"))?;
    Ok(Value::from(parsed))
}

fn cmd_append(ledger: &Ledger, args: AppendArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut request = AppendRequest::new(parse_json(&args.payload, "payload")?);
    if let Some(metadata) = &args.metadata {
        request = request.metadata(parse_json(metadata, "metadata")?);
    }
    if args.sign {
        request = request.sign(true);
    } else if args.no_sign {
        request = request.sign(false);
    }

    let entry = ledger.append(request)?;
    match format {
        OutputFormat::Json => println!("{}", entry.to_json()),
        OutputFormat::Text => {
            let signed = if entry.is_signed() { " (signed)" } else { "" };
            println!(
                "{} Appended entry {} {}{}",
                "✓".green().bold(),
                entry.sequence().to_string().bold(),
                entry.content_hash().short_hex().cyan(),
                signed
            );
        }
    }
    Ok(())
}

fn cmd_import(ledger: &Ledger, args: ImportArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }
    let file = fs::File::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let mut batch = BatchProcessor::new(ledger.clone(), args.batch_size);
    let mut imported = 0usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", args.file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let payload = parse_json(&line, &format!("line {}", index + 1))?;
        if batch.is_full() {
            imported += batch.flush()?.len();
        }
        batch.add_entry(payload)?;
    }
    imported += batch.flush()?.len();
    info!(imported, flushes = batch.stats().flushes, "import finished");

    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({ "imported": imported, "length": ledger.len(), "head": ledger.head().to_hex() })
        ),
        OutputFormat::Text => println!(
            "{} Imported {} entries (length {})",
            "✓".green().bold(),
            imported.to_string().bold(),
            ledger.len()
        ),
    }
    Ok(())
}

fn print_entry(entry: &Entry, oneline: bool) {
    if oneline {
        println!(
            "{} {} {}",
            format!("{:>6}", entry.sequence()).yellow(),
            entry.content_hash().short_hex().cyan(),
            entry.payload().to_json()
        );
        return;
    }
    println!("{} {}", "entry".yellow().bold(), entry.sequence().to_string().yellow().bold());
    println!("  Time:      {}", entry.timestamp().to_rfc3339());
    println!("  Hash:      {}", entry.content_hash().to_hex().cyan());
    println!("  Previous:  {}", entry.prev_hash().to_hex());
    if let Some(signer) = entry.signer_id() {
        println!("  Signed by: {}", signer.green());
    }
    println!("  Payload:   {}", entry.payload().to_json());
    if let Some(metadata) = entry.metadata() {
        println!("  Metadata:  {}", metadata.to_json());
    }
    println!();
}

fn cmd_log(ledger: &Ledger, args: LogArgs, format: OutputFormat) -> anyhow::Result<()> {
    for entry in ledger.get_entries(args.offset, args.limit)? {
        let entry = entry?;
        match format {
            OutputFormat::Json => println!("{}", entry.to_json()),
            OutputFormat::Text => print_entry(&entry, args.oneline),
        }
    }
    Ok(())
}

fn cmd_show(ledger: &Ledger, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(entry) = ledger.get_entry(args.sequence)? else {
        bail!("no entry {} (length {})", args.sequence, ledger.len());
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entry.to_json())?),
        OutputFormat::Text => print_entry(&entry, false),
    }
    Ok(())
}

fn cmd_verify(ledger: &Ledger, args: VerifyArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = match args.entry {
        Some(sequence) => ledger.verify_entry(sequence)?,
        None => {
            let mut options = VerifyOptions::new();
            if args.from.is_some() || args.to.is_some() {
                options = options.range(args.from.unwrap_or(0)..args.to.unwrap_or(u64::MAX));
            }
            if let Some(root) = &args.root {
                let width = ledger.hash_algorithm().output_len();
                options = options.expected_root(
                    Digest::from_hex(root, width).context("--root is not a valid digest")?,
                );
            }
            ledger.verify_integrity(options)?
        }
    };

    match format {
        OutputFormat::Json => println!("{}", report_json(&report)),
        OutputFormat::Text => match &report {
            VerificationReport::Valid { length, checked, head, merkle_root } => {
                println!(
                    "{} Chain intact: {} entries checked (length {})",
                    "✓".green().bold(),
                    checked.to_string().bold(),
                    length
                );
                println!("  Head: {}", head.to_hex().cyan());
                if let Some(root) = merkle_root {
                    println!("  Root: {}", root.to_hex().cyan());
                }
            }
            VerificationReport::Failed(failure) => println!(
                "{} {} at sequence {}: {}",
                "✗".red().bold(),
                failure.reason.as_str().red().bold(),
                failure.sequence,
                failure.detail
            ),
            VerificationReport::Cancelled { checked } => {
                println!("{} Cancelled after {} entries", "!".yellow(), checked)
            }
        },
    }

    if !report.is_valid() {
        bail!("verification failed");
    }
    Ok(())
}

fn report_json(report: &VerificationReport) -> serde_json::Value {
    match report {
        VerificationReport::Valid { head, length, checked, merkle_root } => json!({
            "valid": true,
            "length": length,
            "checked": checked,
            "head": head.to_hex(),
            "merkle_root": merkle_root.as_ref().map(Digest::to_hex),
        }),
        VerificationReport::Failed(failure) => json!({
            "valid": false,
            "sequence": failure.sequence,
            "reason": failure.reason.as_str(),
            "detail": failure.detail,
        }),
        VerificationReport::Cancelled { checked } => json!({
            "valid": false,
            "cancelled": true,
            "checked": checked,
        }),
    }
}

fn cmd_stats(ledger: &Ledger, format: OutputFormat) -> anyhow::Result<()> {
    let stats = ledger.get_stats();
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "total_entries": stats.total_entries,
                "first_entry_time": stats.first_entry_time.map(|t| t.to_rfc3339()),
                "last_entry_time": stats.last_entry_time.map(|t| t.to_rfc3339()),
                "hash_algorithm": stats.hash_algorithm.name(),
                "head": stats.head.to_hex(),
                "signer": ledger.signer_id(),
            })
        ),
        OutputFormat::Text => {
            println!("Entries:    {}", stats.total_entries.to_string().bold());
            println!("Algorithm:  {}", stats.hash_algorithm);
            println!("Head:       {}", stats.head.to_hex().cyan());
            if let (Some(first), Some(last)) = (stats.first_entry_time, stats.last_entry_time) {
                println!("First:      {}", first.to_rfc3339());
                println!("Last:       {}", last.to_rfc3339());
            }
            if let Some(signer) = ledger.signer_id() {
                println!("Signer:     {}", signer.green());
            }
        }
    }
    Ok(())
}

fn cmd_proof(ledger: &Ledger, args: ProofArgs, format: OutputFormat) -> anyhow::Result<()> {
    let (proof, root) = ledger.inclusion_proof(args.sequence)?;
    let side = |side: Side| match side {
        Side::Left => "left",
        Side::Right => "right",
    };
    match format {
        OutputFormat::Json => {
            let path: Vec<_> = proof
                .path
                .iter()
                .map(|(sibling, s)| json!({ "sibling": sibling.to_hex(), "side": side(*s) }))
                .collect();
            println!(
                "{}",
                json!({ "sequence": args.sequence, "root": root.to_hex(), "path": path })
            );
        }
        OutputFormat::Text => {
            println!("Proof for entry {}", args.sequence.to_string().yellow());
            for (sibling, s) in &proof.path {
                println!("  {:<5} {}", side(*s), sibling.to_hex());
            }
            println!("Root: {}", root.to_hex().cyan());
        }
    }
    Ok(())
}

fn cmd_keygen(args: KeygenArgs) -> anyhow::Result<()> {
    if args.output.exists() && !args.force {
        bail!("{} exists; pass --force to overwrite", args.output.display());
    }
    let (secret, public) = generate_key(args.algorithm, args.rsa_bits)?;
    write_key(&args.output, &hex::encode(secret))?;
    println!(
        "{} Wrote {} key to {}",
        "✓".green().bold(),
        args.algorithm.name(),
        args.output.display().to_string().bold()
    );
    println!("  Public key: {}", hex::encode(public).cyan());
    if args.algorithm != KeyAlgorithm::Ed25519 {
        println!("  Set [signing] algorithm = \"{}\"", args.algorithm.name());
    }
    Ok(())
}

/// Fresh key pair as (key file bytes, public key bytes).
fn generate_key(algorithm: KeyAlgorithm, rsa_bits: usize) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
    match algorithm {
        KeyAlgorithm::Ed25519 => {
            let signer = Ed25519Signer::generate("local");
            let Some(seed) = signer.seed() else {
                bail!("generated key has no seed");
            };
            Ok((seed.to_vec(), signer.public_key_bytes()))
        }
        KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => {
            let Some(curve) = algorithm.curve() else {
                bail!("{} is not an ECDSA algorithm", algorithm.name());
            };
            let signer = EcdsaSigner::generate("local", curve);
            let Some(secret) = signer.secret_bytes() else {
                bail!("generated key has no secret scalar");
            };
            Ok((secret, signer.public_key_bytes()))
        }
        KeyAlgorithm::RsaPss => {
            let signer = RsaSigner::generate("local", RsaModulus::from_bits(rsa_bits)?)?;
            Ok((signer.to_pkcs8_der()?, signer.public_key_bytes()))
        }
    }
}

fn write_key(path: &Path, hex_key: &str) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("writing {}", path.display()))?;
    writeln!(file, "{hex_key}")?;
    Ok(())
}
