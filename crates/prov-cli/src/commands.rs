use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use prov_repository::{
    export_archive, import_archive, ArchiveRepositoryBackend, BackendRegistry, InitialiseOptions,
    RepoError, RepositoryBackend, RepositoryBackendExt, RepositoryConfig,
};
use prov_types::ObjectKey;
use serde_json::json;

use crate::cli::*;

/// Configuration file picked up from the working directory.
const DEFAULT_CONFIG_FILE: &str = "prov.toml";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let registry = open_registry(cli.config.as_deref())?;
    let backend = match &cli.profile {
        Some(profile) => registry.backend(profile)?,
        None => registry.default_backend()?,
    };

    let mut out = io::stdout().lock();
    let result = dispatch(cli.command, backend.as_ref(), cli.format, &mut out);
    drop(backend);
    let closed = registry.close();
    result?;
    closed?;
    Ok(())
}

fn open_registry(config: Option<&Path>) -> anyhow::Result<BackendRegistry> {
    let config = match config {
        Some(path) => RepositoryConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            RepositoryConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => RepositoryConfig::default(),
    };
    Ok(BackendRegistry::new(config))
}

fn dispatch(
    command: Command,
    backend: &dyn RepositoryBackend,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match command {
        Command::Init(args) => cmd_init(args, backend, out),
        Command::Put(args) => cmd_put(args, backend, out),
        Command::Cat(args) => cmd_cat(args, backend, out),
        Command::Has(args) => cmd_has(args, backend, format, out),
        Command::Ls(_) => cmd_ls(backend, format, out),
        Command::Rm(args) => cmd_rm(args, backend, out),
        Command::Hash(args) => cmd_hash(args, backend, out),
        Command::Info(_) => cmd_info(backend, format, out),
        Command::Erase(args) => cmd_erase(args, backend, out),
        Command::Export(args) => cmd_export(args, backend, out),
        Command::Import(args) => cmd_import(args, backend, format, out),
        Command::Verify(args) => cmd_verify(args, backend, format, out),
    }
}

fn parse_keys(raw: &[String]) -> anyhow::Result<Vec<ObjectKey>> {
    raw.iter()
        .map(|s| ObjectKey::parse(s.as_str()).with_context(|| format!("invalid key '{s}'")))
        .collect()
}

fn cmd_init(
    args: InitArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    backend.initialise(&InitialiseOptions { clear: args.clear })?;
    let location = backend
        .location()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<none>".into());
    writeln!(
        out,
        "{} Initialized {} repository in {}",
        "✓".green().bold(),
        backend.kind(),
        location.bold()
    )?;
    if let Some(uuid) = backend.uuid() {
        writeln!(out, "  UUID: {}", uuid.to_string().cyan())?;
    }
    writeln!(out, "  Keys: {}", backend.key_format().to_string().yellow())?;
    Ok(())
}

fn cmd_put(
    args: PutArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    for path in &args.paths {
        let key = if path.as_os_str() == "-" {
            backend.put_object_from_stream(&mut io::stdin().lock())?
        } else {
            backend
                .put_object_from_file(path)
                .with_context(|| format!("cannot store {}", path.display()))?
        };
        writeln!(out, "{}  {}", key.as_str().yellow(), path.display())?;
    }
    Ok(())
}

fn cmd_cat(
    args: CatArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let key = ObjectKey::parse(args.key.as_str())?;
    backend.with_object(&key, |reader| {
        io::copy(reader, out)?;
        Ok(())
    })?;
    out.flush()?;
    Ok(())
}

fn cmd_has(
    args: KeysArgs,
    backend: &dyn RepositoryBackend,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let keys = parse_keys(&args.keys)?;
    let found = backend.has_objects(&keys)?;
    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = keys
                .iter()
                .zip(&found)
                .map(|(k, &f)| (k.to_string(), json!(f)))
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&map)?)?;
        }
        OutputFormat::Text => {
            for (key, present) in keys.iter().zip(found) {
                let mark = if present { "present".green() } else { "missing".red() };
                writeln!(out, "{}  {}", key.as_str().yellow(), mark)?;
            }
        }
    }
    Ok(())
}

fn cmd_ls(
    backend: &dyn RepositoryBackend,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let keys = backend.collect_keys()?;
            writeln!(out, "{}", serde_json::to_string_pretty(&keys)?)?;
        }
        OutputFormat::Text => {
            for key in backend.list_objects()? {
                writeln!(out, "{}", key?)?;
            }
        }
    }
    Ok(())
}

fn cmd_rm(
    args: KeysArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let keys = parse_keys(&args.keys)?;
    match backend.delete_objects(&keys) {
        Ok(()) => {
            writeln!(out, "{} Deleted {} object(s).", "✓".green(), keys.len())?;
            Ok(())
        }
        Err(RepoError::NotFound(missing)) => {
            for key in &missing {
                writeln!(out, "  {} {}", "missing:".red(), key)?;
            }
            bail!("nothing deleted: {} key(s) not found", missing.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_hash(
    args: CatArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let key = ObjectKey::parse(args.key.as_str())?;
    writeln!(out, "{}", backend.get_object_hash(&key)?)?;
    Ok(())
}

fn cmd_info(
    backend: &dyn RepositoryBackend,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let info = backend.get_info()?;
    if format == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
        return Ok(());
    }
    writeln!(out, "Backend:  {}", info.kind.to_string().bold())?;
    if let Some(location) = &info.location {
        writeln!(out, "Location: {}", location.display())?;
    }
    match info.uuid {
        Some(uuid) => writeln!(out, "UUID:     {}", uuid.to_string().cyan())?,
        None => writeln!(out, "UUID:     {}", "none".dimmed())?,
    }
    writeln!(out, "Keys:     {}", info.key_format.to_string().yellow())?;
    if info.initialised {
        writeln!(out, "Objects:  {} ({} bytes)", info.object_count, info.total_bytes)?;
    } else {
        writeln!(out, "Objects:  {}", "not initialised".dimmed())?;
    }
    Ok(())
}

fn cmd_erase(
    args: EraseArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    if !args.yes {
        bail!("erase destroys every object; pass --yes to confirm");
    }
    backend.erase()?;
    writeln!(out, "{} Erased {} repository.", "✓".green().bold(), backend.kind())?;
    Ok(())
}

fn cmd_export(
    args: ExportArgs,
    backend: &dyn RepositoryBackend,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let pack = export_archive(backend, &args.path)?;
    writeln!(
        out,
        "{} Exported {} object(s) to {}",
        "✓".green().bold(),
        pack.object_count,
        pack.pack_path.display().to_string().bold()
    )?;
    Ok(())
}

fn cmd_import(
    args: ImportArgs,
    backend: &dyn RepositoryBackend,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let archive = ArchiveRepositoryBackend::open(&args.archive)?;
    let report = import_archive(&archive, backend)?;
    if format == OutputFormat::Json {
        let mapping: serde_json::Map<String, serde_json::Value> = report
            .mapping
            .iter()
            .map(|(old, new)| (old.to_string(), json!(new.as_str())))
            .collect();
        let doc = json!({
            "imported": report.mapping.len() - report.skipped,
            "skipped": report.skipped,
            "bytes": report.bytes_copied,
            "mapping": mapping,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
        return Ok(());
    }
    for (old, new) in &report.mapping {
        if old == new {
            writeln!(out, "  {}", new.as_str().yellow())?;
        } else {
            writeln!(out, "  {} → {}", old.as_str().dimmed(), new.as_str().yellow())?;
        }
    }
    writeln!(
        out,
        "{} Imported {} object(s), {} already present.",
        "✓".green().bold(),
        report.mapping.len() - report.skipped,
        report.skipped
    )?;
    Ok(())
}

fn cmd_verify(
    args: VerifyArgs,
    backend: &dyn RepositoryBackend,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let keys = if args.keys.is_empty() {
        backend.collect_keys()?
    } else {
        parse_keys(&args.keys)?
    };

    let mut failures = Vec::new();
    for key in &keys {
        match backend.verify_object(key) {
            Ok(()) => {}
            Err(e @ (RepoError::Corrupt { .. } | RepoError::NotFound(_) | RepoError::Pack(_))) => {
                failures.push((key.clone(), e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    if format == OutputFormat::Json {
        let failed: Vec<_> = failures
            .iter()
            .map(|(key, reason)| json!({ "key": key.as_str(), "error": reason }))
            .collect();
        let doc = json!({ "checked": keys.len(), "failed": failed });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
    } else {
        for (key, reason) in &failures {
            writeln!(out, "  {} {}: {}", "✗".red().bold(), key.as_str().yellow(), reason)?;
        }
    }

    if !failures.is_empty() {
        bail!("{} of {} object(s) failed verification", failures.len(), keys.len());
    }
    if format == OutputFormat::Text {
        writeln!(out, "{} {} object(s) verified.", "✓".green().bold(), keys.len())?;
    }
    Ok(())
}
