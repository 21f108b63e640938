//! TRELLIS CLI
//!
//! Compiles blueprint and runbook manifests into submission-ready
//! documents and prints the entity schemas the compiler validates against.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{ensure, Result, WrapErr};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use trellis_core::{CompilerConfig, Digest};
use trellis_doc::{Document, Manifest};
use trellis_model::{SchemaStore, TypeSchema};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "TRELLIS - compile orchestration manifests into task-graph documents", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
    /// Entity template to load instead of the built-in one
    #[arg(long, global = true)]
    template: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a manifest into a document
    Compile {
        /// Path to the manifest
        manifest: PathBuf,
        /// Output path (stdout when absent)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Compiler configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stamp the document with the compile time
        #[arg(long)]
        stamp: bool,
    },
    /// Compile a manifest without writing the document
    Check {
        /// Path to the manifest
        manifest: PathBuf,
        /// Compiler configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Recompute a compiled document's digest
    Verify {
        /// Path to the document
        document: PathBuf,
        /// Digest the document must have (hex)
        #[arg(long)]
        digest: Option<String>,
    },
    /// Show entity types, their properties and kind tags
    Schema {
        /// Only this type
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let store = load_store(cli.template.as_deref())?;
    match cli.command {
        Commands::Compile {
            manifest,
            output,
            config,
            stamp,
        } => {
            let config = load_config(config.as_deref())?;
            let mut document = compile_manifest(&manifest, &store, &config)?;
            if stamp {
                document = document.with_compiled_at(Utc::now());
            }
            tracing::info!(
                document = %document.metadata.name,
                digest = %document.digest()?,
                "Compiled"
            );
            write_document(&document, output.as_deref())
        }
        Commands::Check { manifest, config } => {
            let config = load_config(config.as_deref())?;
            let document = compile_manifest(&manifest, &store, &config)?;
            println!("{}: ok ({})", manifest.display(), document.digest()?);
            Ok(())
        }
        Commands::Verify { document, digest } => {
            let actual = verify_document(&document, digest.as_deref())?;
            println!("{}: {}", document.display(), actual);
            Ok(())
        }
        Commands::Schema { type_name } => {
            print!("{}", describe_schema(&store, type_name.as_deref())?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let fallback = match verbose {
        0 => "trellis=info",
        1 => "trellis=debug",
        _ => "trellis=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_store(template: Option<&Path>) -> Result<SchemaStore> {
    match template {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading template {}", path.display()))?;
            Ok(SchemaStore::load_str(&text).wrap_err_with(|| format!("loading template {}", path.display()))?)
        }
        None => Ok(SchemaStore::builtin()?.clone()),
    }
}

fn load_config(path: Option<&Path>) -> Result<CompilerConfig> {
    let Some(path) = path else {
        return Ok(CompilerConfig::default());
    };
    let text =
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading config {}", path.display()))?;
    CompilerConfig::from_json(&text).wrap_err_with(|| format!("parsing config {}", path.display()))
}

fn compile_manifest(path: &Path, store: &SchemaStore, config: &CompilerConfig) -> Result<Document> {
    let text =
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading manifest {}", path.display()))?;
    let manifest = Manifest::from_json(&text)?;
    manifest
        .compile(store, config)
        .wrap_err_with(|| format!("compiling {}", path.display()))
}

fn write_document(document: &Document, output: Option<&Path>) -> Result<()> {
    let text = document.to_pretty()?;
    match output {
        Some(path) => std::fs::write(path, text + "\n")
            .wrap_err_with(|| format!("writing {}", path.display())),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

fn verify_document(path: &Path, expected: Option<&str>) -> Result<Digest> {
    let text =
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading document {}", path.display()))?;
    let document: Document =
        serde_json::from_str(&text).wrap_err_with(|| format!("parsing document {}", path.display()))?;
    let actual = document.digest()?;
    if let Some(expected) = expected {
        let expected = Digest::from_hex(expected).wrap_err("parsing expected digest")?;
        ensure!(
            actual == expected,
            "{} has digest {}, expected {}",
            path.display(),
            actual,
            expected
        );
    }
    Ok(actual)
}

fn describe_schema(store: &SchemaStore, only: Option<&str>) -> Result<String> {
    let mut out = String::new();
    match only {
        Some(name) => describe_type(&mut out, store.type_schema(name)?.as_ref()),
        None => store.types().for_each(|schema| describe_type(&mut out, schema)),
    }
    Ok(out)
}

fn describe_type(out: &mut String, schema: &TypeSchema) {
    let _ = writeln!(out, "{} ({})", schema.name, schema.ref_kind);
    for spec in schema.properties.values() {
        let _ = writeln!(out, "  {}: {} = {}", spec.name, spec.kind, spec.default.to_json());
    }
    for (alias, target) in &schema.aliases {
        let _ = writeln!(out, "  {} -> {}", alias, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"{
        "root": {"type": "runbook", "attrs": {
            "name": "hello",
            "endpoints": [{"name": "box", "values": ["127.0.0.1"]}],
            "default_target": {"$ref": {"kind": "app_endpoint", "name": "box"}}
        }},
        "graphs": [{
            "owner": {"kind": "app_runbook", "name": "hello"},
            "body": [
                {"task": {"name": "greet", "type": "exec", "script_type": "sh", "script": "echo hi"}},
                {"task": {"name": "pause", "type": "delay", "interval_secs": 2}}
            ]
        }]
    }"#;

    #[test]
    fn test_compile_to_file() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("hello.json");
        let output = dir.path().join("hello.doc.json");
        std::fs::write(&manifest, MANIFEST).unwrap();

        let store = load_store(None).unwrap();
        let document = compile_manifest(&manifest, &store, &CompilerConfig::default()).unwrap();
        write_document(&document, Some(&output)).unwrap();

        let written: Document = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written, document);
        assert_eq!(written.task_definitions().unwrap().len(), 3);
    }

    #[test]
    fn test_verify_digest() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("hello.json");
        let output = dir.path().join("hello.doc.json");
        std::fs::write(&manifest, MANIFEST).unwrap();
        let store = load_store(None).unwrap();
        let document = compile_manifest(&manifest, &store, &CompilerConfig::default()).unwrap();
        write_document(&document, Some(&output)).unwrap();

        let digest = document.digest().unwrap();
        assert_eq!(verify_document(&output, None).unwrap(), digest);
        assert_eq!(verify_document(&output, Some(&digest.to_hex())).unwrap(), digest);

        let other = Digest::compute(b"something else").to_hex();
        let err = verify_document(&output, Some(&other)).unwrap_err();
        assert!(format!("{:#}", err).contains("expected"));
        assert!(verify_document(&output, Some("not-hex")).is_err());
    }

    #[test]
    fn test_compile_reports_path() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("broken.json");
        std::fs::write(&manifest, MANIFEST.replace("\"box\"}}", "\"nowhere\"}}")).unwrap();

        let store = load_store(None).unwrap();
        let err = compile_manifest(&manifest, &store, &CompilerConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn test_missing_manifest() {
        let store = load_store(None).unwrap();
        let err = compile_manifest(Path::new("/nonexistent/m.json"), &store, &CompilerConfig::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trellis.json");
        std::fs::write(&path, r#"{"spec_version": 3, "emit_task_uuids": false}"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.spec_version, 3);
        assert!(!config.emit_task_uuids);
        assert_eq!(load_config(None).unwrap(), CompilerConfig::default());
    }

    #[test]
    fn test_custom_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.json");
        std::fs::write(
            &path,
            r#"{"types": {"Service": {"kind": "app_service", "properties": {
                "name": {"type": "string", "default": ""},
                "port": {"type": "integer", "default": 0}}}}}"#,
        )
        .unwrap();

        let store = load_store(Some(&path)).unwrap();
        let text = describe_schema(&store, None).unwrap();
        assert_eq!(text, "Service (app_service)\n  name: string = \"\"\n  port: integer = 0\n");
    }

    #[test]
    fn test_describe_builtin_type() {
        let store = load_store(None).unwrap();
        let text = describe_schema(&store, Some("endpoint")).unwrap();
        assert!(text.starts_with("endpoint (app_endpoint)\n"));
        assert!(text.contains("  values: list:string = []\n"));
        assert!(text.contains("  credential -> login_credential_reference\n"));
        assert!(describe_schema(&store, Some("nope")).is_err());
    }
}
